//! Dump / resume: bit-identical continuation and abort behaviour.

mod common;

use std::path::Path;

use common::{Block, START, model_yaml, read_records, record_path, records_yaml, shape_at};
use hydroflux::{Calendar, DateTime, Model, ModelError};
use hydroflux_testkit::fixtures;

fn dummy_blocks(config_dir: &Path, openwater_class: &'static str, values: &str) -> Vec<Block> {
    let times = fixtures::daily_times(START, 16);
    let drivings = fixtures::write_drivings(config_dir, "drivings.json", shape_at(1.0), &times);
    vec![
        Block {
            key: "surfacelayer",
            class: "DummySurfaceLayer",
            step_days: 1,
            resolution: 1.0,
            dataset: fixtures::dataset_yaml(&drivings, true),
            values: String::new(),
            records: records_yaml(&[
                ("state_a", "1 day", "[point]"),
                ("transfer_i", "1 day", "[point]"),
                ("transfer_i", "8 days", "[sum, mean]"),
            ]),
        },
        Block {
            key: "subsurface",
            class: "DummySubSurface",
            step_days: 1,
            resolution: 1.0,
            dataset: {
                let drivings = config_dir.join("drivings.json");
                fixtures::dataset_yaml(&drivings, false)
            },
            values: String::new(),
            records: records_yaml(&[("state_b", "1 day", "[point]")]),
        },
        Block {
            key: "openwater",
            class: openwater_class,
            step_days: 1,
            resolution: 1.0,
            dataset: String::new(),
            values: values.to_string(),
            records: records_yaml(&[("output_x", "1 day", "[point]")]),
        },
    ]
}

const OPENWATER_VALUES: &str =
    "  parameters:\n    parameter_c: [3.0, \"1\"]\n  constants:\n    constant_c: [3.0, \"1\"]\n";

fn all_record_files(dir: &Path) -> Vec<String> {
    let mut names: Vec<String> = std::fs::read_dir(dir)
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .filter(|n| n.contains("_records_"))
        .collect();
    names.sort();
    names
}

#[test]
fn resume_reproduces_an_uninterrupted_run_bit_for_bit() {
    common::register();

    // Reference: one clean 16-day run with dumps every 2 days.
    let ref_tmp = tempfile::tempdir().unwrap();
    let ref_out = ref_tmp.path().join("out");
    let blocks = dummy_blocks(ref_tmp.path(), "DummyOpenWater", OPENWATER_VALUES);
    let yaml = model_yaml("twin", ref_tmp.path(), &ref_out, &blocks);
    let mut reference = Model::from_config_str(&yaml).unwrap();
    reference.simulate(Some(chrono::Duration::days(2))).unwrap();

    // Interrupted twin: same configuration in its own directories.
    let tmp = tempfile::tempdir().unwrap();
    let out = tmp.path().join("out");
    let blocks = dummy_blocks(tmp.path(), "DummyOpenWater", OPENWATER_VALUES);
    let yaml = model_yaml("twin", tmp.path(), &out, &blocks);
    let mut interrupted = Model::from_config_str(&yaml).unwrap();
    interrupted.simulate(Some(chrono::Duration::days(2))).unwrap();

    // A fresh model value on the same configuration rewinds to the day-8
    // frame and replays the tail.
    let mut resumed = Model::from_config_str(&yaml).unwrap();
    let at = DateTime::parse("2019-01-09 09:00:00", Calendar::Gregorian).unwrap();
    resumed.resume("run", at).unwrap();

    let names = all_record_files(&out);
    assert_eq!(names, all_record_files(&ref_out));
    assert!(!names.is_empty());
    for name in names {
        let a = std::fs::read(ref_out.join(&name)).unwrap();
        let b = std::fs::read(out.join(&name)).unwrap();
        assert_eq!(a, b, "record file '{name}' diverged after resume");
    }
}

#[test]
fn resume_finds_the_latest_frame_before_the_requested_instant() {
    common::register();
    let tmp = tempfile::tempdir().unwrap();
    let out = tmp.path().join("out");
    let blocks = dummy_blocks(tmp.path(), "DummyOpenWater", OPENWATER_VALUES);
    let yaml = model_yaml("seek", tmp.path(), &out, &blocks);
    Model::from_config_str(&yaml)
        .unwrap()
        .simulate(Some(chrono::Duration::days(4)))
        .unwrap();

    // Day 7 is not a dump boundary; the day-4 frame is the one used.
    let mut resumed = Model::from_config_str(&yaml).unwrap();
    let at = DateTime::parse("2019-01-08 08:00:00", Calendar::Gregorian).unwrap();
    resumed.resume("run", at).unwrap();

    let (_, rows) = read_records(&record_path(&out, "seek", "run", "surfacelayer", "state_a"));
    assert_eq!(rows.len(), 16);
    assert_eq!(rows[15].data[0], 16.0);

    // Requesting an instant before the first frame is an error.
    let mut too_early = Model::from_config_str(&yaml).unwrap();
    let at = DateTime::parse("2019-01-02 09:00:00", Calendar::Gregorian).unwrap();
    assert!(matches!(
        too_early.resume("run", at),
        Err(ModelError::Io(_))
    ));
}

#[test]
fn component_failure_aborts_with_a_dump_and_a_failure_record() {
    common::register();
    let tmp = tempfile::tempdir().unwrap();
    let out = tmp.path().join("out");
    let values =
        "  parameters:\n    parameter_c: [3.0, \"1\"]\n    explode_after: [10.0, \"1\"]\n  constants:\n    constant_c: [3.0, \"1\"]\n";
    let blocks = dummy_blocks(tmp.path(), "ExplodingOpenWater", values);
    let yaml = model_yaml("boom", tmp.path(), &out, &blocks);
    let mut model = Model::from_config_str(&yaml).unwrap();

    let err = model
        .simulate(Some(chrono::Duration::days(2)))
        .expect_err("the openwater component must raise on day 11");
    assert!(matches!(err, ModelError::Component(_)));

    let failure = std::fs::read_to_string(out.join("boom_error.json")).unwrap();
    let failure: serde_json::Value = serde_json::from_str(&failure).unwrap();
    assert_eq!(failure["error"], "ComponentError");
    assert_eq!(failure["tag"], "run");

    let manifest =
        std::fs::read_to_string(out.join("boom_run_dump_manifest.json")).unwrap();
    let manifest: serde_json::Value = serde_json::from_str(&manifest).unwrap();
    let frames = manifest["frames"].as_array().unwrap();
    // Scheduled frames at days 2..10 plus the best-effort abort frame.
    assert!(frames.len() >= 5);
}
