//! Three dummy components on identical grids and steps: transfer algebra,
//! record aggregation, spin-up and no-op boundaries.

mod common;

use common::{Block, END, START, model_yaml, read_records, record_path, records_yaml, rows_of, shape_at};
use float_cmp::assert_approx_eq;
use hydroflux::{Calendar, DateTime, Model};
use hydroflux_testkit::fixtures;

fn three_dummies(config_dir: &std::path::Path, records: [String; 3]) -> Vec<Block> {
    let times = fixtures::daily_times(START, 16);
    let drivings = fixtures::write_drivings(config_dir, "drivings.json", shape_at(1.0), &times);
    let [sl_records, ss_records, ow_records] = records;
    vec![
        Block {
            key: "surfacelayer",
            class: "DummySurfaceLayer",
            step_days: 1,
            resolution: 1.0,
            dataset: fixtures::dataset_yaml(&drivings, true),
            values: String::new(),
            records: sl_records,
        },
        Block {
            key: "subsurface",
            class: "DummySubSurface",
            step_days: 1,
            resolution: 1.0,
            dataset: fixtures::dataset_yaml(&drivings, false),
            values: String::new(),
            records: ss_records,
        },
        Block {
            key: "openwater",
            class: "DummyOpenWater",
            step_days: 1,
            resolution: 1.0,
            dataset: String::new(),
            values: "  parameters:\n    parameter_c: [3.0, \"1\"]\n  constants:\n    constant_c: [3.0, \"1\"]\n".to_string(),
            records: ow_records,
        },
    ]
}

#[test]
fn transfer_algebra_and_state_updates_match_the_replay() {
    common::register();
    let tmp = tempfile::tempdir().unwrap();
    let out = tmp.path().join("out");
    let blocks = three_dummies(
        tmp.path(),
        [
            records_yaml(&[
                ("state_a", "1 day", "[point]"),
                ("transfer_i", "1 day", "[point]"),
            ]),
            records_yaml(&[("state_b", "1 day", "[point]")]),
            records_yaml(&[("output_x", "1 day", "[point]")]),
        ],
    );
    let yaml = model_yaml("demo", tmp.path(), &out, &blocks);
    let mut model = Model::from_config_str(&yaml).unwrap();
    model.simulate(None).unwrap();

    let replay = fixtures::replay_uniform(16, 3.0, 3.0);

    let (_, rows) = read_records(&record_path(&out, "demo", "run", "surfacelayer", "state_a"));
    assert_eq!(rows.len(), 16);
    assert_approx_eq!(f64, rows[15].data[0], 16.0, ulps = 2);
    assert_eq!(rows[15].end_time, END);

    let (_, rows) = read_records(&record_path(&out, "demo", "run", "subsurface", "state_b"));
    assert_approx_eq!(f64, rows[15].data[0], 32.0, ulps = 2);

    let (meta, rows) = read_records(&record_path(&out, "demo", "run", "surfacelayer", "transfer_i"));
    assert_eq!(meta.units, "kg m-2 s-1");
    assert_eq!(rows.len(), 16);
    for (day, row) in rows.iter().enumerate() {
        let (_, expected_i, _, _) = replay[day];
        assert_eq!(row.shape, vec![4, 3]);
        for v in &row.data {
            assert_approx_eq!(f64, *v, expected_i, epsilon = 1e-9);
        }
    }

    let (_, rows) = read_records(&record_path(&out, "demo", "run", "openwater", "output_x"));
    for (day, row) in rows.iter().enumerate() {
        let (_, _, _, expected_x) = replay[day];
        for v in &row.data {
            assert_approx_eq!(f64, *v, expected_x, epsilon = 1e-9);
        }
    }
}

#[test]
fn window_aggregates_agree_with_their_point_samples() {
    common::register();
    let tmp = tempfile::tempdir().unwrap();
    let out = tmp.path().join("out");
    let blocks = three_dummies(
        tmp.path(),
        [
            String::new(),
            String::new(),
            records_yaml(&[
                ("output_x", "1 day", "[point]"),
                ("output_x", "8 days", "[sum, mean, min, max]"),
            ]),
        ],
    );
    let yaml = model_yaml("agg", tmp.path(), &out, &blocks);
    Model::from_config_str(&yaml).unwrap().simulate(None).unwrap();

    let (_, rows) = read_records(&record_path(&out, "agg", "run", "openwater", "output_x"));
    let points = rows_of(&rows, 86_400, "point");
    assert_eq!(points.len(), 16);
    for method in ["sum", "mean", "min", "max"] {
        assert_eq!(rows_of(&rows, 8 * 86_400, method).len(), 2, "{method}");
    }

    for (w, aggregate) in rows_of(&rows, 8 * 86_400, "sum").iter().enumerate() {
        let window: Vec<f64> = points[8 * w..8 * (w + 1)].iter().map(|r| r.data[0]).collect();
        assert_approx_eq!(
            f64,
            aggregate.data[0],
            window.iter().sum::<f64>(),
            epsilon = 1e-9
        );
        // Window end-times are multiples of the window from simulation start.
        let day9 = DateTime::parse(START, Calendar::Gregorian).unwrap() + chrono::Duration::days(8 * (w as i64 + 1));
        assert_eq!(aggregate.end_time, day9.to_string());
    }
    for (w, aggregate) in rows_of(&rows, 8 * 86_400, "mean").iter().enumerate() {
        let window: Vec<f64> = points[8 * w..8 * (w + 1)].iter().map(|r| r.data[0]).collect();
        assert_approx_eq!(
            f64,
            aggregate.data[0],
            window.iter().sum::<f64>() / 8.0,
            epsilon = 1e-9
        );
        // sum = mean * (window / step) over a constant-step component.
        let sum_row = &rows_of(&rows, 8 * 86_400, "sum")[w];
        assert_approx_eq!(f64, sum_row.data[0], aggregate.data[0] * 8.0, epsilon = 1e-9);
    }
    for (w, aggregate) in rows_of(&rows, 8 * 86_400, "min").iter().enumerate() {
        let lo = points[8 * w..8 * (w + 1)]
            .iter()
            .map(|r| r.data[0])
            .fold(f64::INFINITY, f64::min);
        assert_approx_eq!(f64, aggregate.data[0], lo, ulps = 2);
    }
    for (w, aggregate) in rows_of(&rows, 8 * 86_400, "max").iter().enumerate() {
        let hi = points[8 * w..8 * (w + 1)]
            .iter()
            .map(|r| r.data[0])
            .fold(f64::NEG_INFINITY, f64::max);
        assert_approx_eq!(f64, aggregate.data[0], hi, ulps = 2);
    }
}

#[test]
fn spin_up_carries_states_and_tags_records_per_cycle() {
    common::register();
    let tmp = tempfile::tempdir().unwrap();
    let out = tmp.path().join("out");
    let blocks = three_dummies(
        tmp.path(),
        [
            records_yaml(&[("state_a", "1 day", "[point]")]),
            String::new(),
            String::new(),
        ],
    );
    let yaml = model_yaml("spin", tmp.path(), &out, &blocks);
    let mut model = Model::from_config_str(&yaml).unwrap();

    let start = DateTime::parse(START, Calendar::Gregorian).unwrap();
    let end = start + chrono::Duration::days(8);
    model.spin_up(start, end, 2, None).unwrap();
    model.simulate(None).unwrap();

    for cycle in 1..=2 {
        let tag = format!("spinup-{cycle}");
        let (_, rows) =
            read_records(&record_path(&out, "spin", &tag, "surfacelayer", "state_a"));
        assert_eq!(rows.len(), 8);
        // Cycle 1 ends at 8 increments, cycle 2 at 16: states carry forward.
        assert_approx_eq!(f64, rows[7].data[0], 8.0 * cycle as f64, ulps = 2);
    }

    let (_, rows) = read_records(&record_path(&out, "spin", "run", "surfacelayer", "state_a"));
    assert_approx_eq!(f64, rows[15].data[0], 16.0 + 16.0, ulps = 2);
}

#[test]
fn zero_cycle_spin_up_and_empty_windows_are_no_ops() {
    common::register();
    let tmp = tempfile::tempdir().unwrap();
    let out = tmp.path().join("out");
    let blocks = three_dummies(
        tmp.path(),
        [
            records_yaml(&[("state_a", "1 day", "[point]")]),
            String::new(),
            String::new(),
        ],
    );
    let yaml = model_yaml("noop", tmp.path(), &out, &blocks);
    let mut model = Model::from_config_str(&yaml).unwrap();

    let start = DateTime::parse(START, Calendar::Gregorian).unwrap();
    let end = start + chrono::Duration::days(8);
    model.spin_up(start, end, 0, None).unwrap();
    model.spin_up(start, start, 3, None).unwrap();
    assert!(
        !out.exists() || std::fs::read_dir(&out).unwrap().next().is_none(),
        "no-op spin-ups must write nothing"
    );

    // States were untouched: the main run still starts from zero.
    model.simulate(None).unwrap();
    let (_, rows) = read_records(&record_path(&out, "noop", "run", "surfacelayer", "state_a"));
    assert_approx_eq!(f64, rows[15].data[0], 16.0, ulps = 2);
}
