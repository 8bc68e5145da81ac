//! Cross-resolution coupling: conservative remapping of `sum` transfers and
//! constant-preserving `mean` remapping.

mod common;

use common::{Block, START, model_yaml, read_records, record_path, records_yaml, shape_at};
use float_cmp::assert_approx_eq;
use hydroflux::Model;
use hydroflux_testkit::fixtures;

#[test]
fn sum_transfers_conserve_mass_onto_a_finer_grid() {
    common::register();
    let tmp = tempfile::tempdir().unwrap();
    let out = tmp.path().join("out");
    let times = fixtures::daily_times(START, 16);
    let coarse = fixtures::write_drivings(tmp.path(), "coarse.json", shape_at(1.0), &times);
    let fine = fixtures::write_drivings(tmp.path(), "fine.json", shape_at(0.5), &times);

    let blocks = vec![
        Block {
            key: "surfacelayer",
            class: "DummySurfaceLayer",
            step_days: 1,
            resolution: 1.0,
            dataset: fixtures::dataset_yaml(&coarse, true),
            values: String::new(),
            records: records_yaml(&[("transfer_i", "1 day", "[point]")]),
        },
        Block {
            key: "subsurface",
            class: "DummySubSurface",
            step_days: 1,
            resolution: 0.5,
            dataset: fixtures::dataset_yaml(&fine, false),
            values: String::new(),
            records: records_yaml(&[("received_i", "1 day", "[point]")]),
        },
        Block {
            key: "openwater",
            class: "DummyOpenWater",
            step_days: 1,
            resolution: 1.0,
            dataset: String::new(),
            values: "  parameters:\n    parameter_c: [3.0, \"1\"]\n".to_string(),
            records: String::new(),
        },
    ];
    let yaml = model_yaml("remap", tmp.path(), &out, &blocks);
    Model::from_config_str(&yaml).unwrap().simulate(None).unwrap();

    let (_, published) =
        read_records(&record_path(&out, "remap", "run", "surfacelayer", "transfer_i"));
    let (_, received) =
        read_records(&record_path(&out, "remap", "run", "subsurface", "received_i"));
    assert_eq!(published.len(), 16);
    assert_eq!(received.len(), 16);

    for (src, dst) in published.iter().zip(&received) {
        assert_eq!(src.shape, vec![4, 3]);
        assert_eq!(dst.shape, vec![8, 6]);
        let src_total: f64 = src.data.iter().sum();
        let dst_total: f64 = dst.data.iter().sum();
        assert_approx_eq!(
            f64,
            src_total,
            dst_total,
            epsilon = src_total.abs() * 1e-9
        );
    }
}

#[test]
fn mean_transfers_keep_uniform_fields_uniform_on_a_finer_grid() {
    common::register();
    let tmp = tempfile::tempdir().unwrap();
    let out = tmp.path().join("out");
    let times = fixtures::daily_times(START, 16);
    let coarse = fixtures::write_drivings(tmp.path(), "coarse.json", shape_at(1.0), &times);

    // Open water runs on 0.25 degrees; everything else on 1 degree.
    let blocks = vec![
        Block {
            key: "surfacelayer",
            class: "DummySurfaceLayer",
            step_days: 1,
            resolution: 1.0,
            dataset: fixtures::dataset_yaml(&coarse, true),
            values: String::new(),
            records: String::new(),
        },
        Block {
            key: "subsurface",
            class: "DummySubSurface",
            step_days: 1,
            resolution: 1.0,
            dataset: fixtures::dataset_yaml(&coarse, false),
            values: String::new(),
            records: String::new(),
        },
        Block {
            key: "openwater",
            class: "DummyOpenWater",
            step_days: 1,
            resolution: 0.25,
            dataset: String::new(),
            values: "  parameters:\n    parameter_c: [3.0, \"1\"]\n  constants:\n    constant_c: [3.0, \"1\"]\n".to_string(),
            records: records_yaml(&[("output_x", "1 day", "[point]")]),
        },
    ];
    let yaml = model_yaml("fine", tmp.path(), &out, &blocks);
    Model::from_config_str(&yaml).unwrap().simulate(None).unwrap();

    let replay = fixtures::replay_uniform(16, 3.0, 3.0);
    let (_, rows) = read_records(&record_path(&out, "fine", "run", "openwater", "output_x"));
    assert_eq!(rows.len(), 16);
    for (day, row) in rows.iter().enumerate() {
        let (_, _, _, expected_x) = replay[day];
        assert_eq!(row.shape, vec![16, 12]);
        // output_x = parameter_c * transfer_j + constant_c on every cell; the
        // area-weighted remap keeps the uniform transfer_j uniform.
        for v in &row.data {
            assert_approx_eq!(f64, *v, expected_x, epsilon = 1e-9);
        }
    }
}
