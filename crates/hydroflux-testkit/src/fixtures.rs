//! On-disk fixtures for integration tests: driving-data files in the
//! portable field schema and timestamp helpers.

use std::path::{Path, PathBuf};

use chrono::Duration;
use serde_json::json;

use hydroflux_common::{Calendar, DateTime};

/// Uniform driving values the dummy scheme is replayed against.
pub const DRIVING_A: f64 = 1.0;
pub const DRIVING_B: f64 = 2.0;
pub const ANCILLARY_C: f64 = 3.0;

/// Daily timestamps starting at `start` (inclusive), one per step.
pub fn daily_times(start: &str, days: usize) -> Vec<String> {
    let start = DateTime::parse(start, Calendar::Gregorian).expect("fixture start datetime");
    (0..days)
        .map(|d| (start + Duration::days(d as i64)).to_string())
        .collect()
}

fn uniform_rows(shape: (usize, usize), value: f64) -> serde_json::Value {
    json!(vec![vec![value; shape.1]; shape.0])
}

/// Writes the dummy components' driving file for one grid shape: dynamic
/// `source_a`/`source_b` (constant in space and time) and the static
/// `source_c` ancillary. Returns the file path.
pub fn write_drivings(dir: &Path, file: &str, shape: (usize, usize), times: &[String]) -> PathBuf {
    let frames_a: Vec<_> = times.iter().map(|_| uniform_rows(shape, DRIVING_A)).collect();
    let frames_b: Vec<_> = times.iter().map(|_| uniform_rows(shape, DRIVING_B)).collect();
    let doc = json!({
        "fields": [
            {
                "name": "source_a",
                "units": "kg m-2 s-1",
                "kind": "dynamic",
                "times": times,
                "data": frames_a,
            },
            {
                "name": "source_b",
                "units": "kg m-2 s-1",
                "kind": "dynamic",
                "times": times,
                "data": frames_b,
            },
            {
                "name": "source_c",
                "units": "1",
                "kind": "static",
                "data": uniform_rows(shape, ANCILLARY_C),
            },
        ]
    });
    let path = dir.join(file);
    std::fs::write(&path, serde_json::to_string_pretty(&doc).expect("fixture json"))
        .expect("fixture write");
    path
}

/// The `dataset:` block wiring the dummy inputs to [`write_drivings`] output.
pub fn dataset_yaml(file: &Path, with_ancillary: bool) -> String {
    let file = file.display();
    let mut block = format!(
        "  dataset:\n    driving_a: {{files: [\"{file}\"], select: source_a}}\n    driving_b: {{files: [\"{file}\"], select: source_b}}\n"
    );
    if with_ancillary {
        block.push_str(&format!(
            "    ancillary_c: {{files: [\"{file}\"], select: source_c}}\n"
        ));
    }
    block
}

/// Scalar replay of the dummy transfer scheme on uniform fields, mirroring
/// one component ordering tick: returns per-day `(state_a, transfer_i,
/// transfer_j, output_x)` for `days` days on identical grids and steps.
pub fn replay_uniform(days: usize, parameter_c: f64, constant_c: f64) -> Vec<(f64, f64, f64, f64)> {
    let (mut k_held, mut l_held, mut n_held) = (0.0, 0.0, 0.0);
    let (mut state_a, mut state_b) = (0.0, 0.0);
    let mut out = Vec::with_capacity(days);
    for _ in 0..days {
        // surfacelayer
        state_a += 1.0;
        let transfer_i = DRIVING_A + DRIVING_B + l_held + ANCILLARY_C * state_a;
        let transfer_j = DRIVING_A + k_held;
        // subsurface
        state_b += 2.0;
        let transfer_k = DRIVING_A + n_held;
        let transfer_m = transfer_i + state_b;
        // openwater
        let transfer_l = transfer_j + transfer_m;
        let transfer_n = transfer_j;
        let output_x = parameter_c * transfer_j + constant_c;

        k_held = transfer_k;
        l_held = transfer_l;
        n_held = transfer_n;
        out.push((state_a, transfer_i, transfer_j, output_x));
    }
    out
}
