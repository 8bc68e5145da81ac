//! Sparse remapping weights between two rectilinear grids.
//!
//! For a source grid S and destination grid D the weights form a sparse
//! matrix W with `value_D[d] = sum_s W[d,s] * value_S[s]`. Two regimes:
//!
//! - [`RemapKind::Conservative`] (for `sum` transfers):
//!   `W[d,s] = area(s ∩ d) / area(s)` — a source value is split over the
//!   destination cells in proportion to overlap, so column sums are 1 and
//!   total mass is preserved.
//! - [`RemapKind::AreaWeighted`] (for `mean`/`min`/`max`):
//!   `W[d,s] = area(s ∩ d) / area(d)` — row sums are 1, so a constant field
//!   stays constant. `min`/`max` only use the weights to find contributing
//!   source cells.
//!
//! Overlap fractions always come from the bounds geometry, never from a
//! user-supplied `cell_area` field.
//!
//! Weights are computed once at model construction and cached per
//! (source grid, destination grid, regime) wiring.

use ndarray::Array2;
use smallvec::SmallVec;

use hydroflux_common::ShapeError;

use crate::EARTH_RADIUS;
use crate::grid::{LatLonGrid, computed_area};

/// Overlaps thinner than this (in sin-latitude or radian units) are treated
/// as bound-touching, not overlapping.
const OVERLAP_TOL: f64 = 1e-12;

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum RemapKind {
    /// Normalise by source cell area (`sum` transfers).
    Conservative,
    /// Normalise by destination cell area (`mean`/`min`/`max` transfers).
    AreaWeighted,
}

/// Compressed-row weights from one grid onto another.
#[derive(Debug, Clone)]
pub struct RemapWeights {
    kind: RemapKind,
    src_shape: (usize, usize),
    dst_shape: (usize, usize),
    row_ptr: Vec<usize>,
    cols: Vec<usize>,
    weights: Vec<f64>,
    /// Destination rows whose weights all vanished under the mask; they
    /// yield NaN (area-weighted) or zero (conservative) on apply.
    empty: Vec<bool>,
}

/// 1-D overlap table: for each destination interval, the source intervals it
/// intersects with the size of each intersection.
fn axis_overlaps(
    src_bounds: &[f64],
    dst_bounds: &[f64],
    measure: impl Fn(f64, f64) -> f64,
) -> Vec<SmallVec<[(usize, f64); 4]>> {
    let n_dst = dst_bounds.len() - 1;
    let n_src = src_bounds.len() - 1;
    let mut table = Vec::with_capacity(n_dst);
    for d in 0..n_dst {
        let (dlo, dhi) = (dst_bounds[d], dst_bounds[d + 1]);
        let mut row: SmallVec<[(usize, f64); 4]> = SmallVec::new();
        for s in 0..n_src {
            let lo = src_bounds[s].max(dlo);
            let hi = src_bounds[s + 1].min(dhi);
            if hi > lo {
                let m = measure(lo, hi);
                if m > OVERLAP_TOL {
                    row.push((s, m));
                }
            }
        }
        table.push(row);
    }
    table
}

impl RemapWeights {
    /// Builds the weights from `src` onto `dst`. The source grid's land/sea
    /// mask (if any) zeroes the weights of sea cells; destination rows left
    /// without any contributor are flagged.
    pub fn build(src: &LatLonGrid, dst: &LatLonGrid, kind: RemapKind) -> Self {
        let src_shape = src.shape();
        let dst_shape = dst.shape();
        let src_area = computed_area(src.lat_bounds(), src.lon_bounds());
        let dst_area = computed_area(dst.lat_bounds(), dst.lon_bounds());

        // Separable overlaps: area(s ∩ d) = R^2 * Δsinφ * Δλ.
        let lat_over = axis_overlaps(src.lat_bounds(), dst.lat_bounds(), |lo, hi| {
            hi.to_radians().sin() - lo.to_radians().sin()
        });
        let lon_over = axis_overlaps(src.lon_bounds(), dst.lon_bounds(), |lo, hi| {
            (hi - lo).to_radians()
        });

        let dst_len = dst_shape.0 * dst_shape.1;
        let mut row_ptr = Vec::with_capacity(dst_len + 1);
        let mut cols = Vec::new();
        let mut weights = Vec::new();
        let mut empty = vec![false; dst_len];
        row_ptr.push(0);

        for id in 0..dst_shape.0 {
            for jd in 0..dst_shape.1 {
                let d_flat = id * dst_shape.1 + jd;
                let row_start = cols.len();
                let dst_active = dst.mask().is_none_or(|m| m[[id, jd]]);
                if dst_active {
                    for &(is, lat_part) in &lat_over[id] {
                        for &(js, lon_part) in &lon_over[jd] {
                            if !src.mask().is_none_or(|m| m[[is, js]]) {
                                continue;
                            }
                            let overlap = EARTH_RADIUS * EARTH_RADIUS * lat_part * lon_part;
                            let denom = match kind {
                                RemapKind::Conservative => src_area[[is, js]],
                                RemapKind::AreaWeighted => dst_area[[id, jd]],
                            };
                            cols.push(is * src_shape.1 + js);
                            weights.push(overlap / denom);
                        }
                    }
                }
                if cols.len() == row_start {
                    empty[d_flat] = true;
                } else if kind == RemapKind::AreaWeighted {
                    // Partially masked rows no longer sum to 1; renormalise so
                    // a constant field stays constant on unmasked cells.
                    let total: f64 = weights[row_start..].iter().sum();
                    for w in &mut weights[row_start..] {
                        *w /= total;
                    }
                }
                row_ptr.push(cols.len());
            }
        }

        Self {
            kind,
            src_shape,
            dst_shape,
            row_ptr,
            cols,
            weights,
            empty,
        }
    }

    pub fn kind(&self) -> RemapKind {
        self.kind
    }

    pub fn dst_shape(&self) -> (usize, usize) {
        self.dst_shape
    }

    /// True when some destination rows have no contributing source cell.
    pub fn has_empty_rows(&self) -> bool {
        self.empty.iter().any(|&e| e)
    }

    fn check(&self, name: &str, src: &Array2<f64>) -> Result<(), ShapeError> {
        if src.dim() != self.src_shape {
            return Err(ShapeError::new(
                name,
                &[self.src_shape.0, self.src_shape.1],
                &[src.dim().0, src.dim().1],
            ));
        }
        Ok(())
    }

    /// Weighted application `W * v` (the `mean`/`sum` path).
    pub fn apply(&self, name: &str, src: &Array2<f64>) -> Result<Array2<f64>, ShapeError> {
        self.check(name, src)?;
        let flat: Vec<f64> = src.iter().copied().collect();
        let fill = match self.kind {
            RemapKind::Conservative => 0.0,
            RemapKind::AreaWeighted => f64::NAN,
        };
        let mut out = Array2::zeros(self.dst_shape);
        for (d, cell) in out.iter_mut().enumerate() {
            if self.empty[d] {
                *cell = fill;
                continue;
            }
            let mut acc = 0.0;
            for k in self.row_ptr[d]..self.row_ptr[d + 1] {
                acc += self.weights[k] * flat[self.cols[k]];
            }
            *cell = acc;
        }
        Ok(out)
    }

    /// Scalar reduction over contributing source cells (the `min`/`max`
    /// path); weights only select the contributors.
    pub fn apply_reduce(
        &self,
        name: &str,
        src: &Array2<f64>,
        reduce: impl Fn(f64, f64) -> f64,
    ) -> Result<Array2<f64>, ShapeError> {
        self.check(name, src)?;
        let flat: Vec<f64> = src.iter().copied().collect();
        let mut out = Array2::zeros(self.dst_shape);
        for (d, cell) in out.iter_mut().enumerate() {
            let mut acc = f64::NAN;
            for k in self.row_ptr[d]..self.row_ptr[d + 1] {
                let v = flat[self.cols[k]];
                acc = if acc.is_nan() { v } else { reduce(acc, v) };
            }
            *cell = acc;
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use float_cmp::assert_approx_eq;
    use ndarray::{Array2, arr2};
    use proptest::prelude::*;

    fn coarse() -> LatLonGrid {
        LatLonGrid::from_extent((51.0, 55.0), (-2.0, 1.0), 1.0, 1.0).unwrap()
    }

    fn fine() -> LatLonGrid {
        LatLonGrid::from_extent((51.0, 55.0), (-2.0, 1.0), 0.5, 0.5).unwrap()
    }

    #[test]
    fn identity_on_matching_grids() {
        let g = coarse();
        let w = RemapWeights::build(&g, &g, RemapKind::AreaWeighted);
        let v = Array2::from_shape_fn((4, 3), |(i, j)| (i * 3 + j) as f64);
        let out = w.apply("v", &v).unwrap();
        for (a, b) in v.iter().zip(out.iter()) {
            assert_approx_eq!(f64, *a, *b, epsilon = 1e-12);
        }
    }

    #[test]
    fn conservative_refinement_preserves_mass() {
        let w = RemapWeights::build(&coarse(), &fine(), RemapKind::Conservative);
        let v = Array2::from_shape_fn((4, 3), |(i, j)| 1.0 + (i * 3 + j) as f64);
        let out = w.apply("v", &v).unwrap();
        assert_eq!(out.dim(), (8, 6));
        assert_approx_eq!(f64, out.sum(), v.sum(), epsilon = v.sum() * 1e-12);
    }

    #[test]
    fn conservative_coarsening_preserves_mass() {
        let w = RemapWeights::build(&fine(), &coarse(), RemapKind::Conservative);
        let v = Array2::from_shape_fn((8, 6), |(i, j)| 0.5 + (i + j) as f64);
        let out = w.apply("v", &v).unwrap();
        assert_approx_eq!(f64, out.sum(), v.sum(), epsilon = v.sum() * 1e-12);
    }

    #[test]
    fn area_weighted_keeps_constants_constant() {
        for (a, b) in [(coarse(), fine()), (fine(), coarse())] {
            let w = RemapWeights::build(&a, &b, RemapKind::AreaWeighted);
            let v = Array2::from_elem(a.shape(), 3.25);
            let out = w.apply("v", &v).unwrap();
            for c in out.iter() {
                assert_approx_eq!(f64, *c, 3.25, epsilon = 1e-9);
            }
        }
    }

    #[test]
    fn masked_source_cells_do_not_contribute() {
        let mut mask = Array2::from_elem((4, 3), true);
        mask[[0, 0]] = false;
        let src = coarse().with_mask(mask).unwrap();
        let w = RemapWeights::build(&src, &fine(), RemapKind::Conservative);
        let mut v = Array2::from_elem((4, 3), 1.0);
        v[[0, 0]] = 1.0e9;
        let out = w.apply("v", &v).unwrap();
        assert!(w.has_empty_rows());
        // The four fine cells inside the masked coarse cell read zero.
        assert_eq!(out[[0, 0]], 0.0);
        assert_eq!(out[[1, 1]], 0.0);
        // The rest carry the unmasked mass only.
        assert_approx_eq!(f64, out.sum(), 11.0, epsilon = 1e-9);
    }

    #[test]
    fn empty_mean_rows_fill_with_nan() {
        let mut mask = Array2::from_elem((4, 3), true);
        mask[[0, 0]] = false;
        let src = coarse().with_mask(mask).unwrap();
        let w = RemapWeights::build(&src, &fine(), RemapKind::AreaWeighted);
        let v = Array2::from_elem((4, 3), 2.0);
        let out = w.apply("v", &v).unwrap();
        assert!(out[[0, 0]].is_nan());
        assert_approx_eq!(f64, out[[4, 2]], 2.0, epsilon = 1e-9);
    }

    #[test]
    fn min_reduction_selects_contributing_cells() {
        let w = RemapWeights::build(&fine(), &coarse(), RemapKind::AreaWeighted);
        let v = Array2::from_shape_fn((8, 6), |(i, j)| (i * 6 + j) as f64);
        let out = w.apply_reduce("v", &v, f64::min).unwrap();
        // Coarse cell (0,0) covers fine cells {0,1}x{0,1}: min is v[0,0].
        assert_eq!(out[[0, 0]], 0.0);
        // Coarse cell (3,2) covers fine {6,7}x{4,5}: min is v[6,4] = 40.
        assert_eq!(out[[3, 2]], 40.0);
    }

    #[test]
    fn wrong_input_shape_is_a_shape_error() {
        let w = RemapWeights::build(&coarse(), &fine(), RemapKind::Conservative);
        let bad = Array2::zeros((3, 4));
        assert!(w.apply("v", &bad).is_err());
    }

    proptest! {
        #[test]
        fn conservative_remap_conserves_arbitrary_fields(
            values in proptest::collection::vec(0.0f64..1.0e3, 12)
        ) {
            let v = Array2::from_shape_vec((4, 3), values).unwrap();
            let w = RemapWeights::build(&coarse(), &fine(), RemapKind::Conservative);
            let out = w.apply("v", &v).unwrap();
            let (a, b) = (out.sum(), v.sum());
            prop_assert!((a - b).abs() <= 1e-9 * b.abs().max(1.0));
        }
    }
}
