//! Rectilinear latitude-longitude grids.

use std::fmt;

use chrono::Duration;
use ndarray::Array2;

use hydroflux_common::{ConfigError, ModelError, ShapeError};

use crate::EARTH_RADIUS;

/// Downstream neighbour of a cell as `(di, dj)` row/column offsets.
///
/// `(0, 0)` and offsets leaving the grid both denote an outflow sink.
pub type FlowOffset = (i32, i32);

/// A rectilinear 2-D spatial domain with cell bounds, an optional land/sea
/// mask and an optional flow-direction field.
///
/// Immutable after construction; shared read-only across every consumer.
#[derive(Debug, Clone)]
pub struct LatLonGrid {
    lat_bounds: Vec<f64>,
    lon_bounds: Vec<f64>,
    mask: Option<Array2<bool>>,
    flow_direction: Option<Array2<FlowOffset>>,
    cell_area: Array2<f64>,
}

impl LatLonGrid {
    /// Builds a regular grid from an extent and a resolution, the way the
    /// `spacedomain` configuration block describes one.
    ///
    /// Latitudes run south to north from `lat_extent.0`, longitudes west to
    /// east from `lon_extent.0`.
    pub fn from_extent(
        lat_extent: (f64, f64),
        lon_extent: (f64, f64),
        lat_resolution: f64,
        lon_resolution: f64,
    ) -> Result<Self, ConfigError> {
        let cells = |lo: f64, hi: f64, res: f64, axis: &str| -> Result<usize, ConfigError> {
            if res <= 0.0 {
                return Err(ConfigError::invalid(
                    "spacedomain",
                    format!("{axis} resolution must be positive, got {res}"),
                ));
            }
            let n = (hi - lo) / res;
            if n < 0.5 || (n - n.round()).abs() > 1e-9 {
                return Err(ConfigError::invalid(
                    "spacedomain",
                    format!("{axis} extent [{lo}, {hi}] is not a whole number of {res} cells"),
                ));
            }
            Ok(n.round() as usize)
        };
        let ny = cells(lat_extent.0, lat_extent.1, lat_resolution, "latitude")?;
        let nx = cells(lon_extent.0, lon_extent.1, lon_resolution, "longitude")?;
        let lat_bounds = (0..=ny)
            .map(|i| lat_extent.0 + i as f64 * lat_resolution)
            .collect();
        let lon_bounds = (0..=nx)
            .map(|j| lon_extent.0 + j as f64 * lon_resolution)
            .collect();
        Self::from_bounds(lat_bounds, lon_bounds)
    }

    /// Builds a (possibly irregular) grid from explicit cell bounds.
    pub fn from_bounds(lat_bounds: Vec<f64>, lon_bounds: Vec<f64>) -> Result<Self, ConfigError> {
        for (name, bounds) in [("latitude", &lat_bounds), ("longitude", &lon_bounds)] {
            if bounds.len() < 2 {
                return Err(ConfigError::invalid(
                    "spacedomain",
                    format!("{name} bounds need at least two entries"),
                ));
            }
            if !bounds.windows(2).all(|w| w[1] > w[0]) {
                return Err(ConfigError::invalid(
                    "spacedomain",
                    format!("{name} bounds must increase monotonically"),
                ));
            }
        }
        if !(-90.0 - 1e-9..=90.0 + 1e-9).contains(&lat_bounds[0])
            || !(-90.0 - 1e-9..=90.0 + 1e-9).contains(lat_bounds.last().unwrap())
        {
            return Err(ConfigError::invalid(
                "spacedomain",
                "latitude bounds outside [-90, 90]",
            ));
        }
        let cell_area = computed_area(&lat_bounds, &lon_bounds);
        Ok(Self {
            lat_bounds,
            lon_bounds,
            mask: None,
            flow_direction: None,
            cell_area,
        })
    }

    /// Attaches a land/sea mask (`true` = land, participates in coupling).
    pub fn with_mask(mut self, mask: Array2<bool>) -> Result<Self, ConfigError> {
        if mask.dim() != self.shape() {
            return Err(ConfigError::invalid(
                "spacedomain",
                format!(
                    "land_sea_mask shape {:?} does not match grid {:?}",
                    mask.dim(),
                    self.shape()
                ),
            ));
        }
        self.mask = Some(mask);
        Ok(self)
    }

    /// Attaches the flow-direction field used by [`LatLonGrid::route`].
    pub fn with_flow_direction(
        mut self,
        flow_direction: Array2<FlowOffset>,
    ) -> Result<Self, ConfigError> {
        if flow_direction.dim() != self.shape() {
            return Err(ConfigError::invalid(
                "spacedomain",
                format!(
                    "flow_direction shape {:?} does not match grid {:?}",
                    flow_direction.dim(),
                    self.shape()
                ),
            ));
        }
        self.flow_direction = Some(flow_direction);
        Ok(self)
    }

    /// Overrides the computed cell areas with a user-supplied field (m^2).
    pub fn with_cell_area(mut self, cell_area: Array2<f64>) -> Result<Self, ConfigError> {
        if cell_area.dim() != self.shape() {
            return Err(ConfigError::invalid(
                "spacedomain",
                format!(
                    "cell_area shape {:?} does not match grid {:?}",
                    cell_area.dim(),
                    self.shape()
                ),
            ));
        }
        if cell_area.iter().any(|&a| a <= 0.0 || !a.is_finite()) {
            return Err(ConfigError::invalid(
                "spacedomain",
                "cell_area must be strictly positive and finite",
            ));
        }
        self.cell_area = cell_area;
        Ok(self)
    }

    pub fn shape(&self) -> (usize, usize) {
        (self.lat_bounds.len() - 1, self.lon_bounds.len() - 1)
    }

    pub fn lat_bounds(&self) -> &[f64] {
        &self.lat_bounds
    }

    pub fn lon_bounds(&self) -> &[f64] {
        &self.lon_bounds
    }

    /// Cell-centre latitudes, south to north.
    pub fn lat(&self) -> Vec<f64> {
        self.lat_bounds
            .windows(2)
            .map(|w| 0.5 * (w[0] + w[1]))
            .collect()
    }

    /// Cell-centre longitudes, west to east.
    pub fn lon(&self) -> Vec<f64> {
        self.lon_bounds
            .windows(2)
            .map(|w| 0.5 * (w[0] + w[1]))
            .collect()
    }

    pub fn mask(&self) -> Option<&Array2<bool>> {
        self.mask.as_ref()
    }

    pub fn flow_direction(&self) -> Option<&Array2<FlowOffset>> {
        self.flow_direction.as_ref()
    }

    /// Cell areas in m^2 (user-supplied field if one was configured).
    pub fn cell_area(&self) -> &Array2<f64> {
        &self.cell_area
    }

    /// True when `other` describes the identical domain (bounds equality).
    pub fn same_domain(&self, other: &LatLonGrid) -> bool {
        self.lat_bounds == other.lat_bounds && self.lon_bounds == other.lon_bounds
    }

    pub fn check_shape(&self, name: &str, value: &Array2<f64>) -> Result<(), ShapeError> {
        let (ny, nx) = self.shape();
        if value.dim() != (ny, nx) {
            let (ay, ax) = value.dim();
            return Err(ShapeError::new(name, &[ny, nx], &[ay, ax]));
        }
        Ok(())
    }

    /// Moves `flux_per_area * area * dt` of mass one cell downstream along
    /// the flow-direction field.
    ///
    /// Returns `(routed_in, leaving)` as mass per cell: `routed_in[d]` is the
    /// mass arriving at `d`, `leaving[s]` the mass `s` emitted to the outflow
    /// sink (self-pointing cells, targets off-grid or on masked cells).
    pub fn route(
        &self,
        flux_per_area: &Array2<f64>,
        dt: Duration,
    ) -> Result<(Array2<f64>, Array2<f64>), ModelError> {
        let directions = self.flow_direction.as_ref().ok_or_else(|| {
            ConfigError::Missing {
                what: "spacedomain field".to_string(),
                name: "flow_direction".to_string(),
            }
        })?;
        let (ny, nx) = self.shape();
        self.check_shape("routed flux", flux_per_area)?;

        let dt_s = dt.num_seconds() as f64;
        let mut routed_in = Array2::zeros((ny, nx));
        let mut leaving = Array2::zeros((ny, nx));
        for i in 0..ny {
            for j in 0..nx {
                if !self.is_active(i, j) {
                    continue;
                }
                let mass = flux_per_area[[i, j]] * self.cell_area[[i, j]] * dt_s;
                let (di, dj) = directions[[i, j]];
                let ti = i as i64 + i64::from(di);
                let tj = j as i64 + i64::from(dj);
                let in_grid = ti >= 0 && tj >= 0 && (ti as usize) < ny && (tj as usize) < nx;
                let is_self = di == 0 && dj == 0;
                if is_self || !in_grid || !self.is_active(ti as usize, tj as usize) {
                    leaving[[i, j]] += mass;
                } else {
                    routed_in[[ti as usize, tj as usize]] += mass;
                }
            }
        }
        Ok((routed_in, leaving))
    }

    /// True when the cell participates in coupling (unmasked or no mask).
    pub fn is_active(&self, i: usize, j: usize) -> bool {
        self.mask.as_ref().is_none_or(|m| m[[i, j]])
    }
}

impl fmt::Display for LatLonGrid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (ny, nx) = self.shape();
        write!(
            f,
            "LatLonGrid {ny}x{nx} [{:.3}, {:.3}] x [{:.3}, {:.3}]",
            self.lat_bounds[0],
            self.lat_bounds[ny],
            self.lon_bounds[0],
            self.lon_bounds[nx]
        )
    }
}

pub(crate) fn computed_area(lat_bounds: &[f64], lon_bounds: &[f64]) -> Array2<f64> {
    let ny = lat_bounds.len() - 1;
    let nx = lon_bounds.len() - 1;
    let mut area = Array2::zeros((ny, nx));
    for i in 0..ny {
        let band = EARTH_RADIUS
            * EARTH_RADIUS
            * (lat_bounds[i + 1].to_radians().sin() - lat_bounds[i].to_radians().sin());
        for j in 0..nx {
            area[[i, j]] = band * (lon_bounds[j + 1] - lon_bounds[j]).to_radians();
        }
    }
    area
}
