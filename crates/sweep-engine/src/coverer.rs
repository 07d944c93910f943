//! Region decomposition: bounding rectangle -> set of fixed-level cells.

use std::collections::{BTreeSet, HashSet, VecDeque};

use geosweep_core::{CellBounds, CellId, Position, SCAN_LEVEL};
use tracing::debug;

use crate::error::SweepError;

// Average level-15 cell area in steradians (4π / (6 * 4^15)).
const AVG_CELL_AREA_SR: f64 = 4.0 * std::f64::consts::PI / (6.0 * 1_073_741_824.0);

// Cell edges are geodesics and can bow slightly past the corner-derived bounds.
const EDGE_MARGIN_DEG: f64 = 1e-6;

/// A latitude/longitude rectangle in degrees.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundingBox {
    min_lat: f64,
    min_lon: f64,
    max_lat: f64,
    max_lon: f64,
}

impl BoundingBox {
    /// Validate and build a rectangle. The box may not cross the antimeridian.
    pub fn new(min_lat: f64, min_lon: f64, max_lat: f64, max_lon: f64) -> Result<Self, SweepError> {
        let all = [min_lat, min_lon, max_lat, max_lon];
        if all.iter().any(|v| !v.is_finite()) {
            return Err(SweepError::InvalidRegion(format!(
                "non-finite coordinate in {all:?}"
            )));
        }
        for lat in [min_lat, max_lat] {
            if !(-90.0..=90.0).contains(&lat) {
                return Err(SweepError::InvalidRegion(format!(
                    "latitude {lat} outside [-90, 90]"
                )));
            }
        }
        for lon in [min_lon, max_lon] {
            if !(-180.0..=180.0).contains(&lon) {
                return Err(SweepError::InvalidRegion(format!(
                    "longitude {lon} outside [-180, 180]"
                )));
            }
        }
        if min_lat >= max_lat || min_lon >= max_lon {
            return Err(SweepError::InvalidRegion(format!(
                "degenerate box: lat {min_lat}..{max_lat}, lon {min_lon}..{max_lon}"
            )));
        }
        Ok(Self {
            min_lat,
            min_lon,
            max_lat,
            max_lon,
        })
    }

    /// Southern edge.
    pub fn min_lat(&self) -> f64 {
        self.min_lat
    }

    /// Western edge.
    pub fn min_lon(&self) -> f64 {
        self.min_lon
    }

    /// Northern edge.
    pub fn max_lat(&self) -> f64 {
        self.max_lat
    }

    /// Eastern edge.
    pub fn max_lon(&self) -> f64 {
        self.max_lon
    }

    /// Midpoint as `(lat, lon)`.
    pub fn center(&self) -> (f64, f64) {
        (
            (self.min_lat + self.max_lat) / 2.0,
            (self.min_lon + self.max_lon) / 2.0,
        )
    }

    /// Whether the point lies inside (edges included).
    pub fn contains(&self, lat: f64, lon: f64) -> bool {
        (self.min_lat..=self.max_lat).contains(&lat) && (self.min_lon..=self.max_lon).contains(&lon)
    }

    /// Area on the unit sphere, in steradians.
    fn area_sr(&self) -> f64 {
        let dlon = (self.max_lon - self.min_lon).to_radians();
        (self.max_lat.to_radians().sin() - self.min_lat.to_radians().sin()) * dlon
    }

    fn intersects(&self, cell: &CellBounds) -> bool {
        if cell.max_lat + EDGE_MARGIN_DEG < self.min_lat || cell.min_lat - EDGE_MARGIN_DEG > self.max_lat {
            return false;
        }
        // Cell longitudes are unwrapped around the cell centre and may leave [-180, 180].
        [-360.0, 0.0, 360.0].iter().any(|shift| {
            cell.max_lon + shift + EDGE_MARGIN_DEG >= self.min_lon
                && cell.min_lon + shift - EDGE_MARGIN_DEG <= self.max_lon
        })
    }
}

/// Computes fixed-level coverings.
#[derive(Debug, Clone)]
pub struct Coverer {
    level: u8,
    max_cells: usize,
}

impl Coverer {
    /// A coverer at the scan level that refuses coverings larger than `max_cells`.
    pub fn new(max_cells: usize) -> Self {
        Self {
            level: SCAN_LEVEL,
            max_cells: max_cells.max(1),
        }
    }

    /// Level of the produced cells.
    pub fn level(&self) -> u8 {
        self.level
    }

    /// Every cell at the coverer's level whose bounds intersect the box.
    ///
    /// Starts from the cell under the box centre and flood-fills over edge and
    /// corner neighbours, so the work is proportional to the covering size.
    pub fn compute_coverage(&self, bbox: &BoundingBox) -> Result<BTreeSet<CellId>, SweepError> {
        let estimate = bbox.area_sr() / AVG_CELL_AREA_SR * 4f64.powi(i32::from(self.level) - 15);
        if estimate > (self.max_cells as f64) * 2.0 {
            return Err(SweepError::InvalidRegion(format!(
                "box needs roughly {estimate:.0} cells, limit is {}",
                self.max_cells
            )));
        }

        let (lat, lon) = bbox.center();
        let start = CellId::at_level(lat, lon, self.level);

        let mut covering = BTreeSet::new();
        let mut seen = HashSet::from([start]);
        let mut frontier = VecDeque::from([start]);
        while let Some(cell) = frontier.pop_front() {
            if !bbox.intersects(&cell.bounds()) {
                continue;
            }
            covering.insert(cell);
            if covering.len() > self.max_cells {
                return Err(SweepError::InvalidRegion(format!(
                    "covering exceeds {} cells",
                    self.max_cells
                )));
            }
            for neighbor in cell.neighbors() {
                if seen.insert(neighbor) {
                    frontier.push_back(neighbor);
                }
            }
        }

        debug!(
            cells = covering.len(),
            visited = seen.len(),
            level = self.level,
            "computed covering"
        );
        Ok(covering)
    }
}

impl Default for Coverer {
    fn default() -> Self {
        Self::new(crate::api::SchedulerConfig::DEFAULT_MAX_CELLS)
    }
}

/// Geographic centroid of a cell, altitude `0`.
pub fn cell_center(id: CellId) -> Position {
    id.center()
}
