use std::fmt;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

/// A scan point: latitude/longitude in degrees plus altitude in metres.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub lat: f64,
    pub lon: f64,
    #[serde(default)]
    pub altitude: f64,
}

impl Position {
    pub const fn new(lat: f64, lon: f64, altitude: f64) -> Self {
        Self { lat, lon, altitude }
    }

    pub const fn at_ground(lat: f64, lon: f64) -> Self {
        Self::new(lat, lon, 0.0)
    }

    pub fn with_altitude(self, altitude: f64) -> Self {
        Self { altitude, ..self }
    }

    /// All components zero: what a failed lookup leaves behind.
    pub fn is_unset(&self) -> bool {
        self.lat == 0.0 && self.lon == 0.0 && self.altitude == 0.0
    }

    pub fn is_on_globe(&self) -> bool {
        self.lat.is_finite()
            && self.lon.is_finite()
            && (-90.0..=90.0).contains(&self.lat)
            && (-180.0..=180.0).contains(&self.lon)
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.4}/{:.4}/{:.4}", self.lat, self.lon, self.altitude)
    }
}

static COORDINATE_PAIR: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(-?\d+\.\d+),?\s?(-?\d+\.\d+)$").expect("coordinate pattern must compile")
});

/// Parse a literal `"lat,lon"` pair (decimal degrees, optional comma and a
/// single space between them). Anything else is a place name.
pub fn parse_coordinates(input: &str) -> Option<Position> {
    let caps = COORDINATE_PAIR.captures(input.trim())?;
    let lat = caps[1].parse().ok()?;
    let lon = caps[2].parse().ok()?;
    Some(Position::at_ground(lat, lon))
}
