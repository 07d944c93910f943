//! Shared types for `geosweep`: spherical cells, scan positions and
//! credentials for the external scan service.

pub mod cell;
pub mod credentials;
pub mod dirs;
pub mod position;

pub use cell::{CellBounds, CellId, MAX_LEVEL, SCAN_LEVEL};
pub use credentials::{Account, Credentials, default_credentials_path, load_credentials};
pub use position::{Position, parse_coordinates};
