//! Turning the operator's location string into a starting [`Position`].

use std::future::Future;

use geosweep_core::{Position, parse_coordinates};
use tracing::{debug, info, warn};

use crate::error::SweepError;

/// Looks up a place name.
pub trait PositionResolver: Send + Sync {
    /// Coordinates for `query`, or `None` when nothing matched.
    fn resolve(&self, query: &str) -> impl Future<Output = anyhow::Result<Option<Position>>> + Send;
}

/// Looks up ground elevation.
pub trait AltitudeResolver: Send + Sync {
    /// Elevation in metres at the given point.
    fn altitude(&self, lat: f64, lon: f64) -> impl Future<Output = anyhow::Result<f64>> + Send;
}

/// Resolve `location` to a position with altitude.
///
/// A literal `lat,lon` pair is used as-is and the place resolver is never
/// called. The altitude lookup is best effort: on failure the altitude is `0`.
/// An all-zero or off-globe result is [`SweepError::PositionUnresolved`].
pub async fn resolve_start_position<P, A>(
    location: &str,
    resolver: &P,
    altitude: Option<&A>,
) -> Result<Position, SweepError>
where
    P: PositionResolver,
    A: AltitudeResolver,
{
    let unresolved = |reason: String| SweepError::PositionUnresolved {
        query: location.to_string(),
        reason,
    };

    let mut position = match parse_coordinates(location) {
        Some(position) => {
            debug!(location, "using literal coordinates");
            position
        }
        None => {
            debug!(location, "looking up coordinates by name");
            resolver
                .resolve(location)
                .await
                .map_err(|err| unresolved(format!("{err:#}")))?
                .ok_or_else(|| unresolved("no match".to_string()))?
        }
    };

    if let Some(altitude) = altitude {
        match altitude.altitude(position.lat, position.lon).await {
            Ok(metres) if metres.is_finite() => {
                debug!(altitude = metres, "local altitude");
                position = position.with_altitude(metres);
            }
            Ok(metres) => {
                let err = SweepError::AltitudeUnavailable(format!("non-finite elevation {metres}"));
                warn!(error = %err, "setting altitude to 0");
                position = position.with_altitude(0.0);
            }
            Err(err) => {
                let err = SweepError::AltitudeUnavailable(format!("{err:#}"));
                warn!(error = %err, "setting altitude to 0");
                position = position.with_altitude(0.0);
            }
        }
    }

    if position.is_unset() {
        return Err(unresolved("resolved to 0/0/0".to_string()));
    }
    if !position.is_on_globe() {
        return Err(unresolved(format!("{position} is not a valid coordinate")));
    }

    info!(position = %position, "parsed location (lat/lon/alt)");
    Ok(position)
}
