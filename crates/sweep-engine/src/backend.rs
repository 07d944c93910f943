//! HTTP clients for the external services: scan API, geocoder and elevation.

use std::time::Duration;

use anyhow::Context as _;
use geosweep_core::{Account, CellId, Position};
use reqwest::Url;
use serde::{Deserialize, Serialize};
use tokio::runtime::Handle;

use crate::api::ScanReport;
use crate::locate::{AltitudeResolver, PositionResolver};
use crate::worker::CellScanner;

const USER_AGENT: &str = concat!("geosweep/", env!("CARGO_PKG_VERSION"));

/// Default request timeout for all clients.
pub const DEFAULT_HTTP_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, thiserror::Error)]
pub(crate) enum BackendError {
    #[error("scan service rejected the credentials")]
    AuthRejected,
    #[error("scan service is throttling requests")]
    Throttled,
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    code: String,
}

fn http_client(timeout: Duration) -> anyhow::Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(timeout)
        .user_agent(USER_AGENT)
        .build()
        .context("build http client")
}

#[derive(Debug, Serialize)]
struct ScanRequest<'a> {
    cell: CellId,
    lat: f64,
    lon: f64,
    altitude: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    account: Option<&'a Account>,
}

/// [`CellScanner`] that POSTs to `{endpoint}/api/scan`.
///
/// Blocks the calling worker thread on the runtime it was created in.
pub struct HttpScanner {
    http: reqwest::Client,
    endpoint: Url,
    runtime: Handle,
}

impl HttpScanner {
    /// Must be called from inside a tokio runtime.
    pub fn new(endpoint: Url, timeout: Duration) -> anyhow::Result<Self> {
        let runtime = Handle::try_current().context("HttpScanner needs a tokio runtime")?;
        Ok(Self {
            http: http_client(timeout)?,
            endpoint,
            runtime,
        })
    }

    async fn scan_async(
        &self,
        cell: CellId,
        position: Position,
        account: Option<&Account>,
    ) -> anyhow::Result<ScanReport> {
        let url = self.endpoint.join("api/scan")?;
        let res = self
            .http
            .post(url)
            .json(&ScanRequest {
                cell,
                lat: position.lat,
                lon: position.lon,
                altitude: position.altitude,
                account,
            })
            .send()
            .await?;

        if !res.status().is_success() {
            let status = res.status();
            let body = res.text().await.unwrap_or_default();
            if let Ok(err) = serde_json::from_str::<ApiErrorBody>(&body) {
                match err.code.as_str() {
                    "auth_rejected" => return Err(BackendError::AuthRejected.into()),
                    "throttled" => return Err(BackendError::Throttled.into()),
                    _ => {}
                }
            }
            anyhow::bail!("http {status}: {body}");
        }

        let mut report: ScanReport = res.json().await.context("decode scan report")?;
        report.cell = cell;
        Ok(report)
    }
}

impl CellScanner for HttpScanner {
    fn scan(
        &self,
        cell: CellId,
        position: Position,
        account: Option<&Account>,
    ) -> anyhow::Result<ScanReport> {
        self.runtime.block_on(self.scan_async(cell, position, account))
    }
}

#[derive(Debug, Deserialize)]
struct NominatimPlace {
    lat: String,
    lon: String,
}

/// [`PositionResolver`] backed by a Nominatim-compatible `/search` endpoint.
pub struct NominatimGeocoder {
    http: reqwest::Client,
    base: Url,
}

impl NominatimGeocoder {
    /// Public OpenStreetMap instance.
    pub const DEFAULT_BASE_URL: &'static str = "https://nominatim.openstreetmap.org/";

    /// A geocoder querying `base`.
    pub fn new(base: Url, timeout: Duration) -> anyhow::Result<Self> {
        Ok(Self {
            http: http_client(timeout)?,
            base,
        })
    }
}

impl PositionResolver for NominatimGeocoder {
    async fn resolve(&self, query: &str) -> anyhow::Result<Option<Position>> {
        let mut url = self.base.join("search")?;
        url.query_pairs_mut()
            .append_pair("q", query)
            .append_pair("format", "json")
            .append_pair("limit", "1");

        let res = self.http.get(url).send().await?;
        if !res.status().is_success() {
            let status = res.status();
            let body = res.text().await.unwrap_or_default();
            anyhow::bail!("geocoder http {status}: {body}");
        }

        let places: Vec<NominatimPlace> = res.json().await.context("decode geocoder response")?;
        let Some(place) = places.into_iter().next() else {
            return Ok(None);
        };
        let lat = place.lat.parse().context("geocoder returned a bad latitude")?;
        let lon = place.lon.parse().context("geocoder returned a bad longitude")?;
        Ok(Some(Position::at_ground(lat, lon)))
    }
}

#[derive(Debug, Deserialize)]
struct ElevationResponse {
    #[serde(default)]
    results: Vec<ElevationResult>,
    #[serde(default)]
    status: String,
}

#[derive(Debug, Deserialize)]
struct ElevationResult {
    elevation: f64,
}

/// [`AltitudeResolver`] backed by the Google Elevation API.
pub struct ElevationClient {
    http: reqwest::Client,
    base: Url,
    key: String,
}

impl ElevationClient {
    /// Public Google Maps API host.
    pub const DEFAULT_BASE_URL: &'static str = "https://maps.googleapis.com/";

    /// A client authenticating with `key`.
    pub fn new(base: Url, key: impl Into<String>, timeout: Duration) -> anyhow::Result<Self> {
        Ok(Self {
            http: http_client(timeout)?,
            base,
            key: key.into(),
        })
    }
}

impl AltitudeResolver for ElevationClient {
    async fn altitude(&self, lat: f64, lon: f64) -> anyhow::Result<f64> {
        let mut url = self.base.join("maps/api/elevation/json")?;
        url.query_pairs_mut()
            .append_pair("locations", &format!("{lat},{lon}"))
            .append_pair("key", &self.key);

        let res = self.http.get(url).send().await?;
        if !res.status().is_success() {
            anyhow::bail!("elevation http {}", res.status());
        }
        let body: ElevationResponse = res.json().await.context("decode elevation response")?;
        body.results
            .first()
            .map(|r| r.elevation)
            .ok_or_else(|| anyhow::anyhow!("no elevation result (status {:?})", body.status))
    }
}
