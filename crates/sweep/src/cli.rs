use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use reqwest::Url;

use geosweep_engine::{
    CheckpointPolicy, ElevationClient, NominatimGeocoder, ScanFilter, SchedulerConfig,
    SupervisorConfig,
};

use crate::constants::DEFAULT_SCAN_ENDPOINT;

fn default_scan_endpoint() -> Url {
    Url::parse(DEFAULT_SCAN_ENDPOINT).expect("DEFAULT_SCAN_ENDPOINT must be a valid URL")
}

fn default_geocoder_url() -> Url {
    Url::parse(NominatimGeocoder::DEFAULT_BASE_URL).expect("geocoder default must be a valid URL")
}

fn default_elevation_url() -> Url {
    Url::parse(ElevationClient::DEFAULT_BASE_URL).expect("elevation default must be a valid URL")
}

/// Parse a duration given in seconds (`"60"`, `"2.5"`, `"2.5s"`) or
/// milliseconds (`"250ms"`).
pub fn parse_duration(input: &str) -> Result<Duration, String> {
    let s = input.trim().to_ascii_lowercase();
    if s.is_empty() {
        return Err("duration must not be empty".to_string());
    }

    let (num, scale) = if let Some(raw) = s.strip_suffix("ms") {
        (raw, 0.001)
    } else if let Some(raw) = s.strip_suffix('s') {
        (raw, 1.0)
    } else {
        (s.as_str(), 1.0)
    };

    let value: f64 = num
        .trim()
        .parse()
        .map_err(|_| format!("invalid duration: {input:?}"))?;
    if !value.is_finite() || value < 0.0 {
        return Err(format!("duration must be a non-negative number: {input:?}"));
    }
    Duration::try_from_secs_f64(value * scale).map_err(|_| format!("duration too large: {input:?}"))
}

/// Parse a `--checkpoint` policy.
fn parse_checkpoint_policy(input: &str) -> Result<CheckpointPolicy, String> {
    input.parse()
}

#[derive(Debug, Clone, Parser)]
#[command(name = "geosweep", version, about = "Resumable geofenced scan scheduler")]
pub struct Cli {
    /// Starting location: a place name, or a literal `lat,lon` pair.
    #[arg(short = 'l', long, env = "GEOSWEEP_LOCATION")]
    pub location: String,

    /// Southern edge of the region (degrees).
    #[arg(long, env = "GEOSWEEP_MIN_LAT", allow_negative_numbers = true)]
    pub min_lat: f64,

    /// Western edge of the region (degrees).
    #[arg(long, env = "GEOSWEEP_MIN_LON", allow_negative_numbers = true)]
    pub min_lon: f64,

    /// Northern edge of the region (degrees).
    #[arg(long, env = "GEOSWEEP_MAX_LAT", allow_negative_numbers = true)]
    pub max_lat: f64,

    /// Eastern edge of the region (degrees).
    #[arg(long, env = "GEOSWEEP_MAX_LON", allow_negative_numbers = true)]
    pub max_lon: f64,

    /// Session key; names the checkpoint file.
    #[arg(short = 's', long, env = "GEOSWEEP_SESSION", default_value = SchedulerConfig::DEFAULT_SESSION)]
    pub session: String,

    /// Directory holding checkpoints (default: `$XDG_STATE_HOME/geosweep`).
    #[arg(long, env = "GEOSWEEP_STATE_DIR")]
    pub state_dir: Option<PathBuf>,

    /// Delete the session's checkpoint and recompute coverage.
    #[arg(long, default_value_t = false)]
    pub reset: bool,

    /// When to save the remaining cells: `startup`, `every-cell` or `every:N`.
    #[arg(
        long,
        env = "GEOSWEEP_CHECKPOINT",
        default_value_t = CheckpointPolicy::default(),
        value_parser = parse_checkpoint_policy
    )]
    pub checkpoint: CheckpointPolicy,

    /// Refuse regions whose covering exceeds this many cells.
    #[arg(long, env = "GEOSWEEP_MAX_CELLS", default_value_t = SchedulerConfig::DEFAULT_MAX_CELLS)]
    pub max_cells: usize,

    /// Fabricate scan results around the start position instead of scanning.
    #[arg(short = 'm', long, env = "GEOSWEEP_MOCK", default_value_t = false)]
    pub mock: bool,

    /// Stop the mock generator after this many rounds.
    #[arg(long, requires = "mock")]
    pub mock_rounds: Option<u64>,

    /// Number of scan workers sharing the queue.
    #[arg(
        short = 'w',
        long,
        env = "GEOSWEEP_WORKERS",
        default_value_t = 1,
        value_parser = clap::value_parser!(u16).range(1..=256)
    )]
    pub workers: u16,

    /// How often to check whether workers are still alive.
    #[arg(
        long,
        env = "GEOSWEEP_POLL_INTERVAL",
        default_value = "60s",
        value_parser = parse_duration
    )]
    pub poll_interval: Duration,

    /// Pause between two cells.
    #[arg(
        long,
        env = "GEOSWEEP_SCAN_DELAY",
        default_value = "5s",
        value_parser = parse_duration
    )]
    pub scan_delay: Duration,

    /// Pause before retrying a failed scan.
    #[arg(
        long,
        env = "GEOSWEEP_RETRY_DELAY",
        default_value = "10s",
        value_parser = parse_duration
    )]
    pub retry_delay: Duration,

    /// Scan attempts per cell before it is left for the next run.
    #[arg(
        long,
        env = "GEOSWEEP_MAX_ATTEMPTS",
        default_value_t = SupervisorConfig::DEFAULT_MAX_ATTEMPTS,
        value_parser = clap::value_parser!(u32).range(1..)
    )]
    pub max_attempts: u32,

    /// Accounts file (default: `$XDG_CONFIG_HOME/geosweep/credentials.json`).
    #[arg(short = 'c', long, env = "GEOSWEEP_CREDENTIALS")]
    pub credentials: Option<PathBuf>,

    /// Base URL of the scan service.
    #[arg(long, env = "GEOSWEEP_SCAN_ENDPOINT", default_value_t = default_scan_endpoint())]
    pub scan_endpoint: Url,

    /// Base URL of a Nominatim-compatible geocoder.
    #[arg(long, env = "GEOSWEEP_GEOCODER_URL", default_value_t = default_geocoder_url())]
    pub geocoder_url: Url,

    /// Base URL of the elevation API.
    #[arg(long, env = "GEOSWEEP_ELEVATION_URL", default_value_t = default_elevation_url())]
    pub elevation_url: Url,

    /// Google Maps API key, used for the altitude lookup.
    #[arg(short = 'k', long, env = "GEOSWEEP_GMAPS_KEY", hide_env_values = true)]
    pub gmaps_key: Option<String>,

    /// HTTP request timeout.
    #[arg(
        long,
        env = "GEOSWEEP_HTTP_TIMEOUT",
        default_value = "30s",
        value_parser = parse_duration
    )]
    pub http_timeout: Duration,

    /// Drop encounters from scan results.
    #[arg(long, default_value_t = false)]
    pub no_encounters: bool,

    /// Drop stops from scan results.
    #[arg(long, default_value_t = false)]
    pub no_stops: bool,

    /// Drop gyms from scan results.
    #[arg(long, default_value_t = false)]
    pub no_gyms: bool,

    /// Log at debug level unless `RUST_LOG` says otherwise.
    #[arg(short = 'd', long, env = "GEOSWEEP_DEBUG", default_value_t = false)]
    pub debug: bool,

    /// Disable the progress bar.
    #[arg(long, env = "GEOSWEEP_NO_PROGRESS", default_value_t = false)]
    pub no_progress: bool,
}

impl Cli {
    pub fn scheduler_config(&self) -> SchedulerConfig {
        SchedulerConfig {
            session: self.session.clone(),
            checkpoint: self.checkpoint,
            max_cells: self.max_cells,
        }
    }

    pub fn supervisor_config(&self) -> SupervisorConfig {
        SupervisorConfig {
            workers: usize::from(self.workers),
            poll_interval: self.poll_interval,
            scan_delay: self.scan_delay,
            retry_delay: self.retry_delay,
            max_attempts: self.max_attempts,
            filter: ScanFilter {
                encounters: !self.no_encounters,
                stops: !self.no_stops,
                gyms: !self.no_gyms,
            },
            mock_rounds: self.mock_rounds,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const REGION: [&str; 8] = [
        "--min-lat", "37.0", "--min-lon", "-122.1", "--max-lat", "37.01", "--max-lon", "-122.09",
    ];

    fn parse(extra: &[&str]) -> Cli {
        let mut args = vec!["geosweep", "-l", "37.4219,-122.0840"];
        args.extend(REGION);
        args.extend(extra);
        Cli::try_parse_from(args).unwrap()
    }

    #[test]
    fn parse_duration_accepts_seconds_and_millis() {
        assert_eq!(parse_duration("60"), Ok(Duration::from_secs(60)));
        assert_eq!(parse_duration("2.5s"), Ok(Duration::from_millis(2500)));
        assert_eq!(parse_duration("250ms"), Ok(Duration::from_millis(250)));
        assert_eq!(parse_duration(" 0 "), Ok(Duration::ZERO));
        assert!(parse_duration("").is_err());
        assert!(parse_duration("-1").is_err());
        assert!(parse_duration("soon").is_err());
    }

    #[test]
    fn defaults_match_engine_defaults() {
        let cli = parse(&[]);
        assert_eq!(cli.session, "default");
        assert_eq!(cli.checkpoint, CheckpointPolicy::default());
        assert_eq!(cli.poll_interval, SupervisorConfig::DEFAULT_POLL_INTERVAL);
        assert_eq!(cli.scan_delay, SupervisorConfig::DEFAULT_SCAN_DELAY);
        assert_eq!(cli.retry_delay, SupervisorConfig::DEFAULT_RETRY_DELAY);
        assert_eq!(cli.http_timeout, geosweep_engine::DEFAULT_HTTP_TIMEOUT);
        assert_eq!(cli.max_attempts, 3);
        assert_eq!(cli.workers, 1);
        assert!(!cli.mock);

        let sup = cli.supervisor_config();
        assert_eq!(sup.filter, ScanFilter::default());
        assert_eq!(sup.mock_rounds, None);
    }

    #[test]
    fn negative_coordinates_and_toggles_parse() {
        let cli = parse(&["--no-gyms", "--checkpoint", "startup", "-w", "4", "--mock", "--mock-rounds", "3"]);
        assert_eq!(cli.min_lon, -122.1);
        assert_eq!(cli.checkpoint, CheckpointPolicy::Startup);
        let sup = cli.supervisor_config();
        assert_eq!(sup.workers, 4);
        assert!(!sup.filter.gyms && sup.filter.stops && sup.filter.encounters);
        assert_eq!(sup.mock_rounds, Some(3));
    }

    #[test]
    fn mock_rounds_requires_mock() {
        let mut args = vec!["geosweep", "-l", "x"];
        args.extend(REGION);
        args.extend(["--mock-rounds", "3"]);
        assert!(Cli::try_parse_from(args).is_err());
    }

    #[test]
    fn zero_workers_is_rejected() {
        let mut args = vec!["geosweep", "-l", "x"];
        args.extend(REGION);
        args.extend(["--workers", "0"]);
        assert!(Cli::try_parse_from(args).is_err());
    }
}
