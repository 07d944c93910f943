pub const DEFAULT_SCAN_ENDPOINT: &str = "http://127.0.0.1:5000/";
pub const PROGRESS_TICK_HZ: u64 = 4;
pub const PROGRESS_TICK_INTERVAL_MS: u64 = 1_000 / PROGRESS_TICK_HZ;
