use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Readiness probe response.
#[derive(Debug, Serialize, Deserialize)]
pub struct ReadyResponse {
    pub ready: bool,
}

/// Liveness probe response.
#[derive(Debug, Serialize, Deserialize)]
pub struct AliveResponse {
    pub alive: bool,
}

/// Entry information returned by `<prefix>info`.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InfoResponse {
    /// Entry name from the boot file
    pub entry_name: String,
    pub description: String,
    /// Crate version of the running binary
    pub version: String,
    /// Bound port, 0 before bootstrap
    pub port: u16,
    pub start_time: DateTime<Utc>,
    pub up_time_sec: u64,
    /// Uptime as `1h2m3s`
    pub up_time_str: String,
    pub ready: bool,
}

/// Greeting returned by the demo binary.
#[derive(Debug, Serialize, Deserialize)]
pub struct GreeterResponse {
    pub message: String,
}

/// Render a duration in seconds as `1h2m3s`, omitting leading zero units.
pub fn humanize_uptime(secs: u64) -> String {
    let (hours, minutes, seconds) = (secs / 3600, (secs % 3600) / 60, secs % 60);
    match (hours, minutes) {
        (0, 0) => format!("{seconds}s"),
        (0, _) => format!("{minutes}m{seconds}s"),
        _ => format!("{hours}h{minutes}m{seconds}s"),
    }
}
