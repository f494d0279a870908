//! Process configuration.
//!
//! DESIGN
//! ======
//! Every knob is read once from the environment at startup (a `.env` file is
//! loaded first by `main`). Nothing is hot-reloaded. A value that fails to
//! parse falls back to its default with a warning rather than aborting
//! startup, matching the relay's availability-first posture.

use std::fmt::Display;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use tracing::warn;

const DEFAULT_BIND_ADDR: &str = "0.0.0.0";
const DEFAULT_HTTP_PORT: u16 = 5000;
const DEFAULT_WS_PORT: u16 = 8080;
const DEFAULT_HEARTBEAT_INTERVAL_MS: u64 = 3000;
const DEFAULT_HEARTBEAT_TIMEOUT_MS: u64 = 1000;
const DEFAULT_SNAPSHOT_PATH: &str = "board.json";

#[derive(Debug, Clone)]
pub struct Config {
    /// Interface both listeners bind to.
    pub bind_addr: String,
    /// Port of the control (liveness/info) HTTP endpoint.
    pub http_port: u16,
    /// Port of the websocket relay endpoint.
    pub ws_port: u16,
    /// How often idle connections are probed.
    pub heartbeat_interval: Duration,
    /// How long a probed connection has to answer before it is evicted.
    pub heartbeat_timeout: Duration,
    /// Flat JSON file mirroring the scene store.
    pub snapshot_path: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_addr: DEFAULT_BIND_ADDR.into(),
            http_port: DEFAULT_HTTP_PORT,
            ws_port: DEFAULT_WS_PORT,
            heartbeat_interval: Duration::from_millis(DEFAULT_HEARTBEAT_INTERVAL_MS),
            heartbeat_timeout: Duration::from_millis(DEFAULT_HEARTBEAT_TIMEOUT_MS),
            snapshot_path: PathBuf::from(DEFAULT_SNAPSHOT_PATH),
        }
    }
}

impl Config {
    /// Build the configuration from process environment variables.
    ///
    /// - `BIND_ADDR`: listener interface (default `0.0.0.0`)
    /// - `HTTP_PORT`: control endpoint port (default 5000)
    /// - `WS_PORT`: relay endpoint port (default 8080)
    /// - `HEARTBEAT_INTERVAL_MS`: probe period (default 3000)
    /// - `HEARTBEAT_TIMEOUT_MS`: pong deadline (default 1000)
    /// - `SNAPSHOT_PATH`: scene snapshot file (default `board.json`)
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build the configuration from an arbitrary key lookup.
    #[must_use]
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let interval_ms = positive_millis(&lookup, "HEARTBEAT_INTERVAL_MS", DEFAULT_HEARTBEAT_INTERVAL_MS);
        let timeout_ms = positive_millis(&lookup, "HEARTBEAT_TIMEOUT_MS", DEFAULT_HEARTBEAT_TIMEOUT_MS);

        Self {
            bind_addr: lookup("BIND_ADDR")
                .filter(|v| !v.trim().is_empty())
                .unwrap_or_else(|| DEFAULT_BIND_ADDR.into()),
            http_port: parse_or(&lookup, "HTTP_PORT", DEFAULT_HTTP_PORT),
            ws_port: parse_or(&lookup, "WS_PORT", DEFAULT_WS_PORT),
            heartbeat_interval: Duration::from_millis(interval_ms),
            heartbeat_timeout: Duration::from_millis(timeout_ms),
            snapshot_path: lookup("SNAPSHOT_PATH")
                .filter(|v| !v.trim().is_empty())
                .map_or_else(|| PathBuf::from(DEFAULT_SNAPSHOT_PATH), PathBuf::from),
        }
    }
}

fn parse_or<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> T
where
    T: FromStr + Display + Copy,
{
    let Some(raw) = lookup(key) else {
        return default;
    };
    match raw.trim().parse::<T>() {
        Ok(value) => value,
        Err(_) => {
            warn!(key, value = %raw, %default, "config: invalid value, using default");
            default
        }
    }
}

/// Durations feed `tokio::time::interval`, which rejects zero.
fn positive_millis(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: u64) -> u64 {
    let value = parse_or(lookup, key, default);
    if value == 0 {
        warn!(key, %default, "config: zero duration, using default");
        return default;
    }
    value
}

#[cfg(test)]
#[path = "config_test.rs"]
mod tests;
