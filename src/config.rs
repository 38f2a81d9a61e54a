use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use tracing::warn;

use crate::model::Ms;

/// Interval clients are told to re-fetch the seat snapshot at.
pub const POLL_INTERVAL_MS: u64 = 5_000;

/// Process configuration, read once from `MARQUEE_*` environment variables.
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub bind: String,
    pub port: u16,
    pub data_dir: PathBuf,
    pub metrics_port: Option<u16>,
    pub hold_ttl: Duration,
    pub max_hold_ttl: Duration,
    pub sweep_interval: Duration,
    pub compact_threshold: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0".into(),
            port: 8080,
            data_dir: PathBuf::from("./data"),
            metrics_port: None,
            hold_ttl: Duration::from_secs(600),
            max_hold_ttl: Duration::from_secs(1_800),
            sweep_interval: Duration::from_millis(5_000),
            compact_threshold: 1_000,
        }
    }
}

fn parsed<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> T {
    match lookup(key) {
        None => default,
        Some(raw) => raw.trim().parse().unwrap_or_else(|_| {
            warn!("ignoring unparseable {key}={raw:?}, using default");
            default
        }),
    }
}

impl Config {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup; unset or malformed values fall back to
    /// the defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let d = Self::default();
        let metrics_port = lookup("MARQUEE_METRICS_PORT").and_then(|raw| match raw.trim().parse() {
            Ok(port) => Some(port),
            Err(_) => {
                warn!("ignoring unparseable MARQUEE_METRICS_PORT={raw:?}, metrics disabled");
                None
            }
        });
        let hold_ttl = Duration::from_secs(
            parsed(&lookup, "MARQUEE_HOLD_TTL_SECS", d.hold_ttl.as_secs()).max(1),
        );
        let max_hold_ttl = Duration::from_secs(parsed(
            &lookup,
            "MARQUEE_MAX_HOLD_TTL_SECS",
            d.max_hold_ttl.as_secs(),
        ))
        .max(hold_ttl);
        Self {
            bind: lookup("MARQUEE_BIND").unwrap_or(d.bind),
            port: parsed(&lookup, "MARQUEE_PORT", d.port),
            data_dir: lookup("MARQUEE_DATA_DIR").map(PathBuf::from).unwrap_or(d.data_dir),
            metrics_port,
            hold_ttl,
            max_hold_ttl,
            sweep_interval: Duration::from_millis(
                parsed(
                    &lookup,
                    "MARQUEE_SWEEP_INTERVAL_MS",
                    d.sweep_interval.as_millis() as u64,
                )
                .max(10),
            ),
            compact_threshold: parsed(&lookup, "MARQUEE_COMPACT_THRESHOLD", d.compact_threshold),
        }
    }

    pub fn wal_path(&self) -> PathBuf {
        self.data_dir.join("marquee.wal")
    }

    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.bind, self.port)
    }

    /// TTL for a hold request: the default when none is asked for, otherwise
    /// the requested value capped at the configured maximum.
    pub fn hold_ttl_ms(&self, requested_secs: Option<u64>) -> Ms {
        let ttl = requested_secs
            .map(Duration::from_secs)
            .unwrap_or(self.hold_ttl)
            .min(self.max_hold_ttl);
        ttl.as_millis() as Ms
    }
}
