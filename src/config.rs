//! Runtime configuration loaded from environment variables

use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::hub::{HubConfig, MAX_QUEUE_CAPACITY};
use crate::types::RecordFormat;

/// 9001 is the port the relay has always listened on
pub const DEFAULT_BIND_ADDR: &str = "0.0.0.0:9001";

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("{var} has invalid value {value:?}: {reason}")]
    InvalidValue {
        var: &'static str,
        value: String,
        reason: String,
    },
}

/// Relay configuration
#[derive(Debug, Clone)]
pub struct RelayConfig {
    pub bind_addr: SocketAddr,
    /// Directory served for `/` and other non-API paths
    pub static_dir: PathBuf,
    pub record_format: RecordFormat,
    /// Per-recipient send budget during a broadcast
    pub send_timeout: Duration,
    /// Capacity of each connection's outbound queue
    pub outbound_buffer: usize,
    /// Largest inbound WebSocket message accepted
    pub max_message_bytes: usize,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 9001)),
            static_dir: PathBuf::from("public"),
            record_format: RecordFormat::Tagged,
            send_timeout: Duration::from_millis(5000),
            outbound_buffer: 64,
            max_message_bytes: 64 * 1024,
        }
    }
}

impl RelayConfig {
    /// Load config from environment variables, falling back to defaults for
    /// anything unset or unparseable
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let bind_addr = env_or("RELAY_BIND_ADDR", defaults.bind_addr);
        let static_dir = std::env::var("RELAY_STATIC_DIR")
            .ok()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .map(PathBuf::from)
            .unwrap_or(defaults.static_dir);
        let record_format = env_or("RELAY_RECORD_FORMAT", defaults.record_format);
        let send_timeout = Duration::from_millis(env_or(
            "RELAY_SEND_TIMEOUT_MS",
            defaults.send_timeout.as_millis() as u64,
        ));
        let outbound_buffer =
            env_at_most("RELAY_OUTBOUND_BUFFER", defaults.outbound_buffer, MAX_QUEUE_CAPACITY)
                .max(1);
        let max_message_bytes = env_or("RELAY_MAX_MESSAGE_BYTES", defaults.max_message_bytes);

        tracing::info!(
            %bind_addr,
            static_dir = %static_dir.display(),
            record_format = record_format.as_str(),
            send_timeout_ms = send_timeout.as_millis() as u64,
            outbound_buffer,
            max_message_bytes,
            "Relay config loaded"
        );

        Self {
            bind_addr,
            static_dir,
            record_format,
            send_timeout,
            outbound_buffer,
            max_message_bytes,
        }
    }

    pub fn hub_config(&self) -> HubConfig {
        HubConfig {
            record_format: self.record_format,
            send_timeout: self.send_timeout,
        }
    }
}

/// Parse an environment variable. `Ok(None)` means it is unset or blank.
fn parse_var<T>(var: &'static str) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    let value = match std::env::var(var) {
        Ok(v) if !v.trim().is_empty() => v,
        _ => return Ok(None),
    };
    let parsed = value.trim().parse::<T>();
    match parsed {
        Ok(v) => Ok(Some(v)),
        Err(e) => Err(ConfigError::InvalidValue {
            var,
            reason: e.to_string(),
            value,
        }),
    }
}

fn env_or<T>(var: &'static str, default: T) -> T
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    or_default(parse_var(var), default)
}

/// Like [`env_or`], but values above `max` are rejected
fn env_at_most(var: &'static str, default: usize, max: usize) -> usize {
    let parsed = parse_var::<usize>(var).and_then(|value| match value {
        Some(n) if n > max => Err(ConfigError::InvalidValue {
            var,
            value: n.to_string(),
            reason: format!("must be at most {}", max),
        }),
        other => Ok(other),
    });
    or_default(parsed, default)
}

fn or_default<T>(parsed: Result<Option<T>, ConfigError>, default: T) -> T {
    match parsed {
        Ok(Some(v)) => v,
        Ok(None) => default,
        Err(e) => {
            tracing::warn!("{}, using default", e);
            default
        }
    }
}
