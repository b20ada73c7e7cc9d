//! Configuration record (spec §3) and the config-file loader (§6, §10.2).
//!
//! The config file is section/key=value, not TOML — no crate in reach
//! parses this exact shape, so `file::parse` is a small hand-written
//! reader. CLI flags and file values both land in [`Config`]; CLI wins
//! wherever both can set a value.

use std::net::IpAddr;
use std::time::Duration;

use crate::error::EngineError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Server,
    Client,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Debug,
    Info,
    Warning,
    Error,
    Critical,
}

impl LogLevel {
    pub fn to_filter(self) -> log::LevelFilter {
        match self {
            LogLevel::Debug => log::LevelFilter::Debug,
            LogLevel::Info => log::LevelFilter::Info,
            LogLevel::Warning => log::LevelFilter::Warn,
            LogLevel::Error => log::LevelFilter::Error,
            // `log` has no Critical variant; fold it into Error.
            LogLevel::Critical => log::LevelFilter::Error,
        }
    }

    fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_uppercase().as_str() {
            "DEBUG" => Some(LogLevel::Debug),
            "INFO" => Some(LogLevel::Info),
            "WARNING" => Some(LogLevel::Warning),
            "ERROR" => Some(LogLevel::Error),
            "CRITICAL" => Some(LogLevel::Critical),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Timeouts {
    pub client_connection: Duration,
    pub server_connection: Duration,
    pub server_peer_connection: Duration,
    pub ping_interval: Duration,
    pub ping_timeout: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            client_connection: Duration::from_secs(10),
            server_connection: Duration::from_secs(10),
            server_peer_connection: Duration::from_secs(60),
            ping_interval: Duration::from_secs(3),
            ping_timeout: Duration::from_secs(6),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub role: Role,
    pub bind_addr: IpAddr,
    pub peer_count: u8,
    /// SERVER: application listening port. CLIENT: unused.
    pub app_listen_port: Option<u16>,
    /// CLIENT: application destination port on the game server.
    pub app_dest_port: Option<u16>,
    /// CLIENT only: the SERVER's public IP.
    pub server_ip: Option<IpAddr>,
    /// CLIENT only: the local game server's IP.
    pub game_server_ip: Option<IpAddr>,
    pub server_relay_base_port: u16,
    pub client_relay_base_port: u16,
    pub receive_buffer_size: usize,
    pub packet_queue_size: usize,
    pub timeouts: Timeouts,
    pub quiet: bool,
    pub logging_level: LogLevel,
}

pub const DEFAULT_RECEIVE_BUFFER_SIZE: usize = 2048;
pub const DEFAULT_PACKET_QUEUE_SIZE: usize = 256;
pub const DEFAULT_PEER_COUNT: u8 = 1;
pub const DEFAULT_SERVER_RELAY_BASE_PORT: u16 = 23000;
pub const DEFAULT_CLIENT_RELAY_BASE_PORT: u16 = 23100;

/// Values read from the config file, each optional — only present keys
/// override [`Config`]'s built-in defaults (spec.md §6: "missing keys
/// use defaults stated in §3").
#[derive(Debug, Clone, Default)]
pub struct FileOverrides {
    pub logging_level: Option<LogLevel>,
    pub receive_buffer_size: Option<usize>,
    pub packet_queue_size: Option<usize>,
    pub client_connection_timeout: Option<u64>,
    pub server_connection_timeout: Option<u64>,
    pub server_peer_connection_timeout: Option<u64>,
    pub ping_interval: Option<u64>,
    pub ping_timeout: Option<u64>,
}

impl FileOverrides {
    pub fn apply(&self, cfg: &mut Config) {
        if let Some(v) = self.logging_level {
            cfg.logging_level = v;
        }
        if let Some(v) = self.receive_buffer_size {
            cfg.receive_buffer_size = v;
        }
        if let Some(v) = self.packet_queue_size {
            cfg.packet_queue_size = v;
        }
        if let Some(v) = self.client_connection_timeout {
            cfg.timeouts.client_connection = Duration::from_secs(v);
        }
        if let Some(v) = self.server_connection_timeout {
            cfg.timeouts.server_connection = Duration::from_secs(v);
        }
        if let Some(v) = self.server_peer_connection_timeout {
            cfg.timeouts.server_peer_connection = Duration::from_secs(v);
        }
        if let Some(v) = self.ping_interval {
            cfg.timeouts.ping_interval = Duration::from_secs(v);
        }
        if let Some(v) = self.ping_timeout {
            cfg.timeouts.ping_timeout = Duration::from_secs(v);
        }
    }
}

pub mod file {
    use super::{EngineError, FileOverrides, LogLevel};

    /// Parses the section/key=value config file format from spec.md §6.
    /// Unknown keys are logged and ignored; malformed numeric values are
    /// a `ConfigError` since they indicate a broken config rather than
    /// an absent one.
    pub fn parse(text: &str) -> Result<FileOverrides, EngineError> {
        let mut out = FileOverrides::default();
        let mut section = String::new();

        for (lineno, raw) in text.lines().enumerate() {
            let line = raw.trim();
            if line.is_empty() || line.starts_with('#') || line.starts_with(';') {
                continue;
            }
            if let Some(name) = line.strip_prefix('[').and_then(|s| s.strip_suffix(']')) {
                section = name.trim().to_ascii_uppercase();
                continue;
            }
            let Some((key, value)) = line.split_once('=') else {
                return Err(EngineError::config(format!(
                    "config line {}: expected `key = value`, got `{line}`",
                    lineno + 1
                )));
            };
            let key = key.trim().to_ascii_lowercase();
            let value = value.trim();

            match (section.as_str(), key.as_str()) {
                ("LOGGING", "logging_level") => match LogLevel::parse(value) {
                    Some(v) => out.logging_level = Some(v),
                    None => {
                        return Err(EngineError::config(format!(
                            "unrecognized logging_level `{value}`"
                        )))
                    }
                },
                ("CONNECTION", "receive_buffer_size") => {
                    out.receive_buffer_size = Some(parse_usize(&key, value)?)
                }
                ("CONNECTION", "packet_queue_size") => {
                    out.packet_queue_size = Some(parse_usize(&key, value)?)
                }
                ("CONNECTION", "client_connection_timeout") => {
                    out.client_connection_timeout = Some(parse_u64(&key, value)?)
                }
                ("CONNECTION", "server_connection_timeout") => {
                    out.server_connection_timeout = Some(parse_u64(&key, value)?)
                }
                ("CONNECTION", "server_peer_connection_timeout") => {
                    out.server_peer_connection_timeout = Some(parse_u64(&key, value)?)
                }
                ("KEEP-ALIVE", "ping_interval") => out.ping_interval = Some(parse_nonzero_secs(&key, value)?),
                ("KEEP-ALIVE", "ping_timeout") => out.ping_timeout = Some(parse_nonzero_secs(&key, value)?),
                _ => {
                    log::warn!("config: ignoring unknown key `{key}` in section [{section}]");
                }
            }
        }

        Ok(out)
    }

    fn parse_usize(key: &str, value: &str) -> Result<usize, EngineError> {
        value
            .parse()
            .map_err(|_| EngineError::config(format!("`{key}` must be a non-negative integer, got `{value}`")))
    }

    fn parse_u64(key: &str, value: &str) -> Result<u64, EngineError> {
        value
            .parse()
            .map_err(|_| EngineError::config(format!("`{key}` must be a non-negative integer, got `{value}`")))
    }

    /// `ping_interval`/`ping_timeout` feed `tokio::time::interval`, which
    /// panics on a zero duration — reject zero here instead of at the
    /// keep-alive clock's first tick.
    fn parse_nonzero_secs(key: &str, value: &str) -> Result<u64, EngineError> {
        let v = parse_u64(key, value)?;
        if v == 0 {
            return Err(EngineError::config(format!("`{key}` must be at least 1 second, got `{value}`")));
        }
        Ok(v)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_all_known_sections() {
        let text = "\
[LOGGING]
logging_level = DEBUG

[CONNECTION]
receive_buffer_size = 4096
packet_queue_size = 128
server_connection_timeout = 20

[KEEP-ALIVE]
ping_interval = 2
ping_timeout = 5
";
        let overrides = file::parse(text).unwrap();
        assert_eq!(overrides.logging_level, Some(LogLevel::Debug));
        assert_eq!(overrides.receive_buffer_size, Some(4096));
        assert_eq!(overrides.packet_queue_size, Some(128));
        assert_eq!(overrides.server_connection_timeout, Some(20));
        assert_eq!(overrides.ping_interval, Some(2));
        assert_eq!(overrides.ping_timeout, Some(5));
    }

    #[test]
    fn unknown_key_is_ignored_not_fatal() {
        let text = "[CONNECTION]\nsome_future_key = 1\n";
        assert!(file::parse(text).is_ok());
    }

    #[test]
    fn malformed_line_is_a_config_error() {
        let text = "[CONNECTION]\nthis is not kv\n";
        assert!(file::parse(text).is_err());
    }

    #[test]
    fn bad_numeric_value_is_a_config_error() {
        let text = "[CONNECTION]\nreceive_buffer_size = not-a-number\n";
        assert!(file::parse(text).is_err());
    }

    #[test]
    fn zero_ping_interval_is_rejected() {
        // `tokio::time::interval` panics on a zero duration; the keep-alive
        // clock is built from this value, so zero must be a config error.
        let text = "[KEEP-ALIVE]\nping_interval = 0\n";
        assert!(file::parse(text).is_err());
    }

    #[test]
    fn comments_and_blank_lines_are_skipped() {
        let text = "# comment\n\n; also a comment\n[LOGGING]\nlogging_level = WARNING\n";
        let overrides = file::parse(text).unwrap();
        assert_eq!(overrides.logging_level, Some(LogLevel::Warning));
    }
}
