//! CLI argument parsing (spec §6, §10.1) — `clap` derive, matching the
//! derive style used across the retrieval pack's CLI-driven crates.

use std::fs;
use std::net::IpAddr;

use clap::Parser;
use local_ip_address::list_afinet_netifas;

use crate::config::{
    Config, LogLevel, Role, Timeouts, DEFAULT_CLIENT_RELAY_BASE_PORT, DEFAULT_PEER_COUNT,
    DEFAULT_SERVER_RELAY_BASE_PORT,
};
use crate::error::EngineError;

const MIN_PORT: u16 = 1024;

#[derive(Parser, Debug)]
#[command(name = "wookiee-unicaster", about = "Bidirectional UDP relay for Direct-IP LAN games over NAT/CGNAT")]
pub struct Cli {
    /// Engine role.
    #[arg(short = 'm', long = "mode", value_enum)]
    pub mode: CliRole,

    /// Bind by interface name (derives the local IPv4 address).
    #[arg(short = 'e', long = "iface", conflicts_with = "bind_ip")]
    pub iface: Option<String>,

    /// Bind by explicit IPv4 address.
    #[arg(short = 'l', long = "bind-ip")]
    pub bind_ip: Option<IpAddr>,

    /// SERVER: application listening port.
    #[arg(short = 'i', long = "app-port")]
    pub app_listen_port: Option<u16>,

    /// CLIENT: application destination port on the game server.
    #[arg(short = 'o', long = "dest-port")]
    pub app_dest_port: Option<u16>,

    /// CLIENT only: the SERVER's public IP.
    #[arg(short = 's', long = "server-ip")]
    pub server_ip: Option<IpAddr>,

    /// CLIENT only: the local game server's IP.
    #[arg(short = 'd', long = "game-server-ip")]
    pub game_server_ip: Option<IpAddr>,

    /// Peer count, identical on both sides.
    #[arg(short = 'p', long = "peers", default_value_t = DEFAULT_PEER_COUNT)]
    pub peer_count: u8,

    #[arg(long = "server-relay-base-port", default_value_t = DEFAULT_SERVER_RELAY_BASE_PORT)]
    pub server_relay_base_port: u16,

    #[arg(long = "client-relay-base-port", default_value_t = DEFAULT_CLIENT_RELAY_BASE_PORT)]
    pub client_relay_base_port: u16,

    /// Suppress non-fatal logging output.
    #[arg(short = 'q', long = "quiet")]
    pub quiet: bool,

    /// Path to the optional config file (section/key=value format).
    #[arg(short = 'c', long = "config")]
    pub config_path: Option<std::path::PathBuf>,
}

#[derive(clap::ValueEnum, Clone, Copy, Debug)]
pub enum CliRole {
    Server,
    Client,
}

impl Cli {
    /// Validates flag combinations spec.md §6 requires beyond what clap's
    /// type system expresses, resolves the bind address, and produces a
    /// [`Config`] with file-independent defaults. The caller folds any
    /// config file's [`crate::config::FileOverrides`] in afterward.
    pub fn into_config(self) -> Result<Config, EngineError> {
        let role = match self.mode {
            CliRole::Server => Role::Server,
            CliRole::Client => Role::Client,
        };

        let bind_addr = match (self.iface, self.bind_ip) {
            (Some(_), Some(_)) => {
                return Err(EngineError::config("exactly one of -e <iface> or -l <ip> is required"))
            }
            (None, None) => {
                return Err(EngineError::config("exactly one of -e <iface> or -l <ip> is required"))
            }
            (None, Some(ip)) => ip,
            (Some(iface), None) => resolve_iface(&iface)?,
        };

        match role {
            Role::Server => {
                if self.app_listen_port.is_none() {
                    return Err(EngineError::config("-i <port> is required for -m server"));
                }
                if self.server_ip.is_some() || self.game_server_ip.is_some() || self.app_dest_port.is_some() {
                    return Err(EngineError::config("-s, -d, and -o are CLIENT-only flags"));
                }
            }
            Role::Client => {
                if self.app_dest_port.is_none() || self.server_ip.is_none() || self.game_server_ip.is_none() {
                    return Err(EngineError::config(
                        "-o <port>, -s <ip>, and -d <ip> are all required for -m client",
                    ));
                }
                if self.app_listen_port.is_some() {
                    return Err(EngineError::config("-i is a SERVER-only flag"));
                }
            }
        }

        if self.peer_count == 0 {
            return Err(EngineError::config("-p must be at least 1"));
        }

        for (name, port) in [
            ("-i", self.app_listen_port),
            ("-o", self.app_dest_port),
        ] {
            if let Some(p) = port {
                check_port(name, p)?;
            }
        }
        check_relay_range("--server-relay-base-port", self.server_relay_base_port, self.peer_count)?;
        check_relay_range("--client-relay-base-port", self.client_relay_base_port, self.peer_count)?;

        let (s_lo, s_hi) = relay_range(self.server_relay_base_port, self.peer_count);
        let (c_lo, c_hi) = relay_range(self.client_relay_base_port, self.peer_count);
        if s_lo <= c_hi && c_lo <= s_hi {
            return Err(EngineError::config(
                "server and client relay port ranges must not overlap",
            ));
        }

        Ok(Config {
            role,
            bind_addr,
            peer_count: self.peer_count,
            app_listen_port: self.app_listen_port,
            app_dest_port: self.app_dest_port,
            server_ip: self.server_ip,
            game_server_ip: self.game_server_ip,
            server_relay_base_port: self.server_relay_base_port,
            client_relay_base_port: self.client_relay_base_port,
            receive_buffer_size: crate::config::DEFAULT_RECEIVE_BUFFER_SIZE,
            packet_queue_size: crate::config::DEFAULT_PACKET_QUEUE_SIZE,
            timeouts: Timeouts::default(),
            quiet: self.quiet,
            logging_level: LogLevel::Info,
        })
    }
}

fn relay_range(base: u16, peer_count: u8) -> (u16, u16) {
    (base, base + (peer_count as u16 - 1))
}

fn check_port(name: &str, port: u16) -> Result<(), EngineError> {
    if port < MIN_PORT {
        return Err(EngineError::config(format!(
            "{name} must be in [{MIN_PORT}, 65535], got {port}"
        )));
    }
    Ok(())
}

fn check_relay_range(name: &str, base: u16, peer_count: u8) -> Result<(), EngineError> {
    check_port(name, base)?;
    let top = base.checked_add(peer_count as u16 - 1).ok_or_else(|| {
        EngineError::config(format!("{name} + peer count overflows the port range"))
    })?;
    if top < MIN_PORT {
        return Err(EngineError::config(format!("{name} range must stay within [{MIN_PORT}, 65535]")));
    }
    Ok(())
}

fn resolve_iface(iface: &str) -> Result<IpAddr, EngineError> {
    let ifas = list_afinet_netifas()
        .map_err(|e| EngineError::config(format!("failed to enumerate interfaces: {e}")))?;
    ifas.into_iter()
        .find(|(name, ip)| name == iface && ip.is_ipv4())
        .map(|(_, ip)| ip)
        .ok_or_else(|| EngineError::config(format!("no IPv4 address found on interface `{iface}`")))
}

/// Loads an optional config file from disk, if a path was given.
pub fn load_config_file(path: &std::path::Path) -> Result<crate::config::FileOverrides, EngineError> {
    let text = fs::read_to_string(path)
        .map_err(|e| EngineError::config(format!("failed to read config file {path:?}: {e}")))?;
    crate::config::file::parse(&text)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_both_iface_and_bind_ip_instead_of_panicking() {
        let cli = Cli {
            mode: CliRole::Server,
            iface: Some("eth0".to_string()),
            bind_ip: Some("10.0.0.1".parse().unwrap()),
            app_listen_port: Some(16010),
            app_dest_port: None,
            server_ip: None,
            game_server_ip: None,
            peer_count: 1,
            server_relay_base_port: 23000,
            client_relay_base_port: 23100,
            quiet: false,
            config_path: None,
        };
        assert!(cli.into_config().is_err());
    }

    #[test]
    fn rejects_overlapping_relay_ranges() {
        let cli = Cli {
            mode: CliRole::Server,
            iface: None,
            bind_ip: Some("10.0.0.1".parse().unwrap()),
            app_listen_port: Some(16010),
            app_dest_port: None,
            server_ip: None,
            game_server_ip: None,
            peer_count: 4,
            server_relay_base_port: 23000,
            client_relay_base_port: 23002,
            quiet: false,
            config_path: None,
        };
        assert!(cli.into_config().is_err());
    }

    #[test]
    fn server_role_rejects_client_only_flags() {
        let cli = Cli {
            mode: CliRole::Server,
            iface: None,
            bind_ip: Some("10.0.0.1".parse().unwrap()),
            app_listen_port: Some(16010),
            app_dest_port: None,
            server_ip: Some("1.2.3.4".parse().unwrap()),
            game_server_ip: None,
            peer_count: 1,
            server_relay_base_port: 23000,
            client_relay_base_port: 23100,
            quiet: false,
            config_path: None,
        };
        assert!(cli.into_config().is_err());
    }

    #[test]
    fn valid_server_config_is_accepted() {
        let cli = Cli {
            mode: CliRole::Server,
            iface: None,
            bind_ip: Some("10.0.0.1".parse().unwrap()),
            app_listen_port: Some(16010),
            app_dest_port: None,
            server_ip: None,
            game_server_ip: None,
            peer_count: 2,
            server_relay_base_port: 23000,
            client_relay_base_port: 23100,
            quiet: false,
            config_path: None,
        };
        let cfg = cli.into_config().unwrap();
        assert_eq!(cfg.peer_count, 2);
        assert_eq!(cfg.app_listen_port, Some(16010));
    }

    #[test]
    fn valid_client_config_is_accepted() {
        let cli = Cli {
            mode: CliRole::Client,
            iface: None,
            bind_ip: Some("10.0.0.2".parse().unwrap()),
            app_listen_port: None,
            app_dest_port: Some(16010),
            server_ip: Some("1.2.3.4".parse().unwrap()),
            game_server_ip: Some("10.0.0.1".parse().unwrap()),
            peer_count: 1,
            server_relay_base_port: 23000,
            client_relay_base_port: 23100,
            quiet: false,
            config_path: None,
        };
        assert!(cli.into_config().is_ok());
    }
}
