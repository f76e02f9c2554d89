use std::env;
use std::net::{IpAddr, Ipv4Addr};
use std::path::PathBuf;
use std::time::Duration;

use crate::error::{CoordinatorError, Result};

pub const DEFAULT_LEAD_TIME_MINUTES: i64 = 30;
pub const DEFAULT_REFRESH_INTERVAL_SECS: u64 = 5;
pub const DEFAULT_FEED_TIMEOUT_SECS: u64 = 10;
pub const DEFAULT_ROOM_ID: &str = "default";
pub const DEFAULT_ROOM_NAME: &str = "Main Exam Room";
pub const DEFAULT_LOCAL_STORE_PATH: &str = "./data/local_store.json";

#[derive(Debug, Clone)]
pub struct Config {
    pub server: ServerConfig,
    pub monitor: MonitorConfig,
    pub backend: BackendConfig,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone)]
pub struct MonitorConfig {
    /// How long before an exam starts its room becomes visible
    pub lead_time: chrono::Duration,
    pub refresh_interval: Duration,
    pub feed_timeout: Duration,
    /// None keeps a room locked until its holder releases it
    pub occupancy_lease: Option<Duration>,
    pub default_room_id: String,
    pub default_room_name: String,
}

#[derive(Debug, Clone)]
pub enum BackendConfig {
    Remote { base_url: String },
    Local { path: PathBuf },
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            lead_time: chrono::Duration::minutes(DEFAULT_LEAD_TIME_MINUTES),
            refresh_interval: Duration::from_secs(DEFAULT_REFRESH_INTERVAL_SECS),
            feed_timeout: Duration::from_secs(DEFAULT_FEED_TIMEOUT_SECS),
            occupancy_lease: None,
            default_room_id: DEFAULT_ROOM_ID.to_string(),
            default_room_name: DEFAULT_ROOM_NAME.to_string(),
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenv::dotenv().ok();

        let config = Self {
            server: ServerConfig {
                host: env::var("SERVER_HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
                port: parse_var("SERVER_PORT", 8080)?,
            },
            monitor: MonitorConfig {
                lead_time: chrono::Duration::minutes(parse_var(
                    "EXAM_LEAD_TIME_MINUTES",
                    DEFAULT_LEAD_TIME_MINUTES,
                )?),
                refresh_interval: Duration::from_secs(parse_var(
                    "REFRESH_INTERVAL_SECS",
                    DEFAULT_REFRESH_INTERVAL_SECS,
                )?),
                feed_timeout: Duration::from_secs(parse_var(
                    "FEED_TIMEOUT_SECS",
                    DEFAULT_FEED_TIMEOUT_SECS,
                )?),
                occupancy_lease: match env::var("OCCUPANCY_LEASE_SECS") {
                    Ok(v) if !v.is_empty() => Some(Duration::from_secs(v.parse().map_err(|_| {
                        CoordinatorError::InvalidConfiguration(format!(
                            "OCCUPANCY_LEASE_SECS must be a number of seconds, got {}",
                            v
                        ))
                    })?)),
                    _ => None,
                },
                default_room_id: env::var("DEFAULT_ROOM_ID")
                    .unwrap_or_else(|_| DEFAULT_ROOM_ID.to_string()),
                default_room_name: env::var("DEFAULT_ROOM_NAME")
                    .unwrap_or_else(|_| DEFAULT_ROOM_NAME.to_string()),
            },
            backend: match env::var("BACKEND_URL") {
                Ok(url) if !url.is_empty() => BackendConfig::Remote {
                    base_url: url.trim_end_matches('/').to_string(),
                },
                _ => BackendConfig::Local {
                    path: PathBuf::from(
                        env::var("LOCAL_STORE_PATH")
                            .unwrap_or_else(|_| DEFAULT_LOCAL_STORE_PATH.to_string()),
                    ),
                },
            },
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.monitor.lead_time < chrono::Duration::zero() {
            return Err(CoordinatorError::InvalidConfiguration(
                "EXAM_LEAD_TIME_MINUTES must not be negative".to_string(),
            ));
        }
        if self.monitor.refresh_interval.is_zero() {
            return Err(CoordinatorError::InvalidConfiguration(
                "REFRESH_INTERVAL_SECS must be greater than zero".to_string(),
            ));
        }
        if self.monitor.feed_timeout.is_zero() {
            return Err(CoordinatorError::InvalidConfiguration(
                "FEED_TIMEOUT_SECS must be greater than zero".to_string(),
            ));
        }
        if matches!(self.monitor.occupancy_lease, Some(lease) if lease.is_zero()) {
            return Err(CoordinatorError::InvalidConfiguration(
                "OCCUPANCY_LEASE_SECS must be greater than zero when set".to_string(),
            ));
        }
        Ok(())
    }

    pub fn bind_address(&self) -> ([u8; 4], u16) {
        let ip_addr = self.parse_host_to_ipv4();
        (ip_addr.octets(), self.server.port)
    }

    fn parse_host_to_ipv4(&self) -> Ipv4Addr {
        if let Ok(addr) = self.server.host.parse::<IpAddr>() {
            match addr {
                IpAddr::V4(ipv4) => return ipv4,
                IpAddr::V6(_) => {
                    tracing::warn!(
                        host = %self.server.host,
                        "IPv6 address provided but only IPv4 supported, using 0.0.0.0"
                    );
                    return Ipv4Addr::new(0, 0, 0, 0);
                }
            }
        }

        match self.server.host.as_str() {
            "localhost" => Ipv4Addr::new(127, 0, 0, 1),
            "" | "0.0.0.0" => Ipv4Addr::new(0, 0, 0, 0),
            _ => {
                tracing::warn!(
                    host = %self.server.host,
                    "Unable to parse host as IPv4, using 0.0.0.0"
                );
                Ipv4Addr::new(0, 0, 0, 0)
            }
        }
    }
}

fn parse_var<T: std::str::FromStr>(name: &str, default: T) -> Result<T> {
    match env::var(name) {
        Ok(v) if !v.is_empty() => v.parse().map_err(|_| {
            CoordinatorError::InvalidConfiguration(format!("Invalid {}: {}", name, v))
        }),
        _ => Ok(default),
    }
}
