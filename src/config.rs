//! Server configuration loaded from the environment

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;

use crate::session::{DEFAULT_IDLE_TIMEOUT, DEFAULT_REAP_INTERVAL};

#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address the HTTP server binds to (HOST / PORT)
    pub bind_addr: SocketAddr,
    /// Allowed CORS origin (None = permissive)
    pub cors_origin: Option<String>,
    pub session_idle_timeout: Duration,
    pub reap_interval: Duration,
    /// How long a single outbound send may wait for queue space
    pub send_timeout: Duration,
    /// Outbound queue capacity per connection
    pub outbound_buffer: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), 8080),
            cors_origin: None,
            session_idle_timeout: DEFAULT_IDLE_TIMEOUT,
            reap_interval: DEFAULT_REAP_INTERVAL,
            send_timeout: Duration::from_secs(10),
            outbound_buffer: 64,
        }
    }
}

fn env_value(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    let raw = env_value(key)?;
    match raw.parse() {
        Ok(value) => Some(value),
        Err(_) => {
            tracing::warn!("Ignoring invalid value for {}: {:?}", key, raw);
            None
        }
    }
}

impl ServerConfig {
    /// Load configuration from environment variables, falling back to defaults
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let host = env_parse::<IpAddr>("HOST").unwrap_or(defaults.bind_addr.ip());
        let port = env_parse::<u16>("PORT").unwrap_or(defaults.bind_addr.port());

        let secs = |key: &str, default: Duration| {
            env_parse::<u64>(key)
                .filter(|s| *s > 0)
                .map(Duration::from_secs)
                .unwrap_or(default)
        };

        Self {
            bind_addr: SocketAddr::new(host, port),
            cors_origin: env_value("ORIGIN_URL"),
            session_idle_timeout: secs("SESSION_IDLE_TIMEOUT_SECS", defaults.session_idle_timeout),
            reap_interval: secs("SESSION_REAP_INTERVAL_SECS", defaults.reap_interval),
            send_timeout: secs("WS_SEND_TIMEOUT_SECS", defaults.send_timeout),
            outbound_buffer: env_parse::<usize>("WS_OUTBOUND_BUFFER")
                .filter(|n| *n > 0)
                .unwrap_or(defaults.outbound_buffer),
        }
    }
}
