//! Session Coordinator configuration.
//!
//! Configuration is loaded from environment variables with sensible
//! defaults; no field is secret, so `Debug` derives directly.

use std::env;
use std::str::FromStr;
use thiserror::Error;

/// Default HTTP/WebSocket bind address.
pub const DEFAULT_BIND_ADDRESS: &str = "0.0.0.0:8080";

/// Default grace window before an attendee-emptied room is ended.
pub const DEFAULT_EMPTY_ROOM_GRACE_SECONDS: u64 = 60;

/// Default cap on participants per room.
pub const DEFAULT_MAX_PARTICIPANTS_PER_ROOM: u32 = 100;

/// Default number of code-generation attempts before giving up.
pub const DEFAULT_CODE_ALLOCATION_ATTEMPTS: u32 = 32;

/// Default RTC port range handed to the media engine.
pub const DEFAULT_RTC_PORT_MIN: u16 = 10_000;
pub const DEFAULT_RTC_PORT_MAX: u16 = 10_100;

/// Media topology a deployment exercises.
///
/// The coordinator's membership and signaling responsibilities are
/// identical in both; only which surface clients use differs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaTopology {
    /// Browsers negotiate peer-to-peer; only the signaling relay is
    /// exercised. Engine operations are rejected.
    Mesh,
    /// All media flows through the Media Routing Engine; the resource
    /// ledger is exercised.
    Sfu,
}

impl MediaTopology {
    /// Returns the topology as a config/log label.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            MediaTopology::Mesh => "mesh",
            MediaTopology::Sfu => "sfu",
        }
    }
}

impl FromStr for MediaTopology {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "mesh" => Ok(MediaTopology::Mesh),
            "sfu" => Ok(MediaTopology::Sfu),
            other => Err(ConfigError::InvalidValue {
                name: "SC_MEDIA_TOPOLOGY",
                value: other.to_string(),
            }),
        }
    }
}

/// Session Coordinator configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// HTTP/WebSocket bind address (default: "0.0.0.0:8080").
    pub bind_address: String,

    /// Which media surface this deployment exercises.
    pub media_topology: MediaTopology,

    /// Whether a host's leave ends the room immediately.
    pub end_on_host_leave: bool,

    /// Grace window before an attendee-emptied Active room is ended.
    pub empty_room_grace_seconds: u64,

    /// Maximum participants per room.
    pub max_participants_per_room: u32,

    /// Code-generation attempts before `AllocationExhausted`.
    pub code_allocation_attempts: u32,

    /// RTC port range handed to the media engine at startup.
    pub rtc_port_min: u16,
    pub rtc_port_max: u16,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_address: DEFAULT_BIND_ADDRESS.to_string(),
            media_topology: MediaTopology::Sfu,
            end_on_host_leave: true,
            empty_room_grace_seconds: DEFAULT_EMPTY_ROOM_GRACE_SECONDS,
            max_participants_per_room: DEFAULT_MAX_PARTICIPANTS_PER_ROOM,
            code_allocation_attempts: DEFAULT_CODE_ALLOCATION_ATTEMPTS,
            rtc_port_min: DEFAULT_RTC_PORT_MIN,
            rtc_port_max: DEFAULT_RTC_PORT_MAX,
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid value for {name}: {value}")]
    InvalidValue { name: &'static str, value: String },
}

impl Config {
    /// Load configuration from environment variables, falling back to
    /// defaults for anything unset.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Config::default();

        if let Ok(addr) = env::var("SC_BIND_ADDRESS") {
            config.bind_address = addr;
        }
        if let Ok(topology) = env::var("SC_MEDIA_TOPOLOGY") {
            config.media_topology = topology.parse()?;
        }
        if let Ok(value) = env::var("SC_END_ON_HOST_LEAVE") {
            config.end_on_host_leave = parse_var("SC_END_ON_HOST_LEAVE", &value)?;
        }
        if let Ok(value) = env::var("SC_EMPTY_ROOM_GRACE_SECONDS") {
            config.empty_room_grace_seconds = parse_var("SC_EMPTY_ROOM_GRACE_SECONDS", &value)?;
        }
        if let Ok(value) = env::var("SC_MAX_PARTICIPANTS_PER_ROOM") {
            config.max_participants_per_room = parse_var("SC_MAX_PARTICIPANTS_PER_ROOM", &value)?;
        }
        if let Ok(value) = env::var("SC_CODE_ALLOCATION_ATTEMPTS") {
            config.code_allocation_attempts = parse_var("SC_CODE_ALLOCATION_ATTEMPTS", &value)?;
        }
        if let Ok(value) = env::var("SC_RTC_PORT_MIN") {
            config.rtc_port_min = parse_var("SC_RTC_PORT_MIN", &value)?;
        }
        if let Ok(value) = env::var("SC_RTC_PORT_MAX") {
            config.rtc_port_max = parse_var("SC_RTC_PORT_MAX", &value)?;
        }

        Ok(config)
    }
}

fn parse_var<T: FromStr>(name: &'static str, value: &str) -> Result<T, ConfigError> {
    value.parse().map_err(|_| ConfigError::InvalidValue {
        name,
        value: value.to_string(),
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.bind_address, DEFAULT_BIND_ADDRESS);
        assert_eq!(config.media_topology, MediaTopology::Sfu);
        assert!(config.end_on_host_leave);
        assert_eq!(
            config.empty_room_grace_seconds,
            DEFAULT_EMPTY_ROOM_GRACE_SECONDS
        );
    }

    #[test]
    fn test_topology_parse() {
        assert_eq!(
            "mesh".parse::<MediaTopology>().unwrap(),
            MediaTopology::Mesh
        );
        assert_eq!("SFU".parse::<MediaTopology>().unwrap(), MediaTopology::Sfu);
        assert!("hybrid".parse::<MediaTopology>().is_err());
    }

    #[test]
    fn test_topology_labels() {
        assert_eq!(MediaTopology::Mesh.as_str(), "mesh");
        assert_eq!(MediaTopology::Sfu.as_str(), "sfu");
    }
}
