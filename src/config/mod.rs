//! Configuration module - environment variable parsing

use std::env;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::arena::{PoolSettings, RestoreSettings};
use crate::game::MatchSettings;
use crate::world::Location;

/// Application configuration loaded from environment variables
#[derive(Clone, Debug)]
pub struct Config {
    /// Server binding address
    pub server_addr: SocketAddr,
    /// Log level (trace, debug, info, warn, error)
    pub log_level: String,
    /// Emit logs as JSON lines instead of text
    pub log_json: bool,

    /// Persisted arena definitions
    pub arena_file: PathBuf,
    /// Kit definitions; built-in kits when unset
    pub kit_file: Option<PathBuf>,
    /// Bearer token for admin routes; admin routes refuse everything when unset
    pub admin_token: Option<String>,
    /// Allowed client origin for CORS; any origin when unset
    pub client_origin: Option<String>,

    pub lobby_spawn: Location,
    pub countdown_secs: u32,
    pub match_timeout: Duration,

    pub restore_batch_size: usize,
    pub restore_batch_delay: Duration,
    pub relaxed_arena_fallback: bool,

    pub queue_sweep_interval: Duration,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load configuration through an arbitrary key lookup
    pub fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        // PORT wins over SERVER_ADDR
        let server_addr = match get("PORT") {
            Some(port) => format!("0.0.0.0:{}", port),
            None => get("SERVER_ADDR").unwrap_or_else(|| "0.0.0.0:8080".to_string()),
        };

        let lobby_spawn = match get("LOBBY_SPAWN") {
            Some(raw) => parse_location(&raw).ok_or(ConfigError::Invalid {
                key: "LOBBY_SPAWN",
                value: raw,
            })?,
            None => Location::new(0.5, 64.0, 0.5),
        };

        Ok(Self {
            server_addr: server_addr
                .parse()
                .map_err(|_| ConfigError::InvalidAddress)?,

            log_level: get("LOG_LEVEL").unwrap_or_else(|| "info".to_string()),
            log_json: get("LOG_FORMAT").is_some_and(|f| f.eq_ignore_ascii_case("json")),

            arena_file: get("ARENA_FILE")
                .unwrap_or_else(|| "arenas.json".to_string())
                .into(),
            kit_file: get("KIT_FILE").filter(|s| !s.is_empty()).map(PathBuf::from),
            admin_token: get("ADMIN_TOKEN").filter(|s| !s.is_empty()),
            client_origin: get("CLIENT_ORIGIN").filter(|s| !s.is_empty()),

            lobby_spawn,
            countdown_secs: parsed(&get, "COUNTDOWN_SECS", 5)?,
            match_timeout: Duration::from_secs(parsed(&get, "MATCH_TIMEOUT_SECS", 600)?),

            restore_batch_size: parsed(&get, "RESTORE_BATCH_SIZE", 25)?,
            restore_batch_delay: Duration::from_millis(parsed(&get, "RESTORE_BATCH_DELAY_MS", 50)?),
            relaxed_arena_fallback: parsed(&get, "RELAXED_ARENA_FALLBACK", true)?,

            queue_sweep_interval: Duration::from_millis(parsed(&get, "QUEUE_SWEEP_MS", 1000)?),
        })
    }

    pub fn restore_settings(&self) -> RestoreSettings {
        RestoreSettings {
            batch_size: self.restore_batch_size.max(1),
            batch_delay: self.restore_batch_delay,
        }
    }

    pub fn pool_settings(&self) -> PoolSettings {
        PoolSettings {
            restore: self.restore_settings(),
            relaxed_fallback: self.relaxed_arena_fallback,
        }
    }

    pub fn match_settings(&self) -> MatchSettings {
        MatchSettings {
            countdown_secs: self.countdown_secs,
            timeout: self.match_timeout,
            lobby: self.lobby_spawn,
        }
    }
}

fn parsed<T: FromStr>(
    get: &impl Fn(&str) -> Option<String>,
    key: &'static str,
    default: T,
) -> Result<T, ConfigError> {
    match get(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|_| ConfigError::Invalid { key, value: raw }),
        None => Ok(default),
    }
}

/// Parse `x,y,z` or `x,y,z,yaw,pitch`
pub fn parse_location(raw: &str) -> Option<Location> {
    let parts: Vec<&str> = raw.split(',').map(str::trim).collect();
    if parts.len() != 3 && parts.len() != 5 {
        return None;
    }
    let x = parts[0].parse().ok()?;
    let y = parts[1].parse().ok()?;
    let z = parts[2].parse().ok()?;
    let mut location = Location::new(x, y, z);
    if parts.len() == 5 {
        location = location.with_rotation(parts[3].parse().ok()?, parts[4].parse().ok()?);
    }
    Some(location)
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid value for {key}: '{value}'")]
    Invalid { key: &'static str, value: String },

    #[error("Invalid server address format")]
    InvalidAddress,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults() {
        let config = Config::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config.server_addr.port(), 8080);
        assert_eq!(config.arena_file, PathBuf::from("arenas.json"));
        assert_eq!(config.countdown_secs, 5);
        assert_eq!(config.match_timeout, Duration::from_secs(600));
        assert_eq!(config.restore_batch_size, 25);
        assert!(config.relaxed_arena_fallback);
        assert!(config.admin_token.is_none());
        assert!(!config.log_json);
        assert_eq!(config.lobby_spawn, Location::new(0.5, 64.0, 0.5));
    }

    #[test]
    fn port_wins_over_server_addr() {
        let config = Config::from_lookup(lookup(&[
            ("PORT", "9000"),
            ("SERVER_ADDR", "127.0.0.1:7000"),
        ]))
        .unwrap();
        assert_eq!(config.server_addr.port(), 9000);
    }

    #[test]
    fn overrides_and_errors() {
        let config = Config::from_lookup(lookup(&[
            ("LOBBY_SPAWN", "10, 70, -3.5, 180, 0"),
            ("RELAXED_ARENA_FALLBACK", "false"),
            ("ADMIN_TOKEN", "secret"),
            ("RESTORE_BATCH_SIZE", "0"),
        ]))
        .unwrap();
        assert_eq!(config.lobby_spawn.z, -3.5);
        assert_eq!(config.lobby_spawn.yaw, 180.0);
        assert!(!config.relaxed_arena_fallback);
        assert_eq!(config.admin_token.as_deref(), Some("secret"));
        assert_eq!(config.restore_settings().batch_size, 1);

        let err = Config::from_lookup(lookup(&[("COUNTDOWN_SECS", "soon")])).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { key: "COUNTDOWN_SECS", .. }));
        assert!(matches!(
            Config::from_lookup(lookup(&[("SERVER_ADDR", "nowhere")])),
            Err(ConfigError::InvalidAddress)
        ));
    }

    #[test]
    fn location_parsing() {
        assert!(parse_location("1,2").is_none());
        assert!(parse_location("1,2,3,4").is_none());
        assert!(parse_location("a,2,3").is_none());
        assert_eq!(parse_location("1,2,3"), Some(Location::new(1.0, 2.0, 3.0)));
    }
}
