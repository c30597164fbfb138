//! Server and gameplay configuration.
//!
//! Defaults match the reference tuning (100×100 grid, 5 s tile cooldown,
//! 5-energy captures, 5-minute rounds). Values can be loaded from a JSON
//! file and then overridden by `NEON_GRID_*` environment variables.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::game::grid::{core_zone_margin, MIN_CORE_SPACING};

/// Errors that can occur when loading or validating configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read the configuration file from disk.
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    /// Failed to parse the configuration file.
    #[error("failed to parse config JSON: {0}")]
    Json(#[from] serde_json::Error),

    /// An environment variable held an unparseable value.
    #[error("invalid value for {var}: {value:?}")]
    InvalidEnv {
        /// Variable name.
        var: String,
        /// Raw value.
        value: String,
    },

    /// Settings that cannot produce a playable game.
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Gameplay tuning consumed by the capture engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GameConfig {
    /// Grid width in tiles.
    pub grid_width: u32,
    /// Grid height in tiles.
    pub grid_height: u32,
    /// Minimum time a tile stays untouched before it can be recaptured.
    pub capture_cooldown_ms: u64,
    /// Energy pool ceiling.
    pub energy_max: u32,
    /// Energy spent per capture attempt.
    pub capture_cost: u32,
    /// Energy regenerated per second.
    pub energy_regen_per_sec: u32,
    /// Requests allowed per rate window.
    pub rate_limit_max_requests: usize,
    /// Rate window length.
    pub rate_limit_window_ms: u64,
    /// Length of an active round.
    pub round_duration_ms: u64,
    /// Pause between a round ending and the next one starting.
    pub round_intermission_ms: u64,
    /// Number of core zones placed per round.
    pub core_zone_count: usize,
}

impl Default for GameConfig {
    fn default() -> Self {
        Self {
            grid_width: 100,
            grid_height: 100,
            capture_cooldown_ms: 5_000,
            energy_max: 100,
            capture_cost: 5,
            energy_regen_per_sec: 1,
            rate_limit_max_requests: 10,
            rate_limit_window_ms: 1_000,
            round_duration_ms: 300_000,
            round_intermission_ms: 10_000,
            core_zone_count: 8,
        }
    }
}

impl GameConfig {
    /// Check that these settings describe a playable game.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] describing the first problem found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.grid_width == 0 || self.grid_height == 0 {
            return Err(ConfigError::Invalid("grid dimensions must be non-zero".into()));
        }
        if self.energy_max == 0 {
            return Err(ConfigError::Invalid("energy_max must be non-zero".into()));
        }
        if self.capture_cost > self.energy_max {
            return Err(ConfigError::Invalid(format!(
                "capture_cost {} exceeds energy_max {}",
                self.capture_cost, self.energy_max
            )));
        }
        if self.rate_limit_max_requests == 0 || self.rate_limit_window_ms == 0 {
            return Err(ConfigError::Invalid("rate limit must allow at least one request per non-empty window".into()));
        }
        if self.round_duration_ms == 0 {
            return Err(ConfigError::Invalid("round_duration_ms must be non-zero".into()));
        }

        // Each core claims a Manhattan ball of radius MIN_CORE_SPACING/2 inside
        // the placement band; refuse counts that obviously cannot fit.
        let margin = core_zone_margin(self.grid_width, self.grid_height);
        let band_w = u64::from(self.grid_width.saturating_sub(2 * margin));
        let band_h = u64::from(self.grid_height.saturating_sub(2 * margin));
        if self.core_zone_count > 0 {
            if band_w == 0 || band_h == 0 {
                return Err(ConfigError::Invalid("grid too small for core zones".into()));
            }
            let half = u64::from(MIN_CORE_SPACING / 2);
            let per_core = 2 * half * half + 2 * half + 1;
            let capacity = (band_w * band_h) / per_core + 1;
            if self.core_zone_count as u64 > capacity {
                return Err(ConfigError::Invalid(format!(
                    "{} core zones cannot be spaced on a {}x{} grid",
                    self.core_zone_count, self.grid_width, self.grid_height
                )));
            }
        }
        Ok(())
    }

    /// Total tile count.
    pub fn tile_count(&self) -> usize {
        self.grid_width as usize * self.grid_height as usize
    }
}

/// Network and process settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Bind address.
    pub bind_addr: SocketAddr,
    /// Maximum concurrent connections.
    pub max_connections: usize,
    /// Outbound queue depth per client; full queues drop messages.
    pub client_queue_depth: usize,
    /// Period of the stats broadcast.
    pub stats_interval: Duration,
    /// Period of the rate-limiter cleanup.
    pub cleanup_interval: Duration,
    /// Period of the recovery snapshot.
    pub snapshot_interval: Duration,
    /// Upper bound on the shutdown flush.
    pub shutdown_flush_timeout: Duration,
    /// Directory for the file-backed store. `None` keeps everything in memory.
    pub data_dir: Option<PathBuf>,
    /// Seed for core-zone layouts. `None` derives one from the boot time.
    pub grid_seed: Option<u64>,
    /// Server version string.
    #[serde(skip)]
    pub version: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 8080)),
            max_connections: 1000,
            client_queue_depth: 256,
            stats_interval: Duration::from_secs(5),
            cleanup_interval: Duration::from_secs(30),
            snapshot_interval: Duration::from_secs(30),
            shutdown_flush_timeout: Duration::from_secs(5),
            data_dir: None,
            grid_seed: None,
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

/// Complete configuration document.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Gameplay tuning.
    pub game: GameConfig,
    /// Process settings.
    pub server: ServerConfig,
}

impl Config {
    /// Load a JSON configuration file, then apply environment overrides.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Io`] or [`ConfigError::Json`] if the file
    /// cannot be read or parsed, and [`ConfigError::InvalidEnv`] for bad
    /// overrides.
    pub fn from_json_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        let mut config: Self = serde_json::from_str(&contents)?;
        config.server.version = env!("CARGO_PKG_VERSION").to_string();
        config.apply_env(|var| std::env::var(var).ok())?;
        Ok(config)
    }

    /// Defaults with environment overrides applied.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidEnv`] for unparseable values.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();
        config.apply_env(|var| std::env::var(var).ok())?;
        Ok(config)
    }

    /// Apply overrides from a variable lookup.
    ///
    /// Takes the lookup as a closure so tests need not touch the process
    /// environment.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidEnv`] for unparseable values.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let game = &mut self.game;
        override_parse(&lookup, "NEON_GRID_WIDTH", &mut game.grid_width)?;
        override_parse(&lookup, "NEON_GRID_HEIGHT", &mut game.grid_height)?;
        override_parse(&lookup, "NEON_GRID_COOLDOWN_MS", &mut game.capture_cooldown_ms)?;
        override_parse(&lookup, "NEON_GRID_ENERGY_MAX", &mut game.energy_max)?;
        override_parse(&lookup, "NEON_GRID_CAPTURE_COST", &mut game.capture_cost)?;
        override_parse(&lookup, "NEON_GRID_ENERGY_REGEN", &mut game.energy_regen_per_sec)?;
        override_parse(&lookup, "NEON_GRID_RATE_MAX", &mut game.rate_limit_max_requests)?;
        override_parse(&lookup, "NEON_GRID_RATE_WINDOW_MS", &mut game.rate_limit_window_ms)?;
        override_parse(&lookup, "NEON_GRID_ROUND_MS", &mut game.round_duration_ms)?;
        override_parse(&lookup, "NEON_GRID_INTERMISSION_MS", &mut game.round_intermission_ms)?;
        override_parse(&lookup, "NEON_GRID_CORE_ZONES", &mut game.core_zone_count)?;

        let server = &mut self.server;
        override_parse(&lookup, "NEON_GRID_BIND", &mut server.bind_addr)?;
        override_parse(&lookup, "NEON_GRID_MAX_CONNECTIONS", &mut server.max_connections)?;
        if let Some(dir) = lookup("NEON_GRID_DATA_DIR") {
            server.data_dir = if dir.is_empty() { None } else { Some(PathBuf::from(dir)) };
        }
        if let Some(raw) = lookup("NEON_GRID_SEED") {
            let seed = raw.parse().map_err(|_| ConfigError::InvalidEnv {
                var: "NEON_GRID_SEED".into(),
                value: raw.clone(),
            })?;
            server.grid_seed = Some(seed);
        }
        Ok(())
    }
}

fn override_parse<F, T>(lookup: &F, var: &str, slot: &mut T) -> Result<(), ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
{
    if let Some(raw) = lookup(var) {
        *slot = raw.trim().parse().map_err(|_| ConfigError::InvalidEnv {
            var: var.to_string(),
            value: raw.clone(),
        })?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    #[test]
    fn test_defaults_are_valid() {
        let config = GameConfig::default();
        assert_eq!(config.grid_width, 100);
        assert_eq!(config.capture_cooldown_ms, 5_000);
        assert_eq!(config.capture_cost, 5);
        assert_eq!(config.round_intermission_ms, 10_000);
        config.validate().unwrap();
    }

    #[test]
    fn test_server_config_default() {
        let config = ServerConfig::default();
        assert_eq!(config.max_connections, 1000);
        assert!(config.data_dir.is_none());
        assert!(!config.version.is_empty());
    }

    #[test]
    fn test_validate_rejects_cost_above_max() {
        let config = GameConfig {
            capture_cost: 150,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_validate_rejects_crowded_core_zones() {
        let config = GameConfig {
            grid_width: 12,
            grid_height: 12,
            core_zone_count: 50,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_env_overrides() {
        let vars: BTreeMap<&str, &str> = [
            ("NEON_GRID_WIDTH", "64"),
            ("NEON_GRID_COOLDOWN_MS", "2500"),
            ("NEON_GRID_BIND", "127.0.0.1:9000"),
            ("NEON_GRID_SEED", "99"),
        ]
        .into_iter()
        .collect();

        let mut config = Config::default();
        config
            .apply_env(|var| vars.get(var).map(|v| v.to_string()))
            .unwrap();

        assert_eq!(config.game.grid_width, 64);
        assert_eq!(config.game.grid_height, 100);
        assert_eq!(config.game.capture_cooldown_ms, 2500);
        assert_eq!(config.server.bind_addr.port(), 9000);
        assert_eq!(config.server.grid_seed, Some(99));
    }

    #[test]
    fn test_env_override_rejects_garbage() {
        let mut config = Config::default();
        let result = config.apply_env(|var| {
            (var == "NEON_GRID_ENERGY_MAX").then(|| "lots".to_string())
        });
        assert!(matches!(result, Err(ConfigError::InvalidEnv { .. })));
    }

    #[test]
    fn test_from_json_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("neon.json");
        std::fs::write(&path, r#"{ "game": { "grid_width": 40, "grid_height": 30 } }"#).unwrap();

        let config = Config::from_json_file(&path).unwrap();
        assert_eq!(config.game.grid_width, 40);
        assert_eq!(config.game.grid_height, 30);
        // Unspecified fields keep their defaults
        assert_eq!(config.game.capture_cost, 5);
    }
}
