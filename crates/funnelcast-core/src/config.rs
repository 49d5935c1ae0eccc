//! Funnelcast configuration system.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{FunnelcastError, Result};

/// Root configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FunnelcastConfig {
    /// Telegram bot token. Overridable via FUNNELCAST_BOT_TOKEN.
    #[serde(default)]
    pub bot_token: String,
    /// Channel the subscription gate checks membership against
    /// (numeric id like "-1001234567890" or "@channelname").
    #[serde(default)]
    pub gate_channel: Option<String>,
    /// SQLite database path.
    #[serde(default = "default_db_path")]
    pub db_path: String,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
}

fn default_db_path() -> String {
    "~/.funnelcast/funnelcast.db".into()
}

impl Default for FunnelcastConfig {
    fn default() -> Self {
        Self {
            bot_token: String::new(),
            gate_channel: None,
            db_path: default_db_path(),
            scheduler: SchedulerConfig::default(),
        }
    }
}

impl FunnelcastConfig {
    /// Load config from the default path (~/.funnelcast/config.toml),
    /// then apply env overrides.
    pub fn load() -> Result<Self> {
        let path = Self::default_path();
        let mut config = if path.exists() {
            Self::load_from(&path)?
        } else {
            Self::default()
        };
        config.apply_env();
        Ok(config)
    }

    /// Load config from a specific path (no env overrides).
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| FunnelcastError::Config(format!("Failed to read config: {e}")))?;
        let config: Self = toml::from_str(&content)
            .map_err(|e| FunnelcastError::Config(format!("Failed to parse config: {e}")))?;
        Ok(config)
    }

    /// Save config to the default path.
    pub fn save(&self) -> Result<()> {
        let path = Self::default_path();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)
            .map_err(|e| FunnelcastError::Config(format!("Failed to serialize config: {e}")))?;
        std::fs::write(&path, content)?;
        Ok(())
    }

    /// FUNNELCAST_BOT_TOKEN wins over the file so tokens can stay out of it.
    pub fn apply_env(&mut self) {
        if let Ok(token) = std::env::var("FUNNELCAST_BOT_TOKEN")
            && !token.is_empty()
        {
            self.bot_token = token;
        }
    }

    /// Get the default config path.
    pub fn default_path() -> PathBuf {
        Self::home_dir().join("config.toml")
    }

    /// Get the Funnelcast home directory.
    pub fn home_dir() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".funnelcast")
    }
}

/// Scheduler loop tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Seconds between scheduler ticks.
    #[serde(default = "default_tick_secs")]
    pub tick_secs: u64,
    /// Milliseconds slept between individual broadcast sends.
    #[serde(default = "default_pacing_ms")]
    pub pacing_ms: u64,
    /// Per-recipient send timeout in seconds; expiry counts as that
    /// recipient failing, never as a process fault.
    #[serde(default = "default_send_timeout_secs")]
    pub send_timeout_secs: u64,
}

fn default_tick_secs() -> u64 {
    60
}
fn default_pacing_ms() -> u64 {
    100
}
fn default_send_timeout_secs() -> u64 {
    30
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tick_secs: default_tick_secs(),
            pacing_ms: default_pacing_ms(),
            send_timeout_secs: default_send_timeout_secs(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = FunnelcastConfig::default();
        assert_eq!(config.scheduler.tick_secs, 60);
        assert_eq!(config.scheduler.pacing_ms, 100);
        assert!(config.bot_token.is_empty());
    }

    #[test]
    fn test_parse_partial_toml() {
        let config: FunnelcastConfig = toml::from_str(
            r#"
            bot_token = "123:abc"
            gate_channel = "@mychannel"

            [scheduler]
            tick_secs = 30
            "#,
        )
        .unwrap();
        assert_eq!(config.bot_token, "123:abc");
        assert_eq!(config.gate_channel.as_deref(), Some("@mychannel"));
        assert_eq!(config.scheduler.tick_secs, 30);
        // Unspecified fields fall back to defaults
        assert_eq!(config.scheduler.pacing_ms, 100);
    }
}
