//! # Configuration Management Module
//!
//! Centralized, type-safe configuration for the ledger engine, loaded from TOML.
//!
//! ## Configuration Structure
//!
//! - [`LedgerConfig`] - where the sled store lives and how hard transactions retry
//! - [`EconomyConfig`] - discounts, multipliers and power-up magnitudes
//! - [`QuestConfig`] - monthly class goal shaping
//! - [`FamiliarConfig`] - companion hatch/evolve thresholds
//! - [`TriggerConfig`] - post-commit trigger pacing
//! - [`LoggingConfig`] - logging and debugging settings
//! - [`HeroClassConfig`] - per hero class gold bonuses
//!
//! ## Usage
//!
//! ```rust,no_run
//! use starledger::config::Config;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load("starledger.toml").await?;
//!     println!("Data dir: {}", config.ledger.data_dir);
//!     Config::create_default("starledger.toml").await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Configuration File Format
//!
//! ```toml
//! [ledger]
//! data_dir = "data/ledger"
//! max_transaction_retries = 5
//!
//! [economy]
//! hero_discount_percent = 25
//!
//! [hero_classes.merchant]
//! favoured_reason = "teamwork"
//! bonus_gold = 1
//! ```

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tokio::fs;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub ledger: LedgerConfig,
    #[serde(default)]
    pub economy: EconomyConfig,
    #[serde(default)]
    pub quest: QuestConfig,
    #[serde(default)]
    pub familiar: FamiliarConfig,
    #[serde(default)]
    pub triggers: TriggerConfig,
    pub logging: LoggingConfig,
    /// Hero class name -> gold bonus rule
    #[serde(default)]
    pub hero_classes: HashMap<String, HeroClassConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerConfig {
    pub data_dir: String,
    /// Optimistic attempts before a transaction surfaces as a retryable conflict.
    #[serde(default = "default_max_transaction_retries")]
    pub max_transaction_retries: u32,
}

fn default_max_transaction_retries() -> u32 {
    5
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EconomyConfig {
    /// Reigning hero discount on seasonal items.
    pub hero_discount_percent: u32,
    /// Gold multiplier applied once by the gilded effect.
    pub gilded_multiplier: i64,
    /// Percent chance that an active luck day grants +1 star.
    pub luck_chance_percent: u32,
    /// Stars granted by the bounty scroll power-up.
    pub bounty_scroll_stars: i64,
    /// Minutes added to a timer bounty by the hourglass power-up.
    pub hourglass_extension_minutes: i64,
}

impl Default for EconomyConfig {
    fn default() -> Self {
        Self {
            hero_discount_percent: 25,
            gilded_multiplier: 3,
            luck_chance_percent: 20,
            bounty_scroll_stars: 10,
            hourglass_extension_minutes: 10,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuestConfig {
    /// Monthly stars expected from each student at difficulty 0.
    pub base_goal_per_student: i64,
    /// Additional stars per student for each completed difficulty level.
    pub goal_step_per_level: i64,
    /// Lower bound for the holiday/cancellation discount.
    pub min_month_modifier: f64,
}

impl Default for QuestConfig {
    fn default() -> Self {
        Self {
            base_goal_per_student: 15,
            goal_step_per_level: 3,
            min_month_modifier: 0.5,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FamiliarConfig {
    /// Stars since purchase needed to hatch.
    pub hatch_stars: i64,
    /// Stars since hatching needed for level 2.
    pub level2_stars: i64,
    /// Stars since hatching needed for level 3.
    pub level3_stars: i64,
}

impl Default for FamiliarConfig {
    fn default() -> Self {
        Self {
            hatch_stars: 20,
            level2_stars: 60,
            level3_stars: 140,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TriggerConfig {
    /// Window over which milestone checks for the same class are coalesced.
    pub milestone_debounce_ms: u64,
}

impl Default for TriggerConfig {
    fn default() -> Self {
        Self {
            milestone_debounce_ms: 1500,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
    pub file: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct HeroClassConfig {
    /// Awards for this reason earn the bonus.
    pub favoured_reason: String,
    pub bonus_gold: i64,
}

impl Config {
    /// Load configuration from a file
    pub async fn load(path: &str) -> Result<Self> {
        let content = fs::read_to_string(path)
            .await
            .map_err(|e| anyhow!("Failed to read config file {}: {}", path, e))?;

        let config: Config = toml::from_str(&content)
            .map_err(|e| anyhow!("Failed to parse config file {}: {}", path, e))?;
        config.validate()?;
        Ok(config)
    }

    /// Write a default configuration to `path`
    pub async fn create_default(path: &str) -> Result<()> {
        let config = Config::default();
        let content = toml::to_string_pretty(&config)
            .map_err(|e| anyhow!("Failed to serialize default config: {}", e))?;
        fs::write(path, content)
            .await
            .map_err(|e| anyhow!("Failed to write config file {}: {}", path, e))?;
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.ledger.data_dir.trim().is_empty() {
            return Err(anyhow!("ledger.data_dir must not be empty"));
        }
        if self.ledger.max_transaction_retries == 0 {
            return Err(anyhow!("ledger.max_transaction_retries must be at least 1"));
        }
        if self.economy.hero_discount_percent > 100 {
            return Err(anyhow!("economy.hero_discount_percent must be <= 100"));
        }
        if self.economy.luck_chance_percent > 100 {
            return Err(anyhow!("economy.luck_chance_percent must be <= 100"));
        }
        if !(0.0..=1.0).contains(&self.quest.min_month_modifier) {
            return Err(anyhow!("quest.min_month_modifier must be within 0..=1"));
        }
        let f = &self.familiar;
        if !(0 < f.hatch_stars && 0 < f.level2_stars && f.level2_stars < f.level3_stars) {
            return Err(anyhow!(
                "familiar thresholds must be positive and level2 < level3"
            ));
        }
        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        let mut hero_classes = HashMap::new();
        hero_classes.insert(
            "merchant".to_string(),
            HeroClassConfig {
                favoured_reason: "teamwork".to_string(),
                bonus_gold: 1,
            },
        );
        hero_classes.insert(
            "scholar".to_string(),
            HeroClassConfig {
                favoured_reason: "homework".to_string(),
                bonus_gold: 1,
            },
        );
        Config {
            ledger: LedgerConfig {
                data_dir: "data/ledger".to_string(),
                max_transaction_retries: default_max_transaction_retries(),
            },
            economy: EconomyConfig::default(),
            quest: QuestConfig::default(),
            familiar: FamiliarConfig::default(),
            triggers: TriggerConfig::default(),
            logging: LoggingConfig {
                level: "info".to_string(),
                file: Some("starledger.log".to_string()),
            },
            hero_classes,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.economy.hero_discount_percent, 25);
        assert_eq!(config.familiar.level3_stars, 140);
    }

    #[test]
    fn default_config_round_trips_through_toml() {
        let text = toml::to_string_pretty(&Config::default()).unwrap();
        let parsed: Config = toml::from_str(&text).unwrap();
        assert_eq!(parsed.ledger.data_dir, "data/ledger");
        assert_eq!(parsed.hero_classes.len(), 2);
    }

    #[test]
    fn minimal_file_fills_in_defaults() {
        let text = r#"
            [ledger]
            data_dir = "/tmp/x"

            [logging]
            level = "debug"
        "#;
        let parsed: Config = toml::from_str(text).unwrap();
        assert_eq!(parsed.ledger.max_transaction_retries, 5);
        assert_eq!(parsed.triggers.milestone_debounce_ms, 1500);
        assert!(parsed.hero_classes.is_empty());
    }

    #[test]
    fn rejects_inverted_familiar_thresholds() {
        let mut config = Config::default();
        config.familiar.level2_stars = 200;
        assert!(config.validate().is_err());
    }

    #[tokio::test]
    async fn create_default_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("starledger.toml");
        let path = path.to_str().unwrap();
        Config::create_default(path).await.unwrap();
        let loaded = Config::load(path).await.unwrap();
        assert_eq!(loaded.economy.gilded_multiplier, 3);
    }
}
