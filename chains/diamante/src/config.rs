//! Configuration loader for the Diamante campaign bot
//!
//! The tunables live in `config.json` with camelCase keys. Missing keys take
//! their defaults and a missing file is created on first load. The only way
//! to change the config is [`DailyConfig::save`].

use anyhow::{Context, Result};
use core_logic::ConfigError;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;
use tracing::{info, warn};

use crate::classifier::ClassifierRules;

/// Process-wide tunables for the daily cycle and the referral job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DailyConfig {
    /// Transfers per cycle
    pub send_diam_repetitions: u32,
    /// Inclusive lower bound of a transfer amount
    pub min_send_amount: f64,
    /// Exclusive upper bound of a transfer amount
    pub max_send_amount: f64,
    pub cycle_delay_hours: f64,
    pub cycle_jitter_min: f64,
    pub cycle_jitter_max: f64,
    pub referral_code: String,
    pub referral_count: u32,
    /// Seconds between referral items
    pub reff_delay_min: u64,
    pub reff_delay_max: u64,
    /// Substring rules mapping remote messages to outcome kinds
    pub classifier_rules: ClassifierRules,
}

impl Default for DailyConfig {
    fn default() -> Self {
        Self {
            send_diam_repetitions: 1,
            min_send_amount: 1.0,
            max_send_amount: 10.0,
            cycle_delay_hours: 24.0,
            cycle_jitter_min: 2.0,
            cycle_jitter_max: 5.0,
            referral_code: String::new(),
            referral_count: 1,
            reff_delay_min: 60,
            reff_delay_max: 120,
            classifier_rules: ClassifierRules::default(),
        }
    }
}

impl DailyConfig {
    /// Loads `path`, creating it with defaults when absent.
    pub fn load_or_create(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            let config = Self::default();
            config.save(path)?;
            info!("Created default config at {}", path.display());
            return Ok(config);
        }

        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config from {}", path.display()))?;
        let config: Self = serde_json::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.display().to_string(),
            msg: e.to_string(),
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        self.validate()?;
        let json = serde_json::to_string_pretty(self).context("Failed to serialize config")?;
        fs::write(path, json)
            .map_err(|e| ConfigError::IoError {
                path: path.display().to_string(),
                msg: e.to_string(),
            })
            .map_err(Into::into)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.min_send_amount.is_nan() || self.min_send_amount <= 0.0 {
            return Err(ConfigError::InvalidValue {
                field: "minSendAmount".to_string(),
                reason: "must be positive".to_string(),
            });
        }
        if self.max_send_amount < self.min_send_amount {
            return Err(ConfigError::InvalidValue {
                field: "maxSendAmount".to_string(),
                reason: format!("must be >= minSendAmount ({})", self.min_send_amount),
            });
        }
        if self.cycle_jitter_min < 0.0 || self.cycle_jitter_max < self.cycle_jitter_min {
            return Err(ConfigError::InvalidValue {
                field: "cycleJitterMax".to_string(),
                reason: "jitter bounds must satisfy 0 <= min <= max".to_string(),
            });
        }
        if self.reff_delay_max < self.reff_delay_min {
            return Err(ConfigError::InvalidValue {
                field: "reffDelayMax".to_string(),
                reason: "must be >= reffDelayMin".to_string(),
            });
        }
        if self.cycle_delay_hours <= 0.0 {
            warn!("cycleDelayHours <= 0, cycles will run back to back");
        }
        Ok(())
    }

    pub fn cycle_duration(&self) -> Duration {
        Duration::from_secs_f64(self.cycle_delay_hours.max(0.0) * 3600.0)
    }

    pub fn jitter_bounds(&self) -> (Duration, Duration) {
        (
            Duration::from_secs_f64(self.cycle_jitter_min.max(0.0) * 3600.0),
            Duration::from_secs_f64(self.cycle_jitter_max.max(0.0) * 3600.0),
        )
    }

    pub fn referral_delay_bounds(&self) -> (Duration, Duration) {
        (
            Duration::from_secs(self.reff_delay_min),
            Duration::from_secs(self.reff_delay_max),
        )
    }

    /// Random transfer amount in `[min, max)`, rounded to 4 decimals.
    pub fn random_send_amount(&self) -> f64 {
        let (min, max) = (self.min_send_amount, self.max_send_amount);
        let raw = if max > min {
            rand::thread_rng().gen_range(min..max)
        } else {
            min
        };
        round_amount(raw, min, max)
    }
}

/// Rounds to 4 decimals without letting rounding reach the exclusive bound.
pub fn round_amount(raw: f64, min: f64, max: f64) -> f64 {
    let mut amount = (raw * 10_000.0).round() / 10_000.0;
    if amount >= max {
        amount = ((max * 10_000.0).ceil() - 1.0) / 10_000.0;
    }
    if amount < min {
        amount = (min * 10_000.0).ceil() / 10_000.0;
    }
    amount
}

#[cfg(test)]
mod tests {
    use super::*;

    fn has_at_most_4_decimals(x: f64) -> bool {
        let scaled = x * 10_000.0;
        (scaled - scaled.round()).abs() < 1e-6
    }

    #[test]
    fn test_amount_within_bounds() {
        let config = DailyConfig {
            min_send_amount: 1.0,
            max_send_amount: 10.0,
            ..Default::default()
        };
        for _ in 0..10_000 {
            let amount = config.random_send_amount();
            assert!(amount >= 1.0 && amount < 10.0, "amount {}", amount);
            assert!(has_at_most_4_decimals(amount));
        }
    }

    #[test]
    fn test_rounding_never_reaches_max() {
        assert_eq!(round_amount(9.99996, 1.0, 10.0), 9.9999);
        assert_eq!(round_amount(1.23456, 1.0, 10.0), 1.2346);
        assert_eq!(round_amount(0.99999, 1.0, 10.0), 1.0);
    }

    #[test]
    fn test_partial_json_takes_defaults() {
        let config: DailyConfig =
            serde_json::from_str(r#"{"sendDiamRepetitions": 3, "referralCode": "ABC"}"#).unwrap();
        assert_eq!(config.send_diam_repetitions, 3);
        assert_eq!(config.referral_code, "ABC");
        assert_eq!(config.max_send_amount, 10.0);
        assert_eq!(config.reff_delay_max, 120);
    }

    #[test]
    fn test_load_creates_and_save_persists() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");

        let mut config = DailyConfig::load_or_create(&path).unwrap();
        assert!(path.exists());
        assert_eq!(config, DailyConfig::default());

        config.send_diam_repetitions = 4;
        config.save(&path).unwrap();

        let raw = fs::read_to_string(&path).unwrap();
        assert!(raw.contains("\"sendDiamRepetitions\": 4"));
        assert_eq!(DailyConfig::load_or_create(&path).unwrap().send_diam_repetitions, 4);
    }

    #[test]
    fn test_invalid_bounds_rejected() {
        let config = DailyConfig {
            min_send_amount: 5.0,
            max_send_amount: 2.0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }
}
