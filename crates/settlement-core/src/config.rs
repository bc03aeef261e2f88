//! Scoring configuration passed explicitly into every settlement stage.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{SettlementError, SettlementResult};

/// Score constants and limits for round settlement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoringConfig {
    /// Reward shared by a target's successful attackers, and the penalty the
    /// victim pays per attack event.
    pub attack_score: f64,
    /// Penalty per availability failure; the same amount funds the
    /// challenge's bonus pool.
    pub check_down_score: f64,
    /// Upper bound on one round's settlement.
    pub settle_timeout_ms: u64,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            attack_score: 50.0,
            check_down_score: 50.0,
            settle_timeout_ms: 30_000,
        }
    }
}

impl ScoringConfig {
    pub fn new(attack_score: f64, check_down_score: f64) -> Self {
        Self {
            attack_score,
            check_down_score,
            ..Self::default()
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.settle_timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn settle_timeout(&self) -> Duration {
        Duration::from_millis(self.settle_timeout_ms)
    }

    /// Build from environment variables, falling back to defaults.
    ///
    /// Reads:
    /// - SCOREBOARD_ATTACK_SCORE
    /// - SCOREBOARD_CHECKDOWN_SCORE
    /// - SCOREBOARD_SETTLE_TIMEOUT_MS
    pub fn from_env() -> SettlementResult<Self> {
        let mut config = Self::default();
        if let Some(v) = env_parse::<f64>("SCOREBOARD_ATTACK_SCORE")? {
            config.attack_score = v;
        }
        if let Some(v) = env_parse::<f64>("SCOREBOARD_CHECKDOWN_SCORE")? {
            config.check_down_score = v;
        }
        if let Some(v) = env_parse::<u64>("SCOREBOARD_SETTLE_TIMEOUT_MS")? {
            config.settle_timeout_ms = v;
        }
        config.validate()?;
        Ok(config)
    }

    /// Constants must be finite and non-negative; the timeout must be non-zero.
    pub fn validate(&self) -> SettlementResult<()> {
        for (name, value) in [
            ("attack_score", self.attack_score),
            ("check_down_score", self.check_down_score),
        ] {
            if !value.is_finite() || value < 0.0 {
                return Err(SettlementError::InvalidConfig(format!(
                    "{name} must be a finite non-negative number, got {value}"
                )));
            }
        }
        if self.settle_timeout_ms == 0 {
            return Err(SettlementError::InvalidConfig(
                "settle_timeout_ms must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> SettlementResult<Option<T>>
where
    T::Err: std::fmt::Display,
{
    match std::env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|e| SettlementError::InvalidConfig(format!("{key}={raw}: {e}"))),
        Err(_) => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let cfg = ScoringConfig::default();
        assert!(cfg.validate().is_ok());
        assert_eq!(cfg.settle_timeout(), Duration::from_secs(30));
    }

    #[test]
    fn test_negative_constant_rejected() {
        let cfg = ScoringConfig::new(-1.0, 20.0);
        assert!(matches!(
            cfg.validate(),
            Err(SettlementError::InvalidConfig(msg)) if msg.contains("attack_score")
        ));
    }

    #[test]
    fn test_nan_constant_rejected() {
        let cfg = ScoringConfig::new(100.0, f64::NAN);
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_zero_timeout_rejected() {
        let cfg = ScoringConfig::new(100.0, 20.0).with_timeout(Duration::ZERO);
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let cfg: ScoringConfig = toml::from_str("attack_score = 100.0").unwrap();
        assert_eq!(cfg.attack_score, 100.0);
        assert_eq!(cfg.check_down_score, 50.0);
        assert_eq!(cfg.settle_timeout_ms, 30_000);
    }
}
