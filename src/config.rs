//! Crate-wide configuration: thresholds, timeouts, feature flags, and
//! the agent/audit namespace options the coordinator and orchestrator
//! read. Loaded from TOML; validated at construction so a bad config
//! fails at startup rather than mid-pipeline.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Thresholds {
    pub block_score: f32,
    pub flag_score: f32,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            block_score: 0.9,
            flag_score: 0.7,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Timeouts {
    pub fast_path_ms: f32,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self { fast_path_ms: 20.0 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Features {
    pub enable_learning: bool,
    pub enable_audit: bool,
    pub fail_open_detection: bool,
}

impl Default for Features {
    fn default() -> Self {
        Self {
            enable_learning: true,
            enable_audit: true,
            fail_open_detection: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DefenceConfig {
    pub thresholds: Thresholds,
    pub timeouts: Timeouts,
    pub features: Features,
    pub max_agents: usize,
    pub audit_namespace: String,
    pub ledger_namespace: String,
    pub enable_ledger: bool,
}

impl Default for DefenceConfig {
    fn default() -> Self {
        Self {
            thresholds: Thresholds::default(),
            timeouts: Timeouts::default(),
            features: Features::default(),
            max_agents: 10,
            audit_namespace: "swarm_audit".to_string(),
            ledger_namespace: "decision_ledger".to_string(),
            enable_ledger: true,
        }
    }
}

impl DefenceConfig {
    pub fn from_toml_str(s: &str) -> Result<Self> {
        let config: DefenceConfig = toml::from_str(s).map_err(|e| Error::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_toml_file(path: impl AsRef<std::path::Path>) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_toml_str(&contents)
    }

    pub fn validate(&self) -> Result<()> {
        if self.thresholds.flag_score >= self.thresholds.block_score {
            return Err(Error::Config(format!(
                "flag_score ({}) must be lower than block_score ({})",
                self.thresholds.flag_score, self.thresholds.block_score
            )));
        }
        if !(0.0..=1.0).contains(&self.thresholds.block_score) || !(0.0..=1.0).contains(&self.thresholds.flag_score) {
            return Err(Error::Config("thresholds must be in [0.0, 1.0]".to_string()));
        }
        if self.max_agents == 0 {
            return Err(Error::Config("max_agents must be >= 1".to_string()));
        }
        if self.timeouts.fast_path_ms <= 0.0 {
            return Err(Error::Config("fast_path_ms must be positive".to_string()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        assert!(DefenceConfig::default().validate().is_ok());
    }

    #[test]
    fn test_rejects_flag_score_above_block_score() {
        let mut config = DefenceConfig::default();
        config.thresholds.flag_score = 0.95;
        config.thresholds.block_score = 0.9;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_parses_partial_toml_with_defaults() {
        let toml_str = r#"
            [thresholds]
            block_score = 0.85
        "#;
        let config = DefenceConfig::from_toml_str(toml_str).unwrap();
        assert_eq!(config.thresholds.block_score, 0.85);
        assert_eq!(config.thresholds.flag_score, 0.7);
        assert_eq!(config.max_agents, 10);
    }

    #[test]
    fn test_rejects_zero_max_agents() {
        let mut config = DefenceConfig::default();
        config.max_agents = 0;
        assert!(config.validate().is_err());
    }
}
