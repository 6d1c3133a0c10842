use std::path::Path;

use anyhow::Context;
use serde::{Deserialize, Serialize};

pub const DEFAULT_LOG_FILTER: &str = "wellbeing_risk=info";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EngineConfig {
    /// Trailing observations averaged into the mood/anxiety trends.
    pub trend_window: usize,
    /// Days ahead the mood forecaster targets.
    pub forecast_horizon_days: i64,
    pub test_fraction: f64,
    pub cv_folds: usize,
    pub seed: u64,
    pub forest: ForestParams,
    pub boosting: BoostingParams,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            trend_window: 7,
            forecast_horizon_days: 7,
            test_fraction: 0.2,
            cv_folds: 5,
            seed: 42,
            forest: ForestParams::default(),
            boosting: BoostingParams::default(),
        }
    }
}

impl EngineConfig {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config {}", path.display()))?;
        let config: EngineConfig = serde_json::from_str(&raw)
            .with_context(|| format!("invalid config in {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.trend_window == 0 {
            anyhow::bail!("trend_window must be at least 1");
        }
        if self.forecast_horizon_days < 1 {
            anyhow::bail!("forecast_horizon_days must be at least 1");
        }
        if !(self.test_fraction > 0.0 && self.test_fraction < 1.0) {
            anyhow::bail!("test_fraction must lie strictly between 0 and 1");
        }
        if self.cv_folds < 2 {
            anyhow::bail!("cv_folds must be at least 2");
        }
        if self.forest.n_estimators == 0 || self.boosting.n_estimators == 0 {
            anyhow::bail!("n_estimators must be at least 1");
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TreeParams {
    pub max_depth: usize,
    pub min_samples_split: usize,
    pub min_samples_leaf: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ForestParams {
    pub n_estimators: usize,
    pub max_depth: usize,
    pub min_samples_split: usize,
    pub min_samples_leaf: usize,
}

impl Default for ForestParams {
    fn default() -> Self {
        Self {
            n_estimators: 200,
            max_depth: 10,
            min_samples_split: 5,
            min_samples_leaf: 2,
        }
    }
}

impl ForestParams {
    pub fn tree(&self) -> TreeParams {
        TreeParams {
            max_depth: self.max_depth,
            min_samples_split: self.min_samples_split,
            min_samples_leaf: self.min_samples_leaf,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BoostingParams {
    pub n_estimators: usize,
    pub learning_rate: f64,
    pub max_depth: usize,
    pub min_samples_split: usize,
    pub min_samples_leaf: usize,
}

impl Default for BoostingParams {
    fn default() -> Self {
        Self {
            n_estimators: 200,
            learning_rate: 0.1,
            max_depth: 6,
            min_samples_split: 5,
            min_samples_leaf: 2,
        }
    }
}

impl BoostingParams {
    pub fn tree(&self) -> TreeParams {
        TreeParams {
            max_depth: self.max_depth,
            min_samples_split: self.min_samples_split,
            min_samples_leaf: self.min_samples_leaf,
        }
    }
}

impl Default for TreeParams {
    fn default() -> Self {
        ForestParams::default().tree()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_config_falls_back_to_defaults() {
        let config: EngineConfig =
            serde_json::from_str(r#"{"seed": 7, "forest": {"n_estimators": 25}}"#).unwrap();
        assert_eq!(config.seed, 7);
        assert_eq!(config.forest.n_estimators, 25);
        assert_eq!(config.forest.max_depth, 10);
        assert_eq!(config.trend_window, 7);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn unknown_keys_are_rejected() {
        let parsed = serde_json::from_str::<EngineConfig>(r#"{"trend_windw": 5}"#);
        assert!(parsed.is_err());
    }

    #[test]
    fn rejects_degenerate_split() {
        let config = EngineConfig {
            test_fraction: 1.0,
            ..EngineConfig::default()
        };
        assert!(config.validate().is_err());
    }
}
