use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::risk::RiskThresholds;

/// What ingestion does with a churn risk score outside [0, 1].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum ScorePolicy {
    /// Clamp into range and log a warning; the row is kept.
    #[default]
    Clamp,
    /// Skip the row and report it as out of range.
    Reject,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalyticsConfig {
    pub risk: RiskThresholds,
    pub score_policy: ScorePolicy,
    pub top_n: usize,
    pub high_service_calls: u32,
}

impl Default for AnalyticsConfig {
    fn default() -> Self {
        Self {
            risk: RiskThresholds::default(),
            score_policy: ScorePolicy::Clamp,
            top_n: 20,
            high_service_calls: 4,
        }
    }
}

impl AnalyticsConfig {
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        let config: AnalyticsConfig = serde_json::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.risk.validate()?;
        if self.top_n == 0 {
            return Err(ConfigError::InvalidTopN);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn defaults_match_dashboard() {
        let config = AnalyticsConfig::default();
        assert_eq!(config.risk.high_threshold, 0.5);
        assert_eq!(config.risk.medium_threshold, 0.2);
        assert_eq!(config.score_policy, ScorePolicy::Clamp);
        assert_eq!(config.top_n, 20);
        assert_eq!(config.high_service_calls, 4);
    }

    #[test]
    fn partial_file_keeps_remaining_defaults() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"{{"score_policy": "reject", "risk": {{"high_threshold": 0.7}}}}"#
        )
        .unwrap();

        let config = AnalyticsConfig::from_file(file.path()).unwrap();
        assert_eq!(config.score_policy, ScorePolicy::Reject);
        assert_eq!(config.risk.high_threshold, 0.7);
        assert_eq!(config.risk.medium_threshold, 0.2);
        assert_eq!(config.top_n, 20);
    }

    #[test]
    fn rejects_inverted_thresholds() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"{{"risk": {{"high_threshold": 0.3, "medium_threshold": 0.4}}}}"#
        )
        .unwrap();

        let err = AnalyticsConfig::from_file(file.path()).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidThresholds { .. }));
    }

    #[test]
    fn rejects_zero_top_n() {
        let config = AnalyticsConfig {
            top_n: 0,
            ..AnalyticsConfig::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::InvalidTopN)));
    }
}
