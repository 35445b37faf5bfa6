use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::ConfigError;
use crate::models::{CustomerRecord, RiskCategory};

/// Score boundaries separating the risk categories.
///
/// The 0.5 / 0.2 defaults reproduce the dashboard's "High Risk" bucket; they
/// are not calibrated against the upstream model.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RiskThresholds {
    pub high_threshold: f64,
    pub medium_threshold: f64,
}

impl Default for RiskThresholds {
    fn default() -> Self {
        Self {
            high_threshold: 0.5,
            medium_threshold: 0.2,
        }
    }
}

impl RiskThresholds {
    pub fn new(high_threshold: f64, medium_threshold: f64) -> Result<Self, ConfigError> {
        let thresholds = Self {
            high_threshold,
            medium_threshold,
        };
        thresholds.validate()?;
        Ok(thresholds)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let valid = self.medium_threshold >= 0.0
            && self.medium_threshold < self.high_threshold
            && self.high_threshold <= 1.0;
        if valid {
            Ok(())
        } else {
            Err(ConfigError::InvalidThresholds {
                high: self.high_threshold,
                medium: self.medium_threshold,
            })
        }
    }

    pub fn classify(&self, score: f64) -> RiskCategory {
        if score >= self.high_threshold {
            RiskCategory::High
        } else if score >= self.medium_threshold {
            RiskCategory::Medium
        } else {
            RiskCategory::Low
        }
    }

    /// Lazily pairs every record with its category, in input order.
    pub fn classify_all<'a, I>(&self, records: I) -> impl Iterator<Item = ClassifiedRecord<'a>>
    where
        I: IntoIterator<Item = &'a CustomerRecord>,
    {
        let thresholds = *self;
        records.into_iter().map(move |record| ClassifiedRecord {
            record,
            category: thresholds.classify(record.churn_risk_score),
        })
    }

    /// Counts records whose upstream category differs from the computed one.
    pub fn disagreements<'a, I>(&self, records: I) -> usize
    where
        I: IntoIterator<Item = &'a CustomerRecord>,
    {
        let count = self
            .classify_all(records)
            .filter(|classified| {
                classified
                    .record
                    .reported_category
                    .is_some_and(|reported| reported != classified.category)
            })
            .count();
        if count > 0 {
            warn!(count, "precomputed risk categories disagree with configured thresholds");
        }
        count
    }
}

/// A record annotated with its derived category; the source row is untouched.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ClassifiedRecord<'a> {
    pub record: &'a CustomerRecord,
    pub category: RiskCategory,
}
