use std::fmt;

use serde::{Deserialize, Serialize};

/// A raw input row exactly as it arrives from the tabular source.
///
/// Every column is optional text so that a missing or blank cell is reported
/// by ingestion instead of failing the whole file.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct RawRow {
    #[serde(rename = "State", default)]
    pub state: Option<String>,
    #[serde(rename = "Account length", default)]
    pub account_length: Option<String>,
    #[serde(rename = "International_plan", default)]
    pub international_plan: Option<String>,
    #[serde(rename = "Voice_mail_plan", default)]
    pub voice_mail_plan: Option<String>,
    #[serde(rename = "Customer service calls", default)]
    pub customer_service_calls: Option<String>,
    #[serde(rename = "Total_charge", default)]
    pub total_charge: Option<String>,
    #[serde(rename = "Churn", default)]
    pub churn: Option<String>,
    #[serde(rename = "Churn_Risk_Score", default)]
    pub churn_risk_score: Option<String>,
    #[serde(rename = "Risk_Category", default)]
    pub risk_category: Option<String>,
}

/// One telecom subscriber after ingestion.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CustomerRecord {
    /// Position of the source row in the input; stable across reloads of the same input.
    pub row: usize,
    pub state: String,
    pub account_length: u32,
    pub international_plan: bool,
    pub voice_mail_plan: bool,
    pub customer_service_calls: u32,
    pub total_charge: f64,
    pub churn_risk_score: f64,
    /// `None` when the customer has no ground-truth label yet.
    pub churned: Option<bool>,
    /// Category shipped alongside the score by the upstream model, if any.
    pub reported_category: Option<RiskCategory>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum RiskCategory {
    Low,
    Medium,
    High,
}

impl RiskCategory {
    pub const ALL: [RiskCategory; 3] =
        [RiskCategory::Low, RiskCategory::Medium, RiskCategory::High];

    pub fn as_str(&self) -> &'static str {
        match self {
            RiskCategory::Low => "Low",
            RiskCategory::Medium => "Medium",
            RiskCategory::High => "High",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            RiskCategory::Low => "Low Risk",
            RiskCategory::Medium => "Medium Risk",
            RiskCategory::High => "High Risk",
        }
    }

    /// Accepts both the dashboard labels ("High Risk") and bare names ("high").
    pub fn parse(value: &str) -> Option<Self> {
        let normalized = value.trim().to_ascii_lowercase();
        let name = normalized
            .strip_suffix("risk")
            .map(str::trim_end)
            .unwrap_or(normalized.as_str());
        match name {
            "low" => Some(RiskCategory::Low),
            "medium" => Some(RiskCategory::Medium),
            "high" => Some(RiskCategory::High),
            _ => None,
        }
    }
}

impl fmt::Display for RiskCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}
