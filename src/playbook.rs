use std::fmt;

use serde::Serialize;
use tracing::debug;

use crate::aggregate::GroupStats;
use crate::models::CustomerRecord;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ImpactRange {
    pub min_pct: f64,
    pub max_pct: f64,
}

impl fmt::Display for ImpactRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}% churn reduction", self.min_pct, self.max_pct)
    }
}

/// The facts a trigger looks at. Built from one customer, or from the means
/// of a cohort.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RuleSignals {
    pub customer_service_calls: f64,
    pub international_plan: bool,
    pub total_charge: f64,
    pub churn_risk_score: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Trigger {
    ServiceCallsAtLeast { calls: u32 },
    InternationalPlan,
    ChargeAndScoreAbove { charge: f64, score: f64 },
}

impl Trigger {
    pub fn matches(&self, signals: &RuleSignals) -> bool {
        match *self {
            Trigger::ServiceCallsAtLeast { calls } => {
                signals.customer_service_calls >= f64::from(calls)
            }
            Trigger::InternationalPlan => signals.international_plan,
            Trigger::ChargeAndScoreAbove { charge, score } => {
                signals.total_charge > charge && signals.churn_risk_score > score
            }
        }
    }
}

impl fmt::Display for Trigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Trigger::ServiceCallsAtLeast { calls } => {
                write!(f, "Customer service calls >= {calls}")
            }
            Trigger::InternationalPlan => f.write_str("International plan"),
            Trigger::ChargeAndScoreAbove { charge, score } => {
                write!(f, "Total charges > ${charge} + risk score > {score}")
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RetentionRule {
    pub id: &'static str,
    pub name: &'static str,
    pub trigger: Trigger,
    pub actions: &'static [&'static str],
    pub impact: ImpactRange,
}

/// The canonical rule table, in priority order.
pub static STANDARD_PLAYBOOK: [RetentionRule; 3] = [
    RetentionRule {
        id: "high-service-calls",
        name: "High Service Calls (4+ calls)",
        trigger: Trigger::ServiceCallsAtLeast { calls: 4 },
        actions: &[
            "Immediate account review by senior support",
            "Proactive outreach within 24 hours",
            "Root cause analysis of issues",
            "Service credit or bill adjustment",
            "Follow-up call within 1 week",
        ],
        impact: ImpactRange {
            min_pct: 15.0,
            max_pct: 25.0,
        },
    },
    RetentionRule {
        id: "international-plan",
        name: "International Plan Users",
        trigger: Trigger::InternationalPlan,
        actions: &[
            "Review international usage patterns",
            "Offer optimized international plans",
            "Provide usage alerts and controls",
            "Consider loyalty discounts",
            "International roaming education",
        ],
        impact: ImpactRange {
            min_pct: 10.0,
            max_pct: 20.0,
        },
    },
    RetentionRule {
        id: "high-charges",
        name: "High Charges",
        trigger: Trigger::ChargeAndScoreAbove {
            charge: 75.0,
            score: 0.5,
        },
        actions: &[
            "Bill analysis and explanation",
            "Plan optimization recommendations",
            "Usage monitoring tools",
            "Payment plan options",
            "Competitive retention offers",
        ],
        impact: ImpactRange {
            min_pct: 8.0,
            max_pct: 15.0,
        },
    },
];

pub trait RuleContext {
    fn signals(&self) -> RuleSignals;
}

impl RuleContext for CustomerRecord {
    fn signals(&self) -> RuleSignals {
        RuleSignals {
            customer_service_calls: f64::from(self.customer_service_calls),
            international_plan: self.international_plan,
            total_charge: self.total_charge,
            churn_risk_score: self.churn_risk_score,
        }
    }
}

/// Aggregate profile of a named subset of customers.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CohortSummary {
    pub name: String,
    pub size: usize,
    pub labeled: usize,
    pub churn_rate: Option<f64>,
    pub mean_service_calls: f64,
    pub international_plan_share: f64,
    pub mean_total_charge: f64,
    pub mean_risk_score: f64,
}

impl CohortSummary {
    /// `None` for an empty cohort, which has no profile to evaluate.
    pub fn from_records<'a, I>(name: impl Into<String>, records: I) -> Option<Self>
    where
        I: IntoIterator<Item = &'a CustomerRecord>,
    {
        let mut stats = GroupStats::default();
        let mut calls = 0.0;
        let mut international = 0usize;
        let mut charge = 0.0;
        let mut score = 0.0;

        for record in records {
            stats.add(record);
            calls += f64::from(record.customer_service_calls);
            if record.international_plan {
                international += 1;
            }
            charge += record.total_charge;
            score += record.churn_risk_score;
        }

        if stats.count == 0 {
            return None;
        }
        let size = stats.count as f64;
        Some(Self {
            name: name.into(),
            size: stats.count,
            labeled: stats.labeled,
            churn_rate: stats.rate(),
            mean_service_calls: calls / size,
            international_plan_share: international as f64 / size,
            mean_total_charge: charge / size,
            mean_risk_score: score / size,
        })
    }
}

impl RuleContext for CohortSummary {
    /// A cohort counts as on the international plan when at least half its members are.
    fn signals(&self) -> RuleSignals {
        RuleSignals {
            customer_service_calls: self.mean_service_calls,
            international_plan: self.international_plan_share >= 0.5,
            total_charge: self.mean_total_charge,
            churn_risk_score: self.mean_risk_score,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RuleMatch<'r> {
    pub rule_id: &'static str,
    pub name: &'static str,
    pub actions: &'r [&'static str],
    pub impact: ImpactRange,
}

impl<'r> From<&'r RetentionRule> for RuleMatch<'r> {
    fn from(rule: &'r RetentionRule) -> Self {
        Self {
            rule_id: rule.id,
            name: rule.name,
            actions: rule.actions,
            impact: rule.impact,
        }
    }
}

/// Returns every rule whose trigger holds for `context`, in rule order. An
/// empty result means no action is needed.
pub fn evaluate<'r, C>(context: &C, rules: &'r [RetentionRule]) -> Vec<RuleMatch<'r>>
where
    C: RuleContext + ?Sized,
{
    let signals = context.signals();
    let matches: Vec<RuleMatch<'r>> = rules
        .iter()
        .filter(|rule| rule.trigger.matches(&signals))
        .map(RuleMatch::from)
        .collect();
    debug!(matched = matches.len(), rules = rules.len(), "evaluated retention rules");
    matches
}

/// How many customers each rule fires for, in rule order.
pub fn rule_coverage<'a, 'r, I>(
    records: I,
    rules: &'r [RetentionRule],
) -> Vec<(&'r RetentionRule, usize)>
where
    I: IntoIterator<Item = &'a CustomerRecord>,
{
    let mut counts = vec![0usize; rules.len()];
    for record in records {
        let signals = record.signals();
        for (count, rule) in counts.iter_mut().zip(rules) {
            if rule.trigger.matches(&signals) {
                *count += 1;
            }
        }
    }
    rules.iter().zip(counts).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn customer(calls: u32, intl: bool, charge: f64, score: f64) -> CustomerRecord {
        CustomerRecord {
            row: 0,
            state: "NY".to_string(),
            account_length: 120,
            international_plan: intl,
            voice_mail_plan: false,
            customer_service_calls: calls,
            total_charge: charge,
            churn_risk_score: score,
            churned: None,
            reported_category: None,
        }
    }

    fn ids(matches: &[RuleMatch<'_>]) -> Vec<&'static str> {
        matches.iter().map(|matched| matched.rule_id).collect()
    }

    #[test]
    fn all_rules_fire_in_declaration_order() {
        let matches = evaluate(&customer(5, true, 80.0, 0.6), &STANDARD_PLAYBOOK);
        assert_eq!(ids(&matches), vec!["high-service-calls", "international-plan", "high-charges"]);
    }

    #[test]
    fn quiet_customer_needs_no_action() {
        let matches = evaluate(&customer(1, false, 20.0, 0.1), &STANDARD_PLAYBOOK);
        assert!(matches.is_empty());
    }

    #[test]
    fn trigger_boundaries() {
        assert_eq!(
            ids(&evaluate(&customer(4, false, 0.0, 0.0), &STANDARD_PLAYBOOK)),
            vec!["high-service-calls"]
        );
        assert!(evaluate(&customer(3, false, 0.0, 0.0), &STANDARD_PLAYBOOK).is_empty());
        // both charge and score comparisons are strict
        assert!(evaluate(&customer(0, false, 75.0, 0.9), &STANDARD_PLAYBOOK).is_empty());
        assert!(evaluate(&customer(0, false, 90.0, 0.5), &STANDARD_PLAYBOOK).is_empty());
        assert_eq!(
            ids(&evaluate(&customer(0, false, 75.01, 0.51), &STANDARD_PLAYBOOK)),
            vec!["high-charges"]
        );
    }

    #[test]
    fn matches_carry_rule_metadata_verbatim() {
        let matches = evaluate(&customer(6, false, 10.0, 0.1), &STANDARD_PLAYBOOK);
        let matched = &matches[0];
        assert_eq!(matched.actions.len(), 5);
        assert_eq!(matched.actions[1], "Proactive outreach within 24 hours");
        assert_eq!(matched.impact, ImpactRange { min_pct: 15.0, max_pct: 25.0 });
        assert_eq!(matched.impact.to_string(), "15-25% churn reduction");
    }

    #[test]
    fn cohort_uses_means_and_majority_plan() {
        let members = vec![
            customer(6, true, 90.0, 0.7),
            customer(4, true, 80.0, 0.6),
            customer(2, false, 70.0, 0.5),
        ];
        let cohort = CohortSummary::from_records("High Risk", &members).unwrap();
        assert_eq!(cohort.size, 3);
        assert!((cohort.mean_service_calls - 4.0).abs() < 1e-12);
        assert_eq!(cohort.churn_rate, None);

        let matches = evaluate(&cohort, &STANDARD_PLAYBOOK);
        assert_eq!(ids(&matches), vec!["high-service-calls", "international-plan", "high-charges"]);
    }

    #[test]
    fn empty_cohort_has_no_summary() {
        let members: Vec<CustomerRecord> = Vec::new();
        assert!(CohortSummary::from_records("nobody", &members).is_none());
    }

    #[test]
    fn coverage_counts_per_rule() {
        let customers = vec![
            customer(5, true, 80.0, 0.6),
            customer(1, true, 20.0, 0.1),
            customer(0, false, 10.0, 0.1),
        ];
        let coverage: Vec<(&str, usize)> = rule_coverage(&customers, &STANDARD_PLAYBOOK)
            .into_iter()
            .map(|(rule, count)| (rule.id, count))
            .collect();
        assert_eq!(
            coverage,
            vec![("high-service-calls", 1), ("international-plan", 2), ("high-charges", 1)]
        );
    }

    #[test]
    fn triggers_describe_themselves() {
        assert_eq!(STANDARD_PLAYBOOK[0].trigger.to_string(), "Customer service calls >= 4");
        assert_eq!(
            STANDARD_PLAYBOOK[2].trigger.to_string(),
            "Total charges > $75 + risk score > 0.5"
        );
    }
}
