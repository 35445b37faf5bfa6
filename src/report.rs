use std::fmt::Write;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::aggregate::{self, AggregationResult, GroupStats};
use crate::config::AnalyticsConfig;
use crate::distribution::{self, ChargesByChurn, FiveNumberSummary, HistogramBin};
use crate::models::{CustomerRecord, RiskCategory};
use crate::playbook::{self, CohortSummary, RetentionRule, RuleMatch};
use crate::risk::{ClassifiedRecord, RiskThresholds};
use crate::store::{RecordStore, SkippedRow};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum OrderBy {
    Score,
    RiskCategory,
}

/// At most `n` records, highest first. Ties keep input order.
pub fn top_risk<'a, I>(classified: I, n: usize, order_by: OrderBy) -> Vec<ClassifiedRecord<'a>>
where
    I: IntoIterator<Item = ClassifiedRecord<'a>>,
{
    let mut ranked: Vec<ClassifiedRecord<'a>> = classified.into_iter().collect();
    match order_by {
        OrderBy::Score => ranked.sort_by(|a, b| {
            b.record
                .churn_risk_score
                .total_cmp(&a.record.churn_risk_score)
        }),
        OrderBy::RiskCategory => ranked.sort_by(|a, b| b.category.cmp(&a.category)),
    }
    ranked.truncate(n);
    ranked
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SegmentRate {
    pub segment: String,
    pub count: usize,
    pub rate: Option<f64>,
}

/// Headline numbers. Rates are over labeled customers only; an empty store
/// yields zero counts and `None` for every rate and average.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SummaryMetrics {
    pub customers: usize,
    pub labeled: usize,
    pub unlabeled: usize,
    pub overall_churn_rate: Option<f64>,
    pub high_risk_count: usize,
    pub high_risk_fraction: Option<f64>,
    pub segment_churn_rates: Vec<SegmentRate>,
    pub avg_risk_score: Option<f64>,
}

impl SummaryMetrics {
    pub fn has_data(&self) -> bool {
        self.customers > 0
    }
}

fn segment<'a, I, F>(name: String, records: I, predicate: F) -> SegmentRate
where
    I: IntoIterator<Item = &'a CustomerRecord>,
    F: Fn(&CustomerRecord) -> bool,
{
    let stats = GroupStats::of(records.into_iter().filter(|record| predicate(record)));
    SegmentRate {
        segment: name,
        count: stats.count,
        rate: stats.rate(),
    }
}

pub fn summary_metrics(records: &[CustomerRecord], config: &AnalyticsConfig) -> SummaryMetrics {
    let overall = GroupStats::of(records);
    let high_risk_count = config
        .risk
        .classify_all(records)
        .filter(|classified| classified.category == RiskCategory::High)
        .count();
    let (high_risk_fraction, avg_risk_score) = if records.is_empty() {
        (None, None)
    } else {
        let size = records.len() as f64;
        let score_sum: f64 = records.iter().map(|record| record.churn_risk_score).sum();
        (Some(high_risk_count as f64 / size), Some(score_sum / size))
    };

    let calls = config.high_service_calls;
    let segment_churn_rates = vec![
        segment("Intl Plan".to_string(), records, |record| record.international_plan),
        segment(format!("{calls}+ Service Calls"), records, |record| {
            record.customer_service_calls >= calls
        }),
        segment("No VM Plan".to_string(), records, |record| !record.voice_mail_plan),
        segment("VM Plan".to_string(), records, |record| record.voice_mail_plan),
    ];

    SummaryMetrics {
        customers: overall.count,
        labeled: overall.labeled,
        unlabeled: overall.unlabeled(),
        overall_churn_rate: overall.rate(),
        high_risk_count,
        high_risk_fraction,
        segment_churn_rates,
        avg_risk_score,
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CustomerRecommendation<'a, 'r> {
    pub customer: &'a CustomerRecord,
    pub category: RiskCategory,
    pub matches: Vec<RuleMatch<'r>>,
}

pub fn recommend<'a, 'r>(
    classified: ClassifiedRecord<'a>,
    rules: &'r [RetentionRule],
) -> CustomerRecommendation<'a, 'r> {
    CustomerRecommendation {
        customer: classified.record,
        category: classified.category,
        matches: playbook::evaluate(classified.record, rules),
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CohortRecommendation<'r> {
    pub category: RiskCategory,
    pub cohort: Option<CohortSummary>,
    pub matches: Vec<RuleMatch<'r>>,
}

/// One cohort per risk category, highest first, with the rules its profile triggers.
pub fn category_cohorts<'r>(
    records: &[CustomerRecord],
    thresholds: &RiskThresholds,
    rules: &'r [RetentionRule],
) -> Vec<CohortRecommendation<'r>> {
    RiskCategory::ALL
        .iter()
        .rev()
        .map(|&category| {
            let members = records
                .iter()
                .filter(|record| thresholds.classify(record.churn_risk_score) == category);
            let cohort = CohortSummary::from_records(category.label(), members);
            let matches = cohort
                .as_ref()
                .map(|cohort| playbook::evaluate(cohort, rules))
                .unwrap_or_default();
            CohortRecommendation {
                category,
                cohort,
                matches,
            }
        })
        .collect()
}

#[derive(Debug, Clone, Serialize)]
pub struct RuleCoverage<'r> {
    pub rule: &'r RetentionRule,
    pub customers: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct IngestionSummary<'a> {
    pub loaded: usize,
    pub skipped: &'a [SkippedRow],
    pub clamped: usize,
    pub category_disagreements: usize,
}

/// Everything the dashboard renders, in one serializable value.
#[derive(Debug, Clone, Serialize)]
pub struct DashboardPayload<'a, 'r> {
    pub generated_at: DateTime<Utc>,
    pub source: String,
    pub thresholds: RiskThresholds,
    pub ingestion: IngestionSummary<'a>,
    pub summary: SummaryMetrics,
    pub churn_by_service_calls: AggregationResult<u32>,
    pub plan_type_impact: AggregationResult<&'static str>,
    pub churn_by_risk_category: AggregationResult<RiskCategory>,
    pub risk_score_histogram: Vec<HistogramBin>,
    pub charges_by_churn: ChargesByChurn,
    /// High-risk customers only, highest score first.
    pub top_risk: Vec<CustomerRecommendation<'a, 'r>>,
    pub cohorts: Vec<CohortRecommendation<'r>>,
    pub playbook: Vec<RuleCoverage<'r>>,
}

pub fn build_payload<'a, 'r>(
    source: &str,
    store: &'a RecordStore,
    config: &AnalyticsConfig,
    rules: &'r [RetentionRule],
    generated_at: DateTime<Utc>,
) -> DashboardPayload<'a, 'r> {
    let records = store.records();
    let thresholds = config.risk;

    let high_risk = thresholds
        .classify_all(records)
        .filter(|classified| classified.category == RiskCategory::High);
    let top_risk = top_risk(high_risk, config.top_n, OrderBy::Score)
        .into_iter()
        .map(|classified| recommend(classified, rules))
        .collect();

    let playbook = playbook::rule_coverage(records, rules)
        .into_iter()
        .map(|(rule, customers)| RuleCoverage { rule, customers })
        .collect();

    DashboardPayload {
        generated_at,
        source: source.to_string(),
        thresholds,
        ingestion: IngestionSummary {
            loaded: store.len(),
            skipped: store.skipped_rows(),
            clamped: store.clamped_scores().len(),
            category_disagreements: thresholds.disagreements(records),
        },
        summary: summary_metrics(records, config),
        churn_by_service_calls: aggregate::by_service_calls(records),
        plan_type_impact: aggregate::plan_type_impact(records),
        churn_by_risk_category: aggregate::by_risk_category(records, &thresholds),
        risk_score_histogram: distribution::score_histogram(records, 20, &thresholds),
        charges_by_churn: distribution::charges_by_churn(records),
        top_risk,
        cohorts: category_cohorts(records, &thresholds, rules),
        playbook,
    }
}

/// Renders a rate as a percentage, or `n/a` when it is undefined.
pub fn format_rate(rate: Option<f64>) -> String {
    match rate {
        Some(value) => format!("{:.1}%", value * 100.0),
        None => "n/a".to_string(),
    }
}

fn format_flag(value: bool) -> &'static str {
    if value {
        "Yes"
    } else {
        "No"
    }
}

fn format_status(churned: Option<bool>) -> &'static str {
    match churned {
        Some(true) => "Churned",
        Some(false) => "At Risk",
        None => "Unknown",
    }
}

fn format_box(summary: Option<&FiveNumberSummary>) -> String {
    match summary {
        Some(s) => format!(
            "{} customers, min ${:.2}, Q1 ${:.2}, median ${:.2}, Q3 ${:.2}, max ${:.2}",
            s.count, s.min, s.q1, s.median, s.q3, s.max
        ),
        None => "no labeled customers".to_string(),
    }
}

pub fn build_report(payload: &DashboardPayload<'_, '_>) -> String {
    let mut output = String::new();
    let summary = &payload.summary;

    let _ = writeln!(output, "# Customer Churn Analytics Report");
    let _ = writeln!(
        output,
        "Generated for {} at {}",
        payload.source,
        payload.generated_at.format("%Y-%m-%d %H:%M UTC")
    );
    let _ = writeln!(
        output,
        "Risk thresholds: high >= {}, medium >= {}",
        payload.thresholds.high_threshold, payload.thresholds.medium_threshold
    );
    let _ = writeln!(output);

    let _ = writeln!(output, "## Ingestion");
    let _ = writeln!(
        output,
        "- {} customers loaded, {} rows skipped, {} scores clamped",
        payload.ingestion.loaded,
        payload.ingestion.skipped.len(),
        payload.ingestion.clamped
    );
    for skipped in payload.ingestion.skipped.iter().take(10) {
        let _ = writeln!(output, "  - row {}: {}", skipped.row, skipped.reason);
    }
    if payload.ingestion.category_disagreements > 0 {
        let _ = writeln!(
            output,
            "- {} precomputed risk categories disagree with the thresholds above",
            payload.ingestion.category_disagreements
        );
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "## Key Metrics");

    if !summary.has_data() {
        let _ = writeln!(output, "No customer data loaded.");
        return output;
    }

    let _ = writeln!(
        output,
        "- Overall churn rate: {} ({} labeled, {} unlabeled)",
        format_rate(summary.overall_churn_rate),
        summary.labeled,
        summary.unlabeled
    );
    let _ = writeln!(
        output,
        "- High risk customers: {} ({} of total)",
        summary.high_risk_count,
        format_rate(summary.high_risk_fraction)
    );
    if let Some(avg) = summary.avg_risk_score {
        let _ = writeln!(output, "- Average risk score: {avg:.3}");
    }
    for segment in &summary.segment_churn_rates {
        let _ = writeln!(
            output,
            "- {} churn rate: {} across {} customers",
            segment.segment,
            format_rate(segment.rate),
            segment.count
        );
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "## Churn Rate by Customer Service Calls");
    let mut by_calls: Vec<(&u32, &GroupStats)> = payload.churn_by_service_calls.iter().collect();
    by_calls.sort_by_key(|(calls, _)| **calls);
    for (calls, stats) in by_calls {
        let _ = writeln!(
            output,
            "- {} calls: {} ({} customers)",
            calls,
            format_rate(stats.rate()),
            stats.count
        );
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "## Plan Type Impact");
    for (plan, stats) in payload.plan_type_impact.iter() {
        let _ = writeln!(
            output,
            "- {}: {} ({} customers)",
            plan,
            format_rate(stats.rate()),
            stats.count
        );
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "## Risk Categories");
    for (category, stats) in payload.churn_by_risk_category.iter() {
        let _ = writeln!(
            output,
            "- {}: {} customers, observed churn {}",
            category,
            stats.count,
            format_rate(stats.rate())
        );
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "## Charges by Churn Status");
    let _ = writeln!(
        output,
        "- Retained: {}",
        format_box(payload.charges_by_churn.retained.as_ref())
    );
    let _ = writeln!(
        output,
        "- Churned: {}",
        format_box(payload.charges_by_churn.churned.as_ref())
    );

    let _ = writeln!(output);
    let _ = writeln!(output, "## Highest Risk Customers");
    let _ = writeln!(
        output,
        "| Row | State | Account length | Intl plan | VM plan | Service calls | Total charge | Risk score | Category | Status | Actions |"
    );
    let _ = writeln!(output, "|---|---|---|---|---|---|---|---|---|---|---|");
    for item in &payload.top_risk {
        let customer = item.customer;
        let rules: Vec<&str> = item.matches.iter().map(|matched| matched.name).collect();
        let _ = writeln!(
            output,
            "| {} | {} | {} | {} | {} | {} | ${:.2} | {:.3} | {} | {} | {} |",
            customer.row,
            customer.state,
            customer.account_length,
            format_flag(customer.international_plan),
            format_flag(customer.voice_mail_plan),
            customer.customer_service_calls,
            customer.total_charge,
            customer.churn_risk_score,
            item.category,
            format_status(customer.churned),
            if rules.is_empty() {
                "none".to_string()
            } else {
                rules.join("; ")
            }
        );
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "## Cohort Recommendations");
    for cohort in &payload.cohorts {
        match &cohort.cohort {
            None => {
                let _ = writeln!(output, "- {}: no customers", cohort.category);
            }
            Some(summary) => {
                let rules: Vec<&str> = cohort.matches.iter().map(|matched| matched.name).collect();
                let _ = writeln!(
                    output,
                    "- {}: {} customers, churn {}, mean risk {:.3} -> {}",
                    cohort.category,
                    summary.size,
                    format_rate(summary.churn_rate),
                    summary.mean_risk_score,
                    if rules.is_empty() {
                        "no action needed".to_string()
                    } else {
                        rules.join("; ")
                    }
                );
            }
        }
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "## Retention Playbook");
    for coverage in &payload.playbook {
        let rule = coverage.rule;
        let _ = writeln!(output);
        let _ = writeln!(output, "### {}", rule.name);
        let _ = writeln!(output, "**Trigger**: {}", rule.trigger);
        let _ = writeln!(output, "**Customers matched**: {}", coverage.customers);
        let _ = writeln!(output, "**Actions**:");
        for action in rule.actions {
            let _ = writeln!(output, "- {action}");
        }
        let _ = writeln!(output, "**Expected Impact**: {}", rule.impact);
    }

    output
}
