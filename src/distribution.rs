use serde::Serialize;

use crate::models::{CustomerRecord, RiskCategory};
use crate::risk::RiskThresholds;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HistogramBin {
    pub lower: f64,
    pub upper: f64,
    pub low: usize,
    pub medium: usize,
    pub high: usize,
}

impl HistogramBin {
    pub fn total(&self) -> usize {
        self.low + self.medium + self.high
    }

    fn count(&mut self, category: RiskCategory) {
        match category {
            RiskCategory::Low => self.low += 1,
            RiskCategory::Medium => self.medium += 1,
            RiskCategory::High => self.high += 1,
        }
    }
}

/// Equal-width bins over [0, 1]; a score of exactly 1.0 falls in the last bin.
pub fn score_histogram<'a, I>(
    records: I,
    bins: usize,
    thresholds: &RiskThresholds,
) -> Vec<HistogramBin>
where
    I: IntoIterator<Item = &'a CustomerRecord>,
{
    let bins = bins.max(1);
    let scale = bins as f64;
    let mut histogram: Vec<HistogramBin> = (0..bins)
        .map(|bin| HistogramBin {
            lower: bin as f64 / scale,
            upper: (bin + 1) as f64 / scale,
            low: 0,
            medium: 0,
            high: 0,
        })
        .collect();

    for classified in thresholds.classify_all(records) {
        let score = classified.record.churn_risk_score;
        let bin = ((score * scale) as usize).min(bins - 1);
        histogram[bin].count(classified.category);
    }
    histogram
}

/// Min, quartiles and max, using linear interpolation between order statistics.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct FiveNumberSummary {
    pub count: usize,
    pub min: f64,
    pub q1: f64,
    pub median: f64,
    pub q3: f64,
    pub max: f64,
}

impl FiveNumberSummary {
    pub fn from_values(mut values: Vec<f64>) -> Option<Self> {
        if values.is_empty() {
            return None;
        }
        values.sort_by(f64::total_cmp);
        Some(Self {
            count: values.len(),
            min: values[0],
            q1: quantile(&values, 0.25),
            median: quantile(&values, 0.5),
            q3: quantile(&values, 0.75),
            max: values[values.len() - 1],
        })
    }
}

fn quantile(sorted: &[f64], q: f64) -> f64 {
    let position = q * (sorted.len() - 1) as f64;
    let lower = position.floor() as usize;
    let upper = position.ceil() as usize;
    let fraction = position - lower as f64;
    sorted[lower] + (sorted[upper] - sorted[lower]) * fraction
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChargesByChurn {
    pub retained: Option<FiveNumberSummary>,
    pub churned: Option<FiveNumberSummary>,
}

/// Total charges split by churn label; unlabeled customers are left out.
pub fn charges_by_churn<'a, I>(records: I) -> ChargesByChurn
where
    I: IntoIterator<Item = &'a CustomerRecord>,
{
    let mut retained = Vec::new();
    let mut churned = Vec::new();
    for record in records {
        match record.churned {
            Some(true) => churned.push(record.total_charge),
            Some(false) => retained.push(record.total_charge),
            None => {}
        }
    }
    ChargesByChurn {
        retained: FiveNumberSummary::from_values(retained),
        churned: FiveNumberSummary::from_values(churned),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(row: usize, score: f64, charge: f64, churned: Option<bool>) -> CustomerRecord {
        CustomerRecord {
            row,
            state: "CA".to_string(),
            account_length: 90,
            international_plan: false,
            voice_mail_plan: false,
            customer_service_calls: 2,
            total_charge: charge,
            churn_risk_score: score,
            churned,
            reported_category: None,
        }
    }

    #[test]
    fn histogram_bins_by_score_and_category() {
        let records = vec![
            record(0, 0.0, 10.0, None),
            record(1, 0.04, 10.0, None),
            record(2, 0.5, 10.0, None),
            record(3, 1.0, 10.0, None),
            record(4, 0.21, 10.0, None),
        ];
        let histogram = score_histogram(&records, 20, &RiskThresholds::default());

        assert_eq!(histogram.len(), 20);
        assert_eq!(histogram[0].low, 2);
        assert_eq!(histogram[4].medium, 1);
        assert_eq!(histogram[10].high, 1);
        assert_eq!(histogram[19].high, 1);
        let total: usize = histogram.iter().map(HistogramBin::total).sum();
        assert_eq!(total, records.len());
    }

    #[test]
    fn five_number_summary_interpolates() {
        let summary = FiveNumberSummary::from_values(vec![4.0, 1.0, 3.0, 2.0, 5.0]).unwrap();
        assert_eq!(summary.count, 5);
        assert_eq!(summary.min, 1.0);
        assert_eq!(summary.q1, 2.0);
        assert_eq!(summary.median, 3.0);
        assert_eq!(summary.q3, 4.0);
        assert_eq!(summary.max, 5.0);

        let even = FiveNumberSummary::from_values(vec![1.0, 2.0, 3.0, 4.0]).unwrap();
        assert!((even.median - 2.5).abs() < 1e-12);
        assert!((even.q1 - 1.75).abs() < 1e-12);
    }

    #[test]
    fn charges_exclude_unlabeled_customers() {
        let records = vec![
            record(0, 0.1, 40.0, Some(false)),
            record(1, 0.8, 90.0, Some(true)),
            record(2, 0.8, 500.0, None),
        ];
        let charges = charges_by_churn(&records);
        assert_eq!(charges.retained.unwrap().max, 40.0);
        assert_eq!(charges.churned.unwrap().max, 90.0);
        assert_eq!(charges.churned.unwrap().count, 1);
    }

    #[test]
    fn empty_side_has_no_summary() {
        let records = vec![record(0, 0.1, 40.0, Some(false))];
        assert!(charges_by_churn(&records).churned.is_none());
    }
}
