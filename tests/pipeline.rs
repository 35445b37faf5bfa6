use std::io::Write;

use chrono::Utc;
use churn_insights::aggregate;
use churn_insights::report::{self, OrderBy};
use churn_insights::{
    evaluate, source, AnalyticsConfig, IngestionError, RecordStore, RiskCategory, ScorePolicy,
    STANDARD_PLAYBOOK,
};
use tempfile::NamedTempFile;

const HEADER: &str = "State,Account length,International_plan,Voice_mail_plan,\
Customer service calls,Total_charge,Churn,Churn_Risk_Score,Risk_Category";

fn create_test_csv() -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    writeln!(file, "{HEADER}").unwrap();
    // row 0: every trigger fires
    writeln!(file, "KS,128,1,0,5,80.00,1,0.60,High Risk").unwrap();
    // row 1: quiet customer
    writeln!(file, "OH,107,0,1,1,20.00,0,0.10,Low Risk").unwrap();
    // row 2: no label yet
    writeln!(file, "NJ,137,0,0,4,62.30,,0.45,Medium Risk").unwrap();
    // row 3: score out of range
    writeln!(file, "OH,84,1,0,2,90.10,1,1.20,High Risk").unwrap();
    // row 4: malformed service calls
    writeln!(file, "OK,75,0,0,many,55.00,0,0.30,Medium Risk").unwrap();
    // row 5: missing charge
    writeln!(file, "AL,118,0,1,0,,0,0.05,Low Risk").unwrap();
    // row 6: ties row 0 on score
    writeln!(file, "MA,121,0,1,3,70.00,0,0.60,High Risk").unwrap();
    file
}

fn load(policy: ScorePolicy) -> RecordStore {
    let file = create_test_csv();
    let rows = source::read_csv(file.path()).unwrap();
    RecordStore::load_results(rows, policy)
}

#[test]
fn partial_ingestion_reports_skipped_rows() {
    let store = load(ScorePolicy::Clamp);

    assert_eq!(store.len(), 5);
    let skipped: Vec<usize> = store.skipped_rows().iter().map(|skipped| skipped.row).collect();
    assert_eq!(skipped, vec![4, 5]);
    assert_eq!(
        store.skipped_rows()[1].reason,
        IngestionError::MissingField { field: "Total_charge" }
    );

    assert_eq!(store.clamped_scores().len(), 1);
    assert_eq!(store.get(3).unwrap().churn_risk_score, 1.0);
    assert_eq!(store.get(2).unwrap().churned, None);
}

#[test]
fn reject_policy_drops_out_of_range_row() {
    let store = load(ScorePolicy::Reject);
    assert_eq!(store.len(), 4);
    assert!(store.get(3).is_none());
    assert!(store
        .skipped_rows()
        .iter()
        .any(|skipped| matches!(skipped.reason, IngestionError::ScoreOutOfRange { .. })));
}

#[test]
fn service_call_rates_ignore_unlabeled_customers() {
    let store = load(ScorePolicy::Clamp);
    let groups = aggregate::by_service_calls(&store);

    let keys: Vec<u32> = groups.keys().copied().collect();
    assert_eq!(keys, vec![5, 1, 4, 2, 3]);
    assert_eq!(groups.get(&4).unwrap().count, 1);
    assert_eq!(groups.rate(&4), None);
    assert_eq!(groups.rate(&5), Some(1.0));
    assert_eq!(groups.total_count(), store.len());
}

#[test]
fn recommendations_follow_the_playbook() {
    let store = load(ScorePolicy::Clamp);

    let all: Vec<&str> = evaluate(store.get(0).unwrap(), &STANDARD_PLAYBOOK)
        .iter()
        .map(|matched| matched.rule_id)
        .collect();
    assert_eq!(all, vec!["high-service-calls", "international-plan", "high-charges"]);

    assert!(evaluate(store.get(1).unwrap(), &STANDARD_PLAYBOOK).is_empty());
}

#[test]
fn top_risk_is_deterministic_with_stable_ties() {
    let store = load(ScorePolicy::Clamp);
    let config = AnalyticsConfig::default();

    let top = report::top_risk(config.risk.classify_all(&store), 20, OrderBy::Score);
    let rows: Vec<usize> = top.iter().map(|item| item.record.row).collect();
    assert_eq!(rows, vec![3, 0, 6, 2, 1]);

    let again = report::top_risk(config.risk.classify_all(&store), 20, OrderBy::Score);
    assert_eq!(top, again);

    let limited = report::top_risk(config.risk.classify_all(&store), 2, OrderBy::Score);
    assert_eq!(limited.len(), 2);
}

#[test]
fn upstream_categories_agree_with_default_thresholds() {
    let store = load(ScorePolicy::Clamp);
    let config = AnalyticsConfig::default();
    assert_eq!(config.risk.disagreements(&store), 0);
    assert_eq!(store.get(2).unwrap().reported_category, Some(RiskCategory::Medium));
}

#[test]
fn summary_and_payload_cover_the_dashboard() {
    let store = load(ScorePolicy::Clamp);
    let config = AnalyticsConfig::default();

    let summary = report::summary_metrics(store.records(), &config);
    assert_eq!(summary.customers, 5);
    assert_eq!(summary.labeled, 4);
    assert_eq!(summary.high_risk_count, 3);
    assert_eq!(summary.overall_churn_rate, Some(0.5));

    let payload =
        report::build_payload("fixture", &store, &config, &STANDARD_PLAYBOOK, Utc::now());
    assert_eq!(payload.ingestion.skipped.len(), 2);
    assert_eq!(payload.risk_score_histogram.len(), 20);
    // only the three High customers; Medium row 2 and Low row 1 stay out
    let rows: Vec<usize> = payload.top_risk.iter().map(|item| item.customer.row).collect();
    assert_eq!(rows, vec![3, 0, 6]);
    assert_eq!(payload.top_risk[1].matches.len(), 3);

    let json = serde_json::to_value(&payload).unwrap();
    assert_eq!(json["summary"]["customers"], 5);
    assert!(json["churn_by_service_calls"][2]["rate"].is_null());
    assert_eq!(json["playbook"][0]["rule"]["id"], "high-service-calls");

    let markdown = report::build_report(&payload);
    assert!(markdown.contains("- 5 customers loaded, 2 rows skipped, 1 scores clamped"));
    assert!(markdown.contains("- row 4: field 'Customer service calls' is not a valid number"));
}

#[test]
fn undecodable_row_is_skipped_and_the_rest_loads() {
    let mut file = NamedTempFile::new().unwrap();
    writeln!(file, "{HEADER}").unwrap();
    writeln!(file, "KS,128,1,0,5,80.00,1,0.60,High Risk").unwrap();
    file.write_all(b"O\xffH,107,0,1,1,20.00,0,0.10,Low Risk\n").unwrap();
    writeln!(file, "NJ,137,0,0,4,62.30,0,0.45,Medium Risk").unwrap();
    file.flush().unwrap();

    let rows = source::read_csv(file.path()).unwrap();
    let store = RecordStore::load_results(rows, ScorePolicy::Clamp);

    assert_eq!(store.len(), 2);
    assert_eq!(store.skipped_rows().len(), 1);
    assert_eq!(store.skipped_rows()[0].row, 1);
    assert!(matches!(
        store.skipped_rows()[0].reason,
        IngestionError::MalformedRow { .. }
    ));
    assert_eq!(store.get(2).unwrap().state, "NJ");
}
