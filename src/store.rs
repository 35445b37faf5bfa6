use serde::Serialize;
use tracing::{info, warn};

use crate::config::ScorePolicy;
use crate::error::IngestionError;
use crate::models::{CustomerRecord, RawRow, RiskCategory};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SkippedRow {
    pub row: usize,
    #[serde(serialize_with = "serialize_reason")]
    pub reason: IngestionError,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ClampedScore {
    pub row: usize,
    pub original: f64,
    pub clamped: f64,
}

#[derive(Debug, Clone, Default)]
pub struct RecordStore {
    records: Vec<CustomerRecord>,
    skipped: Vec<SkippedRow>,
    clamped: Vec<ClampedScore>,
}

impl RecordStore {
    /// Builds the store from raw rows in input order.
    ///
    /// Rows that fail to parse are skipped and reported through
    /// [`RecordStore::skipped_rows`]; the store itself holds the valid subset.
    pub fn load<I>(rows: I, policy: ScorePolicy) -> Self
    where
        I: IntoIterator<Item = RawRow>,
    {
        Self::load_results(rows.into_iter().map(Ok), policy)
    }

    /// Like [`RecordStore::load`], for sources that already failed to decode
    /// some rows. Each `Err` keeps its slot in the row numbering.
    pub fn load_results<I>(rows: I, policy: ScorePolicy) -> Self
    where
        I: IntoIterator<Item = Result<RawRow, IngestionError>>,
    {
        let mut store = RecordStore::default();

        for (row, raw) in rows.into_iter().enumerate() {
            match raw.and_then(|raw| parse_record(row, &raw, policy)) {
                Ok((record, clamp)) => {
                    if let Some(clamp) = clamp {
                        warn!(
                            row,
                            original = clamp.original,
                            clamped = clamp.clamped,
                            "churn risk score out of range, clamped"
                        );
                        store.clamped.push(clamp);
                    }
                    store.records.push(record);
                }
                Err(reason) => {
                    warn!(row, %reason, "skipping input row");
                    store.skipped.push(SkippedRow { row, reason });
                }
            }
        }

        info!(
            loaded = store.records.len(),
            skipped = store.skipped.len(),
            clamped = store.clamped.len(),
            "record store loaded"
        );
        store
    }

    /// Records are kept ordered by `row` so lookups stay valid.
    pub fn from_records(mut records: Vec<CustomerRecord>) -> Self {
        records.sort_by_key(|record| record.row);
        Self {
            records,
            ..Self::default()
        }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Restartable iteration in stable input order.
    pub fn iter(&self) -> std::slice::Iter<'_, CustomerRecord> {
        self.records.iter()
    }

    pub fn records(&self) -> &[CustomerRecord] {
        &self.records
    }

    /// Looks a record up by its source row index.
    pub fn get(&self, row: usize) -> Option<&CustomerRecord> {
        self.records
            .binary_search_by_key(&row, |record| record.row)
            .ok()
            .map(|index| &self.records[index])
    }

    pub fn skipped_rows(&self) -> &[SkippedRow] {
        &self.skipped
    }

    pub fn clamped_scores(&self) -> &[ClampedScore] {
        &self.clamped
    }
}

impl<'a> IntoIterator for &'a RecordStore {
    type Item = &'a CustomerRecord;
    type IntoIter = std::slice::Iter<'a, CustomerRecord>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

fn serialize_reason<S>(reason: &IngestionError, serializer: S) -> Result<S::Ok, S::Error>
where
    S: serde::Serializer,
{
    serializer.collect_str(reason)
}

fn parse_record(
    row: usize,
    raw: &RawRow,
    policy: ScorePolicy,
) -> Result<(CustomerRecord, Option<ClampedScore>), IngestionError> {
    let state = required("State", raw.state.as_deref())?.to_string();
    let account_length = parse_count(
        "Account length",
        required("Account length", raw.account_length.as_deref())?,
    )?;
    let international_plan = parse_flag(
        "International_plan",
        required("International_plan", raw.international_plan.as_deref())?,
    )?;
    let voice_mail_plan = parse_flag(
        "Voice_mail_plan",
        required("Voice_mail_plan", raw.voice_mail_plan.as_deref())?,
    )?;
    let customer_service_calls = parse_count(
        "Customer service calls",
        required("Customer service calls", raw.customer_service_calls.as_deref())?,
    )?;
    let total_charge = parse_amount(
        "Total_charge",
        required("Total_charge", raw.total_charge.as_deref())?,
    )?;
    let raw_score = parse_float(
        "Churn_Risk_Score",
        required("Churn_Risk_Score", raw.churn_risk_score.as_deref())?,
    )?;

    let churned = match optional(raw.churn.as_deref()) {
        Some(value) => Some(parse_flag("Churn", value)?),
        None => None,
    };

    let reported_category = optional(raw.risk_category.as_deref()).and_then(|value| {
        let parsed = RiskCategory::parse(value);
        if parsed.is_none() {
            warn!(row, value, "ignoring unrecognised risk category");
        }
        parsed
    });

    let (churn_risk_score, clamp) = if (0.0..=1.0).contains(&raw_score) {
        (raw_score, None)
    } else {
        match policy {
            ScorePolicy::Reject => {
                return Err(IngestionError::ScoreOutOfRange { score: raw_score });
            }
            ScorePolicy::Clamp => {
                let clamped = raw_score.clamp(0.0, 1.0);
                (
                    clamped,
                    Some(ClampedScore {
                        row,
                        original: raw_score,
                        clamped,
                    }),
                )
            }
        }
    };

    let record = CustomerRecord {
        row,
        state,
        account_length,
        international_plan,
        voice_mail_plan,
        customer_service_calls,
        total_charge,
        churn_risk_score,
        churned,
        reported_category,
    };
    Ok((record, clamp))
}

fn optional(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|value| !value.is_empty())
}

fn required<'a>(field: &'static str, value: Option<&'a str>) -> Result<&'a str, IngestionError> {
    optional(value).ok_or(IngestionError::MissingField { field })
}

fn parse_float(field: &'static str, value: &str) -> Result<f64, IngestionError> {
    value
        .parse::<f64>()
        .ok()
        .filter(|parsed| parsed.is_finite())
        .ok_or_else(|| IngestionError::InvalidNumber {
            field,
            value: value.to_string(),
        })
}

fn parse_amount(field: &'static str, value: &str) -> Result<f64, IngestionError> {
    let parsed = parse_float(field, value)?;
    if parsed < 0.0 {
        return Err(IngestionError::NegativeValue { field, value: parsed });
    }
    Ok(parsed)
}

/// Integer counts; tolerates a float rendering such as `3.0`.
fn parse_count(field: &'static str, value: &str) -> Result<u32, IngestionError> {
    if let Ok(parsed) = value.parse::<u32>() {
        return Ok(parsed);
    }

    let parsed = parse_float(field, value)?;
    if parsed < 0.0 {
        return Err(IngestionError::NegativeValue { field, value: parsed });
    }
    if parsed.fract() != 0.0 || parsed > f64::from(u32::MAX) {
        return Err(IngestionError::InvalidNumber {
            field,
            value: value.to_string(),
        });
    }
    Ok(parsed as u32)
}

/// The one place boundary flags (`0`/`1`, `true`/`false`, `yes`/`no`) become booleans.
pub fn parse_flag(field: &'static str, value: &str) -> Result<bool, IngestionError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "1.0" | "true" | "yes" | "y" => Ok(true),
        "0" | "0.0" | "false" | "no" | "n" => Ok(false),
        _ => Err(IngestionError::InvalidFlag {
            field,
            value: value.to_string(),
        }),
    }
}
