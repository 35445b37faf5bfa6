use std::collections::HashMap;
use std::hash::Hash;

use serde::ser::{Serialize, SerializeStruct, Serializer};
use tracing::debug;

use crate::models::{CustomerRecord, RiskCategory};
use crate::risk::RiskThresholds;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GroupStats {
    pub count: usize,
    /// Members with a known churn label.
    pub labeled: usize,
    pub churned: usize,
}

impl GroupStats {
    pub fn add(&mut self, record: &CustomerRecord) {
        self.count += 1;
        if let Some(churned) = record.churned {
            self.labeled += 1;
            if churned {
                self.churned += 1;
            }
        }
    }

    pub fn merge(&mut self, other: &GroupStats) {
        self.count += other.count;
        self.labeled += other.labeled;
        self.churned += other.churned;
    }

    pub fn unlabeled(&self) -> usize {
        self.count - self.labeled
    }

    pub fn rate(&self) -> Option<f64> {
        if self.labeled == 0 {
            None
        } else {
            Some(self.churned as f64 / self.labeled as f64)
        }
    }

    pub fn of<'a, I>(records: I) -> Self
    where
        I: IntoIterator<Item = &'a CustomerRecord>,
    {
        let mut stats = GroupStats::default();
        for record in records {
            stats.add(record);
        }
        stats
    }
}

/// Groups in first-seen key order.
#[derive(Debug, Clone)]
pub struct AggregationResult<K> {
    groups: Vec<(K, GroupStats)>,
    index: HashMap<K, usize>,
}

impl<K: PartialEq> PartialEq for AggregationResult<K> {
    fn eq(&self, other: &Self) -> bool {
        self.groups == other.groups
    }
}

impl<K> Default for AggregationResult<K> {
    fn default() -> Self {
        Self {
            groups: Vec::new(),
            index: HashMap::new(),
        }
    }
}

impl<K: Eq + Hash + Clone> AggregationResult<K> {
    /// Pre-seeds groups so they are reported (with no rate) even when empty.
    pub fn with_keys<I>(keys: I) -> Self
    where
        I: IntoIterator<Item = K>,
    {
        let mut result = Self::default();
        for key in keys {
            result.entry(key);
        }
        result
    }

    fn entry(&mut self, key: K) -> &mut GroupStats {
        let position = match self.index.get(&key) {
            Some(&position) => position,
            None => {
                let position = self.groups.len();
                self.index.insert(key.clone(), position);
                self.groups.push((key, GroupStats::default()));
                position
            }
        };
        &mut self.groups[position].1
    }

    pub fn add(&mut self, key: K, record: &CustomerRecord) {
        self.entry(key).add(record);
    }

    /// Sums counts per group; rates follow from the summed counts, never from
    /// averaging the partial rates.
    pub fn merge(&mut self, other: &AggregationResult<K>) {
        for (key, stats) in &other.groups {
            self.entry(key.clone()).merge(stats);
        }
    }

    pub fn get(&self, key: &K) -> Option<&GroupStats> {
        self.index.get(key).map(|&position| &self.groups[position].1)
    }

    pub fn rate(&self, key: &K) -> Option<f64> {
        self.get(key).and_then(GroupStats::rate)
    }
}

impl<K> AggregationResult<K> {
    pub fn iter(&self) -> impl Iterator<Item = (&K, &GroupStats)> {
        self.groups.iter().map(|(key, stats)| (key, stats))
    }

    pub fn keys(&self) -> impl Iterator<Item = &K> {
        self.groups.iter().map(|(key, _)| key)
    }

    pub fn len(&self) -> usize {
        self.groups.len()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    pub fn total_count(&self) -> usize {
        self.groups.iter().map(|(_, stats)| stats.count).sum()
    }
}

struct GroupRow<'a, K>(&'a K, &'a GroupStats);

impl<K: Serialize> Serialize for GroupRow<'_, K> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut state = serializer.serialize_struct("GroupRow", 5)?;
        state.serialize_field("key", self.0)?;
        state.serialize_field("count", &self.1.count)?;
        state.serialize_field("labeled", &self.1.labeled)?;
        state.serialize_field("churned", &self.1.churned)?;
        state.serialize_field("rate", &self.1.rate())?;
        state.end()
    }
}

impl<K: Serialize> Serialize for AggregationResult<K> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_seq(self.groups.iter().map(|(key, stats)| GroupRow(key, stats)))
    }
}

/// Groups every record under `key_fn`.
pub fn group_by<'a, K, I, F>(records: I, key_fn: F) -> AggregationResult<K>
where
    K: Eq + Hash + Clone,
    I: IntoIterator<Item = &'a CustomerRecord>,
    F: Fn(&CustomerRecord) -> K,
{
    group_by_defined(records, |record| Some(key_fn(record)))
}

/// Like [`group_by`], but records whose key is `None` are left out.
pub fn group_by_defined<'a, K, I, F>(records: I, key_fn: F) -> AggregationResult<K>
where
    K: Eq + Hash + Clone,
    I: IntoIterator<Item = &'a CustomerRecord>,
    F: Fn(&CustomerRecord) -> Option<K>,
{
    let mut result = AggregationResult::default();
    for record in records {
        if let Some(key) = key_fn(record) {
            result.add(key, record);
        }
    }
    debug!(groups = result.len(), records = result.total_count(), "grouped records");
    result
}

/// Aggregates contiguous shards on scoped threads and merges them in shard
/// order, giving the same result (and key order) as [`group_by`].
pub fn group_by_partitioned<K, F>(
    records: &[CustomerRecord],
    shards: usize,
    key_fn: F,
) -> AggregationResult<K>
where
    K: Eq + Hash + Clone + Send,
    F: Fn(&CustomerRecord) -> K + Sync,
{
    if records.is_empty() {
        return AggregationResult::default();
    }
    let chunk = records.len().div_ceil(shards.max(1));
    let key_fn = &key_fn;

    let partials: Vec<AggregationResult<K>> = std::thread::scope(|scope| {
        let handles: Vec<_> = records
            .chunks(chunk)
            .map(|shard| scope.spawn(move || group_by(shard, key_fn)))
            .collect();
        handles
            .into_iter()
            .map(|handle| handle.join().unwrap_or_else(|panic| std::panic::resume_unwind(panic)))
            .collect()
    });

    let mut merged = AggregationResult::default();
    for partial in &partials {
        merged.merge(partial);
    }
    merged
}

pub fn flag_label(value: bool, yes: &'static str, no: &'static str) -> &'static str {
    if value {
        yes
    } else {
        no
    }
}

/// Exact service-call counts, unbinned.
pub fn by_service_calls<'a, I>(records: I) -> AggregationResult<u32>
where
    I: IntoIterator<Item = &'a CustomerRecord>,
{
    group_by(records, |record| record.customer_service_calls)
}

pub fn by_international_plan<'a, I>(records: I) -> AggregationResult<&'static str>
where
    I: IntoIterator<Item = &'a CustomerRecord>,
{
    group_by(records, |record| {
        flag_label(record.international_plan, "Intl Plan", "No Intl Plan")
    })
}

pub fn by_voice_mail_plan<'a, I>(records: I) -> AggregationResult<&'static str>
where
    I: IntoIterator<Item = &'a CustomerRecord>,
{
    group_by(records, |record| flag_label(record.voice_mail_plan, "VM Plan", "No VM Plan"))
}

/// International and voice-mail plan rates side by side. Each record appears
/// once per plan dimension, so counts sum to twice the record count.
pub fn plan_type_impact<'a, I>(records: I) -> AggregationResult<&'static str>
where
    I: IntoIterator<Item = &'a CustomerRecord> + Clone,
{
    let mut result =
        AggregationResult::with_keys(["No Intl Plan", "Intl Plan", "No VM Plan", "VM Plan"]);
    result.merge(&by_international_plan(records.clone()));
    result.merge(&by_voice_mail_plan(records));
    result
}

pub fn by_state<'a, I>(records: I) -> AggregationResult<String>
where
    I: IntoIterator<Item = &'a CustomerRecord>,
{
    group_by(records, |record| record.state.clone())
}

pub fn by_risk_category<'a, I>(
    records: I,
    thresholds: &RiskThresholds,
) -> AggregationResult<RiskCategory>
where
    I: IntoIterator<Item = &'a CustomerRecord>,
{
    let mut result = AggregationResult::with_keys(RiskCategory::ALL);
    result.merge(&group_by(records, |record| thresholds.classify(record.churn_risk_score)));
    result
}
