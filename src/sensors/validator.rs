use std::collections::BTreeMap;

use serde_json::Value;

use super::source::RawReading;
use crate::{
    config::SourceKind,
    db::models::{Metric, SENTINEL},
};

/// Every tracked metric mapped to its value, or [`SENTINEL`] when the
/// source did not report a usable number.
pub type MergedReading = BTreeMap<Metric, f64>;

/// Combine the bodies of all sources into one record.
pub fn merge(bodies: &[(SourceKind, RawReading)]) -> MergedReading {
    let mut merged = MergedReading::new();
    for (kind, body) in bodies {
        for (key, metric) in kind.fields() {
            let value = body.get(*key).and_then(Value::as_f64).unwrap_or(SENTINEL);
            merged.insert(*metric, value);
        }
    }
    merged
}

/// `true` only when the record is non-empty and no metric holds the sentinel.
pub fn is_valid(merged: &MergedReading) -> bool {
    !merged.is_empty() && merged.values().all(|v| *v != SENTINEL)
}
