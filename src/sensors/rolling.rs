use std::fmt;

use chrono::NaiveDateTime;

/// Maximum number of days kept per metric.
pub const HISTORY_DAYS: usize = 7;

/// One day's value in a rolling history.
#[derive(Debug, Clone, PartialEq)]
pub struct HistoryEntry {
    pub value: f64,
    pub day: String,
}

/// Day-deduplicated, newest-first history of one metric.
///
/// Wire form: `"<value>:<day>,<value>:<day>,..."`, values to one decimal.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RollingHistory {
    entries: Vec<HistoryEntry>,
}

impl RollingHistory {
    /// Parse the stored form. Blank or malformed segments are skipped.
    pub fn parse(encoded: &str) -> Self {
        let entries = encoded
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .filter_map(|segment| {
                let (value, day) = segment.split_once(':')?;
                let value = value.trim().parse::<f64>().ok()?;
                Some(HistoryEntry {
                    value,
                    day: day.trim().to_owned(),
                })
            })
            .collect();
        Self { entries }
    }

    pub fn entries(&self) -> &[HistoryEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Fold one accepted value into the history.
    ///
    /// On a new day the value is prepended and the history truncated to
    /// [`HISTORY_DAYS`]; on the same day entry 0 is overwritten.
    pub fn record(&mut self, value: f64, today: &str, new_day: bool) {
        let entry = HistoryEntry {
            value,
            day: today.to_owned(),
        };

        if new_day {
            self.entries.insert(0, entry);
            self.entries.truncate(HISTORY_DAYS);
        } else if let Some(front) = self.entries.first_mut() {
            *front = entry;
        } else {
            self.entries.push(entry);
        }
    }
}

impl fmt::Display for RollingHistory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, entry) in self.entries.iter().enumerate() {
            if i > 0 {
                f.write_str(",")?;
            }
            write!(f, "{:.1}:{}", entry.value, entry.day)?;
        }
        Ok(())
    }
}

/// Day label used inside history entries, e.g. `16/Oct`.
pub fn day_label(now: NaiveDateTime) -> String {
    now.format("%d/%b").to_string()
}

/// Roll an encoded history forward by one value and re-encode it.
pub fn roll(current: &str, value: f64, now: NaiveDateTime, new_day: bool) -> String {
    let mut history = RollingHistory::parse(current);
    history.record(value, &day_label(now), new_day);
    history.to_string()
}
