//! Per-account daily send counter with a date-keyed reset boundary.
//!
//! Not durable: counters restart at zero after a process restart. Bounded
//! by the wall-clock date, the worst case is under-sending.

use chrono::NaiveDate;
use std::collections::HashMap;

/// Messages-sent-today per account, for one campaign.
#[derive(Debug, Clone)]
pub struct DailyCounter {
    counts: HashMap<i64, u32>,
    last_reset: NaiveDate,
}

impl DailyCounter {
    pub fn new(today: NaiveDate) -> Self {
        Self { counts: HashMap::new(), last_reset: today }
    }

    pub fn increment(&mut self, account_id: i64) {
        *self.counts.entry(account_id).or_insert(0) += 1;
    }

    pub fn get(&self, account_id: i64) -> u32 {
        self.counts.get(&account_id).copied().unwrap_or(0)
    }

    /// Clear the whole map when the date key moved past `last_reset`.
    /// Returns true when a reset happened.
    pub fn reset_if_new_day(&mut self, today: NaiveDate) -> bool {
        if today != self.last_reset {
            self.counts.clear();
            self.last_reset = today;
            true
        } else {
            false
        }
    }

}
