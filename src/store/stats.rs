//! Reversible flip aggregates

use serde::{Deserialize, Serialize};

use crate::types::FlipRecord;

/// Aggregate over a set of flips. `add` and `subtract` are exact inverses so
/// a record can be moved between aggregates without rescanning.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Stats {
    pub flip_count: i64,
    pub gross_turnover: i64,
    pub net_profit: i64,
    pub tax_paid: i64,
}

impl Stats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, record: &FlipRecord) {
        self.flip_count += 1;
        self.gross_turnover += record.amount_spent();
        self.net_profit += record.profit();
        self.tax_paid += record.tax_paid();
    }

    pub fn subtract(&mut self, record: &FlipRecord) {
        self.flip_count -= 1;
        self.gross_turnover -= record.amount_spent();
        self.net_profit -= record.profit();
        self.tax_paid -= record.tax_paid();
    }

    pub fn merge(&mut self, other: &Stats) {
        self.flip_count += other.flip_count;
        self.gross_turnover += other.gross_turnover;
        self.net_profit += other.net_profit;
        self.tax_paid += other.tax_paid;
    }

    /// Detached copy
    pub fn snapshot(&self) -> Stats {
        *self
    }

    pub fn is_empty(&self) -> bool {
        self.flip_count == 0
    }

    /// Mean profit per flip, 0 when there are no flips
    pub fn average_profit(&self) -> i64 {
        if self.flip_count == 0 {
            0
        } else {
            self.net_profit / self.flip_count
        }
    }

    /// Profit over turnover, 0.0 when nothing was spent
    pub fn roi(&self) -> f64 {
        if self.gross_turnover == 0 {
            0.0
        } else {
            self.net_profit as f64 / self.gross_turnover as f64
        }
    }
}

impl<'a> FromIterator<&'a FlipRecord> for Stats {
    fn from_iter<I: IntoIterator<Item = &'a FlipRecord>>(iter: I) -> Self {
        let mut stats = Stats::new();
        for record in iter {
            stats.add(record);
        }
        stats
    }
}

impl std::fmt::Display for Stats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "flips={} turnover={} profit={} tax={} roi={:.2}%",
            self.flip_count,
            self.gross_turnover,
            self.net_profit,
            self.tax_paid,
            self.roi() * 100.0
        )
    }
}
