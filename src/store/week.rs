//! Week buckets - one fixed-width time window of flips
//!
//! Each bucket keeps its flips partitioned by account, every partition sorted
//! ascending by `(closed_time, id)`, plus pre-aggregated stats for the whole
//! window and for each account. Interval queries combine whole buckets from
//! these aggregates and only scan the one bucket that straddles the cutoff.

use std::collections::HashMap;

use crate::store::stats::Stats;
use crate::types::{AccountId, FlipRecord, RecordId, MAX_RECORD_ID};

/// Default window width: one week
pub const WEEK_SECS: i64 = 7 * 24 * 60 * 60;

/// Start of the window containing `time`. Aligned to the epoch, so negative
/// timestamps round down like positive ones.
pub fn window_start(time: i64, width: i64) -> i64 {
    time - time.rem_euclid(width)
}

/// Account scope after display names have been resolved
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scope {
    All,
    Account(AccountId),
}

impl Scope {
    pub fn matches(&self, account_id: AccountId) -> bool {
        match self {
            Scope::All => true,
            Scope::Account(id) => *id == account_id,
        }
    }
}

#[derive(Debug, Clone)]
pub struct WeekBucket {
    window_start: i64,
    window_end: i64,
    all_stats: Stats,
    account_stats: HashMap<AccountId, Stats>,
    account_flips: HashMap<AccountId, Vec<FlipRecord>>,
}

impl WeekBucket {
    pub fn new(window_start: i64, width: i64) -> Self {
        Self {
            window_start,
            window_end: window_start + width,
            all_stats: Stats::new(),
            account_stats: HashMap::new(),
            account_flips: HashMap::new(),
        }
    }

    pub fn window_start(&self) -> i64 {
        self.window_start
    }

    pub fn window_end(&self) -> i64 {
        self.window_end
    }

    /// Stats over every account in the window
    pub fn stats(&self) -> Stats {
        self.all_stats
    }

    /// Stats for one account, zero if the account has no flips here
    pub fn account_stats(&self, account_id: AccountId) -> Stats {
        self.account_stats
            .get(&account_id)
            .copied()
            .unwrap_or_default()
    }

    pub fn scoped_stats(&self, scope: Scope) -> Stats {
        match scope {
            Scope::All => self.all_stats,
            Scope::Account(id) => self.account_stats(id),
        }
    }

    pub fn len(&self) -> usize {
        self.account_flips.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.account_flips.values().all(Vec::is_empty)
    }

    /// Sorted flips of one account, empty if unknown
    pub fn records_for_account(&self, account_id: AccountId) -> &[FlipRecord] {
        self.account_flips
            .get(&account_id)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Insert a flip at its sorted position and fold it into both stats levels
    pub fn insert(&mut self, record: FlipRecord) {
        let account_id = record.account_id();
        let key = record.sort_key();
        let flips = self.account_flips.entry(account_id).or_default();
        let stats = self.account_stats.entry(account_id).or_default();

        match flips.binary_search_by(|f| f.sort_key().cmp(&key)) {
            Ok(i) => {
                // Same id at the same close time: swap versions in place
                let old = std::mem::replace(&mut flips[i], record);
                stats.subtract(&old);
                self.all_stats.subtract(&old);
                stats.add(&flips[i]);
                self.all_stats.add(&flips[i]);
            }
            Err(i) => {
                stats.add(&record);
                self.all_stats.add(&record);
                flips.insert(i, record);
            }
        }
    }

    /// Remove the flip with this id stored at `(close_time, account_id)`.
    /// Returns `None` and changes nothing if it is not there.
    pub fn remove(
        &mut self,
        id: RecordId,
        close_time: i64,
        account_id: AccountId,
    ) -> Option<FlipRecord> {
        let flips = self.account_flips.get_mut(&account_id)?;
        let i = flips
            .binary_search_by(|f| f.sort_key().cmp(&(close_time, id)))
            .ok()?;
        let removed = flips.remove(i);

        self.all_stats.subtract(&removed);
        if let Some(stats) = self.account_stats.get_mut(&account_id) {
            stats.subtract(&removed);
        }
        Some(removed)
    }

    /// Flips of one account with `closed_time > time`, ascending
    pub fn records_after_for_account(&self, time: i64, account_id: AccountId) -> &[FlipRecord] {
        if self.window_end <= time {
            return &[];
        }
        let flips = self.records_for_account(account_id);
        if time < self.window_start {
            return flips;
        }
        let cut = match flips.binary_search_by(|f| f.sort_key().cmp(&(time, MAX_RECORD_ID))) {
            Ok(i) => i + 1,
            Err(i) => i,
        };
        &flips[cut..]
    }

    /// Flips of every account with `closed_time > time`. Accounts are simply
    /// concatenated unless `require_sorted` asks for one total order.
    pub fn records_after(&self, time: i64, require_sorted: bool) -> Vec<&FlipRecord> {
        if self.window_end <= time {
            return Vec::new();
        }
        let mut combined: Vec<&FlipRecord> = Vec::with_capacity(self.all_stats.flip_count as usize);
        for account_id in self.account_flips.keys() {
            combined.extend(self.records_after_for_account(time, *account_id));
        }
        if require_sorted {
            combined.sort_by_key(|f| f.sort_key());
        }
        combined
    }

    /// Flips in scope after `time`, sorted ascending
    pub fn scoped_records_after(&self, time: i64, scope: Scope) -> Vec<&FlipRecord> {
        match scope {
            Scope::All => self.records_after(time, true),
            Scope::Account(id) => self.records_after_for_account(time, id).iter().collect(),
        }
    }

    /// Number of flips `scoped_records_after` would return, without building
    /// the list when the whole window is past the cutoff
    pub fn count_after(&self, time: i64, scope: Scope) -> usize {
        if self.window_end <= time {
            return 0;
        }
        if time < self.window_start {
            return self.scoped_stats(scope).flip_count as usize;
        }
        match scope {
            Scope::All => self
                .account_flips
                .keys()
                .map(|id| self.records_after_for_account(time, *id).len())
                .sum(),
            Scope::Account(id) => self.records_after_for_account(time, id).len(),
        }
    }

    /// Stats of the flips in scope after `time`
    pub fn stats_after(&self, time: i64, scope: Scope) -> Stats {
        if self.window_end <= time {
            return Stats::new();
        }
        if time < self.window_start {
            return self.scoped_stats(scope);
        }
        match scope {
            Scope::All => self.records_after(time, false).into_iter().collect(),
            Scope::Account(id) => self.records_after_for_account(time, id).iter().collect(),
        }
    }

    /// Check ordering, id uniqueness, window bounds and stats consistency
    pub fn verify(&self) -> Result<(), String> {
        let mut all = Stats::new();
        for (account_id, flips) in &self.account_flips {
            for pair in flips.windows(2) {
                if pair[0].sort_key() >= pair[1].sort_key() {
                    return Err(format!(
                        "window {} account {}: {} not before {}",
                        self.window_start,
                        account_id,
                        pair[0].id(),
                        pair[1].id()
                    ));
                }
            }
            for flip in flips {
                if flip.closed_time() < self.window_start || flip.closed_time() >= self.window_end {
                    return Err(format!(
                        "window {}: flip {} closed at {} is out of bounds",
                        self.window_start,
                        flip.id(),
                        flip.closed_time()
                    ));
                }
                if flip.account_id() != *account_id {
                    return Err(format!("flip {} filed under account {}", flip.id(), account_id));
                }
            }
            let expected: Stats = flips.iter().collect();
            if expected != self.account_stats(*account_id) {
                return Err(format!(
                    "window {} account {}: stats drifted",
                    self.window_start, account_id
                ));
            }
            all.merge(&expected);
        }
        if all != self.all_stats {
            return Err(format!("window {}: all-account stats drifted", self.window_start));
        }
        Ok(())
    }
}

impl std::fmt::Display for WeekBucket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let start = chrono::DateTime::from_timestamp(self.window_start, 0).unwrap_or_default();
        write!(
            f,
            "WeekBucket[start={}, flips={}]",
            start.format("%Y-%m-%d"),
            self.all_stats.flip_count
        )
    }
}
