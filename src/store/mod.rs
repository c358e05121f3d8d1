//! Flip Store - bucketed cache of a user's flip history
//!
//! An active player can accumulate hundreds of thousands of flips, far too
//! many to filter and re-aggregate on every UI interaction. The store keeps
//! pre-computed weekly buckets of flips and stats. Any interval is answered
//! by combining whole buckets and scanning only the bucket that straddles the
//! interval start.
//!
//! Key properties:
//! - **Relocation**: a flip merged again with a new close time (further
//!   fills) is moved to its new bucket, never duplicated
//! - **Live interval stats**: the active filter's stats are adjusted on every
//!   merge instead of being recomputed
//! - **Epoch cancellation**: `reset()` bumps an epoch so loads that started
//!   before the reset can be discarded
//!
//! Every public method takes one lock for its whole duration. The change
//! callback runs after the lock is released.

mod identity;
mod stats;
mod week;

pub use stats::Stats;
pub use week::{window_start, Scope, WeekBucket, WEEK_SECS};

use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use tracing::{debug, info};

use crate::types::{AccountFilter, FlipRecord, Transaction};
use identity::Identities;

/// Zero-argument change notification
pub type ChangeCallback = Arc<dyn Fn() + Send + Sync>;

/// The active interval: which accounts, and flips closed strictly after
/// `start_time`
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct IntervalFilter {
    pub accounts: AccountFilter,
    pub start_time: i64,
}

pub struct FlipStore {
    state: Mutex<StoreState>,
    on_change: RwLock<Option<ChangeCallback>>,
}

struct StoreState {
    window_secs: i64,
    /// Sorted and unique by window start
    weeks: Vec<WeekBucket>,
    identities: Identities,
    filter: IntervalFilter,
    interval_stats: Stats,
    epoch: u64,
    /// Set once a load has been applied in the current epoch
    loaded: bool,
}

impl FlipStore {
    pub fn new() -> Self {
        Self::with_window_secs(WEEK_SECS)
    }

    /// Store with a custom bucket width. Panics if `window_secs` is not positive.
    pub fn with_window_secs(window_secs: i64) -> Self {
        assert!(window_secs > 0, "window width must be positive");
        Self {
            state: Mutex::new(StoreState {
                window_secs,
                weeks: Vec::with_capacity(52 * 5),
                identities: Identities::new(),
                filter: IntervalFilter::default(),
                interval_stats: Stats::new(),
                epoch: 0,
                loaded: false,
            }),
            on_change: RwLock::new(None),
        }
    }

    /// Install the change notification, replacing any previous one
    pub fn set_on_change<F>(&self, callback: F)
    where
        F: Fn() + Send + Sync + 'static,
    {
        if let Ok(mut slot) = self.on_change.write() {
            *slot = Some(Arc::new(callback));
        }
    }

    fn state(&self) -> MutexGuard<'_, StoreState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn notify(&self) {
        let callback = self.on_change.read().ok().and_then(|slot| slot.clone());
        if let Some(callback) = callback {
            callback();
        }
    }

    /// Merge a batch of flips. The display name, if any, is bound to the
    /// account of the first flip unless it is already bound.
    pub fn merge(&self, records: Vec<FlipRecord>, display_name: Option<&str>) {
        if records.is_empty() {
            return;
        }
        self.state().merge_batch(records, display_name);
        self.notify();
    }

    /// Merge only if no reset happened since `epoch` was read. Returns false
    /// when the batch is stale and was discarded.
    pub fn merge_if_current(
        &self,
        epoch: u64,
        records: Vec<FlipRecord>,
        display_name: Option<&str>,
    ) -> bool {
        {
            let mut state = self.state();
            if state.epoch != epoch {
                return false;
            }
            state.loaded = true;
            if records.is_empty() {
                return true;
            }
            state.merge_batch(records, display_name);
        }
        self.notify();
        true
    }

    /// Replace the active filter and recompute its stats
    pub fn set_filter(&self, accounts: AccountFilter, start_time: i64) {
        self.state().apply_filter(IntervalFilter {
            accounts,
            start_time,
        });
        self.notify();
    }

    /// Change only the account part of the filter. No-op if unchanged.
    pub fn set_account_filter(&self, accounts: AccountFilter) {
        {
            let mut state = self.state();
            if state.filter.accounts == accounts {
                return;
            }
            let start_time = state.filter.start_time;
            state.apply_filter(IntervalFilter {
                accounts,
                start_time,
            });
        }
        self.notify();
    }

    /// Change only the interval start. No-op if unchanged.
    pub fn set_start_time(&self, start_time: i64) {
        {
            let mut state = self.state();
            if state.filter.start_time == start_time {
                return;
            }
            let accounts = state.filter.accounts.clone();
            state.apply_filter(IntervalFilter {
                accounts,
                start_time,
            });
        }
        self.notify();
    }

    pub fn filter(&self) -> IntervalFilter {
        self.state().filter.clone()
    }

    /// Stats of the active filter
    pub fn get_stats(&self) -> Stats {
        self.state().interval_stats.snapshot()
    }

    /// Stats for any filter, leaving the active one untouched
    pub fn calculate_stats(&self, accounts: &AccountFilter, start_time: i64) -> Stats {
        let state = self.state();
        match state.resolve(accounts) {
            Some(scope) => state.calculate_stats(scope, start_time),
            None => Stats::new(),
        }
    }

    /// One page of the active filter's flips, newest first. Pages start at 1.
    pub fn get_page(&self, page_number: usize, page_size: usize) -> Vec<FlipRecord> {
        self.state().page(page_number, page_size)
    }

    pub fn get_known_display_names(&self) -> Vec<String> {
        self.state().identities.display_names()
    }

    /// Provisional profit of a live transaction against the tracked open
    /// position for its item, 0 if none is tracked
    pub fn estimate_profit(&self, display_name: &str, transaction: &Transaction) -> i64 {
        let state = self.state();
        state
            .identities
            .account_for(display_name)
            .and_then(|account_id| {
                state
                    .identities
                    .open_position(account_id, transaction.item_id)
            })
            .map(|flip| flip.calculate_profit(transaction))
            .unwrap_or(0)
    }

    /// Drop everything and start a new epoch
    pub fn reset(&self) {
        {
            let mut state = self.state();
            state.weeks.clear();
            state.identities.clear();
            state.filter = IntervalFilter::default();
            state.interval_stats = Stats::new();
            state.loaded = false;
            state.epoch += 1;
            info!(epoch = state.epoch, "[STORE] Reset");
        }
        self.notify();
    }

    pub fn epoch(&self) -> u64 {
        self.state().epoch
    }

    /// True once a load has been applied since the last reset
    pub fn is_loaded(&self) -> bool {
        self.state().loaded
    }

    pub fn record_count(&self) -> usize {
        self.state().identities.record_count()
    }

    pub fn bucket_count(&self) -> usize {
        self.state().weeks.len()
    }

    pub fn window_secs(&self) -> i64 {
        self.state().window_secs
    }

    /// Check bucket ordering, per-bucket invariants and that the live stats
    /// equal a full recompute
    pub fn verify(&self) -> Result<(), String> {
        let state = self.state();
        for pair in state.weeks.windows(2) {
            if pair[0].window_start() >= pair[1].window_start() {
                return Err(format!(
                    "buckets out of order: {} then {}",
                    pair[0].window_start(),
                    pair[1].window_start()
                ));
            }
        }
        let mut stored = 0;
        for week in &state.weeks {
            week.verify()?;
            stored += week.len();
        }
        if stored != state.identities.record_count() {
            return Err(format!(
                "{} flips stored but {} ids tracked",
                stored,
                state.identities.record_count()
            ));
        }
        let expected = match state.resolve(&state.filter.accounts) {
            Some(scope) => state.calculate_stats(scope, state.filter.start_time),
            None => Stats::new(),
        };
        if expected != state.interval_stats {
            return Err(format!(
                "live stats {} differ from recompute {}",
                state.interval_stats, expected
            ));
        }
        Ok(())
    }
}

impl Default for FlipStore {
    fn default() -> Self {
        Self::new()
    }
}

impl StoreState {
    /// `None` when the filter names an unknown display name: matches nothing
    fn resolve(&self, accounts: &AccountFilter) -> Option<Scope> {
        match accounts {
            AccountFilter::All => Some(Scope::All),
            AccountFilter::Account(id) => Some(Scope::Account(*id)),
            AccountFilter::DisplayName(name) => {
                self.identities.account_for(name).map(Scope::Account)
            }
        }
    }

    fn merge_batch(&mut self, records: Vec<FlipRecord>, display_name: Option<&str>) {
        let scope_before = self.resolve(&self.filter.accounts);
        if let (Some(name), Some(first)) = (display_name, records.first()) {
            self.identities
                .bind_display_name(name, first.account_id());
        }
        let scope = self.resolve(&self.filter.accounts);
        // The active display name just got bound: live stats were computed
        // against nothing, so rebuild them once the batch is in.
        let rebind = scope != scope_before;

        let batch = records.len();
        let mut relocated = 0;
        for record in records {
            if self.merge_one(record, if rebind { None } else { scope }) {
                relocated += 1;
            }
        }
        if rebind {
            self.recalculate_interval_stats();
        }
        debug!(
            batch,
            relocated,
            total = self.identities.record_count(),
            open_positions = self.identities.open_position_count(),
            "[STORE] Merged flips"
        );
    }

    /// Insert or relocate one flip. Returns true if an older version moved.
    fn merge_one(&mut self, record: FlipRecord, scope: Option<Scope>) -> bool {
        let start_time = self.filter.start_time;
        let qualifies = |flip: &FlipRecord| {
            scope.map_or(false, |s| s.matches(flip.account_id())) && flip.closed_time() > start_time
        };

        let mut relocated = false;
        let previous = self.identities.location(&record.id());
        if let Some(prev) = previous {
            let ws = window_start(prev.closed_time, self.window_secs);
            if let Ok(i) = self.week_index(ws) {
                if let Some(removed) =
                    self.weeks[i].remove(record.id(), prev.closed_time, prev.account_id)
                {
                    if qualifies(&removed) {
                        self.interval_stats.subtract(&removed);
                    }
                    relocated = true;
                }
            }
        }

        if qualifies(&record) {
            self.interval_stats.add(&record);
        }
        self.identities.track_position(&record, previous);
        self.identities.set_location(&record);

        let i = self.get_or_init_week(record.closed_time());
        self.weeks[i].insert(record);
        relocated
    }

    fn week_index(&self, ws: i64) -> Result<usize, usize> {
        self.weeks.binary_search_by_key(&ws, |w| w.window_start())
    }

    fn get_or_init_week(&mut self, time: i64) -> usize {
        let ws = window_start(time, self.window_secs);
        match self.week_index(ws) {
            Ok(i) => i,
            Err(i) => {
                self.weeks.insert(i, WeekBucket::new(ws, self.window_secs));
                i
            }
        }
    }

    /// Index of the first bucket that can hold flips after `start_time`
    fn first_week_after(&self, start_time: i64) -> usize {
        match self.week_index(window_start(start_time, self.window_secs)) {
            Ok(i) | Err(i) => i,
        }
    }

    fn apply_filter(&mut self, filter: IntervalFilter) {
        self.filter = filter;
        self.recalculate_interval_stats();
    }

    fn recalculate_interval_stats(&mut self) {
        self.interval_stats = match self.resolve(&self.filter.accounts) {
            Some(scope) => self.calculate_stats(scope, self.filter.start_time),
            None => Stats::new(),
        };
        debug!(
            accounts = %self.filter.accounts,
            start_time = self.filter.start_time,
            flips = self.interval_stats.flip_count,
            profit = self.interval_stats.net_profit,
            "[STORE] Interval stats recalculated"
        );
    }

    /// Partial scan of the boundary bucket plus whole-bucket stats after it
    fn calculate_stats(&self, scope: Scope, start_time: i64) -> Stats {
        let first = self.first_week_after(start_time);
        let mut stats = Stats::new();
        for week in &self.weeks[first..] {
            stats.merge(&week.stats_after(start_time, scope));
        }
        stats
    }

    fn page(&self, page_number: usize, page_size: usize) -> Vec<FlipRecord> {
        if page_number == 0 || page_size == 0 {
            return Vec::new();
        }
        let Some(scope) = self.resolve(&self.filter.accounts) else {
            return Vec::new();
        };
        let start_time = self.filter.start_time;
        let mut to_skip = (page_number - 1).saturating_mul(page_size);
        let mut result = Vec::with_capacity(page_size);

        let first = self.first_week_after(start_time);
        for week in self.weeks[first..].iter().rev() {
            if result.len() == page_size || week.window_end() <= start_time {
                break;
            }
            let n = week.count_after(start_time, scope);
            if n <= to_skip {
                to_skip -= n;
                continue;
            }
            let flips = week.scoped_records_after(start_time, scope);
            let end = n - to_skip;
            let begin = end.saturating_sub(page_size - result.len());
            result.extend(flips[begin..end].iter().rev().map(|f| (*f).clone()));
            to_skip = 0;
        }
        result
    }
}
