//! Identity maps owned by the flip store

use std::collections::HashMap;

use crate::types::{AccountId, FlipRecord, ItemId, RecordId};

/// Where the current version of a flip is filed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordLocation {
    pub closed_time: i64,
    pub account_id: AccountId,
}

#[derive(Debug, Default)]
pub struct Identities {
    /// First-seen display name binding, never rebound
    display_names: HashMap<String, AccountId>,
    locations: HashMap<RecordId, RecordLocation>,
    /// Latest not-fully-closed flip per (account, item)
    open_positions: HashMap<(AccountId, ItemId), FlipRecord>,
}

impl Identities {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind a display name to an account if it is not bound yet.
    /// Returns true when a new binding was made.
    pub fn bind_display_name(&mut self, display_name: &str, account_id: AccountId) -> bool {
        if self.display_names.contains_key(display_name) {
            return false;
        }
        self.display_names
            .insert(display_name.to_string(), account_id);
        true
    }

    pub fn account_for(&self, display_name: &str) -> Option<AccountId> {
        self.display_names.get(display_name).copied()
    }

    pub fn display_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.display_names.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn location(&self, id: &RecordId) -> Option<RecordLocation> {
        self.locations.get(id).copied()
    }

    pub fn set_location(&mut self, record: &FlipRecord) {
        self.locations.insert(
            record.id(),
            RecordLocation {
                closed_time: record.closed_time(),
                account_id: record.account_id(),
            },
        );
    }

    pub fn record_count(&self) -> usize {
        self.locations.len()
    }

    /// Track a partially closed flip as the open position for its item, or
    /// drop the tracked position once a flip for that item fully closes.
    /// `previous` is where the flip was filed before this merge; a position
    /// it left behind under another account is dropped.
    pub fn track_position(&mut self, record: &FlipRecord, previous: Option<RecordLocation>) {
        if let Some(prev) = previous.filter(|p| p.account_id != record.account_id()) {
            let old_key = (prev.account_id, record.item_id());
            if self
                .open_positions
                .get(&old_key)
                .is_some_and(|f| f.id() == record.id())
            {
                self.open_positions.remove(&old_key);
            }
        }

        let key = (record.account_id(), record.item_id());
        if record.is_closed() {
            self.open_positions.remove(&key);
        } else {
            self.open_positions.insert(key, record.clone());
        }
    }

    pub fn open_position(&self, account_id: AccountId, item_id: ItemId) -> Option<&FlipRecord> {
        self.open_positions.get(&(account_id, item_id))
    }

    pub fn open_position_count(&self) -> usize {
        self.open_positions.len()
    }

    pub fn clear(&mut self) {
        self.display_names.clear();
        self.locations.clear();
        self.open_positions.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::RawFlip;
    use uuid::Uuid;

    fn make_flip(id: u128, item_id: ItemId, opened: i64, closed: i64) -> FlipRecord {
        make_flip_for(id, 3, item_id, opened, closed)
    }

    fn make_flip_for(
        id: u128,
        account_id: AccountId,
        item_id: ItemId,
        opened: i64,
        closed: i64,
    ) -> FlipRecord {
        RawFlip {
            id: Uuid::from_u128(id),
            account_id,
            item_id,
            item_name: "Dragon bones".to_string(),
            opened_time: 0,
            closed_time: 10,
            opened_quantity: opened,
            closed_quantity: closed,
            amount_spent: 2_000 * opened,
            amount_received_after_tax: 0,
            profit: 0,
            tax_paid: 0,
        }
        .try_into()
        .unwrap()
    }

    #[test]
    fn test_display_name_binding_is_first_seen() {
        let mut ids = Identities::new();
        assert!(ids.bind_display_name("Zezima", 1));
        assert!(!ids.bind_display_name("Zezima", 2));
        assert_eq!(ids.account_for("Zezima"), Some(1));
        assert_eq!(ids.account_for("Woox"), None);

        ids.bind_display_name("Alpha", 5);
        assert_eq!(ids.display_names(), vec!["Alpha", "Zezima"]);
    }

    #[test]
    fn test_open_position_tracking() {
        let mut ids = Identities::new();
        ids.track_position(&make_flip(1, 536, 100, 40), None);
        assert_eq!(ids.open_position(3, 536).map(|f| f.closed_quantity()), Some(40));

        ids.track_position(&make_flip(1, 536, 100, 70), None);
        assert_eq!(ids.open_position(3, 536).map(|f| f.closed_quantity()), Some(70));

        ids.track_position(&make_flip(2, 536, 100, 100), None);
        assert!(ids.open_position(3, 536).is_none());
        assert_eq!(ids.open_position_count(), 0);
    }

    #[test]
    fn test_position_follows_flip_to_new_account() {
        let mut ids = Identities::new();
        let before = make_flip_for(1, 3, 536, 100, 40);
        ids.track_position(&before, None);
        ids.set_location(&before);

        let moved = make_flip_for(1, 4, 536, 100, 60);
        let previous = ids.location(&moved.id());
        ids.track_position(&moved, previous);

        assert!(ids.open_position(3, 536).is_none());
        assert_eq!(ids.open_position(4, 536).map(|f| f.closed_quantity()), Some(60));
        assert_eq!(ids.open_position_count(), 1);
    }

    #[test]
    fn test_other_flip_position_survives_move() {
        let mut ids = Identities::new();
        let other = make_flip_for(2, 3, 536, 100, 10);
        ids.track_position(&other, None);

        // Flip 1 was never the tracked position under account 3
        let previous = Some(RecordLocation {
            closed_time: 10,
            account_id: 3,
        });
        ids.track_position(&make_flip_for(1, 4, 536, 100, 50), previous);

        assert_eq!(ids.open_position(3, 536).map(|f| f.id()), Some(Uuid::from_u128(2)));
        assert!(ids.open_position(4, 536).is_some());
    }
}
