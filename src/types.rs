//! Core types used throughout flipstore
//!
//! Defines flip records, live Grand Exchange transactions and account filters.

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;
use uuid::Uuid;

/// Stable internal identifier of a game account
pub type AccountId = i32;

/// Grand Exchange item identifier
pub type ItemId = i32;

/// Globally unique flip identifier
pub type RecordId = Uuid;

/// Largest possible record id. Used as a synthetic tie-breaker so that a
/// cutoff search lands after every record closed at the cutoff second.
pub const MAX_RECORD_ID: RecordId = Uuid::from_u128(u128::MAX);

/// Items priced below this pay no Grand Exchange tax
pub const GE_TAX_FREE_BELOW: i64 = 50;

/// Per-item tax cap
pub const GE_TAX_CAP: i64 = 5_000_000;

/// Grand Exchange sale tax: 2% of the unit price rounded down, zero for cheap
/// items and capped per item, multiplied by the quantity sold.
pub fn ge_tax(price: i64, quantity: i64) -> i64 {
    if price < GE_TAX_FREE_BELOW {
        return 0;
    }
    (price * 2 / 100).min(GE_TAX_CAP) * quantity
}

/// Reasons a flip cannot be constructed
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RecordError {
    #[error("quantities must be non-negative (opened={opened}, closed={closed})")]
    NegativeQuantity { opened: i64, closed: i64 },
    #[error("closed quantity {closed} exceeds opened quantity {opened}")]
    OverClosed { opened: i64, closed: i64 },
    #[error("closed time {closed} is before opened time {opened}")]
    ClosedBeforeOpened { opened: i64, closed: i64 },
}

/// Unvalidated flip fields, as produced by a loader or read from CSV.
///
/// Convert into a [`FlipRecord`] with `try_into()`; that is the only way to
/// obtain a record, so every record in the cache satisfies the quantity and
/// time invariants.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawFlip {
    pub id: RecordId,
    pub account_id: AccountId,
    pub item_id: ItemId,
    pub item_name: String,
    /// Seconds since epoch
    pub opened_time: i64,
    /// Seconds since epoch
    pub closed_time: i64,
    pub opened_quantity: i64,
    pub closed_quantity: i64,
    pub amount_spent: i64,
    pub amount_received_after_tax: i64,
    pub profit: i64,
    pub tax_paid: i64,
}

/// One closed or partially closed buy-then-sell cycle for one item on one
/// account. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FlipRecord {
    id: RecordId,
    account_id: AccountId,
    item_id: ItemId,
    item_name: String,
    opened_time: i64,
    closed_time: i64,
    opened_quantity: i64,
    closed_quantity: i64,
    amount_spent: i64,
    amount_received_after_tax: i64,
    profit: i64,
    tax_paid: i64,
    closed: bool,
}

impl TryFrom<RawFlip> for FlipRecord {
    type Error = RecordError;

    fn try_from(raw: RawFlip) -> Result<Self, Self::Error> {
        if raw.opened_quantity < 0 || raw.closed_quantity < 0 {
            return Err(RecordError::NegativeQuantity {
                opened: raw.opened_quantity,
                closed: raw.closed_quantity,
            });
        }
        if raw.closed_quantity > raw.opened_quantity {
            return Err(RecordError::OverClosed {
                opened: raw.opened_quantity,
                closed: raw.closed_quantity,
            });
        }
        if raw.closed_time < raw.opened_time {
            return Err(RecordError::ClosedBeforeOpened {
                opened: raw.opened_time,
                closed: raw.closed_time,
            });
        }

        Ok(Self {
            closed: raw.closed_quantity == raw.opened_quantity,
            id: raw.id,
            account_id: raw.account_id,
            item_id: raw.item_id,
            item_name: raw.item_name,
            opened_time: raw.opened_time,
            closed_time: raw.closed_time,
            opened_quantity: raw.opened_quantity,
            closed_quantity: raw.closed_quantity,
            amount_spent: raw.amount_spent,
            amount_received_after_tax: raw.amount_received_after_tax,
            profit: raw.profit,
            tax_paid: raw.tax_paid,
        })
    }
}

impl From<&FlipRecord> for RawFlip {
    fn from(record: &FlipRecord) -> Self {
        Self {
            id: record.id,
            account_id: record.account_id,
            item_id: record.item_id,
            item_name: record.item_name.clone(),
            opened_time: record.opened_time,
            closed_time: record.closed_time,
            opened_quantity: record.opened_quantity,
            closed_quantity: record.closed_quantity,
            amount_spent: record.amount_spent,
            amount_received_after_tax: record.amount_received_after_tax,
            profit: record.profit,
            tax_paid: record.tax_paid,
        }
    }
}

impl FlipRecord {
    pub fn id(&self) -> RecordId {
        self.id
    }

    pub fn account_id(&self) -> AccountId {
        self.account_id
    }

    pub fn item_id(&self) -> ItemId {
        self.item_id
    }

    pub fn item_name(&self) -> &str {
        &self.item_name
    }

    pub fn opened_time(&self) -> i64 {
        self.opened_time
    }

    pub fn closed_time(&self) -> i64 {
        self.closed_time
    }

    pub fn opened_quantity(&self) -> i64 {
        self.opened_quantity
    }

    pub fn closed_quantity(&self) -> i64 {
        self.closed_quantity
    }

    pub fn amount_spent(&self) -> i64 {
        self.amount_spent
    }

    pub fn amount_received_after_tax(&self) -> i64 {
        self.amount_received_after_tax
    }

    pub fn profit(&self) -> i64 {
        self.profit
    }

    pub fn tax_paid(&self) -> i64 {
        self.tax_paid
    }

    /// True once every opened unit has been sold
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Units bought but not yet sold
    pub fn remaining_quantity(&self) -> i64 {
        self.opened_quantity - self.closed_quantity
    }

    /// Ordering key inside a window: close time, then id
    pub fn sort_key(&self) -> (i64, RecordId) {
        (self.closed_time, self.id)
    }

    /// Close time as a UTC datetime (for display and logs)
    pub fn closed_at(&self) -> DateTime<Utc> {
        Utc.timestamp_opt(self.closed_time, 0)
            .single()
            .unwrap_or_default()
    }

    /// Average unit cost of the buy side
    pub fn avg_buy_price(&self) -> i64 {
        if self.opened_quantity == 0 {
            0
        } else {
            self.amount_spent / self.opened_quantity
        }
    }

    /// Marginal profit the given in-flight transaction would add to this
    /// position. Buys add nothing; a sell is capped at the units still held.
    pub fn calculate_profit(&self, tx: &Transaction) -> i64 {
        if tx.side == OfferSide::Buy || tx.item_id != self.item_id {
            return 0;
        }
        let quantity = tx.quantity.min(self.remaining_quantity()).max(0);
        if quantity == 0 {
            return 0;
        }
        let proceeds = tx.price * quantity - ge_tax(tx.price, quantity);
        proceeds - self.avg_buy_price() * quantity
    }
}

impl fmt::Display for FlipRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} x{}/{} profit={} closed={}",
            self.closed_at().format("%Y-%m-%d %H:%M"),
            self.item_name,
            self.closed_quantity,
            self.opened_quantity,
            self.profit,
            self.closed
        )
    }
}

/// Side of a Grand Exchange offer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OfferSide {
    Buy,
    Sell,
}

impl fmt::Display for OfferSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OfferSide::Buy => write!(f, "BUY"),
            OfferSide::Sell => write!(f, "SELL"),
        }
    }
}

/// A live fill observed before its flip is fully closed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    pub item_id: ItemId,
    pub side: OfferSide,
    pub quantity: i64,
    /// Unit price
    pub price: i64,
    /// Seconds since epoch
    pub time: i64,
}

/// Which accounts a query covers
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum AccountFilter {
    /// Every account
    #[default]
    All,
    /// One account by id
    Account(AccountId),
    /// One account by display name, resolved on every use
    DisplayName(String),
}

impl AccountFilter {
    /// Filter for an optional display name: `None` means all accounts
    pub fn from_display_name(name: Option<&str>) -> Self {
        match name {
            Some(name) => AccountFilter::DisplayName(name.to_string()),
            None => AccountFilter::All,
        }
    }
}

impl fmt::Display for AccountFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AccountFilter::All => write!(f, "all"),
            AccountFilter::Account(id) => write!(f, "account:{}", id),
            AccountFilter::DisplayName(name) => write!(f, "name:{}", name),
        }
    }
}
