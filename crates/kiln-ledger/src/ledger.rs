//! Ledger trait and records

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use kiln_core::{AccountId, Credits, ReservationId, Result};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Lifecycle of a reservation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "lowercase")]
pub enum ReservationState {
    Reserved,
    Committed { actual: Credits, refunded: Credits },
    Refunded { amount: Credits },
}

impl ReservationState {
    pub fn is_resolved(&self) -> bool {
        !matches!(self, Self::Reserved)
    }
}

/// Hold on an account's balance for one build
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreditReservation {
    pub id: ReservationId,
    pub account: AccountId,
    pub reserved: Credits,
    pub state: ReservationState,
    pub reason: String,
    pub created_at: DateTime<Utc>,
}

impl CreditReservation {
    /// Settlement of a resolved reservation
    pub fn settlement(&self) -> Option<Settlement> {
        let (committed, refunded) = match self.state {
            ReservationState::Reserved => return None,
            ReservationState::Committed { actual, refunded } => (actual, refunded),
            ReservationState::Refunded { amount } => (0, amount),
        };
        Some(Settlement {
            reservation: self.id,
            reserved: self.reserved,
            committed,
            refunded,
        })
    }
}

/// How a reservation was resolved; `committed + refunded == reserved`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Settlement {
    pub reservation: ReservationId,
    pub reserved: Credits,
    pub committed: Credits,
    pub refunded: Credits,
}

impl Settlement {
    pub fn is_balanced(&self) -> bool {
        self.committed + self.refunded == self.reserved
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransactionKind {
    /// Credits moved from the balance into a hold
    Reservation,
    /// Held credits consumed by work
    Charge,
    /// Held credits returned to the balance
    Refund,
    /// Credits added (signup bonus, purchase)
    Deposit,
}

impl std::fmt::Display for TransactionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Reservation => write!(f, "reservation"),
            Self::Charge => write!(f, "charge"),
            Self::Refund => write!(f, "refund"),
            Self::Deposit => write!(f, "deposit"),
        }
    }
}

/// Audit record of one ledger mutation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    pub id: Uuid,
    pub account: AccountId,
    pub kind: TransactionKind,
    pub amount: Credits,
    pub balance_after: Credits,
    pub reason: String,
    pub reservation: Option<ReservationId>,
    pub timestamp: DateTime<Utc>,
}

impl Transaction {
    pub fn new(
        account: AccountId,
        kind: TransactionKind,
        amount: Credits,
        balance_after: Credits,
        reason: impl Into<String>,
        reservation: Option<ReservationId>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            account,
            kind,
            amount,
            balance_after,
            reason: reason.into(),
            reservation,
            timestamp: Utc::now(),
        }
    }
}

/// Totals over an account's history
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionSummary {
    pub reserved: Credits,
    pub charged: Credits,
    pub refunded: Credits,
    pub deposited: Credits,
    /// reserved minus refunded
    pub net_usage: Credits,
    pub transaction_count: usize,
}

impl TransactionSummary {
    pub fn from_transactions(transactions: &[Transaction]) -> Self {
        let mut summary = Self {
            transaction_count: transactions.len(),
            ..Self::default()
        };
        for txn in transactions {
            match txn.kind {
                TransactionKind::Reservation => summary.reserved += txn.amount,
                TransactionKind::Charge => summary.charged += txn.amount,
                TransactionKind::Refund => summary.refunded += txn.amount,
                TransactionKind::Deposit => summary.deposited += txn.amount,
            }
        }
        summary.net_usage = summary.reserved.saturating_sub(summary.refunded);
        summary
    }
}

/// Credit ledger
///
/// Operations on one account are serialized; different accounts never
/// contend.
#[async_trait]
pub trait Ledger: Send + Sync {
    /// Hold `amount` credits; fails with `InsufficientCredits` when the balance is short
    async fn reserve(&self, account: &AccountId, amount: Credits, reason: &str) -> Result<ReservationId>;

    /// Charge `actual` and refund the rest of the hold
    async fn commit(&self, id: ReservationId, actual: Credits) -> Result<Settlement>;

    /// Release the whole hold
    async fn refund(&self, id: ReservationId) -> Result<Settlement>;

    async fn balance(&self, account: &AccountId) -> Credits;

    /// Add credits, returning the new balance
    async fn deposit(&self, account: &AccountId, amount: Credits, reason: &str) -> Result<Credits>;

    async fn reservation(&self, id: ReservationId) -> Option<CreditReservation>;

    /// History for an account, oldest first
    async fn transactions(&self, account: &AccountId) -> Vec<Transaction>;

    async fn summary(&self, account: &AccountId) -> TransactionSummary {
        TransactionSummary::from_transactions(&self.transactions(account).await)
    }
}
