//! In-memory ledger with per-account locking

use async_trait::async_trait;
use chrono::Utc;
use kiln_core::fail_open::fail_open_with_retries;
use kiln_core::{AccountId, Credits, KilnError, ReservationId, Result};
use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex};
use tokio::sync::Mutex;
use tracing::{debug, error, info, instrument};

use crate::journal::TransactionJournal;
use crate::ledger::{
    CreditReservation, Ledger, ReservationState, Settlement, Transaction, TransactionKind,
};

/// Attempts per journal line before the write is dropped
const JOURNAL_ATTEMPTS: usize = 3;

#[derive(Debug, Default)]
struct Account {
    balance: Credits,
    reservations: HashMap<ReservationId, CreditReservation>,
    transactions: Vec<Transaction>,
}

impl Account {
    fn record(
        &mut self,
        account: &AccountId,
        kind: TransactionKind,
        amount: Credits,
        reason: &str,
        reservation: Option<ReservationId>,
    ) -> Transaction {
        let txn = Transaction::new(account.clone(), kind, amount, self.balance, reason, reservation);
        self.transactions.push(txn.clone());
        txn
    }
}

/// Ledger kept in process memory
///
/// Each account sits behind its own async mutex. The account map and the
/// reservation index use short synchronous locks that are never held across
/// an await.
#[derive(Debug, Default)]
pub struct InMemoryLedger {
    accounts: StdMutex<HashMap<AccountId, Arc<Mutex<Account>>>>,
    index: StdMutex<HashMap<ReservationId, AccountId>>,
    journal: Option<Arc<TransactionJournal>>,
}

impl InMemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Ledger seeded with starting balances
    pub fn with_balances<I, A>(balances: I) -> Self
    where
        I: IntoIterator<Item = (A, Credits)>,
        A: Into<AccountId>,
    {
        let ledger = Self::new();
        {
            let mut accounts = ledger.lock_accounts();
            for (account, balance) in balances {
                accounts.insert(
                    account.into(),
                    Arc::new(Mutex::new(Account {
                        balance,
                        ..Account::default()
                    })),
                );
            }
        }
        ledger
    }

    /// Mirror every transaction to a JSONL journal
    pub fn with_journal(mut self, journal: TransactionJournal) -> Self {
        self.journal = Some(Arc::new(journal));
        self
    }

    fn lock_accounts(&self) -> std::sync::MutexGuard<'_, HashMap<AccountId, Arc<Mutex<Account>>>> {
        self.accounts
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn lock_index(&self) -> std::sync::MutexGuard<'_, HashMap<ReservationId, AccountId>> {
        self.index
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn account(&self, account: &AccountId) -> Arc<Mutex<Account>> {
        Arc::clone(self.lock_accounts().entry(account.clone()).or_default())
    }

    fn existing_account(&self, account: &AccountId) -> Option<Arc<Mutex<Account>>> {
        self.lock_accounts().get(account).cloned()
    }

    fn owner_of(&self, id: ReservationId) -> Result<AccountId> {
        self.lock_index()
            .get(&id)
            .cloned()
            .ok_or_else(|| KilnError::ReservationNotFound(id.to_string()))
    }

    async fn journal(&self, txns: &[Transaction]) {
        let Some(journal) = &self.journal else {
            return;
        };
        for txn in txns {
            fail_open_with_retries("ledger_journal", || journal.append(txn), JOURNAL_ATTEMPTS).await;
        }
    }

    /// Resolve a reservation, charging `actual` (zero for a full refund)
    async fn resolve(&self, id: ReservationId, actual: Option<Credits>) -> Result<Settlement> {
        let owner = self.owner_of(id)?;
        let handle = self.account(&owner);
        let mut account = handle.lock().await;

        let reservation = account
            .reservations
            .get(&id)
            .cloned()
            .ok_or_else(|| KilnError::ReservationNotFound(id.to_string()))?;

        if reservation.state.is_resolved() {
            error!(
                account = %owner,
                reservation = %id,
                state = ?reservation.state,
                "ledger inconsistency: reservation resolved twice"
            );
            return Err(KilnError::AlreadyResolved(id.to_string()));
        }

        let charged = actual.unwrap_or(0);
        if charged > reservation.reserved {
            let msg = format!(
                "{}: actual cost {} exceeds reserved {}",
                id, charged, reservation.reserved
            );
            error!(account = %owner, "ledger inconsistency: {}", msg);
            return Err(KilnError::LedgerInconsistency(msg));
        }
        let refunded = reservation.reserved - charged;

        let new_balance = account.balance.checked_add(refunded).ok_or_else(|| {
            let msg = format!("{}: balance overflow on refund of {}", id, refunded);
            error!(account = %owner, "ledger inconsistency: {}", msg);
            KilnError::LedgerInconsistency(msg)
        })?;

        let mut txns = Vec::with_capacity(2);
        let state = match actual {
            Some(actual) => {
                txns.push(account.record(&owner, TransactionKind::Charge, actual, &reservation.reason, Some(id)));
                ReservationState::Committed { actual, refunded }
            }
            None => ReservationState::Refunded { amount: refunded },
        };
        account.balance = new_balance;
        if refunded > 0 || actual.is_none() {
            txns.push(account.record(&owner, TransactionKind::Refund, refunded, &reservation.reason, Some(id)));
        }

        let settled = account
            .reservations
            .get_mut(&id)
            .ok_or_else(|| KilnError::LedgerInconsistency(format!("{} vanished while resolving", id)))?;
        settled.state = state;
        let settlement = settled
            .settlement()
            .ok_or_else(|| KilnError::LedgerInconsistency(format!("{} unresolved after resolve", id)))?;

        info!(
            account = %owner,
            reservation = %id,
            committed = settlement.committed,
            refunded = settlement.refunded,
            balance = account.balance,
            "reservation resolved"
        );
        drop(account);

        self.journal(&txns).await;
        Ok(settlement)
    }
}

#[async_trait]
impl Ledger for InMemoryLedger {
    #[instrument(skip(self, account), fields(account = %account))]
    async fn reserve(&self, account: &AccountId, amount: Credits, reason: &str) -> Result<ReservationId> {
        let handle = self.account(account);
        let mut state = handle.lock().await;

        if amount > state.balance {
            debug!(required = amount, available = state.balance, "insufficient credits");
            return Err(KilnError::InsufficientCredits {
                required: amount,
                available: state.balance,
            });
        }

        let id = ReservationId::new();
        state.balance -= amount;
        state.reservations.insert(
            id,
            CreditReservation {
                id,
                account: account.clone(),
                reserved: amount,
                state: ReservationState::Reserved,
                reason: reason.to_string(),
                created_at: Utc::now(),
            },
        );
        let txn = state.record(account, TransactionKind::Reservation, amount, reason, Some(id));
        self.lock_index().insert(id, account.clone());

        info!(reservation = %id, amount, balance = state.balance, "credits reserved");
        drop(state);

        self.journal(&[txn]).await;
        Ok(id)
    }

    async fn commit(&self, id: ReservationId, actual: Credits) -> Result<Settlement> {
        self.resolve(id, Some(actual)).await
    }

    async fn refund(&self, id: ReservationId) -> Result<Settlement> {
        self.resolve(id, None).await
    }

    async fn balance(&self, account: &AccountId) -> Credits {
        match self.existing_account(account) {
            Some(handle) => handle.lock().await.balance,
            None => 0,
        }
    }

    async fn deposit(&self, account: &AccountId, amount: Credits, reason: &str) -> Result<Credits> {
        let handle = self.account(account);
        let mut state = handle.lock().await;

        state.balance = state.balance.checked_add(amount).ok_or_else(|| {
            KilnError::LedgerInconsistency(format!("balance overflow on deposit to {}", account))
        })?;
        let txn = state.record(account, TransactionKind::Deposit, amount, reason, None);
        let balance = state.balance;
        drop(state);

        debug!(account = %account, amount, balance, "credits deposited");
        self.journal(&[txn]).await;
        Ok(balance)
    }

    async fn reservation(&self, id: ReservationId) -> Option<CreditReservation> {
        let owner = self.owner_of(id).ok()?;
        let handle = self.existing_account(&owner)?;
        let state = handle.lock().await;
        state.reservations.get(&id).cloned()
    }

    async fn transactions(&self, account: &AccountId) -> Vec<Transaction> {
        match self.existing_account(account) {
            Some(handle) => handle.lock().await.transactions.clone(),
            None => Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracing_test::traced_test;

    fn acct() -> AccountId {
        AccountId::new("acct-1")
    }

    #[tokio::test]
    async fn test_reserve_decrements_balance() {
        let ledger = InMemoryLedger::with_balances([("acct-1", 20)]);
        let id = ledger.reserve(&acct(), 15, "build").await.unwrap();

        assert_eq!(ledger.balance(&acct()).await, 5);
        let reservation = ledger.reservation(id).await.unwrap();
        assert_eq!(reservation.reserved, 15);
        assert_eq!(reservation.state, ReservationState::Reserved);
    }

    #[tokio::test]
    async fn test_insufficient_credits() {
        let ledger = InMemoryLedger::with_balances([("acct-1", 1)]);
        let err = ledger.reserve(&acct(), 11, "build").await.unwrap_err();
        assert!(matches!(
            err,
            KilnError::InsufficientCredits { required: 11, available: 1 }
        ));
        assert_eq!(ledger.balance(&acct()).await, 1);
        assert!(ledger.transactions(&acct()).await.is_empty());
    }

    #[tokio::test]
    async fn test_unknown_account_has_zero_balance() {
        let ledger = InMemoryLedger::new();
        assert_eq!(ledger.balance(&AccountId::new("ghost")).await, 0);
        assert!(ledger.reserve(&AccountId::new("ghost"), 1, "build").await.is_err());
    }

    #[tokio::test]
    async fn test_commit_with_exact_amount_has_no_refund_txn() {
        let ledger = InMemoryLedger::with_balances([("acct-1", 20)]);
        let id = ledger.reserve(&acct(), 11, "build").await.unwrap();
        let settlement = ledger.commit(id, 11).await.unwrap();

        assert_eq!(settlement.refunded, 0);
        let kinds: Vec<_> = ledger
            .transactions(&acct())
            .await
            .into_iter()
            .map(|t| t.kind)
            .collect();
        assert_eq!(kinds, vec![TransactionKind::Reservation, TransactionKind::Charge]);
    }

    #[tokio::test]
    async fn test_deposit() {
        let ledger = InMemoryLedger::new();
        assert_eq!(ledger.deposit(&acct(), 20, "signup bonus").await.unwrap(), 20);
        assert_eq!(ledger.summary(&acct()).await.deposited, 20);
    }

    #[traced_test]
    #[tokio::test]
    async fn test_second_resolve_is_logged_and_changes_nothing() {
        let ledger = InMemoryLedger::with_balances([("acct-1", 20)]);
        let id = ledger.reserve(&acct(), 10, "build").await.unwrap();
        ledger.refund(id).await.unwrap();
        let before = ledger.transactions(&acct()).await.len();

        let err = ledger.commit(id, 3).await.unwrap_err();
        assert!(matches!(err, KilnError::AlreadyResolved(_)));
        assert!(logs_contain("reservation resolved twice"));
        assert_eq!(ledger.balance(&acct()).await, 20);
        assert_eq!(ledger.transactions(&acct()).await.len(), before);
    }

    #[tokio::test]
    async fn test_unknown_reservation() {
        let ledger = InMemoryLedger::new();
        let err = ledger.refund(ReservationId::new()).await.unwrap_err();
        assert!(matches!(err, KilnError::ReservationNotFound(_)));
    }
}
