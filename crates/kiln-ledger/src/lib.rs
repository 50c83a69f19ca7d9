//! # kiln-ledger
//!
//! Credit accounting for builds. A build reserves its worst-case cost before
//! any agent runs, then resolves the reservation exactly once: `commit` charges
//! the actual cost and refunds the rest, `refund` releases everything.
//!
//! Every balance change appends a [`Transaction`], optionally mirrored to a
//! JSONL [`TransactionJournal`].

mod journal;
mod ledger;
mod memory;

pub use journal::TransactionJournal;
pub use ledger::{
    CreditReservation, Ledger, ReservationState, Settlement, Transaction, TransactionKind,
    TransactionSummary,
};
pub use memory::InMemoryLedger;
