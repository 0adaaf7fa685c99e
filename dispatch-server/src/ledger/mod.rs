//! Ledger store: accounts and the append-only transaction log
//!
//! Balances change only through [`LedgerStore`]. Every mutation is a single
//! redb write transaction, so the balance check and the write never
//! interleave with another mutation. redb admits one write transaction per
//! database at a time: writes to all accounts are serialized store-wide,
//! not per account.

mod error;
mod storage;

pub use error::{LedgerError, LedgerResult};
pub use storage::LedgerStorage;

use rust_decimal::Decimal;
use shared::models::{Account, Transaction, TransactionStatus};

/// Durable account + transaction storage.
///
/// A trait so the settlement service can be exercised against stores that
/// fail on purpose.
pub trait LedgerStore: Send + Sync {
    /// Create the account if missing; returns the current state either way.
    fn open_account(&self, user_id: &str) -> LedgerResult<Account>;

    fn get_account(&self, user_id: &str) -> LedgerResult<Account>;

    /// `balance -= amount` if `balance >= amount`, else `InsufficientBalance`
    /// with nothing written. A missing account has balance zero.
    fn debit(&self, user_id: &str, amount: Decimal) -> LedgerResult<Account>;

    /// `balance += amount`, opening the account on first use
    fn credit(&self, user_id: &str, amount: Decimal) -> LedgerResult<Account>;

    /// Move `amount` from `balance` to `frozen_amount`
    fn freeze(&self, user_id: &str, amount: Decimal) -> LedgerResult<Account>;

    /// Move `amount` from `frozen_amount` back to `balance`
    fn unfreeze(&self, user_id: &str, amount: Decimal) -> LedgerResult<Account>;

    /// Drop `amount` from `frozen_amount` (money has left the system)
    fn release_frozen(&self, user_id: &str, amount: Decimal) -> LedgerResult<Account>;

    /// Write an immutable entry. Ids are unique: a second append with the
    /// same id fails with `DuplicateTransaction`.
    fn append_transaction(&self, tx: Transaction) -> LedgerResult<Transaction>;

    /// Move a `pending` entry to `completed` or `failed`
    fn finalize_transaction(
        &self,
        transaction_id: &str,
        status: TransactionStatus,
    ) -> LedgerResult<Transaction>;

    /// Record that the payout rail accepted a pending withdrawal
    fn mark_withdrawal_approved(&self, transaction_id: &str) -> LedgerResult<()>;

    /// Approved withdrawals whose settlement has not been written yet
    fn approved_withdrawals(&self) -> LedgerResult<Vec<String>>;

    /// Release the frozen amount, complete the entry and clear the approval,
    /// all in one write. An entry that is no longer `pending` only has its
    /// approval cleared.
    fn settle_withdrawal(&self, transaction_id: &str) -> LedgerResult<Transaction>;

    fn get_transaction(&self, transaction_id: &str) -> LedgerResult<Transaction>;

    /// Newest first
    fn transactions_for_user(&self, user_id: &str) -> LedgerResult<Vec<Transaction>>;

    fn transactions_for_order(&self, order_id: &str) -> LedgerResult<Vec<Transaction>>;
}
