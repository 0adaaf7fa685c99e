//! redb-backed ledger
//!
//! # Tables
//!
//! | Table | Key | Value | Purpose |
//! |-------|-----|-------|---------|
//! | `accounts` | `user_id` | `Account` | Balances |
//! | `transactions` | `transaction_id` | `Transaction` | Append-only log |
//! | `user_transactions` | `(user_id, seq)` | `transaction_id` | Per-user history |
//! | `order_transactions` | `(order_id, seq)` | `transaction_id` | Per-order history |
//! | `ledger_sequence` | `"seq"` | `u64` | Append order |
//! | `approved_withdrawals` | `transaction_id` | approved at (ms) | Paid out, not yet settled |

use redb::{Database, ReadableDatabase, ReadableTable, TableDefinition, WriteTransaction};
use rust_decimal::Decimal;
use shared::models::{Account, Transaction, TransactionStatus};
use shared::util::now_millis;
use std::path::Path;
use std::sync::Arc;

use super::{LedgerError, LedgerResult, LedgerStore};
use crate::db::{StorageResult, decode, encode, open_database};
use crate::ledger_log;

const ACCOUNTS_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("accounts");

const TRANSACTIONS_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("transactions");

const USER_TRANSACTIONS_TABLE: TableDefinition<(&str, u64), &str> =
    TableDefinition::new("user_transactions");

const ORDER_TRANSACTIONS_TABLE: TableDefinition<(&str, u64), &str> =
    TableDefinition::new("order_transactions");

const SEQUENCE_TABLE: TableDefinition<&str, u64> = TableDefinition::new("ledger_sequence");

const SEQUENCE_KEY: &str = "seq";

const APPROVED_WITHDRAWALS_TABLE: TableDefinition<&str, i64> =
    TableDefinition::new("approved_withdrawals");

/// Ledger storage backed by redb
#[derive(Clone)]
pub struct LedgerStorage {
    db: Arc<Database>,
}

impl LedgerStorage {
    /// Open or create the ledger database at the given path
    pub fn open(path: impl AsRef<Path>) -> StorageResult<Self> {
        Self::init(open_database(path)?)
    }

    /// Open an in-memory database (for testing)
    #[cfg(test)]
    pub fn open_in_memory() -> StorageResult<Self> {
        Self::init(crate::db::open_in_memory()?)
    }

    fn init(db: Database) -> StorageResult<Self> {
        let write_txn = db.begin_write()?;
        {
            let _ = write_txn.open_table(ACCOUNTS_TABLE)?;
            let _ = write_txn.open_table(TRANSACTIONS_TABLE)?;
            let _ = write_txn.open_table(USER_TRANSACTIONS_TABLE)?;
            let _ = write_txn.open_table(ORDER_TRANSACTIONS_TABLE)?;
            let _ = write_txn.open_table(APPROVED_WITHDRAWALS_TABLE)?;

            let mut seq_table = write_txn.open_table(SEQUENCE_TABLE)?;
            if seq_table.get(SEQUENCE_KEY)?.is_none() {
                seq_table.insert(SEQUENCE_KEY, 0u64)?;
            }
        }
        write_txn.commit()?;

        Ok(Self { db: Arc::new(db) })
    }

    /// Load, check and rewrite one account inside a single write transaction.
    ///
    /// If `f` fails the transaction is aborted and nothing is written.
    fn mutate_account<F>(&self, user_id: &str, create: bool, f: F) -> LedgerResult<Account>
    where
        F: FnOnce(&mut Account) -> LedgerResult<()>,
    {
        let txn = self.db.begin_write()?;
        let result = Self::mutate_in(&txn, user_id, create, f);
        match result {
            Ok(account) => {
                txn.commit()?;
                Ok(account)
            }
            Err(e) => {
                txn.abort()?;
                Err(e)
            }
        }
    }

    fn mutate_in<F>(
        txn: &WriteTransaction,
        user_id: &str,
        create: bool,
        f: F,
    ) -> LedgerResult<Account>
    where
        F: FnOnce(&mut Account) -> LedgerResult<()>,
    {
        let mut table = txn.open_table(ACCOUNTS_TABLE)?;
        let existing: Option<Account> = match table.get(user_id)? {
            Some(guard) => Some(decode(guard.value())?),
            None => None,
        };
        let now = now_millis();
        let mut account = match existing {
            Some(account) => account,
            None if create => Account::new(user_id, now),
            None => return Err(LedgerError::AccountNotFound(user_id.to_string())),
        };
        f(&mut account)?;
        // total() must stay representable
        add_amounts(user_id, account.balance, account.frozen_amount)?;
        account.updated_at = now;
        table.insert(user_id, encode(&account)?.as_slice())?;
        Ok(account)
    }

    fn next_sequence(txn: &WriteTransaction) -> LedgerResult<u64> {
        let mut table = txn.open_table(SEQUENCE_TABLE)?;
        let current = table
            .get(SEQUENCE_KEY)?
            .map(|guard| guard.value())
            .unwrap_or(0);
        let next = current + 1;
        table.insert(SEQUENCE_KEY, next)?;
        Ok(next)
    }

    fn load_indexed(
        &self,
        index: TableDefinition<'static, (&'static str, u64), &'static str>,
        key: &str,
    ) -> LedgerResult<Vec<Transaction>> {
        let read_txn = self.db.begin_read()?;
        let index_table = read_txn.open_table(index)?;
        let tx_table = read_txn.open_table(TRANSACTIONS_TABLE)?;

        let mut transactions = Vec::new();
        for result in index_table.range((key, 0u64)..=(key, u64::MAX))? {
            let (_key, value) = result?;
            let tx_id = value.value();
            let guard = tx_table.get(tx_id)?.ok_or_else(|| {
                crate::db::StorageError::DanglingIndex(format!("transaction {}", tx_id))
            })?;
            transactions.push(decode::<Transaction>(guard.value())?);
        }
        Ok(transactions)
    }
}

fn add_amounts(user_id: &str, a: Decimal, b: Decimal) -> LedgerResult<Decimal> {
    a.checked_add(b).ok_or_else(|| LedgerError::AmountOverflow {
        user_id: user_id.to_string(),
    })
}

fn ensure_positive(amount: Decimal) -> LedgerResult<()> {
    if amount <= Decimal::ZERO {
        return Err(LedgerError::InvalidAmount(amount));
    }
    Ok(())
}

impl LedgerStore for LedgerStorage {
    fn open_account(&self, user_id: &str) -> LedgerResult<Account> {
        self.mutate_account(user_id, true, |_| Ok(()))
    }

    fn get_account(&self, user_id: &str) -> LedgerResult<Account> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(ACCOUNTS_TABLE)?;
        match table.get(user_id)? {
            Some(guard) => Ok(decode(guard.value())?),
            None => Err(LedgerError::AccountNotFound(user_id.to_string())),
        }
    }

    fn debit(&self, user_id: &str, amount: Decimal) -> LedgerResult<Account> {
        ensure_positive(amount)?;
        let account = self.mutate_account(user_id, true, |account| {
            if account.balance < amount {
                return Err(LedgerError::InsufficientBalance {
                    user_id: user_id.to_string(),
                    requested: amount,
                    available: account.balance,
                });
            }
            account.balance -= amount;
            Ok(())
        })?;
        ledger_log!("debit", user_id = user_id, amount = %amount, balance = %account.balance);
        Ok(account)
    }

    fn credit(&self, user_id: &str, amount: Decimal) -> LedgerResult<Account> {
        ensure_positive(amount)?;
        let account = self.mutate_account(user_id, true, |account| {
            account.balance = add_amounts(user_id, account.balance, amount)?;
            Ok(())
        })?;
        ledger_log!("credit", user_id = user_id, amount = %amount, balance = %account.balance);
        Ok(account)
    }

    fn freeze(&self, user_id: &str, amount: Decimal) -> LedgerResult<Account> {
        ensure_positive(amount)?;
        let account = self.mutate_account(user_id, true, |account| {
            if account.balance < amount {
                return Err(LedgerError::InsufficientBalance {
                    user_id: user_id.to_string(),
                    requested: amount,
                    available: account.balance,
                });
            }
            account.frozen_amount = add_amounts(user_id, account.frozen_amount, amount)?;
            account.balance -= amount;
            Ok(())
        })?;
        ledger_log!("freeze", user_id = user_id, amount = %amount, frozen = %account.frozen_amount);
        Ok(account)
    }

    fn unfreeze(&self, user_id: &str, amount: Decimal) -> LedgerResult<Account> {
        ensure_positive(amount)?;
        let account = self.mutate_account(user_id, false, |account| {
            if account.frozen_amount < amount {
                return Err(LedgerError::FrozenUnderflow {
                    user_id: user_id.to_string(),
                    requested: amount,
                    frozen: account.frozen_amount,
                });
            }
            account.balance = add_amounts(user_id, account.balance, amount)?;
            account.frozen_amount -= amount;
            Ok(())
        })?;
        ledger_log!("unfreeze", user_id = user_id, amount = %amount, balance = %account.balance);
        Ok(account)
    }

    fn release_frozen(&self, user_id: &str, amount: Decimal) -> LedgerResult<Account> {
        ensure_positive(amount)?;
        let account = self.mutate_account(user_id, false, |account| {
            if account.frozen_amount < amount {
                return Err(LedgerError::FrozenUnderflow {
                    user_id: user_id.to_string(),
                    requested: amount,
                    frozen: account.frozen_amount,
                });
            }
            account.frozen_amount -= amount;
            Ok(())
        })?;
        ledger_log!("release_frozen", user_id = user_id, amount = %amount, frozen = %account.frozen_amount);
        Ok(account)
    }

    fn append_transaction(&self, tx: Transaction) -> LedgerResult<Transaction> {
        ensure_positive(tx.amount)?;

        let txn = self.db.begin_write()?;
        {
            let mut table = txn.open_table(TRANSACTIONS_TABLE)?;
            if table.get(tx.id.as_str())?.is_some() {
                drop(table);
                txn.abort()?;
                return Err(LedgerError::DuplicateTransaction(tx.id));
            }
            table.insert(tx.id.as_str(), encode(&tx)?.as_slice())?;
        }
        let seq = Self::next_sequence(&txn)?;
        {
            let mut user_index = txn.open_table(USER_TRANSACTIONS_TABLE)?;
            user_index.insert((tx.user_id.as_str(), seq), tx.id.as_str())?;
            if let Some(order_id) = tx.order_id.as_deref() {
                let mut order_index = txn.open_table(ORDER_TRANSACTIONS_TABLE)?;
                order_index.insert((order_id, seq), tx.id.as_str())?;
            }
        }
        txn.commit()?;

        ledger_log!(
            "append",
            transaction_id = tx.id.as_str(),
            user_id = tx.user_id.as_str(),
            kind = tx.kind.as_str(),
            amount = %tx.amount,
            status = tx.status.as_str()
        );
        Ok(tx)
    }

    fn finalize_transaction(
        &self,
        transaction_id: &str,
        status: TransactionStatus,
    ) -> LedgerResult<Transaction> {
        let txn = self.db.begin_write()?;
        let updated = {
            let mut table = txn.open_table(TRANSACTIONS_TABLE)?;
            let current: Option<Transaction> = match table.get(transaction_id)? {
                Some(guard) => Some(decode(guard.value())?),
                None => None,
            };
            let mut tx = match current {
                Some(tx) => tx,
                None => {
                    drop(table);
                    txn.abort()?;
                    return Err(LedgerError::TransactionNotFound(transaction_id.to_string()));
                }
            };
            if tx.status != TransactionStatus::Pending {
                drop(table);
                txn.abort()?;
                return Err(LedgerError::TransactionFinalized {
                    id: tx.id,
                    status: tx.status,
                });
            }
            tx.status = status;
            if status != TransactionStatus::Pending {
                tx.completed_at = Some(now_millis());
            }
            table.insert(transaction_id, encode(&tx)?.as_slice())?;
            tx
        };
        txn.commit()?;

        ledger_log!(
            "finalize",
            transaction_id = transaction_id,
            status = updated.status.as_str()
        );
        Ok(updated)
    }

    fn mark_withdrawal_approved(&self, transaction_id: &str) -> LedgerResult<()> {
        let txn = self.db.begin_write()?;
        {
            let table = txn.open_table(TRANSACTIONS_TABLE)?;
            if table.get(transaction_id)?.is_none() {
                drop(table);
                txn.abort()?;
                return Err(LedgerError::TransactionNotFound(transaction_id.to_string()));
            }
            let mut approved = txn.open_table(APPROVED_WITHDRAWALS_TABLE)?;
            approved.insert(transaction_id, now_millis())?;
        }
        txn.commit()?;
        ledger_log!("withdrawal_approved", transaction_id = transaction_id);
        Ok(())
    }

    fn approved_withdrawals(&self) -> LedgerResult<Vec<String>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(APPROVED_WITHDRAWALS_TABLE)?;
        let mut ids = Vec::new();
        for result in table.iter()? {
            let (key, _) = result?;
            ids.push(key.value().to_string());
        }
        Ok(ids)
    }

    fn settle_withdrawal(&self, transaction_id: &str) -> LedgerResult<Transaction> {
        let txn = self.db.begin_write()?;
        let result = (|| -> LedgerResult<(Transaction, bool)> {
            let current: Transaction = {
                let table = txn.open_table(TRANSACTIONS_TABLE)?;
                let guard = table
                    .get(transaction_id)?
                    .ok_or_else(|| LedgerError::TransactionNotFound(transaction_id.to_string()))?;
                let tx: Transaction = decode(guard.value())?;
                tx
            };
            {
                let mut approved = txn.open_table(APPROVED_WITHDRAWALS_TABLE)?;
                approved.remove(transaction_id)?;
            }
            if current.status != TransactionStatus::Pending {
                return Ok((current, false));
            }

            let user_id = current.user_id.clone();
            let amount = current.amount;
            Self::mutate_in(&txn, &user_id, false, |account| {
                if account.frozen_amount < amount {
                    return Err(LedgerError::FrozenUnderflow {
                        user_id: user_id.clone(),
                        requested: amount,
                        frozen: account.frozen_amount,
                    });
                }
                account.frozen_amount -= amount;
                Ok(())
            })?;

            let mut tx = current;
            tx.status = TransactionStatus::Completed;
            tx.completed_at = Some(now_millis());
            {
                let mut table = txn.open_table(TRANSACTIONS_TABLE)?;
                table.insert(transaction_id, encode(&tx)?.as_slice())?;
            }
            Ok((tx, true))
        })();

        match result {
            Ok((tx, settled)) => {
                txn.commit()?;
                if settled {
                    ledger_log!(
                        "withdrawal_settled",
                        transaction_id = transaction_id,
                        user_id = tx.user_id.as_str(),
                        amount = %tx.amount
                    );
                }
                Ok(tx)
            }
            Err(e) => {
                txn.abort()?;
                Err(e)
            }
        }
    }

    fn get_transaction(&self, transaction_id: &str) -> LedgerResult<Transaction> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(TRANSACTIONS_TABLE)?;
        match table.get(transaction_id)? {
            Some(guard) => Ok(decode(guard.value())?),
            None => Err(LedgerError::TransactionNotFound(transaction_id.to_string())),
        }
    }

    fn transactions_for_user(&self, user_id: &str) -> LedgerResult<Vec<Transaction>> {
        let mut transactions = self.load_indexed(USER_TRANSACTIONS_TABLE, user_id)?;
        transactions.reverse();
        Ok(transactions)
    }

    fn transactions_for_order(&self, order_id: &str) -> LedgerResult<Vec<Transaction>> {
        self.load_indexed(ORDER_TRANSACTIONS_TABLE, order_id)
    }
}
