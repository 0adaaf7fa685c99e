use crate::db::StorageError;
use rust_decimal::Decimal;
use shared::models::TransactionStatus;
use thiserror::Error;

/// Ledger errors
#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Account not found: {0}")]
    AccountNotFound(String),

    #[error("Insufficient balance for {user_id}: requested {requested}, available {available}")]
    InsufficientBalance {
        user_id: String,
        requested: Decimal,
        available: Decimal,
    },

    #[error("Frozen amount of {user_id} is {frozen}, cannot release {requested}")]
    FrozenUnderflow {
        user_id: String,
        requested: Decimal,
        frozen: Decimal,
    },

    #[error("Balance of {user_id} would exceed the representable range")]
    AmountOverflow { user_id: String },

    #[error("Amount must be positive: {0}")]
    InvalidAmount(Decimal),

    #[error("Transaction already exists: {0}")]
    DuplicateTransaction(String),

    #[error("Transaction not found: {0}")]
    TransactionNotFound(String),

    #[error("Transaction {id} is already {status}")]
    TransactionFinalized {
        id: String,
        status: TransactionStatus,
    },
}

crate::db::storage_error_conversions!(LedgerError);

pub type LedgerResult<T> = Result<T, LedgerError>;
