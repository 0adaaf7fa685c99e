//! redb plumbing shared by the ledger and order stores
//!
//! Both stores keep JSON values in `&[u8]` tables and maintain their own
//! secondary indexes. Each store lives in its own database file, so a write
//! that spans both stores is never atomic and goes through the saga
//! coordinator in [`crate::settlement::saga`].

use redb::Database;
use serde::{Serialize, de::DeserializeOwned};
use shared::error::ErrorCode;
use std::path::Path;
use thiserror::Error;

/// Storage errors
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Database error: {0}")]
    Database(#[from] redb::DatabaseError),

    #[error("Transaction error: {0}")]
    Transaction(#[from] redb::TransactionError),

    #[error("Table error: {0}")]
    Table(#[from] redb::TableError),

    #[error("Storage error: {0}")]
    Storage(#[from] redb::StorageError),

    #[error("Commit error: {0}")]
    Commit(#[from] redb::CommitError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Index points at missing record: {0}")]
    DanglingIndex(String),

    /// Injected by test doubles
    #[error("Simulated failure: {0}")]
    Simulated(String),
}

pub type StorageResult<T> = Result<T, StorageError>;

/// Let `?` lift raw redb / serde errors straight into a module error type
/// that wraps [`StorageError`] in a `Storage` variant.
macro_rules! storage_error_conversions {
    ($target:ty) => {
        $crate::db::storage_error_conversions!(
            @impl $target,
            redb::DatabaseError,
            redb::TransactionError,
            redb::TableError,
            redb::StorageError,
            redb::CommitError,
            serde_json::Error
        );
    };
    (@impl $target:ty, $($source:ty),*) => {
        $(
            impl From<$source> for $target {
                fn from(e: $source) -> Self {
                    Self::Storage($crate::db::StorageError::from(e))
                }
            }
        )*
    };
}
pub(crate) use storage_error_conversions;

/// Open or create a database file, creating the parent directory first.
///
/// redb commits with `Durability::Immediate` by default: a commit is on disk
/// once `commit()` returns, and the file is always consistent after a crash.
pub fn open_database(path: impl AsRef<Path>) -> StorageResult<Database> {
    if let Some(parent) = path.as_ref().parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent).map_err(|e| {
            StorageError::Storage(redb::StorageError::Io(e))
        })?;
    }
    Ok(Database::create(path)?)
}

/// In-memory database for unit tests
#[cfg(test)]
pub fn open_in_memory() -> StorageResult<Database> {
    Ok(Database::builder().create_with_backend(redb::backends::InMemoryBackend::new())?)
}

pub(crate) fn encode<T: Serialize>(value: &T) -> StorageResult<Vec<u8>> {
    Ok(serde_json::to_vec(value)?)
}

pub(crate) fn decode<T: DeserializeOwned>(bytes: &[u8]) -> StorageResult<T> {
    Ok(serde_json::from_slice(bytes)?)
}

/// Map a storage error to an error code (clients localize the message)
pub fn classify_storage_error(e: &StorageError) -> ErrorCode {
    match e {
        StorageError::Serialization(_) | StorageError::DanglingIndex(_) => {
            return ErrorCode::StorageCorrupted;
        }
        StorageError::Simulated(_) => return ErrorCode::DatabaseError,
        _ => {}
    }

    // redb errors are classified by message
    let err_str = e.to_string().to_lowercase();

    if err_str.contains("no space") || err_str.contains("disk full") || err_str.contains("enospc")
    {
        return ErrorCode::StorageFull;
    }

    if err_str.contains("out of memory") || err_str.contains("cannot allocate") {
        return ErrorCode::OutOfMemory;
    }

    if err_str.contains("corrupt") || err_str.contains("invalid database") {
        return ErrorCode::StorageCorrupted;
    }

    // Database/Transaction/Table/Storage/Commit errors default to busy
    ErrorCode::SystemBusy
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serialization_errors_are_corruption() {
        let err = decode::<u32>(b"not json").unwrap_err();
        assert_eq!(classify_storage_error(&err), ErrorCode::StorageCorrupted);
    }

    #[test]
    fn io_errors_are_classified_by_message() {
        let full = StorageError::Storage(redb::StorageError::Io(std::io::Error::other(
            "No space left on device",
        )));
        assert_eq!(classify_storage_error(&full), ErrorCode::StorageFull);

        let busy = StorageError::Storage(redb::StorageError::Io(std::io::Error::other(
            "resource temporarily unavailable",
        )));
        assert_eq!(classify_storage_error(&busy), ErrorCode::SystemBusy);
    }

    #[test]
    fn open_database_creates_parent_dir() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("x.redb");
        open_database(&path).unwrap();
        assert!(path.exists());
    }
}
