//! Engine-level error taxonomy
//!
//! Every engine operation fails with a [`DispatchError`]. Store errors are
//! lifted into it with `?`; the HTTP layer turns it into an [`AppError`] in
//! exactly one place ([`From<DispatchError> for AppError`]).
//!
//! | Variant | Meaning | Code |
//! |---------|---------|------|
//! | `Unauthorized` | wrong role | 2002 |
//! | `NotFound` | unknown id | 3001 / 4001 / 5001 / 5004 |
//! | `InvalidState` | wrong status for the operation | 3005 |
//! | `AlreadyClaimed` | lost a claim race | 3002 |
//! | `InsufficientBalance` | debit refused, nothing written | 5002 |
//! | `Forbidden` | not the claimant / not the owner | 2004 / 2005 |
//! | `MissingEvidence` | submission without screenshot | 3004 |
//! | `Persistence` | a multi-store write failed | 4010 / 4011 |

use rust_decimal::Decimal;
use shared::error::{AppError, ErrorCode, RETRY_AFTER_DETAIL};
use thiserror::Error;

use crate::db::{StorageError, classify_storage_error};
use crate::ledger::LedgerError;
use crate::orders::OrderError;
use crate::settlement::saga::SagaError;

/// What a [`DispatchError::NotFound`] refers to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resource {
    Order,
    SubOrder,
    Account,
    Transaction,
}

impl Resource {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Order => "order",
            Self::SubOrder => "sub_order",
            Self::Account => "account",
            Self::Transaction => "transaction",
        }
    }

    const fn code(&self) -> ErrorCode {
        match self {
            Self::Order => ErrorCode::OrderNotFound,
            Self::SubOrder => ErrorCode::TaskNotFound,
            Self::Account => ErrorCode::AccountNotFound,
            Self::Transaction => ErrorCode::TransactionNotFound,
        }
    }
}

/// Which ownership check failed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ownership {
    /// Caller is not the commenter holding the sub-order
    Claimant,
    /// Caller is not the publisher of the main order
    Publisher,
}

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("Role '{required}' is required")]
    Unauthorized { required: String },

    #[error("{} not found: {id}", .resource.as_str())]
    NotFound { resource: Resource, id: String },

    #[error("{id} is {status}")]
    InvalidState { id: String, status: String },

    #[error("Sub-order already claimed: {0}")]
    AlreadyClaimed(String),

    #[error("Insufficient balance for {user_id}: requested {requested}, available {available}")]
    InsufficientBalance {
        user_id: String,
        requested: Decimal,
        available: Decimal,
    },

    #[error("{user_id} may not act on {id}")]
    Forbidden {
        id: String,
        user_id: String,
        check: Ownership,
    },

    #[error("Submission for {0} has no screenshot")]
    MissingEvidence(String),

    #[error("Persistence failed: {message} (compensated: {compensated})")]
    Persistence { message: String, compensated: bool },

    #[error("Already exists: {0}")]
    Duplicate(String),

    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Claim cooldown active, retry in {retry_after_secs}s")]
    ClaimCooldown { retry_after_secs: u64 },

    #[error("Withdrawal failed: {0}")]
    WithdrawalFailed(String),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
}

pub type DispatchResult<T> = Result<T, DispatchError>;

impl DispatchError {
    pub fn unauthorized(required: impl Into<String>) -> Self {
        Self::Unauthorized {
            required: required.into(),
        }
    }

    pub fn not_found(resource: Resource, id: impl Into<String>) -> Self {
        Self::NotFound {
            resource,
            id: id.into(),
        }
    }

    pub fn invalid_state(id: impl Into<String>, status: impl ToString) -> Self {
        Self::InvalidState {
            id: id.into(),
            status: status.to_string(),
        }
    }

    pub fn forbidden(check: Ownership, id: impl Into<String>, user_id: impl Into<String>) -> Self {
        Self::Forbidden {
            id: id.into(),
            user_id: user_id.into(),
            check,
        }
    }

    /// A failed storage write (the only class that needs compensation)
    pub fn is_persistence(&self) -> bool {
        matches!(self, Self::Storage(_) | Self::Persistence { .. })
    }
}

impl From<LedgerError> for DispatchError {
    fn from(e: LedgerError) -> Self {
        match e {
            LedgerError::Storage(e) => Self::Storage(e),
            LedgerError::AccountNotFound(id) => Self::not_found(Resource::Account, id),
            LedgerError::InsufficientBalance {
                user_id,
                requested,
                available,
            } => Self::InsufficientBalance {
                user_id,
                requested,
                available,
            },
            e @ LedgerError::FrozenUnderflow { .. } => Self::Validation(e.to_string()),
            e @ LedgerError::InvalidAmount(_) => Self::Validation(e.to_string()),
            e @ LedgerError::AmountOverflow { .. } => Self::Validation(e.to_string()),
            LedgerError::DuplicateTransaction(id) => Self::Duplicate(id),
            LedgerError::TransactionNotFound(id) => Self::not_found(Resource::Transaction, id),
            LedgerError::TransactionFinalized { id, status } => Self::invalid_state(id, status),
        }
    }
}

impl From<OrderError> for DispatchError {
    fn from(e: OrderError) -> Self {
        match e {
            OrderError::Storage(e) => Self::Storage(e),
            OrderError::SubOrderNotFound(id) => Self::not_found(Resource::SubOrder, id),
            OrderError::OrderNotFound(id) => Self::not_found(Resource::Order, id),
            OrderError::AlreadyExists(id) => Self::Duplicate(id),
            OrderError::AlreadyClaimed(id) => Self::AlreadyClaimed(id),
            OrderError::InvalidState { id, status } => Self::InvalidState { id, status },
            OrderError::NotClaimant {
                sub_order_id,
                commenter_id,
            } => Self::forbidden(Ownership::Claimant, sub_order_id, commenter_id),
            OrderError::NotOwner { order_id, user_id } => {
                Self::forbidden(Ownership::Publisher, order_id, user_id)
            }
            OrderError::MissingEvidence(id) => Self::MissingEvidence(id),
            OrderError::BackwardTransition { id, from, .. } => Self::invalid_state(id, from),
            OrderError::Validation(msg) => Self::Validation(msg),
        }
    }
}

/// Precondition failures pass through unchanged; a failed write becomes
/// [`DispatchError::Persistence`], and so does anything left uncompensated.
impl<E: Into<DispatchError>> From<SagaError<E>> for DispatchError {
    fn from(e: SagaError<E>) -> Self {
        let source: DispatchError = e.source.into();
        if e.compensated && !source.is_persistence() {
            return source;
        }
        Self::Persistence {
            message: format!("{} failed at {}: {}", e.saga, e.step, source),
            compensated: e.compensated,
        }
    }
}

impl From<DispatchError> for AppError {
    fn from(e: DispatchError) -> Self {
        match e {
            DispatchError::Unauthorized { required } => AppError::role_required(required),
            DispatchError::NotFound { resource, id } => {
                AppError::with_message(resource.code(), format!("{} not found", resource.as_str()))
                    .with_detail("id", id)
            }
            DispatchError::InvalidState { id, status } => {
                AppError::with_message(ErrorCode::TaskInvalidState, format!("{} is {}", id, status))
                    .with_detail("id", id)
                    .with_detail("status", status)
            }
            DispatchError::AlreadyClaimed(id) => {
                tracing::debug!(sub_order_id = %id, "Claim lost to a concurrent claimant");
                AppError::new(ErrorCode::TaskAlreadyClaimed).with_detail("id", id)
            }
            DispatchError::InsufficientBalance {
                requested,
                available,
                ..
            } => AppError::new(ErrorCode::InsufficientBalance)
                .with_detail("requested", requested.to_string())
                .with_detail("available", available.to_string()),
            DispatchError::Forbidden { id, check, .. } => {
                let code = match check {
                    Ownership::Claimant => ErrorCode::NotTaskOwner,
                    Ownership::Publisher => ErrorCode::NotOrderOwner,
                };
                AppError::new(code).with_detail("id", id)
            }
            DispatchError::MissingEvidence(id) => {
                AppError::new(ErrorCode::ScreenshotRequired).with_detail("id", id)
            }
            DispatchError::Persistence {
                message,
                compensated,
            } => {
                tracing::error!(error = %message, compensated, "Multi-store write failed");
                if compensated {
                    AppError::new(ErrorCode::OrderPersistFailed)
                } else {
                    AppError::new(ErrorCode::OrderPersistUncompensated)
                }
            }
            DispatchError::Duplicate(id) => {
                AppError::new(ErrorCode::AlreadyExists).with_detail("id", id)
            }
            DispatchError::Validation(msg) => AppError::validation(msg),
            DispatchError::ClaimCooldown { retry_after_secs } => {
                AppError::new(ErrorCode::ClaimCooldown)
                    .with_detail(RETRY_AFTER_DETAIL, retry_after_secs)
            }
            DispatchError::WithdrawalFailed(msg) => {
                AppError::new(ErrorCode::WithdrawalFailed).with_detail("reason", msg)
            }
            DispatchError::Storage(e) => {
                let code = classify_storage_error(&e);
                tracing::error!(error = %e, code = %code, "Storage error");
                AppError::new(code)
            }
        }
    }
}
