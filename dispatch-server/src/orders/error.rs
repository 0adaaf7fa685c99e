use crate::db::StorageError;
use shared::models::SubOrderStatus;
use thiserror::Error;

/// Order repository errors, including the precondition failures raised by
/// the conditional updates run inside a write transaction.
#[derive(Debug, Error)]
pub enum OrderError {
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Sub-order not found: {0}")]
    SubOrderNotFound(String),

    #[error("Order not found: {0}")]
    OrderNotFound(String),

    #[error("Order already exists: {0}")]
    AlreadyExists(String),

    #[error("Sub-order already claimed: {0}")]
    AlreadyClaimed(String),

    #[error("{id} is {status}")]
    InvalidState { id: String, status: String },

    #[error("Sub-order {sub_order_id} is not held by {commenter_id}")]
    NotClaimant {
        sub_order_id: String,
        commenter_id: String,
    },

    #[error("Order {order_id} is not owned by {user_id}")]
    NotOwner { order_id: String, user_id: String },

    #[error("Submission for {0} has no screenshot")]
    MissingEvidence(String),

    #[error("Sub-order {id} cannot move from {from} to {to}")]
    BackwardTransition {
        id: String,
        from: SubOrderStatus,
        to: SubOrderStatus,
    },

    #[error("Invalid order: {0}")]
    Validation(String),
}

crate::db::storage_error_conversions!(OrderError);

impl OrderError {
    pub fn invalid_state(id: impl Into<String>, status: impl ToString) -> Self {
        Self::InvalidState {
            id: id.into(),
            status: status.to_string(),
        }
    }
}

pub type OrderResult<T> = Result<T, OrderError>;
