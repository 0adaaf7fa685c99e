//! Error codes
//!
//! Each code is declared once with its numeric value, HTTP status and the
//! message end users see. Ranges follow [`ErrorCategory`](super::ErrorCategory).

use http::StatusCode;
use serde::{Deserialize, Serialize};
use std::fmt;

macro_rules! error_codes {
    ($(
        $(#[$meta:meta])*
        $name:ident = $value:literal, $status:ident, $message:literal;
    )+) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(into = "u16", try_from = "u16")]
        #[repr(u16)]
        pub enum ErrorCode {
            $( $(#[$meta])* $name = $value, )+
        }

        impl ErrorCode {
            pub const ALL: &'static [ErrorCode] = &[$(ErrorCode::$name),+];

            pub const fn message(&self) -> &'static str {
                match self {
                    $( ErrorCode::$name => $message, )+
                }
            }

            pub const fn http_status(&self) -> StatusCode {
                match self {
                    $( ErrorCode::$name => StatusCode::$status, )+
                }
            }
        }

        impl TryFrom<u16> for ErrorCode {
            type Error = InvalidErrorCode;

            fn try_from(value: u16) -> Result<Self, Self::Error> {
                match value {
                    $( $value => Ok(ErrorCode::$name), )+
                    _ => Err(InvalidErrorCode(value)),
                }
            }
        }
    };
}

error_codes! {
    // 0xxx
    ValidationFailed = 2, BAD_REQUEST, "Validation failed";
    /// Same id submitted twice
    AlreadyExists = 4, CONFLICT, "Resource already exists";

    // 1xxx
    NotAuthenticated = 1001, UNAUTHORIZED, "Please login first";
    TokenExpired = 1003, UNAUTHORIZED, "Authentication token has expired";
    TokenInvalid = 1004, UNAUTHORIZED, "Authentication token is invalid";

    // 2xxx
    RoleRequired = 2002, FORBIDDEN, "Specific role is required";
    /// Submitting a task someone else claimed
    NotTaskOwner = 2004, FORBIDDEN, "Only the claimant can submit this task";
    NotOrderOwner = 2005, FORBIDDEN, "You do not own this order";

    // 3xxx
    TaskNotFound = 3001, NOT_FOUND, "Task not found";
    TaskAlreadyClaimed = 3002, CONFLICT, "Task already taken";
    ClaimCooldown = 3003, TOO_MANY_REQUESTS, "Please wait before claiming another task";
    ScreenshotRequired = 3004, BAD_REQUEST, "Please upload a screenshot first";
    TaskInvalidState = 3005, CONFLICT, "Task is not in a valid state for this operation";

    // 4xxx
    OrderNotFound = 4001, NOT_FOUND, "Order not found";
    /// Escrow was taken, the order write failed, the escrow was refunded
    OrderPersistFailed = 4010, INTERNAL_SERVER_ERROR,
        "Order could not be saved, the charge was refunded";
    /// As above but the refund failed too; needs manual repair
    OrderPersistUncompensated = 4011, INTERNAL_SERVER_ERROR,
        "Order could not be saved and the refund is pending";

    // 5xxx
    AccountNotFound = 5001, NOT_FOUND, "Account not found";
    InsufficientBalance = 5002, PAYMENT_REQUIRED, "Insufficient balance";
    TransactionNotFound = 5004, NOT_FOUND, "Transaction not found";
    /// The payout rail refused the withdrawal
    WithdrawalFailed = 5006, BAD_GATEWAY, "Withdrawal failed";

    // 9xxx
    DatabaseError = 9002, INTERNAL_SERVER_ERROR, "Database error";
    StorageFull = 9401, INTERNAL_SERVER_ERROR, "Storage full, please free up disk space";
    OutOfMemory = 9402, INTERNAL_SERVER_ERROR, "Out of memory";
    StorageCorrupted = 9403, INTERNAL_SERVER_ERROR, "Storage corrupted, contact support";
    SystemBusy = 9404, SERVICE_UNAVAILABLE, "System busy, please retry";
}

impl ErrorCode {
    #[inline]
    pub const fn code(&self) -> u16 {
        *self as u16
    }
}

impl From<ErrorCode> for u16 {
    fn from(code: ErrorCode) -> Self {
        code.code()
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("invalid error code: {0}")]
pub struct InvalidErrorCode(pub u16);
