//! Error families, one per thousand of the code

use super::codes::ErrorCode;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    /// 0xxx: malformed input, duplicates
    General,
    /// 1xxx: missing, invalid or expired token
    Auth,
    /// 2xxx: wrong role, not the claimant, not the owner
    Permission,
    /// 3xxx: claim, submission and review outcomes
    Task,
    /// 4xxx: order creation and cancellation
    Order,
    /// 5xxx: balances and transactions
    Ledger,
    /// 9xxx and anything unassigned
    System,
}

impl ErrorCategory {
    pub const fn from_code(code: u16) -> Self {
        match code / 1000 {
            0 => Self::General,
            1 => Self::Auth,
            2 => Self::Permission,
            3 => Self::Task,
            4 => Self::Order,
            5 => Self::Ledger,
            _ => Self::System,
        }
    }

    pub const fn name(&self) -> &'static str {
        match self {
            Self::General => "general",
            Self::Auth => "auth",
            Self::Permission => "permission",
            Self::Task => "task",
            Self::Order => "order",
            Self::Ledger => "ledger",
            Self::System => "system",
        }
    }
}

impl ErrorCode {
    pub const fn category(&self) -> ErrorCategory {
        ErrorCategory::from_code(*self as u16)
    }
}
