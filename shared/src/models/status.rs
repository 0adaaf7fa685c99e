//! Closed status enumerations and the legacy-name mapping table
//!
//! Older clients and the data files they produced used several spellings for
//! the same state (`pending` vs `waiting_collect`, `in_progress` vs
//! `sub_progress`). Every such spelling is resolved here and nowhere else.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Lifecycle of one claimable unit of work
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubOrderStatus {
    /// Open for claiming
    WaitingCollect,
    /// Claimed, evidence not yet submitted
    SubProgress,
    /// Evidence submitted, waiting for the publisher
    SubPendingReview,
    /// Approved (terminal)
    SubCompleted,
    /// Withdrawn by the publisher before anyone claimed it (terminal)
    SubCancelled,
}

impl SubOrderStatus {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::WaitingCollect => "waiting_collect",
            Self::SubProgress => "sub_progress",
            Self::SubPendingReview => "sub_pending_review",
            Self::SubCompleted => "sub_completed",
            Self::SubCancelled => "sub_cancelled",
        }
    }

    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::SubCompleted | Self::SubCancelled)
    }

    /// States in which the sub-order has an assigned commenter
    pub const fn is_held(&self) -> bool {
        matches!(
            self,
            Self::SubProgress | Self::SubPendingReview | Self::SubCompleted
        )
    }
}

/// Aggregate status of a bulk order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MainOrderStatus {
    MainProgress,
    MainCompleted,
}

impl MainOrderStatus {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::MainProgress => "main_progress",
            Self::MainCompleted => "main_completed",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionKind {
    /// Money paid in by the user
    Recharge,
    /// Escrow taken from a publisher when an order is created
    Expense,
    /// Earnings credited to a commenter after approval
    Payout,
    /// Escrow refunded to a publisher
    Reversal,
    /// Money paid out through a withdrawal processor
    Withdrawal,
}

impl TransactionKind {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Recharge => "recharge",
            Self::Expense => "expense",
            Self::Payout => "payout",
            Self::Reversal => "reversal",
            Self::Withdrawal => "withdrawal",
        }
    }

    /// Whether the kind adds to the user's funds
    pub const fn is_inflow(&self) -> bool {
        matches!(self, Self::Recharge | Self::Payout | Self::Reversal)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionStatus {
    Pending,
    Completed,
    Failed,
}

impl TransactionStatus {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }
}

/// Caller role as issued by the auth collaborator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Publisher,
    Commenter,
    Admin,
}

impl Role {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Publisher => "publisher",
            Self::Commenter => "commenter",
            Self::Admin => "admin",
        }
    }
}

// ============================================================================
// Legacy / display mapping
// ============================================================================

/// Every spelling ever used for a sub-order state, mapped to the closed enum.
pub const SUB_ORDER_STATUS_NAMES: &[(&str, SubOrderStatus)] = &[
    ("waiting_collect", SubOrderStatus::WaitingCollect),
    ("pending", SubOrderStatus::WaitingCollect),
    ("sub_progress", SubOrderStatus::SubProgress),
    ("in_progress", SubOrderStatus::SubProgress),
    ("sub_pending_review", SubOrderStatus::SubPendingReview),
    ("pending_review", SubOrderStatus::SubPendingReview),
    ("sub_completed", SubOrderStatus::SubCompleted),
    ("completed", SubOrderStatus::SubCompleted),
    ("sub_cancelled", SubOrderStatus::SubCancelled),
    ("cancelled", SubOrderStatus::SubCancelled),
];

pub const MAIN_ORDER_STATUS_NAMES: &[(&str, MainOrderStatus)] = &[
    ("main_progress", MainOrderStatus::MainProgress),
    ("in_progress", MainOrderStatus::MainProgress),
    ("main_completed", MainOrderStatus::MainCompleted),
    ("completed", MainOrderStatus::MainCompleted),
];

pub const TRANSACTION_KIND_NAMES: &[(&str, TransactionKind)] = &[
    ("recharge", TransactionKind::Recharge),
    ("expense", TransactionKind::Expense),
    ("task_publish", TransactionKind::Expense),
    ("payout", TransactionKind::Payout),
    ("income", TransactionKind::Payout),
    ("reversal", TransactionKind::Reversal),
    ("refund", TransactionKind::Reversal),
    ("withdrawal", TransactionKind::Withdrawal),
];

pub const ROLE_NAMES: &[(&str, Role)] = &[
    ("publisher", Role::Publisher),
    ("commenter", Role::Commenter),
    ("admin", Role::Admin),
];

/// Error for a status or role name not present in the mapping table
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown {kind} name: {value}")]
pub struct UnknownName {
    pub kind: &'static str,
    pub value: String,
}

fn lookup<T: Copy>(table: &[(&str, T)], kind: &'static str, s: &str) -> Result<T, UnknownName> {
    let needle = s.trim().to_ascii_lowercase();
    table
        .iter()
        .find(|(name, _)| *name == needle)
        .map(|(_, v)| *v)
        .ok_or_else(|| UnknownName {
            kind,
            value: s.to_string(),
        })
}

macro_rules! named_enum {
    ($ty:ty, $table:expr, $kind:literal) => {
        impl FromStr for $ty {
            type Err = UnknownName;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                lookup($table, $kind, s)
            }
        }

        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }
    };
}

named_enum!(SubOrderStatus, SUB_ORDER_STATUS_NAMES, "sub-order status");
named_enum!(MainOrderStatus, MAIN_ORDER_STATUS_NAMES, "main-order status");
named_enum!(TransactionKind, TRANSACTION_KIND_NAMES, "transaction kind");
named_enum!(Role, ROLE_NAMES, "role");

impl FromStr for TransactionStatus {
    type Err = UnknownName;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        lookup(
            &[
                ("pending", Self::Pending),
                ("completed", Self::Completed),
                ("failed", Self::Failed),
            ],
            "transaction status",
            s,
        )
    }
}

impl fmt::Display for TransactionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
