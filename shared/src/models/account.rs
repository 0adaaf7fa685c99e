//! Account and ledger transaction models

use super::status::{TransactionKind, TransactionStatus};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// One account per user, owned by the ledger store.
///
/// `balance` is spendable money; `frozen_amount` is money reserved for an
/// in-flight withdrawal. Both are never negative.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Account {
    pub user_id: String,
    pub balance: Decimal,
    pub frozen_amount: Decimal,
    pub created_at: i64,
    pub updated_at: i64,
}

impl Account {
    pub fn new(user_id: impl Into<String>, now: i64) -> Self {
        Self {
            user_id: user_id.into(),
            balance: Decimal::ZERO,
            frozen_amount: Decimal::ZERO,
            created_at: now,
            updated_at: now,
        }
    }

    /// Total funds including the frozen part
    pub fn total(&self) -> Decimal {
        self.balance + self.frozen_amount
    }
}

/// Immutable ledger entry.
///
/// `amount` is always positive; the direction comes from `kind`
/// (see [`Transaction::signed_amount`]). Only a `pending` entry may change,
/// and only its `status` / `completed_at`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    pub id: String,
    pub user_id: String,
    /// Main order this entry belongs to, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub order_id: Option<String>,
    /// Sub-order this entry belongs to (payouts)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sub_order_id: Option<String>,
    pub kind: TransactionKind,
    pub amount: Decimal,
    pub status: TransactionStatus,
    pub description: String,
    /// Recharge / withdrawal channel (e.g. "alipay", "bank")
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payment_method: Option<String>,
    pub created_at: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<i64>,
}

impl Transaction {
    /// A `completed` entry, the common case for escrow, payout and reversal
    pub fn completed(
        id: impl Into<String>,
        user_id: impl Into<String>,
        kind: TransactionKind,
        amount: Decimal,
        description: impl Into<String>,
        now: i64,
    ) -> Self {
        Self {
            id: id.into(),
            user_id: user_id.into(),
            order_id: None,
            sub_order_id: None,
            kind,
            amount,
            status: TransactionStatus::Completed,
            description: description.into(),
            payment_method: None,
            created_at: now,
            completed_at: Some(now),
        }
    }

    /// A `pending` entry, finalized later (withdrawals)
    pub fn pending(
        id: impl Into<String>,
        user_id: impl Into<String>,
        kind: TransactionKind,
        amount: Decimal,
        description: impl Into<String>,
        now: i64,
    ) -> Self {
        Self {
            status: TransactionStatus::Pending,
            completed_at: None,
            ..Self::completed(id, user_id, kind, amount, description, now)
        }
    }

    pub fn for_order(mut self, order_id: impl Into<String>) -> Self {
        self.order_id = Some(order_id.into());
        self
    }

    pub fn for_sub_order(mut self, sub_order_id: impl Into<String>) -> Self {
        self.sub_order_id = Some(sub_order_id.into());
        self
    }

    pub fn with_payment_method(mut self, method: impl Into<String>) -> Self {
        self.payment_method = Some(method.into());
        self
    }

    /// Amount with the sign of its effect on the user's funds
    pub fn signed_amount(&self) -> Decimal {
        if self.kind.is_inflow() {
            self.amount
        } else {
            -self.amount
        }
    }
}
