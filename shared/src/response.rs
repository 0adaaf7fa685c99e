//! Read-only views returned by the dispatch server

use crate::models::{Account, MainOrder, SubOrder, SubOrderStatus};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// One claimable task as shown to commenters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EligibleTask {
    pub id: String,
    pub parent_id: String,
    pub order_number: String,
    pub task_title: String,
    pub price: Decimal,
    /// "unclaimed/total"
    pub remaining: String,
    pub progress: u32,
    pub requirements: String,
    pub deadline: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub video_url: Option<String>,
}

impl EligibleTask {
    pub fn from_parts(parent: &MainOrder, sub: &SubOrder) -> Self {
        Self {
            id: sub.id.clone(),
            parent_id: parent.id.clone(),
            order_number: sub.order_number.clone(),
            task_title: parent.task_title.clone(),
            price: parent.unit_price,
            remaining: format!("{}/{}", parent.remaining(), parent.quantity),
            progress: parent.progress_percent(),
            requirements: parent.task_requirements.clone(),
            deadline: parent.deadline,
            video_url: parent.video_url.clone(),
        }
    }
}

/// Result of a successful claim
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClaimResponse {
    pub sub_order: SubOrder,
    /// Evidence must arrive before this instant or the claim is released
    pub lease_expires_at: i64,
}

/// Balance view: `total = available + frozen`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccountSummary {
    pub user_id: String,
    pub total: Decimal,
    pub frozen: Decimal,
    pub available: Decimal,
}

impl From<&Account> for AccountSummary {
    fn from(account: &Account) -> Self {
        Self {
            user_id: account.user_id.clone(),
            total: account.total(),
            frozen: account.frozen_amount,
            available: account.balance,
        }
    }
}

/// Publisher view of one order
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderSummary {
    pub id: String,
    pub order_number: String,
    pub task_title: String,
    pub status: String,
    pub quantity: u32,
    pub completed_quantity: u32,
    pub pending_review: usize,
    pub approved: usize,
    pub cancelled: usize,
    pub total_cost: Decimal,
    pub publish_time: i64,
    pub deadline: i64,
}

impl From<&MainOrder> for OrderSummary {
    fn from(order: &MainOrder) -> Self {
        Self {
            id: order.id.clone(),
            order_number: order.order_number.clone(),
            task_title: order.task_title.clone(),
            status: order.status.to_string(),
            quantity: order.quantity,
            completed_quantity: order.completed_quantity,
            pending_review: order.count_in(SubOrderStatus::SubPendingReview),
            approved: order.count_in(SubOrderStatus::SubCompleted),
            cancelled: order.count_in(SubOrderStatus::SubCancelled),
            total_cost: order.total_cost,
            publish_time: order.publish_time,
            deadline: order.deadline,
        }
    }
}

/// Outcome of recomputing an account from its ledger
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReconcileReport {
    pub user_id: String,
    /// `balance + frozen_amount` as stored
    pub recorded: Decimal,
    /// Signed sum of completed ledger entries
    pub derived: Decimal,
    pub drift: Decimal,
    pub transactions: usize,
}

impl ReconcileReport {
    pub fn is_balanced(&self) -> bool {
        self.drift.is_zero()
    }
}

/// Counts returned by one pass of the background sweeper
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SweepReport {
    pub released: usize,
    pub payouts_retried: usize,
    pub payouts_failed: usize,
    pub refunds_retried: usize,
    pub refunds_failed: usize,
    pub withdrawals_retried: usize,
    pub withdrawals_failed: usize,
}

/// Paginated list wrapper
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub total: usize,
    pub page: u32,
    pub per_page: u32,
}
