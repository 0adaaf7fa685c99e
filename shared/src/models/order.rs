//! Main order aggregate and its claimable sub-orders

use super::status::{MainOrderStatus, SubOrderStatus};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// What kind of work the order buys
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum OrderVariant {
    /// Bulk comment campaign, one sub-order per comment
    #[default]
    CommentCampaign,
    /// Rental of one account for a number of days
    AccountRental,
}

impl OrderVariant {
    /// Prefix of the human-readable order number
    pub const fn number_prefix(&self) -> &'static str {
        match self {
            Self::CommentCampaign => "DY",
            Self::AccountRental => "AC",
        }
    }
}

/// A publisher's bulk task. Owns its sub-orders.
///
/// Invariants (kept by [`MainOrder::refresh`]):
/// - `completed_quantity <= quantity`
/// - `status == MainCompleted` iff every sub-order is terminal
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MainOrder {
    pub id: String,
    pub order_number: String,
    /// Publisher (owner)
    pub user_id: String,
    #[serde(default)]
    pub variant: OrderVariant,
    pub task_title: String,
    pub unit_price: Decimal,
    pub quantity: u32,
    /// Units currently held by a commenter (claimed, submitted or approved)
    pub completed_quantity: u32,
    pub total_cost: Decimal,
    pub status: MainOrderStatus,
    pub task_requirements: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub video_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mention: Option<String>,
    /// Escrow ledger entry taken when the order was created
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub escrow_transaction_id: Option<String>,
    /// Escrow refunds owed for cancelled units
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub refunds: Vec<Refund>,
    pub publish_time: i64,
    pub deadline: i64,
    pub updated_at: i64,
    pub sub_orders: Vec<SubOrder>,
}

impl MainOrder {
    pub fn sub_order_index(&self, sub_order_id: &str) -> Option<usize> {
        self.sub_orders.iter().position(|s| s.id == sub_order_id)
    }

    pub fn sub_order(&self, sub_order_id: &str) -> Option<&SubOrder> {
        self.sub_orders.iter().find(|s| s.id == sub_order_id)
    }

    /// Re-derive the counter and the aggregate status from the sub-orders.
    ///
    /// Called after every sub-order mutation, inside the same write, so the
    /// counter never disagrees with the statuses it summarizes.
    pub fn refresh(&mut self, now: i64) {
        self.completed_quantity = self
            .sub_orders
            .iter()
            .filter(|s| s.status.is_held())
            .count() as u32;
        self.status = if self.sub_orders.iter().all(|s| s.status.is_terminal()) {
            MainOrderStatus::MainCompleted
        } else {
            MainOrderStatus::MainProgress
        };
        self.updated_at = now;
    }

    pub fn is_open(&self) -> bool {
        self.status == MainOrderStatus::MainProgress
    }

    /// Units not yet held by anyone and not cancelled
    pub fn remaining(&self) -> u32 {
        self.sub_orders
            .iter()
            .filter(|s| s.status == SubOrderStatus::WaitingCollect)
            .count() as u32
    }

    /// Share of units held, in whole percent
    pub fn progress_percent(&self) -> u32 {
        if self.quantity == 0 {
            return 0;
        }
        self.completed_quantity * 100 / self.quantity
    }

    pub fn count_in(&self, status: SubOrderStatus) -> usize {
        self.sub_orders.iter().filter(|s| s.status == status).count()
    }

    pub fn has_unsettled_refund(&self) -> bool {
        self.refunds.iter().any(|r| !r.settled)
    }
}

/// Escrow owed back to the publisher after a cancellation.
///
/// `transaction_id` is fixed when the refund is recorded, so paying it twice
/// is rejected by the ledger.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Refund {
    pub transaction_id: String,
    pub units: u32,
    pub amount: Decimal,
    pub created_at: i64,
    #[serde(default)]
    pub settled: bool,
}

/// Evidence a commenter submits for a claimed sub-order
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct Evidence {
    pub screenshot_url: String,
    #[serde(default)]
    pub comment_content: String,
}

/// One claimable unit of work.
///
/// `commenter_id` is set iff `status` is one of the held states; once set it
/// is never reassigned to a different commenter. Only an expired, unsubmitted
/// claim is cleared (back to `waiting_collect`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubOrder {
    pub id: String,
    pub parent_id: String,
    pub order_number: String,
    pub status: SubOrderStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub commenter_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub commenter_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment_content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment_time: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub screenshot_url: Option<String>,
    /// Opaque payload for account rentals
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub account_details: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub claimed_at: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lease_expires_at: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reviewed_at: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reject_reason: Option<String>,
    #[serde(default)]
    pub reject_count: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payout_transaction_id: Option<String>,
    pub updated_at: i64,
}

impl SubOrder {
    pub fn new(parent: &MainOrder, index: u32, now: i64) -> Self {
        Self {
            id: format!("{}-{:03}", parent.id, index),
            parent_id: parent.id.clone(),
            order_number: format!("{}-{:03}", parent.order_number, index),
            status: SubOrderStatus::WaitingCollect,
            commenter_id: None,
            commenter_name: None,
            comment_content: None,
            comment_time: None,
            screenshot_url: None,
            account_details: None,
            claimed_at: None,
            lease_expires_at: None,
            reviewed_at: None,
            reject_reason: None,
            reject_count: 0,
            payout_transaction_id: None,
            updated_at: now,
        }
    }

    /// Open for claiming
    pub fn is_eligible(&self) -> bool {
        self.status == SubOrderStatus::WaitingCollect && self.commenter_id.is_none()
    }

    pub fn is_held_by(&self, commenter_id: &str) -> bool {
        self.commenter_id.as_deref() == Some(commenter_id)
    }

    /// Drop claimant and evidence, back to `waiting_collect`
    pub fn clear_claim(&mut self, now: i64) {
        self.status = SubOrderStatus::WaitingCollect;
        self.commenter_id = None;
        self.commenter_name = None;
        self.comment_content = None;
        self.comment_time = None;
        self.screenshot_url = None;
        self.claimed_at = None;
        self.lease_expires_at = None;
        self.updated_at = now;
    }
}
