//! Request payloads accepted by the dispatch server

use crate::models::Evidence;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Pagination query parameters
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PaginationQuery {
    /// Page number (1-based, default: 1)
    #[serde(default = "default_page")]
    pub page: u32,

    /// Items per page (default: 20, max: 100)
    #[serde(default = "default_per_page")]
    pub per_page: u32,
}

fn default_page() -> u32 {
    1
}

fn default_per_page() -> u32 {
    20
}

impl PaginationQuery {
    pub fn offset(&self) -> usize {
        self.page.saturating_sub(1) as usize * self.limit()
    }

    /// Clamped to 100
    pub fn limit(&self) -> usize {
        std::cmp::min(self.per_page, 100) as usize
    }
}

/// Publisher request for a comment campaign
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateCommentOrderRequest {
    pub task_title: String,
    pub unit_price: Decimal,
    pub quantity: u32,
    pub task_requirements: String,
    /// Defaults to the server's configured deadline
    #[serde(default)]
    pub deadline_days: Option<u32>,
    /// Optional precomputed total; must equal `unit_price * quantity`
    #[serde(default)]
    pub total_cost: Option<Decimal>,
    #[serde(default)]
    pub video_url: Option<String>,
    #[serde(default)]
    pub mention: Option<String>,
}

/// Publisher request for an account rental (a single unit)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateAccountRentalRequest {
    pub task_title: String,
    pub total_cost: Decimal,
    pub rental_days: u32,
    pub usage_purpose: String,
    #[serde(default)]
    pub specific_requirements: Option<String>,
    #[serde(default)]
    pub contact_info: Option<String>,
    #[serde(default)]
    pub account_details: Option<serde_json::Value>,
}

/// Filter for the eligible-task listing
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EligibleFilter {
    /// Only sub-orders of this main order
    #[serde(default)]
    pub order_id: Option<String>,
    /// Only tasks paying at least this much
    #[serde(default)]
    pub min_price: Option<Decimal>,
    /// Hide tasks of this publisher (a publisher browsing as commenter)
    #[serde(default)]
    pub exclude_publisher: Option<String>,
    #[serde(default)]
    pub limit: Option<usize>,
}

/// Commenter submission for a claimed sub-order
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmitEvidenceRequest {
    pub screenshot_url: String,
    #[serde(default)]
    pub comment_content: String,
}

impl From<SubmitEvidenceRequest> for Evidence {
    fn from(req: SubmitEvidenceRequest) -> Self {
        Evidence {
            screenshot_url: req.screenshot_url,
            comment_content: req.comment_content,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReviewDecision {
    Approve,
    Reject,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReviewRequest {
    pub sub_order_id: String,
    pub decision: ReviewDecision,
    /// Shown to the commenter on rejection
    #[serde(default)]
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RechargeRequest {
    pub amount: Decimal,
    #[serde(default = "default_payment_method")]
    pub payment_method: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WithdrawRequest {
    pub amount: Decimal,
    #[serde(default = "default_payment_method")]
    pub method: String,
}

fn default_payment_method() -> String {
    "alipay".to_string()
}
