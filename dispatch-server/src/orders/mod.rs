//! Order repository: the single writer of order state
//!
//! A [`MainOrder`] and all of its sub-orders are stored as one value, so
//! every write is atomic at the granularity of one aggregate. Conditional
//! transitions (claim, submit, review, release, cancel) run as closures
//! inside one write transaction via [`OrderRepository::update_sub_order`]
//! and [`OrderRepository::update_main_order`]: the closure sees the
//! committed state, a failed precondition aborts the transaction, and no
//! other writer can interleave between the check and the write.

mod error;
mod storage;

pub use error::{OrderError, OrderResult};
pub use storage::OrderStorage;

use rust_decimal::Decimal;
use shared::models::{MainOrder, OrderVariant, SubOrder};
use shared::request::EligibleFilter;
use shared::response::EligibleTask;

/// Everything needed to persist a new order.
///
/// The id is chosen by the caller (the escrow entry references it before
/// the order exists); the order number is assigned by the repository.
#[derive(Debug, Clone)]
pub struct NewMainOrder {
    pub id: String,
    pub user_id: String,
    pub variant: OrderVariant,
    pub task_title: String,
    pub unit_price: Decimal,
    pub quantity: u32,
    pub total_cost: Decimal,
    pub task_requirements: String,
    pub video_url: Option<String>,
    pub mention: Option<String>,
    /// Copied onto every sub-order (account rentals)
    pub account_details: Option<serde_json::Value>,
    pub escrow_transaction_id: Option<String>,
    pub publish_time: i64,
    pub deadline: i64,
}

/// Mutation applied to an aggregate and the index of the targeted sub-order
pub type SubOrderUpdate<'a> = dyn FnMut(&mut MainOrder, usize) -> OrderResult<()> + 'a;

pub type MainOrderUpdate<'a> = dyn FnMut(&mut MainOrder) -> OrderResult<()> + 'a;

pub trait OrderRepository: Send + Sync {
    /// Persist the aggregate with `quantity` sub-orders in `waiting_collect`
    fn create_main_order(&self, new_order: NewMainOrder) -> OrderResult<MainOrder>;

    fn get_main_order(&self, order_id: &str) -> OrderResult<MainOrder>;

    fn get_sub_order(&self, sub_order_id: &str) -> OrderResult<SubOrder>;

    /// Sub-orders in `waiting_collect` with no commenter, across open
    /// orders. Ordered by publish time, then sub-order id.
    fn find_eligible_sub_orders(&self, filter: &EligibleFilter) -> OrderResult<Vec<SubOrder>>;

    /// Same selection as [`Self::find_eligible_sub_orders`], joined with the
    /// parent for display
    fn eligible_tasks(&self, filter: &EligibleFilter) -> OrderResult<Vec<EligibleTask>>;

    /// Replace a stored aggregate. Terminal sub-orders may not change status.
    fn save(&self, order: &MainOrder) -> OrderResult<()>;

    /// Run `update` against the aggregate owning `sub_order_id` and commit
    /// the result, or abort if it returns an error.
    fn update_sub_order(
        &self,
        sub_order_id: &str,
        update: &mut SubOrderUpdate<'_>,
    ) -> OrderResult<MainOrder>;

    fn update_main_order(
        &self,
        order_id: &str,
        update: &mut MainOrderUpdate<'_>,
    ) -> OrderResult<MainOrder>;

    /// Newest first
    fn orders_for_publisher(&self, user_id: &str) -> OrderResult<Vec<MainOrder>>;

    /// Sub-orders currently held by the commenter, most recent claim first
    fn sub_orders_for_commenter(&self, commenter_id: &str) -> OrderResult<Vec<SubOrder>>;

    /// Claimed sub-orders whose lease ended at or before `now`
    fn expired_claims(&self, now: i64) -> OrderResult<Vec<String>>;

    /// Approved sub-orders whose payout has not been recorded yet
    fn pending_payouts(&self) -> OrderResult<Vec<String>>;

    /// Orders with a cancellation refund not yet paid back
    fn pending_refunds(&self) -> OrderResult<Vec<String>>;
}
