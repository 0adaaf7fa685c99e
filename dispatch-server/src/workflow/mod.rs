//! Order workflow: creation and cancellation of main orders
//!
//! Creation spans both stores: escrow is taken from the ledger first, then
//! the aggregate is persisted. The two writes run as a saga, so a failed
//! persist refunds the escrow before the error reaches the caller.
//!
//! Cancellation withdraws every unclaimed unit and refunds its share of the
//! escrow. The refund is recorded on the order (with a fixed transaction id)
//! in the same write that cancels the units, then paid; a refund that cannot
//! be paid stays in the pending-refund index for the sweeper.

use rust_decimal::Decimal;
use shared::models::{MainOrder, OrderVariant, Refund, Role, SubOrderStatus};
use shared::request::{CreateAccountRentalRequest, CreateCommentOrderRequest};
use shared::response::{OrderSummary, SweepReport};
use shared::util::{MILLIS_PER_DAY, now_millis};
use std::sync::Arc;

use crate::auth::CurrentUser;
use crate::error::{DispatchError, DispatchResult};
use crate::orders::{NewMainOrder, OrderError, OrderRepository};
use crate::settlement::{Saga, SettlementService, reversal_transaction_id};
use crate::utils::validation::{
    MAX_NAME_LEN, MAX_NOTE_LEN, MAX_SHORT_TEXT_LEN, MAX_URL_LEN, validate_amount, validate_days,
    validate_optional_text, validate_quantity, validate_required_text,
};

#[derive(Clone)]
pub struct OrderWorkflow {
    orders: Arc<dyn OrderRepository>,
    settlement: SettlementService,
    default_deadline_days: u32,
}

impl OrderWorkflow {
    pub fn new(
        orders: Arc<dyn OrderRepository>,
        settlement: SettlementService,
        default_deadline_days: u32,
    ) -> Self {
        Self {
            orders,
            settlement,
            default_deadline_days,
        }
    }

    /// Publish a comment campaign of `quantity` units at `unit_price` each
    pub fn create_comment_order(
        &self,
        caller: &CurrentUser,
        req: CreateCommentOrderRequest,
    ) -> DispatchResult<MainOrder> {
        caller.require_role(Role::Publisher)?;
        validate_required_text(&req.task_title, "task_title", MAX_NAME_LEN)?;
        validate_required_text(&req.task_requirements, "task_requirements", MAX_NOTE_LEN)?;
        validate_optional_text(&req.video_url, "video_url", MAX_URL_LEN)?;
        validate_optional_text(&req.mention, "mention", MAX_SHORT_TEXT_LEN)?;
        validate_amount(req.unit_price, "unit_price")?;
        validate_quantity(req.quantity)?;
        let deadline_days = req.deadline_days.unwrap_or(self.default_deadline_days);
        validate_days(deadline_days, "deadline_days")?;

        let total_cost = req
            .unit_price
            .checked_mul(Decimal::from(req.quantity))
            .ok_or_else(|| {
                DispatchError::Validation("unit_price x quantity is out of range".to_string())
            })?;
        if let Some(declared) = req.total_cost
            && declared != total_cost
        {
            return Err(DispatchError::Validation(format!(
                "total_cost {declared} does not match unit_price x quantity = {total_cost}"
            )));
        }

        let publish_time = now_millis();
        self.create(NewMainOrder {
            id: uuid::Uuid::new_v4().to_string(),
            user_id: caller.id.clone(),
            variant: OrderVariant::CommentCampaign,
            task_title: req.task_title.trim().to_string(),
            unit_price: req.unit_price,
            quantity: req.quantity,
            total_cost,
            task_requirements: req.task_requirements,
            video_url: non_blank(req.video_url),
            mention: non_blank(req.mention),
            account_details: None,
            escrow_transaction_id: None,
            publish_time,
            deadline: deadline_after(publish_time, deadline_days),
        })
    }

    /// Publish an account rental: one unit, priced at the whole cost
    pub fn create_account_rental(
        &self,
        caller: &CurrentUser,
        req: CreateAccountRentalRequest,
    ) -> DispatchResult<MainOrder> {
        caller.require_role(Role::Publisher)?;
        validate_required_text(&req.task_title, "task_title", MAX_NAME_LEN)?;
        validate_required_text(&req.usage_purpose, "usage_purpose", MAX_NOTE_LEN)?;
        validate_optional_text(&req.specific_requirements, "specific_requirements", MAX_NOTE_LEN)?;
        validate_optional_text(&req.contact_info, "contact_info", MAX_SHORT_TEXT_LEN)?;
        validate_amount(req.total_cost, "total_cost")?;
        validate_days(req.rental_days, "rental_days")?;

        let mut requirements = req.usage_purpose.trim().to_string();
        if let Some(specific) = non_blank(req.specific_requirements) {
            requirements.push('\n');
            requirements.push_str(&specific);
        }
        if let Some(contact) = non_blank(req.contact_info) {
            requirements.push_str("\nContact: ");
            requirements.push_str(&contact);
        }

        let publish_time = now_millis();
        self.create(NewMainOrder {
            id: uuid::Uuid::new_v4().to_string(),
            user_id: caller.id.clone(),
            variant: OrderVariant::AccountRental,
            task_title: req.task_title.trim().to_string(),
            unit_price: req.total_cost,
            quantity: 1,
            total_cost: req.total_cost,
            task_requirements: requirements,
            video_url: None,
            mention: None,
            account_details: req.account_details,
            escrow_transaction_id: None,
            publish_time,
            deadline: deadline_after(publish_time, req.rental_days),
        })
    }

    /// Escrow, then persist. A failed persist refunds the escrow.
    fn create(&self, mut new_order: NewMainOrder) -> DispatchResult<MainOrder> {
        let order_id = new_order.id.clone();
        let publisher_id = new_order.user_id.clone();
        let total_cost = new_order.total_cost;
        let settlement = &self.settlement;

        let mut saga: Saga<'_, DispatchError> = Saga::new("create_order");
        let escrow = saga.step(
            "escrow",
            || settlement.escrow_for_order(&publisher_id, total_cost, &order_id),
            || {
                settlement
                    .reverse_escrow(&publisher_id, total_cost, &order_id)
                    .map(|_| ())
            },
        )?;
        new_order.escrow_transaction_id = Some(escrow.id.clone());
        let order = saga.step_final("persist", || {
            self.orders
                .create_main_order(new_order)
                .map_err(DispatchError::from)
        })?;
        saga.finish();

        tracing::info!(
            order_id = %order.id,
            order_number = %order.order_number,
            user_id = %order.user_id,
            quantity = order.quantity,
            amount = %order.total_cost,
            "Order published"
        );
        Ok(order)
    }

    /// Withdraw every unit still waiting for a claimant and refund its
    /// escrow. Claimed units are unaffected.
    pub fn cancel_order(&self, caller: &CurrentUser, order_id: &str) -> DispatchResult<MainOrder> {
        caller.require_role(Role::Publisher)?;
        let now = now_millis();
        let mut recorded: Option<Refund> = None;

        let order = self.orders.update_main_order(order_id, &mut |order| {
            if order.user_id != caller.id {
                return Err(OrderError::NotOwner {
                    order_id: order.id.clone(),
                    user_id: caller.id.clone(),
                });
            }
            let mut units = 0u32;
            for sub in order.sub_orders.iter_mut().filter(|s| s.is_eligible()) {
                sub.status = SubOrderStatus::SubCancelled;
                sub.updated_at = now;
                units += 1;
            }
            if units == 0 {
                return Err(OrderError::invalid_state(order.id.clone(), order.status));
            }
            let refund = Refund {
                transaction_id: format!(
                    "{}-{}",
                    reversal_transaction_id(&order.id),
                    order.refunds.len() + 1
                ),
                units,
                amount: order.unit_price * Decimal::from(units),
                created_at: now,
                settled: false,
            };
            order.refunds.push(refund.clone());
            recorded = Some(refund);
            Ok(())
        })?;

        tracing::info!(
            order_id = %order.id,
            user_id = %caller.id,
            cancelled = order.count_in(SubOrderStatus::SubCancelled),
            status = %order.status,
            "Order cancelled"
        );

        let Some(refund) = recorded else {
            return Ok(order);
        };
        match self.settle_refund(&order, &refund) {
            Ok(settled) => Ok(settled),
            Err(e) => {
                tracing::warn!(
                    order_id = %order.id,
                    transaction_id = %refund.transaction_id,
                    error = %e,
                    "Refund deferred to the sweeper"
                );
                Ok(order)
            }
        }
    }

    /// Pay every recorded refund not yet settled
    pub fn retry_pending_refunds(&self) -> DispatchResult<SweepReport> {
        let mut report = SweepReport::default();
        for order_id in self.orders.pending_refunds()? {
            let order = match self.orders.get_main_order(&order_id) {
                Ok(order) => order,
                Err(e) => {
                    report.refunds_failed += 1;
                    tracing::warn!(order_id = %order_id, error = %e, "Refund retry failed");
                    continue;
                }
            };
            for refund in order.refunds.iter().filter(|r| !r.settled) {
                report.refunds_retried += 1;
                if let Err(e) = self.settle_refund(&order, refund) {
                    report.refunds_failed += 1;
                    tracing::warn!(
                        order_id = %order_id,
                        transaction_id = %refund.transaction_id,
                        error = %e,
                        "Refund retry failed"
                    );
                }
            }
        }
        Ok(report)
    }

    fn settle_refund(&self, order: &MainOrder, refund: &Refund) -> DispatchResult<MainOrder> {
        self.settlement.reverse_escrow_as(
            &refund.transaction_id,
            &order.user_id,
            refund.amount,
            &order.id,
        )?;
        let updated = self.orders.update_main_order(&order.id, &mut |order| {
            if let Some(r) = order
                .refunds
                .iter_mut()
                .find(|r| r.transaction_id == refund.transaction_id)
            {
                r.settled = true;
            }
            Ok(())
        })?;
        tracing::info!(
            order_id = %order.id,
            user_id = %order.user_id,
            amount = %refund.amount,
            transaction_id = %refund.transaction_id,
            "Escrow refunded"
        );
        Ok(updated)
    }

    /// Orders published by the caller, newest first
    pub fn list_orders(&self, caller: &CurrentUser) -> DispatchResult<Vec<OrderSummary>> {
        caller.require_role(Role::Publisher)?;
        let orders = self.orders.orders_for_publisher(&caller.id)?;
        Ok(orders.iter().map(OrderSummary::from).collect())
    }

    /// Full aggregate, visible to its publisher and to admins
    pub fn order_detail(&self, caller: &CurrentUser, order_id: &str) -> DispatchResult<MainOrder> {
        if !caller.is_admin() {
            caller.require_role(Role::Publisher)?;
        }
        let order = self.orders.get_main_order(order_id)?;
        if !caller.is_admin() && order.user_id != caller.id {
            return Err(DispatchError::forbidden(
                crate::error::Ownership::Publisher,
                order_id,
                caller.id.as_str(),
            ));
        }
        Ok(order)
    }
}

fn deadline_after(publish_time: i64, days: u32) -> i64 {
    publish_time.saturating_add(MILLIS_PER_DAY.saturating_mul(i64::from(days)))
}

fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::claim::ClaimEngine;
    use crate::ledger::{LedgerStorage, LedgerStore};
    use crate::orders::OrderStorage;
    use crate::settlement::{LoggingProcessor, escrow_transaction_id};
    use shared::models::{MainOrderStatus, TransactionKind};
    use crate::utils::validation::{MAX_AMOUNT, MAX_QUANTITY};

    struct Fixture {
        orders: Arc<OrderStorage>,
        ledger: Arc<LedgerStorage>,
        settlement: SettlementService,
        workflow: OrderWorkflow,
    }

    fn setup(funds: i64) -> Fixture {
        let orders = Arc::new(OrderStorage::open_in_memory().unwrap());
        let ledger = Arc::new(LedgerStorage::open_in_memory().unwrap());
        let settlement = SettlementService::new(ledger.clone(), Arc::new(LoggingProcessor));
        if funds > 0 {
            settlement.recharge("pub", Decimal::from(funds), "alipay").unwrap();
        }
        Fixture {
            workflow: OrderWorkflow::new(orders.clone(), settlement.clone(), 7),
            orders,
            ledger,
            settlement,
        }
    }

    fn publisher(id: &str) -> CurrentUser {
        CurrentUser::new(id, id, Role::Publisher)
    }

    fn comment_request(unit_price: i64, quantity: u32) -> CreateCommentOrderRequest {
        CreateCommentOrderRequest {
            task_title: "Comment on my video".into(),
            unit_price: Decimal::from(unit_price),
            quantity,
            task_requirements: "Mention the product".into(),
            deadline_days: None,
            total_cost: None,
            video_url: Some("https://video/1".into()),
            mention: Some("  ".into()),
        }
    }

    #[test]
    fn test_create_comment_order_takes_escrow() {
        let f = setup(100);
        let order = f
            .workflow
            .create_comment_order(&publisher("pub"), comment_request(10, 2))
            .unwrap();

        assert_eq!(order.total_cost, Decimal::from(20));
        assert_eq!(order.sub_orders.len(), 2);
        assert!(order.order_number.starts_with("DY"));
        assert_eq!(order.deadline - order.publish_time, 7 * MILLIS_PER_DAY);
        assert!(order.mention.is_none());
        assert_eq!(
            order.escrow_transaction_id.as_deref(),
            Some(escrow_transaction_id(&order.id).as_str())
        );

        assert_eq!(f.ledger.get_account("pub").unwrap().balance, Decimal::from(80));
        let escrow = f
            .ledger
            .get_transaction(&escrow_transaction_id(&order.id))
            .unwrap();
        assert_eq!(escrow.kind, TransactionKind::Expense);
        assert_eq!(escrow.order_id.as_deref(), Some(order.id.as_str()));
    }

    #[test]
    fn test_insufficient_balance_creates_nothing() {
        let f = setup(15);
        let err = f
            .workflow
            .create_comment_order(&publisher("pub"), comment_request(10, 2))
            .unwrap_err();
        assert!(matches!(err, DispatchError::InsufficientBalance { .. }));
        assert_eq!(f.ledger.get_account("pub").unwrap().balance, Decimal::from(15));
        assert!(f.orders.orders_for_publisher("pub").unwrap().is_empty());
        assert_eq!(f.ledger.transactions_for_user("pub").unwrap().len(), 1);
    }

    #[test]
    fn test_create_validation() {
        let f = setup(100);
        let caller = publisher("pub");

        let mut req = comment_request(10, 2);
        req.total_cost = Some(Decimal::from(25));
        assert!(matches!(
            f.workflow.create_comment_order(&caller, req),
            Err(DispatchError::Validation(_))
        ));
        assert!(matches!(
            f.workflow.create_comment_order(&caller, comment_request(0, 2)),
            Err(DispatchError::Validation(_))
        ));
        assert!(matches!(
            f.workflow.create_comment_order(&caller, comment_request(10, 0)),
            Err(DispatchError::Validation(_))
        ));
        let mut req = comment_request(10, 1);
        req.task_title = " ".into();
        assert!(matches!(
            f.workflow.create_comment_order(&caller, req),
            Err(DispatchError::Validation(_))
        ));

        let commenter = CurrentUser::new("c", "c", Role::Commenter);
        assert!(matches!(
            f.workflow.create_comment_order(&commenter, comment_request(10, 1)),
            Err(DispatchError::Unauthorized { .. })
        ));
        assert_eq!(f.ledger.get_account("pub").unwrap().balance, Decimal::from(100));
    }

    #[test]
    fn test_out_of_range_price_is_a_validation_error() {
        let f = setup(100);
        let caller = publisher("pub");

        let mut req = comment_request(1, 2);
        req.unit_price = Decimal::MAX;
        assert!(matches!(
            f.workflow.create_comment_order(&caller, req),
            Err(DispatchError::Validation(_))
        ));

        let mut req = comment_request(1, MAX_QUANTITY);
        req.unit_price = Decimal::from(MAX_AMOUNT);
        let err = f.workflow.create_comment_order(&caller, req).unwrap_err();
        assert!(matches!(err, DispatchError::InsufficientBalance { .. }));
        assert!(f.orders.orders_for_publisher("pub").unwrap().is_empty());
    }

    #[test]
    fn test_account_rental_is_one_unit() {
        let f = setup(100);
        let order = f
            .workflow
            .create_account_rental(
                &publisher("pub"),
                CreateAccountRentalRequest {
                    task_title: "Rent a 10k account".into(),
                    total_cost: Decimal::from(60),
                    rental_days: 3,
                    usage_purpose: "Product launch".into(),
                    specific_requirements: Some("Verified".into()),
                    contact_info: Some("wx: abc".into()),
                    account_details: Some(serde_json::json!({"followers": 10000})),
                },
            )
            .unwrap();

        assert_eq!(order.variant, OrderVariant::AccountRental);
        assert!(order.order_number.starts_with("AC"));
        assert_eq!(order.quantity, 1);
        assert_eq!(order.unit_price, Decimal::from(60));
        assert_eq!(order.task_requirements, "Product launch\nVerified\nContact: wx: abc");
        assert_eq!(order.deadline - order.publish_time, 3 * MILLIS_PER_DAY);
        assert_eq!(
            order.sub_orders[0].account_details,
            Some(serde_json::json!({"followers": 10000}))
        );
        assert_eq!(f.ledger.get_account("pub").unwrap().balance, Decimal::from(40));
    }

    #[test]
    fn test_cancel_refunds_unclaimed_units() {
        let f = setup(100);
        let order = f
            .workflow
            .create_comment_order(&publisher("pub"), comment_request(10, 3))
            .unwrap();
        let claims = ClaimEngine::new(f.orders.clone(), 180);
        claims
            .claim(
                &CurrentUser::new("c", "c", Role::Commenter),
                &order.sub_orders[0].id,
            )
            .unwrap();

        let cancelled = f.workflow.cancel_order(&publisher("pub"), &order.id).unwrap();
        assert_eq!(cancelled.count_in(SubOrderStatus::SubCancelled), 2);
        assert_eq!(cancelled.sub_orders[0].status, SubOrderStatus::SubProgress);
        assert_eq!(cancelled.status, MainOrderStatus::MainProgress);
        assert_eq!(cancelled.refunds.len(), 1);
        assert!(cancelled.refunds[0].settled);
        assert_eq!(cancelled.refunds[0].amount, Decimal::from(20));

        // 100 - 30 escrow + 20 refund
        assert_eq!(f.ledger.get_account("pub").unwrap().balance, Decimal::from(90));
        assert!(f.orders.pending_refunds().unwrap().is_empty());

        // nothing left to cancel
        let err = f.workflow.cancel_order(&publisher("pub"), &order.id).unwrap_err();
        assert!(matches!(err, DispatchError::InvalidState { .. }));
    }

    #[test]
    fn test_cancel_requires_owner() {
        let f = setup(100);
        let order = f
            .workflow
            .create_comment_order(&publisher("pub"), comment_request(10, 1))
            .unwrap();
        let err = f.workflow.cancel_order(&publisher("other"), &order.id).unwrap_err();
        assert!(matches!(err, DispatchError::Forbidden { .. }));
        assert_eq!(
            f.orders.get_main_order(&order.id).unwrap().count_in(SubOrderStatus::SubCancelled),
            0
        );
    }

    #[test]
    fn test_cancel_everything_completes_order() {
        let f = setup(100);
        let order = f
            .workflow
            .create_comment_order(&publisher("pub"), comment_request(10, 2))
            .unwrap();
        let cancelled = f.workflow.cancel_order(&publisher("pub"), &order.id).unwrap();
        assert_eq!(cancelled.status, MainOrderStatus::MainCompleted);
        assert_eq!(f.ledger.get_account("pub").unwrap().balance, Decimal::from(100));
    }

    #[test]
    fn test_unsettled_refund_is_retried_once() {
        let f = setup(100);
        let order = f
            .workflow
            .create_comment_order(&publisher("pub"), comment_request(10, 2))
            .unwrap();
        // cancellation recorded but the refund never paid
        f.orders
            .update_main_order(&order.id, &mut |o| {
                o.sub_orders[1].status = SubOrderStatus::SubCancelled;
                o.refunds.push(Refund {
                    transaction_id: format!("{}-1", reversal_transaction_id(&o.id)),
                    units: 1,
                    amount: Decimal::from(10),
                    created_at: 0,
                    settled: false,
                });
                Ok(())
            })
            .unwrap();
        assert_eq!(f.orders.pending_refunds().unwrap(), vec![order.id.clone()]);

        let report = f.workflow.retry_pending_refunds().unwrap();
        assert_eq!(report.refunds_retried, 1);
        assert_eq!(report.refunds_failed, 0);
        assert_eq!(f.ledger.get_account("pub").unwrap().balance, Decimal::from(90));
        assert!(f.orders.pending_refunds().unwrap().is_empty());

        // paying the same refund again is a no-op
        f.settlement
            .reverse_escrow_as(
                &format!("{}-1", reversal_transaction_id(&order.id)),
                "pub",
                Decimal::from(10),
                &order.id,
            )
            .unwrap();
        assert_eq!(f.ledger.get_account("pub").unwrap().balance, Decimal::from(90));
    }

    #[test]
    fn test_order_listing_and_detail() {
        let f = setup(100);
        let order = f
            .workflow
            .create_comment_order(&publisher("pub"), comment_request(10, 2))
            .unwrap();

        let list = f.workflow.list_orders(&publisher("pub")).unwrap();
        assert_eq!(list.len(), 1);
        assert_eq!(list[0].id, order.id);
        assert_eq!(list[0].status, "main_progress");

        assert!(f.workflow.order_detail(&publisher("pub"), &order.id).is_ok());
        assert!(matches!(
            f.workflow.order_detail(&publisher("other"), &order.id),
            Err(DispatchError::Forbidden { .. })
        ));
        let admin = CurrentUser::new("root", "root", Role::Admin);
        assert!(f.workflow.order_detail(&admin, &order.id).is_ok());
    }
}
