//! Submission / review state machine
//!
//! ```text
//! waiting_collect ──claim──▶ sub_progress ──submit──▶ sub_pending_review
//!        ▲                     ▲    │                        │
//!        └──lease expired──────┘    │            approve ────┴──── reject
//!                                   │               │               │
//!                                   │               ▼               │
//!                                   │         sub_completed         │
//!                                   └───────────────────────────────┘
//! ```
//!
//! Rejection hands the unit back to the same claimant with a fresh lease.
//! Approval commits `sub_completed` first and settles the payout second; a
//! payout that fails stays in the pending-payout index until the sweeper
//! settles it.

use shared::models::{Evidence, MainOrder, Role, SubOrder, SubOrderStatus};
use shared::request::ReviewDecision;
use shared::response::SweepReport;
use shared::util::now_millis;
use std::sync::Arc;

use crate::auth::CurrentUser;
use crate::error::{DispatchError, DispatchResult, Resource};
use crate::orders::{OrderError, OrderRepository};
use crate::settlement::SettlementService;

#[derive(Clone)]
pub struct SubmissionService {
    orders: Arc<dyn OrderRepository>,
    settlement: SettlementService,
    lease_ms: i64,
}

impl SubmissionService {
    pub fn new(
        orders: Arc<dyn OrderRepository>,
        settlement: SettlementService,
        lease_secs: u64,
    ) -> Self {
        Self {
            orders,
            settlement,
            lease_ms: lease_secs.saturating_mul(1000).min(i64::MAX as u64) as i64,
        }
    }

    /// Record evidence for a claimed sub-order and hand it to review
    pub fn submit(
        &self,
        caller: &CurrentUser,
        sub_order_id: &str,
        evidence: Evidence,
    ) -> DispatchResult<SubOrder> {
        caller.require_role(Role::Commenter)?;
        let now = now_millis();
        let screenshot = evidence.screenshot_url.trim().to_string();

        let order = self.orders.update_sub_order(sub_order_id, &mut |order, i| {
            let sub = &mut order.sub_orders[i];
            if sub.status != SubOrderStatus::SubProgress {
                return Err(OrderError::invalid_state(sub.id.clone(), sub.status));
            }
            if !sub.is_held_by(&caller.id) {
                return Err(OrderError::NotClaimant {
                    sub_order_id: sub.id.clone(),
                    commenter_id: caller.id.clone(),
                });
            }
            if screenshot.is_empty() {
                return Err(OrderError::MissingEvidence(sub.id.clone()));
            }
            sub.screenshot_url = Some(screenshot.clone());
            sub.comment_content = Some(evidence.comment_content.clone());
            sub.comment_time = Some(now);
            sub.status = SubOrderStatus::SubPendingReview;
            sub.lease_expires_at = None;
            sub.updated_at = now;
            Ok(())
        })?;

        tracing::info!(
            sub_order_id = %sub_order_id,
            order_id = %order.id,
            commenter_id = %caller.id,
            "Evidence submitted"
        );
        find_sub(&order, sub_order_id)
    }

    /// Approve or reject a submission. Only the publisher who owns the
    /// order, or an admin, may review.
    pub fn review(
        &self,
        caller: &CurrentUser,
        sub_order_id: &str,
        decision: ReviewDecision,
        reason: Option<String>,
    ) -> DispatchResult<SubOrder> {
        if !matches!(caller.role, Role::Publisher | Role::Admin) {
            caller.require_role(Role::Publisher)?;
        }
        let now = now_millis();
        let lease_expires_at = now.saturating_add(self.lease_ms);

        let order = self.orders.update_sub_order(sub_order_id, &mut |order, i| {
            if caller.role == Role::Publisher && order.user_id != caller.id {
                return Err(OrderError::NotOwner {
                    order_id: order.id.clone(),
                    user_id: caller.id.clone(),
                });
            }
            let sub = &mut order.sub_orders[i];
            if sub.status != SubOrderStatus::SubPendingReview {
                return Err(OrderError::invalid_state(sub.id.clone(), sub.status));
            }
            sub.reviewed_at = Some(now);
            sub.updated_at = now;
            match decision {
                ReviewDecision::Approve => {
                    sub.status = SubOrderStatus::SubCompleted;
                    sub.reject_reason = None;
                }
                ReviewDecision::Reject => {
                    sub.status = SubOrderStatus::SubProgress;
                    sub.screenshot_url = None;
                    sub.comment_content = None;
                    sub.comment_time = None;
                    sub.reject_reason = reason.clone();
                    sub.reject_count += 1;
                    sub.lease_expires_at = Some(lease_expires_at);
                }
            }
            Ok(())
        })?;

        tracing::info!(
            sub_order_id = %sub_order_id,
            order_id = %order.id,
            reviewer = %caller.id,
            decision = ?decision,
            order_status = %order.status,
            "Submission reviewed"
        );

        let sub = find_sub(&order, sub_order_id)?;
        if decision == ReviewDecision::Reject {
            return Ok(sub);
        }
        match self.settle_payout(&order, &sub) {
            Ok(settled) => Ok(settled),
            Err(e) => {
                tracing::warn!(
                    sub_order_id = %sub_order_id,
                    error = %e,
                    "Payout deferred to the sweeper"
                );
                Ok(sub)
            }
        }
    }

    /// Sub-orders of the caller's orders that wait for review
    pub fn pending_reviews(&self, caller: &CurrentUser) -> DispatchResult<Vec<SubOrder>> {
        caller.require_role(Role::Publisher)?;
        let orders = self.orders.orders_for_publisher(&caller.id)?;
        Ok(orders
            .into_iter()
            .flat_map(|o| o.sub_orders)
            .filter(|s| s.status == SubOrderStatus::SubPendingReview)
            .collect())
    }

    /// Settle every approved sub-order whose payout is still missing
    pub fn retry_pending_payouts(&self) -> DispatchResult<SweepReport> {
        let mut report = SweepReport::default();
        for sub_order_id in self.orders.pending_payouts()? {
            report.payouts_retried += 1;
            let result = self
                .orders
                .get_sub_order(&sub_order_id)
                .and_then(|sub| Ok((self.orders.get_main_order(&sub.parent_id)?, sub)))
                .map_err(DispatchError::from)
                .and_then(|(order, sub)| self.settle_payout(&order, &sub));
            if let Err(e) = result {
                report.payouts_failed += 1;
                tracing::warn!(sub_order_id = %sub_order_id, error = %e, "Payout retry failed");
            }
        }
        Ok(report)
    }

    /// Credit the claimant and stamp the payout id on the sub-order
    fn settle_payout(&self, order: &MainOrder, sub: &SubOrder) -> DispatchResult<SubOrder> {
        let commenter_id = sub
            .commenter_id
            .as_deref()
            .ok_or_else(|| DispatchError::invalid_state(sub.id.clone(), sub.status))?;
        let tx = self
            .settlement
            .accrue_payout(commenter_id, order.unit_price, &order.id, &sub.id)?;

        let updated = self.orders.update_sub_order(&sub.id, &mut |order, i| {
            let sub = &mut order.sub_orders[i];
            if sub.status != SubOrderStatus::SubCompleted {
                return Err(OrderError::invalid_state(sub.id.clone(), sub.status));
            }
            sub.payout_transaction_id = Some(tx.id.clone());
            Ok(())
        })?;

        tracing::info!(
            sub_order_id = %sub.id,
            commenter_id = %commenter_id,
            amount = %tx.amount,
            transaction_id = %tx.id,
            "Payout settled"
        );
        find_sub(&updated, &sub.id)
    }
}

fn find_sub(order: &MainOrder, sub_order_id: &str) -> DispatchResult<SubOrder> {
    order
        .sub_order(sub_order_id)
        .cloned()
        .ok_or_else(|| DispatchError::not_found(Resource::SubOrder, sub_order_id))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::claim::ClaimEngine;
    use crate::ledger::{LedgerStorage, LedgerStore};
    use crate::orders::{NewMainOrder, OrderStorage};
    use crate::settlement::{payout_transaction_id, LoggingProcessor};
    use rust_decimal::Decimal;
    use shared::models::{MainOrderStatus, OrderVariant};

    struct Fixture {
        orders: Arc<OrderStorage>,
        ledger: Arc<LedgerStorage>,
        claims: ClaimEngine,
        service: SubmissionService,
    }

    fn setup(quantity: u32) -> Fixture {
        let orders = Arc::new(OrderStorage::open_in_memory().unwrap());
        let ledger = Arc::new(LedgerStorage::open_in_memory().unwrap());
        orders
            .create_main_order(NewMainOrder {
                id: "o1".into(),
                user_id: "pub".into(),
                variant: OrderVariant::CommentCampaign,
                task_title: "title".into(),
                unit_price: Decimal::from(10),
                quantity,
                total_cost: Decimal::from(10 * quantity),
                task_requirements: "req".into(),
                video_url: None,
                mention: None,
                account_details: None,
                escrow_transaction_id: None,
                publish_time: 0,
                deadline: 1_000_000,
            })
            .unwrap();
        let settlement = SettlementService::new(ledger.clone(), Arc::new(LoggingProcessor));
        Fixture {
            claims: ClaimEngine::new(orders.clone(), 180),
            service: SubmissionService::new(orders.clone(), settlement, 180),
            orders,
            ledger,
        }
    }

    fn commenter(id: &str) -> CurrentUser {
        CurrentUser::new(id, id, Role::Commenter)
    }

    fn publisher(id: &str) -> CurrentUser {
        CurrentUser::new(id, id, Role::Publisher)
    }

    fn evidence(url: &str) -> Evidence {
        Evidence {
            screenshot_url: url.into(),
            comment_content: "great video".into(),
        }
    }

    #[test]
    fn test_submit_moves_to_pending_review() {
        let f = setup(1);
        f.claims.claim(&commenter("a"), "o1-001").unwrap();

        let sub = f
            .service
            .submit(&commenter("a"), "o1-001", evidence("https://img/1.png"))
            .unwrap();
        assert_eq!(sub.status, SubOrderStatus::SubPendingReview);
        assert_eq!(sub.screenshot_url.as_deref(), Some("https://img/1.png"));
        assert!(sub.comment_time.is_some());
        assert!(sub.lease_expires_at.is_none());
        // no longer subject to lease expiry
        assert!(f.orders.expired_claims(i64::MAX).unwrap().is_empty());
    }

    #[test]
    fn test_submit_preconditions() {
        let f = setup(1);
        let err = f
            .service
            .submit(&commenter("a"), "o1-001", evidence("x"))
            .unwrap_err();
        assert!(matches!(err, DispatchError::InvalidState { status, .. } if status == "waiting_collect"));

        f.claims.claim(&commenter("a"), "o1-001").unwrap();
        let err = f
            .service
            .submit(&commenter("b"), "o1-001", evidence("x"))
            .unwrap_err();
        assert!(matches!(err, DispatchError::Forbidden { .. }));

        let err = f
            .service
            .submit(&commenter("a"), "o1-001", evidence("   "))
            .unwrap_err();
        assert!(matches!(err, DispatchError::MissingEvidence(_)));

        let sub = f.orders.get_sub_order("o1-001").unwrap();
        assert_eq!(sub.status, SubOrderStatus::SubProgress);
        assert!(sub.screenshot_url.is_none());
    }

    #[test]
    fn test_approve_pays_claimant_once() {
        let f = setup(1);
        f.claims.claim(&commenter("a"), "o1-001").unwrap();
        f.service
            .submit(&commenter("a"), "o1-001", evidence("x"))
            .unwrap();

        let sub = f
            .service
            .review(&publisher("pub"), "o1-001", ReviewDecision::Approve, None)
            .unwrap();
        assert_eq!(sub.status, SubOrderStatus::SubCompleted);
        assert_eq!(
            sub.payout_transaction_id.as_deref(),
            Some(payout_transaction_id("o1-001").as_str())
        );
        assert_eq!(f.ledger.get_account("a").unwrap().balance, Decimal::from(10));
        assert_eq!(
            f.orders.get_main_order("o1").unwrap().status,
            MainOrderStatus::MainCompleted
        );

        // a second approval is rejected and pays nothing
        let err = f
            .service
            .review(&publisher("pub"), "o1-001", ReviewDecision::Approve, None)
            .unwrap_err();
        assert!(matches!(err, DispatchError::InvalidState { status, .. } if status == "sub_completed"));
        assert_eq!(f.ledger.get_account("a").unwrap().balance, Decimal::from(10));
        assert!(f.orders.pending_payouts().unwrap().is_empty());
    }

    #[test]
    fn test_reject_returns_to_claimant_with_fresh_lease() {
        let f = setup(1);
        f.claims.claim(&commenter("a"), "o1-001").unwrap();
        f.service
            .submit(&commenter("a"), "o1-001", evidence("x"))
            .unwrap();

        let sub = f
            .service
            .review(
                &publisher("pub"),
                "o1-001",
                ReviewDecision::Reject,
                Some("blurry".into()),
            )
            .unwrap();
        assert_eq!(sub.status, SubOrderStatus::SubProgress);
        assert!(sub.is_held_by("a"));
        assert!(sub.screenshot_url.is_none());
        assert_eq!(sub.reject_reason.as_deref(), Some("blurry"));
        assert_eq!(sub.reject_count, 1);
        assert!(sub.lease_expires_at.is_some());

        // resubmission goes back to review
        let sub = f
            .service
            .submit(&commenter("a"), "o1-001", evidence("y"))
            .unwrap();
        assert_eq!(sub.status, SubOrderStatus::SubPendingReview);
        assert!(f.ledger.get_account("a").is_err());
    }

    #[test]
    fn test_review_authorization() {
        let f = setup(1);
        f.claims.claim(&commenter("a"), "o1-001").unwrap();
        f.service
            .submit(&commenter("a"), "o1-001", evidence("x"))
            .unwrap();

        assert!(matches!(
            f.service
                .review(&commenter("a"), "o1-001", ReviewDecision::Approve, None),
            Err(DispatchError::Unauthorized { .. })
        ));
        assert!(matches!(
            f.service
                .review(&publisher("other"), "o1-001", ReviewDecision::Approve, None),
            Err(DispatchError::Forbidden { .. })
        ));

        let admin = CurrentUser::new("root", "root", Role::Admin);
        let sub = f
            .service
            .review(&admin, "o1-001", ReviewDecision::Approve, None)
            .unwrap();
        assert_eq!(sub.status, SubOrderStatus::SubCompleted);
    }

    #[test]
    fn test_pending_reviews_lists_owned_submissions() {
        let f = setup(2);
        f.claims.claim(&commenter("a"), "o1-001").unwrap();
        f.service
            .submit(&commenter("a"), "o1-001", evidence("x"))
            .unwrap();

        let pending = f.service.pending_reviews(&publisher("pub")).unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].id, "o1-001");
        assert!(f.service.pending_reviews(&publisher("other")).unwrap().is_empty());
    }

    #[test]
    fn test_unpaid_approval_is_retried() {
        let f = setup(1);
        f.claims.claim(&commenter("a"), "o1-001").unwrap();
        // approved without a payout, as after a failed accrual
        f.orders
            .update_sub_order("o1-001", &mut |order, i| {
                order.sub_orders[i].status = SubOrderStatus::SubCompleted;
                Ok(())
            })
            .unwrap();
        assert_eq!(f.orders.pending_payouts().unwrap(), vec!["o1-001".to_string()]);

        let report = f.service.retry_pending_payouts().unwrap();
        assert_eq!(report.payouts_retried, 1);
        assert_eq!(report.payouts_failed, 0);
        assert_eq!(f.ledger.get_account("a").unwrap().balance, Decimal::from(10));
        assert!(f.orders.pending_payouts().unwrap().is_empty());

        // nothing left to do
        let report = f.service.retry_pending_payouts().unwrap();
        assert_eq!(report, SweepReport::default());
    }
}
