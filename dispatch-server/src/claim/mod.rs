//! Claim engine: at most one claimant per sub-order
//!
//! A claim is one conditional update on the order repository. The check
//! (`waiting_collect`, no commenter) and the assignment run inside the same
//! write transaction, so of N concurrent claims for one sub-order exactly one
//! commits and the rest see `AlreadyClaimed`.

mod cooldown;
mod lease;

pub use cooldown::{ClaimCooldown, CooldownReservation};

use shared::models::{Role, SubOrder, SubOrderStatus};
use shared::request::EligibleFilter;
use shared::response::{ClaimResponse, EligibleTask};
use shared::util::now_millis;
use std::sync::Arc;

use crate::auth::CurrentUser;
use crate::error::{DispatchError, DispatchResult, Resource};
use crate::orders::{OrderError, OrderRepository};

#[derive(Clone)]
pub struct ClaimEngine {
    orders: Arc<dyn OrderRepository>,
    lease_ms: i64,
}

impl ClaimEngine {
    /// `lease_secs` bounds how long a claim may stay unsubmitted
    pub fn new(orders: Arc<dyn OrderRepository>, lease_secs: u64) -> Self {
        Self {
            orders,
            lease_ms: lease_secs.saturating_mul(1000).min(i64::MAX as u64) as i64,
        }
    }

    pub fn claim(&self, caller: &CurrentUser, sub_order_id: &str) -> DispatchResult<ClaimResponse> {
        caller.require_role(Role::Commenter)?;
        self.claim_at(caller, sub_order_id, now_millis())
    }

    pub(crate) fn claim_at(
        &self,
        caller: &CurrentUser,
        sub_order_id: &str,
        now: i64,
    ) -> DispatchResult<ClaimResponse> {
        let lease_expires_at = now.saturating_add(self.lease_ms);

        let order = self.orders.update_sub_order(sub_order_id, &mut |order, i| {
            let sub = &mut order.sub_orders[i];
            match sub.status {
                SubOrderStatus::WaitingCollect if sub.commenter_id.is_none() => {}
                SubOrderStatus::SubCancelled => {
                    return Err(OrderError::invalid_state(sub.id.clone(), sub.status));
                }
                _ => return Err(OrderError::AlreadyClaimed(sub.id.clone())),
            }
            sub.status = SubOrderStatus::SubProgress;
            sub.commenter_id = Some(caller.id.clone());
            sub.commenter_name = Some(caller.username.clone());
            sub.claimed_at = Some(now);
            sub.lease_expires_at = Some(lease_expires_at);
            sub.updated_at = now;
            Ok(())
        })?;

        let sub_order = order
            .sub_order(sub_order_id)
            .cloned()
            .ok_or_else(|| DispatchError::not_found(Resource::SubOrder, sub_order_id))?;

        tracing::info!(
            sub_order_id = %sub_order_id,
            order_id = %order.id,
            commenter_id = %caller.id,
            claimed = order.completed_quantity,
            quantity = order.quantity,
            "Task claimed"
        );

        Ok(ClaimResponse {
            sub_order,
            lease_expires_at,
        })
    }

    /// Open units a commenter may claim, oldest order first
    pub fn available_tasks(
        &self,
        caller: &CurrentUser,
        filter: &EligibleFilter,
    ) -> DispatchResult<Vec<EligibleTask>> {
        caller.require_role(Role::Commenter)?;
        Ok(self.orders.eligible_tasks(filter)?)
    }

    /// Units the caller holds in any state, most recent claim first
    pub fn held_tasks(&self, caller: &CurrentUser) -> DispatchResult<Vec<SubOrder>> {
        caller.require_role(Role::Commenter)?;
        Ok(self.orders.sub_orders_for_commenter(&caller.id)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::orders::{NewMainOrder, OrderStorage};
    use rust_decimal::Decimal;
    use shared::models::{MainOrderStatus, OrderVariant};

    fn setup(quantity: u32) -> (Arc<OrderStorage>, ClaimEngine) {
        let orders = Arc::new(OrderStorage::open_in_memory().unwrap());
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
        let engine = ClaimEngine::new(orders.clone(), 180);
        (orders, engine)
    }

    fn commenter(id: &str) -> CurrentUser {
        CurrentUser::new(id, format!("{}-name", id), Role::Commenter)
    }

    #[test]
    fn test_claim_assigns_and_counts() {
        let (orders, engine) = setup(2);
        let result = engine.claim_at(&commenter("a"), "o1-001", 1_000).unwrap();

        assert_eq!(result.lease_expires_at, 181_000);
        assert_eq!(result.sub_order.status, SubOrderStatus::SubProgress);
        assert_eq!(result.sub_order.commenter_id.as_deref(), Some("a"));
        assert_eq!(result.sub_order.commenter_name.as_deref(), Some("a-name"));

        let order = orders.get_main_order("o1").unwrap();
        assert_eq!(order.completed_quantity, 1);
        assert_eq!(order.status, MainOrderStatus::MainProgress);
    }

    #[test]
    fn test_second_claim_is_already_claimed() {
        let (orders, engine) = setup(1);
        engine.claim(&commenter("a"), "o1-001").unwrap();

        let err = engine.claim(&commenter("b"), "o1-001").unwrap_err();
        assert!(matches!(err, DispatchError::AlreadyClaimed(_)));
        // even the holder cannot claim twice
        let err = engine.claim(&commenter("a"), "o1-001").unwrap_err();
        assert!(matches!(err, DispatchError::AlreadyClaimed(_)));

        assert_eq!(
            orders.get_sub_order("o1-001").unwrap().commenter_id.as_deref(),
            Some("a")
        );
    }

    #[test]
    fn test_claim_requires_commenter_role() {
        let (_, engine) = setup(1);
        let publisher = CurrentUser::new("p", "p", Role::Publisher);
        assert!(matches!(
            engine.claim(&publisher, "o1-001"),
            Err(DispatchError::Unauthorized { .. })
        ));
    }

    #[test]
    fn test_claim_unknown_sub_order() {
        let (_, engine) = setup(1);
        assert!(matches!(
            engine.claim(&commenter("a"), "nope"),
            Err(DispatchError::NotFound {
                resource: Resource::SubOrder,
                ..
            })
        ));
    }

    #[test]
    fn test_listings_follow_claims() {
        let (_, engine) = setup(3);
        let a = commenter("a");
        assert_eq!(engine.available_tasks(&a, &EligibleFilter::default()).unwrap().len(), 3);

        engine.claim_at(&a, "o1-002", 1_000).unwrap();
        let open = engine.available_tasks(&a, &EligibleFilter::default()).unwrap();
        assert_eq!(
            open.iter().map(|t| t.id.as_str()).collect::<Vec<_>>(),
            vec!["o1-001", "o1-003"]
        );
        assert_eq!(open[0].remaining, "2/3");

        let held = engine.held_tasks(&a).unwrap();
        assert_eq!(held.len(), 1);
        assert_eq!(held[0].id, "o1-002");
        assert!(engine.held_tasks(&commenter("b")).unwrap().is_empty());
    }

    #[test]
    fn test_cancelled_sub_order_is_invalid_state() {
        let (orders, engine) = setup(2);
        orders
            .update_main_order("o1", &mut |order| {
                order.sub_orders[1].status = SubOrderStatus::SubCancelled;
                Ok(())
            })
            .unwrap();
        let err = engine.claim(&commenter("a"), "o1-002").unwrap_err();
        assert!(matches!(err, DispatchError::InvalidState { status, .. } if status == "sub_cancelled"));
    }
}
