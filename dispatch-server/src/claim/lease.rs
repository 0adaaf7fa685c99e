//! Release of abandoned claims
//!
//! A claim that was never submitted before its lease ran out goes back to
//! `waiting_collect`. Each release is its own conditional update, so a
//! submission that lands between the scan and the release wins.

use shared::models::SubOrderStatus;

use super::ClaimEngine;
use crate::error::DispatchResult;
use crate::orders::OrderError;

impl ClaimEngine {
    /// Return every expired, unsubmitted claim to the pool. Returns how many
    /// were released.
    pub fn release_expired_claims(&self, now: i64) -> DispatchResult<usize> {
        let candidates = self.orders.expired_claims(now)?;
        let mut released = 0;

        for sub_order_id in candidates {
            let mut previous_holder = None;
            let result = self.orders.update_sub_order(&sub_order_id, &mut |order, i| {
                let sub = &mut order.sub_orders[i];
                let expired = sub
                    .lease_expires_at
                    .is_some_and(|expires_at| expires_at <= now);
                if sub.status != SubOrderStatus::SubProgress
                    || !expired
                    || sub.screenshot_url.is_some()
                {
                    return Err(OrderError::invalid_state(sub.id.clone(), sub.status));
                }
                previous_holder = sub.commenter_id.clone();
                sub.clear_claim(now);
                Ok(())
            });

            match result {
                Ok(order) => {
                    released += 1;
                    tracing::info!(
                        sub_order_id = %sub_order_id,
                        order_id = %order.id,
                        commenter_id = previous_holder.as_deref().unwrap_or(""),
                        "Expired claim released"
                    );
                }
                Err(OrderError::InvalidState { .. }) => {
                    tracing::debug!(sub_order_id = %sub_order_id, "Claim moved on before release");
                }
                Err(e) => {
                    tracing::warn!(
                        sub_order_id = %sub_order_id,
                        error = %e,
                        "Failed to release expired claim"
                    );
                }
            }
        }

        Ok(released)
    }
}
