//! Per-commenter claim cooldown, enforced by the HTTP session layer
//!
//! After a successful claim a commenter must wait `window` before the next
//! one. The slot is reserved before the claim runs and given back if the
//! claim fails, so two simultaneous requests from one commenter cannot both
//! pass the check.

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use std::sync::Arc;

use crate::error::{DispatchError, DispatchResult};

#[derive(Debug, Clone)]
pub struct ClaimCooldown {
    window_ms: i64,
    last_claim: Arc<DashMap<String, i64>>,
}

/// A reserved claim slot. Call [`CooldownReservation::release`] when the
/// claim did not go through; dropping it keeps the cooldown running.
#[must_use]
#[derive(Debug)]
pub struct CooldownReservation {
    user_id: String,
    previous: Option<i64>,
    last_claim: Arc<DashMap<String, i64>>,
}

impl CooldownReservation {
    /// Put back the state from before the reservation
    pub fn release(self) {
        match self.previous {
            Some(at) => {
                self.last_claim.insert(self.user_id, at);
            }
            None => {
                self.last_claim.remove(&self.user_id);
            }
        }
    }
}

impl ClaimCooldown {
    pub fn new(window_secs: u64) -> Self {
        Self {
            window_ms: window_secs.saturating_mul(1000).min(i64::MAX as u64) as i64,
            last_claim: Arc::new(DashMap::new()),
        }
    }

    /// Reserve a claim for `user_id` at `now`, or fail with `ClaimCooldown`
    pub fn reserve(&self, user_id: &str, now: i64) -> DispatchResult<CooldownReservation> {
        let previous = match self.last_claim.entry(user_id.to_string()) {
            Entry::Occupied(mut entry) => {
                let last = *entry.get();
                let elapsed = now.saturating_sub(last);
                if elapsed < self.window_ms {
                    let remaining_ms = self.window_ms - elapsed;
                    return Err(DispatchError::ClaimCooldown {
                        retry_after_secs: (remaining_ms as u64).div_ceil(1000),
                    });
                }
                entry.insert(now);
                Some(last)
            }
            Entry::Vacant(entry) => {
                entry.insert(now);
                None
            }
        };

        Ok(CooldownReservation {
            user_id: user_id.to_string(),
            previous,
            last_claim: self.last_claim.clone(),
        })
    }

    /// Forget entries whose window has passed
    pub fn purge(&self, now: i64) -> usize {
        let before = self.last_claim.len();
        self.last_claim
            .retain(|_, last| now.saturating_sub(*last) < self.window_ms);
        before - self.last_claim.len()
    }
}
