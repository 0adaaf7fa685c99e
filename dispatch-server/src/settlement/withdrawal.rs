//! Withdrawal processors (bank / alipay payout rails)

use async_trait::async_trait;
use shared::models::Transaction;
use thiserror::Error;

#[derive(Debug, Error)]
#[error("Withdrawal rejected: {0}")]
pub struct WithdrawalRejected(pub String);

/// Opaque payout rail. Receives the pending withdrawal entry and returns an
/// external reference on success.
#[async_trait]
pub trait WithdrawalProcessor: Send + Sync {
    async fn process(&self, withdrawal: &Transaction) -> Result<String, WithdrawalRejected>;
}

/// Accepts every withdrawal and records it in the ledger log. Stands in for
/// the payout rail until one is configured.
#[derive(Debug, Default, Clone)]
pub struct LoggingProcessor;

#[async_trait]
impl WithdrawalProcessor for LoggingProcessor {
    async fn process(&self, withdrawal: &Transaction) -> Result<String, WithdrawalRejected> {
        crate::ledger_log!(
            "withdrawal_dispatched",
            transaction_id = %withdrawal.id,
            user_id = %withdrawal.user_id,
            amount = %withdrawal.amount,
            method = withdrawal.payment_method.as_deref().unwrap_or("unknown")
        );
        Ok(format!("manual-{}", withdrawal.id))
    }
}
