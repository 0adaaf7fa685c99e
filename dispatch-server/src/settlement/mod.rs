//! Settlement service: every money movement the engine performs
//!
//! Each operation pairs a balance mutation with a ledger entry. The two
//! writes run as a [`saga::Saga`]: if the entry cannot be appended the
//! balance mutation is undone, so a balance never moves without a matching
//! entry.
//!
//! Transaction ids are derived from what they settle (`escrow-<order>`,
//! `payout-<sub_order>`, `reversal-<order>`), which makes retries
//! idempotent: a second attempt finds the existing entry instead of paying
//! twice.

pub mod saga;
pub mod withdrawal;

pub use saga::{Saga, SagaError};
pub use withdrawal::{LoggingProcessor, WithdrawalProcessor, WithdrawalRejected};

use rust_decimal::Decimal;
use shared::models::{Account, Transaction, TransactionKind, TransactionStatus};
use shared::response::{AccountSummary, ReconcileReport, SweepReport};
use shared::util::now_millis;
use std::sync::Arc;

use crate::error::{DispatchError, DispatchResult};
use crate::ledger::{LedgerError, LedgerStore};

pub fn escrow_transaction_id(order_id: &str) -> String {
    format!("escrow-{}", order_id)
}

pub fn payout_transaction_id(sub_order_id: &str) -> String {
    format!("payout-{}", sub_order_id)
}

pub fn reversal_transaction_id(order_id: &str) -> String {
    format!("reversal-{}", order_id)
}

#[derive(Clone)]
pub struct SettlementService {
    ledger: Arc<dyn LedgerStore>,
    processor: Arc<dyn WithdrawalProcessor>,
}

impl SettlementService {
    pub fn new(ledger: Arc<dyn LedgerStore>, processor: Arc<dyn WithdrawalProcessor>) -> Self {
        Self { ledger, processor }
    }

    pub fn ledger(&self) -> &Arc<dyn LedgerStore> {
        &self.ledger
    }

    /// Debit the publisher and record the `expense` entry.
    ///
    /// `InsufficientBalance` is returned before anything is written.
    pub fn escrow_for_order(
        &self,
        publisher_id: &str,
        total_cost: Decimal,
        order_id: &str,
    ) -> DispatchResult<Transaction> {
        let tx = Transaction::completed(
            escrow_transaction_id(order_id),
            publisher_id,
            TransactionKind::Expense,
            total_cost,
            format!("Escrow for order {}", order_id),
            now_millis(),
        )
        .for_order(order_id);

        let tx = self.apply(tx, Movement::Debit)?;
        tracing::info!(
            order_id = %order_id,
            user_id = %publisher_id,
            amount = %total_cost,
            "Escrow taken"
        );
        Ok(tx)
    }

    /// Credit the commenter for one approved sub-order. Idempotent per
    /// sub-order.
    pub fn accrue_payout(
        &self,
        commenter_id: &str,
        amount: Decimal,
        order_id: &str,
        sub_order_id: &str,
    ) -> DispatchResult<Transaction> {
        let tx = Transaction::completed(
            payout_transaction_id(sub_order_id),
            commenter_id,
            TransactionKind::Payout,
            amount,
            format!("Payout for task {}", sub_order_id),
            now_millis(),
        )
        .for_order(order_id)
        .for_sub_order(sub_order_id);

        self.apply_once(tx, Movement::Credit)
    }

    /// Refund escrow to the publisher
    pub fn reverse_escrow(
        &self,
        publisher_id: &str,
        amount: Decimal,
        order_id: &str,
    ) -> DispatchResult<Transaction> {
        self.reverse_escrow_as(
            &reversal_transaction_id(order_id),
            publisher_id,
            amount,
            order_id,
        )
    }

    /// [`Self::reverse_escrow`] under a caller-chosen transaction id, for
    /// orders refunded in several parts. Idempotent per id.
    pub fn reverse_escrow_as(
        &self,
        transaction_id: &str,
        publisher_id: &str,
        amount: Decimal,
        order_id: &str,
    ) -> DispatchResult<Transaction> {
        let tx = Transaction::completed(
            transaction_id,
            publisher_id,
            TransactionKind::Reversal,
            amount,
            format!("Escrow refund for order {}", order_id),
            now_millis(),
        )
        .for_order(order_id);

        self.apply_once(tx, Movement::Credit)
    }

    /// Money paid in through an external channel
    pub fn recharge(
        &self,
        user_id: &str,
        amount: Decimal,
        payment_method: &str,
    ) -> DispatchResult<Transaction> {
        let tx = Transaction::completed(
            format!("recharge-{}", uuid::Uuid::new_v4()),
            user_id,
            TransactionKind::Recharge,
            amount,
            format!("Recharge via {}", payment_method),
            now_millis(),
        )
        .with_payment_method(payment_method);

        self.apply(tx, Movement::Credit)
    }

    /// Freeze the amount, hand it to the processor, then settle the entry.
    ///
    /// On rejection the money returns to the balance, the entry is marked
    /// `failed` and `WithdrawalFailed` is returned. Once approved the
    /// withdrawal is recorded before it is settled; if settling fails the
    /// entry comes back still `pending` and
    /// [`Self::retry_pending_withdrawals`] finishes it.
    pub async fn request_withdrawal(
        &self,
        user_id: &str,
        amount: Decimal,
        method: &str,
    ) -> DispatchResult<Transaction> {
        let tx = Transaction::pending(
            format!("withdrawal-{}", uuid::Uuid::new_v4()),
            user_id,
            TransactionKind::Withdrawal,
            amount,
            format!("Withdrawal via {}", method),
            now_millis(),
        )
        .with_payment_method(method);
        let tx_id = tx.id.clone();

        let mut saga = Saga::new("withdrawal");
        saga.step(
            "freeze",
            || self.ledger.freeze(user_id, amount),
            || self.ledger.unfreeze(user_id, amount).map(drop),
        )?;
        let pending = saga.step_final("append", || self.ledger.append_transaction(tx))?;
        saga.finish();

        match self.processor.process(&pending).await {
            Ok(reference) => {
                if let Err(e) = self.ledger.mark_withdrawal_approved(&tx_id) {
                    tracing::error!(
                        transaction_id = %tx_id,
                        user_id = %user_id,
                        amount = %amount,
                        reference = %reference,
                        error = %e,
                        "Approved withdrawal could not be recorded"
                    );
                    return Err(e.into());
                }
                match self.ledger.settle_withdrawal(&tx_id) {
                    Ok(done) => {
                        tracing::info!(
                            transaction_id = %tx_id,
                            user_id = %user_id,
                            amount = %amount,
                            reference = %reference,
                            "Withdrawal completed"
                        );
                        Ok(done)
                    }
                    Err(e) => {
                        tracing::warn!(
                            transaction_id = %tx_id,
                            reference = %reference,
                            error = %e,
                            "Withdrawal approved, settlement left to the sweeper"
                        );
                        Ok(pending)
                    }
                }
            }
            Err(rejected) => {
                self.ledger.unfreeze(user_id, amount)?;
                self.ledger
                    .finalize_transaction(&tx_id, TransactionStatus::Failed)?;
                tracing::warn!(
                    transaction_id = %tx_id,
                    user_id = %user_id,
                    reason = %rejected,
                    "Withdrawal rejected"
                );
                Err(DispatchError::WithdrawalFailed(rejected.0))
            }
        }
    }

    /// Settle withdrawals the rail approved but the ledger never completed
    pub fn retry_pending_withdrawals(&self) -> DispatchResult<SweepReport> {
        let mut report = SweepReport::default();
        for tx_id in self.ledger.approved_withdrawals()? {
            report.withdrawals_retried += 1;
            match self.ledger.settle_withdrawal(&tx_id) {
                Ok(tx) => tracing::info!(
                    transaction_id = %tx_id,
                    user_id = %tx.user_id,
                    status = tx.status.as_str(),
                    "Withdrawal settled on retry"
                ),
                Err(e) => {
                    report.withdrawals_failed += 1;
                    tracing::warn!(transaction_id = %tx_id, error = %e, "Withdrawal retry failed");
                }
            }
        }
        Ok(report)
    }

    /// Balance view; an account that never saw money reads as zero
    pub fn account_summary(&self, user_id: &str) -> DispatchResult<AccountSummary> {
        let account = match self.ledger.get_account(user_id) {
            Ok(account) => account,
            Err(LedgerError::AccountNotFound(_)) => Account::new(user_id, now_millis()),
            Err(e) => return Err(e.into()),
        };
        Ok(AccountSummary::from(&account))
    }

    pub fn transactions(&self, user_id: &str) -> DispatchResult<Vec<Transaction>> {
        Ok(self.ledger.transactions_for_user(user_id)?)
    }

    /// Recompute `balance + frozen_amount` from completed entries
    pub fn reconcile(&self, user_id: &str) -> DispatchResult<ReconcileReport> {
        let recorded = match self.ledger.get_account(user_id) {
            Ok(account) => account.total(),
            Err(LedgerError::AccountNotFound(_)) => Decimal::ZERO,
            Err(e) => return Err(e.into()),
        };
        let transactions = self.ledger.transactions_for_user(user_id)?;
        let overflow = || LedgerError::AmountOverflow {
            user_id: user_id.to_string(),
        };
        let derived = transactions
            .iter()
            .filter(|tx| tx.status == TransactionStatus::Completed)
            .map(Transaction::signed_amount)
            .try_fold(Decimal::ZERO, |sum, amount| sum.checked_add(amount))
            .ok_or_else(overflow)?;
        let drift = recorded.checked_sub(derived).ok_or_else(overflow)?;

        let report = ReconcileReport {
            user_id: user_id.to_string(),
            recorded,
            derived,
            drift,
            transactions: transactions.len(),
        };
        if !report.is_balanced() {
            tracing::error!(
                user_id = %user_id,
                recorded = %recorded,
                derived = %derived,
                "Ledger drift detected"
            );
        }
        Ok(report)
    }

    /// Balance mutation + entry as one saga
    fn apply(&self, tx: Transaction, movement: Movement) -> DispatchResult<Transaction> {
        let user_id = tx.user_id.clone();
        let amount = tx.amount;
        let ledger = &self.ledger;

        let mut saga = Saga::new(movement.saga_name());
        saga.step(
            movement.step_name(),
            || movement.apply(ledger.as_ref(), &user_id, amount),
            || movement.undo(ledger.as_ref(), &user_id, amount),
        )?;
        let tx = saga.step_final("append", || ledger.append_transaction(tx))?;
        saga.finish();
        Ok(tx)
    }

    /// [`Self::apply`] unless an entry with the same id already exists
    fn apply_once(&self, tx: Transaction, movement: Movement) -> DispatchResult<Transaction> {
        match self.ledger.get_transaction(&tx.id) {
            Ok(existing) => return Ok(existing),
            Err(LedgerError::TransactionNotFound(_)) => {}
            Err(e) => return Err(e.into()),
        }
        let tx_id = tx.id.clone();
        match self.apply(tx, movement) {
            // A concurrent attempt appended first; ours was rolled back
            Err(DispatchError::Duplicate(_)) => Ok(self.ledger.get_transaction(&tx_id)?),
            other => other,
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Movement {
    Debit,
    Credit,
}

impl Movement {
    fn saga_name(&self) -> &'static str {
        match self {
            Self::Debit => "debit_with_entry",
            Self::Credit => "credit_with_entry",
        }
    }

    fn step_name(&self) -> &'static str {
        match self {
            Self::Debit => "debit",
            Self::Credit => "credit",
        }
    }

    fn apply(&self, ledger: &dyn LedgerStore, user_id: &str, amount: Decimal) -> Result<Account, LedgerError> {
        match self {
            Self::Debit => ledger.debit(user_id, amount),
            Self::Credit => ledger.credit(user_id, amount),
        }
    }

    fn undo(&self, ledger: &dyn LedgerStore, user_id: &str, amount: Decimal) -> Result<(), LedgerError> {
        match self {
            Self::Debit => ledger.credit(user_id, amount).map(drop),
            Self::Credit => ledger.debit(user_id, amount).map(drop),
        }
    }
}
