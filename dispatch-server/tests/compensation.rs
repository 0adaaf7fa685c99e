//! Saga compensation when the order store fails after escrow was taken

mod common;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use common::{TestEnv, comment_order, publisher};
use dispatch_server::DispatchError;
use dispatch_server::db::StorageError;
use dispatch_server::orders::{
    MainOrderUpdate, NewMainOrder, OrderError, OrderRepository, OrderResult, OrderStorage,
    SubOrderUpdate,
};
use rust_decimal::Decimal;
use shared::error::ErrorCode;
use shared::models::{MainOrder, SubOrder, TransactionKind};
use shared::request::EligibleFilter;
use shared::response::EligibleTask;

/// Order store whose creates fail while `fail_creates` is set
struct FailingOrders {
    inner: OrderStorage,
    fail_creates: Arc<AtomicBool>,
}

impl OrderRepository for FailingOrders {
    fn create_main_order(&self, new_order: NewMainOrder) -> OrderResult<MainOrder> {
        if self.fail_creates.load(Ordering::SeqCst) {
            return Err(StorageError::Simulated("disk unplugged".into()).into());
        }
        self.inner.create_main_order(new_order)
    }
    fn get_main_order(&self, order_id: &str) -> OrderResult<MainOrder> {
        self.inner.get_main_order(order_id)
    }
    fn get_sub_order(&self, sub_order_id: &str) -> OrderResult<SubOrder> {
        self.inner.get_sub_order(sub_order_id)
    }
    fn find_eligible_sub_orders(&self, filter: &EligibleFilter) -> OrderResult<Vec<SubOrder>> {
        self.inner.find_eligible_sub_orders(filter)
    }
    fn eligible_tasks(&self, filter: &EligibleFilter) -> OrderResult<Vec<EligibleTask>> {
        self.inner.eligible_tasks(filter)
    }
    fn save(&self, order: &MainOrder) -> OrderResult<()> {
        self.inner.save(order)
    }
    fn update_sub_order(
        &self,
        sub_order_id: &str,
        update: &mut SubOrderUpdate<'_>,
    ) -> OrderResult<MainOrder> {
        self.inner.update_sub_order(sub_order_id, update)
    }
    fn update_main_order(
        &self,
        order_id: &str,
        update: &mut MainOrderUpdate<'_>,
    ) -> OrderResult<MainOrder> {
        self.inner.update_main_order(order_id, update)
    }
    fn orders_for_publisher(&self, user_id: &str) -> OrderResult<Vec<MainOrder>> {
        self.inner.orders_for_publisher(user_id)
    }
    fn sub_orders_for_commenter(&self, commenter_id: &str) -> OrderResult<Vec<SubOrder>> {
        self.inner.sub_orders_for_commenter(commenter_id)
    }
    fn expired_claims(&self, now: i64) -> OrderResult<Vec<String>> {
        self.inner.expired_claims(now)
    }
    fn pending_payouts(&self) -> OrderResult<Vec<String>> {
        self.inner.pending_payouts()
    }
    fn pending_refunds(&self) -> OrderResult<Vec<String>> {
        self.inner.pending_refunds()
    }
}

fn failing_env() -> (TestEnv, Arc<AtomicBool>) {
    let flag = Arc::new(AtomicBool::new(true));
    let switch = flag.clone();
    let env = TestEnv::with_orders(move |inner| {
        Arc::new(FailingOrders {
            inner,
            fail_creates: switch,
        })
    });
    (env, flag)
}

#[test]
fn failed_persist_refunds_escrow() {
    let (env, _) = failing_env();
    env.fund("pub", 50);

    let err = env
        .state
        .workflow
        .create_comment_order(&publisher("pub"), comment_order(10, 2))
        .unwrap_err();
    match &err {
        DispatchError::Persistence { compensated, .. } => assert!(*compensated),
        other => panic!("expected Persistence, got {other:?}"),
    }
    let app_err: dispatch_server::AppError = err.into();
    assert_eq!(app_err.code, ErrorCode::OrderPersistFailed);

    // escrow taken and given back: balance restored, both entries recorded
    assert_eq!(env.balance("pub"), Decimal::from(50));
    let kinds: Vec<_> = env
        .state
        .settlement
        .transactions("pub")
        .unwrap()
        .into_iter()
        .map(|t| t.kind)
        .collect();
    assert!(kinds.contains(&TransactionKind::Expense));
    assert!(kinds.contains(&TransactionKind::Reversal));
    assert!(env.state.settlement.reconcile("pub").unwrap().is_balanced());
    assert!(env.state.orders.orders_for_publisher("pub").unwrap().is_empty());
}

#[test]
fn store_recovers_after_failure() {
    let (env, flag) = failing_env();
    env.fund("pub", 50);
    assert!(env
        .state
        .workflow
        .create_comment_order(&publisher("pub"), comment_order(10, 2))
        .is_err());

    flag.store(false, Ordering::SeqCst);
    let order = env
        .state
        .workflow
        .create_comment_order(&publisher("pub"), comment_order(10, 2))
        .unwrap();
    assert_eq!(env.balance("pub"), Decimal::from(30));
    assert_eq!(env.state.orders.get_main_order(&order.id).unwrap().quantity, 2);
}

#[test]
fn order_errors_keep_their_meaning() {
    let err: DispatchError = OrderError::OrderNotFound("nope".into()).into();
    assert!(matches!(err, DispatchError::NotFound { .. }));
}
