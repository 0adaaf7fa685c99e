//! Shared fixtures for the integration tests
#![allow(dead_code)]

use std::path::Path;
use std::sync::Arc;

use dispatch_server::auth::JwtConfig;
use dispatch_server::ledger::LedgerStorage;
use dispatch_server::orders::{OrderRepository, OrderStorage};
use dispatch_server::settlement::LoggingProcessor;
use dispatch_server::{Config, CurrentUser, ServerState};
use rust_decimal::Decimal;
use shared::models::Role;
use shared::request::CreateCommentOrderRequest;
use tempfile::TempDir;

pub const TEST_SECRET: &str = "integration-test-secret-0123456789abcdef";

pub fn test_config(work_dir: &Path) -> Config {
    Config {
        work_dir: work_dir.to_string_lossy().into_owned(),
        http_port: 0,
        environment: "development".into(),
        log_level: "debug".into(),
        jwt: JwtConfig::with_secret(TEST_SECRET),
        claim_lease_secs: 180,
        claim_cooldown_secs: 0,
        sweep_interval_secs: 30,
        default_deadline_days: 7,
        request_timeout_ms: 5_000,
    }
}

/// Server state over redb files in a temporary directory
pub struct TestEnv {
    pub dir: TempDir,
    pub state: ServerState,
}

impl TestEnv {
    pub fn new() -> Self {
        Self::with_config(|_| {})
    }

    pub fn with_config(adjust: impl FnOnce(&mut Config)) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let mut config = test_config(dir.path());
        adjust(&mut config);
        let state = ServerState::initialize(&config).unwrap();
        Self { dir, state }
    }

    /// Same, but with the order repository wrapped by `wrap`
    pub fn with_orders(
        wrap: impl FnOnce(OrderStorage) -> Arc<dyn OrderRepository>,
    ) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path());
        config.ensure_work_dir_structure().unwrap();
        let ledger = LedgerStorage::open(config.data_dir().join("ledger.redb")).unwrap();
        let orders = OrderStorage::open(config.data_dir().join("orders.redb")).unwrap();
        let state = ServerState::new(
            config,
            wrap(orders),
            Arc::new(ledger),
            Arc::new(LoggingProcessor),
        );
        Self { dir, state }
    }

    pub fn fund(&self, user_id: &str, amount: i64) {
        self.state
            .settlement
            .recharge(user_id, Decimal::from(amount), "alipay")
            .unwrap();
    }

    pub fn balance(&self, user_id: &str) -> Decimal {
        self.state.settlement.account_summary(user_id).unwrap().available
    }

    pub fn token(&self, user: &CurrentUser) -> String {
        self.state
            .jwt_service
            .generate_token(&user.id, &user.username, user.role)
            .unwrap()
    }
}

pub fn publisher(id: &str) -> CurrentUser {
    CurrentUser::new(id, format!("{id}-name"), Role::Publisher)
}

pub fn commenter(id: &str) -> CurrentUser {
    CurrentUser::new(id, format!("{id}-name"), Role::Commenter)
}

pub fn admin(id: &str) -> CurrentUser {
    CurrentUser::new(id, format!("{id}-name"), Role::Admin)
}

pub fn comment_order(unit_price: i64, quantity: u32) -> CreateCommentOrderRequest {
    CreateCommentOrderRequest {
        task_title: "Leave a comment".into(),
        unit_price: Decimal::from(unit_price),
        quantity,
        task_requirements: "At least ten words".into(),
        deadline_days: None,
        total_cost: None,
        video_url: None,
        mention: None,
    }
}
