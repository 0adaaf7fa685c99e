use std::sync::Arc;
use std::time::Duration;

use shared::response::SweepReport;
use shared::util::now_millis;

use crate::auth::JwtService;
use crate::claim::{ClaimCooldown, ClaimEngine};
use crate::core::{BackgroundTasks, Config, Result};
use crate::error::DispatchResult;
use crate::ledger::{LedgerStorage, LedgerStore};
use crate::orders::{OrderRepository, OrderStorage};
use crate::settlement::{LoggingProcessor, SettlementService, WithdrawalProcessor};
use crate::submission::SubmissionService;
use crate::utils::logger::{APP_LOG_RETENTION_DAYS, cleanup_old_logs};
use crate::workflow::OrderWorkflow;

/// How often application logs are pruned
const LOG_CLEANUP_INTERVAL: Duration = Duration::from_secs(6 * 60 * 60);

/// 服务器状态 - 持有所有服务的单例引用
///
/// 使用 Arc 实现浅拷贝，克隆成本极低。
///
/// | 字段 | 说明 |
/// |------|------|
/// | config | 配置项 (不可变) |
/// | jwt_service | JWT 认证服务 |
/// | orders | 订单仓库 (orders.redb) |
/// | settlement | 资金结算 (ledger.redb) |
/// | claims | 领取引擎 |
/// | submissions | 提交 / 审核 |
/// | workflow | 订单创建与取消 |
/// | cooldown | 评论者领取冷却 (内存) |
#[derive(Clone)]
pub struct ServerState {
    pub config: Config,
    pub jwt_service: Arc<JwtService>,
    pub orders: Arc<dyn OrderRepository>,
    pub settlement: SettlementService,
    pub claims: ClaimEngine,
    pub submissions: SubmissionService,
    pub workflow: OrderWorkflow,
    pub cooldown: ClaimCooldown,
}

impl ServerState {
    /// 从已打开的存储组装服务
    ///
    /// 通常使用 [`Self::initialize`]；测试可以注入自己的仓库实现。
    pub fn new(
        config: Config,
        orders: Arc<dyn OrderRepository>,
        ledger: Arc<dyn LedgerStore>,
        processor: Arc<dyn WithdrawalProcessor>,
    ) -> Self {
        let settlement = SettlementService::new(ledger, processor);
        let jwt_service = Arc::new(JwtService::with_config(config.jwt.clone()));
        Self {
            claims: ClaimEngine::new(orders.clone(), config.claim_lease_secs),
            submissions: SubmissionService::new(
                orders.clone(),
                settlement.clone(),
                config.claim_lease_secs,
            ),
            workflow: OrderWorkflow::new(
                orders.clone(),
                settlement.clone(),
                config.default_deadline_days,
            ),
            cooldown: ClaimCooldown::new(config.claim_cooldown_secs),
            settlement,
            orders,
            jwt_service,
            config,
        }
    }

    /// 初始化服务器状态
    ///
    /// 按顺序初始化：
    /// 1. 工作目录结构
    /// 2. 账本数据库 (work_dir/data/ledger.redb)
    /// 3. 订单数据库 (work_dir/data/orders.redb)
    /// 4. 各服务
    pub fn initialize(config: &Config) -> Result<Self> {
        config.ensure_work_dir_structure()?;

        let data_dir = config.data_dir();
        let ledger = LedgerStorage::open(data_dir.join("ledger.redb"))?;
        let orders = OrderStorage::open(data_dir.join("orders.redb"))?;
        tracing::info!(data_dir = %data_dir.display(), "Stores opened");

        Ok(Self::new(
            config.clone(),
            Arc::new(orders),
            Arc::new(ledger),
            Arc::new(LoggingProcessor),
        ))
    }

    pub fn get_jwt_service(&self) -> Arc<JwtService> {
        self.jwt_service.clone()
    }

    /// One maintenance pass: release expired claims, settle missing payouts
    /// and refunds, forget stale cooldowns.
    pub fn sweep(&self) -> DispatchResult<SweepReport> {
        let now = now_millis();
        let released = self.claims.release_expired_claims(now)?;
        let payouts = self.submissions.retry_pending_payouts()?;
        let refunds = self.workflow.retry_pending_refunds()?;
        let withdrawals = self.settlement.retry_pending_withdrawals()?;
        let purged = self.cooldown.purge(now);

        let report = SweepReport {
            released,
            payouts_retried: payouts.payouts_retried,
            payouts_failed: payouts.payouts_failed,
            refunds_retried: refunds.refunds_retried,
            refunds_failed: refunds.refunds_failed,
            withdrawals_retried: withdrawals.withdrawals_retried,
            withdrawals_failed: withdrawals.withdrawals_failed,
        };
        if report != SweepReport::default() || purged > 0 {
            tracing::info!(
                released = report.released,
                payouts_retried = report.payouts_retried,
                payouts_failed = report.payouts_failed,
                refunds_retried = report.refunds_retried,
                refunds_failed = report.refunds_failed,
                withdrawals_retried = report.withdrawals_retried,
                withdrawals_failed = report.withdrawals_failed,
                cooldowns_purged = purged,
                "Sweep finished"
            );
        }
        Ok(report)
    }

    /// 启动后台任务: 租约回收 / 补发, 日志清理
    pub fn start_background_tasks(&self) -> BackgroundTasks {
        let mut tasks = BackgroundTasks::new();

        let state = self.clone();
        tasks.spawn_periodic(
            "lease_sweeper",
            Duration::from_secs(self.config.sweep_interval_secs),
            move || {
                if let Err(e) = state.sweep() {
                    tracing::error!(error = %e, "Sweep failed");
                }
            },
        );

        let log_dir = self.config.log_dir();
        tasks.spawn_periodic("log_cleanup", LOG_CLEANUP_INTERVAL, move || {
            if let Err(e) = cleanup_old_logs(&log_dir, APP_LOG_RETENTION_DAYS) {
                tracing::warn!(error = %e, "Log cleanup failed");
            }
        });

        tasks.log_summary();
        tasks
    }
}
