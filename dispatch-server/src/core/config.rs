use std::path::PathBuf;

use crate::auth::JwtConfig;
use crate::core::{Result, ServerError};

/// 服务器配置
///
/// # 环境变量
///
/// | 环境变量 | 默认值 | 说明 |
/// |----------|--------|------|
/// | WORK_DIR | ./work_dir | 数据与日志根目录 |
/// | HTTP_PORT | 3000 | HTTP 服务端口 |
/// | ENVIRONMENT | development | 运行环境 |
/// | LOG_LEVEL | info | 日志级别 (RUST_LOG 优先) |
/// | CLAIM_LEASE_SECS | 180 | 领取后未提交的租约 |
/// | CLAIM_COOLDOWN_SECS | 300 | 同一评论者两次领取的间隔 |
/// | SWEEP_INTERVAL_SECS | 30 | 租约回收 / 补发周期 |
/// | DEFAULT_DEADLINE_DAYS | 7 | 请求未指定时的截止天数 |
/// | REQUEST_TIMEOUT_MS | 30000 | 请求超时(毫秒) |
/// | JWT_* | 见 [`JwtConfig::from_env`] | 认证配置 |
///
/// # 示例
///
/// ```ignore
/// WORK_DIR=/data/dispatch HTTP_PORT=8080 cargo run
/// ```
#[derive(Debug, Clone)]
pub struct Config {
    /// 工作目录，存放数据库和日志
    pub work_dir: String,
    /// HTTP API 服务端口
    pub http_port: u16,
    /// 运行环境: development | production
    pub environment: String,
    pub log_level: String,
    /// JWT 认证配置
    pub jwt: JwtConfig,
    pub claim_lease_secs: u64,
    pub claim_cooldown_secs: u64,
    pub sweep_interval_secs: u64,
    pub default_deadline_days: u32,
    /// 请求超时时间 (毫秒)
    pub request_timeout_ms: u64,
}

impl Config {
    /// 从环境变量加载配置
    ///
    /// 未设置的变量使用默认值；只有 JWT 配置可能失败。
    pub fn from_env() -> Result<Self> {
        let environment =
            std::env::var("ENVIRONMENT").unwrap_or_else(|_| "development".into());
        let jwt = JwtConfig::from_env(environment == "production")?;

        let config = Self {
            work_dir: std::env::var("WORK_DIR").unwrap_or_else(|_| "./work_dir".into()),
            http_port: std::env::var("HTTP_PORT")
                .ok()
                .and_then(|p| p.parse().ok())
                .unwrap_or(3000),
            environment,
            log_level: std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".into()),
            jwt,
            claim_lease_secs: std::env::var("CLAIM_LEASE_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(180),
            claim_cooldown_secs: std::env::var("CLAIM_COOLDOWN_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(300),
            sweep_interval_secs: std::env::var("SWEEP_INTERVAL_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(30),
            default_deadline_days: std::env::var("DEFAULT_DEADLINE_DAYS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(7),
            request_timeout_ms: std::env::var("REQUEST_TIMEOUT_MS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(30000),
        };
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.sweep_interval_secs == 0 {
            return Err(ServerError::Config(
                "SWEEP_INTERVAL_SECS must be greater than 0".into(),
            ));
        }
        if self.claim_lease_secs == 0 {
            return Err(ServerError::Config(
                "CLAIM_LEASE_SECS must be greater than 0".into(),
            ));
        }
        if self.default_deadline_days == 0 {
            return Err(ServerError::Config(
                "DEFAULT_DEADLINE_DAYS must be greater than 0".into(),
            ));
        }
        Ok(())
    }

    /// 是否生产环境
    pub fn is_production(&self) -> bool {
        self.environment == "production"
    }

    /// `<work_dir>/data`: ledger.redb, orders.redb
    pub fn data_dir(&self) -> PathBuf {
        PathBuf::from(&self.work_dir).join("data")
    }

    /// `<work_dir>/logs`
    pub fn log_dir(&self) -> PathBuf {
        PathBuf::from(&self.work_dir).join("logs")
    }

    /// 确保工作目录结构存在
    pub fn ensure_work_dir_structure(&self) -> std::io::Result<()> {
        std::fs::create_dir_all(self.data_dir())?;
        std::fs::create_dir_all(self.log_dir())?;
        Ok(())
    }
}
