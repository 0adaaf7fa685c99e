//! Dispatch Server - task-dispatch marketplace engine
//!
//! Publishers pay to create bulk micro-task orders; commenters claim single
//! units, submit evidence and get paid after review.
//!
//! # Module layout
//!
//! ```text
//! dispatch-server/src/
//! ├── core/          # config, state, server, background tasks
//! ├── db/            # redb plumbing shared by both stores
//! ├── ledger/        # accounts + append-only transaction log
//! ├── orders/        # main-order aggregates, sub-order indexes
//! ├── claim/         # claim engine, cooldown, lease release
//! ├── submission/    # submit / review state machine
//! ├── settlement/    # escrow, payout, reversal, withdrawals, saga
//! ├── workflow/      # order creation and cancellation
//! ├── auth/          # JWT collaborator
//! ├── api/           # HTTP routes and handlers
//! └── utils/         # logging, validation
//! ```

pub mod api;
pub mod auth;
pub mod claim;
pub mod core;
pub mod db;
pub mod error;
pub mod ledger;
pub mod orders;
pub mod settlement;
pub mod submission;
pub mod utils;
pub mod workflow;

// Re-export common types
pub use auth::{CurrentUser, JwtService};
pub use core::{Config, Server, ServerState};
pub use error::{DispatchError, DispatchResult};
pub use utils::{ApiResponse, AppError, AppResult, ErrorCategory, ErrorCode};

// Re-export logger functions
pub use utils::logger::{cleanup_old_logs, init_logger, init_logger_with_file};

/// Ledger audit logging - every balance mutation and appended entry.
///
/// Routed to the permanent `ledger` log file by the logger setup.
#[macro_export]
macro_rules! ledger_log {
    ($event:expr, $($fields:tt)*) => {
        tracing::info!(
            target: "ledger",
            event = $event,
            $($fields)*
        );
    };
}

/// Security logging macro - supports tracing format specifiers
#[macro_export]
macro_rules! security_log {
    ($level:expr, $event:expr, $($key:ident = $value:expr),*) => {
        tracing::info!(
            target: "security",
            level = $level,
            event = $event,
            $($key = $value),*
        );
    };
}

pub fn print_banner() {
    println!(
        r#"
    ____  _                 __       __
   / __ \(_)________  ____ _/ /______/ /_
  / / / / / ___/ __ \/ __ `/ __/ ___/ __ \
 / /_/ / (__  ) /_/ / /_/ / /_/ /__/ / / /
/_____/_/____/ .___/\__,_/\__/\___/_/ /_/
            /_/
    "#
    );
}
