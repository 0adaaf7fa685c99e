//! 认证模块 - auth collaborator
//!
//! - [`JwtService`] - HS256 令牌签发与验证
//! - [`CurrentUser`] - `{user_id, role}` resolved from a bearer token
//!
//! Role checks live on [`CurrentUser::require_role`]; ownership checks live
//! in the engines that know who owns what.

pub mod extractor;
pub mod jwt;

pub use jwt::{Claims, CurrentUser, JwtConfig, JwtError, JwtService};
