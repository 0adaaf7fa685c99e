//! Input validation helpers
//!
//! Centralized text length constants and validation functions for order
//! creation requests.

use rust_decimal::Decimal;

use crate::error::{DispatchError, DispatchResult};

// ── Text length limits ──────────────────────────────────────────────

/// Task titles
pub const MAX_NAME_LEN: usize = 200;

/// Requirements, usage purpose, rejection reasons
pub const MAX_NOTE_LEN: usize = 2000;

/// Mentions, contact info, payment methods
pub const MAX_SHORT_TEXT_LEN: usize = 100;

/// Video and screenshot URLs
pub const MAX_URL_LEN: usize = 2048;

// ── Quantity / money limits ─────────────────────────────────────────

/// Upper bound on sub-orders per main order
pub const MAX_QUANTITY: u32 = 10_000;

/// Upper bound on rental / deadline days
pub const MAX_DAYS: u32 = 365;

/// Upper bound on any single price, recharge or withdrawal
pub const MAX_AMOUNT: i64 = 1_000_000;

/// Validate that a required string is non-empty and within the length limit.
pub fn validate_required_text(value: &str, field: &str, max_len: usize) -> DispatchResult<()> {
    if value.trim().is_empty() {
        return Err(DispatchError::Validation(format!("{field} must not be empty")));
    }
    if value.len() > max_len {
        return Err(DispatchError::Validation(format!(
            "{field} is too long ({} chars, max {max_len})",
            value.len()
        )));
    }
    Ok(())
}

/// Validate that an optional string, if present, is within the length limit.
pub fn validate_optional_text(
    value: &Option<String>,
    field: &str,
    max_len: usize,
) -> DispatchResult<()> {
    match value {
        Some(v) => validate_max_len(v, field, max_len),
        None => Ok(()),
    }
}

/// Length limit only; empty is allowed (the caller decides what empty means)
pub fn validate_max_len(value: &str, field: &str, max_len: usize) -> DispatchResult<()> {
    if value.len() > max_len {
        return Err(DispatchError::Validation(format!(
            "{field} is too long ({} chars, max {max_len})",
            value.len()
        )));
    }
    Ok(())
}

/// Strictly positive and at most [`MAX_AMOUNT`]
pub fn validate_amount(value: Decimal, field: &str) -> DispatchResult<()> {
    if value <= Decimal::ZERO {
        return Err(DispatchError::Validation(format!(
            "{field} must be positive, got {value}"
        )));
    }
    if value > Decimal::from(MAX_AMOUNT) {
        return Err(DispatchError::Validation(format!(
            "{field} exceeds maximum allowed value {MAX_AMOUNT}, got {value}"
        )));
    }
    Ok(())
}

pub fn validate_quantity(quantity: u32) -> DispatchResult<()> {
    if quantity == 0 || quantity > MAX_QUANTITY {
        return Err(DispatchError::Validation(format!(
            "quantity must be between 1 and {MAX_QUANTITY}, got {quantity}"
        )));
    }
    Ok(())
}

pub fn validate_days(days: u32, field: &str) -> DispatchResult<()> {
    if days == 0 || days > MAX_DAYS {
        return Err(DispatchError::Validation(format!(
            "{field} must be between 1 and {MAX_DAYS}, got {days}"
        )));
    }
    Ok(())
}
