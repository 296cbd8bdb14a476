//! Error taxonomy shared by the ledger, calculator, and record store.

use rust_decimal::Decimal;
use thiserror::Error;

use crate::models::{Partner, Period};

#[derive(Debug, Error)]
pub enum RecoupError {
    #[error("invalid amount {amount}: {reason}")]
    InvalidAmount { amount: Decimal, reason: &'static str },

    #[error("percentage {value} out of range (expected 0 to 100)")]
    InvalidPercentage { value: Decimal },

    #[error("invalid period: {0}")]
    InvalidPeriod(String),

    #[error("unknown partner: {0}")]
    UnknownPartner(String),

    #[error("cannot apply {amount} to {partner}: pending balance is {pending}")]
    InsufficientPendingBalance {
        partner: Partner,
        amount: Decimal,
        pending: Decimal,
    },

    #[error("a finalized reimbursement already exists for {period}")]
    DuplicatePeriod { period: Period },

    #[error("pending balance for {partner} changed since the draft was computed (draft {expected}, current {actual})")]
    StaleBalance {
        partner: Partner,
        expected: Decimal,
        actual: Decimal,
    },

    #[error("no finalized reimbursement for {period}")]
    NotFound { period: Period },

    #[error("inconsistent reimbursement record: {reason}")]
    InvalidRecord { reason: &'static str },

    #[error("storage error: {0}")]
    Storage(#[from] rusqlite::Error),

    #[error("database lock poisoned")]
    LockPoisoned,
}

pub type Result<T> = std::result::Result<T, RecoupError>;
