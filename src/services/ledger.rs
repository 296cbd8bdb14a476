use rust_decimal::Decimal;
use std::sync::{Arc, Mutex};
use tracing::info;

use crate::db::Database;
use crate::error::{RecoupError, Result};
use crate::models::{Partner, PartnerBalance};
use crate::utils::{has_cent_precision, within_amount_limit};

pub fn record_expense(
    db: &Arc<Mutex<Database>>,
    partner: Partner,
    amount: Decimal,
) -> Result<PartnerBalance> {
    if amount <= Decimal::ZERO {
        return Err(RecoupError::InvalidAmount {
            amount,
            reason: "expense amount must be positive",
        });
    }
    check_amount(amount)?;

    let balance = {
        let mut db = db.lock().map_err(|_| RecoupError::LockPoisoned)?;
        db.record_expense(partner, amount)?
    };
    info!(%partner, %amount, pending = %balance.pending_balance, "expense recorded");
    Ok(balance)
}

/// A zero amount is accepted and leaves the ledger untouched.
pub fn apply_reimbursement(
    db: &Arc<Mutex<Database>>,
    partner: Partner,
    amount: Decimal,
) -> Result<PartnerBalance> {
    if amount < Decimal::ZERO {
        return Err(RecoupError::InvalidAmount {
            amount,
            reason: "reimbursement amount must not be negative",
        });
    }
    check_amount(amount)?;

    if amount.is_zero() {
        let db = db.lock().map_err(|_| RecoupError::LockPoisoned)?;
        return db.partner_balance(partner);
    }

    let balance = {
        let mut db = db.lock().map_err(|_| RecoupError::LockPoisoned)?;
        db.apply_reimbursement(partner, amount)?
    };
    info!(%partner, %amount, pending = %balance.pending_balance, "reimbursement applied");
    Ok(balance)
}

pub fn balance(db: &Arc<Mutex<Database>>, partner: Partner) -> Result<PartnerBalance> {
    let db = db.lock().map_err(|_| RecoupError::LockPoisoned)?;
    db.partner_balance(partner)
}

/// All three balances in the fixed partner order.
pub fn balances(db: &Arc<Mutex<Database>>) -> Result<Vec<PartnerBalance>> {
    let db = db.lock().map_err(|_| RecoupError::LockPoisoned)?;
    db.partner_balances()
}

fn check_amount(amount: Decimal) -> Result<()> {
    if !has_cent_precision(amount) {
        return Err(RecoupError::InvalidAmount {
            amount,
            reason: "amounts are tracked in whole cents",
        });
    }
    if !within_amount_limit(amount) {
        return Err(RecoupError::InvalidAmount {
            amount,
            reason: "amount exceeds the supported range",
        });
    }
    Ok(())
}
