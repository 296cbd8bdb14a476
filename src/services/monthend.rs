use rust_decimal::Decimal;
use std::sync::{Arc, Mutex};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::db::Database;
use crate::error::{RecoupError, Result};
use crate::models::{
    PartnerAllocation, PartnerBalance, Period, ReimbursementDraft, ReimbursementRecord,
    SplitPolicy,
};
use crate::utils::{has_cent_precision, now_rfc3339, round_cents, within_amount_limit};

/// Computes the month-end preview for a period. Reads the ledger but never
/// writes it.
pub fn compute_reimbursement(
    db: &Arc<Mutex<Database>>,
    period: Period,
    total_sales: Decimal,
    recovery_percent: Decimal,
    policy: &SplitPolicy,
) -> Result<ReimbursementDraft> {
    if total_sales < Decimal::ZERO {
        return Err(RecoupError::InvalidAmount {
            amount: total_sales,
            reason: "total sales must not be negative",
        });
    }
    if !has_cent_precision(total_sales) {
        return Err(RecoupError::InvalidAmount {
            amount: total_sales,
            reason: "amounts are tracked in whole cents",
        });
    }
    if !within_amount_limit(total_sales) {
        return Err(RecoupError::InvalidAmount {
            amount: total_sales,
            reason: "amount exceeds the supported range",
        });
    }
    if recovery_percent < Decimal::ZERO || recovery_percent > Decimal::ONE_HUNDRED {
        return Err(RecoupError::InvalidPercentage {
            value: recovery_percent,
        });
    }
    policy.validate()?;

    let balances = {
        let db = db.lock().map_err(|_| RecoupError::LockPoisoned)?;
        if db.has_reimbursement(period)? {
            return Err(RecoupError::DuplicatePeriod { period });
        }
        db.partner_balances()?
    };

    let draft = build_draft(period, total_sales, recovery_percent, policy, &balances);
    debug!(
        %period,
        pool = %draft.recovery_pool,
        reimbursed = %draft.total_reimbursed,
        profit = %draft.profit,
        "reimbursement draft computed"
    );
    Ok(draft)
}

/// Commits a draft after re-checking that the period is still open and the
/// pending balances still match. The record and the ledger updates land in
/// one transaction; the returned record is the immutable stored form.
pub fn finalize(
    db: &Arc<Mutex<Database>>,
    draft: ReimbursementDraft,
) -> Result<ReimbursementRecord> {
    let record = ReimbursementRecord {
        id: Uuid::new_v4(),
        period: draft.period,
        total_sales: draft.total_sales,
        recovery_percent: draft.recovery_percent,
        recovery_pool: draft.recovery_pool,
        lines: draft.lines,
        total_reimbursed: draft.total_reimbursed,
        profit: draft.profit,
        split: draft.split,
        finalized_at: now_rfc3339(),
    };
    record.validate()?;

    let committed = {
        let mut db = db.lock().map_err(|_| RecoupError::LockPoisoned)?;
        db.finalize_reimbursement(&record)
    };
    if let Err(RecoupError::StaleBalance {
        partner,
        expected,
        actual,
    }) = &committed
    {
        warn!(%partner, %expected, %actual, "draft is stale, nothing committed");
    }
    committed?;

    info!(
        period = %record.period,
        reimbursed = %record.total_reimbursed,
        profit = %record.profit,
        "reimbursement finalized"
    );
    Ok(record)
}

fn build_draft(
    period: Period,
    total_sales: Decimal,
    recovery_percent: Decimal,
    policy: &SplitPolicy,
    balances: &[PartnerBalance],
) -> ReimbursementDraft {
    let recovery_pool = round_cents(total_sales * recovery_percent / Decimal::ONE_HUNDRED);

    let mut remaining = recovery_pool;
    let mut lines = Vec::with_capacity(balances.len());
    for balance in balances {
        let amount = balance.pending_balance.min(remaining);
        remaining -= amount;
        lines.push(PartnerAllocation {
            partner: balance.partner,
            pending_before: balance.pending_balance,
            amount,
            pending_after: balance.pending_balance - amount,
        });
    }

    // Derived by subtraction, so the totals reconcile exactly.
    let total_reimbursed = recovery_pool - remaining;
    let profit = remaining;
    let split = policy.split(profit);

    ReimbursementDraft {
        period,
        total_sales,
        recovery_percent,
        recovery_pool,
        lines,
        total_reimbursed,
        profit,
        split,
        computed_at: now_rfc3339(),
    }
}
