use rust_decimal::Decimal;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use tracing::{info, warn};

use crate::db::Database;
use crate::error::{RecoupError, Result};
use crate::models::{
    HistoryFilter, LedgerSummary, Partner, PartnerBalance, Period, ReimbursementDraft,
    ReimbursementRecord, SplitPolicy,
};
use crate::services::records::History;
use crate::services::{ledger, monthend, records};

/// Shared handle over the ledger, calculator, and record store. Cheap to
/// clone; all clones serialize through the same database lock.
#[derive(Clone)]
pub struct Backoffice {
    db: Arc<Mutex<Database>>,
    policy: Arc<Mutex<SplitPolicy>>,
}

impl Backoffice {
    pub fn open(db_path: PathBuf) -> Result<Self> {
        Self::with_database(Database::open(db_path)?)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::with_database(Database::open_in_memory()?)
    }

    pub fn with_database(db: Database) -> Result<Self> {
        let policy = load_policy(&db)?;
        Ok(Backoffice {
            db: Arc::new(Mutex::new(db)),
            policy: Arc::new(Mutex::new(policy)),
        })
    }

    pub fn record_expense(&self, partner: Partner, amount: Decimal) -> Result<PartnerBalance> {
        ledger::record_expense(&self.db, partner, amount)
    }

    pub fn apply_reimbursement(
        &self,
        partner: Partner,
        amount: Decimal,
    ) -> Result<PartnerBalance> {
        ledger::apply_reimbursement(&self.db, partner, amount)
    }

    pub fn balance(&self, partner: Partner) -> Result<PartnerBalance> {
        ledger::balance(&self.db, partner)
    }

    pub fn balances(&self) -> Result<Vec<PartnerBalance>> {
        ledger::balances(&self.db)
    }

    pub fn compute_reimbursement(
        &self,
        period: Period,
        total_sales: Decimal,
        recovery_percent: Decimal,
    ) -> Result<ReimbursementDraft> {
        let policy = self.policy()?;
        monthend::compute_reimbursement(&self.db, period, total_sales, recovery_percent, &policy)
    }

    pub fn finalize(&self, draft: ReimbursementDraft) -> Result<ReimbursementRecord> {
        monthend::finalize(&self.db, draft)
    }

    pub fn save_record(&self, record: &ReimbursementRecord) -> Result<()> {
        records::save(&self.db, record)
    }

    pub fn reimbursement(&self, period: Period) -> Result<ReimbursementRecord> {
        records::get(&self.db, period)
    }

    pub fn history(&self, filter: HistoryFilter) -> History {
        records::history(&self.db, filter)
    }

    pub fn policy(&self) -> Result<SplitPolicy> {
        Ok(self
            .policy
            .lock()
            .map_err(|_| RecoupError::LockPoisoned)?
            .clone())
    }

    pub fn set_policy(&self, policy: SplitPolicy) -> Result<()> {
        policy.validate()?;
        {
            let db = self.db.lock().map_err(|_| RecoupError::LockPoisoned)?;
            db.set_setting("lead_partner", policy.lead_partner.as_str())?;
            db.set_setting("lead_share_percent", &policy.lead_share_percent.to_string())?;
        }
        {
            let mut cached = self.policy.lock().map_err(|_| RecoupError::LockPoisoned)?;
            *cached = policy.clone();
        }
        info!(lead = %policy.lead_partner, percent = %policy.lead_share_percent, "split policy updated");
        Ok(())
    }

    pub fn summary(&self) -> Result<LedgerSummary> {
        let (balances, last_finalized) = {
            let db = self.db.lock().map_err(|_| RecoupError::LockPoisoned)?;
            (db.partner_balances()?, db.latest_finalized()?)
        };

        let mut total_pending = Decimal::ZERO;
        let mut total_expenses = Decimal::ZERO;
        let mut total_reimbursed = Decimal::ZERO;
        for balance in &balances {
            total_pending += balance.pending_balance;
            total_expenses += balance.total_expenses;
            total_reimbursed += balance.total_reimbursed;
        }

        Ok(LedgerSummary {
            balances,
            total_pending,
            total_expenses,
            total_reimbursed,
            last_finalized,
        })
    }
}

/// Best-effort load of the stored policy: missing or unreadable values
/// fall back to the default rather than blocking startup.
fn load_policy(db: &Database) -> Result<SplitPolicy> {
    let mut policy = SplitPolicy::default();

    if let Some(stored) = db.get_setting("lead_partner")? {
        match stored.parse() {
            Ok(partner) => policy.lead_partner = partner,
            Err(_) => warn!(value = %stored, "ignoring unreadable lead partner setting"),
        }
    }
    if let Some(stored) = db.get_setting("lead_share_percent")? {
        match stored.parse::<Decimal>() {
            Ok(percent) => policy.lead_share_percent = percent,
            Err(_) => warn!(value = %stored, "ignoring unreadable lead share setting"),
        }
    }
    if policy.validate().is_err() {
        warn!(percent = %policy.lead_share_percent, "stored lead share out of range, using default");
        policy = SplitPolicy::default();
    }

    Ok(policy)
}
