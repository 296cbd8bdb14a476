//! Partner expense-recovery ledger and monthly profit-split accounting.
//!
//! Three pieces work together: a per-partner balance ledger tracking
//! pending, lifetime-expense, and lifetime-reimbursed amounts; a month-end
//! calculator that pools a percentage of sales, pays pending balances down
//! in a fixed partner order, and splits the leftover profit; and an
//! append-only store holding one finalized record per calendar month.
//! Everything is persisted in a single SQLite file.
//!
//! [`Backoffice`] is the entry point:
//!
//! ```no_run
//! use recoup::{Backoffice, Partner, Period};
//!
//! fn main() -> recoup::Result<()> {
//!     let office = Backoffice::open("backoffice.sqlite".into())?;
//!     office.record_expense(Partner::Founding, "100.00".parse().unwrap())?;
//!
//!     let period = Period::new(2025, 7)?;
//!     let draft = office.compute_reimbursement(period, "1000.00".parse().unwrap(), "30".parse().unwrap())?;
//!     let record = office.finalize(draft)?;
//!     println!("profit for {}: {}", record.period, record.profit);
//!     Ok(())
//! }
//! ```

pub mod db;
pub mod error;
pub mod models;
pub mod services;
pub mod utils;

pub use error::{RecoupError, Result};
pub use models::{
    HistoryFilter, LedgerSummary, Partner, PartnerAllocation, PartnerBalance, Period, ProfitSplit,
    ReimbursementDraft, ReimbursementRecord, SplitPolicy,
};
pub use services::backoffice::Backoffice;
pub use services::records::History;
