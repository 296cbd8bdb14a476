use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use tracing::info;

use crate::db::Database;
use crate::error::{RecoupError, Result};
use crate::models::{HistoryFilter, Period, ReimbursementRecord};

const PAGE_SIZE: usize = 64;

/// Stores a record produced elsewhere. Its arithmetic is checked before
/// anything is written; the period uniqueness gate applies as usual.
pub fn save(db: &Arc<Mutex<Database>>, record: &ReimbursementRecord) -> Result<()> {
    record.validate()?;
    {
        let mut db = db.lock().map_err(|_| RecoupError::LockPoisoned)?;
        db.insert_reimbursement(record)?;
    }
    info!(period = %record.period, "reimbursement record saved");
    Ok(())
}

pub fn get(db: &Arc<Mutex<Database>>, period: Period) -> Result<ReimbursementRecord> {
    let db = db.lock().map_err(|_| RecoupError::LockPoisoned)?;
    db.reimbursement(period)?
        .ok_or(RecoupError::NotFound { period })
}

/// Starts a walk over finalized records in ascending period order. Each
/// call returns a fresh iterator from the beginning of the range.
pub fn history(db: &Arc<Mutex<Database>>, filter: HistoryFilter) -> History {
    History {
        db: Arc::clone(db),
        filter,
        after: None,
        buffer: VecDeque::new(),
        done: false,
    }
}

/// Lazy pass over reimbursement history. Records are fetched a page at a
/// time; the cursor is the last period seen, so the walk holds no database
/// lock between items. A storage error ends the iteration after being
/// yielded once.
pub struct History {
    db: Arc<Mutex<Database>>,
    filter: HistoryFilter,
    after: Option<Period>,
    buffer: VecDeque<ReimbursementRecord>,
    done: bool,
}

impl History {
    fn refill(&mut self) -> Result<()> {
        let page = {
            let db = self.db.lock().map_err(|_| RecoupError::LockPoisoned)?;
            db.reimbursements_page(self.after, self.filter, PAGE_SIZE)?
        };
        if page.len() < PAGE_SIZE {
            self.done = true;
        }
        if let Some(last) = page.last() {
            self.after = Some(last.period);
        }
        self.buffer.extend(page);
        Ok(())
    }
}

impl Iterator for History {
    type Item = Result<ReimbursementRecord>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.buffer.is_empty() {
            if self.done {
                return None;
            }
            if let Err(err) = self.refill() {
                self.done = true;
                return Some(Err(err));
            }
        }
        self.buffer.pop_front().map(Ok)
    }
}
