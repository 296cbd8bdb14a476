use rusqlite::types::Type;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Result as SqlResult, Row};
use rust_decimal::Decimal;
use std::path::PathBuf;
use uuid::Uuid;

use crate::error::{RecoupError, Result};
use crate::models::{
    HistoryFilter, Partner, PartnerAllocation, PartnerBalance, Period, ProfitSplit,
    ReimbursementRecord,
};
use crate::utils::now_rfc3339;

/// Owns the SQLite connection; all SQL lives here. Mutating methods are
/// crate-internal and reached through the service layer, which runs the
/// domain checks first.
pub struct Database {
    conn: Connection,
}

impl Database {
    pub fn open(db_path: PathBuf) -> Result<Self> {
        let conn = Connection::open(db_path)?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        Self::bootstrap(conn)
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        Self::bootstrap(conn)
    }

    fn bootstrap(conn: Connection) -> Result<Self> {
        let mut db = Database { conn };
        db.run_migrations()?;
        db.seed_partners()?;
        Ok(db)
    }

    fn run_migrations(&mut self) -> SqlResult<()> {
        self.conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS schema_migrations (
                name TEXT PRIMARY KEY,
                applied_at TEXT NOT NULL
            );",
        )?;

        let migrations = vec![
            (
                "001_create_partner_balances.sql",
                include_str!(concat!(
                    env!("CARGO_MANIFEST_DIR"),
                    "/migrations/001_create_partner_balances.sql"
                )),
            ),
            (
                "002_create_reimbursements.sql",
                include_str!(concat!(
                    env!("CARGO_MANIFEST_DIR"),
                    "/migrations/002_create_reimbursements.sql"
                )),
            ),
            (
                "003_create_settings.sql",
                include_str!(concat!(
                    env!("CARGO_MANIFEST_DIR"),
                    "/migrations/003_create_settings.sql"
                )),
            ),
        ];

        for (name, sql) in migrations {
            let applied: Option<String> = self
                .conn
                .query_row(
                    "SELECT name FROM schema_migrations WHERE name = ?1",
                    params![name],
                    |row| row.get(0),
                )
                .optional()?;

            if applied.is_none() {
                let tx = self.conn.transaction()?;
                tx.execute_batch(sql)?;
                tx.execute(
                    "INSERT INTO schema_migrations (name, applied_at) VALUES (?1, datetime('now'))",
                    params![name],
                )?;
                tx.commit()?;
            }
        }

        Ok(())
    }

    fn seed_partners(&self) -> SqlResult<()> {
        let now = now_rfc3339();
        for partner in Partner::ALL {
            self.conn.execute(
                "INSERT OR IGNORE INTO partner_balances
                     (partner, pending_balance, total_expenses, total_reimbursed, created_at, updated_at)
                 VALUES (?1, '0', '0', '0', ?2, ?2)",
                params![partner.as_str(), now],
            )?;
        }
        Ok(())
    }

    pub fn partner_balance(&self, partner: Partner) -> Result<PartnerBalance> {
        read_balance(&self.conn, partner)
    }

    pub fn partner_balances(&self) -> Result<Vec<PartnerBalance>> {
        Partner::ALL
            .iter()
            .map(|&partner| read_balance(&self.conn, partner))
            .collect()
    }

    pub(crate) fn record_expense(
        &mut self,
        partner: Partner,
        amount: Decimal,
    ) -> Result<PartnerBalance> {
        let tx = self.conn.transaction()?;
        let mut balance = read_balance(&tx, partner)?;
        balance.pending_balance = checked_add(balance.pending_balance, amount)?;
        balance.total_expenses = checked_add(balance.total_expenses, amount)?;
        balance.updated_at = now_rfc3339();
        write_balance(&tx, &balance)?;
        tx.commit()?;
        Ok(balance)
    }

    pub(crate) fn apply_reimbursement(
        &mut self,
        partner: Partner,
        amount: Decimal,
    ) -> Result<PartnerBalance> {
        let tx = self.conn.transaction()?;
        let mut balance = read_balance(&tx, partner)?;
        if amount > balance.pending_balance {
            return Err(RecoupError::InsufficientPendingBalance {
                partner,
                amount,
                pending: balance.pending_balance,
            });
        }
        balance.pending_balance = checked_sub(balance.pending_balance, amount)?;
        balance.total_reimbursed = checked_add(balance.total_reimbursed, amount)?;
        balance.updated_at = now_rfc3339();
        write_balance(&tx, &balance)?;
        tx.commit()?;
        Ok(balance)
    }

    pub fn has_reimbursement(&self, period: Period) -> Result<bool> {
        Ok(period_exists(&self.conn, period)?)
    }

    /// Persists a finalized record and applies its allocations to the
    /// ledger in a single transaction. Dropping the transaction on any
    /// early return rolls everything back.
    pub(crate) fn finalize_reimbursement(&mut self, record: &ReimbursementRecord) -> Result<()> {
        let tx = self.conn.transaction()?;

        // Period check comes before the stale check: a lost finalize race
        // reports the period conflict, not the balance drift it caused.
        if period_exists(&tx, record.period)? {
            return Err(RecoupError::DuplicatePeriod {
                period: record.period,
            });
        }

        let mut balances = Vec::with_capacity(record.lines.len());
        for line in &record.lines {
            let balance = read_balance(&tx, line.partner)?;
            if balance.pending_balance != line.pending_before {
                return Err(RecoupError::StaleBalance {
                    partner: line.partner,
                    expected: line.pending_before,
                    actual: balance.pending_balance,
                });
            }
            balances.push(balance);
        }

        insert_record(&tx, record)?;

        let now = now_rfc3339();
        for (line, mut balance) in record.lines.iter().zip(balances) {
            if line.amount.is_zero() {
                continue;
            }
            balance.pending_balance = checked_sub(balance.pending_balance, line.amount)?;
            balance.total_reimbursed = checked_add(balance.total_reimbursed, line.amount)?;
            balance.updated_at = now.clone();
            write_balance(&tx, &balance)?;
        }

        tx.commit()?;
        Ok(())
    }

    pub(crate) fn insert_reimbursement(&mut self, record: &ReimbursementRecord) -> Result<()> {
        let tx = self.conn.transaction()?;
        insert_record(&tx, record)?;
        tx.commit()?;
        Ok(())
    }

    pub fn reimbursement(&self, period: Period) -> Result<Option<ReimbursementRecord>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, year, month, total_sales, recovery_percent, recovery_pool,
                    total_reimbursed, profit, lead_partner, lead_share, joint_share, finalized_at
             FROM reimbursements WHERE year = ?1 AND month = ?2",
        )?;

        let header = stmt
            .query_row(params![period.year(), period.month()], record_from_row)
            .optional()?;

        match header {
            Some(mut record) => {
                record.lines = self.lines_for(record.id)?;
                Ok(Some(record))
            }
            None => Ok(None),
        }
    }

    /// One ascending keyset page of finalized records, strictly after
    /// `after` when given, restricted by the filter's year range.
    pub fn reimbursements_page(
        &self,
        after: Option<Period>,
        filter: HistoryFilter,
        limit: usize,
    ) -> Result<Vec<ReimbursementRecord>> {
        let mut sql = String::from(
            "SELECT id, year, month, total_sales, recovery_percent, recovery_pool,
                    total_reimbursed, profit, lead_partner, lead_share, joint_share, finalized_at
             FROM reimbursements",
        );
        let mut clauses: Vec<&str> = Vec::new();
        let mut args: Vec<i64> = Vec::new();

        if let Some(after) = after {
            clauses.push("(year > ? OR (year = ? AND month > ?))");
            args.extend([
                i64::from(after.year()),
                i64::from(after.year()),
                i64::from(after.month()),
            ]);
        }
        if let Some(from_year) = filter.from_year {
            clauses.push("year >= ?");
            args.push(i64::from(from_year));
        }
        if let Some(to_year) = filter.to_year {
            clauses.push("year <= ?");
            args.push(i64::from(to_year));
        }
        if !clauses.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&clauses.join(" AND "));
        }
        sql.push_str(" ORDER BY year ASC, month ASC LIMIT ?");
        args.push(limit as i64);

        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map(params_from_iter(args), record_from_row)?;
        let mut records = rows.collect::<SqlResult<Vec<ReimbursementRecord>>>()?;
        for record in &mut records {
            record.lines = self.lines_for(record.id)?;
        }
        Ok(records)
    }

    pub fn latest_finalized(&self) -> Result<Option<Period>> {
        let row = self
            .conn
            .query_row(
                "SELECT year, month FROM reimbursements ORDER BY year DESC, month DESC LIMIT 1",
                [],
                |row| Ok((row.get::<_, i64>(0)?, row.get::<_, i64>(1)?)),
            )
            .optional()?;

        match row {
            Some((year, month)) => Ok(Some(Period::new(year as i32, month as u32)?)),
            None => Ok(None),
        }
    }

    fn lines_for(&self, id: Uuid) -> Result<Vec<PartnerAllocation>> {
        let mut stmt = self.conn.prepare(
            "SELECT partner, pending_before, amount, pending_after
             FROM reimbursement_lines
             WHERE reimbursement_id = ?1
             ORDER BY position ASC",
        )?;

        let rows = stmt.query_map(params![id.to_string()], |row| {
            Ok(PartnerAllocation {
                partner: partner_column(row, 0)?,
                pending_before: decimal_column(row, 1)?,
                amount: decimal_column(row, 2)?,
                pending_after: decimal_column(row, 3)?,
            })
        })?;

        Ok(rows.collect::<SqlResult<Vec<_>>>()?)
    }

    pub(crate) fn set_setting(&self, key: &str, value: &str) -> Result<()> {
        self.conn.execute(
            "INSERT OR REPLACE INTO settings (key, value, updated_at) VALUES (?1, ?2, ?3)",
            params![key, value, now_rfc3339()],
        )?;
        Ok(())
    }

    pub fn get_setting(&self, key: &str) -> Result<Option<String>> {
        let mut stmt = self.conn.prepare("SELECT value FROM settings WHERE key = ?1")?;
        Ok(stmt.query_row(params![key], |row| row.get(0)).optional()?)
    }
}

fn period_exists(conn: &Connection, period: Period) -> SqlResult<bool> {
    let row: Option<i64> = conn
        .query_row(
            "SELECT 1 FROM reimbursements WHERE year = ?1 AND month = ?2",
            params![period.year(), period.month()],
            |row| row.get(0),
        )
        .optional()?;
    Ok(row.is_some())
}

fn read_balance(conn: &Connection, partner: Partner) -> Result<PartnerBalance> {
    let balance = conn.query_row(
        "SELECT partner, pending_balance, total_expenses, total_reimbursed, created_at, updated_at
         FROM partner_balances WHERE partner = ?1",
        params![partner.as_str()],
        |row| {
            Ok(PartnerBalance {
                partner: partner_column(row, 0)?,
                pending_balance: decimal_column(row, 1)?,
                total_expenses: decimal_column(row, 2)?,
                total_reimbursed: decimal_column(row, 3)?,
                created_at: row.get(4)?,
                updated_at: row.get(5)?,
            })
        },
    )?;
    Ok(balance)
}

fn write_balance(conn: &Connection, balance: &PartnerBalance) -> Result<()> {
    conn.execute(
        "UPDATE partner_balances
         SET pending_balance = ?2, total_expenses = ?3, total_reimbursed = ?4, updated_at = ?5
         WHERE partner = ?1",
        params![
            balance.partner.as_str(),
            balance.pending_balance.to_string(),
            balance.total_expenses.to_string(),
            balance.total_reimbursed.to_string(),
            balance.updated_at,
        ],
    )?;
    Ok(())
}

// Balance updates run while the database lock is held, so arithmetic must
// return an error rather than panic.
fn checked_add(lhs: Decimal, rhs: Decimal) -> Result<Decimal> {
    lhs.checked_add(rhs).ok_or(RecoupError::InvalidAmount {
        amount: rhs,
        reason: "balance arithmetic overflowed",
    })
}

fn checked_sub(lhs: Decimal, rhs: Decimal) -> Result<Decimal> {
    lhs.checked_sub(rhs).ok_or(RecoupError::InvalidAmount {
        amount: rhs,
        reason: "balance arithmetic overflowed",
    })
}

fn insert_record(conn: &Connection, record: &ReimbursementRecord) -> Result<()> {
    let inserted = conn.execute(
        "INSERT INTO reimbursements (
            id, year, month, total_sales, recovery_percent, recovery_pool,
            total_reimbursed, profit, lead_partner, lead_share, joint_share, finalized_at
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
        params![
            record.id.to_string(),
            record.period.year(),
            record.period.month(),
            record.total_sales.to_string(),
            record.recovery_percent.to_string(),
            record.recovery_pool.to_string(),
            record.total_reimbursed.to_string(),
            record.profit.to_string(),
            record.split.lead_partner.as_str(),
            record.split.lead_share.to_string(),
            record.split.joint_share.to_string(),
            record.finalized_at,
        ],
    );

    if let Err(err) = inserted {
        if is_unique_violation(&err) {
            return Err(RecoupError::DuplicatePeriod {
                period: record.period,
            });
        }
        return Err(err.into());
    }

    for (position, line) in record.lines.iter().enumerate() {
        conn.execute(
            "INSERT INTO reimbursement_lines (
                reimbursement_id, position, partner, pending_before, amount, pending_after
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                record.id.to_string(),
                position as i64,
                line.partner.as_str(),
                line.pending_before.to_string(),
                line.amount.to_string(),
                line.pending_after.to_string(),
            ],
        )?;
    }

    Ok(())
}

fn is_unique_violation(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(code, Some(message))
            if code.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE
                && message.contains("reimbursements.")
    )
}

fn record_from_row(row: &Row) -> SqlResult<ReimbursementRecord> {
    Ok(ReimbursementRecord {
        id: uuid_column(row, 0)?,
        period: period_columns(row, 1, 2)?,
        total_sales: decimal_column(row, 3)?,
        recovery_percent: decimal_column(row, 4)?,
        recovery_pool: decimal_column(row, 5)?,
        lines: Vec::new(),
        total_reimbursed: decimal_column(row, 6)?,
        profit: decimal_column(row, 7)?,
        split: ProfitSplit {
            lead_partner: partner_column(row, 8)?,
            lead_share: decimal_column(row, 9)?,
            joint_share: decimal_column(row, 10)?,
        },
        finalized_at: row.get(11)?,
    })
}

fn decimal_column(row: &Row, idx: usize) -> SqlResult<Decimal> {
    let text: String = row.get(idx)?;
    text.parse()
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn partner_column(row: &Row, idx: usize) -> SqlResult<Partner> {
    let text: String = row.get(idx)?;
    text.parse()
        .map_err(|e: RecoupError| {
            rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e))
        })
}

fn uuid_column(row: &Row, idx: usize) -> SqlResult<Uuid> {
    let text: String = row.get(idx)?;
    Uuid::parse_str(&text)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn period_columns(row: &Row, year_idx: usize, month_idx: usize) -> SqlResult<Period> {
    let year: i64 = row.get(year_idx)?;
    let month: i64 = row.get(month_idx)?;
    Period::new(year as i32, month as u32)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(month_idx, Type::Integer, Box::new(e)))
}
