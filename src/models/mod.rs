use std::fmt;
use std::str::FromStr;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{RecoupError, Result};
use crate::utils::{round_cents, within_amount_limit};

/// Declaration order is the allocation order used everywhere.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Partner {
    Founding,
    Operating,
    Silent,
}

impl Partner {
    pub const ALL: [Partner; 3] = [Partner::Founding, Partner::Operating, Partner::Silent];

    pub fn as_str(&self) -> &'static str {
        match self {
            Partner::Founding => "founding",
            Partner::Operating => "operating",
            Partner::Silent => "silent",
        }
    }
}

impl fmt::Display for Partner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Partner {
    type Err = RecoupError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "founding" => Ok(Partner::Founding),
            "operating" => Ok(Partner::Operating),
            "silent" => Ok(Partner::Silent),
            other => Err(RecoupError::UnknownPartner(other.to_string())),
        }
    }
}

/// A calendar accounting period; a held value always carries a valid month.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Period {
    year: i32,
    month: u32,
}

impl Period {
    pub fn new(year: i32, month: u32) -> Result<Self> {
        if !(1..=12).contains(&month) {
            return Err(RecoupError::InvalidPeriod(format!(
                "month must be 1 to 12, got {year:04}-{month}"
            )));
        }
        Ok(Period { year, month })
    }

    pub fn year(&self) -> i32 {
        self.year
    }

    pub fn month(&self) -> u32 {
        self.month
    }
}

impl fmt::Display for Period {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04}-{:02}", self.year, self.month)
    }
}

impl FromStr for Period {
    type Err = RecoupError;

    fn from_str(s: &str) -> Result<Self> {
        let malformed =
            || RecoupError::InvalidPeriod(format!("malformed period '{s}' (expected YYYY-MM)"));
        let (year, month) = s.split_once('-').ok_or_else(malformed)?;
        let year: i32 = year.parse().map_err(|_| malformed())?;
        let month: u32 = month.parse().map_err(|_| malformed())?;
        Period::new(year, month)
    }
}

impl TryFrom<String> for Period {
    type Error = RecoupError;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<Period> for String {
    fn from(period: Period) -> Self {
        period.to_string()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PartnerBalance {
    pub partner: Partner,
    pub pending_balance: Decimal,
    pub total_expenses: Decimal,
    pub total_reimbursed: Decimal,
    pub created_at: String,
    pub updated_at: String,
}

impl PartnerBalance {
    /// The ledger invariant: what is pending is exactly what was spent and
    /// not yet paid back.
    pub fn is_consistent(&self) -> bool {
        self.pending_balance == self.total_expenses - self.total_reimbursed
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PartnerAllocation {
    pub partner: Partner,
    pub pending_before: Decimal,
    pub amount: Decimal,
    pub pending_after: Decimal,
}

/// The lead partner's cut plus the joint share of the other two partners.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProfitSplit {
    pub lead_partner: Partner,
    pub lead_share: Decimal,
    pub joint_share: Decimal,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SplitPolicy {
    pub lead_partner: Partner,
    pub lead_share_percent: Decimal,
}

impl Default for SplitPolicy {
    fn default() -> Self {
        SplitPolicy {
            lead_partner: Partner::Founding,
            lead_share_percent: Decimal::from(50),
        }
    }
}

impl SplitPolicy {
    pub fn validate(&self) -> Result<()> {
        if self.lead_share_percent < Decimal::ZERO || self.lead_share_percent > Decimal::ONE_HUNDRED
        {
            return Err(RecoupError::InvalidPercentage {
                value: self.lead_share_percent,
            });
        }
        Ok(())
    }

    /// The joint share is derived by subtraction; the two shares always sum
    /// exactly to the profit.
    pub fn split(&self, profit: Decimal) -> ProfitSplit {
        let lead_share = round_cents(profit * self.lead_share_percent / Decimal::ONE_HUNDRED);
        ProfitSplit {
            lead_partner: self.lead_partner,
            lead_share,
            joint_share: profit - lead_share,
        }
    }
}

/// A computed month-end preview. Drafts are only produced by the calculator
/// and carry no `Deserialize` impl, so a draft in hand always satisfies the
/// allocation invariants. Nothing is persisted until the draft is finalized.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReimbursementDraft {
    pub(crate) period: Period,
    pub(crate) total_sales: Decimal,
    pub(crate) recovery_percent: Decimal,
    pub(crate) recovery_pool: Decimal,
    pub(crate) lines: Vec<PartnerAllocation>,
    pub(crate) total_reimbursed: Decimal,
    pub(crate) profit: Decimal,
    pub(crate) split: ProfitSplit,
    pub(crate) computed_at: String,
}

impl ReimbursementDraft {
    pub fn period(&self) -> Period {
        self.period
    }

    pub fn total_sales(&self) -> Decimal {
        self.total_sales
    }

    pub fn recovery_percent(&self) -> Decimal {
        self.recovery_percent
    }

    pub fn recovery_pool(&self) -> Decimal {
        self.recovery_pool
    }

    pub fn lines(&self) -> &[PartnerAllocation] {
        &self.lines
    }

    pub fn total_reimbursed(&self) -> Decimal {
        self.total_reimbursed
    }

    pub fn profit(&self) -> Decimal {
        self.profit
    }

    pub fn split(&self) -> &ProfitSplit {
        &self.split
    }

    pub fn computed_at(&self) -> &str {
        &self.computed_at
    }
}

/// A finalized month-end record; immutable once stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReimbursementRecord {
    pub id: Uuid,
    pub period: Period,
    pub total_sales: Decimal,
    pub recovery_percent: Decimal,
    pub recovery_pool: Decimal,
    pub lines: Vec<PartnerAllocation>,
    pub total_reimbursed: Decimal,
    pub profit: Decimal,
    pub split: ProfitSplit,
    pub finalized_at: String,
}

impl ReimbursementRecord {
    /// Checks the record's internal arithmetic before it is allowed into the
    /// store. The calculator produces records that pass by construction; this
    /// guards the store against records assembled any other way.
    pub fn validate(&self) -> Result<()> {
        let fail = |reason: &'static str| Err(RecoupError::InvalidRecord { reason });

        if self.total_sales < Decimal::ZERO {
            return fail("total sales is negative");
        }
        if !within_amount_limit(self.total_sales) {
            return fail("total sales out of range");
        }
        if self.recovery_percent < Decimal::ZERO || self.recovery_percent > Decimal::ONE_HUNDRED {
            return fail("recovery percentage out of range");
        }
        if self.recovery_pool != round_cents(self.total_sales * self.recovery_percent / Decimal::ONE_HUNDRED)
        {
            return fail("recovery pool does not match sales and percentage");
        }
        if self.lines.len() != Partner::ALL.len() {
            return fail("expected one line per partner");
        }
        for (line, expected) in self.lines.iter().zip(Partner::ALL) {
            if line.partner != expected {
                return fail("lines out of partner order");
            }
            if line.pending_before < Decimal::ZERO
                || line.amount < Decimal::ZERO
                || line.pending_after < Decimal::ZERO
            {
                return fail("line amount is negative");
            }
            if line.pending_after != line.pending_before - line.amount {
                return fail("line balance does not reconcile");
            }
        }
        // Checked sums: a hand-assembled record must not be able to panic
        // the validator.
        let line_total = self
            .lines
            .iter()
            .try_fold(Decimal::ZERO, |sum, line| sum.checked_add(line.amount));
        if line_total != Some(self.total_reimbursed) {
            return fail("total reimbursed does not match line amounts");
        }
        if self.total_reimbursed > self.recovery_pool {
            return fail("total reimbursed exceeds recovery pool");
        }
        if self.profit != self.recovery_pool - self.total_reimbursed {
            return fail("profit does not reconcile");
        }
        if self.split.lead_share < Decimal::ZERO || self.split.joint_share < Decimal::ZERO {
            return fail("profit share is negative");
        }
        if self.split.lead_share.checked_add(self.split.joint_share) != Some(self.profit) {
            return fail("profit split does not sum to profit");
        }
        Ok(())
    }
}

/// Inclusive year-range filter for reimbursement history.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryFilter {
    pub from_year: Option<i32>,
    pub to_year: Option<i32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerSummary {
    pub balances: Vec<PartnerBalance>,
    pub total_pending: Decimal,
    pub total_expenses: Decimal,
    pub total_reimbursed: Decimal,
    pub last_finalized: Option<Period>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn consistent_record() -> ReimbursementRecord {
        ReimbursementRecord {
            id: Uuid::new_v4(),
            period: Period::new(2025, 7).unwrap(),
            total_sales: dec!(1000),
            recovery_percent: dec!(30),
            recovery_pool: dec!(300),
            lines: vec![
                PartnerAllocation {
                    partner: Partner::Founding,
                    pending_before: dec!(100),
                    amount: dec!(100),
                    pending_after: dec!(0),
                },
                PartnerAllocation {
                    partner: Partner::Operating,
                    pending_before: dec!(50),
                    amount: dec!(50),
                    pending_after: dec!(0),
                },
                PartnerAllocation {
                    partner: Partner::Silent,
                    pending_before: dec!(0),
                    amount: dec!(0),
                    pending_after: dec!(0),
                },
            ],
            total_reimbursed: dec!(150),
            profit: dec!(150),
            split: ProfitSplit {
                lead_partner: Partner::Founding,
                lead_share: dec!(75),
                joint_share: dec!(75),
            },
            finalized_at: "2025-08-01T00:00:00+00:00".to_string(),
        }
    }

    #[test]
    fn partner_round_trips_through_storage_encoding() {
        for partner in Partner::ALL {
            assert_eq!(partner.as_str().parse::<Partner>().unwrap(), partner);
        }
        assert!(matches!(
            "treasurer".parse::<Partner>(),
            Err(RecoupError::UnknownPartner(name)) if name == "treasurer"
        ));
    }

    #[test]
    fn partner_order_is_stable() {
        assert_eq!(
            Partner::ALL,
            [Partner::Founding, Partner::Operating, Partner::Silent]
        );
    }

    #[test]
    fn period_validates_month_range() {
        assert!(Period::new(2025, 1).is_ok());
        assert!(Period::new(2025, 12).is_ok());
        assert!(matches!(
            Period::new(2025, 0),
            Err(RecoupError::InvalidPeriod(_))
        ));
        assert!(matches!(
            Period::new(2025, 13),
            Err(RecoupError::InvalidPeriod(_))
        ));
    }

    #[test]
    fn period_formats_and_parses_year_month() {
        let period = Period::new(2025, 3).unwrap();
        assert_eq!(period.to_string(), "2025-03");
        assert_eq!("2025-03".parse::<Period>().unwrap(), period);
        assert!("2025".parse::<Period>().is_err());
        assert!("2025-3x".parse::<Period>().is_err());
    }

    #[test]
    fn periods_order_by_year_then_month() {
        let earlier = Period::new(2024, 12).unwrap();
        let later = Period::new(2025, 1).unwrap();
        assert!(earlier < later);
    }

    #[test]
    fn split_shares_sum_exactly_to_profit() {
        let policy = SplitPolicy {
            lead_partner: Partner::Founding,
            lead_share_percent: dec!(33),
        };
        let split = policy.split(dec!(100.01));
        assert_eq!(split.lead_share, dec!(33.00));
        assert_eq!(split.joint_share, dec!(67.01));
        assert_eq!(split.lead_share + split.joint_share, dec!(100.01));
    }

    #[test]
    fn split_handles_extreme_percentages() {
        let zero = SplitPolicy {
            lead_partner: Partner::Silent,
            lead_share_percent: dec!(0),
        }
        .split(dec!(42.42));
        assert_eq!(zero.lead_share, dec!(0));
        assert_eq!(zero.joint_share, dec!(42.42));

        let all = SplitPolicy {
            lead_partner: Partner::Silent,
            lead_share_percent: dec!(100),
        }
        .split(dec!(42.42));
        assert_eq!(all.lead_share, dec!(42.42));
        assert_eq!(all.joint_share, dec!(0));
    }

    #[test]
    fn policy_rejects_out_of_range_share() {
        let policy = SplitPolicy {
            lead_partner: Partner::Operating,
            lead_share_percent: dec!(100.5),
        };
        assert!(matches!(
            policy.validate(),
            Err(RecoupError::InvalidPercentage { .. })
        ));
    }

    #[test]
    fn record_validation_accepts_consistent_record() {
        assert!(consistent_record().validate().is_ok());
    }

    #[test]
    fn record_validation_rejects_overdrawn_pool() {
        let mut record = consistent_record();
        record.total_reimbursed = dec!(400);
        record.lines[0].amount = dec!(350);
        record.lines[0].pending_after = record.lines[0].pending_before - dec!(350);
        assert!(record.validate().is_err());
    }

    #[test]
    fn record_validation_rejects_split_mismatch() {
        let mut record = consistent_record();
        record.split.lead_share = dec!(80);
        assert!(matches!(
            record.validate(),
            Err(RecoupError::InvalidRecord { reason }) if reason.contains("split")
        ));
    }

    #[test]
    fn record_validation_rejects_misordered_lines() {
        let mut record = consistent_record();
        record.lines.swap(0, 1);
        assert!(record.validate().is_err());
    }

    #[test]
    fn record_validation_rejects_unreconciled_line() {
        let mut record = consistent_record();
        record.lines[1].pending_after = dec!(5);
        assert!(matches!(
            record.validate(),
            Err(RecoupError::InvalidRecord { reason }) if reason.contains("reconcile")
        ));
    }

    #[test]
    fn record_validation_survives_extreme_magnitudes() {
        let mut record = consistent_record();
        record.total_sales = Decimal::MAX;
        assert!(record.validate().is_err());

        // Line amounts whose sum overflows must fail, not panic.
        let mut record = consistent_record();
        for line in &mut record.lines[..2] {
            line.pending_before = Decimal::MAX;
            line.amount = Decimal::MAX;
            line.pending_after = dec!(0);
        }
        assert!(record.validate().is_err());

        let mut record = consistent_record();
        record.split.lead_share = Decimal::MAX;
        record.split.joint_share = Decimal::MAX;
        assert!(record.validate().is_err());
    }

    #[test]
    fn balance_consistency_check() {
        let balance = PartnerBalance {
            partner: Partner::Founding,
            pending_balance: dec!(25),
            total_expenses: dec!(100),
            total_reimbursed: dec!(75),
            created_at: String::new(),
            updated_at: String::new(),
        };
        assert!(balance.is_consistent());
    }
}
