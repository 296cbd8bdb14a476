use proptest::prelude::*;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use recoup::{Backoffice, Partner, RecoupError};

fn office() -> Backoffice {
    Backoffice::open_in_memory().expect("in-memory database")
}

#[test]
fn fresh_ledger_starts_at_zero_for_every_partner() {
    let office = office();
    let balances = office.balances().unwrap();
    assert_eq!(balances.len(), 3);
    for (balance, partner) in balances.iter().zip(Partner::ALL) {
        assert_eq!(balance.partner, partner);
        assert_eq!(balance.pending_balance, dec!(0));
        assert_eq!(balance.total_expenses, dec!(0));
        assert_eq!(balance.total_reimbursed, dec!(0));
    }
}

#[test]
fn expenses_and_reimbursements_reconcile() {
    let office = office();
    office.record_expense(Partner::Operating, dec!(120.40)).unwrap();
    office.record_expense(Partner::Operating, dec!(30.10)).unwrap();
    office.apply_reimbursement(Partner::Operating, dec!(50)).unwrap();

    let balance = office.balance(Partner::Operating).unwrap();
    assert_eq!(balance.pending_balance, dec!(100.50));
    assert_eq!(balance.total_expenses, dec!(150.50));
    assert_eq!(balance.total_reimbursed, dec!(50));
    assert!(balance.is_consistent());
}

#[test]
fn expense_must_be_a_positive_cent_amount() {
    let office = office();
    for bad in [dec!(0), dec!(-5), dec!(0.001)] {
        assert!(matches!(
            office.record_expense(Partner::Founding, bad),
            Err(RecoupError::InvalidAmount { .. })
        ));
    }
    // Rejected calls leave no trace.
    assert_eq!(office.balance(Partner::Founding).unwrap().total_expenses, dec!(0));
}

#[test]
fn oversized_amounts_are_rejected_without_wedging_the_office() {
    let office = office();
    for absurd in [dec!(1_000_000_000_000.01), Decimal::MAX] {
        assert!(matches!(
            office.record_expense(Partner::Founding, absurd),
            Err(RecoupError::InvalidAmount { .. })
        ));
        assert!(matches!(
            office.apply_reimbursement(Partner::Founding, absurd),
            Err(RecoupError::InvalidAmount { .. })
        ));
    }

    // The handle is still usable afterwards.
    office.record_expense(Partner::Founding, dec!(12.50)).unwrap();
    assert_eq!(
        office.balance(Partner::Founding).unwrap().pending_balance,
        dec!(12.50)
    );
}

#[test]
fn reimbursement_cannot_exceed_pending() {
    let office = office();
    office.record_expense(Partner::Silent, dec!(25)).unwrap();

    let err = office
        .apply_reimbursement(Partner::Silent, dec!(25.01))
        .unwrap_err();
    assert!(matches!(
        err,
        RecoupError::InsufficientPendingBalance { pending, .. } if pending == dec!(25)
    ));

    let balance = office.balance(Partner::Silent).unwrap();
    assert_eq!(balance.pending_balance, dec!(25));
    assert_eq!(balance.total_reimbursed, dec!(0));
}

#[test]
fn zero_reimbursement_is_a_no_op() {
    let office = office();
    office.record_expense(Partner::Founding, dec!(10)).unwrap();
    let before = office.balance(Partner::Founding).unwrap();
    let after = office.apply_reimbursement(Partner::Founding, dec!(0)).unwrap();
    assert_eq!(after, before);
}

#[test]
fn negative_reimbursement_is_rejected() {
    let office = office();
    assert!(matches!(
        office.apply_reimbursement(Partner::Founding, dec!(-1)),
        Err(RecoupError::InvalidAmount { .. })
    ));
}

#[test]
fn unknown_partner_names_are_rejected_at_the_boundary() {
    let err = "accountant".parse::<Partner>().unwrap_err();
    assert!(matches!(err, RecoupError::UnknownPartner(name) if name == "accountant"));
}

#[test]
fn parallel_expense_recording_loses_nothing() {
    let office = office();
    let mut handles = Vec::new();
    for _ in 0..4 {
        let office = office.clone();
        handles.push(std::thread::spawn(move || {
            for _ in 0..25 {
                office.record_expense(Partner::Silent, dec!(0.01)).unwrap();
            }
        }));
    }
    for handle in handles {
        handle.join().unwrap();
    }

    let balance = office.balance(Partner::Silent).unwrap();
    assert_eq!(balance.total_expenses, dec!(1.00));
    assert_eq!(balance.pending_balance, dec!(1.00));
    assert!(balance.is_consistent());
}

#[test]
fn summary_totals_aggregate_every_partner() {
    let office = office();
    office.record_expense(Partner::Founding, dec!(120.00)).unwrap();
    office.record_expense(Partner::Operating, dec!(80.50)).unwrap();
    office.apply_reimbursement(Partner::Founding, dec!(20.00)).unwrap();

    let summary = office.summary().unwrap();
    assert_eq!(summary.balances.len(), 3);
    assert_eq!(summary.total_expenses, dec!(200.50));
    assert_eq!(summary.total_reimbursed, dec!(20.00));
    assert_eq!(summary.total_pending, dec!(180.50));
    assert_eq!(summary.last_finalized, None);
}

#[derive(Debug, Clone)]
enum Op {
    Expense(usize, Decimal),
    Apply(usize, Decimal),
}

fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        (0..3usize, 1..100_000i64)
            .prop_map(|(partner, cents)| Op::Expense(partner, Decimal::new(cents, 2))),
        (0..3usize, 0..100_000i64)
            .prop_map(|(partner, cents)| Op::Apply(partner, Decimal::new(cents, 2))),
    ]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// After any sequence of expenses and reimbursements, every balance
    /// satisfies pending = expenses - reimbursed and never goes negative.
    #[test]
    fn ledger_invariant_holds_for_any_op_sequence(
        ops in proptest::collection::vec(op_strategy(), 1..40)
    ) {
        let office = office();
        for op in ops {
            match op {
                Op::Expense(idx, amount) => {
                    office.record_expense(Partner::ALL[idx], amount).unwrap();
                }
                Op::Apply(idx, amount) => {
                    // May legitimately fail when the pending balance is short.
                    let _ = office.apply_reimbursement(Partner::ALL[idx], amount);
                }
            }
            for balance in office.balances().unwrap() {
                prop_assert!(balance.is_consistent());
                prop_assert!(balance.pending_balance >= Decimal::ZERO);
            }
        }
    }
}
