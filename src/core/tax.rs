//! Federal and state tax calculations.
//!
//! Every function here is pure over its arguments so the Monte Carlo year
//! loop can call them without ceremony. Bracket thresholds come from
//! [`TaxTables`]; nothing in this file carries a dollar constant.

use super::brackets::{BracketSchedule, TaxTables};
use super::types::{FilingStatus, StateTax};

/// Apply a progressive schedule to `income`.
fn progressive_tax(income: f64, brackets: &BracketSchedule) -> f64 {
    let mut tax = 0.0;
    let mut prev_ceiling = 0.0;
    for &(rate, ceiling) in brackets {
        if income <= prev_ceiling {
            break;
        }
        tax += (income.min(ceiling) - prev_ceiling) * rate;
        prev_ceiling = ceiling;
    }
    tax
}

/// Tax `ltcg` stacked on top of `taxable_ordinary`: ordinary income consumes
/// the lower brackets first, and each dollar of gain is taxed at the rate of
/// the bracket it lands in.
fn ltcg_stacked(taxable_ordinary: f64, ltcg: f64, brackets: &BracketSchedule) -> f64 {
    if ltcg <= 0.0 {
        return 0.0;
    }

    let stack_start = taxable_ordinary;
    let stack_end = taxable_ordinary + ltcg;

    let mut tax = 0.0;
    let mut prev_ceiling = 0.0;
    for &(rate, ceiling) in brackets {
        let lo = stack_start.max(prev_ceiling);
        let hi = stack_end.min(ceiling);
        if hi > lo {
            tax += (hi - lo) * rate;
        }
        prev_ceiling = ceiling;
        if stack_end <= ceiling {
            break;
        }
    }
    tax
}

/// Federal tax on ordinary income: standard deduction, then the progressive
/// schedule for the filing status.
pub fn federal_ordinary_tax(ordinary_income: f64, status: FilingStatus, tables: &TaxTables) -> f64 {
    let taxable = (ordinary_income - tables.standard_deduction(status)).max(0.0);
    progressive_tax(taxable, tables.federal_ordinary(status))
}

/// Federal tax on long-term capital gains, stacked on taxable ordinary
/// income. `ordinary_income` is gross (pre-deduction), matching
/// [`federal_ordinary_tax`], so the pair can be fed the same tallies.
pub fn federal_ltcg_tax(
    ordinary_income: f64,
    ltcg_income: f64,
    status: FilingStatus,
    tables: &TaxTables,
) -> f64 {
    let taxable_ordinary = (ordinary_income - tables.standard_deduction(status)).max(0.0);
    ltcg_stacked(taxable_ordinary, ltcg_income.max(0.0), tables.federal_ltcg(status))
}

/// State tax on `ordinary_income` under the plan's regime.
///
/// The caller builds the state-taxable base: the Social Security taxable
/// portion is excluded in every mode, and for California long-term gains are
/// folded in (the state grants them no preferential rate).
pub fn state_tax(
    ordinary_income: f64,
    regime: StateTax,
    status: FilingStatus,
    tables: &TaxTables,
) -> f64 {
    match regime {
        StateTax::None => 0.0,
        StateTax::Flat { rate } => ordinary_income.max(0.0) * rate,
        StateTax::California => {
            let taxable = (ordinary_income - tables.ca_standard_deduction(status)).max(0.0);
            progressive_tax(taxable, tables.ca_brackets(status))
        }
    }
}

/// Taxable fraction of Social Security benefits given provisional income:
/// zero below the first threshold, 0.5 between the thresholds, 0.85 above.
pub fn ss_taxable_fraction(
    provisional_income: f64,
    status: FilingStatus,
    tables: &TaxTables,
) -> f64 {
    let (lower, upper) = tables.ss_thresholds(status);
    if provisional_income <= lower {
        0.0
    } else if provisional_income <= upper {
        0.5
    } else {
        0.85
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::{prop_assert, proptest};

    const EPS: f64 = 1e-6;

    fn assert_approx(actual: f64, expected: f64) {
        assert!(
            (actual - expected).abs() <= EPS,
            "expected {expected}, got {actual}"
        );
    }

    fn tables() -> TaxTables {
        TaxTables::default()
    }

    #[test]
    fn federal_ordinary_below_deduction_is_zero() {
        assert_approx(
            federal_ordinary_tax(14_000.0, FilingStatus::Single, &tables()),
            0.0,
        );
    }

    #[test]
    fn federal_ordinary_single_50k() {
        // 50_000 - 14_600 = 35_400 taxable:
        // 11_600 at 10% + 23_800 at 12%
        let expected = 11_600.0 * 0.10 + (35_400.0 - 11_600.0) * 0.12;
        assert_approx(
            federal_ordinary_tax(50_000.0, FilingStatus::Single, &tables()),
            expected,
        );
    }

    #[test]
    fn federal_ordinary_married_doubles_bracket_room() {
        let single = federal_ordinary_tax(120_000.0, FilingStatus::Single, &tables());
        let married = federal_ordinary_tax(120_000.0, FilingStatus::MarriedJointly, &tables());
        assert!(married < single);
    }

    #[test]
    fn ltcg_straddles_zero_bracket_ceiling() {
        // Taxable ordinary of 40_000 leaves 7_025 of 0%-bracket room before
        // the single 47_025 ceiling; the remaining 12_975 is taxed at 15%.
        let tax = ltcg_stacked(40_000.0, 20_000.0, tables().federal_ltcg(FilingStatus::Single));
        assert_approx(tax, 12_975.0 * 0.15);
    }

    #[test]
    fn ltcg_entirely_within_zero_bracket() {
        let tax = federal_ltcg_tax(20_000.0, 10_000.0, FilingStatus::Single, &tables());
        assert_approx(tax, 0.0);
    }

    #[test]
    fn ltcg_zero_for_nonpositive_gain() {
        assert_approx(
            federal_ltcg_tax(100_000.0, 0.0, FilingStatus::Single, &tables()),
            0.0,
        );
        assert_approx(
            federal_ltcg_tax(100_000.0, -5_000.0, FilingStatus::Single, &tables()),
            0.0,
        );
    }

    #[test]
    fn state_none_is_always_zero() {
        assert_approx(
            state_tax(1_000_000.0, StateTax::None, FilingStatus::Single, &tables()),
            0.0,
        );
    }

    #[test]
    fn state_flat_applies_rate() {
        assert_approx(
            state_tax(
                80_000.0,
                StateTax::Flat { rate: 0.05 },
                FilingStatus::Single,
                &tables(),
            ),
            4_000.0,
        );
    }

    #[test]
    fn state_california_progressive_60k_single() {
        // 60_000 - 5_202 = 54_798 taxable through the CA schedule.
        let taxable: f64 = 54_798.0;
        let expected = 10_412.0 * 0.010
            + (24_684.0 - 10_412.0) * 0.020
            + (38_959.0 - 24_684.0) * 0.040
            + (54_081.0 - 38_959.0) * 0.060
            + (taxable - 54_081.0) * 0.080;
        assert_approx(
            state_tax(
                60_000.0,
                StateTax::California,
                FilingStatus::Single,
                &tables(),
            ),
            expected,
        );
    }

    #[test]
    fn ss_fraction_thresholds_single() {
        let t = tables();
        assert_approx(ss_taxable_fraction(25_000.0, FilingStatus::Single, &t), 0.0);
        assert_approx(ss_taxable_fraction(25_000.01, FilingStatus::Single, &t), 0.5);
        assert_approx(ss_taxable_fraction(34_000.0, FilingStatus::Single, &t), 0.5);
        assert_approx(ss_taxable_fraction(34_000.01, FilingStatus::Single, &t), 0.85);
    }

    proptest! {
        #[test]
        fn prop_ss_fraction_in_set_and_monotone(
            income_a in 0.0_f64..200_000.0,
            income_b in 0.0_f64..200_000.0,
        ) {
            let t = tables();
            for status in [FilingStatus::Single, FilingStatus::MarriedJointly] {
                let fa = ss_taxable_fraction(income_a, status, &t);
                let fb = ss_taxable_fraction(income_b, status, &t);
                prop_assert!([0.0, 0.5, 0.85].contains(&fa));
                if income_a <= income_b {
                    prop_assert!(fa <= fb);
                } else {
                    prop_assert!(fb <= fa);
                }
            }
        }

        #[test]
        fn prop_shifting_ordinary_into_ltcg_never_raises_federal_tax(
            total in 1.0_f64..800_000.0,
            split in 0.0_f64..1.0,
            shift in 0.0_f64..10_000.0,
        ) {
            // Holding total income constant, moving a dollar from ordinary
            // to long-term gains must not increase the combined federal bill.
            let t = tables();
            for status in [FilingStatus::Single, FilingStatus::MarriedJointly] {
                let ordinary = total * split;
                let ltcg = total - ordinary;
                let shift = shift.min(ordinary);

                let before = federal_ordinary_tax(ordinary, status, &t)
                    + federal_ltcg_tax(ordinary, ltcg, status, &t);
                let after = federal_ordinary_tax(ordinary - shift, status, &t)
                    + federal_ltcg_tax(ordinary - shift, ltcg + shift, status, &t);
                prop_assert!(after <= before + 1e-6);
            }
        }

        #[test]
        fn prop_ltcg_free_below_first_threshold(
            ordinary in 0.0_f64..40_000.0,
            ltcg in 0.0_f64..40_000.0,
        ) {
            let t = tables();
            let status = FilingStatus::Single;
            let taxable_ordinary =
                (ordinary - t.standard_deduction(status)).max(0.0);
            let first_ceiling = t.federal_ltcg(status)[0].1;
            if taxable_ordinary + ltcg <= first_ceiling {
                prop_assert!(federal_ltcg_tax(ordinary, ltcg, status, &t) == 0.0);
            }
        }

        #[test]
        fn prop_progressive_tax_monotone_in_income(
            lo in 0.0_f64..1_000_000.0,
            delta in 0.0_f64..100_000.0,
        ) {
            let t = tables();
            for status in [FilingStatus::Single, FilingStatus::MarriedJointly] {
                let a = federal_ordinary_tax(lo, status, &t);
                let b = federal_ordinary_tax(lo + delta, status, &t);
                prop_assert!(b + 1e-9 >= a);
            }
        }
    }
}
