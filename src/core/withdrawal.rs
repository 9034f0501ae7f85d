//! Tax-efficient withdrawal sequencing.
//!
//! Cash need is covered in a fixed priority: cash savings first (no tax
//! event), then taxable-brokerage stock accounts (only the gains fraction is
//! realized as long-term gains), then other taxable-brokerage accounts
//! (fully realized as gains), and traditional accounts last (fully ordinary
//! income). Within a tier, accounts drain in plan order.

use super::error::SimError;
use super::types::{Account, AssetClass, TaxTreatment};

/// Runtime state of one account within a single run. `balance` mutates as
/// growth, required distributions, and withdrawals are applied.
#[derive(Clone, Debug)]
pub struct AccountState {
    pub id: u32,
    pub name: String,
    pub tax_treatment: TaxTreatment,
    pub asset_class: AssetClass,
    pub balance: f64,
    /// 0.0 for stocks; the run applies the sampled series instead.
    pub annual_return: f64,
    /// LTCG fraction of a withdrawal: per-plan for brokerage stocks, 1.0 for
    /// other brokerage assets, 0.0 elsewhere.
    pub gains_fraction: f64,
}

impl AccountState {
    /// Materialize the runtime state for one plan account.
    ///
    /// Callers hold a plan that already passed `Plan::validate()`, which
    /// guarantees the two optional fields resolved here are present where
    /// they are required.
    pub fn from_plan(account: &Account) -> Self {
        let gains_fraction = match (account.tax_treatment, account.asset_class) {
            (TaxTreatment::TaxableBrokerage, AssetClass::Stocks) => account
                .gains_fraction
                .expect("validated plan: brokerage stock accounts carry a gains fraction"),
            (TaxTreatment::TaxableBrokerage, _) => 1.0,
            _ => 0.0,
        };
        Self {
            id: account.id,
            name: account.name.clone(),
            tax_treatment: account.tax_treatment,
            asset_class: account.asset_class,
            balance: account.balance,
            annual_return: match account.asset_class {
                AssetClass::Stocks => 0.0,
                _ => account
                    .annual_return
                    .expect("validated plan: non-stock accounts carry an annual return"),
            },
            gains_fraction,
        }
    }

    /// Position in the withdrawal priority order; lower drains first.
    fn priority_tier(&self) -> usize {
        match (self.tax_treatment, self.asset_class) {
            (TaxTreatment::CashSavings, _) => 0,
            (TaxTreatment::TaxableBrokerage, AssetClass::Stocks) => 1,
            (TaxTreatment::TaxableBrokerage, _) => 2,
            (TaxTreatment::Traditional, _) => 3,
        }
    }
}

/// Which cash demand a withdrawal round covers; used for trace attribution.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum WithdrawalBucket {
    Expense,
    Tax,
}

/// Summary of one withdrawal round.
#[derive(Clone, Debug)]
pub struct WithdrawalOutcome {
    pub bucket: WithdrawalBucket,
    pub total_withdrawn: f64,
    /// Amount taxable as ordinary income (traditional withdrawals).
    pub ordinary_income: f64,
    /// Amount taxable as long-term gains (brokerage withdrawals).
    pub ltcg_income: f64,
    /// Demand left uncovered after every account was drained.
    pub shortfall: f64,
    /// Dollars taken per account, aligned with the input slice.
    pub by_account: Vec<f64>,
}

const TIERS: std::ops::RangeInclusive<usize> = 0..=3;

/// Withdraw `need` dollars from `accounts` in priority order, mutating
/// balances in place. A higher-priority account is always drained to zero
/// before a lower-priority account is touched. Negative need is an argument
/// error; an unmeetable need is not — the residual is reported as
/// `shortfall` and the caller decides how to surface it.
pub fn withdraw_for_need(
    accounts: &mut [AccountState],
    need: f64,
    bucket: WithdrawalBucket,
) -> Result<WithdrawalOutcome, SimError> {
    if !need.is_finite() || need < 0.0 {
        return Err(SimError::invalid(
            "need",
            format!("withdrawal need must be non-negative, got {need}"),
        ));
    }

    let mut outcome = WithdrawalOutcome {
        bucket,
        total_withdrawn: 0.0,
        ordinary_income: 0.0,
        ltcg_income: 0.0,
        shortfall: 0.0,
        by_account: vec![0.0; accounts.len()],
    };

    let mut remaining = need;
    for tier in TIERS {
        if remaining <= 0.0 {
            break;
        }
        for (idx, acct) in accounts.iter_mut().enumerate() {
            if acct.priority_tier() != tier || acct.balance <= 0.0 || remaining <= 0.0 {
                continue;
            }
            let taken = acct.balance.min(remaining);
            acct.balance -= taken;
            remaining -= taken;
            outcome.total_withdrawn += taken;
            outcome.by_account[idx] += taken;
            match acct.tax_treatment {
                TaxTreatment::Traditional => outcome.ordinary_income += taken,
                TaxTreatment::TaxableBrokerage => {
                    outcome.ltcg_income += taken * acct.gains_fraction;
                }
                TaxTreatment::CashSavings => {}
            }
        }
    }

    outcome.shortfall = remaining.max(0.0);
    Ok(outcome)
}
