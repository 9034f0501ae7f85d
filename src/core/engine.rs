use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use rayon::prelude::*;

use super::brackets::TaxTables;
use super::error::SimError;
use super::history::HistoricalReturns;
use super::rmd::required_distribution;
use super::tax::{federal_ltcg_tax, federal_ordinary_tax, ss_taxable_fraction, state_tax};
use super::types::{
    AccountPoint, AccountYearRecord, AnnualDetail, AssetClass, Band, BandReturns, ExpenseDetail,
    ExpenseYearRecord, IncomeDetail, IncomeKind, IncomeYearRecord, Plan, PortfolioPoint,
    ReturnDetail, RunConfig, SimulationResult, StateTax, TaxTreatment, YearRecord,
};
use super::withdrawal::{AccountState, WithdrawalBucket, withdraw_for_need};

/// Cooperative cancellation flag checked between runs. Completed runs still
/// aggregate into a partial result.
#[derive(Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// Everything one run produces. Portfolio and per-account series always span
/// the full horizon, holding zeros past a failure year; the record trace
/// stops at the failure year.
#[derive(Debug)]
struct RunOutput {
    run_index: usize,
    success: bool,
    records: Vec<YearRecord>,
    portfolio_by_year: Vec<f64>,
    account_by_year: Vec<Vec<f64>>,
    stock_rates: Vec<f64>,
    final_total: f64,
}

/// Run the full Monte Carlo batch and aggregate.
pub fn simulate(
    history: &HistoricalReturns,
    plan: &Plan,
    config: &RunConfig,
    seed: u64,
) -> Result<SimulationResult, SimError> {
    simulate_cancellable(history, plan, config, seed, &CancelToken::new())
}

pub fn simulate_cancellable(
    history: &HistoricalReturns,
    plan: &Plan,
    config: &RunConfig,
    seed: u64,
    cancel: &CancelToken,
) -> Result<SimulationResult, SimError> {
    plan.validate()?;
    config.validate()?;

    let started = Instant::now();
    let runs = run_batch(history, plan, config, seed, cancel)?;
    tracing::info!(
        completed = runs.len(),
        requested = config.num_runs,
        horizon = plan.planning_horizon_years,
        elapsed_ms = started.elapsed().as_millis() as u64,
        "simulation batch complete"
    );

    Ok(aggregate(plan, config, &runs))
}

/// Per-age trace of the requested band's representative run.
pub fn debug_trace(
    history: &HistoricalReturns,
    plan: &Plan,
    config: &RunConfig,
    seed: u64,
    band: Band,
) -> Result<Vec<YearRecord>, SimError> {
    plan.validate()?;
    config.validate()?;

    let runs = run_batch(history, plan, config, seed, &CancelToken::new())?;
    let position = select_bands(&runs, config)
        .into_iter()
        .find(|(slot, _)| *slot == band)
        .map(|(_, position)| position)
        .expect("all three bands are always selected");
    Ok(runs[position].records.clone())
}

fn run_batch(
    history: &HistoricalReturns,
    plan: &Plan,
    config: &RunConfig,
    seed: u64,
    cancel: &CancelToken,
) -> Result<Vec<RunOutput>, SimError> {
    let tables = TaxTables::default();
    let run_one = |run_index: usize| -> Option<Result<RunOutput, SimError>> {
        if cancel.is_cancelled() {
            return None;
        }
        let mut rng = Rng::new(derive_seed(seed, run_index as u64));
        Some(simulate_run(
            history,
            plan,
            &tables,
            config,
            run_index,
            &mut rng,
        ))
    };

    // Identical per-run seeding makes the two paths bit-for-bit equivalent.
    let collected: Vec<Option<Result<RunOutput, SimError>>> =
        if config.num_runs >= config.parallel_threshold {
            (0..config.num_runs).into_par_iter().map(run_one).collect()
        } else {
            (0..config.num_runs).map(run_one).collect()
        };

    let mut runs = Vec::with_capacity(config.num_runs);
    for item in collected {
        if let Some(run) = item {
            runs.push(run?);
        }
    }
    if runs.is_empty() {
        return Err(SimError::Cancelled);
    }
    Ok(runs)
}

fn simulate_run(
    history: &HistoricalReturns,
    plan: &Plan,
    tables: &TaxTables,
    config: &RunConfig,
    run_index: usize,
    rng: &mut Rng,
) -> Result<RunOutput, SimError> {
    let horizon = plan.planning_horizon_years as usize;
    let multipliers =
        history.sample_annual_multipliers(horizon, rng, config.initial_regime)?;

    let mut accounts: Vec<AccountState> =
        plan.accounts.iter().map(AccountState::from_plan).collect();
    let mut records = Vec::with_capacity(horizon);
    let mut portfolio_by_year = vec![0.0; horizon];
    let mut account_by_year = vec![vec![0.0; horizon]; accounts.len()];
    let mut failed = false;

    for year in 0..horizon {
        let age = plan.current_age + year as u32;
        let record = simulate_year(
            plan,
            tables,
            &mut accounts,
            age,
            year as u32,
            multipliers[year],
            run_index,
        )?;

        for (idx, acct) in accounts.iter().enumerate() {
            account_by_year[idx][year] = acct.balance;
        }
        portfolio_by_year[year] = record.portfolio_end;
        let year_failed = record.failed;
        records.push(record);
        if year_failed {
            failed = true;
            break;
        }
    }

    Ok(RunOutput {
        run_index,
        success: !failed,
        records,
        final_total: portfolio_by_year[horizon - 1],
        portfolio_by_year,
        account_by_year,
        stock_rates: multipliers.iter().map(|m| m - 1.0).collect(),
    })
}

/// One year of one run: the phase order here is a contract, not a detail.
fn simulate_year(
    plan: &Plan,
    tables: &TaxTables,
    accounts: &mut [AccountState],
    age: u32,
    years_elapsed: u32,
    stock_multiplier: f64,
    run_index: usize,
) -> Result<YearRecord, SimError> {
    // Phase 1 — opening snapshot.
    let start_balances: Vec<f64> = accounts.iter().map(|a| a.balance).collect();

    // Phase 2 — growth. Stocks follow the sampled annual multiplier; other
    // assets compound at their deterministic rate.
    let mut growth_rates = vec![0.0; accounts.len()];
    let mut growth_amounts = vec![0.0; accounts.len()];
    for (idx, acct) in accounts.iter_mut().enumerate() {
        let rate = match acct.asset_class {
            AssetClass::Stocks => stock_multiplier - 1.0,
            _ => acct.annual_return,
        };
        let before = acct.balance;
        acct.balance = (before * (1.0 + rate)).max(0.0);
        growth_rates[idx] = rate;
        growth_amounts[idx] = acct.balance - before;
    }

    // Phase 3 — income collection at face value.
    let mut ss_gross = 0.0;
    let mut other_ordinary = 0.0;
    let mut other_nontaxable = 0.0;
    let mut incomes = Vec::new();
    for src in &plan.income_sources {
        if !(src.start_age <= age && age <= src.end_age) {
            continue;
        }
        let amount = src.annual_amount;
        incomes.push(IncomeYearRecord {
            source_name: src.name.clone(),
            amount,
        });
        match src.kind {
            IncomeKind::SocialSecurity => ss_gross += amount,
            IncomeKind::Other => {
                if src.taxable.unwrap_or(false) {
                    other_ordinary += amount;
                } else {
                    other_nontaxable += amount;
                }
            }
            _ => other_ordinary += amount,
        }
    }

    // Phase 4 — required distributions. The divisor applies to the opening
    // (prior December 31) balance; the debit caps at what the account holds
    // now. Taken even when the year needs no cash.
    let mut rmd_total = 0.0;
    let mut rmd_amounts = vec![0.0; accounts.len()];
    for (idx, acct) in accounts.iter_mut().enumerate() {
        if acct.tax_treatment != TaxTreatment::Traditional {
            continue;
        }
        let debit = required_distribution(start_balances[idx], age).min(acct.balance);
        if debit > 0.0 {
            acct.balance -= debit;
            rmd_amounts[idx] = debit;
            rmd_total += debit;
        }
    }

    // Phase 5 — Social Security taxability.
    let provisional_income = other_ordinary + rmd_total + other_nontaxable + 0.5 * ss_gross;
    let ss_fraction = ss_taxable_fraction(provisional_income, plan.filing_status, tables);
    let taxable_ss = ss_fraction * ss_gross;

    // Phase 6 — cash on hand. RMD dollars left their accounts and count
    // exactly once.
    let available_income = ss_gross + other_ordinary + other_nontaxable + rmd_total;

    // Phase 7 — expenses, compounded from the plan's current age.
    let mut total_expenses = 0.0;
    let mut expenses = Vec::new();
    for exp in &plan.expenses {
        if !(exp.start_age <= age && age <= exp.end_age) {
            continue;
        }
        let adjusted = exp.annual_amount * (1.0 + exp.inflation_rate).powi(years_elapsed as i32);
        total_expenses += adjusted;
        expenses.push(ExpenseYearRecord {
            expense_name: exp.name.clone(),
            amount: adjusted,
        });
    }

    // Phase 8 — withdraw for the expense shortfall.
    let net_need = (total_expenses - available_income).max(0.0);
    let expense_wd = withdraw_for_need(accounts, net_need, WithdrawalBucket::Expense)?;

    // Phase 9 — taxes on everything realized so far this year. The state
    // base always excludes the taxable Social Security portion; California
    // additionally taxes long-term gains as ordinary income.
    let ordinary_income = other_ordinary + rmd_total + taxable_ss + expense_wd.ordinary_income;
    let ltcg_income = expense_wd.ltcg_income;
    let tax_federal_ordinary = federal_ordinary_tax(ordinary_income, plan.filing_status, tables);
    let tax_federal_ltcg =
        federal_ltcg_tax(ordinary_income, ltcg_income, plan.filing_status, tables);
    let state_taxable = match plan.state_tax {
        StateTax::California => ordinary_income - taxable_ss + ltcg_income,
        _ => ordinary_income - taxable_ss,
    };
    let tax_state_amount = state_tax(state_taxable, plan.state_tax, plan.filing_status, tables);
    let total_tax = tax_federal_ordinary + tax_federal_ltcg + tax_state_amount;

    let total_income_taxed = ordinary_income + ltcg_income;
    let effective_tax_rate = if total_income_taxed > 0.0 {
        total_tax / total_income_taxed
    } else {
        0.0
    };

    // Phase 10 — withdraw for the tax bill not covered by leftover cash.
    // What this round realizes is deliberately not re-taxed this year.
    let surplus = (available_income + expense_wd.total_withdrawn - total_expenses).max(0.0);
    let tax_need = (total_tax - surplus).max(0.0);
    let tax_wd = withdraw_for_need(accounts, tax_need, WithdrawalBucket::Tax)?;

    // Conservation audit: end = start + growth - rmd - withdrawals, every
    // account, every year. A miss is a bug, not an outcome.
    for (idx, acct) in accounts.iter().enumerate() {
        let expected = start_balances[idx] + growth_amounts[idx]
            - rmd_amounts[idx]
            - expense_wd.by_account[idx]
            - tax_wd.by_account[idx];
        let tolerance = 1e-6 * (1.0 + start_balances[idx].abs());
        if acct.balance < 0.0 || (acct.balance - expected).abs() > tolerance {
            return Err(SimError::InvariantViolation {
                run: run_index,
                age,
                account: acct.name.clone(),
                message: format!(
                    "balance {} diverged from reconstruction {expected}",
                    acct.balance
                ),
            });
        }
    }

    // Phase 11 — failure latch.
    let mut portfolio_end: f64 = accounts.iter().map(|a| a.balance).sum();
    let failed = portfolio_end <= 0.0;
    if failed {
        for acct in accounts.iter_mut() {
            acct.balance = 0.0;
        }
        portfolio_end = 0.0;
    }

    // Phase 12 — commit the record.
    let account_records = accounts
        .iter()
        .enumerate()
        .map(|(idx, acct)| AccountYearRecord {
            account_id: acct.id,
            account_name: acct.name.clone(),
            start_balance: start_balances[idx],
            growth_rate: growth_rates[idx],
            growth_amount: growth_amounts[idx],
            rmd_amount: rmd_amounts[idx],
            withdrawn_expense: expense_wd.by_account[idx],
            withdrawn_tax: tax_wd.by_account[idx],
            end_balance: acct.balance,
        })
        .collect();

    Ok(YearRecord {
        age,
        accounts: account_records,
        incomes,
        ss_gross,
        ss_fraction,
        taxable_ss,
        provisional_income,
        rmd_total,
        expenses,
        total_expenses,
        available_income,
        net_need,
        ordinary_income,
        ltcg_income,
        tax_federal_ordinary,
        tax_federal_ltcg,
        tax_state: tax_state_amount,
        total_tax,
        effective_tax_rate,
        shortfall: expense_wd.shortfall + tax_wd.shortfall,
        portfolio_end,
        failed,
    })
}

/// Rank runs by final portfolio total and pick the representative for each
/// band. Ties resolve to the smaller run index. Returned positions index
/// into the `runs` slice.
fn select_bands(runs: &[RunOutput], config: &RunConfig) -> [(Band, usize); 3] {
    let n = runs.len();
    let mut order: Vec<usize> = (0..n).collect();
    order.sort_by(|&a, &b| {
        runs[a]
            .final_total
            .total_cmp(&runs[b].final_total)
            .then_with(|| runs[a].run_index.cmp(&runs[b].run_index))
    });

    let rank = |pct: f64| ((pct / 100.0) * (n as f64 - 1.0)).round() as usize;
    [
        (Band::Lower, order[rank(config.lower_pct as f64).min(n - 1)]),
        (Band::Median, order[(((n - 1) as f64) / 2.0).round() as usize]),
        (Band::Upper, order[rank(config.upper_pct as f64).min(n - 1)]),
    ]
}

fn aggregate(plan: &Plan, config: &RunConfig, runs: &[RunOutput]) -> SimulationResult {
    let horizon = plan.planning_horizon_years as usize;
    let successes = runs.iter().filter(|r| r.success).count();
    let success_rate = successes as f64 / runs.len() as f64;

    let mut portfolio_timeline = Vec::with_capacity(horizon);
    for year in 0..horizon {
        let mut values: Vec<f64> = runs.iter().map(|r| r.portfolio_by_year[year]).collect();
        portfolio_timeline.push(PortfolioPoint {
            age: plan.current_age + year as u32,
            p_lower: percentile(&mut values, config.lower_pct as f64),
            p50: percentile(&mut values, 50.0),
            p_upper: percentile(&mut values, config.upper_pct as f64),
        });
    }

    let mut account_timeline = Vec::new();
    let mut annual_detail = Vec::new();
    let mut income_detail = Vec::new();
    let mut expense_detail = Vec::new();
    let mut return_detail = Vec::new();
    let mut representative_returns = Vec::with_capacity(3);

    for (band, position) in select_bands(runs, config) {
        let run = &runs[position];

        for (idx, acct) in plan.accounts.iter().enumerate() {
            for year in 0..horizon {
                account_timeline.push(AccountPoint {
                    band,
                    account_id: acct.id,
                    account_name: acct.name.clone(),
                    age: plan.current_age + year as u32,
                    balance: run.account_by_year[idx][year],
                });
            }
        }

        for record in &run.records {
            annual_detail.push(AnnualDetail {
                band,
                age: record.age,
                tax_federal_ordinary: record.tax_federal_ordinary,
                tax_federal_ltcg: record.tax_federal_ltcg,
                tax_state: record.tax_state,
                effective_tax_rate: record.effective_tax_rate,
            });
            for income in &record.incomes {
                income_detail.push(IncomeDetail {
                    band,
                    age: record.age,
                    source_name: income.source_name.clone(),
                    amount: income.amount,
                });
            }
            for expense in &record.expenses {
                expense_detail.push(ExpenseDetail {
                    band,
                    age: record.age,
                    expense_name: expense.expense_name.clone(),
                    amount: expense.amount,
                });
            }
            for acct in &record.accounts {
                return_detail.push(ReturnDetail {
                    band,
                    age: record.age,
                    account_id: acct.account_id,
                    account_name: acct.account_name.clone(),
                    return_amount: acct.growth_amount,
                });
            }
        }

        representative_returns.push(BandReturns {
            band,
            rates: run.stock_rates.clone(),
        });
    }

    SimulationResult {
        success_rate,
        num_runs: runs.len(),
        lower_pct: config.lower_pct,
        upper_pct: config.upper_pct,
        portfolio_timeline,
        account_timeline,
        annual_detail,
        income_detail,
        expense_detail,
        return_detail,
        representative_returns,
    }
}

/// Linear interpolation between order statistics.
fn percentile(values: &mut [f64], p: f64) -> f64 {
    if values.is_empty() {
        return 0.0;
    }

    values.sort_by(|a, b| a.total_cmp(b));

    let n = values.len();
    if n == 1 {
        return values[0];
    }

    let rank = (p / 100.0) * (n as f64 - 1.0);
    let lower = rank.floor() as usize;
    let upper = rank.ceil() as usize;

    if lower == upper {
        values[lower]
    } else {
        let w = rank - lower as f64;
        values[lower] * (1.0 - w) + values[upper] * w
    }
}

pub(crate) fn derive_seed(base_seed: u64, run_index: u64) -> u64 {
    splitmix64(base_seed ^ run_index.wrapping_mul(0x9E37_79B9_7F4A_7C15))
}

fn splitmix64(mut x: u64) -> u64 {
    x = x.wrapping_add(0x9E37_79B9_7F4A_7C15);
    let mut z = x;
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    z ^ (z >> 31)
}

/// xorshift64*. Small, fast, and — unlike a library generator — guaranteed
/// stable across releases, which the replay contract depends on.
pub(crate) struct Rng {
    state: u64,
}

impl Rng {
    pub(crate) fn new(seed: u64) -> Self {
        let state = if seed == 0 { 0xA5A5_A5A5_A5A5_A5A5 } else { seed };
        Self { state }
    }

    fn next_u64(&mut self) -> u64 {
        let mut x = self.state;
        x ^= x >> 12;
        x ^= x << 25;
        x ^= x >> 27;
        self.state = x;
        x.wrapping_mul(0x2545_F491_4F6C_DD1D)
    }

    /// Uniform in (0, 1).
    pub(crate) fn next_f64(&mut self) -> f64 {
        const DENOM: f64 = (1_u64 << 53) as f64;
        let v = self.next_u64() >> 11;
        ((v as f64) + 0.5) / DENOM
    }

    /// Uniform index in `[0, bound)`.
    pub(crate) fn next_index(&mut self, bound: usize) -> usize {
        debug_assert!(bound > 0);
        ((self.next_f64() * bound as f64) as usize).min(bound - 1)
    }
}
