mod brackets;
mod engine;
mod error;
mod history;
mod rmd;
mod tax;
mod types;
mod withdrawal;

pub use brackets::TaxTables;
pub use engine::{CancelToken, debug_trace, simulate, simulate_cancellable};
pub use error::SimError;
pub use history::HistoricalReturns;
pub use rmd::{RMD_START_AGE, required_distribution, uniform_lifetime_divisor};
pub use tax::{federal_ltcg_tax, federal_ordinary_tax, ss_taxable_fraction, state_tax};
pub use types::{
    Account, AccountPoint, AccountYearRecord, AnnualDetail, AssetClass, Band, BandReturns,
    DEFAULT_PARALLEL_THRESHOLD, Expense, ExpenseDetail, ExpenseYearRecord, FilingStatus,
    IncomeDetail, IncomeKind, IncomeSource, IncomeYearRecord, MarketRegime, Plan, PortfolioPoint,
    ReturnDetail, RunConfig, SimulationResult, StateTax, TaxTreatment, YearRecord,
};
pub use withdrawal::{AccountState, WithdrawalBucket, WithdrawalOutcome, withdraw_for_need};
