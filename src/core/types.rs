use serde::{Deserialize, Serialize};

use super::error::SimError;

#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FilingStatus {
    Single,
    #[serde(alias = "married", alias = "married_jointly", alias = "marriedJointly")]
    MarriedJointly,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TaxTreatment {
    Traditional,
    #[serde(alias = "taxable_brokerage", alias = "taxableBrokerage")]
    TaxableBrokerage,
    #[serde(alias = "cash_savings", alias = "cashSavings")]
    CashSavings,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AssetClass {
    Stocks,
    Bonds,
    Savings,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum IncomeKind {
    Employment,
    #[serde(alias = "social_security", alias = "socialSecurity")]
    SocialSecurity,
    Pension,
    Rental,
    #[serde(alias = "traditional_distribution", alias = "traditionalDistribution")]
    TraditionalDistribution,
    Other,
}

/// State income-tax regime. California taxes long-term gains as ordinary
/// income; the flat regime applies one rate to state-taxable ordinary income.
#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum StateTax {
    None,
    Flat { rate: f64 },
    California,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MarketRegime {
    Bear,
    Bull,
}

impl MarketRegime {
    pub fn flipped(self) -> Self {
        match self {
            Self::Bear => Self::Bull,
            Self::Bull => Self::Bear,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::Bear => "bear",
            Self::Bull => "bull",
        }
    }
}

/// Representative-run slot used for per-band reporting.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Band {
    Lower,
    Median,
    Upper,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Account {
    pub id: u32,
    pub name: String,
    pub tax_treatment: TaxTreatment,
    pub asset_class: AssetClass,
    pub balance: f64,
    /// Deterministic annual growth rate. Required for non-stock accounts;
    /// ignored for stocks, which follow the sampled historical series.
    #[serde(default)]
    pub annual_return: Option<f64>,
    /// Fraction of a withdrawal realized as long-term gains. Required for
    /// taxable-brokerage stock accounts; ignored everywhere else.
    #[serde(default)]
    pub gains_fraction: Option<f64>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IncomeSource {
    pub name: String,
    pub kind: IncomeKind,
    /// Face annual amount in today's dollars; the engine never inflates it.
    pub annual_amount: f64,
    pub start_age: u32,
    pub end_age: u32,
    /// Only consulted for `IncomeKind::Other`; every other kind has a fixed
    /// tax treatment.
    #[serde(default)]
    pub taxable: Option<bool>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Expense {
    pub name: String,
    /// Today's-dollars amount, compounded by `inflation_rate` from the
    /// plan's current age.
    pub annual_amount: f64,
    pub start_age: u32,
    pub end_age: u32,
    pub inflation_rate: f64,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Plan {
    pub current_age: u32,
    pub planning_horizon_years: u32,
    pub filing_status: FilingStatus,
    pub state_tax: StateTax,
    pub accounts: Vec<Account>,
    pub income_sources: Vec<IncomeSource>,
    pub expenses: Vec<Expense>,
}

impl Plan {
    /// Last simulated age, inclusive.
    pub fn final_age(&self) -> u32 {
        self.current_age + self.planning_horizon_years - 1
    }

    pub fn validate(&self) -> Result<(), SimError> {
        if self.planning_horizon_years == 0 {
            return Err(SimError::invalid(
                "planningHorizonYears",
                "must be at least 1",
            ));
        }

        for (i, acct) in self.accounts.iter().enumerate() {
            if !acct.balance.is_finite() || acct.balance < 0.0 {
                return Err(SimError::invalid(
                    format!("accounts[{i}].balance"),
                    "must be a non-negative number",
                ));
            }
            match acct.annual_return {
                Some(rate) if !rate.is_finite() || rate <= -1.0 => {
                    return Err(SimError::invalid(
                        format!("accounts[{i}].annualReturn"),
                        "must be a finite rate greater than -100%",
                    ));
                }
                None if acct.asset_class != AssetClass::Stocks => {
                    return Err(SimError::invalid(
                        format!("accounts[{i}].annualReturn"),
                        "required for non-stock accounts",
                    ));
                }
                _ => {}
            }
            match acct.gains_fraction {
                Some(g) if !(0.0..=1.0).contains(&g) => {
                    return Err(SimError::invalid(
                        format!("accounts[{i}].gainsFraction"),
                        "must be within [0, 1]",
                    ));
                }
                None if acct.tax_treatment == TaxTreatment::TaxableBrokerage
                    && acct.asset_class == AssetClass::Stocks =>
                {
                    return Err(SimError::invalid(
                        format!("accounts[{i}].gainsFraction"),
                        "required for taxable-brokerage stock accounts",
                    ));
                }
                _ => {}
            }
        }

        for (i, src) in self.income_sources.iter().enumerate() {
            if src.start_age > src.end_age {
                return Err(SimError::invalid(
                    format!("incomeSources[{i}].startAge"),
                    "startAge must not exceed endAge",
                ));
            }
            if !src.annual_amount.is_finite() || src.annual_amount < 0.0 {
                return Err(SimError::invalid(
                    format!("incomeSources[{i}].annualAmount"),
                    "must be a non-negative number",
                ));
            }
        }

        for (i, exp) in self.expenses.iter().enumerate() {
            if exp.start_age > exp.end_age {
                return Err(SimError::invalid(
                    format!("expenses[{i}].startAge"),
                    "startAge must not exceed endAge",
                ));
            }
            if !exp.annual_amount.is_finite() || exp.annual_amount < 0.0 {
                return Err(SimError::invalid(
                    format!("expenses[{i}].annualAmount"),
                    "must be a non-negative number",
                ));
            }
            if !exp.inflation_rate.is_finite() || exp.inflation_rate <= -1.0 {
                return Err(SimError::invalid(
                    format!("expenses[{i}].inflationRate"),
                    "must be a finite rate greater than -100%",
                ));
            }
        }

        Ok(())
    }
}

/// Run counts at or above `parallel_threshold` fan out over the rayon pool;
/// below it the batch runs sequentially. Both paths are bit-identical.
pub const DEFAULT_PARALLEL_THRESHOLD: usize = 64;

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunConfig {
    pub num_runs: usize,
    pub lower_pct: u8,
    pub upper_pct: u8,
    #[serde(default)]
    pub initial_regime: Option<MarketRegime>,
    #[serde(default = "default_parallel_threshold")]
    pub parallel_threshold: usize,
}

fn default_parallel_threshold() -> usize {
    DEFAULT_PARALLEL_THRESHOLD
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            num_runs: 1_000,
            lower_pct: 10,
            upper_pct: 90,
            initial_regime: None,
            parallel_threshold: DEFAULT_PARALLEL_THRESHOLD,
        }
    }
}

impl RunConfig {
    pub fn validate(&self) -> Result<(), SimError> {
        if !(10..=10_000).contains(&self.num_runs) {
            return Err(SimError::invalid("numRuns", "must be within 10..=10000"));
        }
        if self.lower_pct < 1 || self.upper_pct > 99 || self.lower_pct >= self.upper_pct {
            return Err(SimError::invalid(
                "lowerPercentile",
                "percentiles must satisfy 1 <= lower < upper <= 99",
            ));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Per-year trace records
// ---------------------------------------------------------------------------

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountYearRecord {
    pub account_id: u32,
    pub account_name: String,
    pub start_balance: f64,
    pub growth_rate: f64,
    pub growth_amount: f64,
    pub rmd_amount: f64,
    pub withdrawn_expense: f64,
    pub withdrawn_tax: f64,
    pub end_balance: f64,
}

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IncomeYearRecord {
    pub source_name: String,
    pub amount: f64,
}

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExpenseYearRecord {
    pub expense_name: String,
    pub amount: f64,
}

/// Full audit record for one simulated year of one run.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct YearRecord {
    pub age: u32,
    pub accounts: Vec<AccountYearRecord>,
    pub incomes: Vec<IncomeYearRecord>,
    pub ss_gross: f64,
    pub ss_fraction: f64,
    pub taxable_ss: f64,
    pub provisional_income: f64,
    pub rmd_total: f64,
    pub expenses: Vec<ExpenseYearRecord>,
    pub total_expenses: f64,
    pub available_income: f64,
    pub net_need: f64,
    pub ordinary_income: f64,
    pub ltcg_income: f64,
    pub tax_federal_ordinary: f64,
    pub tax_federal_ltcg: f64,
    pub tax_state: f64,
    pub total_tax: f64,
    pub effective_tax_rate: f64,
    pub shortfall: f64,
    pub portfolio_end: f64,
    pub failed: bool,
}

// ---------------------------------------------------------------------------
// Aggregate result
// ---------------------------------------------------------------------------

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PortfolioPoint {
    pub age: u32,
    pub p_lower: f64,
    pub p50: f64,
    pub p_upper: f64,
}

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountPoint {
    pub band: Band,
    pub account_id: u32,
    pub account_name: String,
    pub age: u32,
    pub balance: f64,
}

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AnnualDetail {
    pub band: Band,
    pub age: u32,
    pub tax_federal_ordinary: f64,
    pub tax_federal_ltcg: f64,
    pub tax_state: f64,
    pub effective_tax_rate: f64,
}

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IncomeDetail {
    pub band: Band,
    pub age: u32,
    pub source_name: String,
    pub amount: f64,
}

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExpenseDetail {
    pub band: Band,
    pub age: u32,
    pub expense_name: String,
    pub amount: f64,
}

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReturnDetail {
    pub band: Band,
    pub age: u32,
    pub account_id: u32,
    pub account_name: String,
    pub return_amount: f64,
}

/// The annual stock growth-rate series realized by a band's representative
/// run, kept for audit and replay.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BandReturns {
    pub band: Band,
    pub rates: Vec<f64>,
}

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SimulationResult {
    pub success_rate: f64,
    /// Runs actually completed; differs from the requested count only when
    /// the batch was cancelled part-way.
    pub num_runs: usize,
    pub lower_pct: u8,
    pub upper_pct: u8,
    pub portfolio_timeline: Vec<PortfolioPoint>,
    pub account_timeline: Vec<AccountPoint>,
    pub annual_detail: Vec<AnnualDetail>,
    pub income_detail: Vec<IncomeDetail>,
    pub expense_detail: Vec<ExpenseDetail>,
    pub return_detail: Vec<ReturnDetail>,
    pub representative_returns: Vec<BandReturns>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_plan() -> Plan {
        Plan {
            current_age: 65,
            planning_horizon_years: 10,
            filing_status: FilingStatus::Single,
            state_tax: StateTax::None,
            accounts: vec![Account {
                id: 1,
                name: "Savings".to_string(),
                tax_treatment: TaxTreatment::CashSavings,
                asset_class: AssetClass::Savings,
                balance: 100_000.0,
                annual_return: Some(0.02),
                gains_fraction: None,
            }],
            income_sources: Vec::new(),
            expenses: Vec::new(),
        }
    }

    #[test]
    fn valid_plan_passes() {
        sample_plan().validate().expect("plan should validate");
    }

    #[test]
    fn zero_horizon_rejected() {
        let mut plan = sample_plan();
        plan.planning_horizon_years = 0;
        let err = plan.validate().expect_err("must reject zero horizon");
        assert_eq!(err.field(), Some("planningHorizonYears"));
    }

    #[test]
    fn negative_balance_rejected_with_indexed_field() {
        let mut plan = sample_plan();
        plan.accounts[0].balance = -1.0;
        let err = plan.validate().expect_err("must reject negative balance");
        assert_eq!(err.field(), Some("accounts[0].balance"));
    }

    #[test]
    fn non_stock_account_requires_return_rate() {
        let mut plan = sample_plan();
        plan.accounts[0].annual_return = None;
        let err = plan.validate().expect_err("must require annual return");
        assert_eq!(err.field(), Some("accounts[0].annualReturn"));
    }

    #[test]
    fn stock_account_does_not_require_return_rate() {
        let mut plan = sample_plan();
        plan.accounts[0].asset_class = AssetClass::Stocks;
        plan.accounts[0].tax_treatment = TaxTreatment::TaxableBrokerage;
        plan.accounts[0].annual_return = None;
        plan.accounts[0].gains_fraction = Some(0.5);
        plan.validate().expect("stocks use the sampled series");
    }

    #[test]
    fn gains_fraction_bounds_enforced() {
        let mut plan = sample_plan();
        plan.accounts[0].gains_fraction = Some(1.5);
        let err = plan.validate().expect_err("must reject gains fraction > 1");
        assert_eq!(err.field(), Some("accounts[0].gainsFraction"));
    }

    #[test]
    fn brokerage_stock_account_requires_gains_fraction() {
        let mut plan = sample_plan();
        plan.accounts[0].asset_class = AssetClass::Stocks;
        plan.accounts[0].tax_treatment = TaxTreatment::TaxableBrokerage;
        plan.accounts[0].gains_fraction = None;
        let err = plan.validate().expect_err("must require gains fraction");
        assert_eq!(err.field(), Some("accounts[0].gainsFraction"));

        // Other treatments may omit it.
        plan.accounts[0].tax_treatment = TaxTreatment::Traditional;
        plan.validate().expect("gains fraction only binds brokerage stocks");
    }

    #[test]
    fn inverted_age_window_rejected() {
        let mut plan = sample_plan();
        plan.expenses.push(Expense {
            name: "Travel".to_string(),
            annual_amount: 10_000.0,
            start_age: 80,
            end_age: 70,
            inflation_rate: 0.02,
        });
        let err = plan.validate().expect_err("must reject inverted window");
        assert_eq!(err.field(), Some("expenses[0].startAge"));
    }

    #[test]
    fn config_percentile_pair_validated() {
        let mut config = RunConfig {
            lower_pct: 90,
            upper_pct: 10,
            ..RunConfig::default()
        };
        assert!(config.validate().is_err());

        config.lower_pct = 10;
        config.upper_pct = 90;
        config.validate().expect("valid config");

        config.num_runs = 5;
        assert!(config.validate().is_err());
    }

    #[test]
    fn enums_accept_snake_case_aliases() {
        let status: FilingStatus = serde_json::from_str("\"married_jointly\"").unwrap();
        assert_eq!(status, FilingStatus::MarriedJointly);
        let treatment: TaxTreatment = serde_json::from_str("\"taxable_brokerage\"").unwrap();
        assert_eq!(treatment, TaxTreatment::TaxableBrokerage);
        let kind: IncomeKind = serde_json::from_str("\"social_security\"").unwrap();
        assert_eq!(kind, IncomeKind::SocialSecurity);
    }

    #[test]
    fn state_tax_is_tagged_on_kind() {
        let flat: StateTax = serde_json::from_str(r#"{"kind":"flat","rate":0.05}"#).unwrap();
        assert_eq!(flat, StateTax::Flat { rate: 0.05 });
        let none: StateTax = serde_json::from_str(r#"{"kind":"none"}"#).unwrap();
        assert_eq!(none, StateTax::None);
    }
}
