//! Historical monthly equity returns and regime-conditioned sampling.
//!
//! The source is a tab-separated table (`Date  Price  Change %`), newest
//! month first; the loader normalizes to oldest-first and converts each
//! percentage change to a growth multiplier. A default series ships embedded
//! in the binary.
//!
//! At construction two artifacts are precomputed over the series and are
//! read-only afterwards: the start indices of every overlapping twelve-month
//! window, split by the sign of the compounded annual return (bear vs bull),
//! and Markov stay-probabilities estimated from the non-overlapping,
//! month-aligned annual walk.

use std::path::Path;

use super::engine::Rng;
use super::error::SimError;
use super::types::MarketRegime;

const EMBEDDED_SERIES: &str = include_str!("../../data/sp500-monthly.txt");

const WINDOW_MONTHS: usize = 12;

#[derive(Debug, Clone)]
pub struct HistoricalReturns {
    /// Monthly growth multipliers `1 + r`, oldest first.
    multipliers: Vec<f64>,
    bear_starts: Vec<usize>,
    bull_starts: Vec<usize>,
    p_bull_stay: f64,
    p_bear_stay: f64,
    skipped_rows: usize,
}

impl HistoricalReturns {
    /// Build from the series compiled into the binary.
    pub fn from_embedded() -> Result<Self, SimError> {
        Self::from_table(EMBEDDED_SERIES)
    }

    pub fn from_path(path: &Path) -> Result<Self, SimError> {
        let text = std::fs::read_to_string(path).map_err(|source| SimError::DataFile {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_table(&text)
    }

    /// Parse the newest-first table text. Rows that do not yield a numeric
    /// percentage are skipped and counted; an unusably short result is fatal.
    pub fn from_table(text: &str) -> Result<Self, SimError> {
        let mut returns = Vec::new();
        let mut skipped = 0usize;
        for line in text.lines().skip(1) {
            if line.trim().is_empty() {
                continue;
            }
            match parse_change_percent(line) {
                Some(pct) => returns.push(pct / 100.0),
                None => skipped += 1,
            }
        }
        if skipped > 0 {
            tracing::warn!(skipped, "skipped unparseable rows in historical series");
        }
        returns.reverse();
        Self::from_monthly_returns(returns, skipped)
    }

    /// Build from decimal monthly returns already ordered oldest-first.
    pub fn from_monthly_returns(returns: Vec<f64>, skipped_rows: usize) -> Result<Self, SimError> {
        if returns.len() < WINDOW_MONTHS {
            return Err(SimError::EmptyHistory {
                months: returns.len(),
            });
        }

        let multipliers: Vec<f64> = returns.iter().map(|r| 1.0 + r).collect();

        let mut bear_starts = Vec::new();
        let mut bull_starts = Vec::new();
        for start in 0..=multipliers.len() - WINDOW_MONTHS {
            if annual_multiplier(&multipliers, start) < 1.0 {
                bear_starts.push(start);
            } else {
                bull_starts.push(start);
            }
        }

        // Maximum-likelihood stay-probabilities from the non-overlapping
        // annual walk. A regime absent from the walk gets an uninformative
        // 0.5.
        let mut bull_stays = 0usize;
        let mut bull_total = 0usize;
        let mut bear_stays = 0usize;
        let mut bear_total = 0usize;
        let mut prev_bear: Option<bool> = None;
        let mut start = 0;
        while start + WINDOW_MONTHS <= multipliers.len() {
            let is_bear = annual_multiplier(&multipliers, start) < 1.0;
            if let Some(prev) = prev_bear {
                if prev {
                    bear_total += 1;
                    if is_bear {
                        bear_stays += 1;
                    }
                } else {
                    bull_total += 1;
                    if !is_bear {
                        bull_stays += 1;
                    }
                }
            }
            prev_bear = Some(is_bear);
            start += WINDOW_MONTHS;
        }

        let p_bull_stay = if bull_total > 0 {
            bull_stays as f64 / bull_total as f64
        } else {
            0.5
        };
        let p_bear_stay = if bear_total > 0 {
            bear_stays as f64 / bear_total as f64
        } else {
            0.5
        };

        Ok(Self {
            multipliers,
            bear_starts,
            bull_starts,
            p_bull_stay,
            p_bear_stay,
            skipped_rows,
        })
    }

    pub fn months(&self) -> usize {
        self.multipliers.len()
    }

    pub fn skipped_rows(&self) -> usize {
        self.skipped_rows
    }

    pub fn bear_window_count(&self) -> usize {
        self.bear_starts.len()
    }

    pub fn bull_window_count(&self) -> usize {
        self.bull_starts.len()
    }

    pub fn p_bull_stay(&self) -> f64 {
        self.p_bull_stay
    }

    pub fn p_bear_stay(&self) -> f64 {
        self.p_bear_stay
    }

    /// Draw `n_years` compounded annual growth multipliers.
    ///
    /// Without a first-year regime this is a plain block bootstrap: each
    /// year takes twelve consecutive months from a uniformly random start.
    /// With one, year zero draws from the requested regime's window pool and
    /// later years follow the Markov chain: keep the current regime with its
    /// stay-probability, otherwise flip, then draw from that regime's pool.
    pub fn sample_annual_multipliers(
        &self,
        n_years: usize,
        rng: &mut Rng,
        first_year_regime: Option<MarketRegime>,
    ) -> Result<Vec<f64>, SimError> {
        let mut out = Vec::with_capacity(n_years);

        let Some(mut regime) = first_year_regime else {
            for _ in 0..n_years {
                let start = rng.next_index(self.multipliers.len() - WINDOW_MONTHS + 1);
                out.push(annual_multiplier(&self.multipliers, start));
            }
            return Ok(out);
        };

        for year in 0..n_years {
            if year > 0 {
                let stay = match regime {
                    MarketRegime::Bull => self.p_bull_stay,
                    MarketRegime::Bear => self.p_bear_stay,
                };
                if rng.next_f64() >= stay {
                    regime = regime.flipped();
                }
            }
            let pool = match regime {
                MarketRegime::Bear => &self.bear_starts,
                MarketRegime::Bull => &self.bull_starts,
            };
            if pool.is_empty() {
                return Err(SimError::EmptyRegimePool {
                    regime: regime.label(),
                });
            }
            let start = pool[rng.next_index(pool.len())];
            out.push(annual_multiplier(&self.multipliers, start));
        }
        Ok(out)
    }
}

fn annual_multiplier(multipliers: &[f64], start: usize) -> f64 {
    multipliers[start..start + WINDOW_MONTHS].iter().product()
}

/// Pull the percentage out of the third tab-separated column, tolerating
/// thousands separators and the trailing `%`.
fn parse_change_percent(line: &str) -> Option<f64> {
    let field = line.split('\t').nth(2)?;
    field
        .trim()
        .trim_end_matches('%')
        .replace(',', "")
        .parse::<f64>()
        .ok()
}
