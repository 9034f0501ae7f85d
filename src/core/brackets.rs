//! Tax bracket tables as data.
//!
//! Every dollar threshold the tax functions consult lives here, so the
//! annual IRS/FTB updates touch this file only. Amounts are nominal 2024
//! figures; brackets are not inflated over the planning horizon, consistent
//! with simulating nominal historical returns.

use super::types::FilingStatus;

/// A progressive schedule as `(rate, upper_bound)` pairs sorted by bound.
/// The final entry always carries an infinite bound.
pub type BracketSchedule = [(f64, f64)];

#[derive(Debug, Clone)]
pub struct TaxTables {
    federal_ordinary_single: Vec<(f64, f64)>,
    federal_ordinary_married: Vec<(f64, f64)>,
    federal_ltcg_single: Vec<(f64, f64)>,
    federal_ltcg_married: Vec<(f64, f64)>,
    federal_standard_deduction_single: f64,
    federal_standard_deduction_married: f64,
    ca_single: Vec<(f64, f64)>,
    ca_married: Vec<(f64, f64)>,
    ca_standard_deduction_single: f64,
    ca_standard_deduction_married: f64,
    ss_thresholds_single: (f64, f64),
    ss_thresholds_married: (f64, f64),
}

impl Default for TaxTables {
    fn default() -> Self {
        Self {
            federal_ordinary_single: vec![
                (0.10, 11_600.0),
                (0.12, 47_150.0),
                (0.22, 100_525.0),
                (0.24, 191_950.0),
                (0.32, 243_725.0),
                (0.35, 609_350.0),
                (0.37, f64::INFINITY),
            ],
            federal_ordinary_married: vec![
                (0.10, 23_200.0),
                (0.12, 94_300.0),
                (0.22, 201_050.0),
                (0.24, 383_900.0),
                (0.32, 487_450.0),
                (0.35, 731_200.0),
                (0.37, f64::INFINITY),
            ],
            federal_ltcg_single: vec![
                (0.00, 47_025.0),
                (0.15, 518_900.0),
                (0.20, f64::INFINITY),
            ],
            federal_ltcg_married: vec![
                (0.00, 94_050.0),
                (0.15, 583_750.0),
                (0.20, f64::INFINITY),
            ],
            federal_standard_deduction_single: 14_600.0,
            federal_standard_deduction_married: 29_200.0,
            // California schedule includes the 1% mental-health surtax in the
            // top bracket.
            ca_single: vec![
                (0.010, 10_412.0),
                (0.020, 24_684.0),
                (0.040, 38_959.0),
                (0.060, 54_081.0),
                (0.080, 68_350.0),
                (0.093, 349_137.0),
                (0.103, 418_961.0),
                (0.113, 698_274.0),
                (0.123, 1_000_000.0),
                (0.133, f64::INFINITY),
            ],
            ca_married: vec![
                (0.010, 20_824.0),
                (0.020, 49_368.0),
                (0.040, 77_918.0),
                (0.060, 108_162.0),
                (0.080, 136_700.0),
                (0.093, 698_274.0),
                (0.103, 837_922.0),
                (0.113, 1_000_000.0),
                (0.123, 1_396_548.0),
                (0.133, f64::INFINITY),
            ],
            ca_standard_deduction_single: 5_202.0,
            ca_standard_deduction_married: 10_404.0,
            // Provisional-income thresholds, fixed in statute (not indexed).
            ss_thresholds_single: (25_000.0, 34_000.0),
            ss_thresholds_married: (32_000.0, 44_000.0),
        }
    }
}

impl TaxTables {
    pub fn federal_ordinary(&self, status: FilingStatus) -> &BracketSchedule {
        match status {
            FilingStatus::Single => &self.federal_ordinary_single,
            FilingStatus::MarriedJointly => &self.federal_ordinary_married,
        }
    }

    pub fn federal_ltcg(&self, status: FilingStatus) -> &BracketSchedule {
        match status {
            FilingStatus::Single => &self.federal_ltcg_single,
            FilingStatus::MarriedJointly => &self.federal_ltcg_married,
        }
    }

    pub fn standard_deduction(&self, status: FilingStatus) -> f64 {
        match status {
            FilingStatus::Single => self.federal_standard_deduction_single,
            FilingStatus::MarriedJointly => self.federal_standard_deduction_married,
        }
    }

    pub fn ca_brackets(&self, status: FilingStatus) -> &BracketSchedule {
        match status {
            FilingStatus::Single => &self.ca_single,
            FilingStatus::MarriedJointly => &self.ca_married,
        }
    }

    pub fn ca_standard_deduction(&self, status: FilingStatus) -> f64 {
        match status {
            FilingStatus::Single => self.ca_standard_deduction_single,
            FilingStatus::MarriedJointly => self.ca_standard_deduction_married,
        }
    }

    /// `(lower, upper)` provisional-income thresholds for the Social
    /// Security taxable fraction.
    pub fn ss_thresholds(&self, status: FilingStatus) -> (f64, f64) {
        match status {
            FilingStatus::Single => self.ss_thresholds_single,
            FilingStatus::MarriedJointly => self.ss_thresholds_married,
        }
    }
}
