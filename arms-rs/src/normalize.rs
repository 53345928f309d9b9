use crate::axis::DAYS_PER_YEAR;
use crate::error::{Error, Result};

/// Converts counts over one survey interval into events per person per year.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Normalizer {
    reference_population: u64,
    interval_days: u32,
}

impl Normalizer {
    pub fn new(reference_population: u64, interval_days: u32) -> Result<Self> {
        if reference_population == 0 {
            return Err(Error::Normalization(
                "reference population must be positive".to_string(),
            ));
        }
        if interval_days == 0 {
            return Err(Error::Normalization(
                "survey interval must be at least one day".to_string(),
            ));
        }
        Ok(Self {
            reference_population,
            interval_days,
        })
    }

    pub fn reference_population(&self) -> u64 {
        self.reference_population
    }

    /// Expects a raw count; feeding back a normalized value scales it twice.
    pub fn normalize(&self, value: f64) -> f64 {
        value / self.reference_population as f64 * (DAYS_PER_YEAR / self.interval_days as f64)
    }
}
