use crate::error::{Error, Result};

pub const DAYS_PER_YEAR: f64 = 365.0;

/// Maps survey indices onto elapsed simulated years.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SurveyAxis {
    interval_days: u32,
    exclude_warmup: bool,
}

impl SurveyAxis {
    pub fn new(interval_days: u32, exclude_warmup: bool) -> Result<Self> {
        if interval_days == 0 {
            return Err(Error::Normalization(
                "survey interval must be at least one day".to_string(),
            ));
        }
        Ok(Self {
            interval_days,
            exclude_warmup,
        })
    }

    pub fn interval_days(&self) -> u32 {
        self.interval_days
    }

    /// Survey 1 is the snapshot taken before the run starts, so it sits at 0.
    pub fn time_years(&self, survey_index: u32) -> f64 {
        let elapsed = survey_index.saturating_sub(1) as f64;
        elapsed * self.interval_days as f64 / DAYS_PER_YEAR
    }

    pub fn includes(&self, survey_index: u32) -> bool {
        !(self.exclude_warmup && survey_index == 1)
    }
}
