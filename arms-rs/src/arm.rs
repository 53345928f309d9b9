use serde::Serialize;

use crate::axis::SurveyAxis;
use crate::codes::{AgeGroup, CodeTable, Measure};
use crate::error::Result;
use crate::loader::SimulationRecord;
use crate::normalize::Normalizer;

/// Raw output of one simulated scenario together with the parameters needed
/// to put it on a per-capita time axis.
#[derive(Debug, Clone)]
pub struct ScenarioArm {
    pub id: String,
    pub records: Vec<SimulationRecord>,
    pub reference_population: u64,
    pub survey_interval_days: u32,
    pub is_baseline: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct AnnotatedRecord {
    pub record: SimulationRecord,
    pub measure: Measure,
    pub group: AgeGroup,
    pub time_years: f64,
    pub normalized_value: f64,
}

#[derive(Debug, Clone)]
pub struct AnnotatedArm {
    pub id: String,
    pub is_baseline: bool,
    pub reference_population: u64,
    pub survey_interval_days: u32,
    pub records: Vec<AnnotatedRecord>,
}

impl ScenarioArm {
    /// Resolves codes and derives time and per-capita values. Every record
    /// is resolved, warm-up included, so an unknown code always fails the
    /// arm; the warm-up survey is dropped afterwards if requested.
    pub fn annotate(&self, codes: &CodeTable, exclude_warmup: bool) -> Result<AnnotatedArm> {
        let axis = SurveyAxis::new(self.survey_interval_days, exclude_warmup)?;
        let normalizer = Normalizer::new(self.reference_population, self.survey_interval_days)?;

        let mut records = Vec::with_capacity(self.records.len());
        for record in &self.records {
            let measure = codes.resolve_measure(record.measure_code)?;
            let group = codes.resolve_group(record.group_code)?;
            if !axis.includes(record.survey_index) {
                continue;
            }
            records.push(AnnotatedRecord {
                record: *record,
                measure,
                group,
                time_years: axis.time_years(record.survey_index),
                normalized_value: normalizer.normalize(record.value),
            });
        }

        Ok(AnnotatedArm {
            id: self.id.clone(),
            is_baseline: self.is_baseline,
            reference_population: self.reference_population,
            survey_interval_days: self.survey_interval_days,
            records,
        })
    }
}

impl AnnotatedArm {
    /// Time series of one measure in one group, in survey order.
    pub fn series(
        &self,
        measure: Measure,
        group: AgeGroup,
    ) -> impl Iterator<Item = &AnnotatedRecord> + '_ {
        self.records
            .iter()
            .filter(move |r| r.measure == measure && r.group == group)
    }
}
