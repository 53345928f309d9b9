//! Relative effect of treatment arms against the baseline arm.
//!
//! Rows are keyed on `(time_years, measure, group)`. Both sides derive
//! `time_years` from the same integer survey index and interval, so keys are
//! matched on the exact bit pattern rather than with a tolerance.

use std::collections::{BTreeMap, HashMap};

use serde::Serialize;

use crate::arm::AnnotatedArm;
use crate::codes::{AgeGroup, Measure};
use crate::error::{ArmFailure, Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RowStatus {
    Compared,
    MissingInArm,
    ZeroBaseline,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ComparisonRow {
    pub arm: String,
    pub time_years: f64,
    pub measure: Measure,
    pub group: AgeGroup,
    pub baseline_value: f64,
    pub arm_value: Option<f64>,
    pub relative_change: Option<f64>,
    pub status: RowStatus,
}

type Key = (u64, Measure, AgeGroup);

fn key(time_years: f64, measure: Measure, group: AgeGroup) -> Key {
    (time_years.to_bits(), measure, group)
}

/// Compares every non-baseline arm with the single baseline arm.
///
/// One row is produced per baseline key and treatment arm, ordered by arm
/// (input order) and then by baseline record order.
pub fn compare(arms: &[AnnotatedArm]) -> Result<Vec<ComparisonRow>> {
    let mut baselines = arms.iter().filter(|a| a.is_baseline);
    let baseline = match (baselines.next(), baselines.next()) {
        (Some(b), None) => b,
        (None, _) => return Err(Error::Comparison("no baseline arm".to_string())),
        (Some(a), Some(b)) => {
            return Err(Error::Comparison(format!(
                "more than one baseline arm (`{}`, `{}`)",
                a.id, b.id
            )));
        }
    };

    let mut rows = Vec::new();
    for arm in arms.iter().filter(|a| !a.is_baseline) {
        let values: HashMap<Key, f64> = arm
            .records
            .iter()
            .map(|r| (key(r.time_years, r.measure, r.group), r.normalized_value))
            .collect();

        for base in &baseline.records {
            let baseline_value = base.normalized_value;
            let arm_value = values
                .get(&key(base.time_years, base.measure, base.group))
                .copied();
            let (relative_change, status) = match arm_value {
                None => (None, RowStatus::MissingInArm),
                Some(_) if baseline_value == 0.0 => (None, RowStatus::ZeroBaseline),
                Some(v) => (
                    Some((v - baseline_value) / baseline_value),
                    RowStatus::Compared,
                ),
            };
            rows.push(ComparisonRow {
                arm: arm.id.clone(),
                time_years: base.time_years,
                measure: base.measure,
                group: base.group,
                baseline_value,
                arm_value,
                relative_change,
                status,
            });
        }
    }
    Ok(rows)
}

/// Outcome of loading every configured arm: what can be compared and what
/// failed on the way.
#[derive(Debug, Default)]
pub struct ArmSet {
    pub arms: Vec<AnnotatedArm>,
    pub failures: Vec<ArmFailure>,
}

#[derive(Debug, Clone)]
pub struct Comparison {
    pub rows: Vec<ComparisonRow>,
    /// Arms left out because they failed to run or load.
    pub skipped: Vec<String>,
}

impl ArmSet {
    pub fn failed_ids(&self) -> Vec<String> {
        self.failures.iter().map(|f| f.arm.clone()).collect()
    }

    /// Compares all arms, refusing if any of them failed.
    pub fn compare(&self) -> Result<Vec<ComparisonRow>> {
        if !self.failures.is_empty() {
            return Err(Error::Comparison(format!(
                "arms failed: {}",
                self.failed_ids().join(", ")
            )));
        }
        compare(&self.arms)
    }

    /// Compares the arms that succeeded and names the ones left out. The
    /// baseline itself must have succeeded.
    pub fn compare_available(&self) -> Result<Comparison> {
        if !self.arms.iter().any(|a| a.is_baseline) {
            return Err(Error::Comparison(format!(
                "baseline arm unavailable (failed: {})",
                self.failed_ids().join(", ")
            )));
        }
        let skipped = self.failed_ids();
        for arm in &skipped {
            tracing::warn!(arm = %arm, "arm left out of comparison");
        }
        Ok(Comparison {
            rows: compare(&self.arms)?,
            skipped,
        })
    }
}

/// Accumulated effect over a period, e.g. the years after an intervention
/// was deployed.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WindowSummary {
    pub arm: String,
    pub measure: Measure,
    pub group: AgeGroup,
    pub start_years: f64,
    pub end_years: f64,
    pub surveys: usize,
    pub baseline_total: f64,
    pub arm_total: Option<f64>,
    pub relative_change: Option<f64>,
}

/// Sums baseline and arm values over rows with `start <= t < end`.
///
/// The arm total is `None` if any survey in the window has no arm value, and
/// the relative change is `None` if the arm total is missing or the baseline
/// total is zero.
pub fn summarize_window(
    rows: &[ComparisonRow],
    start_years: f64,
    end_years: f64,
) -> Vec<WindowSummary> {
    let mut order: Vec<(String, Measure, AgeGroup)> = Vec::new();
    let mut totals: BTreeMap<(String, Measure, AgeGroup), (usize, f64, Option<f64>)> =
        BTreeMap::new();

    for row in rows
        .iter()
        .filter(|r| r.time_years >= start_years && r.time_years < end_years)
    {
        let k = (row.arm.clone(), row.measure, row.group);
        let entry = totals.entry(k.clone()).or_insert_with(|| {
            order.push(k);
            (0, 0.0, Some(0.0))
        });
        entry.0 += 1;
        entry.1 += row.baseline_value;
        entry.2 = match (entry.2, row.arm_value) {
            (Some(total), Some(v)) => Some(total + v),
            _ => None,
        };
    }

    order
        .into_iter()
        .filter_map(|k| {
            let (surveys, baseline_total, arm_total) = totals.remove(&k)?;
            let relative_change = match arm_total {
                Some(total) if baseline_total != 0.0 => {
                    Some((total - baseline_total) / baseline_total)
                }
                _ => None,
            };
            let (arm, measure, group) = k;
            Some(WindowSummary {
                arm,
                measure,
                group,
                start_years,
                end_years,
                surveys,
                baseline_total,
                arm_total,
                relative_change,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arm::ScenarioArm;
    use crate::codes::CodeTable;
    use crate::loader::parse_output;

    fn annotated(id: &str, raw: &str, is_baseline: bool) -> AnnotatedArm {
        ScenarioArm {
            id: id.to_string(),
            records: parse_output(raw.as_bytes()).unwrap(),
            reference_population: 1000,
            survey_interval_days: 365,
            is_baseline,
        }
        .annotate(&CodeTable::openmalaria(), true)
        .unwrap()
    }

    #[test]
    fn test_relative_change_example() {
        let arms = vec![
            annotated("control", "2\t0\t14\t100\n", true),
            annotated("itn", "2\t0\t14\t60\n", false),
        ];
        let rows = compare(&arms).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].arm, "itn");
        assert_eq!(rows[0].status, RowStatus::Compared);
        assert!((rows[0].relative_change.unwrap() - (-0.40)).abs() < 1e-12);
        assert_eq!(rows[0].time_years, 1.0);
    }

    #[test]
    fn test_missing_key_is_flagged_not_zeroed() {
        let arms = vec![
            annotated("control", "2\t0\t14\t100\n3\t0\t14\t80\n", true),
            annotated("pev", "2\t0\t14\t50\n", false),
        ];
        let rows = compare(&arms).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[1].arm_value, None);
        assert_eq!(rows[1].relative_change, None);
        assert_eq!(rows[1].status, RowStatus::MissingInArm);
    }

    #[test]
    fn test_zero_baseline_is_flagged() {
        let arms = vec![
            annotated("control", "2\t0\t15\t0\n", true),
            annotated("pev", "2\t0\t15\t4\n", false),
        ];
        let rows = compare(&arms).unwrap();
        assert_eq!(rows[0].status, RowStatus::ZeroBaseline);
        assert_eq!(rows[0].relative_change, None);
        assert!(rows[0].arm_value.unwrap() > 0.0);
    }

    #[test]
    fn test_keys_only_from_baseline() {
        let arms = vec![
            annotated("control", "2\t0\t14\t100\n", true),
            annotated("itn", "2\t0\t14\t60\n2\t1\t14\t7\n3\t0\t14\t1\n", false),
        ];
        assert_eq!(compare(&arms).unwrap().len(), 1);
    }

    #[test]
    fn test_arms_compared_independently() {
        let control = "2\t0\t14\t100\n2\t2\t14\t40\n";
        let itn = "2\t0\t14\t60\n2\t2\t14\t30\n";
        let pev = "2\t0\t14\t90\n";
        let forward = compare(&[
            annotated("control", control, true),
            annotated("itn", itn, false),
            annotated("pev", pev, false),
        ])
        .unwrap();
        let swapped = compare(&[
            annotated("pev", pev, false),
            annotated("control", control, true),
            annotated("itn", itn, false),
        ])
        .unwrap();

        assert_eq!(forward.len(), 4);
        let baseline_of = |rows: &[ComparisonRow], arm: &str| -> Vec<f64> {
            rows.iter()
                .filter(|r| r.arm == arm)
                .map(|r| r.baseline_value)
                .collect()
        };
        for arm in ["itn", "pev"] {
            assert_eq!(baseline_of(&forward, arm), baseline_of(&swapped, arm));
        }
        let pev_rows: Vec<_> = forward.iter().filter(|r| r.arm == "pev").collect();
        assert_eq!(pev_rows[1].status, RowStatus::MissingInArm);
    }

    #[test]
    fn test_requires_exactly_one_baseline() {
        let none = vec![annotated("a", "2\t0\t14\t1\n", false)];
        assert!(matches!(compare(&none), Err(Error::Comparison(_))));
        let two = vec![
            annotated("a", "2\t0\t14\t1\n", true),
            annotated("b", "2\t0\t14\t1\n", true),
        ];
        assert!(matches!(compare(&two), Err(Error::Comparison(_))));
    }

    #[test]
    fn test_arm_set_refuses_silent_gaps() {
        let set = ArmSet {
            arms: vec![
                annotated("control", "2\t0\t14\t100\n", true),
                annotated("itn", "2\t0\t14\t60\n", false),
            ],
            failures: vec![ArmFailure {
                arm: "pev".to_string(),
                error: Error::Config("boom".to_string()),
            }],
        };
        assert!(matches!(set.compare(), Err(Error::Comparison(_))));

        let comparison = set.compare_available().unwrap();
        assert_eq!(comparison.skipped, vec!["pev".to_string()]);
        assert_eq!(comparison.rows.len(), 1);
    }

    #[test]
    fn test_arm_set_without_baseline() {
        let set = ArmSet {
            arms: vec![annotated("itn", "2\t0\t14\t60\n", false)],
            failures: vec![ArmFailure {
                arm: "control".to_string(),
                error: Error::Config("boom".to_string()),
            }],
        };
        assert!(matches!(set.compare_available(), Err(Error::Comparison(_))));
    }

    #[test]
    fn test_window_summary() {
        let arms = vec![
            annotated(
                "control",
                "2\t0\t14\t100\n3\t0\t14\t100\n4\t0\t14\t200\n5\t0\t14\t50\n",
                true,
            ),
            annotated(
                "itn",
                "2\t0\t14\t100\n3\t0\t14\t50\n4\t0\t14\t100\n5\t0\t14\t50\n",
                false,
            ),
        ];
        let rows = compare(&arms).unwrap();
        // Years 2 and 3 only.
        let summary = summarize_window(&rows, 2.0, 4.0);
        assert_eq!(summary.len(), 1);
        let s = &summary[0];
        assert_eq!(s.surveys, 2);
        assert!((s.baseline_total - 0.3).abs() < 1e-12);
        assert!((s.arm_total.unwrap() - 0.15).abs() < 1e-12);
        assert!((s.relative_change.unwrap() - (-0.5)).abs() < 1e-9);
    }

    #[test]
    fn test_window_summary_with_gap() {
        let arms = vec![
            annotated("control", "2\t0\t14\t100\n3\t0\t14\t100\n", true),
            annotated("itn", "2\t0\t14\t100\n", false),
        ];
        let rows = compare(&arms).unwrap();
        let summary = summarize_window(&rows, 0.0, 10.0);
        assert_eq!(summary[0].arm_total, None);
        assert_eq!(summary[0].relative_change, None);
    }
}
