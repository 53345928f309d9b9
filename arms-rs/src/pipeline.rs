use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;

use crate::arm::{AnnotatedArm, ScenarioArm};
use crate::compare::ArmSet;
use crate::config::{ArmConfig, Config};
use crate::error::{ArmFailure, Error, ProcessFailure, Result};
use crate::loader::load_output;
use crate::report::{file_sha256, ManifestEntry, RunManifest};
use crate::runner::Simulator;

/// Runs and loads every configured arm.
pub struct Pipeline {
    config: Config,
}

pub struct PipelineRun {
    pub arms: ArmSet,
    pub manifest: RunManifest,
}

impl Pipeline {
    /// Rejects invalid configuration before any simulator is started.
    pub fn new(config: Config) -> Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Arms are run, loaded and annotated by a pool of `max_parallel_runs`
    /// workers, each taking the next unstarted arm as soon as it is free. A
    /// failing arm is recorded in [`ArmSet::failures`] and does not stop the
    /// others. Results keep the configuration order.
    pub fn run(&self) -> PipelineRun {
        let simulator = self.config.simulator();
        let arms = &self.config.arms;
        let workers = self
            .config
            .max_parallel_runs
            .unwrap_or(arms.len())
            .clamp(1, arms.len().max(1));

        let next = AtomicUsize::new(0);
        let mut slots: Vec<Option<Result<(AnnotatedArm, ManifestEntry)>>> =
            arms.iter().map(|_| None).collect();
        thread::scope(|s| {
            let handles: Vec<_> = (0..workers)
                .map(|_| {
                    let (simulator, next) = (&simulator, &next);
                    s.spawn(move || {
                        let mut done = Vec::new();
                        loop {
                            let index = next.fetch_add(1, Ordering::Relaxed);
                            let Some(arm) = arms.get(index) else {
                                break;
                            };
                            let result = panic::catch_unwind(AssertUnwindSafe(|| {
                                self.run_arm(simulator, arm)
                            }))
                            .unwrap_or_else(|_| Err(worker_panicked(arm)));
                            done.push((index, result));
                        }
                        done
                    })
                })
                .collect();
            for handle in handles {
                // Panics are caught per arm, so a worker only fails to join
                // if it died outside `run_arm`; its arms stay `None`.
                for (index, result) in handle.join().unwrap_or_default() {
                    slots[index] = Some(result);
                }
            }
        });

        let results = arms.iter().zip(slots).map(|(arm, slot)| {
            (arm, slot.unwrap_or_else(|| Err(worker_panicked(arm))))
        });

        let mut set = ArmSet::default();
        let mut entries = Vec::with_capacity(arms.len());
        for (arm, result) in results {
            match result {
                Ok((annotated, entry)) => {
                    set.arms.push(annotated);
                    entries.push(entry);
                }
                Err(error) => {
                    tracing::warn!(arm = %arm.id, error = %error, "arm failed");
                    entries.push(ManifestEntry::failed(&arm.id, &arm.output, &error));
                    set.failures.push(ArmFailure {
                        arm: arm.id.clone(),
                        error,
                    });
                }
            }
        }

        PipelineRun {
            arms: set,
            manifest: RunManifest {
                baseline_arm_id: self.config.baseline_arm_id.clone(),
                code_table_version: self.config.codes.version().to_string(),
                arms: entries,
            },
        }
    }

    fn run_arm(
        &self,
        simulator: &Simulator,
        arm: &ArmConfig,
    ) -> Result<(AnnotatedArm, ManifestEntry)> {
        tracing::info!(arm = %arm.id, scenario = %arm.scenario.display(), "running arm");
        let outcome = simulator.run(&self.config.arm_run(arm))?;
        let records = load_output(&outcome.output)?;
        let sha256 = file_sha256(&outcome.output)?;

        let scenario = ScenarioArm {
            id: arm.id.clone(),
            records,
            reference_population: self.config.population_for(arm)?,
            survey_interval_days: self.config.interval_for(arm)?,
            is_baseline: arm.id == self.config.baseline_arm_id,
        };
        let annotated = scenario.annotate(&self.config.codes, self.config.exclude_warmup_survey)?;
        tracing::info!(
            arm = %arm.id,
            records = annotated.records.len(),
            elapsed = ?outcome.elapsed,
            "arm ready"
        );

        let entry = ManifestEntry::succeeded(
            &arm.id,
            &outcome.output,
            sha256,
            scenario.records.len(),
            outcome.elapsed,
        );
        Ok((annotated, entry))
    }
}

fn worker_panicked(arm: &ArmConfig) -> Error {
    Error::Process {
        arm: arm.id.clone(),
        exit_code: None,
        reason: ProcessFailure::Setup {
            message: "arm worker panicked".to_string(),
        },
        stderr: String::new(),
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::codes::Measure;
    use crate::compare::RowStatus;
    use std::fs;
    use std::path::Path;

    /// The scenario file's content is what the fake simulator writes out;
    /// a scenario starting with `FAIL` makes it exit with status 1. One
    /// starting with `SLOW` finishes after a second and leaves `slow.done`
    /// next to the scenarios; arms that start after that write
    /// `<output>.late`.
    const SIMULATOR: &str = r#"
case "$(head -n 1 "$2")" in
  FAIL*) echo "scenario file not found" >&2; exit 1 ;;
  SLOW*)
    sleep 1
    touch "$(dirname "$2")/slow.done"
    tail -n +2 "$2" > "$4"
    exit 0 ;;
esac
if [ -e "$(dirname "$2")/slow.done" ]; then touch "$4.late"; fi
cat "$2" > "$4"
"#;

    fn config(dir: &Path, arms: &[(&str, &str)]) -> Config {
        fs::write(dir.join("simulator.sh"), SIMULATOR).unwrap();
        let mut arm_tables = String::new();
        for (id, output) in arms {
            fs::write(dir.join(format!("{id}.xml")), output).unwrap();
            arm_tables.push_str(&format!(
                "[[arms]]\nid = \"{id}\"\nscenario = \"{id}.xml\"\noutput = \"out/{id}.txt\"\n\
                 working_dir = \"work/{id}\"\n\n"
            ));
        }
        let script = dir.join("simulator.sh");
        let raw = format!(
            r#"
survey_interval_days = 30
reference_population = 2000
exclude_warmup_survey = true
baseline_arm_id = "control"
timeout = 30

[simulator]
program = "/bin/sh"
working_dir = "."
args = ["{script}"]

{arm_tables}
"#,
            script = script.display()
        );
        Config::from_toml_str(&raw, dir).unwrap()
    }

    #[test]
    fn test_full_run_and_compare() {
        let dir = tempfile::tempdir().unwrap();
        let config = config(
            dir.path(),
            &[
                ("control", "1\t0\t14\t1\n2\t0\t14\t120.0\n3\t0\t14\t150.0\n"),
                ("itn", "1\t0\t14\t1\n2\t0\t14\t60.0\n3\t0\t14\t150.0\n"),
            ],
        );
        let pipeline = Pipeline::new(config).unwrap();
        let run = pipeline.run();
        assert!(run.arms.failures.is_empty());
        assert_eq!(run.arms.arms.len(), 2);
        assert_eq!(run.manifest.arms.len(), 2);
        assert!(run.manifest.arms[0].sha256.is_some());
        assert_eq!(run.manifest.arms[0].records, Some(3));

        let control = &run.arms.arms[0];
        assert!(control.is_baseline);
        assert_eq!(control.records.len(), 2);
        assert!((control.records[0].normalized_value - 0.73).abs() < 1e-9);

        let rows = run.arms.compare().unwrap();
        assert_eq!(rows.len(), 2);
        assert!(rows.iter().all(|r| r.measure == Measure::UncomplicatedCases));
        assert!((rows[0].relative_change.unwrap() - (-0.5)).abs() < 1e-9);
        assert_eq!(rows[1].relative_change, Some(0.0));
        assert_eq!(rows[1].status, RowStatus::Compared);
    }

    #[test]
    fn test_failed_arm_is_isolated_and_reported() {
        let dir = tempfile::tempdir().unwrap();
        let config = config(
            dir.path(),
            &[
                ("control", "2\t0\t14\t100\n"),
                ("itn", "2\t0\t14\t60\n"),
                ("pev", "FAIL\n"),
            ],
        );
        let run = Pipeline::new(config).unwrap().run();
        assert_eq!(run.arms.arms.len(), 2);
        assert_eq!(run.arms.failures.len(), 1);
        let failure = &run.arms.failures[0];
        assert_eq!(failure.arm, "pev");
        match &failure.error {
            Error::Process {
                exit_code, stderr, ..
            } => {
                assert_eq!(*exit_code, Some(1));
                assert_eq!(stderr, "scenario file not found");
            }
            other => panic!("expected process error, got {other:?}"),
        }
        assert!(!dir.path().join("out/pev.txt").exists());

        assert!(run.arms.compare().is_err());
        let comparison = run.arms.compare_available().unwrap();
        assert_eq!(comparison.skipped, vec!["pev".to_string()]);
        assert_eq!(comparison.rows.len(), 1);
    }

    #[test]
    fn test_malformed_output_fails_only_that_arm() {
        let dir = tempfile::tempdir().unwrap();
        let config = config(
            dir.path(),
            &[
                ("control", "2\t0\t14\t100\n"),
                ("itn", "2\t0\tfoo\t10.0\n"),
            ],
        );
        let run = Pipeline::new(config).unwrap().run();
        assert_eq!(run.arms.arms.len(), 1);
        assert!(matches!(
            run.arms.failures[0].error,
            Error::Parse { line_number: 1, .. }
        ));
        assert_eq!(
            run.manifest.arms[1].status,
            crate::report::ArmStatus::Failed
        );
    }

    #[test]
    fn test_slow_arm_does_not_hold_back_the_rest() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = config(
            dir.path(),
            &[
                ("control", "SLOW\n2\t0\t14\t100\n"),
                ("a", "2\t0\t14\t10\n"),
                ("b", "2\t0\t14\t20\n"),
            ],
        );
        config.max_parallel_runs = Some(2);
        let run = Pipeline::new(config).unwrap().run();
        assert!(run.arms.failures.is_empty());
        // `b` starts on the worker that finished `a`, while `control` sleeps.
        assert!(!dir.path().join("out/b.txt.late").exists());
        let ids: Vec<_> = run.arms.arms.iter().map(|a| a.id.as_str()).collect();
        assert_eq!(ids, vec!["control", "a", "b"]);
        assert_eq!(run.arms.arms[0].records.len(), 1);
    }

    #[test]
    fn test_shared_working_dir_needs_sequential_runs() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = config(
            dir.path(),
            &[("control", "2\t0\t14\t100\n"), ("itn", "2\t0\t14\t60\n")],
        );
        for arm in &mut config.arms {
            arm.working_dir = None;
        }
        assert!(matches!(
            Pipeline::new(config.clone()),
            Err(Error::Config(_))
        ));

        config.max_parallel_runs = Some(1);
        let run = Pipeline::new(config).unwrap().run();
        assert!(run.arms.failures.is_empty());
        assert_eq!(run.arms.arms.len(), 2);
    }

    #[test]
    fn test_invalid_config_rejected_before_running() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = config(
            dir.path(),
            &[("control", "2\t0\t14\t100\n"), ("itn", "2\t0\t14\t60\n")],
        );
        config.reference_population = 0;
        assert!(matches!(
            Pipeline::new(config),
            Err(Error::Normalization(_))
        ));
        assert!(!dir.path().join("out").exists());
    }
}
