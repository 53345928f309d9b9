use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::codes::CodeTable;
use crate::error::{Error, Result};
use crate::runner::{ArmRun, Simulator};

/// Everything a comparison run needs. Relative paths are resolved against
/// the directory the configuration was loaded from.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub survey_interval_days: i64,
    pub reference_population: i64,
    #[serde(default = "default_exclude_warmup")]
    pub exclude_warmup_survey: bool,
    pub baseline_arm_id: String,
    /// Seconds allowed per simulator invocation.
    #[serde(default)]
    pub timeout: Option<u64>,
    #[serde(default)]
    pub max_parallel_runs: Option<usize>,
    pub simulator: SimulatorConfig,
    pub arms: Vec<ArmConfig>,
    #[serde(default)]
    pub codes: CodeTable,
    #[serde(default)]
    pub window: Option<WindowConfig>,
    #[serde(default)]
    pub output_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimulatorConfig {
    pub program: PathBuf,
    pub working_dir: PathBuf,
    #[serde(default)]
    pub args: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArmConfig {
    pub id: String,
    pub scenario: PathBuf,
    pub output: PathBuf,
    #[serde(default)]
    pub working_dir: Option<PathBuf>,
    #[serde(default)]
    pub reference_population: Option<i64>,
    #[serde(default)]
    pub survey_interval_days: Option<i64>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct WindowConfig {
    pub start_years: f64,
    pub end_years: f64,
}

fn default_exclude_warmup() -> bool {
    true
}

impl Config {
    pub fn from_json(data: Value, base_dir: &Path) -> Result<Self> {
        let config: Config = serde_json::from_value(data)?;
        Ok(config.resolved(base_dir))
    }

    pub fn from_toml_str(raw: &str, base_dir: &Path) -> Result<Self> {
        let config: Config = toml::from_str(raw)?;
        Ok(config.resolved(base_dir))
    }

    /// Loads a `.json` or `.toml` file.
    pub fn from_path(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path).map_err(|e| Error::io(path, e))?;
        let parent = match path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p,
            _ => Path::new("."),
        };
        let base_dir = fs::canonicalize(parent).map_err(|e| Error::io(parent, e))?;
        match path.extension().and_then(|e| e.to_str()) {
            Some("json") => Self::from_json(serde_json::from_str(&raw)?, &base_dir),
            _ => Self::from_toml_str(&raw, &base_dir),
        }
    }

    fn resolved(mut self, base_dir: &Path) -> Self {
        let resolve = |p: &mut PathBuf| {
            if p.is_relative() {
                *p = base_dir.join(&*p);
            }
        };
        resolve(&mut self.simulator.working_dir);
        // A bare program name is looked up on PATH; only paths with a
        // directory component are anchored to the configuration.
        if self.simulator.program.components().count() > 1 {
            resolve(&mut self.simulator.program);
        }
        for arm in &mut self.arms {
            resolve(&mut arm.scenario);
            resolve(&mut arm.output);
            if let Some(dir) = arm.working_dir.as_mut() {
                resolve(dir);
            }
        }
        if let Some(dir) = self.output_dir.as_mut() {
            resolve(dir);
        }
        self
    }

    /// Checks everything that can be checked before a simulator is started.
    pub fn validate(&self) -> Result<()> {
        positive_population(self.reference_population)?;
        positive_interval(self.survey_interval_days)?;
        for arm in &self.arms {
            self.population_for(arm)?;
            self.interval_for(arm)?;
        }

        if self.timeout == Some(0) {
            return Err(Error::Config("timeout must be at least one second".to_string()));
        }
        if self.max_parallel_runs == Some(0) {
            return Err(Error::Config("max_parallel_runs must be positive".to_string()));
        }
        if let Some(window) = self.window {
            if !(window.start_years < window.end_years) {
                return Err(Error::Config(format!(
                    "window start {} is not before end {}",
                    window.start_years, window.end_years
                )));
            }
        }

        // Concurrent simulators must not write into the same directory.
        let parallel = self.max_parallel_runs.unwrap_or(self.arms.len()).min(self.arms.len()) > 1;
        let mut ids = HashSet::new();
        let mut outputs = HashSet::new();
        let mut working_dirs = HashSet::new();
        for arm in &self.arms {
            if arm.id.is_empty() {
                return Err(Error::Config("arm id must not be empty".to_string()));
            }
            if !ids.insert(arm.id.as_str()) {
                return Err(Error::Config(format!("duplicate arm id `{}`", arm.id)));
            }
            if !outputs.insert(arm.output.as_path()) {
                return Err(Error::Config(format!(
                    "arm `{}` shares output path {} with another arm",
                    arm.id,
                    arm.output.display()
                )));
            }
            let working_dir = arm.working_dir.as_ref().unwrap_or(&self.simulator.working_dir);
            if parallel && !working_dirs.insert(working_dir.as_path()) {
                return Err(Error::Config(format!(
                    "arm `{}` shares working directory {} with another arm; \
                     give each arm its own working_dir or set max_parallel_runs = 1",
                    arm.id,
                    working_dir.display()
                )));
            }
        }
        if !ids.contains(self.baseline_arm_id.as_str()) {
            return Err(Error::Config(format!(
                "baseline arm `{}` is not configured",
                self.baseline_arm_id
            )));
        }
        if self.arms.len() < 2 {
            return Err(Error::Config(
                "at least one arm besides the baseline is required".to_string(),
            ));
        }
        Ok(())
    }

    pub fn population_for(&self, arm: &ArmConfig) -> Result<u64> {
        positive_population(arm.reference_population.unwrap_or(self.reference_population))
    }

    pub fn interval_for(&self, arm: &ArmConfig) -> Result<u32> {
        positive_interval(arm.survey_interval_days.unwrap_or(self.survey_interval_days))
    }

    pub fn simulator(&self) -> Simulator {
        Simulator {
            program: self.simulator.program.clone(),
            working_dir: self.simulator.working_dir.clone(),
            args: self.simulator.args.clone(),
            timeout: self.timeout.map(Duration::from_secs),
        }
    }

    pub fn arm_run(&self, arm: &ArmConfig) -> ArmRun {
        ArmRun {
            arm: arm.id.clone(),
            scenario: arm.scenario.clone(),
            output: arm.output.clone(),
            working_dir: arm.working_dir.clone(),
        }
    }
}

fn positive_population(value: i64) -> Result<u64> {
    u64::try_from(value)
        .ok()
        .filter(|v| *v > 0)
        .ok_or_else(|| {
            Error::Normalization(format!("reference population must be positive, got {value}"))
        })
}

fn positive_interval(value: i64) -> Result<u32> {
    u32::try_from(value)
        .ok()
        .filter(|v| *v > 0)
        .ok_or_else(|| {
            Error::Normalization(format!(
                "survey interval must be a positive number of days, got {value}"
            ))
        })
}
