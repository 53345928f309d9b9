use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::arm::AnnotatedArm;
use crate::compare::{ComparisonRow, RowStatus, WindowSummary};
use crate::error::{Error, Result};

pub const COMPARISON_HEADERS: [&str; 8] = [
    "arm",
    "time_years",
    "measure",
    "group",
    "baseline_value",
    "arm_value",
    "relative_change",
    "status",
];

pub const WINDOW_HEADERS: [&str; 9] = [
    "arm",
    "measure",
    "group",
    "start_years",
    "end_years",
    "surveys",
    "baseline_total",
    "arm_total",
    "relative_change",
];

pub const SERIES_HEADERS: [&str; 7] = [
    "arm",
    "survey",
    "time_years",
    "measure",
    "group",
    "value",
    "value_normalised",
];

/// Where report files go: a directory, or stdout when none is configured.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutputSink {
    Directory(PathBuf),
    Stdout,
}

impl OutputSink {
    pub fn new(dir: Option<PathBuf>) -> Self {
        match dir {
            Some(dir) => OutputSink::Directory(dir),
            None => OutputSink::Stdout,
        }
    }

    fn create(&self, filename: &str) -> Result<Option<(PathBuf, File)>> {
        match self {
            OutputSink::Directory(dir) => {
                fs::create_dir_all(dir).map_err(|e| Error::io(dir, e))?;
                let path = dir.join(filename);
                let file = File::create(&path).map_err(|e| Error::io(&path, e))?;
                Ok(Some((path, file)))
            }
            OutputSink::Stdout => Ok(None),
        }
    }

    pub fn write(&self, filename: &str, data: &[u8]) -> Result<()> {
        match self.create(filename)? {
            Some((path, mut file)) => file.write_all(data).map_err(|e| Error::io(&path, e)),
            None => io::stdout()
                .write_all(data)
                .map_err(|e| Error::io("<stdout>", e)),
        }
    }

    pub fn write_json<T: Serialize>(&self, filename: &str, value: &T) -> Result<()> {
        let mut data = serde_json::to_vec_pretty(value)?;
        data.push(b'\n');
        self.write(filename, &data)
    }

    pub fn write_csv(&self, filename: &str, headers: &[&str], rows: &[Vec<String>]) -> Result<()> {
        match self.create(filename)? {
            Some((_, file)) => write_records(csv::Writer::from_writer(file), headers, rows),
            None => write_records(csv::Writer::from_writer(io::stdout()), headers, rows),
        }
    }
}

fn write_records<W: Write>(
    mut wtr: csv::Writer<W>,
    headers: &[&str],
    rows: &[Vec<String>],
) -> Result<()> {
    wtr.write_record(headers)?;
    for row in rows {
        wtr.write_record(row)?;
    }
    wtr.flush().map_err(|e| Error::io("<csv>", e))?;
    Ok(())
}

fn optional(value: Option<f64>) -> String {
    value.map(|v| v.to_string()).unwrap_or_default()
}

fn status_label(status: RowStatus) -> &'static str {
    match status {
        RowStatus::Compared => "compared",
        RowStatus::MissingInArm => "missing_in_arm",
        RowStatus::ZeroBaseline => "zero_baseline",
    }
}

pub fn comparison_rows(rows: &[ComparisonRow]) -> Vec<Vec<String>> {
    rows.iter()
        .map(|r| {
            vec![
                r.arm.clone(),
                r.time_years.to_string(),
                r.measure.to_string(),
                r.group.to_string(),
                r.baseline_value.to_string(),
                optional(r.arm_value),
                optional(r.relative_change),
                status_label(r.status).to_string(),
            ]
        })
        .collect()
}

pub fn window_rows(summaries: &[WindowSummary]) -> Vec<Vec<String>> {
    summaries
        .iter()
        .map(|s| {
            vec![
                s.arm.clone(),
                s.measure.to_string(),
                s.group.to_string(),
                s.start_years.to_string(),
                s.end_years.to_string(),
                s.surveys.to_string(),
                s.baseline_total.to_string(),
                optional(s.arm_total),
                optional(s.relative_change),
            ]
        })
        .collect()
}

/// Long-format time series of every arm, one row per annotated record.
pub fn series_rows(arms: &[AnnotatedArm]) -> Vec<Vec<String>> {
    arms.iter()
        .flat_map(|arm| {
            arm.records.iter().map(move |r| {
                vec![
                    arm.id.clone(),
                    r.record.survey_index.to_string(),
                    r.time_years.to_string(),
                    r.measure.to_string(),
                    r.group.to_string(),
                    r.record.value.to_string(),
                    r.normalized_value.to_string(),
                ]
            })
        })
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ArmStatus {
    Ok,
    Failed,
}

#[derive(Debug, Clone, Serialize)]
pub struct ManifestEntry {
    pub arm: String,
    pub status: ArmStatus,
    pub output: PathBuf,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sha256: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub records: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub elapsed_seconds: Option<f64>,
}

impl ManifestEntry {
    pub fn succeeded(
        arm: &str,
        output: &Path,
        sha256: String,
        records: usize,
        elapsed: Duration,
    ) -> Self {
        Self {
            arm: arm.to_string(),
            status: ArmStatus::Ok,
            output: output.to_path_buf(),
            error: None,
            sha256: Some(sha256),
            records: Some(records),
            elapsed_seconds: Some(elapsed.as_secs_f64()),
        }
    }

    pub fn failed(arm: &str, output: &Path, error: &Error) -> Self {
        Self {
            arm: arm.to_string(),
            status: ArmStatus::Failed,
            output: output.to_path_buf(),
            error: Some(error.to_string()),
            sha256: None,
            records: None,
            elapsed_seconds: None,
        }
    }
}

/// Record of what every arm produced, so a comparison can be traced back to
/// the exact simulator outputs it was computed from.
#[derive(Debug, Clone, Serialize)]
pub struct RunManifest {
    pub baseline_arm_id: String,
    pub code_table_version: String,
    pub arms: Vec<ManifestEntry>,
}

pub fn file_sha256(path: &Path) -> Result<String> {
    let mut file = File::open(path).map_err(|e| Error::io(path, e))?;
    let mut hasher = Sha256::new();
    io::copy(&mut file, &mut hasher).map_err(|e| Error::io(path, e))?;
    Ok(hex::encode(hasher.finalize()))
}
