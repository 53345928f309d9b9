use std::fmt;
use std::io;
use std::path::PathBuf;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("simulator failed for arm `{arm}`: {reason} (exit code {exit_code:?}): {stderr}")]
    Process {
        arm: String,
        exit_code: Option<i32>,
        reason: ProcessFailure,
        stderr: String,
    },

    #[error("line {line_number}: {reason}: {raw_line:?}")]
    Parse {
        line_number: u64,
        raw_line: String,
        reason: String,
    },

    #[error("unknown {kind} code {code}")]
    UnknownCode { code: i64, kind: CodeKind },

    #[error("invalid normalization parameters: {0}")]
    Normalization(String),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("comparison refused: {0}")]
    Comparison(String),

    #[error("{}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error(transparent)]
    Csv(#[from] csv::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Toml(#[from] toml::de::Error),
}

impl Error {
    pub(crate) fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Error::Io {
            path: path.into(),
            source,
        }
    }
}

/// Why a simulator invocation did not produce usable output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessFailure {
    /// The simulator ran to completion with a nonzero status.
    Exited,
    /// The simulator was killed by a signal it did not send itself.
    Terminated,
    /// The run exceeded the configured timeout and was killed.
    TimedOut { seconds: u64 },
    /// The simulator could not be started.
    Spawn { message: String },
    /// Preparing or supervising the run failed (missing scenario, wait error).
    Setup { message: String },
}

impl fmt::Display for ProcessFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProcessFailure::Exited => write!(f, "exited with failure status"),
            ProcessFailure::Terminated => write!(f, "terminated by signal"),
            ProcessFailure::TimedOut { seconds } => write!(f, "timed out after {seconds}s"),
            ProcessFailure::Spawn { message } => write!(f, "could not start: {message}"),
            ProcessFailure::Setup { message } => write!(f, "{message}"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CodeKind {
    Measure,
    Group,
}

impl fmt::Display for CodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CodeKind::Measure => write!(f, "measure"),
            CodeKind::Group => write!(f, "group"),
        }
    }
}

/// A failure that took a single arm out of a comparison.
#[derive(Debug)]
pub struct ArmFailure {
    pub arm: String,
    pub error: Error,
}

impl fmt::Display for ArmFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "arm `{}`: {}", self.arm, self.error)
    }
}
