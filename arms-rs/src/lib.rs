pub mod arm;
pub mod axis;
pub mod codes;
pub mod compare;
pub mod config;
pub mod error;
pub mod loader;
pub mod normalize;
pub mod pipeline;
pub mod report;
pub mod runner;

pub use arm::{AnnotatedArm, AnnotatedRecord, ScenarioArm};
pub use axis::SurveyAxis;
pub use codes::{AgeGroup, CodeTable, Measure};
pub use compare::{ArmSet, Comparison, ComparisonRow, RowStatus, WindowSummary, compare, summarize_window};
pub use config::Config;
pub use error::{ArmFailure, CodeKind, Error, ProcessFailure, Result};
pub use loader::{SimulationRecord, load_output, parse_output};
pub use normalize::Normalizer;
pub use pipeline::{Pipeline, PipelineRun};
pub use report::{OutputSink, RunManifest};
pub use runner::{ArmRun, RunOutcome, Simulator};
