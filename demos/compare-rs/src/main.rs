use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use arms::report::{self, COMPARISON_HEADERS, SERIES_HEADERS, WINDOW_HEADERS};
use arms::{Comparison, Config, Error, OutputSink, Pipeline, summarize_window};
use clap::Parser;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// Run every simulator arm and compare the treatments with the baseline.
#[derive(Parser)]
struct Cli {
    /// TOML or JSON configuration file; `-` reads JSON from stdin.
    config: PathBuf,

    /// Overrides `output_dir` from the configuration.
    #[arg(long)]
    output_dir: Option<PathBuf>,

    /// Compare the arms that succeeded instead of refusing when any failed.
    #[arg(long)]
    allow_partial: bool,
}

fn main() -> ExitCode {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(io::stderr))
        .with(filter)
        .init();

    let cli = Cli::parse();
    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("{e}");
            ExitCode::FAILURE
        }
    }
}

fn load_config(path: &Path) -> arms::Result<Config> {
    if path != Path::new("-") {
        return Config::from_path(path);
    }
    let mut raw = String::new();
    io::stdin()
        .read_to_string(&mut raw)
        .map_err(|e| Error::Io {
            path: PathBuf::from("<stdin>"),
            source: e,
        })?;
    if raw.trim().is_empty() {
        return Err(Error::Config("no input on stdin".to_string()));
    }
    let cwd = std::env::current_dir().map_err(|e| Error::Io {
        path: PathBuf::from("."),
        source: e,
    })?;
    Config::from_json(serde_json::from_str(&raw)?, &cwd)
}

fn run(cli: Cli) -> arms::Result<()> {
    let config = load_config(&cli.config)?;
    let sink = OutputSink::new(cli.output_dir.or_else(|| config.output_dir.clone()));
    let window = config.window;

    let pipeline = Pipeline::new(config)?;
    let run = pipeline.run();
    sink.write_json("manifest.json", &run.manifest)?;

    let comparison = if cli.allow_partial {
        run.arms.compare_available()?
    } else {
        Comparison {
            rows: run.arms.compare()?,
            skipped: Vec::new(),
        }
    };
    tracing::info!(
        rows = comparison.rows.len(),
        skipped = comparison.skipped.len(),
        "comparison complete"
    );

    sink.write_csv(
        "series.csv",
        &SERIES_HEADERS,
        &report::series_rows(&run.arms.arms),
    )?;
    sink.write_csv(
        "comparison.csv",
        &COMPARISON_HEADERS,
        &report::comparison_rows(&comparison.rows),
    )?;
    if let Some(window) = window {
        let summaries = summarize_window(&comparison.rows, window.start_years, window.end_years);
        for s in &summaries {
            if let Some(change) = s.relative_change {
                tracing::info!(
                    arm = %s.arm,
                    measure = %s.measure,
                    group = %s.group,
                    "relative change {:+.1}% over years {}..{}",
                    change * 100.0,
                    s.start_years,
                    s.end_years
                );
            }
        }
        sink.write_csv(
            "window_summary.csv",
            &WINDOW_HEADERS,
            &report::window_rows(&summaries),
        )?;
    }
    Ok(())
}
