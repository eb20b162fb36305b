use std::fs::File;
use std::io::{self, BufWriter};
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use log::{info, warn};

use rusty_dssat::data::evaluate::load_evaluation;
use rusty_dssat::data::harmonize::JoinedSeries;
use rusty_dssat::data::loader::FileKind;
use rusty_dssat::export::{write_joined_csv, write_metrics_csv, write_metrics_json};
use rusty_dssat::metrics::MetricScope;
use rusty_dssat::{Config, EvalError, MetricsEngine, MetricsResult, Session};

/// Compare DSSAT simulations with field observations
#[derive(Parser, Debug)]
#[command(name = "rusty-dssat", version)]
#[command(about = "Score DSSAT crop-model output against observed data")]
struct Cli {
    /// JSON configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Debug logging (RUST_LOG still takes precedence)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Join simulated time series with observations and compute metrics
    Compare {
        /// Simulated output files (e.g. PlantGro.OUT)
        #[arg(long = "sim", required = true, num_args = 1..)]
        simulated: Vec<PathBuf>,

        /// Observed time-series file (e.g. UFGA7801.SBT)
        #[arg(long = "obs", required = true)]
        observed: PathBuf,

        /// Experiment file used to label treatments
        #[arg(long)]
        experiment: Option<PathBuf>,

        /// Simulation start date (YYYY-MM-DD) for DAS columns
        #[arg(long)]
        start: Option<NaiveDate>,

        /// Variables to score; defaults to every matched variable
        #[arg(long = "variable")]
        variables: Vec<String>,

        /// Also compute metrics over all treatments at once
        #[arg(long)]
        pooled: bool,

        /// Write metrics as CSV
        #[arg(long)]
        csv: Option<PathBuf>,

        /// Write the joined samples as CSV
        #[arg(long)]
        samples: Option<PathBuf>,

        /// Print metrics as JSON instead of a table
        #[arg(long)]
        json: bool,
    },

    /// Score the end-of-season summary in EVALUATE.OUT
    Evaluate {
        path: PathBuf,

        /// Print metrics as JSON instead of a table
        #[arg(long)]
        json: bool,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level)).init();

    let config = match &cli.config {
        Some(path) => Config::load(path).with_context(|| format!("Failed to load config {}", path.display()))?,
        None => Config::default(),
    };

    match cli.command {
        Commands::Compare {
            simulated,
            observed,
            experiment,
            start,
            variables,
            pooled,
            csv,
            samples,
            json,
        } => {
            let mut inputs: Vec<(PathBuf, FileKind)> =
                simulated.into_iter().map(|p| (p, FileKind::Simulated)).collect();
            inputs.push((observed, FileKind::Observed));
            if let Some(x) = experiment {
                inputs.push((x, FileKind::Experiment));
            }
            let options = CompareOptions {
                start,
                variables,
                pooled,
                csv,
                samples,
                json,
            };
            compare(config, &inputs, options)
        }
        Commands::Evaluate { path, json } => evaluate(&config, &path, json),
    }
}

// ---------------------------------------------------------------------------
// compare
// ---------------------------------------------------------------------------

struct CompareOptions {
    start: Option<NaiveDate>,
    variables: Vec<String>,
    pooled: bool,
    csv: Option<PathBuf>,
    samples: Option<PathBuf>,
    json: bool,
}

fn compare(config: Config, inputs: &[(PathBuf, FileKind)], options: CompareOptions) -> Result<()> {
    let mut session = Session::new(config);
    session.start = options.start;
    session.load_inputs(inputs);

    if let Some(e) = session.load_errors.first() {
        bail!("{e}");
    }
    if session.simulated.iter().all(|f| f.tables.is_empty()) {
        bail!("no usable simulated data");
    }

    let variables = if options.variables.is_empty() {
        matched_variables(&session)
    } else {
        options.variables.clone()
    };
    if variables.is_empty() {
        warn!("no observed variable matches a simulated one; configure aliases");
    }

    let mut results: Vec<MetricsResult> = Vec::new();
    let mut joined: Vec<JoinedSeries> = Vec::new();
    for variable in &variables {
        let evaluation = session.evaluate(variable, options.pooled);
        for (treatment, result) in evaluation.per_treatment {
            match result {
                Ok(r) => results.push(r),
                Err(e) => warn!("{} ({}): {e}", variable, session.treatment_label(&treatment)),
            }
        }
        match evaluation.pooled {
            Some(Ok(r)) => results.push(r),
            Some(Err(e)) => warn!("{variable} (pooled): {e}"),
            None => {}
        }
        joined.extend(evaluation.joined);
    }

    if options.json {
        write_metrics_json(io::stdout().lock(), &results).context("Failed to write JSON")?;
        println!();
    } else {
        print_table(&results, |scope| match scope {
            MetricScope::Treatment(t) => format!("{t} {}", session.treatment_label(t)),
            MetricScope::Pooled => "pooled".to_string(),
        });
        let errors = session.errors().count();
        if errors > 0 {
            println!("\n{errors} parse error(s); run with -v for details");
        }
    }

    if let Some(path) = &options.csv {
        write_metrics_csv(create(path)?, &results).with_context(|| format!("Failed to write {}", path.display()))?;
        info!("Wrote metrics to {}", path.display());
    }
    if let Some(path) = &options.samples {
        write_joined_csv(create(path)?, &joined).with_context(|| format!("Failed to write {}", path.display()))?;
        info!("Wrote joined samples to {}", path.display());
    }
    Ok(())
}

/// Simulated names of every observed variable with a counterpart.
fn matched_variables(session: &Session) -> Vec<String> {
    let mut names: Vec<String> = Vec::new();
    for coverage in session.coverage().into_values() {
        for (_, simulated) in coverage.matched {
            if !names.contains(&simulated) {
                names.push(simulated);
            }
        }
    }
    names
}

// ---------------------------------------------------------------------------
// evaluate
// ---------------------------------------------------------------------------

fn evaluate(config: &Config, path: &Path, json: bool) -> Result<()> {
    let table = load_evaluation(path, config).with_context(|| format!("Failed to read {}", path.display()))?;
    let engine = MetricsEngine::from_config(config);

    let mut results = Vec::new();
    for result in table.evaluate(&engine) {
        match result {
            Ok(r) => results.push(r),
            Err(e @ EvalError::InsufficientSamples { .. }) => warn!("{e}"),
            Err(e) => return Err(e.into()),
        }
    }

    if json {
        write_metrics_json(io::stdout().lock(), &results).context("Failed to write JSON")?;
        println!();
    } else {
        print_table(&results, |scope| scope.to_string());
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// output helpers
// ---------------------------------------------------------------------------

fn create(path: &Path) -> Result<BufWriter<File>> {
    let file = File::create(path).with_context(|| format!("Failed to create {}", path.display()))?;
    Ok(BufWriter::new(file))
}

fn print_table(results: &[MetricsResult], label: impl Fn(&MetricScope) -> String) {
    let labels: Vec<String> = results.iter().map(|r| label(&r.scope)).collect();
    let width = labels.iter().map(|l| l.len()).max().unwrap_or(0).max("SCOPE".len());

    println!(
        "{:<10} {:<width$} {:>5} {:>12} {:>8} {:>8}",
        "VARIABLE", "SCOPE", "N", "RMSE", "R2", "D"
    );
    for (r, scope) in results.iter().zip(&labels) {
        println!(
            "{:<10} {:<width$} {:>5} {:>12} {:>8} {:>8}",
            r.variable,
            scope,
            r.n,
            r.rmse.to_string(),
            r.r_squared.to_string(),
            r.d_stat.to_string()
        );
    }
}
