use std::collections::BTreeMap;
use std::io;
use std::path::{Path, PathBuf};

use chrono::NaiveDate;
use log::{debug, info, warn};
use rayon::prelude::*;

use crate::config::Config;
use crate::data::evaluate::{load_evaluation, EvaluationTable};
use crate::data::experiment::{load_experiment, Experiment};
use crate::data::filter::{filtered_tables, init_selection, Selection};
use crate::data::harmonize::{AliasTable, DataHarmonizer, JoinedSeries, VariableCoverage};
use crate::data::loader::{load_file, FileKind};
use crate::data::model::{ParsedFile, SeriesTable, Source, TreatmentId};
use crate::error::EvalError;
use crate::metrics::{MetricsEngine, MetricsResult};

// ---------------------------------------------------------------------------
// Session state
// ---------------------------------------------------------------------------

/// Everything one analyst has loaded, independent of any presentation.
/// Loading replaces the table set wholesale.
#[derive(Debug, Default)]
pub struct Session {
    pub config: Config,

    /// Start date for `DAS` resolution; overrides `config.simulation_start`.
    pub start: Option<NaiveDate>,

    pub simulated: Vec<ParsedFile>,
    pub observed: Vec<ParsedFile>,
    pub experiment: Option<Experiment>,
    pub evaluation: Option<EvaluationTable>,

    /// Files that could not be read at all.
    pub load_errors: Vec<EvalError>,

    /// Current treatment/variable selection.
    pub selection: Selection,

    /// Results of the last `evaluate` call; cleared when the selection or
    /// the table set changes.
    pub metrics: Vec<MetricsResult>,

    /// One-line status for the caller to display.
    pub status_message: Option<String>,
}

/// Per-treatment results for one variable plus the optional pooled result.
#[derive(Debug)]
pub struct Evaluation {
    pub variable: String,
    pub joined: Vec<JoinedSeries>,
    pub per_treatment: Vec<(TreatmentId, Result<MetricsResult, EvalError>)>,
    pub pooled: Option<Result<MetricsResult, EvalError>>,
}

enum Loaded {
    Series(ParsedFile),
    Experiment(Experiment),
    Evaluation(EvaluationTable),
}

impl Session {
    pub fn new(config: Config) -> Self {
        Self {
            config,
            ..Self::default()
        }
    }

    /// Load files, inferring each file's kind from its name.
    pub fn load(&mut self, paths: &[PathBuf]) {
        let mut inputs = Vec::with_capacity(paths.len());
        let mut unknown = Vec::new();
        for path in paths {
            match FileKind::from_path(path) {
                Some(kind) => inputs.push((path.clone(), kind)),
                None => unknown.push(EvalError::Io {
                    path: path.clone(),
                    source: io::Error::new(io::ErrorKind::InvalidInput, "unrecognised DSSAT file type"),
                }),
            }
        }
        self.install(&inputs, unknown);
    }

    /// Parse every input in parallel, then install the results as the new
    /// table set. Per-file failures are kept; other files stay usable.
    pub fn load_inputs(&mut self, inputs: &[(PathBuf, FileKind)]) {
        self.install(inputs, Vec::new());
    }

    fn install(&mut self, inputs: &[(PathBuf, FileKind)], mut load_errors: Vec<EvalError>) {
        let config = &self.config;
        let start = self.start;
        let results: Vec<Result<Loaded, EvalError>> = inputs
            .par_iter()
            .map(|(path, kind)| load_one(path, *kind, config, start))
            .collect();

        let mut simulated = Vec::new();
        let mut observed = Vec::new();
        let mut experiment = None;
        let mut evaluation = None;
        for result in results {
            match result {
                Ok(Loaded::Series(file)) => match file.source {
                    Source::Simulated => simulated.push(file),
                    Source::Observed => observed.push(file),
                },
                Ok(Loaded::Experiment(exp)) => experiment = Some(exp),
                Ok(Loaded::Evaluation(table)) => evaluation = Some(table),
                Err(e) => {
                    warn!("{e}");
                    load_errors.push(e);
                }
            }
        }

        self.simulated = simulated;
        self.observed = observed;
        self.experiment = experiment;
        self.evaluation = evaluation;
        self.load_errors = load_errors;
        self.selection = init_selection(&self.simulated);
        self.metrics.clear();

        let parse_errors: usize = self
            .simulated
            .iter()
            .chain(&self.observed)
            .map(|f| f.errors.len())
            .sum();
        let message = format!(
            "{} simulated file(s), {} observed file(s), {} error(s)",
            self.simulated.len(),
            self.observed.len(),
            parse_errors + self.load_errors.len()
        );
        info!("{message}");
        self.status_message = Some(message);
    }

    /// Every error from the last load, for a status panel.
    pub fn errors(&self) -> impl Iterator<Item = &EvalError> {
        self.load_errors.iter().chain(
            self.simulated
                .iter()
                .chain(&self.observed)
                .flat_map(|f| f.errors.iter()),
        )
    }

    pub fn set_selection(&mut self, selection: Selection) {
        self.selection = selection;
        self.metrics.clear();
    }

    fn harmonizer(&self) -> DataHarmonizer {
        DataHarmonizer::new(AliasTable::from_config(&self.config))
    }

    /// Union of simulated variable names across files.
    pub fn simulated_variables(&self) -> Vec<String> {
        let mut names: Vec<String> = Vec::new();
        for file in &self.simulated {
            for name in file.variable_names() {
                if !names.iter().any(|n| n.eq_ignore_ascii_case(&name)) {
                    names.push(name);
                }
            }
        }
        names
    }

    /// Display label: experiment file name, then output-file banner, then id.
    pub fn treatment_label(&self, treatment: &TreatmentId) -> String {
        self.experiment
            .as_ref()
            .and_then(|e| e.treatment_name(treatment))
            .map(str::to_string)
            .or_else(|| {
                self.simulated
                    .iter()
                    .filter_map(|f| f.table(treatment))
                    .find_map(|t| t.treatment_name.clone())
            })
            .unwrap_or_else(|| format!("Treatment {treatment}"))
    }

    fn simulated_table(&self, treatment: &TreatmentId, variable: &str) -> Option<&SeriesTable> {
        self.simulated
            .iter()
            .filter_map(|f| f.table(treatment))
            .find(|t| t.variable(variable).is_some())
    }

    /// Observed table for `treatment`, preferring one that measures `variable`.
    fn observed_table(&self, treatment: &TreatmentId, variable: &str) -> Option<(&ParsedFile, &SeriesTable)> {
        let aliases = AliasTable::from_config(&self.config);
        let tables: Vec<(&ParsedFile, &SeriesTable)> = self
            .observed
            .iter()
            .filter_map(|f| f.table(treatment).map(|t| (f, t)))
            .collect();
        tables
            .iter()
            .find(|(_, t)| t.variables.iter().any(|v| aliases.matches(&v.name, variable)))
            .or_else(|| tables.first())
            .copied()
    }

    /// Joined series of `variable` for every selected treatment that has both
    /// simulated and observed tables. Empty when `variable` is deselected.
    ///
    /// A treatment whose observed data has no column (or alias) for
    /// `variable` yields `VariableMismatch`.
    pub fn join(&self, variable: &str) -> Vec<Result<JoinedSeries, EvalError>> {
        if !self.selection.includes_variable(variable) {
            debug!("{variable} is not selected");
            return Vec::new();
        }
        let harmonizer = self.harmonizer();
        let mut treatments: Vec<&TreatmentId> = Vec::new();
        for file in &self.simulated {
            for table in filtered_tables(file, &self.selection) {
                if !treatments.contains(&&table.treatment) {
                    treatments.push(&table.treatment);
                }
            }
        }
        treatments.sort();

        treatments
            .into_iter()
            .filter_map(|treatment| {
                let sim = self.simulated_table(treatment, variable)?;
                let Some((obs_file, obs)) = self.observed_table(treatment, variable) else {
                    debug!("treatment {treatment}: no observed data");
                    return None;
                };
                let joined = harmonizer.join(sim, obs, variable).and_then(|series| {
                    if series.observed_variable.is_some() {
                        return Ok(series);
                    }
                    Err(EvalError::VariableMismatch {
                        file: obs_file.name.clone(),
                        treatment: treatment.clone(),
                        variable: series.variable,
                    })
                });
                Some(joined)
            })
            .collect()
    }

    /// Metrics for `variable`, per treatment and optionally pooled over the
    /// concatenated samples of all selected treatments. A deselected
    /// variable gives no results at all.
    pub fn evaluate(&mut self, variable: &str, pooled: bool) -> Evaluation {
        let engine = MetricsEngine::from_config(&self.config);
        let mut joined = Vec::new();
        let mut per_treatment = Vec::new();
        for result in self.join(variable) {
            match result {
                Ok(series) => {
                    per_treatment.push((series.treatment.clone(), engine.evaluate(&series)));
                    joined.push(series);
                }
                Err(e) => {
                    let treatment = e.treatment().cloned().unwrap_or(TreatmentId::Number(0));
                    per_treatment.push((treatment, Err(e)));
                }
            }
        }
        let pooled = (pooled && self.selection.includes_variable(variable))
            .then(|| engine.evaluate_pooled(variable, &joined));

        self.metrics = per_treatment
            .iter()
            .filter_map(|(_, r)| r.as_ref().ok().cloned())
            .chain(pooled.iter().filter_map(|r| r.as_ref().ok().cloned()))
            .collect();

        Evaluation {
            variable: variable.to_string(),
            joined,
            per_treatment,
            pooled,
        }
    }

    /// Observed-variable coverage per treatment.
    pub fn coverage(&self) -> BTreeMap<TreatmentId, VariableCoverage> {
        let harmonizer = self.harmonizer();
        let simulated = self.simulated_variables();
        let mut coverage: BTreeMap<TreatmentId, VariableCoverage> = BTreeMap::new();
        for file in &self.observed {
            for (treatment, table) in &file.tables {
                let c = harmonizer.coverage(&simulated, table);
                let entry = coverage.entry(treatment.clone()).or_default();
                entry.matched.extend(c.matched);
                entry.unmatched.extend(c.unmatched);
            }
        }
        coverage
    }
}

fn load_one(path: &Path, kind: FileKind, config: &Config, start: Option<NaiveDate>) -> Result<Loaded, EvalError> {
    match kind {
        FileKind::Simulated => load_file(path, Source::Simulated, config, start).map(Loaded::Series),
        FileKind::Observed => load_file(path, Source::Observed, config, start).map(Loaded::Series),
        FileKind::Experiment => load_experiment(path).map(Loaded::Experiment),
        FileKind::Evaluate => load_evaluation(path, config).map(Loaded::Evaluation),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_session_evaluates_to_nothing() {
        let mut session = Session::new(Config::default());
        session.load_inputs(&[]);
        let evaluation = session.evaluate("LAID", true);
        assert!(evaluation.per_treatment.is_empty());
        assert!(evaluation.pooled.is_none());
        assert_eq!(session.status_message.as_deref(), Some("0 simulated file(s), 0 observed file(s), 0 error(s)"));
    }

    #[test]
    fn unknown_and_missing_files_are_load_errors() {
        let dir = tempfile::tempdir().unwrap();
        let mut session = Session::new(Config::default());
        session.load(&[dir.path().join("notes.txt"), dir.path().join("MISSING.OUT")]);
        assert_eq!(session.load_errors.len(), 2);
        assert_eq!(session.errors().count(), 2);
        assert!(session.simulated.is_empty());
    }
}
