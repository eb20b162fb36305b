use std::collections::BTreeMap;

use chrono::NaiveDate;
use log::debug;
use serde::Serialize;

use super::loader::DATE_AXIS_COLUMNS;
use super::model::{SeriesTable, TreatmentId, Variable};
use crate::config::Config;
use crate::error::EvalError;

// ---------------------------------------------------------------------------
// AliasTable – observed short codes → simulated output codes
// ---------------------------------------------------------------------------

/// Case-insensitive mapping from observed variable codes to the simulated
/// code they measure. Supplied by configuration, never hard-coded.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AliasTable {
    map: BTreeMap<String, String>,
}

impl AliasTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_config(config: &Config) -> Self {
        config.aliases.iter().collect()
    }

    pub fn insert(&mut self, observed: &str, simulated: &str) {
        self.map
            .insert(observed.to_ascii_uppercase(), simulated.to_ascii_uppercase());
    }

    /// Simulated code an observed code is aliased to, if any.
    pub fn resolve(&self, observed: &str) -> Option<&str> {
        self.map
            .get(&observed.to_ascii_uppercase())
            .map(String::as_str)
    }

    /// Whether an observed column measures the given simulated variable.
    pub fn matches(&self, observed: &str, simulated: &str) -> bool {
        observed.eq_ignore_ascii_case(simulated)
            || self
                .resolve(observed)
                .is_some_and(|target| target.eq_ignore_ascii_case(simulated))
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}

impl<K: AsRef<str>, V: AsRef<str>> FromIterator<(K, V)> for AliasTable {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut table = AliasTable::new();
        for (observed, simulated) in iter {
            table.insert(observed.as_ref(), simulated.as_ref());
        }
        table
    }
}

// ---------------------------------------------------------------------------
// Joined output
// ---------------------------------------------------------------------------

/// A simulated/observed pair on one date.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JoinedSample {
    pub treatment: TreatmentId,
    pub variable: String,
    pub date: NaiveDate,
    pub simulated: f64,
    pub observed: f64,
}

/// All matched pairs of one treatment/variable, ascending by date.
#[derive(Debug, Clone, PartialEq)]
pub struct JoinedSeries {
    pub treatment: TreatmentId,
    /// Simulated variable name.
    pub variable: String,
    /// Observed column it was matched with, if any.
    pub observed_variable: Option<String>,
    pub samples: Vec<JoinedSample>,
}

impl JoinedSeries {
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

/// Which observed variables found a simulated counterpart.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct VariableCoverage {
    /// `(observed, simulated)` name pairs.
    pub matched: Vec<(String, String)>,
    /// Observed variables with neither a same-named simulated column nor an
    /// alias to one.
    pub unmatched: Vec<String>,
}

// ---------------------------------------------------------------------------
// DataHarmonizer
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default)]
pub struct DataHarmonizer {
    aliases: AliasTable,
}

impl DataHarmonizer {
    pub fn new(aliases: AliasTable) -> Self {
        Self { aliases }
    }

    pub fn aliases(&self) -> &AliasTable {
        &self.aliases
    }

    /// Observed column that measures `simulated`; a same-named column wins
    /// over an alias.
    fn observed_counterpart<'t>(&self, observed: &'t SeriesTable, simulated: &str) -> Option<&'t Variable> {
        observed
            .variables
            .iter()
            .find(|v| v.name.eq_ignore_ascii_case(simulated))
            .or_else(|| {
                observed
                    .variables
                    .iter()
                    .find(|v| self.aliases.matches(&v.name, simulated))
            })
    }

    /// Pair simulated and observed values of `variable` on dates present in
    /// both tables. No nearest-date fallback. Observed replicates on one
    /// date are averaged.
    pub fn join(
        &self,
        simulated: &SeriesTable,
        observed: &SeriesTable,
        variable: &str,
    ) -> Result<JoinedSeries, EvalError> {
        if simulated.treatment != observed.treatment {
            return Err(EvalError::TreatmentMismatch {
                simulated: simulated.treatment.clone(),
                observed: observed.treatment.clone(),
            });
        }
        let sim_name = simulated
            .variable(variable)
            .map(|v| v.name.clone())
            .unwrap_or_else(|| variable.to_string());
        let Some(obs_var) = self.observed_counterpart(observed, &sim_name) else {
            debug!(
                "treatment {}: no observed column for {sim_name}",
                simulated.treatment
            );
            return Ok(JoinedSeries {
                treatment: simulated.treatment.clone(),
                variable: sim_name,
                observed_variable: None,
                samples: Vec::new(),
            });
        };

        let sim_points: BTreeMap<NaiveDate, f64> = simulated.series(&sim_name).into_iter().collect();

        let mut replicates: BTreeMap<NaiveDate, (f64, usize)> = BTreeMap::new();
        for (date, value) in observed.series(&obs_var.name) {
            let slot = replicates.entry(date).or_insert((0.0, 0));
            slot.0 += value;
            slot.1 += 1;
        }

        let samples = replicates
            .into_iter()
            .filter_map(|(date, (sum, count))| {
                let sim = *sim_points.get(&date)?;
                Some(JoinedSample {
                    treatment: simulated.treatment.clone(),
                    variable: sim_name.clone(),
                    date,
                    simulated: sim,
                    observed: sum / count as f64,
                })
            })
            .collect();

        Ok(JoinedSeries {
            treatment: simulated.treatment.clone(),
            variable: sim_name,
            observed_variable: Some(obs_var.name.clone()),
            samples,
        })
    }

    /// Classify every observed variable against the simulated variable names.
    pub fn coverage(&self, simulated: &[String], observed: &SeriesTable) -> VariableCoverage {
        let mut coverage = VariableCoverage::default();
        for var in &observed.variables {
            if DATE_AXIS_COLUMNS.iter().any(|c| c.eq_ignore_ascii_case(&var.name)) {
                continue;
            }
            let direct = simulated.iter().find(|s| s.eq_ignore_ascii_case(&var.name));
            let aliased = || simulated.iter().find(|s| self.aliases.matches(&var.name, s));
            match direct.or_else(aliased) {
                Some(sim) => coverage.matched.push((var.name.clone(), sim.clone())),
                None => coverage.unmatched.push(var.name.clone()),
            }
        }
        coverage
    }

    /// Simulated name for an observed variable, or `VariableMismatch`.
    pub fn require_counterpart(
        &self,
        file: &str,
        simulated: &[String],
        observed: &SeriesTable,
        observed_variable: &str,
    ) -> Result<String, EvalError> {
        simulated
            .iter()
            .find(|s| self.aliases.matches(observed_variable, s))
            .cloned()
            .ok_or_else(|| EvalError::VariableMismatch {
                file: file.to_string(),
                treatment: observed.treatment.clone(),
                variable: observed_variable.to_string(),
            })
    }
}
