use std::collections::BTreeMap;
use std::path::Path;

use log::{info, warn};

use super::loader::{read_text, RecordParser};
use super::missing::MissingValueNormalizer;
use super::model::{FileLayout, TreatmentId, Value};
use crate::config::Config;
use crate::error::EvalError;
use crate::metrics::{MetricScope, MetricsEngine, MetricsResult};

/// One row of `EVALUATE.OUT`: end-of-season simulated (`…S`) and measured
/// (`…M`) values for one run.
#[derive(Debug, Clone, PartialEq)]
pub struct EvaluationRow {
    pub line: usize,
    pub treatment: TreatmentId,
    pub values: BTreeMap<String, Value>,
    pub labels: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EvaluationPair {
    pub simulated: f64,
    pub observed: f64,
}

#[derive(Debug)]
pub struct EvaluationTable {
    pub name: String,
    /// Header column order, numeric columns only.
    pub columns: Vec<String>,
    pub rows: Vec<EvaluationRow>,
    pub errors: Vec<EvalError>,
}

pub fn load_evaluation(path: &Path, config: &Config) -> Result<EvaluationTable, EvalError> {
    let text = read_text(path)?;
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string());
    let table = EvaluationTable::parse(&name, &text, config);
    info!(
        "Loaded {}: {} run(s), {} paired variable(s)",
        name,
        table.rows.len(),
        table.stems().len()
    );
    Ok(table)
}

impl EvaluationTable {
    /// Rows are independent: a bad row is reported and skipped.
    pub fn parse(name: &str, text: &str, config: &Config) -> Self {
        let parser = RecordParser::new(name, text, FileLayout::Evaluate, config);
        let normalizer = MissingValueNormalizer::from_config(config);
        let mut columns: Vec<String> = Vec::new();
        let mut rows = Vec::new();
        let mut errors = Vec::new();

        for row in parser.rows() {
            let normalized = row.and_then(|row| {
                let values = normalizer.normalize_row(name, &row)?;
                Ok((row, values))
            });
            match normalized {
                Ok((row, values)) => {
                    for field in &row.fields {
                        if !columns.contains(&field.name) {
                            columns.push(field.name.clone());
                        }
                    }
                    rows.push(EvaluationRow {
                        line: row.line,
                        treatment: row.treatment,
                        values,
                        labels: row.labels,
                    });
                }
                Err(e) => {
                    warn!("{e}");
                    errors.push(e);
                }
            }
        }

        EvaluationTable {
            name: name.to_string(),
            columns,
            rows,
            errors,
        }
    }

    /// Stems with both a simulated (`<stem>S`) and a measured (`<stem>M`)
    /// column, in header order.
    pub fn stems(&self) -> Vec<String> {
        self.columns
            .iter()
            .filter_map(|col| {
                let stem = col.strip_suffix('S').or_else(|| col.strip_suffix('s'))?;
                let measured = format!("{stem}M");
                self.columns
                    .iter()
                    .any(|c| c.eq_ignore_ascii_case(&measured))
                    .then(|| stem.to_string())
            })
            .filter(|stem| !stem.is_empty())
            .collect()
    }

    /// Rows where both halves of `stem` are present.
    pub fn pairs(&self, stem: &str) -> Vec<(TreatmentId, EvaluationPair)> {
        let lookup = |row: &EvaluationRow, suffix: char| {
            let key = format!("{stem}{suffix}");
            row.values
                .iter()
                .find(|(name, _)| name.eq_ignore_ascii_case(&key))
                .and_then(|(_, v)| v.as_f64())
        };
        self.rows
            .iter()
            .filter_map(|row| {
                Some((
                    row.treatment.clone(),
                    EvaluationPair {
                        simulated: lookup(row, 'S')?,
                        observed: lookup(row, 'M')?,
                    },
                ))
            })
            .collect()
    }

    /// Pooled metrics for every stem across all runs.
    pub fn evaluate(&self, engine: &MetricsEngine) -> Vec<Result<MetricsResult, EvalError>> {
        self.stems()
            .into_iter()
            .map(|stem| {
                let pairs: Vec<(f64, f64)> = self
                    .pairs(&stem)
                    .into_iter()
                    .map(|(_, p)| (p.simulated, p.observed))
                    .collect();
                engine.evaluate_pairs(MetricScope::Pooled, &stem, &pairs)
            })
            .collect()
    }
}
