use std::io;
use std::path::PathBuf;

use thiserror::Error;

use crate::data::model::TreatmentId;
use crate::metrics::MetricScope;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error reading config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("Failed to parse JSON configuration in {path}: {source}")]
    JsonParse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("Configuration file not found at {path}")]
    NotFound { path: PathBuf },
    #[error("Invalid configuration field '{field}': {message}")]
    Invalid { field: String, message: String },
}

/// Errors raised while ingesting, joining or evaluating crop-model data.
///
/// Every variant carries the file / line / treatment / variable context a
/// status bar needs, so callers can display it without re-deriving anything.
#[derive(Error, Debug)]
pub enum EvalError {
    #[error("{file}:{line}: malformed file{}: {reason}", treatment_suffix(.treatment))]
    MalformedFile {
        file: String,
        line: usize,
        treatment: Option<TreatmentId>,
        reason: String,
    },
    #[error("{file}:{line}: no usable date fields for treatment {treatment}")]
    UnresolvedDate {
        file: String,
        line: usize,
        treatment: TreatmentId,
    },
    #[error("{file}: variable '{variable}' (treatment {treatment}) has no counterpart or alias in the other source")]
    VariableMismatch {
        file: String,
        treatment: TreatmentId,
        variable: String,
    },
    #[error("{statistic} for '{variable}' ({scope}) needs at least {required} samples, got {n}")]
    InsufficientSamples {
        scope: MetricScope,
        variable: String,
        statistic: &'static str,
        n: usize,
        required: usize,
    },
    #[error("cannot join simulated treatment {simulated} with observed treatment {observed}")]
    TreatmentMismatch {
        simulated: TreatmentId,
        observed: TreatmentId,
    },
    #[error("IO error reading data file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl EvalError {
    /// Treatment the error is scoped to, if any. `None` means the whole
    /// block (or file) is affected.
    pub fn treatment(&self) -> Option<&TreatmentId> {
        match self {
            EvalError::MalformedFile { treatment, .. } => treatment.as_ref(),
            EvalError::UnresolvedDate { treatment, .. }
            | EvalError::VariableMismatch { treatment, .. } => Some(treatment),
            EvalError::TreatmentMismatch { simulated, .. } => Some(simulated),
            EvalError::InsufficientSamples { .. } | EvalError::Io { .. } => None,
        }
    }
}

fn treatment_suffix(treatment: &Option<TreatmentId>) -> String {
    match treatment {
        Some(t) => format!(" (treatment {t})"),
        None => String::new(),
    }
}
