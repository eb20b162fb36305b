use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use chrono::NaiveDate;
use serde::Serialize;

use super::temporal::{DateConflict, DateSource};
use crate::error::EvalError;

// ---------------------------------------------------------------------------
// TreatmentId – scope of one independent time series
// ---------------------------------------------------------------------------

/// Treatment identifier as written in the file: usually a number (`TRNO`),
/// occasionally a short code.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(untagged)]
pub enum TreatmentId {
    Number(u32),
    Code(String),
}

impl TreatmentId {
    /// Interpret a raw token. Numeric tokens such as `"1"` or `"1.0"` become
    /// `Number`; anything else non-empty becomes a `Code`.
    pub fn parse(token: &str) -> Option<Self> {
        let token = token.trim();
        if token.is_empty() {
            return None;
        }
        if let Ok(n) = token.parse::<u32>() {
            return Some(TreatmentId::Number(n));
        }
        if let Ok(f) = token.parse::<f64>() {
            if f.fract() == 0.0 && f >= 0.0 && f <= u32::MAX as f64 {
                return Some(TreatmentId::Number(f as u32));
            }
        }
        Some(TreatmentId::Code(token.to_string()))
    }
}

impl fmt::Display for TreatmentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TreatmentId::Number(n) => write!(f, "{n}"),
            TreatmentId::Code(c) => write!(f, "{c}"),
        }
    }
}

// ---------------------------------------------------------------------------
// Value – a single numeric cell
// ---------------------------------------------------------------------------

/// A numeric cell after sentinel normalization. `Absent` is distinct from a
/// genuine zero and never reaches a statistic.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Value {
    Number(f64),
    Absent,
}

impl Value {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Number(v) => Some(*v),
            Value::Absent => None,
        }
    }

    pub fn is_absent(&self) -> bool {
        matches!(self, Value::Absent)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Number(v) => write!(f, "{v}"),
            Value::Absent => write!(f, "<absent>"),
        }
    }
}

// ---------------------------------------------------------------------------
// Variable – column metadata
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ValueKind {
    Continuous,
    IntegerCoded,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Variable {
    pub name: String,
    pub unit: Option<String>,
    pub kind: ValueKind,
}

/// Which side of the comparison a table came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Source {
    Simulated,
    Observed,
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Source::Simulated => write!(f, "simulated"),
            Source::Observed => write!(f, "observed"),
        }
    }
}

// ---------------------------------------------------------------------------
// Record – one resolved row
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    /// 1-based line number in the source file.
    pub line: usize,
    pub treatment: TreatmentId,
    pub date: NaiveDate,
    pub days_after_start: Option<i64>,
    pub date_source: DateSource,
    /// Variable name → value. Every header column is present, absent or not.
    pub values: BTreeMap<String, Value>,
    /// Text columns (crop code, experiment code) kept verbatim.
    pub labels: BTreeMap<String, String>,
}

impl Record {
    /// Case-insensitive value lookup.
    pub fn value(&self, variable: &str) -> Value {
        self.values
            .iter()
            .find(|(name, _)| name.eq_ignore_ascii_case(variable))
            .map(|(_, v)| *v)
            .unwrap_or(Value::Absent)
    }
}

// ---------------------------------------------------------------------------
// SeriesTable – one treatment, one source, sorted by date
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub struct SeriesTable {
    pub source: Source,
    pub treatment: TreatmentId,
    /// Display name from a `TREATMENT n : name` banner, when present.
    pub treatment_name: Option<String>,
    pub variables: Vec<Variable>,
    /// Non-decreasing by `date`; ties keep file order.
    pub records: Vec<Record>,
    pub date_conflicts: Vec<DateConflict>,
}

impl SeriesTable {
    pub fn new(
        source: Source,
        treatment: TreatmentId,
        treatment_name: Option<String>,
        variables: Vec<Variable>,
        mut records: Vec<Record>,
        date_conflicts: Vec<DateConflict>,
    ) -> Self {
        records.sort_by_key(|r| r.date);
        SeriesTable {
            source,
            treatment,
            treatment_name,
            variables,
            records,
            date_conflicts,
        }
    }

    /// Case-insensitive variable lookup.
    pub fn variable(&self, name: &str) -> Option<&Variable> {
        self.variables
            .iter()
            .find(|v| v.name.eq_ignore_ascii_case(name))
    }

    /// Present `(date, value)` points for one variable, in date order.
    pub fn series(&self, variable: &str) -> Vec<(NaiveDate, f64)> {
        self.records
            .iter()
            .filter_map(|r| r.value(variable).as_f64().map(|v| (r.date, v)))
            .collect()
    }

    /// Distinct dates of the table.
    pub fn dates(&self) -> BTreeSet<NaiveDate> {
        self.records.iter().map(|r| r.date).collect()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

// ---------------------------------------------------------------------------
// ParsedFile – everything recovered from one input file
// ---------------------------------------------------------------------------

/// Format hint for the record parser.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FileLayout {
    /// Model output (`*.OUT`): repeating headers, one block per treatment.
    Simulated,
    /// Field measurements (`*.??T`): code row + optional unit row.
    Observed,
    /// End-of-season `EVALUATE.OUT`: paired `<stem>S` / `<stem>M` columns.
    Evaluate,
}

/// The tables that parsed cleanly plus the errors of the blocks that did not.
#[derive(Debug)]
pub struct ParsedFile {
    /// File identity used in error messages (usually the file name).
    pub name: String,
    pub source: Source,
    pub tables: BTreeMap<TreatmentId, SeriesTable>,
    pub errors: Vec<EvalError>,
}

impl ParsedFile {
    pub fn table(&self, treatment: &TreatmentId) -> Option<&SeriesTable> {
        self.tables.get(treatment)
    }

    /// Union of variable names across all treatments, sorted.
    pub fn variable_names(&self) -> BTreeSet<String> {
        self.tables
            .values()
            .flat_map(|t| t.variables.iter().map(|v| v.name.clone()))
            .collect()
    }

    pub fn treatments(&self) -> impl Iterator<Item = &TreatmentId> {
        self.tables.keys()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn treatment_ids_parse_numbers_and_codes() {
        assert_eq!(TreatmentId::parse(" 3 "), Some(TreatmentId::Number(3)));
        assert_eq!(TreatmentId::parse("2.0"), Some(TreatmentId::Number(2)));
        assert_eq!(
            TreatmentId::parse("IRR"),
            Some(TreatmentId::Code("IRR".into()))
        );
        assert_eq!(TreatmentId::parse("  "), None);
    }

    #[test]
    fn absent_is_not_zero() {
        assert_ne!(Value::Absent, Value::Number(0.0));
        assert_eq!(Value::Absent.as_f64(), None);
        assert_eq!(Value::Number(0.0).as_f64(), Some(0.0));
    }
}
