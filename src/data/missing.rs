use std::collections::BTreeMap;

use thiserror::Error;

use super::loader::RawRow;
use super::model::Value;
use crate::config::Config;
use crate::error::EvalError;

/// Maps the `-99` family of sentinel codes (and empty fields) to
/// [`Value::Absent`].
///
/// Matching is exact: `-99.0` is a sentinel, `-99.01` is data.
#[derive(Debug, Clone)]
pub struct MissingValueNormalizer {
    sentinels: Vec<f64>,
}

/// A token that is neither empty, a sentinel nor a finite number.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("'{0}' is not a number")]
pub struct InvalidToken(pub String);

impl MissingValueNormalizer {
    pub fn new(sentinels: &[f64]) -> Self {
        Self {
            sentinels: sentinels.to_vec(),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(&config.sentinels)
    }

    pub fn is_sentinel(&self, value: f64) -> bool {
        self.sentinels.iter().any(|s| *s == value)
    }

    /// Classify a raw field.
    pub fn normalize_token(&self, token: &str) -> Result<Value, InvalidToken> {
        let token = token.trim();
        if token.is_empty() {
            return Ok(Value::Absent);
        }
        let parsed = token
            .parse::<f64>()
            .ok()
            .filter(|v| v.is_finite())
            .ok_or_else(|| InvalidToken(token.to_string()))?;
        if self.is_sentinel(parsed) {
            Ok(Value::Absent)
        } else {
            Ok(Value::Number(parsed))
        }
    }

    /// Normalize every numeric field of a row. The first unparseable token
    /// fails the row with a line-tagged `MalformedFile`.
    pub fn normalize_row(&self, file: &str, row: &RawRow) -> Result<BTreeMap<String, Value>, EvalError> {
        row.fields
            .iter()
            .map(|field| {
                self.normalize_token(&field.token)
                    .map(|v| (field.name.clone(), v))
                    .map_err(|e| EvalError::MalformedFile {
                        file: file.to_string(),
                        line: row.line,
                        treatment: Some(row.treatment.clone()),
                        reason: format!("column {}: {e}", field.name),
                    })
            })
            .collect()
    }
}

impl Default for MissingValueNormalizer {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sentinel_family_becomes_absent() {
        let n = MissingValueNormalizer::default();
        for token in ["-99", "-99.0", "-99.", "-99.9", "-99.99", "", "   "] {
            assert_eq!(n.normalize_token(token), Ok(Value::Absent), "{token:?}");
        }
    }

    #[test]
    fn near_sentinels_and_zero_are_data() {
        let n = MissingValueNormalizer::default();
        assert_eq!(n.normalize_token("-99.01"), Ok(Value::Number(-99.01)));
        assert_eq!(n.normalize_token("-98"), Ok(Value::Number(-98.0)));
        assert_eq!(n.normalize_token("0"), Ok(Value::Number(0.0)));
    }

    #[test]
    fn garbage_and_non_finite_tokens_fail() {
        let n = MissingValueNormalizer::default();
        assert_eq!(n.normalize_token("abc"), Err(InvalidToken("abc".into())));
        assert!(n.normalize_token("NaN").is_err());
        assert!(n.normalize_token("inf").is_err());
        assert!(n.normalize_token("******").is_err());
        assert_eq!(InvalidToken("abc".into()).to_string(), "'abc' is not a number");
    }

    #[test]
    fn custom_sentinels_replace_defaults() {
        let n = MissingValueNormalizer::new(&[-999.0]);
        assert_eq!(n.normalize_token("-99"), Ok(Value::Number(-99.0)));
        assert_eq!(n.normalize_token("-999"), Ok(Value::Absent));
    }
}
