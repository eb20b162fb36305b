use std::collections::{BTreeMap, BTreeSet};
use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::data::temporal::DateSource;
use crate::error::ConfigError;

/// Runtime settings for parsing and evaluation. Every field has a default so
/// a partial JSON file (or none at all) is valid.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct Config {
    /// Values that mean "no data". Compared exactly.
    pub sentinels: Vec<f64>,
    /// Observed code → simulated code.
    pub aliases: BTreeMap<String, String>,
    /// Order in which date sources are tried for each record.
    pub date_priority: Vec<DateSource>,
    /// Start date used to resolve `DAS` columns.
    pub simulation_start: Option<NaiveDate>,
    /// `YYDDD` years below the pivot are 20YY, the rest 19YY.
    pub two_digit_year_pivot: u32,
    /// Columns kept as text labels instead of numeric variables.
    pub text_columns: Vec<String>,
    /// Minimum matched pairs before any statistic is computed.
    pub min_samples: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            sentinels: vec![-99.0, -99.9, -99.99],
            aliases: BTreeMap::new(),
            date_priority: vec![
                DateSource::CalendarDate,
                DateSource::YearDoy,
                DateSource::DaysAfterStart,
            ],
            simulation_start: None,
            two_digit_year_pivot: 50,
            text_columns: vec!["CR".to_string(), "EXCODE".to_string()],
            min_samples: 1,
        }
    }
}

impl Config {
    /// Load and validate a JSON configuration file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Err(ConfigError::NotFound {
                path: path.to_path_buf(),
            });
        }
        let file = File::open(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Config =
            serde_json::from_reader(BufReader::new(file)).map_err(|source| ConfigError::JsonParse {
                path: path.to_path_buf(),
                source,
            })?;
        config.validate()?;
        log::info!("Loaded configuration from {}", path.display());
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.date_priority.is_empty() {
            return Err(invalid("date_priority", "must list at least one date source"));
        }
        let distinct: BTreeSet<_> = self.date_priority.iter().collect();
        if distinct.len() != self.date_priority.len() {
            return Err(invalid("date_priority", "date sources must not repeat"));
        }
        if let Some(bad) = self.sentinels.iter().find(|s| !s.is_finite()) {
            return Err(invalid("sentinels", &format!("{bad} is not a finite number")));
        }
        if self.two_digit_year_pivot > 99 {
            return Err(invalid("two_digit_year_pivot", "must be between 0 and 99"));
        }
        Ok(())
    }
}

fn invalid(field: &str, message: &str) -> ConfigError {
    ConfigError::Invalid {
        field: field.to_string(),
        message: message.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn partial_json_keeps_defaults() {
        let config: Config = serde_json::from_str(
            r#"{ "aliases": { "LAIX": "LAID" }, "simulation_start": "1978-06-15" }"#,
        )
        .unwrap();
        assert_eq!(config.aliases.get("LAIX").map(String::as_str), Some("LAID"));
        assert_eq!(config.simulation_start, NaiveDate::from_ymd_opt(1978, 6, 15));
        assert_eq!(config.sentinels, Config::default().sentinels);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn date_priority_must_be_non_empty_and_unique() {
        let mut config = Config {
            date_priority: vec![],
            ..Config::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::Invalid { .. })));
        config.date_priority = vec![DateSource::YearDoy, DateSource::YearDoy];
        assert!(matches!(config.validate(), Err(ConfigError::Invalid { .. })));
    }

    #[test]
    fn load_reports_missing_and_broken_files() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope.json");
        assert!(matches!(Config::load(&missing), Err(ConfigError::NotFound { .. })));

        let broken = dir.path().join("broken.json");
        std::fs::File::create(&broken)
            .unwrap()
            .write_all(b"{ not json")
            .unwrap();
        assert!(matches!(Config::load(&broken), Err(ConfigError::JsonParse { .. })));
    }
}
