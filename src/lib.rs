//! Compare DSSAT crop-model output against field observations.
//!
//! Load simulated (`*.OUT`) and observed (`*.??T`) files, align them by
//! treatment, variable, and date, then score agreement with RMSE, R², and
//! Willmott's index of agreement.

pub mod config;
pub mod data;
pub mod error;
pub mod export;
pub mod metrics;
pub mod state;

pub use config::Config;
pub use error::{ConfigError, EvalError};
pub use metrics::{MetricValue, MetricsEngine, MetricsResult};
pub use state::Session;
