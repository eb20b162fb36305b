use std::fmt;

use serde::{Serialize, Serializer};

use crate::config::Config;
use crate::data::harmonize::{JoinedSample, JoinedSeries};
use crate::data::model::TreatmentId;
use crate::error::EvalError;

// ---------------------------------------------------------------------------
// MetricValue – a statistic or an explicit "not defined here"
// ---------------------------------------------------------------------------

/// Outcome of one statistic. `Undefined` is a valid result (zero variance,
/// zero denominator, too few points), never NaN and never an error.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MetricValue {
    Value(f64),
    Undefined,
}

impl MetricValue {
    pub fn value(&self) -> Option<f64> {
        match self {
            MetricValue::Value(v) => Some(*v),
            MetricValue::Undefined => None,
        }
    }

    pub fn is_undefined(&self) -> bool {
        matches!(self, MetricValue::Undefined)
    }
}

impl fmt::Display for MetricValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MetricValue::Value(v) => write!(f, "{v:.4}"),
            MetricValue::Undefined => write!(f, "N/A"),
        }
    }
}

/// Serialized as a number, or `null` when undefined.
impl Serialize for MetricValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            MetricValue::Value(v) => serializer.serialize_f64(*v),
            MetricValue::Undefined => serializer.serialize_none(),
        }
    }
}

// ---------------------------------------------------------------------------
// MetricsResult
// ---------------------------------------------------------------------------

/// What a set of samples covers: one treatment, or an explicit pool.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricScope {
    Treatment(TreatmentId),
    Pooled,
}

impl fmt::Display for MetricScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MetricScope::Treatment(t) => write!(f, "treatment {t}"),
            MetricScope::Pooled => write!(f, "pooled"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricsResult {
    pub scope: MetricScope,
    pub variable: String,
    pub n: usize,
    pub rmse: MetricValue,
    pub r_squared: MetricValue,
    pub d_stat: MetricValue,
}

// ---------------------------------------------------------------------------
// MetricsEngine
// ---------------------------------------------------------------------------

/// Agreement statistics over matched simulated/observed pairs.
///
/// Works on one scope per call. Pooling across treatments is a separate,
/// explicit call over the concatenated samples, never an average of
/// per-treatment results.
#[derive(Debug, Clone)]
pub struct MetricsEngine {
    min_samples: usize,
}

impl Default for MetricsEngine {
    fn default() -> Self {
        Self::new(1)
    }
}

impl MetricsEngine {
    /// `min_samples` is clamped to at least 1.
    pub fn new(min_samples: usize) -> Self {
        Self {
            min_samples: min_samples.max(1),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(config.min_samples)
    }

    /// Metrics for one joined treatment/variable series.
    pub fn evaluate(&self, series: &JoinedSeries) -> Result<MetricsResult, EvalError> {
        self.evaluate_samples(
            MetricScope::Treatment(series.treatment.clone()),
            &series.variable,
            &series.samples,
        )
    }

    /// Metrics for `variable` over the samples of every treatment at once.
    /// Series of other variables are ignored.
    pub fn evaluate_pooled(&self, variable: &str, series: &[JoinedSeries]) -> Result<MetricsResult, EvalError> {
        let samples: Vec<JoinedSample> = series
            .iter()
            .filter(|s| s.variable.eq_ignore_ascii_case(variable))
            .flat_map(|s| s.samples.iter().cloned())
            .collect();
        self.evaluate_samples(MetricScope::Pooled, variable, &samples)
    }

    pub fn evaluate_samples(
        &self,
        scope: MetricScope,
        variable: &str,
        samples: &[JoinedSample],
    ) -> Result<MetricsResult, EvalError> {
        let pairs: Vec<(f64, f64)> = samples.iter().map(|s| (s.simulated, s.observed)).collect();
        self.evaluate_pairs(scope, variable, &pairs)
    }

    /// Core computation over `(simulated, observed)` pairs.
    pub fn evaluate_pairs(
        &self,
        scope: MetricScope,
        variable: &str,
        pairs: &[(f64, f64)],
    ) -> Result<MetricsResult, EvalError> {
        if pairs.len() < self.min_samples {
            return Err(EvalError::InsufficientSamples {
                scope,
                variable: variable.to_string(),
                statistic: "RMSE",
                n: pairs.len(),
                required: self.min_samples,
            });
        }
        Ok(MetricsResult {
            scope,
            variable: variable.to_string(),
            n: pairs.len(),
            rmse: MetricValue::Value(rmse(pairs)),
            r_squared: r_squared(pairs),
            d_stat: d_stat(pairs),
        })
    }
}

// ---------------------------------------------------------------------------
// Statistics
// ---------------------------------------------------------------------------

fn mean(values: impl ExactSizeIterator<Item = f64>) -> f64 {
    let n = values.len() as f64;
    values.sum::<f64>() / n
}

fn all_equal(values: impl Iterator<Item = f64>) -> bool {
    let mut values = values;
    match values.next() {
        Some(first) => values.all(|v| v == first),
        None => true,
    }
}

/// sqrt(mean((sim - obs)^2)). Caller guarantees a non-empty slice.
pub fn rmse(pairs: &[(f64, f64)]) -> f64 {
    let mse = pairs.iter().map(|(s, o)| (s - o).powi(2)).sum::<f64>() / pairs.len() as f64;
    mse.sqrt()
}

/// Squared Pearson correlation. Undefined for n < 2 or a constant series.
pub fn r_squared(pairs: &[(f64, f64)]) -> MetricValue {
    if pairs.len() < 2
        || all_equal(pairs.iter().map(|p| p.0))
        || all_equal(pairs.iter().map(|p| p.1))
    {
        return MetricValue::Undefined;
    }
    let mean_s = mean(pairs.iter().map(|p| p.0));
    let mean_o = mean(pairs.iter().map(|p| p.1));
    let (mut sxy, mut sxx, mut syy) = (0.0, 0.0, 0.0);
    for (s, o) in pairs {
        let ds = s - mean_s;
        let d_o = o - mean_o;
        sxy += ds * d_o;
        sxx += ds * ds;
        syy += d_o * d_o;
    }
    let denom = sxx * syy;
    if denom == 0.0 {
        return MetricValue::Undefined;
    }
    MetricValue::Value((sxy * sxy / denom).min(1.0))
}

/// Willmott's index of agreement:
/// `1 - Σ(s - o)² / Σ(|s - ō| + |o - ō|)²`.
///
/// Undefined when the observed values are all identical or the denominator
/// is zero.
pub fn d_stat(pairs: &[(f64, f64)]) -> MetricValue {
    if pairs.is_empty() || all_equal(pairs.iter().map(|p| p.1)) {
        return MetricValue::Undefined;
    }
    let mean_o = mean(pairs.iter().map(|p| p.1));
    let (mut num, mut den) = (0.0, 0.0);
    for (s, o) in pairs {
        num += (s - o).powi(2);
        den += ((s - mean_o).abs() + (o - mean_o).abs()).powi(2);
    }
    if den == 0.0 {
        return MetricValue::Undefined;
    }
    MetricValue::Value(1.0 - num / den)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use chrono::NaiveDate;

    fn series(treatment: u32, pairs: &[(f64, f64)]) -> JoinedSeries {
        let samples = pairs
            .iter()
            .enumerate()
            .map(|(i, &(simulated, observed))| JoinedSample {
                treatment: TreatmentId::Number(treatment),
                variable: "LAID".into(),
                date: NaiveDate::from_yo_opt(2001, i as u32 + 1).unwrap(),
                simulated,
                observed,
            })
            .collect();
        JoinedSeries {
            treatment: TreatmentId::Number(treatment),
            variable: "LAID".into(),
            observed_variable: Some("LAID".into()),
            samples,
        }
    }

    #[test]
    fn two_point_scenario() {
        let result = MetricsEngine::default()
            .evaluate(&series(1, &[(10.0, 9.0), (12.0, 13.0)]))
            .unwrap();
        assert_eq!(result.n, 2);
        assert_eq!(result.scope, MetricScope::Treatment(TreatmentId::Number(1)));
        assert_relative_eq!(result.rmse.value().unwrap(), 1.0);
        assert_relative_eq!(result.r_squared.value().unwrap(), 1.0);
        assert_relative_eq!(result.d_stat.value().unwrap(), 1.0 - 2.0 / 18.0, epsilon = 1e-12);
    }

    #[test]
    fn rmse_is_zero_only_for_perfect_agreement() {
        assert_eq!(rmse(&[(1.0, 1.0), (2.5, 2.5)]), 0.0);
        assert!(rmse(&[(1.0, 1.0), (2.5, 2.4)]) > 0.0);
        assert!(rmse(&[(-3.0, 4.0)]) >= 0.0);
    }

    #[test]
    fn identical_observations_make_r2_and_d_undefined() {
        let pairs = [(1.0, 5.0), (2.0, 5.0), (3.0, 5.0)];
        assert_eq!(r_squared(&pairs), MetricValue::Undefined);
        assert_eq!(d_stat(&pairs), MetricValue::Undefined);

        let perfect_constant = [(5.0, 5.0), (5.0, 5.0)];
        assert_eq!(d_stat(&perfect_constant), MetricValue::Undefined);
        assert_eq!(rmse(&perfect_constant), 0.0);
    }

    #[test]
    fn single_point_r2_is_undefined_not_error() {
        let result = MetricsEngine::default()
            .evaluate_pairs(MetricScope::Pooled, "LAID", &[(2.0, 1.0)])
            .unwrap();
        assert_eq!(result.r_squared, MetricValue::Undefined);
        assert_eq!(result.d_stat, MetricValue::Undefined);
        assert_relative_eq!(result.rmse.value().unwrap(), 1.0);
    }

    #[test]
    fn constant_simulation_r2_undefined_but_d_defined() {
        let pairs = [(4.0, 1.0), (4.0, 3.0)];
        assert_eq!(r_squared(&pairs), MetricValue::Undefined);
        // mean(obs) = 2; num = 9 + 1; den = (2 + 1)^2 + (2 + 1)^2
        assert_relative_eq!(d_stat(&pairs).value().unwrap(), 1.0 - 10.0 / 18.0);
    }

    #[test]
    fn d_stat_is_bounded() {
        let pairs = [(0.0, 10.0), (20.0, 1.0), (3.0, 7.0), (15.0, 2.0)];
        let d = d_stat(&pairs).value().unwrap();
        assert!((0.0..=1.0).contains(&d), "{d}");
    }

    #[test]
    fn empty_and_short_sets_are_insufficient() {
        let err = MetricsEngine::default()
            .evaluate(&series(3, &[]))
            .unwrap_err();
        assert!(matches!(
            err,
            EvalError::InsufficientSamples { n: 0, required: 1, .. }
        ));

        let strict = MetricsEngine::new(3);
        assert!(strict.evaluate(&series(3, &[(1.0, 1.0), (2.0, 2.0)])).is_err());
        assert!(strict
            .evaluate(&series(3, &[(1.0, 1.0), (2.0, 2.0), (3.0, 3.5)]))
            .is_ok());
    }

    #[test]
    fn pooled_uses_concatenated_samples() {
        let a = series(1, &[(1.0, 2.0), (2.0, 2.0)]);
        let b = series(2, &[(3.0, 1.0)]);
        let engine = MetricsEngine::default();
        let pooled = engine.evaluate_pooled("laid", &[a.clone(), b.clone()]).unwrap();
        assert_eq!(pooled.scope, MetricScope::Pooled);
        assert_eq!(pooled.n, 3);
        // sqrt((1 + 0 + 4) / 3), not the mean of per-treatment RMSEs.
        assert_relative_eq!(pooled.rmse.value().unwrap(), (5.0f64 / 3.0).sqrt());
        let per_a = engine.evaluate(&a).unwrap().rmse.value().unwrap();
        let per_b = engine.evaluate(&b).unwrap().rmse.value().unwrap();
        assert!((pooled.rmse.value().unwrap() - (per_a + per_b) / 2.0).abs() > 1e-6);
    }

    #[test]
    fn undefined_serializes_as_null() {
        let json = serde_json::to_string(&[MetricValue::Value(0.5), MetricValue::Undefined]).unwrap();
        assert_eq!(json, "[0.5,null]");
    }
}
