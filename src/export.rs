use std::io::Write;

use serde::Serialize;

use crate::data::harmonize::JoinedSeries;
use crate::metrics::MetricsResult;

// ---------------------------------------------------------------------------
// CSV
// ---------------------------------------------------------------------------

/// Flat CSV row: the scope becomes a string, undefined metrics an empty cell.
#[derive(Serialize)]
struct MetricsRow<'a> {
    variable: &'a str,
    scope: String,
    n: usize,
    rmse: Option<f64>,
    r_squared: Option<f64>,
    d_stat: Option<f64>,
}

impl<'a> From<&'a MetricsResult> for MetricsRow<'a> {
    fn from(r: &'a MetricsResult) -> Self {
        Self {
            variable: &r.variable,
            scope: r.scope.to_string(),
            n: r.n,
            rmse: r.rmse.value(),
            r_squared: r.r_squared.value(),
            d_stat: r.d_stat.value(),
        }
    }
}

pub fn write_metrics_csv<W: Write>(writer: W, results: &[MetricsResult]) -> Result<(), csv::Error> {
    let mut wtr = csv::Writer::from_writer(writer);
    for result in results {
        wtr.serialize(MetricsRow::from(result))?;
    }
    wtr.flush()?;
    Ok(())
}

/// One row per matched pair, with the observed column it came from.
pub fn write_joined_csv<W: Write>(writer: W, series: &[JoinedSeries]) -> Result<(), csv::Error> {
    #[derive(Serialize)]
    struct SampleRow<'a> {
        treatment: String,
        variable: &'a str,
        observed_variable: Option<&'a str>,
        date: String,
        simulated: f64,
        observed: f64,
    }

    let mut wtr = csv::Writer::from_writer(writer);
    for s in series {
        for sample in &s.samples {
            wtr.serialize(SampleRow {
                treatment: sample.treatment.to_string(),
                variable: &sample.variable,
                observed_variable: s.observed_variable.as_deref(),
                date: sample.date.format("%Y-%m-%d").to_string(),
                simulated: sample.simulated,
                observed: sample.observed,
            })?;
        }
    }
    wtr.flush()?;
    Ok(())
}

// ---------------------------------------------------------------------------
// JSON
// ---------------------------------------------------------------------------

pub fn write_metrics_json<W: Write>(writer: W, results: &[MetricsResult]) -> Result<(), serde_json::Error> {
    serde_json::to_writer_pretty(writer, results)
}
