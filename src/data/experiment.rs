use std::collections::BTreeMap;
use std::path::Path;

use log::debug;

use super::loader::read_text;
use super::model::TreatmentId;
use crate::error::EvalError;

/// Experiment metadata from a DSSAT `*.??X` file: used only to label
/// treatments in reports.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Experiment {
    pub code: Option<String>,
    pub title: Option<String>,
    pub treatments: BTreeMap<TreatmentId, String>,
}

impl Experiment {
    pub fn treatment_name(&self, treatment: &TreatmentId) -> Option<&str> {
        self.treatments.get(treatment).map(String::as_str)
    }
}

pub fn load_experiment(path: &Path) -> Result<Experiment, EvalError> {
    Ok(parse_experiment(&read_text(path)?))
}

/// Columns are fixed: treatment number in 0..3, name in 9..36.
pub fn parse_experiment(text: &str) -> Experiment {
    let mut experiment = Experiment::default();
    let mut in_treatments = false;

    for line in text.lines() {
        if let Some(details) = line.split_once("*EXP.DETAILS:").map(|(_, d)| d.trim()) {
            let mut parts = details.splitn(2, char::is_whitespace);
            experiment.code = parts.next().filter(|c| !c.is_empty()).map(str::to_string);
            experiment.title = parts
                .next()
                .map(str::trim)
                .filter(|t| !t.is_empty())
                .map(str::to_string);
            continue;
        }
        if line.starts_with('*') {
            in_treatments = line.to_ascii_uppercase().starts_with("*TREATMENT");
            continue;
        }
        if !in_treatments || !line.starts_with(' ') {
            continue;
        }
        let id = char_slice(line, 0, 3).and_then(TreatmentId::parse);
        let name = char_slice(line, 9, 36).map(str::trim).filter(|n| !n.is_empty());
        if let (Some(id), Some(name)) = (id, name) {
            debug!("treatment {id}: {name}");
            experiment.treatments.insert(id, name.to_string());
        }
    }
    experiment
}

/// Chars `start..end` of `line`, clipped to its length.
fn char_slice(line: &str, start: usize, end: usize) -> Option<&str> {
    let mut indices = line.char_indices().map(|(i, _)| i).chain(std::iter::once(line.len()));
    let from = indices.nth(start)?;
    let to = indices.nth(end - start - 1).unwrap_or(line.len());
    line.get(from..to)
}

#[cfg(test)]
mod tests {
    use super::*;

    const XFILE: &str = "\
*EXP.DETAILS: UFGA7801SB RAINFED AND IRRIGATED SOYBEAN

*GENERAL
@PEOPLE
 Someone

*TREATMENTS                        -------------FACTOR LEVELS------------
@N R O C TNAME.................... CU FL SA IC MP MI MF MR MC MT ME MH SM
 1 1 0 0 IRRIGATED                  1  1  0  1  1  1  1  0  0  0  0  0  1
 2 1 0 0 RAINFED                    1  1  0  1  1  0  1  0  0  0  0  0  1

*CULTIVARS
@C CR INGENO CNAME
 1 SB IB0011 BRAGG
";

    #[test]
    fn reads_title_and_treatment_names() {
        let exp = parse_experiment(XFILE);
        assert_eq!(exp.code.as_deref(), Some("UFGA7801SB"));
        assert_eq!(exp.title.as_deref(), Some("RAINFED AND IRRIGATED SOYBEAN"));
        assert_eq!(exp.treatments.len(), 2);
        assert_eq!(exp.treatment_name(&TreatmentId::Number(1)), Some("IRRIGATED"));
        assert_eq!(exp.treatment_name(&TreatmentId::Number(2)), Some("RAINFED"));
    }

    #[test]
    fn short_lines_are_clipped() {
        assert_eq!(char_slice(" 3 1 0 0 SHORT", 9, 36), Some("SHORT"));
        assert_eq!(char_slice(" 3", 9, 36), None);
        assert_eq!(char_slice(" 3 1", 0, 3), Some(" 3 "));
    }
}
