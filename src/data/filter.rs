use std::collections::BTreeSet;

use super::model::{ParsedFile, SeriesTable, TreatmentId};

// ---------------------------------------------------------------------------
// Selection: which treatments and variables the analyst is looking at
// ---------------------------------------------------------------------------

/// Chosen treatments and variables. An empty set means nothing is selected
/// on that axis, not "no constraint".
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Selection {
    pub treatments: BTreeSet<TreatmentId>,
    /// Upper-cased variable names.
    pub variables: BTreeSet<String>,
}

/// Initialise a [`Selection`] with everything in the given files selected.
pub fn init_selection(files: &[ParsedFile]) -> Selection {
    let mut selection = Selection::default();
    for file in files {
        selection.treatments.extend(file.treatments().cloned());
        selection
            .variables
            .extend(file.variable_names().iter().map(|v| v.to_ascii_uppercase()));
    }
    selection
}

impl Selection {
    pub fn includes_treatment(&self, treatment: &TreatmentId) -> bool {
        self.treatments.contains(treatment)
    }

    pub fn includes_variable(&self, variable: &str) -> bool {
        self.variables.contains(&variable.to_ascii_uppercase())
    }

    pub fn toggle_treatment(&mut self, treatment: &TreatmentId) {
        if !self.treatments.remove(treatment) {
            self.treatments.insert(treatment.clone());
        }
    }

    pub fn toggle_variable(&mut self, variable: &str) {
        let key = variable.to_ascii_uppercase();
        if !self.variables.remove(&key) {
            self.variables.insert(key);
        }
    }

    /// Restrict to exactly these variables.
    pub fn only_variables<'v>(&mut self, variables: impl IntoIterator<Item = &'v str>) {
        self.variables = variables.into_iter().map(|v| v.to_ascii_uppercase()).collect();
    }

    pub fn select_none(&mut self) {
        self.treatments.clear();
        self.variables.clear();
    }
}

/// Tables of `file` whose treatment is selected, in treatment order.
pub fn filtered_tables<'f>(file: &'f ParsedFile, selection: &Selection) -> Vec<&'f SeriesTable> {
    file.tables
        .iter()
        .filter(|(id, _)| selection.includes_treatment(id))
        .map(|(_, table)| table)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::data::loader::parse_series;
    use crate::data::model::Source;

    fn two_treatments() -> ParsedFile {
        let text = "\
TREATMENT 1 : A
@YEAR DOY  LAID
 2001  10   1.0
TREATMENT 2 : B
@YEAR DOY  CWAD
 2001  10   100
";
        parse_series("PlantGro.OUT", text, Source::Simulated, &Config::default(), None)
    }

    #[test]
    fn init_selects_everything() {
        let file = two_treatments();
        let selection = init_selection(std::slice::from_ref(&file));
        assert!(selection.includes_treatment(&TreatmentId::Number(1)));
        assert!(selection.includes_treatment(&TreatmentId::Number(2)));
        assert!(selection.includes_variable("laid"));
        assert!(selection.includes_variable("CWAD"));
        assert_eq!(filtered_tables(&file, &selection).len(), 2);
    }

    #[test]
    fn toggling_and_clearing() {
        let file = two_treatments();
        let mut selection = init_selection(std::slice::from_ref(&file));
        selection.toggle_treatment(&TreatmentId::Number(1));
        let tables = filtered_tables(&file, &selection);
        assert_eq!(tables.len(), 1);
        assert_eq!(tables[0].treatment, TreatmentId::Number(2));

        selection.toggle_variable("cwad");
        assert!(!selection.includes_variable("CWAD"));
        selection.only_variables(["LAID"]);
        assert_eq!(selection.variables.len(), 1);

        selection.select_none();
        assert!(filtered_tables(&file, &selection).is_empty());
    }
}
