use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// One independently toggleable category of patient data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DataCategory {
    #[serde(rename = "viewDiagnosis")]
    Diagnosis,
    #[serde(rename = "viewMedications")]
    Medications,
    #[serde(rename = "viewLabResults")]
    LabResults,
    #[serde(rename = "viewAllergies")]
    Allergies,
    #[serde(rename = "viewFullHistory")]
    FullHistory,
}

impl DataCategory {
    pub const ALL: [DataCategory; 5] = [
        DataCategory::Diagnosis,
        DataCategory::Medications,
        DataCategory::LabResults,
        DataCategory::Allergies,
        DataCategory::FullHistory,
    ];

    pub fn label(&self) -> &'static str {
        match self {
            DataCategory::Diagnosis => "viewDiagnosis",
            DataCategory::Medications => "viewMedications",
            DataCategory::LabResults => "viewLabResults",
            DataCategory::Allergies => "viewAllergies",
            DataCategory::FullHistory => "viewFullHistory",
        }
    }
}

impl fmt::Display for DataCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for DataCategory {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        DataCategory::ALL
            .into_iter()
            .find(|c| c.label() == s)
            .ok_or_else(|| format!("unknown data category: {}", s))
    }
}

/// The set of data categories a consent authorizes.
///
/// `view_full_history` is a superset flag: when set, the other four are
/// ignored and everything is visible.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsentScope {
    pub view_diagnosis: bool,
    pub view_medications: bool,
    pub view_lab_results: bool,
    pub view_allergies: bool,
    pub view_full_history: bool,
}

impl ConsentScope {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn full() -> Self {
        Self {
            view_diagnosis: true,
            view_medications: true,
            view_lab_results: true,
            view_allergies: true,
            view_full_history: true,
        }
    }

    pub fn only(category: DataCategory) -> Self {
        Self::none().with(category)
    }

    pub fn with(mut self, category: DataCategory) -> Self {
        match category {
            DataCategory::Diagnosis => self.view_diagnosis = true,
            DataCategory::Medications => self.view_medications = true,
            DataCategory::LabResults => self.view_lab_results = true,
            DataCategory::Allergies => self.view_allergies = true,
            DataCategory::FullHistory => self.view_full_history = true,
        }
        self
    }

    pub fn flag(&self, category: DataCategory) -> bool {
        match category {
            DataCategory::Diagnosis => self.view_diagnosis,
            DataCategory::Medications => self.view_medications,
            DataCategory::LabResults => self.view_lab_results,
            DataCategory::Allergies => self.view_allergies,
            DataCategory::FullHistory => self.view_full_history,
        }
    }

    pub fn grants_any(&self) -> bool {
        DataCategory::ALL.into_iter().any(|c| self.flag(c))
    }

    pub fn categories(&self) -> Vec<DataCategory> {
        DataCategory::ALL
            .into_iter()
            .filter(|c| self.flag(*c))
            .collect()
    }

    /// See [`satisfies`].
    pub fn satisfies(&self, required: Option<DataCategory>) -> bool {
        satisfies(self, required)
    }
}

/// Whether `scope` covers `required`.
///
/// No required category means the caller only needs some access, which any
/// scope satisfies here; the decision engine layers its unscoped policy on top.
pub fn satisfies(scope: &ConsentScope, required: Option<DataCategory>) -> bool {
    match required {
        None => true,
        Some(_) if scope.view_full_history => true,
        Some(category) => scope.flag(category),
    }
}
