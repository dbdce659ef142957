use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Names extraction services emit when they could not find the patient.
const PLACEHOLDER_NAMES: &[&str] = &[
    "unknown",
    "john doe",
    "jane doe",
    "n/a",
    "na",
    "none",
    "null",
    "sconosciuto",
    "paziente",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SectionType {
    Medications,
    Observations,
    Conditions,
}

impl SectionType {
    pub const ALL: [SectionType; 3] = [
        SectionType::Medications,
        SectionType::Observations,
        SectionType::Conditions,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SectionType::Medications => "medications",
            SectionType::Observations => "observations",
            SectionType::Conditions => "conditions",
        }
    }
}

impl fmt::Display for SectionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PatientIdentity {
    #[serde(default, alias = "paziente", alias = "nome_cognome")]
    pub name: Option<String>,
    #[serde(default, alias = "cf", alias = "codice_fiscale")]
    pub tax_id: Option<String>,
}

impl PatientIdentity {
    /// The "nobody extracted yet" identity. Never a genuine patient.
    pub fn sentinel() -> Self {
        Self::default()
    }

    pub fn new(name: impl Into<String>, tax_id: Option<String>) -> Self {
        Self {
            name: Some(name.into()),
            tax_id,
        }
    }

    /// True when the name is present and is not a known placeholder.
    pub fn has_genuine_name(&self) -> bool {
        match &self.name {
            Some(name) => !is_placeholder_name(name),
            None => false,
        }
    }

    pub fn is_sentinel(&self) -> bool {
        !self.has_genuine_name()
    }
}

pub fn is_placeholder_name(name: &str) -> bool {
    let trimmed = name.trim().to_lowercase();
    trimmed.is_empty() || PLACEHOLDER_NAMES.contains(&trimmed.as_str())
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Observation {
    #[serde(alias = "esame", alias = "parametro", alias = "analisi")]
    pub test_name: String,
    #[serde(alias = "risultato", alias = "valore", deserialize_with = "string_or_number")]
    pub value: String,
    #[serde(default, alias = "unità", alias = "u_m", alias = "um")]
    pub unit: Option<String>,
    #[serde(default, alias = "data", alias = "data_prelievo")]
    pub date: Option<String>,
}

impl Observation {
    pub fn new(test_name: &str, value: &str, unit: Option<&str>, date: Option<&str>) -> Self {
        Self {
            test_name: test_name.to_string(),
            value: value.to_string(),
            unit: unit.map(str::to_string),
            date: date.map(str::to_string),
        }
    }
}

fn default_status() -> String {
    "active".to_string()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Medication {
    #[serde(alias = "medication", alias = "farmaco", alias = "principio_attivo", alias = "terapia")]
    pub name: String,
    #[serde(default, alias = "dosaggio", alias = "posologia", alias = "frequenza")]
    pub dosage: Option<String>,
    #[serde(default, alias = "orario", alias = "tempistica")]
    pub timing: Option<String>,
    #[serde(default = "default_status", alias = "stato")]
    pub status: String,
}

impl Medication {
    pub fn new(name: &str, dosage: Option<&str>) -> Self {
        Self {
            name: name.to_string(),
            dosage: dosage.map(str::to_string),
            timing: None,
            status: default_status(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Condition {
    #[serde(alias = "code", alias = "diagnosi", alias = "patologia", alias = "problema")]
    pub label: String,
    #[serde(default, alias = "insorgenza", alias = "data_diagnosi")]
    pub onset_date: Option<String>,
}

impl Condition {
    pub fn new(label: &str, onset_date: Option<&str>) -> Self {
        Self {
            label: label.to_string(),
            onset_date: onset_date.map(str::to_string),
        }
    }
}

/// One extracted entry, typed by the section it belongs to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum SectionItem {
    Medication(Medication),
    Observation(Observation),
    Condition(Condition),
}

/// Result of one section-extraction sub-task for one document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Fragment {
    pub section_type: SectionType,
    pub items: Vec<SectionItem>,
    pub patient_candidate: Option<PatientIdentity>,
}

impl Fragment {
    /// Degraded result: no items, no identity.
    pub fn empty(section_type: SectionType) -> Self {
        Self {
            section_type,
            items: Vec::new(),
            patient_candidate: None,
        }
    }

    /// Keep only the entries of `section_type` from a raw extraction bundle.
    pub fn from_bundle(section_type: SectionType, bundle: ExtractionBundle) -> Self {
        let items = match section_type {
            SectionType::Medications => bundle
                .medications
                .into_iter()
                .map(SectionItem::Medication)
                .collect(),
            SectionType::Observations => bundle
                .observations
                .into_iter()
                .map(SectionItem::Observation)
                .collect(),
            SectionType::Conditions => bundle
                .conditions
                .into_iter()
                .map(SectionItem::Condition)
                .collect(),
        };

        Self {
            section_type,
            items,
            patient_candidate: bundle.patient,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty() && self.patient_candidate.is_none()
    }
}

/// Shape of structured output returned by the extraction, reconciliation and
/// normalization services. Every field is optional on the wire.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExtractionBundle {
    #[serde(default)]
    pub patient: Option<PatientIdentity>,
    #[serde(default)]
    pub medications: Vec<Medication>,
    #[serde(default)]
    pub observations: Vec<Observation>,
    #[serde(default)]
    pub conditions: Vec<Condition>,
}

/// The consolidated record threaded through the merge stages.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MasterRecord {
    #[serde(default)]
    pub patient: PatientIdentity,
    #[serde(default)]
    pub medications: Vec<Medication>,
    #[serde(default)]
    pub observations: Vec<Observation>,
    #[serde(default)]
    pub conditions: Vec<Condition>,
}

impl MasterRecord {
    pub fn has_clinical_data(&self) -> bool {
        !(self.medications.is_empty() && self.observations.is_empty() && self.conditions.is_empty())
    }

    /// Build a record from a service bundle, keeping `fallback_patient` when
    /// the bundle carries no genuine identity.
    pub fn from_bundle(bundle: ExtractionBundle, fallback_patient: &PatientIdentity) -> Self {
        let patient = match bundle.patient {
            Some(p) if p.has_genuine_name() => p,
            _ => fallback_patient.clone(),
        };

        Self {
            patient,
            medications: bundle.medications,
            observations: bundle.observations,
            conditions: bundle.conditions,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SummaryStatus {
    Complete,
    InsufficientData,
    Error,
}

fn complete_status() -> SummaryStatus {
    SummaryStatus::Complete
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SummaryRecord {
    #[serde(default = "complete_status")]
    pub status: SummaryStatus,
    #[serde(alias = "brief_clinical_snapshot")]
    pub snapshot: String,
    #[serde(default)]
    pub active_medications: Vec<String>,
    #[serde(default)]
    pub key_findings: Vec<String>,
    #[serde(default)]
    pub recent_vitals: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl SummaryRecord {
    pub fn insufficient_data() -> Self {
        Self {
            status: SummaryStatus::InsufficientData,
            snapshot: "Insufficient data: no medications or observations were extracted.".to_string(),
            active_medications: Vec::new(),
            key_findings: Vec::new(),
            recent_vitals: BTreeMap::new(),
            error: None,
        }
    }

    pub fn error_marker(reason: impl Into<String>) -> Self {
        Self {
            status: SummaryStatus::Error,
            snapshot: "Summary unavailable: the summarization service failed.".to_string(),
            active_medications: Vec::new(),
            key_findings: Vec::new(),
            recent_vitals: BTreeMap::new(),
            error: Some(reason.into()),
        }
    }
}

/// Services routinely emit lab values as bare numbers.
fn string_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Text(String),
        Int(i64),
        Float(f64),
        Bool(bool),
    }

    Ok(match Raw::deserialize(deserializer)? {
        Raw::Text(s) => s,
        Raw::Int(n) => n.to_string(),
        Raw::Float(n) => n.to_string(),
        Raw::Bool(b) => b.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_aliases_accepted() {
        let bundle: ExtractionBundle = serde_json::from_str(
            r#"{
                "patient": {"paziente": "ROSSI MARIO", "codice_fiscale": "RSSMRA50A01H501U"},
                "medications": [{"farmaco": "Bisoprololo", "posologia": "1.25mg"}],
                "observations": [{"esame": "Creatinina", "risultato": 1.2, "data": "01/01/2024"}],
                "conditions": [{"diagnosi": "Ipertensione"}]
            }"#,
        )
        .unwrap();

        let patient = bundle.patient.unwrap();
        assert_eq!(patient.name.as_deref(), Some("ROSSI MARIO"));
        assert_eq!(patient.tax_id.as_deref(), Some("RSSMRA50A01H501U"));
        assert_eq!(bundle.medications[0].name, "Bisoprololo");
        assert_eq!(bundle.medications[0].status, "active");
        assert_eq!(bundle.observations[0].value, "1.2");
        assert_eq!(bundle.conditions[0].label, "Ipertensione");
    }

    #[test]
    fn test_placeholder_names() {
        assert!(PatientIdentity::sentinel().is_sentinel());
        assert!(PatientIdentity::new("Unknown", None).is_sentinel());
        assert!(PatientIdentity::new("  ", None).is_sentinel());
        assert!(!PatientIdentity::new("ROSSI MARIO", None).is_sentinel());
    }

    #[test]
    fn test_fragment_keeps_only_its_section() {
        let bundle = ExtractionBundle {
            patient: None,
            medications: vec![Medication::new("Ramipril", None)],
            observations: vec![Observation::new("Glicemia", "98", Some("mg/dL"), None)],
            conditions: vec![],
        };

        let fragment = Fragment::from_bundle(SectionType::Observations, bundle);
        assert_eq!(fragment.items.len(), 1);
        assert!(matches!(fragment.items[0], SectionItem::Observation(_)));
    }
}
