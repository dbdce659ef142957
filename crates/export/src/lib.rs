pub mod tabular;
pub mod writer;

pub use tabular::{observation_rows, to_csv, TABULAR_COLUMNS};
pub use writer::{write_outputs, OutputNames, WrittenFiles};

use anyhow::{Context, Result};
use extract::{MasterRecord, PatientIdentity, SummaryRecord};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FormatConfig {
    /// Identity written when no genuine patient was extracted
    pub default_identity: PatientIdentity,
    pub tabular: bool,
    /// Observation values longer than this are narrative, not results
    pub narrative_threshold: usize,
}

impl Default for FormatConfig {
    fn default() -> Self {
        Self {
            default_identity: PatientIdentity::new("UNIDENTIFIED PATIENT", None),
            tabular: true,
            narrative_threshold: 150,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FormattedOutput {
    pub primary_document: String,
    pub tabular_export: Option<String>,
    pub summary_document: Option<String>,
}

/// Serialize the final record (and summary). Pure: nothing touches disk.
pub fn format(
    record: &MasterRecord,
    summary: Option<&SummaryRecord>,
    config: &FormatConfig,
) -> Result<FormattedOutput> {
    let mut record = record.clone();
    if record.patient.is_sentinel() {
        record.patient = config.default_identity.clone();
    }

    let primary_document = serde_json::to_string_pretty(&record)
        .context("Failed to serialize master record")?;

    let tabular_export = if config.tabular {
        Some(to_csv(&record, config.narrative_threshold)?)
    } else {
        None
    };

    let summary_document = summary
        .map(serde_json::to_string_pretty)
        .transpose()
        .context("Failed to serialize summary")?;

    Ok(FormattedOutput {
        primary_document,
        tabular_export,
        summary_document,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use extract::{Medication, Observation};

    #[test]
    fn test_default_identity_replaces_sentinel() {
        let config = FormatConfig::default();
        let output = format(&MasterRecord::default(), None, &config).unwrap();

        let parsed: MasterRecord = serde_json::from_str(&output.primary_document).unwrap();
        assert_eq!(parsed.patient, config.default_identity);
        assert!(output.summary_document.is_none());
    }

    #[test]
    fn test_placeholder_name_counts_as_unset() {
        let record = MasterRecord {
            patient: PatientIdentity::new("Unknown", None),
            ..MasterRecord::default()
        };

        let output = format(&record, None, &FormatConfig::default()).unwrap();
        assert!(output.primary_document.contains("UNIDENTIFIED PATIENT"));
    }

    #[test]
    fn test_genuine_identity_kept() {
        let record = MasterRecord {
            patient: PatientIdentity::new("ROSSI MARIO", Some("RSSMRA50A01H501U".to_string())),
            ..MasterRecord::default()
        };

        let output = format(&record, None, &FormatConfig::default()).unwrap();
        let parsed: MasterRecord = serde_json::from_str(&output.primary_document).unwrap();
        assert_eq!(parsed.patient, record.patient);
    }

    #[test]
    fn test_non_ascii_preserved() {
        let record = MasterRecord {
            medications: vec![Medication::new("Cianocobalamina", Some("1000 µg"))],
            observations: vec![Observation::new("Attività", "normale", None, None)],
            ..MasterRecord::default()
        };

        let output = format(&record, None, &FormatConfig::default()).unwrap();
        assert!(output.primary_document.contains("1000 µg"));
        assert!(output.tabular_export.unwrap().contains("Attività"));
    }

    #[test]
    fn test_tabular_can_be_disabled() {
        let config = FormatConfig {
            tabular: false,
            ..FormatConfig::default()
        };
        let output = format(&MasterRecord::default(), None, &config).unwrap();
        assert!(output.tabular_export.is_none());
    }
}
