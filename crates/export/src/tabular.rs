use anyhow::{Context, Result};
use extract::{MasterRecord, Observation};
use std::collections::HashSet;
use unicode_segmentation::UnicodeSegmentation;

pub const TABULAR_COLUMNS: [&str; 4] = ["test_name", "value", "unit", "date"];

fn comparable(name: &str) -> String {
    name.trim().to_uppercase()
}

/// Observations that belong in the tabular export, in record order.
///
/// Skipped: values longer than `narrative_threshold` graphemes (report
/// paragraphs), and names that are exactly a medication name (therapy sheet
/// metadata leaking into the lab table).
pub fn observation_rows(record: &MasterRecord, narrative_threshold: usize) -> Vec<&Observation> {
    let med_names: HashSet<String> = record.medications.iter().map(|m| comparable(&m.name)).collect();

    record
        .observations
        .iter()
        .filter(|obs| !med_names.contains(&comparable(&obs.test_name)))
        .filter(|obs| obs.value.graphemes(true).count() <= narrative_threshold)
        .collect()
}

pub fn to_csv(record: &MasterRecord, narrative_threshold: usize) -> Result<String> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    writer.write_record(TABULAR_COLUMNS)?;

    let rows = observation_rows(record, narrative_threshold);
    for obs in &rows {
        writer.write_record([
            obs.test_name.as_str(),
            obs.value.as_str(),
            obs.unit.as_deref().unwrap_or(""),
            obs.date.as_deref().unwrap_or(""),
        ])?;
    }

    tracing::debug!(
        rows = rows.len(),
        skipped = record.observations.len() - rows.len(),
        "Tabular export built"
    );

    let bytes = writer
        .into_inner()
        .map_err(|e| anyhow::anyhow!("Failed to flush CSV writer: {}", e))?;
    String::from_utf8(bytes).context("CSV export is not valid UTF-8")
}
