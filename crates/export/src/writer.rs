use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::fs;

use crate::FormattedOutput;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputNames {
    pub record: String,
    pub tabular: String,
    pub summary: String,
}

impl Default for OutputNames {
    fn default() -> Self {
        Self {
            record: "master_record.json".to_string(),
            tabular: "master_labs.csv".to_string(),
            summary: "summary_record.json".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct WrittenFiles {
    pub paths: Vec<PathBuf>,
}

/// Write every produced document into `dir`, creating it if needed.
pub async fn write_outputs(output: &FormattedOutput, dir: &Path, names: &OutputNames) -> Result<WrittenFiles> {
    fs::create_dir_all(dir)
        .await
        .context(format!("Failed to create output directory: {:?}", dir))?;

    let mut written = WrittenFiles::default();

    let documents = [
        (&names.record, Some(&output.primary_document)),
        (&names.tabular, output.tabular_export.as_ref()),
        (&names.summary, output.summary_document.as_ref()),
    ];

    for (name, content) in documents {
        let Some(content) = content else { continue };
        let path = dir.join(name);
        fs::write(&path, content)
            .await
            .context(format!("Failed to write {:?}", path))?;
        tracing::info!(path = ?path, bytes = content.len(), "Output written");
        written.paths.push(path);
    }

    Ok(written)
}
