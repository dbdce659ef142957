use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use crate::generate_doc_id;

/// Coarse document family, used to route a task to the right parser.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DocumentKind {
    Pdf,
    Spreadsheet,
    Text,
    Other,
}

impl DocumentKind {
    pub fn from_extension(ext: &str) -> Self {
        match ext.to_ascii_lowercase().as_str() {
            "pdf" => DocumentKind::Pdf,
            "xlsx" | "xls" | "ods" => DocumentKind::Spreadsheet,
            "txt" | "md" | "csv" => DocumentKind::Text,
            _ => DocumentKind::Other,
        }
    }

    pub fn from_path(path: &str) -> Self {
        Path::new(path)
            .extension()
            .and_then(|e| e.to_str())
            .map(Self::from_extension)
            .unwrap_or(DocumentKind::Other)
    }
}

/// One discovered source document. Immutable once created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentTask {
    pub doc_id: String,
    pub path_or_uri: String,
    pub kind: DocumentKind,
}

impl DocumentTask {
    pub fn new(path_or_uri: impl Into<String>) -> Self {
        let path_or_uri = path_or_uri.into();
        Self {
            doc_id: generate_doc_id(&path_or_uri),
            kind: DocumentKind::from_path(&path_or_uri),
            path_or_uri,
        }
    }

    pub fn is_remote(&self) -> bool {
        self.path_or_uri.starts_with("http://") || self.path_or_uri.starts_with("https://")
    }

    /// File name portion of the path, used as the document identifier downstream
    pub fn file_name(&self) -> String {
        Path::new(&self.path_or_uri)
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| self.path_or_uri.clone())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SourceConfig {
    pub input_dir: PathBuf,
    pub extensions: Vec<String>,
    pub recursive: bool,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            input_dir: PathBuf::from("data"),
            extensions: ["pdf", "xlsx", "xls", "txt", "md", "csv"]
                .iter()
                .map(|e| e.to_string())
                .collect(),
            recursive: false,
        }
    }
}

/// Enumerate the documents for one run.
///
/// Explicit URIs win and are used exactly as given. Otherwise the configured
/// directory is scanned and files are kept when their extension is in the
/// allow-list. Directory results are sorted by path.
pub fn discover(explicit: &[String], config: &SourceConfig) -> Result<Vec<DocumentTask>> {
    if !explicit.is_empty() {
        return Ok(explicit.iter().map(|uri| DocumentTask::new(uri.as_str())).collect());
    }

    let dir = &config.input_dir;
    if !dir.is_dir() {
        anyhow::bail!("Input directory not found: {:?}", dir);
    }

    let max_depth = if config.recursive { usize::MAX } else { 1 };
    let mut paths = Vec::new();

    for entry in WalkDir::new(dir).max_depth(max_depth).sort_by_file_name() {
        let entry = entry.context(format!("Failed to scan directory: {:?}", dir))?;
        if !entry.file_type().is_file() {
            continue;
        }

        let allowed = entry
            .path()
            .extension()
            .and_then(|e| e.to_str())
            .map(|ext| {
                config
                    .extensions
                    .iter()
                    .any(|allowed| allowed.eq_ignore_ascii_case(ext))
            })
            .unwrap_or(false);

        if allowed {
            paths.push(entry.path().to_string_lossy().to_string());
        }
    }

    paths.sort();
    tracing::debug!(dir = ?dir, documents = paths.len(), "Directory scan complete");

    Ok(paths.into_iter().map(DocumentTask::new).collect())
}
