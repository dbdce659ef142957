use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::Path;
use tokio::fs;

use crate::source::{DocumentKind, DocumentTask};

/// Text form of one source document. `text` may be empty, never absent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParsedDocument {
    pub identifier: String,
    pub text: String,
}

impl ParsedDocument {
    /// Stand-in used when parsing failed: the branch keeps going with no text.
    pub fn empty(identifier: impl Into<String>) -> Self {
        Self {
            identifier: identifier.into(),
            text: String::new(),
        }
    }
}

/// Converts a document into text.
#[async_trait]
pub trait DocumentParser: Send + Sync {
    async fn parse(&self, task: &DocumentTask) -> Result<ParsedDocument>;
}

/// Reads text-like documents straight from disk.
pub struct FileReader;

impl FileReader {
    pub async fn read_file(path: &Path) -> Result<String> {
        let extension = path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("");

        match DocumentKind::from_extension(extension) {
            DocumentKind::Text => {
                let content = fs::read_to_string(path)
                    .await
                    .context(format!("Failed to read file: {:?}", path))?;
                Ok(content)
            }
            _ => anyhow::bail!("Unsupported file format: {}", extension),
        }
    }
}

#[async_trait]
impl DocumentParser for FileReader {
    async fn parse(&self, task: &DocumentTask) -> Result<ParsedDocument> {
        let text = Self::read_file(Path::new(&task.path_or_uri)).await?;
        Ok(ParsedDocument {
            identifier: task.file_name(),
            text,
        })
    }
}

#[derive(Deserialize)]
struct ParsePage {
    text: String,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum ParseServiceResponse {
    Text { text: String },
    Pages { pages: Vec<ParsePage> },
}

#[derive(Serialize)]
struct RemoteParseRequest<'a> {
    url: &'a str,
    result_type: &'a str,
}

/// Client for a layout-aware parse service that turns PDFs and spreadsheets
/// into markdown.
#[derive(Clone)]
pub struct ParseServiceClient {
    base_url: String,
    client: reqwest::Client,
}

impl ParseServiceClient {
    pub fn new(base_url: String) -> Self {
        Self {
            base_url,
            client: reqwest::Client::new(),
        }
    }

    async fn send(&self, request: reqwest::RequestBuilder) -> Result<String> {
        let response = request
            .send()
            .await
            .context("Failed to send request to parse service")?;

        if !response.status().is_success() {
            anyhow::bail!("Parse service request failed: {}", response.status());
        }

        let parsed: ParseServiceResponse = response
            .json()
            .await
            .context("Failed to parse parse-service response")?;

        // Pages are joined into one clinical text block
        Ok(match parsed {
            ParseServiceResponse::Text { text } => text,
            ParseServiceResponse::Pages { pages } => pages
                .into_iter()
                .map(|p| p.text)
                .collect::<Vec<_>>()
                .join("\n\n"),
        })
    }
}

#[async_trait]
impl DocumentParser for ParseServiceClient {
    async fn parse(&self, task: &DocumentTask) -> Result<ParsedDocument> {
        let url = format!("{}/parse", self.base_url);

        let request = if task.is_remote() {
            self.client.post(&url).json(&RemoteParseRequest {
                url: &task.path_or_uri,
                result_type: "markdown",
            })
        } else {
            let bytes = fs::read(&task.path_or_uri)
                .await
                .context(format!("Failed to read file: {}", task.path_or_uri))?;
            self.client
                .post(&url)
                .query(&[("file_name", task.file_name()), ("result_type", "markdown".to_string())])
                .body(bytes)
        };

        let text = self.send(request).await?;
        Ok(ParsedDocument {
            identifier: task.file_name(),
            text,
        })
    }
}

/// Sends text files to the local reader and everything else to the parse
/// service, when one is configured.
pub struct RoutingParser {
    remote: Option<ParseServiceClient>,
}

impl RoutingParser {
    pub fn new(remote: Option<ParseServiceClient>) -> Self {
        Self { remote }
    }
}

#[async_trait]
impl DocumentParser for RoutingParser {
    async fn parse(&self, task: &DocumentTask) -> Result<ParsedDocument> {
        if task.kind == DocumentKind::Text && !task.is_remote() {
            return FileReader.parse(task).await;
        }

        match &self.remote {
            Some(remote) => remote.parse(task).await,
            None => anyhow::bail!(
                "No parse service configured for {:?} document: {}",
                task.kind,
                task.path_or_uri
            ),
        }
    }
}
