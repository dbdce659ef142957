pub mod reader;
pub mod source;

pub use reader::{DocumentParser, FileReader, ParseServiceClient, ParsedDocument, RoutingParser};
pub use source::{discover, DocumentKind, DocumentTask, SourceConfig};

use sha2::{Digest, Sha256};

/// Generate a stable document ID from file path
pub fn generate_doc_id(path: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(path.as_bytes());
    let result = hasher.finalize();
    hex::encode(&result[..16])
}
