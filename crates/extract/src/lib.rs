pub mod cache;
pub mod capability;
pub mod error;
pub mod llm;
pub mod normalizer;
pub mod prompt;
pub mod retry;
pub mod schema;
pub mod services;

pub use cache::ResponseCache;
pub use capability::{Normalizer, SemanticReconciler, StructuredExtractor, Summarizer};
pub use error::{with_timeout, CapabilityError};
pub use llm::OllamaClient;
pub use normalizer::{EntityNormalizer, RefinementRules, RuleNormalizer, SynonymGroup};
pub use retry::RetryPolicy;
pub use schema::{
    Condition, ExtractionBundle, Fragment, MasterRecord, Medication, Observation,
    PatientIdentity, SectionItem, SectionType, SummaryRecord, SummaryStatus,
};
pub use services::{LlmNormalizer, LlmReconciler, LlmSummarizer};

use anyhow::{Context, Result};
use async_trait::async_trait;

/// Below this many non-blank characters there is nothing worth extracting.
const MIN_CONTENT_CHARS: usize = 10;

pub struct Extractor {
    llm_client: OllamaClient,
}

impl Extractor {
    pub fn new(llm_client: OllamaClient) -> Self {
        Self { llm_client }
    }

    pub fn default() -> Self {
        Self::new(OllamaClient::default())
    }

    /// Extract one section's entries from a document's text
    pub async fn extract_from_text(
        &self,
        section: SectionType,
        text: &str,
        identifier: &str,
    ) -> Result<ExtractionBundle> {
        // Build prompt
        let prompt = prompt::build_extraction_prompt(section, text, identifier);

        // Get JSON response with retry
        let mut result: ExtractionBundle = self.llm_client
            .generate_structured(&prompt)
            .await
            .context(format!("Failed to extract {} from {}", section, identifier))?;

        // Trim stray whitespace the model leaves around names
        for med in &mut result.medications {
            med.name = med.name.trim().to_string();
        }
        for obs in &mut result.observations {
            obs.test_name = obs.test_name.trim().to_string();
            obs.value = obs.value.trim().to_string();
        }
        for condition in &mut result.conditions {
            condition.label = condition.label.trim().to_string();
        }

        Ok(result)
    }
}

#[async_trait]
impl StructuredExtractor for Extractor {
    async fn extract(
        &self,
        section: SectionType,
        text: &str,
        identifier: &str,
    ) -> Result<Fragment, CapabilityError> {
        let content_chars = text.chars().filter(|c| !c.is_whitespace()).count();
        if content_chars < MIN_CONTENT_CHARS {
            tracing::debug!(%section, identifier, "Document text too short, skipping extraction");
            return Ok(Fragment::empty(section));
        }

        let bundle = self.extract_from_text(section, text, identifier).await?;
        Ok(Fragment::from_bundle(section, bundle))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_short_text_skips_service() {
        // Unreachable service: any call would fail
        let client = OllamaClient::new("http://127.0.0.1:9".to_string(), "test".to_string())
            .with_retry(RetryPolicy::none());
        let extractor = Extractor::new(client);

        let fragment = extractor
            .extract(SectionType::Medications, "  p. 1  ", "scan.pdf")
            .await
            .unwrap();

        assert_eq!(fragment, Fragment::empty(SectionType::Medications));
    }

    #[tokio::test]
    async fn test_cached_extraction_builds_fragment() {
        let text = "Terapia: Bisoprololo 1.25mg ore 08:00";
        let prompt = prompt::build_extraction_prompt(SectionType::Medications, text, "lettera.pdf");
        let cache = ResponseCache::new(8);
        cache.set_llm_response(
            &prompt,
            r#"{"patient":{"name":"ROSSI MARIO"},"medications":[{"name":" Bisoprololo ","dosage":"1.25mg","timing":"08:00"}]}"#
                .to_string(),
        );

        let client = OllamaClient::new("http://127.0.0.1:9".to_string(), "test".to_string())
            .with_retry(RetryPolicy::none())
            .with_cache(cache);
        let fragment = Extractor::new(client)
            .extract(SectionType::Medications, text, "lettera.pdf")
            .await
            .unwrap();

        assert_eq!(fragment.items.len(), 1);
        assert!(matches!(&fragment.items[0], SectionItem::Medication(m) if m.name == "Bisoprololo"));
        assert_eq!(
            fragment.patient_candidate.and_then(|p| p.name).as_deref(),
            Some("ROSSI MARIO")
        );
    }
}
