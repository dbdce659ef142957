//! Model-backed implementations of the reconciliation, normalization and
//! summarization capabilities.

use async_trait::async_trait;

use crate::capability::{Normalizer, SemanticReconciler, Summarizer};
use crate::error::CapabilityError;
use crate::llm::OllamaClient;
use crate::normalizer::RefinementRules;
use crate::prompt;
use crate::schema::{
    Condition, ExtractionBundle, MasterRecord, Medication, SectionType, SummaryRecord,
};

#[derive(Clone)]
pub struct LlmReconciler {
    llm: OllamaClient,
}

impl LlmReconciler {
    pub fn new(llm: OllamaClient) -> Self {
        Self { llm }
    }

    async fn reconcile(
        &self,
        section: SectionType,
        raw_json: String,
    ) -> Result<ExtractionBundle, CapabilityError> {
        let prompt = prompt::build_reconcile_prompt(section, &raw_json);
        let bundle = self.llm.generate_structured(&prompt).await?;
        Ok(bundle)
    }
}

#[async_trait]
impl SemanticReconciler for LlmReconciler {
    async fn reconcile_medications(
        &self,
        raw: &[Medication],
    ) -> Result<Vec<Medication>, CapabilityError> {
        if raw.is_empty() {
            return Ok(Vec::new());
        }
        let bundle = self
            .reconcile(SectionType::Medications, serde_json::to_string(raw)?)
            .await?;
        Ok(bundle.medications)
    }

    async fn reconcile_conditions(
        &self,
        raw: &[Condition],
    ) -> Result<Vec<Condition>, CapabilityError> {
        if raw.is_empty() {
            return Ok(Vec::new());
        }
        let bundle = self
            .reconcile(SectionType::Conditions, serde_json::to_string(raw)?)
            .await?;
        Ok(bundle.conditions)
    }
}

#[derive(Clone)]
pub struct LlmNormalizer {
    llm: OllamaClient,
}

impl LlmNormalizer {
    pub fn new(llm: OllamaClient) -> Self {
        Self { llm }
    }
}

#[async_trait]
impl Normalizer for LlmNormalizer {
    async fn normalize(
        &self,
        record: &MasterRecord,
        rules: &RefinementRules,
    ) -> Result<Option<MasterRecord>, CapabilityError> {
        let record_json = serde_json::to_string(record)?;
        let prompt = prompt::build_refine_prompt(&rules.instructions(), &record_json);

        let bundle: ExtractionBundle = self.llm.generate_structured(&prompt).await?;
        if bundle == ExtractionBundle::default() {
            return Ok(None);
        }

        Ok(Some(MasterRecord::from_bundle(bundle, &record.patient)))
    }
}

#[derive(Clone)]
pub struct LlmSummarizer {
    llm: OllamaClient,
}

impl LlmSummarizer {
    pub fn new(llm: OllamaClient) -> Self {
        Self { llm }
    }
}

#[async_trait]
impl Summarizer for LlmSummarizer {
    async fn summarize(&self, record: &MasterRecord) -> Result<SummaryRecord, CapabilityError> {
        let record_json = serde_json::to_string(record)?;
        let prompt = prompt::build_summary_prompt(&record_json);

        let summary: SummaryRecord = self.llm.generate_structured(&prompt).await?;
        if summary.snapshot.trim().is_empty() {
            return Err(CapabilityError::EmptyResponse);
        }
        Ok(summary)
    }
}
