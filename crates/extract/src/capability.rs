//! Contracts for the external services the merge engine depends on.
//!
//! Orchestration only ever talks to these traits, so a model-backed service,
//! a rule engine or a test double can sit behind any of them.

use async_trait::async_trait;

use crate::error::CapabilityError;
use crate::normalizer::RefinementRules;
use crate::schema::{Condition, Fragment, MasterRecord, Medication, SectionType, SummaryRecord};

/// Turns document text into one section's worth of structured entries.
#[async_trait]
pub trait StructuredExtractor: Send + Sync {
    async fn extract(
        &self,
        section: SectionType,
        text: &str,
        identifier: &str,
    ) -> Result<Fragment, CapabilityError>;
}

/// Merges synonym and brand/generic duplicates across documents.
///
/// An empty result is not trusted by callers when the input was non-empty.
#[async_trait]
pub trait SemanticReconciler: Send + Sync {
    async fn reconcile_medications(
        &self,
        raw: &[Medication],
    ) -> Result<Vec<Medication>, CapabilityError>;

    async fn reconcile_conditions(
        &self,
        raw: &[Condition],
    ) -> Result<Vec<Condition>, CapabilityError>;
}

/// Second-pass cleanup of a whole record. `Ok(None)` means "no result".
#[async_trait]
pub trait Normalizer: Send + Sync {
    async fn normalize(
        &self,
        record: &MasterRecord,
        rules: &RefinementRules,
    ) -> Result<Option<MasterRecord>, CapabilityError>;
}

#[async_trait]
pub trait Summarizer: Send + Sync {
    async fn summarize(&self, record: &MasterRecord) -> Result<SummaryRecord, CapabilityError>;
}
