use extract::{
    with_timeout, CapabilityError, Fragment, MasterRecord, PatientIdentity, SectionItem,
    SemanticReconciler,
};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// How a reconciled field got its final value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldOutcome {
    /// Service result used as-is
    Reconciled,
    /// Nothing to reconcile
    EmptyInput,
    /// Service returned nothing for a non-empty input; raw list kept
    EmptyResultFallback,
    /// Service errored or timed out; raw list kept
    FailureFallback,
}

impl FieldOutcome {
    pub fn is_fallback(&self) -> bool {
        matches!(self, FieldOutcome::EmptyResultFallback | FieldOutcome::FailureFallback)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct MergeReport {
    pub fragments: usize,
    pub medications: FieldOutcome,
    pub conditions: FieldOutcome,
}

/// Conservative fallback: a reconciled list is trusted only when non-empty.
/// An empty or failed reconciliation keeps the raw list.
pub fn conservative_merge<T>(raw: Vec<T>, reconciled: Result<Vec<T>, CapabilityError>) -> (Vec<T>, FieldOutcome) {
    if raw.is_empty() {
        return (raw, FieldOutcome::EmptyInput);
    }

    match reconciled {
        Ok(list) if !list.is_empty() => (list, FieldOutcome::Reconciled),
        Ok(_) => (raw, FieldOutcome::EmptyResultFallback),
        Err(e) => {
            warn!(error = %e, "Reconciliation failed, keeping raw list");
            (raw, FieldOutcome::FailureFallback)
        }
    }
}

/// Steps 1–3 of consolidation: resolve the patient and concatenate items.
/// Nothing is reconciled here.
pub fn fold_fragments(fragments: &[Fragment]) -> MasterRecord {
    let mut raw = MasterRecord {
        patient: PatientIdentity::sentinel(),
        ..MasterRecord::default()
    };

    for fragment in fragments {
        if let Some(candidate) = &fragment.patient_candidate {
            // Later, more specific extractions override earlier weak ones
            if candidate.has_genuine_name() {
                raw.patient = candidate.clone();
            }
        }

        for item in &fragment.items {
            match item {
                SectionItem::Medication(m) => raw.medications.push(m.clone()),
                SectionItem::Observation(o) => raw.observations.push(o.clone()),
                SectionItem::Condition(c) => raw.conditions.push(c.clone()),
            }
        }
    }

    raw
}

pub struct ConsolidationMerger {
    reconciler: Arc<dyn SemanticReconciler>,
    call_timeout: Duration,
}

impl ConsolidationMerger {
    pub fn new(reconciler: Arc<dyn SemanticReconciler>, call_timeout: Duration) -> Self {
        Self {
            reconciler,
            call_timeout,
        }
    }

    /// Fold every fragment into one master record. Never fails.
    pub async fn consolidate(&self, fragments: &[Fragment]) -> MasterRecord {
        self.consolidate_with_report(fragments).await.0
    }

    pub async fn consolidate_with_report(&self, fragments: &[Fragment]) -> (MasterRecord, MergeReport) {
        info!(fragments = fragments.len(), "Merging fragments");
        let raw = fold_fragments(fragments);

        debug!(
            medications = raw.medications.len(),
            observations = raw.observations.len(),
            conditions = raw.conditions.len(),
            "Raw lists concatenated"
        );

        // Both reconciliations are independent of each other
        let (meds_result, cond_result) = tokio::join!(
            self.reconcile_medications(&raw),
            self.reconcile_conditions(&raw),
        );

        let MasterRecord {
            patient,
            medications,
            observations,
            conditions,
        } = raw;

        let (medications, meds_outcome) = conservative_merge(medications, meds_result);
        let (conditions, cond_outcome) = conservative_merge(conditions, cond_result);

        info!(
            medications = medications.len(),
            conditions = conditions.len(),
            medications_outcome = ?meds_outcome,
            conditions_outcome = ?cond_outcome,
            "Consolidation complete"
        );

        let record = MasterRecord {
            patient,
            medications,
            observations,
            conditions,
        };

        let report = MergeReport {
            fragments: fragments.len(),
            medications: meds_outcome,
            conditions: cond_outcome,
        };

        (record, report)
    }

    async fn reconcile_medications(&self, raw: &MasterRecord) -> Result<Vec<extract::Medication>, CapabilityError> {
        if raw.medications.is_empty() {
            return Ok(Vec::new());
        }
        with_timeout(self.call_timeout, self.reconciler.reconcile_medications(&raw.medications)).await
    }

    async fn reconcile_conditions(&self, raw: &MasterRecord) -> Result<Vec<extract::Condition>, CapabilityError> {
        if raw.conditions.is_empty() {
            return Ok(Vec::new());
        }
        with_timeout(self.call_timeout, self.reconciler.reconcile_conditions(&raw.conditions)).await
    }
}
