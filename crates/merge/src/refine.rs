use extract::{with_timeout, MasterRecord, Normalizer, RefinementRules};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RefineOutcome {
    Applied,
    /// Nothing to refine; the normalizer was not called
    Skipped,
    /// Normalizer failed or returned nothing; input kept
    FailOpen,
}

/// Second pass over the consolidated record. Fail-open: whatever goes wrong,
/// previously extracted data is never lost.
pub struct RefinementStage {
    normalizer: Arc<dyn Normalizer>,
    rules: RefinementRules,
    call_timeout: Duration,
}

impl RefinementStage {
    pub fn new(normalizer: Arc<dyn Normalizer>, rules: RefinementRules, call_timeout: Duration) -> Self {
        Self {
            normalizer,
            rules,
            call_timeout,
        }
    }

    pub async fn refine(&self, record: &MasterRecord) -> MasterRecord {
        self.refine_with_outcome(record).await.0
    }

    pub async fn refine_with_outcome(&self, record: &MasterRecord) -> (MasterRecord, RefineOutcome) {
        if !record.has_clinical_data() {
            info!("Record has no clinical data, skipping refinement");
            return (record.clone(), RefineOutcome::Skipped);
        }

        info!("Refining master record");
        let result = with_timeout(self.call_timeout, self.normalizer.normalize(record, &self.rules)).await;

        match result {
            Ok(Some(refined)) => {
                info!(
                    medications_before = record.medications.len(),
                    medications_after = refined.medications.len(),
                    observations_before = record.observations.len(),
                    observations_after = refined.observations.len(),
                    conditions_before = record.conditions.len(),
                    conditions_after = refined.conditions.len(),
                    "Refinement applied"
                );
                (refined, RefineOutcome::Applied)
            }
            Ok(None) => {
                warn!("Normalizer returned no result, keeping consolidated record");
                (record.clone(), RefineOutcome::FailOpen)
            }
            Err(e) => {
                warn!(error = %e, "Refinement failed, keeping consolidated record");
                (record.clone(), RefineOutcome::FailOpen)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use extract::{CapabilityError, Medication, Observation, RuleNormalizer};

    struct BrokenNormalizer {
        empty: bool,
    }

    #[async_trait]
    impl Normalizer for BrokenNormalizer {
        async fn normalize(
            &self,
            _record: &MasterRecord,
            _rules: &RefinementRules,
        ) -> Result<Option<MasterRecord>, CapabilityError> {
            if self.empty {
                Ok(None)
            } else {
                Err(CapabilityError::InvalidOutput("not json".to_string()))
            }
        }
    }

    fn creatinine(date: &str) -> Observation {
        Observation::new("Creatinina", "1.2", Some("mg/dL"), Some(date))
    }

    fn record() -> MasterRecord {
        MasterRecord {
            medications: vec![Medication::new("Ramipril", Some("5mg"))],
            observations: vec![creatinine("2024-01-01"), creatinine("2024-01-01"), creatinine("2024-03-01")],
            ..MasterRecord::default()
        }
    }

    fn stage(normalizer: Arc<dyn Normalizer>) -> RefinementStage {
        RefinementStage::new(normalizer, RefinementRules::default(), Duration::from_secs(30))
    }

    #[tokio::test]
    async fn test_duplicate_creatinine_collapses_across_fragments() {
        let refined = stage(Arc::new(RuleNormalizer::new())).refine(&record()).await;

        assert_eq!(refined.observations, vec![creatinine("2024-01-01"), creatinine("2024-03-01")]);
    }

    #[tokio::test]
    async fn test_failure_returns_input_unchanged() {
        let input = record();
        let (refined, outcome) = stage(Arc::new(BrokenNormalizer { empty: false }))
            .refine_with_outcome(&input)
            .await;

        assert_eq!(refined, input);
        assert_eq!(outcome, RefineOutcome::FailOpen);
    }

    #[tokio::test]
    async fn test_no_result_returns_input_unchanged() {
        let input = record();
        let refined = stage(Arc::new(BrokenNormalizer { empty: true })).refine(&input).await;
        assert_eq!(refined, input);
    }

    #[tokio::test]
    async fn test_empty_record_skips_normalizer() {
        let (refined, outcome) = stage(Arc::new(BrokenNormalizer { empty: false }))
            .refine_with_outcome(&MasterRecord::default())
            .await;

        assert_eq!(refined, MasterRecord::default());
        assert_eq!(outcome, RefineOutcome::Skipped);
    }
}
