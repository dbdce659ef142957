use extract::{with_timeout, MasterRecord, SummaryRecord, Summarizer};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// Condensed summary of the refined record.
pub struct SynthesisStage {
    summarizer: Arc<dyn Summarizer>,
    call_timeout: Duration,
}

impl SynthesisStage {
    pub fn new(summarizer: Arc<dyn Summarizer>, call_timeout: Duration) -> Self {
        Self {
            summarizer,
            call_timeout,
        }
    }

    /// Never fails: no data gives an "insufficient data" summary, a service
    /// failure gives an error-marker summary.
    pub async fn synthesize(&self, record: &MasterRecord) -> SummaryRecord {
        if record.medications.is_empty() && record.observations.is_empty() {
            info!("No medications or observations, skipping summary");
            return SummaryRecord::insufficient_data();
        }

        info!("Generating clinical summary");
        match with_timeout(self.call_timeout, self.summarizer.summarize(record)).await {
            Ok(summary) => summary,
            Err(e) => {
                warn!(error = %e, "Summarization failed");
                SummaryRecord::error_marker(e.to_string())
            }
        }
    }
}
