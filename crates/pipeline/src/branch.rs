use extract::{with_timeout, CapabilityError, Fragment, SectionType, StructuredExtractor};
use ingest::{DocumentParser, DocumentTask, ParsedDocument};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::metrics::Metrics;

/// Processes one document: parse, then extract every section concurrently.
///
/// Never fails. Any parse or extraction problem, a panicking extractor
/// included, degrades to empty text or an empty fragment for that section only.
pub struct BranchExecutor {
    parser: Arc<dyn DocumentParser>,
    extractor: Arc<dyn StructuredExtractor>,
    call_timeout: Duration,
    metrics: Arc<Metrics>,
}

impl BranchExecutor {
    pub fn new(
        parser: Arc<dyn DocumentParser>,
        extractor: Arc<dyn StructuredExtractor>,
        call_timeout: Duration,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            parser,
            extractor,
            call_timeout,
            metrics,
        }
    }

    /// Returns exactly one fragment per section type, in section order.
    pub async fn execute(&self, task: &DocumentTask) -> Vec<Fragment> {
        info!(doc_id = %task.doc_id, path = %task.path_or_uri, "Processing document");

        let parsed = Arc::new(self.parse(task).await);

        // Each section is its own task so a panic stays inside it
        let mut sections = JoinSet::new();
        for (slot, section) in SectionType::ALL.into_iter().enumerate() {
            let extractor = self.extractor.clone();
            let parsed = parsed.clone();
            let metrics = self.metrics.clone();
            let call_timeout = self.call_timeout;

            sections.spawn(async move {
                let fragment = extract_section(extractor.as_ref(), section, &parsed, call_timeout, &metrics).await;
                (slot, fragment)
            });
        }

        let mut slots: Vec<Option<Fragment>> = vec![None; SectionType::ALL.len()];
        while let Some(joined) = sections.join_next().await {
            match joined {
                Ok((slot, fragment)) => slots[slot] = Some(fragment),
                Err(e) => {
                    error!(doc_id = %task.doc_id, error = %e, "Section extraction did not complete");
                    self.metrics.record_extraction_failure();
                }
            }
        }

        let fragments: Vec<Fragment> = SectionType::ALL
            .into_iter()
            .zip(slots)
            .map(|(section, slot)| slot.unwrap_or_else(|| Fragment::empty(section)))
            .collect();
        let items: usize = fragments.iter().map(|f| f.items.len()).sum();
        self.metrics.record_branch(fragments.len(), items);

        debug!(doc_id = %task.doc_id, items, "Branch complete");
        fragments
    }

    async fn parse(&self, task: &DocumentTask) -> ParsedDocument {
        let call = async { self.parser.parse(task).await.map_err(CapabilityError::from) };

        match with_timeout(self.call_timeout, call).await {
            Ok(parsed) => parsed,
            Err(e) => {
                warn!(doc_id = %task.doc_id, path = %task.path_or_uri, error = %e, "Parse failed, continuing with empty text");
                self.metrics.record_parse_failure();
                ParsedDocument::empty(task.file_name())
            }
        }
    }
}

async fn extract_section(
    extractor: &dyn StructuredExtractor,
    section: SectionType,
    parsed: &ParsedDocument,
    call_timeout: Duration,
    metrics: &Metrics,
) -> Fragment {
    let call = extractor.extract(section, &parsed.text, &parsed.identifier);

    match with_timeout(call_timeout, call).await {
        Ok(fragment) if fragment.section_type == section => fragment,
        Ok(fragment) => {
            warn!(
                identifier = %parsed.identifier,
                expected = %section,
                got = %fragment.section_type,
                "Extractor returned the wrong section, discarding"
            );
            metrics.record_extraction_failure();
            Fragment::empty(section)
        }
        Err(e) => {
            warn!(identifier = %parsed.identifier, %section, error = %e, "Extraction failed, using empty fragment");
            metrics.record_extraction_failure();
            Fragment::empty(section)
        }
    }
}
