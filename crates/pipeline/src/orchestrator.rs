use export::{format, FormatConfig, FormattedOutput};
use extract::{
    Fragment, MasterRecord, Normalizer, RefinementRules, SectionType, SemanticReconciler,
    StructuredExtractor, SummaryRecord, SummaryStatus, Summarizer,
};
use ingest::{DocumentParser, DocumentTask};
use merge::{combine, ConsolidationMerger, RefineOutcome, RefinementStage, SynthesisStage};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{error, info};
use uuid::Uuid;

use crate::branch::BranchExecutor;
use crate::metrics::{Metrics, MetricsSnapshot, TimedOperation};

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("No input documents to process")]
    NoInput,

    #[error("Failed to format output: {0}")]
    Format(#[source] anyhow::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineState {
    FanOutFiles,
    BranchRunning,
    Joined,
    Consolidated,
    Refined,
    Synthesized,
    Formatted,
    Done,
}

impl fmt::Display for PipelineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PipelineState::FanOutFiles => "fan_out_files",
            PipelineState::BranchRunning => "branch_running",
            PipelineState::Joined => "joined",
            PipelineState::Consolidated => "consolidated",
            PipelineState::Refined => "refined",
            PipelineState::Synthesized => "synthesized",
            PipelineState::Formatted => "formatted",
            PipelineState::Done => "done",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Upper bound for every external call (parse, extract, reconcile, ...)
    pub call_timeout_secs: u64,
    pub max_concurrent_branches: usize,
    pub synthesize: bool,
    #[serde(default)]
    pub format: FormatConfig,
    #[serde(default)]
    pub rules: RefinementRules,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            call_timeout_secs: 120,
            max_concurrent_branches: 4,
            synthesize: true,
            format: FormatConfig::default(),
            rules: RefinementRules::default(),
        }
    }
}

impl PipelineConfig {
    pub fn call_timeout(&self) -> Duration {
        Duration::from_secs(self.call_timeout_secs)
    }
}

/// The external services a run depends on.
#[derive(Clone)]
pub struct PipelineComponents {
    pub parser: Arc<dyn DocumentParser>,
    pub extractor: Arc<dyn StructuredExtractor>,
    pub reconciler: Arc<dyn SemanticReconciler>,
    pub normalizer: Arc<dyn Normalizer>,
    pub summarizer: Arc<dyn Summarizer>,
}

#[derive(Debug, Clone)]
pub struct PipelineOutput {
    pub run_id: Uuid,
    pub record: MasterRecord,
    pub summary: Option<SummaryRecord>,
    pub formatted: FormattedOutput,
    pub metrics: MetricsSnapshot,
    /// Every state the run passed through, in order
    pub states: Vec<PipelineState>,
}

/// Reusable across runs; every `run` starts from fresh metrics.
pub struct Orchestrator {
    parser: Arc<dyn DocumentParser>,
    extractor: Arc<dyn StructuredExtractor>,
    merger: ConsolidationMerger,
    refiner: RefinementStage,
    synthesizer: SynthesisStage,
    config: PipelineConfig,
}

impl Orchestrator {
    pub fn new(components: PipelineComponents, config: PipelineConfig) -> Self {
        let call_timeout = config.call_timeout();

        Self {
            parser: components.parser,
            extractor: components.extractor,
            merger: ConsolidationMerger::new(components.reconciler, call_timeout),
            refiner: RefinementStage::new(components.normalizer, config.rules.clone(), call_timeout),
            synthesizer: SynthesisStage::new(components.summarizer, call_timeout),
            config,
        }
    }

    /// Run the whole workflow over `tasks`.
    ///
    /// Only an empty task list (or a serialization failure) is an error;
    /// every service failure degrades to less data.
    pub async fn run(&self, tasks: Vec<DocumentTask>) -> Result<PipelineOutput, PipelineError> {
        if tasks.is_empty() {
            return Err(PipelineError::NoInput);
        }

        let run_id = Uuid::new_v4();
        let metrics = Metrics::new();
        let mut states = Vec::new();
        let mut enter = |state: PipelineState| {
            info!(%run_id, %state, "Pipeline state");
            states.push(state);
        };

        info!(%run_id, documents = tasks.len(), "Starting pipeline run");

        enter(PipelineState::FanOutFiles);
        let timer = TimedOperation::start();
        enter(PipelineState::BranchRunning);
        let fragments = self.fan_out(tasks, &metrics).await;
        metrics.record_fan_out(timer.elapsed());
        enter(PipelineState::Joined);

        let timer = TimedOperation::start();
        let (consolidated, report) = self.merger.consolidate_with_report(&fragments).await;
        metrics.record_consolidate(timer.elapsed());
        for outcome in [report.medications, report.conditions] {
            if outcome.is_fallback() {
                metrics.record_reconciler_fallback();
            }
        }
        enter(PipelineState::Consolidated);

        let timer = TimedOperation::start();
        let (record, outcome) = self.refiner.refine_with_outcome(&consolidated).await;
        metrics.record_refine(timer.elapsed());
        if outcome == RefineOutcome::FailOpen {
            metrics.record_refinement_fail_open();
        }
        enter(PipelineState::Refined);

        let summary = if self.config.synthesize {
            let timer = TimedOperation::start();
            let summary = self.synthesizer.synthesize(&record).await;
            metrics.record_synthesize(timer.elapsed());
            if summary.status == SummaryStatus::Error {
                metrics.record_summary_error();
            }
            enter(PipelineState::Synthesized);
            Some(summary)
        } else {
            None
        };

        let formatted = format(&record, summary.as_ref(), &self.config.format).map_err(PipelineError::Format)?;
        enter(PipelineState::Formatted);

        let metrics = metrics.snapshot();
        enter(PipelineState::Done);

        info!(
            %run_id,
            patient = record.patient.name.as_deref().unwrap_or("-"),
            medications = record.medications.len(),
            observations = record.observations.len(),
            conditions = record.conditions.len(),
            degraded = metrics.degraded(),
            "Pipeline run complete"
        );

        Ok(PipelineOutput {
            run_id,
            record,
            summary,
            formatted,
            metrics,
            states,
        })
    }

    /// One branch per task; waits for all of them. The result is folded in
    /// task order no matter which branch finishes first.
    async fn fan_out(&self, tasks: Vec<DocumentTask>, metrics: &Arc<Metrics>) -> Vec<Fragment> {
        let branch = Arc::new(BranchExecutor::new(
            self.parser.clone(),
            self.extractor.clone(),
            self.config.call_timeout(),
            metrics.clone(),
        ));
        let semaphore = Arc::new(Semaphore::new(self.config.max_concurrent_branches.max(1)));
        let mut branches = JoinSet::new();

        for (index, task) in tasks.iter().cloned().enumerate() {
            let branch = branch.clone();
            let semaphore = semaphore.clone();

            branches.spawn(async move {
                // The semaphore is never closed
                let _permit = semaphore.acquire_owned().await.ok();
                let fragments = branch.execute(&task).await;
                (index, fragments)
            });
        }

        let mut slots: Vec<Option<Vec<Fragment>>> = vec![None; tasks.len()];
        while let Some(joined) = branches.join_next().await {
            match joined {
                Ok((index, fragments)) => slots[index] = Some(fragments),
                Err(e) => {
                    error!(error = %e, "Document branch did not complete");
                    metrics.record_lost_branch();
                }
            }
        }

        let mut accumulated = Vec::new();
        for (task, slot) in tasks.iter().zip(slots) {
            let fragments = slot.unwrap_or_else(|| {
                info!(doc_id = %task.doc_id, "Substituting empty fragments for lost branch");
                SectionType::ALL.iter().map(|s| Fragment::empty(*s)).collect()
            });
            accumulated = combine(accumulated, fragments);
        }

        accumulated
    }
}
