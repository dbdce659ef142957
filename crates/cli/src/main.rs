mod config;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use extract::{
    Extractor, LlmNormalizer, LlmReconciler, LlmSummarizer, Normalizer, OllamaClient,
    ResponseCache, RuleNormalizer,
};
use ingest::{ParseServiceClient, RoutingParser};
use pipeline::{Orchestrator, PipelineComponents};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

use config::{AppConfig, NormalizerKind, OperationMode};

#[derive(Parser)]
#[command(name = "recordfuse")]
#[command(about = "Consolidate a patient's clinical documents into one master record")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Process documents and write the master record
    Run(RunArgs),
}

#[derive(Args, Debug, Default)]
struct RunArgs {
    /// Document path or http(s) URL; repeat for several. Skips the directory scan
    #[arg(long = "input", short = 'i')]
    inputs: Vec<String>,
    /// Directory to scan when no --input is given
    #[arg(long)]
    input_dir: Option<PathBuf>,
    #[arg(long)]
    output_dir: Option<PathBuf>,
    /// JSON configuration file
    #[arg(long)]
    config: Option<PathBuf>,
    #[arg(long, value_enum)]
    mode: Option<OperationMode>,
    /// Skip the clinical summary
    #[arg(long)]
    no_summary: bool,
    /// Skip the CSV lab export
    #[arg(long)]
    no_csv: bool,
    #[arg(long, value_enum)]
    normalizer: Option<NormalizerKind>,
    /// Emit logs as JSON lines
    #[arg(long)]
    log_json: bool,
}

impl RunArgs {
    fn apply_to(&self, config: &mut AppConfig) {
        if let Some(mode) = self.mode {
            config.apply_mode(mode);
        }
        if let Some(dir) = &self.input_dir {
            config.source.input_dir = dir.clone();
        }
        if let Some(dir) = &self.output_dir {
            config.output.dir = dir.clone();
        }
        if let Some(kind) = self.normalizer {
            config.pipeline.normalizer = kind;
        }
        if self.no_summary {
            config.pipeline.synthesize = false;
        }
        if self.no_csv {
            config.output.tabular = false;
        }
    }
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);

    if json {
        subscriber.json().init();
    } else {
        subscriber.init();
    }
}

fn build_components(config: &AppConfig) -> PipelineComponents {
    let mut llm = OllamaClient::new(config.llm.base_url.clone(), config.llm.model.clone())
        .with_retry(config.retry_policy())
        .with_max_concurrency(config.concurrency.max_concurrent_llm_calls);
    if config.cache.enabled {
        llm = llm.with_cache(ResponseCache::new(config.cache.max_entries));
    }

    let remote = config.parser.service_url.clone().map(ParseServiceClient::new);

    let normalizer: Arc<dyn Normalizer> = match config.pipeline.normalizer {
        NormalizerKind::Rules => Arc::new(RuleNormalizer::new()),
        NormalizerKind::Llm => Arc::new(LlmNormalizer::new(llm.clone())),
    };

    PipelineComponents {
        parser: Arc::new(RoutingParser::new(remote)),
        extractor: Arc::new(Extractor::new(llm.clone())),
        reconciler: Arc::new(LlmReconciler::new(llm.clone())),
        normalizer,
        summarizer: Arc::new(LlmSummarizer::new(llm)),
    }
}

async fn run(args: RunArgs) -> Result<()> {
    let mut config = AppConfig::load(args.config.as_deref())?;
    args.apply_to(&mut config);
    config.apply_env();

    info!(
        mode = ?config.mode,
        model = %config.llm.model,
        timeout_secs = config.concurrency.request_timeout_secs,
        normalizer = ?config.pipeline.normalizer,
        "Configuration loaded"
    );

    let tasks = ingest::discover(&args.inputs, &config.source)?;
    info!(documents = tasks.len(), "Documents discovered");

    let orchestrator = Orchestrator::new(build_components(&config), config.pipeline_config());
    let output = orchestrator.run(tasks).await.context("Pipeline could not run")?;

    let written = export::write_outputs(&output.formatted, &config.output.dir, &config.output.names).await?;

    let metrics = serde_json::to_string(&output.metrics)?;
    info!(run_id = %output.run_id, %metrics, "Run metrics");

    let patient = output
        .record
        .patient
        .name
        .as_deref()
        .filter(|_| output.record.patient.has_genuine_name())
        .or(config.output.default_identity.name.as_deref())
        .unwrap_or("-");

    println!("Patient: {}", patient);
    println!(
        "Medications: {}, observations: {}, conditions: {}",
        output.record.medications.len(),
        output.record.observations.len(),
        output.record.conditions.len()
    );
    if output.metrics.degraded() {
        println!("Some documents or services failed; see the log for details.");
    }
    println!("Files written:");
    for path in &written.paths {
        println!("  {}", path.display());
    }

    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Run(args) => {
            init_tracing(args.log_json);
            run(args).await
        }
    }
}
