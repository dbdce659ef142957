pub mod branch;
pub mod metrics;
pub mod orchestrator;

pub use branch::BranchExecutor;
pub use metrics::{Metrics, MetricsSnapshot, TimedOperation};
pub use orchestrator::{
    Orchestrator, PipelineComponents, PipelineConfig, PipelineError, PipelineOutput, PipelineState,
};
