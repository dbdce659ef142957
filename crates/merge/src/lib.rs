pub mod accumulator;
pub mod consolidate;
pub mod refine;
pub mod synthesis;

pub use accumulator::combine;
pub use consolidate::{conservative_merge, fold_fragments, ConsolidationMerger, FieldOutcome, MergeReport};
pub use refine::{RefineOutcome, RefinementStage};
pub use synthesis::SynthesisStage;
