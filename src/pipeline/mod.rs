pub mod processor; // Report analysis orchestrator
pub mod structuring;

pub use processor::{build_pipeline, AnalysisPipeline, AnalysisReport};
