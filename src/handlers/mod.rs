pub mod analyzer;
pub mod prompts;
pub mod request;

pub use analyzer::OrangeAnalyzer;
pub use request::{run_analysis, AnalysisRequest, RequestError};
