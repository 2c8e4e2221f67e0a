pub mod ai_service; // Provider trait + factory
pub mod claude; // Anthropic Messages API
pub mod images;
pub mod openai; // OpenAI chat completions

pub use ai_service::{get_vision_service, FailureKind, Provider, VisionError, VisionService};
pub use claude::ClaudeService;
pub use openai::OpenAIService;
