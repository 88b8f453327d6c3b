pub mod config;
pub mod directive;
pub mod error;
pub mod llm;
pub mod provider;
pub mod tool_registry;
pub mod types;

pub use config::AppConfig;
pub use directive::{parse_directive, Directive};
pub use error::BotError;
pub use llm::{ChatBackend, OpenAiChat, Summarizer};
pub use tool_registry::{Tool, ToolRegistry};
pub use types::{ExecutionResult, Failure, TraceEntry};
