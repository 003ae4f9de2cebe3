pub mod adapters;
pub mod models;
pub mod tokenizer;
pub mod tool_spec;

pub use adapters::{adapter_for, detect, DecodedRequest, ProviderAdapter};
pub use models::{
    CompletionRequest, CompletionResult, MessageRole, MessageVariant, Provider, RequestedToolCall,
    Usage,
};
pub use tool_spec::ToolSpec;
