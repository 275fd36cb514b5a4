pub mod types;
pub mod prompt;
pub mod llm;
pub mod span;
pub mod parser;
pub mod validate;
pub mod orchestrator;

pub use types::*;
pub use prompt::*;
pub use llm::*;
pub use span::*;
pub use parser::*;
pub use validate::*;
pub use orchestrator::*;

use thiserror::Error;

/// Everything that can go wrong in one extraction run.
///
/// Boundary errors (`Fetch`, `Transport`, `RateLimited`, `Timeout`) are
/// surfaced unchanged from the collaborator that produced them. Content
/// errors (`MalformedResponse`, `SchemaViolation`) are eligible for the
/// orchestrator's bounded retry loop before being surfaced.
#[derive(Error, Debug)]
pub enum ExtractionError {
    #[error("page fetch failed for {url}: {reason}")]
    Fetch { url: String, reason: String },

    #[error("model transport failure: {0}")]
    Transport(String),

    #[error("model endpoint rate limited: {0}")]
    RateLimited(String),

    #[error("model call timed out after {0}s")]
    Timeout(u64),

    #[error("no content to build a prompt from")]
    EmptyInput,

    #[error("rendered prompt too large ({0} characters)")]
    InputTooLarge(usize),

    #[error("malformed model response: {0}")]
    MalformedResponse(String),

    #[error("schema violation at {path}: {reason}")]
    SchemaViolation { path: String, reason: String },

    #[error("run cancelled by caller")]
    Cancelled,

    #[error("configuration error: {0}")]
    Config(String),
}
