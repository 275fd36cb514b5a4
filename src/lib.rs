//! holderscan — extracts quarterly shareholder tables (holder name +
//! holding percentage, grouped by reporting cut-off date) from a listed
//! company's disclosure page, using a text-generation model for the
//! unstructured-to-structured conversion.
//!
//! The pipeline is strictly linear: fetch page → build prompt → invoke
//! model → locate/parse/validate the structured payload. The model's
//! output is untrusted free text with data-dependent keys; recovering a
//! typed result from it is the heart of this crate
//! (`pipeline::extraction`).

pub mod pipeline;

pub use pipeline::extraction::orchestrator::{
    extract, extract_with_options, ShareholderExtractor,
};
pub use pipeline::extraction::prompt::PromptTemplate;
pub use pipeline::extraction::types::{
    CancelToken, ExtractOptions, ExtractionResult, HolderRecord, LlmClient, ModelOptions,
};
pub use pipeline::extraction::ExtractionError;
pub use pipeline::fetch::{HttpPageFetcher, PageFetcher};
