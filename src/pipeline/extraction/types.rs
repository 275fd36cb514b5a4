use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use super::prompt::PromptTemplate;
use super::ExtractionError;

/// One shareholder line: entity name plus holding percentage.
///
/// The percentage stays a string — disclosure pages mix formats ("4.5",
/// "4.50%") and unit interpretation belongs to downstream consumers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HolderRecord {
    pub holder_name: String,
    pub percentage: String,
}

/// Validated output of one extraction run: reporting-period key (opaque,
/// conventionally an ISO date) → shareholder records in page order.
///
/// The set of keys is data-dependent and unknown before parsing, so this is
/// a generic mapping, never a fixed-field struct. Key iteration order is
/// deterministic (sorted) but carries no meaning; record order within a key
/// is preserved from the model's output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(transparent)]
pub struct ExtractionResult {
    pub periods: BTreeMap<String, Vec<HolderRecord>>,
}

impl ExtractionResult {
    pub fn period_count(&self) -> usize {
        self.periods.len()
    }

    pub fn records(&self, period: &str) -> Option<&[HolderRecord]> {
        self.periods.get(period).map(|r| r.as_slice())
    }
}

/// Options passed through to the model invoker.
#[derive(Debug, Clone, Copy)]
pub struct ModelOptions {
    /// 0.0 asks the model for deterministic completions, as far as its
    /// contract allows.
    pub temperature: f32,
    /// Upper bound on completion length, in model tokens.
    pub max_tokens: u32,
}

impl Default for ModelOptions {
    fn default() -> Self {
        Self {
            temperature: 0.0,
            max_tokens: 1024,
        }
    }
}

/// Configuration surface for one extractor instance.
#[derive(Debug, Clone)]
pub struct ExtractOptions {
    pub model: ModelOptions,
    /// Re-invocations allowed on retryable failures (0 = single attempt).
    pub max_retries: u32,
    /// Tolerate trailing commas in the model's JSON. Models frequently echo
    /// the prompt's example shape, which carries them.
    pub lenient_parsing: bool,
    /// Keep reporting periods whose record list is empty instead of failing.
    pub allow_empty_periods: bool,
    /// Bound on model-call latency, enforced at the invoker boundary and
    /// surfaced as `Timeout` when exceeded.
    pub timeout_secs: u64,
    pub template: PromptTemplate,
}

impl Default for ExtractOptions {
    fn default() -> Self {
        Self {
            model: ModelOptions::default(),
            max_retries: 2,
            lenient_parsing: true,
            allow_empty_periods: false,
            timeout_secs: 120,
            template: PromptTemplate::default(),
        }
    }
}

/// Orchestrator phases, logged on each transition. Strictly forward except
/// the Invoking ⇄ Parsing retry loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    Idle,
    Fetching,
    Prompting,
    Invoking,
    Parsing,
    Done,
    Failed,
}

impl PipelineState {
    pub fn as_str(self) -> &'static str {
        match self {
            PipelineState::Idle => "idle",
            PipelineState::Fetching => "fetching",
            PipelineState::Prompting => "prompting",
            PipelineState::Invoking => "invoking",
            PipelineState::Parsing => "parsing",
            PipelineState::Done => "done",
            PipelineState::Failed => "failed",
        }
    }
}

/// Cooperative cancellation flag, checked before each blocking call.
/// Cancelling during the parse phase is a no-op — that work is CPU-bound
/// and fast.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Model invoker abstraction (allows mocking).
pub trait LlmClient {
    fn complete(
        &self,
        prompt: &str,
        options: &ModelOptions,
    ) -> Result<String, ExtractionError>;
}
