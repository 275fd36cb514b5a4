use std::time::Duration;

use crate::pipeline::fetch::{HttpPageFetcher, PageFetcher};

use super::llm::OpenAiClient;
use super::parser::parse_model_response;
use super::types::{CancelToken, ExtractOptions, ExtractionResult, LlmClient, PipelineState};
use super::ExtractionError;

/// Base delay before re-attempting after a rate-limit response.
const RATE_LIMIT_BACKOFF: Duration = Duration::from_millis(500);

/// How much of a failing raw response to keep in the diagnostic log.
const RAW_RESPONSE_LOG_LIMIT: usize = 600;

/// Sequences one extraction run:
/// fetch → build prompt → invoke model → locate/parse/validate.
///
/// Owns no mutable state beyond the per-run attempt counter; a run either
/// yields a complete validated result or fails with a typed error, never a
/// partial commit. Runs share nothing, so callers extracting many pages may
/// use one extractor per ticker concurrently without locking.
pub struct ShareholderExtractor {
    fetcher: Box<dyn PageFetcher + Send + Sync>,
    llm: Box<dyn LlmClient + Send + Sync>,
    options: ExtractOptions,
}

impl ShareholderExtractor {
    pub fn new(
        fetcher: Box<dyn PageFetcher + Send + Sync>,
        llm: Box<dyn LlmClient + Send + Sync>,
    ) -> Self {
        Self::with_options(fetcher, llm, ExtractOptions::default())
    }

    pub fn with_options(
        fetcher: Box<dyn PageFetcher + Send + Sync>,
        llm: Box<dyn LlmClient + Send + Sync>,
        options: ExtractOptions,
    ) -> Self {
        Self {
            fetcher,
            llm,
            options,
        }
    }

    /// Run the pipeline without external cancellation.
    pub fn extract(&self, url: &str) -> Result<ExtractionResult, ExtractionError> {
        self.extract_cancellable(url, &CancelToken::new())
    }

    /// Run the pipeline; `cancel` is checked before each blocking call.
    pub fn extract_cancellable(
        &self,
        url: &str,
        cancel: &CancelToken,
    ) -> Result<ExtractionResult, ExtractionError> {
        let _span = tracing::info_span!("extract", url = %url).entered();

        enter(PipelineState::Fetching);
        if cancel.is_cancelled() {
            return self.fail(ExtractionError::Cancelled);
        }
        let page = match self.fetcher.fetch(url) {
            Ok(page) => page,
            Err(e) => return self.fail(e),
        };

        enter(PipelineState::Prompting);
        let prompt = match self.options.template.render(&page) {
            Ok(prompt) => prompt,
            Err(e) => return self.fail(e),
        };

        match self.invoke_with_retry(&prompt, cancel) {
            Ok(result) => {
                enter(PipelineState::Done);
                tracing::info!(periods = result.period_count(), "extraction complete");
                Ok(result)
            }
            Err(e) => self.fail(e),
        }
    }

    /// The Invoking ⇄ Parsing loop with bounded re-attempts.
    ///
    /// Content failures (malformed or wrong-shaped responses) and
    /// transport-level failures are retried with an unmodified prompt:
    /// at temperature 0 a retry is a hedge against nondeterministic drift,
    /// not a corrective resubmission. Fetch and prompt-build errors never
    /// reach this loop.
    fn invoke_with_retry(
        &self,
        prompt: &str,
        cancel: &CancelToken,
    ) -> Result<ExtractionResult, ExtractionError> {
        let mut last_error: Option<ExtractionError> = None;

        for attempt in 0..=self.options.max_retries {
            if cancel.is_cancelled() {
                return Err(ExtractionError::Cancelled);
            }

            enter(PipelineState::Invoking);
            let response = match self.llm.complete(prompt, &self.options.model) {
                Ok(response) => response,
                Err(e) if is_transport_retryable(&e) && attempt < self.options.max_retries => {
                    tracing::warn!(
                        attempt = attempt + 1,
                        error = %e,
                        "model call failed, retrying"
                    );
                    if matches!(e, ExtractionError::RateLimited(_)) {
                        std::thread::sleep(RATE_LIMIT_BACKOFF * (attempt + 1));
                    }
                    last_error = Some(e);
                    continue;
                }
                Err(e) => return Err(e),
            };

            enter(PipelineState::Parsing);
            match parse_model_response(
                &response,
                self.options.lenient_parsing,
                self.options.allow_empty_periods,
            ) {
                Ok(result) => return Ok(result),
                Err(e) if is_content_retryable(&e) && attempt < self.options.max_retries => {
                    tracing::warn!(
                        attempt = attempt + 1,
                        error = %e,
                        "response failed validation, retrying"
                    );
                    last_error = Some(e);
                    continue;
                }
                Err(e) => {
                    tracing::warn!(
                        error = %e,
                        raw = %truncate(&response, RAW_RESPONSE_LOG_LIMIT),
                        "response failed validation, no retries left"
                    );
                    return Err(e);
                }
            }
        }

        // Unreachable while the final attempt returns directly; kept so the
        // loop stays total if the retry conditions ever change.
        Err(last_error.unwrap_or_else(|| {
            ExtractionError::MalformedResponse("all attempts exhausted".into())
        }))
    }

    fn fail(&self, error: ExtractionError) -> Result<ExtractionResult, ExtractionError> {
        tracing::debug!(state = PipelineState::Failed.as_str(), error = %error, "pipeline state");
        Err(error)
    }
}

/// One-call entry point: fetch `url` and extract with collaborators built
/// from the environment (`HOLDERSCAN_API_KEY` et al) and default options.
pub fn extract(url: &str) -> Result<ExtractionResult, ExtractionError> {
    extract_with_options(url, ExtractOptions::default())
}

/// Same as [`extract`], with an explicit configuration surface. The
/// model-call timeout from the options bounds the client built here.
pub fn extract_with_options(
    url: &str,
    options: ExtractOptions,
) -> Result<ExtractionResult, ExtractionError> {
    let llm = OpenAiClient::from_env(options.timeout_secs)?;
    let extractor = ShareholderExtractor::with_options(
        Box::new(HttpPageFetcher::default()),
        Box::new(llm),
        options,
    );
    extractor.extract(url)
}

fn enter(state: PipelineState) {
    tracing::debug!(state = state.as_str(), "pipeline state");
}

/// Transport-level failures worth re-attempting.
fn is_transport_retryable(e: &ExtractionError) -> bool {
    matches!(
        e,
        ExtractionError::Transport(_)
            | ExtractionError::RateLimited(_)
            | ExtractionError::Timeout(_)
    )
}

/// Content failures worth a fresh model call.
fn is_content_retryable(e: &ExtractionError) -> bool {
    matches!(
        e,
        ExtractionError::MalformedResponse(_) | ExtractionError::SchemaViolation { .. }
    )
}

fn truncate(text: &str, limit: usize) -> &str {
    match text.char_indices().nth(limit) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    use super::*;
    use crate::pipeline::extraction::llm::MockLlmClient;
    use crate::pipeline::extraction::types::ModelOptions;
    use crate::pipeline::fetch::MockPageFetcher;

    /// Model invoker that replays a scripted sequence of outcomes.
    struct ScriptedLlmClient {
        outcomes: Mutex<Vec<Result<String, ExtractionError>>>,
    }

    impl ScriptedLlmClient {
        fn new(mut outcomes: Vec<Result<String, ExtractionError>>) -> Self {
            outcomes.reverse();
            Self {
                outcomes: Mutex::new(outcomes),
            }
        }
    }

    impl LlmClient for ScriptedLlmClient {
        fn complete(
            &self,
            _prompt: &str,
            _options: &ModelOptions,
        ) -> Result<String, ExtractionError> {
            self.outcomes
                .lock()
                .unwrap()
                .pop()
                .expect("script exhausted")
        }
    }

    /// Model invoker that returns malformed text N times, then a valid payload.
    struct FailThenSucceedLlmClient {
        fail_count: usize,
        call_count: AtomicUsize,
        fail_response: String,
        success_response: String,
    }

    impl FailThenSucceedLlmClient {
        fn new(fail_count: usize, fail_response: &str, success_response: &str) -> Self {
            Self {
                fail_count,
                call_count: AtomicUsize::new(0),
                fail_response: fail_response.to_string(),
                success_response: success_response.to_string(),
            }
        }
    }

    impl LlmClient for FailThenSucceedLlmClient {
        fn complete(
            &self,
            _prompt: &str,
            _options: &ModelOptions,
        ) -> Result<String, ExtractionError> {
            let count = self.call_count.fetch_add(1, Ordering::SeqCst);
            if count < self.fail_count {
                Ok(self.fail_response.clone())
            } else {
                Ok(self.success_response.clone())
            }
        }
    }

    fn page() -> &'static str {
        "<html><table>holders</table></html>"
    }

    fn valid_response() -> &'static str {
        "Here: {\"2023-03-31\":[{\"holder_name\":\"a\",\"percentage\":\"50\"},{\"holder_name\":\"b\",\"percentage\":\"30\"}]} Thanks"
    }

    fn extractor_with(llm: Box<dyn LlmClient + Send + Sync>) -> ShareholderExtractor {
        ShareholderExtractor::new(Box::new(MockPageFetcher::new(page())), llm)
    }

    #[test]
    fn full_pipeline_with_prose_wrapped_response() {
        let extractor = extractor_with(Box::new(MockLlmClient::new(valid_response())));
        let result = extractor.extract("http://example.test/holders").unwrap();

        assert_eq!(result.period_count(), 1);
        let records = result.records("2023-03-31").unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].holder_name, "a");
        assert_eq!(records[1].percentage, "30");
    }

    #[test]
    fn two_periods_yield_independent_record_lists() {
        let response = "{\"2023-03-31\":[{\"holder_name\":\"a\",\"percentage\":\"50\"}],\"2023-06-30\":[{\"holder_name\":\"c\",\"percentage\":\"10\"},{\"holder_name\":\"d\",\"percentage\":\"5\"}]}";
        let extractor = extractor_with(Box::new(MockLlmClient::new(response)));
        let result = extractor.extract("http://example.test/holders").unwrap();

        assert_eq!(result.period_count(), 2);
        assert_eq!(result.records("2023-03-31").unwrap().len(), 1);
        assert_eq!(result.records("2023-06-30").unwrap().len(), 2);
    }

    #[test]
    fn retry_recovers_from_malformed_response() {
        let llm = FailThenSucceedLlmClient::new(1, "not json, sorry", valid_response());
        let extractor = extractor_with(Box::new(llm));

        let result = extractor.extract("http://example.test/holders").unwrap();
        assert_eq!(result.records("2023-03-31").unwrap().len(), 2);
    }

    #[test]
    fn retry_exhaustion_surfaces_last_error() {
        let llm = FailThenSucceedLlmClient::new(10, "never valid", valid_response());
        let extractor = extractor_with(Box::new(llm));

        let result = extractor.extract("http://example.test/holders");
        assert!(matches!(result, Err(ExtractionError::MalformedResponse(_))));
    }

    #[test]
    fn zero_retries_fails_on_first_bad_response() {
        let llm = FailThenSucceedLlmClient::new(1, "not json", valid_response());
        let options = ExtractOptions {
            max_retries: 0,
            ..ExtractOptions::default()
        };
        let extractor = ShareholderExtractor::with_options(
            Box::new(MockPageFetcher::new(page())),
            Box::new(llm),
            options,
        );

        let result = extractor.extract("http://example.test/holders");
        assert!(matches!(result, Err(ExtractionError::MalformedResponse(_))));
    }

    #[test]
    fn rate_limit_retried_then_succeeds() {
        let llm = ScriptedLlmClient::new(vec![
            Err(ExtractionError::RateLimited("slow down".into())),
            Ok(valid_response().to_string()),
        ]);
        let extractor = extractor_with(Box::new(llm));

        let result = extractor.extract("http://example.test/holders").unwrap();
        assert_eq!(result.period_count(), 1);
    }

    #[test]
    fn fetch_error_surfaced_unchanged_without_retry() {
        struct FailingPageFetcher;
        impl PageFetcher for FailingPageFetcher {
            fn fetch(&self, url: &str) -> Result<String, ExtractionError> {
                Err(ExtractionError::Fetch {
                    url: url.to_string(),
                    reason: "HTTP status 503".into(),
                })
            }
        }

        let extractor = ShareholderExtractor::new(
            Box::new(FailingPageFetcher),
            Box::new(MockLlmClient::new(valid_response())),
        );

        match extractor.extract("http://example.test/holders") {
            Err(ExtractionError::Fetch { url, reason }) => {
                assert_eq!(url, "http://example.test/holders");
                assert!(reason.contains("503"));
            }
            other => panic!("expected fetch error, got {other:?}"),
        }
    }

    #[test]
    fn empty_page_fails_before_model_call() {
        struct PanickingLlmClient;
        impl LlmClient for PanickingLlmClient {
            fn complete(
                &self,
                _prompt: &str,
                _options: &ModelOptions,
            ) -> Result<String, ExtractionError> {
                panic!("model must not be invoked for an empty page");
            }
        }

        let extractor = ShareholderExtractor::new(
            Box::new(MockPageFetcher::new("  ")),
            Box::new(PanickingLlmClient),
        );

        let result = extractor.extract("http://example.test/holders");
        assert!(matches!(result, Err(ExtractionError::EmptyInput)));
    }

    #[test]
    fn cancelled_token_stops_before_fetch() {
        let extractor = extractor_with(Box::new(MockLlmClient::new(valid_response())));
        let cancel = CancelToken::new();
        cancel.cancel();

        let result = extractor.extract_cancellable("http://example.test/holders", &cancel);
        assert!(matches!(result, Err(ExtractionError::Cancelled)));
    }

    #[test]
    fn cancellation_between_attempts_stops_reinvocation() {
        /// Cancels the shared token during its first call, then fails
        /// with a retryable error — a second invocation must never happen.
        struct CancellingLlmClient {
            cancel: CancelToken,
            call_count: AtomicUsize,
        }

        impl LlmClient for CancellingLlmClient {
            fn complete(
                &self,
                _prompt: &str,
                _options: &ModelOptions,
            ) -> Result<String, ExtractionError> {
                self.cancel.cancel();
                let count = self.call_count.fetch_add(1, Ordering::SeqCst);
                assert_eq!(count, 0, "model must not be re-invoked after cancellation");
                Err(ExtractionError::Transport("connection reset".into()))
            }
        }

        let cancel = CancelToken::new();
        let extractor = extractor_with(Box::new(CancellingLlmClient {
            cancel: cancel.clone(),
            call_count: AtomicUsize::new(0),
        }));

        let result = extractor.extract_cancellable("http://example.test/holders", &cancel);
        assert!(matches!(result, Err(ExtractionError::Cancelled)));
    }

    #[test]
    fn schema_violation_retried_like_malformed() {
        // First response parses but has an empty period; second is valid.
        let llm = FailThenSucceedLlmClient::new(
            1,
            "{\"2023-03-31\":[]}",
            valid_response(),
        );
        let extractor = extractor_with(Box::new(llm));

        let result = extractor.extract("http://example.test/holders").unwrap();
        assert_eq!(result.records("2023-03-31").unwrap().len(), 2);
    }

    #[test]
    fn transport_error_not_retried_when_out_of_attempts() {
        let llm = ScriptedLlmClient::new(vec![Err(ExtractionError::Transport(
            "connection reset".into(),
        ))]);
        let options = ExtractOptions {
            max_retries: 0,
            ..ExtractOptions::default()
        };
        let extractor = ShareholderExtractor::with_options(
            Box::new(MockPageFetcher::new(page())),
            Box::new(llm),
            options,
        );

        let result = extractor.extract("http://example.test/holders");
        assert!(matches!(result, Err(ExtractionError::Transport(_))));
    }
}
