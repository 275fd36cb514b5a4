//! Page fetch collaborator: a plain GET returning the raw markup. The
//! extraction core only depends on receiving text; retry/backoff policy for
//! the fetch is the caller's business, and fetch failures are surfaced
//! unchanged.

use super::extraction::ExtractionError;

const DEFAULT_FETCH_TIMEOUT_SECS: u64 = 30;

pub trait PageFetcher {
    fn fetch(&self, url: &str) -> Result<String, ExtractionError>;
}

/// HTTP fetcher over a blocking reqwest client.
pub struct HttpPageFetcher {
    client: reqwest::blocking::Client,
}

impl HttpPageFetcher {
    pub fn new(timeout_secs: u64) -> Self {
        let client = reqwest::blocking::Client::builder()
            .timeout(std::time::Duration::from_secs(timeout_secs))
            .build()
            .expect("Failed to create HTTP client");
        Self { client }
    }
}

impl Default for HttpPageFetcher {
    fn default() -> Self {
        Self::new(DEFAULT_FETCH_TIMEOUT_SECS)
    }
}

impl PageFetcher for HttpPageFetcher {
    fn fetch(&self, url: &str) -> Result<String, ExtractionError> {
        let response = self
            .client
            .get(url)
            .send()
            .map_err(|e| ExtractionError::Fetch {
                url: url.to_string(),
                reason: e.to_string(),
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(ExtractionError::Fetch {
                url: url.to_string(),
                reason: format!("HTTP status {status}"),
            });
        }

        response.text().map_err(|e| ExtractionError::Fetch {
            url: url.to_string(),
            reason: format!("body read failed: {e}"),
        })
    }
}

/// Mock fetcher for testing — returns a configured page body.
pub struct MockPageFetcher {
    body: String,
}

impl MockPageFetcher {
    pub fn new(body: &str) -> Self {
        Self {
            body: body.to_string(),
        }
    }
}

impl PageFetcher for MockPageFetcher {
    fn fetch(&self, _url: &str) -> Result<String, ExtractionError> {
        Ok(self.body.clone())
    }
}
