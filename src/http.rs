//! HTTP client with timeouts and failure classification
//!
//! Requests are made once. Retrying is left to the polling caller, since
//! consumer routers and switches cap concurrent admin sessions.

use crate::config::HttpConfig;
use crate::error::{CollectorError, Result};
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, ACCEPT_LANGUAGE, USER_AGENT};
use reqwest::{Client, StatusCode};
use std::time::Duration;

pub struct HttpClient {
    inner: Client,
}

impl HttpClient {
    /// Build a client with its own empty cookie store
    pub fn new(cfg: &HttpConfig) -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_static("Mozilla/5.0 (Windows NT 10.0; Win64; x64) Chrome/120.0"),
        );
        headers.insert(
            ACCEPT,
            HeaderValue::from_static("text/html,application/xhtml+xml,*/*;q=0.8"),
        );
        headers.insert(ACCEPT_LANGUAGE, HeaderValue::from_static("en-US,en;q=0.9"));

        let client = Client::builder()
            .cookie_store(true)
            .timeout(Duration::from_secs(cfg.timeout))
            .connect_timeout(Duration::from_secs(cfg.connect_timeout))
            .default_headers(headers)
            .build()
            .map_err(|e| CollectorError::Transport(format!("failed to build HTTP client: {e}")))?;

        Ok(Self { inner: client })
    }

    /// GET a page with HTTP Basic credentials and return its body
    pub async fn get_text_basic_auth(
        &self,
        url: &str,
        username: &str,
        password: &str,
    ) -> Result<String> {
        let resp = self
            .inner
            .get(url)
            .basic_auth(username, Some(password))
            .send()
            .await?;

        let status = resp.status();
        if let Some(err) = classify_status(status) {
            return Err(err);
        }

        Ok(resp.text().await?)
    }
}

/// Map a non-success status into the shared taxonomy
fn classify_status(status: StatusCode) -> Option<CollectorError> {
    if status.is_success() {
        None
    } else if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
        Some(CollectorError::Auth(format!("device answered {status}")))
    } else {
        Some(CollectorError::Transport(format!("device answered {status}")))
    }
}
