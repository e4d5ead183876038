//! Bounded-retry download of the upstream payload.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use casefeed_core::{FetchError, HttpSource, IngestSettings};
use reqwest::Client;

// ============================================================================
// HTTP SOURCE
// ============================================================================

/// [`HttpSource`] backed by a shared reqwest client.
#[derive(Debug, Clone, Default)]
pub struct ReqwestSource {
    client: Client,
}

impl ReqwestSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_client(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl HttpSource for ReqwestSource {
    async fn get_text(&self, url: &str, timeout: Duration) -> Result<String, FetchError> {
        let response = self
            .client
            .get(url)
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| FetchError::Transport {
                url: url.to_string(),
                reason: e.to_string(),
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        response.text().await.map_err(|e| FetchError::Body {
            url: url.to_string(),
            reason: e.to_string(),
        })
    }
}

// ============================================================================
// FETCHER
// ============================================================================

/// Result of a bounded fetch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchOutcome {
    /// An attempt succeeded. `attempts` counts it.
    Body { text: String, attempts: u32 },
    /// Every attempt failed. This is the "no data this cycle" signal.
    Exhausted {
        attempts: u32,
        last_error: Option<FetchError>,
    },
}

impl FetchOutcome {
    pub fn attempts(&self) -> u32 {
        match self {
            FetchOutcome::Body { attempts, .. } | FetchOutcome::Exhausted { attempts, .. } => {
                *attempts
            }
        }
    }

    pub fn is_exhausted(&self) -> bool {
        matches!(self, FetchOutcome::Exhausted { .. })
    }
}

/// Downloads the source URL, retrying immediately on failure.
#[derive(Clone)]
pub struct Fetcher {
    source: Arc<dyn HttpSource>,
    url: String,
    max_attempts: u32,
    timeout: Duration,
}

impl Fetcher {
    pub fn new(
        source: Arc<dyn HttpSource>,
        url: impl Into<String>,
        max_attempts: u32,
        timeout: Duration,
    ) -> Self {
        Self {
            source,
            url: url.into(),
            max_attempts,
            timeout,
        }
    }

    pub fn from_settings(source: Arc<dyn HttpSource>, settings: &IngestSettings) -> Self {
        Self::new(
            source,
            settings.download_url.clone(),
            settings.max_attempts,
            settings.request_timeout(),
        )
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub async fn fetch(&self) -> FetchOutcome {
        self.fetch_from(&self.url, self.max_attempts).await
    }

    /// Try `url` up to `max_attempts` times and stop at the first success.
    ///
    /// Attempt failures are logged and never surface as errors. When the
    /// budget runs out the last failure is returned in
    /// [`FetchOutcome::Exhausted`].
    pub async fn fetch_from(&self, url: &str, max_attempts: u32) -> FetchOutcome {
        let mut last_error = None;

        for attempt in 1..=max_attempts {
            match self.source.get_text(url, self.timeout).await {
                Ok(text) => {
                    tracing::debug!(url, attempt, bytes = text.len(), "Downloaded payload");
                    return FetchOutcome::Body {
                        text,
                        attempts: attempt,
                    };
                }
                Err(e) => {
                    tracing::warn!(url, attempt, max_attempts, error = %e, "Download attempt failed");
                    last_error = Some(e);
                }
            }
        }

        tracing::error!(
            url,
            attempts = max_attempts,
            last_error = ?last_error,
            "All download attempts failed"
        );
        FetchOutcome::Exhausted {
            attempts: max_attempts,
            last_error,
        }
    }
}

impl std::fmt::Debug for Fetcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Fetcher")
            .field("url", &self.url)
            .field("max_attempts", &self.max_attempts)
            .field("timeout", &self.timeout)
            .finish()
    }
}
