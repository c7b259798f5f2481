//! Remote catalog API connector
//!
//! Speaks the catalog's read-only descriptor API: paged track listings
//! and single-track lookups. Throttling (429) and server errors retry
//! with exponential backoff; other client errors fail fast.

use bridge_traits::http::{HttpClient, HttpMethod, HttpRequest, HttpResponse, RetryPolicy};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, instrument, warn};

use crate::error::{CatalogError, Result};
use crate::types::{CatalogTrack, TracksListResponse};

/// Default number of tracks requested per listing page
pub const DEFAULT_PAGE_SIZE: usize = 100;

/// Request timeout for descriptor calls
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Remote catalog API connector
///
/// # Example
///
/// ```ignore
/// use provider_catalog::connector::CatalogConnector;
///
/// let connector = CatalogConnector::new(http_client, "https://catalog.example.com/v1")
///     .with_access_token(token);
/// let (tracks, next_cursor) = connector.list_tracks(None).await?;
/// ```
pub struct CatalogConnector {
    /// HTTP client for API requests
    http_client: Arc<dyn HttpClient>,
    /// Base URL of the catalog API, without trailing slash
    base_url: String,
    /// Optional bearer token
    access_token: Option<String>,
    /// Backoff behavior for throttled and failed requests
    retry_policy: RetryPolicy,
    /// Page size for listings
    page_size: usize,
}

impl CatalogConnector {
    pub fn new(http_client: Arc<dyn HttpClient>, base_url: impl Into<String>) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self {
            http_client,
            base_url,
            access_token: None,
            retry_policy: RetryPolicy::default(),
            page_size: DEFAULT_PAGE_SIZE,
        }
    }

    pub fn with_access_token(mut self, token: impl Into<String>) -> Self {
        self.access_token = Some(token.into());
        self
    }

    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = policy;
        self
    }

    /// Override the listing page size. Values below 1 are clamped up.
    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    fn request_for(&self, method: HttpMethod, url: String) -> HttpRequest {
        let mut request = HttpRequest::new(method, url)
            .header("Accept", "application/json")
            .timeout(REQUEST_TIMEOUT);
        if let Some(token) = &self.access_token {
            request = request.bearer_token(token);
        }
        request
    }

    /// Execute a GET with retry on throttling, server errors, and
    /// transport failures. Other client errors fail fast.
    #[instrument(skip(self), fields(url = %url))]
    async fn execute_with_retry(&self, url: String) -> Result<HttpResponse> {
        let mut attempt = 0u32;

        loop {
            let request = self.request_for(HttpMethod::Get, url.clone());

            match self.http_client.execute(request).await {
                Ok(response) if response.is_success() => {
                    debug!(status = response.status, "Catalog request succeeded");
                    return Ok(response);
                }
                Ok(response) if response.status == 429 || response.is_server_error() => {
                    attempt += 1;
                    if attempt >= self.retry_policy.max_attempts {
                        warn!(
                            status = response.status,
                            attempts = attempt,
                            "Catalog request exhausted retries"
                        );
                        return Err(CatalogError::ApiError {
                            status_code: response.status,
                            message: format!("request failed after {} attempts", attempt),
                        });
                    }
                    let delay = self.retry_policy.delay_for_attempt(attempt - 1);
                    warn!(
                        status = response.status,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        "Catalog request throttled or failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                Ok(response) => {
                    warn!(status = response.status, "Catalog request failed");
                    return Err(CatalogError::ApiError {
                        status_code: response.status,
                        message: String::from_utf8_lossy(&response.body).to_string(),
                    });
                }
                Err(e) => {
                    attempt += 1;
                    if attempt >= self.retry_policy.max_attempts {
                        warn!(error = %e, attempts = attempt, "Catalog request exhausted retries");
                        return Err(CatalogError::NetworkError(e.to_string()));
                    }
                    let delay = self.retry_policy.delay_for_attempt(attempt - 1);
                    warn!(
                        error = %e,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        "Catalog request failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }

    /// Fetch one page of the track listing.
    ///
    /// # Returns
    ///
    /// The page's tracks and the cursor for the next page, `None` on the
    /// last page.
    #[instrument(skip(self))]
    pub async fn list_tracks(
        &self,
        cursor: Option<&str>,
    ) -> Result<(Vec<CatalogTrack>, Option<String>)> {
        let mut url = format!("{}/tracks?pageSize={}", self.base_url, self.page_size);
        if let Some(token) = cursor {
            url.push_str(&format!("&pageToken={}", urlencoding::encode(token)));
        }

        let response = self.execute_with_retry(url).await?;
        let list: TracksListResponse = serde_json::from_slice(&response.body)
            .map_err(|e| CatalogError::ParseError(format!("tracks list: {}", e)))?;

        debug!(count = list.tracks.len(), "Listed catalog tracks");
        Ok((list.tracks, list.next_page_token))
    }

    /// Fetch one track descriptor by id.
    #[instrument(skip(self), fields(track_id = %track_id))]
    pub async fn get_track(&self, track_id: &str) -> Result<CatalogTrack> {
        let url = format!("{}/tracks/{}", self.base_url, urlencoding::encode(track_id));

        let response = self.execute_with_retry(url).await?;
        serde_json::from_slice(&response.body)
            .map_err(|e| CatalogError::ParseError(format!("track descriptor: {}", e)))
    }

    /// Cheap reachability probe, used to fail a run early when the
    /// catalog is down. Any response counts as reachable; only transport
    /// failures do not, so status-level trouble still goes through the
    /// retrying request path.
    pub async fn ping(&self) -> bool {
        let request = self
            .request_for(HttpMethod::Head, format!("{}/tracks", self.base_url))
            .timeout(Duration::from_secs(5));

        self.http_client.execute(request).await.is_ok()
    }
}

impl std::fmt::Debug for CatalogConnector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CatalogConnector")
            .field("base_url", &self.base_url)
            .field("has_token", &self.access_token.is_some())
            .field("page_size", &self.page_size)
            .finish()
    }
}
