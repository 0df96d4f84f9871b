use std::future::Future;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT_LANGUAGE};
use spider_client::shapes::request::{ReturnFormat, ReturnFormatHandling};
use spider_client::{RequestParams, Spider};
use tracing::{debug, warn};

use crate::error::FetchError;
use crate::settings::Settings;

const BASE_BACKOFF_MS: u64 = 2000;

/// Retrieves the raw HTML of a remote page.
#[async_trait]
pub trait PageFetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<String, FetchError>;
}

/// One failed attempt. `retryable` covers rate limits, 5xx and transport errors.
struct Failure {
    reason: String,
    retryable: bool,
}

impl Failure {
    fn permanent(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
            retryable: false,
        }
    }

    fn transient(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
            retryable: true,
        }
    }
}

fn backoff(attempt: u32) -> Duration {
    Duration::from_millis(BASE_BACKOFF_MS * 2u64.pow(attempt))
}

fn is_transient_status(status: u16) -> bool {
    status == 429 || (500..=599).contains(&status)
}

/// Run `attempt_once` up to `max_retries + 1` times with exponential backoff.
async fn with_retry<F, Fut>(url: &str, max_retries: u32, mut attempt_once: F) -> Result<String, FetchError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<String, Failure>>,
{
    let mut attempt = 0;
    loop {
        let start = Instant::now();
        match attempt_once().await {
            Ok(body) => {
                debug!(url, latency_ms = start.elapsed().as_millis() as u64, "fetched");
                return Ok(body);
            }
            Err(failure) => {
                if !failure.retryable || attempt >= max_retries {
                    return Err(FetchError::new(url, failure.reason));
                }
                let wait = backoff(attempt);
                warn!(
                    "{} on {} (attempt {}/{}), backing off {:.1}s",
                    failure.reason,
                    url,
                    attempt + 1,
                    max_retries,
                    wait.as_secs_f64()
                );
                tokio::time::sleep(wait).await;
                attempt += 1;
            }
        }
    }
}

/// Direct HTTP fetches.
pub struct HttpFetcher {
    client: reqwest::Client,
    max_retries: u32,
}

impl HttpFetcher {
    pub fn new(settings: &Settings) -> anyhow::Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT_LANGUAGE, HeaderValue::from_static("en-US,en;q=0.9"));
        let client = reqwest::Client::builder()
            .user_agent(settings.user_agent.as_str())
            .timeout(Duration::from_secs(settings.timeout_secs))
            .default_headers(headers)
            .build()?;
        Ok(Self {
            client,
            max_retries: settings.max_retries,
        })
    }

    async fn fetch_once(&self, url: &str) -> Result<String, Failure> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| Failure::transient(e.to_string()))?;

        let status = response.status();
        if is_transient_status(status.as_u16()) {
            return Err(Failure::transient(format!("HTTP {}", status)));
        }
        if !status.is_success() {
            return Err(Failure::permanent(format!("HTTP {}", status)));
        }
        response
            .text()
            .await
            .map_err(|e| Failure::transient(e.to_string()))
    }
}

#[async_trait]
impl PageFetcher for HttpFetcher {
    async fn fetch(&self, url: &str) -> Result<String, FetchError> {
        with_retry(url, self.max_retries, || self.fetch_once(url)).await
    }
}

/// Fetches through the Spider scraping API, for when direct requests get blocked.
pub struct SpiderFetcher {
    spider: Spider,
    max_retries: u32,
}

impl SpiderFetcher {
    pub fn new(api_key: String, max_retries: u32) -> anyhow::Result<Self> {
        let spider = Spider::new(Some(api_key))
            .map_err(|e| anyhow::anyhow!("Failed to create Spider client: {}", e))?;
        Ok(Self {
            spider,
            max_retries,
        })
    }

    async fn fetch_once(&self, url: &str) -> Result<String, Failure> {
        let params = RequestParams {
            return_format: Some(ReturnFormatHandling::Single(ReturnFormat::Raw)),
            ..Default::default()
        };

        let value = self
            .spider
            .scrape_url(url, Some(params), "application/json")
            .await
            .map_err(|e| classify_spider_error(e.to_string()))?;

        spider_content(value)
    }
}

fn classify_spider_error(msg: String) -> Failure {
    let transient = ["429", "rate", "500", "502", "503", "timed out"]
        .iter()
        .any(|needle| msg.contains(needle));
    if transient {
        Failure::transient(msg)
    } else {
        Failure::permanent(msg)
    }
}

/// Pull the page body out of a Spider response: a JSON array whose first
/// object carries `content` and the upstream `status`.
fn spider_content(value: serde_json::Value) -> Result<String, Failure> {
    let parsed: serde_json::Value = match value.as_str() {
        Some(s) => serde_json::from_str(s).unwrap_or(value.clone()),
        None => value,
    };
    let first = parsed.as_array().and_then(|arr| arr.first());

    if let Some(status) = first.and_then(|obj| obj.get("status")).and_then(|s| s.as_u64()) {
        if is_transient_status(status as u16) {
            return Err(Failure::transient(format!("upstream HTTP {}", status)));
        }
        if !(200..300).contains(&status) {
            return Err(Failure::permanent(format!("upstream HTTP {}", status)));
        }
    }

    first
        .and_then(|obj| obj.get("content"))
        .and_then(|c| c.as_str())
        .map(str::to_string)
        .ok_or_else(|| Failure::permanent("response had no page content"))
}

#[async_trait]
impl PageFetcher for SpiderFetcher {
    async fn fetch(&self, url: &str) -> Result<String, FetchError> {
        with_retry(url, self.max_retries, || self.fetch_once(url)).await
    }
}

/// In-memory fetcher for tests. Unknown URLs fail like a 404.
#[cfg(test)]
pub mod testing {
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    use super::*;

    #[derive(Default)]
    pub struct StaticFetcher {
        pages: HashMap<String, String>,
        calls: AtomicUsize,
        requested: Mutex<Vec<String>>,
    }

    impl StaticFetcher {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn with_page(mut self, url: &str, html: impl Into<String>) -> Self {
            self.pages.insert(url.to_string(), html.into());
            self
        }

        pub fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }

        pub fn requested(&self) -> Vec<String> {
            self.requested.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl PageFetcher for StaticFetcher {
        async fn fetch(&self, url: &str) -> Result<String, FetchError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.requested.lock().unwrap().push(url.to_string());
            self.pages
                .get(url)
                .cloned()
                .ok_or_else(|| FetchError::new(url, "HTTP 404 Not Found"))
        }
    }
}

// ── Tests ──

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;
    use serde_json::json;

    #[test]
    fn backoff_doubles() {
        assert_eq!(backoff(0), Duration::from_millis(2000));
        assert_eq!(backoff(1), Duration::from_millis(4000));
        assert_eq!(backoff(2), Duration::from_millis(8000));
    }

    #[test]
    fn transient_statuses() {
        assert!(is_transient_status(429));
        assert!(is_transient_status(503));
        assert!(!is_transient_status(404));
        assert!(!is_transient_status(200));
    }

    #[tokio::test(start_paused = true)]
    async fn retries_transient_then_succeeds() {
        let attempts = AtomicU32::new(0);
        let counter = &attempts;
        let body = with_retry("https://x/", 3, || async move {
            if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                Err(Failure::transient("HTTP 503"))
            } else {
                Ok("<html></html>".to_string())
            }
        })
        .await
        .unwrap();
        assert_eq!(body, "<html></html>");
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn permanent_failure_is_not_retried() {
        let attempts = AtomicU32::new(0);
        let counter = &attempts;
        let err = with_retry("https://x/", 3, || async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Err(Failure::permanent("HTTP 404 Not Found"))
        })
        .await
        .unwrap_err();
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
        assert!(err.to_string().contains("404"));
    }

    #[tokio::test(start_paused = true)]
    async fn gives_up_after_max_retries() {
        let attempts = AtomicU32::new(0);
        let counter = &attempts;
        let result = with_retry("https://x/", 2, || async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Err(Failure::transient("HTTP 429"))
        })
        .await;
        assert!(result.is_err());
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn spider_response_shapes() {
        let ok = json!([{ "content": "<html>ok</html>", "status": 200 }]);
        assert_eq!(spider_content(ok).ok().as_deref(), Some("<html>ok</html>"));

        let as_string = json!("[{\"content\":\"<p>x</p>\"}]");
        assert_eq!(spider_content(as_string).ok().as_deref(), Some("<p>x</p>"));

        let limited = json!([{ "content": "", "status": 429 }]);
        assert!(spider_content(limited).is_err_and(|f| f.retryable));

        let blocked = json!([{ "content": "denied", "status": 403 }]);
        assert!(spider_content(blocked).is_err_and(|f| !f.retryable));
    }

    #[test]
    fn spider_errors_classified_by_message() {
        assert!(classify_spider_error("HTTP status client error (429 Too Many Requests)".into()).retryable);
        assert!(classify_spider_error("operation timed out".into()).retryable);
        assert!(!classify_spider_error("HTTP status client error (401 Unauthorized)".into()).retryable);
    }
}
