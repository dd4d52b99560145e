//! Transfers with bounded retry.
//!
//! HTTP(S) goes through `reqwest`; `ftp://` URLs go through the passive-mode
//! client in [`crate::ftp`]. Only transient failures are retried.

use std::future::Future;
use std::time::Duration;

use reqwest::{Client, StatusCode};
use tracing::{debug, instrument, warn};
use url::Url;

use scriptorium_shared::{NetworkError, RepositoryConfig, Result, ScriptoriumError};

use crate::ftp;

const USER_AGENT: &str = concat!("Scriptorium/", env!("CARGO_PKG_VERSION"));

// ---------------------------------------------------------------------------
// Backoff
// ---------------------------------------------------------------------------

/// Exponential backoff state. `attempt` is 1-based.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backoff {
    pub attempt: u32,
    pub delay: Duration,
    pub max_delay: Duration,
    pub max_attempts: u32,
}

impl Backoff {
    pub fn new(initial: Duration, max_delay: Duration, max_attempts: u32) -> Self {
        Self {
            attempt: 1,
            delay: initial,
            max_delay,
            max_attempts: max_attempts.max(1),
        }
    }

    /// The state for the next attempt, or `None` once the ceiling is reached.
    pub fn advance(self) -> Option<Self> {
        if self.attempt >= self.max_attempts {
            return None;
        }
        Some(Self {
            attempt: self.attempt + 1,
            delay: (self.delay * 2).min(self.max_delay),
            ..self
        })
    }
}

/// Run `op` until it succeeds, fails permanently, or attempts run out.
pub async fn with_retry<T, F, Fut>(backoff: Backoff, mut op: F) -> Result<T>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut state = backoff;
    loop {
        match op(state.attempt).await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_transient() => match state.advance() {
                Some(next) => {
                    warn!(attempt = state.attempt, delay_ms = state.delay.as_millis() as u64, error = %e, "transient failure, retrying");
                    tokio::time::sleep(state.delay).await;
                    state = next;
                }
                None => return Err(e),
            },
            Err(e) => return Err(e),
        }
    }
}

// ---------------------------------------------------------------------------
// TransferClient
// ---------------------------------------------------------------------------

/// Fetches whole resources by URL.
#[derive(Debug, Clone)]
pub struct TransferClient {
    http: Client,
    timeout: Duration,
    backoff: Backoff,
}

impl TransferClient {
    pub fn new(config: &RepositoryConfig) -> Result<Self> {
        let http = Client::builder()
            .user_agent(USER_AGENT)
            .redirect(reqwest::redirect::Policy::limited(5))
            .timeout(config.timeout)
            .build()
            .map_err(|e| NetworkError::Protocol(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            http,
            timeout: config.timeout,
            backoff: Backoff::new(config.initial_backoff, config.max_backoff, config.max_attempts),
        })
    }

    /// Fetch `url`, retrying transient failures.
    #[instrument(skip_all, fields(url = %url))]
    pub async fn fetch(&self, url: &Url) -> Result<Vec<u8>> {
        let bytes = with_retry(self.backoff, |attempt| {
            debug!(attempt, "fetching");
            self.fetch_once(url)
        })
        .await?;
        debug!(bytes = bytes.len(), "fetched");
        Ok(bytes)
    }

    async fn fetch_once(&self, url: &Url) -> Result<Vec<u8>> {
        match url.scheme() {
            "ftp" => ftp::retrieve(url, self.timeout).await,
            "http" | "https" => self.fetch_http(url).await,
            other => Err(NetworkError::Protocol(format!("unsupported scheme '{other}'")).into()),
        }
    }

    async fn fetch_http(&self, url: &Url) -> Result<Vec<u8>> {
        let response = self
            .http
            .get(url.as_str())
            .send()
            .await
            .map_err(|e| classify_reqwest(url, &e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(classify_status(url, status).into());
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| classify_reqwest(url, &e))?;
        Ok(body.to_vec())
    }
}

fn classify_status(url: &Url, status: StatusCode) -> NetworkError {
    match status {
        StatusCode::NOT_FOUND | StatusCode::GONE => NetworkError::NotFound(url.to_string()),
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
            NetworkError::AuthFailed(format!("{url}: HTTP {status}"))
        }
        _ => NetworkError::Http {
            status: status.as_u16(),
            url: url.to_string(),
        },
    }
}

fn classify_reqwest(url: &Url, e: &reqwest::Error) -> ScriptoriumError {
    let error = if e.is_timeout() {
        NetworkError::Timeout(url.to_string())
    } else if e.is_connect() {
        NetworkError::ConnectionRefused(format!("{url}: {e}"))
    } else if let Some(status) = e.status() {
        classify_status(url, status)
    } else if e.is_body() || e.is_request() {
        NetworkError::ConnectionReset(format!("{url}: {e}"))
    } else {
        NetworkError::Protocol(format!("{url}: {e}"))
    };
    error.into()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn fast_config() -> RepositoryConfig {
        let mut config = RepositoryConfig::with_root(std::env::temp_dir());
        config.initial_backoff = Duration::from_millis(5);
        config.max_backoff = Duration::from_millis(20);
        config.max_attempts = 3;
        config
    }

    #[test]
    fn backoff_doubles_up_to_cap() {
        let b = Backoff::new(Duration::from_millis(100), Duration::from_millis(300), 4);
        let b2 = b.advance().unwrap();
        assert_eq!(b2.attempt, 2);
        assert_eq!(b2.delay, Duration::from_millis(200));
        let b3 = b2.advance().unwrap();
        assert_eq!(b3.delay, Duration::from_millis(300));
        let b4 = b3.advance().unwrap();
        assert_eq!(b4.attempt, 4);
        assert!(b4.advance().is_none());
    }

    #[tokio::test]
    async fn retry_stops_on_permanent_errors() {
        let calls = AtomicU32::new(0);
        let backoff = Backoff::new(Duration::from_millis(1), Duration::from_millis(1), 5);
        let result: Result<()> = with_retry(backoff, |_| {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(NetworkError::NotFound("x".into()).into()) }
        })
        .await;
        assert!(result.unwrap_err().is_not_found());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn retry_gives_up_after_max_attempts() {
        let calls = AtomicU32::new(0);
        let backoff = Backoff::new(Duration::from_millis(1), Duration::from_millis(2), 3);
        let result: Result<()> = with_retry(backoff, |_| {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(NetworkError::Timeout("x".into()).into()) }
        })
        .await;
        assert!(result.unwrap_err().is_transient());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn transient_http_errors_are_retried() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/mods.d.tar.gz"))
            .respond_with(ResponseTemplate::new(503))
            .up_to_n_times(2)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/mods.d.tar.gz"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"payload".to_vec()))
            .mount(&server)
            .await;

        let client = TransferClient::new(&fast_config()).unwrap();
        let url = Url::parse(&format!("{}/mods.d.tar.gz", server.uri())).unwrap();
        let body = client.fetch(&url).await.unwrap();
        assert_eq!(body, b"payload");
    }

    #[tokio::test]
    async fn auth_failures_are_not_retried() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/private.zip"))
            .respond_with(ResponseTemplate::new(401))
            .expect(1)
            .mount(&server)
            .await;

        let client = TransferClient::new(&fast_config()).unwrap();
        let url = Url::parse(&format!("{}/private.zip", server.uri())).unwrap();
        let err = client.fetch(&url).await.unwrap_err();
        assert!(matches!(
            err,
            ScriptoriumError::Network(NetworkError::AuthFailed(_))
        ));
    }

    #[tokio::test]
    async fn missing_resources_are_not_found() {
        let server = MockServer::start().await;
        let client = TransferClient::new(&fast_config()).unwrap();
        let url = Url::parse(&format!("{}/nothing.zip", server.uri())).unwrap();
        let err = client.fetch(&url).await.unwrap_err();
        assert!(err.is_not_found());
    }
}
