//! Rate-limited access to the paginated message API.
//!
//! HTTP mechanics sit behind [`Transport`]; [`RateLimitedClient`] layers the
//! retry policy on top:
//! - 429: sleep for the server-specified wait, then repeat the same request
//! - connection failures: exponential backoff, bounded attempts
//! - any other non-2xx: permanent, surfaced to the caller

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE, RETRY_AFTER, USER_AGENT};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tokio::time::sleep;
use tracing::{debug, warn};

use crate::config::ClientConfig;
use crate::error::{ArchiveError, Result};
use crate::record::RawMessage;
use crate::snowflake::Snowflake;

const DEFAULT_RATE_LIMIT_WAIT: Duration = Duration::from_secs(1);
const INITIAL_TRANSIENT_DELAY: Duration = Duration::from_secs(1);
const MAX_TRANSIENT_DELAY: Duration = Duration::from_secs(60);
const MAX_ERROR_BODY: usize = 512;

/// Which way a pagination walk moves through a channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    /// Toward newer messages (`after=<anchor>`).
    Forward,
    /// Toward older messages (`before=<anchor>`).
    Backward,
}

impl Direction {
    pub fn query_param(&self) -> &'static str {
        match self {
            Direction::Forward => "after",
            Direction::Backward => "before",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Forward => "forward",
            Direction::Backward => "backward",
        }
    }
}

/// Status, body and throttling header of one HTTP exchange.
#[derive(Debug, Clone)]
pub struct RawResponse {
    pub status: u16,
    pub body: String,
    /// `Retry-After` header in seconds, when present.
    pub retry_after_header: Option<f64>,
}

impl RawResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn is_rate_limited(&self) -> bool {
        self.status == 429
    }

    /// Wait requested by a 429: body `retry_after`, then the header, then 1s.
    ///
    /// Values too large for a `Duration` saturate to `Duration::MAX`.
    pub fn retry_after(&self) -> Duration {
        #[derive(Deserialize)]
        struct RateLimitBody {
            retry_after: Option<f64>,
        }

        serde_json::from_str::<RateLimitBody>(&self.body)
            .ok()
            .and_then(|b| b.retry_after)
            .or(self.retry_after_header)
            .filter(|secs| secs.is_finite() && *secs >= 0.0)
            .map(|secs| Duration::try_from_secs_f64(secs).unwrap_or(Duration::MAX))
            .unwrap_or(DEFAULT_RATE_LIMIT_WAIT)
    }
}

/// One GET against the API.
///
/// Implementations return `Err` only for failures below HTTP (connect,
/// timeout, reset); every HTTP status comes back as a [`RawResponse`].
#[async_trait]
pub trait Transport: Send + Sync {
    async fn get(&self, path: &str, query: &[(&str, String)]) -> Result<RawResponse>;
}

/// reqwest-backed transport.
pub struct HttpTransport {
    http: reqwest::Client,
    config: ClientConfig,
}

impl HttpTransport {
    pub fn new(config: &ClientConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| ArchiveError::Config(format!("failed to build HTTP client: {}", e)))?;
        Ok(Self {
            http,
            config: config.clone(),
        })
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn get(&self, path: &str, query: &[(&str, String)]) -> Result<RawResponse> {
        let url = self
            .config
            .base_url
            .join(path.trim_start_matches('/'))
            .map_err(|e| ArchiveError::Config(format!("invalid request path {:?}: {}", path, e)))?;

        let response = self
            .http
            .get(url)
            .header(AUTHORIZATION, &self.config.token)
            .header(CONTENT_TYPE, "application/json")
            .header(USER_AGENT, &self.config.user_agent)
            .query(query)
            .send()
            .await?;

        let status = response.status().as_u16();
        let retry_after_header = response
            .headers()
            .get(RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<f64>().ok());
        let body = response.text().await?;

        Ok(RawResponse {
            status,
            body,
            retry_after_header,
        })
    }
}

/// Per-walk accounting of time spent sleeping on 429s.
#[derive(Debug, Clone, Default)]
pub struct RetryBudget {
    pub rate_limit_waited: Duration,
    pub rate_limit_hits: u32,
}

/// Issues API requests with rate-limit and transient-failure handling.
///
/// Cheap to share between cursors; each cursor passes its own
/// [`RetryBudget`] so throttling of one walk never counts against another.
#[derive(Clone)]
pub struct RateLimitedClient {
    transport: Arc<dyn Transport>,
    config: ClientConfig,
}

impl RateLimitedClient {
    pub fn new(transport: Arc<dyn Transport>, config: ClientConfig) -> Self {
        Self { transport, config }
    }

    /// Client over the real HTTP transport.
    pub fn http(config: ClientConfig) -> Result<Self> {
        let transport = HttpTransport::new(&config)?;
        Ok(Self::new(Arc::new(transport), config))
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Fetch one page of up to `page_size` messages next to `anchor`.
    ///
    /// A sentinel anchor sends no pagination parameter, which makes the
    /// service return its newest page.
    pub async fn fetch_page(
        &self,
        channel_id: Snowflake,
        direction: Direction,
        anchor: Snowflake,
        budget: &mut RetryBudget,
    ) -> Result<Vec<RawMessage>> {
        let path = format!("channels/{}/messages", channel_id);
        let mut query = vec![("limit", self.config.page_size.to_string())];
        if !anchor.is_sentinel() {
            query.push((direction.query_param(), anchor.to_string()));
        }

        let body = self.get_with_retry(&path, &query, budget).await?;
        let page: Vec<RawMessage> =
            serde_json::from_str(&body).map_err(|e| ArchiveError::PermanentApi {
                status: 200,
                body: format!("malformed message page: {}", e),
            })?;

        debug!(
            channel = %channel_id,
            direction = direction.as_str(),
            anchor = %anchor,
            count = page.len(),
            "fetched page"
        );

        if !self.config.request_delay.is_zero() {
            sleep(self.config.request_delay).await;
        }
        Ok(page)
    }

    /// GET `path` and decode the JSON body, with the same retry policy.
    pub async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let mut budget = RetryBudget::default();
        let body = self.get_with_retry(path, &[], &mut budget).await?;
        Ok(serde_json::from_str(&body)?)
    }

    async fn get_with_retry(
        &self,
        path: &str,
        query: &[(&str, String)],
        budget: &mut RetryBudget,
    ) -> Result<String> {
        let mut transient_failures = 0u32;
        let mut delay = INITIAL_TRANSIENT_DELAY;

        loop {
            let response = match self.transport.get(path, query).await {
                Ok(response) => response,
                Err(err @ ArchiveError::TransientNetwork(_)) => {
                    transient_failures += 1;
                    if transient_failures > self.config.max_transient_retries {
                        warn!(path, attempts = transient_failures, "giving up after network errors");
                        return Err(err);
                    }
                    warn!(path, error = %err, ?delay, "network error, retrying");
                    sleep(delay).await;
                    delay = std::cmp::min(delay * 2, MAX_TRANSIENT_DELAY);
                    continue;
                }
                Err(err) => return Err(err),
            };

            if response.is_success() {
                return Ok(response.body);
            }

            if response.is_rate_limited() {
                let wait = response.retry_after();
                if budget.rate_limit_waited.saturating_add(wait) > self.config.max_rate_limit_wait {
                    warn!(
                        path,
                        waited = ?budget.rate_limit_waited,
                        "rate limit budget exhausted"
                    );
                    return Err(ArchiveError::RateLimitBudgetExceeded {
                        waited: budget.rate_limit_waited,
                    });
                }
                warn!(path, ?wait, "rate limited, sleeping");
                sleep(wait).await;
                budget.rate_limit_waited += wait;
                budget.rate_limit_hits += 1;
                continue;
            }

            let mut body = response.body;
            if body.len() > MAX_ERROR_BODY {
                let mut cut = MAX_ERROR_BODY;
                while !body.is_char_boundary(cut) {
                    cut -= 1;
                }
                body.truncate(cut);
            }
            return Err(ArchiveError::PermanentApi {
                status: response.status,
                body,
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{message_json, test_config, ScriptedTransport};
    use serde_json::json;

    fn client(transport: &Arc<ScriptedTransport>) -> RateLimitedClient {
        RateLimitedClient::new(transport.clone(), test_config())
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_limit_retries_same_request_after_wait() {
        let transport = Arc::new(ScriptedTransport::new());
        for _ in 0..3 {
            transport.push_status(429, json!({"retry_after": 2.0, "global": false}));
        }
        transport.push_status(200, json!([message_json(501), message_json(500)]));

        let started = tokio::time::Instant::now();
        let mut budget = RetryBudget::default();
        let page = client(&transport)
            .fetch_page(Snowflake(42), Direction::Forward, Snowflake(499), &mut budget)
            .await
            .unwrap();

        assert_eq!(page.len(), 2);
        assert!(started.elapsed() >= Duration::from_secs(6));
        assert_eq!(budget.rate_limit_hits, 3);
        assert_eq!(budget.rate_limit_waited, Duration::from_secs(6));

        // One original request plus exactly one retry per 429, all at the same anchor.
        let requests = transport.requests();
        assert_eq!(requests.len(), 4);
        for request in &requests {
            assert_eq!(request.path, "channels/42/messages");
            assert_eq!(request.param("after"), Some("499"));
            assert_eq!(request.param("limit"), Some("100"));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_limit_header_fallback() {
        let transport = Arc::new(ScriptedTransport::new());
        transport.push_raw(RawResponse {
            status: 429,
            body: "slow down".into(),
            retry_after_header: Some(3.0),
        });
        transport.push_status(200, json!([]));

        let started = tokio::time::Instant::now();
        let mut budget = RetryBudget::default();
        client(&transport)
            .fetch_page(Snowflake(1), Direction::Backward, Snowflake(10), &mut budget)
            .await
            .unwrap();
        assert!(started.elapsed() >= Duration::from_secs(3));
        assert_eq!(budget.rate_limit_waited, Duration::from_secs(3));
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_limit_budget_caps_waiting() {
        let transport = Arc::new(ScriptedTransport::new());
        for _ in 0..10 {
            transport.push_status(429, json!({"retry_after": 400.0}));
        }
        let mut budget = RetryBudget::default();
        let err = client(&transport)
            .fetch_page(Snowflake(1), Direction::Forward, Snowflake(1), &mut budget)
            .await
            .unwrap_err();

        // 600s budget: first 400s wait fits, the second would not.
        assert!(matches!(err, ArchiveError::RateLimitBudgetExceeded { .. }));
        assert_eq!(transport.requests().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_permanent_error_not_retried() {
        let transport = Arc::new(ScriptedTransport::new());
        transport.push_status(403, json!({"message": "Missing Access", "code": 50001}));
        transport.push_status(200, json!([]));

        let mut budget = RetryBudget::default();
        let err = client(&transport)
            .fetch_page(Snowflake(1), Direction::Forward, Snowflake(1), &mut budget)
            .await
            .unwrap_err();

        match err {
            ArchiveError::PermanentApi { status, body } => {
                assert_eq!(status, 403);
                assert!(body.contains("Missing Access"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(transport.requests().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_errors_retried_then_succeed() {
        let transport = Arc::new(ScriptedTransport::new());
        transport.push_network_error("connection reset");
        transport.push_network_error("connection reset");
        transport.push_status(200, json!([message_json(7)]));

        let mut budget = RetryBudget::default();
        let page = client(&transport)
            .fetch_page(Snowflake(1), Direction::Forward, Snowflake(1), &mut budget)
            .await
            .unwrap();
        assert_eq!(page.len(), 1);
        assert_eq!(transport.requests().len(), 3);
        assert_eq!(budget.rate_limit_hits, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_errors_bounded() {
        let transport = Arc::new(ScriptedTransport::new());
        for _ in 0..10 {
            transport.push_network_error("timed out");
        }
        let mut budget = RetryBudget::default();
        let err = client(&transport)
            .fetch_page(Snowflake(1), Direction::Forward, Snowflake(1), &mut budget)
            .await
            .unwrap_err();
        assert!(matches!(err, ArchiveError::TransientNetwork(_)));
        // Initial attempt plus three retries.
        assert_eq!(transport.requests().len(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sentinel_anchor_omits_pagination_param() {
        let transport = Arc::new(ScriptedTransport::new());
        transport.push_status(200, json!([]));
        let mut budget = RetryBudget::default();
        client(&transport)
            .fetch_page(Snowflake(9), Direction::Backward, Snowflake::SENTINEL, &mut budget)
            .await
            .unwrap();

        let requests = transport.requests();
        assert_eq!(requests[0].param("before"), None);
        assert_eq!(requests[0].param("limit"), Some("100"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_malformed_page_is_permanent() {
        let transport = Arc::new(ScriptedTransport::new());
        transport.push_status(200, json!({"not": "an array"}));
        let mut budget = RetryBudget::default();
        let err = client(&transport)
            .fetch_page(Snowflake(1), Direction::Forward, Snowflake(1), &mut budget)
            .await
            .unwrap_err();
        assert!(matches!(err, ArchiveError::PermanentApi { status: 200, .. }));
    }

    #[test]
    fn test_retry_after_parsing() {
        let resp = RawResponse {
            status: 429,
            body: r#"{"retry_after": 0.5}"#.into(),
            retry_after_header: Some(9.0),
        };
        assert_eq!(resp.retry_after(), Duration::from_millis(500));

        let resp = RawResponse {
            status: 429,
            body: String::new(),
            retry_after_header: None,
        };
        assert_eq!(resp.retry_after(), DEFAULT_RATE_LIMIT_WAIT);
    }

    #[test]
    fn test_retry_after_out_of_range_saturates() {
        let resp = RawResponse {
            status: 429,
            body: r#"{"retry_after": 1e300}"#.into(),
            retry_after_header: None,
        };
        assert_eq!(resp.retry_after(), Duration::MAX);

        let resp = RawResponse {
            status: 429,
            body: "{}".into(),
            retry_after_header: Some(f64::MAX),
        };
        assert_eq!(resp.retry_after(), Duration::MAX);
    }

    #[tokio::test(start_paused = true)]
    async fn test_huge_retry_after_exceeds_budget() {
        let transport = Arc::new(ScriptedTransport::new());
        transport.push_status(429, json!({"retry_after": 1e300}));
        transport.push_status(200, json!([]));

        let mut budget = RetryBudget::default();
        let err = client(&transport)
            .fetch_page(Snowflake(1), Direction::Forward, Snowflake(1), &mut budget)
            .await
            .unwrap_err();
        assert!(matches!(err, ArchiveError::RateLimitBudgetExceeded { .. }));
        assert_eq!(budget.rate_limit_waited, Duration::ZERO);
        assert_eq!(transport.requests().len(), 1);
    }
}
