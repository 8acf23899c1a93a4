//! Oracle Client
//!
//! [`Oracle`] is the raw text channel to the decision service; [`HttpOracle`]
//! speaks its HTTP surface. [`OracleClient`] layers typed parsing, validation
//! and retry on top of any [`Oracle`].

use std::time::Duration;

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use reqwest::Client;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, instrument, warn};
use url::Url;
use validator::Validate;

use super::parse::{parse_oracle_json, OracleParseError};
use super::types::{
    AggregationVerdict, ReflectionVerdict, VisionDecision, AGGREGATION_KEYS, REFLECTION_KEYS,
    VISION_ACTION_KEYS, VISION_KEYS,
};
use crate::retry::RetryPolicy;

/// Oracle client configuration.
#[derive(Debug, Clone)]
pub struct OracleConfig {
    /// Base URL of the oracle service
    pub base_url: Url,

    /// Optional bearer token
    pub auth_token: Option<String>,

    /// Request timeout
    pub timeout: Duration,

    /// Retry policy for a typed oracle call
    pub retry: RetryPolicy,
}

impl Default for OracleConfig {
    fn default() -> Self {
        Self {
            base_url: Url::parse("http://localhost:8003").expect("Valid default URL"),
            auth_token: None,
            timeout: Duration::from_secs(30),
            retry: RetryPolicy::fixed(3, Duration::from_secs(5)),
        }
    }
}

impl OracleConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Result<Self, OracleError> {
        let base_url = std::env::var("ORACLE_SERVICE_URL")
            .unwrap_or_else(|_| "http://localhost:8003".to_string());

        let timeout_secs = std::env::var("ORACLE_TIMEOUT_SECS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(30);

        Ok(Self {
            base_url: Url::parse(&base_url).map_err(|e| OracleError::Configuration(e.to_string()))?,
            auth_token: std::env::var("ORACLE_AUTH_TOKEN").ok(),
            timeout: Duration::from_secs(timeout_secs),
            ..Default::default()
        })
    }
}

/// Errors from oracle calls.
#[derive(Debug, Clone, Error)]
pub enum OracleError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Response error: status={status}, message={message}")]
    Response { status: u16, message: String },

    #[error("Oracle rejected the request: {0}")]
    Rejected(String),

    #[error(transparent)]
    Parse(#[from] OracleParseError),

    #[error("Invalid oracle result: {0}")]
    Invalid(String),
}

impl From<reqwest::Error> for OracleError {
    fn from(err: reqwest::Error) -> Self {
        OracleError::Transport(err.to_string())
    }
}

impl From<validator::ValidationErrors> for OracleError {
    fn from(err: validator::ValidationErrors) -> Self {
        OracleError::Invalid(err.to_string())
    }
}

/// Raw free-text channel to the decision service.
#[async_trait]
pub trait Oracle: Send + Sync {
    /// Prompt with images, answered in free text.
    async fn vision(&self, prompt: &str, images: &[Vec<u8>]) -> Result<String, OracleError>;

    /// Text-only prompt, answered in free text.
    async fn complete(&self, prompt: &str) -> Result<String, OracleError>;
}

#[derive(Debug, Serialize)]
struct VisionRequest<'a> {
    prompt: &'a str,
    images: Vec<String>,
}

#[derive(Debug, Serialize)]
struct CompletionRequest<'a> {
    prompt: &'a str,
}

#[derive(Debug, Deserialize)]
struct OracleResponse {
    status: String,
    #[serde(default)]
    response: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

/// HTTP implementation of [`Oracle`].
#[derive(Clone)]
pub struct HttpOracle {
    client: Client,
    config: OracleConfig,
}

impl HttpOracle {
    pub fn new(config: OracleConfig) -> Result<Self, OracleError> {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| OracleError::Configuration(e.to_string()))?;

        Ok(Self { client, config })
    }

    pub fn from_env() -> Result<Self, OracleError> {
        Self::new(OracleConfig::from_env()?)
    }

    fn build_url(&self, path: &str) -> Result<Url, OracleError> {
        self.config
            .base_url
            .join(path)
            .map_err(|e| OracleError::Configuration(e.to_string()))
    }

    async fn post<B: Serialize + ?Sized>(&self, path: &str, body: &B) -> Result<String, OracleError> {
        let url = self.build_url(path)?;
        let request = self.client.post(url).json(body);
        let request = match self.config.auth_token {
            Some(ref token) => request.bearer_auth(token),
            None => request,
        };

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(OracleError::Response {
                status: status.as_u16(),
                message,
            });
        }

        let body: OracleResponse = response.json().await?;
        if body.status != "success" {
            return Err(OracleError::Rejected(
                body.message.unwrap_or_else(|| format!("status {}", body.status)),
            ));
        }
        body.response
            .ok_or_else(|| OracleError::Rejected("success response without text".to_string()))
    }
}

#[async_trait]
impl Oracle for HttpOracle {
    #[instrument(skip(self, prompt, images), fields(images = images.len()))]
    async fn vision(&self, prompt: &str, images: &[Vec<u8>]) -> Result<String, OracleError> {
        let body = VisionRequest {
            prompt,
            images: images.iter().map(|img| STANDARD.encode(img)).collect(),
        };
        self.post("/llm/vision", &body).await
    }

    #[instrument(skip(self, prompt))]
    async fn complete(&self, prompt: &str) -> Result<String, OracleError> {
        self.post("/llm/chat_complete", &CompletionRequest { prompt }).await
    }
}

/// Typed, validated, retried oracle calls.
pub struct OracleClient<O> {
    oracle: O,
    retry: RetryPolicy,
}

impl<O: Oracle> OracleClient<O> {
    pub fn new(oracle: O, retry: RetryPolicy) -> Self {
        Self { oracle, retry }
    }

    pub fn oracle(&self) -> &O {
        &self.oracle
    }

    async fn typed<T, F, Fut>(&self, label: &str, keys: &[&str], call: F) -> Result<T, OracleError>
    where
        T: DeserializeOwned + Validate,
        F: Fn() -> Fut,
        Fut: std::future::Future<Output = Result<String, OracleError>>,
    {
        self.retry
            .retry(
                label,
                |attempt| {
                    let fut = call();
                    async move {
                        let raw = fut.await?;
                        debug!(attempt, len = raw.len(), "Oracle responded");
                        let parsed: T = parse_oracle_json(&raw, keys)?;
                        parsed.validate()?;
                        Ok::<T, OracleError>(parsed)
                    }
                },
                |e: &OracleError| {
                    if let OracleError::Parse(p) = e {
                        warn!(reason = %p.reason, "Unparseable oracle response");
                    }
                    !matches!(e, OracleError::Configuration(_))
                },
            )
            .await
    }

    /// Judge a screenshot without asking for an action.
    pub async fn identify(&self, prompt: &str, screenshot: &[u8]) -> Result<VisionDecision, OracleError> {
        let images = vec![screenshot.to_vec()];
        self.typed("vision_identify", VISION_KEYS, || self.oracle.vision(prompt, &images))
            .await
    }

    /// Judge a screenshot and pick the next action.
    pub async fn decide(&self, prompt: &str, screenshot: &[u8]) -> Result<VisionDecision, OracleError> {
        let images = vec![screenshot.to_vec()];
        self.typed("vision_decide", VISION_ACTION_KEYS, || self.oracle.vision(prompt, &images))
            .await
    }

    /// Judge whether an action had its expected effect.
    pub async fn reflect(
        &self,
        prompt: &str,
        before: &[u8],
        after: &[u8],
    ) -> Result<ReflectionVerdict, OracleError> {
        let images = vec![before.to_vec(), after.to_vec()];
        self.typed("reflection", REFLECTION_KEYS, || self.oracle.vision(prompt, &images))
            .await
    }

    /// Aggregate step records into a final verdict.
    pub async fn aggregate(&self, prompt: &str) -> Result<AggregationVerdict, OracleError> {
        self.typed("aggregation", AGGREGATION_KEYS, || self.oracle.complete(prompt))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use crate::contracts::{Action, RiskLevel};

    struct Replies(Mutex<VecDeque<String>>);

    impl Replies {
        fn new(replies: &[&str]) -> Self {
            Self(Mutex::new(replies.iter().map(|s| s.to_string()).collect()))
        }
    }

    #[async_trait]
    impl Oracle for Replies {
        async fn vision(&self, _prompt: &str, _images: &[Vec<u8>]) -> Result<String, OracleError> {
            self.complete("").await
        }

        async fn complete(&self, _prompt: &str) -> Result<String, OracleError> {
            self.0
                .lock()
                .unwrap()
                .pop_front()
                .ok_or_else(|| OracleError::Transport("no reply".to_string()))
        }
    }

    fn quick() -> RetryPolicy {
        RetryPolicy::fixed(3, Duration::from_millis(1))
    }

    #[tokio::test]
    async fn test_decide_retries_unparseable_reply() {
        let client = OracleClient::new(
            Replies::new(&[
                "I am not sure.",
                "Verdict: {\"risk_level\":\"low\",\"confidence\":0.7,\"reason\":\"menu\",\"action\":\"Back\"}",
            ]),
            quick(),
        );
        let decision = client.decide("p", b"png").await.unwrap();
        assert_eq!(decision.parsed_action().unwrap(), Action::Back);
    }

    #[tokio::test]
    async fn test_decide_requires_action_key() {
        let reply = r#"{"risk_level":"low","confidence":0.7,"reason":"menu"}"#;
        let client = OracleClient::new(Replies::new(&[reply, reply, reply]), quick());
        assert!(matches!(
            client.decide("p", b"png").await,
            Err(OracleError::Parse(_))
        ));

        let client = OracleClient::new(Replies::new(&[reply]), quick());
        assert!(client.identify("p", b"png").await.is_ok());
    }

    #[tokio::test]
    async fn test_out_of_range_confidence_is_invalid() {
        let reply = r#"{"risk_level":"low","confidence":3.0,"reason":"menu"}"#;
        let client = OracleClient::new(Replies::new(&[reply]), RetryPolicy::none());
        assert!(matches!(
            client.identify("p", b"png").await,
            Err(OracleError::Invalid(_))
        ));
    }

    #[tokio::test]
    async fn test_http_vision_round_trip() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/llm/vision"))
            .and(body_partial_json(serde_json::json!({"images": ["AQI="]})))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "status": "success",
                "response": "```json\n{\"risk_level\":\"high\",\"confidence\":0.9,\"reason\":\"fake bank login\"}\n```"
            })))
            .mount(&server)
            .await;

        let oracle = HttpOracle::new(OracleConfig {
            base_url: Url::parse(&server.uri()).unwrap(),
            ..Default::default()
        })
        .unwrap();
        let client = OracleClient::new(oracle, RetryPolicy::none());

        let decision = client.identify("p", &[1, 2]).await.unwrap();
        assert_eq!(decision.risk_level, RiskLevel::High);
    }

    #[tokio::test]
    async fn test_http_non_success_status_is_rejected() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/llm/chat_complete"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "status": "error",
                "message": "model overloaded"
            })))
            .mount(&server)
            .await;

        let oracle = HttpOracle::new(OracleConfig {
            base_url: Url::parse(&server.uri()).unwrap(),
            ..Default::default()
        })
        .unwrap();

        let err = oracle.complete("p").await.unwrap_err();
        assert!(matches!(err, OracleError::Rejected(ref m) if m == "model overloaded"));
    }

    #[tokio::test]
    async fn test_http_error_status() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/llm/chat_complete"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let oracle = HttpOracle::new(OracleConfig {
            base_url: Url::parse(&server.uri()).unwrap(),
            ..Default::default()
        })
        .unwrap();

        assert!(matches!(
            oracle.complete("p").await,
            Err(OracleError::Response { status: 503, .. })
        ));
    }
}
