use async_trait::async_trait;
use reqwest::{
    header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE},
    Client, StatusCode,
};
use serde::de::DeserializeOwned;
use shared::{
    error::ServiceError,
    protocol::{AnalysisRequest, CheckResponse, Event, HealthResponse},
};
use tracing::{debug, warn};

pub mod config;
pub mod error;
pub mod orchestrator;
pub mod render;
pub mod session;

pub use config::{load_settings, ApiToken, ClientSettings};
pub use error::ClientError;
pub use orchestrator::{CheckOrchestrator, CheckReport, ConsoleEvent, RefreshOutcome};
pub use render::{format_score, ConsoleView, EventRow, FeedRenderer};
pub use session::{
    AnalysisResult, CheckOutcome, CheckStatus, CheckTicket, RefreshStatus, SessionState,
};

/// Result of `GET /events`.
#[derive(Debug, Clone, PartialEq)]
pub enum FeedResponse {
    Delivered(Vec<Event>),
    /// Non-2xx status. Callers leave their feed untouched.
    Rejected { status: u16 },
}

/// Outbound calls to the analysis service.
#[async_trait]
pub trait AnalysisApi: Send + Sync {
    async fn fetch_events(&self) -> Result<FeedResponse, ClientError>;
    async fn submit_drift_check(&self, manifest: &str) -> Result<CheckResponse, ClientError>;
    async fn submit_secret_check(&self, diff: &str) -> Result<CheckResponse, ClientError>;
    async fn health(&self) -> Result<HealthResponse, ClientError>;
}

pub struct HttpAnalysisClient {
    http: Client,
    api_base: String,
    source_tag: String,
}

impl HttpAnalysisClient {
    pub fn new(settings: &ClientSettings) -> Result<Self, ClientError> {
        let mut headers = HeaderMap::new();
        let mut auth = HeaderValue::from_str(&format!("Bearer {}", settings.api_token.expose()))
            .map_err(|_| ClientError::InvalidHeader {
                name: "authorization",
            })?;
        auth.set_sensitive(true);
        headers.insert(AUTHORIZATION, auth);
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        let http = Client::builder()
            .default_headers(headers)
            .timeout(settings.request_timeout())
            .build()
            .map_err(ClientError::Build)?;

        Ok(Self {
            http,
            api_base: settings.normalized_base().to_string(),
            source_tag: settings.source_tag.clone(),
        })
    }

    pub fn api_base(&self) -> &str {
        &self.api_base
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.api_base, path)
    }

    async fn submit(&self, request: &AnalysisRequest) -> Result<CheckResponse, ClientError> {
        let endpoint = self.endpoint(request.path());
        debug!(kind = %request.kind(), %endpoint, "submitting analysis check");
        let response = self
            .http
            .post(&endpoint)
            .json(request)
            .send()
            .await
            .map_err(|source| ClientError::Transport {
                endpoint: endpoint.clone(),
                source,
            })?;
        let status = response.status();
        let body = response
            .bytes()
            .await
            .map_err(|source| ClientError::Transport {
                endpoint: endpoint.clone(),
                source,
            })?;
        decode_body(&endpoint, status, &body)
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, ClientError> {
        let endpoint = self.endpoint(path);
        let response = self
            .http
            .get(&endpoint)
            .send()
            .await
            .map_err(|source| ClientError::Transport {
                endpoint: endpoint.clone(),
                source,
            })?;
        let status = response.status();
        let body = response
            .bytes()
            .await
            .map_err(|source| ClientError::Transport {
                endpoint: endpoint.clone(),
                source,
            })?;
        decode_body(&endpoint, status, &body)
    }
}

/// Non-2xx becomes `Rejected`, carrying the service's `detail` when the body has one.
/// A 2xx body must be valid JSON of the expected shape.
fn decode_body<T: DeserializeOwned>(
    endpoint: &str,
    status: StatusCode,
    body: &[u8],
) -> Result<T, ClientError> {
    if !status.is_success() {
        let detail = serde_json::from_slice::<ServiceError>(body)
            .ok()
            .and_then(|err| err.message());
        warn!(%endpoint, status = status.as_u16(), ?detail, "analysis service rejected request");
        return Err(ClientError::Rejected {
            endpoint: endpoint.to_string(),
            status: status.as_u16(),
            detail,
        });
    }
    serde_json::from_slice(body).map_err(|source| ClientError::Decode {
        endpoint: endpoint.to_string(),
        source,
    })
}

#[async_trait]
impl AnalysisApi for HttpAnalysisClient {
    async fn fetch_events(&self) -> Result<FeedResponse, ClientError> {
        match self.get_json::<Vec<Event>>("/events").await {
            Ok(events) => {
                debug!(count = events.len(), "fetched event feed");
                Ok(FeedResponse::Delivered(events))
            }
            Err(ClientError::Rejected { status, .. }) => Ok(FeedResponse::Rejected { status }),
            Err(err) => Err(err),
        }
    }

    async fn submit_drift_check(&self, manifest: &str) -> Result<CheckResponse, ClientError> {
        self.submit(&AnalysisRequest::drift(manifest, self.source_tag.as_str()))
            .await
    }

    async fn submit_secret_check(&self, diff: &str) -> Result<CheckResponse, ClientError> {
        self.submit(&AnalysisRequest::secret(diff)).await
    }

    async fn health(&self) -> Result<HealthResponse, ClientError> {
        self.get_json("/health").await
    }
}

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
