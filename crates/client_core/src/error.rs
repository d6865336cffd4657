use shared::error::{ApiException, ErrorCode};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("request to {endpoint} failed: {source}")]
    Transport {
        endpoint: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("invalid JSON from {endpoint}: {source}")]
    Decode {
        endpoint: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("{endpoint} rejected the request with HTTP {status}{}", detail_suffix(.detail))]
    Rejected {
        endpoint: String,
        status: u16,
        detail: Option<String>,
    },
    #[error("invalid header value for {name}")]
    InvalidHeader { name: &'static str },
    #[error("failed to build http client: {0}")]
    Build(#[source] reqwest::Error),
}

fn detail_suffix(detail: &Option<String>) -> String {
    match detail {
        Some(detail) => format!(": {detail}"),
        None => String::new(),
    }
}

impl ClientError {
    pub fn status(&self) -> Option<u16> {
        match self {
            ClientError::Rejected { status, .. } => Some(*status),
            ClientError::Transport { source, .. } => source.status().map(|s| s.as_u16()),
            _ => None,
        }
    }

    pub fn is_auth_failure(&self) -> bool {
        matches!(
            self.status().map(ErrorCode::from_status),
            Some(ErrorCode::Unauthorized | ErrorCode::Forbidden)
        )
    }

    /// Service-level view of a rejection, if this was one.
    pub fn as_api_exception(&self) -> Option<ApiException> {
        match self {
            ClientError::Rejected { status, detail, .. } => {
                Some(ApiException::from_status(*status, detail.clone()))
            }
            _ => None,
        }
    }
}
