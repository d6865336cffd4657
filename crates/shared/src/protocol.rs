use serde::{Deserialize, Serialize};

use crate::domain::{AnalysisKind, EventId};

pub const DEFAULT_SOURCE_TAG: &str = "ui";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DriftCheckRequest {
    pub manifest: String,
    pub source: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SecretCheckRequest {
    pub diff: String,
}

/// Body of a single check submission. Serializes to the bare request object.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum AnalysisRequest {
    Drift(DriftCheckRequest),
    Secret(SecretCheckRequest),
}

impl AnalysisRequest {
    pub fn drift(manifest: impl Into<String>, source: impl Into<String>) -> Self {
        AnalysisRequest::Drift(DriftCheckRequest {
            manifest: manifest.into(),
            source: source.into(),
        })
    }

    pub fn secret(diff: impl Into<String>) -> Self {
        AnalysisRequest::Secret(SecretCheckRequest { diff: diff.into() })
    }

    pub fn kind(&self) -> AnalysisKind {
        match self {
            AnalysisRequest::Drift(_) => AnalysisKind::Drift,
            AnalysisRequest::Secret(_) => AnalysisKind::Secret,
        }
    }

    pub fn path(&self) -> &'static str {
        self.kind().check_path()
    }
}

/// Response of `/drift/check` and `/secret/check`. Every field is optional.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CheckResponse {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub score: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub changes: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub id: EventId,
    pub ts: i64,
    pub kind: String,
    #[serde(default)]
    pub score: Option<f64>,
}

impl Event {
    pub fn analysis_kind(&self) -> Option<AnalysisKind> {
        AnalysisKind::parse(&self.kind)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthResponse {
    pub ok: bool,
}
