use std::fmt;

use serde::{Deserialize, Serialize};

macro_rules! id_newtype {
    ($name:ident) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub struct $name(pub i64);

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

id_newtype!(EventId);

/// The two analyses the service runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnalysisKind {
    Drift,
    Secret,
}

impl AnalysisKind {
    pub const ALL: [AnalysisKind; 2] = [AnalysisKind::Drift, AnalysisKind::Secret];

    pub fn as_str(self) -> &'static str {
        match self {
            AnalysisKind::Drift => "drift",
            AnalysisKind::Secret => "secret",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "drift" => Some(AnalysisKind::Drift),
            "secret" => Some(AnalysisKind::Secret),
            _ => None,
        }
    }

    /// Endpoint path relative to the API base.
    pub fn check_path(self) -> &'static str {
        match self {
            AnalysisKind::Drift => "/drift/check",
            AnalysisKind::Secret => "/secret/check",
        }
    }
}

impl fmt::Display for AnalysisKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_matches_wire_discriminator() {
        assert_eq!(
            serde_json::to_string(&AnalysisKind::Secret).expect("serialize"),
            "\"secret\""
        );
        for kind in AnalysisKind::ALL {
            assert_eq!(AnalysisKind::parse(kind.as_str()), Some(kind));
        }
        assert_eq!(AnalysisKind::parse("metrics"), None);
    }
}
