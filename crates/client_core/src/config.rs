use std::{
    collections::HashMap,
    fmt, fs,
    path::Path,
    time::Duration,
};

use anyhow::{bail, Context};
use shared::protocol::DEFAULT_SOURCE_TAG;
use tracing::debug;
use url::Url;

pub const DEFAULT_SETTINGS_FILE: &str = "observa.toml";

/// Bearer credential. `Debug` never prints the secret.
#[derive(Clone, PartialEq, Eq)]
pub struct ApiToken(String);

impl ApiToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.trim().is_empty()
    }
}

impl fmt::Debug for ApiToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ApiToken(***)")
    }
}

#[derive(Debug, Clone)]
pub struct ClientSettings {
    pub api_base: String,
    pub api_token: ApiToken,
    pub source_tag: String,
    pub request_timeout_secs: u64,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            api_base: "http://localhost:8000".into(),
            api_token: ApiToken::new("devtoken"),
            source_tag: DEFAULT_SOURCE_TAG.into(),
            request_timeout_secs: 10,
        }
    }
}

impl ClientSettings {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Base URL without a trailing slash, ready for `format!("{base}/events")`.
    pub fn normalized_base(&self) -> &str {
        self.api_base.trim().trim_end_matches('/')
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        let base = self.normalized_base();
        let parsed =
            Url::parse(base).with_context(|| format!("api_base '{base}' is not a valid URL"))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            bail!("api_base must start with http:// or https://, got '{base}'");
        }
        if parsed.host_str().is_none() {
            bail!("api_base '{base}' has no host");
        }
        if self.api_token.is_empty() {
            bail!("api_token must not be empty");
        }
        if self.request_timeout_secs == 0 {
            bail!("request_timeout_secs must be greater than zero");
        }
        Ok(())
    }

    fn apply_table(&mut self, table: &HashMap<String, String>) {
        if let Some(v) = table.get("api_base") {
            self.api_base = v.clone();
        }
        if let Some(v) = table.get("api_token") {
            self.api_token = ApiToken::new(v.clone());
        }
        if let Some(v) = table.get("source_tag") {
            self.source_tag = v.clone();
        }
        if let Some(v) = table.get("request_timeout_secs") {
            if let Ok(parsed) = v.parse::<u64>() {
                self.request_timeout_secs = parsed;
            }
        }
    }

    /// Environment overrides. `APP__` names win over the plain ones.
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("OBSERVA_API_BASE") {
            self.api_base = v;
        }
        if let Some(v) = lookup("APP__API_BASE") {
            self.api_base = v;
        }

        if let Some(v) = lookup("API_TOKEN") {
            self.api_token = ApiToken::new(v);
        }
        if let Some(v) = lookup("APP__API_TOKEN") {
            self.api_token = ApiToken::new(v);
        }

        if let Some(v) = lookup("APP__SOURCE_TAG") {
            self.source_tag = v;
        }

        if let Some(v) = lookup("APP__REQUEST_TIMEOUT_SECS") {
            if let Ok(parsed) = v.parse::<u64>() {
                self.request_timeout_secs = parsed;
            }
        }
    }
}

/// Defaults, then the settings file, then the process environment.
///
/// An explicitly named file must exist. The default `observa.toml` is optional.
pub fn load_settings(path: Option<&Path>) -> anyhow::Result<ClientSettings> {
    let mut settings = ClientSettings::default();

    let raw = match path {
        Some(path) => Some(
            fs::read_to_string(path)
                .with_context(|| format!("failed to read settings file '{}'", path.display()))?,
        ),
        None => fs::read_to_string(DEFAULT_SETTINGS_FILE).ok(),
    };

    if let Some(raw) = raw {
        let table = parse_settings_table(&raw)?;
        settings.apply_table(&table);
    }

    settings.apply_env(|key| std::env::var(key).ok());
    debug!(api_base = %settings.api_base, "loaded client settings");
    Ok(settings)
}

fn parse_settings_table(raw: &str) -> anyhow::Result<HashMap<String, String>> {
    let value: toml::Table = toml::from_str(raw).context("settings file is not valid TOML")?;
    Ok(value
        .into_iter()
        .filter_map(|(key, value)| {
            let text = match value {
                toml::Value::String(s) => s,
                toml::Value::Integer(i) => i.to_string(),
                _ => return None,
            };
            Some((key, text))
        })
        .collect())
}
