//! Configuration system (layered: code > env > config file > defaults).

use std::path::{Path, PathBuf};
use std::time::Duration;

use bon::Builder;
use serde::{Deserialize, Serialize};

use crate::error::{Result, ThreadlineError};

/// Text shown in the live entry until the first content chunk arrives.
pub const DEFAULT_PLACEHOLDER: &str = "Thinking…";

/// Endpoints and session behaviour for threadline.
///
/// Resolution order:
/// 1. Explicit values (builder or setters)
/// 2. `THREADLINE_*` environment variables (and `.env`)
/// 3. `config.toml` in the platform config directory
/// 4. Built-in defaults
#[derive(Debug, Clone, PartialEq, Builder, Serialize, Deserialize)]
#[serde(default)]
pub struct ThreadlineConfig {
    #[builder(into, default = "http://localhost:8069".to_string())]
    pub base_url: String,
    #[builder(into)]
    pub csrf_token: Option<String>,
    #[builder(into, default = "X-CSRF-Token".to_string())]
    pub csrf_header: String,
    #[builder(into, default = "/llm/thread/stream".to_string())]
    pub stream_path: String,
    #[builder(into, default = "/llm/thread/post_message".to_string())]
    pub post_path: String,
    #[builder(into, default = "/llm/message/vote".to_string())]
    pub vote_path: String,
    #[builder(into, default = DEFAULT_PLACEHOLDER.to_string())]
    pub placeholder: String,
    /// Follow-up passes allowed per top-level turn after tool results land.
    #[builder(default = 1)]
    pub max_interpretation_passes: u32,
    /// Whole-request limit for gateway calls; connect and idle-read limit for streams.
    #[builder(default = 120)]
    pub request_timeout_secs: u64,
}

impl Default for ThreadlineConfig {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl ThreadlineConfig {
    /// Load the full layered configuration: defaults, config file, environment.
    pub fn load() -> Result<Self> {
        let mut config = match Self::default_path() {
            Some(path) if path.exists() => Self::from_file(&path)?,
            _ => Self::default(),
        };
        config.apply_env();
        Ok(config)
    }

    /// Parse a TOML document; missing keys fall back to defaults.
    pub fn from_toml_str(source: &str) -> Result<Self> {
        let config: Self = toml::from_str(source)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let source = std::fs::read_to_string(path)?;
        Self::from_toml_str(&source)
    }

    /// `<config dir>/threadline/config.toml` for the current platform.
    pub fn default_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("", "", "threadline")
            .map(|dirs| dirs.config_dir().join("config.toml"))
    }

    /// Overlay `THREADLINE_*` variables (after loading `.env` if present).
    pub fn apply_env(&mut self) {
        let _ = dotenvy::dotenv(); // load .env if present, ignore error
        self.apply_vars(|name| std::env::var(name).ok());
    }

    fn apply_vars(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let strings: [(&str, &mut String); 6] = [
            ("THREADLINE_BASE_URL", &mut self.base_url),
            ("THREADLINE_CSRF_HEADER", &mut self.csrf_header),
            ("THREADLINE_STREAM_PATH", &mut self.stream_path),
            ("THREADLINE_POST_PATH", &mut self.post_path),
            ("THREADLINE_VOTE_PATH", &mut self.vote_path),
            ("THREADLINE_PLACEHOLDER", &mut self.placeholder),
        ];
        for (name, slot) in strings {
            if let Some(value) = lookup(name) {
                *slot = value;
            }
        }

        if let Some(token) = lookup("THREADLINE_CSRF_TOKEN") {
            self.csrf_token = Some(token);
        }

        match lookup("THREADLINE_MAX_INTERPRETATION_PASSES").map(|v| v.parse()) {
            Some(Ok(passes)) => self.max_interpretation_passes = passes,
            Some(Err(e)) => tracing::warn!(error = %e, "Ignoring invalid THREADLINE_MAX_INTERPRETATION_PASSES"),
            None => {}
        }

        match lookup("THREADLINE_REQUEST_TIMEOUT_SECS").map(|v| v.parse()) {
            Some(Ok(secs)) => self.request_timeout_secs = secs,
            Some(Err(e)) => tracing::warn!(error = %e, "Ignoring invalid THREADLINE_REQUEST_TIMEOUT_SECS"),
            None => {}
        }
    }

    pub fn set_base_url(&mut self, url: impl Into<String>) {
        self.base_url = url.into();
    }

    pub fn set_csrf_token(&mut self, token: impl Into<String>) {
        self.csrf_token = Some(token.into());
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Join `base_url` with an endpoint path.
    pub fn endpoint(&self, path: &str) -> String {
        format!(
            "{}/{}",
            self.base_url.trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }

    pub fn validate(&self) -> Result<()> {
        if self.base_url.trim().is_empty() {
            return Err(ThreadlineError::Configuration(
                "base_url must not be empty".to_string(),
            ));
        }
        if !self.base_url.starts_with("http://") && !self.base_url.starts_with("https://") {
            return Err(ThreadlineError::Configuration(format!(
                "base_url must be an http(s) URL, got '{}'",
                self.base_url
            )));
        }
        Ok(())
    }
}
