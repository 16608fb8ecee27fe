//! Runtime environment snapshot
//!
//! Every environment-derived setting the two phases consult is read through
//! [`RuntimeEnv`], an immutable snapshot taken once at process start. Tests
//! build snapshots from plain key/value pairs instead of mutating the process
//! environment.

use crate::redaction::Secret;
use std::collections::HashMap;
use std::path::PathBuf;
use tracing::{debug, warn};

/// Disables summary generation in the post phase when falsy
pub const BUILD_SUMMARY_ENV: &str = "DOCKER_BUILD_SUMMARY";

/// Disables build record upload (export and summary still happen) when falsy
pub const BUILD_RECORD_UPLOAD_ENV: &str = "DOCKER_BUILD_RECORD_UPLOAD";

/// Overrides the build record artifact retention window
pub const BUILD_RECORD_RETENTION_DAYS_ENV: &str = "DOCKER_BUILD_RECORD_RETENTION_DAYS";

/// Credential token forwarded to the build engine; takes priority over inputs
pub const GIT_AUTH_TOKEN_ENV: &str = "BUILDX_BAKE_GIT_AUTH_TOKEN";

/// Suppresses the default provenance attestation
pub const NO_DEFAULT_ATTESTATIONS_ENV: &str = "BUILDX_NO_DEFAULT_ATTESTATIONS";

/// Path to the docker binary
pub const DOCKER_PATH_ENV: &str = "BAKEFLOW_DOCKER_PATH";

/// Directory used by the directory-backed state store
pub const STATE_DIR_ENV: &str = "BAKEFLOW_STATE_DIR";

/// Retention window applied to uploaded build records
pub const DEFAULT_RETENTION_DAYS: u32 = 90;

const GITHUB_DOTCOM: &str = "https://github.com";

/// Immutable snapshot of the process environment
#[derive(Debug, Clone, Default)]
pub struct RuntimeEnv {
    vars: HashMap<String, String>,
}

impl RuntimeEnv {
    /// Snapshot the current process environment
    pub fn from_process() -> Self {
        Self::from_vars(std::env::vars())
    }

    /// Build a snapshot from explicit key/value pairs
    pub fn from_vars<I, K, V>(vars: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            vars: vars
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }

    /// Raw lookup; empty values are treated as unset
    pub fn get(&self, key: &str) -> Option<&str> {
        self.vars
            .get(key)
            .map(String::as_str)
            .filter(|v| !v.is_empty())
    }

    /// Parse a boolean variable, falling back to `default` when unset or invalid
    pub fn bool_flag(&self, key: &str, default: bool) -> bool {
        match self.get(key) {
            None => default,
            Some(raw) => parse_bool(raw).unwrap_or_else(|| {
                warn!("Invalid boolean value '{}' for {}, using {}", raw, key, default);
                default
            }),
        }
    }

    pub fn summary_enabled(&self) -> bool {
        self.bool_flag(BUILD_SUMMARY_ENV, true)
    }

    pub fn record_upload_enabled(&self) -> bool {
        self.bool_flag(BUILD_RECORD_UPLOAD_ENV, true)
    }

    pub fn record_retention_days(&self) -> u32 {
        match self.get(BUILD_RECORD_RETENTION_DAYS_ENV) {
            None => DEFAULT_RETENTION_DAYS,
            Some(raw) => match raw.trim().parse::<u32>() {
                Ok(days) if days > 0 => days,
                _ => {
                    warn!(
                        "Invalid {} value '{}', using {} days",
                        BUILD_RECORD_RETENTION_DAYS_ENV, raw, DEFAULT_RETENTION_DAYS
                    );
                    DEFAULT_RETENTION_DAYS
                }
            },
        }
    }

    pub fn no_default_attestations(&self) -> bool {
        self.bool_flag(NO_DEFAULT_ATTESTATIONS_ENV, false)
    }

    /// Resolve the credential token: explicit env override, then the input,
    /// then the job token.
    pub fn git_auth_token(&self, input_token: Option<&Secret>) -> Option<Secret> {
        if let Some(token) = self.get(GIT_AUTH_TOKEN_ENV) {
            return Some(Secret::new(token));
        }
        if let Some(token) = input_token.filter(|t| !t.is_empty()) {
            return Some(token.clone());
        }
        self.get("GITHUB_TOKEN").map(Secret::new)
    }

    pub fn docker_path(&self) -> String {
        self.get(DOCKER_PATH_ENV).unwrap_or("docker").to_string()
    }

    pub fn state_dir(&self) -> Option<PathBuf> {
        self.get(STATE_DIR_ENV).map(PathBuf::from)
    }

    /// Location of the buildx configuration directory
    pub fn buildx_config_dir(&self) -> Option<PathBuf> {
        if let Some(dir) = self.get("BUILDX_CONFIG") {
            return Some(PathBuf::from(dir));
        }
        if let Some(dir) = self.get("DOCKER_CONFIG") {
            return Some(PathBuf::from(dir).join("buildx"));
        }
        directories_next::BaseDirs::new().map(|dirs| dirs.home_dir().join(".docker").join("buildx"))
    }

    /// Runner-provided context
    pub fn github(&self) -> GithubContext {
        GithubContext {
            server_url: self
                .get("GITHUB_SERVER_URL")
                .unwrap_or(GITHUB_DOTCOM)
                .trim_end_matches('/')
                .to_string(),
            repository: self.get("GITHUB_REPOSITORY").map(str::to_string),
            run_id: self.get("GITHUB_RUN_ID").map(str::to_string),
            event_path: self.get("GITHUB_EVENT_PATH").map(PathBuf::from),
            results_url: self.get("ACTIONS_RESULTS_URL").map(str::to_string),
            runtime_token: self.get("ACTIONS_RUNTIME_TOKEN").map(Secret::new),
            step_summary: self.get("GITHUB_STEP_SUMMARY").map(PathBuf::from),
            state_file: self.get("GITHUB_STATE").map(PathBuf::from),
            output_file: self.get("GITHUB_OUTPUT").map(PathBuf::from),
        }
    }

    /// State values handed back by the runner to the post phase (`STATE_<key>`)
    pub fn runner_state(&self) -> HashMap<String, String> {
        self.vars
            .iter()
            .filter_map(|(k, v)| k.strip_prefix("STATE_").map(|key| (key.to_string(), v.clone())))
            .collect()
    }
}

/// Context exposed by the CI runner
#[derive(Debug, Clone, Default)]
pub struct GithubContext {
    pub server_url: String,
    pub repository: Option<String>,
    pub run_id: Option<String>,
    pub event_path: Option<PathBuf>,
    pub results_url: Option<String>,
    pub runtime_token: Option<Secret>,
    pub step_summary: Option<PathBuf>,
    pub state_file: Option<PathBuf>,
    pub output_file: Option<PathBuf>,
}

impl GithubContext {
    /// True on GitHub Enterprise Server instances
    pub fn is_ghes(&self) -> bool {
        let host = self
            .server_url
            .trim_start_matches("https://")
            .trim_start_matches("http://");
        host != "github.com" && !host.ends_with(".ghe.com")
    }

    /// Whether the triggering repository is private, read from the event payload
    pub fn repository_private(&self) -> bool {
        let Some(path) = &self.event_path else {
            return false;
        };
        let payload = match std::fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) => {
                debug!("Cannot read event payload {}: {}", path.display(), e);
                return false;
            }
        };
        serde_json::from_str::<serde_json::Value>(&payload)
            .ok()
            .and_then(|v| v.pointer("/repository/private").and_then(|p| p.as_bool()))
            .unwrap_or(false)
    }
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Split a list input the way CI inputs are written: one item per line,
/// optionally comma separated. Blank items are dropped.
pub fn parse_list(raw: &str, split_commas: bool) -> Vec<String> {
    raw.lines()
        .flat_map(|line| {
            if split_commas {
                line.split(',').map(str::to_string).collect::<Vec<_>>()
            } else {
                vec![line.to_string()]
            }
        })
        .map(|item| item.trim().to_string())
        .filter(|item| !item.is_empty())
        .collect()
}
