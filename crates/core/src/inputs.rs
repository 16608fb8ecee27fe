//! Step inputs
//!
//! [`Inputs`] is the immutable configuration snapshot for one run. It is
//! persisted verbatim for the post phase, except for the credential token,
//! which is never serialized.

use crate::redaction::Secret;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Source value meaning "use the local working directory"
const LOCAL_SOURCE: &str = ".";

/// Configuration snapshot for one run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct Inputs {
    /// Resource access entitlements (`--allow`)
    #[serde(default)]
    pub allow: Vec<String>,
    /// Builder instance name
    #[serde(default)]
    pub builder: Option<String>,
    /// Definition files, relative to the working directory
    #[serde(default)]
    pub files: Vec<String>,
    /// Working directory the build engine runs in
    #[serde(default = "default_workdir")]
    pub workdir: PathBuf,
    #[serde(default)]
    pub load: bool,
    #[serde(default)]
    pub no_cache: bool,
    #[serde(default)]
    pub pull: bool,
    #[serde(default)]
    pub push: bool,
    /// Provenance attestation setting
    #[serde(default)]
    pub provenance: Option<String>,
    /// SBOM attestation setting
    #[serde(default)]
    pub sbom: Option<String>,
    /// Override expressions (`--set`)
    #[serde(default)]
    pub set: Vec<String>,
    /// Remote definition source
    #[serde(default)]
    pub source: Option<String>,
    /// Target or group names to build
    #[serde(default)]
    pub targets: Vec<String>,
    /// Credential token for remote definition sources
    #[serde(skip)]
    pub github_token: Option<Secret>,
}

fn default_workdir() -> PathBuf {
    PathBuf::from(LOCAL_SOURCE)
}

impl Default for Inputs {
    fn default() -> Self {
        Self {
            allow: Vec::new(),
            builder: None,
            files: Vec::new(),
            workdir: default_workdir(),
            load: false,
            no_cache: false,
            pull: false,
            push: false,
            provenance: None,
            sbom: None,
            set: Vec::new(),
            source: None,
            targets: Vec::new(),
            github_token: None,
        }
    }
}

impl Inputs {
    /// Remote source to pass as the first positional argument, if any
    pub fn remote_source(&self) -> Option<&str> {
        self.source
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty() && *s != LOCAL_SOURCE)
    }

    /// Rows used when rendering the inputs in the build summary
    pub fn summary_rows(&self) -> Vec<(&'static str, String)> {
        let mut rows = Vec::new();
        if let Some(source) = self.remote_source() {
            rows.push(("source", source.to_string()));
        }
        if !self.files.is_empty() {
            rows.push(("files", self.files.join(", ")));
        }
        if !self.targets.is_empty() {
            rows.push(("targets", self.targets.join(", ")));
        }
        if !self.set.is_empty() {
            rows.push(("set", self.set.join("\n")));
        }
        if let Some(builder) = &self.builder {
            rows.push(("builder", builder.clone()));
        }
        if let Some(provenance) = &self.provenance {
            rows.push(("provenance", provenance.clone()));
        }
        if let Some(sbom) = &self.sbom {
            rows.push(("sbom", sbom.clone()));
        }
        for (name, enabled) in [
            ("load", self.load),
            ("no-cache", self.no_cache),
            ("pull", self.pull),
            ("push", self.push),
        ] {
            if enabled {
                rows.push((name, "true".to_string()));
            }
        }
        rows
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_is_never_serialized() {
        let inputs = Inputs {
            targets: vec!["app".to_string()],
            github_token: Some(Secret::new("ghs_0123456789abcdef")),
            ..Default::default()
        };

        let json = serde_json::to_string(&inputs).unwrap();
        assert!(!json.contains("ghs_0123456789abcdef"));
        assert!(!json.contains("github-token"));

        let restored: Inputs = serde_json::from_str(&json).unwrap();
        assert_eq!(restored.targets, vec!["app"]);
        assert!(restored.github_token.is_none());
    }

    #[test]
    fn test_remote_source() {
        let mut inputs = Inputs::default();
        assert_eq!(inputs.remote_source(), None);

        inputs.source = Some(".".to_string());
        assert_eq!(inputs.remote_source(), None);

        inputs.source = Some("https://github.com/org/repo.git#main".to_string());
        assert_eq!(
            inputs.remote_source(),
            Some("https://github.com/org/repo.git#main")
        );
    }

    #[test]
    fn test_missing_fields_use_defaults() {
        let inputs: Inputs = serde_json::from_str("{}").unwrap();
        assert_eq!(inputs.workdir, PathBuf::from("."));
        assert!(inputs.files.is_empty());
        assert!(!inputs.push);
    }

    #[test]
    fn test_summary_rows_include_enabled_flags_only() {
        let inputs = Inputs {
            targets: vec!["app".to_string(), "db".to_string()],
            push: true,
            ..Default::default()
        };
        let rows = inputs.summary_rows();
        assert!(rows.contains(&("targets", "app, db".to_string())));
        assert!(rows.contains(&("push", "true".to_string())));
        assert!(!rows.iter().any(|(name, _)| *name == "load"));
    }
}
