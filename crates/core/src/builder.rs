//! Builder instance descriptor
//!
//! Parsed from `buildx inspect` output once per run and treated as an
//! immutable snapshot afterwards.

use crate::errors::{PreflightError, Result};
use semver::Version;
use serde::{Deserialize, Serialize};

/// Driver kind that does not support build record export
pub const CLOUD_DRIVER: &str = "cloud";

/// Selected builder instance
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BuilderInfo {
    pub name: String,
    pub driver: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_activity: Option<String>,
    #[serde(default)]
    pub nodes: Vec<NodeInfo>,
}

/// One node of a builder
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeInfo {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub buildkit_version: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub platforms: Vec<String>,
}

impl BuilderInfo {
    pub fn is_cloud(&self) -> bool {
        self.driver == CLOUD_DRIVER
    }

    /// Endpoint of the first node
    pub fn endpoint(&self) -> Option<&str> {
        self.nodes.first().and_then(|n| n.endpoint.as_deref())
    }

    /// BuildKit version of the first node that reports one
    pub fn buildkit_version(&self) -> Option<Version> {
        self.nodes
            .iter()
            .filter_map(|n| n.buildkit_version.as_deref())
            .find_map(parse_version)
    }

    /// Parse the human-readable output of `buildx inspect`
    pub fn parse_inspect(output: &str) -> Result<Self> {
        let mut builder = BuilderInfo::default();
        let mut in_nodes = false;

        for line in output.lines() {
            let trimmed = line.trim();
            if trimmed == "Nodes:" {
                in_nodes = true;
                continue;
            }
            let Some((key, value)) = trimmed.split_once(':') else {
                continue;
            };
            let key = key.trim();
            let value = value.trim().to_string();

            if !in_nodes {
                match key {
                    "Name" => builder.name = value,
                    "Driver" => builder.driver = value,
                    "Last Activity" => builder.last_activity = Some(value),
                    _ => {}
                }
                continue;
            }

            if key == "Name" {
                builder.nodes.push(NodeInfo {
                    name: value,
                    ..Default::default()
                });
                continue;
            }
            let Some(node) = builder.nodes.last_mut() else {
                continue;
            };
            match key {
                "Endpoint" => node.endpoint = Some(value),
                "Status" => node.status = Some(value),
                "BuildKit version" | "Buildkit" | "BuildKit" => node.buildkit_version = Some(value),
                "Platforms" => {
                    node.platforms = value
                        .split(',')
                        .map(|p| p.trim().trim_end_matches('*').to_string())
                        .filter(|p| !p.is_empty())
                        .collect()
                }
                _ => {}
            }
        }

        if builder.name.is_empty() {
            return Err(PreflightError::BuilderInspect {
                name: "default".to_string(),
                message: "inspect output does not name a builder".to_string(),
            }
            .into());
        }
        Ok(builder)
    }
}

/// Parse a version as reported by buildx/BuildKit (`v0.12.1`, `0.12.1-desktop.4`)
pub fn parse_version(raw: &str) -> Option<Version> {
    static VERSION_RE: once_cell::sync::Lazy<regex::Regex> = once_cell::sync::Lazy::new(|| {
        regex::Regex::new(r"v?(\d+\.\d+\.\d+(?:[-+][0-9A-Za-z.\-+]*)?)")
            .expect("version regex is valid")
    });

    VERSION_RE
        .captures(raw)
        .and_then(|c| c.get(1))
        .and_then(|m| Version::parse(m.as_str()).ok())
}
