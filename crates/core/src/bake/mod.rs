//! Bake domain types and logic
//!
//! This module contains the resolved bake definition model, argument
//! assembly for the bake invocation, definition resolution, and metadata
//! handling.
//!
//! ## Design Principles
//!
//! - The definition is produced once and is read-only afterwards
//! - Unknown definition keys are preserved so the persisted copy is verbatim
//! - Argument assembly is pure; all I/O happens in the resolver and runner

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub mod args;
pub mod definition;
pub mod metadata;

/// Resolved build plan as printed by `buildx bake --print`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BakeDefinition {
    /// Group name to group definition
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub group: IndexMap<String, Group>,

    /// Target name to build configuration
    #[serde(default)]
    pub target: IndexMap<String, Target>,

    /// Keys this model does not interpret
    #[serde(flatten)]
    pub extra: IndexMap<String, Value>,
}

/// Named group of targets
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Group {
    #[serde(default)]
    pub targets: Vec<String>,

    #[serde(flatten)]
    pub extra: IndexMap<String, Value>,
}

/// Build configuration of a single target
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct Target {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dockerfile: Option<String>,

    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub args: IndexMap<String, Option<String>>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub platforms: Vec<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub output: Vec<ExportOutput>,

    #[serde(flatten)]
    pub extra: IndexMap<String, Value>,
}

/// An exporter entry: either the CSV form (`type=docker,dest=out.tar`) or
/// the structured form emitted by newer engines
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ExportOutput {
    Csv(String),
    Structured(IndexMap<String, Value>),
}

impl ExportOutput {
    /// The exporter type, if one is declared
    pub fn exporter_type(&self) -> Option<String> {
        match self {
            ExportOutput::Csv(raw) => raw.split(',').find_map(|field| {
                let (key, value) = field.split_once('=')?;
                (key.trim() == "type").then(|| value.trim().to_string())
            }),
            ExportOutput::Structured(map) => map
                .get("type")
                .and_then(|v| v.as_str())
                .map(str::to_string),
        }
    }
}

impl BakeDefinition {
    /// True when the images end up in the local docker image store, either
    /// through `--load` or a `type=docker` exporter on any target.
    pub fn has_docker_exporter(&self, load: bool) -> bool {
        if load {
            return true;
        }
        self.target.values().any(|target| {
            target
                .output
                .iter()
                .any(|output| output.exporter_type().as_deref() == Some("docker"))
        })
    }

    /// Target names in definition order
    pub fn target_names(&self) -> Vec<&str> {
        self.target.keys().map(String::as_str).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.target.is_empty()
    }
}
