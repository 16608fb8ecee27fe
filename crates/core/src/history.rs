//! Build engine history store and record export
//!
//! Buildx keeps one small file per build under
//! `<buildx config>/refs/<builder>/<node>/<ref>`. The file's modification
//! time is the record's creation time.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Builder-level directory that holds activity markers, not records
const ACTIVITY_DIR: &str = "activity";

/// Extension of exported build record bundles
pub const EXPORT_EXTENSION: &str = "dockerbuild";

/// One record in the history store
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoryRecord {
    /// `<builder>/<node>/<ref>`
    pub reference: String,
    pub builder: String,
    pub node: String,
    pub created: DateTime<Utc>,
}

/// Directory-backed history store
#[derive(Debug, Clone)]
pub struct HistoryStore {
    root: PathBuf,
}

impl HistoryStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Store located under a buildx configuration directory
    pub fn in_config_dir(config_dir: &Path) -> Self {
        Self::new(config_dir.join("refs"))
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// All records of `builder`, in directory iteration order.
    ///
    /// Unreadable entries are skipped; a missing store yields no records.
    pub fn records(&self, builder: &str) -> Vec<HistoryRecord> {
        let builder_dir = self.root.join(builder);
        let mut records = Vec::new();

        let Ok(nodes) = std::fs::read_dir(&builder_dir) else {
            debug!("No history for builder {} at {}", builder, builder_dir.display());
            return records;
        };

        for node in nodes.flatten() {
            let node_name = node.file_name().to_string_lossy().to_string();
            if node_name == ACTIVITY_DIR || !node.path().is_dir() {
                continue;
            }
            let Ok(entries) = std::fs::read_dir(node.path()) else {
                continue;
            };
            for entry in entries.flatten() {
                let path = entry.path();
                if !path.is_file() {
                    continue;
                }
                let created = match entry.metadata().and_then(|m| m.modified()) {
                    Ok(mtime) => DateTime::<Utc>::from(mtime),
                    Err(e) => {
                        warn!("Cannot stat history record {}: {}", path.display(), e);
                        continue;
                    }
                };
                let file_name = entry.file_name().to_string_lossy().to_string();
                records.push(HistoryRecord {
                    reference: format!("{}/{}/{}", builder, node_name, file_name),
                    builder: builder.to_string(),
                    node: node_name.clone(),
                    created,
                });
            }
        }

        records
    }
}

/// Exported build record bundle
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExportResult {
    pub path: PathBuf,
    pub size: u64,
    pub refs: Vec<String>,
}

impl ExportResult {
    pub fn filename(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default()
    }

    pub fn human_size(&self) -> String {
        bytesize::ByteSize::b(self.size).to_string()
    }
}

/// Record id as accepted by `buildx history export` (last path segment)
pub fn record_id(reference: &str) -> &str {
    reference.rsplit('/').next().unwrap_or(reference)
}

/// Bundle file name: `<owner>~<repo>~<short id>.dockerbuild`
pub fn export_filename(repository: Option<&str>, refs: &[String]) -> String {
    let prefix = repository
        .map(|r| r.replace('/', "~"))
        .unwrap_or_else(|| "bake".to_string());
    let digest = blake3::hash(refs.join("\n").as_bytes()).to_hex();
    format!("{}~{}.{}", prefix, digest.as_str()[..6].to_uppercase(), EXPORT_EXTENSION)
}
