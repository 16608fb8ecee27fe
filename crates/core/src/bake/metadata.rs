//! Bake metadata document handling
//!
//! The execution pass writes a JSON metadata document (`--metadata-file`)
//! keyed by target name. It is read exactly once, to surface it as a step
//! output and to extract the build references the engine reports.

use crate::errors::{BakeflowError, InternalError, Result};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::Path;
use tracing::{debug, warn};

/// File name of the metadata document inside the run's temp directory
pub const METADATA_FILENAME: &str = "bake-metadata.json";

/// Per-target key carrying the build reference
pub const BUILD_REF_KEY: &str = "buildx.build.ref";

/// Metadata document emitted by the execution pass
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BakeMetadata(IndexMap<String, Value>);

impl BakeMetadata {
    /// Read the metadata document.
    ///
    /// Returns `Ok(None)` when the file is missing or empty. A malformed
    /// document is logged and treated as absent: the build already ran, and
    /// reference resolution has a fallback.
    pub fn read(path: &Path) -> Result<Option<Self>> {
        let content = match std::fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("No metadata file at {}", path.display());
                return Ok(None);
            }
            Err(e) => {
                return Err(BakeflowError::Internal(InternalError::Generic {
                    message: format!("Failed to read metadata file {}: {}", path.display(), e),
                }))
            }
        };

        if content.trim().is_empty() {
            debug!("Metadata file {} is empty", path.display());
            return Ok(None);
        }

        match serde_json::from_str::<BakeMetadata>(&content) {
            Ok(metadata) => Ok(Some(metadata)),
            Err(e) => {
                warn!("Ignoring malformed metadata file {}: {}", path.display(), e);
                Ok(None)
            }
        }
    }

    /// Build references embedded in the document, in target order
    pub fn build_refs(&self) -> Vec<String> {
        self.0
            .values()
            .filter_map(|entry| entry.get(BUILD_REF_KEY))
            .filter_map(|v| v.as_str())
            .filter(|r| !r.is_empty())
            .map(str::to_string)
            .collect()
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self).map_err(|e| {
            BakeflowError::Internal(InternalError::Generic {
                message: format!("Failed to serialize bake metadata: {}", e),
            })
        })
    }
}

impl From<IndexMap<String, Value>> for BakeMetadata {
    fn from(map: IndexMap<String, Value>) -> Self {
        Self(map)
    }
}
