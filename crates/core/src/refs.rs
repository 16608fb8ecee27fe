//! Build reference resolution
//!
//! Strategies are tried in order and the first non-empty result wins:
//!
//! 1. references embedded in the metadata document
//! 2. history store records for the builder created since the run started
//!
//! Resolution never fails the run. When nothing is found the result is empty
//! and the caller logs a warning.

use crate::bake::metadata::BakeMetadata;
use crate::builder::BuilderInfo;
use crate::engine::BuildEngine;
use crate::history::HistoryRecord;
use chrono::{DateTime, Utc};
use tracing::{debug, info, instrument, warn};

/// Where the references came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefSource {
    Metadata,
    History,
}

/// Resolved build references
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct BuildRefs {
    pub refs: Vec<String>,
    pub source: Option<RefSource>,
}

impl BuildRefs {
    pub fn is_empty(&self) -> bool {
        self.refs.is_empty()
    }
}

/// References reported in the metadata document, verbatim
pub fn refs_from_metadata(metadata: Option<&BakeMetadata>) -> Vec<String> {
    metadata.map(BakeMetadata::build_refs).unwrap_or_default()
}

/// History records of `builder` created at or after `since`
pub fn refs_from_history(
    records: &[HistoryRecord],
    builder: &str,
    since: DateTime<Utc>,
) -> Vec<String> {
    records
        .iter()
        .filter(|r| r.builder == builder && r.created >= since)
        .map(|r| r.reference.clone())
        .collect()
}

/// Resolve the build references of the run that started at `since`
#[instrument(skip_all)]
pub async fn resolve_build_refs<E: BuildEngine>(
    engine: &E,
    metadata: Option<&BakeMetadata>,
    since: DateTime<Utc>,
    builder: Option<&BuilderInfo>,
) -> BuildRefs {
    let from_metadata = refs_from_metadata(metadata);
    if !from_metadata.is_empty() {
        debug!("Found {} build reference(s) in metadata", from_metadata.len());
        return BuildRefs {
            refs: from_metadata,
            source: Some(RefSource::Metadata),
        };
    }

    let builder_name = match builder {
        Some(builder) => builder.name.clone(),
        None => match engine.inspect_builder(None).await {
            Ok(builder) => builder.name,
            Err(e) => {
                warn!("Cannot determine builder for history lookup: {}", e);
                return BuildRefs::default();
            }
        },
    };

    let Some(store) = engine.history_store() else {
        debug!("History store location unknown");
        return BuildRefs::default();
    };

    let records = store.records(&builder_name);
    let from_history = refs_from_history(&records, &builder_name, since);
    if from_history.is_empty() {
        return BuildRefs::default();
    }

    info!(
        "Found {} build reference(s) in history for builder {}",
        from_history.len(),
        builder_name
    );
    BuildRefs {
        refs: from_history,
        source: Some(RefSource::History),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::mock::{MockCall, MockEngine, MockEngineConfig};
    use chrono::Duration;
    use indexmap::IndexMap;

    fn record(reference: &str, builder: &str, created: DateTime<Utc>) -> HistoryRecord {
        HistoryRecord {
            reference: reference.to_string(),
            builder: builder.to_string(),
            node: format!("{}0", builder),
            created,
        }
    }

    #[test]
    fn test_history_filter_by_builder_and_time() {
        let since = Utc::now();
        let records = vec![
            record("ci/ci0/old", "ci", since - Duration::seconds(30)),
            record("ci/ci0/new", "ci", since + Duration::seconds(5)),
            record("ci/ci0/exact", "ci", since),
            record("other/other0/new", "other", since + Duration::seconds(5)),
        ];

        assert_eq!(
            refs_from_history(&records, "ci", since),
            vec!["ci/ci0/new", "ci/ci0/exact"]
        );
    }

    #[tokio::test]
    async fn test_metadata_wins() {
        let metadata = BakeMetadata::from(IndexMap::from([(
            "app".to_string(),
            serde_json::json!({"buildx.build.ref": "abc123"}),
        )]));
        let engine = MockEngine::new();

        let refs = resolve_build_refs(&engine, Some(&metadata), Utc::now(), None).await;
        assert_eq!(refs.refs, vec!["abc123"]);
        assert_eq!(refs.source, Some(RefSource::Metadata));
        assert!(engine.calls().is_empty());
    }

    #[tokio::test]
    async fn test_metadata_refs_ignore_populated_history() {
        let dir = tempfile::tempdir().unwrap();
        let since = Utc::now() - Duration::seconds(60);
        std::fs::create_dir_all(dir.path().join("default/default0")).unwrap();
        std::fs::write(dir.path().join("default/default0/fromhistory"), "{}").unwrap();

        let metadata = BakeMetadata::from(IndexMap::from([
            (
                "app".to_string(),
                serde_json::json!({"buildx.build.ref": "default/default0/aaa"}),
            ),
            (
                "db".to_string(),
                serde_json::json!({"buildx.build.ref": "default/default0/bbb"}),
            ),
        ]));
        let engine = MockEngine::with_config(MockEngineConfig {
            history_root: Some(dir.path().to_path_buf()),
            ..Default::default()
        });

        let refs = resolve_build_refs(&engine, Some(&metadata), since, None).await;
        assert_eq!(refs.refs, vec!["default/default0/aaa", "default/default0/bbb"]);
        assert_eq!(refs.source, Some(RefSource::Metadata));
        assert!(!engine
            .calls()
            .iter()
            .any(|call| matches!(call, MockCall::Inspect(_))));
    }

    #[tokio::test]
    async fn test_history_fallback() {
        let dir = tempfile::tempdir().unwrap();
        let since = Utc::now() - Duration::seconds(60);
        std::fs::create_dir_all(dir.path().join("default/default0")).unwrap();
        std::fs::write(dir.path().join("default/default0/rec1"), "{}").unwrap();

        let engine = MockEngine::with_config(MockEngineConfig {
            history_root: Some(dir.path().to_path_buf()),
            ..Default::default()
        });

        let refs = resolve_build_refs(&engine, None, since, None).await;
        assert_eq!(refs.refs, vec!["default/default0/rec1"]);
        assert_eq!(refs.source, Some(RefSource::History));
    }

    #[tokio::test]
    async fn test_inspect_failure_yields_empty() {
        let engine = MockEngine::with_config(MockEngineConfig {
            inspect_error: Some("no builder".to_string()),
            ..Default::default()
        });

        let refs = resolve_build_refs(&engine, None, Utc::now(), None).await;
        assert!(refs.is_empty());
        assert_eq!(refs.source, None);
    }
}
