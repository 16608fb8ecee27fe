//! Post-phase finalizer
//!
//! Exports the build records named by the persisted references, uploads the
//! bundle, publishes the summary, and removes the run's temporary directory.
//! Nothing in here fails the job: summary problems become warnings, and the
//! temporary directory is removed whatever happened before.

use crate::artifact::{JobPlatform, UploadRequest, UploadResult, BUILD_RECORD_MIME_TYPE};
use crate::engine::{BuildEngine, ExportRequest};
use crate::env::RuntimeEnv;
use crate::errors::Result;
use crate::history::{export_filename, ExportResult};
use crate::state::PersistedState;
use crate::summary::BuildSummary;
use std::fmt;
use std::path::{Path, PathBuf};
use tracing::{info, instrument, warn};

/// Why summary generation did not run
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    NoBuildRefs,
    Disabled,
    Ghes,
    UnsupportedDriver(String),
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::NoBuildRefs => write!(f, "no build references"),
            SkipReason::Disabled => write!(f, "disabled through DOCKER_BUILD_SUMMARY"),
            SkipReason::Ghes => write!(f, "not supported on GitHub Enterprise Server"),
            SkipReason::UnsupportedDriver(driver) => {
                write!(f, "not supported with the {} driver", driver)
            }
        }
    }
}

/// Outcome of the summary chain
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SummaryOutcome {
    Published {
        export: ExportResult,
        upload: Option<UploadResult>,
    },
    Skipped(SkipReason),
    Failed(String),
}

/// Outcome of temporary directory removal
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CleanupOutcome {
    NothingRecorded,
    Removed(PathBuf),
    Failed { path: PathBuf, message: String },
}

/// Result of the post phase
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FinalizeReport {
    pub summary: SummaryOutcome,
    pub cleanup: CleanupOutcome,
}

/// First applicable reason to skip the summary, checked in a fixed order
pub fn summary_skip_reason(state: &PersistedState, env: &RuntimeEnv) -> Option<SkipReason> {
    if state.build_refs.is_empty() {
        return Some(SkipReason::NoBuildRefs);
    }
    if !env.summary_enabled() {
        return Some(SkipReason::Disabled);
    }
    if env.github().is_ghes() {
        return Some(SkipReason::Ghes);
    }
    if let Some(builder) = state.builder.as_ref().filter(|b| b.is_cloud()) {
        return Some(SkipReason::UnsupportedDriver(builder.driver.clone()));
    }
    None
}

/// Run the post phase over the persisted state
#[instrument(skip_all)]
pub async fn finalize<E, P>(
    engine: &E,
    platform: &P,
    state: &PersistedState,
    env: &RuntimeEnv,
) -> FinalizeReport
where
    E: BuildEngine,
    P: JobPlatform + ?Sized,
{
    let summary = match summary_skip_reason(state, env) {
        Some(reason) => {
            info!("Build summary skipped: {}", reason);
            SummaryOutcome::Skipped(reason)
        }
        None => match publish(engine, platform, state, env).await {
            Ok((export, upload)) => SummaryOutcome::Published { export, upload },
            Err(e) => {
                warn!("Failed to generate build summary: {}", e);
                SummaryOutcome::Failed(e.to_string())
            }
        },
    };

    let cleanup = cleanup(state.tmp_dir.as_deref()).await;

    FinalizeReport { summary, cleanup }
}

async fn publish<E, P>(
    engine: &E,
    platform: &P,
    state: &PersistedState,
    env: &RuntimeEnv,
) -> Result<(ExportResult, Option<UploadResult>)>
where
    E: BuildEngine,
    P: JobPlatform + ?Sized,
{
    let github = env.github();
    let dest_dir = state
        .tmp_dir
        .clone()
        .unwrap_or_else(std::env::temp_dir);
    let destination = dest_dir.join(export_filename(
        github.repository.as_deref(),
        &state.build_refs,
    ));

    let export = engine
        .export_history(&ExportRequest {
            refs: state.build_refs.clone(),
            builder: state.builder.as_ref().map(|b| b.name.clone()),
            destination,
        })
        .await?;
    info!(
        "Exported {} build record(s) to {} ({})",
        export.refs.len(),
        export.path.display(),
        export.human_size()
    );

    let upload = if env.record_upload_enabled() {
        let upload = platform
            .upload_artifact(&UploadRequest {
                path: export.path.clone(),
                mime_type: BUILD_RECORD_MIME_TYPE.to_string(),
                retention_days: env.record_retention_days(),
            })
            .await?;
        info!("Build record available at {}", upload.url);
        Some(upload)
    } else {
        info!("Build record upload disabled");
        None
    };

    let markdown = BuildSummary {
        export: &export,
        upload: upload.as_ref(),
        inputs: state.inputs.as_ref(),
        definition: state.bake_definition.as_ref(),
        builder: state.builder.as_ref(),
    }
    .render();
    platform.publish_summary(&markdown).await?;

    Ok((export, upload))
}

/// Remove the run's temporary directory, if one was recorded
pub async fn cleanup(tmp_dir: Option<&Path>) -> CleanupOutcome {
    let Some(path) = tmp_dir else {
        return CleanupOutcome::NothingRecorded;
    };

    match tokio::fs::remove_dir_all(path).await {
        Ok(()) => {
            info!("Removed temporary directory {}", path.display());
            CleanupOutcome::Removed(path.to_path_buf())
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            info!("Temporary directory {} already removed", path.display());
            CleanupOutcome::Removed(path.to_path_buf())
        }
        Err(e) => {
            warn!("Failed to remove temporary directory {}: {}", path.display(), e);
            CleanupOutcome::Failed {
                path: path.to_path_buf(),
                message: e.to_string(),
            }
        }
    }
}
