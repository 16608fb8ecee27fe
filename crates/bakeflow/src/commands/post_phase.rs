//! `bakeflow post`

use anyhow::{Context, Result};
use bakeflow_core::artifact::GithubPlatform;
use bakeflow_core::engine::CliBuildx;
use bakeflow_core::env::RuntimeEnv;
use bakeflow_core::finalize::{CleanupOutcome, SummaryOutcome};
use bakeflow_core::orchestrator::run_post;
use bakeflow_core::state::StateStore;
use tracing::{debug, info, instrument};

/// Run the post phase. Only a state store that cannot be opened is an error.
#[instrument(skip_all)]
pub async fn execute() -> Result<()> {
    let env = RuntimeEnv::from_process();
    let store = StateStore::for_post(&env).context("Failed to open state store")?;
    let engine = CliBuildx::from_env(&env);
    let platform = GithubPlatform::new(env.github()).context("Failed to create artifact client")?;

    let report = run_post(&engine, &platform, &env, &store).await;

    match &report.summary {
        SummaryOutcome::Published { export, upload } => info!(
            "Build summary published for {} ({})",
            export.filename(),
            upload
                .as_ref()
                .map(|u| u.url.as_str())
                .unwrap_or("not uploaded")
        ),
        SummaryOutcome::Skipped(reason) => debug!("Summary skipped: {}", reason),
        SummaryOutcome::Failed(_) => {}
    }
    if let CleanupOutcome::NothingRecorded = report.cleanup {
        debug!("No temporary directory recorded");
    }
    Ok(())
}
