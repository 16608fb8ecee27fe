//! `bakeflow main`

use crate::cli::MainArgs;
use anyhow::{Context, Result};
use bakeflow_core::engine::CliBuildx;
use bakeflow_core::env::RuntimeEnv;
use bakeflow_core::orchestrator::run_main;
use bakeflow_core::process::Classification;
use bakeflow_core::state::StateStore;
use tracing::{info, instrument, warn};

/// Run the main phase against the local `docker buildx`
#[instrument(skip_all)]
pub async fn execute(args: MainArgs) -> Result<()> {
    let env = RuntimeEnv::from_process();
    let inputs = args.into_inputs(&env);
    let mut store = StateStore::for_main(&env).context("Failed to open state store")?;
    let engine = CliBuildx::from_env(&env);

    let report = run_main(&engine, &inputs, &env, &mut store).await?;

    if report.classification == Classification::Warning {
        warn!("Bake finished with warnings");
    }
    info!(
        "Built {} target(s) with {} build reference(s)",
        report.definition.target.len(),
        report.build_refs.refs.len()
    );
    Ok(())
}
