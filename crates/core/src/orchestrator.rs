//! Main and post phase orchestration
//!
//! The main phase runs strictly in sequence:
//!
//! 1. persist the inputs and register the credential token for redaction
//! 2. preflight: buildx must be available
//! 3. create and persist the temporary directory
//! 4. inspect and persist the builder
//! 5. resolve and persist the bake definition
//! 6. assemble the command; print pass (any failure aborts)
//! 7. execution pass, classified but not yet acted upon
//! 8. read metadata, resolve and persist build references
//! 9. raise the execution failure, if any
//!
//! The post phase reads the persisted state back and hands it to the
//! finalizer.

use crate::artifact::JobPlatform;
use crate::bake::args::{ArgsContext, BakeCommand, EngineCapabilities};
use crate::bake::definition::resolve_definition;
use crate::bake::metadata::{BakeMetadata, METADATA_FILENAME};
use crate::bake::BakeDefinition;
use crate::builder::BuilderInfo;
use crate::command_file::append_command_file;
use crate::engine::{BakeInvocation, BuildEngine, InvocationKind};
use crate::env::RuntimeEnv;
use crate::errors::{BakeError, InternalError, PreflightError, Result};
use crate::finalize::{finalize, FinalizeReport};
use crate::inputs::Inputs;
use crate::process::{classify, Classification};
use crate::redaction::global_registry;
use crate::refs::{resolve_build_refs, BuildRefs};
use crate::state::StateStore;
use chrono::Utc;
use std::path::PathBuf;
use tracing::{debug, info, instrument, warn};

/// Prefix of the per-run temporary directory
pub const TMP_DIR_PREFIX: &str = "bakeflow-";

/// Step output carrying the metadata document
pub const METADATA_OUTPUT: &str = "metadata";

/// Outcome of a successful (or soft-failed) main phase
#[derive(Debug, Clone)]
pub struct MainReport {
    pub tmp_dir: PathBuf,
    pub builder: BuilderInfo,
    pub definition: BakeDefinition,
    pub metadata: Option<BakeMetadata>,
    pub build_refs: BuildRefs,
    pub classification: Classification,
}

/// Run the main phase
#[instrument(skip_all, fields(targets = ?inputs.targets))]
pub async fn run_main<E: BuildEngine>(
    engine: &E,
    inputs: &Inputs,
    env: &RuntimeEnv,
    store: &mut StateStore,
) -> Result<MainReport> {
    let started = Utc::now();
    store.set_inputs(inputs)?;

    let token = env.git_auth_token(inputs.github_token.as_ref());
    if let Some(token) = &token {
        global_registry().add_secret(token.expose());
    }

    let buildx = engine
        .buildx_version()
        .await?
        .ok_or(PreflightError::BuildxUnavailable)?;
    info!("Using buildx {}", buildx);

    let tmp_dir = tempfile::Builder::new()
        .prefix(TMP_DIR_PREFIX)
        .tempdir()
        .map_err(PreflightError::TempDir)?
        .keep();
    store.set_tmp_dir(&tmp_dir)?;
    debug!("Temporary directory {}", tmp_dir.display());

    let builder = engine.inspect_builder(inputs.builder.as_deref()).await?;
    store.set_builder(&builder)?;
    info!("Using builder {} ({} driver)", builder.name, builder.driver);

    let definition = resolve_definition(engine, inputs, token.as_ref()).await?;
    store.set_bake_definition(&definition)?;

    let caps = EngineCapabilities {
        buildx,
        buildkit: builder.buildkit_version(),
    };
    let ctx = ArgsContext {
        metadata_file: Some(tmp_dir.join(METADATA_FILENAME)),
        repository_private: env.github().repository_private(),
        no_default_attestations: env.no_default_attestations(),
    };
    let command = BakeCommand::assemble(inputs, &definition, &caps, &ctx, token.as_ref());

    let print = engine
        .bake(&BakeInvocation {
            kind: InvocationKind::Print,
            command: command.with_print(),
            cwd: inputs.workdir.clone(),
        })
        .await?;
    if !print.success() {
        return Err(BakeError::PrintFailed {
            message: global_registry().redact_text(&print.error_message()),
        }
        .into());
    }

    let metadata_file = command.metadata_file();
    let result = engine
        .bake(&BakeInvocation {
            kind: InvocationKind::Execute,
            command,
            cwd: inputs.workdir.clone(),
        })
        .await?;
    let classification = classify(&result);
    match &classification {
        Classification::Success => info!("Bake completed"),
        Classification::Warning => warn!(
            "Bake exited with code {} and is not considered failed",
            result.exit_code
        ),
        Classification::Failure { message } => debug!("Bake failed: {}", message),
    }

    let metadata = match metadata_file.as_deref() {
        Some(path) => BakeMetadata::read(path).unwrap_or_else(|e| {
            warn!("{}", e);
            None
        }),
        None => None,
    };
    if let Some(metadata) = &metadata {
        write_metadata_output(env, metadata);
    }

    let build_refs = resolve_build_refs(engine, metadata.as_ref(), started, Some(&builder)).await;
    if build_refs.is_empty() {
        warn!("No build references found");
    } else {
        store.set_build_refs(&build_refs.refs)?;
    }

    if let Classification::Failure { message } = classification {
        return Err(BakeError::ExecutionFailed {
            message: global_registry().redact_text(&message),
        }
        .into());
    }

    Ok(MainReport {
        tmp_dir,
        builder,
        definition,
        metadata,
        build_refs,
        classification,
    })
}

fn write_metadata_output(env: &RuntimeEnv, metadata: &BakeMetadata) {
    let Some(output) = env.github().output_file else {
        return;
    };
    let written = metadata.to_json().and_then(|json| {
        append_command_file(&output, METADATA_OUTPUT, &json).map_err(|e| {
            InternalError::Generic {
                message: format!("Failed to write step output: {}", e),
            }
            .into()
        })
    });
    if let Err(e) = written {
        warn!("Cannot set metadata output: {}", e);
    }
}

/// Run the post phase
#[instrument(skip_all)]
pub async fn run_post<E, P>(
    engine: &E,
    platform: &P,
    env: &RuntimeEnv,
    store: &StateStore,
) -> FinalizeReport
where
    E: BuildEngine,
    P: JobPlatform + ?Sized,
{
    let state = store.read();
    finalize(engine, platform, &state, env).await
}
