//! Bake definition resolution
//!
//! The engine is asked to print the fully merged definition (files, overrides
//! and remote sources applied) without building anything. The printed JSON is
//! parsed once into a [`BakeDefinition`].

use crate::bake::args::BakeCommand;
use crate::bake::BakeDefinition;
use crate::engine::{BakeInvocation, BuildEngine, InvocationKind};
use crate::errors::{DefinitionError, Result};
use crate::inputs::Inputs;
use crate::redaction::{global_registry, Secret};
use tracing::{debug, info, instrument};

/// Resolve the bake definition selected by `inputs`
#[instrument(skip_all, fields(targets = ?inputs.targets))]
pub async fn resolve_definition<E: BuildEngine>(
    engine: &E,
    inputs: &Inputs,
    token: Option<&Secret>,
) -> Result<BakeDefinition> {
    let invocation = BakeInvocation {
        kind: InvocationKind::Definition,
        command: BakeCommand::definition(inputs, token),
        cwd: inputs.workdir.clone(),
    };

    let result = engine.bake(&invocation).await?;
    if !result.success() {
        return Err(DefinitionError::Resolve {
            message: global_registry().redact_text(&result.error_message()),
        }
        .into());
    }

    let definition = parse_definition(&result.stdout)?;
    info!(
        "Resolved bake definition with {} target(s): {}",
        definition.target.len(),
        definition.target_names().join(", ")
    );
    Ok(definition)
}

/// Parse printed definition JSON, rejecting definitions without targets
pub fn parse_definition(printed: &str) -> Result<BakeDefinition> {
    let definition: BakeDefinition =
        serde_json::from_str(printed.trim()).map_err(DefinitionError::from)?;
    if definition.is_empty() {
        return Err(DefinitionError::NoTargets.into());
    }
    debug!("Definition groups: {:?}", definition.group.keys().collect::<Vec<_>>());
    Ok(definition)
}
