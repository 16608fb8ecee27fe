//! Bake argument assembly
//!
//! Pure mapping from [`Inputs`] and the resolved [`BakeDefinition`] to the
//! literal argument list of the bake invocation. The credential token never
//! appears in the arguments; it travels in an environment overlay under
//! [`GIT_AUTH_TOKEN_ENV`] so it stays out of process listings and logs.

use crate::bake::BakeDefinition;
use crate::env::GIT_AUTH_TOKEN_ENV;
use crate::inputs::Inputs;
use crate::redaction::Secret;
use semver::Version;
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

/// Dry-run flag appended for the print pass
pub const PRINT_FLAG: &str = "--print";

/// Provenance used for public repositories when none is requested
pub const PROVENANCE_MAX: &str = "mode=max";

/// Provenance used for private repositories when none is requested
pub const PROVENANCE_PRIVATE: &str = "mode=min,inline-only=true";

fn min_metadata_file() -> Version {
    Version::new(0, 6, 0)
}

fn min_attestations() -> Version {
    Version::new(0, 10, 0)
}

fn min_buildkit_attestations() -> Version {
    Version::new(0, 11, 0)
}

/// Versions reported by the engine, used to gate flags
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineCapabilities {
    pub buildx: Version,
    pub buildkit: Option<Version>,
}

impl EngineCapabilities {
    pub fn supports_metadata_file(&self) -> bool {
        self.buildx >= min_metadata_file()
    }

    pub fn supports_attestations(&self) -> bool {
        self.buildx >= min_attestations()
    }

    fn buildkit_supports_attestations(&self) -> bool {
        self.buildkit
            .as_ref()
            .is_some_and(|v| *v >= min_buildkit_attestations())
    }
}

/// Run facts that influence argument assembly beyond the inputs
#[derive(Debug, Clone, Default)]
pub struct ArgsContext {
    /// Where the execution pass should write its metadata document
    pub metadata_file: Option<PathBuf>,
    pub repository_private: bool,
    pub no_default_attestations: bool,
}

/// Assembled invocation: arguments plus environment overlay
#[derive(Clone, PartialEq, Default)]
pub struct BakeCommand {
    pub args: Vec<String>,
    pub env: BTreeMap<String, String>,
}

impl fmt::Debug for BakeCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BakeCommand")
            .field("args", &self.args)
            .field("env", &self.env.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl BakeCommand {
    /// Assemble the bake command for the print and execution passes
    pub fn assemble(
        inputs: &Inputs,
        definition: &BakeDefinition,
        caps: &EngineCapabilities,
        ctx: &ArgsContext,
        token: Option<&Secret>,
    ) -> Self {
        let mut args = vec!["bake".to_string()];
        push_sources(&mut args, inputs);

        if caps.supports_metadata_file() {
            if let Some(path) = &ctx.metadata_file {
                args.push("--metadata-file".to_string());
                args.push(path.display().to_string());
            }
        }

        if caps.supports_attestations() {
            if let Some(provenance) = &inputs.provenance {
                args.push("--provenance".to_string());
                args.push(provenance.clone());
            } else if let Some(provenance) = default_provenance(inputs, definition, caps, ctx) {
                args.push("--provenance".to_string());
                args.push(provenance.to_string());
            }
            if let Some(sbom) = &inputs.sbom {
                args.push("--sbom".to_string());
                args.push(sbom.clone());
            }
        }

        args.extend(common_flags(inputs));
        args.extend(inputs.targets.iter().cloned());

        Self {
            args,
            env: env_overlay(token),
        }
    }

    /// Command that prints the resolved definition without building
    pub fn definition(inputs: &Inputs, token: Option<&Secret>) -> Self {
        let mut args = vec!["bake".to_string()];
        push_sources(&mut args, inputs);

        if let Some(provenance) = &inputs.provenance {
            args.push("--provenance".to_string());
            args.push(provenance.clone());
        }
        if let Some(sbom) = &inputs.sbom {
            args.push("--sbom".to_string());
            args.push(sbom.clone());
        }

        args.extend(common_flags(inputs));
        args.extend(inputs.targets.iter().cloned());
        args.push(PRINT_FLAG.to_string());

        Self {
            args,
            env: env_overlay(token),
        }
    }

    /// Same command with the dry-run flag appended
    pub fn with_print(&self) -> Self {
        let mut print = self.clone();
        if !print.args.iter().any(|a| a == PRINT_FLAG) {
            print.args.push(PRINT_FLAG.to_string());
        }
        print
    }

    /// Value following `--metadata-file`, if present
    pub fn metadata_file(&self) -> Option<PathBuf> {
        self.args
            .iter()
            .position(|a| a == "--metadata-file")
            .and_then(|i| self.args.get(i + 1))
            .map(PathBuf::from)
    }
}

fn push_sources(args: &mut Vec<String>, inputs: &Inputs) {
    if let Some(source) = inputs.remote_source() {
        args.push(source.to_string());
    }
    for file in &inputs.files {
        args.push("--file".to_string());
        args.push(file.clone());
    }
    for allow in &inputs.allow {
        args.push("--allow".to_string());
        args.push(allow.clone());
    }
    for set in &inputs.set {
        args.push("--set".to_string());
        args.push(set.clone());
    }
}

fn common_flags(inputs: &Inputs) -> Vec<String> {
    let mut flags = Vec::new();
    if inputs.no_cache {
        flags.push("--no-cache".to_string());
    }
    if let Some(builder) = &inputs.builder {
        flags.push("--builder".to_string());
        flags.push(builder.clone());
    }
    if inputs.pull {
        flags.push("--pull".to_string());
    }
    if inputs.load {
        flags.push("--load".to_string());
    }
    if inputs.push {
        flags.push("--push".to_string());
    }
    flags
}

/// Provenance applied when the inputs do not request one.
///
/// Only set when attestations are not disabled, the builder's BuildKit can
/// produce them, and nothing is exported to the docker image store (which
/// cannot hold attestation manifests).
fn default_provenance(
    inputs: &Inputs,
    definition: &BakeDefinition,
    caps: &EngineCapabilities,
    ctx: &ArgsContext,
) -> Option<&'static str> {
    if ctx.no_default_attestations
        || !caps.buildkit_supports_attestations()
        || definition.has_docker_exporter(inputs.load)
    {
        return None;
    }
    Some(if ctx.repository_private {
        PROVENANCE_PRIVATE
    } else {
        PROVENANCE_MAX
    })
}

/// Environment overlay carrying the credential token
pub fn env_overlay(token: Option<&Secret>) -> BTreeMap<String, String> {
    let mut env = BTreeMap::new();
    if let Some(token) = token.filter(|t| !t.is_empty()) {
        env.insert(GIT_AUTH_TOKEN_ENV.to_string(), token.expose().to_string());
    }
    env
}
