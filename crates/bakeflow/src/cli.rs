//! Command-line interface
//!
//! Every main-phase input can be given as a flag or, when running as a CI
//! step, through the runner's `INPUT_<NAME>` environment variables.

use anyhow::Result;
use bakeflow_core::env::{parse_list, RuntimeEnv};
use bakeflow_core::inputs::Inputs;
use bakeflow_core::redaction::Secret;
use clap::{Args, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// Log format options
#[derive(Debug, Clone, ValueEnum)]
pub enum LogFormat {
    /// Human-readable text format
    Text,
    /// JSON structured format
    Json,
}

/// Log level options
#[derive(Debug, Clone, ValueEnum)]
pub enum LogLevel {
    /// Error messages only
    Error,
    /// Warning and error messages
    Warn,
    /// Informational messages and above
    Info,
    /// Debug messages and above
    Debug,
    /// All messages including trace
    Trace,
}

/// Drive `docker buildx bake` as a two-phase CI step
#[derive(Debug, Parser)]
#[command(name = "bakeflow", version)]
pub struct Cli {
    /// Log output format
    #[arg(long, global = true, value_enum)]
    pub log_format: Option<LogFormat>,

    /// Log level
    #[arg(long, global = true, value_enum, default_value = "info")]
    pub log_level: LogLevel,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Resolve the definition, run the build, and persist state for the post phase
    Main(MainArgs),
    /// Export and upload build records, publish the summary, and clean up
    Post,
}

/// Inputs of the main phase
#[derive(Debug, Clone, Args)]
pub struct MainArgs {
    /// Target or group names to build
    #[arg(value_name = "TARGET")]
    pub targets: Vec<String>,

    /// Bake definition file (repeatable)
    #[arg(long = "file", short = 'f', value_name = "PATH")]
    pub files: Vec<String>,

    /// Resource access entitlement (repeatable)
    #[arg(long, value_name = "ENTITLEMENT")]
    pub allow: Vec<String>,

    /// Override expression, e.g. `*.platform=linux/amd64` (repeatable)
    #[arg(long, value_name = "EXPR")]
    pub set: Vec<String>,

    /// Builder instance name
    #[arg(long, env = "INPUT_BUILDER")]
    pub builder: Option<String>,

    /// Remote definition source
    #[arg(long, env = "INPUT_SOURCE")]
    pub source: Option<String>,

    /// Working directory for the build engine
    #[arg(long, env = "INPUT_WORKDIR", default_value = ".")]
    pub workdir: PathBuf,

    /// Provenance attestation setting
    #[arg(long, env = "INPUT_PROVENANCE")]
    pub provenance: Option<String>,

    /// SBOM attestation setting
    #[arg(long, env = "INPUT_SBOM")]
    pub sbom: Option<String>,

    /// Load the result into the docker image store
    #[arg(long, env = "INPUT_LOAD")]
    pub load: bool,

    /// Do not use cache when building
    #[arg(long, env = "INPUT_NO-CACHE")]
    pub no_cache: bool,

    /// Always attempt to pull newer versions of base images
    #[arg(long, env = "INPUT_PULL")]
    pub pull: bool,

    /// Push the result to the registry
    #[arg(long, env = "INPUT_PUSH")]
    pub push: bool,

    /// Token used to fetch remote definition sources
    #[arg(long, env = "INPUT_GITHUB-TOKEN", hide_env_values = true)]
    pub github_token: Option<String>,
}

impl MainArgs {
    /// Build the run's inputs; list flags fall back to runner inputs
    pub fn into_inputs(self, env: &RuntimeEnv) -> Inputs {
        let list = |values: Vec<String>, key: &str, split_commas: bool| {
            if values.is_empty() {
                env.get(key)
                    .map(|raw| parse_list(raw, split_commas))
                    .unwrap_or_default()
            } else {
                values
            }
        };

        Inputs {
            targets: list(self.targets, "INPUT_TARGETS", true),
            files: list(self.files, "INPUT_FILES", true),
            allow: list(self.allow, "INPUT_ALLOW", true),
            set: list(self.set, "INPUT_SET", false),
            builder: non_empty(self.builder),
            source: non_empty(self.source),
            workdir: self.workdir,
            provenance: non_empty(self.provenance),
            sbom: non_empty(self.sbom),
            load: self.load,
            no_cache: self.no_cache,
            pull: self.pull,
            push: self.push,
            github_token: non_empty(self.github_token).map(Secret::new),
        }
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

impl Cli {
    pub async fn dispatch(self) -> Result<()> {
        let log_format = match self.log_format {
            Some(LogFormat::Text) => Some("text"),
            Some(LogFormat::Json) => Some("json"),
            None => None,
        };

        let log_level = match self.log_level {
            LogLevel::Error => "error",
            LogLevel::Warn => "warn",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
            LogLevel::Trace => "trace",
        };

        if std::env::var_os(bakeflow_core::logging::LOG_ENV).is_none()
            && std::env::var_os("RUST_LOG").is_none()
        {
            std::env::set_var(
                "RUST_LOG",
                format!("bakeflow={},bakeflow_core={}", log_level, log_level),
            );
        }
        bakeflow_core::logging::init(log_format)?;
        tracing::debug!("CLI initialized with log level: {}", log_level);

        match self.command {
            Commands::Main(args) => crate::commands::main_phase::execute(args).await,
            Commands::Post => crate::commands::post_phase::execute().await,
        }
    }
}
