//! Build engine abstraction
//!
//! The orchestrator talks to the build engine only through [`BuildEngine`].
//! [`CliBuildx`] drives `docker buildx` as a subprocess; the [`mock`] module
//! provides a scriptable implementation for tests.

use crate::bake::args::BakeCommand;
use crate::builder::{parse_version, BuilderInfo};
use crate::env::RuntimeEnv;
use crate::errors::{BakeError, BakeflowError, HistoryError, PreflightError, Result};
use crate::history::{record_id, ExportResult, HistoryStore};
use crate::process::{self, CommandSpec, ExecutionResult};
use crate::redaction::{global_registry, SecretRegistry};
use semver::Version;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{debug, instrument, warn};

/// Which pass a bake invocation belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvocationKind {
    /// `bake --print` used to resolve the definition document
    Definition,
    /// Dry run of the assembled command
    Print,
    /// The real build
    Execute,
}

/// One bake invocation
#[derive(Debug, Clone)]
pub struct BakeInvocation {
    pub kind: InvocationKind,
    pub command: BakeCommand,
    pub cwd: PathBuf,
}

/// Request to export build records into a single bundle file
#[derive(Debug, Clone)]
pub struct ExportRequest {
    pub refs: Vec<String>,
    pub builder: Option<String>,
    pub destination: PathBuf,
}

/// Build engine operations used by the main and post phases
#[allow(async_fn_in_trait)]
pub trait BuildEngine {
    /// Installed buildx version, `None` when buildx is unavailable
    async fn buildx_version(&self) -> Result<Option<Version>>;

    /// Inspect the named builder, or the default one
    async fn inspect_builder(&self, name: Option<&str>) -> Result<BuilderInfo>;

    /// Run a bake invocation to completion
    async fn bake(&self, invocation: &BakeInvocation) -> Result<ExecutionResult>;

    /// Export build records to `request.destination`
    async fn export_history(&self, request: &ExportRequest) -> Result<ExportResult>;

    /// Local history store, if its location is known
    fn history_store(&self) -> Option<HistoryStore>;
}

/// `docker buildx` driven as a subprocess
#[derive(Debug, Clone)]
pub struct CliBuildx {
    docker_path: String,
    config_dir: Option<PathBuf>,
    registry: SecretRegistry,
}

impl CliBuildx {
    pub fn new(docker_path: impl Into<String>, config_dir: Option<PathBuf>) -> Self {
        Self {
            docker_path: docker_path.into(),
            config_dir,
            registry: global_registry().clone(),
        }
    }

    pub fn from_env(env: &RuntimeEnv) -> Self {
        Self::new(env.docker_path(), env.buildx_config_dir())
    }

    async fn buildx(
        &self,
        args: Vec<String>,
        env: &BTreeMap<String, String>,
        cwd: &Path,
        echo: bool,
    ) -> Result<ExecutionResult> {
        let mut full = Vec::with_capacity(args.len() + 1);
        full.push("buildx".to_string());
        full.extend(args);

        process::run(
            CommandSpec {
                program: &self.docker_path,
                args: full,
                env,
                cwd,
                echo,
            },
            &self.registry,
        )
        .await
    }
}

fn current_dir() -> PathBuf {
    std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."))
}

impl BuildEngine for CliBuildx {
    #[instrument(skip(self))]
    async fn buildx_version(&self) -> Result<Option<Version>> {
        let result = match self
            .buildx(vec!["version".to_string()], &BTreeMap::new(), &current_dir(), false)
            .await
        {
            Ok(result) => result,
            Err(BakeflowError::Bake(BakeError::Spawn { program, source })) => {
                debug!("Cannot launch {}: {}", program, source);
                return Ok(None);
            }
            Err(e) => return Err(e),
        };

        if !result.success() {
            debug!("buildx version exited with {}", result.exit_code);
            return Ok(None);
        }

        let version = parse_version(&result.stdout);
        if version.is_none() {
            warn!("Cannot parse buildx version from '{}'", result.stdout.trim());
        }
        Ok(version)
    }

    #[instrument(skip(self))]
    async fn inspect_builder(&self, name: Option<&str>) -> Result<BuilderInfo> {
        let mut args = vec!["inspect".to_string()];
        if let Some(name) = name {
            args.push(name.to_string());
        }

        let result = self.buildx(args, &BTreeMap::new(), &current_dir(), false).await?;
        if !result.success() {
            return Err(PreflightError::BuilderInspect {
                name: name.unwrap_or("default").to_string(),
                message: result.error_message(),
            }
            .into());
        }
        BuilderInfo::parse_inspect(&result.stdout)
    }

    #[instrument(skip_all, fields(kind = ?invocation.kind))]
    async fn bake(&self, invocation: &BakeInvocation) -> Result<ExecutionResult> {
        let echo = invocation.kind != InvocationKind::Definition;
        self.buildx(
            invocation.command.args.clone(),
            &invocation.command.env,
            &invocation.cwd,
            echo,
        )
        .await
    }

    #[instrument(skip_all, fields(refs = request.refs.len()))]
    async fn export_history(&self, request: &ExportRequest) -> Result<ExportResult> {
        let mut args = vec!["history".to_string(), "export".to_string()];
        if let Some(builder) = &request.builder {
            args.push("--builder".to_string());
            args.push(builder.clone());
        }
        args.push("--output".to_string());
        args.push(request.destination.display().to_string());
        args.extend(request.refs.iter().map(|r| record_id(r).to_string()));

        let result = self.buildx(args, &BTreeMap::new(), &current_dir(), true).await?;
        if !result.success() {
            return Err(HistoryError::Export {
                message: result.error_message(),
            }
            .into());
        }

        let size = tokio::fs::metadata(&request.destination)
            .await
            .map_err(HistoryError::from)?
            .len();

        Ok(ExportResult {
            path: request.destination.clone(),
            size,
            refs: request.refs.clone(),
        })
    }

    fn history_store(&self) -> Option<HistoryStore> {
        self.config_dir.as_deref().map(HistoryStore::in_config_dir)
    }
}

pub mod mock {
    //! Scriptable build engine for testing the main and post phases
    //!
    //! Responses are configured up front; every call is recorded so tests
    //! can assert on the exact sequence of engine operations.

    use super::{BakeInvocation, BuildEngine, ExportRequest, InvocationKind};
    use crate::builder::{BuilderInfo, NodeInfo};
    use crate::errors::{HistoryError, InternalError, PreflightError, Result};
    use crate::history::{ExportResult, HistoryStore};
    use crate::process::ExecutionResult;
    use semver::Version;
    use std::path::PathBuf;
    use std::sync::{Arc, Mutex};

    /// Definition printed by default: a single `app` target
    pub const DEFAULT_DEFINITION: &str =
        r#"{"group":{"default":{"targets":["app"]}},"target":{"app":{"context":".","dockerfile":"Dockerfile"}}}"#;

    /// Configuration for the mock engine
    #[derive(Debug, Clone)]
    pub struct MockEngineConfig {
        /// `None` simulates a missing buildx installation
        pub buildx_version: Option<Version>,
        pub builder: BuilderInfo,
        /// Fail builder inspection with this message
        pub inspect_error: Option<String>,
        pub definition: ExecutionResult,
        pub print: ExecutionResult,
        pub execute: ExecutionResult,
        /// Document written to `--metadata-file` on the execution pass
        pub metadata: Option<serde_json::Value>,
        pub history_root: Option<PathBuf>,
        /// Bytes written to the exported bundle
        pub export_size: usize,
        /// Fail history export with this message
        pub export_error: Option<String>,
    }

    impl Default for MockEngineConfig {
        fn default() -> Self {
            Self {
                buildx_version: Some(Version::new(0, 12, 1)),
                builder: BuilderInfo {
                    name: "default".to_string(),
                    driver: "docker-container".to_string(),
                    last_activity: None,
                    nodes: vec![NodeInfo {
                        name: "default0".to_string(),
                        endpoint: Some("unix:///var/run/docker.sock".to_string()),
                        status: Some("running".to_string()),
                        buildkit_version: Some("v0.12.5".to_string()),
                        platforms: vec!["linux/amd64".to_string()],
                    }],
                },
                inspect_error: None,
                definition: ExecutionResult::new(0, DEFAULT_DEFINITION, ""),
                print: ExecutionResult::new(0, DEFAULT_DEFINITION, ""),
                execute: ExecutionResult::new(0, "", ""),
                metadata: None,
                history_root: None,
                export_size: 1024,
                export_error: None,
            }
        }
    }

    /// Recorded engine call
    #[derive(Debug, Clone, PartialEq)]
    pub enum MockCall {
        Version,
        Inspect(Option<String>),
        Bake {
            kind: InvocationKind,
            args: Vec<String>,
            env_keys: Vec<String>,
        },
        Export {
            refs: Vec<String>,
            builder: Option<String>,
            destination: PathBuf,
        },
    }

    /// Mock build engine
    #[derive(Debug, Clone, Default)]
    pub struct MockEngine {
        config: MockEngineConfig,
        calls: Arc<Mutex<Vec<MockCall>>>,
    }

    impl MockEngine {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn with_config(config: MockEngineConfig) -> Self {
            Self {
                config,
                calls: Arc::new(Mutex::new(Vec::new())),
            }
        }

        /// All calls made so far, in order
        pub fn calls(&self) -> Vec<MockCall> {
            self.calls.lock().map(|c| c.clone()).unwrap_or_default()
        }

        /// Bake invocations of the given kind, as argument lists
        pub fn bake_calls(&self, kind: InvocationKind) -> Vec<Vec<String>> {
            self.calls()
                .into_iter()
                .filter_map(|call| match call {
                    MockCall::Bake { kind: k, args, .. } if k == kind => Some(args),
                    _ => None,
                })
                .collect()
        }

        pub fn export_calls(&self) -> Vec<MockCall> {
            self.calls()
                .into_iter()
                .filter(|call| matches!(call, MockCall::Export { .. }))
                .collect()
        }

        fn record(&self, call: MockCall) {
            if let Ok(mut calls) = self.calls.lock() {
                calls.push(call);
            }
        }
    }

    impl BuildEngine for MockEngine {
        async fn buildx_version(&self) -> Result<Option<Version>> {
            self.record(MockCall::Version);
            Ok(self.config.buildx_version.clone())
        }

        async fn inspect_builder(&self, name: Option<&str>) -> Result<BuilderInfo> {
            self.record(MockCall::Inspect(name.map(str::to_string)));
            if let Some(message) = &self.config.inspect_error {
                return Err(PreflightError::BuilderInspect {
                    name: name.unwrap_or("default").to_string(),
                    message: message.clone(),
                }
                .into());
            }
            let mut builder = self.config.builder.clone();
            if let Some(name) = name {
                builder.name = name.to_string();
            }
            Ok(builder)
        }

        async fn bake(&self, invocation: &BakeInvocation) -> Result<ExecutionResult> {
            self.record(MockCall::Bake {
                kind: invocation.kind,
                args: invocation.command.args.clone(),
                env_keys: invocation.command.env.keys().cloned().collect(),
            });

            match invocation.kind {
                InvocationKind::Definition => Ok(self.config.definition.clone()),
                InvocationKind::Print => Ok(self.config.print.clone()),
                InvocationKind::Execute => {
                    if let (Some(metadata), Some(path)) =
                        (&self.config.metadata, invocation.command.metadata_file())
                    {
                        std::fs::write(&path, metadata.to_string()).map_err(|e| {
                            InternalError::Generic {
                                message: format!("mock metadata write failed: {}", e),
                            }
                        })?;
                    }
                    Ok(self.config.execute.clone())
                }
            }
        }

        async fn export_history(&self, request: &ExportRequest) -> Result<ExportResult> {
            self.record(MockCall::Export {
                refs: request.refs.clone(),
                builder: request.builder.clone(),
                destination: request.destination.clone(),
            });
            if let Some(message) = &self.config.export_error {
                return Err(HistoryError::Export {
                    message: message.clone(),
                }
                .into());
            }

            std::fs::write(&request.destination, vec![0u8; self.config.export_size])
                .map_err(HistoryError::from)?;
            Ok(ExportResult {
                path: request.destination.clone(),
                size: self.config.export_size as u64,
                refs: request.refs.clone(),
            })
        }

        fn history_store(&self) -> Option<HistoryStore> {
            self.config.history_root.clone().map(HistoryStore::new)
        }
    }
}
