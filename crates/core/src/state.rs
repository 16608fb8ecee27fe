//! Cross-phase persisted state
//!
//! The main phase writes each value as soon as it is known, exactly once, so
//! that an early exit still leaves enough behind for the post phase to clean
//! up. The post phase reads everything back; any value that was never
//! written (or cannot be decoded) reads as unset and makes the corresponding
//! finalization step a no-op.
//!
//! Two durable backends are supported:
//!
//! - **Runner**: entries are appended to the `GITHUB_STATE` command file and
//!   handed back by the runner as `STATE_<key>` variables in the post phase.
//! - **Directory**: one JSON file per key, written atomically (temp file +
//!   rename), for runs outside a CI runner.

use crate::bake::BakeDefinition;
use crate::builder::BuilderInfo;
use crate::command_file::append_command_file;
use crate::env::RuntimeEnv;
use crate::errors::{Result, StateError};
use crate::inputs::Inputs;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use tracing::{debug, info, instrument, warn};

/// Default directory name for the directory backend
pub const DEFAULT_STATE_DIRNAME: &str = "bakeflow-state";

/// Keys of the persisted state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StateKey {
    Inputs,
    TmpDir,
    Builder,
    BakeDefinition,
    BuildRefs,
}

impl StateKey {
    pub const ALL: [StateKey; 5] = [
        StateKey::Inputs,
        StateKey::TmpDir,
        StateKey::Builder,
        StateKey::BakeDefinition,
        StateKey::BuildRefs,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            StateKey::Inputs => "inputs",
            StateKey::TmpDir => "tmpDir",
            StateKey::Builder => "builder",
            StateKey::BakeDefinition => "bakeDefinition",
            StateKey::BuildRefs => "buildRefs",
        }
    }
}

#[derive(Debug)]
enum Backend {
    Runner {
        command_file: PathBuf,
        saved: HashMap<String, String>,
    },
    Directory(PathBuf),
}

/// Everything the post phase needs from the main phase
#[derive(Debug, Clone, Default)]
pub struct PersistedState {
    pub inputs: Option<Inputs>,
    pub tmp_dir: Option<PathBuf>,
    pub builder: Option<BuilderInfo>,
    pub bake_definition: Option<BakeDefinition>,
    pub build_refs: Vec<String>,
}

/// Durable key/value store bridging the main and post phases
#[derive(Debug)]
pub struct StateStore {
    backend: Backend,
    written: HashSet<StateKey>,
}

impl StateStore {
    /// Store for the main phase. With a directory backend, key files left by
    /// an earlier run are removed; anything else in the directory is kept.
    #[instrument(skip_all)]
    pub fn for_main(env: &RuntimeEnv) -> Result<Self> {
        let store = Self::from_env(env);
        if let Backend::Directory(dir) = &store.backend {
            std::fs::create_dir_all(dir).map_err(StateError::from)?;
            for key in StateKey::ALL {
                let path = dir.join(file_name(key));
                match std::fs::remove_file(&path) {
                    Ok(()) => debug!("Removed stale state {}", path.display()),
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                    Err(e) => return Err(StateError::Io(e).into()),
                }
            }
        }
        Ok(store)
    }

    /// Store for the post phase
    #[instrument(skip_all)]
    pub fn for_post(env: &RuntimeEnv) -> Result<Self> {
        let store = Self::from_env(env);
        if let Backend::Directory(dir) = &store.backend {
            if dir.exists() && !dir.is_dir() {
                return Err(StateError::Io(std::io::Error::new(
                    std::io::ErrorKind::InvalidInput,
                    format!("state path {} is not a directory", dir.display()),
                ))
                .into());
            }
        }
        Ok(store)
    }

    /// Directory-backed store rooted at `dir`
    pub fn in_directory(dir: impl Into<PathBuf>) -> Self {
        Self {
            backend: Backend::Directory(dir.into()),
            written: HashSet::new(),
        }
    }

    fn from_env(env: &RuntimeEnv) -> Self {
        let backend = match env.github().state_file {
            Some(command_file) => Backend::Runner {
                command_file,
                saved: env.runner_state(),
            },
            None => Backend::Directory(
                env.state_dir()
                    .unwrap_or_else(|| std::env::temp_dir().join(DEFAULT_STATE_DIRNAME)),
            ),
        };
        debug!("Using state backend {:?}", backend);
        Self {
            backend,
            written: HashSet::new(),
        }
    }

    pub fn set_inputs(&mut self, inputs: &Inputs) -> Result<()> {
        self.write(StateKey::Inputs, inputs)
    }

    pub fn set_tmp_dir(&mut self, tmp_dir: &Path) -> Result<()> {
        self.write(StateKey::TmpDir, tmp_dir)
    }

    pub fn set_builder(&mut self, builder: &BuilderInfo) -> Result<()> {
        self.write(StateKey::Builder, builder)
    }

    pub fn set_bake_definition(&mut self, definition: &BakeDefinition) -> Result<()> {
        self.write(StateKey::BakeDefinition, definition)
    }

    pub fn set_build_refs(&mut self, refs: &[String]) -> Result<()> {
        self.write(StateKey::BuildRefs, refs)
    }

    /// Whether `key` was written through this store
    pub fn is_written(&self, key: StateKey) -> bool {
        self.written.contains(&key)
    }

    fn write<T: Serialize + ?Sized>(&mut self, key: StateKey, value: &T) -> Result<()> {
        if self.written.contains(&key) {
            return Err(StateError::AlreadyWritten {
                key: key.as_str().to_string(),
            }
            .into());
        }

        let encoded = serde_json::to_string(value).map_err(|source| StateError::Serialize {
            key: key.as_str().to_string(),
            source,
        })?;

        match &self.backend {
            Backend::Runner { command_file, .. } => {
                append_command_file(command_file, key.as_str(), &encoded)
                    .map_err(StateError::from)?;
            }
            Backend::Directory(dir) => write_atomic(&dir.join(file_name(key)), &encoded)?,
        }

        self.written.insert(key);
        debug!("Persisted state key {}", key.as_str());
        Ok(())
    }

    /// Read every key; missing or undecodable values are unset
    #[instrument(skip_all)]
    pub fn read(&self) -> PersistedState {
        let state = PersistedState {
            inputs: self.read_key(StateKey::Inputs),
            tmp_dir: self
                .read_key::<PathBuf>(StateKey::TmpDir)
                .filter(|p| !p.as_os_str().is_empty()),
            builder: self.read_key(StateKey::Builder),
            bake_definition: self.read_key(StateKey::BakeDefinition),
            build_refs: self.read_key(StateKey::BuildRefs).unwrap_or_default(),
        };
        info!(
            "Loaded state: tmp dir {}, {} build reference(s)",
            state
                .tmp_dir
                .as_ref()
                .map(|p| p.display().to_string())
                .unwrap_or_else(|| "unset".to_string()),
            state.build_refs.len()
        );
        state
    }

    fn raw(&self, key: StateKey) -> Option<String> {
        match &self.backend {
            Backend::Runner { saved, .. } => saved.get(key.as_str()).cloned(),
            Backend::Directory(dir) => {
                let path = dir.join(file_name(key));
                match std::fs::read_to_string(&path) {
                    Ok(content) => Some(content),
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
                    Err(e) => {
                        warn!("Cannot read state file {}: {}", path.display(), e);
                        None
                    }
                }
            }
        }
    }

    fn read_key<T: DeserializeOwned>(&self, key: StateKey) -> Option<T> {
        let raw = self.raw(key)?;
        if raw.trim().is_empty() {
            return None;
        }
        match serde_json::from_str(&raw) {
            Ok(value) => Some(value),
            Err(e) => {
                warn!("Ignoring malformed state value for {}: {}", key.as_str(), e);
                None
            }
        }
    }
}

fn file_name(key: StateKey) -> String {
    format!("{}.json", key.as_str())
}

fn write_atomic(path: &Path, content: &str) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(StateError::from)?;
    }
    let temp_path = path.with_extension("tmp");
    std::fs::write(&temp_path, content).map_err(StateError::from)?;
    std::fs::rename(&temp_path, path).map_err(StateError::from)?;
    Ok(())
}
