// src/sys/traits.rs

use async_trait::async_trait;
use std::path::{Path, PathBuf};

use crate::error::{ExecFailure, PipelineError};
use crate::sys::secrets::{ProviderCredential, SecretBinding};

// ==============================================================================
// 1. Directory Artifacts
// ==============================================================================

/// Handle to an immutable file tree owned by a session. Stages never write
/// through a handle; every container run receives a fresh copy.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Directory {
    id: String,
    path: PathBuf,
}

impl Directory {
    pub fn new(id: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self { id: id.into(), path: path.into() }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

// ==============================================================================
// 2. Container Description
// ==============================================================================

/// One container: image, mount point, injected secrets and the ordered execs
/// that run inside it. Built fluently, e.g.
/// `ContainerSpec::from_image("node:18").with_mounted_directory("/src").with_exec(..)`.
#[derive(Clone, Debug)]
pub struct ContainerSpec {
    /// Short name used for container naming and log prefixes.
    pub label: String,
    pub image: String,
    pub mount_path: String,
    pub workdir: String,
    pub secrets: Vec<SecretBinding>,
    pub execs: Vec<Vec<String>>,
}

impl ContainerSpec {
    pub fn from_image(image: impl Into<String>) -> Self {
        Self {
            label: "stage".to_string(),
            image: image.into(),
            mount_path: "/".to_string(),
            workdir: "/".to_string(),
            secrets: Vec::new(),
            execs: Vec::new(),
        }
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }

    /// Mounts the run's input directory at `path` and makes it the workdir.
    pub fn with_mounted_directory(mut self, path: impl Into<String>) -> Self {
        let path = path.into();
        self.workdir = path.clone();
        self.mount_path = path;
        self
    }

    pub fn with_secret_variable(mut self, binding: SecretBinding) -> Self {
        self.secrets.push(binding);
        self
    }

    pub fn with_exec<I, S>(mut self, argv: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.execs.push(argv.into_iter().map(Into::into).collect());
        self
    }
}

// ==============================================================================
// 3. Container Backend (Session Lifecycle)
// ==============================================================================

#[async_trait]
pub trait ContainerEngine: Send + Sync {
    /// Opens a session. Any failure here is fatal for the task; no retry.
    async fn connect(&self) -> Result<Box<dyn ContainerSession>, PipelineError>;
}

#[async_trait]
pub trait ContainerSession: Send + Sync {
    /// Captures a host directory as an immutable source snapshot.
    async fn host_directory(&self, path: &Path) -> Result<Directory, PipelineError>;

    /// Runs every exec of `spec` in order inside one container with a fresh
    /// copy of `input` mounted. Returns the mounted tree after the last exec.
    /// No artifact is produced when any exec fails.
    async fn run(&self, spec: &ContainerSpec, input: &Directory) -> Result<Directory, ExecFailure>;

    /// Releases every backend resource held by the session. Called exactly once.
    async fn close(&self) -> Result<(), PipelineError>;
}

// ==============================================================================
// 4. Secret Sources
// ==============================================================================

pub trait SecretProvider: Send + Sync {
    /// 🛡️ Returns the named secret wrapped in a `ProviderCredential`; the
    /// plaintext never passes through a plain `String` the caller keeps.
    fn resolve(&self, name: &str) -> Result<ProviderCredential, PipelineError>;
}
