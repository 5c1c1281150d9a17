// src/stages/install.rs

use tracing::{error, info};

use crate::config::Versions;
use crate::error::PipelineError;
use crate::stages::{StageConfig, StageKind};
use crate::sys::traits::{ContainerSession, Directory};

pub const INSTALL_WORKDIR: &str = "/src";

/// Installs dependencies and builds the project in a pinned Node container.
pub struct InstallStage {
    config: StageConfig,
}

impl InstallStage {
    pub fn new(versions: &Versions) -> Self {
        Self {
            config: StageConfig::new(
                StageKind::Install,
                versions.node_image(),
                INSTALL_WORKDIR,
                &[&["npm", "ci"], &["npm", "run", "build"]],
            ),
        }
    }

    pub fn config(&self) -> &StageConfig {
        &self.config
    }

    /// Returns the installed and built tree. A failing command yields
    /// `BuildFailure` and no artifact.
    pub async fn run(
        &self,
        session: &dyn ContainerSession,
        source: &Directory,
    ) -> Result<Directory, PipelineError> {
        info!(image = %self.config.image, source = source.id(), "installing dependencies");
        match session.run(&self.config.container(), source).await {
            Ok(dir) => Ok(dir),
            Err(e) => {
                error!("install failed: {}", e);
                Err(PipelineError::BuildFailure(e.to_string()))
            }
        }
    }
}
