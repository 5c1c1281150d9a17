// src/stages/lint.rs

use tracing::{error, info};

use crate::config::Versions;
use crate::error::PipelineError;
use crate::stages::{StageConfig, StageKind};
use crate::sys::traits::{ContainerSession, Directory};

pub const LINT_WORKDIR: &str = "/data";

/// ESLint gate. Zero tolerance: `--max-warnings 0` turns a single warning
/// into a non-zero exit, which aborts the pipeline.
pub struct LintStage {
    config: StageConfig,
}

impl LintStage {
    pub fn new(versions: &Versions) -> Self {
        Self {
            config: StageConfig::new(
                StageKind::Lint,
                versions.eslint_image(),
                LINT_WORKDIR,
                &[&["eslint", ".", "--max-warnings", "0"]],
            ),
        }
    }

    pub fn config(&self) -> &StageConfig {
        &self.config
    }

    /// Passes the installed tree through unchanged when lint is clean.
    pub async fn run(
        &self,
        session: &dyn ContainerSession,
        installed: &Directory,
    ) -> Result<Directory, PipelineError> {
        info!(image = %self.config.image, input = installed.id(), "linting");
        session
            .run(&self.config.container(), installed)
            .await
            .map_err(|e| {
                error!("lint failed: {}", e);
                PipelineError::LintFailure(e.to_string())
            })
    }
}
