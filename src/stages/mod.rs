// src/stages/mod.rs

use serde::Serialize;
use std::fmt;

use crate::config::{DeployFailurePolicy, Versions};
use crate::sys::traits::ContainerSpec;

pub mod deploy;
pub mod install;
pub mod lint;

pub use deploy::{DeployOutcome, DeployStage};
pub use install::InstallStage;
pub use lint::LintStage;

// ==============================================================================
// 1. Stage Graph
// ==============================================================================

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StageKind {
    Install,
    Lint,
    Deploy,
}

impl StageKind {
    pub const ALL: [StageKind; 3] = [StageKind::Install, StageKind::Lint, StageKind::Deploy];

    /// The stage whose output artifact this one consumes.
    pub fn requires(self) -> Option<StageKind> {
        match self {
            StageKind::Install => None,
            StageKind::Lint => Some(StageKind::Install),
            StageKind::Deploy => Some(StageKind::Lint),
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            StageKind::Install => "install",
            StageKind::Lint => "lint",
            StageKind::Deploy => "deploy",
        }
    }
}

impl fmt::Display for StageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Execution order for `target`: every requirement first, `target` last.
pub fn plan(target: StageKind) -> Vec<StageKind> {
    let mut order = vec![target];
    let mut cursor = target;
    while let Some(dep) = cursor.requires() {
        order.push(dep);
        cursor = dep;
    }
    order.reverse();
    order
}

// ==============================================================================
// 2. Static Stage Configuration
// ==============================================================================

/// Image, mount/working path and ordered commands of one stage.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct StageConfig {
    pub kind: StageKind,
    pub image: String,
    pub workdir: String,
    pub commands: Vec<Vec<String>>,
}

impl StageConfig {
    pub fn new(kind: StageKind, image: String, workdir: &str, commands: &[&[&str]]) -> Self {
        Self {
            kind,
            image,
            workdir: workdir.to_string(),
            commands: commands
                .iter()
                .map(|argv| argv.iter().map(|a| a.to_string()).collect())
                .collect(),
        }
    }

    /// Container description without any secrets attached.
    pub fn container(&self) -> ContainerSpec {
        self.commands.iter().fold(
            ContainerSpec::from_image(&self.image)
                .with_label(self.kind.name())
                .with_mounted_directory(&self.workdir),
            |spec, argv| spec.with_exec(argv.iter().cloned()),
        )
    }
}

/// Static configuration of every stage, in graph order.
pub fn catalog(versions: &Versions, on_failure: DeployFailurePolicy) -> Vec<StageConfig> {
    StageKind::ALL
        .iter()
        .map(|kind| match kind {
            StageKind::Install => InstallStage::new(versions).config().clone(),
            StageKind::Lint => LintStage::new(versions).config().clone(),
            StageKind::Deploy => DeployStage::new(versions, on_failure).config().clone(),
        })
        .collect()
}
