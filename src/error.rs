// src/error.rs

use thiserror::Error;

/// sysexits(3) codes used for fatal task outcomes.
pub const EX_UNAVAILABLE: u8 = 69;
pub const EX_IOERR: u8 = 74;
pub const EX_CONFIG: u8 = 78;
/// Shell convention for termination by SIGINT (128 + 2).
pub const EX_INTERRUPTED: u8 = 130;

#[derive(Debug, Error)]
pub enum PipelineError {
    /// The container backend could not be reached. Never retried.
    #[error("container backend unavailable: {0}")]
    Connection(String),

    #[error("install stage failed: {0}")]
    BuildFailure(String),

    /// Any lint error or warning. Zero-tolerance, never bypassed.
    #[error("lint stage failed: {0}")]
    LintFailure(String),

    #[error("deploy stage failed: {0}")]
    DeployFailure(String),

    #[error("required secret {0} is not set in the host environment")]
    MissingSecret(String),

    #[error("artifact error: {0}")]
    Artifact(String),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("interrupted")]
    Interrupted,
}

impl PipelineError {
    pub fn exit_code(&self) -> u8 {
        match self {
            PipelineError::Connection(_)
            | PipelineError::BuildFailure(_)
            | PipelineError::LintFailure(_)
            | PipelineError::DeployFailure(_) => EX_UNAVAILABLE,
            PipelineError::MissingSecret(_) | PipelineError::Config(_) => EX_CONFIG,
            PipelineError::Artifact(_) | PipelineError::Io(_) => EX_IOERR,
            PipelineError::Interrupted => EX_INTERRUPTED,
        }
    }
}

/// A single exec inside a stage container exited non-zero (or never started).
/// Stages translate this into their own `PipelineError` kind.
#[derive(Debug, Error)]
pub enum ExecFailure {
    #[error("`{command}` exited with code {code}")]
    NonZeroExit { command: String, code: i32 },

    #[error("container runtime error: {0}")]
    Runtime(String),
}
