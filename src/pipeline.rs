// src/pipeline.rs

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{error, info, warn};

use crate::config::PipelineConfig;
use crate::error::PipelineError;
use crate::stages::{plan, DeployOutcome, DeployStage, InstallStage, LintStage, StageKind};
use crate::sys::secrets::DeployCredentials;
use crate::sys::traits::{ContainerEngine, ContainerSession, Directory, SecretProvider};

/// Task entry points. Each one targets a stage and runs its whole chain.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Task {
    Install,
    Lint,
    Deploy,
}

impl Task {
    pub fn target(self) -> StageKind {
        match self {
            Task::Install => StageKind::Install,
            Task::Lint => StageKind::Lint,
            Task::Deploy => StageKind::Deploy,
        }
    }
}

/// `Start → Installing → Linting → Deploying → Done`, any fatal error → `Failed`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PipelineState {
    Start,
    Installing,
    Linting,
    Deploying,
    Done,
    Failed,
}

impl From<StageKind> for PipelineState {
    fn from(kind: StageKind) -> Self {
        match kind {
            StageKind::Install => PipelineState::Installing,
            StageKind::Lint => PipelineState::Linting,
            StageKind::Deploy => PipelineState::Deploying,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    Succeeded,
    Failed,
    /// Failed, reported, and not escalated.
    LoggedFailure,
}

#[derive(Clone, Debug, Serialize)]
pub struct StageRecord {
    pub stage: StageKind,
    pub status: StageStatus,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct RunReport {
    pub task: Task,
    /// Current state while running; `done` or `failed` once returned.
    pub outcome: PipelineState,
    pub stages: Vec<StageRecord>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip)]
    fatal: Option<PipelineError>,
}

impl RunReport {
    fn new(task: Task) -> Self {
        Self { task, outcome: PipelineState::Start, stages: Vec::new(), error: None, fatal: None }
    }

    fn enter(&mut self, kind: StageKind) {
        let next = PipelineState::from(kind);
        info!(from = ?self.outcome, to = ?next, "pipeline transition");
        self.outcome = next;
    }

    fn fail(&mut self, err: PipelineError) {
        error!(state = ?self.outcome, "pipeline failed: {}", err);
        self.outcome = PipelineState::Failed;
        self.error = Some(err.to_string());
        self.fatal = Some(err);
    }

    fn finish(&mut self) {
        if self.fatal.is_none() {
            self.outcome = PipelineState::Done;
        }
    }

    fn record(&mut self, stage: StageKind, status: StageStatus, started_at: DateTime<Utc>, error: Option<String>) {
        self.stages.push(StageRecord { stage, status, started_at, finished_at: Utc::now(), error });
    }

    pub fn fatal(&self) -> Option<&PipelineError> {
        self.fatal.as_ref()
    }

    /// Process exit code: 0 unless a fatal error aborted the task.
    pub fn exit_code(&self) -> u8 {
        self.fatal.as_ref().map_or(0, PipelineError::exit_code)
    }
}

pub struct Pipeline {
    config: PipelineConfig,
    engine: Box<dyn ContainerEngine>,
    secrets: Box<dyn SecretProvider>,
    install: InstallStage,
    lint: LintStage,
    deploy: DeployStage,
}

impl Pipeline {
    pub fn new(
        config: PipelineConfig,
        engine: Box<dyn ContainerEngine>,
        secrets: Box<dyn SecretProvider>,
    ) -> Self {
        Self {
            install: InstallStage::new(&config.versions),
            lint: LintStage::new(&config.versions),
            deploy: DeployStage::new(&config.versions, config.deploy_on_failure),
            config,
            engine,
            secrets,
        }
    }

    /// Runs `task` until it finishes or the process receives Ctrl-C.
    pub async fn run(&self, task: Task) -> RunReport {
        self.run_until(task, interrupted()).await
    }

    /// Runs `task` inside its own session, abandoning the stages once
    /// `shutdown` resolves. The session is closed exactly once whenever it was
    /// opened, whatever the stages did.
    pub async fn run_until<F>(&self, task: Task, shutdown: F) -> RunReport
    where
        F: Future<Output = ()>,
    {
        let mut report = RunReport::new(task);
        info!(task = ?task, "starting task");

        let session = match self.engine.connect().await {
            Ok(session) => session,
            Err(e) => {
                report.fail(e);
                return report;
            }
        };

        let result = tokio::select! {
            biased;
            _ = shutdown => {
                warn!(task = ?task, "interrupt received, tearing down session");
                Err(PipelineError::Interrupted)
            }
            result = self.run_stages(session.as_ref(), task, &mut report) => result,
        };
        if let Err(e) = result {
            report.fail(e);
        }

        if let Err(e) = session.close().await {
            warn!("failed to close container session: {}", e);
        }

        report.finish();
        info!(task = ?task, state = ?report.outcome, "task finished");
        report
    }

    async fn run_stages(
        &self,
        session: &dyn ContainerSession,
        task: Task,
        report: &mut RunReport,
    ) -> Result<(), PipelineError> {
        let stages = plan(task.target());

        // 🛡️ Credentials are checked before any stage spends time building.
        let credentials = if stages.contains(&StageKind::Deploy) {
            Some(DeployCredentials::resolve(self.secrets.as_ref())?)
        } else {
            None
        };

        let mut artifact: Directory = session.host_directory(&self.config.source_dir).await?;

        for kind in stages {
            report.enter(kind);
            let started_at = Utc::now();

            let result = match kind {
                StageKind::Install => self.install.run(session, &artifact).await.map(Some),
                StageKind::Lint => self.lint.run(session, &artifact).await.map(Some),
                StageKind::Deploy => {
                    let credentials = credentials
                        .as_ref()
                        .ok_or_else(|| PipelineError::MissingSecret("deploy credentials".into()))?;
                    match self.deploy.run(session, &artifact, credentials).await {
                        Ok(DeployOutcome::Succeeded) => Ok(None),
                        Ok(DeployOutcome::LoggedFailure(msg)) => {
                            report.record(kind, StageStatus::LoggedFailure, started_at, Some(msg));
                            continue;
                        }
                        Err(e) => Err(e),
                    }
                }
            };

            match result {
                Ok(next) => {
                    report.record(kind, StageStatus::Succeeded, started_at, None);
                    if let Some(next) = next {
                        artifact = next;
                    }
                }
                Err(e) => {
                    report.record(kind, StageStatus::Failed, started_at, Some(e.to_string()));
                    return Err(e);
                }
            }
        }

        Ok(())
    }
}

/// Resolves on the first Ctrl-C. Never resolves if the handler can't be installed.
async fn interrupted() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("cannot listen for Ctrl-C: {}", e);
        std::future::pending::<()>().await;
    }
}
