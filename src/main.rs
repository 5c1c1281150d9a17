// src/main.rs

use clap::{Args, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use std::process::ExitCode;

mod config;
mod error;
mod logging;
mod pipeline;
mod stages;
mod sys;

use crate::config::{DeployFailurePolicy, PipelineConfig};
use crate::error::PipelineError;
use crate::logging::LogFormat;
use crate::pipeline::{Pipeline, RunReport, Task};
use crate::sys::docker::DockerEngine;
use crate::sys::secrets::{DeployCredentials, EnvSecretProvider};

/// Containerized install, lint and deploy pipeline for a Node/CDK project
#[derive(Parser, Debug)]
#[command(name = "stagehand", version, about)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    #[arg(long, global = true, value_enum, default_value = "text", help = "Diagnostic log format")]
    log_format: LogFormat,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Install dependencies and build the project
    Install(RunArgs),
    /// Install, then lint with zero tolerance for warnings
    Lint(RunArgs),
    /// Install, lint, then `cdk deploy` with AWS credentials from the environment
    Deploy(DeployArgs),
    /// Print the pinned versions, stage images and required secrets as JSON
    Versions,
}

#[derive(Args, Debug)]
struct RunArgs {
    #[arg(long, value_name = "DIR", help = "Project directory (defaults to STAGEHAND_SOURCE_DIR or .)")]
    source: Option<PathBuf>,

    #[arg(long, value_enum, default_value = "text", help = "How to print the run report")]
    report: ReportFormat,
}

#[derive(Args, Debug)]
struct DeployArgs {
    #[command(flatten)]
    run: RunArgs,

    #[arg(long, value_enum, help = "What a failed deploy does (defaults to STAGEHAND_DEPLOY_ON_FAILURE or log-only)")]
    deploy_on_failure: Option<DeployFailurePolicy>,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum ReportFormat {
    Text,
    Json,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    logging::init(cli.log_format);

    let mut config = match PipelineConfig::load() {
        Ok(config) => config,
        Err(e) => return fail(&e),
    };

    let (task, run_args) = match cli.command {
        Commands::Versions => return print_versions(&config),
        Commands::Install(args) => (Task::Install, args),
        Commands::Lint(args) => (Task::Lint, args),
        Commands::Deploy(args) => {
            if let Some(policy) = args.deploy_on_failure {
                config.deploy_on_failure = policy;
            }
            (Task::Deploy, args.run)
        }
    };
    if let Some(source) = run_args.source {
        config.source_dir = source;
    }

    let engine = Box::new(DockerEngine::new(config.docker_bin.clone()));
    let pipeline = Pipeline::new(config, engine, Box::new(EnvSecretProvider));
    let report = pipeline.run(task).await;

    print_report(&report, run_args.report);
    if let Some(e) = report.fatal() {
        eprintln!("error: {}", e);
    }
    ExitCode::from(report.exit_code())
}

fn fail(err: &PipelineError) -> ExitCode {
    eprintln!("error: {}", err);
    ExitCode::from(err.exit_code())
}

fn print_versions(config: &PipelineConfig) -> ExitCode {
    let contract = serde_json::json!({
        "versions": config.versions,
        "stages": stages::catalog(&config.versions, config.deploy_on_failure),
        "deploy_on_failure": config.deploy_on_failure,
        "required_secrets": DeployCredentials::REQUIRED,
    });
    match serde_json::to_string_pretty(&contract) {
        Ok(json) => {
            println!("{}", json);
            ExitCode::SUCCESS
        }
        Err(e) => fail(&PipelineError::Config(e.to_string())),
    }
}

fn print_report(report: &RunReport, format: ReportFormat) {
    match format {
        ReportFormat::Json => match serde_json::to_string_pretty(report) {
            Ok(json) => println!("{}", json),
            Err(e) => tracing::warn!("failed to serialize run report: {}", e),
        },
        ReportFormat::Text => {
            for stage in &report.stages {
                let elapsed = stage.finished_at - stage.started_at;
                tracing::info!(
                    stage = %stage.stage,
                    status = ?stage.status,
                    seconds = elapsed.num_milliseconds() as f64 / 1000.0,
                    "stage finished"
                );
            }
        }
    }
}
