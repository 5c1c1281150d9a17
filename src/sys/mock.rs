// src/sys/mock.rs
//
// Scripted in-memory container backend for pipeline tests.

use async_trait::async_trait;
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};

use crate::error::{ExecFailure, PipelineError};
use crate::sys::secrets::{ProviderCredential, SecretBinding};
use crate::sys::traits::{ContainerEngine, ContainerSession, ContainerSpec, Directory, SecretProvider};

#[derive(Clone, Debug)]
pub struct RecordedRun {
    pub label: String,
    pub image: String,
    pub mount_path: String,
    pub input_id: String,
    pub execs: Vec<Vec<String>>,
    pub secrets: Vec<SecretBinding>,
    pub output_id: Option<String>,
}

#[derive(Default, Debug)]
pub struct MockLog {
    pub connects: usize,
    pub closes: usize,
    pub snapshots: usize,
    pub runs: Vec<RecordedRun>,
}

/// Engine whose execs succeed unless scripted otherwise.
#[derive(Clone, Default)]
pub struct MockEngine {
    unavailable: bool,
    /// Exit code keyed by the exec's rendered command line.
    exit_codes: HashMap<String, i32>,
    /// Warnings the linter "finds"; enforced against `--max-warnings`.
    lint_warnings: u32,
    log: Arc<Mutex<MockLog>>,
}

impl MockEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn unavailable() -> Self {
        Self { unavailable: true, ..Self::default() }
    }

    pub fn with_exit_code(mut self, command: &str, code: i32) -> Self {
        self.exit_codes.insert(command.to_string(), code);
        self
    }

    pub fn with_lint_warnings(mut self, warnings: u32) -> Self {
        self.lint_warnings = warnings;
        self
    }

    pub fn log(&self) -> Arc<Mutex<MockLog>> {
        Arc::clone(&self.log)
    }

    fn exit_code(&self, argv: &[String]) -> i32 {
        if let Some(code) = self.exit_codes.get(&argv.join(" ")) {
            return *code;
        }
        if argv.first().map(String::as_str) == Some("eslint") {
            // eslint only fails on warnings when a ceiling is given.
            let ceiling = argv
                .iter()
                .position(|a| a == "--max-warnings")
                .and_then(|i| argv.get(i + 1))
                .and_then(|v| v.parse::<u32>().ok());
            if let Some(max) = ceiling {
                if self.lint_warnings > max {
                    return 1;
                }
            }
        }
        0
    }
}

#[async_trait]
impl ContainerEngine for MockEngine {
    async fn connect(&self) -> Result<Box<dyn ContainerSession>, PipelineError> {
        if self.unavailable {
            return Err(PipelineError::Connection("mock backend is down".into()));
        }
        self.log.lock().unwrap().connects += 1;
        Ok(Box::new(MockSession { engine: self.clone() }))
    }
}

pub struct MockSession {
    engine: MockEngine,
}

#[async_trait]
impl ContainerSession for MockSession {
    async fn host_directory(&self, path: &Path) -> Result<Directory, PipelineError> {
        self.engine.log.lock().unwrap().snapshots += 1;
        Ok(Directory::new("source", path))
    }

    async fn run(&self, spec: &ContainerSpec, input: &Directory) -> Result<Directory, ExecFailure> {
        let mut failure = None;
        for argv in &spec.execs {
            let code = self.engine.exit_code(argv);
            if code != 0 {
                failure = Some(ExecFailure::NonZeroExit { command: argv.join(" "), code });
                break;
            }
        }

        let output = Directory::new(format!("{}-out", spec.label), format!("/mock/{}", spec.label));
        self.engine.log.lock().unwrap().runs.push(RecordedRun {
            label: spec.label.clone(),
            image: spec.image.clone(),
            mount_path: spec.mount_path.clone(),
            input_id: input.id().to_string(),
            execs: spec.execs.clone(),
            secrets: spec.secrets.clone(),
            output_id: failure.is_none().then(|| output.id().to_string()),
        });

        match failure {
            Some(e) => Err(e),
            None => Ok(output),
        }
    }

    async fn close(&self) -> Result<(), PipelineError> {
        self.engine.log.lock().unwrap().closes += 1;
        Ok(())
    }
}

/// Fixed secret values; records every lookup.
pub struct MapSecretProvider {
    values: HashMap<String, String>,
    lookups: Mutex<Vec<String>>,
}

impl MapSecretProvider {
    pub fn new(pairs: &[(&str, &str)]) -> Self {
        Self {
            values: pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect(),
            lookups: Mutex::new(Vec::new()),
        }
    }

    pub fn lookups(&self) -> Vec<String> {
        self.lookups.lock().unwrap().clone()
    }
}

impl SecretProvider for MapSecretProvider {
    fn resolve(&self, name: &str) -> Result<ProviderCredential, PipelineError> {
        self.lookups.lock().unwrap().push(name.to_string());
        self.values
            .get(name)
            .map(|v| ProviderCredential::new(v.clone().into_bytes()))
            .ok_or_else(|| PipelineError::MissingSecret(name.to_string()))
    }
}
