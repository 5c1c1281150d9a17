// src/config.rs

use serde::Serialize;
use std::env;
use std::path::PathBuf;

use crate::error::PipelineError;

pub const DEFAULT_NODE_VERSION: &str = "18";
pub const DEFAULT_ESLINT_VERSION: &str = "8";
pub const DEFAULT_AWS_CLI_VERSION: &str = "2.11.1";
pub const DEFAULT_ALPINE_VERSION: &str = "3.17.2";

/// Pinned external versions. These gate reproducibility of every stage and are
/// part of the pipeline's external contract.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Versions {
    pub node: String,
    pub eslint: String,
    // Pinned but not consumed by any stage yet.
    pub aws_cli: String,
    pub alpine: String,
}

impl Default for Versions {
    fn default() -> Self {
        Self {
            node: DEFAULT_NODE_VERSION.to_string(),
            eslint: DEFAULT_ESLINT_VERSION.to_string(),
            aws_cli: DEFAULT_AWS_CLI_VERSION.to_string(),
            alpine: DEFAULT_ALPINE_VERSION.to_string(),
        }
    }
}

impl Versions {
    pub fn node_image(&self) -> String {
        format!("node:{}", self.node)
    }

    pub fn eslint_image(&self) -> String {
        format!("cytopia/eslint:{}", self.eslint)
    }

    fn validate(&self) -> Result<(), PipelineError> {
        for (name, tag) in [
            ("node", &self.node),
            ("eslint", &self.eslint),
            ("aws_cli", &self.aws_cli),
            ("alpine", &self.alpine),
        ] {
            validate_tag(name, tag)?;
        }
        Ok(())
    }
}

/// 🛡️ Image tags end up in `docker` argv; only plain tag characters are allowed.
fn validate_tag(name: &str, tag: &str) -> Result<(), PipelineError> {
    let valid = !tag.is_empty()
        && tag.chars().all(|c| c.is_ascii_alphanumeric() || c == '.' || c == '_' || c == '-');
    if !valid {
        return Err(PipelineError::Config(format!("invalid {} version tag '{}'", name, tag)));
    }
    Ok(())
}

/// What the Deploy stage does with a non-zero exit.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, clap::ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum DeployFailurePolicy {
    /// Print the error and finish the task normally.
    #[default]
    LogOnly,
    /// Treat the failure like Install/Lint: abort with a non-zero exit.
    Abort,
}

impl std::str::FromStr for DeployFailurePolicy {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "log-only" | "log_only" | "logonly" => Ok(Self::LogOnly),
            "abort" => Ok(Self::Abort),
            other => Err(PipelineError::Config(format!(
                "unknown deploy failure policy '{}' (expected log-only or abort)",
                other
            ))),
        }
    }
}

#[derive(Clone, Debug)]
pub struct PipelineConfig {
    pub source_dir: PathBuf,
    pub docker_bin: String,
    pub versions: Versions,
    pub deploy_on_failure: DeployFailurePolicy,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            source_dir: PathBuf::from("."),
            docker_bin: "docker".to_string(),
            versions: Versions::default(),
            deploy_on_failure: DeployFailurePolicy::default(),
        }
    }
}

impl PipelineConfig {
    /// Loads configuration from the process environment.
    pub fn load() -> Result<Self, PipelineError> {
        Self::load_with(|key| env::var(key).ok())
    }

    /// Loads configuration through an arbitrary lookup, falling back to the
    /// pinned defaults for anything unset or blank.
    pub fn load_with<F>(lookup: F) -> Result<Self, PipelineError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str, default: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
                .unwrap_or_else(|| default.to_string())
        };

        let deploy_on_failure: DeployFailurePolicy = get("STAGEHAND_DEPLOY_ON_FAILURE", "log-only").parse()?;

        let config = Self {
            source_dir: PathBuf::from(get("STAGEHAND_SOURCE_DIR", ".")),
            docker_bin: get("STAGEHAND_DOCKER_BIN", "docker"),
            versions: Versions {
                node: get("STAGEHAND_NODE_VERSION", DEFAULT_NODE_VERSION),
                eslint: get("STAGEHAND_ESLINT_VERSION", DEFAULT_ESLINT_VERSION),
                aws_cli: get("STAGEHAND_AWS_CLI_VERSION", DEFAULT_AWS_CLI_VERSION),
                alpine: get("STAGEHAND_ALPINE_VERSION", DEFAULT_ALPINE_VERSION),
            },
            deploy_on_failure,
        };

        config.versions.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> =
            pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        move |key: &str| map.get(key).cloned()
    }

    #[test]
    fn defaults_match_pinned_versions() {
        let config = PipelineConfig::load_with(lookup(&[])).unwrap();
        assert_eq!(config.versions, Versions::default());
        assert_eq!(config.versions.node_image(), "node:18");
        assert_eq!(config.versions.eslint_image(), "cytopia/eslint:8");
        assert_eq!(config.docker_bin, "docker");
        assert_eq!(config.source_dir, PathBuf::from("."));
        assert_eq!(config.deploy_on_failure, DeployFailurePolicy::LogOnly);
    }

    #[test]
    fn env_overrides_are_applied() {
        let config = PipelineConfig::load_with(lookup(&[
            ("STAGEHAND_NODE_VERSION", "20"),
            ("STAGEHAND_DEPLOY_ON_FAILURE", "abort"),
            ("STAGEHAND_SOURCE_DIR", "/work/app"),
        ]))
        .unwrap();
        assert_eq!(config.versions.node_image(), "node:20");
        assert_eq!(config.deploy_on_failure, DeployFailurePolicy::Abort);
        assert_eq!(config.source_dir, PathBuf::from("/work/app"));
    }

    #[test]
    fn blank_values_fall_back_to_defaults() {
        let config = PipelineConfig::load_with(lookup(&[("STAGEHAND_ESLINT_VERSION", "  ")])).unwrap();
        assert_eq!(config.versions.eslint, DEFAULT_ESLINT_VERSION);
    }

    #[test]
    fn suspicious_version_tag_is_rejected() {
        let err = PipelineConfig::load_with(lookup(&[("STAGEHAND_NODE_VERSION", "18;rm -rf /")]))
            .unwrap_err();
        assert!(matches!(err, PipelineError::Config(_)));
    }

    #[test]
    fn unknown_policy_is_rejected() {
        let err = PipelineConfig::load_with(lookup(&[("STAGEHAND_DEPLOY_ON_FAILURE", "ignore")]))
            .unwrap_err();
        assert!(err.to_string().contains("ignore"));
    }
}
