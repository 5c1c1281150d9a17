// src/sys/secrets.rs

use secrecy::{ExposeSecret, Secret};
use std::env;
use std::fmt;
use std::sync::Arc;

use crate::error::PipelineError;
use crate::sys::traits::SecretProvider;

pub const AWS_ACCESS_KEY_ID: &str = "AWS_ACCESS_KEY_ID";
pub const AWS_SECRET_ACCESS_KEY: &str = "AWS_SECRET_ACCESS_KEY";
pub const AWS_DEFAULT_REGION: &str = "AWS_DEFAULT_REGION";
pub const CDK_DEFAULT_ACCOUNT: &str = "CDK_DEFAULT_ACCOUNT";
/// Derived from `AWS_DEFAULT_REGION`; the CDK CLI reads this name instead.
pub const CDK_DEFAULT_REGION: &str = "CDK_DEFAULT_REGION";

/// ProviderCredential is an ephemeral, memory-safe wrapper for cloud credentials
/// sourced from the invoking host.
///
/// 1. It cannot be accidentally logged (`{:?}` prints `[REDACTED]`).
/// 2. When it goes out of scope the backing buffer is zeroized.
pub struct ProviderCredential {
    token: Secret<Vec<u8>>,
}

impl ProviderCredential {
    /// Takes ownership of the raw bytes so no plaintext copy is left behind.
    pub fn new(raw_token: Vec<u8>) -> Self {
        Self {
            token: Secret::new(raw_token),
        }
    }

    /// Exposes the secret to `action` only; the slice cannot escape the closure.
    pub fn use_secret<F, R>(&self, action: F) -> R
    where
        F: FnOnce(&[u8]) -> R,
    {
        action(self.token.expose_secret())
    }
}

impl fmt::Debug for ProviderCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("[REDACTED]")
    }
}

/// A secret bound to the environment variable name it is injected under.
#[derive(Clone, Debug)]
pub struct SecretBinding {
    pub name: &'static str,
    pub value: Arc<ProviderCredential>,
}

/// Reads secrets from the host process environment.
pub struct EnvSecretProvider;

impl SecretProvider for EnvSecretProvider {
    fn resolve(&self, name: &str) -> Result<ProviderCredential, PipelineError> {
        match env::var(name) {
            Ok(value) if !value.is_empty() => Ok(ProviderCredential::new(value.into_bytes())),
            _ => Err(PipelineError::MissingSecret(name.to_string())),
        }
    }
}

/// The four credentials the Deploy stage requires.
#[derive(Debug)]
pub struct DeployCredentials {
    access_key: Arc<ProviderCredential>,
    secret_key: Arc<ProviderCredential>,
    default_region: Arc<ProviderCredential>,
    account: Arc<ProviderCredential>,
}

impl DeployCredentials {
    /// Names of the secrets read from the provider, in resolution order.
    pub const REQUIRED: [&'static str; 4] = [
        AWS_ACCESS_KEY_ID,
        AWS_SECRET_ACCESS_KEY,
        AWS_DEFAULT_REGION,
        CDK_DEFAULT_ACCOUNT,
    ];

    pub fn resolve(provider: &dyn SecretProvider) -> Result<Self, PipelineError> {
        Ok(Self {
            access_key: Arc::new(provider.resolve(AWS_ACCESS_KEY_ID)?),
            secret_key: Arc::new(provider.resolve(AWS_SECRET_ACCESS_KEY)?),
            default_region: Arc::new(provider.resolve(AWS_DEFAULT_REGION)?),
            account: Arc::new(provider.resolve(CDK_DEFAULT_ACCOUNT)?),
        })
    }

    /// Environment bindings for the deploy container. The region secret is
    /// bound twice: once under its own name and once as `CDK_DEFAULT_REGION`.
    pub fn bindings(&self) -> Vec<SecretBinding> {
        vec![
            SecretBinding { name: AWS_ACCESS_KEY_ID, value: Arc::clone(&self.access_key) },
            SecretBinding { name: AWS_SECRET_ACCESS_KEY, value: Arc::clone(&self.secret_key) },
            SecretBinding { name: AWS_DEFAULT_REGION, value: Arc::clone(&self.default_region) },
            SecretBinding { name: CDK_DEFAULT_REGION, value: Arc::clone(&self.default_region) },
            SecretBinding { name: CDK_DEFAULT_ACCOUNT, value: Arc::clone(&self.account) },
        ]
    }
}
