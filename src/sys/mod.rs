// 🛡️ Host-facing plumbing: the container backend, artifacts and secrets.

pub mod traits;     // Backend & secret contracts
pub mod secrets;    // Memory hygiene (ProviderCredential)
pub mod artifacts;  // Session scratch area for directory artifacts
pub mod docker;     // Docker CLI backend
pub mod scrub;      // Log redaction

#[cfg(test)]
pub mod mock;       // Scripted backend for tests
