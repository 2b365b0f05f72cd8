//! API key resolution.
//!
//! Resolution order:
//! 1. `api_key` in the provider section (with a warning at load time)
//! 2. The variable named by `api_key_env`
//! 3. The provider kind's conventional variable (`OPENAI_API_KEY`, ...)

use crate::ProviderConfig;

/// Result of API key resolution with provenance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedSecret {
    pub value: String,
    pub source: SecretSource,
}

/// Where a secret was resolved from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SecretSource {
    /// Config file (plaintext; not recommended).
    ConfigFile,
    EnvVar(String),
}

impl std::fmt::Display for SecretSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SecretSource::ConfigFile => write!(f, "config file (plaintext)"),
            SecretSource::EnvVar(var) => write!(f, "env var {}", var),
        }
    }
}

/// Resolve a provider's API key from the process environment.
pub fn resolve_api_key(provider: &ProviderConfig) -> Option<ResolvedSecret> {
    resolve_api_key_with(provider, |var| std::env::var(var).ok())
}

/// Resolve a provider's API key, reading variables through `lookup`.
pub fn resolve_api_key_with(
    provider: &ProviderConfig,
    lookup: impl Fn(&str) -> Option<String>,
) -> Option<ResolvedSecret> {
    if let Some(key) = provider.api_key.as_deref().filter(|k| !k.is_empty()) {
        return Some(ResolvedSecret {
            value: key.to_string(),
            source: SecretSource::ConfigFile,
        });
    }

    provider
        .api_key_env
        .as_deref()
        .into_iter()
        .chain(provider.kind.env_var())
        .find_map(|var| {
            lookup(var)
                .filter(|value| !value.is_empty())
                .map(|value| ResolvedSecret {
                    value,
                    source: SecretSource::EnvVar(var.to_string()),
                })
        })
}
