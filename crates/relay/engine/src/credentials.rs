//! Repository credentials lookup for steps
//!
//! Credentials are stored as secrets scoped to a namespace. A lookup
//! searches the Promotion's own namespace first and then each configured
//! global namespace, returning the first secret whose repository URL
//! matches. Within a namespace secrets are considered in name order.

use async_trait::async_trait;
use dashmap::DashMap;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::{error, info};

use crate::error::CredentialsError;

/// Kind of repository the credentials are for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CredentialType {
    Git,
    Helm,
    Image,
    Generic,
}

impl fmt::Display for CredentialType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CredentialType::Git => "git",
            CredentialType::Helm => "helm",
            CredentialType::Image => "image",
            CredentialType::Generic => "generic",
        };
        f.write_str(s)
    }
}

/// Resolved credentials
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Credentials {
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ssh_private_key: Option<String>,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("ssh_private_key", &self.ssh_private_key.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

/// A stored credentials secret
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CredentialSecret {
    pub name: String,
    pub namespace: String,
    pub credential_type: CredentialType,
    pub repo_url: String,
    /// Treat `repo_url` as a regular expression
    #[serde(default)]
    pub repo_url_is_regex: bool,
    pub credentials: Credentials,
}

/// Looks up credentials for a repository.
///
/// Returns `Ok(None)` when nothing matches.
#[async_trait]
pub trait CredentialsDatabase: Send + Sync + fmt::Debug {
    async fn get(
        &self,
        namespace: &str,
        credential_type: CredentialType,
        repo_url: &str,
    ) -> Result<Option<Credentials>, CredentialsError>;
}

/// Settings for [`InMemoryCredentialsDatabase`]
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CredentialsConfig {
    /// Namespaces searched after the project namespace, in sorted order
    #[serde(default)]
    pub global_namespaces: Vec<String>,

    /// Hand out credentials for plain `http://` URLs
    #[serde(default)]
    pub allow_over_http: bool,
}

/// In-memory [`CredentialsDatabase`]
#[derive(Debug)]
pub struct InMemoryCredentialsDatabase {
    secrets: DashMap<(String, String), CredentialSecret>,
    config: CredentialsConfig,
}

impl InMemoryCredentialsDatabase {
    pub fn new(mut config: CredentialsConfig) -> Self {
        config.global_namespaces.sort();
        Self {
            secrets: DashMap::new(),
            config,
        }
    }

    /// Add or replace a secret
    pub fn insert(&self, secret: CredentialSecret) {
        self.secrets
            .insert((secret.namespace.clone(), secret.name.clone()), secret);
    }

    pub fn len(&self) -> usize {
        self.secrets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.secrets.is_empty()
    }

    fn find_in_namespace(
        &self,
        namespace: &str,
        credential_type: CredentialType,
        repo_url: &str,
    ) -> Option<Credentials> {
        let mut candidates: Vec<CredentialSecret> = self
            .secrets
            .iter()
            .filter(|s| s.namespace == namespace && s.credential_type == credential_type)
            .map(|s| s.value().clone())
            .collect();
        candidates.sort_by(|a, b| a.name.cmp(&b.name));

        let wanted = normalize_url(credential_type, repo_url);
        for secret in candidates {
            if secret.repo_url_is_regex {
                let pattern = match Regex::new(&secret.repo_url) {
                    Ok(p) => p,
                    Err(e) => {
                        error!(
                            namespace,
                            secret = %secret.name,
                            error = %e,
                            "failed to compile regex for credentials secret"
                        );
                        continue;
                    }
                };
                if pattern.is_match(&wanted) {
                    return Some(secret.credentials);
                }
            } else if normalize_url(credential_type, &secret.repo_url) == wanted {
                return Some(secret.credentials);
            }
        }
        None
    }
}

#[async_trait]
impl CredentialsDatabase for InMemoryCredentialsDatabase {
    async fn get(
        &self,
        namespace: &str,
        credential_type: CredentialType,
        repo_url: &str,
    ) -> Result<Option<Credentials>, CredentialsError> {
        if !self.config.allow_over_http && repo_url.starts_with("http://") {
            info!(repo_url, "refused to get credentials for insecure HTTP endpoint");
            return Ok(None);
        }

        let found = std::iter::once(namespace)
            .chain(self.config.global_namespaces.iter().map(String::as_str))
            .find_map(|ns| self.find_in_namespace(ns, credential_type, repo_url));
        Ok(found)
    }
}

/// Normalize a repository URL so equivalent spellings compare equal.
fn normalize_url(credential_type: CredentialType, url: &str) -> String {
    let url = url.trim();
    match credential_type {
        CredentialType::Git => {
            let lowered = url.to_lowercase();
            let trimmed = lowered.trim_end_matches('/');
            trimmed.strip_suffix(".git").unwrap_or(trimmed).to_string()
        }
        CredentialType::Helm => url.to_lowercase().trim_end_matches('/').to_string(),
        CredentialType::Image | CredentialType::Generic => url.to_string(),
    }
}
