//! Loading resource manifests into the object store
//!
//! A manifest file holds one or more documents, each tagged with its `kind`:
//!
//! ```yaml
//! kind: Stage
//! metadata: { namespace: relay-demo, name: uat }
//! spec:
//!   requestedFreight:
//!     - origin: { kind: Warehouse, name: main }
//!       sources: { direct: true }
//! ---
//! kind: Freight
//! metadata: { namespace: relay-demo, name: f1 }
//! origin: { kind: Warehouse, name: main }
//! ```
//!
//! YAML files may contain several `---` separated documents. JSON files hold
//! a single document or an array of them.
//!
//! Repository credentials use `kind: Credentials` and go to the credentials
//! database rather than the object store.

use relay_engine::{CredentialSecret, InMemoryCredentialsDatabase};
use relay_store::InMemoryObjectStore;
use relay_types::{Freight, Promotion, Stage};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::error::{DaemonError, DaemonResult};

/// A single manifest document
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "kind")]
pub enum Manifest {
    Stage(Stage),
    Freight(Freight),
    Promotion(Promotion),
    Credentials(CredentialSecret),
}

/// What was written to the store
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct LoadSummary {
    pub stages: usize,
    pub freight: usize,
    pub promotions: usize,
    pub credentials: usize,
}

/// Parse every manifest under `path`, which may be a file or a directory.
/// Directory entries are read in name order; only `.yaml`, `.yml` and
/// `.json` files are considered.
pub fn read_manifests(path: &Path) -> DaemonResult<Vec<Manifest>> {
    let io_err = |source| DaemonError::ManifestIo {
        path: path.to_path_buf(),
        source,
    };

    if !path.is_dir() {
        return read_file(path);
    }

    let mut files: Vec<PathBuf> = std::fs::read_dir(path)
        .map_err(io_err)?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|p| p.is_file() && manifest_extension(p))
        .collect();
    files.sort();

    let mut manifests = Vec::new();
    for file in files {
        manifests.extend(read_file(&file)?);
    }
    Ok(manifests)
}

fn manifest_extension(path: &Path) -> bool {
    matches!(
        path.extension().and_then(|e| e.to_str()),
        Some("yaml" | "yml" | "json")
    )
}

fn read_file(path: &Path) -> DaemonResult<Vec<Manifest>> {
    let raw = std::fs::read_to_string(path).map_err(|source| DaemonError::ManifestIo {
        path: path.to_path_buf(),
        source,
    })?;
    let parse_err = |reason: String| DaemonError::ManifestParse {
        path: path.to_path_buf(),
        reason,
    };

    if path.extension().and_then(|e| e.to_str()) == Some("json") {
        let value: serde_json::Value =
            serde_json::from_str(&raw).map_err(|e| parse_err(e.to_string()))?;
        return match value {
            serde_json::Value::Array(items) => items
                .into_iter()
                .map(|item| serde_json::from_value(item).map_err(|e| parse_err(e.to_string())))
                .collect(),
            single => Ok(vec![
                serde_json::from_value(single).map_err(|e| parse_err(e.to_string()))?
            ]),
        };
    }

    let mut manifests = Vec::new();
    for document in serde_yaml::Deserializer::from_str(&raw) {
        let value = serde_yaml::Value::deserialize(document).map_err(|e| parse_err(e.to_string()))?;
        if value.is_null() {
            continue;
        }
        manifests.push(serde_yaml::from_value(value).map_err(|e| parse_err(e.to_string()))?);
    }
    debug!(path = %path.display(), count = manifests.len(), "read manifests");
    Ok(manifests)
}

/// Write manifests to the store and credentials database. Stages and
/// Freight go in before any Promotion so the controller never sees a
/// Promotion whose Stage is missing.
pub fn apply_manifests(
    store: &InMemoryObjectStore,
    credentials: &InMemoryCredentialsDatabase,
    manifests: Vec<Manifest>,
) -> DaemonResult<LoadSummary> {
    let mut summary = LoadSummary::default();
    let mut promotions = Vec::new();

    for manifest in manifests {
        match manifest {
            Manifest::Stage(stage) => {
                store.put_stage(stage)?;
                summary.stages += 1;
            }
            Manifest::Freight(freight) => {
                store.put_freight(freight)?;
                summary.freight += 1;
            }
            Manifest::Promotion(promotion) => promotions.push(promotion),
            Manifest::Credentials(secret) => {
                debug!(namespace = %secret.namespace, name = %secret.name, "loaded credentials");
                credentials.insert(secret);
                summary.credentials += 1;
            }
        }
    }
    for promotion in promotions {
        store.create_promotion(promotion)?;
        summary.promotions += 1;
    }

    info!(
        stages = summary.stages,
        freight = summary.freight,
        promotions = summary.promotions,
        credentials = summary.credentials,
        "loaded manifests"
    );
    Ok(summary)
}
