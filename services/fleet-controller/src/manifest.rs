//! Fleet manifests.
//!
//! A manifest is a JSON file naming one fleet and its spec:
//!
//! ```json
//! { "namespace": "garden", "name": "seeds", "spec": { "replicas": 3, "template": { "body": {} } } }
//! ```

use std::path::{Path, PathBuf};

use seedfleet_id::{FleetKey, IdError};
use seedfleet_reconcile::FleetSpec;
use serde::Deserialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ManifestError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[error("invalid fleet key in {path}: {source}")]
    Key { path: PathBuf, source: IdError },

    #[error("fleet {key} is declared by both {first} and {second}")]
    Duplicate {
        key: FleetKey,
        first: PathBuf,
        second: PathBuf,
    },
}

#[derive(Debug, Deserialize)]
struct RawManifest {
    namespace: String,
    name: String,
    spec: FleetSpec,
}

/// A parsed manifest.
#[derive(Debug, Clone)]
pub struct Manifest {
    pub key: FleetKey,
    pub spec: FleetSpec,
    pub path: PathBuf,
}

impl Manifest {
    pub fn parse(path: &Path, contents: &str) -> Result<Self, ManifestError> {
        let raw: RawManifest =
            serde_json::from_str(contents).map_err(|source| ManifestError::Parse {
                path: path.to_path_buf(),
                source,
            })?;
        let key = FleetKey::new(raw.namespace, raw.name).map_err(|source| ManifestError::Key {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(Self {
            key,
            spec: raw.spec,
            path: path.to_path_buf(),
        })
    }
}

/// Load every `*.json` manifest in `dir`, sorted by file name.
pub fn load_dir(dir: &Path) -> Result<Vec<Manifest>, ManifestError> {
    let io = |source| ManifestError::Io {
        path: dir.to_path_buf(),
        source,
    };

    let mut paths = Vec::new();
    for entry in std::fs::read_dir(dir).map_err(io)? {
        let path = entry.map_err(io)?.path();
        if path.extension().is_some_and(|ext| ext == "json") {
            paths.push(path);
        }
    }
    paths.sort();

    let mut manifests: Vec<Manifest> = Vec::with_capacity(paths.len());
    for path in paths {
        let contents = std::fs::read_to_string(&path).map_err(|source| ManifestError::Io {
            path: path.clone(),
            source,
        })?;
        let manifest = Manifest::parse(&path, &contents)?;
        if let Some(first) = manifests.iter().find(|m| m.key == manifest.key) {
            return Err(ManifestError::Duplicate {
                key: manifest.key,
                first: first.path.clone(),
                second: path,
            });
        }
        manifests.push(manifest);
    }
    Ok(manifests)
}
