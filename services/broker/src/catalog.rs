//! Service catalog types and lookup.
//!
//! The catalog is loaded once at startup from a directory of JSON documents
//! and served verbatim to callers. Only the fields the lifecycle needs are
//! modeled: ids, names, and the plans of each service.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

use crate::model::ResourceKind;

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("failed to read catalog from {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse catalog document {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("catalog directory {0} contains no services")]
    Empty(String),
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Catalog {
    pub services: Vec<Service>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Service {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub bindable: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    pub plans: Vec<Plan>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Plan {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub free: bool,
}

impl Service {
    /// Resource kind offered by this service, derived from its name.
    ///
    /// Services outside these families are not provisionable here.
    pub fn kind(&self) -> Option<ResourceKind> {
        if self.name.starts_with("relational") {
            Some(ResourceKind::Relational)
        } else if self.name.starts_with("document") {
            Some(ResourceKind::Document)
        } else {
            None
        }
    }
}

impl Catalog {
    /// Load and merge every `*.json` document in the directory.
    pub fn load_dir(dir: &Path) -> Result<Self, CatalogError> {
        let entries = fs::read_dir(dir).map_err(|source| CatalogError::Io {
            path: dir.display().to_string(),
            source,
        })?;

        let mut services = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|source| CatalogError::Io {
                path: dir.display().to_string(),
                source,
            })?;
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let contents = fs::read_to_string(&path).map_err(|source| CatalogError::Io {
                path: path.display().to_string(),
                source,
            })?;
            let doc: Catalog =
                serde_json::from_str(&contents).map_err(|source| CatalogError::Parse {
                    path: path.display().to_string(),
                    source,
                })?;
            services.extend(doc.services);
        }

        if services.is_empty() {
            return Err(CatalogError::Empty(dir.display().to_string()));
        }

        info!(services = services.len(), "Catalog loaded");
        Ok(Self { services })
    }

    pub fn service(&self, service_id: &str) -> Option<&Service> {
        self.services.iter().find(|s| s.id == service_id)
    }

    pub fn plan(&self, service_id: &str, plan_id: &str) -> Option<&Plan> {
        self.service(service_id)?
            .plans
            .iter()
            .find(|p| p.id == plan_id)
    }
}
