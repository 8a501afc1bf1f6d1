//! Resource stores.
//!
//! The engine reads plans, activity definitions and libraries through [`ResourceStore`].
//! Two implementations ship:
//! - [`InMemoryResourceStore`]: thread-safe map, used by tests and embedders
//! - [`DirectoryResourceStore`]: JSON/YAML documents under a directory, rescanned on every call
//!   so edits on disk are picked up by the discovery cache without a restart

use crate::{CdsError, CdsResult};
use chrono::{DateTime, Utc};
use fhir::{ActivityDefinition, Library, PlanDefinition, Resource};
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

pub trait ResourceStore: Send + Sync {
    /// Read one resource by type and id.
    fn read_resource(&self, resource_type: &str, id: &str) -> CdsResult<Resource>;

    /// All resources of `resource_type`, ordered by id.
    fn list_resources(&self, resource_type: &str) -> CdsResult<Vec<Resource>>;

    fn read_plan(&self, id: &str) -> CdsResult<PlanDefinition> {
        match self.read_resource("PlanDefinition", id)? {
            Resource::PlanDefinition(plan) => Ok(plan),
            _ => Err(CdsError::not_found("PlanDefinition", id)),
        }
    }

    fn list_plans(&self) -> CdsResult<Vec<PlanDefinition>> {
        Ok(self
            .list_resources("PlanDefinition")?
            .into_iter()
            .filter_map(|r| match r {
                Resource::PlanDefinition(plan) => Some(plan),
                _ => None,
            })
            .collect())
    }

    fn read_activity_definition(&self, id: &str) -> CdsResult<ActivityDefinition> {
        match self.read_resource("ActivityDefinition", id)? {
            Resource::ActivityDefinition(definition) => Ok(definition),
            _ => Err(CdsError::not_found("ActivityDefinition", id)),
        }
    }

    fn read_library(&self, id: &str) -> CdsResult<Library> {
        match self.read_resource("Library", id)? {
            Resource::Library(library) => Ok(library),
            _ => Err(CdsError::not_found("Library", id)),
        }
    }
}

// ============================================================================
// In-memory store
// ============================================================================

type StoreKey = (String, String);

#[derive(Default)]
pub struct InMemoryResourceStore {
    resources: RwLock<BTreeMap<StoreKey, Resource>>,
}

impl InMemoryResourceStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a resource. Resources without an id are ignored.
    pub fn insert(&self, resource: impl Into<Resource>) {
        let resource = resource.into();
        let Some(id) = resource.id().map(str::to_owned) else {
            tracing::warn!(
                "ignoring {} without id",
                resource.resource_type()
            );
            return;
        };
        let key = (resource.resource_type().to_owned(), id);
        self.resources.write().insert(key, resource);
    }

    pub fn remove(&self, resource_type: &str, id: &str) -> Option<Resource> {
        self.resources
            .write()
            .remove(&(resource_type.to_owned(), id.to_owned()))
    }
}

impl ResourceStore for InMemoryResourceStore {
    fn read_resource(&self, resource_type: &str, id: &str) -> CdsResult<Resource> {
        self.resources
            .read()
            .get(&(resource_type.to_owned(), id.to_owned()))
            .cloned()
            .ok_or_else(|| CdsError::not_found(resource_type, id))
    }

    fn list_resources(&self, resource_type: &str) -> CdsResult<Vec<Resource>> {
        Ok(self
            .resources
            .read()
            .iter()
            .filter(|((ty, _), _)| ty == resource_type)
            .map(|(_, r)| r.clone())
            .collect())
    }
}

// ============================================================================
// Directory store
// ============================================================================

/// Reads `*.json`, `*.yaml` and `*.yml` documents below a root directory.
///
/// Files that fail to parse are skipped with a warning when listing, so one bad document does
/// not hide every other plan. `meta.lastUpdated` is stamped from the file modification time
/// when a document does not carry one.
#[derive(Clone, Debug)]
pub struct DirectoryResourceStore {
    root: PathBuf,
}

impl DirectoryResourceStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Parse one document file, stamping `meta.lastUpdated` from its mtime when absent.
    pub fn load_file(path: &Path) -> CdsResult<Resource> {
        let text = fs::read_to_string(path)?;
        let mut resource = match extension(path) {
            Some("json") => Resource::parse_json(&text)?,
            _ => Resource::parse_yaml(&text)?,
        };
        let modified: DateTime<Utc> = fs::metadata(path)?.modified()?.into();
        resource.stamp_last_updated(modified);
        Ok(resource)
    }

    fn scan(&self) -> CdsResult<Vec<Resource>> {
        let mut files = Vec::new();
        collect_documents(&self.root, &mut files)?;
        files.sort();

        let mut resources = Vec::with_capacity(files.len());
        for path in files {
            match Self::load_file(&path) {
                Ok(resource) => resources.push(resource),
                Err(err) => {
                    tracing::warn!("skipping {}: {}", path.display(), err);
                }
            }
        }
        Ok(resources)
    }
}

impl ResourceStore for DirectoryResourceStore {
    fn read_resource(&self, resource_type: &str, id: &str) -> CdsResult<Resource> {
        self.scan()?
            .into_iter()
            .find(|r| r.resource_type() == resource_type && r.id() == Some(id))
            .ok_or_else(|| CdsError::not_found(resource_type, id))
    }

    fn list_resources(&self, resource_type: &str) -> CdsResult<Vec<Resource>> {
        let mut resources: Vec<_> = self
            .scan()?
            .into_iter()
            .filter(|r| r.resource_type() == resource_type)
            .collect();
        resources.sort_by(|a, b| a.id().cmp(&b.id()));
        Ok(resources)
    }
}

fn extension(path: &Path) -> Option<&str> {
    path.extension().and_then(|e| e.to_str())
}

fn collect_documents(dir: &Path, files: &mut Vec<PathBuf>) -> CdsResult<()> {
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        let file_type = entry.file_type()?;

        if file_type.is_dir() {
            collect_documents(&path, files)?;
        } else if file_type.is_file() && matches!(extension(&path), Some("json" | "yaml" | "yml")) {
            files.push(path);
        }
    }
    Ok(())
}
