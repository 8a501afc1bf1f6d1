//! CDS Hooks discovery document.

use super::{Discovery, PrefetchItem, ServiceDiscovery};
use crate::{CdsError, CdsResult};
use serde::ser::Serializer;
use serde::Serialize;

/// One advertised service.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ServiceEntry {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hook: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub id: String,
    #[serde(
        skip_serializing_if = "Vec::is_empty",
        serialize_with = "serialize_prefetch"
    )]
    pub prefetch: Vec<PrefetchItem>,
}

impl From<ServiceDiscovery> for ServiceEntry {
    fn from(discovery: ServiceDiscovery) -> Self {
        Self {
            hook: discovery.hook,
            name: discovery.name,
            title: discovery.title,
            description: discovery.description,
            id: discovery.plan_id,
            prefetch: discovery.prefetch,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum CatalogEntry {
    Service(ServiceEntry),
    Error {
        #[serde(rename = "Error")]
        message: String,
    },
}

/// `{"services": [...]}` as served at the discovery endpoint.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct ServiceCatalog {
    pub services: Vec<CatalogEntry>,
}

impl ServiceCatalog {
    pub fn from_discoveries(discoveries: impl IntoIterator<Item = Discovery>) -> Self {
        let services = discoveries
            .into_iter()
            .map(|discovery| match discovery {
                Discovery::Service(service) => CatalogEntry::Service(service.into()),
                Discovery::Failed { message } => CatalogEntry::Error { message },
            })
            .collect();
        Self { services }
    }

    /// Look a service up by id.
    ///
    /// # Errors
    ///
    /// Returns [`CdsError::InvalidArgument`] listing the available ids when `id` is unknown.
    pub fn service(&self, id: &str) -> CdsResult<&ServiceEntry> {
        self.entries()
            .find(|entry| entry.id == id)
            .ok_or_else(|| {
                let available: Vec<&str> = self.entries().map(|e| e.id.as_str()).collect();
                CdsError::InvalidArgument(format!(
                    "Cannot resolve service: {id}\nAvailable services: [{}]",
                    available.join(", ")
                ))
            })
    }

    pub fn entries(&self) -> impl Iterator<Item = &ServiceEntry> {
        self.services.iter().filter_map(|entry| match entry {
            CatalogEntry::Service(service) => Some(service),
            CatalogEntry::Error { .. } => None,
        })
    }

    pub fn to_json_pretty(&self) -> CdsResult<String> {
        serde_json::to_string_pretty(self).map_err(|e| fhir::FhirError::from(e).into())
    }
}

// Keeps `itemN` keys in recorded order.
fn serialize_prefetch<S: Serializer>(
    items: &[PrefetchItem],
    serializer: S,
) -> Result<S::Ok, S::Error> {
    serializer.collect_map(items.iter().map(|item| (&item.key, &item.url)))
}
