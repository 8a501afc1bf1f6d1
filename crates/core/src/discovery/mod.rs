//! Service discovery for event-triggered plans.
//!
//! A plan typed `eca-rule` is exposed as a CDS Hooks service. Its prefetch templates are found
//! by dry-running the plan's primary library with a collecting [`DiscoveryDataProvider`]: every
//! retrieve the library would perform is recorded as a search URL.
//!
//! Dry runs are cached per plan id in a [`DiscoveryCache`]. An entry is reused only while the
//! stored plan's `meta.lastUpdated` matches the snapshot it was computed from. Plans without a
//! timestamp are recomputed on every request.

mod catalog;
mod provider;

pub use catalog::{CatalogEntry, ServiceCatalog, ServiceEntry};
pub use provider::{prefetch_url, DiscoveryDataProvider};

use crate::config::CoreConfig;
use crate::constants::DISCOVERY_PATIENT_PLACEHOLDER;
use crate::evaluation::{
    EvaluationContext, ExpressionEvaluator, LibraryResolver, TerminologyProvider, Value,
};
use crate::store::ResourceStore;
use crate::CdsResult;
use fhir::PlanDefinition;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

/// One prefetch template, keyed `itemN`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PrefetchItem {
    pub key: String,
    pub url: String,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ServiceDiscovery {
    pub plan_id: String,
    /// Name of the first trigger of the first action, e.g. `patient-view`.
    pub hook: Option<String>,
    pub name: Option<String>,
    pub title: Option<String>,
    pub description: Option<String>,
    pub prefetch: Vec<PrefetchItem>,
}

/// Discovery metadata for one plan.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Discovery {
    Service(ServiceDiscovery),
    /// The plan is an event rule but its library could not be loaded.
    Failed { message: String },
}

// ============================================================================
// Cache
// ============================================================================

#[derive(Clone, Debug)]
struct CachedDiscovery {
    plan: PlanDefinition,
    discovery: Option<Discovery>,
}

impl CachedDiscovery {
    fn is_current_for(&self, plan: &PlanDefinition) -> bool {
        match (self.plan.last_updated(), plan.last_updated()) {
            (Some(cached), Some(current)) => cached == current,
            _ => false,
        }
    }
}

type Slot = Arc<Mutex<Option<CachedDiscovery>>>;

/// Process-wide discovery memo, keyed by plan id.
///
/// Each plan id has its own lock, so the freshness check and the recompute that follows it
/// are atomic per plan while different plans proceed independently.
#[derive(Default)]
pub struct DiscoveryCache {
    slots: Mutex<HashMap<String, Slot>>,
}

impl DiscoveryCache {
    pub fn new() -> Self {
        Self::default()
    }

    fn slot(&self, plan_id: &str) -> Slot {
        self.slots
            .lock()
            .entry(plan_id.to_string())
            .or_default()
            .clone()
    }

    /// Number of plans with a cached entry.
    pub fn len(&self) -> usize {
        self.slots
            .lock()
            .values()
            .filter(|slot| slot.lock().is_some())
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.slots.lock().clear();
    }
}

// ============================================================================
// Service
// ============================================================================

pub struct DiscoveryService {
    cfg: Arc<CoreConfig>,
    store: Arc<dyn ResourceStore>,
    evaluator: Arc<dyn ExpressionEvaluator>,
    libraries: Arc<dyn LibraryResolver>,
    terminology: Option<Arc<dyn TerminologyProvider>>,
    cache: Arc<DiscoveryCache>,
}

impl DiscoveryService {
    pub fn new(
        cfg: Arc<CoreConfig>,
        store: Arc<dyn ResourceStore>,
        evaluator: Arc<dyn ExpressionEvaluator>,
        libraries: Arc<dyn LibraryResolver>,
    ) -> Self {
        Self {
            cfg,
            store,
            evaluator,
            libraries,
            terminology: None,
            cache: Arc::new(DiscoveryCache::new()),
        }
    }

    /// Share `cache` with other services instead of the private one created by `new`.
    pub fn with_cache(mut self, cache: Arc<DiscoveryCache>) -> Self {
        self.cache = cache;
        self
    }

    pub fn with_terminology(mut self, terminology: Arc<dyn TerminologyProvider>) -> Self {
        self.terminology = Some(terminology);
        self
    }

    pub fn cache(&self) -> &Arc<DiscoveryCache> {
        &self.cache
    }

    /// Discoveries for every stored plan that yields one, in store order.
    ///
    /// # Errors
    ///
    /// Returns an error only if the store cannot list plans.
    pub fn list_discoveries(&self) -> CdsResult<Vec<Discovery>> {
        let plans = self.store.list_plans()?;
        tracing::debug!("listing discoveries for {} plans", plans.len());
        Ok(plans
            .iter()
            .filter_map(|plan| self.get_discovery(plan))
            .collect())
    }

    /// Discovery for one plan, served from the cache while the plan is unchanged.
    pub fn get_discovery(&self, plan: &PlanDefinition) -> Option<Discovery> {
        let Some(plan_id) = plan.id() else {
            return self.compute_discovery(plan);
        };

        let slot = self.cache.slot(plan_id);
        let mut entry = slot.lock();
        if let Some(cached) = entry.as_ref() {
            if cached.is_current_for(plan) {
                return cached.discovery.clone();
            }
        }

        let discovery = self.compute_discovery(plan);
        *entry = Some(CachedDiscovery {
            plan: plan.clone(),
            discovery: discovery.clone(),
        });
        discovery
    }

    /// Compute discovery metadata for `plan` without consulting the cache.
    ///
    /// Returns `None` for plans that are not event rules, have no library, or whose library
    /// targets a FHIR version other than the configured one.
    pub fn compute_discovery(&self, plan: &PlanDefinition) -> Option<Discovery> {
        let plan_id = plan.id().unwrap_or_default();
        if !plan.is_eca_rule() || plan.library.is_empty() {
            return None;
        }

        let library = match self.libraries.resolve_primary(plan) {
            Ok(Some(library)) => library,
            Ok(None) => return None,
            Err(err) => {
                tracing::warn!("discovery failed for PlanDefinition/{}: {}", plan_id, err);
                return Some(Discovery::Failed {
                    message: err.to_string(),
                });
            }
        };

        let version = self.cfg.fhir_version();
        match library.using_version("FHIR") {
            Some(declared) if version.accepts(declared) => {}
            declared => {
                tracing::warn!(
                    "skipping library {} of PlanDefinition/{}: uses FHIR {:?}, expected {}",
                    library.name,
                    plan_id,
                    declared,
                    version
                );
                return None;
            }
        }

        let parameters: BTreeMap<String, Value> = library
            .parameters
            .iter()
            .map(|p| (p.name.clone(), p.type_specifier.default_value()))
            .collect();

        let collector = DiscoveryDataProvider::new(self.terminology.as_deref());
        {
            let context = EvaluationContext::new(DISCOVERY_PATIENT_PLACEHOLDER)
                .with_library(Some(&library))
                .with_parameters(&parameters)
                .with_data_provider(Some(&collector));
            for statement in &library.statements {
                if let Err(err) = self.evaluator.evaluate(&context, &statement.expression) {
                    tracing::debug!(
                        "ignoring dry-run failure of {} in {}: {}",
                        statement.name,
                        library.name,
                        err
                    );
                }
            }
        }

        let hook = plan
            .action
            .first()
            .and_then(|action| action.trigger.first())
            .and_then(|trigger| trigger.name.clone());

        Some(Discovery::Service(ServiceDiscovery {
            plan_id: plan_id.to_string(),
            hook,
            name: plan.name.clone(),
            title: plan.title.clone(),
            description: plan.description.clone(),
            prefetch: collector.into_prefetch(),
        }))
    }
}
