//! # CDS Core
//!
//! Core logic of the clinical decision-support plan evaluator.
//!
//! This crate turns `PlanDefinition` documents into patient-specific output:
//! - [`PlanApplyService::apply`] materialises a plan's applicable actions into a `CarePlan`
//! - [`PlanApplyService::resolve_cds_hooks_plan`] produces the event-triggered `RequestGroup`
//! - [`DiscoveryService`] derives and caches CDS Hooks service metadata per plan
//!
//! Expression evaluation, data access and sub-definition application are capabilities
//! injected through traits ([`ExpressionEvaluator`], [`DataProvider`], [`ActivityApplier`], ...).
//!
//! **No transport concerns**: HTTP endpoints and request parsing belong to the binaries.

pub mod activity;
pub mod apply;
pub mod builders;
pub mod config;
pub mod constants;
pub mod discovery;
pub mod error;
pub mod evaluation;
pub mod session;
pub mod store;

#[cfg(test)]
mod test_support;

pub use activity::{ActivityApplier, HttpRemoteApplier, RemoteApplier, StoreActivityApplier};
pub use apply::{PlanApplyService, ResolvedAction};
pub use config::{CoreConfig, FhirVersion};
pub use discovery::{
    Discovery, DiscoveryCache, DiscoveryService, PrefetchItem, ServiceCatalog, ServiceDiscovery,
};
pub use error::{CdsError, CdsResult};
pub use evaluation::{
    CompiledLibrary, DataProvider, EvaluationContext, EvaluationError, ExpressionEvaluator,
    LibraryResolver, LiteralEvaluator, StoreLibraryResolver, TerminologyProvider, Value,
};
pub use session::ApplyRequest;
pub use store::{DirectoryResourceStore, InMemoryResourceStore, ResourceStore};
