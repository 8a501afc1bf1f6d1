use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use cds_core::config::{
    expression_language_from_env_value, fhir_version_from_env_value,
    link_extension_url_from_env_value, plan_dir_from_env_value, server_base_from_env_value,
};
use cds_core::{
    CoreConfig, DirectoryResourceStore, Discovery, DiscoveryService, LiteralEvaluator,
    ResourceStore, ServiceCatalog, StoreLibraryResolver,
};

/// Main entry point for the CDS runner
///
/// Loads every plan under the configured directory, computes discovery metadata for the
/// event-triggered ones and prints the resulting CDS Hooks service catalog to stdout.
///
/// # Environment Variables
/// - `CDS_PLAN_DIR`: directory of plan, activity and library documents (default: "plans")
/// - `CDS_FHIR_VERSION`: FHIR model version libraries must target (default: "R4")
/// - `CDS_SERVER_BASE`: FHIR server used for remote `$apply` (optional)
/// - `CDS_LINK_EXTENSION_URL`: url of related-artifact extensions (default: "http://example.org")
/// - `CDS_EXPRESSION_LANGUAGE`: language of evaluated expressions (default: "text/cql")
///
/// # Returns
/// * `Ok(())` - If the catalog was rendered
/// * `Err(anyhow::Error)` - If configuration is invalid or the plan directory is unreadable
fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::from_default_env().add_directive("cds=info".parse()?))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cfg = Arc::new(CoreConfig::new(
        plan_dir_from_env_value(std::env::var("CDS_PLAN_DIR").ok()),
        fhir_version_from_env_value(std::env::var("CDS_FHIR_VERSION").ok())?,
        server_base_from_env_value(std::env::var("CDS_SERVER_BASE").ok())?,
        link_extension_url_from_env_value(std::env::var("CDS_LINK_EXTENSION_URL").ok()),
        expression_language_from_env_value(std::env::var("CDS_EXPRESSION_LANGUAGE").ok()),
    )?);

    tracing::info!("++ Loading plans from {}", cfg.plan_dir().display());
    tracing::info!("++ FHIR model version {}", cfg.fhir_version());
    if let Some(base) = cfg.server_base() {
        tracing::info!("++ Remote $apply via {}", base);
    }

    let store: Arc<dyn ResourceStore> =
        Arc::new(DirectoryResourceStore::new(cfg.plan_dir().to_path_buf()));
    let discovery = DiscoveryService::new(
        cfg.clone(),
        store.clone(),
        Arc::new(LiteralEvaluator),
        Arc::new(StoreLibraryResolver::new(store)),
    );

    let discoveries = discovery.list_discoveries()?;
    for entry in &discoveries {
        match entry {
            Discovery::Service(service) => tracing::info!(
                "service {} ({} prefetch items)",
                service.plan_id,
                service.prefetch.len()
            ),
            Discovery::Failed { message } => tracing::warn!("discovery failed: {}", message),
        }
    }

    let catalog = ServiceCatalog::from_discoveries(discoveries);
    println!("{}", catalog.to_json_pretty()?);

    Ok(())
}
