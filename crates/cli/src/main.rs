use cds_core::config::{
    expression_language_from_env_value, fhir_version_from_env_value,
    link_extension_url_from_env_value, plan_dir_from_env_value, server_base_from_env_value,
};
use cds_core::{
    ApplyRequest, CoreConfig, DirectoryResourceStore, Discovery, DiscoveryService,
    HttpRemoteApplier, LiteralEvaluator, PlanApplyService, ResourceStore, ServiceCatalog,
    StoreActivityApplier, StoreLibraryResolver,
};
use clap::{Parser, Subcommand, ValueEnum};
use fhir::Resource;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "cds")]
#[command(about = "Clinical decision-support plan evaluator CLI")]
struct Cli {
    /// Directory holding plan, activity and library documents (overrides CDS_PLAN_DIR)
    #[arg(long, global = true)]
    plan_dir: Option<PathBuf>,

    /// Output format for resources
    #[arg(long, global = true, value_enum, default_value_t = Format::Json)]
    format: Format,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Clone, Copy, ValueEnum)]
enum Format {
    Json,
    Yaml,
}

#[derive(Subcommand)]
enum Commands {
    /// Apply a plan to a patient and print the resulting CarePlan
    Apply {
        /// PlanDefinition id
        plan_id: String,
        /// Patient id
        #[arg(long)]
        subject: String,
        #[arg(long)]
        encounter: Option<String>,
        #[arg(long)]
        practitioner: Option<String>,
        #[arg(long)]
        organization: Option<String>,
        #[arg(long)]
        user_type: Option<String>,
        #[arg(long)]
        user_language: Option<String>,
        #[arg(long)]
        user_task_context: Option<String>,
        #[arg(long)]
        setting: Option<String>,
        #[arg(long)]
        setting_context: Option<String>,
    },
    /// Resolve an event-triggered plan into a RequestGroup for a patient
    Hooks {
        /// PlanDefinition id
        plan_id: String,
        /// Patient id
        #[arg(long)]
        subject: String,
    },
    /// List discovery results for every plan
    Discover,
    /// Print the CDS Hooks service catalog, or one service
    Services {
        /// Service (plan) id
        #[arg(long)]
        id: Option<String>,
    },
    /// Parse one document and report schema errors
    Check {
        /// JSON or YAML file
        path: PathBuf,
    },
}

struct Engine {
    cfg: Arc<CoreConfig>,
    store: Arc<dyn ResourceStore>,
}

impl Engine {
    fn new(plan_dir: Option<PathBuf>) -> Result<Self, Box<dyn std::error::Error>> {
        let plan_dir = plan_dir
            .unwrap_or_else(|| plan_dir_from_env_value(std::env::var("CDS_PLAN_DIR").ok()));
        let cfg = Arc::new(CoreConfig::new(
            plan_dir,
            fhir_version_from_env_value(std::env::var("CDS_FHIR_VERSION").ok())?,
            server_base_from_env_value(std::env::var("CDS_SERVER_BASE").ok())?,
            link_extension_url_from_env_value(std::env::var("CDS_LINK_EXTENSION_URL").ok()),
            expression_language_from_env_value(std::env::var("CDS_EXPRESSION_LANGUAGE").ok()),
        )?);
        let store: Arc<dyn ResourceStore> =
            Arc::new(DirectoryResourceStore::new(cfg.plan_dir().to_path_buf()));
        Ok(Self { cfg, store })
    }

    fn apply_service(&self) -> Result<PlanApplyService, Box<dyn std::error::Error>> {
        let service = PlanApplyService::new(
            self.cfg.clone(),
            self.store.clone(),
            Arc::new(LiteralEvaluator),
            Arc::new(StoreLibraryResolver::new(self.store.clone())),
            Arc::new(StoreActivityApplier::new(self.store.clone())),
        );
        Ok(match self.cfg.server_base() {
            Some(base) => {
                let remote = HttpRemoteApplier::new(base.clone())?;
                service.with_remote_applier(Arc::new(remote))
            }
            None => service,
        })
    }

    fn discovery_service(&self) -> DiscoveryService {
        DiscoveryService::new(
            self.cfg.clone(),
            self.store.clone(),
            Arc::new(LiteralEvaluator),
            Arc::new(StoreLibraryResolver::new(self.store.clone())),
        )
    }
}

fn print_resource(resource: Resource, format: Format) -> Result<(), Box<dyn std::error::Error>> {
    let text = match format {
        Format::Json => resource.render_json()?,
        Format::Yaml => resource.render_yaml()?,
    };
    println!("{text}");
    Ok(())
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::from_default_env().add_directive("cds=warn".parse()?))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();

    match cli.command {
        Some(Commands::Apply {
            plan_id,
            subject,
            encounter,
            practitioner,
            organization,
            user_type,
            user_language,
            user_task_context,
            setting,
            setting_context,
        }) => {
            let engine = Engine::new(cli.plan_dir)?;
            let request = ApplyRequest {
                subject_id: subject,
                encounter_id: encounter,
                practitioner_id: practitioner,
                organization_id: organization,
                user_type,
                user_language,
                user_task_context,
                setting,
                setting_context,
            };
            match engine.apply_service()?.apply(&plan_id, &request) {
                Ok(care_plan) => print_resource(care_plan.into(), cli.format)?,
                Err(e) => eprintln!("Error applying PlanDefinition/{}: {}", plan_id, e),
            }
        }
        Some(Commands::Hooks { plan_id, subject }) => {
            let engine = Engine::new(cli.plan_dir)?;
            match engine.apply_service()?.apply_cds_hooks(&plan_id, &subject) {
                Ok(care_plan) => print_resource(care_plan.into(), cli.format)?,
                Err(e) => eprintln!("Error resolving PlanDefinition/{}: {}", plan_id, e),
            }
        }
        Some(Commands::Discover) => {
            let engine = Engine::new(cli.plan_dir)?;
            let discoveries = engine.discovery_service().list_discoveries()?;
            if discoveries.is_empty() {
                println!("No event-triggered plans found.");
            }
            for discovery in discoveries {
                match discovery {
                    Discovery::Service(service) => {
                        println!(
                            "ID: {}, Hook: {}, Prefetch items: {}",
                            service.plan_id,
                            service.hook.as_deref().unwrap_or("-"),
                            service.prefetch.len()
                        );
                        for item in service.prefetch {
                            println!("  {}: {}", item.key, item.url);
                        }
                    }
                    Discovery::Failed { message } => println!("Failed: {}", message),
                }
            }
        }
        Some(Commands::Services { id }) => {
            let engine = Engine::new(cli.plan_dir)?;
            let catalog =
                ServiceCatalog::from_discoveries(engine.discovery_service().list_discoveries()?);
            match id {
                Some(id) => match catalog.service(&id) {
                    Ok(service) => println!("{}", serde_json::to_string_pretty(service)?),
                    Err(e) => eprintln!("{}", e),
                },
                None => println!("{}", catalog.to_json_pretty()?),
            }
        }
        Some(Commands::Check { path }) => match DirectoryResourceStore::load_file(&path) {
            Ok(resource) => println!(
                "OK: {}/{}",
                resource.resource_type(),
                resource.id().unwrap_or("<no id>")
            ),
            Err(e) => eprintln!("Error in {}: {}", path.display(), e),
        },
        None => {
            println!("Use 'cds --help' for commands");
        }
    }

    Ok(())
}
