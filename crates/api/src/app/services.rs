use std::sync::Arc;
use std::time::Duration;

use sqlx::postgres::PgPoolOptions;

use meterlab_core::{Environment, SourceRegistry};
use meterlab_infra::annotations::PostgresAnnotationRepository;
use meterlab_infra::lease::PostgresLeaseLedger;
use meterlab_infra::source::MySqlSourceClient;
use meterlab_infra::{
    AnnotationRepository, AnnotationStore, AppConfig, AssignmentOrchestrator, AssignmentSettings,
    InMemoryAnnotationRepository, InMemoryLeaseLedger, InMemorySourceClient, LeaseLedger,
    LeaseSweeper, LeaseSweeperHandle, SourceDirectory,
};
use meterlab_scheduler::TargetDistribution;

pub type DynAnnotations = Arc<dyn AnnotationRepository>;
pub type DynLeases = Arc<dyn LeaseLedger>;

pub type Orchestrator = AssignmentOrchestrator<DynAnnotations, DynLeases>;
pub type Store = AnnotationStore<DynAnnotations, DynLeases>;

/// Which durable stores back the service.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum StoreBackend {
    InMemory,
    Postgres,
}

impl StoreBackend {
    pub fn as_str(self) -> &'static str {
        match self {
            StoreBackend::InMemory => "in_memory",
            StoreBackend::Postgres => "postgres",
        }
    }
}

/// Everything the handlers need, shared across requests.
///
/// Holds no mutable state of its own; correctness lives in the stores.
#[derive(Clone)]
pub struct AppServices {
    pub environment: Environment,
    pub backend: StoreBackend,
    pub orchestrator: Arc<Orchestrator>,
    pub store: Arc<Store>,
    pub leases: DynLeases,
}

impl AppServices {
    pub fn new(
        environment: Environment,
        backend: StoreBackend,
        registry: SourceRegistry,
        sources: SourceDirectory,
        annotations: DynAnnotations,
        leases: DynLeases,
        settings: AssignmentSettings,
    ) -> Self {
        let orchestrator = AssignmentOrchestrator::new(
            Arc::new(registry),
            Arc::new(sources),
            annotations.clone(),
            leases.clone(),
            settings,
        );
        Self {
            environment,
            backend,
            orchestrator: Arc::new(orchestrator),
            store: Arc::new(AnnotationStore::new(annotations, leases.clone())),
            leases,
        }
    }

    /// In-memory stores over a caller-supplied source directory (tests, local runs).
    pub fn in_memory(
        environment: Environment,
        registry: SourceRegistry,
        sources: SourceDirectory,
        settings: AssignmentSettings,
    ) -> Self {
        Self::new(
            environment,
            StoreBackend::InMemory,
            registry,
            sources,
            InMemoryAnnotationRepository::arc(),
            InMemoryLeaseLedger::arc(),
            settings,
        )
    }

    pub fn target(&self) -> TargetDistribution {
        *self.orchestrator.settings().balancer.target()
    }

    /// Start the background lease sweeper on this service's ledger.
    pub fn spawn_sweeper(&self, interval: Duration) -> std::io::Result<LeaseSweeperHandle> {
        LeaseSweeper::spawn(self.leases.clone(), interval)
    }
}

impl core::fmt::Debug for AppServices {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("AppServices")
            .field("environment", &self.environment)
            .field("backend", &self.backend)
            .finish_non_exhaustive()
    }
}

/// Wire services from process configuration.
pub async fn build_services(config: &AppConfig) -> anyhow::Result<AppServices> {
    let registry = config.load_registry()?;
    let sources = build_sources(config, &registry);
    let settings = config.assignment_settings();

    if !config.use_persistent_stores {
        tracing::info!(environment = %config.environment, "using in-memory stores");
        return Ok(AppServices::in_memory(config.environment, registry, sources, settings));
    }

    let database_url = config
        .database_url
        .as_deref()
        .ok_or_else(|| anyhow::anyhow!("DATABASE_URL must be set when USE_PERSISTENT_STORES=true"))?;

    let pool = PgPoolOptions::new()
        .max_connections(16)
        .acquire_timeout(Duration::from_secs(5))
        .connect(database_url)
        .await?;

    tracing::info!(environment = %config.environment, "using postgres stores");
    Ok(AppServices::new(
        config.environment,
        StoreBackend::Postgres,
        registry,
        sources,
        Arc::new(PostgresAnnotationRepository::new(pool.clone())),
        Arc::new(PostgresLeaseLedger::new(pool)),
        settings,
    ))
}

/// One source per registry entry. Without a source database every client gets
/// an empty in-memory source, so the service starts but has no work to hand out.
fn build_sources(config: &AppConfig, registry: &SourceRegistry) -> SourceDirectory {
    let mut sources = SourceDirectory::new();
    match &config.source_db {
        Some(settings) => {
            for descriptor in registry.all() {
                let client = MySqlSourceClient::connect_lazy(settings, descriptor);
                sources.register(descriptor.environment, Arc::new(client));
            }
        }
        None => {
            tracing::warn!("no source database configured; every client source is empty");
            for descriptor in registry.all() {
                let client = InMemorySourceClient::new(descriptor.id.clone());
                sources.register(descriptor.environment, Arc::new(client));
            }
        }
    }
    sources
}
