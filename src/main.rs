use std::sync::Arc;

use clap::Parser;
use figment::{Figment, providers::Env};
use sqlx::postgres::PgPoolOptions;
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, fmt};

use merrymaker::alerts::AlertService;
use merrymaker::cache::{Cache, LocalCache, SharedCache, TieredCache};
use merrymaker::config::Config;
use merrymaker::data::models::JobType;
use merrymaker::db::DbContext;
use merrymaker::events::EventBuffer;
use merrymaker::queue::JobQueue;
use merrymaker::reaper::{Reaper, ReaperService};
use merrymaker::rules::payload_signature::{PayloadSignatureRule, default_signatures};
use merrymaker::rules::{RulePipeline, UrlDomainExtractor};
use merrymaker::rules::ioc::IocRule;
use merrymaker::rules::unknown_domain::UnknownDomainRule;
use merrymaker::runner::handlers::{AlertDeliveryHandler, RulesJobHandler, SecretRefreshHandler};
use merrymaker::runner::{Runner, RunnerService};
use merrymaker::scheduler::{Scheduler, SchedulerService};
use merrymaker::secrets::SecretValueProvider;
use merrymaker::services::manager::ServiceManager;
use merrymaker::services::web::WebService;
use merrymaker::services::ServiceResult;
use merrymaker::status::ServiceStatusRegistry;
use merrymaker::web::WebState;

/// Event buffer capacity for the operational endpoints.
const EVENT_BUFFER_CAPACITY: usize = 1024;

/// Merrymaker core - job orchestration and rule evaluation
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Log formatter to use
    #[arg(long, value_enum, default_value_t = LogFormatter::Auto)]
    formatter: LogFormatter,
}

#[derive(clap::ValueEnum, Clone, Debug)]
enum LogFormatter {
    /// Use pretty formatter (default in debug mode)
    Pretty,
    /// Use JSON formatter (default in release mode)
    Json,
    /// Auto-select based on build mode (debug=pretty, release=json)
    Auto,
}

/// Provider seam for secret refresh. The script-execution collaborator is
/// wired in deployments that use provider scripts; without it, refreshes
/// fail cleanly and keep the previous value.
struct UnconfiguredProvider;

#[async_trait::async_trait]
impl SecretValueProvider for UnconfiguredProvider {
    async fn fetch(
        &self,
        secret: &merrymaker::data::models::Secret,
    ) -> anyhow::Result<String> {
        anyhow::bail!(
            "no secret value provider configured for '{}'",
            secret.name
        )
    }
}

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    let args = Args::parse();

    let config: Config = Figment::new()
        .merge(Env::prefixed("MERRYMAKER_").split("__"))
        .extract()
        .expect("Failed to load config");

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("warn,merrymaker={}", config.log_level)));

    let use_pretty = match args.formatter {
        LogFormatter::Pretty => true,
        LogFormatter::Json => false,
        LogFormatter::Auto => cfg!(debug_assertions),
    };
    if use_pretty {
        fmt()
            .with_target(true)
            .with_env_filter(filter)
            .pretty()
            .init();
    } else {
        fmt()
            .with_target(true)
            .with_env_filter(filter)
            .json()
            .init();
    }

    info!(
        version = env!("CARGO_PKG_VERSION"),
        commit = env!("GIT_COMMIT_SHORT"),
        environment = if cfg!(debug_assertions) {
            "development"
        } else {
            "production"
        },
        "starting merrymaker"
    );

    let db_pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(&config.database_url)
        .await
        .expect("Failed to create database pool");

    sqlx::migrate!("./migrations")
        .run(&db_pool)
        .await
        .expect("Failed to run migrations");

    let shared_cache = SharedCache::connect(&config.redis_url)
        .await
        .expect("Failed to connect to shared cache");
    let cache: Arc<dyn Cache> = Arc::new(TieredCache::new(
        LocalCache::new(config.local_cache_capacity, config.local_cache_ttl),
        shared_cache,
    ));

    info!(
        port = config.port,
        lease = format!("{:.0?}", config.lease_duration),
        scheduler_tick = format!("{:.0?}", config.scheduler_tick),
        "configuration loaded"
    );

    let events = Arc::new(EventBuffer::new(EVENT_BUFFER_CAPACITY));
    let ctx = DbContext::new(db_pool, events);
    let queue = JobQueue::new(ctx.clone(), Arc::clone(&cache));
    let alert_service = AlertService::new(ctx.clone(), queue.clone());
    let statuses = ServiceStatusRegistry::new();

    // Rule pipeline: registration order is evaluation order.
    let alerts_resolver: Arc<dyn merrymaker::rules::AlertResolver> =
        Arc::new(alert_service.clone());
    let mut pipeline = RulePipeline::new(Arc::new(UrlDomainExtractor));
    pipeline.register(Arc::new(UnknownDomainRule::new(
        ctx.clone(),
        Arc::clone(&cache),
        Arc::clone(&alerts_resolver),
    )));
    pipeline.register(Arc::new(IocRule::new(
        ctx.clone(),
        Arc::clone(&alerts_resolver),
    )));
    pipeline.register(Arc::new(PayloadSignatureRule::new(
        ctx.clone(),
        Arc::clone(&cache),
        Arc::clone(&alerts_resolver),
        default_signatures(),
    )));
    let pipeline = Arc::new(pipeline);

    let http_client = reqwest::Client::builder()
        .timeout(config.dispatch_timeout)
        .user_agent(config.http_user_agent.clone())
        .build()
        .expect("Failed to build HTTP client");

    let mut service_manager = ServiceManager::new();

    let scheduler = Scheduler::new(
        ctx.clone(),
        queue.clone(),
        config.scheduler_tick,
        config.scheduler_batch,
    );
    service_manager.register_service(
        "scheduler",
        Box::new(SchedulerService::new(scheduler, statuses.clone())),
    );

    // One runner per job type this binary handles. Browser jobs belong to
    // the instrumentation process.
    let rules_runner = Runner::new(
        queue.clone(),
        ctx.clone(),
        JobType::Rules,
        config.workers.rules,
        config.lease_duration,
        Arc::new(RulesJobHandler::new(
            ctx.clone(),
            queue.clone(),
            Arc::clone(&pipeline),
        )),
    );
    service_manager.register_service(
        "runner-rules",
        Box::new(RunnerService::new(
            rules_runner,
            "runner-rules",
            statuses.clone(),
        )),
    );

    let alert_runner = Runner::new(
        queue.clone(),
        ctx.clone(),
        JobType::Alert,
        config.workers.alert,
        config.lease_duration,
        Arc::new(AlertDeliveryHandler::new(
            ctx.clone(),
            alert_service.clone(),
            http_client,
        )),
    );
    service_manager.register_service(
        "runner-alert",
        Box::new(RunnerService::new(
            alert_runner,
            "runner-alert",
            statuses.clone(),
        )),
    );

    let secret_runner = Runner::new(
        queue.clone(),
        ctx.clone(),
        JobType::SecretRefresh,
        config.workers.secret_refresh,
        config.lease_duration,
        Arc::new(SecretRefreshHandler::new(
            ctx.clone(),
            Arc::new(UnconfiguredProvider),
        )),
    );
    service_manager.register_service(
        "runner-secret-refresh",
        Box::new(RunnerService::new(
            secret_runner,
            "runner-secret-refresh",
            statuses.clone(),
        )),
    );

    let reaper = Reaper::new(ctx.clone(), config.reaper.clone());
    service_manager.register_service(
        "reaper",
        Box::new(ReaperService::new(reaper, statuses.clone())),
    );

    let web_state = WebState {
        ctx: ctx.clone(),
        cache: Arc::clone(&cache),
        statuses: statuses.clone(),
    };
    service_manager.register_service("web", Box::new(WebService::new(config.port, web_state)));

    service_manager.spawn_all();

    let shutdown_timeout = config.shutdown_timeout;

    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install CTRL+C signal handler");
        info!("received ctrl+c, gracefully shutting down...");
    };

    #[cfg(unix)]
    let sigterm = async {
        use tokio::signal::unix::{SignalKind, signal};
        let mut sigterm_stream =
            signal(SignalKind::terminate()).expect("Failed to install SIGTERM signal handler");
        sigterm_stream.recv().await;
        info!("received SIGTERM, gracefully shutting down...");
    };

    #[cfg(not(unix))]
    let sigterm = std::future::pending::<()>();

    let mut exit_code = 0;

    tokio::select! {
        (service_name, result) = service_manager.run() => {
            match result {
                ServiceResult::GracefulShutdown => {
                    info!(service = service_name, "service completed gracefully");
                }
                ServiceResult::NormalCompletion => {
                    warn!(service = service_name, "service completed unexpectedly");
                    exit_code = 1;
                }
                ServiceResult::Error(e) => {
                    error!(service = service_name, error = ?e, "service failed");
                    exit_code = 1;
                }
            }
            if let Err(pending) = service_manager.shutdown(shutdown_timeout).await {
                warn!(
                    pending_count = pending.len(),
                    pending_services = ?pending,
                    "graceful shutdown elapsed with services still pending"
                );
                exit_code = if exit_code == 0 { 2 } else { exit_code };
            }
        }
        _ = ctrl_c => {
            if let Err(pending) = service_manager.shutdown(shutdown_timeout).await {
                warn!(
                    pending_count = pending.len(),
                    pending_services = ?pending,
                    "graceful shutdown elapsed with services still pending"
                );
                exit_code = 2;
            } else {
                info!("graceful shutdown complete");
            }
        }
        _ = sigterm => {
            if let Err(pending) = service_manager.shutdown(shutdown_timeout).await {
                warn!(
                    pending_count = pending.len(),
                    pending_services = ?pending,
                    "graceful shutdown elapsed with services still pending"
                );
                exit_code = 2;
            } else {
                info!("graceful shutdown complete");
            }
        }
    }

    info!(exit_code, "application shutdown complete");
    std::process::exit(exit_code);
}
