use clap::Parser;
use figment::{Figment, providers::Env};
use sqlx::postgres::PgPoolOptions;
use std::sync::Arc;
use tokio::signal;
use tracing::{error, info, warn};

use mapharvest::broker::Notifier;
use mapharvest::cache::Cache;
use mapharvest::cache::invalidator::CacheInvalidator;
use mapharvest::cache::noop::NoopCache;
use mapharvest::cache::redis::RedisCache;
use mapharvest::cli::Args;
use mapharvest::config::Config;
use mapharvest::db::{DbContext, migrate};
use mapharvest::jobs::JobService;
use mapharvest::logging::setup_logging;
use mapharvest::registry::WorkerRegistry;
use mapharvest::services::ServiceResult;
use mapharvest::services::manager::ServiceManager;
use mapharvest::services::monitor::HeartbeatMonitor;
use mapharvest::services::web::WebService;
use mapharvest::state::AppState;
use mapharvest::web::auth::AuthConfig;

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    let args = Args::parse();

    let config: Config = Figment::new()
        .merge(Env::raw())
        .extract()
        .expect("Failed to load config");

    setup_logging(&config, args.tracing);

    info!(
        version = env!("CARGO_PKG_VERSION"),
        commit = env!("GIT_COMMIT_SHORT"),
        environment = if cfg!(debug_assertions) {
            "development"
        } else {
            "production"
        },
        "starting mapharvest"
    );

    let db_pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(&config.database_url)
        .await
        .expect("Failed to create database pool");

    // Evolve the schema before anything touches it; a failed migration
    // aborts startup.
    match migrate::run(&db_pool).await {
        Ok(state) => info!(schema = ?state, "schema ready"),
        Err(e) => {
            error!(error = ?e, "schema migration failed");
            std::process::exit(1);
        }
    }

    // Cache is best-effort: an unreachable backend degrades to the no-op
    // variant and every read is served fresh.
    let cache: Arc<dyn Cache> = match &config.cache_url {
        Some(url) => match RedisCache::connect(url).await {
            Ok(cache) => Arc::new(cache),
            Err(e) => {
                warn!(error = ?e, "cache unreachable, continuing without");
                Arc::new(NoopCache)
            }
        },
        None => Arc::new(NoopCache),
    };

    // Broker is notification-only; absence just means workers poll.
    let notifier = match &config.broker_url {
        Some(url) => match Notifier::connect(url, &config.broker_queue).await {
            Ok(notifier) => Some(Arc::new(notifier)),
            Err(e) => {
                warn!(error = ?e, "broker unreachable, claim notifications disabled");
                None
            }
        },
        None => None,
    };

    info!(
        port = config.port,
        heartbeat_interval = format!("{:.2?}", config.heartbeat_interval),
        heartbeat_timeout = format!("{:.2?}", config.heartbeat_timeout),
        auth = config.api_token.is_some(),
        broker = notifier.is_some(),
        spawner = ?config.spawner,
        "configuration loaded"
    );

    let db = DbContext::new(db_pool);
    let invalidator = CacheInvalidator::new(cache.clone());
    let jobs = JobService::new(db.clone(), invalidator.clone(), notifier);
    let registry = WorkerRegistry::new(db.clone(), invalidator.clone());

    let app_state = AppState {
        db: db.clone(),
        cache: cache.clone(),
        invalidator: invalidator.clone(),
        jobs,
        registry,
        auth: AuthConfig {
            token: config.api_token.clone(),
        },
        download_timeout: config.download_timeout,
        max_body_bytes: config.max_body_bytes,
    };

    let mut service_manager = ServiceManager::new();
    service_manager.register_service("web", Box::new(WebService::new(config.port, app_state)));
    service_manager.register_service(
        "monitor",
        Box::new(HeartbeatMonitor::new(
            db,
            invalidator,
            config.heartbeat_interval,
            config.heartbeat_timeout,
            config.worker_retention,
        )),
    );
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
        }
        _ = ctrl_c => {}
        _ = sigterm => {}
    }

    match service_manager.shutdown(shutdown_timeout).await {
        Ok(elapsed) => {
            info!(
                remaining = format!("{:.2?}", shutdown_timeout - elapsed),
                "graceful shutdown complete"
            );
        }
        Err(pending_services) => {
            warn!(
                pending_count = pending_services.len(),
                pending_services = ?pending_services,
                "graceful shutdown elapsed - {} service(s) did not complete",
                pending_services.len()
            );
            exit_code = if exit_code == 0 { 2 } else { exit_code };
        }
    }

    cache.close().await;

    info!(exit_code, "application shutdown complete");
    std::process::exit(exit_code);
}
