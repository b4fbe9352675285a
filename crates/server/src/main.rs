//! cmsvs-rs server entry point.

use std::sync::Arc;
use std::time::Duration;

use apalis::prelude::*;
use axum::{Router, middleware};
use cmsvs_api::{
    AppState, auth_middleware, performance_middleware, router as api_router,
};
use cmsvs_common::{
    CacheManager, Clock, Config, FilenameMinter, PerformanceMetrics,
    cache::{MemoryCache, RedisCache},
};
use cmsvs_core::{AttachmentService, NotificationEngine, PushJob, RequestService};
use cmsvs_db::entities::user;
use cmsvs_db::repositories::{
    FileRepository, NotificationPreferenceRepository, NotificationRepository, RequestRepository,
    PushSubscriptionRepository, UserRepository,
};
use cmsvs_queue::{PushWorkerContext, RedisPushDispatcher, push_worker};
use fred::interfaces::ClientLike;
use sea_orm::{DatabaseConnection, Set};
use tokio::signal;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Waits for a shutdown signal (SIGINT or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            info!("Received SIGINT, initiating graceful shutdown...");
        },
        () = terminate => {
            info!("Received SIGTERM, initiating graceful shutdown...");
        },
    }
}

/// Build the cache manager, preferring Redis with an in-memory fallback.
async fn build_cache(config: &Config) -> CacheManager {
    let memory = MemoryCache::new(config.redis.cache_capacity);
    let ttl = Duration::from_secs(config.redis.cache_ttl_secs);

    if config.redis.url.is_empty() {
        info!("Redis not configured, using in-memory cache only");
        return CacheManager::new(None, memory, ttl);
    }

    match fred::types::config::Config::from_url(&config.redis.url) {
        Ok(fred_config) => {
            let client = fred::clients::Client::new(fred_config, None, None, None);
            client.connect();
            match client.wait_for_connect().await {
                Ok(()) => {
                    info!("Connected to Redis cache");
                    let redis = RedisCache::new(Arc::new(client), config.redis.prefix.clone());
                    CacheManager::new(Some(redis), memory, ttl)
                }
                Err(e) => {
                    warn!(error = %e, "Redis unavailable, falling back to in-memory cache");
                    CacheManager::new(None, memory, ttl)
                }
            }
        }
        Err(e) => {
            warn!(error = %e, "Invalid Redis URL, falling back to in-memory cache");
            CacheManager::new(None, memory, ttl)
        }
    }
}

/// Create the initial admin account on first boot.
async fn bootstrap_admin(
    user_repo: &UserRepository,
    config: &Config,
    clock: Clock,
) -> Result<(), cmsvs_common::AppError> {
    if config.security.admin_password.is_empty() {
        warn!("No admin password configured, skipping admin bootstrap");
        return Ok(());
    }
    if user_repo.find_by_username("admin").await?.is_some() {
        return Ok(());
    }

    let password_hash = UserRepository::hash_password(&config.security.admin_password)?;
    let admin = user_repo
        .create(user::ActiveModel {
            username: Set("admin".to_string()),
            email: Set("admin@cmsvs.local".to_string()),
            full_name: Set("System Administrator".to_string()),
            role: Set(user::UserRole::Admin),
            password_hash: Set(password_hash),
            is_active: Set(true),
            created_at: Set(clock.now().into()),
            updated_at: Set(None),
            ..Default::default()
        })
        .await?;
    info!(user_id = admin.id, "Created initial admin account");
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "cmsvs=debug,tower_http=debug".into()),
        )
        .init();

    info!("Starting cmsvs-rs server...");

    // Load configuration
    let config = Config::load()?;
    let env = std::env::var("CMSVS_ENV").unwrap_or_else(|_| "development".to_string());
    if env == "production" {
        config.validate_production()?;
    }

    let clock = Clock::new(config.timezone.offset_hours);

    // Connect to database and run migrations
    let db = cmsvs_db::init(&config).await?;
    info!("Connected to database");

    info!("Running database migrations...");
    cmsvs_db::migrate(&db).await?;
    info!("Migrations completed");

    let db: Arc<DatabaseConnection> = Arc::new(db);

    // Initialize repositories
    let user_repo = UserRepository::new(Arc::clone(&db));
    let request_repo = RequestRepository::new(Arc::clone(&db));
    let file_repo = FileRepository::new(Arc::clone(&db));
    let notification_repo = NotificationRepository::new(Arc::clone(&db));
    let preference_repo = NotificationPreferenceRepository::new(Arc::clone(&db));
    let subscription_repo = PushSubscriptionRepository::new(Arc::clone(&db));

    bootstrap_admin(&user_repo, &config, clock).await?;

    // Cache and metrics
    let cache = Arc::new(build_cache(&config).await);
    let metrics = Arc::new(PerformanceMetrics::new());

    // Notification engine, optionally backed by the push queue
    let mut engine = NotificationEngine::new(clock, notification_repo.clone());

    let push_enabled = config.push.is_enabled() && !config.redis.url.is_empty();
    let push_storage = if push_enabled {
        info!("Connecting to Redis job queue...");
        let redis_client = redis::Client::open(config.redis.url.as_str())?;
        let redis_conn = redis::aio::ConnectionManager::new(redis_client).await?;
        let storage = apalis_redis::RedisStorage::<PushJob>::new(redis_conn);
        engine.set_dispatch(Arc::new(RedisPushDispatcher::new(storage.clone())));
        info!("Push delivery enabled");
        Some(storage)
    } else {
        info!("Push delivery disabled (missing VAPID keys or Redis)");
        None
    };

    // Initialize services
    let minter = Arc::new(FilenameMinter::new(clock));
    let request_service = RequestService::new(
        Arc::clone(&db),
        request_repo.clone(),
        clock,
        engine.clone(),
        Arc::clone(&cache),
    );
    let attachment_service = AttachmentService::new(
        &config.uploads,
        minter,
        file_repo,
        request_repo,
        clock,
    );

    // Create app state
    let state = AppState {
        db: Arc::clone(&db),
        clock,
        request_service,
        attachment_service,
        notification_engine: engine,
        preference_repo,
        subscription_repo: subscription_repo.clone(),
        user_repo,
        cache,
        metrics,
    };

    // Build router
    let app = Router::new()
        .nest("/api", api_router())
        .layer(middleware::from_fn_with_state(
            state.clone(),
            auth_middleware,
        ))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            performance_middleware,
        ))
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(state);

    // Start the push delivery worker
    if let Some(storage) = push_storage {
        info!("Starting push delivery worker...");
        let ctx = PushWorkerContext::new(
            subscription_repo.clone(),
            notification_repo,
            clock,
            config
                .push
                .vapid_private_key
                .clone()
                .unwrap_or_default(),
            config
                .push
                .vapid_subject
                .clone()
                .unwrap_or_else(|| "mailto:admin@cmsvs.local".to_string()),
        );

        tokio::spawn(async move {
            let monitor = Monitor::new().register({
                WorkerBuilder::new("push")
                    .data(ctx)
                    .backend(storage)
                    .build_fn(push_worker)
            });

            if let Err(e) = monitor.run().await {
                tracing::error!(error = %e, "Push worker failed");
            }
        });
        info!("Push delivery worker started");
    }

    // Start server with graceful shutdown
    let addr = format!("{}:{}", config.server.host, config.server.port);
    info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Server shutdown complete");
    Ok(())
}
