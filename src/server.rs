use crate::config::{Config, StorageMode};
use crate::counter_store::{CounterStore, MemoryCounterStore, RedisCounterStore};
use crate::error::{QuotaError, Result};
use crate::handlers::{
    consume_quota, create_user, delete_user, get_user, health_check, list_users, metrics,
    readiness_check, update_user, users_quota, AppState, SharedState,
};
use crate::health::HealthChecker;
use crate::metrics::MetricsCollector;
use crate::middleware::logging_middleware;
use crate::quota::QuotaLimiter;
use crate::users::routing::Clock;
use crate::users::{
    DocumentUserRepository, MemoryUserRepository, RoutedUserRepository, SqlUserRepository,
    UserRepository,
};
use axum::routing::get;
use axum::{middleware, Router};
use chrono::Utc;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

const COUNTER_PURGE_INTERVAL: Duration = Duration::from_secs(60);

impl AppState {
    /// Wire the limiter, the routed user gateway and health probes over the given backends.
    pub fn from_parts(
        store: Arc<dyn CounterStore>,
        relational: Arc<dyn UserRepository>,
        document: Arc<dyn UserRepository>,
        clock: Clock,
    ) -> SharedState {
        let users: Arc<dyn UserRepository> = Arc::new(RoutedUserRepository::with_clock(
            relational.clone(),
            document.clone(),
            clock,
        ));
        let metrics = MetricsCollector::new();

        Arc::new(AppState {
            limiter: QuotaLimiter::new(store.clone(), users.clone(), metrics.clone()),
            users,
            metrics,
            health: HealthChecker::new(store, relational, document),
        })
    }

    pub async fn from_config(config: &Config) -> Result<SharedState> {
        match config.storage_mode {
            StorageMode::Memory => {
                let store = MemoryCounterStore::new();
                spawn_counter_purge(store.clone());
                Ok(Self::from_parts(
                    Arc::new(store),
                    Arc::new(MemoryUserRepository::new()),
                    Arc::new(MemoryUserRepository::new()),
                    Utc::now,
                ))
            }
            StorageMode::External => {
                let client = redis::Client::open(config.redis_url.as_str()).map_err(|e| {
                    QuotaError::CounterStore(format!("Failed to create Redis client: {}", e))
                })?;
                let conn = client.get_connection_manager().await.map_err(|e| {
                    QuotaError::CounterStore(format!("Failed to connect to Redis: {}", e))
                })?;

                let relational = SqlUserRepository::connect(&config.database_url).await?;

                Ok(Self::from_parts(
                    Arc::new(RedisCounterStore::new(conn.clone())),
                    Arc::new(relational),
                    Arc::new(DocumentUserRepository::new(conn)),
                    Utc::now,
                ))
            }
        }
    }
}

fn spawn_counter_purge(store: MemoryCounterStore) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(COUNTER_PURGE_INTERVAL);
        loop {
            interval.tick().await;
            let purged = store.purge_expired();
            if purged > 0 {
                tracing::debug!(purged, "Purged expired quota counters");
            }
        }
    });
}

pub fn create_app(state: SharedState) -> Router {
    Router::new()
        // Quota endpoints
        .route("/api/users/consumeQuota/:user_id", get(consume_quota))
        .route("/api/users/usersQuota", get(users_quota))
        // User CRUD
        .route("/api/users", get(list_users).post(create_user))
        .route(
            "/api/users/:id",
            get(get_user).put(update_user).delete(delete_user),
        )
        // Health, readiness and metrics endpoints
        .route("/health", get(health_check))
        .route("/ready", get(readiness_check))
        .route("/metrics", get(metrics))
        .with_state(state)
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CorsLayer::permissive())
                .layer(middleware::from_fn(logging_middleware)),
        )
}

pub struct Server {
    app: Router,
    bind_addr: SocketAddr,
}

impl Server {
    pub async fn new(config: Config) -> Result<Self> {
        let state = AppState::from_config(&config).await?;
        Ok(Self {
            app: create_app(state),
            bind_addr: config.bind_addr,
        })
    }

    pub async fn run(self) -> std::io::Result<()> {
        let listener = tokio::net::TcpListener::bind(self.bind_addr).await?;

        tracing::info!("Quota service listening on {}", self.bind_addr);
        tracing::info!("Health check available at /health");
        tracing::info!("Readiness check available at /ready");

        axum::serve(
            listener,
            self.app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(shutdown_signal())
        .await
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install terminate handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating graceful shutdown");
        },
        _ = terminate => {
            tracing::info!("Received terminate signal, initiating graceful shutdown");
        },
    }
}
