use axum::{
    middleware,
    routing::{delete, get, post},
    Router,
};
use sqlx::PgPool;
use std::sync::Arc;
use std::time::Duration;
use tower_http::{
    compression::CompressionLayer,
    cors::{Any, CorsLayer},
    timeout::TimeoutLayer,
    trace::TraceLayer,
};

use domain::services::{
    EmergencyControl, FlagEvaluationEngine, ProtectionAdmin, RegistrationProtection,
};
use domain::stores::{InMemoryAuditSink, InMemoryCounterStore, InMemoryFlagStore};
use persistence::repositories::{AuditLogRepository, FlagRepository, ProtectionRepository};

use crate::config::Config;
use crate::middleware::{metrics_handler, metrics_middleware, trace_id};
use crate::routes::{flags, health, registration};

#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<FlagEvaluationEngine>,
    pub emergency: Arc<EmergencyControl>,
    pub protection: Arc<RegistrationProtection>,
    pub admin: Arc<ProtectionAdmin>,
    pub config: Arc<Config>,
    pub pool: Option<PgPool>,
}

impl AppState {
    /// Wire the services against Postgres-backed stores.
    pub fn postgres(config: Config, pool: PgPool) -> Self {
        let flags = Arc::new(FlagRepository::new(pool.clone()));
        let counters = Arc::new(ProtectionRepository::new(pool.clone()));
        let audit = Arc::new(AuditLogRepository::new(pool.clone()));
        Self::build(config, flags, counters, audit, Some(pool))
    }

    /// Wire the services against in-memory stores. Used by the
    /// integration tests and handy for local experiments without a
    /// database.
    pub fn in_memory(config: Config) -> Self {
        let flags = Arc::new(InMemoryFlagStore::new());
        let counters = Arc::new(InMemoryCounterStore::new());
        let audit = Arc::new(InMemoryAuditSink::new());
        Self::build(config, flags, counters, audit, None)
    }

    fn build(
        config: Config,
        flags: Arc<dyn domain::stores::FlagStore>,
        counters: Arc<dyn domain::stores::CounterStore>,
        audit: Arc<dyn domain::stores::AuditSink>,
        pool: Option<PgPool>,
    ) -> Self {
        let engine = Arc::new(FlagEvaluationEngine::new(flags, audit.clone()));
        let emergency = Arc::new(EmergencyControl::new(engine.clone()));
        let protection = Arc::new(RegistrationProtection::new(
            counters,
            config.protection.thresholds(),
        ));
        let admin = Arc::new(ProtectionAdmin::new(protection.clone(), audit));
        Self {
            engine,
            emergency,
            protection,
            admin,
            config: Arc::new(config),
            pool,
        }
    }
}

pub fn create_app(state: AppState) -> Router {
    let config = state.config.clone();

    // Build CORS layer based on configuration
    let cors = if config.security.cors_origins.is_empty() {
        CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any)
    } else {
        use tower_http::cors::AllowOrigin;
        let origins: Vec<_> = config
            .security
            .cors_origins
            .iter()
            .filter_map(|o| o.parse().ok())
            .collect();
        CorsLayer::new()
            .allow_origin(AllowOrigin::list(origins))
            .allow_methods(Any)
            .allow_headers(Any)
    };

    let flag_routes = Router::new()
        .route("/api/v1/flags", get(flags::list_flags).post(flags::create_flag))
        // Static segments win over :key, so these stay reachable.
        .route("/api/v1/flags/evaluate", post(flags::evaluate_batch))
        .route("/api/v1/flags/stats", get(flags::flag_stats))
        .route(
            "/api/v1/flags/:key",
            get(flags::get_flag).patch(flags::update_flag),
        )
        .route("/api/v1/flags/:key/evaluate", post(flags::evaluate_flag))
        .route("/api/v1/flags/:key/archive", post(flags::archive_flag))
        .route("/api/v1/flags/:key/overrides", post(flags::set_override))
        .route(
            "/api/v1/flags/:key/overrides/:override_id",
            delete(flags::remove_override),
        )
        .route(
            "/api/v1/flags/:key/emergency-disable",
            post(flags::emergency_disable),
        )
        .route("/api/v1/flags/:key/rollback", post(flags::rollback_flag))
        .route("/api/v1/flags/:key/history", get(flags::flag_history));

    let registration_routes = Router::new()
        .route("/api/v1/registration/check", post(registration::check))
        .route(
            "/api/v1/registration/success",
            post(registration::record_success),
        )
        .route(
            "/api/v1/registration/protection",
            get(registration::get_protection).patch(registration::update_protection),
        )
        .route("/api/v1/registration/metrics", get(registration::metrics))
        .route("/api/v1/registration/toggle", post(registration::toggle))
        .route("/api/v1/registration/blocks", post(registration::block_ip))
        .route(
            "/api/v1/registration/blocks/:ip",
            delete(registration::unblock_ip),
        )
        .route(
            "/api/v1/registration/domain-policies",
            post(registration::set_domain_policy),
        );

    // Public routes (no authentication required)
    let public_routes = Router::new()
        .route("/api/health", get(health::health_check))
        .route("/api/health/ready", get(health::ready))
        .route("/api/health/live", get(health::live))
        .route("/metrics", get(metrics_handler));

    // Merge all routes
    Router::new()
        .merge(public_routes)
        .merge(flag_routes)
        .merge(registration_routes)
        // Global middleware (order matters: bottom layers run first)
        .layer(CompressionLayer::new())
        .layer(TimeoutLayer::new(Duration::from_secs(
            config.server.request_timeout_secs,
        )))
        .layer(middleware::from_fn(metrics_middleware)) // Prometheus metrics
        .layer(TraceLayer::new_for_http())
        .layer(middleware::from_fn(trace_id)) // Request ID and logging
        .layer(cors)
        .with_state(state)
}
