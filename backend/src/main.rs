use axum::{
    Router,
    http::Method,
    routing::get,
};
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::cors::{Any, CorsLayer};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod automations;
mod config;
mod database;
mod error;
mod events;
mod handlers;
mod jobs;
mod services;

pub use error::{ApiError, ApiResult, AppError};

#[cfg(test)]
mod tests;

pub struct AppState {
    pub db_pool: sqlx::PgPool,
    pub bus: events::EventBus,
    pub definitions: Arc<automations::PgDefinitionStore>,
    pub executions: Arc<automations::PgExecutionStore>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = config::Config::from_env()?;
    let db_pool = database::create_pool(&config.database_url).await?;

    database::migrate(&db_pool).await?;

    let email_service = services::EmailService::new(&config.smtp);
    let bus = events::EventBus::new();

    let registry = Arc::new(automations::HandlerRegistry::with_builtins(
        reqwest::Client::new(),
        Arc::new(email_service),
    ));
    let queue = Arc::new(jobs::PgDelayQueue::new(db_pool.clone()));
    let retry_policy = jobs::RetryPolicy {
        max_attempts: config.worker.max_attempts,
        backoff: jobs::BackoffStrategy::Exponential {
            base_secs: config.worker.backoff_base_secs,
        },
    };
    let executor = Arc::new(
        automations::GraphExecutor::new(registry, queue.clone()).with_retry_policy(retry_policy),
    );

    let definitions = Arc::new(automations::PgDefinitionStore::new(db_pool.clone()));
    let executions = Arc::new(automations::PgExecutionStore::new(db_pool.clone()));

    let engine = automations::AutomationEngine::new(
        definitions.clone(),
        executions.clone(),
        executor.clone(),
    );
    let _engine_task = engine.start(&bus);

    let worker = jobs::DelayWorker::new(
        queue.as_ref().clone(),
        definitions.clone(),
        executions.clone(),
        executor,
        &config.worker,
    );
    let _scheduler = worker.start().await?;

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::PATCH, Method::DELETE])
        .allow_headers(Any);

    let app = Router::new()
        .route("/", get(|| async { "Relay CRM API v1.0.0" }))
        .route("/health", get(handlers::health_check))
        .nest("/api/v1/automations", handlers::automation_routes())
        .nest("/api/v1/events", handlers::event_routes())
        .layer(ServiceBuilder::new().layer(cors))
        .with_state(Arc::new(AppState {
            db_pool,
            bus,
            definitions,
            executions,
        }));

    let listener = tokio::net::TcpListener::bind(&config.server_addr).await?;
    tracing::info!("Server running on {}", config.server_addr);

    axum::serve(listener, app).await?;

    Ok(())
}
