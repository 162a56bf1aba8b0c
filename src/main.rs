use std::sync::Arc;

use anyhow::Context;
use axum::http::HeaderValue;
use murmur::{chat::Heartbeat, db, telemetry, AppState, Config};
use sqlx::sqlite::SqlitePoolOptions;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tower_sessions::{cookie::SameSite, Expiry, MemoryStore, SessionManagerLayer};
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    telemetry::init();
    let config = Config::from_env()?;

    let session_store = MemoryStore::default();
    let session_layer = SessionManagerLayer::new(session_store)
        .with_secure(false)
        .with_same_site(SameSite::Lax)
        .with_expiry(Expiry::OnInactivity(time::Duration::minutes(config.session_idle_minutes)));

    let db_pool = SqlitePoolOptions::new()
        .max_connections(config.db_max_connections)
        .connect(&config.database_url)
        .await
        .with_context(|| format!("opening {}", config.database_url))?;
    db::migrate(&db_pool).await?;

    let app_state = AppState::new(Arc::new(db::SqliteStore::new(db_pool)))
        .with_heartbeat(Heartbeat::new(config.socket_idle()));

    let mut app = murmur::routes()
        .with_state(app_state)
        .layer(session_layer)
        .layer(TraceLayer::new_for_http());
    if let Some(origin) = &config.allowed_origin {
        let origin: HeaderValue = origin.parse().context("MURMUR_ALLOWED_ORIGIN")?;
        app = app.layer(CorsLayer::new().allow_origin(origin).allow_credentials(true));
    }

    let listener = tokio::net::TcpListener::bind(config.bind).await?;
    info!(addr = %config.bind, "murmur listening");
    axum::serve(listener, app).await?;
    Ok(())
}
