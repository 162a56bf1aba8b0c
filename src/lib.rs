pub mod appresult;
pub mod auth;
pub mod chat;
pub mod client;
pub mod config;
pub mod db;
pub mod model;
pub mod people;
pub mod session;
pub mod store;
pub mod telemetry;

use std::sync::Arc;

use axum::{extract::FromRef, routing::get, Router};

pub use appresult::{AppError, AppResult};
pub use config::Config;

use chat::{Heartbeat, Registry, Relay};
use store::MessageStore;

#[derive(Clone, FromRef)]
pub struct AppState {
    pub store: Arc<dyn MessageStore>,
    pub registry: Arc<Registry>,
    pub relay: Arc<Relay>,
    pub heartbeat: Heartbeat,
}

impl AppState {
    pub fn new(store: Arc<dyn MessageStore>) -> Self {
        let registry = Arc::new(Registry::new());
        let relay = Arc::new(Relay::new(store.clone(), registry.clone()));
        AppState { store, registry, relay, heartbeat: Heartbeat::default() }
    }

    pub fn with_heartbeat(self, heartbeat: Heartbeat) -> Self {
        AppState { heartbeat, ..self }
    }
}

/// Every route the server exposes, without the session/CORS/trace layers.
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/people", get(people::people))
        .merge(auth::router())
        .merge(chat::router())
}
