mod history;
pub mod presence;
pub mod registry;
pub mod relay;
pub mod session;
pub mod wire;
mod ws;

use axum::{routing::get, Router};

use crate::AppState;

pub use registry::Registry;
pub use relay::{Relay, SendError};
pub use ws::Heartbeat;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/ws", get(ws::chat_ws))
        .route("/messages/{user_id}", get(history::history))
}
