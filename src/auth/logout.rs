use std::sync::Arc;

use axum::{debug_handler, extract::State, http::StatusCode};
use tower_sessions::Session;
use tracing::info;

use crate::{chat::Registry, session::USER_ID, model::UserId, AppResult};

/// Ends the caller's cookie session and drops their live socket, if any.
#[debug_handler(state = crate::AppState)]
pub(crate) async fn logout(
    State(registry): State<Arc<Registry>>,
    session: Session,
) -> AppResult<StatusCode> {
    if let Some(user_id) = session.get::<String>(USER_ID).await? {
        if let Ok(user_id) = UserId::parse(&user_id) {
            let had_socket = registry.evict(user_id).is_some();
            info!(%user_id, had_socket, "logged out");
        }
    }
    session.flush().await?;
    Ok(StatusCode::OK)
}
