use std::sync::Arc;

use axum::{debug_handler, extract::{Path, State}, Json};

use crate::{auth::Identity, model::{Message, UserId}, AppResult};

use super::relay::Relay;

/// Conversation between the caller and `user_id`, oldest first.
#[debug_handler(state = crate::AppState)]
pub(crate) async fn history(
    identity: Identity,
    State(relay): State<Arc<Relay>>,
    Path(user_id): Path<UserId>,
) -> AppResult<Json<Vec<Message>>> {
    Ok(Json(relay.history(identity.user_id, user_id).await?))
}
