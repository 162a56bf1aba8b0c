use std::sync::Arc;

use axum::{debug_handler, extract::State, Json};

use crate::{auth::Identity, model::User, store::MessageStore, AppResult};

/// Everyone in the directory, online or not, ordered by username.
#[debug_handler(state = crate::AppState)]
pub(crate) async fn people(
    _identity: Identity,
    State(store): State<Arc<dyn MessageStore>>,
) -> AppResult<Json<Vec<User>>> {
    Ok(Json(store.users().await?))
}
