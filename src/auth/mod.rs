mod identity;
mod logout;

use axum::{routing::post, Router};

use crate::AppState;

pub use identity::Identity;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/logout", post(logout::logout))
}
