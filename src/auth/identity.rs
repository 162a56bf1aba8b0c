use axum::{extract::FromRequestParts, http::{request::Parts, StatusCode}};
use tower_sessions::Session;

use crate::{model::UserId, session::USER_ID, AppError};

/// The authenticated caller, read from the cookie session.
#[derive(Debug, Clone, Copy)]
pub struct Identity {
    pub user_id: UserId,
}

impl<S> FromRequestParts<S> for Identity
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let session = Session::from_request_parts(parts, state)
            .await
            .map_err(|(status, msg)| AppError::with_status(status, msg))?;

        let Some(user_id) = session.get::<String>(USER_ID).await? else {
            return Err(AppError::unauthorized());
        };
        let user_id = UserId::parse(&user_id)
            .map_err(|_| AppError::with_status(StatusCode::UNAUTHORIZED, "session holds a malformed user id"))?;

        Ok(Identity { user_id })
    }
}
