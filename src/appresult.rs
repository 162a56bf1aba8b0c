use axum::{http::StatusCode, response::{IntoResponse, Response}};

pub type AppResult<T> = Result<T, AppError>;

#[derive(Debug)]
pub struct AppError {
    pub status: StatusCode,
    pub err: anyhow::Error,
}

impl AppError {
    pub fn with_status(status: StatusCode, msg: impl Into<String>) -> Self {
        Self { status, err: anyhow::Error::msg(msg.into()) }
    }

    pub fn unauthorized() -> Self {
        Self::with_status(StatusCode::UNAUTHORIZED, "not logged in")
    }

    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self::with_status(StatusCode::BAD_REQUEST, msg)
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        if self.status.is_server_error() {
            tracing::error!(error = %self.err, "request failed");
            (
                self.status,
                format!("{}\n\n{}", self.err, self.err.backtrace()),
            )
                .into_response()
        } else {
            (self.status, self.err.to_string()).into_response()
        }
    }
}

impl<E> From<E> for AppError
where
    E: Into<anyhow::Error>,
{
    fn from(err: E) -> Self {
        Self { status: StatusCode::INTERNAL_SERVER_ERROR, err: err.into() }
    }
}
