use axum::{Json, http::StatusCode, response::IntoResponse};
use serde::Serialize;

pub enum AppError {
    DatabaseError(diesel::result::Error),
    Unhandled(String),
}

#[derive(Serialize)]
struct ErrorResponse {
    code: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    msg: Option<String>,
}

impl IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        let (status_code, error_response) = match self {
            AppError::DatabaseError(e) => {
                tracing::error!(err = %e, "Database error in request handler");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    #[cfg(debug_assertions)]
                    ErrorResponse {
                        code: "DB_ERR".into(),
                        msg: Some(format!("Database error: {e}")),
                    },
                    #[cfg(not(debug_assertions))]
                    ErrorResponse {
                        code: "SVR_ERR".into(),
                        msg: Some("Internal server error".into()),
                    },
                )
            }
            AppError::Unhandled(e) => {
                tracing::error!(err = %e, "Unhandled error in request handler");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    #[cfg(debug_assertions)]
                    ErrorResponse {
                        code: "ERR".into(),
                        msg: Some(e),
                    },
                    #[cfg(not(debug_assertions))]
                    ErrorResponse {
                        code: "SVR_ERR".into(),
                        msg: Some("Internal server error".into()),
                    },
                )
            }
        };

        (status_code, Json(error_response)).into_response()
    }
}

impl From<diesel::result::Error> for AppError {
    fn from(e: diesel::result::Error) -> Self {
        AppError::DatabaseError(e)
    }
}

impl From<eyre::Error> for AppError {
    fn from(e: eyre::Error) -> Self {
        AppError::Unhandled(e.to_string())
    }
}

impl From<&'static str> for AppError {
    fn from(e: &'static str) -> Self {
        AppError::Unhandled(e.into())
    }
}
