//! Error handler for fanclub-users.

use axum::extract::rejection::JsonRejection;
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use sqlx::{Error as SQLxError, postgres::PgDatabaseError};
use thiserror::Error;
use validator::ValidationErrors;

pub type Result<T> = std::result::Result<T, ServerError>;

/// Enum representing server-side errors.
///
/// Every variant is either *terminal* (surfaced immediately, never retried)
/// or *transient* (eligible for a saga-level retry, see
/// [`ServerError::is_transient`]).
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("validation error occurred")]
    Validation(#[from] ValidationErrors),

    #[error(transparent)]
    Axum(#[from] JsonRejection),

    #[error("SQL request failed: {0}")]
    Sql(#[from] SQLxError),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("{0} already exists")]
    AlreadyExists(&'static str),

    #[error("{0} not found")]
    NotFound(&'static str),

    #[error("missing, invalid or expired credentials")]
    Unauthenticated,

    #[error("caller is not allowed to act on this resource")]
    Forbidden,

    #[error("invalid username or password")]
    InvalidCredentials,

    #[error("identity provider unreachable: {0}")]
    ProviderUnavailable(String),

    #[error("identity provider refused the service credential")]
    ProviderForbidden,

    #[error("role '{0}' is absent from the provider role catalog")]
    RoleNotFound(String),

    #[error("stores diverged, manual reconciliation required: {details}")]
    Inconsistent { details: String },

    #[error("internal server error, {details}")]
    Internal { details: String },
}

impl ServerError {
    /// Whether a saga may retry the failed sequence.
    ///
    /// Only network-level provider faults qualify; every semantic failure
    /// is terminal.
    pub fn is_transient(&self) -> bool {
        matches!(self, ServerError::ProviderUnavailable(_))
    }
}

impl From<reqwest::Error> for ServerError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() || err.is_connect() || err.is_request() {
            ServerError::ProviderUnavailable(err.to_string())
        } else {
            ServerError::Internal {
                details: err.to_string(),
            }
        }
    }
}

/// Structure for detailed error responses.
#[derive(Debug, Serialize)]
pub struct ResponseError {
    r#type: Option<String>,
    title: String,
    status: u16,
    detail: String,
    instance: Option<String>,
    errors: Option<Vec<FieldError>>,
}

impl ResponseError {
    /// Update error status code.
    pub fn status(mut self, code: StatusCode) -> Self {
        self.status = code.as_u16();
        self
    }

    /// Update `title` field.
    pub fn title(mut self, title: &str) -> Self {
        self.title = title.into();
        self
    }

    /// Add detailed error.
    pub fn details(mut self, description: &str) -> Self {
        self.detail = description.into();
        self
    }

    /// Automatically add errors field.
    pub fn errors(mut self, errors: &ValidationErrors) -> Self {
        self.errors = Some(parse_validation_errors(errors));
        self
    }

    /// Transform [`ResponseError`] into axum [`Response`].
    pub fn into_response(
        self,
    ) -> std::result::Result<Response, axum::http::Error> {
        if let Ok(body) = serde_json::to_string(&self) {
            Response::builder()
                .status(self.status)
                .header(header::CONTENT_TYPE, "application/json")
                .body(body.into())
        } else {
            Ok(internal_server_error())
        }
    }
}

impl Default for ResponseError {
    fn default() -> Self {
        Self {
            r#type: None,
            title: "Internal server error.".to_owned(),
            status: StatusCode::INTERNAL_SERVER_ERROR.as_u16(),
            detail: String::default(),
            instance: None,
            errors: None,
        }
    }
}

#[derive(Debug, Serialize)]
struct FieldError {
    field: String,
    message: String,
}

fn parse_validation_errors(errors: &ValidationErrors) -> Vec<FieldError> {
    errors
        .field_errors()
        .iter()
        .flat_map(|(field, issues)| {
            issues.iter().map(move |issue| FieldError {
                field: field.to_string(),
                message: issue.to_string(),
            })
        })
        .collect()
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let response = ResponseError::default()
            .details(&self.to_string())
            .status(StatusCode::BAD_REQUEST);

        let response = match &self {
            ServerError::Validation(validation_errors) => response
                .title("There were validation errors with your request.")
                .errors(validation_errors),

            ServerError::InvalidArgument(_) => response
                .title("There were validation errors with your request."),

            ServerError::Sql(err) => match err {
                SQLxError::RowNotFound => response
                    .title("Resource not found.")
                    .status(StatusCode::NOT_FOUND),
                _ => response
                    .title("Database request failed.")
                    .details(
                        err.as_database_error()
                            .and_then(|e| {
                                e.downcast_ref::<PgDatabaseError>().detail()
                            })
                            .unwrap_or(&err.to_string()),
                    )
                    .status(StatusCode::INTERNAL_SERVER_ERROR),
            },

            ServerError::AlreadyExists(_) => response
                .title("Resource already exists.")
                .status(StatusCode::CONFLICT),

            ServerError::NotFound(_) | ServerError::RoleNotFound(_) => {
                response
                    .title("Resource not found.")
                    .status(StatusCode::NOT_FOUND)
            },

            ServerError::Unauthenticated | ServerError::InvalidCredentials => {
                response
                    .title("Missing or invalid credentials.")
                    .status(StatusCode::UNAUTHORIZED)
            },

            ServerError::Forbidden => response
                .title("Insufficient permissions on this resource.")
                .status(StatusCode::FORBIDDEN),

            ServerError::ProviderUnavailable(_) => response
                .title("Identity provider is unavailable.")
                .status(StatusCode::SERVICE_UNAVAILABLE),

            ServerError::ProviderForbidden => response
                .title("Identity provider refused the request.")
                .status(StatusCode::BAD_GATEWAY),

            ServerError::Inconsistent { details } => {
                tracing::error!(%details, "stores diverged");

                response
                    .title("Account is in an inconsistent state.")
                    .status(StatusCode::INTERNAL_SERVER_ERROR)
            },

            ServerError::Internal { details } => {
                tracing::error!(%details, "server returned 500 status");

                ResponseError::default()
            },

            _ => response,
        };

        response
            .into_response()
            .unwrap_or_else(|_| internal_server_error())
    }
}

fn internal_server_error() -> Response {
    Response::builder()
        .status(StatusCode::INTERNAL_SERVER_ERROR)
        .header(header::CONTENT_TYPE, "application/json")
        .body(
            serde_json::json!({
                "type": null,
                "title": "Internal server error.",
                "status": StatusCode::INTERNAL_SERVER_ERROR.as_u16(),
                "detail": null,
                "instance": null,
                "errors": null,
            })
            .to_string()
            .into(),
        )
        .unwrap_or_else(|_| Response::new("Internal server error".into()))
}
