use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use miette::Diagnostic;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum AuthzError {
    #[error("invalid {field} `{value}`: {reason}")]
    #[diagnostic(code(lattice::authz::validation))]
    Validation {
        field: String,
        value: String,
        reason: String,
    },

    #[error("failed to load schema `{path}`")]
    #[diagnostic(
        code(lattice::authz::schema_load),
        help("Check that the file exists and is readable")
    )]
    SchemaLoad {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid schema document: {0}")]
    #[diagnostic(
        code(lattice::authz::schema_parse),
        help("The schema must declare objects with relations, permissions and precedence_rules")
    )]
    SchemaParse(#[from] serde_yaml::Error),

    #[error("invalid schema: {0}")]
    #[diagnostic(code(lattice::authz::schema_invalid))]
    SchemaInvalid(String),

    #[error("store error: {0}")]
    #[diagnostic(code(lattice::authz::store))]
    Store(#[from] sea_orm::DbErr),

    #[error("request cancelled")]
    #[diagnostic(code(lattice::authz::cancelled))]
    Cancelled,

    #[error("internal error: {0}")]
    #[diagnostic(code(lattice::authz::internal))]
    Internal(String),
}

impl AuthzError {
    pub fn validation(
        field: impl Into<String>,
        value: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        AuthzError::Validation {
            field: field.into(),
            value: value.into(),
            reason: reason.into(),
        }
    }
}

impl IntoResponse for AuthzError {
    fn into_response(self) -> Response {
        match &self {
            // Validation failures carry the offending field and value back
            // to the caller as plain text.
            AuthzError::Validation { .. } => {
                (StatusCode::BAD_REQUEST, self.to_string()).into_response()
            }
            AuthzError::Cancelled => {
                tracing::debug!("request cancelled before completion");
                (StatusCode::INTERNAL_SERVER_ERROR, "request cancelled").into_response()
            }
            // Store and internal failures get a generic body; details go to
            // the server log only.
            _ => {
                tracing::error!(error = %self, "request failed");
                (StatusCode::INTERNAL_SERVER_ERROR, "internal server error").into_response()
            }
        }
    }
}
