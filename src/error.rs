//! Typed errors and HTTP mapping.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

/// Raised while declaring resources. Fatal: the registry refuses to seal.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DefinitionError {
    #[error("unknown meta option '{key}' on '{name}' (expected one of: children, joins, parents, references, sql)")]
    UnknownMetaOption { name: String, key: String },
    #[error("invalid meta options on '{name}': {message}")]
    InvalidMetaOptions { name: String, message: String },
    #[error("default scope must provide either a name or a block")]
    EmptyDefaultScope,
    #[error("default scope '{0}' does not name a declared scope")]
    UnknownDefaultScope(String),
    #[error("{0}: must provide either a block or a method name")]
    EmptyHook(String),
    #[error("unknown CRUD callback: {0}")]
    UnknownCallback(String),
    #[error("method \"{0}\" is not defined")]
    UnknownMethod(String),
    #[error("method \"{0}\" takes unexpected input, use a block")]
    HookArity(String),
    #[error("unknown actions: {0}")]
    UnknownCrudActions(String),
    #[error("{0} declares no backing model")]
    MissingModel(String),
    #[error("invalid model '{model}': {message}")]
    InvalidModel { model: String, message: String },
    #[error("{api} has no association named '{name}'")]
    UnknownAssociation { api: String, name: String },
    #[error("duplicate resource registration: {0}")]
    DuplicateResource(String),
}

#[derive(Error, Debug)]
pub enum AppError {
    #[error(transparent)]
    Definition(#[from] DefinitionError),
    #[error("resource not found: {0}")]
    Resolution(String),
    #[error("{0} is not a Resource")]
    NotResource(String),
    #[error("{0} is abstract and cannot be served")]
    Abstract(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("validation: {0}")]
    Validation(String),
    #[error("database: {0}")]
    Db(#[from] sqlx::Error),
    #[error("bad request: {0}")]
    BadRequest(String),
}

#[derive(Serialize)]
pub struct ErrorBody {
    pub error: ErrorDetail,
}

#[derive(Serialize)]
pub struct ErrorDetail {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl AppError {
    pub fn status_and_code(&self) -> (StatusCode, &'static str) {
        match self {
            AppError::Definition(_) => (StatusCode::INTERNAL_SERVER_ERROR, "definition_error"),
            AppError::Resolution(_) => (StatusCode::NOT_FOUND, "resolution_error"),
            AppError::NotResource(_) | AppError::Abstract(_) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "not_a_resource")
            }
            AppError::NotFound(_) => (StatusCode::NOT_FOUND, "not_found"),
            AppError::Validation(_) => (StatusCode::UNPROCESSABLE_ENTITY, "validation_error"),
            AppError::Db(e) => {
                if let sqlx::Error::RowNotFound = e {
                    (StatusCode::NOT_FOUND, "not_found")
                } else {
                    (StatusCode::INTERNAL_SERVER_ERROR, "database_error")
                }
            }
            AppError::BadRequest(_) => (StatusCode::BAD_REQUEST, "bad_request"),
        }
    }

    pub fn to_body(&self) -> ErrorBody {
        let (_, code) = self.status_and_code();
        ErrorBody {
            error: ErrorDetail {
                code: code.to_string(),
                message: self.to_string(),
                details: None,
            },
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, _) = self.status_and_code();
        (status, Json(self.to_body())).into_response()
    }
}
