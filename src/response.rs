//! Standard response envelope helpers.

use crate::api::ActionOutcome;
use crate::controller::LoadedRecords;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use serde_json::Value;

#[derive(Serialize)]
pub struct SuccessOne<T> {
    pub data: T,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub meta: Option<Value>,
}

#[derive(Serialize)]
pub struct SuccessRecords {
    pub data: LoadedRecords,
    pub meta: RecordsMeta,
}

#[derive(Serialize)]
pub struct RecordsMeta {
    pub count: u64,
    /// Ids in query order; loaded arrays are ordered by id.
    pub ids: Vec<Value>,
}

pub fn success_one<T: Serialize>(data: T) -> (StatusCode, Json<SuccessOne<T>>) {
    (StatusCode::OK, Json(SuccessOne { data, meta: None }))
}

pub fn success_records(ids: Vec<Value>, data: LoadedRecords) -> (StatusCode, Json<SuccessRecords>) {
    let count = ids.len() as u64;
    (
        StatusCode::OK,
        Json(SuccessRecords {
            data,
            meta: RecordsMeta { count, ids },
        }),
    )
}

pub fn error_body(code: &str, message: String, details: Option<Value>) -> Value {
    serde_json::json!({
        "error": {
            "code": code,
            "message": message,
            "details": details
        }
    })
}

/// Status for an action outcome: field errors are 422, a halted or silent action is 204.
pub fn outcome_status(outcome: &ActionOutcome) -> StatusCode {
    match (&outcome.errors, &outcome.response) {
        (Some(_), _) => StatusCode::UNPROCESSABLE_ENTITY,
        (None, Some(_)) if !outcome.halted => StatusCode::OK,
        _ => StatusCode::NO_CONTENT,
    }
}

impl IntoResponse for ActionOutcome {
    fn into_response(self) -> Response {
        let status = outcome_status(&self);
        match (self.errors, self.response) {
            (Some(errors), _) => (
                status,
                Json(error_body("invalid_record", "record is invalid".into(), Some(errors))),
            )
                .into_response(),
            (None, Some(data)) if status == StatusCode::OK => success_one(data).into_response(),
            _ => status.into_response(),
        }
    }
}
