use axum::{
    extract::rejection::JsonRejection,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Deserialize;
use tracing::instrument;

use super::{error_response, present, rejection_response};
use crate::engine::{facade, ConnectionDescriptor, QueryResult};

const MISSING_FIELDS: &str = "Missing type, connectionString, or query";

/// Body of `POST /api/query`
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryRequest {
    #[serde(rename = "type")]
    pub engine: Option<String>,
    pub connection_string: Option<String>,
    pub query: Option<String>,
}

#[instrument(skip_all)]
pub(super) async fn run_query(payload: Result<Json<QueryRequest>, JsonRejection>) -> Response {
    let Json(request) = match payload {
        Ok(request) => request,
        Err(rejection) => return rejection_response(rejection),
    };

    let (Some(tag), Some(target), Some(statement)) = (
        present(&request.engine),
        present(&request.connection_string),
        present(&request.query),
    ) else {
        return error_response(StatusCode::BAD_REQUEST, MISSING_FIELDS);
    };

    let result = match ConnectionDescriptor::parse(tag, target) {
        Ok(descriptor) => facade::execute_query(&descriptor, statement).await,
        Err(e) => QueryResult::from(e),
    };

    Json(result).into_response()
}
