use axum::{
    extract::rejection::JsonRejection,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Deserialize;
use serde_json::json;
use tracing::instrument;

use super::{error_response, present, rejection_response};
use crate::engine::{facade, ConnectionDescriptor, EngineError, MetadataAction};

/// Body of `POST /api/metadata`
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetadataRequest {
    pub action: Option<String>,
    #[serde(rename = "type")]
    pub engine: Option<String>,
    pub connection_string: Option<String>,
    pub table_name: Option<String>,
}

#[instrument(skip_all)]
pub(super) async fn run_metadata(
    payload: Result<Json<MetadataRequest>, JsonRejection>,
) -> Response {
    let Json(request) = match payload {
        Ok(request) => request,
        Err(rejection) => return rejection_response(rejection),
    };

    let (Some(action), Some(tag), Some(target)) = (
        present(&request.action),
        present(&request.engine),
        present(&request.connection_string),
    ) else {
        return error_response(StatusCode::BAD_REQUEST, "Missing required parameters");
    };

    let Ok(action) = action.parse::<MetadataAction>() else {
        return error_response(StatusCode::BAD_REQUEST, "Invalid action");
    };

    let table = present(&request.table_name);
    if action.requires_table() && table.is_none() {
        return error_response(StatusCode::BAD_REQUEST, "Missing tableName");
    }

    let descriptor = match ConnectionDescriptor::parse(tag, target) {
        Ok(descriptor) => descriptor,
        Err(e) => return Json(json!({ "error": e.to_string() })).into_response(),
    };

    match facade::run_metadata(action, &descriptor, table).await {
        Ok(value) => Json(value).into_response(),
        Err(e @ EngineError::MissingArgument { .. }) => {
            error_response(StatusCode::BAD_REQUEST, e.to_string())
        }
        Err(e) => Json(json!({ "error": e.to_string() })).into_response(),
    }
}
