use axum::{
    extract::{rejection::JsonRejection, Multipart, State},
    Json,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, info};

use crate::api::{ApiError, ApiState};
use crate::workspace::TreeNode;

#[derive(Debug, Deserialize)]
pub struct OpenRequest {
    pub path: String,
}

#[derive(Debug, Serialize)]
pub struct OpenResponse {
    pub path: String,
    pub content: String,
}

#[derive(Debug, Deserialize)]
pub struct SaveRequest {
    pub path: String,
    pub content: String,
}

pub async fn list_files(State(state): State<ApiState>) -> Result<Json<TreeNode>, ApiError> {
    Ok(Json(state.workspace.tree().await?))
}

pub async fn open_file(
    State(state): State<ApiState>,
    payload: Result<Json<OpenRequest>, JsonRejection>,
) -> Result<Json<OpenResponse>, ApiError> {
    let Json(request) = payload?;
    let content = state.workspace.read(&request.path).await?;

    Ok(Json(OpenResponse {
        path: request.path,
        content,
    }))
}

pub async fn save_file(
    State(state): State<ApiState>,
    payload: Result<Json<SaveRequest>, JsonRejection>,
) -> Result<Json<Value>, ApiError> {
    let Json(request) = payload?;
    state
        .workspace
        .write(&request.path, request.content.as_bytes())
        .await?;

    debug!("Saved {}", request.path);
    Ok(Json(json!({ "ok": true })))
}

/// Multipart fields: any number of `files` parts plus an optional `dest`
/// folder, which may arrive before or after the files.
pub async fn upload_files(
    State(state): State<ApiState>,
    mut multipart: Multipart,
) -> Result<Json<Value>, ApiError> {
    let mut dest = String::new();
    let mut uploads = Vec::new();

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::BadRequest(e.body_text()))?
    {
        let name = field.name().map(str::to_string);
        match name.as_deref() {
            Some("dest") => {
                dest = field
                    .text()
                    .await
                    .map_err(|e| ApiError::BadRequest(e.body_text()))?;
            }
            Some("files") => {
                let filename = field
                    .file_name()
                    .map(str::to_string)
                    .ok_or_else(|| ApiError::BadRequest("Upload is missing a filename".into()))?;
                let bytes = field
                    .bytes()
                    .await
                    .map_err(|e| ApiError::BadRequest(e.body_text()))?;
                uploads.push((filename, bytes));
            }
            other => debug!("Ignoring multipart field {:?}", other),
        }
    }

    let mut stored = Vec::with_capacity(uploads.len());
    for (filename, bytes) in uploads {
        stored.push(state.workspace.store_upload(&dest, &filename, &bytes).await?);
    }

    info!("Stored {} uploaded file(s) under '{}'", stored.len(), dest);
    Ok(Json(json!({ "stored": stored })))
}
