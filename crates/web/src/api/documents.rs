//! Document CRUD, history and version endpoints.

use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{json, Value};
use tracing::info;

use gitdoc_core::document::{is_valid_id, ID_ATTRIBUTE};
use gitdoc_core::{SaveOutcome, Version};

use crate::api::{blocking, parse_attributes, AppError};
use crate::AppState;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/documents", post(create_document))
        .route(
            "/documents/:id",
            get(get_document).put(update_document).delete(delete_document),
        )
        .route("/documents/:id/history", get(get_history))
        .route("/documents/:id/version/:commit_id", get(get_version))
}

async fn get_document(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<Value>, AppError> {
    let _guard = state.locks.lock(&[id.as_str()]).await;
    let store = state.store.clone();
    blocking(move || Ok(Json(store.find(&id)?.to_json()))).await
}

async fn create_document(
    State(state): State<Arc<AppState>>,
    body: Bytes,
) -> Result<Json<Value>, AppError> {
    let attrs = parse_attributes(&body)?;
    let id = match attrs.get(ID_ATTRIBUTE) {
        Some(Value::String(id)) if !id.is_empty() => id.clone(),
        Some(Value::Null) | None => {
            return Err(AppError::NotAcceptable("document id is required".into()))
        }
        Some(other) => other.to_string(),
    };
    if !is_valid_id(&id) {
        return Err(AppError::NotAcceptable(format!(
            "document id '{id}' must be a valid file name"
        )));
    }

    let _guard = state.locks.lock(&[id.as_str()]).await;
    let store = state.store.clone();
    blocking(move || {
        let mut document = store.build(attrs)?;
        match document.save()? {
            SaveOutcome::Invalid if store.exists(&id) => {
                Err(AppError::Conflict(format!("document '{id}' already exists")))
            }
            SaveOutcome::Invalid => Err(AppError::NotAcceptable(
                document.errors().full_messages().join(", "),
            )),
            _ => {
                info!(id = %id, "document created");
                Ok(Json(document.to_json()))
            }
        }
    })
    .await
}

async fn update_document(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    body: Bytes,
) -> Result<Json<Value>, AppError> {
    let attrs = parse_attributes(&body)?;
    let _guard = state.locks.lock(&[id.as_str()]).await;
    let store = state.store.clone();
    blocking(move || {
        let mut document = store.find(&id)?;
        document.update_attributes(attrs)?;
        Ok(Json(document.to_json()))
    })
    .await
}

async fn delete_document(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<Value>, AppError> {
    let _guard = state.locks.lock(&[id.as_str()]).await;
    let store = state.store.clone();
    blocking(move || {
        store.find(&id)?.destroy()?;
        info!(id = %id, "document deleted");
        Ok(Json(json!({ "id": id })))
    })
    .await
}

async fn get_history(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<Vec<Version>>, AppError> {
    let _guard = state.locks.lock(&[id.as_str()]).await;
    let store = state.store.clone();
    blocking(move || {
        let history = store.find(&id)?.history()?.unwrap_or_default();
        Ok(Json(history))
    })
    .await
}

async fn get_version(
    State(state): State<Arc<AppState>>,
    Path((id, commit_id)): Path<(String, String)>,
) -> Result<Json<Value>, AppError> {
    let _guard = state.locks.lock(&[id.as_str()]).await;
    let store = state.store.clone();
    blocking(move || Ok(Json(store.find_version(&id, &commit_id)?.to_json()))).await
}
