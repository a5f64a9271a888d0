//! Fork, merge and conflict resolution endpoints.

use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::routing::{get, post, put};
use axum::{Json, Router};
use serde_json::Value;
use tracing::info;

use gitdoc_core::codec::Attributes;
use gitdoc_core::document::USER_ATTRIBUTE;
use gitdoc_core::{Document, DocumentError, PendingMerge};

use crate::api::{blocking, parse_attributes, parse_optional_attributes, AppError};
use crate::AppState;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/documents/:id/fork/:new_id", post(fork_document))
        .route("/documents/:id/merge/:from_id", put(merge_document))
        .route("/documents/:id/pending_merges", get(list_pending_merges))
        .route(
            "/documents/:id/resolve_conflicts/:from_id",
            put(resolve_conflicts),
        )
        .route("/documents/:id/merge_needed/:from_id", get(merge_needed))
}

/// Commits written on behalf of a request carry its `user_id`, if any.
fn apply_author(document: &mut Document, attrs: &Attributes) -> Result<(), DocumentError> {
    match attrs.get(USER_ATTRIBUTE) {
        Some(user) => document.set(USER_ATTRIBUTE, user.clone()),
        None => Ok(()),
    }
}

async fn fork_document(
    State(state): State<Arc<AppState>>,
    Path((id, new_id)): Path<(String, String)>,
) -> Result<Json<Value>, AppError> {
    let _guard = state.locks.lock(&[id.as_str(), new_id.as_str()]).await;
    let store = state.store.clone();
    blocking(move || {
        let fork = store.find(&id)?.create_fork(&new_id)?;
        Ok(Json(fork.to_json()))
    })
    .await
}

async fn merge_document(
    State(state): State<Arc<AppState>>,
    Path((id, from_id)): Path<(String, String)>,
    body: Bytes,
) -> Result<Json<Value>, AppError> {
    let attrs = parse_optional_attributes(&body)?;
    let _guard = state.locks.lock(&[id.as_str(), from_id.as_str()]).await;
    let store = state.store.clone();
    blocking(move || {
        let mut document = store.find(&id)?;
        apply_author(&mut document, &attrs)?;
        if !document.merge(&from_id)? {
            return Err(AppError::Conflict(format!(
                "merging document '{from_id}' into '{id}' left conflicts"
            )));
        }
        info!(id = %id, from_id = %from_id, "documents merged");
        Ok(Json(document.to_json()))
    })
    .await
}

async fn list_pending_merges(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<Vec<PendingMerge>>, AppError> {
    let _guard = state.locks.lock(&[id.as_str()]).await;
    let store = state.store.clone();
    blocking(move || Ok(Json(store.find(&id)?.pending_merges()?))).await
}

async fn resolve_conflicts(
    State(state): State<Arc<AppState>>,
    Path((id, from_id)): Path<(String, String)>,
    body: Bytes,
) -> Result<Json<Value>, AppError> {
    let attrs = parse_attributes(&body)?;
    let _guard = state.locks.lock(&[id.as_str(), from_id.as_str()]).await;
    let store = state.store.clone();
    blocking(move || {
        let mut document = store.find(&id)?;
        apply_author(&mut document, &attrs)?;
        if !document.resolve_conflicts(&from_id, &attrs)? {
            return Err(AppError::Conflict(format!(
                "conflicts from merge with document '{from_id}' remain"
            )));
        }
        Ok(Json(document.to_json()))
    })
    .await
}

async fn merge_needed(
    State(state): State<Arc<AppState>>,
    Path((id, from_id)): Path<(String, String)>,
) -> Result<Json<bool>, AppError> {
    let _guard = state.locks.lock(&[id.as_str(), from_id.as_str()]).await;
    let store = state.store.clone();
    blocking(move || Ok(Json(store.find(&id)?.merge_needed(&from_id)?))).await
}
