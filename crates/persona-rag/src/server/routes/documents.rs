//! Document and chunk read endpoints

use axum::{
    extract::{Path, Query, State},
    Json,
};
use serde::Deserialize;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::server::state::AppState;
use crate::types::{CanonicalDocument, Chunk};

#[derive(Debug, Deserialize)]
pub struct ListDocumentsQuery {
    pub persona: Option<String>,
}

/// GET /api/documents - List documents, optionally scoped to one persona
pub async fn list_documents(
    State(state): State<AppState>,
    Query(query): Query<ListDocumentsQuery>,
) -> Result<Json<Vec<CanonicalDocument>>> {
    Ok(Json(state.store().list_documents(query.persona.as_deref())?))
}

/// GET /api/documents/:id - Get one document
pub async fn get_document(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<CanonicalDocument>> {
    let document = state
        .store()
        .get_document(id)?
        .ok_or_else(|| Error::NotFound(format!("document {}", id)))?;
    Ok(Json(document))
}

/// GET /api/documents/:id/chunks - Get a document's chunk set in order
pub async fn get_chunks(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Vec<Chunk>>> {
    if state.store().get_document(id)?.is_none() {
        return Err(Error::NotFound(format!("document {}", id)));
    }
    Ok(Json(state.store().chunks_for_document(id)?))
}
