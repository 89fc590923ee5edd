//! Knowledge-graph read and curation endpoints

use axum::{
    extract::{Path, Query, State},
    Json,
};
use serde::Deserialize;
use uuid::Uuid;

use crate::error::Result;
use crate::providers::{EntityFilter, RelationFilter};
use crate::server::state::AppState;
use crate::types::{Entity, Relation, RelationStatus};

/// GET /api/graph/entities - List entities with filters and pagination
pub async fn list_entities(
    State(state): State<AppState>,
    Query(filter): Query<EntityFilter>,
) -> Result<Json<Vec<Entity>>> {
    Ok(Json(state.store().list_entities(&filter)?))
}

/// GET /api/graph/relations - List relations with filters and pagination
pub async fn list_relations(
    State(state): State<AppState>,
    Query(filter): Query<RelationFilter>,
) -> Result<Json<Vec<Relation>>> {
    Ok(Json(state.store().list_relations(&filter)?))
}

#[derive(Debug, Deserialize)]
pub struct StatusRequest {
    pub status: RelationStatus,
}

/// POST /api/graph/relations/:id/status - Approve or reject a pending relation
pub async fn update_relation_status(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(request): Json<StatusRequest>,
) -> Result<Json<Relation>> {
    Ok(Json(state.store().update_relation_status(id, request.status)?))
}

#[derive(Debug, Deserialize)]
pub struct MergeRequest {
    /// Entity that survives the merge
    pub keep: Uuid,
    /// Entity folded into `keep` and deleted
    pub absorb: Uuid,
}

/// POST /api/graph/entities/merge - Merge two entities
pub async fn merge_entities(
    State(state): State<AppState>,
    Json(request): Json<MergeRequest>,
) -> Result<Json<Entity>> {
    Ok(Json(state.store().merge_entities(request.keep, request.absorb)?))
}
