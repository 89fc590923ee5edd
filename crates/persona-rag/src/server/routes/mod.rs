//! API routes for the ingestion server

pub mod documents;
pub mod events;
pub mod graph;
pub mod ingest;
pub mod jobs;

use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post},
    Router,
};

use crate::server::state::AppState;

/// Build all API routes
pub fn api_routes(max_upload_size: usize) -> Router<AppState> {
    Router::new()
        // Typed job submission
        .route("/jobs", post(jobs::submit_job))
        // Multipart convenience wrapper - larger body limit for uploads
        .route(
            "/ingest",
            post(ingest::ingest_files).layer(DefaultBodyLimit::max(max_upload_size)),
        )
        // Job management
        .route("/jobs", get(jobs::list_jobs))
        .route("/jobs/:id", get(jobs::get_job))
        .route("/jobs/:id/retry", post(jobs::retry_job))
        .route("/jobs/:id/cancel", post(jobs::cancel_job))
        .route("/jobs/:id/events", get(events::job_events))
        // Documents
        .route("/documents", get(documents::list_documents))
        .route("/documents/:id", get(documents::get_document))
        .route("/documents/:id/chunks", get(documents::get_chunks))
        // Knowledge graph
        .route("/graph/entities", get(graph::list_entities))
        .route("/graph/entities/merge", post(graph::merge_entities))
        .route("/graph/relations", get(graph::list_relations))
        .route("/graph/relations/:id/status", post(graph::update_relation_status))
        // Info
        .route("/info", get(info))
}

/// API info endpoint
async fn info() -> axum::Json<serde_json::Value> {
    axum::Json(serde_json::json!({
        "name": "persona-rag",
        "version": env!("CARGO_PKG_VERSION"),
        "description": "Persona-scoped document ingestion and knowledge-graph backend",
        "endpoints": {
            "POST /api/jobs": "Submit a typed ingestion job",
            "POST /api/ingest": "Upload files for async ingestion",
            "GET /api/jobs": "List jobs",
            "GET /api/jobs/:id": "Get job state and progress",
            "POST /api/jobs/:id/retry": "Retry a failed job",
            "POST /api/jobs/:id/cancel": "Cancel a pending or processing job",
            "GET /api/jobs/:id/events": "SSE progress stream",
            "GET /api/documents": "List documents, optionally by persona",
            "GET /api/documents/:id": "Get document details",
            "GET /api/documents/:id/chunks": "Get a document's chunks",
            "GET /api/graph/entities": "List entities with filters",
            "POST /api/graph/entities/merge": "Merge two entities",
            "GET /api/graph/relations": "List relations with filters",
            "POST /api/graph/relations/:id/status": "Approve or reject a relation"
        },
        "features": {
            "deterministic_chunking": "Token-bounded chunks with stable content-derived ids",
            "deduplication": "Content-hash based skip of unchanged documents",
            "knowledge_graph": "Per-chunk entity/relation extraction with confidence merging",
            "persona_scoping": "Documents and graph records are isolated per persona",
            "progress_streaming": "Per-stage job progress over SSE"
        }
    }))
}
