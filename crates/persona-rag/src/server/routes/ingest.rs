//! Multipart upload convenience endpoint
//!
//! Builds a typed job payload from uploaded files plus a `persona` field, so
//! callers do not have to hand-encode base64 payloads.

use axum::{
    extract::{Multipart, State},
    Json,
};
use serde::Serialize;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::server::state::AppState;
use crate::types::{DocumentSource, JobPayload, SourceKind};

/// Response from file upload
#[derive(Debug, Serialize)]
pub struct IngestResponse {
    pub job_id: Uuid,
    pub files_queued: usize,
    pub message: String,
}

/// POST /api/ingest - Upload files and queue them for ingestion
pub async fn ingest_files(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Json<IngestResponse>> {
    let mut persona: Option<String> = None;
    let mut documents = Vec::new();

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| Error::Validation(format!("failed to read multipart field: {}", e)))?
    {
        let name = field.name().unwrap_or("").to_string();

        if name == "persona" {
            let value = field
                .text()
                .await
                .map_err(|e| Error::Validation(format!("failed to read persona field: {}", e)))?;
            persona = Some(value.trim().to_string());
            continue;
        }

        let filename = field
            .file_name()
            .map(|s| s.to_string())
            .ok_or_else(|| Error::Validation(format!("field '{}' has no filename", name)))?;
        let kind = source_kind_for(&filename)?;
        let data = field
            .bytes()
            .await
            .map_err(|e| Error::Validation(format!("failed to read '{}': {}", filename, e)))?
            .to_vec();

        tracing::info!("Queued upload: {} ({} bytes)", filename, data.len());
        documents.push((filename, kind, data));
    }

    let persona = persona
        .filter(|p| !p.is_empty())
        .ok_or_else(|| Error::Validation("missing 'persona' field".to_string()))?;
    if !state.config().personas.is_known(&persona) {
        return Err(Error::Validation(format!(
            "unknown persona slug '{}'",
            persona
        )));
    }
    if documents.is_empty() {
        return Err(Error::Validation("no files provided".to_string()));
    }

    let mut sources: Vec<DocumentSource> = documents
        .into_iter()
        .map(|(name, kind, data)| DocumentSource {
            name,
            persona: persona.clone(),
            kind,
            data,
        })
        .collect();

    let files_queued = sources.len();
    let payload = if sources.len() == 1 {
        JobPayload::SingleDocument {
            document: sources.remove(0),
        }
    } else {
        JobPayload::Batch { documents: sources }
    };

    let job_id = state.queue().submit(payload).await?;
    Ok(Json(IngestResponse {
        job_id,
        files_queued,
        message: format!("Job queued. Track progress at /api/jobs/{}", job_id),
    }))
}

fn source_kind_for(filename: &str) -> Result<SourceKind> {
    let extension = filename.rsplit('.').next().unwrap_or("");
    SourceKind::from_extension(extension).ok_or_else(|| {
        Error::Validation(format!(
            "unsupported file type '{}': expected pdf, html, or markdown",
            filename
        ))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_source_kind_detection() {
        assert_eq!(source_kind_for("a.pdf").unwrap(), SourceKind::Pdf);
        assert_eq!(source_kind_for("b.MD").unwrap(), SourceKind::Markdown);
        assert_eq!(source_kind_for("c.htm").unwrap(), SourceKind::Html);
        assert!(source_kind_for("d.docx").is_err());
        assert!(source_kind_for("no-extension").is_err());
    }
}
