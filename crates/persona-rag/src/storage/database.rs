//! SQLite-backed document store
//!
//! A single connection behind a mutex. Entity and relation upserts run their
//! read-modify-write inside one transaction while holding the lock, which
//! gives the conditional-upsert atomicity the store contract requires.

use parking_lot::Mutex;
use rusqlite::types::Type;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row, ToSql};
use serde::de::DeserializeOwned;
use std::path::Path;
use tracing::info;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::providers::{DocumentStore, EntityFilter, JobFilter, RelationFilter};
use crate::types::{
    CanonicalDocument, Chunk, ChunkType, DocType, Entity, EntityType, EntityUpsert, IngestionJob,
    JobStatus, Relation, RelationStatus, RelationUpsert,
};

/// SQLite persistence backend
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open (or create) the database at the given path
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self> {
        let conn = Connection::open(path.as_ref())?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.initialize()?;
        info!("SQLite store ready at {}", path.as_ref().display());
        Ok(store)
    }

    /// In-memory database, used by tests and ephemeral deployments
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.initialize()?;
        Ok(store)
    }

    fn initialize(&self) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;
             PRAGMA foreign_keys = ON;",
        )?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS documents (
                id            TEXT PRIMARY KEY,
                persona       TEXT NOT NULL,
                title         TEXT NOT NULL,
                doc_type      TEXT NOT NULL,
                raw_text      TEXT NOT NULL,
                sections      TEXT NOT NULL,
                metadata      TEXT NOT NULL,
                content_hash  TEXT NOT NULL,
                needs_review  INTEGER NOT NULL DEFAULT 0,
                created_at    TEXT NOT NULL,
                updated_at    TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_documents_persona ON documents(persona);

            CREATE TABLE IF NOT EXISTS chunks (
                id               TEXT PRIMARY KEY,
                document_id      TEXT NOT NULL REFERENCES documents(id) ON DELETE CASCADE,
                chunk_index      INTEGER NOT NULL,
                content          TEXT NOT NULL,
                token_count      INTEGER NOT NULL,
                content_hash     TEXT NOT NULL,
                chunk_type       TEXT NOT NULL,
                char_start       INTEGER NOT NULL,
                char_end         INTEGER NOT NULL,
                occurrence_count INTEGER NOT NULL DEFAULT 1
            );
            CREATE INDEX IF NOT EXISTS idx_chunks_document ON chunks(document_id, chunk_index);

            CREATE TABLE IF NOT EXISTS entities (
                id             TEXT PRIMARY KEY,
                persona        TEXT NOT NULL,
                canonical_name TEXT NOT NULL,
                entity_type    TEXT NOT NULL,
                aliases        TEXT NOT NULL,
                confidence     REAL NOT NULL,
                mention_count  INTEGER NOT NULL,
                needs_review   INTEGER NOT NULL DEFAULT 0,
                created_at     TEXT NOT NULL,
                updated_at     TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_entities_scope ON entities(persona, entity_type);

            CREATE TABLE IF NOT EXISTS relations (
                id                 TEXT PRIMARY KEY,
                persona            TEXT NOT NULL,
                source_entity_id   TEXT NOT NULL REFERENCES entities(id) ON DELETE CASCADE,
                target_entity_id   TEXT NOT NULL REFERENCES entities(id) ON DELETE CASCADE,
                relation_type      TEXT NOT NULL,
                confidence         REAL NOT NULL,
                status             TEXT NOT NULL DEFAULT 'pending',
                needs_review       INTEGER NOT NULL DEFAULT 0,
                source_document_id TEXT,
                source_chunk_id    TEXT,
                created_at         TEXT NOT NULL,
                updated_at         TEXT NOT NULL,
                UNIQUE(persona, source_entity_id, target_entity_id, relation_type)
            );
            CREATE INDEX IF NOT EXISTS idx_relations_persona ON relations(persona);

            CREATE TABLE IF NOT EXISTS jobs (
                id           TEXT PRIMARY KEY,
                job_type     TEXT NOT NULL,
                payload      TEXT NOT NULL,
                status       TEXT NOT NULL,
                progress     TEXT NOT NULL,
                result       TEXT,
                error        TEXT,
                attempts     INTEGER NOT NULL DEFAULT 1,
                created_at   TEXT NOT NULL,
                updated_at   TEXT NOT NULL,
                completed_at TEXT
            );
            CREATE INDEX IF NOT EXISTS idx_jobs_status ON jobs(status, created_at);",
        )?;
        Ok(())
    }
}

fn json_column<T: DeserializeOwned>(index: usize, raw: &str) -> rusqlite::Result<T> {
    serde_json::from_str(raw)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(index, Type::Text, Box::new(e)))
}

fn uuid_column(index: usize, raw: &str) -> rusqlite::Result<Uuid> {
    Uuid::parse_str(raw)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(index, Type::Text, Box::new(e)))
}

fn row_to_document(row: &Row<'_>) -> rusqlite::Result<CanonicalDocument> {
    Ok(CanonicalDocument {
        id: uuid_column(0, &row.get::<_, String>(0)?)?,
        persona: row.get(1)?,
        title: row.get(2)?,
        doc_type: DocType::parse(&row.get::<_, String>(3)?),
        raw_text: row.get(4)?,
        sections: json_column(5, &row.get::<_, String>(5)?)?,
        metadata: json_column(6, &row.get::<_, String>(6)?)?,
        content_hash: row.get(7)?,
        needs_review: row.get(8)?,
        created_at: row.get(9)?,
        updated_at: row.get(10)?,
    })
}

const DOCUMENT_COLUMNS: &str =
    "id, persona, title, doc_type, raw_text, sections, metadata, content_hash, needs_review, \
     created_at, updated_at";

fn row_to_chunk(row: &Row<'_>) -> rusqlite::Result<Chunk> {
    Ok(Chunk {
        id: uuid_column(0, &row.get::<_, String>(0)?)?,
        document_id: uuid_column(1, &row.get::<_, String>(1)?)?,
        chunk_index: row.get(2)?,
        content: row.get(3)?,
        token_count: row.get::<_, i64>(4)? as usize,
        content_hash: row.get(5)?,
        chunk_type: match row.get::<_, String>(6)?.as_str() {
            "reference" => ChunkType::Reference,
            "metadata" => ChunkType::Metadata,
            _ => ChunkType::Content,
        },
        char_start: row.get::<_, i64>(7)? as usize,
        char_end: row.get::<_, i64>(8)? as usize,
        occurrence_count: row.get(9)?,
    })
}

fn chunk_type_str(chunk_type: ChunkType) -> &'static str {
    match chunk_type {
        ChunkType::Content => "content",
        ChunkType::Reference => "reference",
        ChunkType::Metadata => "metadata",
    }
}

fn row_to_entity(row: &Row<'_>) -> rusqlite::Result<Entity> {
    Ok(Entity {
        id: uuid_column(0, &row.get::<_, String>(0)?)?,
        persona: row.get(1)?,
        canonical_name: row.get(2)?,
        entity_type: EntityType::parse(&row.get::<_, String>(3)?),
        aliases: json_column(4, &row.get::<_, String>(4)?)?,
        confidence: row.get::<_, f64>(5)? as f32,
        mention_count: row.get::<_, i64>(6)? as u64,
        needs_review: row.get(7)?,
        created_at: row.get(8)?,
        updated_at: row.get(9)?,
    })
}

const ENTITY_COLUMNS: &str =
    "id, persona, canonical_name, entity_type, aliases, confidence, mention_count, needs_review, \
     created_at, updated_at";

fn row_to_relation(row: &Row<'_>) -> rusqlite::Result<Relation> {
    Ok(Relation {
        id: uuid_column(0, &row.get::<_, String>(0)?)?,
        persona: row.get(1)?,
        source_entity_id: uuid_column(2, &row.get::<_, String>(2)?)?,
        target_entity_id: uuid_column(3, &row.get::<_, String>(3)?)?,
        relation_type: row.get(4)?,
        confidence: row.get::<_, f64>(5)? as f32,
        status: RelationStatus::parse(&row.get::<_, String>(6)?).unwrap_or_default(),
        needs_review: row.get(7)?,
        source_document_id: row
            .get::<_, Option<String>>(8)?
            .map(|raw| uuid_column(8, &raw))
            .transpose()?,
        source_chunk_id: row
            .get::<_, Option<String>>(9)?
            .map(|raw| uuid_column(9, &raw))
            .transpose()?,
        created_at: row.get(10)?,
        updated_at: row.get(11)?,
    })
}

const RELATION_COLUMNS: &str =
    "id, persona, source_entity_id, target_entity_id, relation_type, confidence, status, \
     needs_review, source_document_id, source_chunk_id, created_at, updated_at";

fn row_to_job(row: &Row<'_>) -> rusqlite::Result<IngestionJob> {
    Ok(IngestionJob {
        id: uuid_column(0, &row.get::<_, String>(0)?)?,
        payload: json_column(1, &row.get::<_, String>(1)?)?,
        status: JobStatus::parse(&row.get::<_, String>(2)?).unwrap_or(JobStatus::Failed),
        progress: json_column(3, &row.get::<_, String>(3)?)?,
        result: row
            .get::<_, Option<String>>(4)?
            .map(|raw| json_column(4, &raw))
            .transpose()?,
        error: row.get(5)?,
        attempts: row.get(6)?,
        created_at: row.get(7)?,
        updated_at: row.get(8)?,
        completed_at: row.get(9)?,
    })
}

const JOB_COLUMNS: &str =
    "id, payload, status, progress, result, error, attempts, created_at, updated_at, completed_at";

impl DocumentStore for SqliteStore {
    fn upsert_document(&self, document: &CanonicalDocument) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO documents (id, persona, title, doc_type, raw_text, sections, metadata,
                                    content_hash, needs_review, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
             ON CONFLICT(id) DO UPDATE SET
                 title = excluded.title,
                 doc_type = excluded.doc_type,
                 raw_text = excluded.raw_text,
                 sections = excluded.sections,
                 metadata = excluded.metadata,
                 content_hash = excluded.content_hash,
                 needs_review = excluded.needs_review,
                 updated_at = excluded.updated_at",
            params![
                document.id.to_string(),
                document.persona,
                document.title,
                document.doc_type.as_str(),
                document.raw_text,
                serde_json::to_string(&document.sections)?,
                serde_json::to_string(&document.metadata)?,
                document.content_hash,
                document.needs_review,
                document.created_at,
                document.updated_at,
            ],
        )?;
        Ok(())
    }

    fn get_document(&self, id: Uuid) -> Result<Option<CanonicalDocument>> {
        let conn = self.conn.lock();
        let document = conn
            .query_row(
                &format!("SELECT {} FROM documents WHERE id = ?1", DOCUMENT_COLUMNS),
                params![id.to_string()],
                row_to_document,
            )
            .optional()?;
        Ok(document)
    }

    fn list_documents(&self, persona: Option<&str>) -> Result<Vec<CanonicalDocument>> {
        let conn = self.conn.lock();
        let mut documents = Vec::new();
        match persona {
            Some(persona) => {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {} FROM documents WHERE persona = ?1 ORDER BY updated_at DESC",
                    DOCUMENT_COLUMNS
                ))?;
                let rows = stmt.query_map(params![persona], row_to_document)?;
                for row in rows {
                    documents.push(row?);
                }
            }
            None => {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {} FROM documents ORDER BY updated_at DESC",
                    DOCUMENT_COLUMNS
                ))?;
                let rows = stmt.query_map([], row_to_document)?;
                for row in rows {
                    documents.push(row?);
                }
            }
        }
        Ok(documents)
    }

    fn replace_chunks(&self, document_id: Uuid, chunks: &[Chunk]) -> Result<()> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        tx.execute(
            "DELETE FROM chunks WHERE document_id = ?1",
            params![document_id.to_string()],
        )?;
        for chunk in chunks {
            tx.execute(
                "INSERT INTO chunks (id, document_id, chunk_index, content, token_count,
                                     content_hash, chunk_type, char_start, char_end,
                                     occurrence_count)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
                params![
                    chunk.id.to_string(),
                    chunk.document_id.to_string(),
                    chunk.chunk_index,
                    chunk.content,
                    chunk.token_count as i64,
                    chunk.content_hash,
                    chunk_type_str(chunk.chunk_type),
                    chunk.char_start as i64,
                    chunk.char_end as i64,
                    chunk.occurrence_count,
                ],
            )?;
        }
        tx.commit()?;
        Ok(())
    }

    fn chunks_for_document(&self, document_id: Uuid) -> Result<Vec<Chunk>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT id, document_id, chunk_index, content, token_count, content_hash,
                    chunk_type, char_start, char_end, occurrence_count
             FROM chunks WHERE document_id = ?1 ORDER BY chunk_index",
        )?;
        let rows = stmt.query_map(params![document_id.to_string()], row_to_chunk)?;
        let mut chunks = Vec::new();
        for row in rows {
            chunks.push(row?);
        }
        Ok(chunks)
    }

    fn upsert_entity(&self, candidate: &EntityUpsert) -> Result<Entity> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;

        // Alias-containment matching cannot be expressed as a SQL unique key,
        // so candidates of the same (persona, type) are loaded and matched in
        // memory inside the transaction.
        let existing = {
            let mut stmt = tx.prepare(&format!(
                "SELECT {} FROM entities WHERE persona = ?1 AND entity_type = ?2",
                ENTITY_COLUMNS
            ))?;
            let rows = stmt.query_map(
                params![candidate.persona, candidate.entity_type.as_str()],
                row_to_entity,
            )?;
            let mut found = None;
            for row in rows {
                let entity = row?;
                if entity.matches(candidate) {
                    found = Some(entity);
                    break;
                }
            }
            found
        };

        let entity = match existing {
            Some(mut entity) => {
                entity.absorb(candidate);
                tx.execute(
                    "UPDATE entities SET canonical_name = ?2, aliases = ?3, confidence = ?4,
                                         mention_count = ?5, needs_review = ?6, updated_at = ?7
                     WHERE id = ?1",
                    params![
                        entity.id.to_string(),
                        entity.canonical_name,
                        serde_json::to_string(&entity.aliases)?,
                        entity.confidence as f64,
                        entity.mention_count as i64,
                        entity.needs_review,
                        entity.updated_at,
                    ],
                )?;
                entity
            }
            None => {
                let now = chrono::Utc::now();
                let entity = Entity {
                    id: Uuid::new_v4(),
                    persona: candidate.persona.clone(),
                    canonical_name: candidate.canonical_name.clone(),
                    entity_type: candidate.entity_type,
                    aliases: candidate.aliases.clone(),
                    confidence: candidate.confidence,
                    mention_count: candidate.mention_count,
                    needs_review: candidate.needs_review,
                    created_at: now,
                    updated_at: now,
                };
                tx.execute(
                    "INSERT INTO entities (id, persona, canonical_name, entity_type, aliases,
                                           confidence, mention_count, needs_review, created_at,
                                           updated_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
                    params![
                        entity.id.to_string(),
                        entity.persona,
                        entity.canonical_name,
                        entity.entity_type.as_str(),
                        serde_json::to_string(&entity.aliases)?,
                        entity.confidence as f64,
                        entity.mention_count as i64,
                        entity.needs_review,
                        entity.created_at,
                        entity.updated_at,
                    ],
                )?;
                entity
            }
        };
        tx.commit()?;
        Ok(entity)
    }

    fn upsert_relation(&self, candidate: &RelationUpsert) -> Result<Relation> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;

        let existing = tx
            .query_row(
                &format!(
                    "SELECT {} FROM relations
                     WHERE persona = ?1 AND source_entity_id = ?2 AND target_entity_id = ?3
                       AND relation_type = ?4",
                    RELATION_COLUMNS
                ),
                params![
                    candidate.persona,
                    candidate.source_entity_id.to_string(),
                    candidate.target_entity_id.to_string(),
                    candidate.relation_type,
                ],
                row_to_relation,
            )
            .optional()?;

        let relation = match existing {
            Some(mut relation) => {
                relation.confidence =
                    crate::types::combine_confidence(relation.confidence, candidate.confidence);
                relation.needs_review = relation.needs_review && candidate.needs_review;
                relation.updated_at = chrono::Utc::now();
                tx.execute(
                    "UPDATE relations SET confidence = ?2, needs_review = ?3, updated_at = ?4
                     WHERE id = ?1",
                    params![
                        relation.id.to_string(),
                        relation.confidence as f64,
                        relation.needs_review,
                        relation.updated_at,
                    ],
                )?;
                relation
            }
            None => {
                let now = chrono::Utc::now();
                let relation = Relation {
                    id: Uuid::new_v4(),
                    persona: candidate.persona.clone(),
                    source_entity_id: candidate.source_entity_id,
                    target_entity_id: candidate.target_entity_id,
                    relation_type: candidate.relation_type.clone(),
                    confidence: candidate.confidence,
                    status: RelationStatus::Pending,
                    needs_review: candidate.needs_review,
                    source_document_id: candidate.source_document_id,
                    source_chunk_id: candidate.source_chunk_id,
                    created_at: now,
                    updated_at: now,
                };
                tx.execute(
                    "INSERT INTO relations (id, persona, source_entity_id, target_entity_id,
                                            relation_type, confidence, status, needs_review,
                                            source_document_id, source_chunk_id, created_at,
                                            updated_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
                    params![
                        relation.id.to_string(),
                        relation.persona,
                        relation.source_entity_id.to_string(),
                        relation.target_entity_id.to_string(),
                        relation.relation_type,
                        relation.confidence as f64,
                        relation.status.as_str(),
                        relation.needs_review,
                        relation.source_document_id.map(|id| id.to_string()),
                        relation.source_chunk_id.map(|id| id.to_string()),
                        relation.created_at,
                        relation.updated_at,
                    ],
                )?;
                relation
            }
        };
        tx.commit()?;
        Ok(relation)
    }

    fn update_relation_status(&self, id: Uuid, status: RelationStatus) -> Result<Relation> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        let mut relation = tx
            .query_row(
                &format!("SELECT {} FROM relations WHERE id = ?1", RELATION_COLUMNS),
                params![id.to_string()],
                row_to_relation,
            )
            .optional()?
            .ok_or_else(|| Error::NotFound(format!("relation {}", id)))?;

        if !relation.status.can_transition_to(status) {
            return Err(Error::Validation(format!(
                "cannot transition relation from {} to {}",
                relation.status.as_str(),
                status.as_str()
            )));
        }
        relation.status = status;
        relation.needs_review = false;
        relation.updated_at = chrono::Utc::now();
        tx.execute(
            "UPDATE relations SET status = ?2, needs_review = 0, updated_at = ?3 WHERE id = ?1",
            params![
                relation.id.to_string(),
                relation.status.as_str(),
                relation.updated_at,
            ],
        )?;
        tx.commit()?;
        Ok(relation)
    }

    fn merge_entities(&self, keep: Uuid, absorb: Uuid) -> Result<Entity> {
        if keep == absorb {
            return Err(Error::Validation(
                "cannot merge an entity into itself".to_string(),
            ));
        }
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        let load = |id: Uuid| -> Result<Entity> {
            tx.query_row(
                &format!("SELECT {} FROM entities WHERE id = ?1", ENTITY_COLUMNS),
                params![id.to_string()],
                row_to_entity,
            )
            .optional()?
            .ok_or_else(|| Error::NotFound(format!("entity {}", id)))
        };
        let mut kept = load(keep)?;
        let absorbed = load(absorb)?;
        if kept.persona != absorbed.persona {
            return Err(Error::Validation(
                "cannot merge entities across persona scopes".to_string(),
            ));
        }

        kept.absorb(&EntityUpsert {
            persona: absorbed.persona.clone(),
            canonical_name: absorbed.canonical_name.clone(),
            entity_type: absorbed.entity_type,
            aliases: absorbed.aliases.clone(),
            confidence: absorbed.confidence,
            mention_count: absorbed.mention_count,
            needs_review: absorbed.needs_review,
        });
        tx.execute(
            "UPDATE entities SET canonical_name = ?2, aliases = ?3, confidence = ?4,
                                 mention_count = ?5, needs_review = ?6, updated_at = ?7
             WHERE id = ?1",
            params![
                kept.id.to_string(),
                kept.canonical_name,
                serde_json::to_string(&kept.aliases)?,
                kept.confidence as f64,
                kept.mention_count as i64,
                kept.needs_review,
                kept.updated_at,
            ],
        )?;

        // Re-point the absorbed entity's relations; a repoint that collides
        // with an existing triple is dropped rather than duplicated.
        tx.execute(
            "UPDATE OR IGNORE relations SET source_entity_id = ?1 WHERE source_entity_id = ?2",
            params![keep.to_string(), absorb.to_string()],
        )?;
        tx.execute(
            "UPDATE OR IGNORE relations SET target_entity_id = ?1 WHERE target_entity_id = ?2",
            params![keep.to_string(), absorb.to_string()],
        )?;
        tx.execute(
            "DELETE FROM relations WHERE source_entity_id = ?1 OR target_entity_id = ?1",
            params![absorb.to_string()],
        )?;
        // Merging both endpoints of an edge produces self-loops
        tx.execute(
            "DELETE FROM relations WHERE source_entity_id = target_entity_id",
            [],
        )?;
        tx.execute(
            "DELETE FROM entities WHERE id = ?1",
            params![absorb.to_string()],
        )?;
        tx.commit()?;
        Ok(kept)
    }

    fn list_entities(&self, filter: &EntityFilter) -> Result<Vec<Entity>> {
        let conn = self.conn.lock();
        let mut sql = format!("SELECT {} FROM entities WHERE 1=1", ENTITY_COLUMNS);
        let mut bind: Vec<Box<dyn ToSql>> = Vec::new();
        if let Some(persona) = &filter.persona {
            sql.push_str(&format!(" AND persona = ?{}", bind.len() + 1));
            bind.push(Box::new(persona.clone()));
        }
        if let Some(entity_type) = filter.entity_type {
            sql.push_str(&format!(" AND entity_type = ?{}", bind.len() + 1));
            bind.push(Box::new(entity_type.as_str()));
        }
        if let Some(min) = filter.min_confidence {
            sql.push_str(&format!(" AND confidence >= ?{}", bind.len() + 1));
            bind.push(Box::new(min as f64));
        }
        if let Some(needs_review) = filter.needs_review {
            sql.push_str(&format!(" AND needs_review = ?{}", bind.len() + 1));
            bind.push(Box::new(needs_review));
        }
        if let Some(search) = &filter.search {
            let pattern = format!("%{}%", search.to_lowercase());
            sql.push_str(&format!(
                " AND (LOWER(canonical_name) LIKE ?{} OR LOWER(aliases) LIKE ?{})",
                bind.len() + 1,
                bind.len() + 2
            ));
            bind.push(Box::new(pattern.clone()));
            bind.push(Box::new(pattern));
        }
        sql.push_str(&format!(
            " ORDER BY mention_count DESC, canonical_name LIMIT {} OFFSET {}",
            filter.limit(),
            filter.offset()
        ));

        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(params_from_iter(bind.iter().map(|p| p.as_ref())), row_to_entity)?;
        let mut entities = Vec::new();
        for row in rows {
            entities.push(row?);
        }
        Ok(entities)
    }

    fn list_relations(&self, filter: &RelationFilter) -> Result<Vec<Relation>> {
        let conn = self.conn.lock();
        let mut sql = format!("SELECT {} FROM relations WHERE 1=1", RELATION_COLUMNS);
        let mut bind: Vec<Box<dyn ToSql>> = Vec::new();
        if let Some(persona) = &filter.persona {
            sql.push_str(&format!(" AND persona = ?{}", bind.len() + 1));
            bind.push(Box::new(persona.clone()));
        }
        if let Some(relation_type) = &filter.relation_type {
            sql.push_str(&format!(" AND relation_type = ?{}", bind.len() + 1));
            bind.push(Box::new(relation_type.clone()));
        }
        if let Some(status) = filter.status {
            sql.push_str(&format!(" AND status = ?{}", bind.len() + 1));
            bind.push(Box::new(status.as_str()));
        }
        if let Some(min) = filter.min_confidence {
            sql.push_str(&format!(" AND confidence >= ?{}", bind.len() + 1));
            bind.push(Box::new(min as f64));
        }
        if let Some(needs_review) = filter.needs_review {
            sql.push_str(&format!(" AND needs_review = ?{}", bind.len() + 1));
            bind.push(Box::new(needs_review));
        }
        sql.push_str(&format!(
            " ORDER BY confidence DESC, created_at LIMIT {} OFFSET {}",
            filter.limit(),
            filter.offset()
        ));

        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(
            params_from_iter(bind.iter().map(|p| p.as_ref())),
            row_to_relation,
        )?;
        let mut relations = Vec::new();
        for row in rows {
            relations.push(row?);
        }
        Ok(relations)
    }

    fn create_job(&self, job: &IngestionJob) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO jobs (id, job_type, payload, status, progress, result, error, attempts,
                               created_at, updated_at, completed_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            params![
                job.id.to_string(),
                job.payload.job_type(),
                serde_json::to_string(&job.payload)?,
                job.status.as_str(),
                serde_json::to_string(&job.progress)?,
                job.result
                    .as_ref()
                    .map(serde_json::to_string)
                    .transpose()?,
                job.error,
                job.attempts,
                job.created_at,
                job.updated_at,
                job.completed_at,
            ],
        )?;
        Ok(())
    }

    fn update_job(&self, job: &IngestionJob) -> Result<()> {
        let conn = self.conn.lock();
        let updated = conn.execute(
            "UPDATE jobs SET status = ?2, progress = ?3, result = ?4, error = ?5, attempts = ?6,
                             updated_at = ?7, completed_at = ?8
             WHERE id = ?1",
            params![
                job.id.to_string(),
                job.status.as_str(),
                serde_json::to_string(&job.progress)?,
                job.result
                    .as_ref()
                    .map(serde_json::to_string)
                    .transpose()?,
                job.error,
                job.attempts,
                job.updated_at,
                job.completed_at,
            ],
        )?;
        if updated == 0 {
            return Err(Error::NotFound(format!("job {}", job.id)));
        }
        Ok(())
    }

    fn get_job(&self, id: Uuid) -> Result<Option<IngestionJob>> {
        let conn = self.conn.lock();
        let job = conn
            .query_row(
                &format!("SELECT {} FROM jobs WHERE id = ?1", JOB_COLUMNS),
                params![id.to_string()],
                row_to_job,
            )
            .optional()?;
        Ok(job)
    }

    fn list_jobs(&self, filter: &JobFilter) -> Result<Vec<IngestionJob>> {
        let conn = self.conn.lock();
        let mut sql = format!("SELECT {} FROM jobs WHERE 1=1", JOB_COLUMNS);
        let mut bind: Vec<Box<dyn ToSql>> = Vec::new();
        if let Some(status) = filter.status {
            sql.push_str(&format!(" AND status = ?{}", bind.len() + 1));
            bind.push(Box::new(status.as_str()));
        }
        if let Some(job_type) = &filter.job_type {
            sql.push_str(&format!(" AND job_type = ?{}", bind.len() + 1));
            bind.push(Box::new(job_type.clone()));
        }
        if let Some(since) = filter.since {
            sql.push_str(&format!(" AND created_at >= ?{}", bind.len() + 1));
            bind.push(Box::new(since));
        }
        if let Some(until) = filter.until {
            sql.push_str(&format!(" AND created_at <= ?{}", bind.len() + 1));
            bind.push(Box::new(until));
        }
        sql.push_str(&format!(
            " ORDER BY created_at DESC LIMIT {} OFFSET {}",
            filter.limit(),
            filter.offset()
        ));

        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(params_from_iter(bind.iter().map(|p| p.as_ref())), row_to_job)?;
        let mut jobs = Vec::new();
        for row in rows {
            jobs.push(row?);
        }
        Ok(jobs)
    }

    fn delete_job(&self, id: Uuid) -> Result<()> {
        let conn = self.conn.lock();
        let deleted = conn.execute("DELETE FROM jobs WHERE id = ?1", params![id.to_string()])?;
        if deleted == 0 {
            return Err(Error::NotFound(format!("job {}", id)));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ChunkType, DocumentMetadata, JobPayload, Section};
    use chrono::Utc;

    fn store() -> SqliteStore {
        SqliteStore::in_memory().unwrap()
    }

    fn document(persona: &str) -> CanonicalDocument {
        let now = Utc::now();
        CanonicalDocument {
            id: Uuid::new_v4(),
            persona: persona.to_string(),
            title: "Doc".to_string(),
            doc_type: DocType::Note,
            raw_text: "Body text.".to_string(),
            sections: vec![Section::content(None, "Body text.")],
            metadata: DocumentMetadata::default(),
            content_hash: "abc".to_string(),
            needs_review: false,
            created_at: now,
            updated_at: now,
        }
    }

    fn candidate(persona: &str, name: &str, confidence: f32) -> EntityUpsert {
        EntityUpsert {
            persona: persona.to_string(),
            canonical_name: name.to_string(),
            entity_type: EntityType::Technology,
            aliases: Vec::new(),
            confidence,
            mention_count: 1,
            needs_review: false,
        }
    }

    #[test]
    fn test_document_round_trip_and_upsert() {
        let store = store();
        let mut doc = document("david");
        store.upsert_document(&doc).unwrap();

        let loaded = store.get_document(doc.id).unwrap().unwrap();
        assert_eq!(loaded.title, "Doc");
        assert_eq!(loaded.sections.len(), 1);

        doc.title = "Renamed".to_string();
        store.upsert_document(&doc).unwrap();
        let loaded = store.get_document(doc.id).unwrap().unwrap();
        assert_eq!(loaded.title, "Renamed");
        assert_eq!(store.list_documents(Some("david")).unwrap().len(), 1);
        assert!(store.list_documents(Some("ada")).unwrap().is_empty());
    }

    #[test]
    fn test_on_disk_store_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("persona-rag.db");

        let doc = document("david");
        {
            let store = SqliteStore::new(&path).unwrap();
            store.upsert_document(&doc).unwrap();
            store
                .upsert_entity(&candidate("david", "Lightfield", 0.8))
                .unwrap();
        }

        // Reopening runs the migrations against the existing schema
        let store = SqliteStore::new(&path).unwrap();
        let loaded = store.get_document(doc.id).unwrap().unwrap();
        assert_eq!(loaded.title, "Doc");
        let entities = store.list_entities(&EntityFilter::default()).unwrap();
        assert_eq!(entities.len(), 1);
        assert_eq!(entities[0].canonical_name, "Lightfield");
    }

    #[test]
    fn test_replace_chunks_is_wholesale() {
        let store = store();
        let doc = document("david");
        store.upsert_document(&doc).unwrap();

        let chunk = |index: u32, content: &str| {
            Chunk::new(
                doc.id,
                index,
                content.to_string(),
                10,
                crate::types::content_hash(content.as_bytes()),
                ChunkType::Content,
                0,
                content.len(),
            )
        };
        store
            .replace_chunks(doc.id, &[chunk(0, "one"), chunk(1, "two")])
            .unwrap();
        assert_eq!(store.chunks_for_document(doc.id).unwrap().len(), 2);

        store.replace_chunks(doc.id, &[chunk(0, "only")]).unwrap();
        let chunks = store.chunks_for_document(doc.id).unwrap();
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].content, "only");
    }

    #[test]
    fn test_entity_upsert_merges_matches() {
        let store = store();
        let first = store.upsert_entity(&candidate("david", "Lightfield", 0.6)).unwrap();
        let second = store
            .upsert_entity(&candidate("david", "lightfield", 0.9))
            .unwrap();
        assert_eq!(first.id, second.id);
        assert_eq!(second.mention_count, 2);
        assert_eq!(second.confidence, 0.9);

        // Same name in another persona scope is a separate entity
        let other = store.upsert_entity(&candidate("ada", "Lightfield", 0.5)).unwrap();
        assert_ne!(other.id, first.id);
    }

    #[test]
    fn test_relation_upsert_dedups_and_raises_confidence() {
        let store = store();
        let a = store.upsert_entity(&candidate("david", "A", 0.9)).unwrap();
        let b = store.upsert_entity(&candidate("david", "B", 0.9)).unwrap();

        let upsert = |confidence: f32| RelationUpsert {
            persona: "david".to_string(),
            source_entity_id: a.id,
            target_entity_id: b.id,
            relation_type: "related_to".to_string(),
            confidence,
            needs_review: false,
            source_document_id: None,
            source_chunk_id: None,
        };
        let first = store.upsert_relation(&upsert(0.5)).unwrap();
        let second = store.upsert_relation(&upsert(0.5)).unwrap();
        assert_eq!(first.id, second.id);
        assert!((second.confidence - 0.75).abs() < 1e-6);
        assert_eq!(
            store
                .list_relations(&RelationFilter::default())
                .unwrap()
                .len(),
            1
        );
    }

    #[test]
    fn test_relation_status_transition_enforced() {
        let store = store();
        let a = store.upsert_entity(&candidate("david", "A", 0.9)).unwrap();
        let b = store.upsert_entity(&candidate("david", "B", 0.9)).unwrap();
        let relation = store
            .upsert_relation(&RelationUpsert {
                persona: "david".to_string(),
                source_entity_id: a.id,
                target_entity_id: b.id,
                relation_type: "related_to".to_string(),
                confidence: 0.8,
                needs_review: false,
                source_document_id: None,
                source_chunk_id: None,
            })
            .unwrap();

        let approved = store
            .update_relation_status(relation.id, RelationStatus::Approved)
            .unwrap();
        assert_eq!(approved.status, RelationStatus::Approved);
        assert!(store
            .update_relation_status(relation.id, RelationStatus::Rejected)
            .is_err());
    }

    #[test]
    fn test_merge_entities_repoints_relations() {
        let store = store();
        let keep = store.upsert_entity(&candidate("david", "Leia Inc", 0.9)).unwrap();
        let absorb = store
            .upsert_entity(&candidate("david", "Leia Incorporated", 0.5))
            .unwrap();
        let other = store.upsert_entity(&candidate("david", "Display", 0.9)).unwrap();
        store
            .upsert_relation(&RelationUpsert {
                persona: "david".to_string(),
                source_entity_id: absorb.id,
                target_entity_id: other.id,
                relation_type: "makes".to_string(),
                confidence: 0.7,
                needs_review: false,
                source_document_id: None,
                source_chunk_id: None,
            })
            .unwrap();

        let merged = store.merge_entities(keep.id, absorb.id).unwrap();
        assert_eq!(merged.mention_count, 2);
        assert!(merged.aliases.iter().any(|a| a == "Leia Incorporated"));

        let relations = store.list_relations(&RelationFilter::default()).unwrap();
        assert_eq!(relations.len(), 1);
        assert_eq!(relations[0].source_entity_id, keep.id);
    }

    #[test]
    fn test_entity_filters_and_search() {
        let store = store();
        let mut reviewed = candidate("david", "Obscure Thing", 0.2);
        reviewed.needs_review = true;
        store.upsert_entity(&reviewed).unwrap();
        store.upsert_entity(&candidate("david", "Lightfield", 0.9)).unwrap();

        let filter = EntityFilter {
            persona: Some("david".to_string()),
            min_confidence: Some(0.5),
            ..EntityFilter::default()
        };
        let entities = store.list_entities(&filter).unwrap();
        assert_eq!(entities.len(), 1);
        assert_eq!(entities[0].canonical_name, "Lightfield");

        let filter = EntityFilter {
            search: Some("obscure".to_string()),
            ..EntityFilter::default()
        };
        assert_eq!(store.list_entities(&filter).unwrap().len(), 1);
    }

    #[test]
    fn test_job_round_trip() {
        let store = store();
        let mut job = IngestionJob::new(JobPayload::KgExtract {
            document_id: Uuid::new_v4(),
        });
        store.create_job(&job).unwrap();

        job.status = JobStatus::Processing;
        job.progress.current = 3;
        store.update_job(&job).unwrap();

        let loaded = store.get_job(job.id).unwrap().unwrap();
        assert_eq!(loaded.status, JobStatus::Processing);
        assert_eq!(loaded.progress.current, 3);
        assert_eq!(loaded.payload.job_type(), "kg-extract");

        let filter = JobFilter {
            status: Some(JobStatus::Processing),
            ..JobFilter::default()
        };
        assert_eq!(store.list_jobs(&filter).unwrap().len(), 1);

        store.delete_job(job.id).unwrap();
        assert!(store.get_job(job.id).unwrap().is_none());
    }
}
