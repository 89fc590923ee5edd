//! Token-bounded sliding-window chunker
//!
//! Splits a canonical document into overlapping chunks whose estimated token
//! counts stay within configured bounds. Output is deterministic: the same
//! document and config produce byte-identical chunks with the same ids on
//! every run.

use unicode_segmentation::UnicodeSegmentation;

use crate::config::ChunkingConfig;
use crate::error::{Error, Result};
use crate::tokens::{estimate_tokens, normalize_whitespace, overlap_tokens};
use crate::types::{content_hash, CanonicalDocument, Chunk, ChunkType, SectionKind};

/// Result of chunking one document
#[derive(Debug)]
pub struct ChunkOutcome {
    pub chunks: Vec<Chunk>,
    /// True when the per-document chunk ceiling was hit; the caller flags the
    /// document for review instead of silently emitting more chunks
    pub truncated: bool,
}

/// A sentence-or-smaller span of the normalized document text
#[derive(Debug, Clone, Copy)]
struct Fragment {
    start: usize,
    end: usize,
    tokens: usize,
    /// Last fragment of its section: a preferred break point
    section_end: bool,
    kind: SectionKind,
}

/// Chunk span before materialization
#[derive(Debug)]
struct RawChunk {
    start: usize,
    end: usize,
    kind: SectionKind,
}

/// Token-bounded chunker
pub struct Chunker {
    config: ChunkingConfig,
}

impl Chunker {
    pub fn new(config: ChunkingConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    /// Build the normalized text stream the chunker (and its offsets) operate on
    ///
    /// Sections are whitespace-normalized and joined with single spaces, so
    /// chunk coverage reconstructs the document modulo whitespace.
    pub fn normalized_text(document: &CanonicalDocument) -> String {
        let mut text = String::new();
        for section in &document.sections {
            let norm = normalize_whitespace(&section.text);
            if norm.is_empty() {
                continue;
            }
            if !text.is_empty() {
                text.push(' ');
            }
            text.push_str(&norm);
        }
        text
    }

    /// Chunk a document into an ordered, token-bounded, overlapping sequence
    pub fn chunk(&self, document: &CanonicalDocument) -> Result<ChunkOutcome> {
        let (text, fragments) = self.fragment(document);
        if fragments.is_empty() {
            return Err(Error::Chunking(format!(
                "document {} has no chunkable text",
                document.id
            )));
        }

        let raw = self.assemble(&fragments);
        let truncated = raw.truncated;
        let chunks = self.materialize(document, &text, raw.chunks);

        if truncated {
            tracing::warn!(
                "Document {} hit the {}-chunk ceiling; flagging for review",
                document.id,
                self.config.max_chunks_per_document
            );
        }

        Ok(ChunkOutcome { chunks, truncated })
    }

    /// Split sections into sentence fragments over one normalized text stream
    fn fragment(&self, document: &CanonicalDocument) -> (String, Vec<Fragment>) {
        let mut text = String::new();
        let mut fragments = Vec::new();

        for section in &document.sections {
            let norm = normalize_whitespace(&section.text);
            if norm.is_empty() {
                continue;
            }
            if !text.is_empty() {
                text.push(' ');
            }
            let base = text.len();
            text.push_str(&norm);

            let section_start = fragments.len();
            for (offset, sentence) in norm.split_sentence_bound_indices() {
                let sentence_tokens = estimate_tokens(sentence);
                if sentence_tokens > self.config.target_tokens {
                    // A single sentence above target would defeat the bounds:
                    // split it at word boundaries
                    for (piece_start, piece_end) in
                        split_oversized(sentence, self.config.target_tokens)
                    {
                        fragments.push(Fragment {
                            start: base + offset + piece_start,
                            end: base + offset + piece_end,
                            tokens: estimate_tokens(&sentence[piece_start..piece_end]),
                            section_end: false,
                            kind: section.kind,
                        });
                    }
                } else if sentence_tokens > 0 {
                    fragments.push(Fragment {
                        start: base + offset,
                        end: base + offset + sentence.len(),
                        tokens: sentence_tokens,
                        section_end: false,
                        kind: section.kind,
                    });
                }
            }
            if fragments.len() > section_start {
                fragments.last_mut().unwrap().section_end = true;
            }
        }

        (text, fragments)
    }

    /// Greedy sliding-window assembly over the fragment sequence
    ///
    /// The minimum-size bound holds within a run of same-kind fragments. A
    /// section-kind change is a hard boundary: it closes whatever is
    /// buffered, and the trailing merge never joins chunks of different
    /// kinds, so a short references or metadata section becomes its own
    /// undersized chunk rather than contaminating a content chunk.
    fn assemble(&self, fragments: &[Fragment]) -> AssembleOutcome {
        let target = self.config.target_tokens;
        let max = self.config.max_chunk_tokens;
        let min = self.config.min_chunk_tokens;
        let overlap_budget = overlap_tokens(target, self.config.overlap_percent);
        // Prefer a section boundary once the chunk is within 20% of target
        let boundary_threshold = target * 4 / 5;

        let mut chunks: Vec<RawChunk> = Vec::new();
        let mut truncated = false;

        // Buffer of fragment indices; the leading part may be overlap carried
        // from the previous chunk
        let mut buf: Vec<usize> = Vec::new();
        let mut buf_tokens = 0usize;
        let mut new_count = 0usize;

        let mut i = 0;
        while i < fragments.len() {
            if chunks.len() >= self.config.max_chunks_per_document {
                truncated = true;
                buf.clear();
                break;
            }
            let frag = fragments[i];

            // A section-kind change (content -> references) is a hard
            // boundary: close without carrying overlap across it
            if !buf.is_empty() && fragments[buf[0]].kind != frag.kind {
                if new_count > 0 {
                    chunks.push(self.close(&buf, fragments));
                }
                buf.clear();
                buf_tokens = 0;
                new_count = 0;
                continue;
            }

            // A pure-overlap buffer that cannot fit the next fragment sheds
            // overlap from the front rather than emitting a duplicate chunk
            while new_count == 0 && !buf.is_empty() && buf_tokens + frag.tokens > max {
                buf_tokens -= fragments[buf.remove(0)].tokens;
            }

            if new_count > 0 && buf_tokens + frag.tokens > max {
                // Close before exceeding the hard bound
                let raw = self.close(&buf, fragments);
                self.carry_overlap(&mut buf, &mut buf_tokens, fragments, overlap_budget);
                new_count = 0;
                chunks.push(raw);
                continue;
            }

            buf.push(i);
            buf_tokens += frag.tokens;
            new_count += 1;
            i += 1;

            let at_target = buf_tokens >= target;
            let at_boundary = frag.section_end && buf_tokens >= boundary_threshold;
            if at_target || at_boundary {
                let raw = self.close(&buf, fragments);
                if frag.section_end {
                    // No overlap across a section boundary close
                    buf.clear();
                    buf_tokens = 0;
                } else {
                    self.carry_overlap(&mut buf, &mut buf_tokens, fragments, overlap_budget);
                }
                new_count = 0;
                chunks.push(raw);
            }
        }

        // Trailing buffer: merge an undersized tail into the previous chunk
        // instead of emitting it, except when it is the only chunk
        if new_count > 0 && !truncated {
            let tail = self.close(&buf, fragments);
            match chunks.last_mut() {
                Some(last) if buf_tokens < min && last.kind == tail.kind => {
                    last.end = tail.end;
                }
                _ => chunks.push(tail),
            }
        }

        AssembleOutcome { chunks, truncated }
    }

    fn close(&self, buf: &[usize], fragments: &[Fragment]) -> RawChunk {
        let first = fragments[buf[0]];
        let last = fragments[*buf.last().unwrap()];
        RawChunk {
            start: first.start,
            end: last.end,
            kind: first.kind,
        }
    }

    /// Rebuild the buffer as the overlap tail of the chunk just closed
    fn carry_overlap(
        &self,
        buf: &mut Vec<usize>,
        buf_tokens: &mut usize,
        fragments: &[Fragment],
        overlap_budget: usize,
    ) {
        let mut carried = Vec::new();
        let mut carried_tokens = 0usize;
        for &idx in buf.iter().rev() {
            let tokens = fragments[idx].tokens;
            if carried_tokens + tokens > overlap_budget {
                break;
            }
            carried.push(idx);
            carried_tokens += tokens;
        }
        carried.reverse();
        *buf = carried;
        *buf_tokens = carried_tokens;
    }

    /// Turn raw spans into chunks, collapsing exact duplicates
    fn materialize(
        &self,
        document: &CanonicalDocument,
        text: &str,
        raw: Vec<RawChunk>,
    ) -> Vec<Chunk> {
        let mut chunks: Vec<Chunk> = Vec::new();
        let mut seen: std::collections::HashMap<String, usize> = std::collections::HashMap::new();

        for span in raw {
            let content = text[span.start..span.end].trim().to_string();
            if content.is_empty() {
                continue;
            }
            let hash = content_hash(content.as_bytes());

            // Repeated boilerplate (headers/footers on every page) collapses
            // into one stored chunk with a reference count
            if let Some(&existing) = seen.get(&hash) {
                chunks[existing].occurrence_count += 1;
                continue;
            }

            let index = chunks.len() as u32;
            let token_count = estimate_tokens(&content);
            let chunk = Chunk::new(
                document.id,
                index,
                content,
                token_count,
                hash.clone(),
                chunk_type_for(span.kind),
                span.start,
                span.end,
            );
            seen.insert(hash, chunks.len());
            chunks.push(chunk);
        }

        chunks
    }
}

struct AssembleOutcome {
    chunks: Vec<RawChunk>,
    truncated: bool,
}

fn chunk_type_for(kind: SectionKind) -> ChunkType {
    match kind {
        SectionKind::Content => ChunkType::Content,
        SectionKind::References => ChunkType::Reference,
        SectionKind::Metadata => ChunkType::Metadata,
    }
}

/// Split an oversized sentence at word boundaries into spans whose estimated
/// token counts stay at or below `max_tokens`
fn split_oversized(sentence: &str, max_tokens: usize) -> Vec<(usize, usize)> {
    let mut spans = Vec::new();
    let mut piece_start = 0usize;
    let mut chars = 0f64;
    let mut punctuation = 0f64;
    let mut offset = 0usize;

    for word in sentence.split_inclusive(' ') {
        let word_chars = word.chars().count() as f64;
        let word_punct = word.chars().filter(|c| c.is_ascii_punctuation()).count() as f64;
        let next_estimate =
            ((chars + word_chars) / 4.0 + (punctuation + word_punct) * 0.1).ceil() as usize;

        if next_estimate > max_tokens && offset > piece_start {
            spans.push((piece_start, offset));
            piece_start = offset;
            chars = 0.0;
            punctuation = 0.0;
        }
        chars += word_chars;
        punctuation += word_punct;
        offset += word.len();
    }
    if offset > piece_start {
        spans.push((piece_start, offset));
    }

    spans
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{DocType, DocumentMetadata, Section};
    use chrono::Utc;
    use uuid::Uuid;

    fn document(sections: Vec<Section>) -> CanonicalDocument {
        let raw_text = sections
            .iter()
            .map(|s| s.text.clone())
            .collect::<Vec<_>>()
            .join("\n\n");
        let now = Utc::now();
        CanonicalDocument {
            id: Uuid::new_v5(&crate::types::ID_NAMESPACE, b"test-doc"),
            persona: "david".to_string(),
            title: "Test".to_string(),
            doc_type: DocType::Paper,
            raw_text,
            sections,
            metadata: DocumentMetadata::default(),
            content_hash: "hash".to_string(),
            needs_review: false,
            created_at: now,
            updated_at: now,
        }
    }

    fn config() -> ChunkingConfig {
        ChunkingConfig {
            target_tokens: 800,
            min_chunk_tokens: 100,
            max_chunk_tokens: 1200,
            overlap_percent: 17.5,
            max_chunks_per_document: 500,
        }
    }

    /// Distinct sentences so no two chunks ever hash identically
    fn prose(sentences: usize) -> String {
        (0..sentences)
            .map(|i| {
                format!(
                    "Sentence number {} describes a distinct aspect of the lightfield display system. ",
                    i
                )
            })
            .collect()
    }

    #[test]
    fn test_short_patent_document_fits_in_single_chunk() {
        // 2,400 characters estimates to roughly 600 tokens: one chunk
        let text = "claim ".repeat(400);
        assert_eq!(text.len(), 2400);
        let doc = document(vec![Section::content(None, text)]);
        let chunker = Chunker::new(config()).unwrap();

        let outcome = chunker.chunk(&doc).unwrap();
        assert_eq!(outcome.chunks.len(), 1);
        assert!(!outcome.truncated);
        let chunk = &outcome.chunks[0];
        assert!((550..=700).contains(&chunk.token_count), "tokens: {}", chunk.token_count);
        assert_eq!(chunk.chunk_index, 0);
    }

    #[test]
    fn test_chunking_is_deterministic() {
        let doc = document(vec![Section::content(None, prose(200))]);
        let chunker = Chunker::new(config()).unwrap();

        let a = chunker.chunk(&doc).unwrap();
        let b = chunker.chunk(&doc).unwrap();
        assert_eq!(a.chunks.len(), b.chunks.len());
        for (ca, cb) in a.chunks.iter().zip(&b.chunks) {
            assert_eq!(ca.id, cb.id);
            assert_eq!(ca.content, cb.content);
            assert_eq!(ca.content_hash, cb.content_hash);
        }
    }

    #[test]
    fn test_token_bounds_hold_for_every_chunk() {
        let cfg = config();
        let doc = document(vec![Section::content(None, prose(400))]);
        let chunker = Chunker::new(cfg.clone()).unwrap();

        let outcome = chunker.chunk(&doc).unwrap();
        assert!(outcome.chunks.len() > 1);
        for chunk in &outcome.chunks {
            let estimate = estimate_tokens(&chunk.content);
            assert!(
                estimate <= cfg.max_chunk_tokens,
                "chunk {} over max: {}",
                chunk.chunk_index,
                estimate
            );
            assert!(
                estimate >= cfg.min_chunk_tokens,
                "chunk {} under min: {}",
                chunk.chunk_index,
                estimate
            );
        }
    }

    #[test]
    fn test_consecutive_chunks_overlap_near_configured_budget() {
        let cfg = config();
        let doc = document(vec![Section::content(None, prose(400))]);
        let chunker = Chunker::new(cfg.clone()).unwrap();
        let text = Chunker::normalized_text(&doc);

        let outcome = chunker.chunk(&doc).unwrap();
        let budget = overlap_tokens(cfg.target_tokens, cfg.overlap_percent);
        for pair in outcome.chunks.windows(2) {
            let (prev, next) = (&pair[0], &pair[1]);
            assert!(next.char_start < prev.char_end, "chunks do not overlap");
            let shared = &text[next.char_start..prev.char_end];
            let shared_tokens = estimate_tokens(shared);
            // Whole sentences are carried, so the shared span undershoots the
            // budget by at most one sentence
            assert!(shared_tokens <= budget, "overlap {} over budget {}", shared_tokens, budget);
            assert!(shared_tokens >= budget / 2, "overlap {} far under budget {}", shared_tokens, budget);
        }
    }

    #[test]
    fn test_unique_spans_cover_the_document() {
        let doc = document(vec![
            Section::content(Some("Intro".into()), prose(120)),
            Section::content(Some("Details".into()), prose(150)),
        ]);
        let chunker = Chunker::new(config()).unwrap();
        let text = Chunker::normalized_text(&doc);

        let outcome = chunker.chunk(&doc).unwrap();
        let mut rebuilt = String::new();
        let mut covered_to = 0usize;
        for chunk in &outcome.chunks {
            let start = chunk.char_start.max(covered_to);
            rebuilt.push_str(&text[start..chunk.char_end]);
            covered_to = chunk.char_end;
        }
        assert_eq!(
            normalize_whitespace(&rebuilt),
            normalize_whitespace(&text)
        );
    }

    #[test]
    fn test_undersized_tail_merges_into_previous_chunk() {
        let cfg = config();
        // Enough for ~2 chunks plus a tiny tail sentence
        let mut text = prose(160);
        text.push_str("Tiny tail.");
        let doc = document(vec![Section::content(None, text)]);
        let chunker = Chunker::new(cfg.clone()).unwrap();

        let outcome = chunker.chunk(&doc).unwrap();
        let last = outcome.chunks.last().unwrap();
        assert!(
            estimate_tokens(&last.content) >= cfg.min_chunk_tokens,
            "tail chunk under min"
        );
        assert!(last.content.ends_with("Tiny tail."));
    }

    #[test]
    fn test_whole_document_under_min_is_one_chunk() {
        let doc = document(vec![Section::content(None, "Just a few words.".to_string())]);
        let chunker = Chunker::new(config()).unwrap();

        let outcome = chunker.chunk(&doc).unwrap();
        assert_eq!(outcome.chunks.len(), 1);
        assert_eq!(outcome.chunks[0].content, "Just a few words.");
    }

    #[test]
    fn test_chunk_count_ceiling_caps_pathological_input() {
        let cfg = ChunkingConfig {
            max_chunks_per_document: 10,
            ..config()
        };
        let doc = document(vec![Section::content(None, prose(5000))]);
        let chunker = Chunker::new(cfg).unwrap();

        let outcome = chunker.chunk(&doc).unwrap();
        assert!(outcome.truncated);
        assert_eq!(outcome.chunks.len(), 10);
    }

    #[test]
    fn test_exact_duplicate_chunks_collapse_with_occurrence_count() {
        // The same boilerplate paragraph repeated section after section
        let boilerplate = prose(70);
        let doc = document(vec![
            Section::content(Some("Page 1".into()), boilerplate.clone()),
            Section::content(Some("Page 2".into()), boilerplate.clone()),
            Section::content(Some("Page 3".into()), boilerplate),
        ]);
        let chunker = Chunker::new(config()).unwrap();

        let outcome = chunker.chunk(&doc).unwrap();
        let repeated: Vec<_> = outcome
            .chunks
            .iter()
            .filter(|c| c.occurrence_count > 1)
            .collect();
        assert!(!repeated.is_empty(), "expected collapsed duplicates");
        // No two stored chunks share a hash
        let mut hashes: Vec<_> = outcome.chunks.iter().map(|c| &c.content_hash).collect();
        hashes.sort();
        hashes.dedup();
        assert_eq!(hashes.len(), outcome.chunks.len());
    }

    #[test]
    fn test_reference_sections_become_reference_chunks() {
        let doc = document(vec![
            Section::content(Some("Body".into()), prose(80)),
            Section::references(
                "[1] A. Author, Journal of Optics. [2] B. Author, Display Weekly.",
            ),
        ]);
        let chunker = Chunker::new(config()).unwrap();

        let outcome = chunker.chunk(&doc).unwrap();
        assert!(outcome
            .chunks
            .iter()
            .any(|c| c.chunk_type == ChunkType::Reference));
        // Content and reference material never share a chunk
        for chunk in &outcome.chunks {
            if chunk.chunk_type == ChunkType::Reference {
                assert!(chunk.content.contains("[1]") || chunk.content.contains("[2]"));
                assert!(!chunk.content.contains("Sentence number"));
            }
        }
    }

    #[test]
    fn test_kind_boundary_permits_undersized_chunk() {
        let cfg = config();
        let doc = document(vec![
            Section::content(Some("Body".into()), prose(40)),
            Section::references("[1] A. Author, Journal of Optics."),
        ]);
        let chunker = Chunker::new(cfg.clone()).unwrap();

        let outcome = chunker.chunk(&doc).unwrap();
        let last = outcome.chunks.last().unwrap();
        // A short trailing references section stays its own chunk, below the
        // minimum, instead of merging into the content chunk before it
        assert_eq!(last.chunk_type, ChunkType::Reference);
        assert!(estimate_tokens(&last.content) < cfg.min_chunk_tokens);
        assert_eq!(
            outcome
                .chunks
                .iter()
                .filter(|c| c.chunk_type == ChunkType::Reference)
                .count(),
            1
        );
    }

    #[test]
    fn test_chunk_indices_are_sequential() {
        let doc = document(vec![Section::content(None, prose(300))]);
        let chunker = Chunker::new(config()).unwrap();
        let outcome = chunker.chunk(&doc).unwrap();
        for (i, chunk) in outcome.chunks.iter().enumerate() {
            assert_eq!(chunk.chunk_index as usize, i);
        }
    }
}
