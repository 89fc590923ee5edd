//! External collaborator abstractions: extraction services and persistence

pub mod extraction;
pub mod graph_extractor;
pub mod store;

pub use extraction::{
    DocumentStructureProvider, HttpDocumentStructure, HttpStructuredExtractor, PdfAnalysis,
    PdfStructure, StructuredDocument, StructuredExtractor,
};
pub use graph_extractor::{GraphExtractor, HttpGraphExtractor};
pub use store::{DocumentStore, EntityFilter, JobFilter, RelationFilter};
