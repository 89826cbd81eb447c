//! Document text retrieval and vectorization
//!
//! - [`TextRetriever`] fetches raw text for `(entity, document)` pairs from
//!   a [`TextSource`] in batches of at most `query_size` ids
//! - [`preprocess::TextPreprocessor`] applies the configured normalization
//!   steps in order
//! - [`vectorizer::SparseMatrixBuilder`] fits a vocabulary on train-side text
//!   and transforms both sides of a split

pub mod preprocess;
pub mod vectorizer;

pub use preprocess::{PreprocessingStep, TextPreprocessor};
pub use vectorizer::{FeatureType, FittedVectorizer, SparseMatrixBuilder, VectorizerParams};

use crate::Result;
use std::collections::HashMap;
use std::rc::Rc;
use tracing::{debug, warn};

/// Identity of one document in the text store
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DocumentKey {
    /// Bill identifier
    pub entity_id: i64,
    /// Document (bill version) identifier
    pub doc_id: String,
}

impl DocumentKey {
    /// Create a key
    #[must_use]
    pub fn new(entity_id: i64, doc_id: impl Into<String>) -> Self {
        Self {
            entity_id,
            doc_id: doc_id.into(),
        }
    }
}

/// A fetched document
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Document {
    /// Which document this is
    pub key: DocumentKey,
    /// Raw text of the requested field
    pub text: String,
}

/// Text store contract.
pub trait TextSource {
    /// Fetch the `text_field` of each key.
    ///
    /// Missing documents are omitted from the result rather than reported
    /// as errors.
    ///
    /// # Errors
    /// Returns error if the store cannot be queried
    fn fetch(&self, keys: &[DocumentKey], text_field: &str) -> Result<Vec<Document>>;
}

impl<T: TextSource + ?Sized> TextSource for Rc<T> {
    fn fetch(&self, keys: &[DocumentKey], text_field: &str) -> Result<Vec<Document>> {
        (**self).fetch(keys, text_field)
    }
}

impl<T: TextSource + ?Sized> TextSource for &T {
    fn fetch(&self, keys: &[DocumentKey], text_field: &str) -> Result<Vec<Document>> {
        (**self).fetch(keys, text_field)
    }
}

/// In-memory text store keyed by document.
#[derive(Debug, Clone, Default)]
pub struct MemoryTextSource {
    documents: HashMap<DocumentKey, String>,
}

impl MemoryTextSource {
    /// Create an empty store
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a document
    #[must_use]
    pub fn with_document(mut self, entity_id: i64, doc_id: &str, text: &str) -> Self {
        self.documents
            .insert(DocumentKey::new(entity_id, doc_id), text.to_string());
        self
    }
}

impl TextSource for MemoryTextSource {
    fn fetch(&self, keys: &[DocumentKey], _text_field: &str) -> Result<Vec<Document>> {
        Ok(keys
            .iter()
            .filter_map(|key| {
                self.documents.get(key).map(|text| Document {
                    key: key.clone(),
                    text: text.clone(),
                })
            })
            .collect())
    }
}

/// Batched text fetcher.
#[derive(Debug, Clone)]
pub struct TextRetriever<S> {
    source: S,
    query_size: usize,
    text_field: String,
}

impl<S: TextSource> TextRetriever<S> {
    /// Create a retriever; a `query_size` of zero is treated as one.
    #[must_use]
    pub fn new(source: S, query_size: usize, text_field: impl Into<String>) -> Self {
        Self {
            source,
            query_size: query_size.max(1),
            text_field: text_field.into(),
        }
    }

    /// Fetch text for every key, `query_size` keys per request.
    ///
    /// Returns a map from key to text. Fewer documents than requested is a
    /// valid result and only logged.
    ///
    /// # Errors
    /// Returns error if any batch request fails
    pub fn retrieve(&self, keys: &[DocumentKey]) -> Result<HashMap<DocumentKey, String>> {
        let mut unique: Vec<DocumentKey> = keys.to_vec();
        unique.sort();
        unique.dedup();

        let mut found = HashMap::with_capacity(unique.len());
        for (batch_no, batch) in unique.chunks(self.query_size).enumerate() {
            let documents = self.source.fetch(batch, &self.text_field)?;
            debug!(batch = batch_no, requested = batch.len(), returned = documents.len(), "fetched text batch");
            for document in documents {
                found.insert(document.key, document.text);
            }
        }

        if found.len() < unique.len() {
            warn!(
                requested = unique.len(),
                returned = found.len(),
                field = %self.text_field,
                "text store returned fewer documents than requested"
            );
        }
        Ok(found)
    }
}
