//! Vector store abstraction
//!
//! The engine only needs nearest-neighbour lookups over question text. The
//! production backend is Chroma over HTTP (see `chroma.rs`); tests and
//! offline runs use the in-memory store below with deterministic hash
//! embeddings, so similarity is reproducible without an embedding API.

use crate::error::Result;
use crate::normalize;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use tokio::sync::RwLock;

/// Dimension of the deterministic hash embeddings.
pub const EMBEDDING_DIM: usize = 64;

/// A document plus its free-form metadata, as stored in a collection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredDocument {
    pub id: String,
    pub document: String,
    pub metadata: serde_json::Value,
}

impl StoredDocument {
    pub fn new(id: &str, document: &str, metadata: serde_json::Value) -> Self {
        Self {
            id: id.to_string(),
            document: document.to_string(),
            metadata,
        }
    }
}

/// Column-oriented result of a similarity query, all vectors index-aligned.
/// `distances` is `None` for unranked reads such as `get_all`.
#[derive(Debug, Clone, Default)]
pub struct SimilaritySearch {
    pub ids: Vec<String>,
    pub documents: Vec<String>,
    pub distances: Option<Vec<f64>>,
    pub metadatas: Vec<serde_json::Value>,
}

impl SimilaritySearch {
    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }
}

/// Capability the resolution tiers depend on. Distances are in [0, 2] and
/// convert to similarity via `1 - distance`.
#[async_trait]
pub trait VectorStore: Send + Sync {
    async fn upsert(&self, collection: &str, documents: Vec<StoredDocument>) -> Result<()>;
    async fn query(&self, collection: &str, text: &str, k: usize) -> Result<SimilaritySearch>;
    async fn get_all(&self, collection: &str) -> Result<SimilaritySearch>;
    async fn count(&self, collection: &str) -> Result<usize>;
    async fn delete(&self, collection: &str, ids: &[String]) -> Result<()>;
}

/// Deterministic bag-of-words hash embedding. Tokens of the normalized text
/// are hashed into a fixed number of buckets and the vector is L2-normalized,
/// so two paraphrases sharing vocabulary land close in cosine space.
pub fn embed_text(text: &str) -> Vec<f32> {
    let mut vector = vec![0.0_f32; EMBEDDING_DIM];
    for token in normalize::normalize(text).split_whitespace() {
        let mut hasher = DefaultHasher::new();
        token.hash(&mut hasher);
        let bucket = (hasher.finish() % EMBEDDING_DIM as u64) as usize;
        vector[bucket] += 1.0;
    }
    let norm: f32 = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        for value in &mut vector {
            *value /= norm;
        }
    }
    vector
}

/// Compute cosine similarity between two vectors
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        return 0.0;
    }

    let dot_product: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }

    dot_product / (norm_a * norm_b)
}

struct StoredRecord {
    document: StoredDocument,
    embedding: Vec<f32>,
}

/// In-memory vector store, one map of records per collection. Reads are
/// concurrent; upserts to the same id are last-writer-wins, which is safe
/// because cache entries are idempotent by construction.
#[derive(Default)]
pub struct InMemoryVectorStore {
    collections: RwLock<HashMap<String, HashMap<String, StoredRecord>>>,
}

impl InMemoryVectorStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl VectorStore for InMemoryVectorStore {
    async fn upsert(&self, collection: &str, documents: Vec<StoredDocument>) -> Result<()> {
        let mut collections = self.collections.write().await;
        let records = collections.entry(collection.to_string()).or_default();
        for document in documents {
            let embedding = embed_text(&document.document);
            records.insert(
                document.id.clone(),
                StoredRecord { document, embedding },
            );
        }
        Ok(())
    }

    async fn query(&self, collection: &str, text: &str, k: usize) -> Result<SimilaritySearch> {
        let collections = self.collections.read().await;
        let Some(records) = collections.get(collection) else {
            return Ok(SimilaritySearch::default());
        };

        let query_embedding = embed_text(text);
        let mut scored: Vec<(&StoredRecord, f64)> = records
            .values()
            .map(|record| {
                let distance = 1.0 - cosine_similarity(&query_embedding, &record.embedding) as f64;
                (record, distance)
            })
            .collect();
        scored.sort_by(|a, b| a.1.total_cmp(&b.1));
        scored.truncate(k);

        let mut result = SimilaritySearch {
            distances: Some(Vec::with_capacity(scored.len())),
            ..Default::default()
        };
        for (record, distance) in scored {
            result.ids.push(record.document.id.clone());
            result.documents.push(record.document.document.clone());
            result.metadatas.push(record.document.metadata.clone());
            if let Some(distances) = result.distances.as_mut() {
                distances.push(distance);
            }
        }
        Ok(result)
    }

    async fn get_all(&self, collection: &str) -> Result<SimilaritySearch> {
        let collections = self.collections.read().await;
        let mut result = SimilaritySearch::default();
        if let Some(records) = collections.get(collection) {
            for record in records.values() {
                result.ids.push(record.document.id.clone());
                result.documents.push(record.document.document.clone());
                result.metadatas.push(record.document.metadata.clone());
            }
        }
        Ok(result)
    }

    async fn count(&self, collection: &str) -> Result<usize> {
        let collections = self.collections.read().await;
        Ok(collections.get(collection).map_or(0, HashMap::len))
    }

    async fn delete(&self, collection: &str, ids: &[String]) -> Result<()> {
        let mut collections = self.collections.write().await;
        if let Some(records) = collections.get_mut(collection) {
            for id in ids {
                records.remove(id);
            }
        }
        Ok(())
    }
}
