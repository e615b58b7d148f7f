//! Chroma HTTP backend
//!
//! Talks to a Chroma server over its `/api/v1` REST surface. Embeddings are
//! computed client-side with the same hash embedder the in-memory store uses,
//! so both backends rank documents identically.

use crate::error::{EngineError, Result};
use crate::vector_store::{embed_text, SimilaritySearch, StoredDocument, VectorStore};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::debug;

pub struct ChromaHttpStore {
    client: reqwest::Client,
    base_url: String,
    /// Collection name to server-side id, filled lazily.
    collection_ids: RwLock<HashMap<String, String>>,
}

impl ChromaHttpStore {
    pub fn new(base_url: &str) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .unwrap_or_default();
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            collection_ids: RwLock::new(HashMap::new()),
        }
    }

    /// Resolve a collection name to its id, creating the collection on first
    /// use.
    async fn collection_id(&self, name: &str) -> Result<String> {
        {
            let cached = self.collection_ids.read().await;
            if let Some(id) = cached.get(name) {
                return Ok(id.clone());
            }
        }

        let body = json!({"name": name, "get_or_create": true});
        let payload = self
            .post_json(&format!("{}/api/v1/collections", self.base_url), &body)
            .await?;
        let id = payload
            .get("id")
            .and_then(|v| v.as_str())
            .ok_or_else(|| {
                EngineError::VectorStore(format!("no id in collection response for '{}'", name))
            })?
            .to_string();

        self.collection_ids
            .write()
            .await
            .insert(name.to_string(), id.clone());
        Ok(id)
    }

    async fn post_json(&self, url: &str, body: &Value) -> Result<Value> {
        let response = self
            .client
            .post(url)
            .json(body)
            .send()
            .await
            .map_err(|e| EngineError::VectorStore(format!("Chroma request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(EngineError::VectorStore(format!(
                "Chroma error ({}): {}",
                status, error_text
            )));
        }

        response
            .json()
            .await
            .map_err(|e| EngineError::VectorStore(format!("Failed to parse Chroma response: {}", e)))
    }

    async fn get_json(&self, url: &str) -> Result<Value> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| EngineError::VectorStore(format!("Chroma request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(EngineError::VectorStore(format!(
                "Chroma error ({}): {}",
                status, error_text
            )));
        }

        response
            .json()
            .await
            .map_err(|e| EngineError::VectorStore(format!("Failed to parse Chroma response: {}", e)))
    }
}

#[async_trait]
impl VectorStore for ChromaHttpStore {
    async fn upsert(&self, collection: &str, documents: Vec<StoredDocument>) -> Result<()> {
        if documents.is_empty() {
            return Ok(());
        }
        let collection_id = self.collection_id(collection).await?;

        let total = documents.len();
        let mut ids = Vec::with_capacity(total);
        let mut texts = Vec::with_capacity(total);
        let mut embeddings = Vec::with_capacity(total);
        let mut metadatas = Vec::with_capacity(total);
        for doc in documents {
            embeddings.push(embed_text(&doc.document));
            ids.push(doc.id);
            texts.push(doc.document);
            metadatas.push(doc.metadata);
        }

        let body = json!({
            "ids": ids,
            "embeddings": embeddings,
            "documents": texts,
            "metadatas": metadatas,
        });
        self.post_json(
            &format!(
                "{}/api/v1/collections/{}/upsert",
                self.base_url, collection_id
            ),
            &body,
        )
        .await?;
        debug!(collection, total, "documents upserted");
        Ok(())
    }

    async fn query(&self, collection: &str, text: &str, k: usize) -> Result<SimilaritySearch> {
        let collection_id = self.collection_id(collection).await?;
        let body = json!({
            "query_embeddings": [embed_text(text)],
            "n_results": k,
            "include": ["documents", "metadatas", "distances"],
        });
        let payload = self
            .post_json(
                &format!(
                    "{}/api/v1/collections/{}/query",
                    self.base_url, collection_id
                ),
                &body,
            )
            .await?;

        // Query responses nest one row per query embedding.
        Ok(SimilaritySearch {
            ids: string_items(first_row(&payload, "ids")),
            documents: string_items(first_row(&payload, "documents")),
            distances: Some(f64_items(first_row(&payload, "distances"))),
            metadatas: first_row(&payload, "metadatas").to_vec(),
        })
    }

    async fn get_all(&self, collection: &str) -> Result<SimilaritySearch> {
        let collection_id = self.collection_id(collection).await?;
        let body = json!({"include": ["documents", "metadatas"]});
        let payload = self
            .post_json(
                &format!("{}/api/v1/collections/{}/get", self.base_url, collection_id),
                &body,
            )
            .await?;

        Ok(SimilaritySearch {
            ids: string_items(flat_row(&payload, "ids")),
            documents: string_items(flat_row(&payload, "documents")),
            distances: None,
            metadatas: flat_row(&payload, "metadatas").to_vec(),
        })
    }

    async fn count(&self, collection: &str) -> Result<usize> {
        let collection_id = self.collection_id(collection).await?;
        let payload = self
            .get_json(&format!(
                "{}/api/v1/collections/{}/count",
                self.base_url, collection_id
            ))
            .await?;
        payload
            .as_u64()
            .map(|n| n as usize)
            .ok_or_else(|| EngineError::VectorStore("count response is not a number".to_string()))
    }

    async fn delete(&self, collection: &str, ids: &[String]) -> Result<()> {
        if ids.is_empty() {
            return Ok(());
        }
        let collection_id = self.collection_id(collection).await?;
        let body = json!({"ids": ids});
        self.post_json(
            &format!(
                "{}/api/v1/collections/{}/delete",
                self.base_url, collection_id
            ),
            &body,
        )
        .await?;
        debug!(collection, removed = ids.len(), "documents deleted");
        Ok(())
    }
}

fn first_row<'a>(payload: &'a Value, key: &str) -> &'a [Value] {
    payload
        .get(key)
        .and_then(|v| v.as_array())
        .and_then(|rows| rows.first())
        .and_then(|row| row.as_array())
        .map(|row| row.as_slice())
        .unwrap_or(&[])
}

fn flat_row<'a>(payload: &'a Value, key: &str) -> &'a [Value] {
    payload
        .get(key)
        .and_then(|v| v.as_array())
        .map(|v| v.as_slice())
        .unwrap_or(&[])
}

fn string_items(row: &[Value]) -> Vec<String> {
    row.iter()
        .filter_map(|v| v.as_str().map(str::to_string))
        .collect()
}

fn f64_items(row: &[Value]) -> Vec<f64> {
    row.iter().filter_map(|v| v.as_f64()).collect()
}
