//! Curated query catalog
//!
//! Predefined SQL queries ship as `*.query.json` files, each carrying one or
//! more French question variants. They are seeded into the `sql_queries`
//! collection with deterministic ids so reseeding never duplicates entries,
//! and the catalog reloads itself when a file changes on disk.

use crate::error::Result;
use crate::vector_store::{StoredDocument, VectorStore};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tokio::sync::RwLock;
use tracing::{info, warn};

/// Collection holding the curated catalog entries.
pub const CATALOG_COLLECTION: &str = "sql_queries";

/// One curated query with its question variants.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PredefinedQuery {
    pub id: String,
    pub questions: Vec<String>,
    pub sql: String,
    #[serde(default)]
    pub description: String,
    /// Placeholder names the SQL expects, e.g. `CLIENT_ID`.
    #[serde(default)]
    pub parameters: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct QueryFile {
    queries: Vec<PredefinedQuery>,
}

#[derive(Default)]
struct CatalogState {
    queries: Vec<PredefinedQuery>,
    mtimes: HashMap<PathBuf, SystemTime>,
}

/// File-backed catalog of predefined queries.
pub struct QueryCatalog {
    dir: PathBuf,
    state: RwLock<CatalogState>,
}

impl QueryCatalog {
    /// Load every `*.query.json` under `dir`. A missing directory is not an
    /// error, the catalog simply starts empty.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        let state = read_dir_state(&dir)?;
        info!(
            dir = %dir.display(),
            queries = state.queries.len(),
            "query catalog loaded"
        );
        Ok(Self {
            dir,
            state: RwLock::new(state),
        })
    }

    pub async fn queries(&self) -> Vec<PredefinedQuery> {
        self.state.read().await.queries.clone()
    }

    pub async fn len(&self) -> usize {
        self.state.read().await.queries.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.state.read().await.queries.is_empty()
    }

    pub async fn get(&self, id: &str) -> Option<PredefinedQuery> {
        self.state
            .read()
            .await
            .queries
            .iter()
            .find(|q| q.id == id)
            .cloned()
    }

    /// Re-read the directory when any file was added, removed or modified
    /// since the last load. Returns whether a reload happened.
    pub async fn reload_if_changed(&self) -> Result<bool> {
        let snapshot = scan_mtimes(&self.dir);
        {
            let state = self.state.read().await;
            if snapshot == state.mtimes {
                return Ok(false);
            }
        }
        let fresh = read_dir_state(&self.dir)?;
        let mut state = self.state.write().await;
        info!(queries = fresh.queries.len(), "query catalog reloaded after file change");
        *state = fresh;
        Ok(true)
    }

    /// Upsert every query/question pair into the store, skipping ids already
    /// present. Returns the number of new documents.
    pub async fn seed(&self, store: &dyn VectorStore, collection: &str) -> Result<usize> {
        let queries = self.queries().await;
        let existing: HashSet<String> = store.get_all(collection).await?.ids.into_iter().collect();

        let mut batch = Vec::new();
        for query in &queries {
            for question in &query.questions {
                let id = document_id(&query.id, question);
                if existing.contains(&id) {
                    continue;
                }
                let reformulated = if query.description.is_empty() {
                    question.as_str()
                } else {
                    query.description.as_str()
                };
                let metadata = json!({
                    "id": query.id,
                    "question": question,
                    "questionReformulated": reformulated,
                    "finalQuery": query.sql,
                    "agent": "querybuilder",
                    "parameters": query.parameters,
                });
                batch.push(StoredDocument::new(&id, question, metadata));
            }
        }

        let added = batch.len();
        if !batch.is_empty() {
            store.upsert(collection, batch).await?;
        }
        info!(added, collection, "catalog entries seeded");
        Ok(added)
    }
}

fn read_dir_state(dir: &Path) -> Result<CatalogState> {
    let mut state = CatalogState::default();
    if !dir.is_dir() {
        warn!(dir = %dir.display(), "queries directory missing, catalog starts empty");
        return Ok(state);
    }

    let mut paths: Vec<PathBuf> = std::fs::read_dir(dir)?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|p| {
            p.file_name()
                .and_then(|n| n.to_str())
                .map_or(false, |n| n.ends_with(".query.json"))
        })
        .collect();
    paths.sort();

    for path in paths {
        match load_file(&path) {
            Ok(mut queries) => {
                if let Ok(mtime) = std::fs::metadata(&path).and_then(|m| m.modified()) {
                    state.mtimes.insert(path.clone(), mtime);
                }
                state.queries.append(&mut queries);
            }
            Err(e) => {
                warn!(file = %path.display(), error = %e, "skipping unreadable query file")
            }
        }
    }
    Ok(state)
}

fn load_file(path: &Path) -> Result<Vec<PredefinedQuery>> {
    let content = std::fs::read_to_string(path)?;
    let file: QueryFile = serde_json::from_str(&content)?;
    let mut queries = Vec::with_capacity(file.queries.len());
    for query in file.queries {
        if query.id.is_empty() || query.questions.is_empty() || query.sql.is_empty() {
            warn!(file = %path.display(), "invalid catalog entry skipped");
            continue;
        }
        queries.push(query);
    }
    Ok(queries)
}

fn scan_mtimes(dir: &Path) -> HashMap<PathBuf, SystemTime> {
    let mut mtimes = HashMap::new();
    let Ok(entries) = std::fs::read_dir(dir) else {
        return mtimes;
    };
    for entry in entries.filter_map(|e| e.ok()) {
        let path = entry.path();
        let is_query_file = path
            .file_name()
            .and_then(|n| n.to_str())
            .map_or(false, |n| n.ends_with(".query.json"));
        if !is_query_file {
            continue;
        }
        if let Ok(mtime) = entry.metadata().and_then(|m| m.modified()) {
            mtimes.insert(path, mtime);
        }
    }
    mtimes
}

/// 32-bit rolling hash over UTF-16 code units, rendered as lowercase hex.
/// Kept stable because seeded document ids derive from it.
pub fn rolling_hash(text: &str) -> String {
    let mut hash: i32 = 0;
    for unit in text.encode_utf16() {
        hash = hash.wrapping_shl(5).wrapping_sub(hash).wrapping_add(unit as i32);
    }
    format!("{:x}", hash.unsigned_abs())
}

/// Deterministic store id for one question variant of a catalog entry.
pub fn document_id(query_id: &str, question: &str) -> String {
    format!("{}_{}", query_id, rolling_hash(question))
}
