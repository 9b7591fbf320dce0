use crate::bm25::KeywordIndex;
use async_trait::async_trait;
use cirrus_core::{CirrusError, CirrusResult, ExperienceStore, MemoryRecord};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tokio::sync::RwLock;
use tracing::debug;

#[derive(Default)]
struct Namespace {
    records: Vec<MemoryRecord>,
    index: KeywordIndex,
}

/// Process-local experience store. Each namespace keeps its own BM25 index.
#[derive(Default)]
pub struct InMemoryExperienceStore {
    namespaces: RwLock<HashMap<String, Namespace>>,
}

impl InMemoryExperienceStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// All records in `namespace`, oldest first.
    pub async fn list(&self, namespace: &str) -> Vec<MemoryRecord> {
        self.namespaces
            .read()
            .await
            .get(namespace)
            .map(|ns| ns.records.clone())
            .unwrap_or_default()
    }

    /// Total number of records across namespaces.
    pub async fn count(&self) -> usize {
        self.namespaces
            .read()
            .await
            .values()
            .map(|ns| ns.records.len())
            .sum()
    }

    async fn insert(&self, record: MemoryRecord) {
        let mut namespaces = self.namespaces.write().await;
        let ns = namespaces.entry(record.namespace.clone()).or_default();
        ns.index.insert(record.id, &record.content);
        ns.records.push(record);
    }
}

#[async_trait]
impl ExperienceStore for InMemoryExperienceStore {
    async fn store(&self, record: MemoryRecord) -> CirrusResult<()> {
        debug!(namespace = %record.namespace, id = %record.id, "Storing memory record");
        self.insert(record).await;
        Ok(())
    }

    async fn search(
        &self,
        namespace: &str,
        query: &str,
        limit: usize,
    ) -> CirrusResult<Vec<MemoryRecord>> {
        let namespaces = self.namespaces.read().await;
        let Some(ns) = namespaces.get(namespace) else {
            return Ok(Vec::new());
        };

        let hits = ns
            .index
            .rank(query, limit)
            .into_iter()
            .filter_map(|(id, _)| ns.records.iter().find(|r| r.id == id).cloned())
            .collect();
        Ok(hits)
    }
}

/// Experience store persisted as one JSON record per line.
///
/// Loads every record on creation and appends on each `store`.
pub struct FileExperienceStore {
    path: PathBuf,
    inner: InMemoryExperienceStore,
}

fn memory_err(action: &str, path: &Path, e: impl std::fmt::Display) -> CirrusError {
    CirrusError::Memory(format!("Failed to {action} {}: {e}", path.display()))
}

impl FileExperienceStore {
    /// Open the store at `path`, creating parent directories if needed.
    pub async fn open(path: impl Into<PathBuf>) -> CirrusResult<Self> {
        let path = path.into();
        let inner = InMemoryExperienceStore::new();

        if tokio::fs::try_exists(&path).await.unwrap_or(false) {
            let data = tokio::fs::read_to_string(&path)
                .await
                .map_err(|e| memory_err("read", &path, e))?;
            for (lineno, line) in data.lines().enumerate() {
                if line.trim().is_empty() {
                    continue;
                }
                let record: MemoryRecord = serde_json::from_str(line).map_err(|e| {
                    CirrusError::Memory(format!(
                        "Invalid record on line {} of {}: {e}",
                        lineno + 1,
                        path.display()
                    ))
                })?;
                inner.insert(record).await;
            }
            debug!(path = %path.display(), records = inner.count().await, "Loaded experience store");
        } else if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| memory_err("create directory for", &path, e))?;
        }

        Ok(Self { path, inner })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn list(&self, namespace: &str) -> Vec<MemoryRecord> {
        self.inner.list(namespace).await
    }

    pub async fn count(&self) -> usize {
        self.inner.count().await
    }
}

#[async_trait]
impl ExperienceStore for FileExperienceStore {
    async fn store(&self, record: MemoryRecord) -> CirrusResult<()> {
        let mut line = serde_json::to_string(&record)?;
        line.push('\n');

        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await
            .map_err(|e| memory_err("open", &self.path, e))?;
        file.write_all(line.as_bytes())
            .await
            .map_err(|e| memory_err("append to", &self.path, e))?;

        self.inner.store(record).await
    }

    async fn search(
        &self,
        namespace: &str,
        query: &str,
        limit: usize,
    ) -> CirrusResult<Vec<MemoryRecord>> {
        self.inner.search(namespace, query, limit).await
    }
}
