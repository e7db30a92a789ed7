//! Flat-file record storage.
//!
//! Each [`RecordStore`] owns one JSON document of the form
//! `{ "items": [...], "nextId": n }`. The document is read lazily on first
//! access and kept in memory for the life of the process. Every write is a
//! read-modify-write of a copy of the collection followed by a full rewrite of
//! the document (temp file + rename); the in-memory copy is only replaced once
//! the rewrite has landed.
//!
//! Operations on one store are serialized by an async mutex, so identifier
//! allocation cannot race. Sharing a document between processes is not
//! supported.

use std::io::ErrorKind as IoErrorKind;
use std::path::{Path, PathBuf};

use anyhow::anyhow;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::error::{LibError, Result};

/// A record with a store-assigned numeric identifier.
pub trait Record: Clone + Serialize + DeserializeOwned + Send + Sync + 'static {
    fn id(&self) -> u64;
}

/// In-memory view of a store document.
#[derive(Debug, Clone)]
pub struct Collection<R> {
    items: Vec<R>,
    next_id: u64,
}

#[derive(Serialize)]
struct DocumentRef<'a, R> {
    items: &'a [R],
    #[serde(rename = "nextId")]
    next_id: u64,
}

#[derive(Deserialize)]
struct Document<R> {
    items: Vec<R>,
    #[serde(rename = "nextId", default)]
    next_id: Option<u64>,
}

impl<R: Record> Collection<R> {
    pub fn empty() -> Self {
        Self {
            items: Vec::new(),
            next_id: 0,
        }
    }

    fn from_document(document: Document<R>) -> anyhow::Result<Self> {
        // Documents written without a counter (or with a stale one) resume after
        // the highest identifier so ids are never handed out twice.
        let mut floor = document.items.len() as u64;
        for item in &document.items {
            let after = item
                .id()
                .checked_add(1)
                .ok_or_else(|| anyhow!("record id {} leaves no identifier to resume from", item.id()))?;
            floor = floor.max(after);
        }
        Ok(Self {
            next_id: document.next_id.unwrap_or(0).max(floor),
            items: document.items,
        })
    }

    pub fn items(&self) -> &[R] {
        &self.items
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn next_id(&self) -> u64 {
        self.next_id
    }

    pub fn get(&self, id: u64) -> Option<&R> {
        self.items.iter().find(|item| item.id() == id)
    }

    pub fn get_mut(&mut self, id: u64) -> Option<&mut R> {
        self.items.iter_mut().find(|item| item.id() == id)
    }

    /// Hands out the next identifier. For a collection that has never lost a
    /// record this equals the collection length.
    pub fn allocate_id(&mut self) -> Result<u64> {
        let id = self.next_id;
        self.next_id = id.checked_add(1).ok_or_else(|| {
            LibError::storage(
                "Storage is unavailable",
                anyhow!("identifier space exhausted at {}", id),
            )
        })?;
        Ok(id)
    }

    pub fn push(&mut self, record: R) {
        self.items.push(record);
    }

    pub fn remove(&mut self, id: u64) -> Option<R> {
        let index = self.items.iter().position(|item| item.id() == id)?;
        Some(self.items.remove(index))
    }

    pub fn to_json(&self) -> Result<Vec<u8>> {
        let document = DocumentRef {
            items: &self.items,
            next_id: self.next_id,
        };
        Ok(serde_json::to_vec_pretty(&document)?)
    }

    pub fn from_json(bytes: &[u8]) -> anyhow::Result<Self> {
        let document = serde_json::from_slice::<Document<R>>(bytes)?;
        Self::from_document(document)
    }
}

enum StoreState<R> {
    Unloaded,
    Ready(Collection<R>),
    Failed(String),
}

pub struct RecordStore<R> {
    path: PathBuf,
    label: &'static str,
    state: Mutex<StoreState<R>>,
}

impl<R: Record> RecordStore<R> {
    pub fn new(path: impl Into<PathBuf>, label: &'static str) -> Self {
        Self {
            path: path.into(),
            label,
            state: Mutex::new(StoreState::Unloaded),
        }
    }

    pub async fn list(&self) -> Result<Vec<R>> {
        self.read(|collection| collection.items().to_vec()).await
    }

    pub async fn get(&self, id: u64) -> Result<Option<R>> {
        self.read(|collection| collection.get(id).cloned()).await
    }

    pub async fn filter<F>(&self, predicate: F) -> Result<Vec<R>>
    where
        F: Fn(&R) -> bool,
    {
        self.read(|collection| {
            collection
                .items()
                .iter()
                .filter(|item| predicate(item))
                .cloned()
                .collect()
        })
        .await
    }

    /// Runs `f` against a snapshot of the loaded collection.
    pub async fn read<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Collection<R>) -> T,
    {
        let mut state = self.state.lock().await;
        let collection = self.loaded(&mut state).await?;
        Ok(f(&*collection))
    }

    /// Allocates an identifier, builds the record from it, appends and persists.
    pub async fn insert<F>(&self, build: F) -> Result<R>
    where
        F: FnOnce(u64, &Collection<R>) -> Result<R>,
    {
        let inserted = self
            .mutate(|collection| {
                let id = collection.allocate_id()?;
                let record = build(id, &*collection)?;
                collection.push(record.clone());
                Ok(Some(record))
            })
            .await?;
        inserted.ok_or_else(|| LibError::message("Record insert produced no record"))
    }

    /// Applies `apply` to the record with `id`. Returns `None` without touching
    /// storage when no such record exists.
    pub async fn update<F>(&self, id: u64, apply: F) -> Result<Option<R>>
    where
        F: FnOnce(&mut R, &Collection<R>) -> Result<()>,
    {
        self.mutate(|collection| {
            let Some(current) = collection.get(id).cloned() else {
                return Ok(None);
            };
            let mut updated = current;
            apply(&mut updated, &*collection)?;
            if let Some(slot) = collection.get_mut(id) {
                *slot = updated.clone();
            }
            Ok(Some(updated))
        })
        .await
    }

    pub async fn remove(&self, id: u64) -> Result<Option<R>> {
        self.mutate(|collection| Ok(collection.remove(id))).await
    }

    /// Read-modify-write primitive. `f` works on a copy of the collection; the
    /// copy is persisted and installed only when `f` returns `Ok(Some(_))`.
    pub async fn mutate<T, F>(&self, f: F) -> Result<Option<T>>
    where
        F: FnOnce(&mut Collection<R>) -> Result<Option<T>>,
    {
        let mut state = self.state.lock().await;
        let mut working = self.loaded(&mut state).await?.clone();

        let Some(output) = f(&mut working)? else {
            return Ok(None);
        };

        self.persist(&working).await?;
        *state = StoreState::Ready(working);
        Ok(Some(output))
    }

    async fn loaded<'a>(&self, state: &'a mut StoreState<R>) -> Result<&'a mut Collection<R>> {
        if matches!(state, StoreState::Unloaded) {
            *state = match self.load().await {
                Ok(collection) => {
                    tracing::debug!(
                        store = self.label,
                        path = %self.path.display(),
                        records = collection.len(),
                        "record store loaded"
                    );
                    StoreState::Ready(collection)
                }
                Err(err) => {
                    tracing::error!(
                        store = self.label,
                        path = %self.path.display(),
                        error = %err,
                        "record store failed to load"
                    );
                    StoreState::Failed(err.to_string())
                }
            };
        }

        match state {
            StoreState::Ready(collection) => Ok(collection),
            StoreState::Failed(reason) => Err(LibError::storage(
                "Storage is unavailable",
                anyhow!("{} store at {} is unusable: {}", self.label, self.path.display(), reason),
            )),
            StoreState::Unloaded => Err(LibError::message("Record store failed to initialize")),
        }
    }

    async fn load(&self) -> anyhow::Result<Collection<R>> {
        let bytes = match tokio::fs::read(&self.path).await {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == IoErrorKind::NotFound => return Ok(Collection::empty()),
            Err(err) => return Err(anyhow!("failed to read {}: {}", self.path.display(), err)),
        };

        Collection::from_json(&bytes)
            .map_err(|err| anyhow!("failed to parse {}: {}", self.path.display(), err))
    }

    async fn persist(&self, collection: &Collection<R>) -> Result<()> {
        let bytes = collection.to_json()?;

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|err| write_err(&self.path, err))?;
        }

        let staging = staging_path(&self.path);
        tokio::fs::write(&staging, &bytes)
            .await
            .map_err(|err| write_err(&staging, err))?;
        tokio::fs::rename(&staging, &self.path)
            .await
            .map_err(|err| write_err(&self.path, err))?;

        tracing::debug!(
            store = self.label,
            records = collection.len(),
            bytes = bytes.len(),
            "record store persisted"
        );
        Ok(())
    }
}

fn staging_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

fn write_err(path: &Path, err: std::io::Error) -> LibError {
    LibError::storage(
        "Failed to write storage",
        anyhow!("write to {} failed: {}", path.display(), err),
    )
}
