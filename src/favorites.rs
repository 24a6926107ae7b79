//! Locally persisted favorites, keyed by movie id.
//!
//! The whole set lives in one storage slot as a JSON array of
//! [`MovieSummary`] snapshots, so a favorites view can render without going
//! back to the catalog. Toggling is the only mutation.

use std::collections::HashMap;
use std::env;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use tempfile::NamedTempFile;
use thiserror::Error;
use tokio::sync::broadcast;
use tracing::{debug, warn};

use crate::models::MovieSummary;

pub const FAVORITES_SLOT: &str = "favorites";
const EVENT_CAPACITY: usize = 64;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("failed to read slot '{slot}': {source}")]
    Read {
        slot: String,
        #[source]
        source: io::Error,
    },
    #[error("failed to write slot '{slot}': {source}")]
    Write {
        slot: String,
        #[source]
        source: io::Error,
    },
    #[error("failed to encode favorites: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Durable string slots, the moral equivalent of browser local storage.
pub trait FavoritesStorage: Send + Sync {
    fn read(&self, slot: &str) -> Result<Option<String>, StorageError>;
    fn write(&self, slot: &str, value: &str) -> Result<(), StorageError>;
}

/// One `<slot>.json` file per slot inside a directory.
#[derive(Debug, Clone)]
pub struct FileStorage {
    dir: PathBuf,
}

impl FileStorage {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn from_env() -> Self {
        let dir = env::var("FAVORITES_DIR")
            .ok()
            .filter(|s| !s.trim().is_empty())
            .unwrap_or_else(|| "data".to_string());
        Self::new(dir)
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn slot_path(&self, slot: &str) -> PathBuf {
        self.dir.join(format!("{slot}.json"))
    }
}

impl FavoritesStorage for FileStorage {
    fn read(&self, slot: &str) -> Result<Option<String>, StorageError> {
        match fs::read_to_string(self.slot_path(slot)) {
            Ok(raw) => Ok(Some(raw)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(source) => Err(StorageError::Read {
                slot: slot.to_string(),
                source,
            }),
        }
    }

    fn write(&self, slot: &str, value: &str) -> Result<(), StorageError> {
        let write_err = |source| StorageError::Write {
            slot: slot.to_string(),
            source,
        };
        fs::create_dir_all(&self.dir).map_err(write_err)?;
        // Every writer gets its own temp file; the rename swaps the slot in
        // whole, so readers see the old or the new set, never a partial one.
        let mut tmp = NamedTempFile::new_in(&self.dir).map_err(write_err)?;
        tmp.write_all(value.as_bytes()).map_err(write_err)?;
        tmp.persist(self.slot_path(slot))
            .map_err(|e| write_err(e.error))?;
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct MemoryStorage {
    slots: Mutex<HashMap<String, String>>,
}

impl FavoritesStorage for MemoryStorage {
    fn read(&self, slot: &str) -> Result<Option<String>, StorageError> {
        let slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(slots.get(slot).cloned())
    }

    fn write(&self, slot: &str, value: &str) -> Result<(), StorageError> {
        let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        slots.insert(slot.to_string(), value.to_string());
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FavoritesEvent {
    Added(i64),
    Removed(i64),
}

impl FavoritesEvent {
    pub fn id(&self) -> i64 {
        match self {
            FavoritesEvent::Added(id) | FavoritesEvent::Removed(id) => *id,
        }
    }
}

pub struct FavoritesStore {
    storage: Arc<dyn FavoritesStorage>,
    slot: String,
    events: broadcast::Sender<FavoritesEvent>,
}

impl FavoritesStore {
    pub fn new(storage: Arc<dyn FavoritesStorage>) -> Self {
        Self::with_slot(storage, FAVORITES_SLOT)
    }

    pub fn with_slot(storage: Arc<dyn FavoritesStorage>, slot: impl Into<String>) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            storage,
            slot: slot.into(),
            events,
        }
    }

    /// Missing or unreadable content is an empty set, never an error.
    pub fn get_all(&self) -> Vec<MovieSummary> {
        let raw = match self.storage.read(&self.slot) {
            Ok(Some(raw)) => raw,
            Ok(None) => return Vec::new(),
            Err(e) => {
                warn!("Favorites storage unreadable, treating as empty: {}", e);
                return Vec::new();
            }
        };
        serde_json::from_str(&raw).unwrap_or_else(|e| {
            warn!("Favorites slot '{}' is malformed, treating as empty: {}", self.slot, e);
            Vec::new()
        })
    }

    pub fn contains(&self, id: i64) -> bool {
        self.get_all().iter().any(|m| m.id == id)
    }

    pub fn count(&self) -> usize {
        self.get_all().len()
    }

    /// Adds the snapshot when absent, removes it when present, and returns
    /// the new membership. Read-modify-write of the whole slot, unlocked.
    pub fn toggle(&self, item: &MovieSummary) -> Result<bool, StorageError> {
        let mut favorites = self.get_all();
        let exists = favorites.iter().any(|m| m.id == item.id);
        if exists {
            favorites.retain(|m| m.id != item.id);
        } else {
            favorites.push(item.clone());
        }
        let encoded = serde_json::to_string(&favorites)?;
        self.storage.write(&self.slot, &encoded)?;

        let event = if exists {
            FavoritesEvent::Removed(item.id)
        } else {
            FavoritesEvent::Added(item.id)
        };
        debug!(movie_id = item.id, favorited = !exists, "Favorite toggled");
        // No subscribers is fine.
        let _ = self.events.send(event);
        Ok(!exists)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<FavoritesEvent> {
        self.events.subscribe()
    }
}
