//! Local persistence for story snapshots and reader preferences.
//!
//! A [`PersistenceStore`] sits on top of a plain string key-value
//! [`StorageBackend`] and namespaces every key with a prefix. Snapshots are
//! capped at `max_items`; after each successful write the oldest snapshots by
//! timestamp are evicted. Nothing here returns an error to the caller: failures
//! are logged and reported as `false` / `None`.

use crate::preferences::Preferences;
use crate::story::Story;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, warn};

/// Errors from storage backends.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Storage quota exceeded: need {needed} bytes, {available} available")]
    QuotaExceeded { needed: usize, available: usize },
}

/// Default namespace for all keys written by the store.
pub const DEFAULT_PREFIX: &str = "storybook_";

/// Default number of snapshots kept.
pub const DEFAULT_MAX_ITEMS: usize = 10;

const STORY_SEGMENT: &str = "story_";
const SETTING_SEGMENT: &str = "setting_";
const PREFERENCES_NAME: &str = "preferences";

/// A persisted copy of a story and its generated images.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StorySnapshot {
    pub story: Story,

    /// Page index to image URL.
    #[serde(default)]
    pub images: BTreeMap<usize, String>,

    /// Milliseconds since the Unix epoch; drives eviction order.
    pub timestamp: i64,
}

impl StorySnapshot {
    /// Snapshot a story, stamped with the current time.
    pub fn new(story: Story, images: BTreeMap<usize, String>) -> Self {
        Self::with_timestamp(story, images, chrono::Utc::now().timestamp_millis())
    }

    pub fn with_timestamp(story: Story, images: BTreeMap<usize, String>, timestamp: i64) -> Self {
        Self {
            story,
            images,
            timestamp,
        }
    }

    pub fn id(&self) -> &str {
        &self.story.id
    }
}

// ============================================================================
// Backends
// ============================================================================

/// A flat string key-value store.
pub trait StorageBackend: Send {
    fn get_item(&self, key: &str) -> Result<Option<String>, StorageError>;
    fn set_item(&mut self, key: &str, value: &str) -> Result<(), StorageError>;
    fn remove_item(&mut self, key: &str) -> Result<(), StorageError>;
    /// All keys, in a stable order.
    fn keys(&self) -> Result<Vec<String>, StorageError>;
}

/// In-memory backend with an optional byte quota, modeled on browser storage.
#[derive(Debug, Clone, Default)]
pub struct MemoryBackend {
    items: BTreeMap<String, String>,
    quota: Option<usize>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Limit the total size of keys plus values to `bytes`.
    pub fn with_quota(bytes: usize) -> Self {
        Self {
            items: BTreeMap::new(),
            quota: Some(bytes),
        }
    }

    fn used_bytes(&self) -> usize {
        self.items.iter().map(|(k, v)| k.len() + v.len()).sum()
    }
}

impl StorageBackend for MemoryBackend {
    fn get_item(&self, key: &str) -> Result<Option<String>, StorageError> {
        Ok(self.items.get(key).cloned())
    }

    fn set_item(&mut self, key: &str, value: &str) -> Result<(), StorageError> {
        if let Some(quota) = self.quota {
            let existing = self.items.get(key).map(|v| key.len() + v.len()).unwrap_or(0);
            let available = quota.saturating_sub(self.used_bytes() - existing);
            let needed = key.len() + value.len();
            if needed > available {
                return Err(StorageError::QuotaExceeded { needed, available });
            }
        }
        self.items.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove_item(&mut self, key: &str) -> Result<(), StorageError> {
        self.items.remove(key);
        Ok(())
    }

    fn keys(&self) -> Result<Vec<String>, StorageError> {
        Ok(self.items.keys().cloned().collect())
    }
}

/// Backend that stores one JSON file per key in a directory.
#[derive(Debug, Clone)]
pub struct FileBackend {
    dir: PathBuf,
}

impl FileBackend {
    /// Open (and create if needed) a storage directory.
    pub fn open(dir: impl AsRef<Path>) -> Result<Self, StorageError> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{}.json", encode_key(key)))
    }
}

impl StorageBackend for FileBackend {
    fn get_item(&self, key: &str) -> Result<Option<String>, StorageError> {
        match fs::read_to_string(self.path_for(key)) {
            Ok(content) => Ok(Some(content)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn set_item(&mut self, key: &str, value: &str) -> Result<(), StorageError> {
        let path = self.path_for(key);
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, value)?;
        fs::rename(&tmp, &path)?;
        Ok(())
    }

    fn remove_item(&mut self, key: &str) -> Result<(), StorageError> {
        match fs::remove_file(self.path_for(key)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn keys(&self) -> Result<Vec<String>, StorageError> {
        let mut keys = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let path = entry?.path();
            if path.extension().map(|e| e == "json").unwrap_or(false) {
                if let Some(key) = path
                    .file_stem()
                    .and_then(|s| s.to_str())
                    .and_then(decode_key)
                {
                    keys.push(key);
                }
            }
        }
        keys.sort();
        Ok(keys)
    }
}

/// Make a key safe to use as a file name; reversible via [`decode_key`].
fn encode_key(key: &str) -> String {
    let mut out = String::with_capacity(key.len());
    for byte in key.bytes() {
        if byte.is_ascii_alphanumeric() || byte == b'_' || byte == b'-' {
            out.push(byte as char);
        } else {
            out.push_str(&format!("%{byte:02X}"));
        }
    }
    out
}

fn decode_key(name: &str) -> Option<String> {
    let bytes = name.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' {
            let hex = name.get(i + 1..i + 3)?;
            out.push(u8::from_str_radix(hex, 16).ok()?);
            i += 3;
        } else {
            out.push(bytes[i]);
            i += 1;
        }
    }
    String::from_utf8(out).ok()
}

// ============================================================================
// PersistenceStore
// ============================================================================

/// Namespaced, capacity-bounded store for snapshots and preferences.
pub struct PersistenceStore {
    backend: Box<dyn StorageBackend>,
    prefix: String,
    max_items: usize,
}

impl PersistenceStore {
    /// Create a store over `backend`. `max_items` is clamped to at least 1.
    pub fn new(backend: impl StorageBackend + 'static, prefix: impl Into<String>, max_items: usize) -> Self {
        Self {
            backend: Box::new(backend),
            prefix: prefix.into(),
            max_items: max_items.max(1),
        }
    }

    /// An unbounded-quota in-memory store with default settings.
    pub fn in_memory() -> Self {
        Self::new(MemoryBackend::new(), DEFAULT_PREFIX, DEFAULT_MAX_ITEMS)
    }

    pub fn max_items(&self) -> usize {
        self.max_items
    }

    fn story_key(&self, id: &str) -> String {
        format!("{}{STORY_SEGMENT}{id}", self.prefix)
    }

    fn setting_key(&self, name: &str) -> String {
        format!("{}{SETTING_SEGMENT}{name}", self.prefix)
    }

    fn keys_with(&self, segment: &str) -> Vec<String> {
        let start = format!("{}{segment}", self.prefix);
        match self.backend.keys() {
            Ok(keys) => keys.into_iter().filter(|k| k.starts_with(&start)).collect(),
            Err(e) => {
                warn!(error = %e, "failed to enumerate storage keys");
                Vec::new()
            }
        }
    }

    /// Upsert a snapshot by story id, then evict beyond capacity.
    pub fn save(&mut self, snapshot: &StorySnapshot) -> bool {
        let content = match serde_json::to_string(snapshot) {
            Ok(content) => content,
            Err(e) => {
                warn!(story_id = snapshot.id(), error = %e, "failed to serialize snapshot");
                return false;
            }
        };

        let key = self.story_key(snapshot.id());
        if let Err(e) = self.backend.set_item(&key, &content) {
            warn!(story_id = snapshot.id(), error = %e, "failed to write snapshot");
            return false;
        }

        self.enforce_capacity();
        true
    }

    /// Keep only the `max_items` newest snapshots.
    fn enforce_capacity(&mut self) {
        let stale: Vec<String> = self
            .list()
            .iter()
            .skip(self.max_items)
            .map(|s| self.story_key(s.id()))
            .collect();

        for key in stale {
            debug!(key = %key, "evicting snapshot");
            if let Err(e) = self.backend.remove_item(&key) {
                warn!(key = %key, error = %e, "failed to evict snapshot");
            }
        }
    }

    /// Load a snapshot. Missing or malformed data yields `None`.
    pub fn get(&self, id: &str) -> Option<StorySnapshot> {
        self.read_snapshot(&self.story_key(id))
    }

    fn read_snapshot(&self, key: &str) -> Option<StorySnapshot> {
        let content = match self.backend.get_item(key) {
            Ok(Some(content)) => content,
            Ok(None) => return None,
            Err(e) => {
                warn!(key = %key, error = %e, "failed to read snapshot");
                return None;
            }
        };
        match serde_json::from_str(&content) {
            Ok(snapshot) => Some(snapshot),
            Err(e) => {
                debug!(key = %key, error = %e, "ignoring malformed snapshot");
                None
            }
        }
    }

    /// All readable snapshots, newest first.
    ///
    /// Equal timestamps keep the backend's key order, which is sorted by story id
    /// for both built-in backends, not the order the snapshots were saved in.
    pub fn list(&self) -> Vec<StorySnapshot> {
        let mut snapshots: Vec<StorySnapshot> = self
            .keys_with(STORY_SEGMENT)
            .iter()
            .filter_map(|key| self.read_snapshot(key))
            .collect();
        snapshots.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        snapshots
    }

    /// Remove a snapshot. Returns false only when the backend fails.
    pub fn delete(&mut self, id: &str) -> bool {
        let key = self.story_key(id);
        match self.backend.remove_item(&key) {
            Ok(()) => true,
            Err(e) => {
                warn!(key = %key, error = %e, "failed to delete snapshot");
                false
            }
        }
    }

    /// Remove every key under this store's prefix.
    pub fn clear(&mut self) {
        let keys: Vec<String> = match self.backend.keys() {
            Ok(keys) => keys
                .into_iter()
                .filter(|k| k.starts_with(&self.prefix))
                .collect(),
            Err(e) => {
                warn!(error = %e, "failed to enumerate storage keys");
                return;
            }
        };
        for key in keys {
            if let Err(e) = self.backend.remove_item(&key) {
                warn!(key = %key, error = %e, "failed to remove key");
            }
        }
    }

    /// Store a named setting.
    pub fn save_preference<T: Serialize + ?Sized>(&mut self, name: &str, value: &T) -> bool {
        let key = self.setting_key(name);
        let result = serde_json::to_string(value)
            .map_err(StorageError::from)
            .and_then(|content| self.backend.set_item(&key, &content));
        match result {
            Ok(()) => true,
            Err(e) => {
                warn!(key = %key, error = %e, "failed to save setting");
                false
            }
        }
    }

    /// Read a named setting, falling back to `default` when absent or unreadable.
    pub fn get_preference<T: DeserializeOwned>(&self, name: &str, default: T) -> T {
        let key = self.setting_key(name);
        match self.backend.get_item(&key) {
            Ok(Some(content)) => serde_json::from_str(&content).unwrap_or_else(|e| {
                debug!(key = %key, error = %e, "ignoring malformed setting");
                default
            }),
            Ok(None) => default,
            Err(e) => {
                warn!(key = %key, error = %e, "failed to read setting");
                default
            }
        }
    }

    pub fn preferences(&self) -> Preferences {
        self.get_preference(PREFERENCES_NAME, Preferences::default())
    }

    pub fn save_preferences(&mut self, preferences: &Preferences) -> bool {
        self.save_preference(PREFERENCES_NAME, preferences)
    }

    /// Bytes used by keys and values under this namespace. Diagnostics only.
    pub fn size(&self) -> usize {
        let keys = match self.backend.keys() {
            Ok(keys) => keys,
            Err(e) => {
                warn!(error = %e, "failed to enumerate storage keys");
                return 0;
            }
        };
        keys.iter()
            .filter(|k| k.starts_with(&self.prefix))
            .map(|k| {
                let value_len = self
                    .backend
                    .get_item(k)
                    .ok()
                    .flatten()
                    .map(|v| v.len())
                    .unwrap_or(0);
                k.len() + value_len
            })
            .sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::story::Scene;

    fn story(id: &str) -> Story {
        let mut story = Story::new(id, format!("Story {id}"), 5);
        story.append_scene(Scene::new("Start", "Once upon a time"));
        story
    }

    fn snapshot(id: &str, timestamp: i64) -> StorySnapshot {
        StorySnapshot::with_timestamp(story(id), BTreeMap::new(), timestamp)
    }

    fn ids(snapshots: &[StorySnapshot]) -> Vec<&str> {
        snapshots.iter().map(|s| s.id()).collect()
    }

    #[test]
    fn test_capacity_evicts_oldest() {
        let mut store = PersistenceStore::new(MemoryBackend::new(), "t_", 3);
        for (i, id) in ["a", "b", "c", "d"].iter().enumerate() {
            assert!(store.save(&snapshot(id, 100 + i as i64)));
        }

        let listed = store.list();
        assert_eq!(listed.len(), 3);
        assert_eq!(ids(&listed), vec!["d", "c", "b"]);
        assert!(store.get("a").is_none());
    }

    #[test]
    fn test_eviction_ignores_reads() {
        let mut store = PersistenceStore::new(MemoryBackend::new(), "t_", 2);
        store.save(&snapshot("old", 1));
        store.save(&snapshot("mid", 2));
        // Reading the oldest must not protect it.
        assert!(store.get("old").is_some());
        store.save(&snapshot("new", 3));
        assert!(store.get("old").is_none());
        assert!(store.get("mid").is_some());
    }

    #[test]
    fn test_save_upserts_by_id() {
        let mut store = PersistenceStore::in_memory();
        store.save(&snapshot("a", 1));
        let mut updated = snapshot("a", 2);
        updated.images.insert(0, "/images/a0.png".to_string());
        store.save(&updated);

        let listed = store.list();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].timestamp, 2);
        assert_eq!(listed[0].images[&0], "/images/a0.png");
    }

    #[test]
    fn test_list_ties_follow_key_order() {
        let mut store = PersistenceStore::in_memory();
        store.save(&snapshot("y", 5));
        store.save(&snapshot("x", 5));
        store.save(&snapshot("z", 9));
        assert_eq!(ids(&store.list()), vec!["z", "x", "y"]);
    }

    #[test]
    fn test_malformed_snapshot_is_absent() {
        let mut backend = MemoryBackend::new();
        backend.set_item("t_story_bad", "{not json").unwrap();
        let mut store = PersistenceStore::new(backend, "t_", 5);
        store.save(&snapshot("good", 1));

        assert!(store.get("bad").is_none());
        assert_eq!(ids(&store.list()), vec!["good"]);
    }

    #[test]
    fn test_quota_exceeded_returns_false() {
        let mut store = PersistenceStore::new(MemoryBackend::with_quota(64), "t_", 5);
        assert!(!store.save(&snapshot("big", 1)));
        assert!(store.get("big").is_none());
    }

    #[test]
    fn test_delete_and_clear_stay_in_namespace() {
        let mut backend = MemoryBackend::new();
        backend.set_item("other_key", "\"keep\"").unwrap();
        let mut store = PersistenceStore::new(backend, "t_", 5);
        store.save(&snapshot("a", 1));
        store.save(&snapshot("b", 2));
        store.save_preference("volume", &7);

        assert!(store.delete("a"));
        assert!(store.get("a").is_none());
        assert!(store.delete("missing"));

        store.clear();
        assert!(store.list().is_empty());
        assert_eq!(store.get_preference("volume", 0), 0);
        assert_eq!(store.backend.get_item("other_key").unwrap().as_deref(), Some("\"keep\""));
    }

    #[test]
    fn test_preferences_round_trip_and_default() {
        let mut store = PersistenceStore::in_memory();
        assert_eq!(store.preferences(), Preferences::default());

        let prefs = Preferences {
            narration_enabled: true,
            ..Preferences::default()
        };
        assert!(store.save_preferences(&prefs));
        assert_eq!(store.preferences(), prefs);

        assert_eq!(store.get_preference("missing", "fallback".to_string()), "fallback");
    }

    #[test]
    fn test_malformed_preference_uses_default() {
        let mut backend = MemoryBackend::new();
        backend.set_item("t_setting_speed", "\"fast\"").unwrap();
        let store = PersistenceStore::new(backend, "t_", 5);
        assert_eq!(store.get_preference::<u32>("speed", 3), 3);
    }

    #[test]
    fn test_size_counts_namespace_only() {
        let mut backend = MemoryBackend::new();
        backend.set_item("elsewhere", "0123456789").unwrap();
        let mut store = PersistenceStore::new(backend, "t_", 5);
        assert_eq!(store.size(), 0);

        store.save_preference("n", &1);
        assert_eq!(store.size(), "t_setting_n".len() + 1);
    }

    #[test]
    fn test_key_encoding_round_trip() {
        let key = "storybook_story_a/b c%";
        let encoded = encode_key(key);
        assert!(!encoded.contains('/'));
        assert_eq!(decode_key(&encoded).as_deref(), Some(key));
    }

    #[test]
    fn test_file_backend_persists_across_instances() {
        let temp_dir = tempfile::TempDir::new().expect("Failed to create temp dir");
        let dir = temp_dir.path().join("stories");

        {
            let backend = FileBackend::open(&dir).expect("open should succeed");
            let mut store = PersistenceStore::new(backend, DEFAULT_PREFIX, 3);
            assert!(store.save(&snapshot("disk", 42)));
        }

        let backend = FileBackend::open(&dir).expect("reopen should succeed");
        let store = PersistenceStore::new(backend, DEFAULT_PREFIX, 3);
        let loaded = store.get("disk").expect("snapshot should load");
        assert_eq!(loaded.timestamp, 42);
        assert_eq!(loaded.story.title, "Story disk");
        assert_eq!(ids(&store.list()), vec!["disk"]);
    }
}
