//! Reader configuration.

use crate::navigator::DEFAULT_SWIPE_THRESHOLD;
use crate::store::{
    FileBackend, MemoryBackend, PersistenceStore, StorageError, DEFAULT_MAX_ITEMS, DEFAULT_PREFIX,
};
use std::path::PathBuf;
use std::time::Duration;
use storybook_api::{
    Error as ApiError, StorybookApi, DEFAULT_BASE_URL, DEFAULT_CONNECT_TIMEOUT, DEFAULT_TIMEOUT,
};
use tracing::warn;

/// Default time between autosaves.
pub const DEFAULT_AUTOSAVE_INTERVAL: Duration = Duration::from_secs(30);

/// Configuration for a [`crate::StoryController`] and its collaborators.
#[derive(Debug, Clone, PartialEq)]
pub struct StorybookConfig {
    /// Backend base URL.
    pub api_url: String,

    /// Overall request timeout.
    pub request_timeout: Duration,

    pub connect_timeout: Duration,

    /// Namespace for every storage key.
    pub storage_prefix: String,

    /// Directory for saved stories. In-memory storage when unset.
    pub storage_dir: Option<PathBuf>,

    /// Saved stories kept before the oldest are evicted.
    pub max_saved_stories: usize,

    pub autosave_interval: Duration,

    /// Minimum horizontal swipe distance in pixels.
    pub swipe_threshold: f32,
}

impl Default for StorybookConfig {
    fn default() -> Self {
        Self {
            api_url: DEFAULT_BASE_URL.to_string(),
            request_timeout: DEFAULT_TIMEOUT,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            storage_prefix: DEFAULT_PREFIX.to_string(),
            storage_dir: None,
            max_saved_stories: DEFAULT_MAX_ITEMS,
            autosave_interval: DEFAULT_AUTOSAVE_INTERVAL,
            swipe_threshold: DEFAULT_SWIPE_THRESHOLD,
        }
    }
}

impl StorybookConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Read overrides from `STORYBOOK_*` environment variables.
    ///
    /// Unparseable values are logged and the default is kept.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`Self::from_env`] with an arbitrary variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(url) = lookup("STORYBOOK_API_URL") {
            config.api_url = url;
        }
        if let Some(dir) = lookup("STORYBOOK_STORAGE_DIR") {
            if !dir.trim().is_empty() {
                config.storage_dir = Some(PathBuf::from(dir));
            }
        }
        if let Some(raw) = lookup("STORYBOOK_MAX_SAVED") {
            match raw.trim().parse::<usize>() {
                Ok(n) if n > 0 => config.max_saved_stories = n,
                _ => warn!(value = %raw, "ignoring invalid STORYBOOK_MAX_SAVED"),
            }
        }
        if let Some(raw) = lookup("STORYBOOK_AUTOSAVE_SECS") {
            match raw.trim().parse::<u64>() {
                Ok(secs) if secs > 0 => config.autosave_interval = Duration::from_secs(secs),
                _ => warn!(value = %raw, "ignoring invalid STORYBOOK_AUTOSAVE_SECS"),
            }
        }

        config
    }

    /// Set the backend base URL.
    pub fn with_api_url(mut self, url: impl Into<String>) -> Self {
        self.api_url = url.into();
        self
    }

    pub fn with_timeouts(mut self, request: Duration, connect: Duration) -> Self {
        self.request_timeout = request;
        self.connect_timeout = connect;
        self
    }

    pub fn with_storage_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.storage_prefix = prefix.into();
        self
    }

    /// Keep saved stories on disk under `dir`.
    pub fn with_storage_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.storage_dir = Some(dir.into());
        self
    }

    pub fn with_max_saved_stories(mut self, max: usize) -> Self {
        self.max_saved_stories = max;
        self
    }

    pub fn with_autosave_interval(mut self, interval: Duration) -> Self {
        self.autosave_interval = interval;
        self
    }

    pub fn with_swipe_threshold(mut self, pixels: f32) -> Self {
        self.swipe_threshold = pixels;
        self
    }

    /// Build the HTTP client for the configured backend.
    pub fn build_api(&self) -> Result<StorybookApi, ApiError> {
        StorybookApi::with_timeouts(&self.api_url, self.request_timeout, self.connect_timeout)
    }

    /// Open the configured store: a directory if one is set, memory otherwise.
    pub fn open_store(&self) -> Result<PersistenceStore, StorageError> {
        let store = match &self.storage_dir {
            Some(dir) => PersistenceStore::new(
                FileBackend::open(dir)?,
                self.storage_prefix.clone(),
                self.max_saved_stories,
            ),
            None => PersistenceStore::new(
                MemoryBackend::new(),
                self.storage_prefix.clone(),
                self.max_saved_stories,
            ),
        };
        Ok(store)
    }
}
