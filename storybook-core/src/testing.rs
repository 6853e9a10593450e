//! Testing utilities for the storybook engine.
//!
//! This module provides tools for integration testing:
//! - `MockGenerator` for deterministic testing without a backend
//! - `RecordingNarrator` to capture narrated text
//! - Story fixtures and `TestHarness` for scripted reading sessions
//! - Assertion helpers for verifying session state

use crate::controller::StoryController;
use crate::generation::{GenerationClient, Generator};
use crate::narration::{NarrationError, Narrator};
use crate::store::PersistenceStore;
use crate::story::{Character, Scene, Story, StoryRequest};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use storybook_api::{Endpoint, Error as ApiError};

/// One request seen by a [`MockGenerator`].
#[derive(Debug, Clone, PartialEq)]
pub struct MockCall {
    pub endpoint: Endpoint,
    /// Request body, `Value::Null` when none was sent.
    pub payload: Value,
}

#[derive(Default)]
struct MockState {
    /// One-shot replies, consumed in order.
    queued: HashMap<Endpoint, VecDeque<Result<Value, ApiError>>>,
    /// Reply used once the queue for an endpoint is empty.
    fallback: HashMap<Endpoint, Value>,
    calls: Vec<MockCall>,
}

/// A generation client that returns scripted replies.
///
/// Clones share the same script and call log, so a test can keep one handle
/// while the controller owns another. Endpoints with nothing scripted fail
/// with a network error.
#[derive(Clone, Default)]
pub struct MockGenerator {
    state: Arc<Mutex<MockState>>,
}

impl MockGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, MockState> {
        // A test that panicked while holding the lock already failed.
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Queue a one-shot reply for `endpoint`.
    pub fn respond(&self, endpoint: Endpoint, reply: Value) -> &Self {
        self.lock()
            .queued
            .entry(endpoint)
            .or_default()
            .push_back(Ok(reply));
        self
    }

    /// Queue a one-shot failure for `endpoint`.
    pub fn fail(&self, endpoint: Endpoint, error: ApiError) -> &Self {
        self.lock()
            .queued
            .entry(endpoint)
            .or_default()
            .push_back(Err(error));
        self
    }

    /// Reply with `reply` every time the queue for `endpoint` is empty.
    pub fn respond_always(&self, endpoint: Endpoint, reply: Value) -> &Self {
        self.lock().fallback.insert(endpoint, reply);
        self
    }

    /// Every request made so far, in order.
    pub fn calls(&self) -> Vec<MockCall> {
        self.lock().calls.clone()
    }

    /// Requests made to one endpoint.
    pub fn calls_to(&self, endpoint: &Endpoint) -> Vec<MockCall> {
        self.lock()
            .calls
            .iter()
            .filter(|c| &c.endpoint == endpoint)
            .cloned()
            .collect()
    }

    pub fn generator(&self) -> Generator {
        Generator::new(self.clone())
    }
}

#[async_trait]
impl GenerationClient for MockGenerator {
    async fn call(&self, endpoint: Endpoint, payload: Option<Value>) -> Result<Value, ApiError> {
        let mut state = self.lock();
        state.calls.push(MockCall {
            endpoint: endpoint.clone(),
            payload: payload.unwrap_or(Value::Null),
        });

        if let Some(reply) = state.queued.get_mut(&endpoint).and_then(|q| q.pop_front()) {
            return reply;
        }
        match state.fallback.get(&endpoint) {
            Some(reply) => Ok(reply.clone()),
            None => Err(ApiError::Network(format!(
                "no scripted reply for {}",
                endpoint.name()
            ))),
        }
    }
}

/// A narrator that remembers what it was asked to say.
#[derive(Clone, Default)]
pub struct RecordingNarrator {
    spoken: Arc<Mutex<Vec<String>>>,
}

impl RecordingNarrator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn spoken(&self) -> Vec<String> {
        match self.spoken.lock() {
            Ok(spoken) => spoken.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

#[async_trait]
impl Narrator for RecordingNarrator {
    async fn play_text(&self, text: &str) -> Result<(), NarrationError> {
        self.spoken
            .lock()
            .map_err(|_| NarrationError("recorder poisoned".to_string()))?
            .push(text.to_string());
        Ok(())
    }
}

// ============================================================================
// Fixtures
// ============================================================================

/// A story with `scenes` numbered scenes out of `planned`, and two characters.
pub fn sample_story(scenes: usize, planned: usize) -> Story {
    let mut story = Story::new("story-1", "The Lighthouse Cat", planned);
    story.genre = Some("adventure".to_string());
    story.age_group = Some("7-10".to_string());
    story.characters = vec![
        Character::new("Milo", "A curious cat", "orange tabby with a blue scarf"),
        Character::new("Grace", "The lighthouse keeper", "tall woman in a yellow raincoat"),
    ];
    for i in 0..scenes {
        story.append_scene(
            Scene::new(format!("Scene {}", i + 1), format!("Milo's adventure, part {}.", i + 1))
                .with_image_prompt(format!("A cat by the sea, part {}", i + 1)),
        );
    }
    story
}

/// Backend reply for story creation wrapping `story`.
pub fn created_reply(story: &Story) -> Value {
    json!({
        "success": true,
        "story_id": story.id,
        "story": story,
    })
}

/// Backend reply for a scene generated from a choice.
pub fn scene_reply(title: &str, text: &str) -> Value {
    json!({
        "success": true,
        "scene": {"scene": {"title": title, "text": text}, "is_final": false},
    })
}

pub fn image_reply(url: &str) -> Value {
    json!({"success": true, "image_url": url})
}

// ============================================================================
// Harness
// ============================================================================

/// Test harness for running reading sessions.
pub struct TestHarness {
    /// Shared handle on the controller's backend script.
    pub backend: MockGenerator,
    pub controller: StoryController,
}

impl TestHarness {
    /// A controller with in-memory storage and nothing loaded.
    pub fn new() -> Self {
        Self::with_store(PersistenceStore::in_memory())
    }

    pub fn with_store(store: PersistenceStore) -> Self {
        let backend = MockGenerator::new();
        let controller = StoryController::new(backend.generator(), store);
        Self {
            backend,
            controller,
        }
    }

    /// A harness already reading `story`.
    pub async fn reading(story: Story) -> Self {
        let mut harness = Self::new();
        harness.start_reading(story).await;
        harness
    }

    /// Create `story` through the mock backend and open it at page 0.
    ///
    /// Replies scripted beforehand are seen by the first page's requests.
    pub async fn start_reading(&mut self, story: Story) {
        self.backend
            .respond(Endpoint::CreateStory, created_reply(&story));
        let request = StoryRequest::new("A cat who lives in a lighthouse")
            .with_scenes(story.total_planned_scenes.clamp(3, 10) as u8);
        if let Err(e) = self.controller.create_story(request).await {
            panic!("story creation failed: {e}");
        }
        if let Err(e) = self.controller.begin_reading() {
            panic!("begin_reading failed: {e}");
        }
    }

    /// Apply every background result.
    pub async fn settle(&mut self) {
        self.controller.settle().await;
    }

    pub fn page_count(&self) -> usize {
        self.controller.story().map_or(0, |s| s.page_count())
    }

    pub fn scene_titles(&self) -> Vec<String> {
        self.controller
            .story()
            .map(|s| s.scenes.iter().map(|scene| scene.title.clone()).collect())
            .unwrap_or_default()
    }

    pub fn requests_to(&self, endpoint: &Endpoint) -> usize {
        self.backend.calls_to(endpoint).len()
    }
}

impl Default for TestHarness {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// Assertion Helpers
// ============================================================================

/// Assert the story has exactly `expected` pages.
#[track_caller]
pub fn assert_pages(harness: &TestHarness, expected: usize) {
    let actual = harness.page_count();
    assert_eq!(actual, expected, "Expected {expected} pages, got {actual}");
}

/// Assert the reader is on page `expected`.
#[track_caller]
pub fn assert_on_page(harness: &TestHarness, expected: usize) {
    let actual = harness.controller.current_page();
    assert_eq!(actual, expected, "Expected to be on page {expected}, got {actual}");
}

/// Assert choices are displayed on the current page.
#[track_caller]
pub fn assert_choices_shown(harness: &TestHarness) {
    assert!(
        !harness.controller.choices().is_empty(),
        "Expected choices on page {}",
        harness.controller.current_page()
    );
}

/// Assert no choices are displayed.
#[track_caller]
pub fn assert_no_choices(harness: &TestHarness) {
    assert!(
        harness.controller.choices().is_empty(),
        "Expected no choices on page {}, found {}",
        harness.controller.current_page(),
        harness.controller.choices().len()
    );
}
