//! QA tests for saving, loading and evicting stories.
//!
//! These tests verify that reading sessions survive a restart and that the
//! store never holds more than its configured number of stories.
//! Run with: `cargo test -p storybook-core --test qa_persistence`

use std::time::Duration;
use storybook_core::store::{FileBackend, StorageBackend, DEFAULT_PREFIX};
use storybook_core::testing::{created_reply, image_reply, sample_story, scene_reply, TestHarness};
use storybook_core::{
    Endpoint, Genre, PersistenceStore, ReaderMode, SessionError, StoryController,
    StoryRequest, StorySnapshot, StorybookConfig,
};
use tempfile::TempDir;

fn file_store(dir: &TempDir, max_items: usize) -> PersistenceStore {
    let backend = FileBackend::open(dir.path()).expect("Failed to open storage directory");
    PersistenceStore::new(backend, DEFAULT_PREFIX, max_items)
}

// =============================================================================
// TEST 1: Save and reload across sessions
// =============================================================================

#[tokio::test]
async fn test_save_and_load_across_sessions() {
    let temp_dir = TempDir::new().expect("Failed to create temp directory");

    let mut first = TestHarness::with_store(file_store(&temp_dir, 10));
    first
        .backend
        .respond_always(Endpoint::GenerateSceneImage, image_reply("/images/cover.png"));
    first.start_reading(sample_story(3, 5)).await;
    first.settle().await;
    assert!(first.controller.save(), "Save should succeed");

    // A fresh session over the same directory.
    let mut second = TestHarness::with_store(file_store(&temp_dir, 10));
    let saved = second.controller.saved_stories();
    assert_eq!(saved.len(), 1);
    assert_eq!(saved[0].story.title, "The Lighthouse Cat");
    assert_eq!(saved[0].images.get(&0).map(String::as_str), Some("/images/cover.png"));

    let page = second.controller.load_saved("story-1").unwrap();
    assert_eq!(second.controller.mode(), ReaderMode::Reading);
    assert_eq!(page.index, 0);
    assert_eq!(page.illustration.url(), Some("/images/cover.png"));
    assert_eq!(second.controller.story().unwrap().page_count(), 3);
}

// =============================================================================
// TEST 2: Capacity eviction
// =============================================================================

#[test]
fn test_capacity_keeps_newest_stories() {
    let temp_dir = TempDir::new().expect("Failed to create temp directory");
    let mut store = file_store(&temp_dir, 3);

    for (i, timestamp) in [1_000, 2_000, 3_000, 4_000].into_iter().enumerate() {
        let mut story = sample_story(1, 3);
        story.id = format!("story-{i}");
        let snapshot = StorySnapshot::with_timestamp(story, Default::default(), timestamp);
        assert!(store.save(&snapshot));
    }

    let ids: Vec<String> = store.list().iter().map(|s| s.id().to_string()).collect();
    assert_eq!(ids, vec!["story-3", "story-2", "story-1"]);
    assert!(store.get("story-0").is_none());
}

// =============================================================================
// TEST 3: Malformed data
// =============================================================================

#[test]
fn test_malformed_snapshot_is_absent() {
    let temp_dir = TempDir::new().expect("Failed to create temp directory");
    let mut backend = FileBackend::open(temp_dir.path()).unwrap();
    backend
        .set_item("storybook_story_broken", "{\"story\": {\"story_id\"")
        .unwrap();

    let store = file_store(&temp_dir, 10);
    assert!(store.get("broken").is_none());
    assert!(store.list().is_empty());
}

#[tokio::test]
async fn test_load_missing_story_is_error() {
    let mut harness = TestHarness::new();
    let result = harness.controller.load_saved("nope");
    assert!(matches!(result, Err(SessionError::NotSaved(ref id)) if id == "nope"));
    assert_eq!(harness.controller.mode(), ReaderMode::Setup);
}

// =============================================================================
// TEST 4: Autosave
// =============================================================================

#[tokio::test]
async fn test_autosave_skipped_while_resolving() {
    let mut harness = TestHarness::new();
    harness
        .backend
        .respond(Endpoint::SceneFromChoice, scene_reply("Dawn", "The sun rose."));
    harness.start_reading(sample_story(2, 5)).await;

    assert!(harness.controller.select_choice(0));
    assert!(!harness.controller.autosave());
    assert!(harness.controller.saved_stories().is_empty());

    harness.settle().await;
    assert!(harness.controller.autosave());
    let saved = harness.controller.saved_stories();
    assert_eq!(saved[0].story.page_count(), 3);
}

#[tokio::test(start_paused = true)]
async fn test_autosave_runs_on_interval() {
    let mock = storybook_core::MockGenerator::new();
    mock.respond(Endpoint::CreateStory, created_reply(&sample_story(2, 5)));

    let config = StorybookConfig::new().with_autosave_interval(Duration::from_secs(5));
    let mut controller =
        StoryController::new(mock.generator(), PersistenceStore::in_memory()).with_config(&config);
    controller
        .create_story(StoryRequest::new("A cat who keeps a lighthouse"))
        .await
        .unwrap();

    for _ in 0..20 {
        if !controller.saved_stories().is_empty() {
            break;
        }
        controller.run_once().await;
    }
    assert_eq!(controller.saved_stories().len(), 1);
    assert_eq!(controller.pending_tasks(), 0);
}

// =============================================================================
// TEST 5: Preferences
// =============================================================================

#[tokio::test]
async fn test_preferences_survive_restart() {
    let temp_dir = TempDir::new().expect("Failed to create temp directory");

    let mut first = TestHarness::with_store(file_store(&temp_dir, 10));
    first
        .backend
        .respond(Endpoint::CreateStory, created_reply(&sample_story(3, 5)));
    first
        .controller
        .create_story(StoryRequest::new("A cat who keeps a lighthouse").with_genre(Genre::Mystery))
        .await
        .unwrap();

    let second = TestHarness::with_store(file_store(&temp_dir, 10));
    assert_eq!(second.controller.preferences().genre, Genre::Mystery);
    assert!(second.controller.preferences().auto_save);
}

#[tokio::test]
async fn test_delete_saved_story() {
    let mut harness = TestHarness::reading(sample_story(2, 5)).await;
    assert!(harness.controller.save());
    assert!(harness.controller.delete_saved("story-1"));
    assert!(harness.controller.saved_stories().is_empty());
}
