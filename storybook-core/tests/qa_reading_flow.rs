//! QA tests for the reading flow: setup, lock-in, page turns and choices.
//!
//! Everything runs against `MockGenerator`, so no backend is needed.
//! Run with: `cargo test -p storybook-core --test qa_reading_flow`

use serde_json::json;
use storybook_core::generation::CharacterUpdate;
use storybook_core::testing::{
    assert_choices_shown, assert_no_choices, assert_on_page, assert_pages, created_reply,
    image_reply, sample_story, scene_reply, TestHarness,
};
use storybook_core::{
    ApiError, ChoiceState, Endpoint, Illustration, NavDirection, NavState, ReaderMode,
    SessionError, StoryRequest,
};

// =============================================================================
// SETUP AND LOCK-IN
// =============================================================================

#[tokio::test]
async fn test_create_story_enters_lock_in() {
    let mut harness = TestHarness::new();
    let story = sample_story(3, 5);
    harness
        .backend
        .respond(Endpoint::CreateStory, created_reply(&story));

    let request = StoryRequest::new("A cat who keeps a lighthouse")
        .with_genre("fantasy".parse().unwrap())
        .with_scenes(5);
    let created = harness.controller.create_story(request).await.unwrap();
    assert_eq!(created.id, "story-1");

    assert_eq!(harness.controller.mode(), ReaderMode::CharacterLockIn);
    assert!(harness.controller.view().is_none());
    assert_eq!(
        harness.controller.preferences().genre.as_str(),
        "fantasy",
        "preferences follow the last request"
    );

    let payload = &harness.backend.calls()[0].payload;
    assert_eq!(payload["prompt"], "A cat who keeps a lighthouse");
    assert_eq!(payload["num_scenes"], 5);
}

#[tokio::test]
async fn test_create_story_failure_installs_nothing() {
    let mut harness = TestHarness::new();
    harness.backend.fail(
        Endpoint::CreateStory,
        ApiError::Api {
            status: 500,
            message: "Story generation failed".into(),
        },
    );

    let result = harness
        .controller
        .create_story(StoryRequest::new("A cat who keeps a lighthouse"))
        .await;
    assert!(matches!(result, Err(SessionError::Api(_))));
    assert!(harness.controller.story().is_none());
    assert_eq!(harness.controller.mode(), ReaderMode::Setup);
    assert_eq!(
        harness.controller.take_error().as_deref(),
        Some("Story generation failed")
    );
    assert_eq!(harness.controller.take_error(), None);
}

#[tokio::test]
async fn test_character_edits_locked_after_reading_starts() {
    let mut harness = TestHarness::new();
    let story = sample_story(3, 5);
    harness
        .backend
        .respond(Endpoint::CreateStory, created_reply(&story))
        .respond_always(Endpoint::UpdateCharacter, json!({"success": true}));
    harness
        .controller
        .create_story(StoryRequest::new("A cat who keeps a lighthouse"))
        .await
        .unwrap();

    let updates = CharacterUpdate {
        role: Some("protagonist".into()),
        ..CharacterUpdate::default()
    };
    harness
        .controller
        .update_character("milo", updates.clone())
        .await
        .unwrap();
    let milo = harness.controller.story().unwrap().character("Milo").unwrap();
    assert_eq!(milo.role, "protagonist");

    let unknown = harness
        .controller
        .update_character("Nobody", updates.clone())
        .await;
    assert!(matches!(unknown, Err(SessionError::UnknownCharacter(_))));

    harness.controller.begin_reading().unwrap();
    let locked = harness.controller.update_character("Milo", updates).await;
    assert!(matches!(locked, Err(SessionError::CharactersLocked)));

    // Refinement is still allowed and only appends.
    assert!(harness
        .controller
        .refine_character("Milo", "with a tiny lantern")
        .await
        .unwrap());
    let milo = harness.controller.story().unwrap().character("Milo").unwrap();
    assert_eq!(
        milo.visual_description,
        "orange tabby with a blue scarf with a tiny lantern"
    );
}

// =============================================================================
// NAVIGATION
// =============================================================================

#[tokio::test]
async fn test_page_turns_and_export_visibility() {
    let mut harness = TestHarness::reading(sample_story(3, 3)).await;
    let first = harness.controller.view().unwrap();
    assert!(!first.show_export);
    assert_eq!(first.label(), "Page 1 of 3");

    assert_eq!(harness.controller.previous(), None);
    assert_eq!(harness.controller.next(), Some(1));
    assert_eq!(harness.controller.handle_gesture(NavDirection::Next), Some(2));
    assert_eq!(harness.controller.next(), None);
    assert_on_page(&harness, 2);

    let last = harness.controller.view().unwrap();
    assert!(last.show_export);
    assert!(!last.show_choices, "last planned page never shows choices");
    assert_no_choices(&harness);

    assert_eq!(harness.controller.restart(), Some(0));
    assert_choices_shown(&harness);
}

#[tokio::test]
async fn test_no_page_turn_while_transitioning() {
    let mut harness = TestHarness::reading(sample_story(3, 5)).await;

    assert!(harness.controller.begin_page_turn(NavDirection::Next));
    assert_eq!(harness.controller.next(), None);
    assert_eq!(harness.controller.go_to(2), None);
    assert_eq!(
        harness.controller.navigator().state(),
        NavState::Transitioning { from: 0, to: 1 }
    );

    assert_eq!(harness.controller.finish_page_turn(), Some(1));
    assert_on_page(&harness, 1);
    assert!(harness.controller.begin_page_turn(NavDirection::Previous));
    assert_eq!(harness.controller.finish_page_turn(), Some(0));
}

#[tokio::test]
async fn test_swipe_turns_pages() {
    let mut harness = TestHarness::reading(sample_story(3, 5)).await;

    harness.controller.touch_start(300.0, 200.0);
    assert_eq!(harness.controller.touch_end(180.0, 210.0), Some(1));

    harness.controller.pointer_down(100.0);
    assert_eq!(harness.controller.pointer_up(130.0), None);
    assert_on_page(&harness, 1);

    harness.controller.pointer_down(100.0);
    assert_eq!(harness.controller.pointer_up(200.0), Some(0));
}

#[tokio::test]
async fn test_image_result_applies_after_navigation() {
    let mut harness = TestHarness::new();
    harness
        .backend
        .respond_always(Endpoint::GenerateSceneImage, image_reply("/images/scene.png"));
    harness.start_reading(sample_story(3, 5)).await;

    harness.controller.next();
    harness.settle().await;

    let story = harness.controller.story().unwrap();
    assert_eq!(story.scenes[0].image_url.as_deref(), Some("/images/scene.png"));
    assert_on_page(&harness, 1);
    assert_eq!(
        harness.controller.view().unwrap().illustration,
        Illustration::Image("/images/scene.png".into())
    );
    assert_eq!(harness.requests_to(&Endpoint::GenerateSceneImage), 2);
}

#[tokio::test]
async fn test_regenerate_image_always_requests() {
    let mut harness = TestHarness::new();
    harness
        .backend
        .respond(Endpoint::GenerateSceneImage, image_reply("/images/first.png"))
        .respond(Endpoint::GenerateSceneImage, image_reply("/images/second.png"));
    harness.start_reading(sample_story(3, 5)).await;
    harness.settle().await;

    assert!(harness.controller.regenerate_image(0));
    harness.settle().await;

    let calls = harness.backend.calls_to(&Endpoint::GenerateSceneImage);
    assert_eq!(calls.len(), 2);
    assert_eq!(calls[1].payload["regenerate"], true);
    let story = harness.controller.story().unwrap();
    assert_eq!(story.scenes[0].image_url.as_deref(), Some("/images/second.png"));
}

#[tokio::test]
async fn test_repaint_with_reader_prompt() {
    let mut harness = TestHarness::new();
    harness
        .backend
        .respond_always(Endpoint::GenerateSceneImage, image_reply("/images/moonlit.png"));
    harness.start_reading(sample_story(3, 5)).await;
    harness.settle().await;

    assert!(harness
        .controller
        .regenerate_image_with_prompt(0, "  the lighthouse under a full moon "));
    assert!(!harness.controller.regenerate_image_with_prompt(9, "nowhere"));
    harness.settle().await;

    let calls = harness.backend.calls_to(&Endpoint::GenerateSceneImage);
    assert_eq!(calls.len(), 2);
    assert!(calls[0].payload.get("custom_prompt").is_none());
    assert_eq!(calls[1].payload["custom_prompt"], "the lighthouse under a full moon");
    assert_eq!(calls[1].payload["regenerate"], true);
}

// =============================================================================
// CHOICES
// =============================================================================

#[tokio::test]
async fn test_server_choices_replace_defaults() {
    let mut harness = TestHarness::new();
    harness.backend.respond(
        Endpoint::StoryChoices,
        json!({"choices": [
            {"title": "Follow the gulls", "description": "Up the cliffs", "icon": "🐦", "type": "adventure"},
            {"title": "Ask the moon", "description": "A quiet wish", "icon": "🌙", "type": "wishful"}
        ]}),
    );
    harness.start_reading(sample_story(2, 5)).await;
    assert_eq!(harness.controller.choices().len(), 4, "defaults shown immediately");

    harness.settle().await;
    let choices = harness.controller.choices();
    assert_eq!(choices.len(), 2);
    assert_eq!(choices[0].title, "Follow the gulls");
    assert_eq!(choices[1].kind.as_str(), "original");
    assert!(matches!(
        harness.controller.choice_engine().state(),
        ChoiceState::Displaying { page: 0, .. }
    ));
}

#[tokio::test]
async fn test_stale_choices_are_discarded() {
    let mut harness = TestHarness::new();
    harness.backend.respond(
        Endpoint::StoryChoices,
        json!({"choices": [{"title": "Too late", "type": "surprise"}]}),
    );
    harness.start_reading(sample_story(3, 5)).await;

    // Page 1 has a scene after it, so it shows no choices.
    harness.controller.next();
    harness.settle().await;

    assert_no_choices(&harness);
    assert_eq!(
        harness.controller.choice_engine().state(),
        &ChoiceState::Idle
    );
}

#[tokio::test]
async fn test_double_select_appends_once() {
    let mut harness = TestHarness::new();
    harness
        .backend
        .respond(Endpoint::SceneFromChoice, scene_reply("The Storm", "Thunder rolled."))
        .respond(Endpoint::SceneFromChoice, scene_reply("Again", "Should not appear."));
    harness.start_reading(sample_story(2, 5)).await;
    harness.controller.next();

    assert!(harness.controller.select_choice(0));
    assert!(!harness.controller.select_choice(0));
    assert!(!harness.controller.select_choice(1));
    assert!(harness.controller.is_generating());
    harness.settle().await;

    assert_pages(&harness, 3);
    assert_eq!(harness.requests_to(&Endpoint::SceneFromChoice), 1);
    assert_eq!(harness.scene_titles()[2], "The Storm");

    // The reader follows the new scene, which gets exactly one image request.
    assert_on_page(&harness, 2);
    let scene = &harness.controller.story().unwrap().scenes[2];
    assert_eq!(scene.scene_number, 3);
    let new_scene_images = harness
        .backend
        .calls_to(&Endpoint::GenerateSceneImage)
        .into_iter()
        .filter(|c| c.payload["scene_number"] == 3)
        .count();
    assert_eq!(new_scene_images, 1);

    let request = &harness.backend.calls_to(&Endpoint::SceneFromChoice)[0].payload;
    assert_eq!(request["previousScenes"].as_array().unwrap().len(), 2);
    assert_eq!(request["choice"]["type"], "original");
    assert_eq!(request["storyId"], "story-1");
}

#[tokio::test]
async fn test_reloading_mid_resolution_discards_earlier_scene() {
    let mut harness = TestHarness::new();
    harness
        .backend
        .respond_always(Endpoint::SceneFromChoice, scene_reply("Back Home", "The cat sailed home."));
    harness.start_reading(sample_story(2, 5)).await;
    harness.controller.next();
    assert!(harness.controller.save());

    assert!(harness.controller.select_choice(0));
    harness.controller.load_saved("story-1").unwrap();
    assert_on_page(&harness, 0);
    assert!(!harness.controller.is_generating());

    // The reloaded book offers choices again; this selection is the live one.
    assert!(harness.controller.select_choice(0));
    assert!(harness.controller.is_generating());

    // Generation ends exactly when the live scene lands, never on the earlier result.
    while harness.controller.pump().await {
        assert_eq!(
            harness.controller.is_generating(),
            harness.page_count() == 2,
            "generation flag out of step with the story"
        );
    }

    assert_eq!(harness.requests_to(&Endpoint::SceneFromChoice), 2);
    assert_pages(&harness, 3);
    assert_eq!(harness.scene_titles(), vec!["Scene 1", "Scene 2", "Back Home"]);
}

#[tokio::test]
async fn test_out_of_range_select_sends_nothing() {
    let mut harness = TestHarness::reading(sample_story(2, 5)).await;
    let before = harness.controller.story().unwrap().clone();

    assert!(!harness.controller.select_choice(4));
    harness.settle().await;

    assert_eq!(harness.requests_to(&Endpoint::SceneFromChoice), 0);
    assert_eq!(harness.controller.story().unwrap(), &before);
}

#[tokio::test]
async fn test_failed_resolution_leaves_story_unchanged() {
    let mut harness = TestHarness::new();
    harness.backend.fail(
        Endpoint::SceneFromChoice,
        ApiError::Network("connection reset".into()),
    );
    harness.start_reading(sample_story(2, 5)).await;
    harness.controller.next();

    assert!(harness.controller.select_choice(2));
    harness.settle().await;

    assert_pages(&harness, 2);
    assert_on_page(&harness, 1);
    let message = harness.controller.take_error().unwrap();
    assert!(message.contains("connection"), "{message}");
    assert!(!harness.controller.is_generating());
    assert_choices_shown(&harness);
}

#[tokio::test]
async fn test_final_scene_ends_choices() {
    let mut harness = TestHarness::new();
    harness.backend.respond(
        Endpoint::SceneFromChoice,
        json!({"scene": {"scene": {"title": "Home", "text": "The end."}, "is_final": true, "scenes_remaining": 0}}),
    );
    harness.start_reading(sample_story(2, 5)).await;
    harness.controller.next();
    harness.controller.select_choice(3);
    harness.settle().await;

    assert_on_page(&harness, 2);
    assert_eq!(harness.controller.story().unwrap().total_planned_scenes, 3);
    let page = harness.controller.view().unwrap();
    assert!(!page.show_choices);
    assert!(page.show_export);
    assert_no_choices(&harness);
}

#[tokio::test]
async fn test_single_planned_scene_never_shows_choices() {
    let harness = TestHarness::reading(sample_story(1, 1)).await;
    assert_no_choices(&harness);
    assert!(!harness.controller.view().unwrap().show_choices);
    assert_eq!(harness.requests_to(&Endpoint::StoryChoices), 0);
}

#[tokio::test]
async fn test_reader_elsewhere_is_not_moved() {
    let mut harness = TestHarness::new();
    harness
        .backend
        .respond(Endpoint::SceneFromChoice, scene_reply("Lantern", "A light appeared."));
    harness.start_reading(sample_story(2, 5)).await;

    // Choose on page 0, then wander to page 1 before the scene arrives.
    assert!(harness.controller.select_choice(1));
    harness.controller.next();
    harness.settle().await;

    assert_pages(&harness, 3);
    assert_on_page(&harness, 1);
    assert!(harness.controller.view().unwrap().can_go_next);
}

// =============================================================================
// EXPORT AND NARRATION
// =============================================================================

#[tokio::test]
async fn test_export_sends_image_map() {
    let mut harness = TestHarness::new();
    harness
        .backend
        .respond_always(Endpoint::GenerateSceneImage, image_reply("/images/p.png"))
        .respond(
            Endpoint::Export(storybook_core::ExportFormat::Pdf),
            json!({"success": true, "file": "/output/story-1.pdf", "filename": "story-1.pdf"}),
        );
    harness.start_reading(sample_story(2, 2)).await;
    harness.settle().await;

    let file = harness
        .controller
        .export(storybook_core::ExportFormat::Pdf)
        .await
        .unwrap();
    assert_eq!(file.filename, "story-1.pdf");

    let calls = harness
        .backend
        .calls_to(&Endpoint::Export(storybook_core::ExportFormat::Pdf));
    assert_eq!(calls[0].payload["images"]["0"], "/images/p.png");
}
