//! The reading session.
//!
//! [`StoryController`] owns the story, the reading position and the choice
//! engine. Every network request runs as a task in a [`JoinSet`]; completions
//! are applied one at a time on the task that owns the controller, so state
//! is only ever mutated from one place.
//!
//! # Example
//!
//! ```no_run
//! use storybook_core::{StoryController, StorybookConfig, StoryRequest};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = StorybookConfig::from_env();
//! let mut controller = StoryController::from_config(&config)?;
//!
//! controller
//!     .create_story(StoryRequest::new("A shy dragon who learns to sing"))
//!     .await?;
//! controller.begin_reading()?;
//! controller.settle().await;
//!
//! if let Some(page) = controller.view() {
//!     println!("{}\n{}", page.title, page.text);
//! }
//! # Ok(())
//! # }
//! ```

use crate::choices::{ChoiceEngine, Resolution, SuggestionRequest};
use crate::config::StorybookConfig;
use crate::generation::{
    CharacterUpdate, ExportedFile, GeneratedImage, GeneratedScene, Generator, ImageOptions,
    StoryContext,
};
use crate::narration::{NarrationError, Narrator};
use crate::navigator::{BookNavigator, NavDirection, PageView, SwipeTracker};
use crate::preferences::{AgeGroup, ArtStyle, Genre, Preferences};
use crate::store::{PersistenceStore, StorageError, StorySnapshot};
use crate::story::{Choice, Story, StoryRequest};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use storybook_api::{Error as ApiError, ExportFormat};
use thiserror::Error;
use tokio::task::{JoinError, JoinSet};
use tokio::time::{Instant, Interval, MissedTickBehavior};
use tracing::{debug, info, instrument, warn};

/// Errors from controller operations.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("Invalid story request: {}", .0.join("; "))]
    Validation(Vec<String>),

    #[error("Backend error: {0}")]
    Api(#[from] ApiError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("No story loaded")]
    NoStory,

    #[error("No character named '{0}'")]
    UnknownCharacter(String),

    #[error("Characters are locked once reading starts")]
    CharactersLocked,

    #[error("No saved story with id '{0}'")]
    NotSaved(String),
}

impl SessionError {
    /// One sentence suitable for showing to the reader.
    pub fn user_message(&self) -> String {
        match self {
            SessionError::Validation(errors) => errors.join(". "),
            SessionError::Api(ApiError::Network(_)) => {
                "Could not reach the story server. Please check your connection and try again."
                    .to_string()
            }
            SessionError::Api(ApiError::Api { message, .. }) if !message.trim().is_empty() => {
                message.clone()
            }
            SessionError::Api(_) => {
                "The story server could not complete the request. Please try again.".to_string()
            }
            SessionError::Storage(_) => "Could not access saved stories.".to_string(),
            other => other.to_string(),
        }
    }
}

/// Which screen the session is on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReaderMode {
    Setup,
    CharacterLockIn,
    Reading,
}

/// Result of one background task.
#[derive(Debug)]
enum Completion {
    Suggestions {
        story_id: String,
        request: SuggestionRequest,
        result: Result<Vec<Choice>, ApiError>,
    },
    Scene {
        story_id: String,
        page: usize,
        ticket: u64,
        result: Result<GeneratedScene, ApiError>,
    },
    Image {
        story_id: String,
        index: usize,
        result: Result<GeneratedImage, ApiError>,
    },
    Narration(Result<(), NarrationError>),
}

/// Top-level reading session.
pub struct StoryController {
    generator: Generator,
    store: PersistenceStore,
    narrator: Option<Arc<dyn Narrator>>,
    preferences: Preferences,

    mode: ReaderMode,
    story: Option<Story>,
    navigator: BookNavigator,
    choices: ChoiceEngine,
    swipe: SwipeTracker,

    tasks: JoinSet<Completion>,
    /// Page indices with an image request in flight.
    pending_images: HashSet<usize>,
    autosave_period: Duration,
    autosave_timer: Option<Interval>,
    last_error: Option<String>,
}

impl StoryController {
    pub fn new(generator: Generator, store: PersistenceStore) -> Self {
        let preferences = store.preferences();
        Self {
            generator,
            store,
            narrator: None,
            preferences,
            mode: ReaderMode::Setup,
            story: None,
            navigator: BookNavigator::default(),
            choices: ChoiceEngine::new(),
            swipe: SwipeTracker::default(),
            tasks: JoinSet::new(),
            pending_images: HashSet::new(),
            autosave_period: crate::config::DEFAULT_AUTOSAVE_INTERVAL,
            autosave_timer: None,
            last_error: None,
        }
    }

    /// Build the HTTP client and store described by `config`.
    pub fn from_config(config: &StorybookConfig) -> Result<Self, SessionError> {
        let generator = Generator::new(config.build_api()?);
        let store = config.open_store()?;
        Ok(Self::new(generator, store).with_config(config))
    }

    /// Apply the autosave interval and swipe threshold from `config`.
    pub fn with_config(mut self, config: &StorybookConfig) -> Self {
        self.autosave_period = config.autosave_interval;
        self.autosave_timer = None;
        self.swipe = SwipeTracker::new(config.swipe_threshold);
        self
    }

    pub fn with_narrator(mut self, narrator: impl Narrator + 'static) -> Self {
        self.narrator = Some(Arc::new(narrator));
        self
    }

    // ------------------------------------------------------------------------
    // Accessors
    // ------------------------------------------------------------------------

    pub fn mode(&self) -> ReaderMode {
        self.mode
    }

    pub fn story(&self) -> Option<&Story> {
        self.story.as_ref()
    }

    pub fn navigator(&self) -> &BookNavigator {
        &self.navigator
    }

    pub fn choice_engine(&self) -> &ChoiceEngine {
        &self.choices
    }

    pub fn store(&self) -> &PersistenceStore {
        &self.store
    }

    pub fn preferences(&self) -> &Preferences {
        &self.preferences
    }

    pub fn current_page(&self) -> usize {
        self.navigator.current_page()
    }

    /// Choices displayed on the current page.
    pub fn choices(&self) -> &[Choice] {
        self.choices.displayed()
    }

    /// Background tasks not yet applied.
    pub fn pending_tasks(&self) -> usize {
        self.tasks.len()
    }

    /// Whether the next scene is being written right now.
    pub fn is_generating(&self) -> bool {
        self.choices.is_resolving()
    }

    /// The current page, if reading.
    pub fn view(&self) -> Option<PageView> {
        if self.mode != ReaderMode::Reading {
            return None;
        }
        let story = self.story.as_ref()?;
        self.navigator
            .display_page(story, self.navigator.current_page())
    }

    /// The last user-facing error, cleared on read.
    pub fn take_error(&mut self) -> Option<String> {
        self.last_error.take()
    }

    fn report(&mut self, error: SessionError) {
        warn!(error = %error, "surfacing error to reader");
        self.last_error = Some(error.user_message());
    }

    // ------------------------------------------------------------------------
    // Preferences
    // ------------------------------------------------------------------------

    pub fn set_preferences(&mut self, preferences: Preferences) -> bool {
        self.preferences = preferences;
        self.store.save_preferences(&self.preferences)
    }

    // ------------------------------------------------------------------------
    // Setup and character lock-in
    // ------------------------------------------------------------------------

    /// Generate a new story and move to character lock-in.
    ///
    /// Nothing is sent if the request does not validate. On failure the
    /// previous state is kept and the error is also available from
    /// [`Self::take_error`].
    #[instrument(skip(self, request), fields(scenes = request.num_scenes))]
    pub async fn create_story(&mut self, request: StoryRequest) -> Result<&Story, SessionError> {
        if let Err(errors) = request.validate() {
            let error = SessionError::Validation(errors);
            self.last_error = Some(error.user_message());
            return Err(error);
        }

        let mut story = match self.generator.create_story(&request).await {
            Ok(story) => story,
            Err(e) => {
                let error = SessionError::Api(e);
                self.last_error = Some(error.user_message());
                return Err(error);
            }
        };

        story.age_group.get_or_insert_with(|| request.age_group.to_string());
        story.genre.get_or_insert_with(|| request.genre.to_string());

        self.preferences.age_group = request.age_group;
        self.preferences.genre = request.genre;
        self.preferences.art_style = request.art_style;
        if !self.store.save_preferences(&self.preferences) {
            warn!("failed to save preferences");
        }

        info!(story_id = %story.id, scenes = story.page_count(), "story created");
        self.install(story, ReaderMode::CharacterLockIn);
        self.story.as_ref().ok_or(SessionError::NoStory)
    }

    /// Edit a character before reading starts.
    pub async fn update_character(
        &mut self,
        name: &str,
        updates: CharacterUpdate,
    ) -> Result<(), SessionError> {
        if self.mode != ReaderMode::CharacterLockIn {
            return Err(SessionError::CharactersLocked);
        }
        let story = self.story.as_ref().ok_or(SessionError::NoStory)?;
        let character = story
            .character(name)
            .ok_or_else(|| SessionError::UnknownCharacter(name.to_string()))?;
        if updates.is_empty() {
            return Ok(());
        }

        let story_id = story.id.clone();
        let character_name = character.name.clone();
        self.generator
            .update_character(&story_id, &character_name, &updates)
            .await?;

        let character = self
            .story
            .as_mut()
            .and_then(|s| s.character_mut(&character_name))
            .ok_or_else(|| SessionError::UnknownCharacter(name.to_string()))?;
        if let Some(description) = updates.description {
            character.description = description;
        }
        if let Some(visual) = updates.visual_description {
            character.visual_description = visual;
        }
        if let Some(role) = updates.role {
            character.role = role;
        }
        Ok(())
    }

    /// Append `refinement` to a character's visual description.
    pub async fn refine_character(&mut self, name: &str, refinement: &str) -> Result<bool, SessionError> {
        let story = self.story.as_mut().ok_or(SessionError::NoStory)?;
        let story_id = story.id.clone();
        let character = story
            .character_mut(name)
            .ok_or_else(|| SessionError::UnknownCharacter(name.to_string()))?;
        if !character.refine_visual(refinement) {
            return Ok(false);
        }

        let updates = CharacterUpdate {
            visual_description: Some(character.visual_description.clone()),
            ..CharacterUpdate::default()
        };
        let character_name = character.name.clone();
        if let Err(e) = self
            .generator
            .update_character(&story_id, &character_name, &updates)
            .await
        {
            // The local refinement stands; the backend picks it up on the next full sync.
            warn!(character = %character_name, error = %e, "failed to send refinement");
        }
        Ok(true)
    }

    /// Ask the backend to refine a character from a reference image.
    pub async fn refine_character_from_image(
        &mut self,
        name: &str,
        image_path: &str,
    ) -> Result<(), SessionError> {
        let story = self.story.as_ref().ok_or(SessionError::NoStory)?;
        let character = story
            .character(name)
            .ok_or_else(|| SessionError::UnknownCharacter(name.to_string()))?;
        self.generator
            .refine_character(&story.id, &character.name, image_path)
            .await?;
        Ok(())
    }

    /// Lock the characters and open the book at page 0.
    pub fn begin_reading(&mut self) -> Result<PageView, SessionError> {
        let story = self.story.as_ref().ok_or(SessionError::NoStory)?;
        let pages = story.page_count();
        if pages == 0 {
            return Err(SessionError::NoStory);
        }

        self.mode = ReaderMode::Reading;
        self.navigator.reset(pages);
        self.choices.clear();
        self.on_page_changed(0);
        self.view().ok_or(SessionError::NoStory)
    }

    fn install(&mut self, story: Story, mode: ReaderMode) {
        self.navigator.reset(story.page_count());
        self.choices.reset();
        self.pending_images.clear();
        self.story = Some(story);
        self.mode = mode;
    }

    // ------------------------------------------------------------------------
    // Navigation
    // ------------------------------------------------------------------------

    pub fn next(&mut self) -> Option<usize> {
        self.navigate(|nav| nav.next())
    }

    pub fn previous(&mut self) -> Option<usize> {
        self.navigate(|nav| nav.previous())
    }

    pub fn go_to(&mut self, index: usize) -> Option<usize> {
        self.navigate(|nav| nav.go_to(index))
    }

    pub fn restart(&mut self) -> Option<usize> {
        self.navigate(|nav| nav.restart())
    }

    pub fn handle_gesture(&mut self, direction: NavDirection) -> Option<usize> {
        self.navigate(|nav| nav.turn(direction))
    }

    pub fn touch_start(&mut self, x: f32, y: f32) {
        self.swipe.touch_start(x, y);
    }

    pub fn touch_end(&mut self, x: f32, y: f32) -> Option<usize> {
        let direction = self.swipe.touch_end(x, y)?;
        self.handle_gesture(direction)
    }

    pub fn pointer_down(&mut self, x: f32) {
        self.swipe.pointer_down(x);
    }

    pub fn pointer_up(&mut self, x: f32) -> Option<usize> {
        let direction = self.swipe.pointer_up(x)?;
        self.handle_gesture(direction)
    }

    /// Open a page turn that an animated front end completes later.
    pub fn begin_page_turn(&mut self, direction: NavDirection) -> bool {
        if self.mode != ReaderMode::Reading {
            return false;
        }
        let current = self.navigator.current_page();
        let target = match direction {
            NavDirection::Next => current + 1,
            NavDirection::Previous => match current.checked_sub(1) {
                Some(target) => target,
                None => return false,
            },
        };
        self.navigator.begin_transition(target)
    }

    pub fn finish_page_turn(&mut self) -> Option<usize> {
        let index = self.navigator.finish_transition()?;
        self.on_page_changed(index);
        Some(index)
    }

    fn navigate(&mut self, turn: impl FnOnce(&mut BookNavigator) -> Option<usize>) -> Option<usize> {
        if self.mode != ReaderMode::Reading {
            debug!("navigation ignored outside reading mode");
            return None;
        }
        let index = turn(&mut self.navigator)?;
        self.on_page_changed(index);
        Some(index)
    }

    fn on_page_changed(&mut self, index: usize) {
        debug!(page = index, "page displayed");
        self.choices.clear();
        self.ensure_image(index);
        self.refresh_choices();
    }

    /// The front end could not load the current page's image.
    pub fn image_load_failed(&mut self, index: usize) -> bool {
        self.navigator.image_failed(index)
    }

    // ------------------------------------------------------------------------
    // Choices
    // ------------------------------------------------------------------------

    /// Start choice generation for the current page when it should show choices.
    fn refresh_choices(&mut self) {
        let Some(story) = self.story.as_ref() else {
            return;
        };
        let page = self.navigator.current_page();
        if !ChoiceEngine::should_show(story, page) || self.choices.displayed_page() == Some(page) {
            return;
        }
        let Some(scene) = story.scene(page).cloned() else {
            return;
        };
        let Some(request) = self.choices.generate_choices(page) else {
            return;
        };

        let story_id = story.id.clone();
        let context = self.story_context();
        let generator = self.generator.clone();
        self.tasks.spawn(async move {
            let result = generator.story_choices(&scene, context).await;
            Completion::Suggestions {
                story_id,
                request,
                result,
            }
        });
    }

    /// Select a displayed choice. Returns true if a scene request was started.
    pub fn select_choice(&mut self, index: usize) -> bool {
        if self.mode != ReaderMode::Reading {
            return false;
        }
        let Some(story) = self.story.as_ref() else {
            return false;
        };
        let Some(resolution) = self.choices.select_choice(index) else {
            return false;
        };

        info!(page = resolution.page, choice = %resolution.choice.title, "resolving choice");
        let story_id = story.id.clone();
        let previous_scenes = story.scenes.clone();
        let context = self.story_context();
        let generator = self.generator.clone();
        let Resolution { page, ticket, choice } = resolution;
        self.tasks.spawn(async move {
            let result = generator
                .scene_from_choice(&story_id, &previous_scenes, &choice, context)
                .await;
            Completion::Scene {
                story_id,
                page,
                ticket,
                result,
            }
        });
        true
    }

    fn story_context(&self) -> StoryContext {
        let mut context = StoryContext::from(&self.preferences);
        if let Some(story) = &self.story {
            if let Some(genre) = story.genre.as_deref().and_then(|g| g.parse::<Genre>().ok()) {
                context.genre = genre;
            }
            if let Some(age) = story
                .age_group
                .as_deref()
                .and_then(|a| a.parse::<AgeGroup>().ok())
            {
                context.age_group = age;
            }
            if let Ok(style) = story.style.parse::<ArtStyle>() {
                context.art_style = style;
            }
        }
        context
    }

    // ------------------------------------------------------------------------
    // Images
    // ------------------------------------------------------------------------

    fn ensure_image(&mut self, index: usize) {
        let missing = self
            .story
            .as_ref()
            .and_then(|s| s.scene(index))
            .is_some_and(|scene| scene.image_url.is_none());
        if missing && !self.pending_images.contains(&index) {
            self.request_image(index, false, None);
        }
    }

    /// Generate the image for page `index`, even if one is already pending.
    pub fn generate_scene_image(&mut self, index: usize) -> bool {
        self.request_image(index, false, None)
    }

    /// Replace the image for page `index` with a freshly generated one.
    pub fn regenerate_image(&mut self, index: usize) -> bool {
        self.request_image(index, true, None)
    }

    /// Repaint page `index` from a reader-supplied description.
    pub fn regenerate_image_with_prompt(&mut self, index: usize, prompt: &str) -> bool {
        let prompt = prompt.trim();
        if prompt.is_empty() {
            return self.regenerate_image(index);
        }
        self.request_image(index, true, Some(prompt.to_string()))
    }

    fn request_image(&mut self, index: usize, regenerate: bool, prompt: Option<String>) -> bool {
        let Some(story) = self.story.as_ref() else {
            return false;
        };
        let Some(scene) = story.scene(index) else {
            debug!(index, "no scene for image request");
            return false;
        };

        let style = self.story_context().art_style;
        let mut options = ImageOptions::new(style);
        if regenerate {
            options = options.regenerate();
        }
        if let Some(prompt) = prompt {
            options = options.with_prompt(prompt);
        }
        let story_id = story.id.clone();
        let scene_number = scene.scene_number;
        let generator = self.generator.clone();
        self.pending_images.insert(index);
        self.tasks.spawn(async move {
            let result = generator
                .generate_scene_image(&story_id, scene_number, &options)
                .await;
            Completion::Image {
                story_id,
                index,
                result,
            }
        });
        true
    }

    /// Regenerate every image of the story on the backend and apply the results.
    pub async fn regenerate_all_images(&mut self) -> Result<usize, SessionError> {
        let story_id = self.story.as_ref().ok_or(SessionError::NoStory)?.id.clone();
        let results = self.generator.regenerate_all_images(&story_id).await?;

        let Some(story) = self.story.as_mut().filter(|s| s.id == story_id) else {
            return Ok(0);
        };
        let mut updated = 0;
        for result in results.into_iter().filter(|r| r.success) {
            let Some(url) = result.image_url else { continue };
            let Some(index) = story.scenes.iter().position(|s| s.scene_number == result.scene)
            else {
                continue;
            };
            if story.set_image(index, url) {
                self.navigator.image_replaced(index);
                updated += 1;
            }
        }
        Ok(updated)
    }

    // ------------------------------------------------------------------------
    // Background tasks
    // ------------------------------------------------------------------------

    /// Wait for one background task and apply its result.
    ///
    /// Returns false when nothing was in flight.
    pub async fn pump(&mut self) -> bool {
        match self.tasks.join_next().await {
            Some(joined) => {
                self.apply_joined(joined);
                true
            }
            None => false,
        }
    }

    /// Apply every background task, including ones started along the way.
    pub async fn settle(&mut self) {
        while self.pump().await {}
    }

    /// Apply one completion or run the autosave, whichever comes first.
    pub async fn run_once(&mut self) {
        let period = self.autosave_period;
        let interval = self.autosave_timer.get_or_insert_with(|| {
            let mut interval = tokio::time::interval_at(Instant::now() + period, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            interval
        });

        tokio::select! {
            Some(joined) = self.tasks.join_next(), if !self.tasks.is_empty() => {
                self.apply_joined(joined);
            }
            _ = interval.tick() => {
                self.autosave();
            }
        }
    }

    fn apply_joined(&mut self, joined: Result<Completion, JoinError>) {
        match joined {
            Ok(completion) => self.apply(completion),
            Err(e) => warn!(error = %e, "background task failed"),
        }
    }

    fn is_current_story(&self, story_id: &str) -> bool {
        self.story.as_ref().is_some_and(|s| s.id == story_id)
    }

    fn apply(&mut self, completion: Completion) {
        match completion {
            Completion::Suggestions {
                story_id,
                request,
                result,
            } => {
                if !self.is_current_story(&story_id) {
                    debug!(%story_id, "discarding choices for another story");
                    return;
                }
                self.choices.apply_suggestions(request, result);
            }

            Completion::Scene {
                story_id,
                page,
                ticket,
                result,
            } => {
                if !self.is_current_story(&story_id) {
                    debug!(%story_id, "discarding scene for another story");
                    return;
                }
                // Reinstalling the story (even the same one) resets the engine.
                if !self.choices.finish_resolution(ticket) {
                    debug!(%story_id, ticket, "discarding scene from an earlier session");
                    return;
                }
                match result {
                    Ok(generated) => self.append_generated(page, generated),
                    Err(e) => {
                        self.report(SessionError::Api(e));
                        self.refresh_choices();
                    }
                }
            }

            Completion::Image {
                story_id,
                index,
                result,
            } => {
                if !self.is_current_story(&story_id) {
                    debug!(%story_id, index, "discarding image for another story");
                    return;
                }
                self.pending_images.remove(&index);
                match result {
                    Ok(image) => {
                        if let Some(story) = self.story.as_mut() {
                            if story.set_image(index, image.image_url) {
                                self.navigator.image_replaced(index);
                            }
                        }
                    }
                    Err(e) => warn!(index, error = %e, "image generation failed"),
                }
            }

            Completion::Narration(result) => {
                if let Err(e) = result {
                    warn!(error = %e, "narration failed");
                }
            }
        }
    }

    fn append_generated(&mut self, page: usize, generated: GeneratedScene) {
        let Some(story) = self.story.as_mut() else {
            return;
        };
        let index = self.navigator.add_scene_to_story(story, generated.scene);

        if generated.is_final {
            story.total_planned_scenes = story.page_count();
        } else if let Some(remaining) = generated.scenes_remaining {
            if let Ok(remaining) = usize::try_from(remaining) {
                story.total_planned_scenes = story.page_count() + remaining;
            }
        }
        info!(
            story_id = %story.id,
            index,
            planned = story.total_planned_scenes,
            "scene appended"
        );

        self.request_image(index, false, None);

        let still_on_page =
            self.navigator.current_page() == page && !self.navigator.is_transitioning();
        if still_on_page && self.navigator.go_to(index).is_some() {
            self.on_page_changed(index);
        } else {
            self.refresh_choices();
        }
    }

    // ------------------------------------------------------------------------
    // Saving
    // ------------------------------------------------------------------------

    /// Periodic save. Skipped when auto-save is off or a scene is being generated.
    pub fn autosave(&mut self) -> bool {
        if !self.preferences.auto_save {
            return false;
        }
        if self.is_generating() {
            debug!("autosave skipped, generation in flight");
            return false;
        }
        self.save()
    }

    /// Save a snapshot of the current story now.
    pub fn save(&mut self) -> bool {
        let Some(story) = self.story.as_ref() else {
            return false;
        };
        let snapshot = StorySnapshot::new(story.clone(), story.images());
        let saved = self.store.save(&snapshot);
        if saved {
            debug!(story_id = %story.id, "story saved");
        }
        saved
    }

    /// Saved stories, newest first.
    pub fn saved_stories(&self) -> Vec<StorySnapshot> {
        self.store.list()
    }

    /// Reopen a saved story at page 0.
    pub fn load_saved(&mut self, id: &str) -> Result<PageView, SessionError> {
        let snapshot = self
            .store
            .get(id)
            .ok_or_else(|| SessionError::NotSaved(id.to_string()))?;

        let mut story = snapshot.story;
        for (index, url) in snapshot.images {
            if story.scene(index).is_some_and(|s| s.image_url.is_none()) {
                story.set_image(index, url);
            }
        }

        info!(story_id = %story.id, "loaded saved story");
        self.install(story, ReaderMode::Reading);
        self.on_page_changed(0);
        self.view().ok_or(SessionError::NoStory)
    }

    /// Fetch a story kept by the backend and open it at character lock-in.
    pub async fn open_remote(&mut self, id: &str) -> Result<&Story, SessionError> {
        let story = self.generator.get_story(id).await?;
        self.install(story, ReaderMode::CharacterLockIn);
        self.story.as_ref().ok_or(SessionError::NoStory)
    }

    pub fn delete_saved(&mut self, id: &str) -> bool {
        self.store.delete(id)
    }

    // ------------------------------------------------------------------------
    // Collaborators
    // ------------------------------------------------------------------------

    pub async fn export(&self, format: ExportFormat) -> Result<ExportedFile, SessionError> {
        let story = self.story.as_ref().ok_or(SessionError::NoStory)?;
        let file = self
            .generator
            .export(&story.id, &story.images(), format)
            .await?;
        info!(file = %file.file, "story exported");
        Ok(file)
    }

    /// Read the current page aloud when narration is enabled.
    pub fn narrate_current_page(&mut self) -> bool {
        if !self.preferences.narration_enabled {
            return false;
        }
        let Some(narrator) = self.narrator.clone() else {
            return false;
        };
        let Some(page) = self.view() else {
            return false;
        };

        self.tasks.spawn(async move {
            Completion::Narration(narrator.play_text(&page.text).await)
        });
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{sample_story, MockGenerator};
    use serde_json::json;
    use storybook_api::Endpoint;

    fn controller(mock: &MockGenerator) -> StoryController {
        StoryController::new(Generator::new(mock.clone()), PersistenceStore::in_memory())
    }

    fn reading(mock: &MockGenerator, story: Story) -> StoryController {
        let mut controller = controller(mock);
        controller.install(story, ReaderMode::CharacterLockIn);
        controller
    }

    #[test]
    fn test_user_message() {
        let network = SessionError::Api(ApiError::Network("refused".into()));
        assert!(network.user_message().contains("connection"));

        let server = SessionError::Api(ApiError::Api {
            status: 500,
            message: "Story generation failed".into(),
        });
        assert_eq!(server.user_message(), "Story generation failed");

        let invalid = SessionError::Validation(vec!["a".into(), "b".into()]);
        assert_eq!(invalid.user_message(), "a. b");
    }

    #[tokio::test]
    async fn test_invalid_request_sends_nothing() {
        let mock = MockGenerator::new();
        let mut controller = controller(&mock);

        let result = controller.create_story(StoryRequest::new("short")).await;
        assert!(matches!(result, Err(SessionError::Validation(_))));
        assert!(mock.calls().is_empty());
        assert!(controller.take_error().is_some());
        assert_eq!(controller.mode(), ReaderMode::Setup);
    }

    #[tokio::test]
    async fn test_navigation_outside_reading_is_ignored() {
        let mock = MockGenerator::new();
        let mut controller = reading(&mock, sample_story(3, 5));
        assert_eq!(controller.next(), None);
        assert!(!controller.select_choice(0));
        assert!(controller.view().is_none());
    }

    #[tokio::test]
    async fn test_lazy_image_requested_once() {
        let mock = MockGenerator::new();
        let mut controller = reading(&mock, sample_story(3, 5));
        controller.begin_reading().unwrap();
        controller.next();
        controller.previous();
        controller.settle().await;

        // Page 0 is still pending when the reader returns to it.
        let first_page_requests = mock
            .calls()
            .iter()
            .filter(|c| c.endpoint == Endpoint::GenerateSceneImage)
            .filter(|c| c.payload["scene_number"] == 1)
            .count();
        assert_eq!(first_page_requests, 1);
        assert_eq!(controller.pending_tasks(), 0);
    }

    #[tokio::test]
    async fn test_image_applies_to_story_after_navigation() {
        let mock = MockGenerator::new();
        mock.respond_always(
            Endpoint::GenerateSceneImage,
            json!({"success": true, "image_url": "/images/first.png"}),
        );
        let mut controller = reading(&mock, sample_story(3, 5));
        controller.begin_reading().unwrap();
        controller.next();
        controller.settle().await;

        let story = controller.story().unwrap();
        assert_eq!(story.scenes[0].image_url.as_deref(), Some("/images/first.png"));
        assert_eq!(controller.current_page(), 1);
    }

    #[tokio::test]
    async fn test_autosave_respects_preference() {
        let mock = MockGenerator::new();
        let mut controller = reading(&mock, sample_story(2, 5));
        assert!(controller.autosave());
        assert_eq!(controller.saved_stories().len(), 1);

        let preferences = Preferences {
            auto_save: false,
            ..Preferences::default()
        };
        controller.set_preferences(preferences);
        assert!(!controller.autosave());
        assert!(controller.save());
    }

    #[tokio::test]
    async fn test_narration_only_when_enabled() {
        let mock = MockGenerator::new();
        let narrator = crate::testing::RecordingNarrator::new();
        let mut controller = reading(&mock, sample_story(2, 5)).with_narrator(narrator.clone());
        controller.begin_reading().unwrap();
        assert!(!controller.narrate_current_page());

        controller.set_preferences(Preferences {
            narration_enabled: true,
            ..Preferences::default()
        });
        assert!(controller.narrate_current_page());
        controller.settle().await;
        assert_eq!(narrator.spoken().len(), 1);
        assert_eq!(narrator.spoken()[0], controller.story().unwrap().scenes[0].text);
    }
}
