//! The network boundary for story and image generation.
//!
//! [`GenerationClient`] is the single request primitive: an endpoint plus an
//! optional JSON payload in, JSON or a classified [`ApiError`] out. The HTTP
//! implementation lives in `storybook-api`; tests use
//! [`crate::testing::MockGenerator`]. [`Generator`] layers the typed operations
//! on top of the primitive. None of them retry.

use crate::preferences::{AgeGroup, ArtStyle, Genre, Preferences};
use crate::story::{Choice, Scene, Story, StoryRequest};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use storybook_api::{Endpoint, Error as ApiError, ExportFormat, StorybookApi};
use tracing::instrument;

/// Aspect ratio requested for scene illustrations.
pub const DEFAULT_ASPECT_RATIO: &str = "16:9";

/// Uniform request primitive over the generation backend.
#[async_trait]
pub trait GenerationClient: Send + Sync {
    async fn call(&self, endpoint: Endpoint, payload: Option<Value>) -> Result<Value, ApiError>;
}

#[async_trait]
impl GenerationClient for StorybookApi {
    async fn call(&self, endpoint: Endpoint, payload: Option<Value>) -> Result<Value, ApiError> {
        StorybookApi::call(self, &endpoint, payload.as_ref()).await
    }
}

// ============================================================================
// Request / response types
// ============================================================================

/// Genre, age group and art style sent alongside choice requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StoryContext {
    pub genre: Genre,
    pub age_group: AgeGroup,
    pub art_style: ArtStyle,
}

impl From<&Preferences> for StoryContext {
    fn from(prefs: &Preferences) -> Self {
        Self {
            genre: prefs.genre,
            age_group: prefs.age_group,
            art_style: prefs.art_style,
        }
    }
}

/// A scene produced from a branch choice.
#[derive(Debug, Clone, PartialEq)]
pub struct GeneratedScene {
    pub scene: Scene,
    pub is_final: bool,
    pub scenes_remaining: Option<i64>,
}

/// Result of an image generation call.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct GeneratedImage {
    pub image_url: String,
}

/// Per-scene outcome of regenerating every image in a story.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ImageResult {
    pub scene: u32,
    pub success: bool,
    #[serde(default)]
    pub image_url: Option<String>,
}

/// A file produced by the export endpoint.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ExportedFile {
    pub file: String,
    pub filename: String,
}

/// One entry from the backend's story list.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct StorySummary {
    pub id: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub num_scenes: usize,
    #[serde(default)]
    pub created_at: Option<String>,
    #[serde(default)]
    pub genre: Option<String>,
    #[serde(default)]
    pub age_group: Option<String>,
}

/// Backend health reply.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Health {
    pub status: String,
    #[serde(default)]
    pub service: Option<String>,
    #[serde(default)]
    pub version: Option<String>,
}

/// Character fields that can be edited during lock-in.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CharacterUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub visual_description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
}

impl CharacterUpdate {
    pub fn is_empty(&self) -> bool {
        self.description.is_none() && self.visual_description.is_none() && self.role.is_none()
    }
}

/// Options for a single image request.
#[derive(Debug, Clone, PartialEq)]
pub struct ImageOptions {
    pub style: ArtStyle,
    pub regenerate: bool,
    pub custom_prompt: Option<String>,
}

impl ImageOptions {
    pub fn new(style: ArtStyle) -> Self {
        Self {
            style,
            regenerate: false,
            custom_prompt: None,
        }
    }

    pub fn regenerate(mut self) -> Self {
        self.regenerate = true;
        self
    }

    /// Paint from `prompt` instead of the scene's own image prompt.
    pub fn with_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.custom_prompt = Some(prompt.into());
        self
    }
}

// ============================================================================
// Typed operations
// ============================================================================

/// Typed wrappers over a [`GenerationClient`].
#[derive(Clone)]
pub struct Generator {
    client: Arc<dyn GenerationClient>,
}

impl Generator {
    pub fn new(client: impl GenerationClient + 'static) -> Self {
        Self {
            client: Arc::new(client),
        }
    }

    async fn request<T: DeserializeOwned>(
        &self,
        endpoint: Endpoint,
        payload: Option<Value>,
    ) -> Result<T, ApiError> {
        let value = self.client.call(endpoint, payload).await?;
        parse(value)
    }

    /// Generate a new story from a setup request.
    #[instrument(skip(self, request), fields(scenes = request.num_scenes))]
    pub async fn create_story(&self, request: &StoryRequest) -> Result<Story, ApiError> {
        #[derive(Deserialize)]
        struct Created {
            #[serde(default)]
            story_id: Option<String>,
            story: Story,
        }

        let payload = serde_json::to_value(request).map_err(|e| ApiError::Parse(e.to_string()))?;
        let created: Created = self.request(Endpoint::CreateStory, Some(payload)).await?;
        let mut story = created.story;
        if story.id.is_empty() {
            story.id = created.story_id.unwrap_or_default();
        }
        if story.id.is_empty() {
            return Err(ApiError::Parse("story has no id".to_string()));
        }
        Ok(story)
    }

    pub async fn get_story(&self, story_id: &str) -> Result<Story, ApiError> {
        self.request(Endpoint::GetStory(story_id.to_string()), None)
            .await
    }

    pub async fn list_stories(&self) -> Result<Vec<StorySummary>, ApiError> {
        self.request(Endpoint::ListStories, None).await
    }

    pub async fn delete_story(&self, story_id: &str) -> Result<(), ApiError> {
        self.client
            .call(Endpoint::DeleteStory(story_id.to_string()), None)
            .await
            .map(|_| ())
    }

    /// Generate (or regenerate) the illustration for one scene.
    #[instrument(skip(self, options), fields(regenerate = options.regenerate))]
    pub async fn generate_scene_image(
        &self,
        story_id: &str,
        scene_number: u32,
        options: &ImageOptions,
    ) -> Result<GeneratedImage, ApiError> {
        #[derive(Deserialize)]
        struct Reply {
            #[serde(default = "default_success")]
            success: bool,
            #[serde(default)]
            error: Option<String>,
            #[serde(default)]
            image_url: Option<String>,
        }

        let mut payload = json!({
            "story_id": story_id,
            "scene_number": scene_number,
            "style": options.style,
            "aspect_ratio": DEFAULT_ASPECT_RATIO,
            "regenerate": options.regenerate,
        });
        if let Some(prompt) = &options.custom_prompt {
            payload["custom_prompt"] = json!(prompt);
        }

        let reply: Reply = self
            .request(Endpoint::GenerateSceneImage, Some(payload))
            .await?;
        if !reply.success {
            return Err(ApiError::Api {
                status: 200,
                message: reply
                    .error
                    .unwrap_or_else(|| "image generation failed".to_string()),
            });
        }
        match reply.image_url {
            Some(image_url) if !image_url.is_empty() => Ok(GeneratedImage { image_url }),
            _ => Err(ApiError::Parse("image response has no image_url".to_string())),
        }
    }

    /// Ask the backend for branch choices following `scene`.
    #[instrument(skip(self, scene, context), fields(scene_number = scene.scene_number))]
    pub async fn story_choices(
        &self,
        scene: &Scene,
        context: StoryContext,
    ) -> Result<Vec<Choice>, ApiError> {
        #[derive(Deserialize)]
        struct Reply {
            #[serde(default)]
            choices: Vec<Choice>,
        }

        let payload = json!({
            "currentScene": {
                "scene_number": scene.scene_number,
                "title": scene.title,
                "content": scene.text,
            },
            "storyContext": context,
        });
        let reply: Reply = self.request(Endpoint::StoryChoices, Some(payload)).await?;
        Ok(reply.choices)
    }

    /// Generate the next scene along the chosen branch.
    ///
    /// The full prior scene list travels with the request.
    #[instrument(skip_all, fields(story_id = %story_id, choice = %choice.title))]
    pub async fn scene_from_choice(
        &self,
        story_id: &str,
        previous_scenes: &[Scene],
        choice: &Choice,
        context: StoryContext,
    ) -> Result<GeneratedScene, ApiError> {
        let payload = json!({
            "storyId": story_id,
            "choice": choice,
            "storyContext": context,
            "previousScenes": previous_scenes,
        });
        let value = self
            .client
            .call(Endpoint::SceneFromChoice, Some(payload))
            .await?;
        parse_generated_scene(value)
    }

    pub async fn refine_character(
        &self,
        story_id: &str,
        character_name: &str,
        image_path: &str,
    ) -> Result<(), ApiError> {
        let payload = json!({
            "story_id": story_id,
            "character_name": character_name,
            "image_path": image_path,
        });
        self.client
            .call(Endpoint::RefineCharacter, Some(payload))
            .await
            .map(|_| ())
    }

    pub async fn update_character(
        &self,
        story_id: &str,
        character_name: &str,
        updates: &CharacterUpdate,
    ) -> Result<(), ApiError> {
        let payload = json!({
            "story_id": story_id,
            "character_name": character_name,
            "updates": updates,
        });
        self.client
            .call(Endpoint::UpdateCharacter, Some(payload))
            .await
            .map(|_| ())
    }

    pub async fn regenerate_all_images(&self, story_id: &str) -> Result<Vec<ImageResult>, ApiError> {
        #[derive(Deserialize)]
        struct Reply {
            #[serde(default)]
            results: Vec<ImageResult>,
        }

        let reply: Reply = self
            .request(Endpoint::RegenerateAllImages(story_id.to_string()), None)
            .await?;
        Ok(reply.results)
    }

    /// Export a story; `images` maps page index to image URL.
    #[instrument(skip(self, images))]
    pub async fn export(
        &self,
        story_id: &str,
        images: &BTreeMap<usize, String>,
        format: ExportFormat,
    ) -> Result<ExportedFile, ApiError> {
        let images: HashMap<String, &String> =
            images.iter().map(|(k, v)| (k.to_string(), v)).collect();
        let payload = json!({
            "story_id": story_id,
            "images": images,
            "include_images": true,
            "include_metadata": true,
        });
        self.request(Endpoint::Export(format), Some(payload)).await
    }

    pub async fn health(&self) -> Result<Health, ApiError> {
        self.request(Endpoint::Health, None).await
    }

    /// Detailed backend status, returned as-is.
    pub async fn status(&self) -> Result<Value, ApiError> {
        self.client.call(Endpoint::Status, None).await
    }
}

fn default_success() -> bool {
    true
}

fn parse<T: DeserializeOwned>(value: Value) -> Result<T, ApiError> {
    serde_json::from_value(value).map_err(|e| ApiError::Parse(e.to_string()))
}

/// The scene endpoint wraps its result inconsistently: `{"scene": scene}` or
/// `{"scene": {"scene": scene, "is_final": .., "scenes_remaining": ..}}`.
fn parse_generated_scene(value: Value) -> Result<GeneratedScene, ApiError> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Body {
        Wrapped {
            scene: Scene,
            #[serde(default)]
            is_final: Option<bool>,
            #[serde(default)]
            scenes_remaining: Option<i64>,
        },
        Bare(Scene),
    }

    #[derive(Deserialize)]
    struct Reply {
        scene: Body,
        #[serde(default)]
        is_final: Option<bool>,
        #[serde(default)]
        scenes_remaining: Option<i64>,
    }

    let reply: Reply = parse(value)?;
    let (scene, inner_final, inner_remaining) = match reply.scene {
        Body::Wrapped {
            scene,
            is_final,
            scenes_remaining,
        } => (scene, is_final, scenes_remaining),
        Body::Bare(scene) => (scene, None, None),
    };

    if scene.text.trim().is_empty() && scene.title.trim().is_empty() {
        return Err(ApiError::Parse("generated scene is empty".to_string()));
    }

    Ok(GeneratedScene {
        scene,
        is_final: inner_final.or(reply.is_final).unwrap_or(false),
        scenes_remaining: inner_remaining.or(reply.scenes_remaining),
    })
}
