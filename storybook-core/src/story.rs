//! Story data model.
//!
//! Field names follow the backend's JSON so that stories round-trip between
//! the generation service and local snapshots without a mapping layer.

use crate::preferences::{AgeGroup, ArtStyle, Genre};
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use tracing::debug;
use uuid::Uuid;

/// Minimum prompt length accepted at setup.
pub const MIN_PROMPT_CHARS: usize = 10;

/// Allowed range for the number of planned scenes.
pub const SCENE_COUNT_RANGE: std::ops::RangeInclusive<u8> = 3..=10;

/// Number of scenes planned when the request doesn't say.
pub const DEFAULT_PLANNED_SCENES: usize = 5;

// ============================================================================
// Story
// ============================================================================

/// A generated story.
///
/// `scenes` only ever grows; new scenes go through
/// [`crate::navigator::BookNavigator::add_scene_to_story`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Story {
    #[serde(rename = "story_id")]
    pub id: String,

    #[serde(default = "default_title")]
    pub title: String,

    #[serde(default = "default_style")]
    pub style: String,

    #[serde(default)]
    pub age_group: Option<String>,

    #[serde(default)]
    pub genre: Option<String>,

    #[serde(default)]
    pub characters: Vec<Character>,

    #[serde(default)]
    pub scenes: Vec<Scene>,

    #[serde(default = "default_planned_scenes")]
    pub total_planned_scenes: usize,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,
}

fn default_title() -> String {
    "Untitled".to_string()
}

fn default_style() -> String {
    ArtStyle::default().as_str().to_string()
}

fn default_planned_scenes() -> usize {
    DEFAULT_PLANNED_SCENES
}

impl Story {
    /// Create an empty story.
    pub fn new(id: impl Into<String>, title: impl Into<String>, total_planned_scenes: usize) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            style: default_style(),
            age_group: None,
            genre: None,
            characters: Vec::new(),
            scenes: Vec::new(),
            total_planned_scenes,
            created_at: None,
        }
    }

    /// Number of scenes (pages) currently in the story.
    pub fn page_count(&self) -> usize {
        self.scenes.len()
    }

    pub fn scene(&self, index: usize) -> Option<&Scene> {
        self.scenes.get(index)
    }

    /// Whether `index` is the last scene the story was planned to have.
    pub fn is_final_planned(&self, index: usize) -> bool {
        index + 1 >= self.total_planned_scenes
    }

    /// Find a character by name (case-insensitive).
    pub fn character(&self, name: &str) -> Option<&Character> {
        self.characters
            .iter()
            .find(|c| c.name.eq_ignore_ascii_case(name))
    }

    pub fn character_mut(&mut self, name: &str) -> Option<&mut Character> {
        self.characters
            .iter_mut()
            .find(|c| c.name.eq_ignore_ascii_case(name))
    }

    /// Set the image of the scene at `index`. Returns false if there is no such scene.
    pub fn set_image(&mut self, index: usize, url: impl Into<String>) -> bool {
        match self.scenes.get_mut(index) {
            Some(scene) => {
                scene.image_url = Some(url.into());
                true
            }
            None => false,
        }
    }

    /// Map of page index to image URL for every illustrated scene.
    pub fn images(&self) -> BTreeMap<usize, String> {
        self.scenes
            .iter()
            .enumerate()
            .filter_map(|(i, s)| s.image_url.clone().map(|url| (i, url)))
            .collect()
    }

    /// Append a scene, normalizing its number and id. Returns the new index.
    ///
    /// A missing (zero) or non-increasing scene number is replaced by the
    /// previous number plus one so numbers stay unique and ordered.
    pub(crate) fn append_scene(&mut self, mut scene: Scene) -> usize {
        let previous = self.scenes.last().map(|s| s.scene_number).unwrap_or(0);
        if scene.scene_number <= previous {
            if scene.scene_number != 0 {
                debug!(
                    given = scene.scene_number,
                    assigned = previous.saturating_add(1),
                    "renumbering appended scene"
                );
            }
            scene.scene_number = previous.saturating_add(1);
        }
        if scene.scene_id.is_empty() {
            scene.scene_id = Uuid::new_v4().to_string();
        }
        self.scenes.push(scene);
        self.scenes.len() - 1
    }
}

// ============================================================================
// Characters and scenes
// ============================================================================

/// A story character.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Character {
    pub name: String,

    #[serde(default)]
    pub description: String,

    #[serde(default)]
    pub visual_description: String,

    #[serde(default = "default_role")]
    pub role: String,

    #[serde(default)]
    pub refined_description: Option<String>,

    #[serde(default)]
    pub character_id: String,
}

fn default_role() -> String {
    "supporting".to_string()
}

impl Character {
    pub fn new(name: impl Into<String>, description: impl Into<String>, visual: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            visual_description: visual.into(),
            role: default_role(),
            refined_description: None,
            character_id: Uuid::new_v4().to_string(),
        }
    }

    /// Append refinement text to the visual description.
    ///
    /// Refinement never replaces what was locked in; blank text is ignored.
    pub fn refine_visual(&mut self, refinement: &str) -> bool {
        let refinement = refinement.trim();
        if refinement.is_empty() {
            return false;
        }
        if self.visual_description.is_empty() {
            self.visual_description = refinement.to_string();
        } else {
            self.visual_description.push(' ');
            self.visual_description.push_str(refinement);
        }
        self.refined_description = Some(self.visual_description.clone());
        true
    }
}

/// One page of the storybook.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Scene {
    #[serde(default)]
    pub scene_number: u32,

    #[serde(default)]
    pub title: String,

    #[serde(default, alias = "content")]
    pub text: String,

    #[serde(default)]
    pub image_prompt: String,

    #[serde(default)]
    pub characters_present: Vec<String>,

    #[serde(default)]
    pub image_url: Option<String>,

    #[serde(default)]
    pub scene_id: String,
}

impl Scene {
    /// A scene with only a title and text; number and id are assigned on append.
    pub fn new(title: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            scene_number: 0,
            title: title.into(),
            text: text.into(),
            image_prompt: String::new(),
            characters_present: Vec::new(),
            image_url: None,
            scene_id: String::new(),
        }
    }

    pub fn with_number(mut self, number: u32) -> Self {
        self.scene_number = number;
        self
    }

    pub fn with_image_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.image_prompt = prompt.into();
        self
    }
}

// ============================================================================
// Branch choices
// ============================================================================

/// Branch archetype of a choice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ChoiceType {
    Original,
    Magical,
    Surprise,
    Adventure,
}

impl ChoiceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChoiceType::Original => "original",
            ChoiceType::Magical => "magical",
            ChoiceType::Surprise => "surprise",
            ChoiceType::Adventure => "adventure",
        }
    }

    /// Unknown archetypes fall back to `Original`.
    pub fn from_name(name: &str) -> Self {
        match name.trim().to_ascii_lowercase().as_str() {
            "magical" => ChoiceType::Magical,
            "surprise" => ChoiceType::Surprise,
            "adventure" => ChoiceType::Adventure,
            _ => ChoiceType::Original,
        }
    }
}

impl<'de> Deserialize<'de> for ChoiceType {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let name = String::deserialize(deserializer)?;
        Ok(ChoiceType::from_name(&name))
    }
}

impl fmt::Display for ChoiceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A proposed narrative direction for the next scene.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Choice {
    pub title: String,

    #[serde(default)]
    pub description: String,

    #[serde(default)]
    pub icon: String,

    #[serde(rename = "type", default = "default_choice_type")]
    pub kind: ChoiceType,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preview: Option<String>,
}

fn default_choice_type() -> ChoiceType {
    ChoiceType::Original
}

impl Choice {
    fn fixed(title: &str, description: &str, icon: &str, kind: ChoiceType) -> Self {
        Self {
            title: title.to_string(),
            description: description.to_string(),
            icon: icon.to_string(),
            kind,
            preview: None,
        }
    }

    /// The fixed four-archetype set shown before the server proposes anything.
    pub fn default_set() -> Vec<Choice> {
        vec![
            Choice::fixed(
                "Original Path",
                "Continue with the main storyline",
                "📖",
                ChoiceType::Original,
            ),
            Choice::fixed(
                "Magical Twist",
                "Add a magical element to the story",
                "✨",
                ChoiceType::Magical,
            ),
            Choice::fixed(
                "Surprise Turn",
                "Introduce an unexpected twist",
                "🎭",
                ChoiceType::Surprise,
            ),
            Choice::fixed(
                "Adventure Path",
                "Take the story on an adventure",
                "🚀",
                ChoiceType::Adventure,
            ),
        ]
    }
}

// ============================================================================
// Setup request
// ============================================================================

/// What the reader submits to generate a new story.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StoryRequest {
    pub prompt: String,
    pub age_group: AgeGroup,
    pub genre: Genre,
    pub num_scenes: u8,
    pub art_style: ArtStyle,
}

impl StoryRequest {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            age_group: AgeGroup::default(),
            genre: Genre::default(),
            num_scenes: DEFAULT_PLANNED_SCENES as u8,
            art_style: ArtStyle::default(),
        }
    }

    pub fn with_age_group(mut self, age_group: AgeGroup) -> Self {
        self.age_group = age_group;
        self
    }

    pub fn with_genre(mut self, genre: Genre) -> Self {
        self.genre = genre;
        self
    }

    pub fn with_scenes(mut self, num_scenes: u8) -> Self {
        self.num_scenes = num_scenes;
        self
    }

    pub fn with_art_style(mut self, art_style: ArtStyle) -> Self {
        self.art_style = art_style;
        self
    }

    /// Check the request before anything is sent.
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        let prompt = self.prompt.trim();
        if prompt.is_empty() {
            errors.push("'prompt' is required".to_string());
        } else if prompt.chars().count() < MIN_PROMPT_CHARS {
            errors.push(format!(
                "'prompt' must be at least {MIN_PROMPT_CHARS} characters long"
            ));
        }

        if !SCENE_COUNT_RANGE.contains(&self.num_scenes) {
            errors.push(format!(
                "num_scenes must be between {} and {}",
                SCENE_COUNT_RANGE.start(),
                SCENE_COUNT_RANGE.end()
            ));
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}
