//! Branching storybook engine.
//!
//! This crate provides:
//! - Story, scene and choice model matching the generation backend
//! - Capacity-bounded local persistence for saved stories and preferences
//! - Choice and page state machines
//! - A reading session that runs backend requests as supervised tasks
//!
//! # Quick Start
//!
//! ```ignore
//! use storybook_core::{StoryController, StorybookConfig, StoryRequest};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = StorybookConfig::from_env();
//!     let mut controller = StoryController::from_config(&config)?;
//!
//!     controller
//!         .create_story(StoryRequest::new("A robot who plants a garden on the moon"))
//!         .await?;
//!     let page = controller.begin_reading()?;
//!     println!("{}: {}", page.title, page.text);
//!
//!     controller.select_choice(0);
//!     controller.settle().await;
//!     controller.save();
//!     Ok(())
//! }
//! ```

pub mod choices;
pub mod config;
pub mod controller;
pub mod generation;
pub mod narration;
pub mod navigator;
pub mod preferences;
pub mod store;
pub mod story;
pub mod testing;

// Primary public API
pub use choices::{ChoiceEngine, ChoiceState};
pub use config::StorybookConfig;
pub use controller::{ReaderMode, SessionError, StoryController};
pub use generation::{GenerationClient, Generator, StoryContext};
pub use narration::Narrator;
pub use navigator::{BookNavigator, Illustration, NavDirection, NavState, PageView, SwipeTracker};
pub use preferences::{AgeGroup, ArtStyle, Genre, Preferences};
pub use store::{PersistenceStore, StorySnapshot};
pub use story::{Character, Choice, ChoiceType, Scene, Story, StoryRequest};
pub use testing::{MockGenerator, TestHarness};

pub use storybook_api::{Endpoint, Error as ApiError, ExportFormat};
