//! Read-aloud seam.
//!
//! Speech synthesis lives outside this crate. The controller hands page text
//! to a [`Narrator`] and does not wait on the result beyond logging it.

use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Error)]
#[error("Narration failed: {0}")]
pub struct NarrationError(pub String);

/// Plays text aloud.
#[async_trait]
pub trait Narrator: Send + Sync {
    async fn play_text(&self, text: &str) -> Result<(), NarrationError>;
}
