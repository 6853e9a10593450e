//! Minimal client for the storybook generation backend.
//!
//! The backend exposes a fixed set of JSON endpoints (story creation, scene
//! images, branch choices, exports, ...). This crate knows how to reach them
//! and how to classify failures; it does not interpret response bodies beyond
//! pulling an error message out of non-2xx replies. Callers build typed
//! operations on top of [`StorybookApi::call`].

use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, CONTENT_TYPE};
use reqwest::Method;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, instrument};

/// Base URL used when none is configured.
pub const DEFAULT_BASE_URL: &str = "http://localhost:5001";

/// Image generation on the backend is slow; keep the overall timeout generous.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(120);
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Errors that can occur when talking to the backend.
#[derive(Debug, Error)]
pub enum Error {
    #[error("Network error: {0}")]
    Network(String),

    #[error("Server error (status {status}): {message}")]
    Api { status: u16, message: String },

    #[error("Failed to parse response: {0}")]
    Parse(String),

    #[error("Invalid configuration: {0}")]
    Config(String),
}

impl Error {
    /// True when the request never produced an HTTP response.
    pub fn is_network(&self) -> bool {
        matches!(self, Error::Network(_))
    }

    /// HTTP status for server failures.
    pub fn status(&self) -> Option<u16> {
        match self {
            Error::Api { status, .. } => Some(*status),
            _ => None,
        }
    }
}

/// Export formats supported by the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExportFormat {
    Pdf,
    Html,
    Json,
}

impl ExportFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExportFormat::Pdf => "pdf",
            ExportFormat::Html => "html",
            ExportFormat::Json => "json",
        }
    }

    /// Parse a format name, case-insensitively.
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "pdf" => Some(ExportFormat::Pdf),
            "html" => Some(ExportFormat::Html),
            "json" => Some(ExportFormat::Json),
            _ => None,
        }
    }
}

impl fmt::Display for ExportFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The fixed set of backend endpoints.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Endpoint {
    CreateStory,
    GetStory(String),
    ListStories,
    DeleteStory(String),
    GenerateSceneImage,
    RefineCharacter,
    UpdateCharacter,
    RegenerateAllImages(String),
    Export(ExportFormat),
    StoryChoices,
    SceneFromChoice,
    Health,
    Status,
}

impl Endpoint {
    /// HTTP method for this endpoint.
    pub fn method(&self) -> Method {
        match self {
            Endpoint::GetStory(_) | Endpoint::ListStories | Endpoint::Health | Endpoint::Status => {
                Method::GET
            }
            Endpoint::DeleteStory(_) => Method::DELETE,
            Endpoint::UpdateCharacter => Method::PUT,
            Endpoint::CreateStory
            | Endpoint::GenerateSceneImage
            | Endpoint::RefineCharacter
            | Endpoint::RegenerateAllImages(_)
            | Endpoint::Export(_)
            | Endpoint::StoryChoices
            | Endpoint::SceneFromChoice => Method::POST,
        }
    }

    /// Path relative to the backend base URL.
    pub fn path(&self) -> String {
        match self {
            Endpoint::CreateStory => "/api/generate-story".to_string(),
            Endpoint::GetStory(id) => format!("/api/get-story/{id}"),
            Endpoint::ListStories => "/api/stories".to_string(),
            Endpoint::DeleteStory(id) => format!("/api/delete-story/{id}"),
            Endpoint::GenerateSceneImage => "/api/generate-scene-image".to_string(),
            Endpoint::RefineCharacter => "/api/refine-character".to_string(),
            Endpoint::UpdateCharacter => "/api/update-character".to_string(),
            Endpoint::RegenerateAllImages(id) => format!("/api/regenerate-all-images/{id}"),
            Endpoint::Export(format) => format!("/api/export/{format}"),
            Endpoint::StoryChoices => "/api/story-choices".to_string(),
            Endpoint::SceneFromChoice => "/api/generate-scene-from-choice".to_string(),
            Endpoint::Health => "/api/health".to_string(),
            Endpoint::Status => "/api/status".to_string(),
        }
    }

    /// Short name used in logs.
    pub fn name(&self) -> &'static str {
        match self {
            Endpoint::CreateStory => "create_story",
            Endpoint::GetStory(_) => "get_story",
            Endpoint::ListStories => "list_stories",
            Endpoint::DeleteStory(_) => "delete_story",
            Endpoint::GenerateSceneImage => "generate_scene_image",
            Endpoint::RefineCharacter => "refine_character",
            Endpoint::UpdateCharacter => "update_character",
            Endpoint::RegenerateAllImages(_) => "regenerate_all_images",
            Endpoint::Export(_) => "export",
            Endpoint::StoryChoices => "story_choices",
            Endpoint::SceneFromChoice => "scene_from_choice",
            Endpoint::Health => "health",
            Endpoint::Status => "status",
        }
    }
}

/// HTTP client for the storybook backend.
#[derive(Clone)]
pub struct StorybookApi {
    client: reqwest::Client,
    base_url: String,
}

impl StorybookApi {
    /// Create a client for the backend at `base_url`.
    pub fn new(base_url: impl Into<String>) -> Result<Self, Error> {
        Self::with_timeouts(base_url, DEFAULT_TIMEOUT, DEFAULT_CONNECT_TIMEOUT)
    }

    /// Create a client with explicit request and connect timeouts.
    pub fn with_timeouts(
        base_url: impl Into<String>,
        timeout: Duration,
        connect_timeout: Duration,
    ) -> Result<Self, Error> {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        if !(base_url.starts_with("http://") || base_url.starts_with("https://")) {
            return Err(Error::Config(format!("Invalid base URL: {base_url:?}")));
        }

        let client = reqwest::Client::builder()
            .timeout(timeout)
            .connect_timeout(connect_timeout)
            .default_headers(default_headers())
            .build()
            .map_err(|e| Error::Config(format!("Failed to build HTTP client: {e}")))?;

        Ok(Self { client, base_url })
    }

    /// Create a client from the STORYBOOK_API_URL environment variable,
    /// falling back to [`DEFAULT_BASE_URL`].
    pub fn from_env() -> Result<Self, Error> {
        let base_url =
            std::env::var("STORYBOOK_API_URL").unwrap_or_else(|_| DEFAULT_BASE_URL.to_string());
        Self::new(base_url)
    }

    /// The configured base URL, without a trailing slash.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Perform one call against the backend.
    ///
    /// `payload` is sent as the JSON body for non-GET endpoints. A successful
    /// reply is returned as parsed JSON (`Value::Null` for an empty body).
    #[instrument(skip(self, payload), fields(endpoint = endpoint.name()))]
    pub async fn call(&self, endpoint: &Endpoint, payload: Option<&Value>) -> Result<Value, Error> {
        let url = format!("{}{}", self.base_url, endpoint.path());
        let mut request = self.client.request(endpoint.method(), &url);
        if let Some(body) = payload {
            if endpoint.method() != Method::GET {
                request = request.json(body);
            }
        }

        let response = request
            .send()
            .await
            .map_err(|e| Error::Network(e.to_string()))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| Error::Network(e.to_string()))?;

        if !status.is_success() {
            debug!(status = status.as_u16(), "backend returned an error");
            return Err(Error::Api {
                status: status.as_u16(),
                message: server_message(&body),
            });
        }

        if body.trim().is_empty() {
            return Ok(Value::Null);
        }

        serde_json::from_str(&body).map_err(|e| Error::Parse(e.to_string()))
    }
}

fn default_headers() -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
    headers
}

/// Pull a human-readable message out of an error body.
///
/// The backend replies with `{"error": "...", "message": "..."}` for most
/// failures; anything else is passed through as text.
fn server_message(body: &str) -> String {
    #[derive(Deserialize)]
    struct ErrorBody {
        error: Option<String>,
        message: Option<String>,
    }

    match serde_json::from_str::<ErrorBody>(body) {
        Ok(ErrorBody {
            error: Some(error),
            message: Some(message),
        }) => format!("{error}: {message}"),
        Ok(ErrorBody {
            error: Some(error), ..
        }) => error,
        Ok(ErrorBody {
            message: Some(message),
            ..
        }) => message,
        _ if body.trim().is_empty() => "empty response".to_string(),
        _ => body.trim().to_string(),
    }
}
