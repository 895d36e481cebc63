//! Media generation seam.
//!
//! Image/video generation and video concatenation are external services. The
//! branching engine reaches them only through an explicitly constructed
//! [`MediaBackend`] handed to the [`crate::branching::Orchestrator`] at
//! startup. [`manifest::ManifestMedia`] is the offline backend used by the CLI
//! when no generation service is wired in.

pub mod manifest;

use async_trait::async_trait;
use serde::Serialize;

use crate::agent::tools::{ImageAspectRatio, VideoAspectRatio};
use crate::error::MediaError;
use crate::model::{Asset, ConversationId};

pub use manifest::ManifestMedia;

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageRequest {
    pub conversation_id: ConversationId,
    pub prompt: String,
    /// Image assets used as visual references.
    pub references: Vec<Asset>,
    pub aspect_ratio: Option<ImageAspectRatio>,
}

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VideoRequest {
    pub conversation_id: ConversationId,
    pub prompt: Option<String>,
    pub start_frame: Option<Asset>,
    pub end_frame: Option<Asset>,
    pub is_looping: bool,
    pub references: Vec<Asset>,
    pub style: Option<Asset>,
    pub aspect_ratio: Option<VideoAspectRatio>,
}

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConcatRequest {
    pub conversation_id: ConversationId,
    /// Video assets, in playback order.
    pub videos: Vec<Asset>,
    pub note: Option<String>,
}

/// Where a generated artifact ended up.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GeneratedMedia {
    pub uri: String,
    /// Optional text from the backend, echoed to the model.
    pub note: Option<String>,
}

#[async_trait]
pub trait MediaBackend: Send + Sync {
    async fn generate_image(&self, request: ImageRequest) -> Result<GeneratedMedia, MediaError>;

    async fn generate_video(&self, request: VideoRequest) -> Result<GeneratedMedia, MediaError>;

    async fn concatenate_videos(&self, request: ConcatRequest)
    -> Result<GeneratedMedia, MediaError>;
}
