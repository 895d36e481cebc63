//! Offline media backend.
//!
//! Instead of calling a generation service, [`ManifestMedia`] writes each
//! request as a pretty-printed JSON manifest under its output directory and
//! reports the manifest path as the asset URI. Useful for dry runs of the
//! whole branch protocol without generation credentials.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::Utc;
use serde::Serialize;

use super::{ConcatRequest, GeneratedMedia, ImageRequest, MediaBackend, VideoRequest};
use crate::error::MediaError;
use crate::model::{AssetKind, new_id};

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct Manifest<'a, T: Serialize> {
    kind: &'a str,
    operation: &'a str,
    requested_at: String,
    request: &'a T,
}

pub struct ManifestMedia {
    output_dir: PathBuf,
}

impl ManifestMedia {
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            output_dir: output_dir.into(),
        }
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    async fn write_manifest<T: Serialize + Sync>(
        &self,
        kind: AssetKind,
        operation: &str,
        request: &T,
    ) -> Result<GeneratedMedia, MediaError> {
        tokio::fs::create_dir_all(&self.output_dir).await?;

        let manifest = Manifest {
            kind: kind.as_str(),
            operation,
            requested_at: Utc::now().to_rfc3339(),
            request,
        };
        let body = serde_json::to_string_pretty(&manifest)?;

        let path = self
            .output_dir
            .join(format!("{}-{}.json", kind.as_str(), new_id()));
        tokio::fs::write(&path, body).await?;

        tracing::debug!(path = %path.display(), operation, "Wrote media manifest");
        Ok(GeneratedMedia {
            uri: path.display().to_string(),
            note: Some(format!("{operation} recorded as manifest (offline backend)")),
        })
    }
}

#[async_trait]
impl MediaBackend for ManifestMedia {
    async fn generate_image(&self, request: ImageRequest) -> Result<GeneratedMedia, MediaError> {
        self.write_manifest(AssetKind::Image, "generateImage", &request)
            .await
    }

    async fn generate_video(&self, request: VideoRequest) -> Result<GeneratedMedia, MediaError> {
        if request.prompt.is_none() && request.start_frame.is_none() {
            return Err(MediaError::Rejected(
                "video generation needs a prompt or a start frame".to_string(),
            ));
        }
        self.write_manifest(AssetKind::Video, "generateVideo", &request)
            .await
    }

    async fn concatenate_videos(
        &self,
        request: ConcatRequest,
    ) -> Result<GeneratedMedia, MediaError> {
        if request.videos.len() < 2 {
            return Err(MediaError::Rejected(format!(
                "need at least two videos to concatenate, got {}",
                request.videos.len()
            )));
        }
        self.write_manifest(AssetKind::Video, "concatenateVideos", &request)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn image_manifest_is_written_to_output_dir() {
        let dir = tempfile::tempdir().unwrap();
        let media = ManifestMedia::new(dir.path().join("assets"));

        let generated = media
            .generate_image(ImageRequest {
                conversation_id: "c1".into(),
                prompt: "a lighthouse at dusk".into(),
                references: vec![],
                aspect_ratio: None,
            })
            .await
            .unwrap();

        let body = std::fs::read_to_string(&generated.uri).unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&body).unwrap();
        assert_eq!(parsed["kind"], "image");
        assert_eq!(parsed["request"]["prompt"], "a lighthouse at dusk");
        assert!(generated.uri.starts_with(&dir.path().join("assets").display().to_string()));
    }

    #[tokio::test]
    async fn video_without_prompt_or_frame_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let media = ManifestMedia::new(dir.path());

        let err = media
            .generate_video(VideoRequest {
                conversation_id: "c1".into(),
                prompt: None,
                start_frame: None,
                end_frame: None,
                is_looping: false,
                references: vec![],
                style: None,
                aspect_ratio: None,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, MediaError::Rejected(_)));
    }
}
