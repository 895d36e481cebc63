//! Tool routing for one run.
//!
//! A [`BranchToolHost`] is built per run by the dispatcher. It exposes the
//! tool subset allowed for the conversation's kind and routes each typed call
//! to the spawn coordinator, the return aggregator or the media backend.
//! Failures never escape as `Err`; they come back as [`ToolOutput::Error`].

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;

use super::executor::ToolHost;
use super::tools::{
    AssetOutput, ConcatenateVideosInput, GenerateImageInput, GenerateVideoInput,
    ReturnToParentInput, ReturnToParentOutput, SpawnPhase, SpawnSubAgentsInput,
    SpawnSubAgentsOutput, SpawnedAgentOutput, ToolCall, ToolName, ToolOutput,
};
use crate::branching::registry::BranchRegistry;
use crate::branching::returns::ReturnAggregator;
use crate::branching::spawn::SpawnCoordinator;
use crate::branching::types::{BranchEvent, Brief, EventSink};
use crate::error::BranchError;
use crate::media::{ConcatRequest, GeneratedMedia, ImageRequest, MediaBackend, VideoRequest};
use crate::model::{Asset, AssetId, AssetKind, Conversation, ConversationKind, new_id};

pub struct BranchToolHost {
    conversation: Conversation,
    registry: BranchRegistry,
    returns: ReturnAggregator,
    spawner: Option<SpawnCoordinator>,
    media: Arc<dyn MediaBackend>,
    events: EventSink,
}

impl BranchToolHost {
    pub fn new(
        conversation: Conversation,
        registry: BranchRegistry,
        media: Arc<dyn MediaBackend>,
        events: EventSink,
    ) -> Self {
        let returns = ReturnAggregator::new(registry.clone(), events.clone());
        Self {
            conversation,
            registry,
            returns,
            spawner: None,
            media,
            events,
        }
    }

    /// Enable `spawnSubAgents` for this run. Ignored for sub-agents.
    pub fn with_spawner(mut self, spawner: SpawnCoordinator) -> Self {
        if !self.conversation.is_sub_agent() {
            self.spawner = Some(spawner);
        }
        self
    }

    async fn spawn(&self, input: SpawnSubAgentsInput) -> ToolOutput {
        let Some(spawner) = &self.spawner else {
            return ToolOutput::error("spawnSubAgents is not available in this conversation");
        };
        let briefs: Vec<Brief> = input.agents.into_iter().map(Brief::from).collect();

        match spawner.spawn(&self.conversation.id, briefs).await {
            Ok(children) => ToolOutput::SpawnSubAgents(SpawnSubAgentsOutput {
                status: SpawnPhase::Pending,
                agents: children
                    .into_iter()
                    .map(|c| SpawnedAgentOutput {
                        id: c.id,
                        name: c.name,
                        returned_assets: None,
                        summary: None,
                    })
                    .collect(),
            }),
            Err(e) => ToolOutput::error(e.to_string()),
        }
    }

    async fn return_to_parent(&self, input: ReturnToParentInput) -> ToolOutput {
        match self
            .returns
            .return_to_parent(&self.conversation.id, input.assets, input.summary)
            .await
        {
            Ok(receipt) => ToolOutput::ReturnToParent(ReturnToParentOutput {
                success: true,
                message: "Returned to parent chat".to_string(),
                navigate_to: receipt.parent_id,
            }),
            Err(e) => ToolOutput::error(e.to_string()),
        }
    }

    async fn generate_image(&self, input: GenerateImageInput) -> Result<AssetOutput, BranchError> {
        let references = self
            .resolve(&input.reference_assets.unwrap_or_default())
            .await?
            .into_iter()
            .filter(|a| a.kind == AssetKind::Image)
            .collect();

        let generated = self
            .media
            .generate_image(ImageRequest {
                conversation_id: self.conversation.id.clone(),
                prompt: input.prompt,
                references,
                aspect_ratio: input.aspect_ratio,
            })
            .await?;

        self.record(AssetKind::Image, generated, "Image generated")
            .await
    }

    async fn generate_video(&self, input: GenerateVideoInput) -> Result<AssetOutput, BranchError> {
        let start_frame = self.resolve_one(input.start_frame_asset_id.as_ref()).await?;
        let end_frame = self.resolve_one(input.end_frame_asset_id.as_ref()).await?;
        let style = self.resolve_one(input.style_asset_id.as_ref()).await?;
        let references = self
            .resolve(&input.reference_asset_ids.unwrap_or_default())
            .await?;

        let generated = self
            .media
            .generate_video(VideoRequest {
                conversation_id: self.conversation.id.clone(),
                prompt: input.prompt,
                start_frame,
                end_frame,
                is_looping: input.is_looping.unwrap_or(false),
                references,
                style,
                aspect_ratio: input.aspect_ratio,
            })
            .await?;

        self.record(AssetKind::Video, generated, "Video generated")
            .await
    }

    async fn concatenate(&self, input: ConcatenateVideosInput) -> Result<AssetOutput, BranchError> {
        let videos = self.resolve(&input.video_asset_ids).await?;
        if let Some(missing) = input
            .video_asset_ids
            .iter()
            .find(|id| !videos.iter().any(|v| &v.id == *id && v.kind == AssetKind::Video))
        {
            return Err(BranchError::InvalidInput(format!(
                "{missing} is not a known video asset"
            )));
        }

        let generated = self
            .media
            .concatenate_videos(ConcatRequest {
                conversation_id: self.conversation.id.clone(),
                videos,
                note: input.note,
            })
            .await?;

        self.record(AssetKind::Video, generated, "Videos concatenated")
            .await
    }

    async fn resolve(&self, ids: &[AssetId]) -> Result<Vec<Asset>, BranchError> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        self.registry.assets(ids).await
    }

    async fn resolve_one(&self, id: Option<&AssetId>) -> Result<Option<Asset>, BranchError> {
        let Some(id) = id else {
            return Ok(None);
        };
        let mut found = self.registry.assets(std::slice::from_ref(id)).await?;
        if found.is_empty() {
            return Err(BranchError::InvalidInput(format!("unknown asset {id}")));
        }
        Ok(Some(found.remove(0)))
    }

    /// Persist a generated artifact against this conversation and announce it.
    async fn record(
        &self,
        kind: AssetKind,
        generated: GeneratedMedia,
        message: &str,
    ) -> Result<AssetOutput, BranchError> {
        let asset = Asset {
            id: new_id(),
            conversation_id: self.conversation.id.clone(),
            kind,
            uri: generated.uri,
            created_at: Utc::now(),
        };
        self.registry.record_asset(asset.clone()).await?;

        tracing::info!(
            conversation_id = %self.conversation.id,
            asset_id = %asset.id,
            kind = kind.as_str(),
            "Asset created"
        );
        self.events.emit(BranchEvent::AssetCreated {
            conversation_id: asset.conversation_id.clone(),
            asset_id: asset.id.clone(),
            kind,
            uri: asset.uri.clone(),
        });

        let message = match generated.note {
            Some(note) => format!("{message}. {note}"),
            None => message.to_string(),
        };
        Ok(AssetOutput {
            asset_id: asset.id,
            url: asset.uri,
            message,
        })
    }
}

#[async_trait]
impl ToolHost for BranchToolHost {
    fn tools(&self) -> Vec<ToolName> {
        let mut tools = Vec::with_capacity(4);
        match self.conversation.kind {
            ConversationKind::SubAgent => {}
            ConversationKind::Standalone | ConversationKind::Orchestrator => {
                if self.spawner.is_some() {
                    tools.push(ToolName::SpawnSubAgents);
                }
            }
        }
        tools.extend([
            ToolName::GenerateImage,
            ToolName::GenerateVideo,
            ToolName::ConcatenateVideos,
        ]);
        if self.conversation.is_sub_agent() {
            tools.push(ToolName::ReturnToParent);
        }
        tools
    }

    async fn invoke(&self, call: ToolCall) -> ToolOutput {
        let name = call.name();
        if !self.tools().contains(&name) {
            return ToolOutput::error(format!(
                "{name} is not available in a {} conversation",
                self.conversation.kind.as_str()
            ));
        }
        if let Err(e) = call.validate() {
            return ToolOutput::error(e.to_string());
        }

        tracing::debug!(conversation_id = %self.conversation.id, tool = %name, "Invoking tool");
        let result = match call {
            ToolCall::SpawnSubAgents(input) => return self.spawn(input).await,
            ToolCall::ReturnToParent(input) => return self.return_to_parent(input).await,
            ToolCall::GenerateImage(input) => self
                .generate_image(input)
                .await
                .map(ToolOutput::GenerateImage),
            ToolCall::GenerateVideo(input) => self
                .generate_video(input)
                .await
                .map(ToolOutput::GenerateVideo),
            ToolCall::ConcatenateVideos(input) => self
                .concatenate(input)
                .await
                .map(ToolOutput::ConcatenateVideos),
        };

        result.unwrap_or_else(|e| {
            tracing::warn!(conversation_id = %self.conversation.id, tool = %name, error = %e, "Tool failed");
            ToolOutput::error(e.to_string())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::MediaError;
    use crate::media::ManifestMedia;
    use crate::model::{BranchStatus, ContentPart};
    use crate::store::MemoryStore;

    struct Fixture {
        registry: BranchRegistry,
        parent: Conversation,
        child: Conversation,
        _dir: tempfile::TempDir,
        media: Arc<dyn MediaBackend>,
    }

    async fn fixture() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let registry = BranchRegistry::new(Arc::new(MemoryStore::new()));
        let root = registry.create_root("owner", "story").await.unwrap();
        let parent = registry.promote_to_orchestrator(&root).await.unwrap();
        let child = registry
            .create_child(&parent, "Scene 1", vec![ContentPart::text("Dock")])
            .await
            .unwrap();
        let media: Arc<dyn MediaBackend> = Arc::new(ManifestMedia::new(dir.path()));
        Fixture {
            registry,
            parent,
            child,
            _dir: dir,
            media,
        }
    }

    fn host(f: &Fixture, conversation: &Conversation) -> BranchToolHost {
        BranchToolHost::new(
            conversation.clone(),
            f.registry.clone(),
            f.media.clone(),
            EventSink::default(),
        )
    }

    #[tokio::test]
    async fn sub_agent_tool_set_has_return_but_no_spawn() {
        let f = fixture().await;
        let tools = host(&f, &f.child).tools();
        assert!(tools.contains(&ToolName::ReturnToParent));
        assert!(!tools.contains(&ToolName::SpawnSubAgents));
    }

    #[tokio::test]
    async fn orchestrator_cannot_return() {
        let f = fixture().await;
        let out = host(&f, &f.parent)
            .invoke(ToolCall::ReturnToParent(ReturnToParentInput {
                assets: vec![],
                summary: None,
            }))
            .await;
        assert!(out.is_error());
    }

    #[tokio::test]
    async fn return_tool_records_value_and_navigates_to_parent() {
        let f = fixture().await;
        let out = host(&f, &f.child)
            .invoke(ToolCall::ReturnToParent(ReturnToParentInput {
                assets: vec!["a1".into()],
                summary: Some("done".into()),
            }))
            .await;

        match out {
            ToolOutput::ReturnToParent(ret) => {
                assert!(ret.success);
                assert_eq!(ret.navigate_to.as_deref(), Some(f.parent.id.as_str()));
            }
            other => panic!("unexpected output: {other:?}"),
        }
        let stored = f.registry.get(&f.child.id).await.unwrap();
        assert_eq!(stored.status, Some(BranchStatus::Returned));
    }

    #[tokio::test]
    async fn generated_image_is_recorded_against_conversation() {
        let f = fixture().await;
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let host = BranchToolHost::new(
            f.child.clone(),
            f.registry.clone(),
            f.media.clone(),
            EventSink::new(Some(tx)),
        );

        let out = host
            .invoke(ToolCall::GenerateImage(GenerateImageInput {
                prompt: "a dock at dawn".into(),
                reference_assets: None,
                aspect_ratio: None,
            }))
            .await;
        let ToolOutput::GenerateImage(asset) = out else {
            panic!("expected image output");
        };

        let stored = f.registry.store().list_assets(&f.child.id).await.unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].id, asset.asset_id);
        assert!(matches!(
            rx.recv().await,
            Some(BranchEvent::AssetCreated { kind: AssetKind::Image, .. })
        ));
    }

    #[tokio::test]
    async fn concatenate_rejects_unknown_videos() {
        let f = fixture().await;
        let out = host(&f, &f.child)
            .invoke(ToolCall::ConcatenateVideos(ConcatenateVideosInput {
                video_asset_ids: vec!["v1".into(), "v2".into()],
                note: None,
            }))
            .await;
        assert!(matches!(out, ToolOutput::Error { message } if message.contains("v1")));
    }

    #[tokio::test]
    async fn invalid_calls_are_reported_not_executed() {
        let f = fixture().await;
        let out = host(&f, &f.child)
            .invoke(ToolCall::GenerateImage(GenerateImageInput {
                prompt: "  ".into(),
                reference_assets: None,
                aspect_ratio: None,
            }))
            .await;
        assert!(out.is_error());
        assert!(f.registry.store().list_assets(&f.child.id).await.unwrap().is_empty());
    }

    struct Offline;

    #[async_trait]
    impl MediaBackend for Offline {
        async fn generate_image(&self, _: ImageRequest) -> Result<GeneratedMedia, MediaError> {
            Err(MediaError::Rejected("quota exceeded".into()))
        }

        async fn generate_video(&self, _: VideoRequest) -> Result<GeneratedMedia, MediaError> {
            Err(MediaError::Rejected("quota exceeded".into()))
        }

        async fn concatenate_videos(
            &self,
            _: ConcatRequest,
        ) -> Result<GeneratedMedia, MediaError> {
            Err(MediaError::Rejected("quota exceeded".into()))
        }
    }

    #[tokio::test]
    async fn media_failures_surface_as_media_errors() {
        let mut f = fixture().await;
        f.media = Arc::new(Offline);
        let host = host(&f, &f.child);

        let err = host
            .generate_image(GenerateImageInput {
                prompt: "a dock at dawn".into(),
                reference_assets: None,
                aspect_ratio: None,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, BranchError::Media(MediaError::Rejected(_))));

        let out = host
            .invoke(ToolCall::GenerateImage(GenerateImageInput {
                prompt: "a dock at dawn".into(),
                reference_assets: None,
                aspect_ratio: None,
            }))
            .await;
        assert!(matches!(out, ToolOutput::Error { message } if message == "generation rejected: quota exceeded"));
        assert!(f.registry.store().list_assets(&f.child.id).await.unwrap().is_empty());
    }
}
