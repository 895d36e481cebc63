//! Closed tool model shared by every executor.
//!
//! Each tool has an enumerated [`ToolName`], a typed input carried by
//! [`ToolCall`] and a typed output carried by [`ToolOutput`]. Model-facing
//! JSON schemas are produced by [`define_tools`]; raw model calls are parsed
//! with [`ToolCall::parse`] so nothing untyped reaches the branching engine.

use std::fmt;
use std::str::FromStr;

use genai::chat::Tool;
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::error::ExecutorError;
use crate::model::AssetId;

/// Enumerated tool identifiers, using the names the model sees.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ToolName {
    SpawnSubAgents,
    ReturnToParent,
    GenerateImage,
    GenerateVideo,
    ConcatenateVideos,
}

impl ToolName {
    pub fn as_str(&self) -> &'static str {
        match self {
            ToolName::SpawnSubAgents => "spawnSubAgents",
            ToolName::ReturnToParent => "returnToParent",
            ToolName::GenerateImage => "generateImage",
            ToolName::GenerateVideo => "generateVideo",
            ToolName::ConcatenateVideos => "concatenateVideos",
        }
    }
}

impl fmt::Display for ToolName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ToolName {
    type Err = ExecutorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "spawnSubAgents" => Ok(ToolName::SpawnSubAgents),
            "returnToParent" => Ok(ToolName::ReturnToParent),
            "generateImage" => Ok(ToolName::GenerateImage),
            "generateVideo" => Ok(ToolName::GenerateVideo),
            "concatenateVideos" => Ok(ToolName::ConcatenateVideos),
            other => Err(ExecutorError::InvalidToolCall {
                tool: other.to_string(),
                message: "unknown tool".to_string(),
            }),
        }
    }
}

// ---------------------------------------------------------------------------
// Inputs
// ---------------------------------------------------------------------------

/// One brief inside a `spawnSubAgents` call.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BriefInput {
    /// Name/title for the branch.
    pub name: String,
    /// The task handed to the sub-agent.
    pub brief: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reference_assets: Option<Vec<AssetId>>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SpawnSubAgentsInput {
    pub agents: Vec<BriefInput>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReturnToParentInput {
    pub assets: Vec<AssetId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ImageAspectRatio {
    #[serde(rename = "1:1")]
    Square,
    #[serde(rename = "16:9")]
    Landscape,
    #[serde(rename = "9:16")]
    Portrait,
    #[serde(rename = "4:3")]
    Standard,
    #[serde(rename = "3:4")]
    StandardPortrait,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum VideoAspectRatio {
    #[serde(rename = "16:9")]
    Landscape,
    #[serde(rename = "9:16")]
    Portrait,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateImageInput {
    pub prompt: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reference_assets: Option<Vec<AssetId>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aspect_ratio: Option<ImageAspectRatio>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateVideoInput {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_frame_asset_id: Option<AssetId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_frame_asset_id: Option<AssetId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_looping: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reference_asset_ids: Option<Vec<AssetId>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub style_asset_id: Option<AssetId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aspect_ratio: Option<VideoAspectRatio>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConcatenateVideosInput {
    /// Ordered list of video asset ids.
    pub video_asset_ids: Vec<AssetId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

/// A typed tool call, selected by [`ToolName`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "tool", content = "input", rename_all = "camelCase")]
pub enum ToolCall {
    SpawnSubAgents(SpawnSubAgentsInput),
    ReturnToParent(ReturnToParentInput),
    GenerateImage(GenerateImageInput),
    GenerateVideo(GenerateVideoInput),
    ConcatenateVideos(ConcatenateVideosInput),
}

impl ToolCall {
    pub fn name(&self) -> ToolName {
        match self {
            ToolCall::SpawnSubAgents(_) => ToolName::SpawnSubAgents,
            ToolCall::ReturnToParent(_) => ToolName::ReturnToParent,
            ToolCall::GenerateImage(_) => ToolName::GenerateImage,
            ToolCall::GenerateVideo(_) => ToolName::GenerateVideo,
            ToolCall::ConcatenateVideos(_) => ToolName::ConcatenateVideos,
        }
    }

    /// Parse a raw `(fn_name, arguments)` pair produced by a model.
    pub fn parse(fn_name: &str, arguments: serde_json::Value) -> Result<Self, ExecutorError> {
        let name = ToolName::from_str(fn_name)?;
        let call: ToolCall = serde_json::from_value(json!({
            "tool": name.as_str(),
            "input": arguments,
        }))
        .map_err(|e| ExecutorError::InvalidToolCall {
            tool: fn_name.to_string(),
            message: e.to_string(),
        })?;
        call.validate()?;
        Ok(call)
    }

    /// Schema-level checks serde cannot express.
    pub fn validate(&self) -> Result<(), ExecutorError> {
        let invalid = |message: &str| ExecutorError::InvalidToolCall {
            tool: self.name().to_string(),
            message: message.to_string(),
        };
        match self {
            ToolCall::GenerateImage(input) if input.prompt.trim().is_empty() => {
                Err(invalid("prompt must not be empty"))
            }
            ToolCall::ConcatenateVideos(input) if input.video_asset_ids.len() < 2 => {
                Err(invalid("provide at least two video asset IDs"))
            }
            _ => Ok(()),
        }
    }
}

// ---------------------------------------------------------------------------
// Outputs
// ---------------------------------------------------------------------------

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SpawnPhase {
    /// Branches dispatched; the orchestrator must wait.
    Pending,
    /// All branches resolved; results are attached.
    Complete,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SpawnedAgentOutput {
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub returned_assets: Option<Vec<AssetId>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SpawnSubAgentsOutput {
    pub status: SpawnPhase,
    pub agents: Vec<SpawnedAgentOutput>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReturnToParentOutput {
    pub success: bool,
    pub message: String,
    pub navigate_to: Option<String>,
}

/// Output of any generation tool.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssetOutput {
    pub asset_id: AssetId,
    pub url: String,
    pub message: String,
}

/// A typed tool result. Failures are values, never `Err`, so the model can
/// observe them and react.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "tool", content = "output", rename_all = "camelCase")]
pub enum ToolOutput {
    SpawnSubAgents(SpawnSubAgentsOutput),
    ReturnToParent(ReturnToParentOutput),
    GenerateImage(AssetOutput),
    GenerateVideo(AssetOutput),
    ConcatenateVideos(AssetOutput),
    Error { message: String },
}

impl ToolOutput {
    pub fn error(message: impl Into<String>) -> Self {
        ToolOutput::Error {
            message: message.into(),
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, ToolOutput::Error { .. })
    }

    /// JSON body handed back to the model as the tool response.
    pub fn to_model_json(&self) -> String {
        let value = match self {
            ToolOutput::SpawnSubAgents(out) => serde_json::to_value(out),
            ToolOutput::ReturnToParent(out) => serde_json::to_value(out),
            ToolOutput::GenerateImage(out)
            | ToolOutput::GenerateVideo(out)
            | ToolOutput::ConcatenateVideos(out) => serde_json::to_value(out),
            ToolOutput::Error { message } => Ok(json!({ "error": message })),
        };
        value
            .map(|v| v.to_string())
            .unwrap_or_else(|e| json!({ "error": format!("failed to encode tool output: {e}") }).to_string())
    }
}

// ---------------------------------------------------------------------------
// Model-facing schemas
// ---------------------------------------------------------------------------

/// Build the genai tool schemas for the given subset of tools.
pub fn define_tools(names: &[ToolName]) -> Vec<Tool> {
    names.iter().map(|name| define_tool(*name)).collect()
}

fn define_tool(name: ToolName) -> Tool {
    match name {
        ToolName::SpawnSubAgents => Tool::new(name.as_str())
            .with_description(
                "Spawn parallel sub-agent conversations to work on separate creative tasks. \
                 Each sub-agent works independently and returns its results. After calling \
                 this tool, stop and wait for the branches to return.",
            )
            .with_schema(json!({
                "type": "object",
                "properties": {
                    "agents": {
                        "type": "array",
                        "minItems": 1,
                        "maxItems": 10,
                        "items": {
                            "type": "object",
                            "properties": {
                                "name": { "type": "string", "description": "Name/title for this sub-agent branch" },
                                "brief": { "type": "string", "description": "The specific task/brief for this sub-agent" },
                                "referenceAssets": {
                                    "type": "array",
                                    "items": { "type": "string" },
                                    "description": "Asset UUIDs to include as references"
                                }
                            },
                            "required": ["name", "brief"]
                        }
                    }
                },
                "required": ["agents"]
            })),
        ToolName::ReturnToParent => Tool::new(name.as_str())
            .with_description(
                "Return results to the parent orchestrator conversation. Call once, when the \
                 sub-agent task is complete.",
            )
            .with_schema(json!({
                "type": "object",
                "properties": {
                    "assets": {
                        "type": "array",
                        "items": { "type": "string" },
                        "description": "Asset UUIDs to return to parent"
                    },
                    "summary": { "type": "string", "description": "Brief summary of what was accomplished" }
                },
                "required": ["assets"]
            })),
        ToolName::GenerateImage => Tool::new(name.as_str())
            .with_description(
                "Generate an image from a text prompt. Can optionally use reference images \
                 for style or content guidance.",
            )
            .with_schema(json!({
                "type": "object",
                "properties": {
                    "prompt": { "type": "string", "description": "Detailed description of the image to generate" },
                    "referenceAssets": {
                        "type": "array",
                        "items": { "type": "string" },
                        "description": "Optional asset UUIDs to use as visual references"
                    },
                    "aspectRatio": { "type": "string", "enum": ["1:1", "16:9", "9:16", "4:3", "3:4"] }
                },
                "required": ["prompt"]
            })),
        ToolName::GenerateVideo => Tool::new(name.as_str())
            .with_description(
                "Generate a video. Supports text-to-video, image-to-video with start/end \
                 frames, and reference-based generation.",
            )
            .with_schema(json!({
                "type": "object",
                "properties": {
                    "prompt": { "type": "string", "description": "Text description of the video to generate" },
                    "startFrameAssetId": { "type": "string", "description": "Asset UUID to use as the starting frame" },
                    "endFrameAssetId": { "type": "string", "description": "Asset UUID to use as the ending frame" },
                    "isLooping": { "type": "boolean", "description": "With a start frame, create a looping video" },
                    "referenceAssetIds": {
                        "type": "array",
                        "items": { "type": "string" },
                        "description": "Asset UUIDs to use as visual references"
                    },
                    "styleAssetId": { "type": "string", "description": "Asset UUID to use as style reference" },
                    "aspectRatio": { "type": "string", "enum": ["16:9", "9:16"] }
                }
            })),
        ToolName::ConcatenateVideos => Tool::new(name.as_str())
            .with_description("Stitch multiple video assets, in order, into one clip.")
            .with_schema(json!({
                "type": "object",
                "properties": {
                    "videoAssetIds": {
                        "type": "array",
                        "items": { "type": "string" },
                        "minItems": 2,
                        "description": "Ordered list of video asset IDs to concatenate"
                    },
                    "note": { "type": "string", "description": "Optional context for the combined clip" }
                },
                "required": ["videoAssetIds"]
            })),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_spawn_call_with_reference_assets() {
        let call = ToolCall::parse(
            "spawnSubAgents",
            json!({
                "agents": [
                    { "name": "Scene 1", "brief": "Dock at golden hour", "referenceAssets": ["a1"] },
                    { "name": "Scene 2", "brief": "Harbor at night" }
                ]
            }),
        )
        .unwrap();

        let ToolCall::SpawnSubAgents(input) = call else {
            panic!("expected spawnSubAgents");
        };
        assert_eq!(input.agents.len(), 2);
        assert_eq!(input.agents[0].reference_assets.as_deref(), Some(&["a1".to_string()][..]));
        assert!(input.agents[1].reference_assets.is_none());
    }

    #[test]
    fn parse_rejects_unknown_tool() {
        let err = ToolCall::parse("shell_exec", json!({"command": "ls"})).unwrap_err();
        assert!(err.to_string().contains("unknown tool"));
    }

    #[test]
    fn parse_rejects_missing_required_field() {
        let err = ToolCall::parse("returnToParent", json!({"summary": "done"})).unwrap_err();
        assert!(matches!(err, ExecutorError::InvalidToolCall { .. }));
    }

    #[test]
    fn concatenate_requires_two_videos() {
        let err = ToolCall::parse("concatenateVideos", json!({"videoAssetIds": ["v1"]})).unwrap_err();
        assert!(err.to_string().contains("at least two"));

        assert!(ToolCall::parse("concatenateVideos", json!({"videoAssetIds": ["v1", "v2"]})).is_ok());
    }

    #[test]
    fn image_aspect_ratio_uses_ratio_strings() {
        let call = ToolCall::parse(
            "generateImage",
            json!({"prompt": "a lighthouse", "aspectRatio": "9:16"}),
        )
        .unwrap();
        let ToolCall::GenerateImage(input) = call else {
            panic!("expected generateImage");
        };
        assert_eq!(input.aspect_ratio, Some(ImageAspectRatio::Portrait));

        assert!(ToolCall::parse("generateImage", json!({"prompt": "x", "aspectRatio": "2:1"})).is_err());
    }

    #[test]
    fn error_output_is_reported_as_error_json() {
        let out = ToolOutput::error("boom");
        assert!(out.is_error());
        let parsed: serde_json::Value = serde_json::from_str(&out.to_model_json()).unwrap();
        assert_eq!(parsed["error"], "boom");
    }

    #[test]
    fn define_tools_returns_requested_subset() {
        let tools = define_tools(&[ToolName::GenerateImage, ToolName::ReturnToParent]);
        assert_eq!(tools.len(), 2);
        assert!(define_tools(&[]).is_empty());
    }
}
