//! System prompts for orchestrator and sub-agent runs.
//!
//! Orchestrators plan and delegate; sub-agents focus on one brief and hand
//! their assets back with `returnToParent`. The parent transcript, when
//! carried, is appended to the sub-agent prompt as read-only context.

use crate::model::{ConversationKind, Message};

pub const ORCHESTRATOR_PROMPT: &str = "\
You are a creative director producing storyboards and visual content.

## Your Role
Guide the user through the creative process. Understand their vision, break it
into scenes, delegate the scenes to sub-agents, and assemble the results.

## Workflow
1. DISCOVER: understand the story, tone and audience (at most 2 questions per turn)
2. PLAN: break the narrative into 3-5 distinct scenes with clear visual briefs
3. DELEGATE: use spawnSubAgents to hand each scene to a parallel worker, then stop
4. REVIEW: when every branch has returned, review the returned assets
5. ASSEMBLE: use concatenateVideos to stitch scenes into the final storyboard

## Scene Briefs
Each brief should cover the visual setting, the subject, the action and the
emotion the viewer should feel.

## Tools
- spawnSubAgents: delegate scenes to parallel workers (use for 2+ scenes)
- generateImage: create standalone images or keyframes
- generateVideo: create video clips (consider generating a keyframe first)
- concatenateVideos: stitch multiple video assets into one clip

Keep responses concise and outcome-oriented.";

pub const SUB_AGENT_PROMPT: &str = "\
You are a scene artist working on one storyboard scene assigned by the creative director.

## Your Role
Focus entirely on the brief in the first message. Generate the best possible
visual assets for this scene, then return them to the parent orchestrator.

## Workflow
1. Read the brief carefully and understand its emotional beat
2. If a video would benefit from a specific starting frame, generate an image first
3. Generate assets that match the intent, not just the literal description
4. Call returnToParent exactly once, listing every asset id you want to hand back

## Tools
- generateImage: create images or video keyframes
- generateVideo: create short video clips
- concatenateVideos: stitch clips together
- returnToParent: return completed assets to the orchestrator";

const PARENT_CONTEXT_HEADING: &str = "## Parent Conversation Context\n\
The following is the conversation history from the orchestrator, for context only:\n\n";

/// Build the system prompt for a run of a conversation of `kind`.
///
/// `parent_context` is only used for sub-agents and is skipped when blank.
pub fn system_prompt(kind: ConversationKind, parent_context: Option<&str>) -> String {
    match kind {
        ConversationKind::SubAgent => {
            let mut prompt = String::from(SUB_AGENT_PROMPT);
            if let Some(context) = parent_context.filter(|c| !c.trim().is_empty()) {
                prompt.push_str("\n\n");
                prompt.push_str(PARENT_CONTEXT_HEADING);
                prompt.push_str(context);
            }
            prompt
        }
        ConversationKind::Standalone | ConversationKind::Orchestrator => {
            ORCHESTRATOR_PROMPT.to_string()
        }
    }
}

/// Render the text content of `messages`, oldest first, one `role: text`
/// block per message. Messages without text are skipped.
pub fn render_transcript(messages: &[Message]) -> String {
    messages
        .iter()
        .filter_map(|m| {
            let text = m.text();
            if text.trim().is_empty() {
                None
            } else {
                Some(format!("{}: {}", m.role.as_str(), text))
            }
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ContentPart, Role};

    #[test]
    fn sub_agent_prompt_appends_parent_context() {
        let prompt = system_prompt(ConversationKind::SubAgent, Some("user: make a film"));
        assert!(prompt.starts_with(SUB_AGENT_PROMPT));
        assert!(prompt.contains("Parent Conversation Context"));
        assert!(prompt.ends_with("user: make a film"));
    }

    #[test]
    fn blank_parent_context_is_omitted() {
        let prompt = system_prompt(ConversationKind::SubAgent, Some("   "));
        assert_eq!(prompt, SUB_AGENT_PROMPT);
    }

    #[test]
    fn orchestrator_prompt_ignores_parent_context() {
        let prompt = system_prompt(ConversationKind::Orchestrator, Some("ignored"));
        assert_eq!(prompt, ORCHESTRATOR_PROMPT);
        assert!(prompt.contains("spawnSubAgents"));
    }

    #[test]
    fn transcript_is_chronological_text_only() {
        let messages = vec![
            Message::new("c", Role::User, vec![ContentPart::text("Make a film about a fisherman")]),
            Message::new(
                "c",
                Role::Assistant,
                vec![ContentPart::Attachment {
                    asset_id: "a1".into(),
                }],
            ),
            Message::new("c", Role::Assistant, vec![ContentPart::text("Three scenes it is.")]),
        ];

        assert_eq!(
            render_transcript(&messages),
            "user: Make a film about a fisherman\n\nassistant: Three scenes it is."
        );
    }
}
