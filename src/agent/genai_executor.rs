//! [`TaskExecutor`] backed by the `genai` multi-provider client.
//!
//! Each turn rebuilds a chat request from the stored history, then runs the
//! usual streaming tool loop: stream a response, capture text and tool calls
//! at `End`, execute the calls through the [`ToolHost`], append the responses
//! and go again. The loop is bounded by the request's step budget.

use async_trait::async_trait;
use futures::StreamExt;
use genai::Client;
use genai::chat::{ChatMessage, ChatOptions, ChatRequest, ChatStreamEvent, ToolResponse};

use super::executor::{StopReason, TaskExecutor, ToolExchange, ToolHost, TurnOutcome, TurnRequest};
use super::tools::{ToolCall, ToolOutput, define_tools};
use crate::error::ExecutorError;
use crate::model::{ContentPart, Message, Role};

pub struct GenaiExecutor {
    client: Client,
    model: String,
}

impl GenaiExecutor {
    /// `client` is constructed once at startup and shared by every run.
    pub fn new(client: Client, model: impl Into<String>) -> Self {
        Self {
            client,
            model: model.into(),
        }
    }
}

#[async_trait]
impl TaskExecutor for GenaiExecutor {
    async fn run_turn(
        &self,
        request: TurnRequest,
        tools: &dyn ToolHost,
    ) -> Result<TurnOutcome, ExecutorError> {
        let mut chat_req =
            ChatRequest::from_system(&request.system_prompt).with_tools(define_tools(&tools.tools()));
        for message in &request.history {
            if let Some(msg) = history_message(message) {
                chat_req = chat_req.append_message(msg);
            }
        }

        let chat_options = ChatOptions::default()
            .with_capture_content(true)
            .with_capture_tool_calls(true);

        let conversation_id = request.conversation.id.as_str();
        let mut exchanges = Vec::new();
        let mut texts: Vec<String> = Vec::new();

        for round in 1..=request.step_budget {
            let stream_res = self
                .client
                .exec_chat_stream(&self.model, chat_req.clone(), Some(&chat_options))
                .await
                .map_err(|e| ExecutorError::Llm(e.to_string()))?;

            let mut stream = stream_res.stream;
            let mut captured_text: Option<String> = None;
            let mut captured_tool_calls: Vec<genai::chat::ToolCall> = Vec::new();

            while let Some(event) = stream.next().await {
                match event {
                    Ok(ChatStreamEvent::End(end)) => {
                        if let Some(text) = end.captured_first_text() {
                            captured_text = Some(text.to_string());
                        }
                        if let Some(calls) = end.captured_tool_calls() {
                            captured_tool_calls = calls.into_iter().cloned().collect();
                        }
                    }
                    Ok(_) => {}
                    Err(e) => {
                        // The End event may still arrive.
                        tracing::warn!(conversation_id, round, error = %e, "Stream error");
                    }
                }
            }

            if let Some(text) = captured_text.filter(|t| !t.trim().is_empty()) {
                texts.push(text);
            }

            if captured_tool_calls.is_empty() {
                return Ok(TurnOutcome {
                    exchanges,
                    text: joined(&texts),
                    steps: round,
                    stop: StopReason::Finished,
                });
            }

            chat_req = chat_req.append_message(ChatMessage::from(captured_tool_calls.clone()));

            for call in &captured_tool_calls {
                let output = match ToolCall::parse(&call.fn_name, call.fn_arguments.clone()) {
                    Ok(typed) => {
                        tracing::debug!(conversation_id, round, tool = %typed.name(), "Tool call");
                        let output = tools.invoke(typed.clone()).await;
                        exchanges.push(ToolExchange {
                            call_id: call.call_id.clone(),
                            call: typed,
                            output: output.clone(),
                        });
                        output
                    }
                    Err(e) => {
                        tracing::warn!(conversation_id, round, error = %e, "Rejected tool call");
                        ToolOutput::error(e.to_string())
                    }
                };
                chat_req = chat_req.append_message(ToolResponse::new(
                    call.call_id.clone(),
                    output.to_model_json(),
                ));
            }
        }

        Ok(TurnOutcome {
            exchanges,
            text: joined(&texts),
            steps: request.step_budget,
            stop: StopReason::StepBudgetExhausted,
        })
    }
}

fn joined(texts: &[String]) -> Option<String> {
    if texts.is_empty() {
        None
    } else {
        Some(texts.join("\n\n"))
    }
}

/// Flatten a stored message into a plain chat message. Tool invocations and
/// attachments are rendered inline as bracketed notes.
fn history_message(message: &Message) -> Option<ChatMessage> {
    let rendered: Vec<String> = message
        .parts
        .iter()
        .filter_map(|part| match part {
            ContentPart::Text { text } if !text.trim().is_empty() => Some(text.clone()),
            ContentPart::Text { .. } => None,
            ContentPart::ToolInvocation { call, output, .. } => Some(match output {
                Some(output) => format!("[{} -> {}]", call.name(), output.to_model_json()),
                None => format!("[{} called]", call.name()),
            }),
            ContentPart::Attachment { asset_id } => Some(format!("[attachment {asset_id}]")),
        })
        .collect();

    if rendered.is_empty() {
        return None;
    }
    let content = rendered.join("\n");
    Some(match message.role {
        Role::User => ChatMessage::user(content),
        Role::Assistant => ChatMessage::assistant(content),
    })
}

#[cfg(test)]
mod tests {
    use genai::chat::ChatRole;

    use super::*;
    use crate::agent::tools::{ReturnToParentInput, ReturnToParentOutput};

    #[test]
    fn history_keeps_roles_and_skips_empty_messages() {
        let user = Message::new("c", Role::User, vec![ContentPart::text("Make a film")]);
        let empty = Message::new("c", Role::Assistant, vec![ContentPart::text("  ")]);
        let tool = Message::new(
            "c",
            Role::Assistant,
            vec![ContentPart::ToolInvocation {
                tool_call_id: "call-1".into(),
                call: ToolCall::ReturnToParent(ReturnToParentInput {
                    assets: vec!["a1".into()],
                    summary: None,
                }),
                output: Some(ToolOutput::ReturnToParent(ReturnToParentOutput {
                    success: true,
                    message: "Returned to parent chat".into(),
                    navigate_to: Some("p".into()),
                })),
            }],
        );

        assert_eq!(history_message(&user).unwrap().role, ChatRole::User);
        assert!(history_message(&empty).is_none());
        assert_eq!(history_message(&tool).unwrap().role, ChatRole::Assistant);
    }

    #[test]
    fn joined_texts() {
        assert_eq!(joined(&[]), None);
        assert_eq!(
            joined(&["a".to_string(), "b".to_string()]),
            Some("a\n\nb".to_string())
        );
    }
}
