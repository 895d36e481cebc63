//! Task Executor seam.
//!
//! A [`TaskExecutor`] produces the next assistant turn for a conversation.
//! It may call tools any number of times (bounded by the step budget), always
//! through the [`ToolHost`] it is handed, and reports every exchange back so
//! the dispatcher can persist a normalized assistant message.

use async_trait::async_trait;

use super::tools::{ToolCall, ToolName, ToolOutput};
use crate::error::ExecutorError;
use crate::model::{Conversation, Message};

/// Everything an executor needs to run one turn.
#[derive(Clone, Debug)]
pub struct TurnRequest {
    pub conversation: Conversation,
    pub system_prompt: String,
    /// Full message history, oldest first.
    pub history: Vec<Message>,
    /// Maximum model rounds (each round may issue several tool calls).
    pub step_budget: usize,
}

/// One tool call and its result.
#[derive(Clone, Debug, PartialEq)]
pub struct ToolExchange {
    pub call_id: String,
    pub call: ToolCall,
    pub output: ToolOutput,
}

/// Why a turn ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StopReason {
    /// The model answered without requesting more tools.
    Finished,
    /// The step budget ran out while the model still wanted tools.
    StepBudgetExhausted,
}

/// Result of one turn.
#[derive(Clone, Debug, PartialEq)]
pub struct TurnOutcome {
    /// Tool exchanges in the order they happened.
    pub exchanges: Vec<ToolExchange>,
    /// Final assistant text, if any.
    pub text: Option<String>,
    /// Model rounds used.
    pub steps: usize,
    pub stop: StopReason,
}

/// Executes the tools available to one run.
///
/// `invoke` never fails: errors come back as [`ToolOutput::Error`] so the
/// model can observe them.
#[async_trait]
pub trait ToolHost: Send + Sync {
    /// Tools this run may call.
    fn tools(&self) -> Vec<ToolName>;

    async fn invoke(&self, call: ToolCall) -> ToolOutput;
}

/// Produces one assistant turn for a conversation.
#[async_trait]
pub trait TaskExecutor: Send + Sync {
    async fn run_turn(
        &self,
        request: TurnRequest,
        tools: &dyn ToolHost,
    ) -> Result<TurnOutcome, ExecutorError>;
}
