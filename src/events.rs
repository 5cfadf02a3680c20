//! Turn result types
//!
//! What an `AgentSession::execute` call hands back to the interaction loop.
//! Only `output` is meant for the user; the executed tool calls are the
//! intermediate-step trace kept for diagnostics and telemetry.

use serde::Serialize;

/// Message returned when a turn hits the iteration or time ceiling
pub const STOPPED_MESSAGE: &str = "Agent stopped due to iteration limit or time limit.";

/// Reason the turn completed
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TurnCompleteReason {
    /// Model answered with text and no tool calls
    TextResponse,
    /// A `return_direct` tool produced the answer
    ReturnDirect { tool: String },
    /// Iteration ceiling reached
    MaxIterations,
    /// Wall-clock ceiling reached
    TimeLimit,
}

impl TurnCompleteReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            TurnCompleteReason::TextResponse => "text_response",
            TurnCompleteReason::ReturnDirect { .. } => "return_direct",
            TurnCompleteReason::MaxIterations => "max_iterations",
            TurnCompleteReason::TimeLimit => "time_limit",
        }
    }
}

/// Result of a single `execute()` call
#[derive(Debug, Clone, Serialize)]
pub struct TurnResult {
    /// Text for the user
    pub output: String,
    /// Last text the model produced before a ceiling stopped the turn
    pub partial: Option<String>,
    /// Tool calls that were executed, in order
    pub tool_calls: Vec<ExecutedToolCall>,
    pub reason: TurnCompleteReason,
    pub usage: TokenUsage,
    /// Model calls made during the turn
    pub iterations: usize,
    /// Registry generation of the tool snapshot that served the turn
    pub generation: u64,
}

impl TurnResult {
    /// True when the turn ended at a ceiling instead of with an answer
    pub fn is_stopped(&self) -> bool {
        matches!(
            self.reason,
            TurnCompleteReason::MaxIterations | TurnCompleteReason::TimeLimit
        )
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ExecutedToolCall {
    pub id: String,
    pub name: String,
    pub arguments: serde_json::Value,
    pub output: String,
    pub is_error: bool,
    pub duration_ms: u64,
}

/// Token usage for a turn
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TokenUsage {
    pub input: u64,
    pub output: u64,
}

impl TokenUsage {
    pub fn add(&mut self, other: TokenUsage) {
        self.input += other.input;
        self.output += other.output;
    }
}
