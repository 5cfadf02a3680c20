//! Agent session - the executable agent and its rebuild coordination
//!
//! An `ExecutableAgent` is bound to one frozen `ToolSet` and runs the ReAct
//! loop:
//! 1. Call the model with the scratchpad and the snapshot's tools
//! 2. Execute the tool calls it asks for, feeding results back
//! 3. Repeat until: text response, a `return_direct` tool, or a ceiling
//!
//! `AgentSession` owns the current agent behind a swappable handle.
//! `execute` clones the handle and releases the lock before running, so a
//! `rebuild` issued from inside a turn (the `reload_tools` tool) replaces
//! the handle without touching the agent the in-flight turn captured. The
//! next turn picks up the rebuilt agent.

use crate::error::{ProviderError, SessionError};
use crate::events::{ExecutedToolCall, TokenUsage, TurnCompleteReason, TurnResult, STOPPED_MESSAGE};
use crate::message::{Reply, Scratchpad};
use crate::registry::SharedRegistry;
use crate::templates::SystemPrompt;
use crate::tool::{ToolContext, ToolResult, ToolSet};
use async_openai::types::{ChatCompletionRequestMessage, ChatCompletionTool};
use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// If 3 consecutive tool calls have the same name and identical arguments,
/// the model is likely stuck in a loop
const DOOM_LOOP_THRESHOLD: usize = 3;

pub const DEFAULT_MAX_ITERATIONS: usize = 10;
pub const DEFAULT_MAX_EXECUTION_TIME: Duration = Duration::from_secs(120);

/// A tool call requested by the model, arguments still raw JSON text
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelToolCall {
    pub id: String,
    pub name: String,
    pub arguments: String,
}

/// One complete model response
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ModelReply {
    pub text: String,
    pub tool_calls: Vec<ModelToolCall>,
    pub usage: TokenUsage,
}

/// The reasoning model the agent talks to
#[async_trait]
pub trait LanguageModel: Send + Sync {
    fn model_name(&self) -> &str;

    async fn complete(
        &self,
        messages: &[ChatCompletionRequestMessage],
        tools: &[ChatCompletionTool],
    ) -> Result<ModelReply, ProviderError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AgentLimits {
    pub max_iterations: usize,
    pub max_execution_time: Duration,
}

impl Default for AgentLimits {
    fn default() -> Self {
        Self {
            max_iterations: DEFAULT_MAX_ITERATIONS,
            max_execution_time: DEFAULT_MAX_EXECUTION_TIME,
        }
    }
}

#[derive(Debug, Clone)]
struct ToolCallRecord {
    name: String,
    args: String,
}

impl ToolCallRecord {
    fn new(name: &str, args: &serde_json::Value) -> Self {
        Self {
            name: name.to_string(),
            args: serde_json::to_string(args).unwrap_or_default(),
        }
    }
}

fn is_doom_loop(recent_calls: &VecDeque<ToolCallRecord>) -> bool {
    if recent_calls.len() < DOOM_LOOP_THRESHOLD {
        return false;
    }
    let calls: Vec<_> = recent_calls.iter().rev().take(DOOM_LOOP_THRESHOLD).collect();
    let first = &calls[0];
    calls.iter().all(|c| c.name == first.name && c.args == first.args)
}

/// Parse raw tool-call arguments; empty means no arguments
fn parse_arguments(name: &str, raw: &str) -> Result<serde_json::Value, String> {
    if raw.trim().is_empty() {
        return Ok(serde_json::json!({}));
    }
    match serde_json::from_str::<serde_json::Value>(raw) {
        Ok(value @ serde_json::Value::Object(_)) => Ok(value),
        Ok(_) => Err(format!(
            "Invalid arguments for tool {}: arguments must be a JSON object",
            name
        )),
        Err(e) => Err(format!(
            "Invalid arguments for tool {}: {}. Arguments must be a JSON object.",
            name, e
        )),
    }
}

/// Accumulated state of one turn
struct TurnState {
    usage: TokenUsage,
    tool_calls: Vec<ExecutedToolCall>,
    partial: Option<String>,
    iterations: usize,
}

/// The reasoning + tool-invocation unit, bound to one snapshot
pub struct ExecutableAgent {
    model: Arc<dyn LanguageModel>,
    system_prompt: String,
    tools: ToolSet,
    tool_definitions: Vec<ChatCompletionTool>,
    limits: AgentLimits,
}

impl ExecutableAgent {
    pub fn new(
        model: Arc<dyn LanguageModel>,
        system_prompt: String,
        tools: ToolSet,
        limits: AgentLimits,
    ) -> Self {
        let tool_definitions = tools.to_openai_tools();
        Self {
            model,
            system_prompt,
            tools,
            tool_definitions,
            limits,
        }
    }

    pub fn tools(&self) -> &ToolSet {
        &self.tools
    }

    pub fn system_prompt(&self) -> &str {
        &self.system_prompt
    }

    pub fn generation(&self) -> u64 {
        self.tools.generation()
    }

    /// Run one turn of the ReAct loop.
    ///
    /// Tool failures, unknown tools, unparsable arguments and malformed
    /// model output are fed back to the model. Only provider transport
    /// errors come back as `Err`.
    pub async fn run(&self, input: &str, ctx: &ToolContext) -> Result<TurnResult, SessionError> {
        let deadline = tokio::time::Instant::now() + self.limits.max_execution_time;
        let mut pad = Scratchpad::new(input);

        let mut state = TurnState {
            usage: TokenUsage::default(),
            tool_calls: Vec::new(),
            partial: None,
            iterations: 0,
        };
        let mut recent_tool_calls: VecDeque<ToolCallRecord> =
            VecDeque::with_capacity(DOOM_LOOP_THRESHOLD + 1);

        for iteration in 0..self.limits.max_iterations {
            if tokio::time::Instant::now() >= deadline {
                return Ok(self.stopped(TurnCompleteReason::TimeLimit, state));
            }
            state.iterations = iteration + 1;

            let messages = pad.to_request_messages(&self.system_prompt);
            let completion = tokio::time::timeout_at(
                deadline,
                self.model.complete(&messages, &self.tool_definitions),
            )
            .await;

            let reply = match completion {
                Err(_) => return Ok(self.stopped(TurnCompleteReason::TimeLimit, state)),
                Ok(Err(ProviderError::MalformedResponse(reason))) => {
                    warn!(iteration, reason = %reason, "Malformed model response, re-prompting");
                    pad.push_prompt(format!(
                        "Invalid or incomplete response: {}. Answer with plain text or a valid tool call.",
                        reason
                    ));
                    continue;
                }
                Ok(Err(e)) => return Err(e.into()),
                Ok(Ok(reply)) => reply,
            };

            state.usage.add(reply.usage);
            if !reply.text.trim().is_empty() {
                state.partial = Some(reply.text.clone());
            }

            // No tool calls = done
            if reply.tool_calls.is_empty() {
                info!(
                    iterations = state.iterations,
                    tool_calls = state.tool_calls.len(),
                    "Turn complete"
                );
                return Ok(TurnResult {
                    output: reply.text,
                    partial: None,
                    tool_calls: state.tool_calls,
                    reason: TurnCompleteReason::TextResponse,
                    usage: state.usage,
                    iterations: state.iterations,
                    generation: self.generation(),
                });
            }

            let mut step = Reply::new(reply.text.clone());
            for call in &reply.tool_calls {
                step.call(&call.id, &call.name, &call.arguments);
            }

            for call in reply.tool_calls {
                let start = Instant::now();

                let (args, result, tool) = match parse_arguments(&call.name, &call.arguments) {
                    Err(e) => (serde_json::Value::Null, ToolResult::error(e), None),
                    Ok(args) => {
                        recent_tool_calls.push_back(ToolCallRecord::new(&call.name, &args));
                        if recent_tool_calls.len() > DOOM_LOOP_THRESHOLD {
                            recent_tool_calls.pop_front();
                        }

                        if is_doom_loop(&recent_tool_calls) {
                            warn!(tool = %call.name, "Doom loop detected");
                            recent_tool_calls.clear();
                            let error = format!(
                                "Doom loop detected: '{}' called {} times with identical arguments. \
                                You seem to be stuck. Please try a different approach.",
                                call.name, DOOM_LOOP_THRESHOLD
                            );
                            (args, ToolResult::error(error), None)
                        } else {
                            match self.tools.get(&call.name) {
                                None => {
                                    let error = format!(
                                        "Unknown tool: {}. Available tools: {}",
                                        call.name,
                                        self.tools.names().join(", ")
                                    );
                                    (args, ToolResult::error(error), None)
                                }
                                Some(tool) => {
                                    debug!(tool = %call.name, arguments = %args, "Executing tool");
                                    let handle = {
                                        let tool = tool.clone();
                                        let args = args.clone();
                                        let ctx = ctx.clone();
                                        tokio::spawn(async move { tool.execute(args, &ctx).await })
                                    };

                                    // The spawned work is left running if the ceiling hits
                                    match tokio::time::timeout_at(deadline, handle).await {
                                        Err(_) => {
                                            warn!(tool = %call.name, "Tool still running at time limit");
                                            state.tool_calls.push(ExecutedToolCall {
                                                id: call.id,
                                                name: call.name,
                                                arguments: args,
                                                output: "Tool did not finish before the time limit".to_string(),
                                                is_error: true,
                                                duration_ms: start.elapsed().as_millis() as u64,
                                            });
                                            return Ok(self.stopped(TurnCompleteReason::TimeLimit, state));
                                        }
                                        Ok(Err(e)) => (
                                            args,
                                            ToolResult::error(format!("Tool {} failed: {}", call.name, e)),
                                            None,
                                        ),
                                        Ok(Ok(result)) => (args, result, Some(tool)),
                                    }
                                }
                            }
                        }
                    }
                };

                let duration_ms = start.elapsed().as_millis() as u64;
                debug!(
                    tool = %call.name,
                    is_error = result.is_error,
                    duration_ms,
                    "Tool call finished"
                );

                state.tool_calls.push(ExecutedToolCall {
                    id: call.id.clone(),
                    name: call.name.clone(),
                    arguments: args,
                    output: result.output.clone(),
                    is_error: result.is_error,
                    duration_ms,
                });

                if let Some(tool) = tool.filter(|t| t.return_direct() && !result.is_error) {
                    info!(tool = %tool.name(), iterations = state.iterations, "Turn complete (return direct)");
                    return Ok(TurnResult {
                        output: result.output,
                        partial: None,
                        tool_calls: state.tool_calls,
                        reason: TurnCompleteReason::ReturnDirect {
                            tool: tool.name().to_string(),
                        },
                        usage: state.usage,
                        iterations: state.iterations,
                        generation: self.generation(),
                    });
                }

                step.answer(&call.id, result.output);
            }

            pad.push_reply(step);
        }

        Ok(self.stopped(TurnCompleteReason::MaxIterations, state))
    }

    fn stopped(&self, reason: TurnCompleteReason, state: TurnState) -> TurnResult {
        warn!(
            reason = reason.as_str(),
            iterations = state.iterations,
            "Agent stopped before answering"
        );
        TurnResult {
            output: STOPPED_MESSAGE.to_string(),
            partial: state.partial,
            tool_calls: state.tool_calls,
            reason,
            usage: state.usage,
            iterations: state.iterations,
            generation: self.generation(),
        }
    }
}

/// Holds the model and prompt, and the current executable agent
pub struct AgentSession {
    model: Arc<dyn LanguageModel>,
    prompt: SystemPrompt,
    limits: AgentLimits,
    context: ToolContext,
    registry: Option<SharedRegistry>,
    current: RwLock<Arc<ExecutableAgent>>,
}

impl AgentSession {
    pub fn new(
        model: Arc<dyn LanguageModel>,
        prompt: SystemPrompt,
        limits: AgentLimits,
        snapshot: ToolSet,
    ) -> Self {
        let agent = Self::build(&model, &prompt, limits, snapshot);
        let working_dir = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
        Self {
            model,
            prompt,
            limits,
            context: ToolContext::new(working_dir, CancellationToken::new()),
            registry: None,
            current: RwLock::new(Arc::new(agent)),
        }
    }

    /// Context handed to every tool invocation
    pub fn with_context(mut self, context: ToolContext) -> Self {
        self.context = context;
        self
    }

    /// Attach the registry so `execute` can detect a stale snapshot
    pub fn with_registry(mut self, registry: SharedRegistry) -> Self {
        self.registry = Some(registry);
        self
    }

    fn build(
        model: &Arc<dyn LanguageModel>,
        prompt: &SystemPrompt,
        limits: AgentLimits,
        snapshot: ToolSet,
    ) -> ExecutableAgent {
        let names = snapshot.names().iter().map(|n| n.to_string()).collect();
        ExecutableAgent::new(model.clone(), prompt.render(names), snapshot, limits)
    }

    /// Replace the executable agent with one bound to `snapshot`.
    ///
    /// Turns already running keep the agent they started with.
    pub fn rebuild(&self, snapshot: ToolSet) {
        let generation = snapshot.generation();
        let count = snapshot.len();
        let agent = Arc::new(Self::build(&self.model, &self.prompt, self.limits, snapshot));
        *self.current.write() = agent;
        info!(generation, tools = count, "Agent session rebuilt");
    }

    /// Rebuild from the attached registry's current state.
    /// Returns false when no registry is attached.
    pub fn rebuild_from_registry(&self) -> bool {
        let Some(registry) = &self.registry else {
            return false;
        };
        let snapshot = registry.read().snapshot();
        self.rebuild(snapshot);
        true
    }

    /// The agent the next turn will run on
    pub fn current(&self) -> Arc<ExecutableAgent> {
        self.current.read().clone()
    }

    pub fn tool_names(&self) -> Vec<String> {
        self.current()
            .tools()
            .names()
            .iter()
            .map(|n| n.to_string())
            .collect()
    }

    /// Registry generation of the current snapshot
    pub fn generation(&self) -> u64 {
        self.current.read().generation()
    }

    pub fn model_name(&self) -> &str {
        self.model.model_name()
    }

    pub fn context(&self) -> &ToolContext {
        &self.context
    }

    /// Serve one user input.
    ///
    /// If the registry moved on since the last rebuild, rebuild first so the
    /// turn never runs on a stale snapshot.
    pub async fn execute(&self, input: &str) -> Result<TurnResult, SessionError> {
        if let Some(registry) = &self.registry {
            let stale = {
                let registry = registry.read();
                (registry.generation() != self.generation()).then(|| registry.snapshot())
            };
            if let Some(snapshot) = stale {
                debug!(
                    from = self.generation(),
                    to = snapshot.generation(),
                    "Snapshot is stale, rebuilding before execute"
                );
                self.rebuild(snapshot);
            }
        }

        let agent = self.current();
        agent.run(input, &self.context).await
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use crate::templates::{SystemPromptTemplate, Templates};
    use std::sync::atomic::{AtomicUsize, Ordering};

    type Script = dyn Fn(usize, &str, &[String]) -> Result<ModelReply, ProviderError> + Send + Sync;

    /// Model driven by a closure of (call index, request json, tool names)
    pub struct ScriptedModel {
        script: Box<Script>,
        calls: AtomicUsize,
    }

    impl ScriptedModel {
        pub fn new<F>(script: F) -> Arc<Self>
        where
            F: Fn(usize, &str, &[String]) -> Result<ModelReply, ProviderError> + Send + Sync + 'static,
        {
            Arc::new(Self {
                script: Box::new(script),
                calls: AtomicUsize::new(0),
            })
        }

        pub fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl LanguageModel for ScriptedModel {
        fn model_name(&self) -> &str {
            "scripted"
        }

        async fn complete(
            &self,
            messages: &[ChatCompletionRequestMessage],
            tools: &[ChatCompletionTool],
        ) -> Result<ModelReply, ProviderError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            let request = serde_json::to_string(messages).unwrap_or_default();
            let names: Vec<String> = tools.iter().map(|t| t.function.name.clone()).collect();
            (self.script)(n, &request, &names)
        }
    }

    pub fn text(s: &str) -> ModelReply {
        ModelReply {
            text: s.to_string(),
            ..Default::default()
        }
    }

    pub fn call(name: &str, args: &str) -> ModelReply {
        ModelReply {
            tool_calls: vec![ModelToolCall {
                id: format!("call_{}", name),
                name: name.to_string(),
                arguments: args.to_string(),
            }],
            ..Default::default()
        }
    }

    pub fn prompt() -> SystemPrompt {
        let templates = Templates::with_system_prompt("Tools: {{#each available_tools}}{{this}} {{/each}}")
            .unwrap();
        SystemPrompt::new(
            templates,
            SystemPromptTemplate {
                assistant_name: "Pierre".to_string(),
                os: "linux".to_string(),
                working_dir: "/tmp".to_string(),
                available_tools: vec![],
                model_name: None,
            },
        )
    }
}

#[cfg(test)]
mod tests {
    use super::testing::*;
    use super::*;
    use crate::tool::testing::EchoTool;
    use crate::tool::{Tool, ToolDefinition};
    use std::sync::atomic::Ordering;
    use std::sync::{OnceLock, Weak};

    fn session(model: Arc<ScriptedModel>, tools: Vec<Arc<dyn Tool>>) -> AgentSession {
        AgentSession::new(model, prompt(), AgentLimits::default(), ToolSet::new(tools, 0))
    }

    #[tokio::test]
    async fn test_text_response() {
        let model = ScriptedModel::new(|_, _, _| Ok(text("Bonjour!")));
        let result = session(model, vec![]).execute("Salut").await.unwrap();

        assert_eq!(result.output, "Bonjour!");
        assert_eq!(result.reason, TurnCompleteReason::TextResponse);
        assert_eq!(result.iterations, 1);
    }

    #[tokio::test]
    async fn test_tool_then_answer() {
        let model = ScriptedModel::new(|n, request, _| match n {
            0 => Ok(call("get_time", "{}")),
            _ => {
                assert!(request.contains("10:42 AM"));
                Ok(text("It is 10:42 AM."))
            }
        });
        let result = session(model, vec![EchoTool::new("get_time", "10:42 AM").shared()])
            .execute("What time is it?")
            .await
            .unwrap();

        assert_eq!(result.output, "It is 10:42 AM.");
        assert_eq!(result.tool_calls.len(), 1);
        assert_eq!(result.tool_calls[0].output, "10:42 AM");
        assert!(!result.output.contains("get_time"));
    }

    #[tokio::test]
    async fn test_return_direct_short_circuits() {
        let model = ScriptedModel::new(|_, _, _| Ok(call("matrix_mode", "")));
        let result = session(
            model.clone(),
            vec![EchoTool::new("matrix_mode", "Matrix mode activated!").direct().shared()],
        )
        .execute("Enter matrix mode")
        .await
        .unwrap();

        assert_eq!(result.output, "Matrix mode activated!");
        assert_eq!(
            result.reason,
            TurnCompleteReason::ReturnDirect {
                tool: "matrix_mode".into()
            }
        );
        assert_eq!(model.calls(), 1);
    }

    #[tokio::test]
    async fn test_unknown_tool_and_bad_arguments_fed_back() {
        let model = ScriptedModel::new(|n, request, _| match n {
            0 => Ok(call("nope", "{}")),
            1 => {
                assert!(request.contains("Unknown tool: nope"));
                Ok(call("get_time", "{not json"))
            }
            _ => {
                assert!(request.contains("Invalid arguments for tool get_time"));
                Ok(text("Sorry."))
            }
        });
        let tool = EchoTool::new("get_time", "now");
        let calls = tool.calls.clone();
        let result = session(model, vec![tool.shared()]).execute("time?").await.unwrap();

        assert_eq!(result.output, "Sorry.");
        assert_eq!(result.iterations, 3);
        assert!(result.tool_calls.iter().all(|c| c.is_error));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_malformed_response_reprompts() {
        let model = ScriptedModel::new(|n, request, _| match n {
            0 => Err(ProviderError::MalformedResponse("empty".into())),
            _ => {
                assert!(request.contains("Invalid or incomplete response"));
                Ok(text("ok"))
            }
        });
        let result = session(model, vec![]).execute("hi").await.unwrap();
        assert_eq!(result.output, "ok");
        assert_eq!(result.iterations, 2);
    }

    #[tokio::test]
    async fn test_provider_error_propagates() {
        let model = ScriptedModel::new(|_, _, _| {
            Err(ProviderError::Status {
                status: 500,
                body: "boom".into(),
            })
        });
        let err = session(model, vec![]).execute("hi").await.unwrap_err();
        assert!(matches!(err, SessionError::Provider(ProviderError::Status { status: 500, .. })));
    }

    #[tokio::test]
    async fn test_iteration_ceiling_keeps_partial() {
        let model = ScriptedModel::new(|n, _, _| {
            let mut reply = call("get_time", &format!("{{\"n\": {}}}", n));
            reply.text = format!("thinking {}", n);
            Ok(reply)
        });
        let result = session(model.clone(), vec![EchoTool::new("get_time", "now").shared()])
            .execute("loop")
            .await
            .unwrap();

        assert_eq!(result.reason, TurnCompleteReason::MaxIterations);
        assert_eq!(result.output, STOPPED_MESSAGE);
        assert_eq!(result.partial.as_deref(), Some("thinking 9"));
        assert_eq!(model.calls(), DEFAULT_MAX_ITERATIONS);
        assert!(result.is_stopped());
    }

    #[tokio::test]
    async fn test_doom_loop_guard() {
        let model = ScriptedModel::new(|n, request, _| match n {
            0..=2 => Ok(call("get_time", "{}")),
            _ => {
                assert!(request.contains("Doom loop detected"));
                Ok(text("stuck"))
            }
        });
        let tool = EchoTool::new("get_time", "now");
        let calls = tool.calls.clone();
        let result = session(model, vec![tool.shared()]).execute("t").await.unwrap();

        assert_eq!(result.output, "stuck");
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert!(result.tool_calls[2].is_error);
    }

    struct SlowTool;

    #[async_trait]
    impl Tool for SlowTool {
        fn name(&self) -> &str {
            "slow"
        }

        fn definition(&self) -> ToolDefinition {
            ToolDefinition::no_args("slow", "Takes a while")
        }

        async fn execute(&self, _args: serde_json::Value, _ctx: &ToolContext) -> ToolResult {
            tokio::time::sleep(Duration::from_secs(5)).await;
            ToolResult::success("done")
        }
    }

    #[tokio::test]
    async fn test_time_ceiling_on_slow_tool() {
        let model = ScriptedModel::new(|_, _, _| Ok(call("slow", "{}")));
        let limits = AgentLimits {
            max_iterations: 10,
            max_execution_time: Duration::from_millis(100),
        };
        let session = AgentSession::new(
            model,
            prompt(),
            limits,
            ToolSet::new(vec![Arc::new(SlowTool)], 0),
        );

        let start = Instant::now();
        let result = session.execute("go").await.unwrap();

        assert_eq!(result.reason, TurnCompleteReason::TimeLimit);
        assert_eq!(result.output, STOPPED_MESSAGE);
        assert!(start.elapsed() < Duration::from_secs(2));
    }

    /// Rebuilds the session from inside a turn, like reload_tools does
    struct SwapTool {
        session: Arc<OnceLock<Weak<AgentSession>>>,
        next: ToolSet,
    }

    #[async_trait]
    impl Tool for SwapTool {
        fn name(&self) -> &str {
            "swap"
        }

        fn definition(&self) -> ToolDefinition {
            ToolDefinition::no_args("swap", "Swap tools")
        }

        async fn execute(&self, _args: serde_json::Value, _ctx: &ToolContext) -> ToolResult {
            match self.session.get().and_then(Weak::upgrade) {
                Some(session) => {
                    session.rebuild(self.next.clone());
                    ToolResult::success("swapped")
                }
                None => ToolResult::error("no session"),
            }
        }
    }

    #[tokio::test]
    async fn test_rebuild_mid_turn_swaps_handle_only() {
        let slot = Arc::new(OnceLock::new());
        let next = ToolSet::new(vec![EchoTool::new("b", "from b").shared()], 1);
        let swap: Arc<dyn Tool> = Arc::new(SwapTool {
            session: slot.clone(),
            next,
        });

        let model = ScriptedModel::new(|n, request, tools| match n {
            0 => Ok(call("swap", "{}")),
            // Same turn: still bound to the old snapshot
            1 => {
                assert_eq!(tools, ["swap"]);
                Ok(call("b", "{}"))
            }
            2 => {
                assert!(request.contains("Unknown tool: b"));
                Ok(text("first turn done"))
            }
            // Next turn: the rebuilt agent
            3 => {
                assert_eq!(tools, ["b"]);
                Ok(call("b", "{}"))
            }
            _ => Ok(text("second turn done")),
        });

        let session = Arc::new(session(model, vec![swap]));
        slot.set(Arc::downgrade(&session)).unwrap();

        let first = session.execute("swap").await.unwrap();
        assert_eq!(first.output, "first turn done");
        assert_eq!(first.generation, 0);
        assert_eq!(session.generation(), 1);

        let second = session.execute("use b").await.unwrap();
        assert_eq!(second.output, "second turn done");
        assert_eq!(second.tool_calls[0].output, "from b");
    }

    #[tokio::test]
    async fn test_stale_snapshot_rebuilt_before_execute() {
        use crate::registry::{ReloadPolicy, ToolRegistry};
        use crate::source::{SourceLoader, StaticSource};
        use crate::tools::Builtins;

        let temp = tempfile::TempDir::new().unwrap();
        let mut loader = SourceLoader::new(temp.path(), Arc::new(Builtins::default()));
        loader.add_static(Arc::new(StaticSource::new("core", || {
            Ok(vec![EchoTool::new("ping", "pong").shared()])
        })));
        let registry = ToolRegistry::new(loader, ReloadPolicy::default()).into_shared();

        let model = ScriptedModel::new(|_, _, tools| Ok(text(&tools.join(","))));
        let session = AgentSession::new(model, prompt(), AgentLimits::default(), registry.read().snapshot())
            .with_registry(registry.clone());

        assert_eq!(session.execute("tools?").await.unwrap().output, "");

        registry.write().load_all(false);
        let result = session.execute("tools?").await.unwrap();
        assert_eq!(result.output, "ping");
        assert_eq!(session.tool_names(), vec!["ping"]);
    }
}
