//! OpenAI-compatible provider client
//!
//! Streams chat completions over raw HTTP (SSE) and accumulates the deltas
//! into one `ModelReply`. Streaming keeps the connection responsive to the
//! session's wall-clock ceiling: dropping the future closes the stream.

use super::ProviderConfig;
use crate::error::ProviderError;
use crate::events::TokenUsage;
use crate::session::{LanguageModel, ModelReply, ModelToolCall};
use async_openai::types::{
    ChatCompletionRequestMessage, ChatCompletionRequestUserMessageContent,
    ChatCompletionRequestUserMessageContentPart, ChatCompletionTool,
};
use async_trait::async_trait;
use futures::StreamExt;
use std::collections::BTreeMap;
use tokio::sync::mpsc;

/// Delta events from a streaming response
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamDelta {
    Text(String),
    ToolCall {
        index: usize,
        id: Option<String>,
        name: Option<String>,
        arguments: String,
    },
    /// Usage info (sent at end of stream)
    Usage { input: u64, output: u64 },
    Done,
}

// Internal types for parsing streaming responses
#[derive(Debug, serde::Deserialize)]
struct StreamChunkDelta {
    content: Option<String>,
    tool_calls: Option<Vec<StreamToolCallChunk>>,
}

#[derive(Debug, serde::Deserialize)]
struct StreamToolCallChunk {
    #[serde(default)]
    index: usize,
    id: Option<String>,
    function: Option<StreamFunctionChunk>,
}

#[derive(Debug, serde::Deserialize)]
struct StreamFunctionChunk {
    name: Option<String>,
    arguments: Option<String>,
}

#[derive(Debug, serde::Deserialize)]
struct StreamChoice {
    delta: StreamChunkDelta,
}

#[derive(Debug, serde::Deserialize)]
struct StreamUsage {
    prompt_tokens: u64,
    completion_tokens: u64,
}

#[derive(Debug, serde::Deserialize)]
struct StreamChunk {
    #[serde(default)]
    choices: Vec<StreamChoice>,
    usage: Option<StreamUsage>,
}

/// Splits an SSE byte stream into lines.
///
/// Bytes are buffered until a newline arrives, so a multi-byte character
/// split across network chunks is decoded whole.
#[derive(Debug, Default)]
struct SseLines {
    buffer: Vec<u8>,
}

impl SseLines {
    /// Append `bytes` and return every complete line, trimmed
    fn push(&mut self, bytes: &[u8]) -> Vec<String> {
        self.buffer.extend_from_slice(bytes);

        let mut lines = Vec::new();
        while let Some(pos) = self.buffer.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=pos).collect();
            match std::str::from_utf8(&line) {
                Ok(text) => lines.push(text.trim().to_string()),
                Err(e) => tracing::debug!(target: "llm", error = %e, "Skipping non-UTF-8 line"),
            }
        }
        lines
    }
}

/// OpenAI-compatible client wrapper
#[derive(Clone)]
pub struct ProviderClient {
    config: ProviderConfig,
    api_key: Option<String>,
    http_client: reqwest::Client,
}

impl ProviderClient {
    /// Create a new provider client from config.
    ///
    /// Fails when the config names an API key variable that is not set.
    pub fn new(config: ProviderConfig) -> Result<Self, ProviderError> {
        let api_key = Self::get_api_key(&config)?;

        // Connection: close behaviour so a dropped stream cancels server-side work
        let http_client = reqwest::Client::builder()
            .pool_max_idle_per_host(0)
            .build()
            .map_err(|e| ProviderError::Request(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            config,
            api_key,
            http_client,
        })
    }

    fn get_api_key(config: &ProviderConfig) -> Result<Option<String>, ProviderError> {
        match &config.api_key_env {
            None => Ok(None),
            Some(var) => std::env::var(var)
                .map(Some)
                .map_err(|_| ProviderError::MissingApiKey(var.clone())),
        }
    }

    pub fn config(&self) -> &ProviderConfig {
        &self.config
    }

    /// Send a streaming chat completion request with tools.
    ///
    /// Streams deltas through the provided channel and finishes with
    /// `StreamDelta::Done`.
    pub async fn chat_stream(
        &self,
        messages: &[ChatCompletionRequestMessage],
        tools: &[ChatCompletionTool],
        tx: mpsc::UnboundedSender<StreamDelta>,
    ) -> Result<(), ProviderError> {
        let body = self.request_body(messages, tools);

        let mut request = self
            .http_client
            .post(format!("{}/chat/completions", self.config.base_url.trim_end_matches('/')))
            .header("Content-Type", "application/json")
            .header("Connection", "close")
            .json(&body);
        if let Some(key) = &self.api_key {
            request = request.header("Authorization", format!("Bearer {}", key));
        }

        let response = request
            .send()
            .await
            .map_err(|e| ProviderError::Request(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let text = response.text().await.unwrap_or_default();
            return Err(ProviderError::Status { status, body: text });
        }

        let mut stream = response.bytes_stream();
        let mut lines = SseLines::default();

        'stream: while let Some(result) = stream.next().await {
            let bytes = result.map_err(|e| ProviderError::Request(format!("Stream read error: {}", e)))?;

            for line in lines.push(&bytes) {
                if line.is_empty() || line.starts_with(':') {
                    continue;
                }
                let Some(data) = line.strip_prefix("data:").map(str::trim_start) else {
                    continue;
                };
                if data == "[DONE]" {
                    break 'stream;
                }

                match serde_json::from_str::<StreamChunk>(data) {
                    Ok(chunk) => Self::forward_chunk(chunk, &tx),
                    Err(e) => tracing::debug!(target: "llm", error = %e, data, "Skipping unparsable chunk"),
                }
            }
        }

        let _ = tx.send(StreamDelta::Done);
        Ok(())
    }

    fn forward_chunk(chunk: StreamChunk, tx: &mpsc::UnboundedSender<StreamDelta>) {
        if let Some(usage) = chunk.usage {
            let _ = tx.send(StreamDelta::Usage {
                input: usage.prompt_tokens,
                output: usage.completion_tokens,
            });
        }

        for choice in chunk.choices {
            if let Some(content) = choice.delta.content {
                if !content.is_empty() {
                    let _ = tx.send(StreamDelta::Text(content));
                }
            }

            for tc in choice.delta.tool_calls.unwrap_or_default() {
                let (name, arguments) = match tc.function {
                    Some(f) => (f.name, f.arguments.unwrap_or_default()),
                    None => (None, String::new()),
                };
                let _ = tx.send(StreamDelta::ToolCall {
                    index: tc.index,
                    id: tc.id,
                    name,
                    arguments,
                });
            }
        }
    }

    fn request_body(
        &self,
        messages: &[ChatCompletionRequestMessage],
        tools: &[ChatCompletionTool],
    ) -> serde_json::Value {
        let tools_json: Vec<serde_json::Value> = tools
            .iter()
            .map(|t| {
                serde_json::json!({
                    "type": "function",
                    "function": {
                        "name": t.function.name,
                        "description": t.function.description,
                        "parameters": t.function.parameters
                    }
                })
            })
            .collect();

        let messages_json: Vec<serde_json::Value> = messages.iter().map(message_to_json).collect();

        let mut body = serde_json::json!({
            "model": self.config.default_model,
            "messages": messages_json,
            "stream": true,
            "stream_options": {"include_usage": true}
        });

        if !tools.is_empty() {
            body["tools"] = serde_json::json!(tools_json);
        }
        body
    }
}

/// Fold a stream of deltas into one reply
pub fn accumulate(deltas: impl IntoIterator<Item = StreamDelta>) -> Result<ModelReply, ProviderError> {
    let mut text = String::new();
    let mut usage = TokenUsage::default();
    // Keyed by stream index so calls come back in the order the model issued them
    let mut parts: BTreeMap<usize, (String, String, String)> = BTreeMap::new();

    for delta in deltas {
        match delta {
            StreamDelta::Text(t) => text.push_str(&t),
            StreamDelta::ToolCall {
                index,
                id,
                name,
                arguments,
            } => {
                let entry = parts.entry(index).or_default();
                if let Some(id) = id {
                    entry.0 = id;
                }
                if let Some(name) = name {
                    entry.1.push_str(&name);
                }
                entry.2.push_str(&arguments);
            }
            StreamDelta::Usage { input, output } => usage.add(TokenUsage { input, output }),
            StreamDelta::Done => break,
        }
    }

    let mut tool_calls = Vec::with_capacity(parts.len());
    for (index, (id, name, arguments)) in parts {
        if name.trim().is_empty() {
            return Err(ProviderError::MalformedResponse(format!(
                "tool call #{} has no function name",
                index
            )));
        }
        let id = if id.is_empty() {
            format!("call_{}", index)
        } else {
            id
        };
        tool_calls.push(ModelToolCall {
            id,
            name,
            arguments,
        });
    }

    if text.trim().is_empty() && tool_calls.is_empty() {
        return Err(ProviderError::MalformedResponse(
            "model returned neither text nor tool calls".to_string(),
        ));
    }

    Ok(ModelReply {
        text,
        tool_calls,
        usage,
    })
}

#[async_trait]
impl LanguageModel for ProviderClient {
    fn model_name(&self) -> &str {
        &self.config.default_model
    }

    async fn complete(
        &self,
        messages: &[ChatCompletionRequestMessage],
        tools: &[ChatCompletionTool],
    ) -> Result<ModelReply, ProviderError> {
        let start = std::time::Instant::now();
        let (tx, mut rx) = mpsc::unbounded_channel();

        self.chat_stream(messages, tools, tx).await.inspect_err(|e| {
            tracing::error!(target: "llm", model = %self.config.default_model, error = %e, "LLM call failed");
        })?;

        let mut deltas = Vec::new();
        while let Ok(delta) = rx.try_recv() {
            deltas.push(delta);
        }
        let reply = accumulate(deltas)?;

        tracing::info!(
            target: "llm",
            model = %self.config.default_model,
            elapsed_ms = start.elapsed().as_millis() as u64,
            input_tokens = reply.usage.input,
            output_tokens = reply.usage.output,
            tool_calls = reply.tool_calls.len(),
            "LLM call completed"
        );
        Ok(reply)
    }
}

/// Convert a ChatCompletionRequestMessage to JSON
fn message_to_json(msg: &ChatCompletionRequestMessage) -> serde_json::Value {
    match msg {
        ChatCompletionRequestMessage::System(s) => {
            serde_json::json!({
                "role": "system",
                "content": s.content
            })
        }
        ChatCompletionRequestMessage::User(u) => {
            let content = match &u.content {
                ChatCompletionRequestUserMessageContent::Text(t) => t.clone(),
                ChatCompletionRequestUserMessageContent::Array(parts) => parts
                    .iter()
                    .filter_map(|p| {
                        if let ChatCompletionRequestUserMessageContentPart::Text(t) = p {
                            Some(t.text.clone())
                        } else {
                            None
                        }
                    })
                    .collect::<Vec<_>>()
                    .join(""),
            };
            serde_json::json!({
                "role": "user",
                "content": content
            })
        }
        ChatCompletionRequestMessage::Assistant(a) => {
            let mut msg = serde_json::json!({ "role": "assistant" });
            if let Some(content) = &a.content {
                msg["content"] = serde_json::json!(content);
            }
            if let Some(tool_calls) = &a.tool_calls {
                msg["tool_calls"] = serde_json::json!(tool_calls);
            }
            msg
        }
        ChatCompletionRequestMessage::Tool(t) => {
            serde_json::json!({
                "role": "tool",
                "tool_call_id": t.tool_call_id,
                "content": t.content
            })
        }
        _ => serde_json::json!({"role": "unknown"}),
    }
}
