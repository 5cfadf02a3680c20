//! Per-turn scratchpad.
//!
//! A turn keeps the user input, every model reply and the tool results fed
//! back to it. The whole pad is rendered to chat-completions messages before
//! each model call, with the system prompt of the current agent in front.

use async_openai::types::{
    ChatCompletionMessageToolCall, ChatCompletionRequestAssistantMessageArgs,
    ChatCompletionRequestMessage, ChatCompletionRequestSystemMessageArgs,
    ChatCompletionRequestToolMessageArgs, ChatCompletionRequestUserMessageArgs,
    ChatCompletionToolType, FunctionCall,
};

const EMPTY_TOOL_OUTPUT: &str = "<Tool returned an empty string>";

#[derive(Debug, Default)]
pub struct Scratchpad {
    steps: Vec<Step>,
}

#[derive(Debug)]
enum Step {
    /// The user's input, or a correction the loop sends in the user's place
    Prompt(String),
    Reply(Reply),
}

/// One model reply and the tool calls it made
#[derive(Debug, Default)]
pub struct Reply {
    text: String,
    calls: Vec<PendingCall>,
}

#[derive(Debug)]
struct PendingCall {
    id: String,
    name: String,
    arguments: String,
    output: Option<String>,
}

impl Reply {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            calls: Vec::new(),
        }
    }

    pub fn call(&mut self, id: &str, name: &str, arguments: &str) {
        self.calls.push(PendingCall {
            id: id.to_string(),
            name: name.to_string(),
            arguments: arguments.to_string(),
            output: None,
        });
    }

    /// Attach `output` to the first unanswered call with this id
    pub fn answer(&mut self, id: &str, output: String) {
        if let Some(call) = self
            .calls
            .iter_mut()
            .find(|c| c.id == id && c.output.is_none())
        {
            call.output = Some(output);
        }
    }

    fn render(&self, out: &mut Vec<ChatCompletionRequestMessage>) {
        // The API rejects a tool call that has no matching tool message
        let answered: Vec<&PendingCall> =
            self.calls.iter().filter(|c| c.output.is_some()).collect();
        if self.text.is_empty() && answered.is_empty() {
            return;
        }

        let mut builder = ChatCompletionRequestAssistantMessageArgs::default();
        if !self.text.is_empty() {
            builder.content(self.text.clone());
        }
        if !answered.is_empty() {
            builder.tool_calls(
                answered
                    .iter()
                    .map(|c| ChatCompletionMessageToolCall {
                        id: c.id.clone(),
                        r#type: ChatCompletionToolType::Function,
                        function: FunctionCall {
                            name: c.name.clone(),
                            arguments: c.arguments.clone(),
                        },
                    })
                    .collect::<Vec<_>>(),
            );
        }
        if let Ok(msg) = builder.build() {
            out.push(msg.into());
        }

        for call in answered {
            let output = match call.output.as_deref() {
                Some("") | None => EMPTY_TOOL_OUTPUT,
                Some(output) => output,
            };
            if let Ok(msg) = ChatCompletionRequestToolMessageArgs::default()
                .tool_call_id(call.id.clone())
                .content(output.to_string())
                .build()
            {
                out.push(msg.into());
            }
        }
    }
}

impl Scratchpad {
    pub fn new(input: impl Into<String>) -> Self {
        Self {
            steps: vec![Step::Prompt(input.into())],
        }
    }

    pub fn push_prompt(&mut self, content: impl Into<String>) {
        self.steps.push(Step::Prompt(content.into()));
    }

    pub fn push_reply(&mut self, reply: Reply) {
        self.steps.push(Step::Reply(reply));
    }

    pub fn to_request_messages(&self, system_prompt: &str) -> Vec<ChatCompletionRequestMessage> {
        let mut out = Vec::with_capacity(self.steps.len() + 1);
        if let Ok(msg) = ChatCompletionRequestSystemMessageArgs::default()
            .content(system_prompt)
            .build()
        {
            out.push(msg.into());
        }

        for step in &self.steps {
            match step {
                Step::Prompt(content) => {
                    if let Ok(msg) = ChatCompletionRequestUserMessageArgs::default()
                        .content(content.clone())
                        .build()
                    {
                        out.push(msg.into());
                    }
                }
                Step::Reply(reply) => reply.render(&mut out),
            }
        }
        out
    }
}
