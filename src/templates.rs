//! Handlebars templates for the system prompt
//!
//! The prompt is re-rendered on every session rebuild so the tool list it
//! mentions always matches the snapshot the agent is bound to.

use handlebars::Handlebars;
use serde::Serialize;
use std::sync::Arc;

const SYSTEM_PROMPT_TEMPLATE: &str = include_str!("templates/system_prompt.hbs");
const SYSTEM_PROMPT: &str = "system_prompt.hbs";

/// Holds the handlebars templates
pub struct Templates {
    handlebars: Handlebars<'static>,
}

impl Templates {
    pub fn new() -> Result<Arc<Self>, handlebars::TemplateError> {
        Self::with_system_prompt(SYSTEM_PROMPT_TEMPLATE)
    }

    /// Use a custom system prompt template instead of the built-in one
    pub fn with_system_prompt(template: &str) -> Result<Arc<Self>, handlebars::TemplateError> {
        let mut handlebars = Handlebars::new();
        handlebars.set_strict_mode(true);
        handlebars.register_helper("contains", Box::new(contains_helper));
        handlebars.register_helper("gt", Box::new(gt_helper));
        handlebars.register_helper("len", Box::new(len_helper));
        handlebars.register_template_string(SYSTEM_PROMPT, template)?;

        Ok(Arc::new(Self { handlebars }))
    }

    /// Render a template by name with the given data
    pub fn render<T: Serialize>(
        &self,
        template_name: &str,
        data: &T,
    ) -> Result<String, handlebars::RenderError> {
        self.handlebars.render(template_name, data)
    }
}

/// Data for rendering the system prompt template
#[derive(Serialize, Clone, Debug)]
pub struct SystemPromptTemplate {
    pub assistant_name: String,
    pub os: String,
    pub working_dir: String,
    pub available_tools: Vec<String>,
    pub model_name: Option<String>,
}

impl SystemPromptTemplate {
    pub fn render(&self, templates: &Templates) -> Result<String, handlebars::RenderError> {
        templates.render(SYSTEM_PROMPT, self)
    }
}

/// The fixed part of the prompt plus its templates, rendered per tool list
#[derive(Clone)]
pub struct SystemPrompt {
    templates: Arc<Templates>,
    data: SystemPromptTemplate,
}

impl SystemPrompt {
    pub fn new(templates: Arc<Templates>, data: SystemPromptTemplate) -> Self {
        Self { templates, data }
    }

    /// Render for the given tools. A render failure falls back to a one-line
    /// prompt so a bad template never blocks a rebuild.
    pub fn render(&self, available_tools: Vec<String>) -> String {
        let mut data = self.data.clone();
        data.available_tools = available_tools;
        match data.render(&self.templates) {
            Ok(prompt) => prompt,
            Err(e) => {
                tracing::error!(error = %e, "Failed to render system prompt");
                format!("You are {}, a helpful assistant.", data.assistant_name)
            }
        }
    }
}

/// Handlebars helper for checking if an item is in a list
fn contains_helper(
    h: &handlebars::Helper,
    _: &handlebars::Handlebars,
    _: &handlebars::Context,
    _: &mut handlebars::RenderContext,
    out: &mut dyn handlebars::Output,
) -> handlebars::HelperResult {
    use handlebars::RenderErrorReason;
    let list = h
        .param(0)
        .and_then(|v| v.value().as_array())
        .ok_or(RenderErrorReason::ParamNotFoundForIndex("contains", 0))?;
    let query = h
        .param(1)
        .map(|v| v.value())
        .ok_or(RenderErrorReason::ParamNotFoundForIndex("contains", 1))?;

    if list.contains(query) {
        out.write("true")?;
    }

    Ok(())
}

handlebars::handlebars_helper!(gt_helper: |a: u64, b: u64| a > b);

handlebars::handlebars_helper!(len_helper: |arr: Json| {
    arr.as_array().map(|a| a.len() as u64).unwrap_or(0)
});
