//! Stages that call the generative backend.
//!
//! [`MapGenerateStage`] issues one call per item of an input list and writes
//! a list of the same length. [`ReduceGenerateStage`] issues a single call
//! over one or more inputs.

use async_trait::async_trait;
use std::collections::BTreeMap;
use tracing::{debug, warn};

use super::{render_template, GenerationRequest, OutputMode, Stage, StageContext, StageContract};
use crate::core::{AuditEntry, AuditError, ErrorTag, StageOutput, StageResult};
use crate::errors::DraftflowError;
use crate::invoke::CallOptions;
use crate::utils::truncate_chars;

/// Prompt, model and response handling shared by the generative stages.
#[derive(Debug, Clone)]
pub struct GenerationSettings {
    /// Prompt template with `{name}` placeholders.
    pub template: String,
    /// Config key holding the model id.
    pub model_key: String,
    /// Model used when the config key is absent.
    pub default_model: Option<String>,
    /// Sampling temperature.
    pub temperature: Option<f32>,
    /// Context window in tokens.
    pub context_window: Option<u32>,
    /// Response interpretation and fallback.
    pub mode: OutputMode,
}

impl GenerationSettings {
    /// Creates settings for a template, model key and output mode.
    #[must_use]
    pub fn new(template: impl Into<String>, model_key: impl Into<String>, mode: OutputMode) -> Self {
        Self {
            template: template.into(),
            model_key: model_key.into(),
            default_model: None,
            temperature: None,
            context_window: None,
            mode,
        }
    }

    /// Sets the fallback model.
    #[must_use]
    pub fn with_default_model(mut self, model: impl Into<String>) -> Self {
        self.default_model = Some(model.into());
        self
    }

    /// Sets the temperature.
    #[must_use]
    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    /// Sets the context window.
    #[must_use]
    pub fn with_context_window(mut self, tokens: u32) -> Self {
        self.context_window = Some(tokens);
        self
    }

    fn call_options(&self, ctx: &StageContext<'_>) -> Result<CallOptions, DraftflowError> {
        let model = ctx
            .config_str(&self.model_key)
            .map(str::to_string)
            .or_else(|| self.default_model.clone())
            .ok_or_else(|| {
                DraftflowError::stage_execution(
                    ctx.stage_id(),
                    format!("no model configured under '{}'", self.model_key),
                )
            })?;

        let mut options = CallOptions::new(model);
        options.temperature = self.temperature;
        options.context_window = self.context_window;
        options.structured = matches!(self.mode, OutputMode::Json { .. });
        Ok(options)
    }
}

/// Scalar config values, available to every template.
fn config_vars(ctx: &StageContext<'_>) -> BTreeMap<String, String> {
    ctx.config_map()
        .iter()
        .filter_map(|(k, v)| match v {
            serde_json::Value::String(s) => Some((k.clone(), s.clone())),
            serde_json::Value::Number(n) => Some((k.clone(), n.to_string())),
            serde_json::Value::Bool(b) => Some((k.clone(), b.to_string())),
            _ => None,
        })
        .collect()
}

fn to_prompt_text(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        other => serde_json::to_string_pretty(other).unwrap_or_else(|_| other.to_string()),
    }
}

/// One generative call per item of an input list.
#[derive(Debug, Clone)]
pub struct MapGenerateStage {
    id: String,
    contract: StageContract,
    input_key: String,
    pointer: Option<String>,
    output_key: String,
    action: String,
    item_chars: Option<usize>,
    settings: GenerationSettings,
}

impl MapGenerateStage {
    /// Creates a stage mapping `input_key` to `output_key`.
    #[must_use]
    pub fn new(
        id: impl Into<String>,
        input_key: impl Into<String>,
        output_key: impl Into<String>,
        settings: GenerationSettings,
    ) -> Self {
        let id = id.into();
        let input_key = input_key.into();
        let output_key = output_key.into();
        Self {
            contract: StageContract::new()
                .reads([input_key.clone()])
                .writes([output_key.clone()]),
            action: id.clone(),
            id,
            input_key,
            pointer: None,
            output_key,
            item_chars: None,
            settings,
        }
    }

    /// Addresses the list inside the input with a JSON pointer, e.g. `/episodes`.
    #[must_use]
    pub fn with_pointer(mut self, pointer: impl Into<String>) -> Self {
        self.pointer = Some(pointer.into());
        self
    }

    /// Sets the audit action prefix; entries are labelled `prefix:n`.
    #[must_use]
    pub fn with_action(mut self, action: impl Into<String>) -> Self {
        self.action = action.into();
        self
    }

    /// Truncates each item's text to a character budget.
    #[must_use]
    pub fn with_item_chars(mut self, max_chars: usize) -> Self {
        self.item_chars = Some(max_chars);
        self
    }
}

#[async_trait]
impl Stage for MapGenerateStage {
    fn id(&self) -> &str {
        &self.id
    }

    fn contract(&self) -> &StageContract {
        &self.contract
    }

    async fn execute(&self, ctx: &StageContext<'_>) -> StageResult {
        let source = ctx.input(&self.input_key)?;
        let list = match &self.pointer {
            Some(pointer) => source.pointer(pointer),
            None => Some(source),
        }
        .and_then(serde_json::Value::as_array);

        let mut output = StageOutput::ok_empty();

        let Some(items) = list else {
            warn!(stage = %self.id, input = %self.input_key, "Input is not a list, mapping nothing");
            let entry = AuditEntry::new(&self.id, &self.action)
                .with_input_summary(self.input_key.clone())
                .with_error(AuditError::new(
                    ErrorTag::StageError,
                    format!(
                        "'{}'{} is not a list",
                        self.input_key,
                        self.pointer.as_deref().unwrap_or_default()
                    ),
                ));
            output.record(entry, true);
            output.delta.insert(&self.output_key, serde_json::json!([]));
            return Ok(output);
        };

        let options = self.settings.call_options(ctx)?;
        let base_vars = config_vars(ctx);
        let total = items.len();
        let mut results = Vec::with_capacity(total);

        for (i, item) in items.iter().enumerate() {
            let index = i + 1;
            let mut text = to_prompt_text(item);
            if let Some(max) = self.item_chars {
                text = truncate_chars(&text, max);
            }

            let mut vars = base_vars.clone();
            vars.insert("index".to_string(), index.to_string());
            vars.insert("total".to_string(), total.to_string());
            let summary = format!("item {index}/{total}: {} chars", text.chars().count());
            vars.insert("item".to_string(), text);

            let request = GenerationRequest::new(
                format!("{}:{index}", self.action),
                render_template(&self.settings.template, &vars),
                options.clone(),
            )
            .with_input_summary(summary);

            debug!(stage = %self.id, index, total, "Issuing sub-call");
            let generated = ctx.generate(request, &self.settings.mode).await?;
            results.push(generated.value);
            output.record(generated.entry, generated.degraded);
        }

        output
            .delta
            .insert(&self.output_key, serde_json::Value::Array(results));
        Ok(output.add_metadata("items", serde_json::json!(total)))
    }
}

/// An input of a [`ReduceGenerateStage`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReduceInput {
    /// Output key read from the run state.
    pub key: String,
    /// Placeholder name in the template.
    pub placeholder: String,
    /// If true, an absent key renders as `null` instead of failing.
    pub optional: bool,
    /// Character budget for the rendered input.
    pub max_chars: Option<usize>,
}

impl ReduceInput {
    /// A required input rendered under a placeholder of the same name.
    #[must_use]
    pub fn new(key: impl Into<String>) -> Self {
        let key = key.into();
        Self {
            placeholder: key.clone(),
            key,
            optional: false,
            max_chars: None,
        }
    }

    /// Marks the input optional.
    #[must_use]
    pub fn optional(mut self) -> Self {
        self.optional = true;
        self
    }

    /// Renders the input under a different placeholder.
    #[must_use]
    pub fn as_placeholder(mut self, placeholder: impl Into<String>) -> Self {
        self.placeholder = placeholder.into();
        self
    }

    /// Truncates the rendered input.
    #[must_use]
    pub fn truncated(mut self, max_chars: usize) -> Self {
        self.max_chars = Some(max_chars);
        self
    }
}

/// One generative call over one or more inputs.
#[derive(Debug, Clone)]
pub struct ReduceGenerateStage {
    id: String,
    contract: StageContract,
    inputs: Vec<ReduceInput>,
    output_key: String,
    settings: GenerationSettings,
}

impl ReduceGenerateStage {
    /// Creates a stage writing `output_key`.
    #[must_use]
    pub fn new(
        id: impl Into<String>,
        inputs: Vec<ReduceInput>,
        output_key: impl Into<String>,
        settings: GenerationSettings,
    ) -> Self {
        let output_key = output_key.into();
        Self {
            contract: StageContract::new()
                .reads(inputs.iter().map(|i| i.key.clone()))
                .writes([output_key.clone()]),
            id: id.into(),
            inputs,
            output_key,
            settings,
        }
    }
}

#[async_trait]
impl Stage for ReduceGenerateStage {
    fn id(&self) -> &str {
        &self.id
    }

    fn contract(&self) -> &StageContract {
        &self.contract
    }

    async fn execute(&self, ctx: &StageContext<'_>) -> StageResult {
        let mut vars = config_vars(ctx);
        let mut summary = Vec::with_capacity(self.inputs.len());

        for input in &self.inputs {
            let value = if input.optional {
                ctx.input_opt(&input.key)?
            } else {
                Some(ctx.input(&input.key)?)
            };
            let mut text = value.map_or_else(|| "null".to_string(), to_prompt_text);
            if let Some(max) = input.max_chars {
                text = truncate_chars(&text, max);
            }
            summary.push(format!("{}: {} chars", input.key, text.chars().count()));
            vars.insert(input.placeholder.clone(), text);
        }

        let request = GenerationRequest::new(
            self.id.clone(),
            render_template(&self.settings.template, &vars),
            self.settings.call_options(ctx)?,
        )
        .with_input_summary(summary.join(", "));

        let generated = ctx.generate(request, &self.settings.mode).await?;
        let mut output = StageOutput::ok_value(&self.output_key, generated.value);
        output.record(generated.entry, generated.degraded);
        Ok(output)
    }
}
