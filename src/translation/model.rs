//! Model-assisted translator.
//!
//! Asks a [`PromptBackend`] for a JSON array of candidate commands. Model
//! output is never trusted more than the rules: confidence is capped and
//! every model intent requires confirmation. When the backend is down or
//! its reply is unusable, translation degrades to the rule-based result.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, info, warn};

use super::{
    CommandIntent, CommandRequest, CommandTranslationResult, CommandTranslator,
    RuleBasedTranslator,
};
use crate::runner::{BackendError, PromptBackend};

/// Upper bound on the confidence of a model-proposed intent.
pub const MODEL_CONFIDENCE_CAP: f64 = 0.8;

/// Confidence used when the model omits one.
const DEFAULT_MODEL_CONFIDENCE: f64 = 0.5;

#[derive(Error, Debug)]
pub enum TranslationError {
    #[error("translator backend unavailable: {0}")]
    BackendUnavailable(#[from] BackendError),

    #[error("model reply contained no usable intents")]
    NoUsableIntents,
}

/// Shape of one element of the model's JSON reply.
#[derive(Debug, Deserialize)]
struct ProposedIntent {
    #[serde(default)]
    description: Option<String>,
    command: Vec<String>,
    #[serde(default)]
    confidence: Option<f64>,
    #[serde(default)]
    notes: Option<String>,
}

pub struct ModelAssistedTranslator {
    backend: Box<dyn PromptBackend>,
    rules: RuleBasedTranslator,
}

impl ModelAssistedTranslator {
    pub fn new(backend: Box<dyn PromptBackend>, rules: RuleBasedTranslator) -> Self {
        Self { backend, rules }
    }

    /// Translates through the backend only, without the rule fallback.
    pub async fn try_translate(
        &self,
        request: &CommandRequest,
    ) -> Result<CommandTranslationResult, TranslationError> {
        let prompt = self.build_prompt(request);
        let output = self.backend.generate(&prompt).await?;
        debug!("Model reply: {} bytes", output.len());

        let identifier = self.backend.identifier();
        let intents = parse_intents(&output, &identifier);
        if intents.is_empty() {
            return Err(TranslationError::NoUsableIntents);
        }

        info!("Model {identifier} proposed {} intent(s)", intents.len());
        Ok(CommandTranslationResult {
            rationale: format!(
                "Used model-assisted translator ({identifier}); {} candidate(s) require confirmation.",
                intents.len()
            ),
            intents,
            used_model: Some(identifier),
        })
    }

    fn build_prompt(&self, request: &CommandRequest) -> String {
        let verbs: Vec<&str> = self.rules.phrases().collect();
        format!(
            "You translate user requests into commands for a sandboxed executor.\n\
             Reply with only a JSON array. Each element is an object with \
             \"description\" (string), \"command\" (array of argv tokens), \
             \"confidence\" (number between 0 and 1) and \"notes\" (string).\n\
             Known verbs: {verbs}\n\
             Safety level: {level}\n\
             Working directory: {cwd}\n\
             Network access: {network}\n\
             Request: {text}",
            verbs = verbs.join(", "),
            level = request.safety_level,
            cwd = request.context.working_directory,
            network = if request.context.allow_network { "enabled" } else { "disabled" },
            text = request.text,
        )
    }
}

#[async_trait]
impl CommandTranslator for ModelAssistedTranslator {
    async fn translate(&self, request: &CommandRequest) -> CommandTranslationResult {
        match self.try_translate(request).await {
            Ok(result) => result,
            Err(err) => {
                warn!("Model translation failed, degrading to rules: {err}");
                let mut result = self.rules.translate(request);
                result.rationale = format!("{err}; degraded to rules. {}", result.rationale);
                result
            }
        }
    }

    fn supported_verbs(&self) -> Vec<String> {
        self.rules.phrases().map(String::from).collect()
    }
}

/// Extracts intents from the first `[` .. last `]` span of the reply.
///
/// Elements that do not deserialize or carry an empty command are skipped.
fn parse_intents(output: &str, identifier: &str) -> Vec<CommandIntent> {
    let span = match (output.find('['), output.rfind(']')) {
        (Some(start), Some(end)) if start < end => &output[start..=end],
        _ => return vec![],
    };

    let elements: Vec<Value> = match serde_json::from_str(span) {
        Ok(elements) => elements,
        Err(e) => {
            debug!("Model reply is not a JSON array: {e}");
            return vec![];
        }
    };

    elements
        .into_iter()
        .filter_map(|value| serde_json::from_value::<ProposedIntent>(value).ok())
        .filter(|proposed| {
            proposed
                .command
                .first()
                .is_some_and(|program| !program.trim().is_empty())
        })
        .filter_map(|proposed| {
            let description = proposed
                .description
                .unwrap_or_else(|| format!("Model-proposed `{}`", proposed.command[0]));
            let confidence = proposed
                .confidence
                .unwrap_or(DEFAULT_MODEL_CONFIDENCE)
                .min(MODEL_CONFIDENCE_CAP);
            let notes = proposed
                .notes
                .unwrap_or_else(|| format!("Proposed by {identifier}"));
            CommandIntent::new(description, proposed.command, confidence, true, Some(notes)).ok()
        })
        .collect()
}
