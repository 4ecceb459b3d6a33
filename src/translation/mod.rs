//! Command translation: turns free-form requests into candidate commands.
//!
//! Translators never execute anything. They produce [`CommandIntent`]s
//! carrying a confidence score and a `requires_confirmation` flag; the
//! caller decides which intent, if any, reaches the sandbox.

pub mod model;
pub mod rules;

use std::collections::HashMap;

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;

pub use model::ModelAssistedTranslator;
pub use rules::RuleBasedTranslator;

/// Errors raised while building translation values.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum IntentError {
    #[error("intent command must contain at least one token")]
    EmptyCommand,
}

/// Execution environment hints supplied by the UI or an agent loop.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CommandContext {
    pub working_directory: String,
    pub environment: HashMap<String, String>,
    pub allow_network: bool,
}

impl Default for CommandContext {
    fn default() -> Self {
        Self {
            working_directory: "/home".to_string(),
            environment: HashMap::new(),
            allow_network: false,
        }
    }
}

/// How much the caller trusts translated commands.
///
/// Only [`SafetyLevel::Unrestricted`] waives confirmation on matched
/// rules. Unknown tags are kept verbatim and treated as restricted.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(into = "String")]
pub enum SafetyLevel {
    #[default]
    Restricted,
    Unrestricted,
    Other(String),
}

impl SafetyLevel {
    pub fn as_str(&self) -> &str {
        match self {
            SafetyLevel::Restricted => "restricted",
            SafetyLevel::Unrestricted => "unrestricted",
            SafetyLevel::Other(tag) => tag,
        }
    }

    pub fn is_unrestricted(&self) -> bool {
        matches!(self, SafetyLevel::Unrestricted)
    }
}

impl From<&str> for SafetyLevel {
    fn from(tag: &str) -> Self {
        match tag {
            "restricted" => SafetyLevel::Restricted,
            "unrestricted" => SafetyLevel::Unrestricted,
            other => SafetyLevel::Other(other.to_string()),
        }
    }
}

impl From<SafetyLevel> for String {
    fn from(level: SafetyLevel) -> Self {
        level.as_str().to_string()
    }
}

impl std::fmt::Display for SafetyLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// User or UI-provided input to translate.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CommandRequest {
    pub text: String,
    pub context: CommandContext,
    pub safety_level: SafetyLevel,
}

impl CommandRequest {
    /// Builds a restricted request with the default context.
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            context: CommandContext::default(),
            safety_level: SafetyLevel::default(),
        }
    }

    pub fn with_context(mut self, context: CommandContext) -> Self {
        self.context = context;
        self
    }

    pub fn with_safety_level(mut self, level: SafetyLevel) -> Self {
        self.safety_level = level;
        self
    }
}

/// A single candidate action.
///
/// Fields are private so an intent cannot be altered once the translator
/// has emitted it; `command` is never empty and `confidence` stays in
/// `[0.0, 1.0]`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CommandIntent {
    description: String,
    command: Vec<String>,
    confidence: f64,
    requires_confirmation: bool,
    notes: Option<String>,
}

impl CommandIntent {
    pub fn new(
        description: impl Into<String>,
        command: Vec<String>,
        confidence: f64,
        requires_confirmation: bool,
        notes: Option<String>,
    ) -> Result<Self, IntentError> {
        if command.is_empty() {
            return Err(IntentError::EmptyCommand);
        }
        let confidence = if confidence.is_nan() {
            0.0
        } else {
            confidence.clamp(0.0, 1.0)
        };
        Ok(Self {
            description: description.into(),
            command,
            confidence,
            requires_confirmation,
            notes,
        })
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn command(&self) -> &[String] {
        &self.command
    }

    /// The executable token (argv[0]).
    pub fn program(&self) -> &str {
        &self.command[0]
    }

    pub fn confidence(&self) -> f64 {
        self.confidence
    }

    pub fn requires_confirmation(&self) -> bool {
        self.requires_confirmation
    }

    pub fn notes(&self) -> Option<&str> {
        self.notes.as_deref()
    }
}

/// Output of a translator: intents in emission order.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CommandTranslationResult {
    pub intents: Vec<CommandIntent>,
    pub rationale: String,
    /// Identifier of the model backend, `None` for the deterministic path.
    /// Advisory only: it never relaxes confirmation requirements.
    pub used_model: Option<String>,
}

impl CommandTranslationResult {
    /// Highest-confidence intent; the first one wins on ties.
    pub fn primary_intent(&self) -> Option<&CommandIntent> {
        let mut best: Option<&CommandIntent> = None;
        for intent in &self.intents {
            match best {
                Some(current) if intent.confidence <= current.confidence => {}
                _ => best = Some(intent),
            }
        }
        best
    }

    pub fn primary_command(&self) -> Option<&[String]> {
        self.primary_intent().map(CommandIntent::command)
    }
}

/// A strategy that turns requests into candidate commands.
///
/// Implementations must not fail for a well-formed request and must
/// always return at least one intent.
#[async_trait]
pub trait CommandTranslator: Send + Sync {
    async fn translate(&self, request: &CommandRequest) -> CommandTranslationResult;

    /// Trigger phrases this translator recognizes, for help surfaces.
    fn supported_verbs(&self) -> Vec<String> {
        vec![]
    }
}
