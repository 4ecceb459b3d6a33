//! Deterministic translator driven by curated trigger phrases.
//!
//! Each phrase is compiled into a whole-word, case-insensitive matcher.
//! Phrases are scanned in declaration order and the first match wins, so
//! at most one rule intent is ever emitted. Unrecognized text yields an
//! inert `echo` fallback that always requires confirmation.

use async_trait::async_trait;
use regex::{Regex, RegexBuilder};
use thiserror::Error;
use tracing::debug;

use super::{CommandIntent, CommandRequest, CommandTranslationResult, CommandTranslator};
use crate::config::{default_rules, CommandRule};

/// Confidence assigned to an intent produced by a matched rule.
pub const RULE_CONFIDENCE: f64 = 0.92;

/// Confidence assigned to the fallback echo intent.
pub const FALLBACK_CONFIDENCE: f64 = 0.25;

#[derive(Error, Debug)]
pub enum RuleError {
    #[error("rule phrase must not be empty")]
    EmptyPhrase,

    #[error("rule `{0}` maps to an empty command")]
    EmptyCommand(String),

    #[error("rule `{phrase}` failed to compile: {source}")]
    Pattern {
        phrase: String,
        #[source]
        source: regex::Error,
    },
}

struct CompiledRule {
    phrase: String,
    pattern: Regex,
    command: Vec<String>,
}

/// Conservative translator that works offline and backs the model path.
pub struct RuleBasedTranslator {
    rules: Vec<CompiledRule>,
}

impl RuleBasedTranslator {
    pub fn new(rules: &[CommandRule]) -> Result<Self, RuleError> {
        let rules = rules
            .iter()
            .map(compile_rule)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { rules })
    }

    /// Synchronous translation; the trait impl delegates here.
    pub fn translate(&self, request: &CommandRequest) -> CommandTranslationResult {
        let normalized = request.text.trim().to_lowercase();

        let matched = self
            .rules
            .iter()
            .find(|rule| rule.pattern.is_match(&normalized));

        match matched {
            Some(rule) => {
                debug!("Rule `{}` matched request", rule.phrase);
                let intent = CommandIntent::new(
                    format!("Execute `{}` based on recognized phrase", rule.command[0]),
                    rule.command.clone(),
                    RULE_CONFIDENCE,
                    !request.safety_level.is_unrestricted(),
                    Some("Matched deterministic rule".to_string()),
                );
                CommandTranslationResult {
                    intents: vec![intent.unwrap_or_else(|_| fallback_intent(&request.text))],
                    rationale: format!(
                        "Used rule-based translator; deterministic patterns preferred. \
                         Matched pattern: {}",
                        rule.pattern.as_str()
                    ),
                    used_model: None,
                }
            }
            None => {
                debug!("No rule matched request, emitting echo fallback");
                CommandTranslationResult {
                    intents: vec![fallback_intent(&request.text)],
                    rationale: "Used rule-based translator; deterministic patterns preferred. \
                                No direct match; emitted safe echo fallback."
                        .to_string(),
                    used_model: None,
                }
            }
        }
    }

    pub fn phrases(&self) -> impl Iterator<Item = &str> {
        self.rules.iter().map(|r| r.phrase.as_str())
    }
}

impl Default for RuleBasedTranslator {
    fn default() -> Self {
        Self::new(&default_rules())
            .unwrap_or_else(|e| unreachable!("default rules are valid: {e}"))
    }
}

#[async_trait]
impl CommandTranslator for RuleBasedTranslator {
    async fn translate(&self, request: &CommandRequest) -> CommandTranslationResult {
        RuleBasedTranslator::translate(self, request)
    }

    fn supported_verbs(&self) -> Vec<String> {
        self.phrases().map(String::from).collect()
    }
}

fn compile_rule(rule: &CommandRule) -> Result<CompiledRule, RuleError> {
    if rule.phrase.trim().is_empty() {
        return Err(RuleError::EmptyPhrase);
    }
    if rule.command.is_empty() {
        return Err(RuleError::EmptyCommand(rule.phrase.clone()));
    }
    let pattern = phrase_pattern(&rule.phrase).map_err(|source| RuleError::Pattern {
        phrase: rule.phrase.clone(),
        source,
    })?;
    Ok(CompiledRule {
        phrase: rule.phrase.clone(),
        pattern,
        command: rule.command.clone(),
    })
}

fn phrase_pattern(phrase: &str) -> Result<Regex, regex::Error> {
    RegexBuilder::new(&format!(r"\b{}\b", regex::escape(phrase)))
        .case_insensitive(true)
        .build()
}

/// Echoes the request back; never auto-approved.
pub(crate) fn fallback_intent(text: &str) -> CommandIntent {
    CommandIntent::new(
        "No deterministic rule matched; propose shell echo",
        vec!["echo".to_string(), format!("Requested: {text}")],
        FALLBACK_CONFIDENCE,
        true,
        Some("Fallback safeguard for unrecognized input".to_string()),
    )
    .unwrap_or_else(|_| unreachable!("fallback command is never empty"))
}
