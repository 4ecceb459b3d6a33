use std::collections::{BTreeSet, HashMap};
use std::path::PathBuf;

use anyhow::Context;
use serde::Deserialize;

use crate::translation::SafetyLevel;

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct Config {
    pub translator: TranslatorConfig,
    pub sandbox: SandboxConfig,
    pub model: ModelRunnerConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct TranslatorConfig {
    /// `"rules"` or `"model"`
    #[serde(default = "default_strategy")]
    pub strategy: String,
    /// Safety level attached to requests built by the CLI
    #[serde(default = "default_safety_level")]
    pub safety_level: String,
    /// Trigger phrases, scanned in declaration order
    #[serde(default = "default_rules")]
    pub rules: Vec<CommandRule>,
}

/// A trigger phrase and the command it maps to.
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct CommandRule {
    pub phrase: String,
    pub command: Vec<String>,
}

impl CommandRule {
    pub fn new(phrase: &str, command: &[&str]) -> Self {
        Self {
            phrase: phrase.to_string(),
            command: command.iter().map(|t| t.to_string()).collect(),
        }
    }
}

/// Constraints applied by the execution sandbox.
#[derive(Debug, Deserialize, Clone)]
pub struct SandboxConfig {
    #[serde(default = "default_base_workdir")]
    pub base_workdir: PathBuf,
    /// Executable basenames allowed to run (exact, case-sensitive)
    #[serde(default = "default_allowed_binaries")]
    pub allowed_binaries: BTreeSet<String>,
    #[serde(default)]
    pub allow_network: bool,
    #[serde(default = "default_memory_limit_mb")]
    pub memory_limit_mb: u64,
    /// Relative CPU weight handed to firejail
    #[serde(default = "default_cpu_shares")]
    pub cpu_shares: u32,
    #[serde(default = "default_exec_timeout_secs")]
    pub timeout_secs: u64,
    /// Cap on captured bytes per output stream
    #[serde(default = "default_max_output_bytes")]
    pub max_output_bytes: usize,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ModelRunnerConfig {
    /// `"shell"` or `"http"`
    #[serde(default = "default_runner")]
    pub runner: String,
    #[serde(default = "default_model_command")]
    pub command: String,
    #[serde(default)]
    pub model_path: Option<PathBuf>,
    /// Required when `runner = "http"`. Supports ${ENV_VAR} substitution
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(default = "default_model_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_model_workdir")]
    pub working_directory: PathBuf,
    #[serde(default)]
    pub extra_env: HashMap<String, String>,
}

fn default_strategy() -> String {
    "rules".to_string()
}

fn default_safety_level() -> String {
    "restricted".to_string()
}

pub fn default_rules() -> Vec<CommandRule> {
    vec![
        CommandRule::new("open browser", &["xdg-open", "https://linuxmint.com"]),
        CommandRule::new("list files", &["ls", "-la"]),
        CommandRule::new("show system info", &["uname", "-a"]),
        CommandRule::new("update packages", &["sudo", "apt", "update"]),
        CommandRule::new("upgrade packages", &["sudo", "apt", "upgrade", "-y"]),
        CommandRule::new("check disk usage", &["df", "-h"]),
    ]
}

fn default_base_workdir() -> PathBuf {
    PathBuf::from("/tmp/aetheros-sandbox")
}

fn default_allowed_binaries() -> BTreeSet<String> {
    ["ls", "cat", "echo", "uname", "df"]
        .into_iter()
        .map(String::from)
        .collect()
}

fn default_memory_limit_mb() -> u64 {
    512
}

fn default_cpu_shares() -> u32 {
    512
}

fn default_exec_timeout_secs() -> u64 {
    30
}

fn default_max_output_bytes() -> usize {
    64 * 1024
}

fn default_runner() -> String {
    "shell".to_string()
}

fn default_model_command() -> String {
    "llama.cpp".to_string()
}

fn default_model_timeout_secs() -> u64 {
    45
}

fn default_model_workdir() -> PathBuf {
    PathBuf::from("/opt/aetheros/models")
}

impl Default for TranslatorConfig {
    fn default() -> Self {
        Self {
            strategy: default_strategy(),
            safety_level: default_safety_level(),
            rules: default_rules(),
        }
    }
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            base_workdir: default_base_workdir(),
            allowed_binaries: default_allowed_binaries(),
            allow_network: false,
            memory_limit_mb: default_memory_limit_mb(),
            cpu_shares: default_cpu_shares(),
            timeout_secs: default_exec_timeout_secs(),
            max_output_bytes: default_max_output_bytes(),
        }
    }
}

impl Default for ModelRunnerConfig {
    fn default() -> Self {
        Self {
            runner: default_runner(),
            command: default_model_command(),
            model_path: None,
            endpoint: None,
            timeout_secs: default_model_timeout_secs(),
            working_directory: default_model_workdir(),
            extra_env: HashMap::new(),
        }
    }
}

impl TranslatorConfig {
    pub fn safety_level(&self) -> SafetyLevel {
        SafetyLevel::from(self.safety_level.as_str())
    }
}

impl Config {
    pub fn load(path: &str) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("read config at {path}"))?;
        Self::parse(&content).with_context(|| format!("parse config at {path}"))
    }

    /// Parses TOML content after expanding `${VAR}` references.
    pub fn parse(content: &str) -> anyhow::Result<Self> {
        let expanded = shellexpand::env(content)?;
        let config: Config = toml::from_str(&expanded)?;
        Ok(config)
    }
}
