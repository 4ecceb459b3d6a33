//! Policy layer between free-form requests and process execution.
//!
//! - [`translation`] turns request text into ranked [`CommandIntent`]s
//!   with confidence and confirmation metadata.
//! - [`sandbox`] enforces the allowlist, picks an isolation backend and
//!   runs the chosen command.
//! - [`runner`] provides the prompt backends used by the model-assisted
//!   translator.
//!
//! The two halves are independent: the caller picks an intent, honors
//! `requires_confirmation`, then hands the command to the sandbox.

pub mod config;
pub mod runner;
pub mod sandbox;
pub mod translation;

pub use config::{CommandRule, Config, ModelRunnerConfig, SandboxConfig, TranslatorConfig};
pub use sandbox::{ExecutionOutcome, ExecutorSandbox, SandboxError, SandboxPolicy};
pub use translation::{
    CommandContext, CommandIntent, CommandRequest, CommandTranslationResult, CommandTranslator,
    ModelAssistedTranslator, RuleBasedTranslator, SafetyLevel,
};

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sandbox::{BackendProbe, TokioLauncher};
    use std::path::PathBuf;

    /// Host without bwrap or firejail.
    struct NoIsolation;

    impl BackendProbe for NoIsolation {
        fn locate(&self, _tool: &str) -> Option<PathBuf> {
            None
        }
    }

    fn sandbox(dir: &std::path::Path, allowed: &[&str]) -> ExecutorSandbox {
        let config = SandboxConfig {
            base_workdir: dir.to_path_buf(),
            allowed_binaries: allowed.iter().map(|s| s.to_string()).collect(),
            ..Default::default()
        };
        ExecutorSandbox::with_parts(config, Box::new(NoIsolation), Box::new(TokioLauncher)).unwrap()
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_list_files_end_to_end() {
        let request = CommandRequest::new("please list files now")
            .with_safety_level(SafetyLevel::from("restricted"));
        let result = RuleBasedTranslator::default().translate(&request);

        assert_eq!(result.intents.len(), 1);
        let intent = &result.intents[0];
        assert_eq!(intent.command(), ["ls", "-la"]);
        assert_eq!(intent.confidence(), 0.92);
        assert!(intent.requires_confirmation());

        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("notes.txt"), "hello").unwrap();
        let sandbox = sandbox(dir.path(), &["ls"]);
        assert_eq!(sandbox.build_command(intent.command()).unwrap(), intent.command());

        let outcome = sandbox.run(intent.command(), None).await.unwrap();
        assert_eq!(outcome.exit_code, 0);
        assert!(outcome.stdout.contains("notes.txt"));
    }

    #[test]
    fn test_unmatched_request_end_to_end() {
        let request = CommandRequest::new("delete everything");
        let result = RuleBasedTranslator::default().translate(&request);
        let intent = result.primary_intent().unwrap();
        assert_eq!(intent.command(), ["echo", "Requested: delete everything"]);
        assert_eq!(intent.confidence(), 0.25);
        assert!(intent.requires_confirmation());
    }

    #[tokio::test]
    async fn test_destructive_command_refused_end_to_end() {
        let dir = tempfile::tempdir().unwrap();
        let sandbox = sandbox(dir.path(), &["ls", "cat"]);
        let command: Vec<String> = ["rm", "-rf", "/"].iter().map(|s| s.to_string()).collect();
        let err = sandbox.run(&command, None).await.unwrap_err();
        assert!(matches!(err, SandboxError::PolicyViolation { .. }));
        // The directory is untouched
        assert!(dir.path().is_dir());
    }
}
