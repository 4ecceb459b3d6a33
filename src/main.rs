use std::collections::HashMap;
use std::io::Write;

use anyhow::{bail, Context, Result};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use aether_core::runner::{self, PromptBackend, ShellRunner};
use aether_core::{
    CommandContext, CommandIntent, CommandRequest, CommandTranslationResult, CommandTranslator,
    Config, ExecutorSandbox, ModelAssistedTranslator, RuleBasedTranslator, SandboxError,
};

/// Exit code for policy rejections and usage errors.
const EXIT_POLICY: i32 = 2;

fn print_help() {
    println!(
        "\
aether-core v{}

Translates a natural-language request into a command and runs it
inside the execution sandbox.

USAGE:
    aether-core [OPTIONS] <REQUEST...>

ARGUMENTS:
    REQUEST    Free-form request, e.g. \"please list files\"

OPTIONS:
    -c, --config <PATH>     TOML configuration file [default: built-in defaults]
    -e, --env <KEY=VALUE>   Environment override for the command (repeatable)
    -y, --yes               Confirm intents that require confirmation
        --dry-run           Print the wrapped command without running it
        --describe          Print the sandbox policy as JSON and exit
    -h, --help              Print this help message and exit
    -V, --version           Print version and exit

ENVIRONMENT VARIABLES:
    Variables are referenced in the config file via ${{VAR_NAME}} syntax.

    RUST_LOG    Log level filter for tracing
                (e.g. debug, aether_core=debug,warn)

EXAMPLES:
    aether-core list files                    # asks before running ls -la
    aether-core -y check disk usage           # runs df -h without asking
    aether-core --dry-run show system info    # prints the wrapped argv
    aether-core --describe                    # shows the active policy",
        env!("CARGO_PKG_VERSION"),
    );
}

#[derive(Debug, Default, PartialEq)]
struct CliArgs {
    config: Option<String>,
    env: HashMap<String, String>,
    yes: bool,
    dry_run: bool,
    describe: bool,
    text: Vec<String>,
}

#[derive(Debug, PartialEq)]
enum Invocation {
    Run(CliArgs),
    Help,
    Version,
}

fn parse_args(args: impl IntoIterator<Item = String>) -> Result<Invocation, String> {
    let mut parsed = CliArgs::default();
    let mut args = args.into_iter();

    while let Some(arg) = args.next() {
        // Everything after the first request word is request text
        if !parsed.text.is_empty() {
            parsed.text.push(arg);
            continue;
        }
        match arg.as_str() {
            "--version" | "-V" => return Ok(Invocation::Version),
            "--help" | "-h" => return Ok(Invocation::Help),
            "--yes" | "-y" => parsed.yes = true,
            "--dry-run" => parsed.dry_run = true,
            "--describe" => parsed.describe = true,
            "--config" | "-c" => {
                let path = args.next().ok_or("--config requires a path")?;
                parsed.config = Some(path);
            }
            "--env" | "-e" => {
                let pair = args.next().ok_or("--env requires KEY=VALUE")?;
                let (key, value) = pair
                    .split_once('=')
                    .filter(|(key, _)| !key.is_empty())
                    .ok_or_else(|| format!("invalid --env value: {pair}"))?;
                parsed.env.insert(key.to_string(), value.to_string());
            }
            "--" => parsed.text.extend(args.by_ref()),
            flag if flag.starts_with('-') && flag.len() > 1 => {
                return Err(format!("unknown option: {flag}"));
            }
            other => parsed.text.push(other.to_string()),
        }
    }

    Ok(Invocation::Run(parsed))
}

fn build_rules(config: &Config) -> Result<RuleBasedTranslator> {
    RuleBasedTranslator::new(&config.translator.rules).context("invalid translator rules")
}

async fn build_translator(config: &Config) -> Result<Box<dyn CommandTranslator>> {
    match config.translator.strategy.as_str() {
        "rules" => Ok(Box::new(build_rules(config)?)),
        "model" => {
            let backend: Box<dyn PromptBackend> = match config.model.runner.as_str() {
                "shell" => {
                    let shell = ShellRunner::new(config.model.clone());
                    shell.ensure_workdir().await.with_context(|| {
                        format!(
                            "prepare model directory {}",
                            config.model.working_directory.display()
                        )
                    })?;
                    Box::new(shell)
                }
                _ => runner::from_config(&config.model)?,
            };
            info!("Model backend: {}", backend.identifier());
            Ok(Box::new(ModelAssistedTranslator::new(backend, build_rules(config)?)))
        }
        other => bail!("unsupported translator strategy: {other}"),
    }
}

fn print_translation(result: &CommandTranslationResult) {
    println!("{}", result.rationale);
    if let Some(model) = &result.used_model {
        println!("Model: {model}");
    }
    for (i, intent) in result.intents.iter().enumerate() {
        println!(
            "  [{}] {}  (confidence {:.2}{})",
            i + 1,
            intent.command().join(" "),
            intent.confidence(),
            if intent.requires_confirmation() {
                ", confirmation required"
            } else {
                ""
            }
        );
        println!("      {}", intent.description());
        if let Some(notes) = intent.notes() {
            println!("      {notes}");
        }
    }
}

async fn confirm(intent: &CommandIntent) -> Result<bool> {
    eprint!("Run `{}`? [y/N] ", intent.command().join(" "));
    std::io::stderr().flush()?;

    let mut line = String::new();
    BufReader::new(tokio::io::stdin())
        .read_line(&mut line)
        .await?;
    Ok(matches!(line.trim().to_lowercase().as_str(), "y" | "yes"))
}

fn exit_with(code: i32) -> ! {
    // process::exit skips destructors, flush what was printed
    let _ = std::io::stdout().flush();
    let _ = std::io::stderr().flush();
    std::process::exit(code)
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = match parse_args(std::env::args().skip(1)) {
        Ok(Invocation::Run(args)) => args,
        Ok(Invocation::Help) => {
            print_help();
            return Ok(());
        }
        Ok(Invocation::Version) => {
            println!("aether-core v{}", env!("CARGO_PKG_VERSION"));
            return Ok(());
        }
        Err(e) => {
            eprintln!("error: {e}\n\nRun `aether-core --help` for usage.");
            exit_with(EXIT_POLICY);
        }
    };

    // Initialize logging (RUST_LOG=debug for debug mode)
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("aether_core=info")),
        )
        .init();

    let config = match &args.config {
        Some(path) => {
            info!("Loading configuration from {path}");
            Config::load(path)?
        }
        None => Config::default(),
    };

    let sandbox = ExecutorSandbox::new(config.sandbox.clone()).context("prepare sandbox")?;

    if args.describe {
        println!("{}", serde_json::to_string_pretty(&sandbox.describe())?);
        return Ok(());
    }

    if args.text.is_empty() {
        eprintln!("error: missing request text\n\nRun `aether-core --help` for usage.");
        exit_with(EXIT_POLICY);
    }

    let translator = build_translator(&config).await?;
    let request = CommandRequest::new(args.text.join(" "))
        .with_context(CommandContext {
            working_directory: config.sandbox.base_workdir.display().to_string(),
            environment: args.env.clone(),
            allow_network: config.sandbox.allow_network,
        })
        .with_safety_level(config.translator.safety_level());

    let result = translator.translate(&request).await;
    print_translation(&result);

    let Some(intent) = result.primary_intent() else {
        bail!("translator returned no intents");
    };

    if args.dry_run {
        match sandbox.build_command(intent.command()) {
            Ok(argv) => println!("{}", argv.join(" ")),
            Err(e) => {
                eprintln!("error: {e}");
                exit_with(EXIT_POLICY);
            }
        }
        return Ok(());
    }

    if intent.requires_confirmation() && !args.yes && !confirm(intent).await? {
        println!("Aborted.");
        return Ok(());
    }

    match sandbox
        .run(intent.command(), Some(&request.context.environment))
        .await
    {
        Ok(outcome) => {
            print!("{}", outcome.stdout);
            eprint!("{}", outcome.stderr);
            exit_with(outcome.exit_code);
        }
        Err(e @ (SandboxError::PolicyViolation { .. } | SandboxError::MalformedCommand)) => {
            warn!("Refused: {e}");
            eprintln!("error: {e}");
            exit_with(EXIT_POLICY);
        }
        Err(e) => Err(e.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(tokens: &[&str]) -> Result<Invocation, String> {
        parse_args(tokens.iter().map(|t| t.to_string()))
    }

    fn run_args(tokens: &[&str]) -> CliArgs {
        match args(tokens).unwrap() {
            Invocation::Run(parsed) => parsed,
            other => panic!("expected Run, got {other:?}"),
        }
    }

    #[test]
    fn test_parse_request_text() {
        let parsed = run_args(&["please", "list", "files"]);
        assert_eq!(parsed.text, vec!["please", "list", "files"]);
        assert!(!parsed.yes);
        assert!(parsed.config.is_none());
    }

    #[test]
    fn test_parse_flags_before_text() {
        let parsed = run_args(&[
            "-y",
            "--dry-run",
            "-c",
            "aether.toml",
            "-e",
            "LANG=C",
            "check",
            "disk",
            "usage",
        ]);
        assert!(parsed.yes);
        assert!(parsed.dry_run);
        assert_eq!(parsed.config.as_deref(), Some("aether.toml"));
        assert_eq!(parsed.env.get("LANG").map(String::as_str), Some("C"));
        assert_eq!(parsed.text.join(" "), "check disk usage");
    }

    #[test]
    fn test_flags_after_text_are_request_words() {
        let parsed = run_args(&["echo", "-y"]);
        assert!(!parsed.yes);
        assert_eq!(parsed.text, vec!["echo", "-y"]);
    }

    #[test]
    fn test_double_dash_ends_options() {
        let parsed = run_args(&["--", "-h", "means", "help"]);
        assert_eq!(parsed.text, vec!["-h", "means", "help"]);
    }

    #[test]
    fn test_help_and_version() {
        assert_eq!(args(&["--help"]).unwrap(), Invocation::Help);
        assert_eq!(args(&["-V"]).unwrap(), Invocation::Version);
    }

    #[test]
    fn test_parse_errors() {
        assert!(args(&["--config"]).unwrap_err().contains("requires a path"));
        assert!(args(&["--env", "NOVALUE"]).unwrap_err().contains("invalid --env"));
        assert!(args(&["--env", "=x"]).is_err());
        assert!(args(&["--frobnicate"]).unwrap_err().contains("unknown option"));
    }

    #[tokio::test]
    async fn test_build_translator_rejects_unknown_strategy() {
        let mut config = Config::default();
        config.translator.strategy = "oracle".to_string();
        let err = build_translator(&config).await.err().unwrap();
        assert!(err.to_string().contains("oracle"));
    }

    #[tokio::test]
    async fn test_build_translator_rules() {
        let translator = build_translator(&Config::default()).await.unwrap();
        let result = translator.translate(&CommandRequest::new("list files")).await;
        assert_eq!(result.primary_command().unwrap(), ["ls", "-la"]);
    }
}
