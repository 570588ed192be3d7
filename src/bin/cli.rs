//! SafeExec CLI
//!
//! Run code and shell commands in a conversation workspace, inspect
//! backends, and manage configuration.

use clap::{Parser, Subcommand};
use console::style;
use safeexec::config::{
    config_path, load_config_from_path, save_config, validate_config, Config,
};
use safeexec::coordinator::ExecutionResult;
use safeexec::extract::FragmentKind;
use safeexec::sandbox::ExecutionLimits;
use safeexec::{ExecutionCoordinator, ExitStatus, VERSION};
use std::io::Read;
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "safeexec",
    author = "SafeExec Contributors",
    version = VERSION,
    about = "SafeExec - sandboxed per-conversation code execution",
    long_about = None
)]
struct Cli {
    /// Use this config file instead of the default location
    #[arg(long, global = true, env = "SAFEEXEC_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Args)]
struct RunArgs {
    /// Conversation whose workspace is used
    #[arg(long, short = 'c', default_value = "default")]
    conversation: String,

    /// Timeout in seconds
    #[arg(long, short)]
    timeout: Option<u64>,

    /// Memory limit in MB (0 disables the limit)
    #[arg(long)]
    memory: Option<u64>,

    /// Print the full result as JSON
    #[arg(long)]
    json: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Execute Python code (fenced blocks and pip install lines are honored)
    Code {
        #[command(flatten)]
        run: RunArgs,
        /// Code to run; `-` or omitted reads stdin
        code: Option<String>,
        /// Read the code from a file
        #[arg(long, short, conflicts_with = "code")]
        file: Option<PathBuf>,
    },

    /// Execute a shell command in the conversation's current directory
    Shell {
        #[command(flatten)]
        run: RunArgs,
        /// Command line
        #[arg(required = true, trailing_var_arg = true, allow_hyphen_values = true)]
        command: Vec<String>,
    },

    /// Show the fragments that would be executed for some text
    Extract {
        /// Text to scan; `-` or omitted reads stdin
        text: Option<String>,
        /// Kind assumed for untagged blocks
        #[arg(long, default_value = "python")]
        kind: String,
    },

    /// Probe and list sandbox backends
    Backends,

    /// Show a conversation's workspace and recent commands
    History {
        /// Conversation id
        conversation: String,
    },

    /// Write a default configuration file
    InitConfig {
        /// Overwrite an existing file
        #[arg(long, short)]
        force: bool,
    },

    /// Validate the configuration
    ValidateConfig,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let path = cli.config.clone().unwrap_or_else(config_path);
    let config = load(&path)?;

    safeexec::logging::init_logging(&config.logging);

    match cli.command {
        Commands::Code { run, code, file } => {
            let code = match file {
                Some(file) => std::fs::read_to_string(&file)?,
                None => text_or_stdin(code)?,
            };
            let coordinator = ExecutionCoordinator::new(&config.sandbox)?;
            let result = coordinator
                .execute_code(&run.conversation, &code, Some(limits(&run)))
                .await;
            finish(&result, run.json)
        }
        Commands::Shell { run, command } => {
            let coordinator = ExecutionCoordinator::new(&config.sandbox)?;
            let result = coordinator
                .execute_shell(&run.conversation, &command.join(" "), Some(limits(&run)))
                .await;
            finish(&result, run.json)
        }
        Commands::Extract { text, kind } => extract(&config, text, &kind),
        Commands::Backends => backends(&config).await,
        Commands::History { conversation } => history(&config, &conversation).await,
        Commands::InitConfig { force } => init_config(&path, force),
        Commands::ValidateConfig => validate(&config),
    }
}

/// Defaults, then the config file if present, then environment overrides
fn load(path: &std::path::Path) -> anyhow::Result<Config> {
    let mut config = if path.exists() {
        load_config_from_path(path)?
    } else {
        Config::default()
    };
    safeexec::config::apply_env_overrides(&mut config);
    Ok(config)
}

fn limits(run: &RunArgs) -> ExecutionLimits {
    ExecutionLimits {
        timeout_seconds: run.timeout,
        memory_limit_mb: run.memory,
    }
}

fn text_or_stdin(text: Option<String>) -> anyhow::Result<String> {
    match text {
        Some(text) if text != "-" => Ok(text),
        _ => {
            let mut buf = String::new();
            std::io::stdin().read_to_string(&mut buf)?;
            Ok(buf)
        }
    }
}

fn finish(result: &ExecutionResult, json: bool) -> anyhow::Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(result)?);
    } else {
        print!("{}", result.output);
        let status = match result.exit_status {
            ExitStatus::Ok => style(result.exit_status.to_string()).green(),
            ExitStatus::Timeout => style(result.exit_status.to_string()).yellow(),
            _ => style(result.exit_status.to_string()).red(),
        };
        let backend = if result.backend_used.is_empty() {
            "-"
        } else {
            result.backend_used.as_str()
        };
        eprintln!(
            "{} {} {}ms cwd={}",
            status,
            style(backend).dim(),
            result.duration_ms,
            result.cwd.as_deref().unwrap_or("/")
        );
    }

    if result.exit_status != ExitStatus::Ok {
        std::process::exit(result.exit_code.filter(|c| *c > 0).unwrap_or(1));
    }
    Ok(())
}

fn extract(config: &Config, text: Option<String>, kind: &str) -> anyhow::Result<()> {
    let declared = match kind {
        "shell" | "sh" | "bash" => FragmentKind::Shell,
        "python" | "py" => FragmentKind::Python,
        other => anyhow::bail!("Unknown kind '{}'. Use python or shell", other),
    };
    let text = text_or_stdin(text)?;
    let extractor = safeexec::extract::Extractor::new(&config.sandbox.install_directives)?;

    let mut count = 0;
    for (i, fragment) in extractor.extract(&text, declared).enumerate() {
        count += 1;
        println!("{} {}", style(format!("[{}]", i + 1)).bold(), style(fragment.kind).cyan());
        println!("{}", fragment.content.trim_end());
        println!();
    }
    if count == 0 {
        println!("{}", style("No executable fragments found").dim());
    }
    Ok(())
}

async fn backends(config: &Config) -> anyhow::Result<()> {
    let coordinator = ExecutionCoordinator::new(&config.sandbox)?;
    let descriptors = coordinator.selector().describe().await;

    println!("{}", style("Sandbox backends (highest priority first)").bold());
    if descriptors.is_empty() {
        println!("  {}", style("none configured").red());
    }
    for d in descriptors {
        let mark = if d.available {
            style("✓").green()
        } else {
            style("✗").red()
        };
        let detail = d.detail.unwrap_or_default();
        println!("  {} {:<10} {}", mark, d.name, style(detail).dim());
    }
    Ok(())
}

async fn history(config: &Config, conversation: &str) -> anyhow::Result<()> {
    let coordinator = ExecutionCoordinator::new(&config.sandbox)?;
    let workspaces = coordinator.workspaces();

    let root = workspaces.root_path_of(conversation).await?;
    let cwd = workspaces.cwd_of(conversation).await?;
    println!("{} {}", style("root:").bold(), root.display());
    println!("{} /{}", style("cwd: ").bold(), cwd.display());

    let entries = workspaces.history_of(conversation).await?;
    if entries.is_empty() {
        println!("{}", style("no commands recorded").dim());
    }
    for entry in entries {
        println!(
            "{} [{}] {} {}",
            style(entry.at.format("%Y-%m-%d %H:%M:%S")).dim(),
            entry.kind,
            entry.status,
            entry.command
        );
    }
    Ok(())
}

fn init_config(path: &std::path::Path, force: bool) -> anyhow::Result<()> {
    if path.exists() && !force {
        anyhow::bail!("{} already exists (use --force to overwrite)", path.display());
    }
    save_config(&Config::default(), path)?;
    println!("{} {}", style("Wrote").green(), path.display());
    Ok(())
}

fn validate(config: &Config) -> anyhow::Result<()> {
    let result = validate_config(config);

    for issue in &result.errors {
        println!("{} {}", style("error:").red().bold(), issue);
    }
    for issue in &result.warnings {
        println!("{} {}", style("warning:").yellow().bold(), issue);
    }

    if result.valid {
        println!("{}", style("Configuration is valid").green());
        Ok(())
    } else {
        anyhow::bail!("configuration has {} error(s)", result.errors.len())
    }
}
