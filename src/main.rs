//! Patcher - issue-to-pull-request orchestration
//!
//! Command-line entry point. Each invocation processes one trigger or one
//! review pass and exits; delivery (webhook server, workflow runner) is the
//! caller's concern.

use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Parser, Subcommand, ValueEnum};
use colored::Colorize;
use tracing::info;
use tracing_subscriber::EnvFilter;

use patcher::state::{decode, extract_visible};
use patcher::{
    ClaudeClient, GhCliSourceControl, IntoPatcherError, LlmCollaborator, Orchestrator,
    OrchestratorConfig, Outcome, PatcherError, RepoRef, ReviewOptions, Route, Router,
    TriggerEvent,
};

#[derive(Parser)]
#[command(name = "patcher")]
#[command(version)]
#[command(about = "Turn labeled issues into pull requests and iterate on review feedback", long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Project directory (defaults to current directory)
    #[arg(short, long, global = true, default_value = ".")]
    project: PathBuf,

    /// Settings file (defaults to <project>/.patcher/settings.json)
    #[arg(short, long, global = true, env = "PATCHER_CONFIG")]
    config: Option<PathBuf>,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Log line format
    #[arg(long, global = true, value_enum, default_value = "text")]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Process one trigger and print the outcome as JSON
    Handle {
        /// Event kind (value of the X-GitHub-Event header)
        #[arg(short, long)]
        event: String,

        /// Payload file, `-` or omitted for stdin
        #[arg(long, value_name = "FILE")]
        payload: Option<PathBuf>,
    },

    /// Critique a pull request and judge its own checks
    Review {
        /// Repository as owner/name
        #[arg(long, env = "GITHUB_REPOSITORY")]
        repo: String,

        /// Pull request number
        #[arg(long)]
        change: u64,

        /// Wait for pending checks to settle first
        #[arg(long)]
        wait_for_checks: bool,

        /// Do not post the review
        #[arg(long)]
        no_post: bool,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Inspect the progress record embedded in a description
    State {
        #[command(subcommand)]
        action: StateAction,
    },

    /// Show or validate configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum StateAction {
    /// Decode and print the progress record
    Show {
        /// File holding the description, `-` for stdin
        #[arg(long, value_name = "FILE")]
        body: PathBuf,
    },

    /// Print the description with the record removed
    Strip {
        /// File holding the description, `-` for stdin
        #[arg(long, value_name = "FILE")]
        body: PathBuf,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Show current configuration
    Show {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Validate configuration
    Validate,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.log_format);

    match run(cli).await {
        Ok(code) => std::process::exit(code),
        Err(e) => {
            eprintln!("{} {e}", "Error:".red().bold());
            std::process::exit(e.exit_code());
        }
    }
}

fn init_tracing(verbose: bool, format: LogFormat) {
    let default = if verbose {
        "patcher=debug,info"
    } else {
        "patcher=info,warn"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr);
    match format {
        LogFormat::Text => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
}

async fn run(cli: Cli) -> patcher::Result<i32> {
    match cli.command {
        Commands::Handle { event, payload } => {
            let config = load_config(&cli.project, cli.config.as_deref())?;
            let raw = read_input(payload.as_deref())?;
            let event = TriggerEvent::from_json(&event, &raw)?;

            // Skips need neither GitHub nor a model.
            let outcome = match Router::new(&config)?.route(&event) {
                Route::Ignore { reason } => {
                    info!(kind = %event.kind(), action = %event.meta().action, "Skipping: {reason}");
                    Outcome::Skipped { reason }
                }
                _ => {
                    let orchestrator = build_orchestrator(&cli.project, config)?;
                    orchestrator.handle(event).await
                }
            };

            println!("{}", serde_json::to_string_pretty(&outcome)?);
            Ok(i32::from(outcome.is_failure()))
        }

        Commands::Review {
            repo,
            change,
            wait_for_checks,
            no_post,
            json,
        } => {
            let config = load_config(&cli.project, cli.config.as_deref())?;
            let repo = RepoRef::parse(&repo)?;
            let orchestrator = build_orchestrator(&cli.project, config)?;

            let outcome = orchestrator
                .review(
                    &repo,
                    change,
                    ReviewOptions {
                        wait_for_checks,
                        post: !no_post,
                    },
                )
                .await;

            match &outcome {
                Outcome::Reviewed(report) if !json => {
                    let verdict = if report.approved {
                        "Approved".green().bold()
                    } else {
                        "Changes requested".yellow().bold()
                    };
                    println!("\n{} PR #{} {verdict}", "Review:".cyan().bold(), report.change);
                    println!("{}", "─".repeat(40));
                    println!("{}", report.summary);
                    if !report.posted {
                        println!("\n{} review not posted (--no-post)", "Info:".blue());
                    }
                }
                Outcome::Failed { error } if !json => {
                    eprintln!("{} {error}", "Error:".red().bold());
                }
                _ => println!("{}", serde_json::to_string_pretty(&outcome)?),
            }
            Ok(i32::from(outcome.is_failure()))
        }

        Commands::State { action } => match action {
            StateAction::Show { body } => {
                let text = read_input(Some(&body))?;
                match decode(&text) {
                    Some(record) => {
                        println!("{}", serde_json::to_string_pretty(&record)?);
                        Ok(0)
                    }
                    None => {
                        eprintln!("{} no progress record found", "Warning:".yellow());
                        Ok(1)
                    }
                }
            }
            StateAction::Strip { body } => {
                let text = read_input(Some(&body))?;
                println!("{}", extract_visible(&text));
                Ok(0)
            }
        },

        Commands::Config { action } => {
            let config = load_config(&cli.project, cli.config.as_deref())?;
            match action {
                ConfigAction::Show { json } => {
                    if json {
                        println!("{}", serde_json::to_string_pretty(&config)?);
                    } else {
                        print_config(&config);
                    }
                    Ok(0)
                }
                ConfigAction::Validate => {
                    let report = config.validate();
                    for error in &report.errors {
                        eprintln!("{} {error}", "Error:".red());
                    }
                    for warning in &report.warnings {
                        println!("{} {warning}", "Warning:".yellow());
                    }
                    if report.is_valid() {
                        println!("{} configuration is valid", "OK".green().bold());
                    }
                    Ok(report.exit_code())
                }
            }
        }
    }
}

fn load_config(project: &Path, explicit: Option<&Path>) -> patcher::Result<OrchestratorConfig> {
    match explicit {
        Some(path) => OrchestratorConfig::load_from(path),
        None => OrchestratorConfig::load(project),
    }
}

fn build_orchestrator(project: &Path, config: OrchestratorConfig) -> patcher::Result<Orchestrator> {
    let report = config.validate();
    if !report.is_valid() {
        return Err(PatcherError::config(report.errors.join("; ")));
    }

    let scm = GhCliSourceControl::detect().into_source_control("detect")?;
    let client = ClaudeClient::new(project)
        .with_model(&config.llm.model)
        .with_timeout(config.llm.timeout_secs);
    let generator = LlmCollaborator::new(Arc::new(client));
    Orchestrator::new(config, Arc::new(scm), Arc::new(generator))
}

/// Read a file, or stdin for `None` and `-`.
fn read_input(path: Option<&Path>) -> patcher::Result<String> {
    match path {
        Some(path) if path != Path::new("-") => Ok(std::fs::read_to_string(path)?),
        _ => {
            let mut text = String::new();
            std::io::stdin().read_to_string(&mut text)?;
            Ok(text)
        }
    }
}

fn print_config(config: &OrchestratorConfig) {
    println!("\n{} Orchestrator Configuration", "Config:".cyan().bold());
    println!("{}", "─".repeat(40));
    println!("   Max iterations: {}", config.max_iterations);
    println!("   Trigger label: {}", config.trigger_label);
    println!("   Review label: {}", config.review_label);
    println!("   Branch prefix: {}", config.branch_prefix);
    println!("   Bot name: {}", config.bot_name);
    println!("   Trigger words: {}", config.trigger_words.join(", "));
    println!("   Own checks: {}", config.own_check_patterns.join(", "));
    println!(
        "   Base branch: {}",
        config.base_branch.as_deref().unwrap_or("(repository default)")
    );
    println!(
        "   Check wait: {}s timeout, {}s poll",
        config.checks.timeout_secs, config.checks.poll_interval_secs
    );
    println!("   Model: {}", config.llm.model);
}
