use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use devair_core::strip_control_sequences;
use devair_core::wire::{AnalysisResult, UiAction, UiActionCommand};
use devair_core::{Project, ProjectId};
use devair_session::{BuildBackend, HttpBackend, LiveBuildSession, SessionError, SessionEvent};
use tokio::io::AsyncReadExt;
use tracing::{info, warn};

mod config;
mod logging;

use config::{load_config, GlobalArgs, RuntimeConfig};
use logging::init_logging;

#[derive(Parser)]
#[command(name = "devair")]
#[command(about = "Live build monitor for devair projects", long_about = None)]
struct Cli {
    #[command(flatten)]
    global: GlobalArgs,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Follow a project's build in real time
    Watch {
        project_id: String,
        #[arg(long, default_value = "")]
        name: String,
        /// Request log analysis when the connection ends
        #[arg(long, default_value_t = false)]
        analyze_on_exit: bool,
        #[arg(long, default_value_t = false)]
        json: bool,
    },
    /// Analyze a saved build transcript (`-` reads stdin)
    Analyze {
        path: String,
        #[arg(long, default_value_t = false)]
        json: bool,
    },
    /// Send a remote UI command to a project's agent
    UiAction {
        project_id: String,
        /// FIND, TYPE or CLICK
        #[arg(long)]
        action: UiAction,
        #[arg(long)]
        target: String,
        #[arg(long, default_value = "")]
        value: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = load_config(&cli.global)?;
    let _log_guard = init_logging(&config);

    match cli.command {
        Commands::Watch {
            project_id,
            name,
            analyze_on_exit,
            json,
        } => watch(&config, Project::new(project_id, name), analyze_on_exit, json).await,
        Commands::Analyze { path, json } => analyze(&config, &path, json).await,
        Commands::UiAction {
            project_id,
            action,
            target,
            value,
        } => {
            let command = UiActionCommand {
                action,
                target,
                value,
            };
            ui_action(&config, ProjectId::new(project_id), &command).await
        }
    }
}

async fn watch(
    config: &RuntimeConfig,
    project: Project,
    analyze_on_exit: bool,
    json: bool,
) -> Result<()> {
    eprintln!(
        "Watching {} ({}) via {}",
        project.display_name(),
        project.id,
        config.session.ws_url
    );
    let (mut session, mut events) = LiveBuildSession::connect(project, config.session.clone())
        .context("failed to open build session")?;

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    let mut interrupted = false;
    loop {
        tokio::select! {
            _ = &mut ctrl_c => {
                info!(event = "interrupt");
                interrupted = true;
                break;
            }
            event = events.recv() => match event {
                Some(SessionEvent::Line(line)) => println!("{line}"),
                Some(SessionEvent::Status(status)) => eprintln!("[status] {status}"),
                Some(SessionEvent::Connection(state)) => {
                    eprintln!("[connection] {state}");
                    if state.is_terminal() {
                        break;
                    }
                }
                Some(SessionEvent::JobCorrelated(job)) => eprintln!("[job] {job}"),
                Some(SessionEvent::AiStage(stage)) => {
                    eprintln!("[ai] {}: {}", stage.stage, stage.message)
                }
                Some(_) => {}
                None => break,
            },
        }
    }

    if analyze_on_exit && !interrupted {
        match session.request_analysis().await {
            Ok(result) => print_analysis(&result, json)?,
            Err(SessionError::Analysis(err)) => warn!(event = "analysis_failed", error = %err),
            Err(err) => return Err(err).context("analysis request failed"),
        }
    }

    session.close();
    session.finished().await;
    Ok(())
}

async fn analyze(config: &RuntimeConfig, path: &str, json: bool) -> Result<()> {
    let raw = if path == "-" {
        let mut buf = String::new();
        tokio::io::stdin()
            .read_to_string(&mut buf)
            .await
            .context("failed to read transcript from stdin")?;
        buf
    } else {
        tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("failed to read transcript {path}"))?
    };
    let logs = strip_control_sequences(&raw);

    let backend = HttpBackend::new(config.session.api_url.clone(), config.session.request_timeout)?;
    let result = backend
        .analyze_logs(logs)
        .await
        .context("analysis request failed")?;
    print_analysis(&result, json)
}

async fn ui_action(
    config: &RuntimeConfig,
    project_id: ProjectId,
    command: &UiActionCommand,
) -> Result<()> {
    let backend = HttpBackend::new(config.session.api_url.clone(), config.session.request_timeout)?;
    let job = backend
        .dispatch_command(&project_id, command)
        .await
        .context("failed to dispatch command")?;
    info!(event = "command_dispatched", project_id = %project_id, job_id = %job.id);
    println!("{}", job.id);
    Ok(())
}

fn print_analysis(result: &AnalysisResult, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(result)?);
        return Ok(());
    }
    println!("Analysis (confidence {}%):", result.confidence);
    println!("  {}", result.analysis);
    println!("Suggestion:");
    println!("  {}", result.suggestion);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_ui_action_command() {
        let cli = Cli::try_parse_from([
            "devair",
            "ui-action",
            "42",
            "--action",
            "type",
            "--target",
            "Notepad",
            "--value",
            "Hello World",
        ])
        .expect("parse");
        match cli.command {
            Commands::UiAction {
                project_id,
                action,
                target,
                value,
            } => {
                assert_eq!(project_id, "42");
                assert_eq!(action, UiAction::Type);
                assert_eq!(target, "Notepad");
                assert_eq!(value, "Hello World");
            }
            _ => panic!("expected ui-action"),
        }
    }

    #[test]
    fn rejects_unknown_ui_action() {
        let parsed = Cli::try_parse_from([
            "devair", "ui-action", "42", "--action", "drag", "--target", "x",
        ]);
        assert!(parsed.is_err());
    }

    #[test]
    fn global_flags_follow_subcommand() {
        let cli = Cli::try_parse_from([
            "devair",
            "watch",
            "42",
            "--analyze-on-exit",
            "--api-url",
            "http://127.0.0.1:9000",
        ])
        .expect("parse");
        assert_eq!(cli.global.api_url, "http://127.0.0.1:9000");
        assert!(matches!(
            cli.command,
            Commands::Watch {
                analyze_on_exit: true,
                ..
            }
        ));
    }
}
