use std::io::{Read, Write};
use std::os::unix::net::UnixStream;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use ragex::daemon::{self, ProjectDaemon};
use ragex::project::{self, ProjectPaths};

#[derive(Debug, Parser)]
#[command(name = "ragex")]
#[command(version)]
#[command(about = "Per-project code search daemon: regex, symbol, and semantic retrieval over a workspace.")]
struct Cli {
    #[command(subcommand)]
    cmd: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Search the current workspace (auto-detects semantic/symbol/regex mode).
    Search {
        query: Vec<String>,
        /// Force literal/regex matching instead of auto-detection.
        #[arg(long)]
        regex: bool,
        #[arg(long, value_name = "N")]
        limit: Option<usize>,
        #[arg(long, value_name = "SCORE")]
        min_similarity: Option<f32>,
        #[arg(long)]
        json: bool,
        /// Force a specific mode: auto, semantic, symbol, regex.
        #[arg(long)]
        mode: Option<String>,
    },
    /// Rebuild or incrementally update the workspace's symbol/vector index.
    Index {
        /// Discard the existing index and re-extract every file from scratch.
        #[arg(long)]
        force: bool,
        #[arg(long)]
        verbose: bool,
    },
    /// Start watching the workspace and re-index on change.
    StartContinuousIndex,
    /// Report daemon uptime, readiness, and command count.
    Status,
    /// Write a default `.mcpignore` into the workspace if one doesn't exist.
    Init,
    /// List every indexed project known to this host.
    Ls,
    /// Remove a project's persisted index by its project id.
    Rm { project_id: String },
    /// Print the `claude mcp add` invocation for this daemon.
    Register,
    /// Print the `claude mcp remove` invocation for this daemon.
    Unregister,
    /// Run the daemon in the foreground, serving the per-project socket.
    Daemon {
        /// Absolute path to the workspace to index; defaults to WORKSPACE_PATH, then the current directory.
        #[arg(long)]
        workspace: Option<PathBuf>,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Admin commands are host-wide and run as a short-lived process against
    // the data directory directly — they never need a workspace's daemon
    // socket, and must work even when no daemon is running at all.
    match &cli.cmd {
        Command::Daemon { workspace } => return run_daemon(workspace.clone()),
        Command::Ls => {
            let rows = daemon::list_projects()?;
            println!("{}", serde_json::to_string_pretty(&rows)?);
            return Ok(());
        }
        Command::Rm { project_id } => {
            return match daemon::remove_project(project_id) {
                Ok(()) => {
                    println!("removed {project_id}");
                    Ok(())
                }
                Err(e) => {
                    eprintln!("Error: {e}");
                    std::process::exit(e.exit_code());
                }
            };
        }
        Command::Register => {
            print!("{}", daemon::registration_hint("register"));
            return Ok(());
        }
        Command::Unregister => {
            print!("{}", daemon::registration_hint("unregister"));
            return Ok(());
        }
        _ => {}
    }

    let (command, args) = to_rpc_call(&cli.cmd);
    let response = send_command(&command, args)?;

    if let Some(stdout) = response.get("stdout").and_then(|v| v.as_str()) {
        print!("{stdout}");
    }
    if let Some(stderr) = response.get("stderr").and_then(|v| v.as_str()) {
        eprint!("{stderr}");
    }
    if let Some(data) = response.get("data") {
        println!("{}", serde_json::to_string_pretty(data)?);
    }

    let success = response.get("success").and_then(|v| v.as_bool()).unwrap_or(false);
    if !success {
        let error = response.get("error").and_then(|v| v.as_str()).unwrap_or("unknown error");
        eprintln!("Error: {error}");
    }
    let code = response.get("returncode").and_then(|v| v.as_i64()).unwrap_or(if success { 0 } else { 1 });
    std::process::exit(code as i32);
}

fn to_rpc_call(cmd: &Command) -> (String, Vec<String>) {
    match cmd {
        Command::Search { query, regex, limit, min_similarity, json, mode } => {
            let mut args = query.clone();
            if *regex {
                args.push("--regex".to_string());
            }
            if let Some(n) = limit {
                args.push("--limit".to_string());
                args.push(n.to_string());
            }
            if let Some(s) = min_similarity {
                args.push("--min-similarity".to_string());
                args.push(s.to_string());
            }
            if *json {
                args.push("--json".to_string());
            }
            if let Some(m) = mode {
                args.push("--mode".to_string());
                args.push(m.clone());
            }
            ("search".to_string(), args)
        }
        Command::Index { force, verbose } => {
            let mut args = vec![];
            if *force {
                args.push("--force".to_string());
            }
            if *verbose {
                args.push("--verbose".to_string());
            }
            ("index".to_string(), args)
        }
        Command::StartContinuousIndex => ("start_continuous_index".to_string(), vec![]),
        Command::Status => ("status".to_string(), vec![]),
        Command::Init => ("init".to_string(), vec![]),
        Command::Ls | Command::Rm { .. } | Command::Register | Command::Unregister | Command::Daemon { .. } => {
            unreachable!("handled before dispatch")
        }
    }
}

/// Connects to this workspace's daemon socket, sends one JSON request, and
/// returns the parsed JSON response. Mirrors the original socket client: no
/// auto-start — a missing or refusing socket means the daemon isn't running.
fn send_command(command: &str, args: Vec<String>) -> Result<serde_json::Value> {
    let workspace = resolve_workspace()?;
    let user_id = project::current_user_id();
    let project_id = project::project_id(&user_id, &workspace);
    let socket_path = ProjectPaths::new(project_id).socket_path();

    let mut stream = UnixStream::connect(&socket_path).with_context(|| {
        format!(
            "daemon not running for this workspace (socket not found at {}). Start it with `ragex daemon`.",
            socket_path.display()
        )
    })?;

    let request = serde_json::json!({ "command": command, "args": args });
    stream.write_all(&serde_json::to_vec(&request)?)?;
    stream.shutdown(std::net::Shutdown::Write)?;

    let mut buf = Vec::new();
    stream.read_to_end(&mut buf)?;
    Ok(serde_json::from_slice(&buf)?)
}

fn resolve_workspace() -> Result<PathBuf> {
    if let Ok(path) = project::required_workspace_path() {
        return Ok(path);
    }
    std::env::current_dir().context("failed to resolve the current directory as a workspace root")
}

fn run_daemon(workspace: Option<PathBuf>) -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_env("RAGEX_LOG_LEVEL")
                .or_else(|_| tracing_subscriber::EnvFilter::try_from_default_env())
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let workspace = match workspace {
        Some(p) => p,
        None => resolve_workspace()?,
    };
    let workspace = if workspace.is_absolute() {
        workspace
    } else {
        std::env::current_dir()?.join(workspace)
    };

    let runtime = tokio::runtime::Runtime::new().context("failed to start the tokio runtime")?;
    runtime.block_on(async move {
        let daemon = ProjectDaemon::start(workspace).await?;
        daemon.run().await
    })?;
    Ok(())
}
