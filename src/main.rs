//! fleet-sync - keep a local view in sync with a fleet of sandboxes.
//!
//! Usage:
//!   fleet-sync watch [--status-port 8081]           # Follow fleet and session streams
//!   fleet-sync start --workspace W --message M      # Provision a sandbox and start a session
//!   fleet-sync sessions                             # Session trees of every running sandbox
//!   fleet-sync attention                            # Pending permissions and questions
//!   fleet-sync progress --sandbox S --session ID    # Progress of a task's sessions

use clap::{Parser, Subcommand};
use fleet_sync::client::{ManagerClient, SessionServiceClient};
use fleet_sync::config::{WatchConfig, DEFAULT_MANAGER_URL};
use fleet_sync::error::{Error, Result};
use fleet_sync::fleet::{collect_snapshot, FleetSession, FleetSnapshot, FleetWatcher};
use fleet_sync::hierarchy::{count_descendants, SessionNode};
use fleet_sync::interaction::InteractionSummary;
use fleet_sync::progress::task_progress;
use fleet_sync::startup::{StartRequest, StartupOrchestrator};
use fleet_sync::state::AppState;
use fleet_sync::stream::{EventSource, SourceConnector};
use fleet_sync::{http_server, StaleTracker};
use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use url::Url;

#[derive(Parser, Debug)]
#[command(name = "fleet-sync")]
#[command(about = "Sandbox fleet synchronization and session startup")]
struct Args {
    /// Base URL of the fleet manager
    #[arg(long, global = true, default_value = DEFAULT_MANAGER_URL)]
    manager_url: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Follow the fleet and keep one session stream per running sandbox
    Watch {
        /// Serve the status API on this port
        #[arg(long)]
        status_port: Option<u16>,

        /// Seconds between periodic sandbox re-lists
        #[arg(long, default_value = "30")]
        resync_secs: u64,
    },
    /// Provision a sandbox, open a session and send the first message
    Start {
        /// Workspace to provision the sandbox from
        #[arg(long)]
        workspace: String,

        /// Initial message for the session
        #[arg(long)]
        message: String,

        /// Working directory for the session
        #[arg(long)]
        directory: Option<String>,
    },
    /// Print the session trees of every running sandbox
    Sessions,
    /// Print pending permissions and questions across the fleet
    Attention,
    /// Print progress of a task's sessions
    Progress {
        /// Sandbox running the task
        #[arg(long)]
        sandbox: String,

        /// Root session started by the task (repeatable)
        #[arg(long = "session", required = true)]
        sessions: Vec<String>,
    },
}

#[tokio::main]
async fn main() {
    use std::process::exit;

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    if let Err(e) = run(args).await {
        eprintln!("Error: {e}");
        exit(1);
    }
}

async fn run(args: Args) -> Result<()> {
    let manager = ManagerClient::new(&args.manager_url)?;

    match args.command {
        Commands::Watch {
            status_port,
            resync_secs,
        } => {
            let manager_url = Url::parse(manager.base_url()).map_err(|source| Error::InvalidUrl {
                url: args.manager_url.clone(),
                source,
            })?;
            let mut config = WatchConfig::new(manager_url);
            config.status_port = status_port;
            config.resync_interval = Duration::from_secs(resync_secs.max(1));
            watch(manager, config).await
        }
        Commands::Start {
            workspace,
            message,
            directory,
        } => {
            let orchestrator = StartupOrchestrator::new(manager, SessionServiceClient::new());
            let token = CancellationToken::new();
            let interrupt = token.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    interrupt.cancel();
                }
            });
            let request = StartRequest {
                workspace_id: workspace,
                message,
                directory,
            };
            let started = orchestrator.start_session_until(&request, &token).await?;
            print_json(&started)
        }
        Commands::Sessions => {
            let snapshot = collect_snapshot(&manager, &SessionServiceClient::new()).await?;
            print_sessions(&snapshot);
            Ok(())
        }
        Commands::Attention => {
            let snapshot = collect_snapshot(&manager, &SessionServiceClient::new()).await?;
            print_json(&snapshot.attention(now_ms()))
        }
        Commands::Progress { sandbox, sessions } => {
            let snapshot = collect_snapshot(&manager, &SessionServiceClient::new()).await?;
            let running = snapshot
                .sandboxes
                .iter()
                .find(|s| s.sandbox.id == sandbox)
                .ok_or_else(|| Error::Operation(format!("Sandbox {sandbox} is not running")))?;
            print_json(&task_progress(running, &sessions))
        }
    }
}

async fn watch(manager: ManagerClient, config: WatchConfig) -> Result<()> {
    let state = AppState::new(Arc::new(StaleTracker::new()));
    let token = CancellationToken::new();

    let control = Arc::new(manager);
    let fleet_events: Arc<dyn EventSource> = control.clone();
    let connector: Arc<dyn SourceConnector> = Arc::new(SessionServiceClient::new());
    let watcher = FleetWatcher::new(control, fleet_events, connector, state.clone(), &config);

    info!(manager = %config.manager_url, "watching fleet");

    let server = async {
        let Some(port) = config.status_port else {
            return Ok(());
        };
        let served = http_server::run_server(port, state.clone(), token.clone()).await;
        if served.is_err() {
            token.cancel();
        }
        served
    };

    let signal = async {
        tokio::select! {
            _ = token.cancelled() => {}
            received = tokio::signal::ctrl_c() => {
                if let Err(e) = received {
                    warn!(error = %e, "failed to listen for ctrl-c");
                }
                info!("shutting down");
                token.cancel();
            }
        }
    };

    let (served, _, _) = tokio::join!(server, signal, watcher.run(token.clone()));
    served
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    let out = serde_json::to_string_pretty(value).map_err(|source| Error::Encode {
        what: "output".to_string(),
        source,
    })?;
    println!("{out}");
    Ok(())
}

fn print_sessions(snapshot: &FleetSnapshot) {
    if snapshot.sandboxes.is_empty() {
        println!("No running sandboxes");
        return;
    }
    for sandbox in &snapshot.sandboxes {
        println!("sandbox {} ({})", sandbox.sandbox.id, sandbox.source);
        let interactions = sandbox.interactions();
        let roots = sandbox.hierarchy();
        if roots.is_empty() {
            println!("  (no sessions)");
        }
        let mut stack: Vec<(&SessionNode<FleetSession>, usize)> =
            roots.iter().rev().map(|node| (node, 1)).collect();
        while let Some((node, depth)) = stack.pop() {
            println!("{}", session_line(node, depth, &interactions));
            stack.extend(node.children.iter().rev().map(|child| (child, depth + 1)));
        }
    }
}

fn session_line(node: &SessionNode<FleetSession>, depth: usize, interactions: &InteractionSummary) -> String {
    let session = &node.item.session;
    let interaction = interactions.interactions.get(&session.id);
    let status = interaction.map(|i| i.status.as_str()).unwrap_or("idle");
    let mut line = format!(
        "{}[{}] {} {}",
        "  ".repeat(depth),
        status,
        session.id,
        session.title.as_deref().unwrap_or("")
    );
    let descendants = count_descendants(node);
    if depth == 1 && descendants > 0 {
        line.push_str(&format!(" (+{descendants} sub-sessions)"));
    }
    if interaction.is_some_and(|i| i.needs_attention()) {
        line.push_str(" !");
    }
    line
}

fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis() as i64)
        .unwrap_or(0)
}
