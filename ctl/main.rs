#![forbid(unsafe_code)]

//! `agent-proxy-ctl`: administrative CLI for `agent-proxy`.
//!
//! Runs the session workflows directly against the configured database
//! and prints each result as JSON.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use clap::{Args, Parser, Subcommand};
use serde::Serialize;
use tracing_subscriber::{fmt, EnvFilter};

use agent_proxy::app::AppState;
use agent_proxy::config::GlobalConfig;
use agent_proxy::models::filter::SessionFilter;
use agent_proxy::models::session::{RepositoryInfo, SessionStatus};
use agent_proxy::models::user::User;
use agent_proxy::orchestrator::create_session::CreateSessionRequest;
use agent_proxy::orchestrator::delete_session::{DeleteSessionRequest, ForceDeleteSessionRequest};
use agent_proxy::orchestrator::monitor_session::MonitorSessionRequest;
use agent_proxy::orchestrator::query::{GetSessionRequest, ListSessionsRequest};
use agent_proxy::persistence::db;
use agent_proxy::{AppError, Result};

#[derive(Debug, Parser)]
#[command(
    name = "agent-proxy-ctl",
    about = "Administrative CLI for agent-proxy",
    version,
    long_about = None
)]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(long)]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Manage user accounts.
    #[command(subcommand)]
    User(UserCommand),

    /// Manage sessions.
    #[command(subcommand)]
    Session(SessionCommand),

    /// Run one fleet reconciliation pass.
    Reconcile,
}

#[derive(Debug, Subcommand)]
enum UserCommand {
    /// Create or replace a user.
    Add {
        /// User ID.
        id: String,
        /// Display name; defaults to the ID.
        #[arg(long)]
        name: Option<String>,
        /// Grant administrator rights.
        #[arg(long)]
        admin: bool,
        /// Create the account inactive.
        #[arg(long)]
        inactive: bool,
    },

    /// List all users.
    List,
}

#[derive(Debug, Subcommand)]
enum SessionCommand {
    /// Create a session and start its agent.
    Create(CreateArgs),

    /// Show one session and its URL.
    Get {
        /// Session ID.
        id: String,
        /// Requesting user.
        #[arg(long)]
        user: String,
    },

    /// Stop a session's agent.
    Delete {
        /// Session ID.
        id: String,
        /// Requesting user.
        #[arg(long)]
        user: String,
        /// Kill the agent if the graceful stop fails.
        #[arg(long)]
        force: bool,
    },

    /// Kill a session's agent and remove its record (admin only).
    ForceDelete {
        /// Session ID.
        id: String,
        /// Administrator performing the removal.
        #[arg(long)]
        admin: String,
    },

    /// Check a session's health and reconcile its status.
    Monitor {
        /// Session ID.
        id: String,
        /// Requesting user.
        #[arg(long)]
        user: String,
    },

    /// List sessions visible to a user.
    List {
        /// Requesting user.
        #[arg(long)]
        user: String,
        /// Only sessions in this status (repeatable).
        #[arg(long, value_parser = parse_status)]
        status: Vec<SessionStatus>,
        /// Only sessions carrying this tag, as KEY=VALUE (repeatable).
        #[arg(long, value_parser = parse_pair)]
        tag: Vec<(String, String)>,
        /// Page size.
        #[arg(long)]
        limit: Option<u32>,
        /// Rows to skip.
        #[arg(long, default_value_t = 0)]
        offset: u32,
    },
}

#[derive(Debug, Args)]
struct CreateArgs {
    /// Owning user.
    #[arg(long)]
    user: String,
    /// Explicit port; allocated from the configured range when omitted.
    #[arg(long)]
    port: Option<u16>,
    /// Environment variable for the agent, as KEY=VALUE (repeatable).
    #[arg(long = "env", value_parser = parse_pair)]
    environment: Vec<(String, String)>,
    /// Session tag, as KEY=VALUE (repeatable).
    #[arg(long, value_parser = parse_pair)]
    tag: Vec<(String, String)>,
    /// Repository URL.
    #[arg(long)]
    repo: Option<String>,
    /// Repository branch.
    #[arg(long, requires = "repo")]
    branch: Option<String>,
    /// Repository commit.
    #[arg(long, requires = "repo")]
    commit: Option<String>,
}

fn parse_pair(raw: &str) -> std::result::Result<(String, String), String> {
    raw.split_once('=')
        .map(|(key, value)| (key.to_owned(), value.to_owned()))
        .ok_or_else(|| format!("expected KEY=VALUE, got {raw:?}"))
}

fn parse_status(raw: &str) -> std::result::Result<SessionStatus, String> {
    SessionStatus::parse(raw).map_err(|err| err.to_string())
}

fn main() {
    let args = Cli::parse();
    init_tracing();

    let outcome = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|err| AppError::Config(format!("failed to build tokio runtime: {err}")))
        .and_then(|runtime| runtime.block_on(run(args)));

    match outcome {
        Ok(output) => println!("{output}"),
        Err(err) => {
            eprintln!("Error: {err}");
            std::process::exit(1);
        }
    }
}

async fn run(args: Cli) -> Result<String> {
    let config = Arc::new(GlobalConfig::load_from_path(&args.config)?);
    let db = Arc::new(db::connect(&config.db_path()).await?);
    let state = AppState::new(config, db)?;

    let output = match args.command {
        Command::User(command) => run_user(&state, command).await,
        Command::Session(command) => run_session(&state, command).await,
        Command::Reconcile => to_json(&state.monitor_all().execute().await?),
    };

    state.db.close().await;
    output
}

async fn run_user(state: &AppState, command: UserCommand) -> Result<String> {
    match command {
        UserCommand::Add {
            id,
            name,
            admin,
            inactive,
        } => {
            let display_name = name.unwrap_or_else(|| id.clone());
            let user = User::new(id, display_name)
                .with_admin(admin)
                .with_active(!inactive);
            to_json(&state.users.save(&user).await?)
        }
        UserCommand::List => to_json(&state.users.list().await?),
    }
}

async fn run_session(state: &AppState, command: SessionCommand) -> Result<String> {
    match command {
        SessionCommand::Create(args) => {
            let repository = args.repo.map(|url| RepositoryInfo {
                url,
                branch: args.branch,
                commit: args.commit,
            });
            let request = CreateSessionRequest {
                user_id: args.user,
                environment: args.environment.into_iter().collect(),
                tags: args.tag.into_iter().collect(),
                repository,
                port: args.port,
            };
            to_json(&state.create_session().execute(request).await?)
        }
        SessionCommand::Get { id, user } => {
            let request = GetSessionRequest {
                session_id: id,
                user_id: user,
            };
            to_json(&state.get_session().execute(request).await?)
        }
        SessionCommand::Delete { id, user, force } => {
            let request = DeleteSessionRequest {
                session_id: id,
                user_id: user,
                force,
            };
            to_json(&state.delete_session().execute(request).await?)
        }
        SessionCommand::ForceDelete { id, admin } => {
            let request = ForceDeleteSessionRequest {
                session_id: id,
                admin_user_id: admin,
            };
            to_json(&state.force_delete_session().execute(request).await?)
        }
        SessionCommand::Monitor { id, user } => {
            let request = MonitorSessionRequest {
                session_id: id,
                user_id: user,
            };
            to_json(&state.monitor_session().execute(request).await?)
        }
        SessionCommand::List {
            user,
            status,
            tag,
            limit,
            offset,
        } => {
            let filter = SessionFilter {
                statuses: status,
                tags: tag.into_iter().collect::<BTreeMap<_, _>>(),
                limit,
                offset,
                ..SessionFilter::default()
            };
            let request = ListSessionsRequest {
                user_id: user,
                filter,
            };
            to_json(&state.list_sessions().execute(request).await?)
        }
    }
}

fn to_json(value: &impl Serialize) -> Result<String> {
    serde_json::to_string_pretty(value)
        .map_err(|err| AppError::Io(format!("failed to encode output: {err}")))
}

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .try_init();
}
