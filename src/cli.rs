use crate::config::Settings;
use crate::serve::{SERVE_SUBCOMMAND, ServeSpec};
use clap::{Args, CommandFactory, Parser, Subcommand};
use std::path::PathBuf;

pub const HELP_TEXT: &str = "\
Background static-file HTTP server manager for the SERVE_DIR directory.

Subcommands:
    start     Start the server in the background serving SERVE_DIR
    stop      Stop the running server
    status    Show server status (pid, listening ports, test fetch)
    restart   Stop then start
    help      Show this extended help or a subcommand help

Features:
    - Configurable port and bind address (bind defaults to 0.0.0.0, all interfaces)
    - Log file redirection (default <dir>/.hserve.log)
    - Health check via HTTP GET on the root path
    - Duplicate start protection via /proc listening socket detection, no pidfile
    - SERVE_DIR environment variable selects the served directory
    - Optional settings file at $HSERVE_CONFIG or ~/.config/hserve/config.toml

Examples:
    hserve start -p 9000
    hserve status
    hserve restart -p 9000 -b 127.0.0.1
    hserve stop
    hserve help start

Security note:
    Binding to 0.0.0.0 exposes the directory to the network. Consider firewall
    restrictions or binding to a specific host or IP.";

pub const SUBCOMMANDS: [&str; 5] = ["start", "stop", "status", "restart", "help"];

#[derive(Debug, Parser)]
#[command(
    name = "hserve",
    about = "Background static-file HTTP server manager",
    version,
    override_help = HELP_TEXT,
    disable_help_subcommand = true
)]
pub struct Cli {
    #[arg(long, global = true)]
    pub json: bool,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Start the server in the background
    Start(CommonArgs),
    /// Stop the running server
    Stop(CommonArgs),
    /// Show server status and check its health
    Status(CommonArgs),
    /// Stop then start
    Restart(CommonArgs),
    /// Show extended or topic help
    Help { topic: Option<String> },
    /// Run an instance in the foreground; used by `start`
    #[command(name = SERVE_SUBCOMMAND, hide = true)]
    Serve(ServeArgs),
}

#[derive(Debug, Clone, Default, PartialEq, Args)]
pub struct CommonArgs {
    /// Listen port (default 8000 when starting)
    #[arg(short, long)]
    pub port: Option<u16>,
    /// Bind address (default 0.0.0.0, all interfaces)
    #[arg(short, long)]
    pub bind: Option<String>,
    /// Directory to serve (default $SERVE_DIR or the current directory)
    #[arg(long)]
    pub dir: Option<PathBuf>,
    /// Log file path (default <dir>/.hserve.log)
    #[arg(long)]
    pub log_file: Option<PathBuf>,
    /// Health check timeout in seconds (default 3.0)
    #[arg(long)]
    pub timeout: Option<f64>,
    /// Disable colored output
    #[arg(long)]
    pub no_color: bool,
}

impl CommonArgs {
    pub fn to_settings(&self) -> Settings {
        Settings {
            port: self.port,
            bind: self.bind.clone(),
            dir: self.dir.clone(),
            log_file: self.log_file.clone(),
            timeout: self.timeout,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Args)]
pub struct ServeArgs {
    #[arg(long)]
    pub bind: String,
    #[arg(long)]
    pub port: u16,
    #[arg(long)]
    pub dir: PathBuf,
    #[arg(long)]
    pub log_file: PathBuf,
}

impl From<ServeArgs> for ServeSpec {
    fn from(args: ServeArgs) -> Self {
        ServeSpec {
            bind: args.bind,
            port: args.port,
            dir: args.dir,
            log_file: args.log_file,
        }
    }
}

#[derive(Debug, PartialEq, thiserror::Error)]
pub enum UsageError {
    #[error("Unknown topic: {0}")]
    UnknownTopic(String),
}

impl UsageError {
    pub fn exit_code(&self) -> u8 {
        2
    }
}

/// Text for `help [topic]`.
pub fn topic_help(topic: Option<&str>) -> Result<String, UsageError> {
    let Some(topic) = topic else {
        return Ok(HELP_TEXT.to_string());
    };
    if topic == "help" {
        return Ok(format!(
            "Usage: hserve help [subcommand]\nSubcommands: {}",
            SUBCOMMANDS.join(", ")
        ));
    }
    if !SUBCOMMANDS.contains(&topic) {
        return Err(UsageError::UnknownTopic(topic.to_string()));
    }

    let mut command = Cli::command();
    command.build();
    command
        .find_subcommand_mut(topic)
        .map(|sub| sub.render_help().to_string())
        .ok_or_else(|| UsageError::UnknownTopic(topic.to_string()))
}
