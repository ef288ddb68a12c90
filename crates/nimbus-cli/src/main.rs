//! nimbus - command-line tool for cloud compute, storage and identity
//!
//! Exit codes: 0 on success, 1 on errors, 3 when a waited-for resource
//! reached a failure state, 4 when a wait timed out or was interrupted.

mod commands;
mod config;
mod context;
mod output;

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Result;
use clap::{Parser, Subcommand};
use nimbus_client::ClientError;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::commands::{
    Completion, ConfigCommand, EndpointCommand, FileCommand, FlavorCommand, NetworkCommand,
    ServerCommand, UserCommand, VolumeCommand,
};
use crate::config::{ArgOverrides, Config};
use crate::context::Session;
use crate::output::{OutputContext, OutputFormat};

#[derive(Parser)]
#[command(name = "nimbus")]
#[command(author, version, about = "Cloud compute, storage and identity CLI")]
#[command(propagate_version = true)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, env = "NIMBUS_CONFIG", global = true)]
    config: Option<PathBuf>,

    /// Identity service URL
    #[arg(long, env = "NIMBUS_AUTH_URL", global = true)]
    auth_url: Option<String>,

    /// Authentication token
    #[arg(long, env = "NIMBUS_TOKEN", hide_env_values = true, global = true)]
    token: Option<String>,

    /// Output format
    #[arg(short, long, value_enum, global = true)]
    output: Option<OutputFormat>,

    /// Disable colored output
    #[arg(long, global = true)]
    no_color: bool,

    /// Minimal output (for scripting)
    #[arg(short, long, alias = "silent", global = true)]
    quiet: bool,

    /// Verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Skip TLS certificate verification
    #[arg(long, global = true)]
    insecure: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Manage virtual servers
    #[command(subcommand)]
    Server(ServerCommand),

    /// List hardware flavors
    #[command(subcommand)]
    Flavor(FlavorCommand),

    /// Manage block storage volumes
    #[command(subcommand)]
    Volume(VolumeCommand),

    /// Manage virtual networks
    #[command(subcommand)]
    Network(NetworkCommand),

    /// Manage object storage containers and objects
    #[command(subcommand)]
    File(FileCommand),

    /// Look up users
    #[command(subcommand)]
    User(UserCommand),

    /// Inspect service endpoints
    #[command(subcommand)]
    Endpoint(EndpointCommand),

    /// Read and edit the configuration file
    #[command(subcommand)]
    Config(ConfigCommand),
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Set up logging
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else if cli.quiet {
        EnvFilter::new("error")
    } else {
        EnvFilter::new("warn")
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
        .with(filter)
        .init();

    match run(&cli).await {
        Ok(completion) => completion.exit_code(),
        Err(err) => {
            let out = OutputContext::new(OutputFormat::Table, cli.no_color, cli.quiet);
            out.error(&describe_error(&err));
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: &Cli) -> Result<Completion> {
    let config_path = match &cli.config {
        Some(path) => path.clone(),
        None => Config::config_path()?,
    };
    let mut config = Config::load(Some(config_path.as_path()))?;

    // Config edits work without a usable server configuration
    if let Commands::Config(cmd) = &cli.command {
        let out = OutputContext::new(
            cli.output.unwrap_or_default(),
            cli.no_color,
            cli.quiet,
        );
        return commands::config::run(cmd, &mut config, &config_path, &out);
    }

    // Merge CLI args with config
    let settings = config.merge_with_args(&ArgOverrides {
        auth_url: cli.auth_url.as_deref(),
        token: cli.token.as_deref(),
        output: cli.output,
        no_color: cli.no_color,
        insecure: cli.insecure,
    })?;
    let out = OutputContext::new(settings.output, settings.no_color, cli.quiet);
    if !settings.verify_tls {
        out.warn("TLS certificate verification is disabled");
    }
    let session = Session::new(settings, out)?;

    match &cli.command {
        Commands::Server(cmd) => commands::server::run(cmd, &session).await,
        Commands::Flavor(cmd) => commands::flavor::run(cmd, &session).await,
        Commands::Volume(cmd) => commands::volume::run(cmd, &session).await,
        Commands::Network(cmd) => commands::network::run(cmd, &session).await,
        Commands::File(cmd) => commands::file::run(cmd, &session).await,
        Commands::User(cmd) => commands::user::run(cmd, &session).await,
        Commands::Endpoint(cmd) => commands::endpoint::run(cmd, &session).await,
        Commands::Config(_) => Ok(Completion::Success),
    }
}

/// `kind: message` for client errors anywhere in the chain
fn describe_error(err: &anyhow::Error) -> String {
    match err.chain().find_map(|e| e.downcast_ref::<ClientError>()) {
        Some(client) => {
            let context = err.to_string();
            let detail = format!("{}: {}", client.kind, client.message);
            if context == client.to_string() {
                detail
            } else {
                format!("{context}: {detail}")
            }
        }
        None => format!("error: {err:#}"),
    }
}
