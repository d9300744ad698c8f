//! MCP auth playground - step through MCP OAuth 2.1 + PKCE by hand
//!
#![doc = "Main entry point for the mcp-auth-playground CLI."]

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use mcp_auth_playground::cli::Cli;
use mcp_auth_playground::commands;
use mcp_auth_playground::config::Config;

#[tokio::main]
async fn main() {
    let cli = Cli::parse_args();

    init_tracing(cli.verbose, cli.json_logs);

    if let Err(e) = run(cli).await {
        commands::display::print_error(&e);
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let config_path = cli
        .config
        .clone()
        .unwrap_or_else(|| "config/config.yaml".to_string());
    let config = Config::load(&config_path, &cli)?;
    config.validate()?;

    tracing::debug!(command = ?cli.command, "Executing command");
    commands::run(cli, config).await
}

/// Initialize tracing to stderr
///
/// `RUST_LOG` takes precedence over `--verbose`.
fn init_tracing(verbose: bool, json: bool) {
    let default_level = if verbose {
        "mcp_auth_playground=debug"
    } else {
        "mcp_auth_playground=info"
    };
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    let registry = tracing_subscriber::registry().with(env_filter);
    if json {
        registry
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_writer(std::io::stderr),
            )
            .init();
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
    }
}
