/*!
Command handlers for the CLI

Every subcommand except `shell` and `serve-proxy` runs one operation on a
[`Playground`] restored from the state file, then prints the
request/response pairs that operation appended to history.

- [`run`] -- entry point used by `main`
- [`shell`] -- interactive loop over the same commands
- [`display`] -- terminal rendering
*/

use std::time::Duration;

use colored::Colorize;
use serde_json::Value;

use crate::auth::callback::{await_redirect, bind_redirect_listener, try_open_browser};
use crate::auth::discovery::{DiscoveryResult, FallbackReason, ProbeVerdict};
use crate::cli::{AuthorizeArgs, Cli, Commands, McpCommand};
use crate::config::Config;
use crate::error::{PlaygroundError, Result};
use crate::flow::{
    FileStateStore, FlowSettings, MemoryStateStore, Playground, RegistrationOutcome, StateStore,
};
use crate::transport::{RequestMode, Transport};

pub mod display;

/// Run the command selected on the command line
///
/// # Errors
///
/// Returns the operation's error; `main` prints it and exits non-zero.
pub async fn run(cli: Cli, config: Config) -> Result<()> {
    match cli.command {
        Commands::ServeProxy { bind } => {
            let bind = bind.unwrap_or_else(|| config.proxy.bind.clone());
            let http = reqwest::Client::builder()
                .timeout(Duration::from_secs(config.http.timeout_seconds))
                .build()?;
            crate::relay::serve(&bind, http).await
        }
        Commands::Shell => shell::run_shell(&config).await,
        command => {
            let mut session = Session::open(&config)?;
            if sends_requests(&command) {
                session.check_proxy().await;
            }
            session.execute(command).await
        }
    }
}

/// Whether a command goes over the network
fn sends_requests(command: &Commands) -> bool {
    match command {
        Commands::Connect
        | Commands::ResourceMetadata
        | Commands::OauthMetadata
        | Commands::Register { .. }
        | Commands::Token
        | Commands::Discover { .. } => true,
        Commands::Mcp { command } => !matches!(command, McpCommand::Select { .. }),
        _ => false,
    }
}

/// Open the state store named by configuration
///
/// Falls back to memory when no data directory can be determined.
pub fn open_store(config: &Config) -> Box<dyn StateStore> {
    let path = match &config.state.path {
        Some(path) => Some(path.clone()),
        None => match FileStateStore::default_path() {
            Ok(path) => Some(path),
            Err(e) => {
                tracing::warn!("{}; flow state will not be saved", e);
                None
            }
        },
    };
    match path {
        Some(path) => {
            tracing::debug!(path = %path.display(), "Using state file");
            Box::new(FileStateStore::new(path))
        }
        None => Box::new(MemoryStateStore::new()),
    }
}

/// A playground plus the transient results the CLI keeps between commands
pub struct Session {
    playground: Playground,
    discovery: Vec<DiscoveryResult>,
}

impl Session {
    /// Restore the playground from configuration
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn open(config: &Config) -> Result<Self> {
        let transport = Transport::from_config(config)?;
        Ok(Self::new(Playground::restore(
            FlowSettings::from(config),
            transport,
            open_store(config),
        )))
    }

    /// Wrap an existing playground
    pub fn new(playground: Playground) -> Self {
        Self {
            playground,
            discovery: Vec::new(),
        }
    }

    /// The playground
    pub fn playground(&self) -> &Playground {
        &self.playground
    }

    async fn check_proxy(&mut self) {
        if self.playground.state().request_mode != RequestMode::Proxy {
            return;
        }
        if !self.playground.probe_proxy_health().await {
            println!(
                "{}",
                format!(
                    "Proxy relay at {} is not reachable; switched to direct mode.",
                    self.playground.transport().proxy().base_url()
                )
                .yellow()
            );
        }
    }

    /// Run one command and print the exchanges it recorded
    ///
    /// Entries recorded before a failure are printed too.
    ///
    /// # Errors
    ///
    /// Returns the operation's error.
    pub async fn execute(&mut self, command: Commands) -> Result<()> {
        let before = display::history_counts(self.playground.state());
        let result = self.dispatch(command).await;
        display::print_new_entries(self.playground.state(), &before);
        result
    }

    async fn dispatch(&mut self, command: Commands) -> Result<()> {
        let pg = &mut self.playground;
        match command {
            Commands::Status => display::print_status(pg),
            Commands::Start => println!("Now at {}", pg.start().to_string().bold()),
            Commands::Server { url } => {
                pg.set_server_url(&url)?;
                println!("MCP server set to {}", url.trim().cyan());
            }
            Commands::Mode { mode } => {
                pg.set_request_mode(mode).await?;
                println!("Requests now go {}", describe_mode(mode).cyan());
            }
            Commands::Connect => report_probe(&pg.connect().await?),
            Commands::Discover { select } => return self.discover(select).await,
            Commands::ResourceMetadata => match pg.fetch_resource_metadata().await? {
                Some(_) => match &pg.state().authorization_server_url {
                    Some(url) => println!("\nAuthorization server: {}", url.cyan()),
                    None => println!(
                        "\n{}",
                        "The resource metadata names no authorization server.".yellow()
                    ),
                },
                None => println!(
                    "OAuth metadata was already loaded by fallback discovery; continue with {}",
                    "register".cyan()
                ),
            },
            Commands::OauthMetadata => {
                let metadata = pg.fetch_oauth_metadata().await?;
                println!();
                for key in [
                    "issuer",
                    "authorization_endpoint",
                    "token_endpoint",
                    "registration_endpoint",
                ] {
                    let value = metadata.get(key).and_then(Value::as_str).unwrap_or("-");
                    println!("{:<24} {}", key.bold(), value);
                }
            }
            Commands::Register { client_name } => {
                match pg.register_client(client_name.as_deref()).await? {
                    RegistrationOutcome::Registered {
                        client_id,
                        client_secret,
                    } => {
                        println!("\nRegistered client {}", client_id.green().bold());
                        if client_secret.is_some() {
                            println!("A client secret was issued and stored.");
                        }
                    }
                    RegistrationOutcome::AlreadyRegistered { client_id } => println!(
                        "Client {} is already registered; nothing sent.",
                        client_id.cyan()
                    ),
                }
            }
            Commands::Credentials {
                client_id,
                client_secret,
            } => {
                pg.set_client_credentials(&client_id, client_secret.as_deref())?;
                println!("Client credentials stored.");
            }
            Commands::Prepare => {
                let url = pg.prepare_authorization()?;
                let state = pg.state();
                for (label, value) in [
                    ("code_verifier", &state.code_verifier),
                    ("code_challenge", &state.code_challenge),
                    ("state", &state.csrf_state),
                ] {
                    println!("{:<16} {}", label.bold(), value.as_deref().unwrap_or(""));
                }
                println!("\nAuthorization URL:\n{}", url.cyan());
            }
            Commands::Authorize(args) => authorize(pg, args).await?,
            Commands::Token => {
                let token = pg.exchange_token().await?;
                let state = pg.state();
                println!("\nAccess token: {}", token.green());
                if let Some(kind) = &state.token_type {
                    println!("Token type:   {}", kind);
                }
                if let Some(expires_in) = state.expires_in {
                    println!("Expires in:   {}s", expires_in);
                }
                if state.refresh_token.is_some() {
                    println!("A refresh token was issued.");
                }
            }
            Commands::Mcp { command } => mcp(pg, command).await?,
            Commands::Goto { step } => println!("Now at {}", pg.goto(step)?.to_string().bold()),
            Commands::Next => println!("Now at {}", pg.advance()?.to_string().bold()),
            Commands::History { step } => display::print_history(pg.state(), step),
            Commands::Reset => {
                let mode = pg.reset().await;
                self.discovery.clear();
                println!("Flow reset. Requests go {}.", describe_mode(mode));
            }
            Commands::Shell | Commands::ServeProxy { .. } => {
                return Err(PlaygroundError::InvalidInput(
                    "this command is only available from the command line".to_string(),
                )
                .into())
            }
        }
        Ok(())
    }

    async fn discover(&mut self, select: Option<usize>) -> Result<()> {
        if select.is_none() || self.discovery.is_empty() {
            self.discovery = self.playground.run_fallback_discovery().await?;
            if select.is_none() {
                display::print_discovery_results(&self.discovery);
                return Ok(());
            }
        }

        let Some(index) = select else {
            return Ok(());
        };
        let result = index
            .checked_sub(1)
            .and_then(|i| self.discovery.get(i))
            .ok_or_else(|| {
                PlaygroundError::InvalidInput(format!(
                    "no discovery result #{}; {} results are listed",
                    index,
                    self.discovery.len()
                ))
            })?
            .clone();
        let kind = self.playground.select_discovery_result(&result)?;
        println!("Adopted {} metadata from {}", kind.label().bold(), result.url.cyan());
        Ok(())
    }
}

fn describe_mode(mode: RequestMode) -> &'static str {
    match mode {
        RequestMode::Direct => "directly to the target",
        RequestMode::Proxy => "through the proxy relay",
        RequestMode::Extension => "through the extension bridge",
    }
}

fn report_probe(verdict: &ProbeVerdict) {
    println!();
    match verdict {
        ProbeVerdict::ResourceMetadataAdvertised { url, .. } => {
            println!("Resource metadata advertised at {}", url.green());
        }
        ProbeVerdict::FallbackRequired { reason, .. } => {
            let why = match reason {
                FallbackReason::MissingChallenge => {
                    "401 without a WWW-Authenticate header".to_string()
                }
                FallbackReason::ChallengeWithoutMetadata => {
                    "the challenge carries no resource_metadata".to_string()
                }
                FallbackReason::ClientError(status) => format!("HTTP {} without a challenge", status),
            };
            println!("{} {}", "No metadata hint:".yellow(), why);
            println!("Run {} to probe well-known locations.", "discover".cyan());
        }
        ProbeVerdict::NotProtected { status } => {
            println!(
                "{}",
                format!("Server answered {} without asking for authorization.", status).yellow()
            );
        }
        ProbeVerdict::UnexpectedStatus { status } => {
            println!("{}", format!("Unexpected HTTP {} from the server.", status).yellow());
        }
    }
}

async fn authorize(pg: &mut Playground, args: AuthorizeArgs) -> Result<()> {
    let code = if let Some(url) = args.callback_url {
        pg.handle_callback_url(&url)?
    } else if let Some(code) = args.code {
        pg.set_manual_code(&code)?;
        code.trim().to_string()
    } else {
        let browser_url = pg.browser_authorization_url()?;
        let redirect_uri = pg.settings().redirect_uri.clone();
        let redirect_path = url::Url::parse(&redirect_uri)?.path().to_string();
        let listener = bind_redirect_listener(&redirect_uri).await?;

        println!("Open this URL to authorize:\n{}", browser_url.cyan());
        if args.open {
            try_open_browser(&browser_url);
        }
        println!("Waiting for the redirect to {} ...", redirect_uri);
        let params = await_redirect(&listener, &redirect_path).await?;
        pg.accept_callback(params)?
    };
    println!("Authorization code: {}", code.green());
    Ok(())
}

async fn mcp(pg: &mut Playground, command: McpCommand) -> Result<()> {
    match command {
        McpCommand::Init => match pg.initialize_session().await? {
            Some(session_id) => println!("\nSession {}", session_id.green()),
            None => println!("\nInitialized; the server issued no session ID."),
        },
        McpCommand::Tools => display::print_tools(&pg.list_tools().await?),
        McpCommand::Select { name } => {
            let tool = pg.select_tool(&name)?;
            println!("Selected {}", tool.name.cyan());
            if let Some(schema) = &tool.input_schema {
                println!("{}", display::render_body(schema));
            }
        }
        McpCommand::Call { name, args } => {
            let result = pg.call_tool(name.as_deref(), &args).await?;
            println!("\n{}\n{}", "Result:".bold(), display::render_body(&result));
        }
    }
    Ok(())
}

pub mod shell {
    //! Interactive shell
    //!
    //! Reads commands with rustyline and runs them against one session. The
    //! proxy health monitor runs in the background; if the relay goes away
    //! while proxy mode is selected the session falls back to direct mode.

    use super::*;
    use crate::cli::{split_words, ShellLine};
    use crate::flow::machine::health_interval;
    use crate::flow::spawn_proxy_health_monitor;
    use clap::Parser;
    use rustyline::error::ReadlineError;
    use rustyline::DefaultEditor;

    /// Start the shell
    ///
    /// # Errors
    ///
    /// Returns an error if the session or the line editor cannot start.
    pub async fn run_shell(config: &Config) -> Result<()> {
        let mut session = Session::open(config)?;

        let monitor = spawn_proxy_health_monitor(
            session.playground.transport().proxy().clone(),
            health_interval(config),
        );
        session.playground.attach_proxy_monitor(monitor.subscribe());

        if let Some(extension) = session.playground.transport().extension() {
            let mut readiness = extension.readiness();
            tokio::spawn(async move {
                while readiness.changed().await.is_ok() {
                    let ready = *readiness.borrow();
                    tracing::info!(ready, "Extension bridge readiness changed");
                }
            });
        }

        let mut rl = DefaultEditor::new()?;
        print_banner();

        loop {
            let state = session.playground.state();
            let prompt = format!("[{} | {}]> ", state.current_step, state.request_mode);
            match rl.readline(&prompt) {
                Ok(line) => {
                    let trimmed = line.trim();
                    if trimmed.is_empty() {
                        continue;
                    }
                    if matches!(trimmed, "exit" | "quit") {
                        break;
                    }
                    rl.add_history_entry(trimmed)?;

                    let words = match split_words(trimmed) {
                        Ok(words) => words,
                        Err(e) => {
                            eprintln!("{} {}", "Error:".red().bold(), e);
                            continue;
                        }
                    };
                    match ShellLine::try_parse_from(words) {
                        Ok(ShellLine { command }) => {
                            if let Err(e) = session.execute(command).await {
                                display::print_error(&e);
                            }
                        }
                        // Covers `help` and `--help` as well as usage errors.
                        Err(e) => println!("{}", e),
                    }
                }
                Err(ReadlineError::Interrupted) => continue,
                Err(ReadlineError::Eof) => break,
                Err(e) => return Err(e.into()),
            }

            if let Some(mode) = session.playground.refresh_availability() {
                println!(
                    "{}",
                    format!("Proxy relay became unavailable; switched to {} mode.", mode).yellow()
                );
            }
        }

        monitor.stop();
        Ok(())
    }

    fn print_banner() {
        println!("\n╔══════════════════════════════════════════════════════════════╗");
        println!("║              MCP Auth Playground - Interactive               ║");
        println!("╚══════════════════════════════════════════════════════════════╝\n");
        println!("Type 'help' for commands, 'status' for progress, 'exit' to quit\n");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sends_requests() {
        assert!(sends_requests(&Commands::Connect));
        assert!(sends_requests(&Commands::Discover { select: None }));
        // Outside the shell there are no cached results to select from.
        assert!(sends_requests(&Commands::Discover { select: Some(1) }));
        assert!(sends_requests(&Commands::Mcp {
            command: McpCommand::Tools
        }));
        assert!(!sends_requests(&Commands::Mcp {
            command: McpCommand::Select {
                name: "echo".to_string()
            }
        }));
        assert!(!sends_requests(&Commands::Status));
    }

    #[test]
    fn test_open_store_uses_configured_path() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.state.path = Some(dir.path().join("flow.json"));
        let store = open_store(&config);
        store.save("{}").unwrap();
        assert!(dir.path().join("flow.json").exists());
    }
}
