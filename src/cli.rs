//! Command-line interface definition for the MCP auth playground
//!
//! Each subcommand maps onto one operation of the flow. The same
//! subcommands are accepted line by line inside `shell`.

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

use crate::transport::RequestMode;

/// MCP auth playground - step through MCP OAuth 2.1 + PKCE by hand
///
/// Every request and response of the flow is printed and kept in a
/// per-step history so each protocol exchange can be inspected.
#[derive(Parser, Debug, Clone)]
#[command(name = "mcp-auth-playground")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "config/config.yaml")]
    pub config: Option<String>,

    /// Enable verbose logging
    #[arg(short, long)]
    pub verbose: bool,

    /// Flow state file (overrides configuration)
    #[arg(long)]
    pub state_file: Option<PathBuf>,

    /// Emit logs as JSON
    #[arg(long)]
    pub json_logs: bool,

    /// Command to execute
    #[command(subcommand)]
    pub command: Commands,
}

/// Available commands
#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum Commands {
    /// Show the current step, request mode and collected values
    Status,

    /// Leave the introduction and begin at step 1
    Start,

    /// Set the MCP server URL
    Server {
        /// MCP server URL
        url: String,
    },

    /// Select how requests are sent (direct, proxy, extension)
    Mode {
        /// Request mode
        mode: RequestMode,
    },

    /// Step 1: probe the server without credentials
    Connect,

    /// Step 1: probe well-known metadata locations
    Discover {
        /// Adopt the result in this row (1-based) of the last discovery table
        #[arg(short, long)]
        select: Option<usize>,
    },

    /// Step 2: fetch protected resource metadata
    ResourceMetadata,

    /// Step 2: fetch authorization server metadata
    OauthMetadata,

    /// Step 3: register a client dynamically
    Register {
        /// Client name sent in the registration request
        #[arg(long)]
        client_name: Option<String>,
    },

    /// Step 3: enter client credentials by hand
    Credentials {
        /// Client ID
        #[arg(long)]
        client_id: String,

        /// Client secret (omit for public clients)
        #[arg(long)]
        client_secret: Option<String>,
    },

    /// Step 4: generate PKCE values and the authorization URL
    Prepare,

    /// Step 5: supply the authorization code
    Authorize(AuthorizeArgs),

    /// Step 6: exchange the code for tokens
    Token,

    /// Step 8: talk to the MCP server
    Mcp {
        /// MCP subcommand
        #[command(subcommand)]
        command: McpCommand,
    },

    /// Jump to a step already reached
    Goto {
        /// Step number (0-8)
        step: u8,
    },

    /// Advance to the next step
    Next,

    /// Show recorded request/response pairs
    History {
        /// Only this step
        #[arg(short, long)]
        step: Option<u8>,
    },

    /// Wipe all flow state
    Reset,

    /// Interactive shell accepting the commands above
    Shell,

    /// Run the proxy relay server
    ServeProxy {
        /// Address to bind (overrides configuration)
        #[arg(short, long)]
        bind: Option<String>,
    },
}

/// How the authorization code arrives
#[derive(Args, Debug, Clone, Default, PartialEq)]
pub struct AuthorizeArgs {
    /// Callback URL copied from the browser after authorizing
    #[arg(
        long,
        conflicts_with_all = ["code", "listen"],
        required_unless_present_any = ["code", "listen"]
    )]
    pub callback_url: Option<String>,

    /// Authorization code entered by hand
    #[arg(long, conflicts_with = "listen")]
    pub code: Option<String>,

    /// Listen on the redirect URI and capture the redirect
    #[arg(long)]
    pub listen: bool,

    /// Open the authorization URL in the system browser (with --listen)
    #[arg(long, requires = "listen")]
    pub open: bool,
}

/// MCP subcommands
#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum McpCommand {
    /// Send `initialize`
    Init,

    /// Send `tools/list`
    Tools,

    /// Choose a tool from the last listing
    Select {
        /// Tool name
        name: String,
    },

    /// Send `tools/call`
    Call {
        /// Tool name (defaults to the selected tool)
        name: Option<String>,

        /// Arguments as a JSON object
        #[arg(short, long, default_value = "{}")]
        args: String,
    },
}

/// One line typed into `shell`
#[derive(Parser, Debug, Clone)]
#[command(no_binary_name = true, disable_version_flag = true)]
pub struct ShellLine {
    /// Command to execute
    #[command(subcommand)]
    pub command: Commands,
}

impl Cli {
    /// Parse command line arguments
    ///
    /// # Returns
    ///
    /// Returns the parsed CLI structure
    pub fn parse_args() -> Self {
        Self::parse()
    }
}

impl Default for Cli {
    fn default() -> Self {
        Self {
            config: Some("config/config.yaml".to_string()),
            verbose: false,
            state_file: None,
            json_logs: false,
            command: Commands::Status,
        }
    }
}

/// Split a shell line into words
///
/// Single quotes keep everything literally; double quotes allow `\"` and
/// `\\` escapes. Whitespace outside quotes separates words.
///
/// # Errors
///
/// Returns a message for an unterminated quote.
pub fn split_words(line: &str) -> Result<Vec<String>, String> {
    let mut words = Vec::new();
    let mut current = String::new();
    let mut in_word = false;
    let mut chars = line.chars();

    while let Some(c) = chars.next() {
        match c {
            '\'' => {
                in_word = true;
                loop {
                    match chars.next() {
                        Some('\'') => break,
                        Some(ch) => current.push(ch),
                        None => return Err("unterminated single quote".to_string()),
                    }
                }
            }
            '"' => {
                in_word = true;
                loop {
                    match chars.next() {
                        Some('"') => break,
                        Some('\\') => match chars.next() {
                            Some(ch @ ('"' | '\\')) => current.push(ch),
                            Some(ch) => {
                                current.push('\\');
                                current.push(ch);
                            }
                            None => return Err("unterminated double quote".to_string()),
                        },
                        Some(ch) => current.push(ch),
                        None => return Err("unterminated double quote".to_string()),
                    }
                }
            }
            c if c.is_whitespace() => {
                if in_word {
                    words.push(std::mem::take(&mut current));
                    in_word = false;
                }
            }
            c => {
                in_word = true;
                current.push(c);
            }
        }
    }
    if in_word {
        words.push(current);
    }
    Ok(words)
}
