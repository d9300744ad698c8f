//! MCP auth playground library
//!
//! Walks a Model Context Protocol client through OAuth 2.1 authorization
//! one step at a time: unauthenticated probe, metadata discovery, dynamic
//! client registration, PKCE authorization, token exchange, and an
//! authenticated MCP session. Every HTTP exchange is recorded per step.
//!
//! # Architecture
//!
//! - `auth`: PKCE, metadata discovery, registration and callback handling
//! - `mcp`: JSON-RPC framing for the authenticated session
//! - `transport`: direct, proxy and extension request channels
//! - `bridge`: the local stand-in for the browser extension
//! - `relay`: the proxy relay server
//! - `flow`: the step state machine, persistence and health monitoring
//! - `config`: Configuration management and validation
//! - `error`: Error types and result aliases
//! - `cli` / `commands`: Command-line interface and handlers
//!
//! # Example
//!
//! ```no_run
//! use mcp_auth_playground::{Config, FlowSettings, MemoryStateStore, Playground, Transport};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load("config.yaml", &Default::default())?;
//!     config.validate()?;
//!
//!     let mut playground = Playground::restore(
//!         FlowSettings::from(&config),
//!         Transport::from_config(&config)?,
//!         Box::new(MemoryStateStore::new()),
//!     );
//!     playground.start();
//!     let verdict = playground.connect().await?;
//!     println!("{:?}", verdict);
//!     Ok(())
//! }
//! ```

pub mod auth;
pub mod bridge;
pub mod cli;
pub mod commands;
pub mod config;
pub mod error;
pub mod flow;
pub mod mcp;
pub mod relay;
pub mod transport;

// Re-export commonly used types
pub use config::Config;
pub use error::{PlaygroundError, Result};
pub use flow::{
    FileStateStore, FlowSettings, FlowState, MemoryStateStore, Playground, StateStore, Step,
};
pub use transport::{Exchange, OutboundRequest, RequestMode, ResponseRecord, Transport};
