//! Model Context Protocol session support
//!
//! Once an access token exists, the flow exercises the MCP server over
//! JSON-RPC: `initialize`, `tools/list` and `tools/call`. Request bodies and
//! response decoding live in [`session`]; the calls themselves go through
//! [`crate::flow::Playground`] so they share the selected request mode and
//! are recorded in history.

pub mod session;

pub use session::ToolDescriptor;
