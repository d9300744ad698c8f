//! OAuth 2.1 building blocks used by the flow
//!
//! - [`pkce`] -- verifier, challenge and CSRF state generation.
//! - [`discovery`] -- challenge parsing, fallback probing and metadata
//!   location rules.
//! - [`callback`] -- redirect parameter parsing and the local redirect
//!   listener.

pub mod callback;
pub mod discovery;
pub mod pkce;

pub use callback::CallbackParams;
pub use discovery::{
    AuthorizationServerMetadata, DiscoveryResult, MetadataType, ProbeStatus, ProbeVerdict,
};
pub use pkce::PkcePair;
