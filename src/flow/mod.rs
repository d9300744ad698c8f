//! The nine-step OAuth + MCP flow
//!
//! - [`state`] -- the state aggregate, history and reducer.
//! - [`steps`] -- step gates and furthest-reachable computation.
//! - [`store`] -- persistence with merge-over-defaults.
//! - [`monitor`] -- background proxy health polling.
//! - [`machine`] -- the [`Playground`] controller that runs each step.

pub mod machine;
pub mod monitor;
pub mod state;
pub mod steps;
pub mod store;

pub use machine::{FlowSettings, Playground, RegistrationOutcome};
pub use monitor::{spawn_proxy_health_monitor, ProxyHealthMonitor};
pub use state::{reduce, FlowEvent, FlowState, HistoryEntry, HistoryKind};
pub use steps::Step;
pub use store::{FileStateStore, MemoryStateStore, StateStore};
