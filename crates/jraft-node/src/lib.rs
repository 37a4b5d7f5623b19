//! jraft node - HTTP surfaces, startup and shutdown
//!
//! - `api`: data, admin and health routes
//! - `lifecycle`: shutdown trigger and the ordered stop sequence
//! - `node`: startup sequence and the running node handle
//! - `embed`: blocking entry points for embedding the node in another process

pub mod api;
pub mod embed;
pub mod lifecycle;
pub mod node;

pub use api::{ApiError, ApiState};
pub use embed::EmbeddedNode;
pub use lifecycle::{ShutdownSignal, ShutdownTrigger};
pub use node::{serve, start, start_with_executor, RunningNode};
