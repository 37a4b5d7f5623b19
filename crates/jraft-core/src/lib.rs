//! jraft core - shared types, errors and configuration for the replicated executor

pub mod command;
pub mod config;
pub mod consensus;
pub mod error;
pub mod membership;
pub mod types;

pub use command::*;
pub use config::*;
pub use consensus::*;
pub use error::*;
pub use membership::*;
pub use types::*;
