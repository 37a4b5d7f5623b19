//! jraft cluster - membership management
//!
//! - `membership`: membership operations against the local consensus log
//! - `admin`: client for a remote node's admin API

pub mod admin;
pub mod membership;

pub use admin::{AddVoterRequest, AdminClient, RemoveServerRequest};
pub use membership::MembershipManager;
