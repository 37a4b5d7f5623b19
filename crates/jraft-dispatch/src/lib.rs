//! jraft request dispatch
//!
//! Decides whether a data request is a write, which goes through the
//! consensus log, or a read, which is served by the local replica.

pub mod classifier;
pub mod dispatcher;

pub use classifier::{Classifier, Route, WriteEndpoints};
pub use dispatcher::{Dispatcher, DEFAULT_APPLY_TIMEOUT};
