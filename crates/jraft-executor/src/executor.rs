//! The executor abstraction

use jraft_core::{DataRequest, ExecutorError, ExecutorInfo};
use std::future::Future;

/// A stateful service that answers data requests
///
/// Writes reach it in commit order through the state machine; reads reach it
/// directly. Both may run at the same time unless exclusive reads are enabled.
pub trait Executor: Send + Sync + 'static {
    /// Handle a single request
    fn call(
        &self,
        request: DataRequest,
    ) -> impl Future<Output = Result<DataRequest, ExecutorError>> + Send;

    /// Endpoints the executor serves
    fn endpoints(&self) -> impl Future<Output = Result<Vec<String>, ExecutorError>> + Send {
        async { Ok(Vec::new()) }
    }

    /// Name, version and other descriptive details
    fn info(&self) -> impl Future<Output = Result<ExecutorInfo, ExecutorError>> + Send {
        async { Ok(ExecutorInfo::default()) }
    }

    /// Serialized executor state for a snapshot, if the executor has any
    fn export_state(&self) -> impl Future<Output = Result<Option<Vec<u8>>, ExecutorError>> + Send {
        async { Ok(None) }
    }

    /// Replace the executor state with one produced by `export_state`
    fn import_state(
        &self,
        state: Vec<u8>,
    ) -> impl Future<Output = Result<(), ExecutorError>> + Send {
        async move {
            let _ = state;
            Ok(())
        }
    }
}
