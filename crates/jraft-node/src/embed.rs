//! Blocking entry points for running a node inside another process
//!
//! Callers pass plain strings and get plain results back. The node runs on
//! its own tokio runtime, owned by the returned handle.

use crate::lifecycle::ShutdownTrigger;
use crate::node;
use jraft_cluster::AdminClient;
use jraft_core::{MembershipError, NodeConfig, ShutdownError, StartupError};
use std::net::SocketAddr;
use tokio::runtime::{Builder, Runtime};
use tokio::task::JoinHandle;

/// A node running on its own runtime
pub struct EmbeddedNode {
    runtime: Runtime,
    local_addr: SocketAddr,
    address: String,
    shutdown: ShutdownTrigger,
    done: JoinHandle<Result<(), ShutdownError>>,
}

/// Start a node and return once it is serving
pub fn start(config: NodeConfig) -> Result<EmbeddedNode, StartupError> {
    let runtime = Builder::new_multi_thread()
        .enable_all()
        .thread_name("jraft-node")
        .build()
        .map_err(StartupError::Runtime)?;

    let node = runtime.block_on(node::start(config))?;
    let local_addr = node.local_addr();
    let address = node.address().to_string();
    let shutdown = node.shutdown_trigger();
    let done = runtime.spawn(node.wait());

    Ok(EmbeddedNode {
        runtime,
        local_addr,
        address,
        shutdown,
        done,
    })
}

impl EmbeddedNode {
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Address registered in the cluster configuration
    pub fn address(&self) -> &str {
        &self.address
    }

    /// Ask the node to stop; `wait` reports the outcome
    pub fn stop(&self) {
        self.shutdown.trigger();
    }

    /// Block until the node has stopped
    pub fn wait(self) -> Result<(), ShutdownError> {
        match self.runtime.block_on(self.done) {
            Ok(result) => result,
            Err(e) => Err(ShutdownError::Join(e.to_string())),
        }
    }
}

/// Ask the node at `target`, normally the leader, to add `id@address` as a voter
pub fn add_voter(target: &str, id: &str, address: &str) -> Result<(), MembershipError> {
    let runtime = Builder::new_current_thread()
        .enable_all()
        .build()
        .map_err(|e| MembershipError::Transport(e.to_string()))?;
    runtime.block_on(AdminClient::default().add_voter(target, id, address))
}
