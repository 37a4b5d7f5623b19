//! Node startup

use crate::api::{self, ApiState};
use crate::lifecycle::{spawn_removal_watcher, spawn_signal_handler, ShutdownTrigger, StopSequence};
use axum::Router;
use jraft_cluster::MembershipManager;
use jraft_core::{
    ClusterMember, ConsensusLog, MembershipError, NodeConfig, ShutdownError, StartupError,
};
use jraft_dispatch::{Dispatcher, WriteEndpoints};
use jraft_executor::{Executor, ExecutorFsm, HttpExecutor};
use jraft_raft::{parse_node_id, raft_router, ExecutorStateMachine, RaftLog, RocksLogStore};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;

/// Upper bound on a single configuration change
const MEMBERSHIP_TIMEOUT: Duration = Duration::from_secs(10);

/// A node serving requests until it is told to stop
pub struct RunningNode<L, E> {
    local_addr: SocketAddr,

    /// Address other nodes and clients reach this node at
    address: String,

    fsm: Arc<ExecutorFsm<E>>,
    membership: Arc<MembershipManager<L>>,
    shutdown: ShutdownTrigger,
    stop: StopSequence<L, E>,

    /// Background tasks aborted once the node has stopped
    tasks: Vec<JoinHandle<()>>,
}

impl<L: ConsensusLog, E: Executor> RunningNode<L, E> {
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn log(&self) -> &Arc<L> {
        &self.stop.log
    }

    pub fn fsm(&self) -> &Arc<ExecutorFsm<E>> {
        &self.fsm
    }

    pub fn dispatcher(&self) -> &Arc<Dispatcher<L, E>> {
        &self.stop.dispatcher
    }

    pub fn membership(&self) -> &Arc<MembershipManager<L>> {
        &self.membership
    }

    /// Trigger that stops this node when fired
    pub fn shutdown_trigger(&self) -> ShutdownTrigger {
        self.shutdown.clone()
    }

    /// Wait until shutdown is triggered, then stop in order
    pub async fn wait(self) -> Result<(), ShutdownError> {
        self.shutdown.subscribe().wait().await;
        tracing::info!(address = %self.address, "shutting down");

        let result = self.stop.run().await;
        for task in &self.tasks {
            task.abort();
        }

        tracing::info!(ok = result.is_ok(), "node stopped");
        result
    }

    /// Like `wait`, with SIGINT and SIGTERM also triggering shutdown
    pub async fn run_until_signal(self) -> Result<(), ShutdownError> {
        let signals = spawn_signal_handler(self.shutdown.clone());
        let result = self.wait().await;
        signals.abort();
        result
    }
}

/// Address to register in the configuration; port 0 resolves to the bound port
fn advertised_address(config: &NodeConfig, local_addr: SocketAddr) -> Result<String, StartupError> {
    if config.port()? == 0 {
        Ok(format!("{}:{}", config.host(), local_addr.port()))
    } else {
        Ok(config.address.clone())
    }
}

/// Serve `log` and `fsm` on `listener`
///
/// `extra` is merged into the API router; the Raft transport uses it to add
/// its RPC routes. With `bootstrap` set, this node bootstraps a single-voter
/// cluster first; an already bootstrapped cluster is fine.
pub async fn serve<L: ConsensusLog, E: Executor>(
    config: &NodeConfig,
    listener: TcpListener,
    log: Arc<L>,
    fsm: Arc<ExecutorFsm<E>>,
    extra: Router,
) -> Result<RunningNode<L, E>, StartupError> {
    let local_addr = listener.local_addr().map_err(|source| StartupError::Bind {
        addr: config.address.clone(),
        source,
    })?;
    let address = advertised_address(config, local_addr)?;

    let classifier = Arc::new(WriteEndpoints::new(config.write_endpoints.iter().cloned()));
    let dispatcher = Arc::new(
        Dispatcher::new(log.clone(), fsm.clone(), classifier)
            .with_apply_timeout(config.apply_timeout),
    );
    let membership = Arc::new(MembershipManager::new(
        log.clone(),
        ClusterMember::voter(config.node_id.clone(), address.clone()),
        MEMBERSHIP_TIMEOUT,
    ));

    if config.bootstrap {
        match membership.bootstrap(None).await {
            Ok(()) => {}
            Err(MembershipError::AlreadyBootstrapped) => {
                tracing::info!("cluster already bootstrapped, continuing");
            }
            Err(e) => {
                if let Err(stop) = log.shutdown().await {
                    tracing::warn!(error = %stop, "failed to stop consensus log");
                }
                return Err(StartupError::Bootstrap(e));
            }
        }
    }

    let router = api::router(ApiState {
        dispatcher: dispatcher.clone(),
        membership: membership.clone(),
    })
    .merge(extra)
    .layer(ServiceBuilder::new().layer(TraceLayer::new_for_http()));

    let drain = ShutdownTrigger::new();
    let drained = drain.subscribe();
    let server = tokio::spawn(async move {
        axum::serve(listener, router)
            .with_graceful_shutdown(drained.wait())
            .await
    });

    let shutdown = ShutdownTrigger::new();
    let mut tasks = Vec::new();
    if config.raft.shutdown_on_remove {
        tasks.push(spawn_removal_watcher(
            membership.clone(),
            shutdown.clone(),
            config.raft.heartbeat_timeout,
        ));
    }

    tracing::info!(
        node_id = %config.node_id,
        address = %address,
        listen = %local_addr,
        write_endpoints = config.write_endpoints.len(),
        "node serving"
    );

    Ok(RunningNode {
        local_addr,
        address,
        fsm,
        membership,
        shutdown,
        stop: StopSequence {
            dispatcher,
            log,
            drain,
            server,
        },
        tasks,
    })
}

/// Start a node over the Raft log, forwarding to `executor`
pub async fn start_with_executor<E: Executor>(
    config: NodeConfig,
    executor: Arc<E>,
) -> Result<RunningNode<RaftLog, E>, StartupError> {
    config.validate()?;
    let node_id = parse_node_id(&config.node_id).map_err(|e| StartupError::Config(e.to_string()))?;

    let bind = format!("0.0.0.0:{}", config.port()?);
    let listener = TcpListener::bind(&bind)
        .await
        .map_err(|source| StartupError::Bind { addr: bind, source })?;

    let dir = config.node_dir();
    let store = RocksLogStore::open(&dir).map_err(|e| StartupError::Storage(e.to_string()))?;

    let fsm = Arc::new(ExecutorFsm::with_exclusive_reads(
        executor,
        config.exclusive_reads,
    ));
    let state_machine = ExecutorStateMachine::open(
        fsm.clone(),
        &dir,
        !config.raft.no_snapshot_restore_on_start,
    )
    .await
    .map_err(|e| StartupError::Storage(e.to_string()))?;

    let log = RaftLog::start(node_id, &config.raft, store, Arc::new(state_machine)).await?;

    // A zero interval leaves snapshots to the log-size policy alone
    let ticker = if config.raft.snapshot_interval.is_zero() {
        None
    } else {
        Some(log.spawn_snapshot_ticker(config.raft.snapshot_interval))
    };
    let rpc = raft_router(log.raft().clone());

    let mut node = serve(&config, listener, Arc::new(log), fsm, rpc).await?;
    node.tasks.extend(ticker);
    Ok(node)
}

/// Start a node forwarding to the executor at `executor_target`
pub async fn start(config: NodeConfig) -> Result<RunningNode<RaftLog, HttpExecutor>, StartupError> {
    let executor = Arc::new(HttpExecutor::new(config.executor_target.clone()));
    start_with_executor(config, executor).await
}
