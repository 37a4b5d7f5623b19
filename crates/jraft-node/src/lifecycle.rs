//! Shutdown coordination

use jraft_cluster::MembershipManager;
use jraft_core::{ConsensusLog, ShutdownError};
use jraft_dispatch::Dispatcher;
use jraft_executor::Executor;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// One-shot, cloneable shutdown trigger
#[derive(Clone, Debug)]
pub struct ShutdownTrigger {
    tx: Arc<watch::Sender<bool>>,
}

impl Default for ShutdownTrigger {
    fn default() -> Self {
        Self::new()
    }
}

impl ShutdownTrigger {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    pub fn trigger(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_triggered(&self) -> bool {
        *self.tx.borrow()
    }

    pub fn subscribe(&self) -> ShutdownSignal {
        ShutdownSignal {
            rx: self.tx.subscribe(),
        }
    }
}

/// Resolves once the trigger fires, including if it already has
#[derive(Debug)]
pub struct ShutdownSignal {
    rx: watch::Receiver<bool>,
}

impl ShutdownSignal {
    pub async fn wait(mut self) {
        // The sender lives as long as any trigger clone; if all are gone
        // nothing can fire any more and waiting forever is correct
        if self.rx.wait_for(|fired| *fired).await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

/// Fire `trigger` on SIGINT or SIGTERM
pub fn spawn_signal_handler(trigger: ShutdownTrigger) -> JoinHandle<()> {
    tokio::spawn(async move {
        let ctrl_c = async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "failed to listen for ctrl-c");
                std::future::pending::<()>().await;
            }
        };

        #[cfg(unix)]
        let terminate = async {
            use tokio::signal::unix::{signal, SignalKind};
            match signal(SignalKind::terminate()) {
                Ok(mut stream) => {
                    stream.recv().await;
                }
                Err(e) => {
                    tracing::error!(error = %e, "failed to listen for SIGTERM");
                    std::future::pending::<()>().await;
                }
            }
        };

        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        tokio::select! {
            _ = ctrl_c => tracing::info!("received SIGINT"),
            _ = terminate => tracing::info!("received SIGTERM"),
        }
        trigger.trigger();
    })
}

/// Fire `trigger` once the local node drops out of the configuration
///
/// Only a node that has been a member can be removed, so a node still
/// waiting to join is left alone.
pub fn spawn_removal_watcher<L: ConsensusLog>(
    membership: Arc<MembershipManager<L>>,
    trigger: ShutdownTrigger,
    every: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(every);
        let mut was_member = false;
        let stopped = trigger.subscribe().wait();
        tokio::pin!(stopped);

        loop {
            tokio::select! {
                _ = &mut stopped => return,
                _ = interval.tick() => {}
            }

            let is_member = membership.is_member(&membership.configuration());
            if was_member && !is_member {
                tracing::warn!(
                    member = %membership.local(),
                    "removed from the cluster configuration, shutting down"
                );
                trigger.trigger();
                return;
            }
            was_member |= is_member;
        }
    })
}

/// Everything the stop sequence touches
pub struct StopSequence<L, E> {
    pub dispatcher: Arc<Dispatcher<L, E>>,
    pub log: Arc<L>,

    /// Stops the listener with a graceful drain
    pub drain: ShutdownTrigger,

    pub server: JoinHandle<std::io::Result<()>>,
}

impl<L: ConsensusLog, E: Executor> StopSequence<L, E> {
    /// Stop taking requests, drain the listener, then stop the log
    ///
    /// The log is stopped even if the listener failed; the first error wins.
    pub async fn run(self) -> Result<(), ShutdownError> {
        self.dispatcher.close();

        self.drain.trigger();
        let server = match self.server.await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(ShutdownError::Server(e)),
            Err(e) => Err(ShutdownError::Join(e.to_string())),
        };
        tracing::info!(ok = server.is_ok(), "listener stopped");

        let log = self.log.shutdown().await.map_err(ShutdownError::Consensus);
        if let Err(e) = &log {
            tracing::error!(error = %e, "consensus log failed to shut down");
        }

        server.and(log)
    }
}
