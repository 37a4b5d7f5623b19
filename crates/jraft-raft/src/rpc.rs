//! Server side of the HTTP Raft transport

use crate::types::{ExecutorRaft, NodeId, TypeConfig};
use axum::extract::State;
use axum::routing::post;
use axum::{Json, Router};
use openraft::error::{InstallSnapshotError, RaftError};
use openraft::raft::{
    AppendEntriesRequest, AppendEntriesResponse, InstallSnapshotRequest, InstallSnapshotResponse,
    VoteRequest, VoteResponse,
};
use std::sync::Arc;

/// Routes for `/raft/*`, answered by the local Raft instance
pub fn raft_router(raft: Arc<ExecutorRaft>) -> Router {
    Router::new()
        .route("/raft/append_entries", post(append_entries))
        .route("/raft/vote", post(vote))
        .route("/raft/install_snapshot", post(install_snapshot))
        .with_state(raft)
}

async fn append_entries(
    State(raft): State<Arc<ExecutorRaft>>,
    Json(request): Json<AppendEntriesRequest<TypeConfig>>,
) -> Json<Result<AppendEntriesResponse<NodeId>, RaftError<NodeId>>> {
    Json(raft.append_entries(request).await)
}

async fn vote(
    State(raft): State<Arc<ExecutorRaft>>,
    Json(request): Json<VoteRequest<NodeId>>,
) -> Json<Result<VoteResponse<NodeId>, RaftError<NodeId>>> {
    Json(raft.vote(request).await)
}

async fn install_snapshot(
    State(raft): State<Arc<ExecutorRaft>>,
    Json(request): Json<InstallSnapshotRequest<TypeConfig>>,
) -> Json<Result<InstallSnapshotResponse<NodeId>, RaftError<NodeId, InstallSnapshotError>>> {
    Json(raft.install_snapshot(request).await)
}
