//! HTTP surfaces of a node: data, executor metadata, admin and health

use axum::body::Bytes;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use jraft_cluster::{AddVoterRequest, MembershipManager, RemoveServerRequest};
use jraft_core::{
    ClusterMember, ConsensusLog, DataRequest, DispatchError, ErrorBody, ExecutorError,
    ExecutorInfo, HealthStatus, LeaderInfo, LogError, MembershipError, NodeRole,
};
use jraft_dispatch::Dispatcher;
use jraft_executor::Executor;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Shared state of the API handlers
pub struct ApiState<L, E> {
    pub dispatcher: Arc<Dispatcher<L, E>>,
    pub membership: Arc<MembershipManager<L>>,
}

impl<L, E> Clone for ApiState<L, E> {
    fn clone(&self) -> Self {
        Self {
            dispatcher: self.dispatcher.clone(),
            membership: self.membership.clone(),
        }
    }
}

/// Error response: a status code and an `ErrorBody`
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    body: ErrorBody,
}

impl ApiError {
    fn new(status: StatusCode, code: &str, message: impl Into<String>) -> Self {
        Self {
            status,
            body: ErrorBody {
                code: code.to_string(),
                message: message.into(),
                retriable: false,
                commit_status: None,
                leader: None,
                conflict: None,
            },
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, "BAD_REQUEST", message)
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn body(&self) -> &ErrorBody {
        &self.body
    }
}

fn log_status(e: &LogError) -> StatusCode {
    match e {
        LogError::NotLeader { .. } => StatusCode::MISDIRECTED_REQUEST,
        LogError::Timeout(_) | LogError::ShuttingDown | LogError::Stopped => {
            StatusCode::SERVICE_UNAVAILABLE
        }
        LogError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn executor_status(e: &ExecutorError) -> StatusCode {
    match e {
        ExecutorError::Rejected(_) | ExecutorError::MalformedCommand(_) => {
            StatusCode::UNPROCESSABLE_ENTITY
        }
        ExecutorError::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
    }
}

impl From<DispatchError> for ApiError {
    fn from(e: DispatchError) -> Self {
        let status = match &e {
            DispatchError::Serialization(_) => StatusCode::BAD_REQUEST,
            DispatchError::NotAccepting => StatusCode::SERVICE_UNAVAILABLE,
            DispatchError::Retriable(log) => log_status(log),
            DispatchError::Executor(exec) | DispatchError::Read(exec) => executor_status(exec),
            DispatchError::UnexpectedResult(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        Self {
            status,
            body: ErrorBody {
                code: e.code().to_string(),
                message: e.to_string(),
                retriable: e.is_retriable(),
                commit_status: Some(e.commit_status()),
                leader: e.leader().map(str::to_string),
                conflict: None,
            },
        }
    }
}

impl From<MembershipError> for ApiError {
    fn from(e: MembershipError) -> Self {
        let status = match &e {
            MembershipError::AlreadyBootstrapped | MembershipError::AddressConflict { .. } => {
                StatusCode::CONFLICT
            }
            MembershipError::InvalidMember(_) => StatusCode::BAD_REQUEST,
            MembershipError::UnknownMember(_) => StatusCode::NOT_FOUND,
            MembershipError::Log(log) => log_status(log),
            MembershipError::Transport(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        let retriable = matches!(&e, MembershipError::Log(_));
        Self {
            status,
            body: ErrorBody {
                code: e.code().to_string(),
                message: e.to_string(),
                retriable,
                commit_status: None,
                leader: e.leader().map(str::to_string),
                conflict: e.conflict(),
            },
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(self.body)).into_response()
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: HealthStatus,
    pub role: NodeRole,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub leader: Option<String>,
}

/// Data, executor metadata, admin and health routes
pub fn router<L: ConsensusLog, E: Executor>(state: ApiState<L, E>) -> Router {
    Router::new()
        .route("/v1/data", post(data::<L, E>))
        .route("/v1/endpoints", get(endpoints::<L, E>))
        .route("/v1/info", get(info::<L, E>))
        .route("/admin/bootstrap", post(bootstrap::<L, E>))
        .route("/admin/add-voter", post(add_voter::<L, E>))
        .route("/admin/remove-server", post(remove_server::<L, E>))
        .route("/admin/leader", get(leader::<L, E>))
        .route("/admin/configuration", get(configuration::<L, E>))
        .route("/health", get(health::<L, E>))
        .with_state(state)
}

async fn data<L: ConsensusLog, E: Executor>(
    State(state): State<ApiState<L, E>>,
    Json(request): Json<DataRequest>,
) -> Result<Json<DataRequest>, ApiError> {
    let response = state.dispatcher.handle(request).await?;
    Ok(Json(response))
}

async fn endpoints<L: ConsensusLog, E: Executor>(
    State(state): State<ApiState<L, E>>,
) -> Result<Json<Vec<String>>, ApiError> {
    Ok(Json(state.dispatcher.endpoints().await?))
}

async fn info<L: ConsensusLog, E: Executor>(
    State(state): State<ApiState<L, E>>,
) -> Result<Json<ExecutorInfo>, ApiError> {
    Ok(Json(state.dispatcher.info().await?))
}

async fn bootstrap<L: ConsensusLog, E: Executor>(
    State(state): State<ApiState<L, E>>,
    body: Bytes,
) -> Result<StatusCode, ApiError> {
    // An empty body bootstraps this node
    let member: Option<ClusterMember> = if body.is_empty() {
        None
    } else {
        serde_json::from_slice(&body).map_err(|e| ApiError::bad_request(e.to_string()))?
    };

    state.membership.bootstrap(member).await?;
    Ok(StatusCode::OK)
}

async fn add_voter<L: ConsensusLog, E: Executor>(
    State(state): State<ApiState<L, E>>,
    Json(request): Json<AddVoterRequest>,
) -> Result<StatusCode, ApiError> {
    state
        .membership
        .add_voter(&request.id, &request.address)
        .await?;
    Ok(StatusCode::OK)
}

async fn remove_server<L: ConsensusLog, E: Executor>(
    State(state): State<ApiState<L, E>>,
    Json(request): Json<RemoveServerRequest>,
) -> Result<StatusCode, ApiError> {
    state.membership.remove_server(&request.id).await?;
    Ok(StatusCode::OK)
}

async fn leader<L: ConsensusLog, E: Executor>(
    State(state): State<ApiState<L, E>>,
) -> Result<Json<LeaderInfo>, ApiError> {
    state.membership.leader_info().map(Json).ok_or_else(|| {
        ApiError::new(
            StatusCode::SERVICE_UNAVAILABLE,
            "NO_LEADER",
            "no leader is known",
        )
    })
}

async fn configuration<L: ConsensusLog, E: Executor>(
    State(state): State<ApiState<L, E>>,
) -> Json<Vec<ClusterMember>> {
    Json(state.membership.configuration())
}

async fn health<L: ConsensusLog, E: Executor>(
    State(state): State<ApiState<L, E>>,
) -> (StatusCode, Json<HealthResponse>) {
    let status = state.membership.health();
    let code = match status {
        HealthStatus::Serving => StatusCode::OK,
        HealthStatus::NotServing => StatusCode::SERVICE_UNAVAILABLE,
    };
    let response = HealthResponse {
        status,
        role: state.membership.role(),
        leader: state.membership.leader_info().map(|l| l.address),
    };
    (code, Json(response))
}

#[cfg(test)]
mod tests {
    use super::*;
    use jraft_core::CommitStatus;
    use std::time::Duration;

    #[test]
    fn test_dispatch_error_status() {
        let cases = [
            (
                DispatchError::Serialization("bad".into()),
                StatusCode::BAD_REQUEST,
            ),
            (
                DispatchError::Retriable(LogError::NotLeader {
                    leader: Some("10.0.0.2:50051".into()),
                }),
                StatusCode::MISDIRECTED_REQUEST,
            ),
            (
                DispatchError::Retriable(LogError::Timeout(Duration::from_secs(1))),
                StatusCode::SERVICE_UNAVAILABLE,
            ),
            (
                DispatchError::Executor(ExecutorError::Rejected("no".into())),
                StatusCode::UNPROCESSABLE_ENTITY,
            ),
            (
                DispatchError::Read(ExecutorError::Unavailable("down".into())),
                StatusCode::SERVICE_UNAVAILABLE,
            ),
            (
                DispatchError::UnexpectedResult("empty".into()),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
            (DispatchError::NotAccepting, StatusCode::SERVICE_UNAVAILABLE),
        ];

        for (error, status) in cases {
            assert_eq!(ApiError::from(error.clone()).status(), status, "{}", error);
        }
    }

    #[test]
    fn test_not_leader_body_carries_leader() {
        let err = ApiError::from(DispatchError::Retriable(LogError::NotLeader {
            leader: Some("10.0.0.2:50051".into()),
        }));
        let body = err.body();
        assert_eq!(body.code, "NOT_LEADER");
        assert!(body.retriable);
        assert_eq!(body.commit_status, Some(CommitStatus::NotApplied));
        assert_eq!(body.leader.as_deref(), Some("10.0.0.2:50051"));
    }

    #[test]
    fn test_membership_error_status() {
        let cases = [
            (MembershipError::AlreadyBootstrapped, StatusCode::CONFLICT),
            (
                MembershipError::AddressConflict {
                    id: "1".into(),
                    existing: "a:1".into(),
                    requested: "b:1".into(),
                },
                StatusCode::CONFLICT,
            ),
            (
                MembershipError::UnknownMember("7".into()),
                StatusCode::NOT_FOUND,
            ),
            (
                MembershipError::InvalidMember("x".into()),
                StatusCode::BAD_REQUEST,
            ),
            (
                MembershipError::Log(LogError::NotLeader { leader: None }),
                StatusCode::MISDIRECTED_REQUEST,
            ),
        ];

        for (error, status) in cases {
            let err = ApiError::from(error.clone());
            assert_eq!(err.status(), status, "{}", error);
            assert_eq!(err.body().code, error.code());
        }
    }

    #[test]
    fn test_conflict_body_carries_addresses() {
        let err = ApiError::from(MembershipError::AddressConflict {
            id: "1".into(),
            existing: "a:1".into(),
            requested: "b:1".into(),
        });
        let conflict = err.body().conflict.clone().unwrap();
        assert_eq!(conflict.existing, "a:1");
        assert_eq!(conflict.requested, "b:1");
        assert!(ApiError::from(MembershipError::AlreadyBootstrapped)
            .body()
            .conflict
            .is_none());
    }
}
