//! Client for a node's admin API

use jraft_core::{ClusterMember, ErrorBody, LeaderInfo, LogError, MembershipError};
use reqwest::{Client, Response};
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddVoterRequest {
    pub id: String,
    pub address: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoveServerRequest {
    pub id: String,
}

/// Talks to the admin API of some node, usually the leader
#[derive(Clone, Debug)]
pub struct AdminClient {
    client: Client,
    timeout: Duration,
}

impl Default for AdminClient {
    fn default() -> Self {
        Self::new(Duration::from_secs(10))
    }
}

impl AdminClient {
    pub fn new(timeout: Duration) -> Self {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_default();
        Self { client, timeout }
    }

    fn url(target: &str, path: &str) -> String {
        format!("http://{}/admin/{}", target, path)
    }

    /// Ask `target` to add `id@address` as a voter
    pub async fn add_voter(
        &self,
        target: &str,
        id: &str,
        address: &str,
    ) -> Result<(), MembershipError> {
        let request = AddVoterRequest {
            id: id.to_string(),
            address: address.to_string(),
        };
        let response = self.post(target, "add-voter", &request).await?;
        self.check(response).await
    }

    /// Ask `target` to remove `id` from the configuration
    pub async fn remove_server(&self, target: &str, id: &str) -> Result<(), MembershipError> {
        let request = RemoveServerRequest { id: id.to_string() };
        let response = self.post(target, "remove-server", &request).await?;
        self.check(response).await
    }

    /// Bootstrap `target`, as itself unless a member is given
    pub async fn bootstrap(
        &self,
        target: &str,
        member: Option<ClusterMember>,
    ) -> Result<(), MembershipError> {
        let response = self.post(target, "bootstrap", &member).await?;
        self.check(response).await
    }

    /// Leader as seen by `target`, `None` while no leader is known
    pub async fn leader(&self, target: &str) -> Result<Option<LeaderInfo>, MembershipError> {
        let response = self.get(target, "leader").await?;
        if response.status() == reqwest::StatusCode::SERVICE_UNAVAILABLE {
            return Ok(None);
        }
        let response = self.ensure_success(response).await?;
        response.json().await.map(Some).map_err(transport)
    }

    pub async fn configuration(&self, target: &str) -> Result<Vec<ClusterMember>, MembershipError> {
        let response = self.get(target, "configuration").await?;
        let response = self.ensure_success(response).await?;
        response.json().await.map_err(transport)
    }

    async fn post<T: Serialize>(
        &self,
        target: &str,
        path: &str,
        body: &T,
    ) -> Result<Response, MembershipError> {
        self.client
            .post(Self::url(target, path))
            .json(body)
            .send()
            .await
            .map_err(transport)
    }

    async fn get(&self, target: &str, path: &str) -> Result<Response, MembershipError> {
        self.client
            .get(Self::url(target, path))
            .send()
            .await
            .map_err(transport)
    }

    async fn check(&self, response: Response) -> Result<(), MembershipError> {
        self.ensure_success(response).await.map(|_| ())
    }

    async fn ensure_success(&self, response: Response) -> Result<Response, MembershipError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let text = response.text().await.unwrap_or_default();
        match serde_json::from_str::<ErrorBody>(&text) {
            Ok(body) => Err(self.error_from(body)),
            Err(_) => Err(MembershipError::Transport(format!("HTTP {}: {}", status, text))),
        }
    }

    /// Rebuild the server-side error from its wire code
    fn error_from(&self, body: ErrorBody) -> MembershipError {
        match body.code.as_str() {
            "ALREADY_BOOTSTRAPPED" => MembershipError::AlreadyBootstrapped,
            "ADDRESS_CONFLICT" => match body.conflict {
                Some(c) => MembershipError::AddressConflict {
                    id: c.id,
                    existing: c.existing,
                    requested: c.requested,
                },
                None => MembershipError::InvalidMember(body.message),
            },
            "INVALID_MEMBER" | "BAD_REQUEST" => MembershipError::InvalidMember(body.message),
            "UNKNOWN_MEMBER" => MembershipError::UnknownMember(body.message),
            "NOT_LEADER" => LogError::NotLeader {
                leader: body.leader,
            }
            .into(),
            "TIMEOUT" => LogError::Timeout(self.timeout).into(),
            "SHUTTING_DOWN" => LogError::ShuttingDown.into(),
            "STOPPED" => LogError::Stopped.into(),
            "LOG_ERROR" => LogError::Internal(body.message).into(),
            code => MembershipError::Transport(format!("{}: {}", code, body.message)),
        }
    }
}

fn transport(e: reqwest::Error) -> MembershipError {
    MembershipError::Transport(e.to_string())
}
