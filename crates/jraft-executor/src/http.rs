//! Executor reachable over HTTP

use crate::executor::Executor;
use jraft_core::{DataRequest, ExecutorError, ExecutorInfo};
use serde::de::DeserializeOwned;
use reqwest::Client;
use std::time::Duration;

/// Forwards requests to `POST http://<target>/v1/data`
///
/// Endpoint discovery and info come from `GET /v1/endpoints` and `GET /v1/info`.
#[derive(Clone, Debug)]
pub struct HttpExecutor {
    client: Client,
    target: String,
}

impl HttpExecutor {
    pub fn new(target: impl Into<String>) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .unwrap_or_default();

        Self {
            client,
            target: target.into(),
        }
    }

    pub fn target(&self) -> &str {
        &self.target
    }

    fn url(&self, path: &str) -> String {
        format!("http://{}/v1/{}", self.target, path)
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, ExecutorError> {
        let response = self
            .client
            .get(self.url(path))
            .send()
            .await
            .map_err(|e| ExecutorError::Unavailable(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(ExecutorError::Rejected(format!("HTTP {}: {}", status, text)));
        }

        response
            .json()
            .await
            .map_err(|e| ExecutorError::Rejected(format!("invalid {} response: {}", path, e)))
    }
}

impl Executor for HttpExecutor {
    async fn call(&self, request: DataRequest) -> Result<DataRequest, ExecutorError> {
        let response = self
            .client
            .post(self.url("data"))
            .json(&request)
            .send()
            .await
            .map_err(|e| ExecutorError::Unavailable(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            tracing::debug!(
                endpoint = %request.header.endpoint,
                %status,
                "executor rejected request"
            );
            return Err(ExecutorError::Rejected(format!("HTTP {}: {}", status, text)));
        }

        response
            .json()
            .await
            .map_err(|e| ExecutorError::Rejected(format!("invalid response: {}", e)))
    }

    async fn endpoints(&self) -> Result<Vec<String>, ExecutorError> {
        self.get_json("endpoints").await
    }

    async fn info(&self) -> Result<ExecutorInfo, ExecutorError> {
        self.get_json("info").await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::StatusCode;
    use axum::routing::{get, post};
    use axum::{Json, Router};

    async fn serve(router: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        addr.to_string()
    }

    #[tokio::test]
    async fn test_call_returns_response() {
        let router = Router::new().route(
            "/v1/data",
            post(|Json(req): Json<DataRequest>| async move {
                Json(req.with_parameter("handled", "yes"))
            }),
        );
        let executor = HttpExecutor::new(serve(router).await);

        let resp = executor
            .call(DataRequest::new("upsert", "r-1", b"doc".to_vec()))
            .await
            .unwrap();
        assert_eq!(resp.parameter("handled"), Some("yes"));
        assert_eq!(resp.payload, b"doc".to_vec());
    }

    #[tokio::test]
    async fn test_non_success_is_rejected() {
        let router = Router::new().route(
            "/v1/data",
            post(|| async { (StatusCode::BAD_REQUEST, "bad document") }),
        );
        let executor = HttpExecutor::new(serve(router).await);

        let err = executor
            .call(DataRequest::new("upsert", "r-1", Vec::new()))
            .await
            .unwrap_err();
        assert!(matches!(err, ExecutorError::Rejected(msg) if msg.contains("bad document")));
    }

    #[tokio::test]
    async fn test_endpoints_and_info() {
        let router = Router::new()
            .route(
                "/v1/endpoints",
                get(|| async { Json(vec!["upsert".to_string(), "search".to_string()]) }),
            )
            .route(
                "/v1/info",
                get(|| async {
                    Json(ExecutorInfo {
                        name: "indexer".into(),
                        version: "3.1".into(),
                        ..Default::default()
                    })
                }),
            );
        let executor = HttpExecutor::new(serve(router).await);

        assert_eq!(executor.endpoints().await.unwrap(), vec!["upsert", "search"]);
        assert_eq!(executor.info().await.unwrap().name, "indexer");
    }

    #[tokio::test]
    async fn test_missing_info_route_is_rejected() {
        let executor = HttpExecutor::new(serve(Router::new()).await);
        assert!(matches!(
            executor.info().await,
            Err(ExecutorError::Rejected(msg)) if msg.contains("404")
        ));
    }

    #[tokio::test]
    async fn test_unreachable_is_unavailable() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let executor = HttpExecutor::new(addr.to_string());
        let err = executor
            .call(DataRequest::new("search", "r-1", Vec::new()))
            .await
            .unwrap_err();
        assert!(matches!(err, ExecutorError::Unavailable(_)));
    }
}
