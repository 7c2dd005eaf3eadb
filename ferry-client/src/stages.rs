//! Stage-related RPC endpoints

use std::time::Duration;

use ferry_core::domain::stage::Stage;
use ferry_core::dto::stage::Filter;
use reqwest::StatusCode;
use tracing::debug;

use crate::error::{ClientError, Result};
use crate::{CoordinatorClient, TOKEN_HEADER};

const ENDPOINT_STAGES: &str = "/rpc/v2/stage";

/// Delay before re-sending a request the server could not serve yet
const RETRY_DELAY: Duration = Duration::from_secs(1);

/// Statuses returned by proxies or an overloaded server while it restarts
fn is_transient(status: StatusCode) -> bool {
    matches!(
        status,
        StatusCode::BAD_GATEWAY | StatusCode::SERVICE_UNAVAILABLE | StatusCode::GATEWAY_TIMEOUT
    )
}

impl CoordinatorClient {
    // =============================================================================
    // Stage Lifecycle
    // =============================================================================

    /// Request the next pending stage matching the filter
    ///
    /// The server holds the request open until work is available. A
    /// `204 No Content` reply means the wait elapsed without work and maps
    /// to `Ok(None)`. Gateway errors are retried until the future is dropped.
    ///
    /// # Arguments
    /// * `filter` - Kind/type/platform criteria for the stage
    pub async fn request(&self, filter: &Filter) -> Result<Option<Stage>> {
        let url = format!("{}{}", self.base_url, ENDPOINT_STAGES);
        let body = serde_json::to_string(filter)
            .map_err(|e| ClientError::ParseError(format!("Failed to encode filter: {}", e)))?;

        loop {
            self.dump_request("POST", &url, Some(&body));

            let response = self
                .client
                .post(&url)
                .header(TOKEN_HEADER, &self.secret)
                .header(reqwest::header::CONTENT_TYPE, "application/json")
                .body(body.clone())
                .send()
                .await?;

            let status = response.status();
            if is_transient(status) {
                debug!(status = status.as_u16(), "server unavailable, retrying request");
                tokio::time::sleep(RETRY_DELAY).await;
                continue;
            }

            if status == StatusCode::NO_CONTENT {
                return Ok(None);
            }

            return self.handle_response(response).await.map(Some);
        }
    }

    /// Claim a stage for the machine recorded on it
    ///
    /// On success the server's `updated` and `version` values are copied
    /// onto `stage`. A `409 Conflict` means another runner won the claim and
    /// is reported as [`ClientError::OptimisticLock`].
    ///
    /// # Arguments
    /// * `stage` - The stage to accept; `stage.machine` must be set
    pub async fn accept(&self, stage: &mut Stage) -> Result<()> {
        let url = format!("{}{}/{}", self.base_url, ENDPOINT_STAGES, stage.id);
        self.dump_request("POST", &url, None);

        let response = self
            .client
            .post(&url)
            .query(&[("machine", stage.machine.as_str())])
            .header(TOKEN_HEADER, &self.secret)
            .send()
            .await?;

        if response.status() == StatusCode::CONFLICT {
            return Err(ClientError::OptimisticLock);
        }

        let text = self.read_body(response).await?;
        if text.trim().is_empty() {
            return Ok(());
        }

        let accepted: Stage = serde_json::from_str(&text).map_err(|e| {
            ClientError::ParseError(format!("Failed to parse accepted stage: {}", e))
        })?;
        stage.updated = accepted.updated;
        stage.version = accepted.version;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::extract::{Path, Query, State};
    use axum::http::HeaderMap;
    use axum::routing::post;
    use axum::{Json, Router};
    use std::collections::HashMap;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    async fn serve(router: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        format!("http://{}", addr)
    }

    fn pending_stage() -> Stage {
        Stage {
            id: 42,
            number: 1,
            kind: "pipeline".to_string(),
            kind_type: "docker".to_string(),
            os: "linux".to_string(),
            arch: "amd64".to_string(),
            version: 1,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_request_no_content_is_no_work() {
        let router = Router::new().route(
            "/rpc/v2/stage",
            post(|| async { StatusCode::NO_CONTENT }),
        );
        let client = CoordinatorClient::new(serve(router).await, "secret");

        let stage = client.request(&Filter::docker_pipeline()).await.unwrap();
        assert!(stage.is_none());
    }

    #[tokio::test]
    async fn test_request_sends_token_and_filter() {
        let router = Router::new().route(
            "/rpc/v2/stage",
            post(|headers: HeaderMap, Json(filter): Json<Filter>| async move {
                let token = headers
                    .get(TOKEN_HEADER)
                    .and_then(|v| v.to_str().ok())
                    .unwrap_or_default();
                if token != "secret" || filter.kind_type != "docker" {
                    return Err(StatusCode::UNAUTHORIZED);
                }
                Ok(Json(pending_stage()))
            }),
        );
        let client = CoordinatorClient::new(serve(router).await, "secret");

        let stage = client
            .request(&Filter::docker_pipeline())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stage.id, 42);
        assert_eq!(stage.os, "linux");
    }

    #[tokio::test]
    async fn test_request_retries_transient_status() {
        let calls = Arc::new(AtomicUsize::new(0));
        let router = Router::new()
            .route(
                "/rpc/v2/stage",
                post(|State(calls): State<Arc<AtomicUsize>>| async move {
                    if calls.fetch_add(1, Ordering::SeqCst) == 0 {
                        return Err(StatusCode::BAD_GATEWAY);
                    }
                    Ok(Json(pending_stage()))
                }),
            )
            .with_state(Arc::clone(&calls));
        let client = CoordinatorClient::new(serve(router).await, "secret");

        let stage = client.request(&Filter::docker_pipeline()).await.unwrap();
        assert!(stage.is_some());
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_request_server_error() {
        let router = Router::new().route(
            "/rpc/v2/stage",
            post(|| async { (StatusCode::INTERNAL_SERVER_ERROR, "database is down") }),
        );
        let client = CoordinatorClient::new(serve(router).await, "secret");

        let err = client
            .request(&Filter::docker_pipeline())
            .await
            .unwrap_err();
        assert!(err.is_server_error());
        assert!(err.to_string().contains("database is down"));
    }

    #[tokio::test]
    async fn test_accept_conflict_is_optimistic_lock() {
        let router = Router::new().route(
            "/rpc/v2/stage/{id}",
            post(|| async { StatusCode::CONFLICT }),
        );
        let client = CoordinatorClient::new(serve(router).await, "secret");

        let mut stage = pending_stage();
        let err = client.accept(&mut stage).await.unwrap_err();
        assert!(err.is_optimistic_lock());
    }

    #[tokio::test]
    async fn test_accept_records_machine_and_version() {
        let router = Router::new().route(
            "/rpc/v2/stage/{id}",
            post(
                |Path(id): Path<i64>, Query(query): Query<HashMap<String, String>>| async move {
                    if query.get("machine").map(String::as_str) != Some("runner-1") {
                        return Err(StatusCode::BAD_REQUEST);
                    }
                    let mut stage = pending_stage();
                    stage.id = id;
                    stage.machine = "runner-1".to_string();
                    stage.version = 2;
                    stage.updated = 1234;
                    Ok(Json(stage))
                },
            ),
        );
        let client = CoordinatorClient::new(serve(router).await, "secret");

        let mut stage = pending_stage();
        stage.machine = "runner-1".to_string();
        client.accept(&mut stage).await.unwrap();

        assert_eq!(stage.version, 2);
        assert_eq!(stage.updated, 1234);
        assert_eq!(stage.machine, "runner-1");
    }
}
