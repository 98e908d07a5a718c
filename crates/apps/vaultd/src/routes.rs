//! HTTP routes for the full-sync API

use anyhow::anyhow;
use axum::extract::State;
use axum::http::HeaderMap;
use axum::http::header::AUTHORIZATION;
use axum::routing::get;
use axum::{Json, Router};
use log::info;
use serde_json::{Value, json};

use crate::error::ApiError;
use crate::state::AppState;
use mail::{CancelOutcome, StartSyncError, SyncStatus};

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route(
            "/sync/full",
            get(start_full_sync)
                .post(full_sync_status)
                .delete(cancel_full_sync),
        )
        .with_state(state)
}

/// Run blocking store or coordinator work off the async workers
async fn blocking<T, F>(f: F) -> Result<T, ApiError>
where
    F: FnOnce() -> anyhow::Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| ApiError::Internal(anyhow!("Blocking task failed: {}", e)))?
        .map_err(ApiError::from)
}

fn bearer_token(headers: &HeaderMap) -> Option<String> {
    let value = headers.get(AUTHORIZATION)?.to_str().ok()?;
    let token = value.strip_prefix("Bearer ")?.trim();
    (!token.is_empty()).then(|| token.to_string())
}

/// Resolve the session token to a user id
async fn authenticate(state: &AppState, headers: &HeaderMap) -> Result<i64, ApiError> {
    let token = bearer_token(headers).ok_or(ApiError::Unauthorized)?;
    let store = state.store.clone();
    blocking(move || store.find_session_user(&token))
        .await?
        .ok_or(ApiError::Unauthorized)
}

async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

/// GET /sync/full - start a full sync
async fn start_full_sync(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<Value>, ApiError> {
    let user_id = authenticate(&state, &headers).await?;

    let store = state.store.clone();
    let account = blocking(move || store.get_account(user_id))
        .await?
        .filter(|account| account.is_linked())
        .ok_or(ApiError::NotFound("No linked mail account"))?;

    let transport = state.transports.for_account(&account)?;
    let coordinator = state.coordinator.clone();
    let result = tokio::task::spawn_blocking(move || coordinator.start_sync(user_id, transport))
        .await
        .map_err(|e| ApiError::Internal(anyhow!("Blocking task failed: {}", e)))?;

    match result {
        Ok(started) => {
            info!("[HTTP] Full sync started for user {}", user_id);
            // Detached; the run reports through status polls
            drop(started.handle);
            Ok(Json(json!({
                "message": "Full sync started",
                "status": {
                    "inProgress": true,
                    "startTime": started.status.start_time,
                },
            })))
        }
        Err(StartSyncError::Conflict(snapshot)) => Err(ApiError::Conflict {
            message: "A sync is already in progress".to_string(),
            status: serde_json::to_value(snapshot).map_err(anyhow::Error::from)?,
        }),
        Err(e) => Err(ApiError::Internal(e.into())),
    }
}

/// POST /sync/full - live progress, or the outcome of the last run
async fn full_sync_status(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<Value>, ApiError> {
    let user_id = authenticate(&state, &headers).await?;

    let coordinator = state.coordinator.clone();
    let status = blocking(move || coordinator.get_status(user_id)).await?;

    let body = match status {
        SyncStatus::Running(snapshot) => {
            serde_json::to_value(snapshot).map_err(anyhow::Error::from)?
        }
        SyncStatus::Idle(checkpoint) => {
            let message = if checkpoint.has_completed_sync() {
                "Last full sync completed"
            } else {
                "No full sync has completed yet"
            };
            json!({
                "inProgress": false,
                "lastSyncTime": checkpoint.last_sync_time,
                "historyId": checkpoint.history_id,
                "message": message,
            })
        }
        SyncStatus::NeverSynced => json!({
            "inProgress": false,
            "message": "Full sync has never been run",
        }),
    };
    Ok(Json(body))
}

/// DELETE /sync/full - cancel the active run
async fn cancel_full_sync(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<Value>, ApiError> {
    let user_id = authenticate(&state, &headers).await?;

    match state.coordinator.cancel_sync(user_id) {
        CancelOutcome::Cancelled => {
            info!("[HTTP] Full sync cancellation requested for user {}", user_id);
            Ok(Json(json!({ "message": "Sync cancellation requested" })))
        }
        CancelOutcome::NotFound => Err(ApiError::NotFound("No active sync")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::TransportFactory;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use mail::gmail::MessagePage;
    use mail::gmail::api::{GmailMessage, Header, MessagePart};
    use mail::{
        Account, AesGcmEncryptor, InMemoryMailStore, JobRegistry, MailStore, MailTransport,
        MessageId, SyncCoordinator, SyncOptions, TransportError,
    };
    use std::sync::mpsc::{Receiver, Sender, channel};
    use std::sync::{Arc, Mutex};
    use std::time::Duration;
    use tower::ServiceExt;

    /// A mailbox of `total` messages whose listing can be held back
    struct FakeTransport {
        total: usize,
        gate: Option<Mutex<Receiver<()>>>,
    }

    impl MailTransport for FakeTransport {
        fn list_message_ids(
            &self,
            _page_size: usize,
            _page_token: Option<&str>,
        ) -> Result<MessagePage, TransportError> {
            if let Some(gate) = &self.gate {
                let _ = gate.lock().unwrap().recv();
            }
            Ok(MessagePage {
                ids: (0..self.total).map(|i| MessageId::new(format!("m{}", i))).collect(),
                next_page_token: None,
            })
        }

        fn get_message(&self, id: &MessageId) -> Result<GmailMessage, TransportError> {
            Ok(GmailMessage {
                id: id.to_string(),
                thread_id: format!("t-{}", id),
                label_ids: Some(vec!["INBOX".to_string()]),
                snippet: "hi".to_string(),
                history_id: Some("77".to_string()),
                internal_date: "1700000000000".to_string(),
                payload: Some(MessagePart {
                    headers: Some(vec![Header {
                        name: "Subject".to_string(),
                        value: "Hello".to_string(),
                    }]),
                    ..Default::default()
                }),
            })
        }
    }

    struct FakeFactory(Arc<FakeTransport>);

    impl TransportFactory for FakeFactory {
        fn for_account(&self, _account: &Account) -> anyhow::Result<Arc<dyn MailTransport>> {
            Ok(self.0.clone())
        }
    }

    struct TestApp {
        router: Router,
        state: AppState,
        store: Arc<InMemoryMailStore>,
    }

    fn test_app(transport: FakeTransport) -> TestApp {
        let store = Arc::new(InMemoryMailStore::new());
        store
            .save_account(&Account::new(1, "alice@example.com").with_token_data("{}"))
            .unwrap();
        store.save_session("alice-token", 1).unwrap();
        // Bob is signed in but has not linked a mailbox
        store.save_session("bob-token", 2).unwrap();

        let encryptor =
            AesGcmEncryptor::from_base64_key(&AesGcmEncryptor::generate_key()).unwrap();
        let options = SyncOptions {
            batch_pause_ms: 0,
            ..SyncOptions::default()
        };
        let coordinator = SyncCoordinator::new(
            store.clone(),
            Arc::new(encryptor),
            Arc::new(JobRegistry::new()),
            options,
        );

        let state = AppState {
            store: store.clone(),
            coordinator: Arc::new(coordinator),
            transports: Arc::new(FakeFactory(Arc::new(transport))),
        };
        TestApp {
            router: router(state.clone()),
            state,
            store,
        }
    }

    fn gated(total: usize) -> (FakeTransport, Sender<()>) {
        let (tx, rx) = channel();
        let transport = FakeTransport {
            total,
            gate: Some(Mutex::new(rx)),
        };
        (transport, tx)
    }

    async fn send(app: &TestApp, method: &str, token: Option<&str>) -> (StatusCode, Value) {
        let mut builder = Request::builder().method(method).uri("/sync/full");
        if let Some(token) = token {
            builder = builder.header("authorization", format!("Bearer {}", token));
        }
        let response = app
            .router
            .clone()
            .oneshot(builder.body(Body::empty()).unwrap())
            .await
            .unwrap();

        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    async fn wait_until_idle(app: &TestApp, user_id: i64) {
        for _ in 0..500 {
            if !app.state.coordinator.is_running(user_id) {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("sync for user {} did not finish", user_id);
    }

    #[tokio::test]
    async fn test_health() {
        let app = test_app(FakeTransport {
            total: 0,
            gate: None,
        });
        let response = app
            .router
            .clone()
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_requires_session() {
        let app = test_app(FakeTransport {
            total: 0,
            gate: None,
        });
        for method in ["GET", "POST", "DELETE"] {
            let (status, body) = send(&app, method, None).await;
            assert_eq!(status, StatusCode::UNAUTHORIZED);
            assert_eq!(body["error"], "Unauthorized");

            let (status, _) = send(&app, method, Some("forged")).await;
            assert_eq!(status, StatusCode::UNAUTHORIZED);
        }
    }

    #[tokio::test]
    async fn test_start_without_linked_account() {
        let app = test_app(FakeTransport {
            total: 0,
            gate: None,
        });
        let (status, body) = send(&app, "GET", Some("bob-token")).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert!(body["error"].is_string());
    }

    #[tokio::test]
    async fn test_status_before_any_sync() {
        let app = test_app(FakeTransport {
            total: 0,
            gate: None,
        });
        let (status, body) = send(&app, "POST", Some("alice-token")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["inProgress"], false);
        assert_eq!(body["message"], "Full sync has never been run");
    }

    #[tokio::test]
    async fn test_full_sync_round_trip() {
        let app = test_app(FakeTransport {
            total: 3,
            gate: None,
        });

        let (status, body) = send(&app, "GET", Some("alice-token")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"]["inProgress"], true);
        assert!(body["status"]["startTime"].is_string());

        wait_until_idle(&app, 1).await;
        assert_eq!(app.store.count_messages(1).unwrap(), 3);

        let (status, body) = send(&app, "POST", Some("alice-token")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["inProgress"], false);
        assert_eq!(body["historyId"], "77");
        assert!(body["lastSyncTime"].is_string());
    }

    #[tokio::test]
    async fn test_conflict_status_and_cancel() {
        let (transport, release) = gated(50);
        let app = test_app(transport);

        let (status, _) = send(&app, "GET", Some("alice-token")).await;
        assert_eq!(status, StatusCode::OK);

        let (status, body) = send(&app, "GET", Some("alice-token")).await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["error"], "A sync is already in progress");
        assert_eq!(body["status"]["inProgress"], true);

        let (status, body) = send(&app, "POST", Some("alice-token")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["inProgress"], true);
        assert_eq!(body["phase"], "collecting");
        for field in [
            "startTime",
            "lastUpdateTime",
            "elapsedSeconds",
            "totalMessages",
            "processedMessages",
            "remainingMessages",
            "progress",
            "messagesPerSecond",
            "estimatedSecondsRemaining",
        ] {
            assert!(body.get(field).is_some(), "missing {}", field);
        }

        let (status, _) = send(&app, "DELETE", Some("alice-token")).await;
        assert_eq!(status, StatusCode::OK);

        release.send(()).unwrap();
        wait_until_idle(&app, 1).await;

        // Cancelled before the first batch, so nothing was fetched
        assert_eq!(app.store.count_messages(1).unwrap(), 0);
        let (status, body) = send(&app, "DELETE", Some("alice-token")).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"], "No active sync");
    }

    #[tokio::test]
    async fn test_cancel_without_active_sync() {
        let app = test_app(FakeTransport {
            total: 0,
            gate: None,
        });
        let (status, _) = send(&app, "DELETE", Some("alice-token")).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[test]
    fn test_bearer_token_parsing() {
        let mut headers = HeaderMap::new();
        assert_eq!(bearer_token(&headers), None);

        headers.insert(AUTHORIZATION, "Bearer abc".parse().unwrap());
        assert_eq!(bearer_token(&headers).as_deref(), Some("abc"));

        headers.insert(AUTHORIZATION, "Basic abc".parse().unwrap());
        assert_eq!(bearer_token(&headers), None);

        headers.insert(AUTHORIZATION, "Bearer   ".parse().unwrap());
        assert_eq!(bearer_token(&headers), None);
    }
}
