//! Integration tests for the HTTP client.

mod common;

use common::{test_config, unreachable_url, MockBackend};
use fieldsync_client::{HttpClient, SessionProvider, StaticSession, SyncError};
use fieldsync_engine::{ApiRequest, FailureKind};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

fn client(base_url: &str, session: Arc<StaticSession>) -> HttpClient {
    HttpClient::new(&test_config(base_url), session).unwrap()
}

#[cfg(test)]
mod adaptation_tests {
    use super::*;

    #[tokio::test]
    async fn test_listing_arrives_in_internal_shape() {
        let backend = MockBackend::start().await;
        backend.set_listing("/cow-profiles/", vec![json!({"id": 1, "name": "Daisy", "app_user_id": "u1"})]);
        let http = client(&backend.url(), Arc::new(StaticSession::anonymous()));

        let response = http.send(&ApiRequest::get("/api/v1/cows?user_id=u1")).await.unwrap();
        assert_eq!(response.status, 200);
        assert_eq!(response.body["cows"][0]["user_id"], "u1");

        let request = &backend.requests()[0];
        assert_eq!(request.path, "/cow-profiles/");
        assert_eq!(request.authorization, None);
    }

    #[tokio::test]
    async fn test_unmapped_internal_path_falls_back() {
        let backend = MockBackend::start().await;
        let http = client(&backend.url(), Arc::new(StaticSession::anonymous()));

        http.send(&ApiRequest::get("/api/v1/weather/today")).await.unwrap();
        assert_eq!(backend.requests()[0].path, "/weather/today");
    }

    #[tokio::test]
    async fn test_create_body_uses_backend_field_names() {
        let backend = MockBackend::start().await;
        let http = client(&backend.url(), Arc::new(StaticSession::anonymous()));

        let response = http
            .send(&ApiRequest::post("/api/v1/cows", json!({"name": "Daisy", "user_id": "u1", "_local": 1})))
            .await
            .unwrap();

        assert_eq!(backend.requests()[0].body, json!({"name": "Daisy", "app_user_id": "u1"}));
        assert_eq!(response.body["user_id"], "u1");
        assert_eq!(response.body["id"], 42);
    }
}

#[cfg(test)]
mod failure_tests {
    use super::*;

    #[tokio::test]
    async fn test_get_retried_until_success() {
        let backend = MockBackend::start().await;
        backend.respond_next(503, json!({"detail": "warming up"}));
        backend.respond_next(504, json!({"detail": "timeout"}));
        let http = client(&backend.url(), Arc::new(StaticSession::anonymous()));

        let response = http.send(&ApiRequest::get("/api/v1/feeds/custom")).await.unwrap();
        assert!(response.is_success());
        assert_eq!(backend.requests().len(), 3);
    }

    #[tokio::test]
    async fn test_validation_error_detail() {
        let backend = MockBackend::start().await;
        let http = client(&backend.url(), Arc::new(StaticSession::anonymous()));

        let err = http
            .send(&ApiRequest::post("/api/v1/cows", json!({"name": "bad"})))
            .await
            .unwrap_err();
        match err {
            SyncError::ValidationRejected { status, detail } => {
                assert_eq!(status, 422);
                assert_eq!(detail, "name is invalid");
            }
            other => panic!("expected validation error, got {other:?}"),
        }
        assert_eq!(backend.requests().len(), 1);
    }

    #[tokio::test]
    async fn test_forbidden_without_token_problem_is_not_unauthorized() {
        let backend = MockBackend::start().await;
        backend.respond_next(403, json!({"detail": "Not permitted for this organization"}));
        let session = Arc::new(StaticSession::new(Some("token-1".into()), None));
        let http = client(&backend.url(), session.clone());

        let err = http.send(&ApiRequest::get("/api/v1/organizations/3")).await.unwrap_err();
        assert_eq!(err.kind(), Some(FailureKind::ValidationRejected));
        assert_eq!(session.rejections(), 0);
        assert_eq!(session.bearer_token().as_deref(), Some("token-1"));
    }

    #[tokio::test]
    async fn test_expired_token_notifies_session() {
        let backend = MockBackend::start().await;
        backend.respond_next(403, json!({"detail": "Token has expired"}));
        let session = Arc::new(StaticSession::new(Some("token-1".into()), None));
        let http = client(&backend.url(), session.clone());

        let err = http.send(&ApiRequest::get("/api/v1/cows")).await.unwrap_err();
        assert!(matches!(err, SyncError::Unauthorized(_)));
        assert_eq!(session.rejections(), 1);
        assert_eq!(session.bearer_token(), None);
        assert_eq!(backend.requests().len(), 1);
    }

    #[tokio::test]
    async fn test_timed_out_post_is_sent_once() {
        let backend = MockBackend::start().await;
        backend.set_delay(Duration::from_millis(500));
        let config = test_config(&backend.url()).with_request_timeout(Duration::from_millis(100));
        let http = HttpClient::new(&config, Arc::new(StaticSession::anonymous())).unwrap();

        let err = http
            .send(&ApiRequest::post("/api/v1/cows", json!({"name": "Daisy"})))
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::ResponseLost(_)));
        assert_eq!(backend.requests().len(), 1);
    }

    #[tokio::test]
    async fn test_unreachable_backend() {
        let http = client(&unreachable_url().await, Arc::new(StaticSession::anonymous()));

        let err = http.send(&ApiRequest::get("/api/v1/cows")).await.unwrap_err();
        assert!(matches!(err, SyncError::NetworkUnreachable(_)));
        assert_eq!(err.kind(), Some(FailureKind::NetworkUnreachable));
    }
}
