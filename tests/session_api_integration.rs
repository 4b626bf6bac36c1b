//! Integration tests for the session REST surface.
//!
//! Each test spins up an Axum server on a random port backed by in-memory
//! collaborators and exercises the real HTTP contract with reqwest.

use std::sync::Arc;
use std::time::Duration;

use serde_json::{Value, json};
use tokio::net::TcpListener;
use tokio::time::timeout;

use onboard_flow::config::FlowConfig;
use onboard_flow::identity::{Identity, InMemoryIdentityProvider, Session};
use onboard_flow::navigation::{HistoryNavigator, Navigator};
use onboard_flow::onboarding::{SessionRouteState, session_routes};
use onboard_flow::profile::InMemoryProfileStore;
use onboard_flow::runtime::SessionRuntime;

/// Maximum time any test is allowed to run before we consider it hung.
const TEST_TIMEOUT: Duration = Duration::from_secs(5);

struct Server {
    base: String,
    provider: Arc<InMemoryIdentityProvider>,
    navigator: Arc<HistoryNavigator>,
    runtime: Arc<SessionRuntime>,
}

/// Start an Axum server on a random port.
async fn start_server() -> Server {
    let provider = InMemoryIdentityProvider::new();
    let navigator = Arc::new(HistoryNavigator::new("/auth/callback"));
    let runtime = SessionRuntime::new(
        provider.clone(),
        InMemoryProfileStore::new(),
        navigator.clone(),
        FlowConfig::default(),
    );
    runtime.start().await;

    let app = session_routes(SessionRouteState {
        runtime: Arc::clone(&runtime),
    });
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    // Give the server a moment to start accepting connections.
    tokio::time::sleep(Duration::from_millis(50)).await;

    Server {
        base: format!("http://127.0.0.1:{port}"),
        provider,
        navigator,
        runtime,
    }
}

/// Poll `/api/session` until `check` passes.
async fn wait_for_session(base: &str, check: impl Fn(&Value) -> bool) -> Value {
    let client = reqwest::Client::new();
    loop {
        let status: Value = client
            .get(format!("{base}/api/session"))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        if check(&status) {
            return status;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

#[tokio::test]
async fn signed_out_session_status() {
    timeout(TEST_TIMEOUT, async {
        let server = start_server().await;
        let status = wait_for_session(&server.base, |s| s["is_loading"] == false).await;

        assert_eq!(status["signed_in"], false);
        assert_eq!(status["onboarding_complete"], false);
        assert!(status["profile"].is_null());
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn sign_up_then_complete_profile_over_http() {
    timeout(TEST_TIMEOUT, async {
        let server = start_server().await;
        let client = reqwest::Client::new();

        server
            .provider
            .sign_in(Session::new(Identity::generate()).with_email("jane@example.com"))
            .await;
        let status = wait_for_session(&server.base, |s| !s["profile"].is_null()).await;
        assert_eq!(status["signed_in"], true);
        assert_eq!(status["onboarding_complete"], false);

        let response = client
            .post(format!("{}/api/profile", server.base))
            .json(&json!({ "display_name": "Jane", "bio": "Career coach" }))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), 200);
        let record: Value = response.json().await.unwrap();
        assert_eq!(record["display_name"], "Jane");

        wait_for_session(&server.base, |s| s["onboarding_complete"] == true).await;
        // Let the router react.
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(server.navigator.current_path(), "/app");
        assert_eq!(server.navigator.count_to("/onboarding"), 1);

        server.runtime.shutdown().await;
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn retry_without_session_is_unauthorized() {
    timeout(TEST_TIMEOUT, async {
        let server = start_server().await;
        let response = reqwest::Client::new()
            .post(format!("{}/api/profile/retry", server.base))
            .send()
            .await
            .unwrap();

        assert_eq!(response.status(), 401);
        let body: Value = response.json().await.unwrap();
        assert_eq!(body["error"], "not_signed_in");
        assert_eq!(body["action"], "resend_verification");
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn resend_request_reaches_the_provider() {
    timeout(TEST_TIMEOUT, async {
        let server = start_server().await;
        let response = reqwest::Client::new()
            .post(format!("{}/api/auth/resend", server.base))
            .json(&json!({ "email": "jane@example.com" }))
            .send()
            .await
            .unwrap();

        assert_eq!(response.status(), 202);
        assert_eq!(
            server.provider.resent_to().await,
            vec!["jane@example.com".to_string()]
        );
    })
    .await
    .expect("test timed out");
}
