//! Contract tests for the HTTP identity provider and profile store against
//! mocked auth and record servers.

use std::sync::Arc;
use std::time::Duration;

use secrecy::SecretString;
use serde_json::json;
use uuid::Uuid;
use wiremock::matchers::{bearer_token, body_partial_json, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use onboard_flow::callback::{CallbackLink, CallbackPhase};
use onboard_flow::config::FlowConfig;
use onboard_flow::error::{ProviderError, StoreError};
use onboard_flow::identity::{
    GoTrueConfig, GoTrueProvider, Identity, IdentityProvider, SessionEvent,
};
use onboard_flow::navigation::{HistoryNavigator, Navigator};
use onboard_flow::profile::{
    AccessTokenSource, CreationOutcome, NewProfile, PostgrestConfig, PostgrestProfileStore, ProfileStore,
    ProfileUpdate, RetryPolicy, Role, ensure_profile,
};
use onboard_flow::runtime::SessionRuntime;

const API_KEY: &str = "anon-key";

fn gotrue(server: &MockServer) -> GoTrueProvider {
    GoTrueProvider::new(GoTrueConfig {
        base_url: server.uri(),
        api_key: SecretString::from(API_KEY),
        request_timeout: Duration::from_secs(5),
    })
    .unwrap()
}

fn postgrest(server: &MockServer) -> PostgrestProfileStore {
    PostgrestProfileStore::new(PostgrestConfig {
        base_url: server.uri(),
        api_key: SecretString::from(API_KEY),
        table: "profiles".to_string(),
        request_timeout: Duration::from_secs(5),
    })
    .unwrap()
}

fn row(id: Uuid, display_name: Option<&str>) -> serde_json::Value {
    json!({
        "id": id,
        "role": "coach",
        "display_name": display_name,
        "created_at": "2026-01-05T10:00:00Z",
        "updated_at": "2026-01-05T10:00:00Z",
    })
}

fn user(id: Uuid) -> serde_json::Value {
    json!({
        "id": id,
        "email": "jane@example.com",
        "user_metadata": { "role": "coach" },
    })
}

#[tokio::test]
async fn insert_returns_the_created_row() {
    let server = MockServer::start().await;
    let id = Uuid::new_v4();
    Mock::given(method("POST"))
        .and(path("/rest/v1/profiles"))
        .and(header("apikey", API_KEY))
        .and(bearer_token(API_KEY))
        .and(header("Prefer", "return=representation"))
        .and(body_partial_json(json!({ "id": id, "role": "coach" })))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!([row(id, None)])))
        .expect(1)
        .mount(&server)
        .await;

    let store = postgrest(&server);
    let record = store
        .insert(&NewProfile::new(Identity::new(id), Role::Coach))
        .await
        .unwrap();

    assert_eq!(record.id, Identity::new(id));
    assert_eq!(record.role, Role::Coach);
    assert!(!record.is_complete());
}

#[tokio::test]
async fn unique_violation_becomes_fetch_existing() {
    let server = MockServer::start().await;
    let id = Uuid::new_v4();
    Mock::given(method("POST"))
        .and(path("/rest/v1/profiles"))
        .respond_with(ResponseTemplate::new(409).set_body_json(json!({
            "code": "23505",
            "message": "duplicate key value violates unique constraint \"profiles_pkey\"",
        })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/rest/v1/profiles"))
        .and(query_param("id", format!("eq.{id}")))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([row(id, Some("Jane"))])))
        .expect(1)
        .mount(&server)
        .await;

    let store = postgrest(&server);
    let outcome = ensure_profile(
        &store,
        &NewProfile::new(Identity::new(id), Role::Coach),
        &RetryPolicy::default(),
        Duration::from_secs(5),
    )
    .await
    .unwrap();

    assert!(matches!(outcome, CreationOutcome::FetchedExisting(_)));
    assert_eq!(outcome.record().display_name.as_deref(), Some("Jane"));
}

#[tokio::test]
async fn empty_result_is_not_found() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/rest/v1/profiles"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .mount(&server)
        .await;

    let err = postgrest(&server)
        .get_by_id(&Identity::generate())
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::NotFound { .. }));
}

#[tokio::test]
async fn server_errors_are_transient_and_client_errors_rejected() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/rest/v1/profiles"))
        .respond_with(ResponseTemplate::new(503).set_body_string("upstream down"))
        .mount(&server)
        .await;
    Mock::given(method("PATCH"))
        .and(path("/rest/v1/profiles"))
        .respond_with(ResponseTemplate::new(403).set_body_json(json!({
            "code": "42501",
            "message": "permission denied for table profiles",
        })))
        .mount(&server)
        .await;

    let store = postgrest(&server);
    let id = Identity::generate();

    let err = store.get_by_id(&id).await.unwrap_err();
    assert!(matches!(err, StoreError::Transient { .. }));

    let err = store
        .update(&id, &ProfileUpdate::display_name("Jane"))
        .await
        .unwrap_err();
    match err {
        StoreError::Rejected { status, reason } => {
            assert_eq!(status, 403);
            assert!(reason.contains("permission denied"));
        }
        other => panic!("expected Rejected, got {other:?}"),
    }
}

#[tokio::test]
async fn update_patches_by_id() {
    let server = MockServer::start().await;
    let id = Uuid::new_v4();
    Mock::given(method("PATCH"))
        .and(path("/rest/v1/profiles"))
        .and(query_param("id", format!("eq.{id}")))
        .and(body_partial_json(json!({ "display_name": "Jane" })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([row(id, Some("Jane"))])))
        .expect(1)
        .mount(&server)
        .await;

    let record = postgrest(&server)
        .update(&Identity::new(id), &ProfileUpdate::display_name("Jane"))
        .await
        .unwrap();
    assert!(record.is_complete());
}

#[tokio::test]
async fn fragment_tokens_establish_a_session() {
    let server = MockServer::start().await;
    let id = Uuid::new_v4();
    Mock::given(method("GET"))
        .and(path("/auth/v1/user"))
        .and(bearer_token("at-123"))
        .respond_with(ResponseTemplate::new(200).set_body_json(user(id)))
        .expect(1)
        .mount(&server)
        .await;

    let provider = gotrue(&server);
    let mut changes = provider.subscribe();
    let link =
        CallbackLink::parse("/auth/callback#access_token=at-123&refresh_token=rt&expires_in=3600")
            .unwrap();

    assert!(provider.detect_session_in_url(&link).await.unwrap());

    let change = changes.recv().await.unwrap();
    assert_eq!(change.event, SessionEvent::SignedIn);
    let session = provider.current_session().await.unwrap().unwrap();
    assert_eq!(session.identity, Identity::new(id));
    assert_eq!(session.signup_role, Some(Role::Coach));
    assert_eq!(session.email.as_deref(), Some("jane@example.com"));
}

#[tokio::test]
async fn token_hash_links_are_verified() {
    let server = MockServer::start().await;
    let id = Uuid::new_v4();
    Mock::given(method("POST"))
        .and(path("/auth/v1/verify"))
        .and(body_partial_json(json!({ "type": "signup", "token_hash": "th" })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": "at",
            "refresh_token": "rt",
            "expires_in": 3600,
            "user": user(id),
        })))
        .expect(1)
        .mount(&server)
        .await;

    let provider = gotrue(&server);
    let link = CallbackLink::parse("/auth/callback?token_hash=th&type=signup").unwrap();
    assert!(provider.detect_session_in_url(&link).await.unwrap());
    assert!(provider.current_session().await.unwrap().is_some());
}

#[tokio::test]
async fn consumed_link_is_unauthorized() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/auth/v1/verify"))
        .respond_with(ResponseTemplate::new(403).set_body_json(json!({
            "error_code": "otp_expired",
            "msg": "Email link is invalid or has expired",
        })))
        .mount(&server)
        .await;

    let provider = gotrue(&server);
    let link = CallbackLink::parse("/auth/callback?token_hash=used&type=signup").unwrap();
    let err = provider.detect_session_in_url(&link).await.unwrap_err();
    assert!(matches!(err, ProviderError::Unauthorized));
    assert!(provider.current_session().await.unwrap().is_none());
}

#[tokio::test]
async fn expired_access_token_is_refreshed() {
    let server = MockServer::start().await;
    let id = Uuid::new_v4();
    Mock::given(method("GET"))
        .and(path("/auth/v1/user"))
        .respond_with(ResponseTemplate::new(200).set_body_json(user(id)))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/auth/v1/token"))
        .and(query_param("grant_type", "refresh_token"))
        .and(body_partial_json(json!({ "refresh_token": "rt-old" })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": "at-new",
            "refresh_token": "rt-new",
            "expires_in": 3600,
            "user": user(id),
        })))
        .expect(1)
        .mount(&server)
        .await;

    let provider = gotrue(&server);
    // An already-expired token.
    let link = CallbackLink::parse(
        "/auth/callback#access_token=at-old&refresh_token=rt-old&expires_in=-10",
    )
    .unwrap();
    provider.detect_session_in_url(&link).await.unwrap();

    let mut changes = provider.subscribe();
    let session = provider.current_session().await.unwrap().unwrap();
    assert_eq!(session.identity, Identity::new(id));
    assert_eq!(changes.recv().await.unwrap().event, SessionEvent::TokenRefreshed);
}

#[tokio::test]
async fn revoked_refresh_token_ends_the_session() {
    let server = MockServer::start().await;
    let id = Uuid::new_v4();
    Mock::given(method("GET"))
        .and(path("/auth/v1/user"))
        .respond_with(ResponseTemplate::new(200).set_body_json(user(id)))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/auth/v1/token"))
        .and(query_param("grant_type", "refresh_token"))
        .respond_with(ResponseTemplate::new(401).set_body_json(json!({
            "error": "invalid_grant",
            "error_description": "Invalid Refresh Token: Refresh Token Not Found",
        })))
        .expect(1)
        .mount(&server)
        .await;

    let provider = gotrue(&server);
    let link = CallbackLink::parse(
        "/auth/callback#access_token=at-old&refresh_token=rt-revoked&expires_in=-10",
    )
    .unwrap();
    provider.detect_session_in_url(&link).await.unwrap();

    let mut changes = provider.subscribe();
    assert!(provider.current_session().await.unwrap().is_none());
    let change = changes.recv().await.unwrap();
    assert_eq!(change.event, SessionEvent::SignedOut);
    assert!(change.session.is_none());

    // Tokens are gone, so no second refresh goes out.
    assert!(provider.current_session().await.unwrap().is_none());
    assert!(provider.access_token().await.is_none());
}

#[tokio::test]
async fn expired_token_without_refresh_token_signs_out() {
    let server = MockServer::start().await;
    let id = Uuid::new_v4();
    Mock::given(method("GET"))
        .and(path("/auth/v1/user"))
        .respond_with(ResponseTemplate::new(200).set_body_json(user(id)))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/auth/v1/token"))
        .respond_with(ResponseTemplate::new(500))
        .expect(0)
        .mount(&server)
        .await;

    let provider = gotrue(&server);
    let link = CallbackLink::parse("/auth/callback#access_token=at-old&expires_in=-10").unwrap();
    provider.detect_session_in_url(&link).await.unwrap();

    let mut changes = provider.subscribe();
    assert!(provider.current_session().await.unwrap().is_none());
    assert_eq!(changes.recv().await.unwrap().event, SessionEvent::SignedOut);
}

#[tokio::test]
async fn profile_requests_carry_the_user_token() {
    let server = MockServer::start().await;
    let id = Uuid::new_v4();
    Mock::given(method("GET"))
        .and(path("/auth/v1/user"))
        .respond_with(ResponseTemplate::new(200).set_body_json(user(id)))
        .mount(&server)
        .await;
    Mock::given(method("PATCH"))
        .and(path("/rest/v1/profiles"))
        .and(header("apikey", API_KEY))
        .and(bearer_token("user-at"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([row(id, Some("Jane"))])))
        .expect(1)
        .mount(&server)
        .await;

    let provider = Arc::new(gotrue(&server));
    let store = postgrest(&server).with_access_tokens(provider.clone());
    let link = CallbackLink::parse("/auth/callback#access_token=user-at&expires_in=3600").unwrap();
    provider.detect_session_in_url(&link).await.unwrap();

    let record = store
        .update(&Identity::new(id), &ProfileUpdate::display_name("Jane"))
        .await
        .unwrap();
    assert!(record.is_complete());
}

#[tokio::test]
async fn resend_and_rate_limit() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/auth/v1/resend"))
        .and(body_partial_json(json!({ "email": "jane@example.com", "type": "signup" })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/auth/v1/resend"))
        .and(body_partial_json(json!({ "email": "spam@example.com" })))
        .respond_with(ResponseTemplate::new(429).insert_header("Retry-After", "60"))
        .mount(&server)
        .await;

    let provider = gotrue(&server);
    provider.resend_verification("jane@example.com").await.unwrap();

    let err = provider
        .resend_verification("spam@example.com")
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        ProviderError::RateLimited {
            retry_after: Some(d)
        } if d == Duration::from_secs(60)
    ));
}

#[tokio::test]
async fn sign_out_revokes_and_notifies() {
    let server = MockServer::start().await;
    let id = Uuid::new_v4();
    Mock::given(method("GET"))
        .and(path("/auth/v1/user"))
        .respond_with(ResponseTemplate::new(200).set_body_json(user(id)))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/auth/v1/logout"))
        .and(bearer_token("at"))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;

    let provider = gotrue(&server);
    let link = CallbackLink::parse("/auth/callback#access_token=at").unwrap();
    provider.detect_session_in_url(&link).await.unwrap();
    let mut changes = provider.subscribe();

    provider.sign_out().await.unwrap();

    assert_eq!(changes.recv().await.unwrap().event, SessionEvent::SignedOut);
    assert!(provider.current_session().await.unwrap().is_none());
}

#[tokio::test]
async fn full_flow_over_http_collaborators() {
    let server = MockServer::start().await;
    let id = Uuid::new_v4();
    Mock::given(method("GET"))
        .and(path("/auth/v1/user"))
        .respond_with(ResponseTemplate::new(200).set_body_json(user(id)))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/rest/v1/profiles"))
        .and(bearer_token("at"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/rest/v1/profiles"))
        .and(bearer_token("at"))
        .and(body_partial_json(json!({ "id": id, "role": "coach" })))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!([row(id, None)])))
        .expect(1)
        .mount(&server)
        .await;

    let navigator = Arc::new(HistoryNavigator::new("/auth/callback"));
    let config = FlowConfig {
        session_poll_interval: Duration::from_millis(20),
        ..Default::default()
    };
    let provider = Arc::new(gotrue(&server));
    let profiles = postgrest(&server).with_access_tokens(provider.clone());
    let runtime = SessionRuntime::new(
        provider,
        Arc::new(profiles),
        navigator.clone(),
        config,
    );
    runtime.start().await;

    let mut callback = runtime
        .open_verification_link("/auth/callback#access_token=at&refresh_token=rt&expires_in=3600")
        .unwrap();
    let phase = tokio::time::timeout(Duration::from_secs(5), callback.finished())
        .await
        .unwrap();

    assert_eq!(
        phase,
        CallbackPhase::Redirected {
            to: "/onboarding".into()
        }
    );
    assert_eq!(navigator.current_path(), "/onboarding");
    assert_eq!(navigator.count_to("/onboarding"), 1);
    runtime.shutdown().await;
}
