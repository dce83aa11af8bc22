//! Session resolution against a mock server.
//!
//! The interesting paths are all around token expiry: a 401 from
//! `/user-info` must trigger exactly one `/refresh` and one retry, and
//! every outcome must leave the session settled (`is_loading` false).

use shelfchat::api::ApiClient;
use shelfchat::api::credentials::CredentialStore;
use shelfchat::auth::SessionManager;
use std::sync::Arc;
use std::time::Duration;
use wiremock::matchers::{body_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn test_client(mock_url: &str, credentials: Arc<CredentialStore>) -> ApiClient {
    ApiClient::new(
        mock_url,
        credentials,
        Duration::from_secs(5),
        Duration::from_secs(5),
    )
    .unwrap()
}

fn user_info_body(is_admin: bool) -> serde_json::Value {
    serde_json::json!({"email": "admin@example.com", "is_admin": is_admin})
}

/// A stale access token gets one refresh and one retry, and the session
/// settles authenticated off the retried call.
#[tokio::test]
async fn expired_token_refreshes_once_and_retries() {
    let server = MockServer::start().await;
    let credentials = Arc::new(CredentialStore::in_memory());
    credentials.apply_set_cookie("access_token=stale");

    // The stale token is rejected...
    Mock::given(method("GET"))
        .and(path("/user-info"))
        .and(header("cookie", "access_token=stale"))
        .respond_with(
            ResponseTemplate::new(401)
                .set_body_json(serde_json::json!({"detail": "Token expired"})),
        )
        .expect(1)
        .mount(&server)
        .await;

    // ...the refresh rotates it...
    Mock::given(method("POST"))
        .and(path("/refresh"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(serde_json::json!({"message": "Token refreshed"}))
                .append_header("set-cookie", "access_token=fresh; HttpOnly; Path=/"),
        )
        .expect(1)
        .mount(&server)
        .await;

    // ...and the retried call carries the fresh one.
    Mock::given(method("GET"))
        .and(path("/user-info"))
        .and(header("cookie", "access_token=fresh"))
        .respond_with(ResponseTemplate::new(200).set_body_json(user_info_body(true)))
        .expect(1)
        .mount(&server)
        .await;

    let session = SessionManager::new(test_client(&server.uri(), credentials));
    let state = session.check_auth().await;

    assert!(state.is_authenticated);
    assert!(state.is_admin);
    assert!(!state.is_loading);
}

/// A failing refresh settles the session logged out without retrying
/// the identity call.
#[tokio::test]
async fn failed_refresh_settles_logged_out() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/user-info"))
        .respond_with(
            ResponseTemplate::new(401)
                .set_body_json(serde_json::json!({"detail": "Token expired"})),
        )
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("POST"))
        .and(path("/refresh"))
        .respond_with(
            ResponseTemplate::new(401)
                .set_body_json(serde_json::json!({"detail": "Invalid refresh token"})),
        )
        .expect(1)
        .mount(&server)
        .await;

    let session = SessionManager::new(test_client(
        &server.uri(),
        Arc::new(CredentialStore::in_memory()),
    ));
    let state = session.check_auth().await;

    assert!(!state.is_authenticated);
    assert!(!state.is_admin);
    assert!(!state.is_loading);
}

/// Overlapping `check_auth` calls resolve one at a time: the refresh
/// dance runs once, and the second caller revalidates with the rotated
/// token instead of racing a second refresh.
#[tokio::test]
async fn overlapping_check_auth_calls_refresh_once() {
    let server = MockServer::start().await;
    let credentials = Arc::new(CredentialStore::in_memory());
    credentials.apply_set_cookie("access_token=stale");

    // The stale token is rejected once, slowly, so the second caller
    // piles up behind the first.
    Mock::given(method("GET"))
        .and(path("/user-info"))
        .and(header("cookie", "access_token=stale"))
        .respond_with(
            ResponseTemplate::new(401)
                .set_body_json(serde_json::json!({"detail": "Token expired"}))
                .set_delay(Duration::from_millis(200)),
        )
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("POST"))
        .and(path("/refresh"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(serde_json::json!({"message": "Token refreshed"}))
                .append_header("set-cookie", "access_token=fresh; HttpOnly; Path=/"),
        )
        .expect(1)
        .mount(&server)
        .await;

    // First caller's retry plus the second caller's own resolution.
    Mock::given(method("GET"))
        .and(path("/user-info"))
        .and(header("cookie", "access_token=fresh"))
        .respond_with(ResponseTemplate::new(200).set_body_json(user_info_body(true)))
        .expect(2)
        .mount(&server)
        .await;

    let session = SessionManager::new(test_client(&server.uri(), credentials));

    let racer = {
        let session = session.clone();
        tokio::spawn(async move { session.check_auth().await })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;
    let second = session.check_auth().await;
    let first = racer.await.unwrap();

    for state in [first, second] {
        assert!(state.is_authenticated);
        assert!(state.is_admin);
        assert!(!state.is_loading);
    }
}

/// Non-401 failures never touch `/refresh`; the session just settles
/// logged out.
#[tokio::test]
async fn server_error_does_not_attempt_refresh() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/user-info"))
        .respond_with(ResponseTemplate::new(500))
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("POST"))
        .and(path("/refresh"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let session = SessionManager::new(test_client(
        &server.uri(),
        Arc::new(CredentialStore::in_memory()),
    ));
    let state = session.check_auth().await;

    assert!(!state.is_authenticated);
    assert!(!state.is_loading);
}

/// Login stores the session cookies from `Set-Cookie` and revalidates
/// through `/user-info` rather than assuming success.
#[tokio::test]
async fn login_persists_cookies_and_revalidates() {
    let server = MockServer::start().await;
    let credentials = Arc::new(CredentialStore::in_memory());

    Mock::given(method("POST"))
        .and(path("/login"))
        .and(body_json(serde_json::json!({
            "email": "admin@example.com",
            "password": "hunter2"
        })))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(serde_json::json!({"message": "Login successful"}))
                .append_header("set-cookie", "access_token=tok-a; HttpOnly; Path=/")
                .append_header("set-cookie", "refresh_token=tok-r; HttpOnly; Path=/"),
        )
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/user-info"))
        .and(header("cookie", "access_token=tok-a; refresh_token=tok-r"))
        .respond_with(ResponseTemplate::new(200).set_body_json(user_info_body(false)))
        .expect(1)
        .mount(&server)
        .await;

    let session = SessionManager::new(test_client(&server.uri(), credentials.clone()));
    let state = session.login("admin@example.com", "hunter2").await.unwrap();

    assert!(state.is_authenticated);
    assert!(!state.is_admin);
    assert!(credentials.has_credentials());
}

/// Bad credentials surface the server's detail message and leave the
/// session untouched.
#[tokio::test]
async fn rejected_login_reports_detail() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/login"))
        .respond_with(
            ResponseTemplate::new(401)
                .set_body_json(serde_json::json!({"detail": "Invalid credentials"})),
        )
        .expect(1)
        .mount(&server)
        .await;

    let session = SessionManager::new(test_client(
        &server.uri(),
        Arc::new(CredentialStore::in_memory()),
    ));
    let err = session.login("admin@example.com", "wrong").await.unwrap_err();

    assert!(err.to_string().contains("Invalid credentials"), "{err}");
}

/// Logout clears local credentials even when the server call fails.
#[tokio::test]
async fn logout_clears_credentials_despite_server_error() {
    let server = MockServer::start().await;
    let credentials = Arc::new(CredentialStore::in_memory());
    credentials.apply_set_cookie("access_token=tok-a");
    credentials.apply_set_cookie("refresh_token=tok-r");

    Mock::given(method("POST"))
        .and(path("/logout"))
        .respond_with(ResponseTemplate::new(500))
        .expect(1)
        .mount(&server)
        .await;

    let session = SessionManager::new(test_client(&server.uri(), credentials.clone()));
    let state = session.logout().await;

    assert!(!state.is_authenticated);
    assert!(!state.is_admin);
    assert!(!credentials.has_credentials());
}

/// Happy-path logout: the server clears its cookie, the client forgets
/// both tokens.
#[tokio::test]
async fn logout_forgets_both_tokens() {
    let server = MockServer::start().await;
    let credentials = Arc::new(CredentialStore::in_memory());
    credentials.apply_set_cookie("access_token=tok-a");
    credentials.apply_set_cookie("refresh_token=tok-r");

    Mock::given(method("POST"))
        .and(path("/logout"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(serde_json::json!({"message": "Logged out"}))
                .append_header("set-cookie", "access_token=; Max-Age=0; Path=/"),
        )
        .expect(1)
        .mount(&server)
        .await;

    let session = SessionManager::new(test_client(&server.uri(), credentials.clone()));
    session.logout().await;

    assert!(!credentials.has_credentials());
}
