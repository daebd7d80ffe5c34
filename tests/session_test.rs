//! Integration tests for the login handshake and session persistence.

use std::time::Duration;

use health_forum_pipeline::scraper::{
    load_from_file, save_to_file, FileSessionStore, ForumScraper, ScrapeError, Session,
    SessionStore,
};
use tempfile::TempDir;
use wiremock::matchers::{body_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn scraper_for(server: &MockServer) -> ForumScraper {
    ForumScraper::new(
        "tester@example.com",
        "hunter2",
        &server.uri(),
        Duration::from_secs(5),
    )
    .expect("Failed to build scraper")
}

#[tokio::test]
async fn test_login_reads_tokens_from_json_body() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/private/user/login"))
        .and(body_json(serde_json::json!({
            "email": "tester@example.com",
            "password": "hunter2"
        })))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(serde_json::json!({"huSessID": "abc", "huBv": "123"})),
        )
        .expect(1)
        .mount(&server)
        .await;

    let session = scraper_for(&server).login().await.expect("Login failed");

    assert_eq!(session.session_id(), "abc");
    assert_eq!(session.browser_version(), "123");
    assert_eq!(session.cookie_header(), "huSessID=abc; huBv=123");
}

#[tokio::test]
async fn test_login_reads_tokens_from_cookies() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/private/user/login"))
        .respond_with(
            ResponseTemplate::new(200)
                .append_header("Set-Cookie", "huSessID=cookie-id; Path=/; HttpOnly")
                .append_header("Set-Cookie", "huBv=cookie-bv; Path=/")
                .set_body_string("{}"),
        )
        .mount(&server)
        .await;

    let session = scraper_for(&server).login().await.expect("Login failed");

    assert_eq!(session.session_id(), "cookie-id");
    assert_eq!(session.browser_version(), "cookie-bv");
}

#[tokio::test]
async fn test_login_rejected_credentials() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/private/user/login"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&server)
        .await;

    let err = scraper_for(&server).login().await.unwrap_err();
    assert!(matches!(err, ScrapeError::Authentication(_)), "got {err:?}");
}

#[tokio::test]
async fn test_login_without_tokens_is_authentication_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/private/user/login"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(serde_json::json!({"huSessID": "abc"})),
        )
        .mount(&server)
        .await;

    let err = scraper_for(&server).login().await.unwrap_err();
    assert!(matches!(err, ScrapeError::Authentication(_)), "got {err:?}");
}

#[tokio::test]
async fn test_save_then_load_round_trip() {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let path = temp_dir.path().join("nested").join("cookies.json");
    let session = Session::new("abc", "123", Some("https://forum.example.com/".to_string()))
        .expect("valid session");

    save_to_file(&session, &path).await.expect("Failed to save");
    let loaded = load_from_file(&path).await.expect("Failed to load");

    assert_eq!(loaded, session);
    assert_eq!(loaded.base_url(), Some("https://forum.example.com"));
    assert!(!temp_dir.path().join("nested").join("cookies.json.tmp").exists());
}

#[tokio::test]
async fn test_load_accepts_legacy_file_without_version() {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let path = temp_dir.path().join("cookies.json");
    std::fs::write(&path, r#"{"huSessID": "abc", "huBv": "123"}"#).unwrap();

    let session = load_from_file(&path).await.expect("Failed to load");
    assert_eq!(session.session_id(), "abc");
    assert_eq!(session.base_url(), None);
}

#[tokio::test]
async fn test_load_rejects_invalid_files() {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");

    let cases = [
        ("missing_bv.json", r#"{"huSessID": "abc"}"#),
        ("missing_id.json", r#"{"huBv": "123"}"#),
        ("empty_token.json", r#"{"huSessID": "", "huBv": "123"}"#),
        ("future.json", r#"{"version": 99, "huSessID": "abc", "huBv": "123"}"#),
        ("garbage.json", "not json at all"),
    ];

    for (name, contents) in cases {
        let path = temp_dir.path().join(name);
        std::fs::write(&path, contents).unwrap();
        let err = load_from_file(&path).await.unwrap_err();
        assert!(
            matches!(err, ScrapeError::InvalidSessionFile { .. }),
            "{name}: got {err:?}"
        );
    }

    let err = load_from_file(&temp_dir.path().join("absent.json"))
        .await
        .unwrap_err();
    assert!(matches!(err, ScrapeError::InvalidSessionFile { .. }));
}

#[tokio::test]
async fn test_refresh_session_replaces_stored_file() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/private/user/login"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(serde_json::json!({"huSessID": "fresh", "huBv": "456"})),
        )
        .expect(1)
        .mount(&server)
        .await;

    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let store = FileSessionStore::new(temp_dir.path().join("cookies.json"));
    let stale = Session::new("stale", "000", None).expect("valid session");
    store.save(&stale).await.expect("Failed to save");

    let scraper = scraper_for(&server);
    let session = scraper
        .refresh_session(&store)
        .await
        .expect("Failed to refresh");

    assert_eq!(session.session_id(), "fresh");
    let reloaded = scraper.load_session(&store).await.expect("Failed to load");
    assert_eq!(reloaded, session);
}

#[tokio::test]
async fn test_delete_missing_session_is_ok() {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let store = FileSessionStore::new(temp_dir.path().join("cookies.json"));
    store.delete().await.expect("Deleting a missing session should succeed");
}
