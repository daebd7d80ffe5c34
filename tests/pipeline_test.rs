//! End-to-end tests for pipeline tasks against mock forum and chat servers.

use std::time::Duration;

use health_forum_pipeline::config::Config;
use health_forum_pipeline::db::{
    count_staged_members, get_pending_post_ids, get_pending_usernames, get_staged_post,
    insert_pending_post_ids, insert_pending_usernames, upsert_members, upsert_posts, Database,
};
use health_forum_pipeline::enrich::OllamaClient;
use health_forum_pipeline::pipeline::{Pipeline, Task};
use health_forum_pipeline::scraper::{FileSessionStore, ForumScraper, Member, Post};
use serde_json::json;
use tempfile::TempDir;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

struct Harness {
    pipeline: Pipeline,
    session_file: std::path::PathBuf,
    _temp_dir: TempDir,
}

async fn harness(server: &MockServer, start_date: Option<&str>) -> Harness {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let session_file = temp_dir.path().join("cookies.json");
    let config = Config {
        base_url: server.uri(),
        session_file: session_file.clone(),
        database_path: temp_dir.path().join("pipeline.sqlite"),
        ollama_url: server.uri(),
        start_date: start_date.map(str::to_string),
        ..Config::for_testing()
    };

    let db = Database::new(&config.database_path)
        .await
        .expect("Failed to create database");
    let scraper = ForumScraper::from_config(&config).expect("Failed to build scraper");
    let chat = OllamaClient::new(&config.ollama_url, Duration::from_secs(5))
        .expect("Failed to build chat client");
    let pipeline = Pipeline::new(
        config,
        db,
        scraper,
        Box::new(FileSessionStore::new(session_file.clone())),
        Box::new(chat),
    );

    Harness {
        pipeline,
        session_file,
        _temp_dir: temp_dir,
    }
}

async fn mount_login(server: &MockServer, session_id: &str) {
    Mock::given(method("POST"))
        .and(path("/private/user/login"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({"huSessID": session_id, "huBv": "123"})),
        )
        .mount(server)
        .await;
}

#[tokio::test]
async fn test_init_then_check_session() {
    let server = MockServer::start().await;
    mount_login(&server, "abc").await;
    let h = harness(&server, None).await;

    assert!(h.pipeline.run(Task::CheckSession).await.is_err());

    h.pipeline.run(Task::InitSession).await.expect("init-session failed");
    assert!(h.session_file.exists());

    let session = h.pipeline.check_session().await.expect("check-session failed");
    assert_eq!(session.session_id(), "abc");
}

#[tokio::test]
async fn test_fetch_post_ids_queues_window() {
    let server = MockServer::start().await;
    mount_login(&server, "abc").await;
    Mock::given(method("GET"))
        .and(path("/private/posts/adult-adhd/latest"))
        .and(header("Cookie", "huSessID=abc; huBv=123"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "posts": [
                {"postId": 12, "dateCreated": "2020-01-20T00:00:00Z"},
                {"postId": 11, "dateCreated": "2020-01-10T00:00:00Z"}
            ],
            "hasMore": false
        })))
        .mount(&server)
        .await;

    let h = harness(&server, Some("2020-01")).await;
    h.pipeline.run(Task::InitSession).await.unwrap();

    let queued = h.pipeline.fetch_post_ids().await.expect("fetch-post-ids failed");
    assert_eq!(queued, 2);
    // Re-running is idempotent.
    assert_eq!(h.pipeline.fetch_post_ids().await.unwrap(), 0);

    let pending = get_pending_post_ids(h.pipeline.database().pool()).await.unwrap();
    assert_eq!(pending, vec![11, 12]);
}

#[tokio::test]
async fn test_fetch_post_ids_requires_start_date() {
    let server = MockServer::start().await;
    let h = harness(&server, None).await;
    assert!(h.pipeline.fetch_post_ids().await.is_err());
}

#[tokio::test]
async fn test_fetch_post_details_regenerates_session() {
    let server = MockServer::start().await;
    mount_login(&server, "fresh").await;

    Mock::given(method("GET"))
        .and(path("/private/posts/1"))
        .and(header("Cookie", "huSessID=fresh; huBv=123"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "postId": 1,
            "author": {"username": "alpha"},
            "body": "Hello"
        })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/private/posts/2"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/private/posts/3"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let h = harness(&server, None).await;
    std::fs::write(&h.session_file, r#"{"huSessID": "stale", "huBv": "000"}"#).unwrap();
    let pool = h.pipeline.database().pool();
    insert_pending_post_ids(pool, &[1, 2, 3]).await.unwrap();

    let summary = h
        .pipeline
        .fetch_post_details()
        .await
        .expect("fetch-post-details failed");

    assert_eq!(summary.requested, 3);
    assert_eq!(summary.stored, 1);
    assert_eq!(summary.failed, 2);
    assert_eq!(summary.processed, 2);

    let stored = get_staged_post(pool, 1).await.unwrap().unwrap();
    assert_eq!(stored.author, "alpha");
    // Only the server error stays queued.
    assert_eq!(get_pending_post_ids(pool).await.unwrap(), vec![3]);
}

#[tokio::test]
async fn test_fetch_post_details_stops_when_throttled() {
    let server = MockServer::start().await;
    mount_login(&server, "abc").await;

    Mock::given(method("GET"))
        .and(path("/private/posts/1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"postId": 1})))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/private/posts/2"))
        .respond_with(ResponseTemplate::new(429))
        .mount(&server)
        .await;

    let h = harness(&server, None).await;
    let pool = h.pipeline.database().pool();
    insert_pending_post_ids(pool, &[1, 2]).await.unwrap();

    assert!(h.pipeline.fetch_post_details().await.is_err());
    // Nothing is marked processed, so a later run picks up both ids.
    assert_eq!(get_pending_post_ids(pool).await.unwrap(), vec![1, 2]);
    assert!(get_staged_post(pool, 1).await.unwrap().is_none());
}

#[tokio::test]
async fn test_fetch_member_details_and_cleanup() {
    let server = MockServer::start().await;
    mount_login(&server, "abc").await;

    Mock::given(method("GET"))
        .and(path("/private/user/alpha"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "username": "alpha",
            "bio": "Mum of two"
        })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/private/user/Hidden"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"username": "Hidden"})))
        .mount(&server)
        .await;

    let h = harness(&server, None).await;
    let pool = h.pipeline.database().pool();
    upsert_posts(
        pool,
        &[
            Post {
                author: "alpha".to_string(),
                ..Post::with_id(1)
            },
            Post {
                author: "Hidden".to_string(),
                ..Post::with_id(2)
            },
        ],
    )
    .await
    .unwrap();

    h.pipeline.run(Task::FetchMembersForPosts).await.unwrap();
    assert_eq!(
        get_pending_usernames(pool).await.unwrap(),
        vec!["Hidden", "alpha"]
    );

    let summary = h.pipeline.fetch_member_details().await.unwrap();
    assert_eq!(summary.stored, 2);
    assert!(get_pending_usernames(pool).await.unwrap().is_empty());

    h.pipeline.run(Task::RemoveHiddenMembers).await.unwrap();
    assert_eq!(count_staged_members(pool).await.unwrap(), 1);
}

#[tokio::test]
async fn test_clean_tasks_empty_stores() {
    let server = MockServer::start().await;
    let h = harness(&server, None).await;
    let pool = h.pipeline.database().pool();

    insert_pending_usernames(pool, &["alpha".to_string()]).await.unwrap();
    upsert_members(pool, &[Member::with_username("alpha")]).await.unwrap();

    h.pipeline.run(Task::CleanIngestion).await.unwrap();
    h.pipeline.run(Task::CleanStaging).await.unwrap();

    assert!(get_pending_usernames(pool).await.unwrap().is_empty());
    assert_eq!(count_staged_members(pool).await.unwrap(), 0);
}

#[test]
fn test_every_task_parses_by_name() {
    for task in Task::ALL {
        assert_eq!(task.to_string().parse::<Task>().unwrap(), task);
    }
    assert!("scrape-everything".parse::<Task>().is_err());
}
