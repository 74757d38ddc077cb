//! End-to-end tests against a mocked content delivery API
//!
//! Uses wiremock for the HTTP endpoints and tempfile for the node store and
//! asset roots.

use serde_json::json;
use std::sync::Arc;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use storyblok_ingestion::assets::AssetNaming;
use storyblok_ingestion::http_client::ThrottledHttpClient;
use storyblok_ingestion::loader::PaginatedLoader;
use storyblok_ingestion::params::PER_PAGE;
use storyblok_ingestion::{
    AdditionalType, Config, FailurePolicy, FileSystemNodeStore, IngestionError, NodeStore,
    Orchestrator, RequestParams, StoryblokSource,
};

fn source(server: &MockServer) -> StoryblokSource {
    let client = Arc::new(ThrottledHttpClient::with_defaults().unwrap());
    StoryblokSource::new(client, server.uri(), "secret")
}

fn config_for(server: &MockServer, root: &std::path::Path) -> Config {
    let mut config = Config::with_access_token("secret");
    if let Some(client) = config.client.as_mut() {
        client.base_url = server.uri();
    }
    config.data_dir = root.join("nodes");
    config
}

async fn mount_space(server: &MockServer, codes: &[&str]) {
    Mock::given(method("GET"))
        .and(path("/cdn/spaces/me"))
        .and(query_param("token", "secret"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({ "space": { "id": 1, "name": "Test", "language_codes": codes } })),
        )
        .mount(server)
        .await;
}

#[tokio::test]
async fn test_loader_follows_total_header() {
    let server = MockServer::start().await;

    for page in 1..=3u64 {
        let ids: Vec<u64> = match page {
            1 => vec![1, 2],
            2 => vec![3, 4],
            _ => vec![5],
        };
        let stories: Vec<_> = ids.iter().map(|id| json!({ "id": id })).collect();

        Mock::given(method("GET"))
            .and(path("/cdn/stories"))
            .and(query_param("page", page.to_string()))
            .and(query_param("per_page", "2"))
            .and(query_param("token", "secret"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("Total", "5")
                    .set_body_json(json!({ "stories": stories })),
            )
            .expect(1)
            .mount(&server)
            .await;
    }

    let source = source(&server);
    let loader = PaginatedLoader::new(&source);
    let params = RequestParams::new().with(PER_PAGE, 2);

    let records = loader.load_all("stories", &params, None).await.unwrap();

    let ids: Vec<u64> = records.iter().map(|r| r["id"].as_u64().unwrap()).collect();
    assert_eq!(ids, vec![1, 2, 3, 4, 5]);
}

#[tokio::test]
async fn test_api_error_status_is_reported() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/cdn/spaces/me"))
        .respond_with(ResponseTemplate::new(401).set_body_string("Unauthorized"))
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let config = config_for(&server, dir.path());
    let store = FileSystemNodeStore::new(&config.data_dir).await.unwrap();

    let result = Orchestrator::from_config(&config)
        .unwrap()
        .run(&config, &store)
        .await;

    match result {
        Err(IngestionError::ApiError { code, .. }) => assert_eq!(code, "401"),
        other => panic!("expected ApiError, got {:?}", other.map(|r| r.run_id)),
    }
}

#[tokio::test]
async fn test_missing_token_rejected_before_requests() {
    let server = MockServer::start().await;
    let dir = tempfile::tempdir().unwrap();

    let mut config = config_for(&server, dir.path());
    if let Some(client) = config.client.as_mut() {
        client.access_token = None;
    }

    assert!(matches!(
        Orchestrator::from_config(&config),
        Err(IngestionError::MissingOption("accessToken"))
    ));
    assert!(server.received_requests().await.unwrap_or_default().is_empty());
}

#[tokio::test]
async fn test_full_run_stores_nodes_and_downloads_assets_once() {
    let server = MockServer::start().await;
    let dir = tempfile::tempdir().unwrap();

    let asset_url = format!("{}/f/100/hero.png", server.uri());
    let asset_host = format!("{}/f/", server.uri().trim_start_matches("http:"));

    mount_space(&server, &["de"]).await;

    Mock::given(method("GET"))
        .and(path("/cdn/stories"))
        .and(query_param("language", "de"))
        .respond_with(ResponseTemplate::new(200).insert_header("Total", "1").set_body_json(json!({
            "stories": [
                { "id": 7, "name": "Start", "lang": "de", "content": { "component": "page", "image": asset_url } }
            ]
        })))
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/cdn/stories"))
        .respond_with(ResponseTemplate::new(200).insert_header("Total", "1").set_body_json(json!({
            "stories": [
                { "id": 7, "name": "Home", "lang": "default", "content": { "component": "page", "image": asset_url } }
            ]
        })))
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/cdn/tags"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "tags": [ { "name": "news", "taggings_count": 1 } ]
        })))
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/f/100/hero.png"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(b"png-bytes".to_vec()))
        .expect(1)
        .mount(&server)
        .await;

    let mut config = config_for(&server, dir.path());
    config.additional_types = vec![AdditionalType::new("tags", "StoryblokTag")];
    config.download_assets = true;
    config.asset_root = dir.path().join("static");
    config.asset_directory = "images".to_string();
    config.asset_naming = AssetNaming::Basename;
    config.asset_hosts = vec![asset_host];

    let store = FileSystemNodeStore::new(&config.data_dir).await.unwrap();
    let orchestrator = Orchestrator::from_config(&config).unwrap();

    let first = orchestrator.run(&config, &store).await.unwrap();
    assert_eq!(first.locales, vec!["", "de"]);
    assert_eq!(first.totals.stored, 3);
    assert_eq!(first.totals.assets_rewritten, 2);
    assert_eq!(first.totals.assets_downloaded, 1);
    assert_eq!(first.totals.assets_skipped, 1);

    let asset = dir.path().join("static").join("images").join("hero.png");
    assert_eq!(std::fs::read(&asset).unwrap(), b"png-bytes");

    let entries = store.load_collection("StoryblokEntry").await.unwrap();
    let ids: Vec<&str> = entries.iter().map(|n| n.id()).collect();
    assert_eq!(ids, vec!["page-7", "page-7-de"]);
    assert_eq!(
        entries[0].get("content").unwrap()["image"],
        json!({ "url": asset_url, "filename": "hero.png", "path": "images/hero.png" })
    );
    assert_eq!(entries[0].get("story_id"), Some(&json!(7)));

    let tags = store.load_collection("StoryblokTag").await.unwrap();
    assert_eq!(tags.len(), 1);
    assert_eq!(tags[0].id(), "news");

    // existing file is never fetched again
    let second = orchestrator.run(&config, &store).await.unwrap();
    assert_eq!(second.totals.assets_downloaded, 0);
    assert_eq!(second.totals.assets_rewritten, 2);
    assert_eq!(second.totals.assets_skipped, 2);
    assert_eq!(store.load_collection("StoryblokEntry").await.unwrap().len(), 2);
}

#[tokio::test]
async fn test_continue_on_error_skips_failing_locale() {
    let server = MockServer::start().await;
    let dir = tempfile::tempdir().unwrap();

    mount_space(&server, &["fr"]).await;

    Mock::given(method("GET"))
        .and(path("/cdn/stories"))
        .and(query_param("language", "fr"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/cdn/stories"))
        .respond_with(ResponseTemplate::new(200).insert_header("Total", "1").set_body_json(json!({
            "stories": [ { "id": 1, "lang": "default", "content": { "component": "post" } } ]
        })))
        .mount(&server)
        .await;

    let mut config = config_for(&server, dir.path());
    config.failure_policy = FailurePolicy::ContinueOnError;

    let store = FileSystemNodeStore::new(&config.data_dir).await.unwrap();
    let report = Orchestrator::from_config(&config)
        .unwrap()
        .run(&config, &store)
        .await
        .unwrap();

    assert_eq!(report.failed, 1);
    assert_eq!(report.totals.stored, 1);

    let entries = store.load_collection("StoryblokEntry").await.unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].id(), "post-1");

    store.declare_collection("Scratch").await.unwrap();
    assert!(store.list_collections().await.unwrap().contains(&"Scratch".to_string()));
}
