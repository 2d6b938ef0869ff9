//! End-to-end tests: the full application over the Azure backend, with Blob Storage mocked by
//! wiremock.

use std::sync::Arc;

use axum::http::StatusCode;
use axum_test::multipart::{MultipartForm, Part};
use serde_json::Value;
use wiremock::matchers::{header, method, path, path_regex, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use crate::Application;
use crate::config::{Config, StorageBackend, StorageConfig};
use crate::storage::azure::API_VERSION;
use crate::test_utils::{FailingBlobStore, TEST_CONTAINER, create_test_config};

fn azure_config(server: &MockServer, create_container: bool) -> Config {
    Config {
        storage_account_url: None,
        images_container: TEST_CONTAINER.to_string(),
        storage: StorageConfig {
            backend: StorageBackend::Azure,
            connection_string: Some(format!(
                "AccountName=acct;AccountKey=c2VjcmV0;BlobEndpoint={}/acct",
                server.uri()
            )),
            create_container,
            ..Default::default()
        },
        ..create_test_config()
    }
}

fn enumeration(names: &[&str]) -> String {
    let blobs: String = names.iter().map(|n| format!("<Blob><Name>{n}</Name></Blob>")).collect();
    format!(
        r#"<?xml version="1.0" encoding="utf-8"?><EnumerationResults ContainerName="{TEST_CONTAINER}"><Blobs>{blobs}</Blobs><NextMarker /></EnumerationResults>"#
    )
}

#[test_log::test(tokio::test)]
async fn test_upload_and_gallery_against_azure() {
    let server = MockServer::start().await;
    Mock::given(method("PUT"))
        .and(path_regex(r"^/acct/test-images/\d{8}T\d{6}-holiday_photo\.jpg$"))
        .and(header("x-ms-blob-type", "BlockBlob"))
        .and(header("content-type", "image/jpeg"))
        .and(header("x-ms-version", API_VERSION))
        .respond_with(ResponseTemplate::new(201))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/acct/test-images"))
        .and(query_param("comp", "list"))
        .respond_with(ResponseTemplate::new(200).set_body_string(enumeration(&["20240101T000000-old.png"])))
        .mount(&server)
        .await;

    let app = Application::new(azure_config(&server, false)).await.unwrap();
    let client = app.into_test_server();

    let form = MultipartForm::new().add_part(
        "file",
        Part::bytes(b"jpeg bytes".to_vec())
            .file_name("holiday photo.jpg")
            .mime_type("image/jpeg"),
    );
    let response = client.post("/api/v1/upload").multipart(form).await;
    response.assert_status_ok();

    // No storage_account_url, so URLs are rooted at the account's blob endpoint
    let json: Value = response.json();
    let url = json["url"].as_str().unwrap();
    assert!(url.starts_with(&format!("{}/acct/test-images/", server.uri())), "{url}");
    assert!(url.ends_with("-holiday_photo.jpg"));

    let response = client.get("/api/v1/gallery").await;
    response.assert_status_ok();
    response.assert_json(&serde_json::json!({
        "ok": true,
        "gallery": [format!("{}/acct/test-images/20240101T000000-old.png", server.uri())],
    }));
}

#[tokio::test]
async fn test_uploaded_url_matches_gallery_for_dot_segments() {
    let server = MockServer::start().await;
    Mock::given(method("PUT"))
        .and(path_regex(r"^/acct/test-images/\d{8}T\d{6}-x/y\.png$"))
        .respond_with(ResponseTemplate::new(201))
        .expect(1)
        .mount(&server)
        .await;

    let client = Application::new(azure_config(&server, false))
        .await
        .unwrap()
        .into_test_server();

    let form = MultipartForm::new().add_part(
        "file",
        Part::bytes(b"png".to_vec()).file_name("x/../y.png").mime_type("image/png"),
    );
    let response = client.post("/api/v1/upload").multipart(form).await;
    response.assert_status_ok();
    let url = response.json::<Value>()["url"].as_str().unwrap().to_string();

    // List back exactly what the PUT wrote
    let requests = server.received_requests().await.unwrap();
    let stored = requests[0].url.path().strip_prefix("/acct/test-images/").unwrap().to_string();
    Mock::given(method("GET"))
        .and(path("/acct/test-images"))
        .and(query_param("comp", "list"))
        .respond_with(ResponseTemplate::new(200).set_body_string(enumeration(&[&stored])))
        .mount(&server)
        .await;

    let response = client.get("/api/v1/gallery").await;
    response.assert_status_ok();
    response.assert_json(&serde_json::json!({ "ok": true, "gallery": [url] }));
}

#[tokio::test]
async fn test_azure_failure_surfaces_as_server_error() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(403).set_body_string(
            "<Error><Code>AuthenticationFailed</Code><Message>Server failed to authenticate the request.</Message></Error>",
        ))
        .mount(&server)
        .await;

    let client = Application::new(azure_config(&server, false))
        .await
        .unwrap()
        .into_test_server();

    let response = client.get("/api/v1/gallery").await;
    response.assert_status(StatusCode::INTERNAL_SERVER_ERROR);
    let json: Value = response.json();
    assert_eq!(json["ok"], false);
    assert!(
        json["error"]
            .as_str()
            .unwrap()
            .contains("Server failed to authenticate the request.")
    );

    // Health never touches storage
    client.get("/health").await.assert_status_ok();
}

#[tokio::test]
async fn test_container_created_on_startup_when_enabled() {
    let server = MockServer::start().await;
    Mock::given(method("PUT"))
        .and(path("/acct/test-images"))
        .and(query_param("restype", "container"))
        .respond_with(ResponseTemplate::new(201))
        .expect(1)
        .mount(&server)
        .await;

    Application::new(azure_config(&server, true)).await.unwrap();
}

#[tokio::test]
async fn test_container_not_touched_by_default() {
    let server = MockServer::start().await;
    Mock::given(method("PUT"))
        .respond_with(ResponseTemplate::new(201))
        .expect(0)
        .mount(&server)
        .await;

    Application::new(azure_config(&server, false)).await.unwrap();
}

#[tokio::test]
async fn test_startup_fails_when_container_cannot_be_created() {
    let mut config = create_test_config();
    config.storage.create_container = true;

    let result = Application::with_store(config, Arc::new(FailingBlobStore)).await;
    let err = result.err().expect("startup should fail");
    assert!(err.to_string().contains("Failed to create container 'test-images'"));
}

#[tokio::test]
async fn test_invalid_connection_string_fails_startup() {
    let mut config = create_test_config();
    config.storage.backend = StorageBackend::Azure;
    config.storage.connection_string = Some("AccountName=acct".to_string());

    let result = Application::new(config).await;
    assert!(result.is_err());
}
