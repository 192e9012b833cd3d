//! End-to-end delivery over a real socket against a mock encryption gateway.
//!
//! The gateway is a wiremock server speaking the gateway's JSON protocol.
//! It does not touch the staged files, so encrypted downloads arrive with
//! their original bytes; what is checked here is the call sequence, the
//! headers and the cleanup of every staged artifact.

mod common;

use common::{Fixture, REPORT_LEN, TestServer, staged_files};
use sealed_files::GatewayConfig;
use serde_json::{Value, json};
use std::path::Path;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn gateway_config(server: &MockServer) -> GatewayConfig {
    GatewayConfig {
        base_url: Some(server.uri()),
        name: Some("svc-files".into()),
        password: Some("svc-secret".into()),
        ..Default::default()
    }
}

async fn mount_login(server: &MockServer, expected: u64) {
    Mock::given(method("POST"))
        .and(path("/login"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "error": 0,
            "loginid": "S-1"
        })))
        .expect(expected)
        .mount(server)
        .await;
}

async fn mount_encrypt(server: &MockServer, reply: Value, expected: u64) {
    Mock::given(method("POST"))
        .and(path("/encryptFile"))
        .respond_with(ResponseTemplate::new(200).set_body_json(reply))
        .expect(expected)
        .mount(server)
        .await;
}

/// Staged paths the gateway was asked to encrypt
async fn encrypted_paths(server: &MockServer) -> Vec<String> {
    server
        .received_requests()
        .await
        .unwrap_or_default()
        .iter()
        .filter(|r| r.url.path() == "/encryptFile")
        .map(|r| {
            let body: Value = serde_json::from_slice(&r.body).unwrap();
            assert_eq!(body["LoginID"], "S-1");
            body["Param"]["files"][0].as_str().unwrap().to_string()
        })
        .collect()
}

#[tokio::test]
async fn dataset_download_is_encrypted_then_removed() {
    let gateway = MockServer::start().await;
    mount_login(&gateway, 1).await;
    mount_encrypt(&gateway, json!({"error": 0}), 1).await;

    let fixture = Fixture::new();
    let server = TestServer::spawn(fixture.state(fixture.config(gateway_config(&gateway)))).await;

    let response = reqwest::get(server.url("/file/read/Q3%20report.pdf?token=tok-report"))
        .await
        .unwrap();

    assert_eq!(response.status(), 200);
    assert_eq!(response.content_length(), Some(REPORT_LEN as u64));
    assert_eq!(
        response.headers()["content-disposition"],
        "attachment; filename=\"Q3%20report.pdf\""
    );
    assert_eq!(
        response.headers()["content-type"],
        "application/octet-stream; charset=utf-8"
    );
    let body = response.bytes().await.unwrap();
    assert_eq!(body.len(), REPORT_LEN);

    server.shutdown().await;

    let paths = encrypted_paths(&gateway).await;
    assert_eq!(paths.len(), 1);
    assert!(Path::new(&paths[0]).starts_with(&fixture.download_dir));
    assert!(!Path::new(&paths[0]).exists());
    assert_eq!(staged_files(&fixture.download_dir), 0);
}

#[tokio::test]
async fn expired_session_is_renewed_and_encrypt_retried_once() {
    let gateway = MockServer::start().await;
    mount_login(&gateway, 2).await;
    Mock::given(method("POST"))
        .and(path("/encryptFile"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"error": 61453})))
        .up_to_n_times(1)
        .expect(1)
        .mount(&gateway)
        .await;
    mount_encrypt(&gateway, json!({"error": 0}), 1).await;

    let fixture = Fixture::new();
    let server = TestServer::spawn(fixture.state(fixture.config(gateway_config(&gateway)))).await;

    let response = reqwest::get(server.url("/file/read/report.pdf?token=tok-report"))
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    assert_eq!(response.bytes().await.unwrap().len(), REPORT_LEN);

    server.shutdown().await;

    let paths = encrypted_paths(&gateway).await;
    assert_eq!(paths.len(), 2);
    assert_eq!(paths[0], paths[1], "retry must target the same staged file");
    assert_eq!(staged_files(&fixture.download_dir), 0);
}

#[tokio::test]
async fn gateway_outage_is_502_and_leaves_nothing_behind() {
    let gateway = MockServer::start().await;
    mount_login(&gateway, 1).await;
    Mock::given(method("POST"))
        .and(path("/encryptFile"))
        .respond_with(ResponseTemplate::new(503))
        .expect(1)
        .mount(&gateway)
        .await;

    let fixture = Fixture::new();
    let server = TestServer::spawn(fixture.state(fixture.config(gateway_config(&gateway)))).await;

    let response = reqwest::get(server.url("/file/read/report.pdf?token=tok-report"))
        .await
        .unwrap();

    assert_eq!(response.status(), 502);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["error"]["code"], "transform_failed");
    assert_eq!(staged_files(&fixture.download_dir), 0);

    server.shutdown().await;
}

#[tokio::test]
async fn chat_download_skips_the_gateway() {
    let gateway = MockServer::start().await;
    mount_login(&gateway, 0).await;
    mount_encrypt(&gateway, json!({"error": 0}), 0).await;

    let fixture = Fixture::new();
    let server = TestServer::spawn(fixture.state(fixture.config(gateway_config(&gateway)))).await;

    let response = reqwest::get(server.url("/file/read/hello.txt?token=tok-hello"))
        .await
        .unwrap();

    assert_eq!(response.status(), 200);
    assert_eq!(response.headers()["content-type"], "text/plain; charset=utf-8");
    assert_eq!(response.text().await.unwrap(), "hello");

    server.shutdown().await;
    assert_eq!(staged_files(&fixture.download_dir), 0);
}

#[tokio::test]
async fn concurrent_downloads_share_one_login() {
    let gateway = MockServer::start().await;
    mount_login(&gateway, 1).await;
    mount_encrypt(&gateway, json!({"error": 0}), 8).await;

    let fixture = Fixture::new();
    let server = TestServer::spawn(fixture.state(fixture.config(gateway_config(&gateway)))).await;

    let client = reqwest::Client::new();
    let downloads = (0..8).map(|i| {
        let client = client.clone();
        let url = server.url(&format!("/file/read/copy-{i}.pdf?token=tok-report"));
        async move {
            let response = client.get(url).send().await.unwrap();
            assert_eq!(response.status(), 200);
            response.bytes().await.unwrap().len()
        }
    });
    let sizes = futures::future::join_all(downloads).await;

    assert!(sizes.iter().all(|&len| len == REPORT_LEN));

    server.shutdown().await;

    let mut paths = encrypted_paths(&gateway).await;
    paths.sort();
    paths.dedup();
    assert_eq!(paths.len(), 8, "every download stages its own artifact");
    assert_eq!(staged_files(&fixture.download_dir), 0);
}

#[tokio::test]
async fn export_over_http_is_rate_limited_per_client() {
    let gateway = MockServer::start().await;
    mount_login(&gateway, 1).await;
    mount_encrypt(&gateway, json!({"error": 0}), 1).await;

    let fixture = Fixture::new();
    let server = TestServer::spawn(fixture.state(fixture.config(gateway_config(&gateway)))).await;
    let client = reqwest::Client::new();

    let response = client
        .post(server.url("/dataset/collection/export"))
        .json(&json!({"collectionId": "faq"}))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    assert_eq!(
        response.headers()["content-disposition"],
        "attachment; filename=\"data.csv\""
    );
    let body = response.bytes().await.unwrap();
    let csv = String::from_utf8(body.to_vec()).unwrap();
    assert_eq!(
        csv,
        "\u{feff}index,content\n\"How are downloads protected?\",\"They are encrypted\"\n\"Are temp files kept?\",\"No\""
    );

    let again = client
        .post(server.url("/dataset/collection/export"))
        .json(&json!({"collectionId": "faq"}))
        .send()
        .await
        .unwrap();
    assert_eq!(again.status(), 429);

    server.shutdown().await;
    assert_eq!(staged_files(&fixture.download_dir), 0);
}

#[tokio::test]
async fn disabled_gateway_serves_files_unchanged() {
    let fixture = Fixture::new();
    let server = TestServer::spawn(fixture.state(fixture.config(GatewayConfig::default()))).await;

    let response = reqwest::get(server.url("/file/read/report.pdf?token=tok-report"))
        .await
        .unwrap();

    assert_eq!(response.status(), 200);
    assert_eq!(response.bytes().await.unwrap(), vec![b'r'; REPORT_LEN]);

    let health: Value = reqwest::get(server.url("/health"))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(health["gateway"], false);

    server.shutdown().await;
    assert_eq!(staged_files(&fixture.download_dir), 0);
}
