use super::*;
use crate::Config;
use crate::content::{Bucket, FsContentStore, StaticFileTokens};
use crate::export::{DatasetRows, ExportQuery, ExportRow, RowCursor};
use crate::gateway::{
    EncryptParams, GatewayClient, GatewayReply, GatewayTransport, SessionCredential,
};
use async_trait::async_trait;
use axum::body::{Body, Bytes};
use axum::extract::Request;
use axum::extract::connect_info::MockConnectInfo;
use axum::http::{HeaderMap, StatusCode};
use futures::StreamExt;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use tempfile::TempDir;
use tower::ServiceExt;


const SEAL: &[u8] = b"SEALED:";

/// Gateway that seals files in place by prefixing a marker
#[derive(Default)]
struct SealingGateway {
    encrypts: AtomicUsize,
    decrypts: AtomicUsize,
    reject: AtomicBool,
}

fn reply(code: &str) -> GatewayReply {
    GatewayReply {
        code: code.to_string(),
        desc: (code != "0").then(|| "key server offline".to_string()),
        login_id: Some("session-1".to_string()),
    }
}

#[async_trait]
impl GatewayTransport for SealingGateway {
    async fn login(&self, _name: &str, _password: &str) -> crate::Result<GatewayReply> {
        Ok(reply("0"))
    }

    async fn encrypt_file(
        &self,
        _session: &SessionCredential,
        params: &EncryptParams,
    ) -> crate::Result<GatewayReply> {
        self.encrypts.fetch_add(1, Ordering::SeqCst);
        if self.reject.load(Ordering::SeqCst) {
            return Ok(reply("5"));
        }
        let path = &params.files[0];
        let plain = tokio::fs::read(path).await?;
        tokio::fs::write(path, [SEAL, plain.as_slice()].concat()).await?;
        Ok(reply("0"))
    }

    async fn decrypt_file(
        &self,
        _session: &SessionCredential,
        path: &Path,
    ) -> crate::Result<GatewayReply> {
        self.decrypts.fetch_add(1, Ordering::SeqCst);
        let sealed = tokio::fs::read(path).await?;
        let plain = sealed.strip_prefix(SEAL).unwrap_or(&sealed).to_vec();
        tokio::fs::write(path, plain).await?;
        Ok(reply("0"))
    }
}

/// Collections held in memory
#[derive(Default)]
struct MemoryDataset {
    collections: HashMap<String, Vec<ExportRow>>,
}

#[async_trait]
impl DatasetRows for MemoryDataset {
    async fn open_cursor(&self, query: &ExportQuery) -> crate::Result<RowCursor> {
        let rows = self
            .collections
            .get(&query.collection_id)
            .cloned()
            .ok_or_else(|| {
                crate::Error::NotFound(format!("collection {}", query.collection_id))
            })?;
        Ok(futures::stream::iter(rows.into_iter().map(Ok)).boxed())
    }
}

struct TestApp {
    state: AppState,
    gateway: Arc<SealingGateway>,
    download_dir: PathBuf,
    upload_dir: PathBuf,
    _temp: TempDir,
}

impl TestApp {
    fn router(&self) -> Router {
        create_router(self.state.clone()).layer(MockConnectInfo(SocketAddr::from((
            [192, 0, 2, 10],
            50000,
        ))))
    }
}

fn test_app() -> TestApp {
    test_app_with(|_| {})
}

/// Store layout:
/// - `dataset/report` (1000 bytes) granted by `tok-dataset`
/// - `chat/notes` (text/plain) granted by `tok-chat`
/// - `tok-gone` grants a dataset file that does not exist
fn test_app_with(configure: impl FnOnce(&mut Config)) -> TestApp {
    let temp = tempfile::tempdir().unwrap();
    let store_root = temp.path().join("store");
    let download_dir = temp.path().join("download");
    let upload_dir = temp.path().join("upload");

    std::fs::create_dir_all(store_root.join("dataset")).unwrap();
    std::fs::create_dir_all(store_root.join("chat")).unwrap();
    std::fs::write(store_root.join("dataset/report"), vec![b'x'; 1000]).unwrap();
    std::fs::write(store_root.join("chat/notes"), "meeting notes").unwrap();
    std::fs::write(
        store_root.join("chat/notes.meta.json"),
        r#"{"contentType": "text/plain"}"#,
    )
    .unwrap();

    let mut config = Config::default();
    config.staging.download_dir = download_dir.clone();
    config.staging.upload_dir = upload_dir.clone();
    config.gateway.base_url = Some("http://gateway.test".into());
    config.gateway.name = Some("svc".into());
    config.gateway.password = Some("pw".into());
    configure(&mut config);

    let gateway = Arc::new(SealingGateway::default());
    let client = GatewayClient::with_transport(
        &config.gateway,
        Arc::clone(&gateway) as Arc<dyn GatewayTransport>,
    );

    let tokens = StaticFileTokens::new()
        .grant("tok-dataset", Bucket::Dataset, "report")
        .grant("tok-chat", Bucket::Chat, "notes")
        .grant("tok-gone", Bucket::Dataset, "deleted");

    let mut dataset = MemoryDataset::default();
    dataset.collections.insert(
        "c1".to_string(),
        vec![
            ExportRow {
                q: "What is sealed?".into(),
                a: "Everything \"important\"".into(),
            },
            ExportRow {
                q: "q2".into(),
                a: "a2".into(),
            },
        ],
    );

    let state = AppState::with_gateway(
        config,
        Arc::new(client),
        Arc::new(FsContentStore::new(store_root)),
        Arc::new(tokens),
        Arc::new(dataset),
    );

    TestApp {
        state,
        gateway,
        download_dir,
        upload_dir,
        _temp: temp,
    }
}

/// Send a request and read the whole response body
async fn send(app: Router, request: Request) -> (StatusCode, HeaderMap, Bytes) {
    let response = app.oneshot(request).await.unwrap();
    let status = response.status();
    let headers = response.headers().clone();
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    (status, headers, body)
}

fn get(uri: &str) -> Request {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

fn error_code(body: &[u8]) -> String {
    let json: serde_json::Value = serde_json::from_slice(body).unwrap();
    json["error"]["code"].as_str().unwrap_or_default().to_string()
}

fn staged_files(dir: &Path) -> usize {
    std::fs::read_dir(dir).map(|d| d.count()).unwrap_or(0)
}
