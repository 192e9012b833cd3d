//! Store fixtures and a server harness bound to a random port

use async_trait::async_trait;
use futures::StreamExt;
use sealed_files::api::{self, AppState};
use sealed_files::content::{Bucket, FsContentStore, StaticFileTokens};
use sealed_files::export::{DatasetRows, ExportQuery, ExportRow, RowCursor};
use sealed_files::{Config, Error, GatewayConfig, Result};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::TempDir;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

/// Size of the stored dataset file `dataset/report`
pub const REPORT_LEN: usize = 1000;

/// Temp directories backing one test server
pub struct Fixture {
    pub store_root: PathBuf,
    pub download_dir: PathBuf,
    pub upload_dir: PathBuf,
    _temp: TempDir,
}

impl Fixture {
    /// Store layout: `dataset/report` granted by `tok-report`, `chat/hello`
    /// (text/plain) granted by `tok-hello`
    pub fn new() -> Self {
        let temp = tempfile::tempdir().expect("tempdir");
        let store_root = temp.path().join("store");
        std::fs::create_dir_all(store_root.join("dataset")).expect("dataset bucket");
        std::fs::create_dir_all(store_root.join("chat")).expect("chat bucket");
        std::fs::write(store_root.join("dataset/report"), vec![b'r'; REPORT_LEN])
            .expect("write report");
        std::fs::write(store_root.join("chat/hello"), "hello").expect("write hello");
        std::fs::write(
            store_root.join("chat/hello.meta.json"),
            r#"{"contentType": "text/plain", "encoding": "utf-8"}"#,
        )
        .expect("write sidecar");

        Self {
            store_root,
            download_dir: temp.path().join("download"),
            upload_dir: temp.path().join("upload"),
            _temp: temp,
        }
    }

    /// Configuration pointing the staging directories into the fixture
    pub fn config(&self, gateway: GatewayConfig) -> Config {
        let mut config = Config {
            gateway,
            ..Default::default()
        };
        config.staging.download_dir = self.download_dir.clone();
        config.staging.upload_dir = self.upload_dir.clone();
        config
    }

    /// Application state over the fixture store
    pub fn state(&self, config: Config) -> AppState {
        let tokens = StaticFileTokens::new()
            .grant("tok-report", Bucket::Dataset, "report")
            .grant("tok-hello", Bucket::Chat, "hello");

        AppState::new(
            config,
            Arc::new(FsContentStore::new(&self.store_root)),
            Arc::new(tokens),
            Arc::new(FixedDataset),
        )
        .expect("valid configuration")
    }
}

/// Entries left in a staging directory
pub fn staged_files(dir: &Path) -> usize {
    std::fs::read_dir(dir).map(|d| d.count()).unwrap_or(0)
}

/// Collection `faq` with two rows; everything else is unknown
pub struct FixedDataset;

#[async_trait]
impl DatasetRows for FixedDataset {
    async fn open_cursor(&self, query: &ExportQuery) -> Result<RowCursor> {
        if query.collection_id != "faq" {
            return Err(Error::NotFound(format!("collection {}", query.collection_id)));
        }
        let rows = vec![
            ExportRow {
                q: "How are downloads protected?".into(),
                a: "They are encrypted".into(),
            },
            ExportRow {
                q: "Are temp files kept?".into(),
                a: "No".into(),
            },
        ];
        Ok(futures::stream::iter(rows.into_iter().map(Ok)).boxed())
    }
}

/// A server running on 127.0.0.1 with a random port
pub struct TestServer {
    pub addr: SocketAddr,
    stop: Option<oneshot::Sender<()>>,
    handle: JoinHandle<Result<()>>,
}

impl TestServer {
    pub async fn spawn(state: AppState) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("local addr");
        let (stop, stopped) = oneshot::channel::<()>();

        let handle = tokio::spawn(api::serve(listener, state, async move {
            stopped.await.ok();
        }));

        Self {
            addr,
            stop: Some(stop),
            handle,
        }
    }

    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    /// Stop accepting connections and wait for in-flight responses
    pub async fn shutdown(mut self) {
        if let Some(stop) = self.stop.take() {
            stop.send(()).ok();
        }
        (&mut self.handle)
            .await
            .expect("server task")
            .expect("server result");
    }
}
