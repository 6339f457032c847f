use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

use axum::routing::get;
use axum::{Json, Router};
use axum_server::tls_rustls::RustlsConfig;
use axum_server::Handle;
use serde_json::json;
use tokio_util::sync::CancellationToken;
use tracing::info;

use bundlekit_common::Error;

use crate::certs::CertInfo;

pub const CLIENT_PORT: u16 = 2379;
pub const PEER_PORT: u16 = 2380;

/// How long to wait for the store's listeners before giving up.
const READY_TIMEOUT: Duration = Duration::from_secs(60);

/// Handle on the embedded key-value store backing the apiserver. The
/// apiserver accesses it in-process; the TLS listeners on the etcd
/// client and peer ports serve health probes for parity with a real
/// etcd deployment.
#[derive(Clone)]
pub struct StoreHandle {
    db: sled::Db,
}

impl StoreHandle {
    /// Opens (or creates) the store under `<dir>/embedded` without
    /// starting the listeners. The handle is what the apiserver uses.
    pub fn open(dir: &Path) -> Result<Self, Error> {
        let data_dir = dir.join("embedded");
        std::fs::create_dir_all(&data_dir)?;
        Ok(StoreHandle {
            db: sled::open(data_dir)?,
        })
    }

    pub fn get(&self, key: &str) -> Result<Option<Vec<u8>>, Error> {
        Ok(self.db.get(key)?.map(|v| v.to_vec()))
    }

    /// Inserts a new key. Returns false without modifying anything when
    /// the key already exists.
    pub fn insert_new(&self, key: &str, value: &[u8]) -> Result<bool, Error> {
        let result = self
            .db
            .compare_and_swap(key, None as Option<&[u8]>, Some(value))?;
        Ok(result.is_ok())
    }

    pub fn put(&self, key: &str, value: &[u8]) -> Result<(), Error> {
        self.db.insert(key, value)?;
        Ok(())
    }

    pub fn remove(&self, key: &str) -> Result<Option<Vec<u8>>, Error> {
        Ok(self.db.remove(key)?.map(|v| v.to_vec()))
    }

    pub fn list_prefix(&self, prefix: &str) -> Result<Vec<(String, Vec<u8>)>, Error> {
        let mut entries = Vec::new();
        for item in self.db.scan_prefix(prefix) {
            let (key, value) = item?;
            entries.push((String::from_utf8_lossy(&key).into_owned(), value.to_vec()));
        }
        Ok(entries)
    }

    /// Monotonically increasing revision, used as resourceVersion.
    pub fn next_revision(&self) -> Result<u64, Error> {
        Ok(self.db.generate_id()?)
    }
}

pub struct EmbeddedStore {
    pub handle: StoreHandle,
    pub endpoints: Vec<String>,
}

/// Opens the store under `<dir>/embedded` and brings up the client and
/// peer listeners. TLS is mandatory when certs are handed in (the
/// production simulator) and skipped otherwise (unit tests). Readiness
/// is awaited before returning; shutdown follows the cancellation token.
pub async fn run_embedded_store(
    cancel: CancellationToken,
    dir: &Path,
    certs: Option<&CertInfo>,
) -> Result<EmbeddedStore, Error> {
    info!("creating embedded store");
    let handle = StoreHandle::open(dir)?;

    let scheme = if certs.is_some() { "https" } else { "http" };
    let app = health_router(handle.clone());

    let mut endpoints = Vec::new();
    for port in [CLIENT_PORT, PEER_PORT] {
        let addr: SocketAddr = ([127, 0, 0, 1], port).into();
        let server_handle = Handle::new();
        spawn_listener(app.clone(), addr, certs, server_handle.clone(), cancel.clone()).await?;

        // The listener is ready once it is bound; a hung bind means the
        // port is wedged and the simulator should not proceed.
        match tokio::time::timeout(READY_TIMEOUT, server_handle.listening()).await {
            Ok(Some(bound)) => endpoints.push(format!("{}://{}", scheme, bound)),
            Ok(None) | Err(_) => {
                return Err(Error::GenericError(
                    "store took too long to start".to_owned(),
                ))
            }
        }
    }

    Ok(EmbeddedStore { handle, endpoints })
}

async fn spawn_listener(
    app: Router,
    addr: SocketAddr,
    certs: Option<&CertInfo>,
    server_handle: Handle,
    cancel: CancellationToken,
) -> Result<(), Error> {
    let shutdown_handle = server_handle.clone();
    tokio::spawn(async move {
        cancel.cancelled().await;
        shutdown_handle.graceful_shutdown(Some(Duration::from_secs(5)));
    });

    match certs {
        Some(certs) => {
            let tls = RustlsConfig::from_pem_file(&certs.etcd_peer_cert, &certs.etcd_peer_cert_key)
                .await?;
            tokio::spawn(async move {
                let _ = axum_server::bind_rustls(addr, tls)
                    .handle(server_handle)
                    .serve(app.into_make_service())
                    .await;
            });
        }
        None => {
            tokio::spawn(async move {
                let _ = axum_server::bind(addr)
                    .handle(server_handle)
                    .serve(app.into_make_service())
                    .await;
            });
        }
    }
    Ok(())
}

fn health_router(handle: StoreHandle) -> Router {
    Router::new()
        .route("/health", get(health))
        .with_state(handle)
}

async fn health(
    axum::extract::State(handle): axum::extract::State<StoreHandle>,
) -> Json<serde_json::Value> {
    let healthy = handle.next_revision().is_ok();
    Json(json!({ "health": healthy.to_string() }))
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::StoreHandle;
    use std::path::Path;

    /// Opens a throwaway store for handler-level tests.
    pub fn open(dir: &Path) -> StoreHandle {
        StoreHandle::open(dir).unwrap()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn open_handle(tmp: &tempfile::TempDir) -> StoreHandle {
        test_support::open(tmp.path())
    }

    #[test]
    fn insert_new_refuses_existing_keys() {
        let tmp = tempfile::tempdir().unwrap();
        let handle = open_handle(&tmp);

        assert!(handle.insert_new("registry/core/pods/demo/a", b"one").unwrap());
        assert!(!handle.insert_new("registry/core/pods/demo/a", b"two").unwrap());
        assert_eq!(
            handle.get("registry/core/pods/demo/a").unwrap().unwrap(),
            b"one"
        );
    }

    #[test]
    fn prefix_scans_are_namespace_scoped() {
        let tmp = tempfile::tempdir().unwrap();
        let handle = open_handle(&tmp);

        handle.put("registry/core/pods/demo/a", b"1").unwrap();
        handle.put("registry/core/pods/demo/b", b"2").unwrap();
        handle.put("registry/core/pods/other/c", b"3").unwrap();

        let demo = handle.list_prefix("registry/core/pods/demo/").unwrap();
        assert_eq!(demo.len(), 2);
        let all = handle.list_prefix("registry/core/pods/").unwrap();
        assert_eq!(all.len(), 3);
    }

    #[test]
    fn revisions_increase() {
        let tmp = tempfile::tempdir().unwrap();
        let handle = open_handle(&tmp);
        let first = handle.next_revision().unwrap();
        let second = handle.next_revision().unwrap();
        assert!(second > first);
    }

    #[tokio::test]
    async fn store_comes_up_without_tls_for_tests() {
        let tmp = tempfile::tempdir().unwrap();
        let cancel = CancellationToken::new();
        // Plain HTTP keeps the unit test free of cert material.
        let store = run_embedded_store(cancel.clone(), tmp.path(), None).await;
        cancel.cancel();
        let store = store.unwrap();
        assert_eq!(store.endpoints.len(), 2);
        assert!(store.endpoints[0].starts_with("http://127.0.0.1:"));
    }
}
