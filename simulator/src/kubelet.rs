use std::fs::File;
use std::io::Read;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Path as UrlPath, Query, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use axum_server::tls_rustls::RustlsConfig;
use axum_server::Handle;
use rustls::server::WebPkiClientVerifier;
use rustls::RootCertStore;
use serde::Deserialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use zip::ZipArchive;

use bundlekit_common::Error;
use bundlekit_types::NODE_INFO_NAMESPACE;

use crate::certs::CertInfo;

pub const KUBELET_PORT: u16 = 10250;

/// Client certificate policy for the kubelet endpoint. The simulator
/// accepts anonymous reads; stricter deployments require a verified
/// client certificate signed by the simulator CA.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ClientAuthPolicy {
    NoAuth,
    RequireVerified,
}

/// A TLS HTTP endpoint implementing only the container-logs route,
/// streaming from the bundle on disk.
pub struct KubeletSimulator {
    certs: CertInfo,
    bundle_path: PathBuf,
    policy: ClientAuthPolicy,
}

#[derive(Clone)]
struct KubeletState {
    bundle_path: PathBuf,
}

impl KubeletSimulator {
    pub fn new(
        certs: CertInfo,
        bundle_path: PathBuf,
        policy: ClientAuthPolicy,
    ) -> Result<Self, Error> {
        if !bundle_path.exists() {
            return Err(Error::ConfigError(format!(
                "bundle path {} does not exist",
                bundle_path.display()
            )));
        }
        Ok(KubeletSimulator {
            certs,
            bundle_path,
            policy,
        })
    }

    /// Serves `GET /containerLogs/{ns}/{pod}/{container}` until the
    /// cancellation token fires.
    pub async fn run(&self, cancel: CancellationToken) -> Result<(), Error> {
        let state = KubeletState {
            bundle_path: self.bundle_path.clone(),
        };
        let app = Router::new()
            .route(
                "/containerLogs/{namespace}/{pod}/{container}",
                get(container_logs),
            )
            .with_state(state);

        let addr: SocketAddr = ([127, 0, 0, 1], KUBELET_PORT).into();
        let tls = self.tls_config()?;

        let handle = Handle::new();
        let shutdown_handle = handle.clone();
        tokio::spawn(async move {
            cancel.cancelled().await;
            shutdown_handle.graceful_shutdown(Some(Duration::from_secs(5)));
        });

        info!("fake kubelet listening on 127.0.0.1:{}", KUBELET_PORT);
        axum_server::bind_rustls(addr, tls)
            .handle(handle)
            .serve(app.into_make_service())
            .await?;
        Ok(())
    }

    fn tls_config(&self) -> Result<RustlsConfig, Error> {
        let cert_pem = std::fs::read(&self.certs.kubelet_cert)?;
        let certs: Vec<_> =
            rustls_pemfile::certs(&mut cert_pem.as_slice()).collect::<Result<_, _>>()?;
        let key_pem = std::fs::read(&self.certs.kubelet_cert_key)?;
        let key = rustls_pemfile::private_key(&mut key_pem.as_slice())?
            .ok_or_else(|| Error::GenericError("no private key for kubelet".to_owned()))?;

        let builder = rustls::ServerConfig::builder();
        let config = match self.policy {
            ClientAuthPolicy::NoAuth => builder
                .with_no_client_auth()
                .with_single_cert(certs, key)?,
            ClientAuthPolicy::RequireVerified => {
                let ca_pem = std::fs::read(&self.certs.ca_cert)?;
                let mut roots = RootCertStore::empty();
                for cert in rustls_pemfile::certs(&mut ca_pem.as_slice()) {
                    roots.add(cert?)?;
                }
                let verifier = WebPkiClientVerifier::builder(Arc::new(roots))
                    .build()
                    .map_err(|e| Error::GenericError(e.to_string()))?;
                builder
                    .with_client_cert_verifier(verifier)
                    .with_single_cert(certs, key)?
            }
        };
        Ok(RustlsConfig::from_config(Arc::new(config)))
    }
}

#[derive(Deserialize)]
struct LogOptions {
    #[serde(default)]
    previous: bool,
}

async fn container_logs(
    State(state): State<KubeletState>,
    UrlPath((namespace, pod, container)): UrlPath<(String, String, String)>,
    Query(options): Query<LogOptions>,
) -> Response {
    debug!(
        "get logs for pod {}/{} container {} (previous: {})",
        namespace, pod, container, options.previous
    );
    match read_log_file(&state.bundle_path, &namespace, &pod, &container, options.previous) {
        Ok(content) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/plain")],
            content,
        )
            .into_response(),
        Err(e) => {
            debug!("log not available: {}", e);
            StatusCode::NOT_FOUND.into_response()
        }
    }
}

/// Reads one container log from the bundle. Pseudo-pods in the
/// node-info namespace read from the node's side archive; everything
/// else reads the streamed log tree.
pub fn read_log_file(
    bundle_path: &Path,
    namespace: &str,
    pod: &str,
    container: &str,
    previous: bool,
) -> Result<Vec<u8>, Error> {
    if namespace == NODE_INFO_NAMESPACE {
        return read_zip_log(bundle_path, pod, container);
    }

    let suffix = if previous { ".log.1" } else { ".log" };
    let path = bundle_path
        .join("logs")
        .join(namespace)
        .join(pod)
        .join(format!("{}{}", container, suffix));
    Ok(std::fs::read(path)?)
}

fn read_zip_log(bundle_path: &Path, node: &str, container: &str) -> Result<Vec<u8>, Error> {
    let zip_path = bundle_path.join("nodes").join(format!("{}.zip", node));
    let mut archive = ZipArchive::new(File::open(&zip_path)?)?;
    let wanted = format!("{}.log", container);

    for i in 0..archive.len() {
        let mut entry = archive.by_index(i)?;
        if entry.is_dir() {
            continue;
        }
        let matches = Path::new(entry.name())
            .file_name()
            .map(|f| f == wanted.as_str())
            .unwrap_or(false);
        if matches {
            let mut content = Vec::new();
            entry.read_to_end(&mut content)?;
            return Ok(content);
        }
    }
    Err(Error::GenericError(format!(
        "could not find log file name {}.log",
        container
    )))
}
