use std::net::SocketAddr;
use std::path::Path;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use axum_server::tls_rustls::RustlsConfig;
use axum_server::Handle;
use base64::Engine;
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;
use tracing::info;

use bundlekit_common::Error;

use crate::certs::CertInfo;
use crate::kubelet::KUBELET_PORT;
use crate::store::StoreHandle;

mod handlers;
mod registry;
mod status;

pub use handlers::{build_router, ApiState, KubeletProxy};
pub use registry::{RegisteredResource, ResourceRegistry};

/// Sentinel service cluster IP used when the bundle does not carry the
/// `default/kubernetes` service. Consumers rely on this exact default.
pub const DEFAULT_SERVICE_CLUSTER_IP: &str = "10.53.0.1";

pub const DEFAULT_CLIENT_QPS: f32 = 100.0;
pub const DEFAULT_CLIENT_BURST: i32 = 100;

pub const APISERVER_PORT: u16 = 6443;

/// Loaded events must survive browsing sessions, not the default hour.
pub const EVENT_TTL: Duration = Duration::from_secs(90 * 24 * 3600);

/// Namespaces present on any live control plane; seeded so that
/// readiness polls observe a working list endpoint.
const SEED_NAMESPACES: &[&str] = &["default", "kube-system", "kube-public", "kube-node-lease"];

/// Configuration for the embedded apiserver: TLS material, the backing
/// store and client tuning for the loader.
pub struct ApiServerConfig {
    pub certs: CertInfo,
    pub store: StoreHandle,
    pub service_cluster_ip: String,
    pub event_ttl: Duration,
    pub qps: f32,
    pub burst: i32,
}

impl ApiServerConfig {
    pub fn new(certs: CertInfo, store: StoreHandle, qps: f32, burst: i32) -> Self {
        ApiServerConfig {
            certs,
            store,
            service_cluster_ip: DEFAULT_SERVICE_CLUSTER_IP.to_owned(),
            event_ttl: EVENT_TTL,
            qps,
            burst,
        }
    }

    /// Brings up the control plane on `127.0.0.1:6443`, TLS only, and
    /// serves until the cancellation token fires.
    pub async fn run(&self, cancel: CancellationToken) -> Result<(), Error> {
        self.seed_namespaces()?;

        let ca_pem = std::fs::read(&self.certs.ca_cert)?;
        let proxy_client = reqwest::Client::builder()
            .add_root_certificate(reqwest::Certificate::from_pem(&ca_pem)?)
            .build()?;
        let state = ApiState {
            store: self.store.clone(),
            registry: Arc::new(RwLock::new(ResourceRegistry::with_builtins())),
            kubelet: Some(KubeletProxy {
                client: proxy_client,
                base_url: format!("https://127.0.0.1:{}", KUBELET_PORT),
            }),
        };
        let app = handlers::build_router(state);

        info!(
            "apiserver starting on 127.0.0.1:{} (service cluster IP range {}/16, event TTL {:?})",
            APISERVER_PORT, self.service_cluster_ip, self.event_ttl
        );

        let addr: SocketAddr = ([127, 0, 0, 1], APISERVER_PORT).into();
        let tls = RustlsConfig::from_pem_file(&self.certs.api_cert, &self.certs.api_cert_key).await?;

        let handle = Handle::new();
        let shutdown_handle = handle.clone();
        tokio::spawn(async move {
            cancel.cancelled().await;
            shutdown_handle.graceful_shutdown(Some(Duration::from_secs(5)));
        });

        axum_server::bind_rustls(addr, tls)
            .handle(handle)
            .serve(app.into_make_service())
            .await?;
        Ok(())
    }

    fn seed_namespaces(&self) -> Result<(), Error> {
        for ns in SEED_NAMESPACES {
            let key = format!("registry/core/namespaces/-/{}", ns);
            let revision = self.store.next_revision()?;
            let obj = json!({
                "apiVersion": "v1",
                "kind": "Namespace",
                "metadata": {
                    "name": ns,
                    "uid": uuid::Uuid::new_v4().to_string(),
                    "resourceVersion": revision.to_string(),
                    "creationTimestamp": chrono::Utc::now().format("%Y-%m-%dT%H:%M:%SZ").to_string(),
                },
                "spec": {"finalizers": ["kubernetes"]},
                "status": {"phase": "Active"},
            });
            // Keep whatever an earlier run persisted.
            let _ = self.store.insert_new(&key, &serde_json::to_vec(&obj)?)?;
        }
        Ok(())
    }

    /// Writes `admin.kubeconfig` with embedded CA and admin client
    /// material, then builds the client configuration the loader uses.
    pub async fn generate_kubeconfig(&self, path: &Path) -> Result<kube::Config, Error> {
        let b64 = base64::engine::general_purpose::STANDARD;
        let ca = b64.encode(std::fs::read(&self.certs.ca_cert)?);
        let cert = b64.encode(std::fs::read(&self.certs.admin_cert)?);
        let key = b64.encode(std::fs::read(&self.certs.admin_cert_key)?);

        let kubeconfig = json!({
            "apiVersion": "v1",
            "kind": "Config",
            "clusters": [{
                "name": "default",
                "cluster": {
                    "server": format!("https://localhost:{}", APISERVER_PORT),
                    "certificate-authority-data": ca,
                },
            }],
            "users": [{
                "name": "default",
                "user": {
                    "client-certificate-data": cert,
                    "client-key-data": key,
                },
            }],
            "contexts": [{
                "name": "default",
                "context": {"cluster": "default", "user": "default"},
            }],
            "current-context": "default",
        });
        let serialized = serde_yaml::to_string(&kubeconfig)?;
        std::fs::write(path, serialized)?;

        let parsed = kube::config::Kubeconfig::read_from(path)?;
        let config = kube::Config::from_custom_kubeconfig(
            parsed,
            &kube::config::KubeConfigOptions::default(),
        )
        .await?;
        info!(
            "client will be configured with QPS: {}, Burst: {}",
            self.qps, self.burst
        );
        Ok(config)
    }
}

/// Derives the service cluster IP from the bundle's observed
/// `default/kubernetes` service, falling back to the documented default
/// when the bundle does not carry it.
pub fn infer_service_cluster_ip(bundle_path: &Path) -> String {
    let services_file = bundle_path
        .join("yamls")
        .join("namespaced")
        .join("default")
        .join("v1")
        .join("services.yaml");
    let content = match std::fs::read_to_string(services_file) {
        Ok(content) => content,
        Err(_) => return DEFAULT_SERVICE_CLUSTER_IP.to_owned(),
    };
    let parsed: Value = match serde_yaml::from_str(&content) {
        Ok(parsed) => parsed,
        Err(_) => return DEFAULT_SERVICE_CLUSTER_IP.to_owned(),
    };
    parsed["items"]
        .as_array()
        .and_then(|items| {
            items
                .iter()
                .find(|item| item.pointer("/metadata/name").and_then(Value::as_str) == Some("kubernetes"))
        })
        .and_then(|svc| svc.pointer("/spec/clusterIP"))
        .and_then(Value::as_str)
        .map(str::to_owned)
        .unwrap_or_else(|| DEFAULT_SERVICE_CLUSTER_IP.to_owned())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_bundle_falls_back_to_the_sentinel_ip() {
        let tmp = tempfile::tempdir().unwrap();
        assert_eq!(infer_service_cluster_ip(tmp.path()), DEFAULT_SERVICE_CLUSTER_IP);
    }

    #[test]
    fn service_ip_is_read_from_the_kubernetes_service() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path().join("yamls/namespaced/default/v1");
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(
            dir.join("services.yaml"),
            r#"
apiVersion: v1
kind: List
items:
- apiVersion: v1
  kind: Service
  metadata:
    name: harvester-cluster-repo
  spec:
    clusterIP: 10.53.35.228
- apiVersion: v1
  kind: Service
  metadata:
    name: kubernetes
  spec:
    clusterIP: 10.53.0.1
"#,
        )
        .unwrap();
        assert_eq!(infer_service_cluster_ip(tmp.path()), "10.53.0.1");
    }
}
