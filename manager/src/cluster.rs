use std::collections::HashSet;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use futures::TryStreamExt;
use k8s_openapi::api::core::v1::{Namespace, Pod};
use kube::api::{Api, ListParams, LogParams};
use kube::{Client, ResourceExt};
use serde_json::Value;
use tokio::io::{AsyncWriteExt, BufWriter};
use tracing::{debug, info};

use bundlekit_common::Error;
use bundlekit_types::{BundleMeta, BUNDLE_VERSION};

use crate::collectors::{get_all_support_bundle_yamls, init_module_collector, CommonModule};
use crate::discovery::{DiscoveryClient, GroupResource};

/// Sink capacity for pod log copies. Logs can be arbitrarily large, so
/// the copy goes through a bounded buffer instead of accumulating the
/// stream in memory.
const LOG_SINK_CAPACITY: usize = 64 * 1024;

/// Append-only handle on `bundleGenerationError.log`. Collection
/// failures are narrated here instead of aborting the bundle; write
/// failures on the log itself are swallowed.
#[derive(Clone)]
pub struct ErrorLog {
    inner: Arc<Mutex<std::fs::File>>,
}

impl ErrorLog {
    pub fn create(path: &Path) -> Result<Self, Error> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = std::fs::File::create(path)?;
        Ok(ErrorLog {
            inner: Arc::new(Mutex::new(file)),
        })
    }

    pub fn write(&self, args: std::fmt::Arguments<'_>) {
        let mut file = self.inner.lock().unwrap();
        let _ = writeln!(file, "{}", args);
    }
}

/// Serializes `obj` as YAML at `path`, creating parent directories.
/// Failures are reported to the bundle error log, never propagated.
pub fn encode_to_yaml_file(obj: &Value, path: &Path, err_log: &ErrorLog) {
    if let Err(e) = try_encode(obj, path) {
        err_log.write(format_args!(
            "Support Bundle: failed to generate {}: {}",
            path.display(),
            e
        ));
    }
}

fn try_encode(obj: &Value, path: &Path) -> Result<(), Error> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let file = std::fs::File::create(path)?;
    serde_yaml::to_writer(file, obj)?;
    Ok(())
}

/// Builds the deterministic archive name from the project namespace UID
/// and the creation timestamp (colons are not filename-safe).
pub fn bundle_file_name(project_namespace_uuid: &str, created_at: &str) -> String {
    format!(
        "supportbundle_{}_{}.zip",
        project_namespace_uuid,
        created_at.replace(':', "-")
    )
}

/// Generates the cluster portion of the bundle: metadata, resource
/// manifests from every collector module, and per-container pod logs.
pub struct ClusterBundle {
    client: Client,
    discovery: Arc<DiscoveryClient>,
    pod_namespace: String,
    namespaces: Vec<String>,
    collectors: Vec<String>,
    exclude: Vec<GroupResource>,
    issue_url: String,
    description: String,
}

impl ClusterBundle {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        client: Client,
        pod_namespace: String,
        namespaces: Vec<String>,
        collectors: Vec<String>,
        exclude: Vec<GroupResource>,
        issue_url: String,
        description: String,
    ) -> Self {
        let discovery = Arc::new(DiscoveryClient::new(client.clone()));
        ClusterBundle {
            client,
            discovery,
            pod_namespace,
            namespaces,
            collectors,
            exclude,
            issue_url,
            description,
        }
    }

    /// Produces `metadata.yaml`, the `yamls/` tree and the `logs/` tree
    /// under `bundle_dir`, returning the archive file name this run will
    /// eventually be packaged under.
    pub async fn generate(&self, bundle_dir: &Path, err_log: &ErrorLog) -> Result<String, Error> {
        debug!("generating cluster bundle");

        let namespaces: Api<Namespace> = Api::all(self.client.clone());
        let project_namespace = namespaces.get(&self.pod_namespace).await?;
        let project_namespace_uuid = project_namespace.metadata.uid.clone().unwrap_or_default();

        let version = self.client.apiserver_version().await?;
        let created_at = chrono::Utc::now().format("%Y-%m-%dT%H:%M:%SZ").to_string();

        let meta = BundleMeta {
            project_name: env!("CARGO_PKG_NAME").to_owned(),
            project_version: env!("CARGO_PKG_VERSION").to_owned(),
            bundle_version: BUNDLE_VERSION.to_owned(),
            kubernetes_version: version.git_version,
            project_namespace_uuid: project_namespace_uuid.clone(),
            bundle_created_at: created_at.clone(),
            issue_url: self.issue_url.clone(),
            issue_description: self.description.clone(),
        };
        let bundle_name = bundle_file_name(&project_namespace_uuid, &created_at);

        let meta_value = serde_json::to_value(&meta)?;
        encode_to_yaml_file(&meta_value, &bundle_dir.join("metadata.yaml"), err_log);

        let yamls_dir = bundle_dir.join("yamls");
        let mut modules = Vec::new();
        for module_name in &self.collectors {
            let common = CommonModule {
                discovery: self.discovery.clone(),
                yamls_dir: yamls_dir.clone(),
                namespaces: self.namespaces.clone(),
                exclude: self.exclude.clone(),
                err_log: err_log.clone(),
            };
            match init_module_collector(module_name, common) {
                Some(module) => modules.push(module),
                None => info!("skipping unknown collector module {}", module_name),
            }
        }
        get_all_support_bundle_yamls(&modules).await;

        let logs_dir = bundle_dir.join("logs");
        self.generate_logs(&logs_dir, err_log).await;

        Ok(bundle_name)
    }

    /// Namespaces whose pod logs are captured: the fixed set plus the
    /// configured ones, first occurrence wins.
    fn log_namespaces(&self) -> Vec<String> {
        let mut seen = HashSet::new();
        ["default", "kube-system", "cattle-system"]
            .into_iter()
            .map(str::to_owned)
            .chain(self.namespaces.iter().cloned())
            .filter(|ns| seen.insert(ns.clone()))
            .collect()
    }

    async fn generate_logs(&self, logs_dir: &Path, err_log: &ErrorLog) {
        for ns in self.log_namespaces() {
            let pods: Api<Pod> = Api::namespaced(self.client.clone(), &ns);
            let pod_list = match pods.list(&ListParams::default()).await {
                Ok(list) => list,
                Err(e) => {
                    err_log.write(format_args!("Support bundle: cannot get pod list: {}", e));
                    continue;
                }
            };

            for pod in pod_list.items {
                let pod_name = pod.name_any();
                let pod_dir = logs_dir.join(&ns).join(&pod_name);
                let containers = pod
                    .spec
                    .as_ref()
                    .map(|spec| spec.containers.clone())
                    .unwrap_or_default();

                for container in containers {
                    self.stream_log(&pods, &pod_dir, &pod_name, &container.name, false, err_log)
                        .await;

                    if restart_count(&pod, &container.name) > 0 {
                        self.stream_log(&pods, &pod_dir, &pod_name, &container.name, true, err_log)
                            .await;
                    }
                }
            }
        }
    }

    async fn stream_log(
        &self,
        pods: &Api<Pod>,
        pod_dir: &Path,
        pod_name: &str,
        container: &str,
        previous: bool,
        err_log: &ErrorLog,
    ) {
        let suffix = if previous { ".log.1" } else { ".log" };
        let path = pod_dir.join(format!("{}{}", container, suffix));
        debug!("prepare to log to file: {}", path.display());
        if let Err(e) = self
            .copy_log_stream(pods, pod_name, container, previous, &path)
            .await
        {
            err_log.write(format_args!(
                "Support bundle: cannot get log for pod {} container {}: {}",
                pod_name, container, e
            ));
        }
    }

    async fn copy_log_stream(
        &self,
        pods: &Api<Pod>,
        pod_name: &str,
        container: &str,
        previous: bool,
        path: &Path,
    ) -> Result<(), Error> {
        let params = LogParams {
            container: Some(container.to_owned()),
            previous,
            timestamps: true,
            ..LogParams::default()
        };
        let mut stream = Box::pin(pods.log_stream(pod_name, &params).await?);

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let file = tokio::fs::File::create(path).await?;
        let mut sink = BufWriter::with_capacity(LOG_SINK_CAPACITY, file);
        while let Some(chunk) = stream.try_next().await? {
            sink.write_all(&chunk).await?;
        }
        sink.flush().await?;
        Ok(())
    }
}

fn restart_count(pod: &Pod, container: &str) -> i32 {
    pod.status
        .as_ref()
        .and_then(|status| status.container_statuses.as_ref())
        .and_then(|statuses| statuses.iter().find(|s| s.name == container))
        .map(|s| s.restart_count)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn bundle_file_name_replaces_colons() {
        let name = bundle_file_name("376a2d6a-81e0", "2023-01-02T03:04:05Z");
        assert_eq!(name, "supportbundle_376a2d6a-81e0_2023-01-02T03-04-05Z.zip");
    }

    #[test]
    fn encode_creates_parent_directories() {
        let tmp = tempfile::tempdir().unwrap();
        let err_log = ErrorLog::create(&tmp.path().join("bundleGenerationError.log")).unwrap();
        let path = tmp.path().join("yamls/cluster/v1/nodes.yaml");
        encode_to_yaml_file(&json!({"kind": "List", "items": []}), &path, &err_log);
        let written = std::fs::read_to_string(&path).unwrap();
        assert!(written.contains("kind: List"));
    }

    #[test]
    fn encode_failures_land_in_the_error_log() {
        let tmp = tempfile::tempdir().unwrap();
        let log_path = tmp.path().join("bundleGenerationError.log");
        let err_log = ErrorLog::create(&log_path).unwrap();

        // Parent "directory" is a regular file, so creation must fail.
        let blocker = tmp.path().join("blocked");
        std::fs::write(&blocker, "file").unwrap();
        encode_to_yaml_file(&json!({}), &blocker.join("out.yaml"), &err_log);

        let log = std::fs::read_to_string(&log_path).unwrap();
        assert!(log.contains("failed to generate"));
    }

    #[test]
    fn restart_count_reads_container_status() {
        let pod: Pod = serde_json::from_value(json!({
            "metadata": {"name": "p"},
            "status": {"containerStatuses": [
                {"name": "app", "restartCount": 3, "image": "", "imageID": "", "ready": true},
            ]},
        }))
        .unwrap();
        assert_eq!(restart_count(&pod, "app"), 3);
        assert_eq!(restart_count(&pod, "other"), 0);
    }
}
