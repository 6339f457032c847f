use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;

use k8s_openapi::api::core::v1::Namespace;
use kube::api::{Api, DynamicObject, ListParams, PostParams};
use kube::core::GroupVersionKind;
use kube::discovery::Scope;
use kube::Client;
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use bundlekit_common::Error;
use bundlekit_types::{FailedObjectSpec, FailedObjects};

pub mod cleanup;
pub mod nodezip;
pub mod progress;

use cleanup::{
    cleanup_objects, group_of, is_skipped_group_or_kind, kind_of, name_of, namespace_of,
    object_housekeeping, skip_resources, version_of,
};
use progress::ProgressTracker;

/// CRD registrations need a moment to propagate before dependent
/// objects are submitted.
const CRD_QUIESCENCE: Duration = Duration::from_secs(5);

const READINESS_POLL_INTERVAL: Duration = Duration::from_secs(5);

/// Walks the bundle and replays it into the embedded apiserver: YAML to
/// opaque trees, sanitization, dynamic-client creation, then status
/// patches. Failures are collected, never fatal.
pub struct ObjectManager {
    client: Client,
    bundle_path: PathBuf,
    mapping_cache: Mutex<HashMap<String, (kube::discovery::ApiResource, bool)>>,
    failed: Mutex<Vec<FailedObjectSpec>>,
}

impl ObjectManager {
    pub async fn new(config: kube::Config, bundle_path: &Path) -> Result<Self, Error> {
        let client = Client::try_from(config)?;
        Ok(ObjectManager {
            client,
            bundle_path: bundle_path.to_path_buf(),
            mapping_cache: Mutex::new(HashMap::new()),
            failed: Mutex::new(Vec::new()),
        })
    }

    /// Polls the namespace list until the apiserver answers with a
    /// non-empty set, bounded by `timeout`.
    pub async fn wait_for_namespaces(&self, timeout: Duration) -> Result<(), Error> {
        let namespaces: Api<Namespace> = Api::all(self.client.clone());
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if let Ok(list) = namespaces.list(&ListParams::default()).await {
                if !list.items.is_empty() {
                    return Ok(());
                }
            }
            if tokio::time::Instant::now() >= deadline {
                return Err(Error::GenericError(
                    "timed out waiting for apiserver to be ready".to_owned(),
                ));
            }
            tokio::time::sleep(READINESS_POLL_INTERVAL).await;
        }
    }

    /// Loads all cluster-scoped objects: CRDs first, then a quiescence
    /// pause, then everything else with status patched after create.
    pub async fn create_cluster_objects(&self) -> Result<(), Error> {
        let (crd_files, cluster_files) = cluster_object_files(&self.bundle_path)?;

        let crds = load_object_files(&crd_files)?;
        self.apply_objects(crds, false, "cluster CRDs").await?;
        tokio::time::sleep(CRD_QUIESCENCE).await;

        let cluster_objs = load_object_files(&cluster_files)?;
        self.apply_objects(cluster_objs, true, "cluster objects")
            .await
    }

    /// Loads all namespaced objects: non-pods first, then pods and
    /// events (events always after the pods they reference).
    pub async fn create_namespaced_objects(&self) -> Result<(), Error> {
        let (nonpod_files, pod_files) = namespaced_object_files(&self.bundle_path)?;

        let nonpods = load_object_files(&nonpod_files)?;
        self.apply_objects(nonpods, true, "namespaced non-pods")
            .await?;

        let pods = load_object_files(&pod_files)?;
        self.apply_objects(pods, true, "namespaced pods and events")
            .await
    }

    /// Loads the objects synthesized from the per-node side archives.
    pub async fn create_node_zip_objects(&self) -> Result<(), Error> {
        let objs = nodezip::process_node_zip_objects(&self.bundle_path)?;
        self.apply_objects(objs, false, "node archives").await
    }

    /// Writes the FailedObjects record as the final loading step. Its
    /// presence means loading completed with non-fatal gaps.
    pub async fn create_failed_objects_list(&self) -> Result<(), Error> {
        let failed = self.failed.lock().unwrap().clone();
        info!("recording {} failed objects", failed.len());

        let mut record = serde_json::to_value(FailedObjects::new())?;
        record["spec"] = serde_json::to_value(&failed)?;
        self.apply_object(&record, false).await
    }

    pub fn failed_objects(&self) -> Vec<FailedObjectSpec> {
        self.failed.lock().unwrap().clone()
    }

    /// Applies a batch serially, skipping control-plane-owned objects
    /// and recording per-object errors without aborting the batch.
    pub async fn apply_objects(
        &self,
        objs: Vec<Value>,
        patch_status: bool,
        phase: &str,
    ) -> Result<(), Error> {
        let total = objs.len();
        let mut tracker = ProgressTracker::new(phase);
        for (index, mut obj) in objs.into_iter().enumerate() {
            tracker.progress(index + 1, total);

            if is_skipped_group_or_kind(&obj) || skip_resources(&obj) {
                debug!("skipping {} {}", kind_of(&obj), name_of(&obj));
                continue;
            }

            cleanup_objects(&mut obj);
            object_housekeeping(&mut obj)?;

            if let Err(e) = self.apply_object(&obj, patch_status).await {
                let failure = FailedObjectSpec {
                    gvk: gvk_string(&obj),
                    name: name_of(&obj),
                    namespace: namespace_of(&obj),
                    error: e.to_string(),
                };
                warn!(
                    "failed to load {} {}/{}: {}",
                    failure.gvk, failure.namespace, failure.name, failure.error
                );
                self.failed.lock().unwrap().push(failure);
            }
        }
        Ok(())
    }

    async fn apply_object(&self, obj: &Value, patch_status: bool) -> Result<(), Error> {
        let gvk = GroupVersionKind::gvk(&group_of(obj), &version_of(obj), &kind_of(obj));
        let (ar, namespaced) = self.rest_mapping(&gvk).await?;

        let api: Api<DynamicObject> = if namespaced {
            let namespace = match namespace_of(obj).as_str() {
                "" => "default".to_owned(),
                ns => ns.to_owned(),
            };
            Api::namespaced_with(self.client.clone(), &namespace, &ar)
        } else {
            Api::all_with(self.client.clone(), &ar)
        };

        let name = name_of(obj);
        let dynamic: DynamicObject = serde_json::from_value(obj.clone())?;
        let mut applied = match api.create(&PostParams::default(), &dynamic).await {
            Ok(created) => created,
            Err(kube::Error::Api(ae)) if ae.code == 409 => api.get(&name).await?,
            Err(e) => return Err(e.into()),
        };

        if patch_status {
            if let Some(status) = obj.get("status") {
                applied.data["status"] = status.clone();
                let serialized = serde_json::to_vec(&applied)?;
                match api
                    .replace_status(&name, &PostParams::default(), serialized)
                    .await
                {
                    Ok(_) => {}
                    // The object may have been evicted in the gap.
                    Err(kube::Error::Api(ae)) if ae.code == 404 => {}
                    Err(e) => return Err(e.into()),
                }
            }
        }
        Ok(())
    }

    /// Resolves a group-version-kind to its REST mapping, caching the
    /// answer. Bundles are read-only snapshots, so a stale entry can
    /// never mislead.
    async fn rest_mapping(
        &self,
        gvk: &GroupVersionKind,
    ) -> Result<(kube::discovery::ApiResource, bool), Error> {
        let key = format!("{}/{}/{}", gvk.group, gvk.version, gvk.kind);
        if let Some(cached) = self.mapping_cache.lock().unwrap().get(&key) {
            return Ok(cached.clone());
        }

        let (ar, caps) = kube::discovery::oneshot::pinned_kind(&self.client, gvk).await?;
        let namespaced = matches!(caps.scope, Scope::Namespaced);
        self.mapping_cache
            .lock()
            .unwrap()
            .insert(key, (ar.clone(), namespaced));
        Ok((ar, namespaced))
    }
}

fn gvk_string(obj: &Value) -> String {
    let group = group_of(obj);
    let version = version_of(obj);
    let kind = kind_of(obj);
    if group.is_empty() {
        format!("{}, Kind={}", version, kind)
    } else {
        format!("{}/{}, Kind={}", group, version, kind)
    }
}

/// Splits the cluster yaml tree into CRD files (applied first) and
/// everything else.
pub(crate) fn cluster_object_files(bundle_path: &Path) -> Result<(Vec<PathBuf>, Vec<PathBuf>), Error> {
    let mut crds = Vec::new();
    let mut others = Vec::new();
    for file in yaml_files(&bundle_path.join("yamls").join("cluster"))? {
        if file.to_string_lossy().contains("apiextensions.k8s.io") {
            crds.push(file);
        } else {
            others.push(file);
        }
    }
    Ok((crds, others))
}

/// Splits the namespaced yaml tree into non-pods and pods. Event files
/// are ordered after pods so their regarding objects exist first.
pub(crate) fn namespaced_object_files(
    bundle_path: &Path,
) -> Result<(Vec<PathBuf>, Vec<PathBuf>), Error> {
    let mut nonpods = Vec::new();
    let mut pods = Vec::new();
    let mut events = Vec::new();
    for file in yaml_files(&bundle_path.join("yamls").join("namespaced"))? {
        let lossy = file.to_string_lossy().into_owned();
        let file_name = file
            .file_name()
            .and_then(|f| f.to_str())
            .unwrap_or_default();
        if file_name == "pods.yaml" && !lossy.contains("metrics.k8s.io") {
            pods.push(file);
        } else if file_name.contains("events") {
            events.push(file);
        } else {
            nonpods.push(file);
        }
    }
    pods.extend(events);
    Ok((nonpods, pods))
}

fn yaml_files(dir: &Path) -> Result<Vec<PathBuf>, Error> {
    if !dir.exists() {
        return Ok(Vec::new());
    }
    let mut files = Vec::new();
    for entry in WalkDir::new(dir).sort_by_file_name() {
        let entry = entry.map_err(|e| Error::GenericError(format!("error during dir walk: {}", e)))?;
        if entry.file_type().is_file() {
            files.push(entry.path().to_path_buf());
        }
    }
    Ok(files)
}

fn load_object_files(files: &[PathBuf]) -> Result<Vec<Value>, Error> {
    let mut objs = Vec::new();
    for file in files {
        objs.extend(load_objects(file)?);
    }
    Ok(objs)
}

/// Parses one bundle yaml file into individual objects. Files are
/// usually single `v1 List` documents, but plain objects and multi-doc
/// streams work too.
pub(crate) fn load_objects(file: &Path) -> Result<Vec<Value>, Error> {
    let content = std::fs::read_to_string(file)?;
    let mut objs = Vec::new();
    for document in serde_yaml::Deserializer::from_str(&content) {
        let value = Value::deserialize(document)?;
        match value {
            Value::Null => {}
            Value::Object(ref map) if map.get("kind").and_then(Value::as_str) == Some("List") => {
                if let Some(items) = map.get("items").and_then(Value::as_array) {
                    objs.extend(items.iter().cloned());
                }
            }
            other => objs.push(other),
        }
    }
    Ok(objs)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn touch(path: &Path) {
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, "kind: List\napiVersion: v1\nitems: []\n").unwrap();
    }

    #[test]
    fn cluster_files_put_crds_first() {
        let tmp = tempfile::tempdir().unwrap();
        let cluster = tmp.path().join("yamls/cluster");
        touch(&cluster.join("apiextensions.k8s.io/v1/customresourcedefinitions.yaml"));
        touch(&cluster.join("v1/nodes.yaml"));
        touch(&cluster.join("storage.k8s.io/v1/storageclasses.yaml"));

        let (crds, others) = cluster_object_files(tmp.path()).unwrap();
        assert_eq!(crds.len(), 1);
        assert!(crds[0].to_string_lossy().contains("apiextensions.k8s.io"));
        assert_eq!(others.len(), 2);
    }

    #[test]
    fn namespaced_files_split_pods_events_and_the_rest() {
        let tmp = tempfile::tempdir().unwrap();
        let namespaced = tmp.path().join("yamls/namespaced");
        touch(&namespaced.join("default/v1/pods.yaml"));
        touch(&namespaced.join("default/v1/events.yaml"));
        touch(&namespaced.join("default/events.k8s.io/v1/events.yaml"));
        touch(&namespaced.join("default/v1/services.yaml"));
        touch(&namespaced.join("default/metrics.k8s.io/v1beta1/pods.yaml"));

        let (nonpods, pods) = namespaced_object_files(tmp.path()).unwrap();
        // metrics pods land in the non-pod bucket and are later skipped
        // by group.
        assert_eq!(nonpods.len(), 2);
        assert_eq!(pods.len(), 3);
        assert!(pods[0].ends_with("default/v1/pods.yaml"));
        assert!(pods[1..]
            .iter()
            .all(|f| f.file_name().unwrap().to_string_lossy().contains("events")));
    }

    #[test]
    fn load_objects_flattens_lists_and_multi_docs() {
        let tmp = tempfile::tempdir().unwrap();
        let list_file = tmp.path().join("list.yaml");
        std::fs::write(
            &list_file,
            r#"
apiVersion: v1
kind: List
items:
- apiVersion: v1
  kind: Pod
  metadata:
    name: a
- apiVersion: v1
  kind: Pod
  metadata:
    name: b
"#,
        )
        .unwrap();
        let objs = load_objects(&list_file).unwrap();
        assert_eq!(objs.len(), 2);
        assert_eq!(objs[1]["metadata"]["name"], "b");

        let multi = tmp.path().join("multi.yaml");
        std::fs::write(
            &multi,
            "apiVersion: v1\nkind: Pod\nmetadata:\n  name: one\n---\napiVersion: v1\nkind: Pod\nmetadata:\n  name: two\n",
        )
        .unwrap();
        let objs = load_objects(&multi).unwrap();
        assert_eq!(objs.len(), 2);
    }

    #[test]
    fn gvk_strings_match_apimachinery_formatting() {
        let core = serde_json::json!({"apiVersion": "v1", "kind": "Pod"});
        assert_eq!(gvk_string(&core), "v1, Kind=Pod");
        let grouped = serde_json::json!({"apiVersion": "apps/v1", "kind": "Deployment"});
        assert_eq!(gvk_string(&grouped), "apps/v1, Kind=Deployment");
    }

    #[test]
    fn missing_trees_are_empty_not_errors() {
        let tmp = tempfile::tempdir().unwrap();
        let (crds, others) = cluster_object_files(tmp.path()).unwrap();
        assert!(crds.is_empty() && others.is_empty());
        let (nonpods, pods) = namespaced_object_files(tmp.path()).unwrap();
        assert!(nonpods.is_empty() && pods.is_empty());
    }
}
