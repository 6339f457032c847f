use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};

use serde_json::{json, Value};
use tracing::warn;
use walkdir::WalkDir;
use zip::ZipArchive;

use bundlekit_common::Error;
use bundlekit_types::{NodeConfig, NodeConfigSpec, NODE_INFO_NAMESPACE};

use crate::crd;

/// Directory inside the bundle holding per-node side archives.
pub const NODE_DIR: &str = "nodes";

/// Reads every node archive and synthesizes the objects that make the
/// node browsable: the node-info namespace with its default service
/// account, one pseudo-pod per node (a container per log file) and a
/// NodeConfig carrying the host files. The custom resource definitions
/// come first so the NodeConfigs have a home.
pub fn process_node_zip_objects(bundle_path: &Path) -> Result<Vec<Value>, Error> {
    let mut objs = crd::objects();
    objs.push(node_info_namespace());
    objs.push(node_info_sa_secret());
    objs.push(node_info_service_account());

    for zip_file in node_zip_list(bundle_path)? {
        let (pod, node_config) = walk_zip_file(&zip_file)?;
        match pod {
            Some(pod) => objs.push(pod),
            None => warn!(
                "node archive {} has no logs, emitting its NodeConfig alone",
                zip_file.display()
            ),
        }
        objs.push(node_config);
    }
    Ok(objs)
}

/// Absolute paths of every `nodes/<node>.zip` in the bundle. A bundle
/// without a nodes directory simply has no node data.
pub fn node_zip_list(bundle_path: &Path) -> Result<Vec<PathBuf>, Error> {
    let nodes_dir = bundle_path.join(NODE_DIR);
    if !nodes_dir.exists() {
        return Ok(Vec::new());
    }

    let mut zips = Vec::new();
    for entry in WalkDir::new(&nodes_dir).sort_by_file_name() {
        let entry = entry.map_err(|e| Error::GenericError(format!("error during dir walk: {}", e)))?;
        if entry.file_type().is_file()
            && entry.path().extension().map(|e| e == "zip").unwrap_or(false)
        {
            zips.push(entry.path().to_path_buf());
        }
    }
    Ok(zips)
}

/// Builds the pseudo-pod and NodeConfig for one node archive. The pod
/// is `None` when the archive carries no `logs/` entries.
pub fn walk_zip_file(zip_file: &Path) -> Result<(Option<Value>, Value), Error> {
    let node_name = zip_file
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or_default()
        .to_owned();

    let mut archive = ZipArchive::new(File::open(zip_file)?)?;
    let mut node_config = NodeConfig::new(&node_name, NODE_INFO_NAMESPACE);
    let mut containers = Vec::new();

    for i in 0..archive.len() {
        let mut entry = archive.by_index(i)?;
        if entry.is_dir() {
            continue;
        }
        let entry_name = entry.name().to_owned();

        if entry_name.starts_with("configs/") || entry_name.contains("/configs/") {
            let mut content = Vec::new();
            entry.read_to_end(&mut content)?;
            node_config.spec.push(NodeConfigSpec {
                file_name: entry_name,
                content: String::from_utf8_lossy(&content).into_owned(),
            });
            continue;
        }

        if (entry_name.starts_with("logs/") || entry_name.contains("/logs/"))
            && entry_name.ends_with(".log")
        {
            let container = Path::new(&entry_name)
                .file_stem()
                .and_then(|s| s.to_str())
                .unwrap_or_default()
                .to_owned();
            if !container.is_empty() {
                containers.push(container);
            }
        }
    }

    let pod = if containers.is_empty() {
        None
    } else {
        Some(node_pod(&node_name, &containers))
    };
    Ok((pod, serde_json::to_value(node_config)?))
}

/// A pod-like placeholder: one container per collected log, pinned to
/// the node and fully Running so standard tooling treats it as live.
fn node_pod(node_name: &str, containers: &[String]) -> Value {
    let now = chrono::Utc::now().format("%Y-%m-%dT%H:%M:%SZ").to_string();
    let container_specs: Vec<Value> = containers
        .iter()
        .map(|name| json!({"name": name, "image": "noimage"}))
        .collect();
    let container_statuses: Vec<Value> = containers
        .iter()
        .map(|name| {
            json!({
                "name": name,
                "image": "noimage",
                "imageID": "",
                "ready": true,
                "started": true,
                "restartCount": 0,
                "state": {"running": {"startedAt": now}},
            })
        })
        .collect();
    let conditions: Vec<Value> = ["Initialized", "Ready", "ContainersReady", "PodScheduled"]
        .iter()
        .map(|condition| {
            json!({
                "type": condition,
                "status": "True",
                "lastTransitionTime": now,
            })
        })
        .collect();

    json!({
        "apiVersion": "v1",
        "kind": "Pod",
        "metadata": {
            "name": node_name,
            "namespace": NODE_INFO_NAMESPACE,
        },
        "spec": {
            "nodeName": node_name,
            "containers": container_specs,
        },
        "status": {
            "phase": "Running",
            "startTime": now,
            "conditions": conditions,
            "containerStatuses": container_statuses,
        },
    })
}

fn node_info_namespace() -> Value {
    json!({
        "apiVersion": "v1",
        "kind": "Namespace",
        "metadata": {"name": NODE_INFO_NAMESPACE},
    })
}

fn node_info_service_account() -> Value {
    json!({
        "apiVersion": "v1",
        "kind": "ServiceAccount",
        "metadata": {"name": "default", "namespace": NODE_INFO_NAMESPACE},
        "secrets": [{
            "name": "default",
            "kind": "Secret",
            "apiVersion": "v1",
            "namespace": NODE_INFO_NAMESPACE,
        }],
    })
}

fn node_info_sa_secret() -> Value {
    json!({
        "apiVersion": "v1",
        "kind": "Secret",
        "metadata": {"name": "default", "namespace": NODE_INFO_NAMESPACE},
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_node_zip(bundle: &Path, node: &str, logs: &[&str], configs: &[&str]) {
        let nodes = bundle.join(NODE_DIR);
        std::fs::create_dir_all(&nodes).unwrap();
        let file = File::create(nodes.join(format!("{}.zip", node))).unwrap();
        let mut writer = zip::ZipWriter::new(file);
        let options = zip::write::FileOptions::default();
        for log in logs {
            writer.start_file(format!("logs/{}.log", log), options).unwrap();
            writer.write_all(b"log content\n").unwrap();
        }
        for config in configs {
            writer.start_file(format!("configs/{}", config), options).unwrap();
            writer.write_all(b"config content\n").unwrap();
        }
        writer.finish().unwrap();
    }

    #[test]
    fn finds_node_archives() {
        let tmp = tempfile::tempdir().unwrap();
        write_node_zip(tmp.path(), "node1", &["rke2-server"], &[]);

        let list = node_zip_list(tmp.path()).unwrap();
        assert_eq!(list.len(), 1);
        assert!(list[0].ends_with("node1.zip"));

        let empty = tempfile::tempdir().unwrap();
        assert!(node_zip_list(empty.path()).unwrap().is_empty());
    }

    #[test]
    fn synthesizes_pod_and_node_config_from_an_archive() {
        let tmp = tempfile::tempdir().unwrap();
        write_node_zip(
            tmp.path(),
            "node1",
            &["rke2-server", "kubelet", "containerd"],
            &["rke2/config.yaml", "hosts"],
        );

        let list = node_zip_list(tmp.path()).unwrap();
        let (pod, node_config) = walk_zip_file(&list[0]).unwrap();
        let pod = pod.unwrap();

        assert_eq!(pod["metadata"]["name"], "node1");
        assert_eq!(pod["metadata"]["namespace"], NODE_INFO_NAMESPACE);
        assert_eq!(pod["spec"]["nodeName"], "node1");
        assert_eq!(pod["spec"]["containers"].as_array().unwrap().len(), 3);
        assert_eq!(pod["status"]["phase"], "Running");
        assert_eq!(pod["status"]["conditions"].as_array().unwrap().len(), 4);
        assert_eq!(pod["status"]["containerStatuses"].as_array().unwrap().len(), 3);

        assert_eq!(node_config["spec"].as_array().unwrap().len(), 2);
        assert_eq!(node_config["spec"][0]["fileName"], "configs/rke2/config.yaml");
    }

    #[test]
    fn archive_without_logs_emits_node_config_alone() {
        let tmp = tempfile::tempdir().unwrap();
        write_node_zip(tmp.path(), "node2", &[], &["hosts"]);

        let list = node_zip_list(tmp.path()).unwrap();
        let (pod, node_config) = walk_zip_file(&list[0]).unwrap();
        assert!(pod.is_none());
        assert_eq!(node_config["spec"].as_array().unwrap().len(), 1);
    }

    #[test]
    fn object_stream_starts_with_crds_and_namespace() {
        let tmp = tempfile::tempdir().unwrap();
        write_node_zip(tmp.path(), "node1", &["kubelet"], &[]);

        let objs = process_node_zip_objects(tmp.path()).unwrap();
        assert_eq!(objs[0]["kind"], "CustomResourceDefinition");
        assert_eq!(objs[1]["kind"], "CustomResourceDefinition");
        assert_eq!(objs[2]["kind"], "Namespace");
        assert_eq!(objs[3]["kind"], "Secret");
        assert_eq!(objs[4]["kind"], "ServiceAccount");
        assert!(objs.iter().any(|o| o["kind"] == "Pod"));
        assert!(objs.iter().any(|o| o["kind"] == "NodeConfig"));
    }
}
