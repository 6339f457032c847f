//! Drives the embedded apiserver the same way the object loader does:
//! CRDs first, then sanitized objects, then the node-zip synthesis,
//! all over the real router.

use std::fs::File;
use std::io::Write;
use std::path::Path;
use std::sync::{Arc, RwLock};

use axum::body::{to_bytes, Body};
use axum::http::{Request, StatusCode};
use axum::Router;
use serde_json::{json, Value};
use tower::util::ServiceExt;

use bundlekit_simulator::apiserver::{build_router, ApiState, ResourceRegistry};
use bundlekit_simulator::objects::cleanup::{cleanup_objects, object_housekeeping};
use bundlekit_simulator::objects::nodezip::process_node_zip_objects;
use bundlekit_simulator::store::StoreHandle;
use bundlekit_simulator::crd;
use bundlekit_types::{FailedObjects, NODE_INFO_NAMESPACE};

fn test_router(tmp: &tempfile::TempDir) -> Router {
    let state = ApiState {
        store: StoreHandle::open(tmp.path()).unwrap(),
        registry: Arc::new(RwLock::new(ResourceRegistry::with_builtins())),
        kubelet: None,
    };
    build_router(state)
}

async fn send(router: &Router, method: &str, uri: &str, body: Option<&Value>) -> (StatusCode, Value) {
    let request = Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json")
        .body(match body {
            Some(v) => Body::from(serde_json::to_vec(v).unwrap()),
            None => Body::empty(),
        })
        .unwrap();
    let response = router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(Value::Null)
    };
    (status, value)
}

/// Where an object of this kind is created, mirroring the dynamic
/// client's URL construction.
fn create_uri(obj: &Value) -> String {
    let api_version = obj["apiVersion"].as_str().unwrap();
    let namespace = obj.pointer("/metadata/namespace").and_then(Value::as_str);
    let plural = match obj["kind"].as_str().unwrap() {
        "CustomResourceDefinition" => "customresourcedefinitions",
        "Namespace" => "namespaces",
        "Secret" => "secrets",
        "ServiceAccount" => "serviceaccounts",
        "Pod" => "pods",
        "NodeConfig" => "nodeconfigs",
        "FailedObjects" => "failedobjects",
        "Ingress" => "ingresses",
        other => panic!("unmapped kind {}", other),
    };
    let (prefix, gv) = if api_version.contains('/') {
        ("apis", api_version.to_owned())
    } else {
        ("api", api_version.to_owned())
    };
    match namespace {
        Some(ns) => format!("/{}/{}/namespaces/{}/{}", prefix, gv, ns, plural),
        None => format!("/{}/{}/{}", prefix, gv, plural),
    }
}

fn write_node_zip(bundle: &Path, node: &str) {
    let nodes = bundle.join("nodes");
    std::fs::create_dir_all(&nodes).unwrap();
    let file = File::create(nodes.join(format!("{}.zip", node))).unwrap();
    let mut writer = zip::ZipWriter::new(file);
    let options = zip::write::FileOptions::default();
    for log in ["rke2-server", "kubelet"] {
        writer.start_file(format!("logs/{}.log", log), options).unwrap();
        writer.write_all(b"line\n").unwrap();
    }
    writer.start_file("configs/rke2/config.yaml", options).unwrap();
    writer.write_all(b"token: redacted\n").unwrap();
    writer.finish().unwrap();
}

#[tokio::test]
async fn node_archives_replay_into_browsable_pods() {
    let store_dir = tempfile::tempdir().unwrap();
    let bundle_dir = tempfile::tempdir().unwrap();
    write_node_zip(bundle_dir.path(), "node1");

    let router = test_router(&store_dir);

    let objs = process_node_zip_objects(bundle_dir.path()).unwrap();
    for mut obj in objs {
        cleanup_objects(&mut obj);
        object_housekeeping(&mut obj).unwrap();
        let uri = create_uri(&obj);
        let (status, body) = send(&router, "POST", &uri, Some(&obj)).await;
        assert_eq!(status, StatusCode::CREATED, "POST {} failed: {}", uri, body);
    }

    // The pseudo-pod is fully Running with one container per log file.
    let (status, pod) = send(
        &router,
        "GET",
        &format!("/api/v1/namespaces/{}/pods/node1", NODE_INFO_NAMESPACE),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(pod["spec"]["nodeName"], "node1");
    assert_eq!(pod["spec"]["containers"].as_array().unwrap().len(), 2);
    assert_eq!(pod["status"]["phase"], "Running");

    // The NodeConfig carries the host files.
    let (status, config) = send(
        &router,
        "GET",
        &format!(
            "/apis/supportbundlekit.io/v1/namespaces/{}/nodeconfigs/node1",
            NODE_INFO_NAMESPACE
        ),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(config["spec"][0]["fileName"], "configs/rke2/config.yaml");

    // The failure record is addressable under its well-known name.
    let record = serde_json::to_value(FailedObjects::new()).unwrap();
    let (status, _) = send(&router, "POST", &create_uri(&record), Some(&record)).await;
    assert_eq!(status, StatusCode::CREATED);
    let (status, fetched) = send(
        &router,
        "GET",
        "/apis/supportbundlekit.io/v1/failedobjects/failedobjects",
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(fetched["kind"], "FailedObjects");
}

#[tokio::test]
async fn legacy_ingress_round_trips_as_networking_v1() {
    let store_dir = tempfile::tempdir().unwrap();
    let router = test_router(&store_dir);

    let mut ingress = json!({
        "apiVersion": "extensions/v1beta1",
        "kind": "Ingress",
        "metadata": {
            "name": "rancher-expose",
            "namespace": "cattle-system",
            "creationTimestamp": "2022-04-11T08:17:02Z",
            "resourceVersion": "58705",
        },
        "spec": {
            "rules": [{
                "http": {
                    "paths": [{
                        "path": "/",
                        "pathType": "Prefix",
                        "backend": {"serviceName": "x", "servicePort": 80},
                    }],
                },
            }],
        },
    });

    cleanup_objects(&mut ingress);
    object_housekeeping(&mut ingress).unwrap();

    // Nothing pre-set reaches the apiserver.
    assert!(ingress.pointer("/metadata/resourceVersion").is_none());

    let uri = create_uri(&ingress);
    assert_eq!(uri, "/apis/networking.k8s.io/v1/namespaces/cattle-system/ingresses");
    let (status, _) = send(&router, "POST", &uri, Some(&ingress)).await;
    assert_eq!(status, StatusCode::CREATED);

    let (status, fetched) = send(
        &router,
        "GET",
        "/apis/networking.k8s.io/v1/namespaces/cattle-system/ingresses/rancher-expose",
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(fetched["apiVersion"], "networking.k8s.io/v1");
    let backend = fetched.pointer("/spec/rules/0/http/paths/0/backend").unwrap();
    assert_eq!(backend["service"]["name"], "x");
    assert_eq!(backend["service"]["port"]["number"], 80);
}

#[tokio::test]
async fn crds_register_and_serve_their_resources() {
    let store_dir = tempfile::tempdir().unwrap();
    let router = test_router(&store_dir);

    for crd_obj in crd::objects() {
        let (status, _) = send(&router, "POST", &create_uri(&crd_obj), Some(&crd_obj)).await;
        assert_eq!(status, StatusCode::CREATED);
    }

    let (status, list) = send(&router, "GET", "/apis/supportbundlekit.io/v1", None).await;
    assert_eq!(status, StatusCode::OK);
    let names: Vec<&str> = list["resources"]
        .as_array()
        .unwrap()
        .iter()
        .filter_map(|r| r["name"].as_str())
        .collect();
    assert!(names.contains(&"nodeconfigs"));
    assert!(names.contains(&"failedobjects"));
}
