use std::sync::{Arc, RwLock};

use axum::body::Body;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::debug;

use crate::apiserver::registry::{RegisteredResource, ResourceRegistry};
use crate::apiserver::status::{
    already_exists, internal, invalid, not_found, status_failure, status_success,
};
use crate::store::StoreHandle;

/// HTTP client used to forward pod log reads to the fake kubelet.
#[derive(Clone)]
pub struct KubeletProxy {
    pub client: reqwest::Client,
    pub base_url: String,
}

#[derive(Clone)]
pub struct ApiState {
    pub store: StoreHandle,
    pub registry: Arc<RwLock<ResourceRegistry>>,
    pub kubelet: Option<KubeletProxy>,
}

pub fn build_router(state: ApiState) -> Router {
    Router::new()
        .route("/version", get(version))
        .route("/api", get(api_versions))
        .route("/api/v1", get(core_resources))
        .route("/apis", get(api_groups))
        .route("/apis/{group}", get(api_group))
        .route("/apis/{group}/{version}", get(group_resources))
        .route(
            "/api/v1/{resource}",
            get(core_list_all).post(core_create_cluster),
        )
        .route(
            "/api/v1/{resource}/{name}",
            get(core_get_cluster)
                .put(core_put_cluster)
                .delete(core_delete_cluster)
                .patch(core_patch_cluster),
        )
        .route(
            "/api/v1/{resource}/{name}/status",
            axum::routing::put(core_put_cluster_status).patch(core_patch_cluster_status),
        )
        .route(
            "/api/v1/namespaces/{ns}/status",
            axum::routing::put(namespace_put_status).patch(namespace_patch_status),
        )
        .route(
            "/api/v1/namespaces/{ns}/{resource}",
            get(core_list_ns).post(core_create_ns),
        )
        .route(
            "/api/v1/namespaces/{ns}/{resource}/{name}",
            get(core_get_ns)
                .put(core_put_ns)
                .delete(core_delete_ns)
                .patch(core_patch_ns),
        )
        .route(
            "/api/v1/namespaces/{ns}/{resource}/{name}/status",
            axum::routing::put(core_put_ns_status).patch(core_patch_ns_status),
        )
        .route("/api/v1/namespaces/{ns}/pods/{name}/log", get(pod_log))
        .route(
            "/apis/{group}/{version}/{resource}",
            get(group_list_all).post(group_create_cluster),
        )
        .route(
            "/apis/{group}/{version}/{resource}/{name}",
            get(group_get_cluster)
                .put(group_put_cluster)
                .delete(group_delete_cluster)
                .patch(group_patch_cluster),
        )
        .route(
            "/apis/{group}/{version}/{resource}/{name}/status",
            axum::routing::put(group_put_cluster_status).patch(group_patch_cluster_status),
        )
        .route(
            "/apis/{group}/{version}/namespaces/{ns}/{resource}",
            get(group_list_ns).post(group_create_ns),
        )
        .route(
            "/apis/{group}/{version}/namespaces/{ns}/{resource}/{name}",
            get(group_get_ns)
                .put(group_put_ns)
                .delete(group_delete_ns)
                .patch(group_patch_ns),
        )
        .route(
            "/apis/{group}/{version}/namespaces/{ns}/{resource}/{name}/status",
            axum::routing::put(group_put_ns_status).patch(group_patch_ns_status),
        )
        .with_state(state)
}

// ---- discovery ----

async fn version() -> Json<Value> {
    Json(json!({
        "major": "1",
        "minor": "22",
        "gitVersion": "v1.22.0+sim",
        "platform": "linux/amd64",
    }))
}

async fn api_versions(State(state): State<ApiState>) -> Json<Value> {
    Json(state.registry.read().unwrap().api_versions())
}

async fn core_resources(State(state): State<ApiState>) -> Response {
    match state.registry.read().unwrap().api_resource_list("", "v1") {
        Some(list) => Json(list).into_response(),
        None => not_found("core resources are not registered".to_owned()),
    }
}

async fn api_groups(State(state): State<ApiState>) -> Json<Value> {
    Json(state.registry.read().unwrap().api_group_list())
}

async fn api_group(State(state): State<ApiState>, Path(group): Path<String>) -> Response {
    match state.registry.read().unwrap().api_group(&group) {
        Some(doc) => Json(doc).into_response(),
        None => not_found(format!("the server could not find group {}", group)),
    }
}

async fn group_resources(
    State(state): State<ApiState>,
    Path((group, version)): Path<(String, String)>,
) -> Response {
    match state
        .registry
        .read()
        .unwrap()
        .api_resource_list(&group, &version)
    {
        Some(list) => Json(list).into_response(),
        None => not_found(format!(
            "the server could not find group version {}/{}",
            group, version
        )),
    }
}

// ---- storage helpers ----

fn group_key(group: &str) -> &str {
    if group.is_empty() {
        "core"
    } else {
        group
    }
}

fn object_key(group: &str, plural: &str, namespace: Option<&str>, name: &str) -> String {
    format!(
        "registry/{}/{}/{}/{}",
        group_key(group),
        plural,
        namespace.unwrap_or("-"),
        name
    )
}

fn list_prefix(group: &str, plural: &str, namespace: Option<&str>) -> String {
    match namespace {
        Some(ns) => format!("registry/{}/{}/{}/", group_key(group), plural, ns),
        None => format!("registry/{}/{}/", group_key(group), plural),
    }
}

fn lookup_resource(
    state: &ApiState,
    group: &str,
    version: &str,
    plural: &str,
) -> Result<RegisteredResource, Response> {
    state
        .registry
        .read()
        .unwrap()
        .lookup(group, version, plural)
        .cloned()
        .ok_or_else(|| {
            not_found(format!(
                "the server could not find the requested resource {}",
                plural
            ))
        })
}

/// RFC 7386 JSON merge patch: objects merge recursively, null removes,
/// everything else replaces.
pub(crate) fn merge_patch(target: &mut Value, patch: &Value) {
    match patch {
        Value::Object(entries) => {
            if !target.is_object() {
                *target = Value::Object(serde_json::Map::new());
            }
            let map = target.as_object_mut().unwrap();
            for (key, value) in entries {
                if value.is_null() {
                    map.remove(key);
                } else {
                    merge_patch(map.entry(key.clone()).or_insert(Value::Null), value);
                }
            }
        }
        other => *target = other.clone(),
    }
}

// ---- generic CRUD ----

fn do_create(
    state: &ApiState,
    reg: &RegisteredResource,
    namespace: Option<String>,
    mut body: Value,
) -> Response {
    let namespace = if reg.namespaced {
        let ns = namespace.or_else(|| {
            body.pointer("/metadata/namespace")
                .and_then(Value::as_str)
                .map(str::to_owned)
        });
        Some(ns.unwrap_or_else(|| "default".to_owned()))
    } else {
        None
    };

    let name = match body.pointer("/metadata/name").and_then(Value::as_str) {
        Some(name) => name.to_owned(),
        None => return invalid("metadata.name is required".to_owned()),
    };

    let revision = match state.store.next_revision() {
        Ok(rev) => rev,
        Err(e) => return internal(e.to_string()),
    };
    let metadata = body["metadata"].as_object_mut();
    if let Some(metadata) = metadata {
        if let Some(ns) = &namespace {
            metadata.insert("namespace".to_owned(), Value::String(ns.clone()));
        }
        metadata
            .entry("uid")
            .or_insert_with(|| Value::String(uuid::Uuid::new_v4().to_string()));
        let needs_timestamp = metadata
            .get("creationTimestamp")
            .map(Value::is_null)
            .unwrap_or(true);
        if needs_timestamp {
            metadata.insert(
                "creationTimestamp".to_owned(),
                Value::String(chrono::Utc::now().format("%Y-%m-%dT%H:%M:%SZ").to_string()),
            );
        }
        metadata.insert(
            "resourceVersion".to_owned(),
            Value::String(revision.to_string()),
        );
    }
    if body.get("apiVersion").is_none() {
        body["apiVersion"] = Value::String(reg.group_version());
    }
    if body.get("kind").is_none() {
        body["kind"] = Value::String(reg.kind.clone());
    }

    let key = object_key(&reg.group, &reg.plural, namespace.as_deref(), &name);
    let serialized = match serde_json::to_vec(&body) {
        Ok(bytes) => bytes,
        Err(e) => return internal(e.to_string()),
    };
    match state.store.insert_new(&key, &serialized) {
        Ok(true) => {}
        Ok(false) => {
            return already_exists(format!("{} \"{}\" already exists", reg.plural, name));
        }
        Err(e) => return internal(e.to_string()),
    }

    if reg.group == "apiextensions.k8s.io" && reg.plural == "customresourcedefinitions" {
        let added = state.registry.write().unwrap().register_crd(&body);
        debug!("registered {} custom resource versions from {}", added, name);
    }

    (StatusCode::CREATED, Json(body)).into_response()
}

fn do_get(
    state: &ApiState,
    reg: &RegisteredResource,
    namespace: Option<&str>,
    name: &str,
) -> Response {
    let key = object_key(&reg.group, &reg.plural, namespace, name);
    match state.store.get(&key) {
        Ok(Some(bytes)) => match serde_json::from_slice::<Value>(&bytes) {
            Ok(obj) => Json(obj).into_response(),
            Err(e) => internal(e.to_string()),
        },
        Ok(None) => not_found(format!("{} \"{}\" not found", reg.plural, name)),
        Err(e) => internal(e.to_string()),
    }
}

fn do_list(state: &ApiState, reg: &RegisteredResource, namespace: Option<&str>) -> Response {
    let prefix = list_prefix(&reg.group, &reg.plural, namespace);
    let entries = match state.store.list_prefix(&prefix) {
        Ok(entries) => entries,
        Err(e) => return internal(e.to_string()),
    };
    let mut items = Vec::new();
    for (_, bytes) in entries {
        match serde_json::from_slice::<Value>(&bytes) {
            Ok(obj) => items.push(obj),
            Err(e) => return internal(e.to_string()),
        }
    }
    let revision = state.store.next_revision().unwrap_or_default();
    Json(json!({
        "kind": format!("{}List", reg.kind),
        "apiVersion": reg.group_version(),
        "metadata": {"resourceVersion": revision.to_string()},
        "items": items,
    }))
    .into_response()
}

fn do_replace(
    state: &ApiState,
    reg: &RegisteredResource,
    namespace: Option<&str>,
    name: &str,
    mut body: Value,
) -> Response {
    if !body.is_object() {
        return invalid("request body must be an object".to_owned());
    }
    let key = object_key(&reg.group, &reg.plural, namespace, name);
    let existing = match state.store.get(&key) {
        Ok(Some(bytes)) => match serde_json::from_slice::<Value>(&bytes) {
            Ok(obj) => obj,
            Err(e) => return internal(e.to_string()),
        },
        Ok(None) => return not_found(format!("{} \"{}\" not found", reg.plural, name)),
        Err(e) => return internal(e.to_string()),
    };

    // Identity fields survive replacement.
    for field in ["uid", "creationTimestamp"] {
        if let Some(value) = existing.pointer(&format!("/metadata/{}", field)) {
            body["metadata"][field] = value.clone();
        }
    }
    match bump_revision(state, &mut body) {
        Ok(()) => {}
        Err(resp) => return resp,
    }
    match serde_json::to_vec(&body) {
        Ok(bytes) => match state.store.put(&key, &bytes) {
            Ok(()) => Json(body).into_response(),
            Err(e) => internal(e.to_string()),
        },
        Err(e) => internal(e.to_string()),
    }
}

fn do_delete(
    state: &ApiState,
    reg: &RegisteredResource,
    namespace: Option<&str>,
    name: &str,
) -> Response {
    let key = object_key(&reg.group, &reg.plural, namespace, name);
    match state.store.remove(&key) {
        Ok(Some(_)) => status_success(format!("{} \"{}\" deleted", reg.plural, name)),
        Ok(None) => not_found(format!("{} \"{}\" not found", reg.plural, name)),
        Err(e) => internal(e.to_string()),
    }
}

fn do_patch(
    state: &ApiState,
    reg: &RegisteredResource,
    namespace: Option<&str>,
    name: &str,
    patch: Value,
    status_only: bool,
) -> Response {
    let key = object_key(&reg.group, &reg.plural, namespace, name);
    let mut existing = match state.store.get(&key) {
        Ok(Some(bytes)) => match serde_json::from_slice::<Value>(&bytes) {
            Ok(obj) => obj,
            Err(e) => return internal(e.to_string()),
        },
        Ok(None) => return not_found(format!("{} \"{}\" not found", reg.plural, name)),
        Err(e) => return internal(e.to_string()),
    };

    if status_only {
        if let Some(status) = patch.get("status") {
            merge_patch(&mut existing["status"], status);
        }
    } else {
        merge_patch(&mut existing, &patch);
    }
    match bump_revision(state, &mut existing) {
        Ok(()) => {}
        Err(resp) => return resp,
    }
    match serde_json::to_vec(&existing) {
        Ok(bytes) => match state.store.put(&key, &bytes) {
            Ok(()) => Json(existing).into_response(),
            Err(e) => internal(e.to_string()),
        },
        Err(e) => internal(e.to_string()),
    }
}

/// Replaces only the status subtree from the submitted object, the
/// semantic of `PUT …/status`.
fn do_replace_status(
    state: &ApiState,
    reg: &RegisteredResource,
    namespace: Option<&str>,
    name: &str,
    body: Value,
) -> Response {
    let key = object_key(&reg.group, &reg.plural, namespace, name);
    let mut existing = match state.store.get(&key) {
        Ok(Some(bytes)) => match serde_json::from_slice::<Value>(&bytes) {
            Ok(obj) => obj,
            Err(e) => return internal(e.to_string()),
        },
        Ok(None) => return not_found(format!("{} \"{}\" not found", reg.plural, name)),
        Err(e) => return internal(e.to_string()),
    };

    match body.get("status") {
        Some(status) => existing["status"] = status.clone(),
        None => {
            if let Some(map) = existing.as_object_mut() {
                map.remove("status");
            }
        }
    }
    match bump_revision(state, &mut existing) {
        Ok(()) => {}
        Err(resp) => return resp,
    }
    match serde_json::to_vec(&existing) {
        Ok(bytes) => match state.store.put(&key, &bytes) {
            Ok(()) => Json(existing).into_response(),
            Err(e) => internal(e.to_string()),
        },
        Err(e) => internal(e.to_string()),
    }
}

fn bump_revision(state: &ApiState, obj: &mut Value) -> Result<(), Response> {
    let revision = state
        .store
        .next_revision()
        .map_err(|e| internal(e.to_string()))?;
    obj["metadata"]["resourceVersion"] = Value::String(revision.to_string());
    Ok(())
}

// ---- core (group "") handlers ----

async fn core_list_all(State(state): State<ApiState>, Path(resource): Path<String>) -> Response {
    match lookup_resource(&state, "", "v1", &resource) {
        Ok(reg) => do_list(&state, &reg, None),
        Err(resp) => resp,
    }
}

async fn core_create_cluster(
    State(state): State<ApiState>,
    Path(resource): Path<String>,
    Json(body): Json<Value>,
) -> Response {
    match lookup_resource(&state, "", "v1", &resource) {
        Ok(reg) => do_create(&state, &reg, None, body),
        Err(resp) => resp,
    }
}

async fn core_get_cluster(
    State(state): State<ApiState>,
    Path((resource, name)): Path<(String, String)>,
) -> Response {
    match lookup_resource(&state, "", "v1", &resource) {
        Ok(reg) if !reg.namespaced => do_get(&state, &reg, None, &name),
        // Cross-namespace get is not a thing; namespaced resources are
        // only addressable under /namespaces/{ns}/.
        Ok(reg) => status_failure(
            StatusCode::METHOD_NOT_ALLOWED,
            "MethodNotAllowed",
            format!("{} is namespaced", reg.plural),
        ),
        Err(resp) => resp,
    }
}

async fn core_put_cluster(
    State(state): State<ApiState>,
    Path((resource, name)): Path<(String, String)>,
    Json(body): Json<Value>,
) -> Response {
    match lookup_resource(&state, "", "v1", &resource) {
        Ok(reg) => do_replace(&state, &reg, None, &name, body),
        Err(resp) => resp,
    }
}

async fn core_delete_cluster(
    State(state): State<ApiState>,
    Path((resource, name)): Path<(String, String)>,
) -> Response {
    match lookup_resource(&state, "", "v1", &resource) {
        Ok(reg) => do_delete(&state, &reg, None, &name),
        Err(resp) => resp,
    }
}

async fn core_patch_cluster(
    State(state): State<ApiState>,
    Path((resource, name)): Path<(String, String)>,
    Json(body): Json<Value>,
) -> Response {
    match lookup_resource(&state, "", "v1", &resource) {
        Ok(reg) => do_patch(&state, &reg, None, &name, body, false),
        Err(resp) => resp,
    }
}

async fn core_put_cluster_status(
    State(state): State<ApiState>,
    Path((resource, name)): Path<(String, String)>,
    Json(body): Json<Value>,
) -> Response {
    match lookup_resource(&state, "", "v1", &resource) {
        Ok(reg) => do_replace_status(&state, &reg, None, &name, body),
        Err(resp) => resp,
    }
}

async fn core_patch_cluster_status(
    State(state): State<ApiState>,
    Path((resource, name)): Path<(String, String)>,
    Json(body): Json<Value>,
) -> Response {
    match lookup_resource(&state, "", "v1", &resource) {
        Ok(reg) => do_patch(&state, &reg, None, &name, body, true),
        Err(resp) => resp,
    }
}

async fn namespace_put_status(
    State(state): State<ApiState>,
    Path(ns): Path<String>,
    Json(body): Json<Value>,
) -> Response {
    match lookup_resource(&state, "", "v1", "namespaces") {
        Ok(reg) => do_replace_status(&state, &reg, None, &ns, body),
        Err(resp) => resp,
    }
}

async fn namespace_patch_status(
    State(state): State<ApiState>,
    Path(ns): Path<String>,
    Json(body): Json<Value>,
) -> Response {
    match lookup_resource(&state, "", "v1", "namespaces") {
        Ok(reg) => do_patch(&state, &reg, None, &ns, body, true),
        Err(resp) => resp,
    }
}

async fn core_list_ns(
    State(state): State<ApiState>,
    Path((ns, resource)): Path<(String, String)>,
) -> Response {
    match lookup_resource(&state, "", "v1", &resource) {
        Ok(reg) => do_list(&state, &reg, Some(&ns)),
        Err(resp) => resp,
    }
}

async fn core_create_ns(
    State(state): State<ApiState>,
    Path((ns, resource)): Path<(String, String)>,
    Json(body): Json<Value>,
) -> Response {
    match lookup_resource(&state, "", "v1", &resource) {
        Ok(reg) => do_create(&state, &reg, Some(ns), body),
        Err(resp) => resp,
    }
}

async fn core_get_ns(
    State(state): State<ApiState>,
    Path((ns, resource, name)): Path<(String, String, String)>,
) -> Response {
    match lookup_resource(&state, "", "v1", &resource) {
        Ok(reg) => do_get(&state, &reg, Some(&ns), &name),
        Err(resp) => resp,
    }
}

async fn core_put_ns(
    State(state): State<ApiState>,
    Path((ns, resource, name)): Path<(String, String, String)>,
    Json(body): Json<Value>,
) -> Response {
    match lookup_resource(&state, "", "v1", &resource) {
        Ok(reg) => do_replace(&state, &reg, Some(&ns), &name, body),
        Err(resp) => resp,
    }
}

async fn core_delete_ns(
    State(state): State<ApiState>,
    Path((ns, resource, name)): Path<(String, String, String)>,
) -> Response {
    match lookup_resource(&state, "", "v1", &resource) {
        Ok(reg) => do_delete(&state, &reg, Some(&ns), &name),
        Err(resp) => resp,
    }
}

async fn core_patch_ns(
    State(state): State<ApiState>,
    Path((ns, resource, name)): Path<(String, String, String)>,
    Json(body): Json<Value>,
) -> Response {
    match lookup_resource(&state, "", "v1", &resource) {
        Ok(reg) => do_patch(&state, &reg, Some(&ns), &name, body, false),
        Err(resp) => resp,
    }
}

async fn core_put_ns_status(
    State(state): State<ApiState>,
    Path((ns, resource, name)): Path<(String, String, String)>,
    Json(body): Json<Value>,
) -> Response {
    match lookup_resource(&state, "", "v1", &resource) {
        Ok(reg) => do_replace_status(&state, &reg, Some(&ns), &name, body),
        Err(resp) => resp,
    }
}

async fn core_patch_ns_status(
    State(state): State<ApiState>,
    Path((ns, resource, name)): Path<(String, String, String)>,
    Json(body): Json<Value>,
) -> Response {
    match lookup_resource(&state, "", "v1", &resource) {
        Ok(reg) => do_patch(&state, &reg, Some(&ns), &name, body, true),
        Err(resp) => resp,
    }
}

// ---- named-group handlers ----

async fn group_list_all(
    State(state): State<ApiState>,
    Path((group, version, resource)): Path<(String, String, String)>,
) -> Response {
    match lookup_resource(&state, &group, &version, &resource) {
        Ok(reg) => do_list(&state, &reg, None),
        Err(resp) => resp,
    }
}

async fn group_create_cluster(
    State(state): State<ApiState>,
    Path((group, version, resource)): Path<(String, String, String)>,
    Json(body): Json<Value>,
) -> Response {
    match lookup_resource(&state, &group, &version, &resource) {
        Ok(reg) => do_create(&state, &reg, None, body),
        Err(resp) => resp,
    }
}

async fn group_get_cluster(
    State(state): State<ApiState>,
    Path((group, version, resource, name)): Path<(String, String, String, String)>,
) -> Response {
    match lookup_resource(&state, &group, &version, &resource) {
        Ok(reg) => do_get(&state, &reg, None, &name),
        Err(resp) => resp,
    }
}

async fn group_put_cluster(
    State(state): State<ApiState>,
    Path((group, version, resource, name)): Path<(String, String, String, String)>,
    Json(body): Json<Value>,
) -> Response {
    match lookup_resource(&state, &group, &version, &resource) {
        Ok(reg) => do_replace(&state, &reg, None, &name, body),
        Err(resp) => resp,
    }
}

async fn group_delete_cluster(
    State(state): State<ApiState>,
    Path((group, version, resource, name)): Path<(String, String, String, String)>,
) -> Response {
    match lookup_resource(&state, &group, &version, &resource) {
        Ok(reg) => do_delete(&state, &reg, None, &name),
        Err(resp) => resp,
    }
}

async fn group_patch_cluster(
    State(state): State<ApiState>,
    Path((group, version, resource, name)): Path<(String, String, String, String)>,
    Json(body): Json<Value>,
) -> Response {
    match lookup_resource(&state, &group, &version, &resource) {
        Ok(reg) => do_patch(&state, &reg, None, &name, body, false),
        Err(resp) => resp,
    }
}

async fn group_put_cluster_status(
    State(state): State<ApiState>,
    Path((group, version, resource, name)): Path<(String, String, String, String)>,
    Json(body): Json<Value>,
) -> Response {
    match lookup_resource(&state, &group, &version, &resource) {
        Ok(reg) => do_replace_status(&state, &reg, None, &name, body),
        Err(resp) => resp,
    }
}

async fn group_patch_cluster_status(
    State(state): State<ApiState>,
    Path((group, version, resource, name)): Path<(String, String, String, String)>,
    Json(body): Json<Value>,
) -> Response {
    match lookup_resource(&state, &group, &version, &resource) {
        Ok(reg) => do_patch(&state, &reg, None, &name, body, true),
        Err(resp) => resp,
    }
}

async fn group_list_ns(
    State(state): State<ApiState>,
    Path((group, version, ns, resource)): Path<(String, String, String, String)>,
) -> Response {
    match lookup_resource(&state, &group, &version, &resource) {
        Ok(reg) => do_list(&state, &reg, Some(&ns)),
        Err(resp) => resp,
    }
}

async fn group_create_ns(
    State(state): State<ApiState>,
    Path((group, version, ns, resource)): Path<(String, String, String, String)>,
    Json(body): Json<Value>,
) -> Response {
    match lookup_resource(&state, &group, &version, &resource) {
        Ok(reg) => do_create(&state, &reg, Some(ns), body),
        Err(resp) => resp,
    }
}

async fn group_get_ns(
    State(state): State<ApiState>,
    Path((group, version, ns, resource, name)): Path<(String, String, String, String, String)>,
) -> Response {
    match lookup_resource(&state, &group, &version, &resource) {
        Ok(reg) => do_get(&state, &reg, Some(&ns), &name),
        Err(resp) => resp,
    }
}

async fn group_put_ns(
    State(state): State<ApiState>,
    Path((group, version, ns, resource, name)): Path<(String, String, String, String, String)>,
    Json(body): Json<Value>,
) -> Response {
    match lookup_resource(&state, &group, &version, &resource) {
        Ok(reg) => do_replace(&state, &reg, Some(&ns), &name, body),
        Err(resp) => resp,
    }
}

async fn group_delete_ns(
    State(state): State<ApiState>,
    Path((group, version, ns, resource, name)): Path<(String, String, String, String, String)>,
) -> Response {
    match lookup_resource(&state, &group, &version, &resource) {
        Ok(reg) => do_delete(&state, &reg, Some(&ns), &name),
        Err(resp) => resp,
    }
}

async fn group_patch_ns(
    State(state): State<ApiState>,
    Path((group, version, ns, resource, name)): Path<(String, String, String, String, String)>,
    Json(body): Json<Value>,
) -> Response {
    match lookup_resource(&state, &group, &version, &resource) {
        Ok(reg) => do_patch(&state, &reg, Some(&ns), &name, body, false),
        Err(resp) => resp,
    }
}

async fn group_put_ns_status(
    State(state): State<ApiState>,
    Path((group, version, ns, resource, name)): Path<(String, String, String, String, String)>,
    Json(body): Json<Value>,
) -> Response {
    match lookup_resource(&state, &group, &version, &resource) {
        Ok(reg) => do_replace_status(&state, &reg, Some(&ns), &name, body),
        Err(resp) => resp,
    }
}

async fn group_patch_ns_status(
    State(state): State<ApiState>,
    Path((group, version, ns, resource, name)): Path<(String, String, String, String, String)>,
    Json(body): Json<Value>,
) -> Response {
    match lookup_resource(&state, &group, &version, &resource) {
        Ok(reg) => do_patch(&state, &reg, Some(&ns), &name, body, true),
        Err(resp) => resp,
    }
}

// ---- pod logs ----

#[derive(Deserialize)]
struct LogQuery {
    container: Option<String>,
    #[serde(default)]
    previous: bool,
}

/// Forwards a pod log read to the fake kubelet, resolving the container
/// name from the stored pod spec when the client does not name one.
async fn pod_log(
    State(state): State<ApiState>,
    Path((ns, name)): Path<(String, String)>,
    Query(query): Query<LogQuery>,
) -> Response {
    let container = match query.container {
        Some(container) => container,
        None => {
            let key = object_key("", "pods", Some(&ns), &name);
            let pod = match state.store.get(&key) {
                Ok(Some(bytes)) => serde_json::from_slice::<Value>(&bytes).ok(),
                _ => None,
            };
            match pod
                .as_ref()
                .and_then(|p| p.pointer("/spec/containers/0/name"))
                .and_then(Value::as_str)
            {
                Some(container) => container.to_owned(),
                None => return not_found(format!("pods \"{}\" not found", name)),
            }
        }
    };

    let proxy = match &state.kubelet {
        Some(proxy) => proxy.clone(),
        None => return internal("kubelet proxy is not configured".to_owned()),
    };
    let url = format!(
        "{}/containerLogs/{}/{}/{}?previous={}",
        proxy.base_url, ns, name, container, query.previous
    );
    match proxy.client.get(&url).send().await {
        Ok(resp) if resp.status().is_success() => (
            StatusCode::OK,
            [(axum::http::header::CONTENT_TYPE, "text/plain")],
            Body::from_stream(resp.bytes_stream()),
        )
            .into_response(),
        Ok(resp) => not_found(format!(
            "log for {}/{} container {} unavailable ({})",
            ns,
            name,
            container,
            resp.status()
        )),
        Err(e) => internal(format!("kubelet proxy error: {}", e)),
    }
}
