use chrono::{DateTime, Utc};
use serde_json::{Map, Value};

use bundlekit_common::Error;
use bundlekit_types::{SIM_CREATION_TIMESTAMP, SIM_GENERATED, SIM_PREFIX};

/// API groups never replayed: their objects only make sense next to the
/// control-plane machinery of the source cluster.
const SKIPPED_GROUPS: &[&str] = &[
    "admissionregistration.k8s.io",
    "apiregistration.k8s.io",
    "metrics.k8s.io",
];

/// Kinds never replayed.
const SKIPPED_KINDS: &[&str] = &["ComponentStatus", "PodSecurityPolicy"];

pub fn group_of(obj: &Value) -> String {
    let api_version = obj
        .pointer("/apiVersion")
        .and_then(Value::as_str)
        .unwrap_or_default();
    match api_version.split_once('/') {
        Some((group, _)) => group.to_owned(),
        None => String::new(),
    }
}

pub fn version_of(obj: &Value) -> String {
    let api_version = obj
        .pointer("/apiVersion")
        .and_then(Value::as_str)
        .unwrap_or_default();
    match api_version.split_once('/') {
        Some((_, version)) => version.to_owned(),
        None => api_version.to_owned(),
    }
}

pub fn kind_of(obj: &Value) -> String {
    obj.pointer("/kind")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_owned()
}

pub fn name_of(obj: &Value) -> String {
    obj.pointer("/metadata/name")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_owned()
}

pub fn namespace_of(obj: &Value) -> String {
    obj.pointer("/metadata/namespace")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_owned()
}

pub fn is_skipped_group_or_kind(obj: &Value) -> bool {
    SKIPPED_GROUPS.contains(&group_of(obj).as_str())
        || SKIPPED_KINDS.contains(&kind_of(obj).as_str())
}

/// Objects created by the apiserver itself (the `kubernetes` service,
/// bootstrap namespaces, system priority classes) are recreated by the
/// replay control plane, so loading them again would only conflict. The
/// marker is a kube-apiserver managed-fields entry stamped at the
/// object's own creation time.
pub fn skip_resources(obj: &Value) -> bool {
    let creation = obj
        .pointer("/metadata/creationTimestamp")
        .and_then(Value::as_str);
    let first_entry = obj
        .pointer("/metadata/managedFields/0")
        .and_then(Value::as_object);
    match (creation, first_entry) {
        (Some(creation), Some(entry)) => {
            entry.get("manager").and_then(Value::as_str) == Some("kube-apiserver")
                && entry.get("time").and_then(Value::as_str) == Some(creation)
        }
        _ => false,
    }
}

/// Deep scrub applied to every loaded object: drops leaves holding the
/// literal string "null" (except the key literally named `key`, which
/// is a valid value in prometheus rules) and every `resourceVersion`,
/// recursing through maps and slices.
pub fn cleanup_objects(obj: &mut Value) {
    match obj {
        Value::Object(map) => {
            let keys: Vec<String> = map.keys().cloned().collect();
            for key in keys {
                let remove = match map.get(&key) {
                    Some(Value::String(s)) => {
                        (s == "null" && key != "key") || key == "resourceVersion"
                    }
                    _ => key == "resourceVersion",
                };
                if remove {
                    map.remove(&key);
                } else if let Some(child) = map.get_mut(&key) {
                    cleanup_objects(child);
                }
            }
        }
        Value::Array(items) => {
            for item in items {
                cleanup_objects(item);
            }
        }
        _ => {}
    }
}

// ---- nested access helpers ----

fn get_nested<'a>(obj: &'a Value, path: &[&str]) -> Option<&'a Value> {
    let mut current = obj;
    for segment in path {
        current = current.get(segment)?;
    }
    Some(current)
}

fn remove_nested(obj: &mut Value, path: &[&str]) {
    let (last, parents) = match path.split_last() {
        Some(split) => split,
        None => return,
    };
    let mut current = obj;
    for segment in parents {
        current = match current.get_mut(segment) {
            Some(next) => next,
            None => return,
        };
    }
    if let Some(map) = current.as_object_mut() {
        map.remove(*last);
    }
}

fn set_nested(obj: &mut Value, path: &[&str], value: Value) {
    let (last, parents) = match path.split_last() {
        Some(split) => split,
        None => return,
    };
    let mut current = obj;
    for segment in parents {
        let map = match current.as_object_mut() {
            Some(map) => map,
            None => return,
        };
        current = map
            .entry((*segment).to_owned())
            .or_insert_with(|| Value::Object(Map::new()));
        if !current.is_object() {
            *current = Value::Object(Map::new());
        }
    }
    if let Some(map) = current.as_object_mut() {
        map.insert((*last).to_owned(), value);
    }
}

// ---- per-kind housekeeping ----

/// Per-kind rewrites needed before the replay apiserver accepts an
/// exported object, plus the common annotation of the original creation
/// timestamp. Each rule is idempotent.
pub fn object_housekeeping(obj: &mut Value) -> Result<(), Error> {
    if let Some(creation) = obj
        .pointer("/metadata/creationTimestamp")
        .and_then(Value::as_str)
        .map(str::to_owned)
    {
        set_nested(
            obj,
            &["metadata", "annotations", SIM_CREATION_TIMESTAMP],
            Value::String(creation),
        );
        remove_nested(obj, &["metadata", "resourceVersion"]);
    }

    match kind_of(obj).as_str() {
        "Ingress" => cleanup_ingress(obj),
        "Job" | "Batch" => cleanup_job(obj),
        "APIService" => cleanup_api_service(obj),
        "Node" => cleanup_node(obj),
        "LoadBalancer" => cleanup_load_balancer(obj),
        "BlockDevice" => cleanup_block_device(obj),
        "Secret" => cleanup_secret(obj),
        "Event" => cleanup_event(obj),
        "CustomResourceDefinition" => cleanup_crd(obj),
        _ => Ok(()),
    }
}

/// Rewrites a legacy `extensions/v1beta1` ingress into the served
/// `networking.k8s.io/v1` shape, including per-path backends.
pub fn cleanup_ingress(obj: &mut Value) -> Result<(), Error> {
    let api_version = obj
        .pointer("/apiVersion")
        .and_then(Value::as_str)
        .unwrap_or_default();
    if api_version != "extensions/v1beta1" && api_version != "networking.k8s.io/v1beta1" {
        return Ok(());
    }
    obj["apiVersion"] = Value::String("networking.k8s.io/v1".to_owned());

    let rules = match obj
        .pointer_mut("/spec/rules")
        .and_then(Value::as_array_mut)
    {
        Some(rules) => rules,
        None => return Ok(()),
    };
    for rule in rules {
        let paths = match rule
            .pointer_mut("/http/paths")
            .and_then(Value::as_array_mut)
        {
            Some(paths) => paths,
            None => continue,
        };
        for path in paths {
            let backend = match path.get_mut("backend").and_then(Value::as_object_mut) {
                Some(backend) => backend,
                None => continue,
            };
            let service_name = backend.remove("serviceName");
            let service_port = backend.remove("servicePort");
            if service_name.is_none() && service_port.is_none() {
                continue;
            }
            let mut service = Map::new();
            if let Some(name) = service_name {
                service.insert("name".to_owned(), name);
            }
            if let Some(port) = service_port {
                let mut port_obj = Map::new();
                port_obj.insert("number".to_owned(), port);
                service.insert("port".to_owned(), Value::Object(port_obj));
            }
            backend.insert("service".to_owned(), Value::Object(service));
        }
    }
    Ok(())
}

/// The apiserver regenerates job selectors and pod-template labels; the
/// exported ones carry a foreign controller-uid and would be rejected.
pub fn cleanup_job(obj: &mut Value) -> Result<(), Error> {
    if let Some(labels) = obj
        .pointer_mut("/metadata/labels")
        .and_then(Value::as_object_mut)
    {
        if let Some(uid) = labels.remove("controller-uid") {
            labels.insert(format!("{}controller-uid", SIM_PREFIX), uid);
        }
    }
    remove_nested(obj, &["spec", "template", "metadata", "labels"]);
    remove_nested(obj, &["spec", "selector"]);
    Ok(())
}

/// Points the aggregated API service at nothing; there is no backing
/// service in the simulator.
pub fn cleanup_api_service(obj: &mut Value) -> Result<(), Error> {
    remove_nested(obj, &["spec", "service"]);
    remove_nested(obj, &["spec", "caBundle"]);
    remove_nested(obj, &["spec", "insecureSkipTLSVerify"]);
    Ok(())
}

/// Rewrites every node address to localhost (the fake kubelet lives
/// there) and keeps the originals as annotations.
pub fn cleanup_node(obj: &mut Value) -> Result<(), Error> {
    if obj.pointer("/apiVersion").and_then(Value::as_str) != Some("v1") {
        // kind Node may exist in other groups; leave those alone
        return Ok(());
    }

    let addresses = match obj
        .pointer("/status/addresses")
        .and_then(Value::as_array)
        .cloned()
    {
        Some(addresses) => addresses,
        None => return Ok(()),
    };

    let mut rewritten = Vec::new();
    for address in addresses {
        let mut address = address;
        if !address.is_object() {
            rewritten.push(address);
            continue;
        }
        let addr_type = address
            .get("type")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_owned();
        if let Some(original) = address.get("address").and_then(Value::as_str) {
            set_nested(
                obj,
                &[
                    "metadata",
                    "annotations",
                    &format!("{}original-{}", SIM_PREFIX, addr_type),
                ],
                Value::String(original.to_owned()),
            );
        }
        address["address"] = Value::String("localhost".to_owned());
        rewritten.push(address);
    }
    set_nested(obj, &["status", "addresses"], Value::Array(rewritten));
    Ok(())
}

/// Listener names are optional upstream but exported bundles carry the
/// cleaned-up `"null"`; CRD validation requires the field back.
pub fn cleanup_load_balancer(obj: &mut Value) -> Result<(), Error> {
    let listeners = match obj
        .pointer_mut("/spec/listeners")
        .and_then(Value::as_array_mut)
    {
        Some(listeners) => listeners,
        None => return Ok(()),
    };
    for listener in listeners {
        if let Some(map) = listener.as_object_mut() {
            map.entry("name")
                .or_insert_with(|| Value::String("null".to_owned()));
        }
    }
    Ok(())
}

/// Some exports have the mount point scrubbed away entirely; the CRD
/// schema requires its presence, so the literal "null" goes back in.
pub fn cleanup_block_device(obj: &mut Value) -> Result<(), Error> {
    for path in [
        &["spec", "fileSystem", "mountPoint"][..],
        &["status", "deviceStatus", "fileSystem", "mountPoint"][..],
        &["status", "deviceStatus", "fileSystem", "type"][..],
    ] {
        if get_nested(obj, path).and_then(Value::as_str).is_none() {
            set_nested(obj, path, Value::String("null".to_owned()));
        }
    }
    Ok(())
}

pub fn cleanup_secret(obj: &mut Value) -> Result<(), Error> {
    remove_nested(obj, &["metadata", "managedFields"]);
    Ok(())
}

/// Events travel between apiserver versions badly: legacy timing fields
/// are dropped, `eventTime` is required at micro precision and the
/// reporting fields must be non-empty.
pub fn cleanup_event(obj: &mut Value) -> Result<(), Error> {
    if group_of(obj) == "events.k8s.io" {
        for field in [
            "deprecatedFirstTimestamp",
            "deprecatedLastTimestamp",
            "deprecatedCount",
            "deprecatedSource",
        ] {
            remove_nested(obj, &[field]);
        }
    } else {
        for field in ["firstTimestamp", "lastTimestamp", "count", "source"] {
            remove_nested(obj, &[field]);
        }
    }
    remove_nested(obj, &["series"]);

    let event_time = obj.pointer("/eventTime").and_then(Value::as_str);
    if event_time.map(str::is_empty).unwrap_or(true) {
        let creation = obj
            .pointer("/metadata/creationTimestamp")
            .and_then(Value::as_str)
            .and_then(|ts| DateTime::parse_from_rfc3339(ts).ok())
            .map(|ts| ts.with_timezone(&Utc))
            .unwrap_or_else(Utc::now);
        obj["eventTime"] = Value::String(creation.format("%Y-%m-%dT%H:%M:%S%.6fZ").to_string());
    }

    for field in ["reportingController", "reportingInstance", "action"] {
        let current = obj.pointer(&format!("/{}", field)).and_then(Value::as_str);
        if current.map(str::is_empty).unwrap_or(true) {
            obj[field] = Value::String(SIM_GENERATED.to_owned());
        }
    }
    Ok(())
}

/// No conversion webhook target exists in the simulator.
pub fn cleanup_crd(obj: &mut Value) -> Result<(), Error> {
    remove_nested(obj, &["spec", "conversion"]);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn scrub_drops_null_strings_but_keeps_key_fields() {
        let mut obj = json!({
            "metadata": {"name": "x", "resourceVersion": "42"},
            "spec": {
                "mountPoint": "null",
                "key": "null",
                "nested": [{"value": "null", "other": "ok"}],
            },
        });
        cleanup_objects(&mut obj);
        assert!(obj.pointer("/metadata/resourceVersion").is_none());
        assert!(obj.pointer("/spec/mountPoint").is_none());
        assert_eq!(obj.pointer("/spec/key").unwrap(), "null");
        assert!(obj.pointer("/spec/nested/0/value").is_none());
        assert_eq!(obj.pointer("/spec/nested/0/other").unwrap(), "ok");
    }

    #[test]
    fn scrub_twice_is_stable() {
        let mut obj = json!({
            "metadata": {"resourceVersion": "1"},
            "spec": {"a": "null", "b": "real"},
        });
        cleanup_objects(&mut obj);
        let once = obj.clone();
        cleanup_objects(&mut obj);
        assert_eq!(obj, once);
    }

    #[test]
    fn housekeeping_annotates_the_original_creation_timestamp() {
        let mut obj = json!({
            "apiVersion": "v1",
            "kind": "ConfigMap",
            "metadata": {
                "name": "cm",
                "creationTimestamp": "2022-11-15T19:56:25Z",
                "resourceVersion": "226",
            },
        });
        object_housekeeping(&mut obj).unwrap();
        assert_eq!(
            obj.pointer("/metadata/annotations/sim.supportbundlekit.io~1creationTimestamp")
                .and_then(Value::as_str),
            Some("2022-11-15T19:56:25Z")
        );
        assert!(obj.pointer("/metadata/resourceVersion").is_none());
    }

    #[test]
    fn system_objects_are_skipped() {
        let skip = json!({
            "metadata": {
                "creationTimestamp": "2022-11-15T19:56:25Z",
                "managedFields": [{
                    "manager": "kube-apiserver",
                    "operation": "Update",
                    "time": "2022-11-15T19:56:25Z",
                }],
            },
        });
        assert!(skip_resources(&skip));

        let keep = json!({
            "metadata": {
                "creationTimestamp": "2022-11-15T19:59:20Z",
                "managedFields": [{
                    "manager": "kubectl-client-side-apply",
                    "time": "2022-11-15T19:59:20Z",
                }],
            },
        });
        assert!(!skip_resources(&keep));

        let later = json!({
            "metadata": {
                "creationTimestamp": "2022-11-15T19:56:27Z",
                "managedFields": [{
                    "manager": "kube-apiserver",
                    "time": "2022-11-15T22:00:00Z",
                }],
            },
        });
        assert!(!skip_resources(&later));
    }

    #[test]
    fn legacy_ingress_backends_are_translated() {
        let mut obj = json!({
            "apiVersion": "extensions/v1beta1",
            "kind": "Ingress",
            "metadata": {"name": "rancher-expose"},
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
        cleanup_ingress(&mut obj).unwrap();
        assert_eq!(obj["apiVersion"], "networking.k8s.io/v1");
        let backend = obj.pointer("/spec/rules/0/http/paths/0/backend").unwrap();
        assert_eq!(backend["service"]["name"], "x");
        assert_eq!(backend["service"]["port"]["number"], 80);
        assert!(backend.get("serviceName").is_none());

        // Already-current ingresses are untouched.
        let mut current = json!({
            "apiVersion": "networking.k8s.io/v1",
            "kind": "Ingress",
            "spec": {"rules": []},
        });
        let before = current.clone();
        cleanup_ingress(&mut current).unwrap();
        assert_eq!(current, before);
    }

    #[test]
    fn job_selectors_are_dropped_and_labels_renamed() {
        let mut obj = json!({
            "apiVersion": "batch/v1",
            "kind": "Job",
            "metadata": {"labels": {"controller-uid": "abc", "app": "x"}},
            "spec": {
                "selector": {"matchLabels": {"controller-uid": "abc"}},
                "template": {"metadata": {"labels": {"controller-uid": "abc"}}},
            },
        });
        cleanup_job(&mut obj).unwrap();
        assert!(obj.pointer("/metadata/labels/controller-uid").is_none());
        assert_eq!(
            obj.pointer("/metadata/labels/sim.supportbundlekit.io~1controller-uid")
                .and_then(Value::as_str),
            Some("abc")
        );
        assert!(obj.pointer("/spec/selector").is_none());
        assert!(obj.pointer("/spec/template/metadata/labels").is_none());
    }

    #[test]
    fn api_services_point_at_nothing() {
        let mut obj = json!({
            "kind": "APIService",
            "spec": {
                "service": {"name": "metrics", "namespace": "kube-system"},
                "caBundle": "abcd",
                "insecureSkipTLSVerify": true,
                "group": "metrics.k8s.io",
            },
        });
        cleanup_api_service(&mut obj).unwrap();
        assert!(obj.pointer("/spec/service").is_none());
        assert!(obj.pointer("/spec/caBundle").is_none());
        assert!(obj.pointer("/spec/insecureSkipTLSVerify").is_none());
        assert_eq!(obj.pointer("/spec/group").unwrap(), "metrics.k8s.io");
    }

    #[test]
    fn node_addresses_become_localhost_with_originals_annotated() {
        let mut obj = json!({
            "apiVersion": "v1",
            "kind": "Node",
            "metadata": {"name": "harv1"},
            "status": {"addresses": [
                {"type": "InternalIP", "address": "192.168.3.21"},
                {"type": "Hostname", "address": "harv1"},
            ]},
        });
        cleanup_node(&mut obj).unwrap();
        let addresses = obj.pointer("/status/addresses").unwrap().as_array().unwrap();
        for address in addresses {
            assert_eq!(address["address"], "localhost");
        }
        assert_eq!(
            obj.pointer("/metadata/annotations/sim.supportbundlekit.io~1original-InternalIP")
                .and_then(Value::as_str),
            Some("192.168.3.21")
        );
    }

    #[test]
    fn load_balancer_listeners_get_placeholder_names() {
        let mut obj = json!({
            "kind": "LoadBalancer",
            "spec": {"listeners": [
                {"port": 443},
                {"name": "web", "port": 80},
            ]},
        });
        cleanup_load_balancer(&mut obj).unwrap();
        assert_eq!(obj.pointer("/spec/listeners/0/name").unwrap(), "null");
        assert_eq!(obj.pointer("/spec/listeners/1/name").unwrap(), "web");
    }

    #[test]
    fn block_devices_regain_scrubbed_mount_points() {
        let mut obj = json!({
            "kind": "BlockDevice",
            "spec": {"fileSystem": {}},
            "status": {"deviceStatus": {"fileSystem": {"type": "ext4"}}},
        });
        cleanup_block_device(&mut obj).unwrap();
        assert_eq!(obj.pointer("/spec/fileSystem/mountPoint").unwrap(), "null");
        assert_eq!(
            obj.pointer("/status/deviceStatus/fileSystem/mountPoint").unwrap(),
            "null"
        );
        assert_eq!(
            obj.pointer("/status/deviceStatus/fileSystem/type").unwrap(),
            "ext4"
        );
    }

    #[test]
    fn core_events_are_migrated() {
        let mut obj = json!({
            "apiVersion": "v1",
            "kind": "Event",
            "metadata": {"name": "e", "creationTimestamp": "2022-11-15T19:56:25Z"},
            "firstTimestamp": "2022-11-15T19:56:25Z",
            "lastTimestamp": "2022-11-15T19:56:26Z",
            "count": 3,
            "source": {"component": "kubelet"},
            "series": {},
        });
        cleanup_event(&mut obj).unwrap();
        for gone in ["firstTimestamp", "lastTimestamp", "count", "source", "series"] {
            assert!(obj.get(gone).is_none(), "{} should be removed", gone);
        }
        assert_eq!(
            obj["eventTime"].as_str().unwrap(),
            "2022-11-15T19:56:25.000000Z"
        );
        assert_eq!(obj["reportingController"], "sim-generated");
        assert_eq!(obj["reportingInstance"], "sim-generated");
        assert_eq!(obj["action"], "sim-generated");
    }

    #[test]
    fn new_style_events_keep_their_own_event_time() {
        let mut obj = json!({
            "apiVersion": "events.k8s.io/v1",
            "kind": "Event",
            "metadata": {"name": "e"},
            "eventTime": "2022-11-15T19:56:25.123456Z",
            "deprecatedCount": 1,
            "deprecatedSource": {},
            "reportingController": "kubelet",
        });
        cleanup_event(&mut obj).unwrap();
        assert_eq!(obj["eventTime"], "2022-11-15T19:56:25.123456Z");
        assert_eq!(obj["reportingController"], "kubelet");
        assert_eq!(obj["reportingInstance"], "sim-generated");
        assert!(obj.get("deprecatedCount").is_none());
        assert!(obj.get("deprecatedSource").is_none());
    }

    #[test]
    fn crd_conversion_is_removed() {
        let mut obj = json!({
            "kind": "CustomResourceDefinition",
            "spec": {
                "group": "x.io",
                "conversion": {"strategy": "Webhook"},
            },
        });
        cleanup_crd(&mut obj).unwrap();
        assert!(obj.pointer("/spec/conversion").is_none());
        assert_eq!(obj.pointer("/spec/group").unwrap(), "x.io");
    }

    #[test]
    fn housekeeping_is_idempotent_for_events() {
        let mut obj = json!({
            "apiVersion": "v1",
            "kind": "Event",
            "metadata": {"name": "e", "creationTimestamp": "2022-11-15T19:56:25Z"},
            "firstTimestamp": "x",
        });
        object_housekeeping(&mut obj).unwrap();
        let once = obj.clone();
        object_housekeeping(&mut obj).unwrap();
        assert_eq!(obj, once);
    }
}
