use serde_json::{json, Value};

/// One resource the apiserver can serve, either built in or registered
/// through a CustomResourceDefinition at load time.
#[derive(Clone, Debug, PartialEq)]
pub struct RegisteredResource {
    /// Empty string for core `v1`.
    pub group: String,
    pub version: String,
    pub kind: String,
    pub plural: String,
    pub namespaced: bool,
}

impl RegisteredResource {
    pub fn group_version(&self) -> String {
        if self.group.is_empty() {
            self.version.clone()
        } else {
            format!("{}/{}", self.group, self.version)
        }
    }
}

/// The apiserver's view of which resources exist. Replay bundles carry
/// arbitrary CRDs, so this set grows while the loader runs.
pub struct ResourceRegistry {
    resources: Vec<RegisteredResource>,
}

macro_rules! builtin {
    ($group:literal, $version:literal, $kind:literal, $plural:literal, $namespaced:literal) => {
        RegisteredResource {
            group: $group.to_owned(),
            version: $version.to_owned(),
            kind: $kind.to_owned(),
            plural: $plural.to_owned(),
            namespaced: $namespaced,
        }
    };
}

impl ResourceRegistry {
    /// Registry preloaded with the built-in API surface of a v1.22-era
    /// control plane, core and beta groups enabled.
    pub fn with_builtins() -> Self {
        let resources = vec![
            builtin!("", "v1", "Namespace", "namespaces", false),
            builtin!("", "v1", "Node", "nodes", false),
            builtin!("", "v1", "PersistentVolume", "persistentvolumes", false),
            builtin!("", "v1", "ComponentStatus", "componentstatuses", false),
            builtin!("", "v1", "Pod", "pods", true),
            builtin!("", "v1", "Service", "services", true),
            builtin!("", "v1", "Endpoints", "endpoints", true),
            builtin!("", "v1", "Secret", "secrets", true),
            builtin!("", "v1", "ConfigMap", "configmaps", true),
            builtin!("", "v1", "ServiceAccount", "serviceaccounts", true),
            builtin!("", "v1", "Event", "events", true),
            builtin!("", "v1", "LimitRange", "limitranges", true),
            builtin!("", "v1", "ResourceQuota", "resourcequotas", true),
            builtin!("", "v1", "ReplicationController", "replicationcontrollers", true),
            builtin!("", "v1", "PersistentVolumeClaim", "persistentvolumeclaims", true),
            builtin!("", "v1", "PodTemplate", "podtemplates", true),
            builtin!("apps", "v1", "Deployment", "deployments", true),
            builtin!("apps", "v1", "DaemonSet", "daemonsets", true),
            builtin!("apps", "v1", "ReplicaSet", "replicasets", true),
            builtin!("apps", "v1", "StatefulSet", "statefulsets", true),
            builtin!("apps", "v1", "ControllerRevision", "controllerrevisions", true),
            builtin!("batch", "v1", "Job", "jobs", true),
            builtin!("batch", "v1", "CronJob", "cronjobs", true),
            builtin!("autoscaling", "v1", "HorizontalPodAutoscaler", "horizontalpodautoscalers", true),
            builtin!("networking.k8s.io", "v1", "Ingress", "ingresses", true),
            builtin!("networking.k8s.io", "v1", "NetworkPolicy", "networkpolicies", true),
            builtin!("networking.k8s.io", "v1", "IngressClass", "ingressclasses", false),
            builtin!("rbac.authorization.k8s.io", "v1", "Role", "roles", true),
            builtin!("rbac.authorization.k8s.io", "v1", "RoleBinding", "rolebindings", true),
            builtin!("rbac.authorization.k8s.io", "v1", "ClusterRole", "clusterroles", false),
            builtin!("rbac.authorization.k8s.io", "v1", "ClusterRoleBinding", "clusterrolebindings", false),
            builtin!("storage.k8s.io", "v1", "StorageClass", "storageclasses", false),
            builtin!("storage.k8s.io", "v1", "VolumeAttachment", "volumeattachments", false),
            builtin!("storage.k8s.io", "v1", "CSIDriver", "csidrivers", false),
            builtin!("storage.k8s.io", "v1", "CSINode", "csinodes", false),
            builtin!("scheduling.k8s.io", "v1", "PriorityClass", "priorityclasses", false),
            builtin!("apiextensions.k8s.io", "v1", "CustomResourceDefinition", "customresourcedefinitions", false),
            builtin!("events.k8s.io", "v1", "Event", "events", true),
            builtin!("coordination.k8s.io", "v1", "Lease", "leases", true),
            builtin!("policy", "v1", "PodDisruptionBudget", "poddisruptionbudgets", true),
            builtin!("discovery.k8s.io", "v1", "EndpointSlice", "endpointslices", true),
            builtin!("certificates.k8s.io", "v1", "CertificateSigningRequest", "certificatesigningrequests", false),
            builtin!("node.k8s.io", "v1", "RuntimeClass", "runtimeclasses", false),
        ];
        ResourceRegistry { resources }
    }

    pub fn lookup(&self, group: &str, version: &str, plural: &str) -> Option<&RegisteredResource> {
        self.resources
            .iter()
            .find(|r| r.group == group && r.version == version && r.plural == plural)
    }

    pub fn register(&mut self, resource: RegisteredResource) {
        if self
            .lookup(&resource.group, &resource.version, &resource.plural)
            .is_none()
        {
            self.resources.push(resource);
        }
    }

    /// Registers every served version of a CustomResourceDefinition.
    /// Returns how many versions were added.
    pub fn register_crd(&mut self, crd: &Value) -> usize {
        let spec = &crd["spec"];
        let group = spec["group"].as_str().unwrap_or_default();
        let kind = spec["names"]["kind"].as_str().unwrap_or_default();
        let plural = spec["names"]["plural"].as_str().unwrap_or_default();
        if group.is_empty() || kind.is_empty() || plural.is_empty() {
            return 0;
        }
        let namespaced = spec["scope"].as_str() == Some("Namespaced");

        let mut added = 0;
        if let Some(versions) = spec["versions"].as_array() {
            for version in versions {
                if version["served"].as_bool() == Some(false) {
                    continue;
                }
                if let Some(name) = version["name"].as_str() {
                    self.register(RegisteredResource {
                        group: group.to_owned(),
                        version: name.to_owned(),
                        kind: kind.to_owned(),
                        plural: plural.to_owned(),
                        namespaced,
                    });
                    added += 1;
                }
            }
        }
        added
    }

    /// Answers `GET /api` with the core version list.
    pub fn api_versions(&self) -> Value {
        json!({
            "kind": "APIVersions",
            "versions": ["v1"],
            "serverAddressByClientCIDRs": [
                {"clientCIDR": "0.0.0.0/0", "serverAddress": "127.0.0.1:6443"},
            ],
        })
    }

    /// Answers `GET /apis` with every named group and its versions.
    pub fn api_group_list(&self) -> Value {
        let mut groups: Vec<&str> = self
            .resources
            .iter()
            .filter(|r| !r.group.is_empty())
            .map(|r| r.group.as_str())
            .collect();
        groups.sort_unstable();
        groups.dedup();

        let groups: Vec<Value> = groups
            .into_iter()
            .filter_map(|g| self.api_group(g))
            .collect();
        json!({
            "kind": "APIGroupList",
            "apiVersion": "v1",
            "groups": groups,
        })
    }

    /// Answers `GET /apis/{group}` with one group document, or None if
    /// the group is unknown.
    pub fn api_group(&self, group: &str) -> Option<Value> {
        let mut versions: Vec<&str> = self
            .resources
            .iter()
            .filter(|r| r.group == group)
            .map(|r| r.version.as_str())
            .collect();
        if versions.is_empty() {
            return None;
        }
        versions.sort_unstable();
        versions.dedup();

        let version_docs: Vec<Value> = versions
            .iter()
            .map(|v| {
                json!({
                    "groupVersion": format!("{}/{}", group, v),
                    "version": v,
                })
            })
            .collect();
        Some(json!({
            "kind": "APIGroup",
            "apiVersion": "v1",
            "name": group,
            "versions": version_docs,
            "preferredVersion": version_docs[0].clone(),
        }))
    }

    /// Answers `GET /api/v1` and `GET /apis/{group}/{version}`: the resource
    /// list for one group-version, or None if unknown.
    pub fn api_resource_list(&self, group: &str, version: &str) -> Option<Value> {
        let resources: Vec<&RegisteredResource> = self
            .resources
            .iter()
            .filter(|r| r.group == group && r.version == version)
            .collect();
        if resources.is_empty() {
            return None;
        }

        let group_version = if group.is_empty() {
            version.to_owned()
        } else {
            format!("{}/{}", group, version)
        };
        let mut docs = Vec::new();
        for r in &resources {
            docs.push(json!({
                "name": r.plural,
                "singularName": r.kind.to_lowercase(),
                "namespaced": r.namespaced,
                "kind": r.kind,
                "verbs": ["create", "delete", "get", "list", "patch", "update", "watch"],
            }));
            docs.push(json!({
                "name": format!("{}/status", r.plural),
                "singularName": "",
                "namespaced": r.namespaced,
                "kind": r.kind,
                "verbs": ["get", "patch", "update"],
            }));
        }
        Some(json!({
            "kind": "APIResourceList",
            "apiVersion": "v1",
            "groupVersion": group_version,
            "resources": docs,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtins_cover_the_loader_essentials() {
        let registry = ResourceRegistry::with_builtins();
        for (group, version, plural, namespaced) in [
            ("", "v1", "namespaces", false),
            ("", "v1", "pods", true),
            ("apps", "v1", "daemonsets", true),
            ("apiextensions.k8s.io", "v1", "customresourcedefinitions", false),
            ("events.k8s.io", "v1", "events", true),
            ("networking.k8s.io", "v1", "ingresses", true),
        ] {
            let r = registry.lookup(group, version, plural).unwrap();
            assert_eq!(r.namespaced, namespaced, "{}", plural);
        }
    }

    #[test]
    fn crds_register_their_served_versions() {
        let mut registry = ResourceRegistry::with_builtins();
        let crd = json!({
            "kind": "CustomResourceDefinition",
            "spec": {
                "group": "supportbundlekit.io",
                "scope": "Namespaced",
                "names": {"kind": "NodeConfig", "plural": "nodeconfigs"},
                "versions": [
                    {"name": "v1", "served": true, "storage": true},
                    {"name": "v1alpha1", "served": false},
                ],
            },
        });
        assert_eq!(registry.register_crd(&crd), 1);
        let r = registry.lookup("supportbundlekit.io", "v1", "nodeconfigs").unwrap();
        assert_eq!(r.kind, "NodeConfig");
        assert!(r.namespaced);
        assert!(registry
            .lookup("supportbundlekit.io", "v1alpha1", "nodeconfigs")
            .is_none());

        // Registration is idempotent.
        assert_eq!(registry.register_crd(&crd), 1);
    }

    #[test]
    fn discovery_documents_expose_groups_and_resources() {
        let registry = ResourceRegistry::with_builtins();

        let list = registry.api_resource_list("", "v1").unwrap();
        assert_eq!(list["groupVersion"], "v1");
        let names: Vec<&str> = list["resources"]
            .as_array()
            .unwrap()
            .iter()
            .filter_map(|r| r["name"].as_str())
            .collect();
        assert!(names.contains(&"pods"));
        assert!(names.contains(&"pods/status"));

        let groups = registry.api_group_list();
        let group_names: Vec<&str> = groups["groups"]
            .as_array()
            .unwrap()
            .iter()
            .filter_map(|g| g["name"].as_str())
            .collect();
        assert!(group_names.contains(&"apps"));
        assert!(group_names.contains(&"apiextensions.k8s.io"));

        assert!(registry.api_resource_list("nope", "v9").is_none());
    }
}
