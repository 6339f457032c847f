use serde_json::{json, Value};

use bundlekit_types::API_GROUP;

/// Builds the CustomResourceDefinitions this project installs during
/// replay: `NodeConfig` (per-node host files) and `FailedObjects` (the
/// loader's failure record). Schemas are open: replayed content is
/// arbitrary and validation adds nothing in a read-only snapshot.
pub fn objects() -> Vec<Value> {
    vec![
        crd(
            "nodeconfigs",
            "nodeconfig",
            "NodeConfig",
            "Namespaced",
        ),
        crd(
            "failedobjects",
            "failedobject",
            "FailedObjects",
            "Cluster",
        ),
    ]
}

fn crd(plural: &str, singular: &str, kind: &str, scope: &str) -> Value {
    json!({
        "apiVersion": "apiextensions.k8s.io/v1",
        "kind": "CustomResourceDefinition",
        "metadata": {
            "name": format!("{}.{}", plural, API_GROUP),
        },
        "spec": {
            "group": API_GROUP,
            "scope": scope,
            "names": {
                "plural": plural,
                "singular": singular,
                "kind": kind,
            },
            "versions": [{
                "name": "v1",
                "served": true,
                "storage": true,
                "schema": {
                    "openAPIV3Schema": {
                        "type": "object",
                        "x-kubernetes-preserve-unknown-fields": true,
                    },
                },
            }],
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn definitions_cover_both_replay_kinds() {
        let objs = objects();
        assert_eq!(objs.len(), 2);

        let node_config = &objs[0];
        assert_eq!(
            node_config["metadata"]["name"],
            "nodeconfigs.supportbundlekit.io"
        );
        assert_eq!(node_config["spec"]["scope"], "Namespaced");

        let failed = &objs[1];
        assert_eq!(failed["spec"]["names"]["kind"], "FailedObjects");
        assert_eq!(failed["spec"]["scope"], "Cluster");
        assert_eq!(failed["spec"]["versions"][0]["served"], true);
    }
}
