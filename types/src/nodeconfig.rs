use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use serde::{Deserialize, Serialize};

use crate::API_GROUP;

/// One host file captured by a node agent, carried verbatim in a
/// [`NodeConfig`] so that replay tooling can inspect on-host state.
#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq)]
pub struct NodeConfigSpec {
    #[serde(rename = "fileName")]
    pub file_name: String,
    pub content: String,
}

/// Custom resource synthesized by the simulator for every node archive.
/// The spec is the flat list of files found under the archive's
/// `configs/` subtree. The resource is created through the dynamic
/// client, so no typed client machinery is generated for it.
#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq)]
pub struct NodeConfig {
    #[serde(rename = "apiVersion")]
    pub api_version: String,
    pub kind: String,
    pub metadata: ObjectMeta,
    pub spec: Vec<NodeConfigSpec>,
}

impl NodeConfig {
    pub fn new(name: &str, namespace: &str) -> Self {
        NodeConfig {
            api_version: format!("{}/v1", API_GROUP),
            kind: "NodeConfig".to_owned(),
            metadata: ObjectMeta {
                name: Some(name.to_owned()),
                namespace: Some(namespace.to_owned()),
                ..ObjectMeta::default()
            },
            spec: Vec::new(),
        }
    }
}

/// One object the loader could not create, with the apiserver's verbatim
/// error text.
#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq)]
pub struct FailedObjectSpec {
    pub gvk: String,
    pub name: String,
    pub namespace: String,
    pub error: String,
}

/// Cluster-scoped record of every non-fatal load failure. A single
/// instance named `failedobjects` is written as the loader's final step;
/// its presence means loading completed with gaps.
#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq)]
pub struct FailedObjects {
    #[serde(rename = "apiVersion")]
    pub api_version: String,
    pub kind: String,
    pub metadata: ObjectMeta,
    pub spec: Vec<FailedObjectSpec>,
}

impl FailedObjects {
    /// Well-known name of the singleton instance.
    pub const NAME: &'static str = "failedobjects";

    pub fn new() -> Self {
        FailedObjects {
            api_version: format!("{}/v1", API_GROUP),
            kind: "FailedObjects".to_owned(),
            metadata: ObjectMeta {
                name: Some(Self::NAME.to_owned()),
                ..ObjectMeta::default()
            },
            spec: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn node_config_spec_uses_camel_case_file_name() {
        let mut nc = NodeConfig::new("node1", "support-bundle-node-info");
        nc.spec.push(NodeConfigSpec {
            file_name: "configs/rke2/config.yaml".to_owned(),
            content: "token: redacted".to_owned(),
        });
        let v = serde_json::to_value(&nc).unwrap();
        assert_eq!(v["apiVersion"], "supportbundlekit.io/v1");
        assert_eq!(v["spec"][0]["fileName"], "configs/rke2/config.yaml");
    }
}
