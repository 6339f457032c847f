use serde::{Deserialize, Serialize};

/// Bundle-level metadata, written once to `metadata.yaml` at the root of
/// the working tree and immutable afterwards.
#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq)]
pub struct BundleMeta {
    #[serde(rename = "projectName")]
    pub project_name: String,

    #[serde(rename = "projectVersion")]
    pub project_version: String,

    /// Version of the bundle layout itself, not of the project.
    #[serde(rename = "bundleVersion")]
    pub bundle_version: String,

    #[serde(rename = "kubernetesVersion")]
    pub kubernetes_version: String,

    /// UID of the project namespace. The field name carries a historic
    /// typo ("Namspace") that consumers depend on; do not correct it.
    #[serde(rename = "projectNamspaceUUID")]
    pub project_namespace_uuid: String,

    /// Creation time in ISO-8601. The archive name embeds this value
    /// with `:` replaced by `-`.
    #[serde(rename = "bundleCreatedAt")]
    pub bundle_created_at: String,

    #[serde(rename = "issueURL")]
    pub issue_url: String,

    #[serde(rename = "issueDescription")]
    pub issue_description: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn metadata_preserves_namespace_uuid_typo() {
        let meta = BundleMeta {
            project_name: "bundlekit".to_owned(),
            project_namespace_uuid: "7e2b1c9a".to_owned(),
            ..Default::default()
        };
        let v = serde_json::to_value(&meta).unwrap();
        assert_eq!(v["projectNamspaceUUID"], "7e2b1c9a");
        assert!(v.get("projectNamespaceUUID").is_none());
    }
}
