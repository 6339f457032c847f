/// API group shared by all custom resources in this project.
pub const API_GROUP: &str = "supportbundlekit.io";

/// Label applied to the manager pod and the agent daemonset so that
/// the two sides can find each other. The value is the bundle name.
pub const SUPPORT_BUNDLE_LABEL_KEY: &str = "supportbundlekit.io/bundle";

/// `app` label value of the manager deployment.
pub const APP_MANAGER: &str = "support-bundle-manager";

/// `app` label value of the per-node agent pods.
pub const APP_AGENT: &str = "support-bundle-agent";

/// On-disk format version recorded in the bundle metadata.
pub const BUNDLE_VERSION: &str = "0.1.0";

/// Namespace that hosts the pseudo-pods synthesized from node archives
/// during replay.
pub const NODE_INFO_NAMESPACE: &str = "support-bundle-node-info";

/// Annotation and label prefix used by the simulator when it rewrites
/// loaded objects.
pub const SIM_PREFIX: &str = "sim.supportbundlekit.io/";

/// Annotation holding the original creation timestamp of a replayed object.
pub const SIM_CREATION_TIMESTAMP: &str = "sim.supportbundlekit.io/creationTimestamp";

/// Sentinel written into event fields that the source cluster omitted.
pub const SIM_GENERATED: &str = "sim-generated";
