use std::path::PathBuf;
use std::time::Duration;

use clap::Args;

use bundlekit_common::{parse_duration, Error};
use bundlekit_manager::{ManagerConfig, SupportBundleManager};

use crate::cli::split_csv;

const DEFAULT_NODE_TIMEOUT: Duration = Duration::from_secs(30 * 60);

#[derive(Args)]
pub struct ManagerArgs {
    /// Comma-separated user namespaces to include
    #[arg(long, env = "SUPPORT_BUNDLE_TARGET_NAMESPACES", default_value = "")]
    namespaces: String,

    /// Namespace the manager pod and the SupportBundle live in
    #[arg(long, env = "SUPPORT_BUNDLE_NAMESPACE", default_value = "")]
    namespace: String,

    /// Name of the SupportBundle to drive
    #[arg(long, env = "SUPPORT_BUNDLE_NAME", default_value = "")]
    bundlename: String,

    /// Directory to store the bundle in (a temp subdir when unset)
    #[arg(long, env = "SUPPORT_BUNDLE_OUTPUT_DIR", default_value = "")]
    outdir: String,

    /// IP agents use to reach this manager
    #[arg(long, env = "SUPPORT_BUNDLE_MANAGER_POD_IP", default_value = "")]
    manager_pod_ip: String,

    /// Agent container image
    #[arg(long = "image-name", env = "SUPPORT_BUNDLE_IMAGE", default_value = "")]
    image_name: String,

    /// Pull policy of the agent image
    #[arg(
        long = "image-pull-policy",
        env = "SUPPORT_BUNDLE_IMAGE_PULL_POLICY",
        default_value = "IfNotPresent"
    )]
    image_pull_policy: String,

    /// `k1=v1,k2=v2` node pinning for the agent daemonset
    #[arg(long = "node-selector", env = "SUPPORT_BUNDLE_NODE_SELECTOR", default_value = "")]
    node_selector: String,

    /// Comma-separated `key=value:Effect` tolerations for agent pods
    #[arg(
        long = "taint-toleration",
        env = "SUPPORT_BUNDLE_TAINT_TOLERATION",
        default_value = ""
    )]
    taint_toleration: String,

    /// Image pull secret for the agent image
    #[arg(
        long = "registry-secret",
        env = "SUPPORT_BUNDLE_REGISTRY_SECRET",
        default_value = ""
    )]
    registry_secret: String,

    /// Comma-separated `group.resource` entries to exclude
    #[arg(
        long = "exclude-resources",
        env = "SUPPORT_BUNDLE_EXCLUDE_RESOURCES",
        default_value = ""
    )]
    exclude_resources: String,

    /// Comma-separated vendor collector module names
    #[arg(
        long = "extra-collectors",
        env = "SUPPORT_BUNDLE_EXTRA_COLLECTORS",
        default_value = ""
    )]
    extra_collectors: String,

    /// Collector selector handed to each agent
    #[arg(long, env = "SUPPORT_BUNDLE_COLLECTOR", default_value = "")]
    collector: String,

    /// URL of the issue this bundle is collected for
    #[arg(long = "issue-url", env = "SUPPORT_BUNDLE_ISSUE_URL", default_value = "")]
    issue_url: String,

    /// Free-form description recorded in the bundle metadata
    #[arg(long, env = "SUPPORT_BUNDLE_DESCRIPTION", default_value = "")]
    description: String,

    /// How long to wait for node bundle uploads (e.g. 30m, 1h)
    #[arg(long = "node-timeout", env = "SUPPORT_BUNDLE_NODE_TIMEOUT", default_value = "30m")]
    node_timeout: String,

    /// Run without a cluster-backed SupportBundle object
    #[arg(long)]
    standalone: bool,

    /// Host of the in-cluster Prometheus queried for alerts
    #[arg(
        long = "prometheus-host",
        env = "SUPPORT_BUNDLE_PROMETHEUS_HOST",
        default_value = "rancher-monitoring-prometheus.cattle-monitoring-system"
    )]
    prometheus_host: String,
}

pub async fn run(args: ManagerArgs) -> Result<(), Error> {
    let node_timeout = parse_duration(&args.node_timeout).unwrap_or(DEFAULT_NODE_TIMEOUT);
    let config = ManagerConfig {
        namespaces: split_csv(&args.namespaces),
        pod_namespace: args.namespace,
        bundle_name: args.bundlename,
        output_dir: PathBuf::from(args.outdir),
        manager_pod_ip: args.manager_pod_ip,
        image_name: args.image_name,
        image_pull_policy: args.image_pull_policy,
        node_selector: args.node_selector,
        taint_toleration: args.taint_toleration,
        registry_secret: args.registry_secret,
        exclude_resources: split_csv(&args.exclude_resources),
        extra_collectors: split_csv(&args.extra_collectors),
        collector: args.collector,
        issue_url: args.issue_url,
        description: args.description,
        node_timeout,
        standalone: args.standalone,
        prometheus_host: args.prometheus_host,
    };
    SupportBundleManager::new(config).run().await
}
