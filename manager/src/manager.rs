use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use k8s_openapi::api::core::v1::Node;
use kube::api::Api;
use kube::Client;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use bundlekit_common::{archive, Error};
use bundlekit_types::ManagerPhase;

use crate::agent::{parse_node_selector, parse_tolerations, AgentDaemonSet};
use crate::cluster::{ClusterBundle, ErrorLog};
use crate::discovery::GroupResource;
use crate::fleet::NodeFleet;
use crate::httpserver::{self, AppState, MANAGER_PORT};
use crate::prometheus;
use crate::state::{K8sStore, LocalStore, StateStore};
use crate::status::StatusService;

/// Everything the manager needs to run one bundle, bound from flags and
/// environment by the CLI.
#[derive(Clone, Debug, Default)]
pub struct ManagerConfig {
    /// User namespaces to collect, on top of the built-in set.
    pub namespaces: Vec<String>,
    /// Namespace the manager pod and the SupportBundle live in.
    pub pod_namespace: String,
    pub bundle_name: String,
    /// Working root; a temp subdirectory is used when unset.
    pub output_dir: PathBuf,
    /// IP advertised to agents for uploads.
    pub manager_pod_ip: String,
    pub image_name: String,
    pub image_pull_policy: String,
    /// `k1=v1,k2=v2` pinning for agent pods.
    pub node_selector: String,
    /// Comma-separated `key=value:Effect` / `key:Effect` tolerations.
    pub taint_toleration: String,
    pub registry_secret: String,
    /// `group.resource` entries excluded from discovery.
    pub exclude_resources: Vec<String>,
    /// Vendor collector modules enabled on top of the built-ins.
    pub extra_collectors: Vec<String>,
    /// Collector selector handed to each agent.
    pub collector: String,
    pub issue_url: String,
    pub description: String,
    /// How long to wait for node bundle uploads.
    pub node_timeout: Duration,
    /// Run without a cluster-backed SupportBundle object.
    pub standalone: bool,
    /// Host of the in-cluster Prometheus queried for alerts.
    pub prometheus_host: String,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum PhaseTier {
    /// Failure is terminal.
    Required,
    /// Failure is logged and the run proceeds.
    Optional,
    /// Runs after collection; failure is terminal.
    Post,
}

/// The manager: a phased state machine that discovers cluster
/// resources, launches the per-node agent fleet, coordinates inbound
/// uploads and packages the final archive.
pub struct SupportBundleManager {
    config: ManagerConfig,
    status: StatusService,
    cancel: CancellationToken,
    fleet: Arc<NodeFleet>,
    completion: Option<oneshot::Receiver<()>>,
    client: Option<Client>,
    state: Option<Arc<dyn StateStore>>,
    err_log: Option<ErrorLog>,
    exclude: Vec<GroupResource>,
    collectors: Vec<String>,
    bundle_file_name: String,
}

impl SupportBundleManager {
    pub fn new(config: ManagerConfig) -> Self {
        let (fleet, completion) = NodeFleet::new();
        SupportBundleManager {
            config,
            status: StatusService::new(),
            cancel: CancellationToken::new(),
            fleet: Arc::new(fleet),
            completion: Some(completion),
            client: None,
            state: None,
            err_log: None,
            exclude: Vec::new(),
            collectors: Vec::new(),
            bundle_file_name: String::new(),
        }
    }

    fn working_dir(&self) -> PathBuf {
        self.config.output_dir.join("bundle")
    }

    fn bundle_file(&self) -> PathBuf {
        self.config.output_dir.join(&self.bundle_file_name)
    }

    /// Runs every phase, then parks on the cancellation token: the outer
    /// controller reads back completion status over HTTP and deletes the
    /// pod when it is done with us.
    pub async fn run(&mut self) -> Result<(), Error> {
        let failure = self.run_all_phases().await;

        match failure {
            Some((ManagerPhase::Init, message)) => {
                // Nothing is serving status yet; surface the problem
                // directly and exit non-zero.
                Err(Error::GenericError(message))
            }
            Some((_, message)) => {
                self.cancel.cancelled().await;
                Err(Error::GenericError(message))
            }
            None => {
                self.cancel.cancelled().await;
                Ok(())
            }
        }
    }

    /// Executes the phase plan and returns the terminal failure, if any.
    async fn run_all_phases(&mut self) -> Option<(ManagerPhase, String)> {
        let plan = [
            (ManagerPhase::Init, PhaseTier::Required),
            (ManagerPhase::ClusterBundle, PhaseTier::Required),
            (ManagerPhase::PrometheusBundle, PhaseTier::Optional),
            (ManagerPhase::NodeBundle, PhaseTier::Optional),
            (ManagerPhase::Packaging, PhaseTier::Post),
            (ManagerPhase::Done, PhaseTier::Post),
        ];
        let total = plan.len() as i32;
        let mut completed = 0;

        for (phase, tier) in plan {
            info!("running phase {}", phase);
            self.status.set_phase(phase);

            let result = self.run_phase(phase).await.map_err(|e| e.to_string());
            let failure = result.as_ref().err().cloned();
            if !record_phase_outcome(&self.status, phase, tier, result, &mut completed, total) {
                let message = failure.unwrap_or_default();
                if let Some(state) = &self.state {
                    if let Err(e) = state
                        .set_error(&self.config.pod_namespace, &self.config.bundle_name, &message)
                        .await
                    {
                        warn!("failed to record error state: {}", e);
                    }
                }
                return Some((phase, message));
            }
            info!(
                "succeed to run phase {}. Progress ({}).",
                phase,
                self.status.get().progress
            );
        }
        None
    }

    async fn run_phase(&mut self, phase: ManagerPhase) -> Result<(), Error> {
        match phase {
            ManagerPhase::Init => self.phase_init().await,
            ManagerPhase::ClusterBundle => self.phase_cluster_bundle().await,
            ManagerPhase::PrometheusBundle => self.phase_prometheus_bundle().await,
            ManagerPhase::NodeBundle => self.phase_node_bundle().await,
            ManagerPhase::Packaging => self.phase_packaging().await,
            ManagerPhase::Done => self.phase_done().await,
        }
    }

    fn check(&mut self) -> Result<(), Error> {
        if self.config.pod_namespace.is_empty() {
            return Err(Error::ConfigError("namespace is not specified".to_owned()));
        }
        if self.config.bundle_name.is_empty() {
            return Err(Error::ConfigError(
                "support bundle name is not specified".to_owned(),
            ));
        }
        if self.config.manager_pod_ip.is_empty() {
            return Err(Error::ConfigError(
                "manager pod IP is not specified".to_owned(),
            ));
        }
        if self.config.image_name.is_empty() {
            return Err(Error::ConfigError("image name is not specified".to_owned()));
        }
        if self.config.image_pull_policy.is_empty() {
            return Err(Error::ConfigError(
                "image pull policy is not specified".to_owned(),
            ));
        }
        if self.config.output_dir.as_os_str().is_empty() {
            self.config.output_dir = std::env::temp_dir().join("support-bundle");
        }
        std::fs::create_dir_all(self.working_dir())?;
        Ok(())
    }

    async fn phase_init(&mut self) -> Result<(), Error> {
        self.check()?;

        setup_signal_handler(self.cancel.clone());

        let client = Client::try_default().await?;
        self.client = Some(client.clone());

        let state: Arc<dyn StateStore> = if self.config.standalone {
            Arc::new(LocalStore::new(
                &self.config.pod_namespace,
                &self.config.bundle_name,
            ))
        } else {
            Arc::new(K8sStore::new(client))
        };

        let current = state
            .get_state(&self.config.pod_namespace, &self.config.bundle_name)
            .await?;
        if current != bundlekit_types::SupportBundleState::Generating {
            return Err(Error::InvalidStateError(current.to_string()));
        }
        self.state = Some(state);

        self.err_log = Some(ErrorLog::create(
            &self.working_dir().join("bundleGenerationError.log"),
        )?);

        self.collectors = ["cluster", "default"]
            .into_iter()
            .map(str::to_owned)
            .chain(self.config.extra_collectors.iter().cloned())
            .collect();

        self.exclude = vec![GroupResource {
            group: String::new(),
            resource: "secrets".to_owned(),
        }];
        for raw in &self.config.exclude_resources {
            match GroupResource::parse(raw) {
                Some(gr) => self.exclude.push(gr),
                None => warn!("skipping empty exclude resource entry"),
            }
        }

        // Serve status reads and node bundle uploads for the rest of the
        // run.
        let state = AppState {
            status: self.status.clone(),
            fleet: self.fleet.clone(),
            working_dir: self.working_dir(),
            output_dir: self.config.output_dir.clone(),
        };
        let cancel = self.cancel.clone();
        tokio::spawn(async move {
            if let Err(e) = httpserver::run(state, cancel).await {
                error!("manager http server failed: {}", e);
            }
        });

        Ok(())
    }

    async fn phase_cluster_bundle(&mut self) -> Result<(), Error> {
        let client = self.require_client()?;
        let err_log = self.require_err_log()?;

        let cluster = ClusterBundle::new(
            client,
            self.config.pod_namespace.clone(),
            self.config.namespaces.clone(),
            self.collectors.clone(),
            self.exclude.clone(),
            self.config.issue_url.clone(),
            self.config.description.clone(),
        );
        self.bundle_file_name = cluster.generate(&self.working_dir(), &err_log).await?;
        Ok(())
    }

    async fn phase_prometheus_bundle(&mut self) -> Result<(), Error> {
        prometheus::collect_alerts(&self.config.prometheus_host, &self.working_dir()).await
    }

    /// Spawns the per-node agent fleet and waits for uploads, bounded by
    /// the node timeout. A timeout is not an error; the bundle ships
    /// with whatever arrived, and the missing nodes are narrated in the
    /// bundle error log.
    async fn phase_node_bundle(&mut self) -> Result<(), Error> {
        let client = self.require_client()?;
        let err_log = self.require_err_log()?;

        let agents = AgentDaemonSet::new(
            client.clone(),
            self.config.pod_namespace.clone(),
            self.config.bundle_name.clone(),
            self.config.image_name.clone(),
            self.config.image_pull_policy.clone(),
            format!("http://{}:{}", self.config.manager_pod_ip, MANAGER_PORT),
            self.config.collector.clone(),
            parse_node_selector(&self.config.node_selector)?,
            parse_tolerations(&self.config.taint_toleration)?,
            self.config.registry_secret.clone(),
        );
        agents.create().await?;

        let scheduled = agents.wait_nodes_scheduled().await?;

        let nodes: Api<Node> = Api::all(client);
        let mut expected = Vec::new();
        for node_name in scheduled {
            match nodes.get(&node_name).await {
                Ok(node) if node_ready(&node) => expected.push(node_name),
                Ok(_) => warn!("node {} is not ready, not waiting for its bundle", node_name),
                Err(e) => warn!("cannot check node {}: {}", node_name, e),
            }
        }
        self.fleet.set_expected(expected);

        let completion = self
            .completion
            .take()
            .ok_or_else(|| Error::GenericError("node phase already ran".to_owned()))?;

        info!(
            "waiting for node bundles (timeout: {:?})",
            self.config.node_timeout
        );
        tokio::select! {
            _ = completion => {
                info!("all node bundles are received");
            }
            _ = tokio::time::sleep(self.config.node_timeout) => {
                let remaining = self.fleet.remaining();
                warn!("timed out waiting for node bundles, missing: {:?}", remaining);
                err_log.write(format_args!(
                    "Support bundle: fail to wait node bundles from nodes: {:?}",
                    remaining
                ));
            }
        }

        agents.cleanup().await?;
        Ok(())
    }

    async fn phase_packaging(&mut self) -> Result<(), Error> {
        if self.bundle_file_name.is_empty() {
            return Err(Error::GenericError(
                "no bundle file name was produced".to_owned(),
            ));
        }
        let bundle_dir_name = self
            .bundle_file_name
            .strip_suffix(".zip")
            .unwrap_or(&self.bundle_file_name)
            .to_owned();
        let bundle_dir_path = self.config.output_dir.join(&bundle_dir_name);
        tokio::fs::rename(self.working_dir(), &bundle_dir_path).await?;

        let parent = self.config.output_dir.clone();
        let out = self.bundle_file();
        tokio::task::spawn_blocking(move || archive::zip_directory(&parent, &bundle_dir_name, &out))
            .await??;

        let size = tokio::fs::metadata(self.bundle_file()).await?.len() as i64;
        self.status.set_fileinfo(&self.bundle_file_name, size);
        Ok(())
    }

    async fn phase_done(&mut self) -> Result<(), Error> {
        let status = self.status.get();
        if let Some(state) = &self.state {
            state
                .done(
                    &self.config.pod_namespace,
                    &self.config.bundle_name,
                    &status.filename,
                    status.filesize,
                )
                .await?;
        }
        info!(
            "support bundle {} ready to download",
            self.bundle_file().display()
        );
        Ok(())
    }

    fn require_client(&self) -> Result<Client, Error> {
        self.client
            .clone()
            .ok_or_else(|| Error::GenericError("clients are not initialized".to_owned()))
    }

    fn require_err_log(&self) -> Result<ErrorLog, Error> {
        self.err_log
            .clone()
            .ok_or_else(|| Error::GenericError("error log is not initialized".to_owned()))
    }
}

/// Applies one phase result to the status record: optional failures log
/// and advance progress, required and post failures set the terminal
/// error. Returns whether the run continues.
pub(crate) fn record_phase_outcome(
    status: &StatusService,
    phase: ManagerPhase,
    tier: PhaseTier,
    result: Result<(), String>,
    completed: &mut i32,
    total: i32,
) -> bool {
    if let Err(message) = result {
        match tier {
            PhaseTier::Optional => {
                // A bundle with partial data is still useful.
                warn!("fail to run optional phase {}: {}", phase, message);
            }
            PhaseTier::Required | PhaseTier::Post => {
                error!("fail to run phase {}: {}", phase, message);
                status.set_error(&message);
                return false;
            }
        }
    }
    *completed += 1;
    status.set_progress(100 * *completed / total);
    true
}

fn node_ready(node: &Node) -> bool {
    let conditions = match node.status.as_ref().and_then(|s| s.conditions.as_ref()) {
        Some(conditions) => conditions,
        None => return false,
    };
    let ready = conditions
        .iter()
        .any(|c| c.type_ == "Ready" && c.status == "True");
    let network_unavailable = conditions
        .iter()
        .any(|c| c.type_ == "NetworkUnavailable" && c.status == "True");
    ready && !network_unavailable
}

fn setup_signal_handler(cancel: CancellationToken) {
    tokio::spawn(async move {
        let ctrl_c = tokio::signal::ctrl_c();
        #[cfg(unix)]
        {
            use tokio::signal::unix::{signal, SignalKind};
            match signal(SignalKind::terminate()) {
                Ok(mut term) => {
                    tokio::select! {
                        _ = ctrl_c => {}
                        _ = term.recv() => {}
                    }
                }
                Err(e) => {
                    error!("cannot install SIGTERM handler: {}", e);
                    let _ = ctrl_c.await;
                }
            }
        }
        #[cfg(not(unix))]
        {
            let _ = ctrl_c.await;
        }
        info!("received termination signal");
        cancel.cancel();
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct PhaseCase {
        name: &'static str,
        results: Vec<(ManagerPhase, PhaseTier, Result<(), String>)>,
        expected_error: bool,
        expected_progress: i32,
    }

    fn full_plan(failing: Option<ManagerPhase>) -> Vec<(ManagerPhase, PhaseTier, Result<(), String>)> {
        [
            (ManagerPhase::Init, PhaseTier::Required),
            (ManagerPhase::ClusterBundle, PhaseTier::Required),
            (ManagerPhase::PrometheusBundle, PhaseTier::Optional),
            (ManagerPhase::Packaging, PhaseTier::Post),
            (ManagerPhase::Done, PhaseTier::Post),
        ]
        .into_iter()
        .map(|(phase, tier)| {
            let result = if Some(phase) == failing {
                Err("phase error".to_owned())
            } else {
                Ok(())
            };
            (phase, tier, result)
        })
        .collect()
    }

    #[test]
    fn run_all_phases_bookkeeping() {
        let cases = [
            PhaseCase {
                name: "all pass",
                results: full_plan(None),
                expected_error: false,
                expected_progress: 100,
            },
            PhaseCase {
                name: "first required phase error",
                results: full_plan(Some(ManagerPhase::Init)),
                expected_error: true,
                expected_progress: 0,
            },
            PhaseCase {
                name: "second required phase error",
                results: full_plan(Some(ManagerPhase::ClusterBundle)),
                expected_error: true,
                expected_progress: 20,
            },
            PhaseCase {
                name: "optional phase error",
                results: full_plan(Some(ManagerPhase::PrometheusBundle)),
                expected_error: false,
                expected_progress: 100,
            },
            PhaseCase {
                name: "final post phase error",
                results: full_plan(Some(ManagerPhase::Done)),
                expected_error: true,
                expected_progress: 80,
            },
        ];

        for case in cases {
            let status = StatusService::new();
            let total = case.results.len() as i32;
            let mut completed = 0;
            for (phase, tier, result) in case.results {
                status.set_phase(phase);
                if !record_phase_outcome(&status, phase, tier, result, &mut completed, total) {
                    break;
                }
            }
            let snapshot = status.get();
            assert_eq!(snapshot.error, case.expected_error, "case {}", case.name);
            assert_eq!(
                snapshot.progress, case.expected_progress,
                "case {}",
                case.name
            );
        }
    }

    #[test]
    fn ready_node_with_network_is_accepted() {
        let node: Node = serde_json::from_value(json!({
            "metadata": {"name": "n1"},
            "status": {"conditions": [
                {"type": "Ready", "status": "True"},
                {"type": "NetworkUnavailable", "status": "False"},
            ]},
        }))
        .unwrap();
        assert!(node_ready(&node));
    }

    #[test]
    fn unready_or_unreachable_nodes_are_rejected() {
        let not_ready: Node = serde_json::from_value(json!({
            "metadata": {"name": "n1"},
            "status": {"conditions": [{"type": "Ready", "status": "False"}]},
        }))
        .unwrap();
        assert!(!node_ready(&not_ready));

        let unreachable: Node = serde_json::from_value(json!({
            "metadata": {"name": "n1"},
            "status": {"conditions": [
                {"type": "Ready", "status": "True"},
                {"type": "NetworkUnavailable", "status": "True"},
            ]},
        }))
        .unwrap();
        assert!(!node_ready(&unreachable));

        let no_status: Node = serde_json::from_value(json!({"metadata": {"name": "n1"}})).unwrap();
        assert!(!node_ready(&no_status));
    }

    #[tokio::test]
    async fn packaging_produces_a_readable_archive() {
        let tmp = tempfile::tempdir().unwrap();
        let mut manager = SupportBundleManager::new(ManagerConfig {
            output_dir: tmp.path().to_path_buf(),
            ..ManagerConfig::default()
        });
        manager.bundle_file_name = "supportbundle_test_now.zip".to_owned();

        let working = manager.working_dir();
        std::fs::create_dir_all(working.join("yamls/cluster/v1")).unwrap();
        std::fs::write(working.join("metadata.yaml"), "projectName: x\n").unwrap();
        std::fs::write(working.join("yamls/cluster/v1/nodes.yaml"), "kind: List\n").unwrap();

        manager.phase_packaging().await.unwrap();

        let archive_path = tmp.path().join("supportbundle_test_now.zip");
        assert!(archive_path.exists());
        archive::verify(&archive_path).unwrap();

        let status = manager.status.get();
        assert_eq!(status.filename, "supportbundle_test_now.zip");
        assert!(status.filesize > 0);

        // The read-back names are rooted at the renamed bundle dir.
        let mut za = zip::ZipArchive::new(std::fs::File::open(&archive_path).unwrap()).unwrap();
        let names: Vec<String> = (0..za.len()).map(|i| za.by_index(i).unwrap().name().to_owned()).collect();
        assert!(names
            .iter()
            .any(|n| n == "supportbundle_test_now/metadata.yaml"));
        assert!(names
            .iter()
            .any(|n| n == "supportbundle_test_now/yamls/cluster/v1/nodes.yaml"));
    }
}
