use std::path::PathBuf;
use std::time::Duration;

use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use bundlekit_common::Error;

pub mod apiserver;
pub mod certs;
pub mod crd;
pub mod kubelet;
pub mod objects;
pub mod store;

use apiserver::{infer_service_cluster_ip, ApiServerConfig};
use kubelet::{ClientAuthPolicy, KubeletSimulator};
use objects::ObjectManager;

/// How long the loader waits for the apiserver to start answering.
const APISERVER_READY_TIMEOUT: Duration = Duration::from_secs(30);

/// Settings for one simulator run, bound from flags by the CLI.
#[derive(Clone, Debug)]
pub struct SimulatorConfig {
    /// Home directory holding the store data, TLS material and the
    /// generated kubeconfig.
    pub sim_home: PathBuf,
    /// Root of the extracted support bundle.
    pub bundle_path: PathBuf,
    /// Clear the home directory before starting.
    pub reset: bool,
    /// Bring up the control plane against existing store contents
    /// without re-loading the bundle.
    pub skip_load: bool,
    pub client_qps: f32,
    pub client_burst: i32,
}

/// Replays a support bundle inside an embedded control plane: generated
/// TLS material, the embedded store, the apiserver, the fake kubelet
/// and finally the object loader. Returns when a termination signal
/// arrives or a server component fails.
pub async fn run(config: SimulatorConfig) -> Result<(), Error> {
    if config.reset && config.sim_home.exists() {
        std::fs::remove_dir_all(&config.sim_home)?;
    }
    std::fs::create_dir_all(&config.sim_home)?;

    let cancel = CancellationToken::new();
    setup_signal_handler(cancel.clone());

    let generated_certs = certs::generate_certs(&["localhost".to_owned()], &config.sim_home)?;

    let embedded_store =
        store::run_embedded_store(cancel.clone(), &config.sim_home, Some(&generated_certs)).await?;
    info!("embedded store ready at {:?}", embedded_store.endpoints);

    let mut api_config = ApiServerConfig::new(
        generated_certs.clone(),
        embedded_store.handle.clone(),
        config.client_qps,
        config.client_burst,
    );
    api_config.service_cluster_ip = infer_service_cluster_ip(&config.bundle_path);

    let client_config = api_config
        .generate_kubeconfig(&config.sim_home.join("admin.kubeconfig"))
        .await?;

    let mut tasks: JoinSet<Result<(), Error>> = JoinSet::new();
    {
        let cancel = cancel.clone();
        tasks.spawn(async move { api_config.run(cancel).await });
    }
    {
        let kubelet = KubeletSimulator::new(
            generated_certs.clone(),
            config.bundle_path.clone(),
            ClientAuthPolicy::NoAuth,
        )?;
        let cancel = cancel.clone();
        tasks.spawn(async move { kubelet.run(cancel).await });
    }

    let manager = ObjectManager::new(client_config, &config.bundle_path).await?;
    manager.wait_for_namespaces(APISERVER_READY_TIMEOUT).await?;

    if !config.skip_load {
        manager.create_cluster_objects().await?;
        manager.create_namespaced_objects().await?;
        manager.create_node_zip_objects().await?;
        // The record itself is best-effort.
        if let Err(e) = manager.create_failed_objects_list().await {
            error!("failed to record the failed object list: {}", e);
        }
        info!("all resources loaded successfully");
    }

    // Supervise the server components: the first failure cancels the
    // rest; a signal shuts everything down cleanly.
    loop {
        tokio::select! {
            joined = tasks.join_next() => match joined {
                Some(Ok(Ok(()))) => continue,
                Some(Ok(Err(e))) => {
                    cancel.cancel();
                    return Err(e);
                }
                Some(Err(e)) => {
                    cancel.cancel();
                    return Err(e.into());
                }
                None => return Ok(()),
            },
            _ = cancel.cancelled() => {
                while tasks.join_next().await.is_some() {}
                return Ok(());
            }
        }
    }
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
