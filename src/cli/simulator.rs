use std::path::PathBuf;

use clap::Args;

use bundlekit_common::Error;
use bundlekit_simulator::apiserver::{DEFAULT_CLIENT_BURST, DEFAULT_CLIENT_QPS};
use bundlekit_simulator::SimulatorConfig;

#[derive(Args)]
pub struct SimulatorArgs {
    /// Home directory where the simulator stores its configuration
    /// (defaults to $HOME/.sim)
    #[arg(long = "sim-home")]
    sim_home: Option<PathBuf>,

    /// Location of the extracted support bundle
    #[arg(long = "bundle-path", default_value = ".")]
    bundle_path: PathBuf,

    /// Reset sim-home: clear its contents and start a clean store and
    /// apiserver instance
    #[arg(long)]
    reset: bool,

    /// Skip load / re-load of the bundle; only current store contents
    /// are served
    #[arg(long = "skip-load")]
    skip_load: bool,

    /// Client QPS used while loading objects
    #[arg(long = "client-qps", default_value_t = DEFAULT_CLIENT_QPS)]
    client_qps: f32,

    /// Client burst used while loading objects
    #[arg(long = "client-burst", default_value_t = DEFAULT_CLIENT_BURST)]
    client_burst: i32,
}

pub async fn run(args: SimulatorArgs) -> Result<(), Error> {
    let sim_home = match args.sim_home {
        Some(home) => home,
        None => dirs::home_dir()
            .ok_or_else(|| Error::ConfigError("cannot determine home directory".to_owned()))?
            .join(".sim"),
    };

    bundlekit_simulator::run(SimulatorConfig {
        sim_home,
        bundle_path: args.bundle_path,
        reset: args.reset,
        skip_load: args.skip_load,
        client_qps: args.client_qps,
        client_burst: args.client_burst,
    })
    .await
}
