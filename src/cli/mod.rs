use clap::{Parser, Subcommand};

mod manager;
mod simulator;

/// Support bundle utilities: collect a cluster snapshot (`manager`) or
/// replay one inside an embedded control plane (`simulator`).
#[derive(Parser)]
#[command(name = "bundlekit", version, about = "Support bundle utilities")]
struct Cli {
    /// Set logging level to debug
    #[arg(long, global = true, env = "SUPPORT_BUNDLE_DEBUG")]
    debug: bool,

    /// Set logging level to trace
    #[arg(long, global = true, env = "SUPPORT_BUNDLE_TRACE")]
    trace: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Collect a support bundle from the surrounding cluster
    Manager(manager::ManagerArgs),
    /// Replay a support bundle with an embedded etcd-like store,
    /// apiserver and a minimal virtual kubelet
    Simulator(simulator::SimulatorArgs),
}

pub async fn run() {
    let cli = Cli::parse();
    init_logging(cli.debug, cli.trace);

    let result = match cli.command {
        Command::Manager(args) => manager::run(args).await,
        Command::Simulator(args) => simulator::run(args).await,
    };
    if let Err(e) = result {
        eprintln!("{}", e);
        std::process::exit(1);
    }
}

fn init_logging(debug: bool, trace: bool) {
    let default_level = if trace {
        "trace"
    } else if debug {
        "debug"
    } else {
        "info"
    };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

/// Splits a comma-separated flag value, dropping empty entries.
pub(crate) fn split_csv(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_owned)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn csv_splitting_drops_empties() {
        assert_eq!(split_csv("a, b,,c"), vec!["a", "b", "c"]);
        assert!(split_csv("").is_empty());
    }
}
