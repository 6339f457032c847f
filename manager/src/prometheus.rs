use std::path::Path;
use std::time::Duration;

use serde_json::Value;
use tracing::info;

use bundlekit_common::Error;

/// Port the in-cluster Prometheus serves its HTTP API on.
pub const PROMETHEUS_PORT: u16 = 9090;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Pulls the current alert set from the monitoring stack and stores it
/// at `prometheus/alerts.json` inside the working tree. Runs as an
/// optional phase: any failure is logged by the phase runner and the
/// bundle proceeds without alert data.
pub async fn collect_alerts(host: &str, bundle_dir: &Path) -> Result<(), Error> {
    let url = format!("http://{}:{}/api/v1/alerts", host, PROMETHEUS_PORT);
    info!("collecting alerts from {}", url);

    let client = reqwest::Client::builder().timeout(REQUEST_TIMEOUT).build()?;
    let response = client.get(&url).send().await?.error_for_status()?;
    let alerts: Value = response.json().await?;

    let out_dir = bundle_dir.join("prometheus");
    tokio::fs::create_dir_all(&out_dir).await?;
    tokio::fs::write(out_dir.join("alerts.json"), serde_json::to_vec_pretty(&alerts)?).await?;
    Ok(())
}
