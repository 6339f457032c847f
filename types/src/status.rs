use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};

/// Phases executed by the manager, in order. The phase name is exposed
/// verbatim on the status endpoint.
#[derive(Deserialize, Serialize, Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ManagerPhase {
    #[default]
    #[serde(rename = "init")]
    Init,

    #[serde(rename = "cluster-bundle")]
    ClusterBundle,

    #[serde(rename = "prometheus-bundle")]
    PrometheusBundle,

    #[serde(rename = "node-bundle")]
    NodeBundle,

    #[serde(rename = "packaging")]
    Packaging,

    #[serde(rename = "done")]
    Done,
}

impl FromStr for ManagerPhase {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "init" => Ok(ManagerPhase::Init),
            "cluster-bundle" => Ok(ManagerPhase::ClusterBundle),
            "prometheus-bundle" => Ok(ManagerPhase::PrometheusBundle),
            "node-bundle" => Ok(ManagerPhase::NodeBundle),
            "packaging" => Ok(ManagerPhase::Packaging),
            "done" => Ok(ManagerPhase::Done),
            _ => Err(()),
        }
    }
}

impl fmt::Display for ManagerPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ManagerPhase::Init => write!(f, "init"),
            ManagerPhase::ClusterBundle => write!(f, "cluster-bundle"),
            ManagerPhase::PrometheusBundle => write!(f, "prometheus-bundle"),
            ManagerPhase::NodeBundle => write!(f, "node-bundle"),
            ManagerPhase::Packaging => write!(f, "packaging"),
            ManagerPhase::Done => write!(f, "done"),
        }
    }
}

/// Snapshot of the manager's progress, served on `GET /status`. The
/// external controller polls this record to decide when to fetch the
/// archive or abandon the bundle.
#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq)]
pub struct ManagerStatus {
    /// Phase currently running (or the phase that failed).
    pub phase: Option<ManagerPhase>,

    /// True once a required or post phase has failed; terminal.
    pub error: bool,

    /// Cause of the failure when `error` is set.
    #[serde(rename = "errorMessage")]
    pub error_message: String,

    /// Completed share of scheduled phases, 0-100.
    pub progress: i32,

    /// Base name of the archive, set by the packaging phase.
    pub filename: String,

    /// Archive size in bytes, set by the packaging phase.
    pub filesize: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_serializes_with_stable_field_names() {
        let status = ManagerStatus {
            phase: Some(ManagerPhase::Packaging),
            error: false,
            error_message: String::new(),
            progress: 80,
            filename: "supportbundle_x.zip".to_owned(),
            filesize: 1024,
        };
        let v = serde_json::to_value(&status).unwrap();
        assert_eq!(v["phase"], "packaging");
        assert_eq!(v["error"], false);
        assert_eq!(v["errorMessage"], "");
        assert_eq!(v["progress"], 80);
        assert_eq!(v["filename"], "supportbundle_x.zip");
        assert_eq!(v["filesize"], 1024);
    }

    #[test]
    fn phase_names_round_trip() {
        for name in [
            "init",
            "cluster-bundle",
            "prometheus-bundle",
            "node-bundle",
            "packaging",
            "done",
        ] {
            let phase: ManagerPhase = name.parse().unwrap();
            assert_eq!(phase.to_string(), name);
        }
        assert!("package".parse::<ManagerPhase>().is_err());
    }
}
