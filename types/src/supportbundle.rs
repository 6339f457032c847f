use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};

/// Specification for the [`SupportBundle`] resource. A SupportBundle is
/// created by an external controller; the manager process reads it at
/// startup and drives its status through the generation lifecycle.
#[derive(CustomResource, Default, Serialize, Deserialize, Debug, PartialEq, Clone, JsonSchema)]
#[kube(
    group = "supportbundlekit.io",
    version = "v1",
    kind = "SupportBundle",
    plural = "supportbundles",
    status = "SupportBundleStatus",
    namespaced
)]
#[kube(derive = "PartialEq")]
#[kube(derive = "Default")]
pub struct SupportBundleSpec {
    /// URL of the issue this bundle was collected for, if any.
    #[serde(rename = "issueURL")]
    pub issue_url: Option<String>,

    /// Free-form description entered by the person requesting the bundle.
    pub description: Option<String>,
}

/// Status object for the [`SupportBundle`] resource.
#[derive(Deserialize, Serialize, Clone, Debug, Default, JsonSchema, PartialEq)]
pub struct SupportBundleStatus {
    /// Current lifecycle state of the bundle.
    #[serde(default, skip_serializing_if = "SupportBundleState::is_none")]
    pub state: SupportBundleState,

    /// Generation progress, 0-100.
    #[serde(default, skip_serializing_if = "is_zero")]
    pub progress: i32,

    /// Base name of the produced archive, set once packaging completes.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub filename: String,

    /// Size of the produced archive in bytes.
    #[serde(default, skip_serializing_if = "is_zero_i64")]
    pub filesize: i64,
}

fn is_zero(v: &i32) -> bool {
    *v == 0
}

fn is_zero_i64(v: &i64) -> bool {
    *v == 0
}

/// Lifecycle state of a [`SupportBundle`].
#[derive(Deserialize, Serialize, Debug, Clone, Copy, PartialEq, Eq, Hash, Default, JsonSchema)]
pub enum SupportBundleState {
    /// The bundle has been requested but generation has not started.
    #[serde(rename = "")]
    #[default]
    None,

    /// The manager is collecting and packaging data.
    #[serde(rename = "generating")]
    Generating,

    /// The archive is available for download.
    #[serde(rename = "ready")]
    Ready,

    /// Generation failed; the status message carries the cause.
    #[serde(rename = "error")]
    Error,
}

impl SupportBundleState {
    pub fn is_none(&self) -> bool {
        matches!(self, SupportBundleState::None)
    }
}

impl FromStr for SupportBundleState {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "" => Ok(SupportBundleState::None),
            "generating" => Ok(SupportBundleState::Generating),
            "ready" => Ok(SupportBundleState::Ready),
            "error" => Ok(SupportBundleState::Error),
            _ => Err(()),
        }
    }
}

impl fmt::Display for SupportBundleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SupportBundleState::None => write!(f, ""),
            SupportBundleState::Generating => write!(f, "generating"),
            SupportBundleState::Ready => write!(f, "ready"),
            SupportBundleState::Error => write!(f, "error"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_round_trips_through_wire_names() {
        for (state, wire) in [
            (SupportBundleState::None, "\"\""),
            (SupportBundleState::Generating, "\"generating\""),
            (SupportBundleState::Ready, "\"ready\""),
            (SupportBundleState::Error, "\"error\""),
        ] {
            assert_eq!(serde_json::to_string(&state).unwrap(), wire);
            assert_eq!(serde_json::from_str::<SupportBundleState>(wire).unwrap(), state);
        }
    }

    #[test]
    fn status_uses_lowercase_file_fields() {
        let status = SupportBundleStatus {
            state: SupportBundleState::Ready,
            progress: 100,
            filename: "bundle.zip".to_owned(),
            filesize: 42,
        };
        let v = serde_json::to_value(&status).unwrap();
        assert_eq!(v["filename"], "bundle.zip");
        assert_eq!(v["filesize"], 42);
        assert_eq!(v["state"], "ready");
    }
}
