use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;
use tracing::info;

use bundlekit_common::Error;

use crate::cluster::ErrorLog;
use crate::discovery::{DiscoveryClient, GroupResource};

mod cluster;
mod default;
mod rancher;

pub use cluster::ClusterModule;
pub use default::DefaultModule;
pub use rancher::RancherModule;

/// A pluggable strategy for selecting and sanitizing a subset of API
/// resources into the bundle's `yamls/` tree.
#[async_trait]
pub trait ModuleCollector: Send + Sync {
    /// Collects this module's resources. Failures are written to the
    /// bundle error log; this never aborts the bundle.
    async fn generate_yamls(&self);
}

/// State shared by every collector module.
#[derive(Clone)]
pub struct CommonModule {
    pub discovery: Arc<DiscoveryClient>,
    pub yamls_dir: PathBuf,
    pub namespaces: Vec<String>,
    pub exclude: Vec<GroupResource>,
    pub err_log: ErrorLog,
}

/// Instantiates a collector module by name; unknown names yield `None`.
pub fn init_module_collector(
    module_name: &str,
    common: CommonModule,
) -> Option<Box<dyn ModuleCollector>> {
    match module_name.to_lowercase().as_str() {
        "cluster" => Some(Box::new(ClusterModule::new(common, "Cluster"))),
        "default" => Some(Box::new(DefaultModule::new(common, "Default"))),
        "rancher" => Some(Box::new(RancherModule::new(common, "Rancher"))),
        _ => None,
    }
}

/// Runs every module in order.
pub async fn get_all_support_bundle_yamls(modules: &[Box<dyn ModuleCollector>]) {
    info!("prepare to get all support bundle yamls");
    for module in modules {
        module.generate_yamls().await;
    }
}

/// Secret data keys that survive sanitization. Everything else in a
/// Secret's data map is dropped before the list reaches disk.
const SECRET_TARGET_DATA: &[&str] = &[
    "applied-checksum",
    "applied-output",
    "applied-periodic-output",
    "failed-checksum",
    "failed-output",
    "failure-count",
    "failure-threshold",
    "last-apply-time",
    "max-failures",
    "probe-statuses",
    "success-count",
];

static NULL_FIELD: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"("[a-zA-Z]+":)(null,)"#).expect("static pattern"));
static ESCAPED_NULL_FIELD: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"(\\"[a-zA-Z]+\\":)(null,)"#).expect("static pattern"));

/// Rewrites bare nulls and empty strings to the literal string "null".
/// This is a known-lossy textual repair carried for compatibility with
/// historical CRDs whose schemas reject true nulls on replay.
pub fn repair_json(raw: &str) -> String {
    let replaced = NULL_FIELD.replace_all(raw, "${1}\"null\",");
    let replaced = ESCAPED_NULL_FIELD.replace_all(&replaced, "${1}\\\"null\\\",");
    replaced.replace("\"\"", "\"null\"")
}

/// The shared sanitization pipeline: textual JSON repair, envelope
/// rewrite to a `v1 List`, per-item apiVersion/kind stamping, then
/// per-kind redaction. Returns `None` for empty lists so callers can
/// omit zero-item files.
pub fn sanitize_list(body: &str, group_version: &str, kind: &str) -> Result<Option<Value>, Error> {
    let repaired = repair_json(body);
    let mut parsed: Value = serde_json::from_str(&repaired)?;
    if !parsed.is_object() {
        return Err(Error::GenericError(
            "resource list response is not an object".to_owned(),
        ));
    }

    parsed["kind"] = Value::String("List".to_owned());
    parsed["apiVersion"] = Value::String("v1".to_owned());

    let items = match parsed.get_mut("items").and_then(Value::as_array_mut) {
        Some(items) if !items.is_empty() => items,
        _ => return Ok(None),
    };

    for item in items.iter_mut().filter(|item| item.is_object()) {
        item["apiVersion"] = Value::String(group_version.to_owned());
        item["kind"] = Value::String(kind.to_owned());
        if kind == "Secret" {
            redact_secret_data(item);
        }
    }

    Ok(Some(parsed))
}

fn redact_secret_data(item: &mut Value) {
    if let Some(data) = item.get_mut("data").and_then(Value::as_object_mut) {
        data.retain(|key, _| SECRET_TARGET_DATA.contains(&key.as_str()));
    }
}
