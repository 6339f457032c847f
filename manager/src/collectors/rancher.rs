use std::collections::HashMap;

use async_trait::async_trait;
use serde_json::Value;
use tracing::{error, info, warn};

use bundlekit_common::Error;

use crate::cluster::encode_to_yaml_file;
use crate::collectors::{sanitize_list, CommonModule, ModuleCollector};

/// Secret type kept by the fleet-local sweep; everything else is dropped.
const MACHINE_PLAN_SECRET_TYPE: &str = "rke.cattle.io/machine-plan";

/// Settings that carry no diagnostic value and bloat every bundle.
const NOISY_SETTINGS: &[&str] = &[
    "eula-agreed",
    "first-login",
    "install-uuid",
    "telemetry-opt",
    "ui-banners",
];

/// Vendor-specific module: a narrow allow-listed sweep of Rancher
/// namespaces plus the cluster-scoped `settings` resource.
pub struct RancherModule {
    common: CommonModule,
    name: &'static str,
}

impl RancherModule {
    pub fn new(common: CommonModule, name: &'static str) -> Self {
        RancherModule { common, name }
    }

    /// Namespace → allow-listed resources collected on top of the
    /// default module's output.
    fn extra_resources() -> HashMap<&'static str, Vec<String>> {
        let mut extra = HashMap::new();
        extra.insert("fleet-local", vec!["secrets".to_owned()]);
        extra
    }

    fn parse_namespaced(
        body: &str,
        group_version: &str,
        kind: &str,
        resources: &[String],
    ) -> Result<Option<Value>, Error> {
        let mut parsed = match sanitize_list(body, group_version, kind)? {
            Some(parsed) => parsed,
            None => return Ok(None),
        };

        for resource in resources {
            match resource.as_str() {
                "secrets" => {
                    if let Some(items) = parsed.get_mut("items").and_then(Value::as_array_mut) {
                        items.retain(|item| {
                            item.get("type").and_then(Value::as_str)
                                == Some(MACHINE_PLAN_SECRET_TYPE)
                        });
                        if items.is_empty() {
                            return Ok(None);
                        }
                    }
                }
                other => {
                    // undefined resource, just log it
                    warn!("could not handle unknown resource {}", other);
                }
            }
        }
        Ok(Some(parsed))
    }

    fn parse_settings(
        body: &str,
        group_version: &str,
        kind: &str,
        _resources: &[String],
    ) -> Result<Option<Value>, Error> {
        if !group_version.starts_with("management.cattle.io/") {
            return Ok(None);
        }
        let mut parsed = match sanitize_list(body, group_version, kind)? {
            Some(parsed) => parsed,
            None => return Ok(None),
        };
        if let Some(items) = parsed.get_mut("items").and_then(Value::as_array_mut) {
            items.retain(|item| {
                let name = item
                    .pointer("/metadata/name")
                    .and_then(Value::as_str)
                    .unwrap_or_default();
                !NOISY_SETTINGS.contains(&name)
            });
            if items.is_empty() {
                return Ok(None);
            }
        }
        Ok(Some(parsed))
    }
}

#[async_trait]
impl ModuleCollector for RancherModule {
    async fn generate_yamls(&self) {
        info!(
            "[{}] generate YAMLs, yamlsDir: {}",
            self.name,
            self.common.yamls_dir.display()
        );

        for (namespace, resource_list) in Self::extra_resources() {
            let dir = self.common.yamls_dir.join("namespaced").join(namespace);
            let objs = match self
                .common
                .discovery
                .specific_resources_for_namespace(
                    &Self::parse_namespaced,
                    namespace,
                    &resource_list,
                    &self.common.err_log,
                )
                .await
            {
                Ok(objs) => objs,
                Err(e) => {
                    error!("unable to fetch namespaced resources: {}", e);
                    return;
                }
            };

            for (name, obj) in objs {
                let file = dir.join(format!("{}.yaml", name));
                encode_to_yaml_file(&obj, &file, &self.common.err_log);
            }
        }

        // Narrow cluster-scoped sweep: vendor settings only.
        let cluster_dir = self.common.yamls_dir.join("cluster");
        let objs = match self
            .common
            .discovery
            .specific_resources_for_cluster(
                &Self::parse_settings,
                &["settings".to_owned()],
                &self.common.err_log,
            )
            .await
        {
            Ok(objs) => objs,
            Err(e) => {
                error!("unable to fetch cluster settings: {}", e);
                return;
            }
        };

        for (name, obj) in objs {
            let file = cluster_dir.join(format!("{}.yaml", name));
            encode_to_yaml_file(&obj, &file, &self.common.err_log);
        }
    }
}
