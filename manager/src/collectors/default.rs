use std::collections::HashSet;

use async_trait::async_trait;
use tracing::{error, info};

use crate::cluster::encode_to_yaml_file;
use crate::collectors::{sanitize_list, CommonModule, ModuleCollector};

/// Namespaces that are always collected, ahead of any user-supplied ones.
const BUILTIN_NAMESPACES: &[&str] = &["default", "kube-system", "cattle-system"];

/// Collects every namespaced resource for the built-in and configured
/// namespaces into `yamls/namespaced/<ns>/<group-version>/<resource>.yaml`.
pub struct DefaultModule {
    common: CommonModule,
    name: &'static str,
}

impl DefaultModule {
    pub fn new(common: CommonModule, name: &'static str) -> Self {
        DefaultModule { common, name }
    }

    /// Built-in namespaces plus the configured ones, de-duplicated
    /// preserving first occurrence.
    fn namespaces(&self) -> Vec<String> {
        let mut seen = HashSet::new();
        BUILTIN_NAMESPACES
            .iter()
            .map(|ns| (*ns).to_owned())
            .chain(self.common.namespaces.iter().cloned())
            .filter(|ns| seen.insert(ns.clone()))
            .collect()
    }
}

#[async_trait]
impl ModuleCollector for DefaultModule {
    async fn generate_yamls(&self) {
        info!(
            "[{}] generate YAMLs, yamlsDir: {}",
            self.name,
            self.common.yamls_dir.display()
        );

        for namespace in self.namespaces() {
            let namespaced_dir = self.common.yamls_dir.join("namespaced").join(&namespace);
            let objs = match self
                .common
                .discovery
                .resources_for_namespace(
                    &|body, gv, kind, _| sanitize_list(body, gv, kind),
                    &namespace,
                    &self.common.exclude,
                    &self.common.err_log,
                )
                .await
            {
                Ok(objs) => objs,
                Err(e) => {
                    error!("unable to fetch namespaced resources: {}", e);
                    self.common
                        .err_log
                        .write(format_args!("Unable to fetch namespaced resources: {}", e));
                    return;
                }
            };

            for (name, obj) in objs {
                let file = namespaced_dir.join(format!("{}.yaml", name));
                encode_to_yaml_file(&obj, &file, &self.common.err_log);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::ErrorLog;
    use crate::discovery::DiscoveryClient;
    use std::path::PathBuf;
    use std::sync::Arc;

    fn module_with_namespaces(namespaces: &[&str]) -> DefaultModule {
        let tmp = tempfile::tempdir().unwrap();
        let err_log = ErrorLog::create(&tmp.path().join("err.log")).unwrap();
        // A client is required structurally but never used by namespaces().
        let config = kube::Config::new("http://127.0.0.1:1".parse().unwrap());
        let client = kube::Client::try_from(config).unwrap();
        DefaultModule::new(
            CommonModule {
                discovery: Arc::new(DiscoveryClient::new(client)),
                yamls_dir: PathBuf::from("/tmp/yamls"),
                namespaces: namespaces.iter().map(|s| (*s).to_owned()).collect(),
                exclude: Vec::new(),
                err_log,
            },
            "Default",
        )
    }

    #[tokio::test]
    async fn namespaces_are_deduplicated_preserving_order() {
        let module = module_with_namespaces(&["demo", "kube-system", "demo"]);
        assert_eq!(
            module.namespaces(),
            vec!["default", "kube-system", "cattle-system", "demo"]
        );
    }
}
