use async_trait::async_trait;
use tracing::{error, info};

use crate::cluster::encode_to_yaml_file;
use crate::collectors::{sanitize_list, CommonModule, ModuleCollector};

/// Collects every cluster-scoped resource into
/// `yamls/cluster/<group-version>/<resource>.yaml`.
pub struct ClusterModule {
    common: CommonModule,
    name: &'static str,
}

impl ClusterModule {
    pub fn new(common: CommonModule, name: &'static str) -> Self {
        ClusterModule { common, name }
    }
}

#[async_trait]
impl ModuleCollector for ClusterModule {
    async fn generate_yamls(&self) {
        info!(
            "[{}] generate YAMLs, yamlsDir: {}",
            self.name,
            self.common.yamls_dir.display()
        );

        let global_dir = self.common.yamls_dir.join("cluster");
        let objs = match self
            .common
            .discovery
            .resources_for_cluster(
                &|body, gv, kind, _| sanitize_list(body, gv, kind),
                &self.common.exclude,
                &self.common.err_log,
            )
            .await
        {
            Ok(objs) => objs,
            Err(e) => {
                error!("unable to fetch cluster resources: {}", e);
                return;
            }
        };

        for (name, obj) in objs {
            let file = global_dir.join(format!("{}.yaml", name));
            encode_to_yaml_file(&obj, &file, &self.common.err_log);
        }
    }
}
