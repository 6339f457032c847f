use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use kube::api::{Api, Patch, PatchParams};
use kube::Client;
use serde_json::json;
use tracing::debug;

use bundlekit_common::Error;
use bundlekit_types::{SupportBundle, SupportBundleState, SupportBundleStatus};

/// Storage for the SupportBundle control object the manager drives.
/// Backed by the cluster in normal operation; an in-memory variant keeps
/// standalone runs (no controller, no CRD) working.
#[async_trait]
pub trait StateStore: Send + Sync {
    async fn get_state(&self, namespace: &str, name: &str) -> Result<SupportBundleState, Error>;

    /// Marks the bundle ready and records the archive name and size.
    async fn done(
        &self,
        namespace: &str,
        name: &str,
        filename: &str,
        filesize: i64,
    ) -> Result<(), Error>;

    async fn set_error(&self, namespace: &str, name: &str, message: &str) -> Result<(), Error>;
}

pub struct K8sStore {
    client: Client,
}

impl K8sStore {
    pub fn new(client: Client) -> Self {
        K8sStore { client }
    }

    fn api(&self, namespace: &str) -> Api<SupportBundle> {
        Api::namespaced(self.client.clone(), namespace)
    }
}

#[async_trait]
impl StateStore for K8sStore {
    async fn get_state(&self, namespace: &str, name: &str) -> Result<SupportBundleState, Error> {
        let sb = self.api(namespace).get(name).await?;
        Ok(sb.status.map(|s| s.state).unwrap_or_default())
    }

    async fn done(
        &self,
        namespace: &str,
        name: &str,
        filename: &str,
        filesize: i64,
    ) -> Result<(), Error> {
        let patch = json!({
            "status": {
                "state": SupportBundleState::Ready,
                "progress": 100,
                "filename": filename,
                "filesize": filesize,
            }
        });
        self.api(namespace)
            .patch_status(name, &PatchParams::default(), &Patch::Merge(&patch))
            .await?;
        Ok(())
    }

    async fn set_error(&self, namespace: &str, name: &str, message: &str) -> Result<(), Error> {
        debug!("marking supportbundle {}/{} error: {}", namespace, name, message);
        let patch = json!({
            "status": {
                "state": SupportBundleState::Error,
            }
        });
        self.api(namespace)
            .patch_status(name, &PatchParams::default(), &Patch::Merge(&patch))
            .await?;
        Ok(())
    }
}

/// In-memory store seeded with a single bundle in the `generating` state.
pub struct LocalStore {
    bundles: Mutex<HashMap<String, SupportBundleStatus>>,
}

fn bundle_key(namespace: &str, name: &str) -> String {
    format!("{}-{}", namespace, name)
}

impl LocalStore {
    pub fn new(namespace: &str, name: &str) -> Self {
        debug!("creating a local state store ({}/{})", namespace, name);
        let mut bundles = HashMap::new();
        bundles.insert(
            bundle_key(namespace, name),
            SupportBundleStatus {
                state: SupportBundleState::Generating,
                ..SupportBundleStatus::default()
            },
        );
        LocalStore {
            bundles: Mutex::new(bundles),
        }
    }
}

#[async_trait]
impl StateStore for LocalStore {
    async fn get_state(&self, namespace: &str, name: &str) -> Result<SupportBundleState, Error> {
        let bundles = self.bundles.lock().unwrap();
        bundles
            .get(&bundle_key(namespace, name))
            .map(|s| s.state)
            .ok_or_else(|| Error::GenericError(format!("supportbundle {} is not found", name)))
    }

    async fn done(
        &self,
        namespace: &str,
        name: &str,
        filename: &str,
        filesize: i64,
    ) -> Result<(), Error> {
        let mut bundles = self.bundles.lock().unwrap();
        let status = bundles
            .get_mut(&bundle_key(namespace, name))
            .ok_or_else(|| Error::GenericError(format!("supportbundle {} is not found", name)))?;
        status.state = SupportBundleState::Ready;
        status.progress = 100;
        status.filename = filename.to_owned();
        status.filesize = filesize;
        Ok(())
    }

    async fn set_error(&self, namespace: &str, name: &str, message: &str) -> Result<(), Error> {
        debug!("marking supportbundle {}/{} error: {}", namespace, name, message);
        let mut bundles = self.bundles.lock().unwrap();
        let status = bundles
            .get_mut(&bundle_key(namespace, name))
            .ok_or_else(|| Error::GenericError(format!("supportbundle {} is not found", name)))?;
        status.state = SupportBundleState::Error;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn local_store_tracks_one_bundle() {
        let store = LocalStore::new("demo", "b1");
        assert_eq!(
            store.get_state("demo", "b1").await.unwrap(),
            SupportBundleState::Generating
        );
        assert!(store.get_state("demo", "other").await.is_err());

        store.done("demo", "b1", "bundle.zip", 99).await.unwrap();
        assert_eq!(
            store.get_state("demo", "b1").await.unwrap(),
            SupportBundleState::Ready
        );
    }

    #[tokio::test]
    async fn local_store_records_errors() {
        let store = LocalStore::new("demo", "b1");
        store.set_error("demo", "b1", "phase failed").await.unwrap();
        assert_eq!(
            store.get_state("demo", "b1").await.unwrap(),
            SupportBundleState::Error
        );
    }
}
