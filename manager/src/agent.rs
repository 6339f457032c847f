use std::collections::BTreeMap;
use std::time::Duration;

use k8s_openapi::api::apps::v1::{DaemonSet, DaemonSetSpec};
use k8s_openapi::api::core::v1::{
    Capabilities, Container, EnvVar, EnvVarSource, HostPathVolumeSource, LocalObjectReference,
    ObjectFieldSelector, Pod, PodSpec, PodTemplateSpec, SecurityContext, Toleration, Volume,
    VolumeMount,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, OwnerReference};
use kube::api::{Api, DeleteParams, ListParams, ObjectMeta, PostParams};
use kube::{Client, ResourceExt};
use tracing::{debug, info};

use bundlekit_common::Error;
use bundlekit_types::{APP_AGENT, APP_MANAGER, SUPPORT_BUNDLE_LABEL_KEY};

/// How often the scheduling wait re-polls the daemonset.
const SCHEDULE_POLL_INTERVAL: Duration = Duration::from_secs(5);

/// Hard deadline for all agent pods to be assigned a node.
const SCHEDULE_POLL_DEADLINE: Duration = Duration::from_secs(300);

/// The per-node agent fleet, realized as a daemonset owned by the
/// manager pod so that deleting the manager garbage-collects the agents.
pub struct AgentDaemonSet {
    client: Client,
    pod_namespace: String,
    bundle_name: String,
    image: String,
    image_pull_policy: String,
    manager_url: String,
    collector: String,
    node_selector: BTreeMap<String, String>,
    tolerations: Vec<Toleration>,
    registry_secret: String,
}

impl AgentDaemonSet {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        client: Client,
        pod_namespace: String,
        bundle_name: String,
        image: String,
        image_pull_policy: String,
        manager_url: String,
        collector: String,
        node_selector: BTreeMap<String, String>,
        tolerations: Vec<Toleration>,
        registry_secret: String,
    ) -> Self {
        AgentDaemonSet {
            client,
            pod_namespace,
            bundle_name,
            image,
            image_pull_policy,
            manager_url,
            collector,
            node_selector,
            tolerations,
            registry_secret,
        }
    }

    fn daemonset_name(&self) -> String {
        format!("supportbundle-agent-{}", self.bundle_name)
    }

    fn agent_labels(&self) -> BTreeMap<String, String> {
        let mut labels = BTreeMap::new();
        labels.insert("app".to_owned(), APP_AGENT.to_owned());
        labels.insert(SUPPORT_BUNDLE_LABEL_KEY.to_owned(), self.bundle_name.clone());
        labels
    }

    fn agent_label_selector(&self) -> String {
        format!(
            "app={},{}={}",
            APP_AGENT, SUPPORT_BUNDLE_LABEL_KEY, self.bundle_name
        )
    }

    /// Looks up the manager's own pod, which anchors the daemonset's
    /// owner reference.
    async fn manager_pod(&self) -> Result<Pod, Error> {
        let pods: Api<Pod> = Api::namespaced(self.client.clone(), &self.pod_namespace);
        let selector = format!(
            "app={},{}={}",
            APP_MANAGER, SUPPORT_BUNDLE_LABEL_KEY, self.bundle_name
        );
        let list = pods.list(&ListParams::default().labels(&selector)).await?;
        let count = list.items.len();
        match list.items.into_iter().next() {
            Some(pod) if count == 1 => Ok(pod),
            _ => Err(Error::GenericError(format!(
                "expected exactly one support bundle manager pod, found {}",
                count
            ))),
        }
    }

    pub async fn create(&self) -> Result<(), Error> {
        let ds_name = self.daemonset_name();
        debug!("creating daemonset {} with image {}", ds_name, self.image);

        let manager_pod = self.manager_pod().await?;
        let owner = OwnerReference {
            api_version: "v1".to_owned(),
            kind: "Pod".to_owned(),
            name: manager_pod.name_any(),
            uid: manager_pod.metadata.uid.clone().unwrap_or_default(),
            ..OwnerReference::default()
        };

        let tolerations = if self.tolerations.is_empty() {
            // No tolerations configured: tolerate everything so that the
            // fleet also lands on cordoned or tainted nodes.
            vec![Toleration {
                operator: Some("Exists".to_owned()),
                ..Toleration::default()
            }]
        } else {
            self.tolerations.clone()
        };

        let daemon_set = DaemonSet {
            metadata: ObjectMeta {
                name: Some(ds_name),
                namespace: Some(self.pod_namespace.clone()),
                owner_references: Some(vec![owner]),
                ..ObjectMeta::default()
            },
            spec: Some(DaemonSetSpec {
                selector: LabelSelector {
                    match_labels: Some(self.agent_labels()),
                    ..LabelSelector::default()
                },
                template: PodTemplateSpec {
                    metadata: Some(ObjectMeta {
                        labels: Some(self.agent_labels()),
                        ..ObjectMeta::default()
                    }),
                    spec: Some(PodSpec {
                        node_selector: if self.node_selector.is_empty() {
                            None
                        } else {
                            Some(self.node_selector.clone())
                        },
                        tolerations: Some(tolerations),
                        image_pull_secrets: if self.registry_secret.is_empty() {
                            None
                        } else {
                            Some(vec![LocalObjectReference {
                                name: Some(self.registry_secret.clone()),
                            }])
                        },
                        containers: vec![Container {
                            name: "agent".to_owned(),
                            image: Some(self.image.clone()),
                            args: Some(vec!["/usr/bin/support-bundle-collector.sh".to_owned()]),
                            image_pull_policy: Some(self.image_pull_policy.clone()),
                            security_context: Some(SecurityContext {
                                capabilities: Some(Capabilities {
                                    add: Some(vec!["SYSLOG".to_owned()]),
                                    ..Capabilities::default()
                                }),
                                ..SecurityContext::default()
                            }),
                            env: Some(vec![
                                EnvVar {
                                    name: "SUPPORT_BUNDLE_HOST_PATH".to_owned(),
                                    value: Some("/host".to_owned()),
                                    ..EnvVar::default()
                                },
                                EnvVar {
                                    name: "SUPPORT_BUNDLE_NODE_NAME".to_owned(),
                                    value_from: Some(EnvVarSource {
                                        field_ref: Some(ObjectFieldSelector {
                                            field_path: "spec.nodeName".to_owned(),
                                            ..ObjectFieldSelector::default()
                                        }),
                                        ..EnvVarSource::default()
                                    }),
                                    ..EnvVar::default()
                                },
                                EnvVar {
                                    name: "SUPPORT_BUNDLE_MANAGER_URL".to_owned(),
                                    value: Some(self.manager_url.clone()),
                                    ..EnvVar::default()
                                },
                                EnvVar {
                                    name: "SUPPORT_BUNDLE_COLLECTOR".to_owned(),
                                    value: Some(self.collector.clone()),
                                    ..EnvVar::default()
                                },
                            ]),
                            volume_mounts: Some(vec![VolumeMount {
                                name: "host".to_owned(),
                                mount_path: "/host".to_owned(),
                                ..VolumeMount::default()
                            }]),
                            ..Container::default()
                        }],
                        volumes: Some(vec![Volume {
                            name: "host".to_owned(),
                            host_path: Some(HostPathVolumeSource {
                                path: "/".to_owned(),
                                ..HostPathVolumeSource::default()
                            }),
                            ..Volume::default()
                        }]),
                        ..PodSpec::default()
                    }),
                },
                ..DaemonSetSpec::default()
            }),
            ..DaemonSet::default()
        };

        let api: Api<DaemonSet> = Api::namespaced(self.client.clone(), &self.pod_namespace);
        api.create(&PostParams::default(), &daemon_set).await?;
        Ok(())
    }

    /// Waits until every pod the daemonset wants has been assigned a
    /// node, then returns the node names hosting agent pods.
    pub async fn wait_nodes_scheduled(&self) -> Result<Vec<String>, Error> {
        let ds_api: Api<DaemonSet> = Api::namespaced(self.client.clone(), &self.pod_namespace);
        let pod_api: Api<Pod> = Api::namespaced(self.client.clone(), &self.pod_namespace);
        let selector = self.agent_label_selector();

        let deadline = tokio::time::Instant::now() + SCHEDULE_POLL_DEADLINE;
        loop {
            let ds = ds_api.get(&self.daemonset_name()).await?;
            let desired = ds
                .status
                .as_ref()
                .map(|s| s.desired_number_scheduled)
                .unwrap_or(0);

            let pods = pod_api.list(&ListParams::default().labels(&selector)).await?;
            let scheduled: Vec<String> = pods
                .items
                .iter()
                .filter_map(|p| p.spec.as_ref().and_then(|s| s.node_name.clone()))
                .filter(|n| !n.is_empty())
                .collect();

            if desired > 0 && desired as usize == scheduled.len() {
                return Ok(scheduled);
            }

            if tokio::time::Instant::now() >= deadline {
                return Err(Error::GenericError(format!(
                    "timed out waiting for agents to be scheduled ({}/{} pods placed)",
                    scheduled.len(),
                    desired
                )));
            }
            info!(
                "waiting for agents to be scheduled: {}/{}",
                scheduled.len(),
                desired
            );
            tokio::time::sleep(SCHEDULE_POLL_INTERVAL).await;
        }
    }

    pub async fn cleanup(&self) -> Result<(), Error> {
        let api: Api<DaemonSet> = Api::namespaced(self.client.clone(), &self.pod_namespace);
        match api
            .delete(&self.daemonset_name(), &DeleteParams::default())
            .await
        {
            Ok(_) => Ok(()),
            Err(kube::Error::Api(ae)) if ae.code == 404 => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// Parses a `k1=v1,k2=v2` node selector into a label map.
pub fn parse_node_selector(raw: &str) -> Result<BTreeMap<String, String>, Error> {
    let mut selector = BTreeMap::new();
    for pair in raw.split(',').filter(|p| !p.trim().is_empty()) {
        let (key, value) = pair
            .trim()
            .split_once('=')
            .ok_or_else(|| Error::ConfigError(format!("invalid node selector entry {}", pair)))?;
        selector.insert(key.to_owned(), value.to_owned());
    }
    Ok(selector)
}

/// Parses a comma-separated toleration list.
pub fn parse_tolerations(raw: &str) -> Result<Vec<Toleration>, Error> {
    raw.split(',')
        .filter(|t| !t.trim().is_empty())
        .map(parse_toleration)
        .collect()
}

/// Parses a single `key=value:Effect` or `key:Effect` toleration.
/// Unknown effects are rejected.
pub fn parse_toleration(raw: &str) -> Result<Toleration, Error> {
    let raw = raw.trim();
    let (pair, effect) = raw
        .split_once(':')
        .ok_or_else(|| Error::TolerationError(raw.to_owned()))?;

    match effect {
        "NoSchedule" | "NoExecute" | "PreferNoSchedule" => {}
        _ => return Err(Error::TolerationError(raw.to_owned())),
    }

    let parts: Vec<&str> = pair.split('=').collect();
    let (key, value, operator) = match parts.as_slice() {
        [key] => (*key, "", "Exists"),
        [key, value] => (*key, *value, "Equal"),
        _ => return Err(Error::TolerationError(raw.to_owned())),
    };

    Ok(Toleration {
        key: Some(key.to_owned()),
        value: if value.is_empty() {
            None
        } else {
            Some(value.to_owned())
        },
        operator: Some(operator.to_owned()),
        effect: Some(effect.to_owned()),
        ..Toleration::default()
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_exists_toleration() {
        let t = parse_toleration("key:NoSchedule").unwrap();
        assert_eq!(t.key.as_deref(), Some("key"));
        assert_eq!(t.value, None);
        assert_eq!(t.operator.as_deref(), Some("Exists"));
        assert_eq!(t.effect.as_deref(), Some("NoSchedule"));
    }

    #[test]
    fn parses_equal_toleration() {
        let t = parse_toleration("key=value:NoExecute").unwrap();
        assert_eq!(t.key.as_deref(), Some("key"));
        assert_eq!(t.value.as_deref(), Some("value"));
        assert_eq!(t.operator.as_deref(), Some("Equal"));
        assert_eq!(t.effect.as_deref(), Some("NoExecute"));

        let t = parse_toleration("key=value:PreferNoSchedule").unwrap();
        assert_eq!(t.effect.as_deref(), Some("PreferNoSchedule"));
    }

    #[test]
    fn rejects_unknown_effect() {
        assert!(parse_toleration("key:InvalidEffect").is_err());
    }

    #[test]
    fn rejects_malformed_pairs() {
        assert!(parse_toleration("key=value=NoSchedule").is_err());
        assert!(parse_toleration("key=a=b:NoSchedule").is_err());
    }

    #[test]
    fn parses_toleration_lists() {
        let ts = parse_tolerations("a:NoSchedule, b=c:NoExecute").unwrap();
        assert_eq!(ts.len(), 2);
        assert!(parse_tolerations("").unwrap().is_empty());
        assert!(parse_tolerations("a:Bogus").is_err());
    }

    #[test]
    fn parses_node_selectors() {
        let sel = parse_node_selector("zone=a,tier=infra").unwrap();
        assert_eq!(sel.get("zone").map(String::as_str), Some("a"));
        assert_eq!(sel.get("tier").map(String::as_str), Some("infra"));
        assert!(parse_node_selector("").unwrap().is_empty());
        assert!(parse_node_selector("oops").is_err());
    }
}
