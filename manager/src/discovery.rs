use http::Request;
use kube::discovery::{verbs, Discovery, Scope};
use kube::Client;
use serde_json::Value;
use std::collections::HashMap;
use tracing::{debug, error};

use bundlekit_common::Error;

use crate::cluster::ErrorLog;

/// A `(group, resource)` pair used to filter discovery results. The
/// empty group denotes core `v1`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GroupResource {
    pub group: String,
    pub resource: String,
}

impl GroupResource {
    /// Parses the `group.resource` flag syntax. A bare resource name has
    /// the core group; everything before the last dot is the group.
    pub fn parse(s: &str) -> Option<Self> {
        let s = s.trim();
        if s.is_empty() {
            return None;
        }
        let (group, resource) = match s.rsplit_once('.') {
            Some((group, resource)) => (group.to_owned(), resource.to_owned()),
            None => (String::new(), s.to_owned()),
        };
        Some(GroupResource { group, resource })
    }
}

/// Callback applied to every raw list response. Returning `None` omits
/// the resource (typically an empty list).
pub type ParseFn<'a> =
    &'a (dyn Fn(&str, &str, &str, &[String]) -> Result<Option<Value>, Error> + Sync);

/// Enumerates the server's preferred resources and fetches each resource
/// list raw, handing the body to the caller's parse callback. One failing
/// resource never aborts the walk; failures go to the bundle error log.
pub struct DiscoveryClient {
    client: Client,
}

struct DiscoveredResource {
    group: String,
    group_version: String,
    kind: String,
    plural: String,
    namespaced: bool,
}

impl DiscoveryClient {
    pub fn new(client: Client) -> Self {
        DiscoveryClient { client }
    }

    async fn preferred_resources(&self) -> Result<Vec<DiscoveredResource>, Error> {
        let discovery = Discovery::new(self.client.clone()).run().await?;
        let mut resources = Vec::new();
        for group in discovery.groups() {
            for (ar, caps) in group.recommended_resources() {
                if !caps.supports_operation(verbs::LIST) {
                    continue;
                }
                let group_version = if ar.group.is_empty() {
                    ar.version.clone()
                } else {
                    format!("{}/{}", ar.group, ar.version)
                };
                resources.push(DiscoveredResource {
                    group: ar.group.clone(),
                    group_version,
                    kind: ar.kind.clone(),
                    plural: ar.plural.clone(),
                    namespaced: matches!(caps.scope, Scope::Namespaced),
                });
            }
        }
        Ok(resources)
    }

    async fn collect(
        &self,
        resources: Vec<DiscoveredResource>,
        namespace: Option<&str>,
        targets: &[String],
        parse: ParseFn<'_>,
        err_log: &ErrorLog,
    ) -> HashMap<String, Value> {
        let mut objs = HashMap::new();
        for resource in resources {
            let url = resource_url(
                &resource.group,
                &resource.group_version,
                &resource.plural,
                namespace,
            );
            let body = match self.get_raw(&url).await {
                Ok(body) => body,
                Err(e) => {
                    debug!("failed to get {}: {}", url, e);
                    err_log.write(format_args!("Failed to get {}: {}", url, e));
                    continue;
                }
            };
            match parse(&body, &resource.group_version, &resource.kind, targets) {
                Ok(Some(obj)) => {
                    objs.insert(
                        format!("{}/{}", resource.group_version, resource.plural),
                        obj,
                    );
                }
                Ok(None) => {
                    debug!(
                        "no {}/{} resources, skip",
                        resource.group_version, resource.plural
                    );
                }
                Err(e) => {
                    // Unexpected, but keep trying the other resources.
                    error!("failed to parse objects received from {}: {}", url, e);
                    err_log.write(format_args!(
                        "Failed to parse objects received from {}: {}",
                        url, e
                    ));
                }
            }
        }
        objs
    }

    async fn get_raw(&self, url: &str) -> Result<String, Error> {
        let request = Request::get(url).body(Vec::new())?;
        Ok(self.client.request_text(request).await?)
    }

    /// Fetches every cluster-scoped resource not matched by `exclude`.
    pub async fn resources_for_cluster(
        &self,
        parse: ParseFn<'_>,
        exclude: &[GroupResource],
        err_log: &ErrorLog,
    ) -> Result<HashMap<String, Value>, Error> {
        let resources = self
            .preferred_resources()
            .await?
            .into_iter()
            .filter(|r| !r.namespaced && !is_excluded(exclude, r))
            .collect();
        Ok(self.collect(resources, None, &[], parse, err_log).await)
    }

    /// Fetches every namespaced resource in `namespace` not matched by
    /// `exclude`.
    pub async fn resources_for_namespace(
        &self,
        parse: ParseFn<'_>,
        namespace: &str,
        exclude: &[GroupResource],
        err_log: &ErrorLog,
    ) -> Result<HashMap<String, Value>, Error> {
        let resources = self
            .preferred_resources()
            .await?
            .into_iter()
            .filter(|r| r.namespaced && !is_excluded(exclude, r))
            .collect();
        Ok(self
            .collect(resources, Some(namespace), &[], parse, err_log)
            .await)
    }

    /// Fetches only the named resources in `namespace`, passing the
    /// target list through to the parse callback for per-resource
    /// filtering.
    pub async fn specific_resources_for_namespace(
        &self,
        parse: ParseFn<'_>,
        namespace: &str,
        target_resources: &[String],
        err_log: &ErrorLog,
    ) -> Result<HashMap<String, Value>, Error> {
        let resources = self
            .preferred_resources()
            .await?
            .into_iter()
            .filter(|r| r.namespaced && target_resources.contains(&r.plural))
            .collect();
        Ok(self
            .collect(resources, Some(namespace), target_resources, parse, err_log)
            .await)
    }

    /// Cluster-scoped variant of the allow-listed fetch.
    pub async fn specific_resources_for_cluster(
        &self,
        parse: ParseFn<'_>,
        target_resources: &[String],
        err_log: &ErrorLog,
    ) -> Result<HashMap<String, Value>, Error> {
        let resources = self
            .preferred_resources()
            .await?
            .into_iter()
            .filter(|r| !r.namespaced && target_resources.contains(&r.plural))
            .collect();
        Ok(self
            .collect(resources, None, target_resources, parse, err_log)
            .await)
    }
}

fn is_excluded(exclude: &[GroupResource], resource: &DiscoveredResource) -> bool {
    exclude
        .iter()
        .any(|e| e.group == resource.group && e.resource == resource.plural)
}

/// Builds the list URL for a resource. Core `v1` lives under the `api`
/// prefix; every other group under `apis`.
fn resource_url(group: &str, group_version: &str, plural: &str, namespace: Option<&str>) -> String {
    let prefix = if group.is_empty() { "api" } else { "apis" };
    match namespace {
        Some(ns) => format!("/{}/{}/namespaces/{}/{}", prefix, group_version, ns, plural),
        None => format!("/{}/{}/{}", prefix, group_version, plural),
    }
}
