//! Cluster API client boundary.
//!
//! The harness only needs a narrow slice of the Kubernetes API: typed
//! get/list/create/update/delete and a watch stream. [`ClusterClient`] is
//! the object-safe seam over dynamic objects; [`Resources`] is the typed
//! facade hooks and wait conditions use.

pub mod decoder;
pub mod kube;
pub mod memory;

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use futures::StreamExt;
use futures::stream::BoxStream;
use ::kube::Resource;
use ::kube::api::DynamicObject;
use ::kube::discovery::ApiResource;
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::error::{Error, Result};

/// Capability set every typed Kubernetes object offers: identity and
/// metadata through [`kube::Resource`], plus serde for the wire.
pub trait Object:
    Resource<DynamicType = ()> + Clone + Serialize + DeserializeOwned + Send + Sync + 'static
{
}

impl<T> Object for T where
    T: Resource<DynamicType = ()> + Clone + Serialize + DeserializeOwned + Send + Sync + 'static
{
}

/// Label and field selectors for list and watch calls.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListOptions {
    pub label_selector: Option<String>,
    pub field_selector: Option<String>,
}

impl ListOptions {
    pub fn labels(mut self, selector: impl Into<String>) -> Self {
        self.label_selector = Some(selector.into());
        self
    }

    pub fn fields(mut self, selector: impl Into<String>) -> Self {
        self.field_selector = Some(selector.into());
        self
    }
}

/// A change observed through [`ClusterClient::watch`].
#[derive(Debug, Clone)]
pub enum WatchEvent<K> {
    Added(K),
    Modified(K),
    Deleted(K),
}

impl<K> WatchEvent<K> {
    pub fn object(&self) -> &K {
        match self {
            Self::Added(o) | Self::Modified(o) | Self::Deleted(o) => o,
        }
    }

    fn try_map<T>(self, f: impl FnOnce(K) -> Result<T>) -> Result<WatchEvent<T>> {
        Ok(match self {
            Self::Added(o) => WatchEvent::Added(f(o)?),
            Self::Modified(o) => WatchEvent::Modified(f(o)?),
            Self::Deleted(o) => WatchEvent::Deleted(f(o)?),
        })
    }
}

/// Object-safe access to a cluster's API.
///
/// `namespace` is `None` for cluster-scoped kinds or cluster-wide listing.
/// A missing object must be reported as [`Error::NotFound`].
#[async_trait]
pub trait ClusterClient: Send + Sync {
    async fn get(
        &self,
        resource: &ApiResource,
        name: &str,
        namespace: Option<&str>,
    ) -> Result<DynamicObject>;

    async fn list(
        &self,
        resource: &ApiResource,
        namespace: Option<&str>,
        options: &ListOptions,
    ) -> Result<Vec<DynamicObject>>;

    async fn create(&self, resource: &ApiResource, object: &DynamicObject) -> Result<DynamicObject>;

    async fn update(&self, resource: &ApiResource, object: &DynamicObject) -> Result<DynamicObject>;

    async fn delete(&self, resource: &ApiResource, name: &str, namespace: Option<&str>)
    -> Result<()>;

    async fn watch(
        &self,
        resource: &ApiResource,
        namespace: Option<&str>,
        options: &ListOptions,
    ) -> Result<BoxStream<'static, Result<WatchEvent<DynamicObject>>>>;
}

/// Typed facade over a [`ClusterClient`].
#[derive(Clone)]
pub struct Resources {
    client: Arc<dyn ClusterClient>,
}

impl fmt::Debug for Resources {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Resources").finish_non_exhaustive()
    }
}

fn scope(namespace: &str) -> Option<&str> {
    (!namespace.is_empty()).then_some(namespace)
}

/// Convert a typed object into its dynamic form.
pub fn to_dynamic<K: Object>(object: &K) -> Result<DynamicObject> {
    let mut value = serde_json::to_value(object)?;
    if let Some(map) = value.as_object_mut() {
        map.entry("apiVersion")
            .or_insert_with(|| K::api_version(&()).into_owned().into());
        map.entry("kind")
            .or_insert_with(|| K::kind(&()).into_owned().into());
    }
    Ok(serde_json::from_value(value)?)
}

/// Convert a dynamic object back into a typed one.
pub fn from_dynamic<K: Object>(object: DynamicObject) -> Result<K> {
    Ok(serde_json::from_value(serde_json::to_value(object)?)?)
}

impl Resources {
    pub fn new(client: Arc<dyn ClusterClient>) -> Self {
        Self { client }
    }

    /// The untyped client underneath.
    pub fn raw(&self) -> &Arc<dyn ClusterClient> {
        &self.client
    }

    /// Fetch one object. Pass an empty namespace for cluster-scoped kinds.
    pub async fn get<K: Object>(&self, name: &str, namespace: &str) -> Result<K> {
        let ar = ApiResource::erase::<K>(&());
        let object = self.client.get(&ar, name, scope(namespace)).await?;
        from_dynamic(object)
    }

    pub async fn list<K: Object>(&self, namespace: &str, options: &ListOptions) -> Result<Vec<K>> {
        let ar = ApiResource::erase::<K>(&());
        self.client
            .list(&ar, scope(namespace), options)
            .await?
            .into_iter()
            .map(from_dynamic)
            .collect()
    }

    pub async fn create<K: Object>(&self, object: &K) -> Result<K> {
        let ar = ApiResource::erase::<K>(&());
        let created = self.client.create(&ar, &to_dynamic(object)?).await?;
        from_dynamic(created)
    }

    pub async fn update<K: Object>(&self, object: &K) -> Result<K> {
        let ar = ApiResource::erase::<K>(&());
        let updated = self.client.update(&ar, &to_dynamic(object)?).await?;
        from_dynamic(updated)
    }

    pub async fn delete<K: Object>(&self, object: &K) -> Result<()> {
        let ar = ApiResource::erase::<K>(&());
        let name = object.meta().name.clone().unwrap_or_default();
        let namespace = object.meta().namespace.clone().unwrap_or_default();
        self.client.delete(&ar, &name, scope(&namespace)).await
    }

    /// Create an untyped object, such as one decoded from a manifest.
    pub async fn create_dynamic(&self, object: &DynamicObject) -> Result<DynamicObject> {
        let ar = api_resource_of(object)?;
        self.client.create(&ar, object).await
    }

    /// Delete an untyped object. A missing object is not an error.
    pub async fn delete_dynamic(&self, object: &DynamicObject) -> Result<()> {
        let ar = api_resource_of(object)?;
        let name = object.metadata.name.clone().unwrap_or_default();
        let namespace = object.metadata.namespace.clone().unwrap_or_default();
        match self.client.delete(&ar, &name, scope(&namespace)).await {
            Err(e) if e.is_not_found() => Ok(()),
            other => other,
        }
    }

    pub async fn watch<K: Object>(
        &self,
        namespace: &str,
        options: &ListOptions,
    ) -> Result<BoxStream<'static, Result<WatchEvent<K>>>> {
        let ar = ApiResource::erase::<K>(&());
        let stream = self.client.watch(&ar, scope(namespace), options).await?;
        Ok(stream
            .map(|event| event.and_then(|e| e.try_map(from_dynamic::<K>)))
            .boxed())
    }
}

/// Derive the API resource of a dynamic object from its type metadata.
pub fn api_resource_of(object: &DynamicObject) -> Result<ApiResource> {
    let types = object
        .types
        .as_ref()
        .ok_or_else(|| Error::Decode("object has no apiVersion/kind".into()))?;
    let (group, version) = match types.api_version.split_once('/') {
        Some((group, version)) => (group.to_owned(), version.to_owned()),
        None => (String::new(), types.api_version.clone()),
    };
    Ok(ApiResource {
        group,
        version,
        api_version: types.api_version.clone(),
        kind: types.kind.clone(),
        plural: pluralize(&types.kind),
    })
}

/// Lowercase plural of a kind, following the API server's simple rules.
pub fn pluralize(kind: &str) -> String {
    let lower = kind.to_lowercase();
    if lower.ends_with('s') || lower.ends_with("ch") || lower.ends_with('x') {
        format!("{lower}es")
    } else if let Some(stem) = lower.strip_suffix('y')
        && !stem.ends_with(['a', 'e', 'i', 'o', 'u'])
    {
        format!("{stem}ies")
    } else {
        format!("{lower}s")
    }
}

/// Check a `key=value[,key=value]` label selector against a label map.
///
/// Only equality terms are supported; other terms never match.
pub fn selector_matches(
    selector: &str,
    labels: Option<&std::collections::BTreeMap<String, String>>,
) -> bool {
    selector
        .split(',')
        .map(str::trim)
        .filter(|term| !term.is_empty())
        .all(|term| match term.split_once('=') {
            Some((key, value)) => {
                let value = value.trim_start_matches('=');
                labels.and_then(|l| l.get(key.trim())).map(String::as_str) == Some(value.trim())
            }
            None => false,
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::core::v1::{ConfigMap, Pod};
    use std::collections::BTreeMap;

    #[test]
    fn to_dynamic_keeps_type_meta() {
        let mut cm = ConfigMap::default();
        cm.metadata.name = Some("settings".into());
        cm.metadata.namespace = Some("e2e".into());
        let dynamic = to_dynamic(&cm).unwrap();
        let types = dynamic.types.as_ref().unwrap();
        assert_eq!(types.kind, "ConfigMap");
        assert_eq!(types.api_version, "v1");
        assert_eq!(dynamic.metadata.name.as_deref(), Some("settings"));
    }

    #[test]
    fn from_dynamic_restores_typed_object() {
        let mut pod = Pod::default();
        pod.metadata.name = Some("web".into());
        let back: Pod = from_dynamic(to_dynamic(&pod).unwrap()).unwrap();
        assert_eq!(back.metadata.name.as_deref(), Some("web"));
    }

    #[test]
    fn api_resource_of_splits_group() {
        let obj: DynamicObject = serde_json::from_value(serde_json::json!({
            "apiVersion": "apps/v1",
            "kind": "Deployment",
            "metadata": { "name": "web" }
        }))
        .unwrap();
        let ar = api_resource_of(&obj).unwrap();
        assert_eq!(ar.group, "apps");
        assert_eq!(ar.version, "v1");
        assert_eq!(ar.plural, "deployments");
    }

    #[test]
    fn pluralize_common_kinds() {
        assert_eq!(pluralize("Pod"), "pods");
        assert_eq!(pluralize("Ingress"), "ingresses");
        assert_eq!(pluralize("NetworkPolicy"), "networkpolicies");
        assert_eq!(pluralize("Gateway"), "gateways");
    }

    #[test]
    fn selector_matches_equality_terms() {
        let labels: BTreeMap<String, String> =
            [("app".to_owned(), "web".to_owned()), ("tier".to_owned(), "fe".to_owned())]
                .into_iter()
                .collect();
        assert!(selector_matches("app=web", Some(&labels)));
        assert!(selector_matches("app==web, tier=fe", Some(&labels)));
        assert!(!selector_matches("app=db", Some(&labels)));
        assert!(!selector_matches("app", Some(&labels)));
        assert!(!selector_matches("app=web", None));
        assert!(selector_matches("", None));
    }
}
