use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use futures::stream::BoxStream;
use ::kube::api::{
    Api, DeleteParams, DynamicObject, ListParams, PostParams, WatchEvent as KubeWatchEvent,
    WatchParams,
};
use ::kube::config::{KubeConfigOptions, Kubeconfig};
use ::kube::discovery::ApiResource;
use ::kube::{Client, Config};
use tracing::debug;

use crate::error::{Error, Result};
use crate::klient::{ClusterClient, ListOptions, WatchEvent};

/// Default connection timeout for kube clients.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
/// Default read timeout for kube clients.
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(30);

/// [`ClusterClient`] backed by a live API server.
#[derive(Clone)]
pub struct KubeClient {
    client: Client,
}

impl KubeClient {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// Connect using a kubeconfig file, or the inferred configuration
    /// (`KUBECONFIG`, `~/.kube/config`, in-cluster) when `kubeconfig` is `None`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Cluster`] if the kubeconfig cannot be read or the
    /// client cannot be built.
    pub async fn connect(kubeconfig: Option<&Path>) -> Result<Self> {
        let mut config = match kubeconfig {
            Some(path) => {
                debug!(kubeconfig = %path.display(), "loading kubeconfig");
                let kubeconfig = Kubeconfig::read_from(path)
                    .map_err(|e| Error::cluster(format!("failed to read kubeconfig: {e}")))?;
                Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default())
                    .await
                    .map_err(|e| Error::cluster(format!("failed to load kubeconfig: {e}")))?
            }
            None => Config::infer()
                .await
                .map_err(|e| Error::cluster(format!("failed to infer config: {e}")))?,
        };
        config.connect_timeout = Some(DEFAULT_CONNECT_TIMEOUT);
        config.read_timeout = Some(DEFAULT_READ_TIMEOUT);
        let client = Client::try_from(config)
            .map_err(|e| Error::cluster(format!("failed to create client: {e}")))?;
        Ok(Self { client })
    }

    pub fn inner(&self) -> &Client {
        &self.client
    }

    fn api(&self, resource: &ApiResource, namespace: Option<&str>) -> Api<DynamicObject> {
        match namespace {
            Some(ns) => Api::namespaced_with(self.client.clone(), ns, resource),
            None => Api::all_with(self.client.clone(), resource),
        }
    }
}

fn map_err(e: ::kube::Error, kind: &str, name: &str) -> Error {
    match e {
        ::kube::Error::Api(response) if response.code == 404 => Error::NotFound {
            kind: kind.to_owned(),
            name: name.to_owned(),
        },
        other => Error::cluster(format!("{kind} \"{name}\": {other}")),
    }
}

fn list_params(options: &ListOptions) -> ListParams {
    let mut params = ListParams::default();
    if let Some(labels) = &options.label_selector {
        params = params.labels(labels);
    }
    if let Some(fields) = &options.field_selector {
        params = params.fields(fields);
    }
    params
}

fn watch_params(options: &ListOptions) -> WatchParams {
    let mut params = WatchParams::default();
    if let Some(labels) = &options.label_selector {
        params = params.labels(labels);
    }
    if let Some(fields) = &options.field_selector {
        params = params.fields(fields);
    }
    params
}

fn object_name(object: &DynamicObject) -> String {
    object.metadata.name.clone().unwrap_or_default()
}

#[async_trait]
impl ClusterClient for KubeClient {
    async fn get(
        &self,
        resource: &ApiResource,
        name: &str,
        namespace: Option<&str>,
    ) -> Result<DynamicObject> {
        self.api(resource, namespace)
            .get(name)
            .await
            .map_err(|e| map_err(e, &resource.kind, name))
    }

    async fn list(
        &self,
        resource: &ApiResource,
        namespace: Option<&str>,
        options: &ListOptions,
    ) -> Result<Vec<DynamicObject>> {
        let list = self
            .api(resource, namespace)
            .list(&list_params(options))
            .await
            .map_err(|e| map_err(e, &resource.kind, "*"))?;
        Ok(list.items)
    }

    async fn create(&self, resource: &ApiResource, object: &DynamicObject) -> Result<DynamicObject> {
        let name = object_name(object);
        self.api(resource, object.metadata.namespace.as_deref())
            .create(&PostParams::default(), object)
            .await
            .map_err(|e| map_err(e, &resource.kind, &name))
    }

    async fn update(&self, resource: &ApiResource, object: &DynamicObject) -> Result<DynamicObject> {
        let name = object_name(object);
        self.api(resource, object.metadata.namespace.as_deref())
            .replace(&name, &PostParams::default(), object)
            .await
            .map_err(|e| map_err(e, &resource.kind, &name))
    }

    async fn delete(
        &self,
        resource: &ApiResource,
        name: &str,
        namespace: Option<&str>,
    ) -> Result<()> {
        self.api(resource, namespace)
            .delete(name, &DeleteParams::default())
            .await
            .map(|_| ())
            .map_err(|e| map_err(e, &resource.kind, name))
    }

    async fn watch(
        &self,
        resource: &ApiResource,
        namespace: Option<&str>,
        options: &ListOptions,
    ) -> Result<BoxStream<'static, Result<WatchEvent<DynamicObject>>>> {
        let kind = resource.kind.clone();
        let stream = self
            .api(resource, namespace)
            .watch(&watch_params(options), "0")
            .await
            .map_err(|e| map_err(e, &kind, "*"))?;
        Ok(stream
            .filter_map(move |event| {
                let kind = kind.clone();
                async move {
                    match event {
                        Ok(KubeWatchEvent::Added(o)) => Some(Ok(WatchEvent::Added(o))),
                        Ok(KubeWatchEvent::Modified(o)) => Some(Ok(WatchEvent::Modified(o))),
                        Ok(KubeWatchEvent::Deleted(o)) => Some(Ok(WatchEvent::Deleted(o))),
                        Ok(KubeWatchEvent::Bookmark(_)) => None,
                        Ok(KubeWatchEvent::Error(status)) => Some(Err(Error::cluster(format!(
                            "watch {kind}: {} ({})",
                            status.message, status.code
                        )))),
                        Err(e) => Some(Err(map_err(e, &kind, "*"))),
                    }
                }
            })
            .boxed())
    }
}
