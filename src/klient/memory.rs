use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use async_trait::async_trait;
use futures::StreamExt;
use futures::stream::BoxStream;
use ::kube::api::DynamicObject;
use ::kube::discovery::ApiResource;
use parking_lot::Mutex;
use tokio::sync::broadcast;

use crate::error::{Error, Result};
use crate::klient::{ClusterClient, ListOptions, WatchEvent, selector_matches};

const WATCH_CHANNEL_CAPACITY: usize = 256;

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
struct ObjectKey {
    api_version: String,
    kind: String,
    namespace: String,
    name: String,
}

impl ObjectKey {
    fn new(resource: &ApiResource, name: &str, namespace: Option<&str>) -> Self {
        Self {
            api_version: resource.api_version.clone(),
            kind: resource.kind.clone(),
            namespace: namespace.unwrap_or_default().to_owned(),
            name: name.to_owned(),
        }
    }

    fn same_collection(&self, resource: &ApiResource, namespace: Option<&str>) -> bool {
        self.api_version == resource.api_version
            && self.kind == resource.kind
            && namespace.is_none_or(|ns| self.namespace == ns)
    }
}

/// In-memory [`ClusterClient`] for exercising hooks and wait conditions
/// without a cluster.
///
/// Objects are keyed by apiVersion, kind, namespace and name. Creating an
/// existing object or updating/deleting a missing one fails the way the API
/// server would. Every write is broadcast to open watches.
pub struct MemoryCluster {
    objects: Mutex<BTreeMap<ObjectKey, DynamicObject>>,
    events: broadcast::Sender<(ObjectKey, WatchEvent<DynamicObject>)>,
    resource_version: AtomicU64,
    failing_reads: AtomicUsize,
    reads: AtomicUsize,
}

impl MemoryCluster {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(WATCH_CHANNEL_CAPACITY);
        Self {
            objects: Mutex::new(BTreeMap::new()),
            events,
            resource_version: AtomicU64::new(1),
            failing_reads: AtomicUsize::new(0),
            reads: AtomicUsize::new(0),
        }
    }

    /// Make the next `count` get/list calls fail with a transient error.
    pub fn fail_next_reads(&self, count: usize) {
        self.failing_reads.store(count, Ordering::SeqCst);
    }

    /// Total get/list calls served so far, failed ones included.
    pub fn reads(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }

    /// Number of stored objects.
    pub fn len(&self) -> usize {
        self.objects.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.lock().is_empty()
    }

    fn read_attempt(&self) -> Result<()> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        let injected = self
            .failing_reads
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
        match injected {
            Ok(_) => Err(Error::cluster("injected transient failure")),
            Err(_) => Ok(()),
        }
    }

    fn stamp(&self, object: &mut DynamicObject, resource: &ApiResource) {
        let version = self.resource_version.fetch_add(1, Ordering::SeqCst);
        object.metadata.resource_version = Some(version.to_string());
        if object.metadata.uid.is_none() {
            object.metadata.uid = Some(uuid::Uuid::new_v4().to_string());
        }
        if object.types.is_none() {
            object.types = Some(::kube::api::TypeMeta {
                api_version: resource.api_version.clone(),
                kind: resource.kind.clone(),
            });
        }
    }

    fn publish(&self, key: ObjectKey, event: WatchEvent<DynamicObject>) {
        // No receivers is fine: nobody is watching.
        let _ = self.events.send((key, event));
    }
}

impl Default for MemoryCluster {
    fn default() -> Self {
        Self::new()
    }
}

fn key_of(resource: &ApiResource, object: &DynamicObject) -> Result<ObjectKey> {
    let name = object
        .metadata
        .name
        .as_deref()
        .filter(|n| !n.is_empty())
        .ok_or_else(|| Error::cluster(format!("{}: metadata.name is required", resource.kind)))?;
    Ok(ObjectKey::new(
        resource,
        name,
        object.metadata.namespace.as_deref(),
    ))
}

fn matches(object: &DynamicObject, options: &ListOptions) -> bool {
    let labels_ok = options
        .label_selector
        .as_deref()
        .is_none_or(|sel| selector_matches(sel, object.metadata.labels.as_ref()));
    let fields_ok = options.field_selector.as_deref().is_none_or(|sel| {
        sel.split(',').map(str::trim).all(|term| match term.split_once('=') {
            Some(("metadata.name", v)) => object.metadata.name.as_deref() == Some(v),
            Some(("metadata.namespace", v)) => object.metadata.namespace.as_deref() == Some(v),
            _ => false,
        })
    });
    labels_ok && fields_ok
}

#[async_trait]
impl ClusterClient for MemoryCluster {
    async fn get(
        &self,
        resource: &ApiResource,
        name: &str,
        namespace: Option<&str>,
    ) -> Result<DynamicObject> {
        self.read_attempt()?;
        self.objects
            .lock()
            .get(&ObjectKey::new(resource, name, namespace))
            .cloned()
            .ok_or_else(|| Error::NotFound {
                kind: resource.kind.clone(),
                name: name.to_owned(),
            })
    }

    async fn list(
        &self,
        resource: &ApiResource,
        namespace: Option<&str>,
        options: &ListOptions,
    ) -> Result<Vec<DynamicObject>> {
        self.read_attempt()?;
        Ok(self
            .objects
            .lock()
            .iter()
            .filter(|(key, obj)| key.same_collection(resource, namespace) && matches(obj, options))
            .map(|(_, obj)| obj.clone())
            .collect())
    }

    async fn create(&self, resource: &ApiResource, object: &DynamicObject) -> Result<DynamicObject> {
        let key = key_of(resource, object)?;
        let mut stored = object.clone();
        {
            let mut objects = self.objects.lock();
            if objects.contains_key(&key) {
                return Err(Error::cluster(format!(
                    "{} \"{}\" already exists",
                    key.kind, key.name
                )));
            }
            self.stamp(&mut stored, resource);
            objects.insert(key.clone(), stored.clone());
        }
        self.publish(key, WatchEvent::Added(stored.clone()));
        Ok(stored)
    }

    async fn update(&self, resource: &ApiResource, object: &DynamicObject) -> Result<DynamicObject> {
        let key = key_of(resource, object)?;
        let mut stored = object.clone();
        {
            let mut objects = self.objects.lock();
            let Some(existing) = objects.get_mut(&key) else {
                return Err(Error::NotFound {
                    kind: key.kind.clone(),
                    name: key.name.clone(),
                });
            };
            stored.metadata.uid = existing.metadata.uid.clone();
            self.stamp(&mut stored, resource);
            *existing = stored.clone();
        }
        self.publish(key, WatchEvent::Modified(stored.clone()));
        Ok(stored)
    }

    async fn delete(
        &self,
        resource: &ApiResource,
        name: &str,
        namespace: Option<&str>,
    ) -> Result<()> {
        let key = ObjectKey::new(resource, name, namespace);
        let removed = self.objects.lock().remove(&key);
        match removed {
            Some(object) => {
                self.publish(key, WatchEvent::Deleted(object));
                Ok(())
            }
            None => Err(Error::NotFound {
                kind: resource.kind.clone(),
                name: name.to_owned(),
            }),
        }
    }

    async fn watch(
        &self,
        resource: &ApiResource,
        namespace: Option<&str>,
        options: &ListOptions,
    ) -> Result<BoxStream<'static, Result<WatchEvent<DynamicObject>>>> {
        let receiver = self.events.subscribe();
        let resource = resource.clone();
        let namespace = namespace.map(str::to_owned);
        let options = options.clone();

        let stream = futures::stream::unfold(receiver, |mut rx| async move {
            loop {
                match rx.recv().await {
                    Ok(item) => return Some((item, rx)),
                    Err(broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(broadcast::error::RecvError::Closed) => return None,
                }
            }
        })
        .filter(move |(key, event)| {
            let keep = key.same_collection(&resource, namespace.as_deref())
                && matches(event.object(), &options);
            futures::future::ready(keep)
        })
        .map(|(_, event)| Ok(event));
        Ok(stream.boxed())
    }
}
