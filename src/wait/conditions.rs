//! Reusable wait conditions over cluster objects.
//!
//! Every condition re-fetches its object on each poll. State checks treat
//! fetch errors as "not yet" so a flaky API server only delays the wait.
//! Deletion checks succeed on not-found and fail the wait on any other
//! error.

use std::sync::Arc;

use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::batch::v1::Job;
use k8s_openapi::api::core::v1::Pod;
use tracing::trace;

use crate::klient::{ListOptions, Object, Resources};
use crate::wait::Condition;

/// Pod phase of a running pod.
pub const POD_RUNNING: &str = "Running";

type Check<K> = Arc<dyn Fn(&K) -> bool + Send + Sync>;

#[derive(Debug, Clone)]
struct Identity {
    name: String,
    namespace: String,
}

impl Identity {
    fn of<K: Object>(object: &K) -> Self {
        let meta = object.meta();
        Self {
            name: meta.name.clone().unwrap_or_default(),
            namespace: meta.namespace.clone().unwrap_or_default(),
        }
    }
}

/// Condition constructors bound to one cluster.
#[derive(Debug, Clone)]
pub struct Conditions {
    resources: Resources,
}

impl Conditions {
    pub fn new(resources: Resources) -> Self {
        Self { resources }
    }

    fn state<K: Object>(&self, id: Identity, check: Check<K>) -> Condition {
        let resources = self.resources.clone();
        Box::new(move || {
            let resources = resources.clone();
            let id = id.clone();
            let check = Arc::clone(&check);
            Box::pin(async move {
                match resources.get::<K>(&id.name, &id.namespace).await {
                    Ok(object) => Ok(check(&object)),
                    Err(e) => {
                        trace!(name = %id.name, namespace = %id.namespace, error = %e, "fetch failed, retrying");
                        Ok(false)
                    }
                }
            })
        })
    }

    /// Met once `replicas(object)` equals `expected`.
    pub fn resource_scaled<K, F>(&self, object: &K, replicas: F, expected: i32) -> Condition
    where
        K: Object,
        F: Fn(&K) -> i32 + Send + Sync + 'static,
    {
        self.state(
            Identity::of(object),
            Arc::new(move |o: &K| replicas(o) == expected),
        )
    }

    /// Met once `matcher` accepts the current state of the object.
    pub fn resource_match<K, F>(&self, object: &K, matcher: F) -> Condition
    where
        K: Object,
        F: Fn(&K) -> bool + Send + Sync + 'static,
    {
        self.state(Identity::of(object), Arc::new(matcher))
    }

    /// Met once the object is gone.
    pub fn resource_deleted<K: Object>(&self, object: &K) -> Condition {
        self.resources_deleted(vec![object.clone()])
    }

    /// Met once every object in `objects` is gone.
    pub fn resources_deleted<K: Object>(&self, objects: Vec<K>) -> Condition {
        let resources = self.resources.clone();
        let ids: Arc<Vec<Identity>> = Arc::new(objects.iter().map(Identity::of).collect());
        Box::new(move || {
            let resources = resources.clone();
            let ids = Arc::clone(&ids);
            Box::pin(async move {
                for id in ids.iter() {
                    match resources.get::<K>(&id.name, &id.namespace).await {
                        Ok(_) => return Ok(false),
                        Err(e) if e.is_not_found() => {}
                        Err(e) => return Err(e),
                    }
                }
                Ok(true)
            })
        })
    }

    /// Met once every object in `objects` exists.
    pub fn resources_found<K: Object>(&self, objects: Vec<K>) -> Condition {
        let resources = self.resources.clone();
        let ids: Arc<Vec<Identity>> = Arc::new(objects.iter().map(Identity::of).collect());
        Box::new(move || {
            let resources = resources.clone();
            let ids = Arc::clone(&ids);
            Box::pin(async move {
                for id in ids.iter() {
                    if let Err(e) = resources.get::<K>(&id.name, &id.namespace).await {
                        trace!(name = %id.name, error = %e, "object not found yet");
                        return Ok(false);
                    }
                }
                Ok(true)
            })
        })
    }

    /// Met once listing `K` in `namespace` returns exactly `count` objects.
    pub fn resource_list_n<K: Object>(
        &self,
        namespace: &str,
        options: ListOptions,
        count: usize,
    ) -> Condition {
        self.resource_list_match_n::<K, _>(namespace, options, count, |_| true)
    }

    /// Met once exactly `count` listed objects satisfy `matcher`.
    pub fn resource_list_match_n<K, F>(
        &self,
        namespace: &str,
        options: ListOptions,
        count: usize,
        matcher: F,
    ) -> Condition
    where
        K: Object,
        F: Fn(&K) -> bool + Send + Sync + 'static,
    {
        let resources = self.resources.clone();
        let namespace = namespace.to_owned();
        let options = Arc::new(options);
        let matcher: Check<K> = Arc::new(matcher);
        Box::new(move || {
            let resources = resources.clone();
            let namespace = namespace.clone();
            let options = Arc::clone(&options);
            let matcher = Arc::clone(&matcher);
            Box::pin(async move {
                match resources.list::<K>(&namespace, &options).await {
                    Ok(items) => Ok(items.iter().filter(|o| matcher(o)).count() == count),
                    Err(e) => {
                        trace!(namespace = %namespace, error = %e, "list failed, retrying");
                        Ok(false)
                    }
                }
            })
        })
    }

    /// Met once the object's `status.conditions` holds an entry with the
    /// given type and status. Works for any kind following the usual
    /// condition layout, custom resources included.
    pub fn status_condition_match<K: Object>(
        &self,
        object: &K,
        condition_type: &str,
        status: &str,
    ) -> Condition {
        let condition_type = condition_type.to_owned();
        let status = status.to_owned();
        self.state(
            Identity::of(object),
            Arc::new(move |o: &K| has_status_condition(o, &condition_type, &status)),
        )
    }

    /// Met once the job reports `Complete=True`.
    pub fn job_completed(&self, job: &Job) -> Condition {
        self.status_condition_match(job, "Complete", "True")
    }

    /// Met once the job reports `Failed=True`.
    pub fn job_failed(&self, job: &Job) -> Condition {
        self.status_condition_match(job, "Failed", "True")
    }

    pub fn pod_phase_match(&self, pod: &Pod, phase: &str) -> Condition {
        let phase = phase.to_owned();
        self.resource_match(pod, move |p: &Pod| {
            p.status.as_ref().and_then(|s| s.phase.as_deref()) == Some(phase.as_str())
        })
    }

    pub fn pod_running(&self, pod: &Pod) -> Condition {
        self.pod_phase_match(pod, POD_RUNNING)
    }

    /// Met once the pod's `Ready` condition is `True`.
    pub fn pod_ready(&self, pod: &Pod) -> Condition {
        self.pod_condition_match(pod, "Ready", "True")
    }

    /// Met once the pod's `ContainersReady` condition is `True`.
    pub fn containers_ready(&self, pod: &Pod) -> Condition {
        self.pod_condition_match(pod, "ContainersReady", "True")
    }

    fn pod_condition_match(&self, pod: &Pod, condition_type: &str, status: &str) -> Condition {
        let condition_type = condition_type.to_owned();
        let status = status.to_owned();
        self.resource_match(pod, move |p: &Pod| {
            p.status
                .as_ref()
                .and_then(|s| s.conditions.as_ref())
                .is_some_and(|conds| {
                    conds
                        .iter()
                        .any(|c| c.type_ == condition_type && c.status == status)
                })
        })
    }

    pub fn deployment_condition_match(
        &self,
        deployment: &Deployment,
        condition_type: &str,
        status: &str,
    ) -> Condition {
        let condition_type = condition_type.to_owned();
        let status = status.to_owned();
        self.resource_match(deployment, move |d: &Deployment| {
            d.status
                .as_ref()
                .and_then(|s| s.conditions.as_ref())
                .is_some_and(|conds| {
                    conds
                        .iter()
                        .any(|c| c.type_ == condition_type && c.status == status)
                })
        })
    }

    /// Met once the named deployment reports `Available=True`.
    pub fn deployment_available(&self, name: &str, namespace: &str) -> Condition {
        let mut deployment = Deployment::default();
        deployment.metadata.name = Some(name.to_owned());
        deployment.metadata.namespace = Some(namespace.to_owned());
        self.deployment_condition_match(&deployment, "Available", "True")
    }
}

/// Whether `object.status.conditions` holds a `{type, status}` entry.
pub fn has_status_condition<K: Object>(object: &K, condition_type: &str, status: &str) -> bool {
    let Ok(value) = serde_json::to_value(object) else {
        return false;
    };
    value
        .pointer("/status/conditions")
        .and_then(|c| c.as_array())
        .is_some_and(|conds| {
            conds.iter().any(|c| {
                c.get("type").and_then(|t| t.as_str()) == Some(condition_type)
                    && c.get("status").and_then(|s| s.as_str()) == Some(status)
            })
        })
}
