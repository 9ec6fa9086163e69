//! Ready-made environment functions for the usual cluster lifecycle.
//!
//! Each returns an [`EnvFunc`] that can be registered with any role of an
//! [`Environment`](crate::env::Environment).

use std::marker::PhantomData;
use std::path::PathBuf;

use k8s_openapi::api::core::v1::Namespace;
use kube::api::ObjectMeta;
use tracing::info;

use crate::context::{Context, ContextKey};
use crate::env::action::{EnvFunc, FuncError, env_func};
use crate::klient::decoder::decode_file;
use crate::provider::ClusterProvider;

/// Context key for the provider stored by [`create_cluster`].
pub struct Cluster<P>(PhantomData<fn() -> P>);

impl<P: ClusterProvider + Clone + 'static> ContextKey for Cluster<P> {
    type Value = P;
}

/// Context key for the kubeconfig written by [`create_cluster`].
pub struct Kubeconfig;

impl ContextKey for Kubeconfig {
    type Value = PathBuf;
}

/// Context key for the namespace made by [`create_namespace`].
pub struct TestNamespace;

impl ContextKey for TestNamespace {
    type Value = String;
}

/// Create the cluster, point the configuration at its kubeconfig and keep
/// the provider and kubeconfig path in the context.
pub fn create_cluster<P>(provider: P) -> EnvFunc
where
    P: ClusterProvider + Clone + 'static,
{
    env_func(move |ctx: Context, cfg| {
        let provider = provider.clone();
        async move {
            let kubeconfig = provider.create().await?;
            info!(provider = provider.name(), kubeconfig = %kubeconfig.display(), "cluster ready");
            cfg.set_kubeconfig_file(&kubeconfig);
            Ok::<_, FuncError>(
                ctx.with_value::<Kubeconfig>(kubeconfig)
                    .with_value::<Cluster<P>>(provider),
            )
        }
    })
}

/// Destroy the cluster.
pub fn destroy_cluster<P>(provider: P) -> EnvFunc
where
    P: ClusterProvider + Clone + 'static,
{
    env_func(move |ctx: Context, _cfg| {
        let provider = provider.clone();
        async move {
            provider.destroy().await?;
            info!(provider = provider.name(), "cluster destroyed");
            Ok::<_, FuncError>(ctx.without_value::<Kubeconfig>())
        }
    })
}

/// Create a namespace and make it the configuration's default.
pub fn create_namespace(name: impl Into<String>) -> EnvFunc {
    let name = name.into();
    env_func(move |ctx: Context, cfg| {
        let name = name.clone();
        async move {
            let client = cfg.client().await?;
            let namespace = Namespace {
                metadata: ObjectMeta {
                    name: Some(name.clone()),
                    ..ObjectMeta::default()
                },
                ..Namespace::default()
            };
            client.create(&namespace).await?;
            info!(namespace = %name, "namespace created");
            cfg.set_namespace(name.clone());
            Ok::<_, FuncError>(ctx.with_value::<TestNamespace>(name))
        }
    })
}

/// Delete a namespace. A namespace that is already gone is not an error.
pub fn delete_namespace(name: impl Into<String>) -> EnvFunc {
    let name = name.into();
    env_func(move |ctx: Context, cfg| {
        let name = name.clone();
        async move {
            let client = cfg.client().await?;
            let mut namespace = Namespace::default();
            namespace.metadata.name = Some(name.clone());
            match client.delete(&namespace).await {
                Err(e) if !e.is_not_found() => return Err(e.into()),
                _ => info!(namespace = %name, "namespace deleted"),
            }
            Ok::<_, FuncError>(ctx.without_value::<TestNamespace>())
        }
    })
}

/// Create every object in a manifest file, in document order.
///
/// Objects are created as written; a namespaced object without a
/// namespace must be accepted that way by the cluster.
pub fn apply_manifests(path: impl Into<PathBuf>) -> EnvFunc {
    let path = path.into();
    env_func(move |ctx: Context, cfg| {
        let path = path.clone();
        async move {
            let objects = decode_file(&path)?;
            let client = cfg.client().await?;
            for object in &objects {
                client.create_dynamic(object).await?;
            }
            info!(manifest = %path.display(), objects = objects.len(), "manifest applied");
            Ok::<_, FuncError>(ctx)
        }
    })
}

/// Delete every object in a manifest file, in reverse document order.
/// Objects that are already gone are ignored.
pub fn delete_manifests(path: impl Into<PathBuf>) -> EnvFunc {
    let path = path.into();
    env_func(move |ctx: Context, cfg| {
        let path = path.clone();
        async move {
            let objects = decode_file(&path)?;
            let client = cfg.client().await?;
            for object in objects.iter().rev() {
                client.delete_dynamic(object).await?;
            }
            info!(manifest = %path.display(), objects = objects.len(), "manifest deleted");
            Ok::<_, FuncError>(ctx)
        }
    })
}
