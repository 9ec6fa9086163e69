//! Wait engine against an in-memory cluster, on its own and from inside
//! feature steps.

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use k8s_openapi::api::apps::v1::{Deployment, DeploymentCondition, DeploymentStatus};
use k8s_openapi::api::core::v1::{Pod, PodStatus};
use kube::api::ObjectMeta;
use tokio::time::Instant;

use kube_e2e::Error;
use kube_e2e::context::Context;
use kube_e2e::env::Environment;
use kube_e2e::envconf::Config;
use kube_e2e::error::WaitError;
use kube_e2e::features::FeatureBuilder;
use kube_e2e::klient::memory::MemoryCluster;
use kube_e2e::klient::{ListOptions, Resources};
use kube_e2e::testing::TestHandle;
use kube_e2e::testing::result::TestStatus;
use kube_e2e::wait::conditions::{Conditions, POD_RUNNING};
use kube_e2e::wait::{self, Options};

fn meta(name: &str, namespace: &str) -> ObjectMeta {
    ObjectMeta {
        name: Some(name.into()),
        namespace: Some(namespace.into()),
        ..ObjectMeta::default()
    }
}

fn deployment(name: &str) -> Deployment {
    Deployment {
        metadata: meta(name, "e2e"),
        ..Deployment::default()
    }
}

fn pod(name: &str, app: &str) -> Pod {
    let mut metadata = meta(name, "e2e");
    metadata.labels = Some([("app".to_owned(), app.to_owned())].into());
    Pod {
        metadata,
        ..Pod::default()
    }
}

/// Stand-in for a controller: marks the deployment available after `delay`.
fn make_available(resources: Resources, name: &'static str, delay: Duration) {
    tokio::spawn(async move {
        tokio::time::sleep(delay).await;
        let mut current: Deployment = resources.get(name, "e2e").await.unwrap();
        current.status = Some(DeploymentStatus {
            conditions: Some(vec![DeploymentCondition {
                type_: "Available".into(),
                status: "True".into(),
                ..DeploymentCondition::default()
            }]),
            ..DeploymentStatus::default()
        });
        resources.update(&current).await.unwrap();
    });
}

// ── poll timing ────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn succeeds_on_fourth_poll() {
    let calls = Arc::new(AtomicU32::new(0));
    let counter = Arc::clone(&calls);
    let start = Instant::now();

    wait::for_condition(
        &Context::new(),
        move || {
            let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
            async move { Ok::<_, Error>(n > 3) }
        },
        Options::new()
            .with_immediate()
            .with_timeout(Duration::from_secs(2))
            .with_interval(Duration::from_millis(500)),
    )
    .await
    .unwrap();

    assert_eq!(calls.load(Ordering::SeqCst), 4);
    assert_eq!(start.elapsed(), Duration::from_millis(1500));
}

#[tokio::test(start_paused = true)]
async fn never_met_returns_within_timeout_plus_interval() {
    let timeout = Duration::from_secs(2);
    let interval = Duration::from_millis(300);
    let start = Instant::now();

    let err = wait::for_condition(
        &Context::new(),
        || async { Ok::<_, Error>(false) },
        Options::new().with_timeout(timeout).with_interval(interval),
    )
    .await
    .unwrap_err();

    assert!(matches!(err, Error::Wait(WaitError::Timeout { .. })));
    assert!(start.elapsed() <= timeout + interval);
}

// ── cluster conditions ─────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn deployment_becomes_available() {
    let cluster = Arc::new(MemoryCluster::new());
    let resources = Resources::new(cluster.clone());
    resources.create(&deployment("web")).await.unwrap();
    make_available(resources.clone(), "web", Duration::from_secs(3));

    let reads_before = cluster.reads();
    wait::for_condition(
        &Context::new(),
        Conditions::new(resources).deployment_available("web", "e2e"),
        Options::new().with_interval(Duration::from_secs(1)),
    )
    .await
    .unwrap();
    assert!(cluster.reads() - reads_before >= 3);
}

#[tokio::test(start_paused = true)]
async fn pods_listed_by_label() {
    let resources = Resources::new(Arc::new(MemoryCluster::new()));
    let creator = resources.clone();
    tokio::spawn(async move {
        for i in 0..3 {
            tokio::time::sleep(Duration::from_millis(400)).await;
            creator.create(&pod(&format!("web-{i}"), "web")).await.unwrap();
        }
        creator.create(&pod("db-0", "db")).await.unwrap();
    });

    let selector = ListOptions::default().labels("app=web");
    wait::for_condition(
        &Context::new(),
        Conditions::new(resources.clone()).resource_list_n::<Pod>("e2e", selector.clone(), 3),
        Options::new().with_interval(Duration::from_millis(250)),
    )
    .await
    .unwrap();

    let pods: Vec<Pod> = resources.list("e2e", &selector).await.unwrap();
    assert_eq!(pods.len(), 3);
}

#[tokio::test(start_paused = true)]
async fn pod_running_follows_phase() {
    let resources = Resources::new(Arc::new(MemoryCluster::new()));
    let created = resources.create(&pod("web-0", "web")).await.unwrap();
    let updater = resources.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(2)).await;
        let mut current: Pod = updater.get("web-0", "e2e").await.unwrap();
        current.status = Some(PodStatus {
            phase: Some(POD_RUNNING.into()),
            ..PodStatus::default()
        });
        updater.update(&current).await.unwrap();
    });

    wait::for_condition(
        &Context::new(),
        Conditions::new(resources).pod_running(&created),
        Options::new().with_interval(Duration::from_millis(500)),
    )
    .await
    .unwrap();
}

#[tokio::test]
async fn cancelled_context_ends_wait() {
    let resources = Resources::new(Arc::new(MemoryCluster::new()));
    let (ctx, token) = Context::new().with_cancel();
    token.cancel();

    let err = wait::for_condition(
        &ctx,
        Conditions::new(resources).deployment_available("missing", "e2e"),
        Options::new(),
    )
    .await
    .unwrap_err();
    assert!(matches!(err, Error::Wait(WaitError::Cancelled)));
}

// ── waits inside features ──────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn feature_waits_for_rollout_and_cleanup() {
    let cluster = Arc::new(MemoryCluster::new());
    let env = Environment::with_config(Config::new().with_client(cluster.clone()).with_namespace("e2e"));

    let feature = FeatureBuilder::new("rollout")
        .setup(|ctx: Context, t: TestHandle, cfg: Arc<Config>| async move {
            let client = t.require(cfg.client().await);
            t.require(client.create(&deployment("web")).await);
            make_available(client, "web", Duration::from_secs(2));
            ctx
        })
        .assess("available", |ctx: Context, t: TestHandle, cfg: Arc<Config>| async move {
            let client = t.require(cfg.client().await);
            let ns = cfg.namespace();
            let available = Conditions::new(client).deployment_available("web", &ns);
            t.require(
                wait::for_condition(&ctx, available, Options::new().with_interval(Duration::from_millis(500)))
                    .await,
            );
            ctx
        })
        .teardown(|ctx: Context, t: TestHandle, cfg: Arc<Config>| async move {
            let client = t.require(cfg.client().await);
            let current: Deployment = t.require(client.get("web", "e2e").await);
            t.require(client.delete(&current).await);
            let gone = Conditions::new(client).resource_deleted(&current);
            t.require(wait::for_condition(&ctx, gone, Options::new().with_immediate()).await);
            ctx
        })
        .feature();

    let t = TestHandle::root("TestRollout");
    env.test(&t, [feature]).await;
    let result = t.result();

    assert_eq!(result.status, TestStatus::Passed, "{result:?}");
    assert_eq!(result.find("rollout/available").unwrap().status, TestStatus::Passed);
    assert_eq!(cluster.len(), 0);
}

#[tokio::test(start_paused = true)]
async fn timed_out_wait_fails_the_assessment() {
    let cluster = Arc::new(MemoryCluster::new());
    let env = Environment::with_config(Config::new().with_client(cluster));

    let feature = FeatureBuilder::new("stuck")
        .assess("never available", |ctx: Context, t: TestHandle, cfg: Arc<Config>| async move {
            let client = t.require(cfg.client().await);
            let available = Conditions::new(client).deployment_available("ghost", "e2e");
            let options = Options::new()
                .with_interval(Duration::from_secs(1))
                .with_timeout(Duration::from_secs(5));
            t.require(wait::for_condition(&ctx, available, options).await);
            ctx
        })
        .feature();

    let t = TestHandle::root("TestStuck");
    env.test(&t, [feature]).await;

    let leaf = t.result();
    let leaf = leaf.find("stuck/never available").unwrap();
    assert_eq!(leaf.status, TestStatus::Failed);
    assert!(leaf.messages[0].starts_with("condition not met within"));
}
