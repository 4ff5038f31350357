use std::future::Future;
use std::sync::Arc;

use chrono::Utc;
use dashmap::DashMap;
use futures::StreamExt;
use kube::{
    api::Api,
    client::Client,
    runtime::{
        controller::{Action, Controller},
        events::{Event, EventType},
        reflector::ObjectRef,
        watcher::Config,
    },
    Resource, ResourceExt,
};
use tokio::{
    sync::RwLock,
    time::{Duration, Instant},
};
use tracing::{debug, instrument, warn};

use crate::api::credential::Credential;
use crate::api::flux::{HelmChart, HelmRelease};
use crate::api::managed_cluster::ManagedCluster;
use crate::api::management::Management;
use crate::api::templates::{ClusterTemplate, ProviderTemplate, ServiceTemplate};
use crate::config::Settings;
use crate::controllers::client::Kube;
use crate::controllers::controller::{has_finalizer, Reconciler, MANAGED_CLUSTER_FINALIZER};
use crate::controllers::helm::cli::HelmCli;
use crate::metrics::Diagnostics;
use crate::watches::{
    all_cluster_templates, cluster_owner, clusters_using_credential, clusters_using_template,
    namespaced_owner,
};
use crate::{telemetry, Error, Metrics, Result};

pub static MANAGED_CLUSTER_CONTROLLER: &str = "managedcluster";
pub static MANAGEMENT_CONTROLLER: &str = "management";
pub static CLUSTER_TEMPLATE_CONTROLLER: &str = "clustertemplate";
pub static SERVICE_TEMPLATE_CONTROLLER: &str = "servicetemplate";
pub static PROVIDER_TEMPLATE_CONTROLLER: &str = "providertemplate";

const BACKOFF_BASE: Duration = Duration::from_secs(5);

// Context for the reconciler
#[derive(Clone)]
pub struct Context {
    /// Kubernetes client
    pub client: Client,
    pub reconciler: Reconciler,
    /// Diagnostics read by the web server
    pub diagnostics: Arc<RwLock<Diagnostics>>,
    /// Prom metrics
    pub metrics: Metrics,
    /// Name of the controller this context belongs to
    pub controller: &'static str,
    /// Consecutive failures per object key
    pub backoff: Arc<Backoff>,
    pub settings: Arc<Settings>,
}

impl Context {
    async fn publish<K: Resource<DynamicType = ()>>(&self, obj: &K, event: Event) {
        let recorder = self.diagnostics.read().await.recorder(self.client.clone());
        if let Err(err) = recorder.publish(&event, &obj.object_ref(&())).await {
            warn!("Failed to publish {} event: {err}", event.reason);
        }
    }

    /// Bookkeeping shared by every reconcile entry point.
    async fn observe<K, F>(&self, obj: &K, reconcile: F) -> Result<Action>
    where
        K: Resource<DynamicType = ()>,
        F: Future<Output = Result<Action>>,
    {
        let _timer = self.metrics.count_and_measure(self.controller);
        self.diagnostics.write().await.last_event = Utc::now();
        debug!("Reconciling");

        match reconcile.await {
            Ok(action) => {
                self.backoff.reset(&object_key(obj));
                Ok(action)
            }
            Err(err) => {
                self.publish(
                    obj,
                    Event {
                        type_: EventType::Warning,
                        reason: "ReconcileFailed".into(),
                        note: Some(err.to_string()),
                        action: "Reconciling".into(),
                        secondary: None,
                    },
                )
                .await;
                Err(err)
            }
        }
    }
}

struct Failures {
    attempts: u32,
    last: Instant,
}

/// Consecutive reconcile failures per object key.
///
/// Keys that have not failed for twice the maximum delay belong to objects
/// that were deleted or stopped being retried, and are dropped.
#[derive(Default)]
pub struct Backoff {
    failures: DashMap<String, Failures>,
}

impl Backoff {
    /// Delay before retrying `key` after another failure.
    pub fn next(&self, key: String, max: Duration) -> Duration {
        self.next_at(key, max, Instant::now())
    }

    fn next_at(&self, key: String, max: Duration, now: Instant) -> Duration {
        let stale_after = max.saturating_mul(2);
        self.failures
            .retain(|_, failures| now.saturating_duration_since(failures.last) <= stale_after);

        let mut failures = self.failures.entry(key).or_insert(Failures {
            attempts: 0,
            last: now,
        });
        let delay = backoff_delay(failures.attempts, max);
        failures.attempts = failures.attempts.saturating_add(1);
        failures.last = now;
        delay
    }

    pub fn reset(&self, key: &str) {
        self.failures.remove(key);
    }

    pub fn len(&self) -> usize {
        self.failures.len()
    }

    pub fn is_empty(&self) -> bool {
        self.failures.is_empty()
    }
}

/// `min(5s * 2^attempt, max)`
pub fn backoff_delay(attempt: u32, max: Duration) -> Duration {
    2u32.checked_pow(attempt)
        .and_then(|factor| BACKOFF_BASE.checked_mul(factor))
        .map_or(max, |delay| delay.min(max))
}

fn object_key<K: Resource<DynamicType = ()>>(obj: &K) -> String {
    match obj.meta().namespace.as_deref() {
        Some(namespace) => format!("{namespace}/{}", obj.name_any()),
        None => obj.name_any(),
    }
}

fn error_policy<K: Resource<DynamicType = ()>>(obj: Arc<K>, error: &Error, ctx: Arc<Context>) -> Action {
    warn!("reconcile failed: {error}");
    ctx.metrics.reconcile_failure(ctx.controller, error);
    Action::requeue(
        ctx.backoff
            .next(object_key(obj.as_ref()), ctx.settings.error_backoff_max()),
    )
}

#[instrument(skip_all, fields(trace_id = %telemetry::get_trace_id(), name = %mc.name_any(), namespace = mc.namespace().as_deref()), err)]
async fn reconcile_managed_cluster(mc: Arc<ManagedCluster>, ctx: Arc<Context>) -> Result<Action> {
    if mc.meta().deletion_timestamp.is_some() && has_finalizer(mc.meta(), MANAGED_CLUSTER_FINALIZER) {
        ctx.publish(
            mc.as_ref(),
            Event {
                type_: EventType::Normal,
                reason: "DeleteRequested".into(),
                note: Some(format!("Delete `{}`", mc.name_any())),
                action: "Deleting".into(),
                secondary: None,
            },
        )
        .await;
    }

    ctx.observe(mc.as_ref(), ctx.reconciler.reconcile_managed_cluster(&mc))
        .await
}

#[instrument(skip_all, fields(trace_id = %telemetry::get_trace_id(), name = %management.name_any()), err)]
async fn reconcile_management(management: Arc<Management>, ctx: Arc<Context>) -> Result<Action> {
    ctx.observe(
        management.as_ref(),
        ctx.reconciler.reconcile_management(&management),
    )
    .await
}

#[instrument(skip_all, fields(trace_id = %telemetry::get_trace_id(), name = %template.name_any(), namespace = template.namespace().as_deref()), err)]
async fn reconcile_cluster_template(template: Arc<ClusterTemplate>, ctx: Arc<Context>) -> Result<Action> {
    ctx.observe(
        template.as_ref(),
        ctx.reconciler.reconcile_cluster_template(&template),
    )
    .await
}

#[instrument(skip_all, fields(trace_id = %telemetry::get_trace_id(), name = %template.name_any(), namespace = template.namespace().as_deref()), err)]
async fn reconcile_service_template(template: Arc<ServiceTemplate>, ctx: Arc<Context>) -> Result<Action> {
    ctx.observe(template.as_ref(), ctx.reconciler.reconcile_template(template.as_ref()))
        .await
}

#[instrument(skip_all, fields(trace_id = %telemetry::get_trace_id(), name = %template.name_any()), err)]
async fn reconcile_provider_template(template: Arc<ProviderTemplate>, ctx: Arc<Context>) -> Result<Action> {
    ctx.observe(template.as_ref(), ctx.reconciler.reconcile_template(template.as_ref()))
        .await
}

/// State shared between the controller and the web server
#[derive(Clone)]
pub struct State {
    /// Diagnostics populated by the reconciler
    diagnostics: Arc<RwLock<Diagnostics>>,
    /// Metrics registry
    registry: prometheus::Registry,
    metrics: Metrics,
    settings: Arc<Settings>,
}

/// State wrapper around the controller outputs for the web server
impl State {
    pub fn new(settings: Settings) -> prometheus::Result<Self> {
        let registry = prometheus::Registry::default();
        let metrics = Metrics::new()?.register(&registry)?;
        Ok(Self {
            diagnostics: Default::default(),
            registry,
            metrics,
            settings: Arc::new(settings),
        })
    }

    /// Metrics getter
    pub fn metrics(&self) -> Vec<prometheus::proto::MetricFamily> {
        self.registry.gather()
    }

    /// State getter
    pub async fn diagnostics(&self) -> Diagnostics {
        self.diagnostics.read().await.clone()
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    // Create a Controller Context that can update State
    pub fn to_context(&self, client: Client, controller: &'static str) -> Arc<Context> {
        let kube = Arc::new(Kube::new(client.clone(), self.settings.clone()));
        let charts = Arc::new(HelmCli::new(&self.settings));
        Arc::new(Context {
            reconciler: Reconciler::new(kube, charts, self.settings.clone()),
            client,
            diagnostics: self.diagnostics.clone(),
            metrics: self.metrics.clone(),
            controller,
            backoff: Default::default(),
            settings: self.settings.clone(),
        })
    }
}

/// Drives ManagedClusters, re-enqueued by their release, template and credential.
pub async fn run_managed_cluster_controller(state: State, client: Client) {
    let controller = Controller::new(
        Api::<ManagedCluster>::all(client.clone()),
        Config::default().any_semantic(),
    );
    let by_template = controller.store();
    let by_credential = controller.store();

    controller
        .watches(
            Api::<HelmRelease>::all(client.clone()),
            Config::default(),
            |release| namespaced_owner::<ManagedCluster>(release.meta()),
        )
        .watches(
            Api::<ClusterTemplate>::all(client.clone()),
            Config::default(),
            move |template| clusters_using_template(&template, &by_template.state()),
        )
        .watches(
            Api::<Credential>::all(client.clone()),
            Config::default(),
            move |credential| clusters_using_credential(&credential, &by_credential.state()),
        )
        .shutdown_on_signal()
        .run(
            reconcile_managed_cluster,
            error_policy,
            state.to_context(client, MANAGED_CLUSTER_CONTROLLER),
        )
        .for_each(|_| futures::future::ready(()))
        .await;
}

/// Drives the Management singleton, re-enqueued by component releases and templates.
pub async fn run_management_controller(state: State, client: Client) {
    let management = state.settings().management_name.clone();

    Controller::new(
        Api::<Management>::all(client.clone()),
        Config::default().any_semantic(),
    )
    .watches(
        Api::<HelmRelease>::namespaced(client.clone(), &state.settings().system_namespace),
        Config::default(),
        |release| cluster_owner::<Management>(release.meta()),
    )
    .watches(
        Api::<ProviderTemplate>::all(client.clone()),
        Config::default(),
        move |_| Some(ObjectRef::<Management>::new(&management)),
    )
    .shutdown_on_signal()
    .run(
        reconcile_management,
        error_policy,
        state.to_context(client, MANAGEMENT_CONTROLLER),
    )
    .for_each(|_| futures::future::ready(()))
    .await;
}

/// Validates ClusterTemplates and checks them against the available providers.
pub async fn run_cluster_template_controller(state: State, client: Client) {
    let controller = Controller::new(
        Api::<ClusterTemplate>::all(client.clone()),
        Config::default().any_semantic(),
    );
    let templates = controller.store();

    controller
        .watches(
            Api::<HelmChart>::all(client.clone()),
            Config::default(),
            |chart| namespaced_owner::<ClusterTemplate>(chart.meta()),
        )
        .watches(
            Api::<Management>::all(client.clone()),
            Config::default(),
            move |_| all_cluster_templates(&templates.state()),
        )
        .shutdown_on_signal()
        .run(
            reconcile_cluster_template,
            error_policy,
            state.to_context(client, CLUSTER_TEMPLATE_CONTROLLER),
        )
        .for_each(|_| futures::future::ready(()))
        .await;
}

pub async fn run_service_template_controller(state: State, client: Client) {
    Controller::new(
        Api::<ServiceTemplate>::all(client.clone()),
        Config::default().any_semantic(),
    )
    .watches(
        Api::<HelmChart>::all(client.clone()),
        Config::default(),
        |chart| namespaced_owner::<ServiceTemplate>(chart.meta()),
    )
    .shutdown_on_signal()
    .run(
        reconcile_service_template,
        error_policy,
        state.to_context(client, SERVICE_TEMPLATE_CONTROLLER),
    )
    .for_each(|_| futures::future::ready(()))
    .await;
}

pub async fn run_provider_template_controller(state: State, client: Client) {
    Controller::new(
        Api::<ProviderTemplate>::all(client.clone()),
        Config::default().any_semantic(),
    )
    .watches(
        Api::<HelmChart>::namespaced(client.clone(), &state.settings().system_namespace),
        Config::default(),
        |chart| cluster_owner::<ProviderTemplate>(chart.meta()),
    )
    .shutdown_on_signal()
    .run(
        reconcile_provider_template,
        error_policy,
        state.to_context(client, PROVIDER_TEMPLATE_CONTROLLER),
    )
    .for_each(|_| futures::future::ready(()))
    .await;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_up_to_the_cap() {
        let max = Duration::from_secs(300);
        let delays: Vec<_> = (0..8).map(|n| backoff_delay(n, max).as_secs()).collect();
        assert_eq!(delays, vec![5, 10, 20, 40, 80, 160, 300, 300]);
        assert_eq!(backoff_delay(u32::MAX, max), max);
    }

    #[test]
    fn backoff_forgets_objects_that_stopped_failing() {
        let max = Duration::from_secs(300);
        let backoff = Backoff::default();
        let start = Instant::now();

        assert_eq!(backoff.next_at("team-a/dev".into(), max, start), Duration::from_secs(5));
        assert_eq!(backoff.next_at("team-a/dev".into(), max, start), Duration::from_secs(10));
        assert_eq!(backoff.next_at("hmc".into(), max, start), Duration::from_secs(5));
        assert_eq!(backoff.len(), 2);

        backoff.reset("hmc");
        assert_eq!(backoff.len(), 1);

        // team-a/dev was deleted after its last failure
        let later = start + Duration::from_secs(601);
        assert_eq!(backoff.next_at("team-b/prod".into(), max, later), Duration::from_secs(5));
        assert_eq!(backoff.len(), 1);
        assert_eq!(
            backoff.next_at("team-a/dev".into(), max, later),
            Duration::from_secs(5)
        );
    }
}
