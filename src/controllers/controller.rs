use std::sync::Arc;

use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, OwnerReference};
use kube::{runtime::controller::Action, Resource};

use crate::config::Settings;

use super::client::KubeClient;
use super::helm::ChartFetcher;

/// Deletion guard on every ManagedCluster.
pub static MANAGED_CLUSTER_FINALIZER: &str = "hmc.mirantis.com/managed-cluster";

/// Values key the credential identity is injected under.
pub static CLUSTER_IDENTITY_KEY: &str = "clusterIdentity";

/// Reconciliation logic for every kind, over the store and chart seams.
#[derive(Clone)]
pub struct Reconciler {
    pub kube: Arc<dyn KubeClient>,
    pub charts: Arc<dyn ChartFetcher>,
    pub settings: Arc<Settings>,
}

impl Reconciler {
    pub fn new(
        kube: Arc<dyn KubeClient>,
        charts: Arc<dyn ChartFetcher>,
        settings: Arc<Settings>,
    ) -> Self {
        Self {
            kube,
            charts,
            settings,
        }
    }

    /// Bounded retry for conditions known to converge slowly.
    pub(crate) fn requeue(&self) -> Action {
        Action::requeue(self.settings.requeue_interval())
    }
}

/// Controller reference to `obj`, once it has been persisted.
pub(crate) fn owner_reference<K: Resource<DynamicType = ()>>(obj: &K) -> Option<OwnerReference> {
    obj.controller_owner_ref(&())
}

pub(crate) fn owner_references<K: Resource<DynamicType = ()>>(
    obj: &K,
) -> Option<Vec<OwnerReference>> {
    owner_reference(obj).map(|owner| vec![owner])
}

pub(crate) fn has_finalizer(meta: &ObjectMeta, finalizer: &str) -> bool {
    meta.finalizers
        .as_ref()
        .is_some_and(|f| f.iter().any(|f| f == finalizer))
}

pub(crate) fn with_finalizer(meta: &ObjectMeta, finalizer: &str) -> Vec<String> {
    let mut finalizers = meta.finalizers.clone().unwrap_or_default();
    if !finalizers.iter().any(|f| f == finalizer) {
        finalizers.push(finalizer.to_string());
    }
    finalizers
}

pub(crate) fn without_finalizer(meta: &ObjectMeta, finalizer: &str) -> Vec<String> {
    meta.finalizers
        .iter()
        .flatten()
        .filter(|f| *f != finalizer)
        .cloned()
        .collect()
}

#[cfg(test)]
pub(crate) mod fixtures {
    use std::sync::Arc;

    use k8s_openapi::api::core::v1::ObjectReference;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::{Condition, Time};
    use kube::api::{ApiResource, DynamicObject, GroupVersionKind};
    use serde_json::Value;

    use crate::api::credential::{Credential, CredentialSpec, CredentialStatus};
    use crate::api::flux::{
        Artifact, CrossNamespaceSourceReference, HelmChart, HelmChartSpec, HelmChartStatus,
        HelmRelease, HelmReleaseStatus, HelmRepository, HelmRepositorySpec,
        LocalHelmChartSourceReference, HELM_REPOSITORY_KIND,
    };
    use crate::api::managed_cluster::{ManagedCluster, ManagedClusterSpec};
    use crate::api::templates::{
        ClusterTemplate, ClusterTemplateSpec, HelmSpec, Providers, ProviderTuple, Template,
    };
    use crate::config::Settings;
    use crate::controllers::client::MockKubeClient;
    use crate::controllers::helm::{Chart, ChartMetadata, MockChartFetcher};

    use super::{Reconciler, MANAGED_CLUSTER_FINALIZER};

    pub const NAMESPACE: &str = "team-a";

    pub fn reconciler(kube: MockKubeClient, charts: MockChartFetcher) -> Reconciler {
        Reconciler::new(Arc::new(kube), Arc::new(charts), Arc::new(Settings::default()))
    }

    pub fn tuple(name: &str, version: &str) -> ProviderTuple {
        ProviderTuple {
            name: name.to_string(),
            version_or_constraint: version.to_string(),
        }
    }

    pub fn ready(type_: &str) -> Condition {
        condition(type_, "True", "Succeeded", "")
    }

    pub fn condition(type_: &str, status: &str, reason: &str, message: &str) -> Condition {
        Condition {
            type_: type_.to_string(),
            status: status.to_string(),
            reason: reason.to_string(),
            message: message.to_string(),
            observed_generation: None,
            last_transition_time: Time(chrono::Utc::now()),
        }
    }

    pub fn managed_cluster(name: &str) -> ManagedCluster {
        let mut mc = ManagedCluster::new(
            name,
            ManagedClusterSpec {
                template: "aws-standalone".into(),
                credential: "aws-credential".into(),
                priority: 100,
                ..Default::default()
            },
        );
        mc.metadata.namespace = Some(NAMESPACE.into());
        mc.metadata.uid = Some(format!("{name}-uid"));
        mc.metadata.generation = Some(1);
        mc.metadata.resource_version = Some("1".into());
        mc.metadata.finalizers = Some(vec![MANAGED_CLUSTER_FINALIZER.into()]);
        mc
    }

    pub fn cluster_template(name: &str, infrastructure: &[&str]) -> ClusterTemplate {
        let mut template = ClusterTemplate::new(
            name,
            ClusterTemplateSpec {
                helm: HelmSpec {
                    chart_name: Some(name.into()),
                    chart_version: Some("0.1.0".into()),
                    ..Default::default()
                },
            },
        );
        template.metadata.namespace = Some(NAMESPACE.into());
        template.metadata.uid = Some(format!("{name}-uid"));
        template.common_status_mut().valid = true;
        template.common_status_mut().chart_ref =
            Some(CrossNamespaceSourceReference::helm_chart(name, NAMESPACE));
        template.fill_providers(Providers {
            infrastructure: infrastructure.iter().map(|p| tuple(p, "")).collect(),
            ..Default::default()
        });
        template
    }

    pub fn helm_chart(name: &str, artifact: bool) -> HelmChart {
        let mut chart = HelmChart::new(
            name,
            HelmChartSpec {
                chart: name.into(),
                version: "0.1.0".into(),
                source_ref: LocalHelmChartSourceReference {
                    api_version: None,
                    kind: HELM_REPOSITORY_KIND.into(),
                    name: "hmc-templates".into(),
                },
                interval: "10m".into(),
            },
        );
        chart.metadata.namespace = Some(NAMESPACE.into());
        chart.status = Some(HelmChartStatus {
            artifact: artifact.then(|| Artifact {
                url: format!("http://source-controller/helmchart/{NAMESPACE}/{name}.tgz"),
                revision: "0.1.0".into(),
                ..Default::default()
            }),
            ..Default::default()
        });
        chart
    }

    pub fn helm_repository(name: &str) -> HelmRepository {
        let mut repository = HelmRepository::new(
            name,
            HelmRepositorySpec {
                url: "oci://ghcr.io/mirantis/hmc/charts".into(),
                type_: Some("oci".into()),
                interval: "10m".into(),
            },
        );
        repository.metadata.namespace = Some(NAMESPACE.into());
        repository
    }

    pub fn chart(annotations: &[(&str, &str)]) -> Chart {
        Chart {
            source: "http://source-controller/chart.tgz".into(),
            metadata: Some(ChartMetadata {
                api_version: "v2".into(),
                name: "aws-standalone".into(),
                version: "0.1.0".into(),
                description: Some("AWS standalone cluster".into()),
                annotations: annotations
                    .iter()
                    .map(|(k, v)| (k.to_string(), v.to_string()))
                    .collect(),
                ..Default::default()
            }),
            values: serde_json::json!({"controlPlaneNumber": 3}),
        }
    }

    pub fn credential(name: &str, ready: bool) -> Credential {
        let mut credential = Credential::new(
            name,
            CredentialSpec {
                identity_ref: ObjectReference {
                    api_version: Some("infrastructure.cluster.x-k8s.io/v1beta2".into()),
                    kind: Some("AWSClusterStaticIdentity".into()),
                    name: Some("aws-identity".into()),
                    ..Default::default()
                },
                description: None,
            },
        );
        credential.metadata.namespace = Some(NAMESPACE.into());
        credential.status = Some(CredentialStatus { ready, error: None });
        credential
    }

    pub fn with_release_status(mut release: HelmRelease, conditions: Vec<Condition>) -> HelmRelease {
        release.status = Some(HelmReleaseStatus {
            observed_generation: Some(1),
            conditions,
        });
        release
    }

    pub fn dynamic(gvk: &GroupVersionKind, name: &str, data: Value) -> DynamicObject {
        let mut obj = DynamicObject::new(name, &ApiResource::from_gvk(gvk)).within(NAMESPACE);
        obj.data = data;
        obj
    }
}
