use kube::{runtime::controller::Action, Resource, ResourceExt};
use tracing::info;

use crate::api::capi::{provider_kinds, CLUSTER_CLEANUP_FINALIZER, CLUSTER_NAME_LABEL};
use crate::api::managed_cluster::ManagedCluster;
use crate::api::templates::Template;
use crate::Result;

use super::client::ObjectTarget;
use super::controller::{
    has_finalizer, without_finalizer, Reconciler, MANAGED_CLUSTER_FINALIZER,
};

impl Reconciler {
    /// Tears a ManagedCluster down without orphaning provider machines.
    ///
    /// The release and profile go first. Provider cluster guards are only
    /// dropped once no machine of the cluster is left, and the ManagedCluster
    /// guard only once every provider guard is gone.
    pub async fn delete_managed_cluster(&self, mc: &ManagedCluster) -> Result<Action> {
        if !has_finalizer(mc.meta(), MANAGED_CLUSTER_FINALIZER) {
            return Ok(Action::await_change());
        }

        let namespace = mc.namespace().unwrap_or_default();
        let name = mc.name_any();

        if self.kube.get_helm_release(&namespace, &name).await?.is_some() {
            info!("Deleting HelmRelease and Profile");
            self.delete_release(&namespace, &name).await?;
            self.delete_profile(&namespace, &name).await?;
            return Ok(self.requeue());
        }

        let providers = self
            .kube
            .get_cluster_template(&namespace, &mc.spec.template)
            .await?
            .and_then(|template| template.providers().map(|p| p.infrastructure.clone()))
            .unwrap_or_default();

        let selector = format!("{CLUSTER_NAME_LABEL}={name}");
        for provider in providers {
            let Some(kinds) = provider_kinds(&provider.name) else {
                continue;
            };

            let clusters = self
                .kube
                .list_objects(&kinds.cluster, &namespace, &selector, None)
                .await?;
            for cluster in clusters {
                if !has_finalizer(&cluster.metadata, CLUSTER_CLEANUP_FINALIZER) {
                    continue;
                }

                if !mc.spec.skip_machine_check {
                    let machines = self
                        .kube
                        .list_objects(&kinds.machine, &namespace, &selector, Some(1))
                        .await?;
                    if !machines.is_empty() {
                        info!(
                            provider = %provider.name,
                            "Waiting for {} machines to be removed",
                            kinds.machine.kind
                        );
                        return Ok(self.requeue());
                    }
                }

                info!(provider = %provider.name, cluster = %cluster.name_any(), "Removing provider cluster guard");
                self.kube
                    .patch_finalizers(
                        &ObjectTarget::dynamic(&cluster, &kinds.cluster),
                        without_finalizer(&cluster.metadata, CLUSTER_CLEANUP_FINALIZER),
                    )
                    .await?;
            }
        }

        info!("Removing deletion guard");
        self.kube
            .patch_finalizers(
                &ObjectTarget::of(mc),
                without_finalizer(mc.meta(), MANAGED_CLUSTER_FINALIZER),
            )
            .await?;

        Ok(Action::await_change())
    }
}

#[cfg(test)]
mod tests {
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
    use kube::api::{DynamicObject, GroupVersionKind};
    use mockall::predicate::eq;
    use serde_json::json;

    use super::*;
    use crate::api::flux::HelmRelease;
    use crate::controllers::client::MockKubeClient;
    use crate::controllers::controller::fixtures::{self, NAMESPACE};
    use crate::controllers::helm::MockChartFetcher;

    fn deleting(name: &str) -> ManagedCluster {
        let mut mc = fixtures::managed_cluster(name);
        mc.metadata.deletion_timestamp = Some(Time(chrono::Utc::now()));
        mc
    }

    fn guarded(gvk: &GroupVersionKind, name: &str) -> DynamicObject {
        let mut cluster = fixtures::dynamic(gvk, name, json!({}));
        cluster.metadata.finalizers = Some(vec![
            CLUSTER_CLEANUP_FINALIZER.to_string(),
            "other".to_string(),
        ]);
        cluster.metadata.resource_version = Some("7".into());
        cluster
    }

    fn without_release(kube: &mut MockKubeClient) {
        kube.expect_get_helm_release().returning(|_, _| Ok(None));
        kube.expect_get_cluster_template()
            .returning(|_, name| Ok(Some(fixtures::cluster_template(name, &["aws", "openstack"]))));
    }

    #[tokio::test]
    async fn release_is_deleted_first() {
        let mut kube = MockKubeClient::new();
        kube.expect_get_helm_release()
            .with(eq(NAMESPACE), eq("dev"))
            .returning(|_, name| Ok(Some(HelmRelease::new(name, Default::default()))));
        kube.expect_delete_helm_release()
            .with(eq(NAMESPACE), eq("dev"))
            .times(1)
            .returning(|_, _| Ok(()));
        kube.expect_delete_profile()
            .with(eq(NAMESPACE), eq("dev"))
            .times(1)
            .returning(|_, _| Ok(()));
        kube.expect_patch_finalizers().never();

        let reconciler = fixtures::reconciler(kube, MockChartFetcher::new());
        let action = reconciler.reconcile_managed_cluster(&deleting("dev")).await.unwrap();
        assert_eq!(action, reconciler.requeue());
    }

    #[tokio::test]
    async fn live_machines_keep_every_guard() {
        let mut kube = MockKubeClient::new();
        without_release(&mut kube);
        kube.expect_list_objects()
            .withf(|gvk, _, selector, _| {
                gvk.kind == "AWSCluster" && selector == "cluster.x-k8s.io/cluster-name=dev"
            })
            .returning(|gvk, _, _, _| Ok(vec![guarded(gvk, "dev")]));
        kube.expect_list_objects()
            .withf(|gvk, _, _, limit| gvk.kind == "AWSMachine" && *limit == Some(1))
            .returning(|gvk, _, _, _| Ok(vec![fixtures::dynamic(gvk, "dev-md-0", json!({}))]));
        kube.expect_patch_finalizers().never();

        let reconciler = fixtures::reconciler(kube, MockChartFetcher::new());
        let action = reconciler.reconcile_managed_cluster(&deleting("dev")).await.unwrap();
        assert_eq!(action, reconciler.requeue());
    }

    #[tokio::test]
    async fn drained_cluster_releases_guards_in_order() {
        let mut kube = MockKubeClient::new();
        without_release(&mut kube);
        kube.expect_list_objects()
            .withf(|gvk, _, _, _| gvk.kind == "AWSCluster")
            .returning(|gvk, _, _, _| Ok(vec![guarded(gvk, "dev")]));
        kube.expect_list_objects()
            .withf(|gvk, _, _, _| gvk.kind == "AWSMachine")
            .returning(|_, _, _, _| Ok(vec![]));

        let mut sequence = mockall::Sequence::new();
        kube.expect_patch_finalizers()
            .withf(|target, finalizers| {
                target.resource.kind == "AWSCluster"
                    && target.resource_version.as_deref() == Some("7")
                    && finalizers == &vec!["other".to_string()]
            })
            .times(1)
            .in_sequence(&mut sequence)
            .returning(|_, _| Ok(()));
        kube.expect_patch_finalizers()
            .withf(|target, finalizers| {
                target.resource.kind == "ManagedCluster" && finalizers.is_empty()
            })
            .times(1)
            .in_sequence(&mut sequence)
            .returning(|_, _| Ok(()));

        let reconciler = fixtures::reconciler(kube, MockChartFetcher::new());
        let action = reconciler.reconcile_managed_cluster(&deleting("dev")).await.unwrap();
        assert_eq!(action, Action::await_change());
    }

    #[tokio::test]
    async fn skip_machine_check_drops_guards_right_away() {
        let mut mc = deleting("dev");
        mc.spec.skip_machine_check = true;

        let mut kube = MockKubeClient::new();
        without_release(&mut kube);
        kube.expect_list_objects()
            .withf(|gvk, _, _, _| gvk.kind == "AWSCluster")
            .returning(|gvk, _, _, _| Ok(vec![guarded(gvk, "dev")]));
        kube.expect_list_objects()
            .withf(|gvk, _, _, _| gvk.kind == "AWSMachine")
            .never();
        kube.expect_patch_finalizers().times(2).returning(|_, _| Ok(()));

        let reconciler = fixtures::reconciler(kube, MockChartFetcher::new());
        let action = reconciler.reconcile_managed_cluster(&mc).await.unwrap();
        assert_eq!(action, Action::await_change());
    }

    #[tokio::test]
    async fn missing_template_and_cluster_allow_deletion() {
        let mut kube = MockKubeClient::new();
        kube.expect_get_helm_release().returning(|_, _| Ok(None));
        kube.expect_get_cluster_template().returning(|_, _| Ok(None));
        kube.expect_list_objects().never();
        kube.expect_patch_finalizers()
            .withf(|target, _| target.resource.kind == "ManagedCluster")
            .times(1)
            .returning(|_, _| Ok(()));

        let reconciler = fixtures::reconciler(kube, MockChartFetcher::new());
        reconciler.reconcile_managed_cluster(&deleting("dev")).await.unwrap();
    }

    #[tokio::test]
    async fn unguarded_objects_are_left_alone() {
        let mut mc = deleting("dev");
        mc.metadata.finalizers = None;

        let kube = MockKubeClient::new();
        let reconciler = fixtures::reconciler(kube, MockChartFetcher::new());
        let action = reconciler.reconcile_managed_cluster(&mc).await.unwrap();
        assert_eq!(action, Action::await_change());
    }
}
