use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use kube::ResourceExt;
use serde_json::Value;
use tracing::info;

use crate::api::flux::{
    CrossNamespaceSourceReference, DependencyReference, HelmRelease, HelmReleaseSpec,
    DEFAULT_INTERVAL,
};

use super::controller::Reconciler;
use super::ReleaseError;

/// Desired state of a subordinate HelmRelease.
#[derive(Clone, Debug, Default)]
pub struct ReleaseRequest {
    pub name: String,
    pub namespace: String,
    pub values: Option<Value>,
    pub owner: Option<OwnerReference>,
    pub chart_ref: CrossNamespaceSourceReference,
    pub depends_on: Vec<DependencyReference>,
}

impl ReleaseRequest {
    fn to_release(&self) -> HelmRelease {
        let mut release = HelmRelease::new(
            &self.name,
            HelmReleaseSpec {
                chart_ref: Some(self.chart_ref.clone()),
                release_name: Some(self.name.clone()),
                target_namespace: None,
                interval: DEFAULT_INTERVAL.to_string(),
                depends_on: self.depends_on.clone(),
                values: self.values.clone(),
            },
        );
        release.metadata.namespace = Some(self.namespace.clone());
        release.metadata.owner_references = self.owner.clone().map(|owner| vec![owner]);
        release
    }
}

/// A release controlled by someone else than `owner` must be left alone.
fn owned_by_other(release: &HelmRelease, owner: &OwnerReference) -> bool {
    release
        .owner_references()
        .iter()
        .any(|existing| existing.controller == Some(true) && existing.uid != owner.uid)
}

impl Reconciler {
    /// Creates or updates a HelmRelease, reporting whether it had to be created.
    pub async fn reconcile_release(
        &self,
        request: ReleaseRequest,
    ) -> Result<(HelmRelease, bool), ReleaseError> {
        let existing = self
            .kube
            .get_helm_release(&request.namespace, &request.name)
            .await
            .map_err(ReleaseError::Lookup)?;

        if let (Some(existing), Some(owner)) = (&existing, &request.owner) {
            if owned_by_other(existing, owner) {
                return Err(ReleaseError::Foreign {
                    namespace: request.namespace,
                    name: request.name,
                });
            }
        }

        let release = self
            .kube
            .apply_helm_release(request.to_release())
            .await
            .map_err(ReleaseError::Apply)?;

        let created = existing.is_none();
        if created {
            info!(
                name = %request.name,
                namespace = %request.namespace,
                "Created HelmRelease"
            );
        }

        Ok((release, created))
    }

    pub async fn delete_release(&self, namespace: &str, name: &str) -> Result<(), ReleaseError> {
        self.kube
            .delete_helm_release(namespace, name)
            .await
            .map_err(ReleaseError::Delete)
    }
}

#[cfg(test)]
mod tests {
    use mockall::predicate::eq;

    use super::*;
    use crate::controllers::client::MockKubeClient;
    use crate::controllers::controller::fixtures::{self, NAMESPACE};
    use crate::controllers::helm::MockChartFetcher;

    fn owner(uid: &str) -> OwnerReference {
        OwnerReference {
            api_version: "hmc.mirantis.com/v1alpha1".into(),
            kind: "ManagedCluster".into(),
            name: "dev".into(),
            uid: uid.into(),
            controller: Some(true),
            ..Default::default()
        }
    }

    fn request() -> ReleaseRequest {
        ReleaseRequest {
            name: "dev".into(),
            namespace: NAMESPACE.into(),
            values: Some(serde_json::json!({"replicas": 1})),
            owner: Some(owner("mine")),
            chart_ref: CrossNamespaceSourceReference::helm_chart("aws-standalone", NAMESPACE),
            depends_on: vec![],
        }
    }

    #[tokio::test]
    async fn creates_release_with_owner_and_chart() {
        let mut kube = MockKubeClient::new();
        kube.expect_get_helm_release()
            .with(eq(NAMESPACE), eq("dev"))
            .returning(|_, _| Ok(None));
        kube.expect_apply_helm_release()
            .withf(|r| {
                r.spec.chart_ref.as_ref().map(|c| c.name.as_str()) == Some("aws-standalone")
                    && r.owner_references()[0].uid == "mine"
                    && r.spec.values == Some(serde_json::json!({"replicas": 1}))
            })
            .times(1)
            .returning(Ok);

        let reconciler = fixtures::reconciler(kube, MockChartFetcher::new());
        let (release, created) = reconciler.reconcile_release(request()).await.unwrap();
        assert!(created);
        assert_eq!(release.namespace().as_deref(), Some(NAMESPACE));
    }

    #[tokio::test]
    async fn refuses_release_of_another_owner() {
        let mut kube = MockKubeClient::new();
        kube.expect_get_helm_release().returning(|_, _| {
            let mut existing = request().to_release();
            existing.metadata.owner_references = Some(vec![owner("theirs")]);
            Ok(Some(existing))
        });
        kube.expect_apply_helm_release().never();

        let reconciler = fixtures::reconciler(kube, MockChartFetcher::new());
        let err = reconciler.reconcile_release(request()).await.unwrap_err();
        assert!(matches!(err, ReleaseError::Foreign { .. }));
    }

    #[tokio::test]
    async fn updates_own_release() {
        let mut kube = MockKubeClient::new();
        kube.expect_get_helm_release()
            .returning(|_, _| Ok(Some(request().to_release())));
        kube.expect_apply_helm_release().times(1).returning(Ok);

        let reconciler = fixtures::reconciler(kube, MockChartFetcher::new());
        let (_, created) = reconciler.reconcile_release(request()).await.unwrap();
        assert!(!created);
    }
}
