use std::collections::BTreeMap;

use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, OwnerReference};

use crate::api::sveltos::{Profile, ProfileHelmChart, ProfileSpec, CONTINUOUS_SYNC_MODE};

use super::controller::Reconciler;
use super::ProfileError;

/// Attachments and conflict policy of a profile.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ProfileOptions {
    pub helm_charts: Vec<ProfileHelmChart>,
    pub priority: i32,
    pub stop_on_conflict: bool,
}

impl Reconciler {
    /// Replaces the profile's chart list with the given attachments.
    pub async fn reconcile_profile(
        &self,
        namespace: &str,
        name: &str,
        match_labels: BTreeMap<String, String>,
        owner: Option<OwnerReference>,
        options: ProfileOptions,
    ) -> Result<Profile, ProfileError> {
        let mut profile = Profile::new(
            name,
            ProfileSpec {
                cluster_selector: LabelSelector {
                    match_labels: Some(match_labels),
                    match_expressions: None,
                },
                helm_charts: options.helm_charts,
                tier: options.priority,
                continue_on_conflict: !options.stop_on_conflict,
                sync_mode: CONTINUOUS_SYNC_MODE.to_string(),
            },
        );
        profile.metadata.namespace = Some(namespace.to_string());
        profile.metadata.owner_references = owner.map(|owner| vec![owner]);

        self.kube
            .apply_profile(profile)
            .await
            .map_err(ProfileError::Apply)
    }

    pub async fn delete_profile(&self, namespace: &str, name: &str) -> Result<(), ProfileError> {
        self.kube
            .delete_profile(namespace, name)
            .await
            .map_err(ProfileError::Delete)
    }
}

#[cfg(test)]
mod tests {
    use kube::ResourceExt;

    use super::*;
    use crate::controllers::client::MockKubeClient;
    use crate::controllers::controller::fixtures::{self, NAMESPACE};
    use crate::controllers::helm::MockChartFetcher;

    #[tokio::test]
    async fn conflict_policy_and_selector() {
        let mut kube = MockKubeClient::new();
        kube.expect_apply_profile()
            .withf(|p| {
                p.spec.tier == 50
                    && !p.spec.continue_on_conflict
                    && p.spec.sync_mode == "Continuous"
                    && p.spec.cluster_selector.match_labels.as_ref().map(|l| l.len()) == Some(1)
            })
            .times(1)
            .returning(Ok);

        let reconciler = fixtures::reconciler(kube, MockChartFetcher::new());
        let profile = reconciler
            .reconcile_profile(
                NAMESPACE,
                "dev",
                BTreeMap::from([("helm.toolkit.fluxcd.io/name".to_string(), "dev".to_string())]),
                None,
                ProfileOptions {
                    helm_charts: vec![],
                    priority: 50,
                    stop_on_conflict: true,
                },
            )
            .await
            .unwrap();

        assert_eq!(profile.namespace().as_deref(), Some(NAMESPACE));
        assert!(profile.owner_references().is_empty());
    }
}
