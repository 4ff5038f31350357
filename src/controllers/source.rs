use kube::ResourceExt;
use tracing::debug;

use crate::api::flux::{
    CrossNamespaceSourceReference, HelmChart, HelmChartSpec, HelmRepository, HelmRepositorySpec,
    LocalHelmChartSourceReference, DEFAULT_INTERVAL, HELM_CHART_KIND, HELM_REPOSITORY_KIND,
    SOURCE_API_VERSION,
};
use crate::api::templates::Template;

use super::controller::{owner_references, Reconciler};
use super::SourceError;

impl Reconciler {
    /// Namespace holding the chart objects of a template.
    pub(crate) fn chart_namespace<T: Template>(&self, template: &T) -> String {
        template
            .namespace()
            .unwrap_or_else(|| self.settings.system_namespace.clone())
    }

    /// Resolves the HelmChart backing a template.
    ///
    /// A direct chart reference is looked up as is. A chart name and version
    /// get a HelmChart named after the template, pulling from the default
    /// repository, which is created on first use.
    pub async fn template_chart<T: Template>(&self, template: &T) -> Result<HelmChart, SourceError> {
        let namespace = self.chart_namespace(template);
        let helm = template.helm_spec();

        if let Some(reference) = &helm.chart_ref {
            return self.referenced_chart(reference, &namespace).await;
        }

        let (Some(chart), Some(version)) = (
            helm.chart_name.as_ref().filter(|n| !n.is_empty()),
            helm.chart_version.as_ref().filter(|v| !v.is_empty()),
        ) else {
            return Err(SourceError::MissingChart);
        };

        self.kube
            .create_helm_repository(self.default_repository(&namespace))
            .await
            .map_err(SourceError::Create)?;

        let mut desired = HelmChart::new(
            &template.name_any(),
            HelmChartSpec {
                chart: chart.clone(),
                version: version.clone(),
                source_ref: LocalHelmChartSourceReference {
                    api_version: Some(SOURCE_API_VERSION.to_string()),
                    kind: HELM_REPOSITORY_KIND.to_string(),
                    name: self.settings.default_repository_name.clone(),
                },
                interval: DEFAULT_INTERVAL.to_string(),
            },
        );
        desired.metadata.namespace = Some(namespace);
        desired.metadata.owner_references = owner_references(template);

        debug!(%chart, %version, "Applying template chart");
        self.kube
            .apply_helm_chart(desired)
            .await
            .map_err(SourceError::Apply)
    }

    /// Looks up the HelmChart a reference points at.
    pub async fn referenced_chart(
        &self,
        reference: &CrossNamespaceSourceReference,
        default_namespace: &str,
    ) -> Result<HelmChart, SourceError> {
        if reference.kind != HELM_CHART_KIND {
            return Err(SourceError::UnsupportedKind {
                expected: HELM_CHART_KIND.to_string(),
                kind: reference.kind.clone(),
            });
        }

        let namespace = reference
            .namespace
            .as_deref()
            .unwrap_or(default_namespace);

        self.kube
            .get_helm_chart(namespace, &reference.name)
            .await
            .map_err(SourceError::Lookup)?
            .ok_or_else(|| SourceError::ChartNotFound {
                namespace: namespace.to_string(),
                name: reference.name.clone(),
            })
    }

    /// Repository a HelmChart pulls from.
    pub async fn chart_repository(&self, chart: &HelmChart) -> Result<HelmRepository, SourceError> {
        let source = &chart.spec.source_ref;
        if source.kind != HELM_REPOSITORY_KIND {
            return Err(SourceError::UnsupportedKind {
                expected: HELM_REPOSITORY_KIND.to_string(),
                kind: source.kind.clone(),
            });
        }

        let namespace = chart.namespace().unwrap_or_default();
        self.kube
            .get_helm_repository(&namespace, &source.name)
            .await
            .map_err(SourceError::Lookup)?
            .ok_or_else(|| SourceError::RepositoryNotFound {
                namespace,
                name: source.name.clone(),
            })
    }

    fn default_repository(&self, namespace: &str) -> HelmRepository {
        let mut repository = HelmRepository::new(
            &self.settings.default_repository_name,
            HelmRepositorySpec {
                url: self.settings.default_registry_url.clone(),
                type_: self.settings.default_registry_type(),
                interval: DEFAULT_INTERVAL.to_string(),
            },
        );
        repository.metadata.namespace = Some(namespace.to_string());
        repository
    }
}

#[cfg(test)]
mod tests {
    use mockall::predicate::eq;

    use super::*;
    use crate::api::templates::{
        HelmSpec, ProviderTemplate, ProviderTemplateSpec, ServiceTemplate, ServiceTemplateSpec,
    };
    use crate::controllers::client::MockKubeClient;
    use crate::controllers::controller::fixtures::{self, NAMESPACE};
    use crate::controllers::helm::MockChartFetcher;

    #[tokio::test]
    async fn name_and_version_create_repository_and_chart() {
        let mut template = ProviderTemplate::new(
            "cluster-api",
            ProviderTemplateSpec {
                helm: HelmSpec {
                    chart_name: Some("cluster-api".into()),
                    chart_version: Some("0.0.2".into()),
                    ..Default::default()
                },
            },
        );
        template.metadata.uid = Some("uid".into());

        let mut kube = MockKubeClient::new();
        kube.expect_create_helm_repository()
            .withf(|r| {
                r.namespace().as_deref() == Some("hmc-system")
                    && r.spec.type_.as_deref() == Some("oci")
            })
            .times(1)
            .returning(|_| Ok(()));
        kube.expect_apply_helm_chart()
            .withf(|c| {
                c.name_any() == "cluster-api"
                    && c.namespace().as_deref() == Some("hmc-system")
                    && c.spec.version == "0.0.2"
                    && c.spec.source_ref.name == "hmc-templates"
                    && c.owner_references().len() == 1
            })
            .times(1)
            .returning(Ok);

        let reconciler = fixtures::reconciler(kube, MockChartFetcher::new());
        let chart = reconciler.template_chart(&template).await.unwrap();
        assert_eq!(chart.spec.chart, "cluster-api");
    }

    #[tokio::test]
    async fn reference_must_point_to_a_chart() {
        let mut template = ServiceTemplate::new(
            "ingress-nginx",
            ServiceTemplateSpec {
                helm: HelmSpec {
                    chart_ref: Some(CrossNamespaceSourceReference {
                        kind: "GitRepository".into(),
                        name: "ingress".into(),
                        ..Default::default()
                    }),
                    ..Default::default()
                },
            },
        );
        template.metadata.namespace = Some(NAMESPACE.into());

        let reconciler = fixtures::reconciler(MockKubeClient::new(), MockChartFetcher::new());
        let err = reconciler.template_chart(&template).await.unwrap_err();
        assert!(matches!(err, SourceError::UnsupportedKind { .. }));
    }

    #[tokio::test]
    async fn missing_chart_source() {
        let mut template = ServiceTemplate::new("empty", Default::default());
        template.metadata.namespace = Some(NAMESPACE.into());

        let reconciler = fixtures::reconciler(MockKubeClient::new(), MockChartFetcher::new());
        let err = reconciler.template_chart(&template).await.unwrap_err();
        assert!(matches!(err, SourceError::MissingChart));
    }

    #[tokio::test]
    async fn referenced_chart_lookup() {
        let mut kube = MockKubeClient::new();
        kube.expect_get_helm_chart()
            .with(eq(NAMESPACE), eq("ingress-nginx"))
            .returning(|_, name| Ok(Some(fixtures::helm_chart(name, true))));
        kube.expect_get_helm_chart()
            .with(eq(NAMESPACE), eq("absent"))
            .returning(|_, _| Ok(None));
        kube.expect_get_helm_repository()
            .with(eq(NAMESPACE), eq("hmc-templates"))
            .returning(|_, name| Ok(Some(fixtures::helm_repository(name))));

        let reconciler = fixtures::reconciler(kube, MockChartFetcher::new());
        let chart = reconciler
            .referenced_chart(
                &CrossNamespaceSourceReference::helm_chart("ingress-nginx", NAMESPACE),
                "unused",
            )
            .await
            .unwrap();
        let repository = reconciler.chart_repository(&chart).await.unwrap();
        assert_eq!(repository.spec.url, "oci://ghcr.io/mirantis/hmc/charts");

        let err = reconciler
            .referenced_chart(
                &CrossNamespaceSourceReference::helm_chart("absent", NAMESPACE),
                NAMESPACE,
            )
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "HelmChart team-a/absent not found");
    }
}
