use std::collections::BTreeMap;

use kube::ResourceExt;
use tracing::debug;

use crate::api::flux::{FLUX_NAMESPACE_LABEL, FLUX_NAME_LABEL};
use crate::api::managed_cluster::{ManagedCluster, ServiceSpec};
use crate::api::sveltos::{ProfileHelmChart, INSTALL_ACTION};
use crate::api::templates::Template;
use crate::Result;

use super::controller::{owner_reference, Reconciler};
use super::profile::ProfileOptions;
use super::LifecycleError;

/// Labels flux puts on the cluster objects rendered for a ManagedCluster.
pub fn cluster_selector(mc: &ManagedCluster) -> BTreeMap<String, String> {
    BTreeMap::from([
        (FLUX_NAME_LABEL.to_string(), mc.name_any()),
        (
            FLUX_NAMESPACE_LABEL.to_string(),
            mc.namespace().unwrap_or_default(),
        ),
    ])
}

impl Reconciler {
    /// Replaces the cluster's profile attachments with its enabled services.
    pub async fn attach_services(&self, mc: &ManagedCluster) -> Result<()> {
        let namespace = mc.namespace().unwrap_or_default();

        let mut helm_charts = Vec::new();
        for service in mc.spec.services.iter().filter(|s| !s.disable) {
            helm_charts.push(self.service_attachment(&namespace, service).await?);
        }

        debug!(services = helm_charts.len(), "Attaching services");
        self.reconcile_profile(
            &namespace,
            &mc.name_any(),
            cluster_selector(mc),
            owner_reference(mc),
            ProfileOptions {
                helm_charts,
                priority: mc.spec.priority,
                stop_on_conflict: mc.spec.stop_on_conflict,
            },
        )
        .await?;

        Ok(())
    }

    async fn service_attachment(
        &self,
        namespace: &str,
        service: &ServiceSpec,
    ) -> Result<ProfileHelmChart, LifecycleError> {
        let template = self
            .kube
            .get_service_template(namespace, &service.template)
            .await
            .map_err(LifecycleError::Lookup)?
            .ok_or_else(|| LifecycleError::ServiceTemplateNotFound(service.template.clone()))?;

        if !template.is_valid() {
            return Err(LifecycleError::ServiceTemplateInvalid {
                name: service.template.clone(),
                reason: template.validation_error(),
            });
        }
        let chart_ref = template
            .chart_ref()
            .ok_or_else(|| LifecycleError::ServiceTemplateInvalid {
                name: service.template.clone(),
                reason: "chart reference is not resolved yet".to_string(),
            })?;

        let chart = self.referenced_chart(chart_ref, namespace).await?;
        let repository = self.chart_repository(&chart).await?;

        Ok(ProfileHelmChart {
            repository_url: repository.spec.url.clone(),
            repository_name: repository.name_any(),
            chart_name: chart.spec.chart.clone(),
            chart_version: chart.spec.version.clone(),
            release_name: service.name.clone(),
            release_namespace: service
                .namespace
                .clone()
                .unwrap_or_else(|| service.name.clone()),
            helm_chart_action: INSTALL_ACTION.to_string(),
            values: service.values.clone(),
        })
    }
}
