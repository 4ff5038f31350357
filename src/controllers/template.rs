use kube::{runtime::controller::Action, Resource, ResourceExt};
use tracing::{debug, info, warn};

use crate::api::flux::CrossNamespaceSourceReference;
use crate::api::templates::{ClusterTemplate, Providers, Template};
use crate::compatibility;
use crate::{Error, Result};

use super::client::ObjectTarget;
use super::controller::Reconciler;
use super::helm::{Chart, ChartError};
use super::SourceError;

pub static WAITING_FOR_MANAGEMENT: &str = "waiting for Management object to be created";

/// Where the chart pipeline of a template stopped.
#[derive(Clone, Debug, PartialEq)]
pub enum Validation {
    /// The chart has no artifact yet. A chart the template does not own
    /// emits no event the template is watching, so the caller polls.
    Pending,
    Invalid(String),
    Valid,
}

#[derive(Debug, thiserror::Error)]
enum PipelineError {
    #[error("{0}")]
    Source(#[from] SourceError),

    #[error("{0}")]
    Chart(#[from] ChartError),
}

impl Reconciler {
    /// Runs the chart pipeline and records its outcome in the in-memory status.
    pub async fn validate_template<T: Template>(&self, template: &mut T) -> Result<Validation> {
        let generation = template.meta().generation;

        let chart = match self.fetch_template_chart(template).await {
            Ok(Some(chart)) => chart,
            Ok(None) => return Ok(Validation::Pending),
            Err(err) => {
                warn!("Template is invalid: {err}");
                let status = template.common_status_mut();
                status.valid = false;
                status.validation_error = Some(err.to_string());
                status.observed_generation = generation;
                return Ok(Validation::Invalid(err.to_string()));
            }
        };

        let metadata = chart.metadata.ok_or_else(|| {
            Error::Invariant(format!(
                "chart of {} {} has no metadata",
                T::kind(&()),
                template.name_any()
            ))
        })?;

        template.fill_providers(Providers::from_annotations(&metadata.annotations));
        let status = template.common_status_mut();
        status.config = Some(chart.values);
        status.description = metadata.description;
        status.valid = true;
        status.validation_error = None;
        status.observed_generation = generation;

        Ok(Validation::Valid)
    }

    /// Steps up to the structural validation of the downloaded chart.
    async fn fetch_template_chart<T: Template>(
        &self,
        template: &mut T,
    ) -> std::result::Result<Option<Chart>, PipelineError> {
        let helm_chart = self.template_chart(template).await?;
        let namespace = helm_chart
            .namespace()
            .unwrap_or_else(|| self.chart_namespace(template));
        template.common_status_mut().chart_ref = Some(CrossNamespaceSourceReference::helm_chart(
            helm_chart.name_any(),
            namespace,
        ));

        let Some(artifact) = helm_chart.ready_artifact() else {
            debug!(chart = %helm_chart.name_any(), "HelmChart has no artifact yet");
            return Ok(None);
        };

        let chart = self.charts.download(artifact).await?;
        chart.validate()?;

        Ok(Some(chart))
    }

    /// Reconciles a service or provider template.
    pub async fn reconcile_template<T: Template>(&self, template: &T) -> Result<Action> {
        let mut template = template.clone();
        if self.validate_template(&mut template).await? == Validation::Pending {
            return Ok(self.requeue());
        }

        self.kube
            .patch_status(&ObjectTarget::of(&template), template.status_json()?)
            .await?;

        Ok(Action::await_change())
    }

    /// Reconciles a cluster template, then checks its providers against the management plane.
    pub async fn reconcile_cluster_template(&self, template: &ClusterTemplate) -> Result<Action> {
        let mut template = template.clone();
        let action = match self.validate_template(&mut template).await? {
            Validation::Pending => return Ok(self.requeue()),
            Validation::Invalid(_) => Action::await_change(),
            Validation::Valid => self.check_compatibility(&mut template).await?,
        };

        self.kube
            .patch_status(&ObjectTarget::of(&template), template.status_json()?)
            .await?;

        Ok(action)
    }

    async fn check_compatibility(&self, template: &mut ClusterTemplate) -> Result<Action> {
        let management = self.kube.get_management().await?;
        let status = template.status.get_or_insert_with(Default::default);

        let Some(management) = management else {
            info!("Management is not created yet, retrying");
            status.providers_valid = None;
            status.providers_error = WAITING_FOR_MANAGEMENT.to_string();
            return Ok(self.requeue());
        };

        let exposed = management
            .status
            .map(|s| s.available_providers)
            .unwrap_or_default();

        match compatibility::check(&exposed, &status.providers) {
            Ok(()) => {
                status.providers_valid = Some(true);
                status.providers_error = String::new();
            }
            Err(err) => {
                warn!("Template providers are not satisfied: {err}");
                status.providers_valid = Some(false);
                status.providers_error = err.to_string();
            }
        }

        Ok(Action::await_change())
    }
}
