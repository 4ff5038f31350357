use kube::{runtime::controller::Action, Resource, ResourceExt};
use serde_json::{Map, Value};
use tracing::{debug, info};

use crate::api::capi::{cluster_conditions, cluster_gvk};
use crate::api::flux::{CrossNamespaceSourceReference, FLUX_NAME_LABEL};
use crate::api::managed_cluster::ManagedCluster;
use crate::api::templates::Template;
use crate::conditions::{
    ConditionStatus, Conditions, CREDENTIAL_READY_CONDITION, FAILED_REASON,
    HELM_CHART_READY_CONDITION, HELM_RELEASE_READY_CONDITION, PROGRESSING_REASON,
    READY_CONDITION, SUCCEEDED_REASON, TEMPLATE_READY_CONDITION,
};
use crate::{Error, Result};

use super::client::ObjectTarget;
use super::controller::{
    has_finalizer, owner_reference, with_finalizer, Reconciler, CLUSTER_IDENTITY_KEY,
    MANAGED_CLUSTER_FINALIZER,
};
use super::release::ReleaseRequest;
use super::helm::Chart;
use super::{LifecycleError, SourceError};

/// Condition type the provisioned cluster's own `Ready` condition is recorded under.
pub static CLUSTER_READY_CONDITION: &str = "ClusterReady";

/// Records a failed gate and hands back the error for the scheduler.
fn fail(
    conditions: &mut Conditions,
    type_: &str,
    generation: Option<i64>,
    err: impl Into<Error>,
) -> Error {
    let err = err.into();
    conditions.set(
        type_,
        ConditionStatus::False,
        FAILED_REASON,
        err.to_string(),
        generation,
    );
    err
}

/// Merges the credential identity into the configured values.
pub(crate) fn cluster_values(config: Option<&Value>, identity: Value) -> Result<Value, LifecycleError> {
    let mut values = match config {
        None | Some(Value::Null) => Map::new(),
        Some(Value::Object(values)) => values.clone(),
        Some(_) => return Err(LifecycleError::InvalidValues),
    };
    values.insert(CLUSTER_IDENTITY_KEY.to_string(), identity);
    Ok(Value::Object(values))
}

impl Reconciler {
    /// Drives a ManagedCluster through its gates and persists the resulting ledger.
    pub async fn reconcile_managed_cluster(&self, mc: &ManagedCluster) -> Result<Action> {
        if mc.meta().deletion_timestamp.is_some() {
            return self.delete_managed_cluster(mc).await;
        }

        if !has_finalizer(mc.meta(), MANAGED_CLUSTER_FINALIZER) {
            info!("Adding deletion guard");
            self.kube
                .patch_finalizers(
                    &ObjectTarget::of(mc),
                    with_finalizer(mc.meta(), MANAGED_CLUSTER_FINALIZER),
                )
                .await?;
            return Ok(Action::await_change());
        }

        let generation = mc.meta().generation;
        let mut status = mc.status.clone().unwrap_or_default();
        let result = self.run_gates(mc, &mut status.conditions).await;

        status.conditions.summarize(generation);
        status.observed_generation = generation;
        self.kube
            .patch_status(&ObjectTarget::of(mc), serde_json::to_value(&status)?)
            .await?;

        result
    }

    async fn run_gates(&self, mc: &ManagedCluster, conditions: &mut Conditions) -> Result<Action> {
        let namespace = mc.namespace().unwrap_or_default();
        let name = mc.name_any();
        let generation = mc.meta().generation;

        let template = match self
            .kube
            .get_cluster_template(&namespace, &mc.spec.template)
            .await?
        {
            Some(template) if template.is_valid() => template,
            Some(template) => {
                let err = LifecycleError::TemplateInvalid {
                    name: mc.spec.template.clone(),
                    reason: template.validation_error(),
                };
                return Err(fail(conditions, TEMPLATE_READY_CONDITION, generation, err));
            }
            None => {
                let err = LifecycleError::TemplateNotFound(mc.spec.template.clone());
                return Err(fail(conditions, TEMPLATE_READY_CONDITION, generation, err));
            }
        };
        conditions.set(
            TEMPLATE_READY_CONDITION,
            ConditionStatus::True,
            SUCCEEDED_REASON,
            "Template is valid",
            generation,
        );

        let Some(chart_ref) = template.chart_ref().cloned() else {
            let err = LifecycleError::MissingChartRef(mc.spec.template.clone());
            return Err(fail(conditions, HELM_CHART_READY_CONDITION, generation, err));
        };
        let chart = match self.download_cluster_chart(&chart_ref, &namespace).await {
            Ok(chart) => chart,
            Err(err) => return Err(fail(conditions, HELM_CHART_READY_CONDITION, generation, err)),
        };

        let config = match mc.spec.config.clone() {
            None | Some(Value::Null) => Value::Object(Map::new()),
            Some(config @ Value::Object(_)) => config,
            Some(_) => {
                let err = LifecycleError::InvalidValues;
                return Err(fail(conditions, HELM_CHART_READY_CONDITION, generation, err));
            }
        };
        if let Err(err) = self.charts.render(&chart, &name, &namespace, &config).await {
            let err = LifecycleError::Render(err);
            return Err(fail(conditions, HELM_CHART_READY_CONDITION, generation, err));
        }
        conditions.set(
            HELM_CHART_READY_CONDITION,
            ConditionStatus::True,
            SUCCEEDED_REASON,
            "Helm chart is valid",
            generation,
        );

        let credential = match self
            .kube
            .get_credential(&namespace, &mc.spec.credential)
            .await?
        {
            Some(credential) if credential.is_ready() => credential,
            Some(_) => {
                let err = LifecycleError::CredentialNotReady(mc.spec.credential.clone());
                return Err(fail(conditions, CREDENTIAL_READY_CONDITION, generation, err));
            }
            None => {
                let err = LifecycleError::CredentialNotFound(mc.spec.credential.clone());
                return Err(fail(conditions, CREDENTIAL_READY_CONDITION, generation, err));
            }
        };
        conditions.set(
            CREDENTIAL_READY_CONDITION,
            ConditionStatus::True,
            SUCCEEDED_REASON,
            "Credential is Ready",
            generation,
        );

        if mc.spec.dry_run {
            debug!("Dry run, nothing is provisioned");
            return Ok(Action::await_change());
        }

        let values = cluster_values(
            Some(&config),
            serde_json::to_value(&credential.spec.identity_ref)?,
        )?;
        let (release, _) = self
            .reconcile_release(ReleaseRequest {
                name: name.clone(),
                namespace: namespace.clone(),
                values: Some(values),
                owner: owner_reference(mc),
                chart_ref,
                depends_on: vec![],
            })
            .await?;

        match release.ready_condition() {
            Some(ready) => conditions.set(
                HELM_RELEASE_READY_CONDITION,
                ConditionStatus::parse(&ready.status),
                &ready.reason,
                ready.message.clone(),
                generation,
            ),
            None => conditions.set(
                HELM_RELEASE_READY_CONDITION,
                ConditionStatus::Unknown,
                PROGRESSING_REASON,
                "HelmRelease is not reconciled yet",
                generation,
            ),
        }

        if !self.fold_cluster_conditions(&namespace, &name, conditions, generation).await? {
            return Ok(self.requeue());
        }
        if !release.is_ready() {
            return Ok(self.requeue());
        }

        self.attach_services(mc).await?;
        Ok(self.requeue())
    }

    async fn download_cluster_chart(
        &self,
        chart_ref: &CrossNamespaceSourceReference,
        namespace: &str,
    ) -> Result<Chart, LifecycleError> {
        let helm_chart = self.referenced_chart(chart_ref, namespace).await?;
        let artifact = helm_chart.ready_artifact().ok_or_else(|| {
            SourceError::ArtifactNotReady(helm_chart.name_any())
        })?;

        self.charts
            .download(artifact)
            .await
            .map_err(LifecycleError::Download)
    }

    /// Copies the provisioned cluster's conditions into the ledger.
    ///
    /// Returns whether the cluster exists and every condition is `True`.
    async fn fold_cluster_conditions(
        &self,
        namespace: &str,
        name: &str,
        conditions: &mut Conditions,
        generation: Option<i64>,
    ) -> Result<bool> {
        let selector = format!("{FLUX_NAME_LABEL}={name}");
        let clusters = self
            .kube
            .list_objects(&cluster_gvk(), namespace, &selector, Some(1))
            .await?;

        let Some(cluster) = clusters.first() else {
            debug!("Cluster is not created yet");
            return Ok(false);
        };

        let mut ready = true;
        for condition in cluster_conditions(cluster) {
            let type_ = match condition.type_.as_str() {
                t if t == READY_CONDITION => CLUSTER_READY_CONDITION,
                t => t,
            };
            let status = ConditionStatus::parse(&condition.status);
            ready &= status == ConditionStatus::True;
            conditions.set(
                type_,
                status,
                condition.reason.as_deref().unwrap_or(SUCCEEDED_REASON),
                condition.message.unwrap_or_default(),
                generation,
            );
        }

        Ok(ready)
    }
}
