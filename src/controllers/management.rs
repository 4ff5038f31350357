use kube::{runtime::controller::Action, Resource, ResourceExt};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::api::flux::DependencyReference;
use crate::api::management::{
    Component, ComponentStatus, Core, Management, ManagementStatus, Provider, CAPI_COMPONENT,
    CORE_COMPONENT,
};
use crate::api::templates::{Providers, Template};
use crate::{Error, Result};

use super::client::ObjectTarget;
use super::controller::{owner_reference, Reconciler};
use super::release::ReleaseRequest;
use super::ComponentError;

/// One release of the management plane, with the releases it waits for.
#[derive(Clone, Debug, PartialEq)]
pub struct PlannedComponent {
    pub name: String,
    pub component: Component,
    pub depends_on: Vec<String>,
}

/// The fixed rollout order: core engine, infrastructure operator, then every provider.
pub fn rollout_plan(core: &Core, providers: &[Provider]) -> Vec<PlannedComponent> {
    let mut plan = vec![
        PlannedComponent {
            name: CORE_COMPONENT.to_string(),
            component: core.hmc.clone(),
            depends_on: vec![],
        },
        PlannedComponent {
            name: CAPI_COMPONENT.to_string(),
            component: core.capi.clone(),
            depends_on: vec![CORE_COMPONENT.to_string()],
        },
    ];

    plan.extend(providers.iter().map(|provider| PlannedComponent {
        name: provider.name.clone(),
        component: provider.component.clone(),
        depends_on: vec![CAPI_COMPONENT.to_string()],
    }));

    plan
}

/// Status merge patch that also drops components no longer part of the rollout.
fn status_patch(previous: Option<&ManagementStatus>, status: &ManagementStatus) -> serde_json::Result<Value> {
    let mut patch = serde_json::to_value(status)?;
    if let (Some(previous), Some(components)) = (
        previous,
        patch.get_mut("components").and_then(Value::as_object_mut),
    ) {
        for name in previous.components.keys() {
            components.entry(name.clone()).or_insert(Value::Null);
        }
    }
    Ok(patch)
}

impl Reconciler {
    /// Rolls the management plane out, one release per component.
    pub async fn reconcile_management(&self, management: &Management) -> Result<Action> {
        if management.name_any() != self.settings.management_name {
            debug!("Ignoring Management with a foreign name");
            return Ok(Action::await_change());
        }

        let Some(core) = management.spec.core.clone() else {
            info!("Applying default core configuration");
            let mut management = management.clone();
            management.spec.core = Some(Core::default());
            self.kube.patch_management_spec(&management).await?;
            return Ok(Action::await_change());
        };

        let mut status = management.status.clone().unwrap_or_default();
        status.available_providers = Providers::default();
        status.components.clear();

        let mut errors = Vec::new();
        for planned in rollout_plan(&core, &management.spec.providers) {
            match self.deploy_component(management, &planned).await {
                Ok(providers) => {
                    status.available_providers.merge(&providers);
                    status.components.insert(
                        planned.name.clone(),
                        ComponentStatus {
                            success: true,
                            error: String::new(),
                        },
                    );
                }
                Err(err) => {
                    warn!(component = %planned.name, "Component rollout failed: {err}");
                    status.components.insert(
                        planned.name.clone(),
                        ComponentStatus {
                            success: false,
                            error: err.to_string(),
                        },
                    );
                    errors.push(Error::Component {
                        name: planned.name,
                        source: err,
                    });
                }
            }
        }

        status.observed_generation = management.meta().generation;
        self.kube
            .patch_status(
                &ObjectTarget::of(management),
                status_patch(management.status.as_ref(), &status)?,
            )
            .await?;

        match Error::join(errors) {
            Some(err) => Err(err),
            None => Ok(Action::await_change()),
        }
    }

    /// Installs one component, returning the providers its template exposes.
    async fn deploy_component(
        &self,
        management: &Management,
        planned: &PlannedComponent,
    ) -> Result<Providers, ComponentError> {
        let template_name = &planned.component.template;
        let template = self
            .kube
            .get_provider_template(template_name)
            .await
            .map_err(ComponentError::Lookup)?
            .ok_or_else(|| ComponentError::TemplateNotFound(template_name.clone()))?;

        if !template.is_valid() {
            return Err(ComponentError::TemplateInvalid {
                name: template_name.clone(),
                reason: template.validation_error(),
            });
        }
        let chart_ref = template
            .chart_ref()
            .cloned()
            .ok_or_else(|| ComponentError::MissingChartRef(template_name.clone()))?;

        let namespace = self.settings.system_namespace.clone();
        self.reconcile_release(ReleaseRequest {
            name: planned.name.clone(),
            namespace: namespace.clone(),
            values: planned.component.config.clone(),
            owner: owner_reference(management),
            chart_ref,
            depends_on: planned
                .depends_on
                .iter()
                .map(|name| DependencyReference {
                    name: name.clone(),
                    namespace: Some(namespace.clone()),
                })
                .collect(),
        })
        .await?;

        Ok(template.providers().cloned().unwrap_or_default())
    }
}
