use std::collections::BTreeMap;
use std::fmt::Debug;

use kube::{CustomResource, Resource};
use schemars::JsonSchema;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::Value;

use super::flux::CrossNamespaceSourceReference;

pub static INFRASTRUCTURE_PROVIDERS_ANNOTATION: &str = "hmc.mirantis.com/infrastructure-providers";
pub static BOOTSTRAP_PROVIDERS_ANNOTATION: &str = "hmc.mirantis.com/bootstrap-providers";
pub static CONTROL_PLANE_PROVIDERS_ANNOTATION: &str = "hmc.mirantis.com/control-plane-providers";

/// A provider name with either an exact version (exposed) or a
/// constraint (required). Either may be empty.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ProviderTuple {
    pub name: String,
    #[serde(default)]
    pub version_or_constraint: String,
}

impl ProviderTuple {
    /// Parses `name` or `name <version-or-constraint>`.
    pub fn parse(entry: &str) -> Option<Self> {
        let entry = entry.trim();
        if entry.is_empty() {
            return None;
        }
        let (name, version) = entry
            .split_once(char::is_whitespace)
            .unwrap_or((entry, ""));
        Some(Self {
            name: name.to_string(),
            version_or_constraint: version.trim().to_string(),
        })
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Providers {
    #[serde(default)]
    pub infrastructure: Vec<ProviderTuple>,
    #[serde(default)]
    pub bootstrap: Vec<ProviderTuple>,
    #[serde(default)]
    pub control_plane: Vec<ProviderTuple>,
}

impl Providers {
    pub fn from_annotations(annotations: &BTreeMap<String, String>) -> Self {
        let parse = |key: &str| -> Vec<ProviderTuple> {
            annotations
                .get(key)
                .map(|value| value.split(',').filter_map(ProviderTuple::parse).collect())
                .unwrap_or_default()
        };

        Self {
            infrastructure: parse(INFRASTRUCTURE_PROVIDERS_ANNOTATION),
            bootstrap: parse(BOOTSTRAP_PROVIDERS_ANNOTATION),
            control_plane: parse(CONTROL_PLANE_PROVIDERS_ANNOTATION),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.infrastructure.is_empty() && self.bootstrap.is_empty() && self.control_plane.is_empty()
    }

    /// Union by provider name. A non-empty incoming version replaces the known one.
    pub fn merge(&mut self, other: &Providers) {
        for (into, from) in [
            (&mut self.infrastructure, &other.infrastructure),
            (&mut self.bootstrap, &other.bootstrap),
            (&mut self.control_plane, &other.control_plane),
        ] {
            for provider in from {
                match into.iter_mut().find(|p| p.name == provider.name) {
                    Some(known) if !provider.version_or_constraint.is_empty() => {
                        known.version_or_constraint = provider.version_or_constraint.clone()
                    }
                    Some(_) => {}
                    None => into.push(provider.clone()),
                }
            }
            into.sort_by(|a, b| a.name.cmp(&b.name));
        }
    }
}

/// Where the chart of a template comes from: either a direct reference to
/// a chart object, or a name and version in the default registry.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct HelmSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chart_ref: Option<CrossNamespaceSourceReference>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chart_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chart_version: Option<String>,
}

/// Status shared by every template kind.
///
/// Unset fields serialize as `null` so a status merge patch clears them.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct TemplateStatusCommon {
    #[serde(default)]
    pub chart_ref: Option<CrossNamespaceSourceReference>,
    #[serde(default)]
    pub valid: bool,
    #[serde(default)]
    pub validation_error: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    /// Default values of the chart.
    #[serde(default)]
    #[schemars(schema_with = "crate::api::preserve_unknown_fields")]
    pub config: Option<Value>,
    #[serde(default)]
    pub observed_generation: Option<i64>,
}

/// Behaviour shared by cluster, service and provider templates.
pub trait Template:
    Resource<DynamicType = ()> + Clone + Debug + Serialize + DeserializeOwned + Send + Sync + 'static
{
    fn helm_spec(&self) -> &HelmSpec;

    fn common_status(&self) -> Option<&TemplateStatusCommon>;

    fn common_status_mut(&mut self) -> &mut TemplateStatusCommon;

    fn providers(&self) -> Option<&Providers>;

    /// Records the providers declared by the chart.
    fn fill_providers(&mut self, providers: Providers);

    fn status_json(&self) -> serde_json::Result<Value>;

    fn is_valid(&self) -> bool {
        self.common_status().is_some_and(|s| s.valid)
    }

    fn chart_ref(&self) -> Option<&CrossNamespaceSourceReference> {
        self.common_status()?.chart_ref.as_ref()
    }

    fn validation_error(&self) -> String {
        self.common_status()
            .and_then(|s| s.validation_error.clone())
            .unwrap_or_default()
    }
}

/// ClusterTemplate describes how a managed cluster is deployed.
#[derive(CustomResource, Serialize, Deserialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[kube(
    group = "hmc.mirantis.com",
    version = "v1alpha1",
    kind = "ClusterTemplate",
    plural = "clustertemplates",
    namespaced,
    status = "ClusterTemplateStatus",
    printcolumn = r#"{"name":"Valid","type":"boolean","jsonPath":".status.valid"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct ClusterTemplateSpec {
    pub helm: HelmSpec,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ClusterTemplateStatus {
    #[serde(flatten)]
    pub common: TemplateStatusCommon,
    /// Providers the chart requires, with optional version constraints.
    #[serde(default)]
    pub providers: Providers,
    /// Unset until the required providers were compared with the management plane.
    #[serde(default)]
    pub providers_valid: Option<bool>,
    #[serde(default)]
    pub providers_error: String,
}

/// ServiceTemplate describes a chart attachable to managed clusters.
#[derive(CustomResource, Serialize, Deserialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[kube(
    group = "hmc.mirantis.com",
    version = "v1alpha1",
    kind = "ServiceTemplate",
    plural = "servicetemplates",
    namespaced,
    status = "ServiceTemplateStatus"
)]
#[serde(rename_all = "camelCase")]
pub struct ServiceTemplateSpec {
    pub helm: HelmSpec,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ServiceTemplateStatus {
    #[serde(flatten)]
    pub common: TemplateStatusCommon,
    #[serde(default)]
    pub providers: Providers,
}

/// ProviderTemplate describes a management plane component.
#[derive(CustomResource, Serialize, Deserialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[kube(
    group = "hmc.mirantis.com",
    version = "v1alpha1",
    kind = "ProviderTemplate",
    plural = "providertemplates",
    status = "ProviderTemplateStatus"
)]
#[serde(rename_all = "camelCase")]
pub struct ProviderTemplateSpec {
    pub helm: HelmSpec,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ProviderTemplateStatus {
    #[serde(flatten)]
    pub common: TemplateStatusCommon,
    /// Provider versions this component exposes once installed.
    #[serde(default)]
    pub providers: Providers,
}

impl Template for ClusterTemplate {
    fn helm_spec(&self) -> &HelmSpec {
        &self.spec.helm
    }

    fn common_status(&self) -> Option<&TemplateStatusCommon> {
        self.status.as_ref().map(|s| &s.common)
    }

    fn common_status_mut(&mut self) -> &mut TemplateStatusCommon {
        &mut self.status.get_or_insert_with(Default::default).common
    }

    fn providers(&self) -> Option<&Providers> {
        self.status.as_ref().map(|s| &s.providers)
    }

    fn fill_providers(&mut self, providers: Providers) {
        self.status.get_or_insert_with(Default::default).providers = providers;
    }

    fn status_json(&self) -> serde_json::Result<Value> {
        serde_json::to_value(&self.status)
    }
}

impl Template for ServiceTemplate {
    fn helm_spec(&self) -> &HelmSpec {
        &self.spec.helm
    }

    fn common_status(&self) -> Option<&TemplateStatusCommon> {
        self.status.as_ref().map(|s| &s.common)
    }

    fn common_status_mut(&mut self) -> &mut TemplateStatusCommon {
        &mut self.status.get_or_insert_with(Default::default).common
    }

    fn providers(&self) -> Option<&Providers> {
        self.status.as_ref().map(|s| &s.providers)
    }

    fn fill_providers(&mut self, providers: Providers) {
        self.status.get_or_insert_with(Default::default).providers = providers;
    }

    fn status_json(&self) -> serde_json::Result<Value> {
        serde_json::to_value(&self.status)
    }
}

impl Template for ProviderTemplate {
    fn helm_spec(&self) -> &HelmSpec {
        &self.spec.helm
    }

    fn common_status(&self) -> Option<&TemplateStatusCommon> {
        self.status.as_ref().map(|s| &s.common)
    }

    fn common_status_mut(&mut self) -> &mut TemplateStatusCommon {
        &mut self.status.get_or_insert_with(Default::default).common
    }

    fn providers(&self) -> Option<&Providers> {
        self.status.as_ref().map(|s| &s.providers)
    }

    fn fill_providers(&mut self, providers: Providers) {
        self.status.get_or_insert_with(Default::default).providers = providers;
    }

    fn status_json(&self) -> serde_json::Result<Value> {
        serde_json::to_value(&self.status)
    }
}
