use std::collections::BTreeMap;

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::templates::Providers;

pub static CORE_COMPONENT: &str = "hmc";
pub static CAPI_COMPONENT: &str = "capi";
pub static DEFAULT_CORE_TEMPLATE: &str = "hmc";
pub static DEFAULT_CAPI_TEMPLATE: &str = "cluster-api";

/// Management is the cluster wide singleton describing the management plane.
#[derive(CustomResource, Serialize, Deserialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[kube(
    group = "hmc.mirantis.com",
    version = "v1alpha1",
    kind = "Management",
    plural = "managements",
    status = "ManagementStatus"
)]
#[serde(rename_all = "camelCase")]
pub struct ManagementSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub core: Option<Core>,
    /// Provider plugins installed on top of the infrastructure operator.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub providers: Vec<Provider>,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Core {
    /// The core engine.
    pub hmc: Component,
    /// The infrastructure stack operator.
    pub capi: Component,
}

impl Default for Core {
    fn default() -> Self {
        Self {
            hmc: Component {
                template: DEFAULT_CORE_TEMPLATE.to_string(),
                config: None,
            },
            capi: Component {
                template: DEFAULT_CAPI_TEMPLATE.to_string(),
                config: None,
            },
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Component {
    /// Name of the ProviderTemplate to install.
    pub template: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[schemars(schema_with = "crate::api::preserve_unknown_fields")]
    pub config: Option<Value>,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Provider {
    pub name: String,
    #[serde(flatten)]
    pub component: Component,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ManagementStatus {
    #[serde(default)]
    pub components: BTreeMap<String, ComponentStatus>,
    #[serde(default)]
    pub available_providers: Providers,
    #[serde(default)]
    pub observed_generation: Option<i64>,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ComponentStatus {
    pub success: bool,
    #[serde(default)]
    pub error: String,
}
