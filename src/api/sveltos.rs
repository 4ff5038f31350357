use k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelector;
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

pub static INSTALL_ACTION: &str = "Install";
pub static CONTINUOUS_SYNC_MODE: &str = "Continuous";

/// Profile attaches a list of helm charts to every cluster matching the selector.
#[derive(CustomResource, Serialize, Deserialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[kube(
    group = "config.projectsveltos.io",
    version = "v1beta1",
    kind = "Profile",
    plural = "profiles",
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct ProfileSpec {
    pub cluster_selector: LabelSelector,
    #[serde(default)]
    pub helm_charts: Vec<ProfileHelmChart>,
    #[serde(default)]
    pub tier: i32,
    #[serde(default)]
    pub continue_on_conflict: bool,
    pub sync_mode: String,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ProfileHelmChart {
    #[serde(rename = "repositoryURL")]
    pub repository_url: String,
    pub repository_name: String,
    pub chart_name: String,
    pub chart_version: String,
    pub release_name: String,
    pub release_namespace: String,
    pub helm_chart_action: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub values: Option<String>,
}
