use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::conditions::Conditions;

pub static DEFAULT_PRIORITY: i32 = 100;

fn default_priority() -> i32 {
    DEFAULT_PRIORITY
}

/// ManagedCluster is the desired state of one workload cluster and the
/// services deployed onto it.
#[derive(CustomResource, Serialize, Deserialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[kube(
    group = "hmc.mirantis.com",
    version = "v1alpha1",
    kind = "ManagedCluster",
    plural = "managedclusters",
    shortname = "mcluster",
    namespaced,
    status = "ManagedClusterStatus",
    printcolumn = r#"{"name":"Ready","type":"string","jsonPath":".status.conditions[?(@.type==\"Ready\")].status"}"#,
    printcolumn = r#"{"name":"Template","type":"string","jsonPath":".spec.template"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct ManagedClusterSpec {
    /// Name of the ClusterTemplate in the same namespace.
    pub template: String,
    /// Helm values merged into the template chart.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[schemars(schema_with = "crate::api::preserve_unknown_fields")]
    pub config: Option<Value>,
    /// Name of the Credential in the same namespace.
    pub credential: String,
    /// Validate the configuration without provisioning anything.
    #[serde(default)]
    pub dry_run: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub services: Vec<ServiceSpec>,
    /// Tier of the service profile when several profiles target the cluster.
    #[serde(default = "default_priority")]
    pub priority: i32,
    /// Fail service attachment instead of skipping on conflicts with other profiles.
    #[serde(default)]
    pub stop_on_conflict: bool,
    /// Drop provider deletion guards without waiting for machines to drain.
    #[serde(default)]
    pub skip_machine_check: bool,
}

/// A service to attach to the cluster once it is provisioned.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ServiceSpec {
    /// Release name of the service.
    pub name: String,
    /// Name of the ServiceTemplate in the cluster namespace.
    pub template: String,
    /// Target namespace, defaults to the service name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    /// Helm values as a YAML document.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub values: Option<String>,
    #[serde(default)]
    pub disable: bool,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ManagedClusterStatus {
    #[serde(default)]
    pub conditions: Conditions,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,
}

impl ManagedCluster {
    pub fn conditions(&self) -> Option<&Conditions> {
        self.status.as_ref().map(|s| &s.conditions)
    }
}
