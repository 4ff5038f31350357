use kube::api::{DynamicObject, GroupVersionKind};
use serde::Deserialize;

pub static CLUSTER_NAME_LABEL: &str = "cluster.x-k8s.io/cluster-name";

/// Guard the templates put on provider cluster objects.
pub static CLUSTER_CLEANUP_FINALIZER: &str = "hmc.mirantis.com/cleanup";

static CAPI_GROUP: &str = "cluster.x-k8s.io";
static INFRASTRUCTURE_GROUP: &str = "infrastructure.cluster.x-k8s.io";

pub fn cluster_gvk() -> GroupVersionKind {
    GroupVersionKind::gvk(CAPI_GROUP, "v1beta1", "Cluster")
}

/// Provider specific kinds backing a cluster.
#[derive(Clone, Debug, PartialEq)]
pub struct ProviderKinds {
    pub cluster: GroupVersionKind,
    pub machine: GroupVersionKind,
}

/// Kinds registered for an infrastructure provider, if it is known.
pub fn provider_kinds(provider: &str) -> Option<ProviderKinds> {
    let (version, cluster, machine) = match provider {
        "aws" => ("v1beta2", "AWSCluster", "AWSMachine"),
        "azure" => ("v1beta1", "AzureCluster", "AzureMachine"),
        "vsphere" => ("v1beta1", "VSphereCluster", "VSphereMachine"),
        _ => return None,
    };

    Some(ProviderKinds {
        cluster: GroupVersionKind::gvk(INFRASTRUCTURE_GROUP, version, cluster),
        machine: GroupVersionKind::gvk(INFRASTRUCTURE_GROUP, version, machine),
    })
}

#[derive(Deserialize, Clone, Debug, Default, PartialEq)]
pub struct ClusterCondition {
    #[serde(rename = "type")]
    pub type_: String,
    pub status: String,
    #[serde(default)]
    pub reason: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}

/// `status.conditions` of a provisioned cluster object.
pub fn cluster_conditions(cluster: &DynamicObject) -> Vec<ClusterCondition> {
    cluster
        .data
        .get("status")
        .and_then(|status| status.get("conditions"))
        .cloned()
        .and_then(|conditions| serde_json::from_value(conditions).ok())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use kube::api::ApiResource;
    use serde_json::json;

    #[test]
    fn known_providers_have_kinds() {
        let aws = provider_kinds("aws").unwrap();
        assert_eq!(aws.cluster.kind, "AWSCluster");
        assert_eq!(aws.machine.version, "v1beta2");
        assert!(provider_kinds("azure").is_some());
        assert!(provider_kinds("openstack").is_none());
    }

    #[test]
    fn conditions_are_read_from_status() {
        let mut cluster = DynamicObject::new("dev", &ApiResource::from_gvk(&cluster_gvk()));
        cluster.data = json!({
            "status": {
                "conditions": [
                    {"type": "Ready", "status": "True", "lastTransitionTime": "2024-01-01T00:00:00Z"},
                    {"type": "ControlPlaneInitialized", "status": "False", "reason": "Waiting", "message": "no nodes"}
                ]
            }
        });

        let conditions = cluster_conditions(&cluster);
        assert_eq!(conditions.len(), 2);
        assert_eq!(conditions[1].reason.as_deref(), Some("Waiting"));
        assert!(cluster_conditions(&DynamicObject::new(
            "empty",
            &ApiResource::from_gvk(&cluster_gvk())
        ))
        .is_empty());
    }
}
