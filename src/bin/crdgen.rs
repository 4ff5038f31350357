use hmc_controller::api::{
    credential::Credential,
    managed_cluster::ManagedCluster,
    management::Management,
    templates::{ClusterTemplate, ProviderTemplate, ServiceTemplate},
};
use kube::CustomResourceExt;

fn main() -> anyhow::Result<()> {
    for crd in [
        ManagedCluster::crd(),
        Management::crd(),
        ClusterTemplate::crd(),
        ServiceTemplate::crd(),
        ProviderTemplate::crd(),
        Credential::crd(),
    ] {
        print!("---\n{}", serde_yaml::to_string(&crd)?);
    }
    Ok(())
}
