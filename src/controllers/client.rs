use std::fmt::Debug;
use std::sync::Arc;

use async_trait::async_trait;
use k8s_openapi::NamespaceResourceScope;
#[cfg(test)]
use mockall::automock;
use kube::api::{
    Api, ApiResource, DeleteParams, DynamicObject, GroupVersionKind, ListParams, Patch,
    PatchParams, PostParams,
};
use kube::{Client, Resource, ResourceExt};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{json, Value};
use tracing::info;

use crate::api::credential::Credential;
use crate::api::flux::{HelmChart, HelmRelease, HelmRepository};
use crate::api::management::Management;
use crate::api::sveltos::Profile;
use crate::api::templates::{ClusterTemplate, ProviderTemplate, ServiceTemplate};
use crate::config::Settings;

pub static MANAGER: &str = "hmc-controller";

/// Address of a stored object for partial updates, with the version it was read at.
#[derive(Clone, Debug, PartialEq)]
pub struct ObjectTarget {
    pub resource: ApiResource,
    pub namespace: Option<String>,
    pub name: String,
    pub resource_version: Option<String>,
}

impl ObjectTarget {
    pub fn of<K: Resource<DynamicType = ()>>(obj: &K) -> Self {
        Self {
            resource: ApiResource::erase::<K>(&()),
            namespace: obj.namespace(),
            name: obj.name_any(),
            resource_version: obj.resource_version(),
        }
    }

    pub fn dynamic(obj: &DynamicObject, gvk: &GroupVersionKind) -> Self {
        Self {
            resource: ApiResource::from_gvk(gvk),
            namespace: obj.namespace(),
            name: obj.name_any(),
            resource_version: obj.resource_version(),
        }
    }

    fn api(&self, client: Client) -> Api<DynamicObject> {
        match &self.namespace {
            Some(ns) => Api::namespaced_with(client, ns, &self.resource),
            None => Api::all_with(client, &self.resource),
        }
    }
}

/// Every interaction the reconcilers have with the declarative store.
///
/// Lookups return `None` for absent objects, deletes treat absent objects
/// as done.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait KubeClient: Send + Sync {
    async fn get_cluster_template(
        &self,
        namespace: &str,
        name: &str,
    ) -> kube::Result<Option<ClusterTemplate>>;

    async fn get_service_template(
        &self,
        namespace: &str,
        name: &str,
    ) -> kube::Result<Option<ServiceTemplate>>;

    async fn get_provider_template(&self, name: &str) -> kube::Result<Option<ProviderTemplate>>;

    async fn get_credential(&self, namespace: &str, name: &str)
        -> kube::Result<Option<Credential>>;

    /// The Management singleton under its well-known name.
    async fn get_management(&self) -> kube::Result<Option<Management>>;

    async fn get_helm_chart(&self, namespace: &str, name: &str)
        -> kube::Result<Option<HelmChart>>;

    async fn get_helm_repository(
        &self,
        namespace: &str,
        name: &str,
    ) -> kube::Result<Option<HelmRepository>>;

    /// Creates the repository unless an object with its name exists.
    async fn create_helm_repository(&self, repository: HelmRepository) -> kube::Result<()>;

    async fn apply_helm_chart(&self, chart: HelmChart) -> kube::Result<HelmChart>;

    async fn get_helm_release(
        &self,
        namespace: &str,
        name: &str,
    ) -> kube::Result<Option<HelmRelease>>;

    async fn apply_helm_release(&self, release: HelmRelease) -> kube::Result<HelmRelease>;

    async fn delete_helm_release(&self, namespace: &str, name: &str) -> kube::Result<()>;

    async fn apply_profile(&self, profile: Profile) -> kube::Result<Profile>;

    async fn delete_profile(&self, namespace: &str, name: &str) -> kube::Result<()>;

    async fn list_objects(
        &self,
        gvk: &GroupVersionKind,
        namespace: &str,
        selector: &str,
        limit: Option<u32>,
    ) -> kube::Result<Vec<DynamicObject>>;

    /// Replaces the finalizer list, conditional on the target's resource version.
    async fn patch_finalizers(
        &self,
        target: &ObjectTarget,
        finalizers: Vec<String>,
    ) -> kube::Result<()>;

    /// Merges `status` into the status subresource, conditional on the target's resource version.
    async fn patch_status(&self, target: &ObjectTarget, status: Value) -> kube::Result<()>;

    async fn patch_management_spec(&self, management: &Management) -> kube::Result<()>;
}

/// [`KubeClient`] backed by the API server.
#[derive(Clone)]
pub struct Kube {
    pub client: Client,
    pub settings: Arc<Settings>,
}

impl Kube {
    pub fn new(client: Client, settings: Arc<Settings>) -> Self {
        Self { client, settings }
    }

    async fn get_namespaced<R>(&self, namespace: &str, name: &str) -> kube::Result<Option<R>>
    where
        R: Resource<DynamicType = (), Scope = NamespaceResourceScope>,
        R: Clone + Debug + DeserializeOwned,
    {
        Api::<R>::namespaced(self.client.clone(), namespace)
            .get_opt(name)
            .await
    }

    async fn get_or_create<R>(&self, res: &R) -> kube::Result<()>
    where
        R: Resource<DynamicType = (), Scope = NamespaceResourceScope>,
        R: Clone + Debug + Serialize + DeserializeOwned,
    {
        let ns = res.namespace().unwrap_or(String::from("default"));
        let api = Api::<R>::namespaced(self.client.clone(), &ns);

        if api.get_metadata_opt(&res.name_any()).await?.is_some() {
            return Ok(());
        }

        match api.create(&PostParams::default(), res).await {
            Ok(_) => {
                info!(name = %res.name_any(), namespace = %ns, "Created {}", R::kind(&()));
                Ok(())
            }
            Err(kube::Error::Api(e)) if e.code == 409 => Ok(()),
            Err(e) => Err(e),
        }
    }

    async fn apply<R>(&self, mut res: R) -> kube::Result<R>
    where
        R: Resource<DynamicType = (), Scope = NamespaceResourceScope>,
        R: Clone + Debug + Serialize + DeserializeOwned,
    {
        let ns = res.namespace().unwrap_or(String::from("default"));
        let api = Api::<R>::namespaced(self.client.clone(), &ns);

        res.meta_mut().managed_fields = None;
        res.meta_mut().resource_version = None;

        api.patch(
            &res.name_any(),
            &PatchParams::apply(MANAGER).force(),
            &Patch::Apply(&res),
        )
        .await
    }

    async fn delete<R>(&self, namespace: &str, name: &str) -> kube::Result<()>
    where
        R: Resource<DynamicType = (), Scope = NamespaceResourceScope>,
        R: Clone + Debug + DeserializeOwned,
    {
        let api = Api::<R>::namespaced(self.client.clone(), namespace);
        match api.delete(name, &DeleteParams::default()).await {
            Ok(_) => {
                info!(name, namespace, "Requested {} deletion", R::kind(&()));
                Ok(())
            }
            Err(kube::Error::Api(e)) if e.code == 404 => Ok(()),
            Err(e) => Err(e),
        }
    }
}

#[async_trait]
impl KubeClient for Kube {
    async fn get_cluster_template(
        &self,
        namespace: &str,
        name: &str,
    ) -> kube::Result<Option<ClusterTemplate>> {
        self.get_namespaced(namespace, name).await
    }

    async fn get_service_template(
        &self,
        namespace: &str,
        name: &str,
    ) -> kube::Result<Option<ServiceTemplate>> {
        self.get_namespaced(namespace, name).await
    }

    async fn get_provider_template(&self, name: &str) -> kube::Result<Option<ProviderTemplate>> {
        Api::all(self.client.clone()).get_opt(name).await
    }

    async fn get_credential(
        &self,
        namespace: &str,
        name: &str,
    ) -> kube::Result<Option<Credential>> {
        self.get_namespaced(namespace, name).await
    }

    async fn get_management(&self) -> kube::Result<Option<Management>> {
        Api::all(self.client.clone())
            .get_opt(&self.settings.management_name)
            .await
    }

    async fn get_helm_chart(
        &self,
        namespace: &str,
        name: &str,
    ) -> kube::Result<Option<HelmChart>> {
        self.get_namespaced(namespace, name).await
    }

    async fn get_helm_repository(
        &self,
        namespace: &str,
        name: &str,
    ) -> kube::Result<Option<HelmRepository>> {
        self.get_namespaced(namespace, name).await
    }

    async fn create_helm_repository(&self, repository: HelmRepository) -> kube::Result<()> {
        self.get_or_create(&repository).await
    }

    async fn apply_helm_chart(&self, chart: HelmChart) -> kube::Result<HelmChart> {
        self.apply(chart).await
    }

    async fn get_helm_release(
        &self,
        namespace: &str,
        name: &str,
    ) -> kube::Result<Option<HelmRelease>> {
        self.get_namespaced(namespace, name).await
    }

    async fn apply_helm_release(&self, release: HelmRelease) -> kube::Result<HelmRelease> {
        self.apply(release).await
    }

    async fn delete_helm_release(&self, namespace: &str, name: &str) -> kube::Result<()> {
        self.delete::<HelmRelease>(namespace, name).await
    }

    async fn apply_profile(&self, profile: Profile) -> kube::Result<Profile> {
        self.apply(profile).await
    }

    async fn delete_profile(&self, namespace: &str, name: &str) -> kube::Result<()> {
        self.delete::<Profile>(namespace, name).await
    }

    async fn list_objects(
        &self,
        gvk: &GroupVersionKind,
        namespace: &str,
        selector: &str,
        limit: Option<u32>,
    ) -> kube::Result<Vec<DynamicObject>> {
        let api: Api<DynamicObject> =
            Api::namespaced_with(self.client.clone(), namespace, &ApiResource::from_gvk(gvk));

        let mut params = ListParams::default().labels(selector);
        if let Some(limit) = limit {
            params = params.limit(limit);
        }

        Ok(api.list(&params).await?.items)
    }

    async fn patch_finalizers(
        &self,
        target: &ObjectTarget,
        finalizers: Vec<String>,
    ) -> kube::Result<()> {
        let patch = json!({
            "metadata": {
                "finalizers": finalizers,
                "resourceVersion": target.resource_version,
            }
        });

        target
            .api(self.client.clone())
            .patch(&target.name, &PatchParams::default(), &Patch::Merge(&patch))
            .await?;

        Ok(())
    }

    async fn patch_status(&self, target: &ObjectTarget, status: Value) -> kube::Result<()> {
        let patch = json!({
            "metadata": {
                "resourceVersion": target.resource_version,
            },
            "status": status,
        });

        target
            .api(self.client.clone())
            .patch_status(&target.name, &PatchParams::default(), &Patch::Merge(&patch))
            .await?;

        Ok(())
    }

    async fn patch_management_spec(&self, management: &Management) -> kube::Result<()> {
        let patch = json!({
            "metadata": {
                "resourceVersion": management.resource_version(),
            },
            "spec": management.spec,
        });

        Api::<Management>::all(self.client.clone())
            .patch(
                &management.name_any(),
                &PatchParams::default(),
                &Patch::Merge(&patch),
            )
            .await?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::capi::cluster_gvk;
    use crate::api::managed_cluster::ManagedCluster;

    #[test]
    fn targets_carry_identity_and_version() {
        let mut mc = ManagedCluster::new("dev", Default::default());
        mc.metadata.namespace = Some("team-a".into());
        mc.metadata.resource_version = Some("42".into());

        let target = ObjectTarget::of(&mc);
        assert_eq!(target.resource.kind, "ManagedCluster");
        assert_eq!(target.resource.plural, "managedclusters");
        assert_eq!(target.namespace.as_deref(), Some("team-a"));
        assert_eq!(target.resource_version.as_deref(), Some("42"));

        let cluster = DynamicObject::new("dev", &ApiResource::from_gvk(&cluster_gvk()))
            .within("team-a");
        let target = ObjectTarget::dynamic(&cluster, &cluster_gvk());
        assert_eq!(target.resource.group, "cluster.x-k8s.io");
        assert_eq!(target.name, "dev");
        assert_eq!(target.resource_version, None);
    }
}
