//! Mappings from a watched object to the keys of the objects it should
//! re-enqueue. Every function here is a pure lookup over the event payload
//! and the reflector state handed in by the caller.

use std::sync::Arc;

use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::{runtime::reflector::ObjectRef, Resource, ResourceExt};

use crate::api::credential::Credential;
use crate::api::managed_cluster::ManagedCluster;
use crate::api::templates::ClusterTemplate;

/// Controller owner of a namespaced object, living in the same namespace.
pub fn namespaced_owner<K>(meta: &ObjectMeta) -> Option<ObjectRef<K>>
where
    K: Resource<DynamicType = ()>,
{
    let owner = controller_owner::<K>(meta)?;
    Some(owner.within(meta.namespace.as_deref()?))
}

/// Controller owner of an object when the owner kind is cluster scoped.
pub fn cluster_owner<K>(meta: &ObjectMeta) -> Option<ObjectRef<K>>
where
    K: Resource<DynamicType = ()>,
{
    controller_owner(meta)
}

fn controller_owner<K>(meta: &ObjectMeta) -> Option<ObjectRef<K>>
where
    K: Resource<DynamicType = ()>,
{
    meta.owner_references
        .iter()
        .flatten()
        .find(|owner| {
            owner.controller == Some(true)
                && owner.kind == K::kind(&())
                && owner.api_version == K::api_version(&())
        })
        .map(|owner| ObjectRef::new(&owner.name))
}

/// ManagedClusters in the template's namespace that deploy it.
pub fn clusters_using_template(
    template: &ClusterTemplate,
    clusters: &[Arc<ManagedCluster>],
) -> Vec<ObjectRef<ManagedCluster>> {
    let namespace = template.namespace();
    let name = template.name_any();
    clusters
        .iter()
        .filter(|mc| mc.namespace() == namespace && mc.spec.template == name)
        .map(|mc| ObjectRef::from_obj(mc.as_ref()))
        .collect()
}

/// ManagedClusters in the credential's namespace that reference it.
pub fn clusters_using_credential(
    credential: &Credential,
    clusters: &[Arc<ManagedCluster>],
) -> Vec<ObjectRef<ManagedCluster>> {
    let namespace = credential.namespace();
    let name = credential.name_any();
    clusters
        .iter()
        .filter(|mc| mc.namespace() == namespace && mc.spec.credential == name)
        .map(|mc| ObjectRef::from_obj(mc.as_ref()))
        .collect()
}

/// Every ClusterTemplate, whose compatibility depends on the available providers.
pub fn all_cluster_templates(templates: &[Arc<ClusterTemplate>]) -> Vec<ObjectRef<ClusterTemplate>> {
    templates
        .iter()
        .map(|template| ObjectRef::from_obj(template.as_ref()))
        .collect()
}
