use thiserror::Error;

use self::helm::ChartError;

pub mod client;
pub mod controller;
pub mod deletion;
pub mod helm;
pub mod managed_cluster;
pub mod management;
pub mod profile;
pub mod release;
pub mod services;
pub mod source;
pub mod template;

#[derive(Error, Debug)]
pub enum SourceError {
    #[error("chart reference must point to a {expected}, got {kind}")]
    UnsupportedKind { expected: String, kind: String },

    #[error("HelmChart {namespace}/{name} not found")]
    ChartNotFound { namespace: String, name: String },

    #[error("HelmRepository {namespace}/{name} not found")]
    RepositoryNotFound { namespace: String, name: String },

    #[error("either a chart reference or a chart name and version must be set")]
    MissingChart,

    #[error("HelmChart {0} has no artifact yet")]
    ArtifactNotReady(String),

    #[error("Lookup error: {0}")]
    Lookup(#[source] kube::Error),

    #[error("Create error: {0}")]
    Create(#[source] kube::Error),

    #[error("Apply error: {0}")]
    Apply(#[source] kube::Error),
}

#[derive(Error, Debug)]
pub enum ReleaseError {
    #[error("HelmRelease {namespace}/{name} is owned by another object")]
    Foreign { namespace: String, name: String },

    #[error("Lookup error: {0}")]
    Lookup(#[source] kube::Error),

    #[error("Apply error: {0}")]
    Apply(#[source] kube::Error),

    #[error("Delete error: {0}")]
    Delete(#[source] kube::Error),
}

#[derive(Error, Debug)]
pub enum ProfileError {
    #[error("Apply error: {0}")]
    Apply(#[source] kube::Error),

    #[error("Delete error: {0}")]
    Delete(#[source] kube::Error),
}

/// Gate failures of the managed cluster lifecycle.
#[derive(Error, Debug)]
pub enum LifecycleError {
    #[error("ClusterTemplate {0} not found")]
    TemplateNotFound(String),

    #[error("ClusterTemplate {name} is not valid: {reason}")]
    TemplateInvalid { name: String, reason: String },

    #[error("ClusterTemplate {0} has no chart reference")]
    MissingChartRef(String),

    #[error("{0}")]
    Source(#[from] SourceError),

    #[error("failed to download chart: {0}")]
    Download(#[source] ChartError),

    #[error("failed to render chart with the provided configuration: {0}")]
    Render(#[source] ChartError),

    #[error("configuration must be a map of helm values")]
    InvalidValues,

    #[error("Credential {0} not found")]
    CredentialNotFound(String),

    #[error("Credential {0} is not ready")]
    CredentialNotReady(String),

    #[error("ServiceTemplate {0} not found")]
    ServiceTemplateNotFound(String),

    #[error("ServiceTemplate {name} is not valid: {reason}")]
    ServiceTemplateInvalid { name: String, reason: String },

    #[error("Lookup error: {0}")]
    Lookup(#[source] kube::Error),
}

/// Failure of one management plane component.
#[derive(Error, Debug)]
pub enum ComponentError {
    #[error("ProviderTemplate {0} not found")]
    TemplateNotFound(String),

    #[error("ProviderTemplate {name} is not valid: {reason}")]
    TemplateInvalid { name: String, reason: String },

    #[error("ProviderTemplate {0} has no chart reference")]
    MissingChartRef(String),

    #[error("Lookup error: {0}")]
    Lookup(#[source] kube::Error),

    #[error("{0}")]
    Release(#[from] ReleaseError),
}
