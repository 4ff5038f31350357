use controllers::{
    helm::ChartError, ComponentError, LifecycleError, ProfileError, ReleaseError, SourceError,
};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Kube Error: {0}")]
    KubeError(#[from] kube::Error),

    #[error("Chart error: {0}")]
    Chart(#[from] ChartError),

    #[error("Chart source error: {0}")]
    Source(#[from] SourceError),

    #[error("Release error: {0}")]
    Release(#[from] ReleaseError),

    #[error("Profile error: {0}")]
    Profile(#[from] ProfileError),

    #[error("{0}")]
    Lifecycle(#[from] LifecycleError),

    #[error("component {name}: {source}")]
    Component {
        name: String,
        #[source]
        source: ComponentError,
    },

    #[error("{}", join(.0))]
    Joined(Vec<Error>),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("Invariant violated: {0}")]
    Invariant(String),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

impl Error {
    pub fn metric_label(&self) -> &'static str {
        match self {
            Error::KubeError(_) => "kube",
            Error::Chart(_) => "chart",
            Error::Source(_) => "source",
            Error::Release(_) => "release",
            Error::Profile(_) => "profile",
            Error::Lifecycle(_) => "lifecycle",
            Error::Component { .. } => "component",
            Error::Joined(_) => "joined",
            Error::SerializationError(_) => "serialization",
            Error::Invariant(_) => "invariant",
        }
    }

    /// Folds independent failures into one error, or nothing when there are none.
    pub fn join(mut errors: Vec<Error>) -> Option<Error> {
        match errors.len() {
            0 => None,
            1 => errors.pop(),
            _ => Some(Error::Joined(errors)),
        }
    }
}

fn join(errors: &[Error]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// Expose all controller components used by main
pub mod controller;
pub use crate::controller::*;
pub mod api;
pub mod compatibility;
pub mod conditions;
pub mod config;
pub mod controllers;
pub mod watches;

/// Log and trace integrations
pub mod telemetry;

/// Metrics
mod metrics;
pub use metrics::Metrics;
