use schemars::{
    gen::SchemaGenerator,
    schema::{InstanceType, Schema, SchemaObject},
};

pub mod capi;
pub mod credential;
pub mod flux;
pub mod managed_cluster;
pub mod management;
pub mod sveltos;
pub mod templates;

/// Schema for free-form helm values.
pub(crate) fn preserve_unknown_fields(_: &mut SchemaGenerator) -> Schema {
    Schema::Object(SchemaObject {
        instance_type: Some(InstanceType::Object.into()),
        extensions: [(
            "x-kubernetes-preserve-unknown-fields".to_string(),
            serde_json::Value::Bool(true),
        )]
        .into_iter()
        .collect(),
        ..Default::default()
    })
}
