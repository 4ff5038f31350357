use std::collections::BTreeMap;
use std::io;
use std::string::FromUtf8Error;
use std::time::Duration;

use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;
use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;

use crate::api::flux::Artifact;
use crate::compatibility::parse_version;

pub mod cli;

pub type ChartResult<T> = std::result::Result<T, ChartError>;

#[derive(Error, Debug)]
pub enum ChartError {
    #[error("helm invocation error: {0}")]
    Spawn(#[from] io::Error),

    #[error("helm {command} timed out after {timeout:?}")]
    Timeout { command: String, timeout: Duration },

    #[error("helm {command} failed: {stderr}")]
    Command { command: String, stderr: String },

    #[error("helm output is not valid UTF-8: {0}")]
    Utf8(#[from] FromUtf8Error),

    #[error("malformed chart document: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("validation error: {0}")]
    Invalid(String),
}

/// `Chart.yaml` of a chart.
#[derive(Deserialize, Clone, Debug, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ChartMetadata {
    #[serde(default)]
    pub api_version: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub app_version: Option<String>,
    #[serde(default, rename = "type")]
    pub type_: Option<String>,
    #[serde(default)]
    pub annotations: BTreeMap<String, String>,
}

/// A downloaded chart: where it came from, its metadata and default values.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Chart {
    /// Reference helm can fetch the chart from again.
    pub source: String,
    pub metadata: Option<ChartMetadata>,
    pub values: Value,
}

impl Chart {
    /// Structural checks helm applies before installing a chart.
    ///
    /// A chart without metadata has nothing to check here; callers decide
    /// what an absent `Chart.yaml` means.
    pub fn validate(&self) -> ChartResult<()> {
        if !matches!(self.values, Value::Object(_) | Value::Null) {
            return Err(ChartError::Invalid("chart values must be a map".into()));
        }
        let Some(metadata) = self.metadata.as_ref() else {
            return Ok(());
        };

        match metadata.api_version.as_str() {
            "" => return Err(ChartError::Invalid("chart apiVersion is required".into())),
            "v1" | "v2" => {}
            other => {
                return Err(ChartError::Invalid(format!(
                    "chart apiVersion {other} is not supported"
                )))
            }
        }
        if metadata.name.is_empty() {
            return Err(ChartError::Invalid("chart name is required".into()));
        }
        if metadata.version.is_empty() {
            return Err(ChartError::Invalid("chart version is required".into()));
        }
        if parse_version(&metadata.version).is_err() {
            return Err(ChartError::Invalid(format!(
                "chart version {} is not a valid SemVer",
                metadata.version
            )));
        }
        if metadata.type_.as_deref() == Some("library") {
            return Err(ChartError::Invalid(
                "library charts are not installable".into(),
            ));
        }

        Ok(())
    }
}

/// Parses `helm show chart` output; an empty document means no metadata.
pub fn parse_metadata(document: &str) -> ChartResult<Option<ChartMetadata>> {
    if document.trim().is_empty() {
        return Ok(None);
    }
    Ok(Some(serde_yaml::from_str(document)?))
}

/// Parses `helm show values` output into a values map.
pub fn parse_values(document: &str) -> ChartResult<Value> {
    let values: Value = serde_yaml::from_str(document)?;
    Ok(match values {
        Value::Null => Value::Object(Default::default()),
        values => values,
    })
}

/// Fetching and dry-run rendering of charts.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ChartFetcher: Send + Sync {
    /// Downloads the chart behind a ready artifact.
    async fn download(&self, artifact: &Artifact) -> ChartResult<Chart>;

    /// Renders the chart client side with the given values without touching any cluster.
    async fn render(
        &self,
        chart: &Chart,
        release: &str,
        namespace: &str,
        values: &Value,
    ) -> ChartResult<()>;
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn chart(metadata: &str) -> Chart {
        Chart {
            source: "http://source-controller/chart.tgz".into(),
            metadata: parse_metadata(metadata).unwrap(),
            values: json!({}),
        }
    }

    #[test]
    fn valid_chart() {
        let chart = chart(
            r#"
apiVersion: v2
name: aws-standalone-cp
version: 0.0.1
description: AWS standalone control plane
annotations:
  hmc.mirantis.com/infrastructure-providers: aws
"#,
        );

        assert!(chart.validate().is_ok());
        let metadata = chart.metadata.unwrap();
        assert_eq!(metadata.annotations.len(), 1);
        assert_eq!(
            metadata.description.as_deref(),
            Some("AWS standalone control plane")
        );
    }

    #[test]
    fn structural_failures() {
        for (document, message) in [
            ("name: a\nversion: 1.0.0", "chart apiVersion is required"),
            ("apiVersion: v3\nname: a\nversion: 1.0.0", "not supported"),
            ("apiVersion: v2\nversion: 1.0.0", "chart name is required"),
            ("apiVersion: v2\nname: a", "chart version is required"),
            ("apiVersion: v2\nname: a\nversion: latest", "not a valid SemVer"),
            (
                "apiVersion: v2\nname: a\nversion: 1.0.0\ntype: library",
                "not installable",
            ),
        ] {
            let err = chart(document).validate().unwrap_err();
            assert!(
                err.to_string().contains(message),
                "{document:?}: {err} should mention {message}"
            );
        }
    }

    #[test]
    fn values_parsing() {
        assert_eq!(parse_values("").unwrap(), json!({}));
        assert_eq!(
            parse_values("replicas: 2\nimage:\n  tag: v1\n").unwrap(),
            json!({"replicas": 2, "image": {"tag": "v1"}})
        );

        let mut chart = chart("apiVersion: v2\nname: a\nversion: 1.0.0");
        chart.values = json!(["not", "a", "map"]);
        assert!(chart.validate().is_err());
    }

    #[test]
    fn missing_metadata_is_left_to_the_caller() {
        let mut chart = chart("");
        assert_eq!(chart.metadata, None);
        assert!(chart.validate().is_ok());

        chart.values = json!("scalar");
        assert!(chart.validate().is_err());
    }
}
