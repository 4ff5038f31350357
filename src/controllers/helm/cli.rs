use std::io;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::debug;

use crate::api::flux::Artifact;
use crate::config::Settings;

use super::{parse_metadata, parse_values, Chart, ChartError, ChartFetcher, ChartResult};

/// Chart operations backed by the helm binary.
#[derive(Clone, Debug)]
pub struct HelmCli {
    pub binary: String,
    pub timeout: Duration,
}

impl HelmCli {
    pub fn new(settings: &Settings) -> Self {
        Self {
            binary: settings.helm_binary.clone(),
            timeout: settings.helm_timeout(),
        }
    }

    async fn run(&self, args: &[&str], input: Option<String>) -> ChartResult<String> {
        let command_name = args.first().copied().unwrap_or_default().to_string();
        let mut command = Command::new(&self.binary);
        command
            .args(args)
            .stdin(if input.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        debug!(binary = %self.binary, ?args, "Running helm");
        let mut child = command.spawn()?;
        let stdin = child.stdin.take();

        // stdin is fed while the output is drained, both under one deadline
        let exchange = async move {
            let feed = async move {
                if let (Some(input), Some(mut stdin)) = (input, stdin) {
                    stdin.write_all(input.as_bytes()).await?;
                }
                Ok::<_, io::Error>(())
            };
            let (fed, output) = tokio::join!(feed, child.wait_with_output());
            let output = output?;
            if output.status.success() {
                fed?;
            }
            Ok::<_, io::Error>(output)
        };

        let output = tokio::time::timeout(self.timeout, exchange)
            .await
            .map_err(|_| ChartError::Timeout {
                command: command_name.clone(),
                timeout: self.timeout,
            })??;

        if !output.status.success() {
            return Err(ChartError::Command {
                command: command_name,
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        Ok(String::from_utf8(output.stdout)?)
    }
}

#[async_trait]
impl ChartFetcher for HelmCli {
    async fn download(&self, artifact: &Artifact) -> ChartResult<Chart> {
        let metadata = self.run(&["show", "chart", &artifact.url], None).await?;
        let values = self.run(&["show", "values", &artifact.url], None).await?;

        Ok(Chart {
            source: artifact.url.clone(),
            metadata: parse_metadata(&metadata)?,
            values: parse_values(&values)?,
        })
    }

    async fn render(
        &self,
        chart: &Chart,
        release: &str,
        namespace: &str,
        values: &Value,
    ) -> ChartResult<()> {
        let values = serde_yaml::to_string(values)?;
        self.run(
            &[
                "template",
                release,
                &chart.source,
                "--namespace",
                namespace,
                "--values",
                "-",
            ],
            Some(values),
        )
        .await?;

        Ok(())
    }
}
