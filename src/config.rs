use std::time::Duration;

use envconfig::Envconfig;

/// Operator settings, read from the environment once at startup.
#[derive(Envconfig, Clone, Debug)]
pub struct Settings {
    /// Namespace of the management plane releases and of charts backing
    /// cluster scoped templates.
    #[envconfig(from = "HMC_SYSTEM_NAMESPACE", default = "hmc-system")]
    pub system_namespace: String,

    #[envconfig(
        from = "HMC_DEFAULT_REGISTRY_URL",
        default = "oci://ghcr.io/mirantis/hmc/charts"
    )]
    pub default_registry_url: String,

    #[envconfig(from = "HMC_DEFAULT_REPOSITORY_NAME", default = "hmc-templates")]
    pub default_repository_name: String,

    /// Well-known name of the Management singleton.
    #[envconfig(from = "HMC_MANAGEMENT_NAME", default = "hmc")]
    pub management_name: String,

    #[envconfig(from = "HMC_REQUEUE_INTERVAL_SECS", default = "10")]
    pub requeue_interval_secs: u64,

    #[envconfig(from = "HMC_ERROR_BACKOFF_MAX_SECS", default = "300")]
    pub error_backoff_max_secs: u64,

    #[envconfig(from = "HMC_HELM_BINARY", default = "helm")]
    pub helm_binary: String,

    #[envconfig(from = "HMC_HELM_TIMEOUT_SECS", default = "120")]
    pub helm_timeout_secs: u64,

    #[envconfig(from = "HMC_HTTP_PORT", default = "8443")]
    pub http_port: u16,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            system_namespace: "hmc-system".to_string(),
            default_registry_url: "oci://ghcr.io/mirantis/hmc/charts".to_string(),
            default_repository_name: "hmc-templates".to_string(),
            management_name: "hmc".to_string(),
            requeue_interval_secs: 10,
            error_backoff_max_secs: 300,
            helm_binary: "helm".to_string(),
            helm_timeout_secs: 120,
            http_port: 8443,
        }
    }
}

impl Settings {
    pub fn requeue_interval(&self) -> Duration {
        Duration::from_secs(self.requeue_interval_secs)
    }

    pub fn error_backoff_max(&self) -> Duration {
        Duration::from_secs(self.error_backoff_max_secs)
    }

    pub fn helm_timeout(&self) -> Duration {
        Duration::from_secs(self.helm_timeout_secs)
    }

    /// Repository type flux expects for the default registry.
    pub fn default_registry_type(&self) -> Option<String> {
        self.default_registry_url
            .starts_with("oci://")
            .then(|| "oci".to_string())
    }
}
