use std::time::Duration;

use anyhow::Context;
use reqwest::Url;

/// Registry connection flags, each with a `BUILDLOG_*` env fallback.
#[derive(clap::Args, Debug, Clone)]
pub struct RegistryArgs {
    /// Management API base url.
    #[arg(long, env = "BUILDLOG_ENDPOINT", default_value = "https://management.azure.com")]
    endpoint: String,

    #[arg(long, env = "BUILDLOG_SUBSCRIPTION")]
    subscription: String,

    #[arg(long, env = "BUILDLOG_RESOURCE_GROUP")]
    resource_group: String,

    /// Container registry name.
    #[arg(long, env = "BUILDLOG_REGISTRY")]
    registry: String,

    #[arg(long, env = "BUILDLOG_API_VERSION", default_value = "2018-02-01-preview")]
    api_version: String,

    /// Pre-acquired bearer token, sent as-is.
    #[arg(long, env = "BUILDLOG_TOKEN", hide_env_values = true)]
    token: Option<String>,

    /// Per-request timeout in seconds.
    #[arg(long, env = "BUILDLOG_TIMEOUT_SECS", default_value_t = 30)]
    timeout_secs: u64,
}

#[derive(Clone, Debug)]
pub struct Config {
    pub endpoint: Url,
    pub subscription: String,
    pub resource_group: String,
    pub registry: String,
    pub api_version: String,

    /// Attached as `Authorization: Bearer ..` when set.
    pub token: Option<String>,

    pub timeout: Duration,
}

impl Config {
    pub fn from_args(a: RegistryArgs) -> anyhow::Result<Self> {
        let endpoint = Url::parse(&a.endpoint)
            .with_context(|| format!("invalid endpoint url {:?}", a.endpoint))?;
        if endpoint.cannot_be_a_base() {
            anyhow::bail!("endpoint {endpoint} cannot carry a path");
        }
        Ok(Self {
            endpoint,
            subscription: a.subscription,
            resource_group: a.resource_group,
            registry: a.registry,
            api_version: a.api_version,
            token: a.token.filter(|t| !t.is_empty()),
            timeout: Duration::from_secs(a.timeout_secs),
        })
    }
}
