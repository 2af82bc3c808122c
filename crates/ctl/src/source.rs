//! `RecordSource` over a container registry's build API.

use anyhow::Context;
use async_trait::async_trait;
use buildlog_core::{Build, Page, RecordSource};
use reqwest::{RequestBuilder, Url};
use serde::Deserialize;
use tracing::debug;

use crate::config::Config;

const SKIP_TOKEN: &str = "$skipToken";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BuildList {
    #[serde(default)]
    value: Vec<Build>,
    #[serde(default)]
    next_link: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LogLink {
    #[serde(default)]
    log_link: Option<String>,
}

pub struct HttpBuildSource {
    client: reqwest::Client,
    cfg: Config,
}

impl HttpBuildSource {
    pub fn new(cfg: Config) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(cfg.timeout)
            .build()
            .context("build http client")?;
        Ok(Self { client, cfg })
    }

    /// `.../registries/{registry}/builds[/tail..]?api-version=..`
    fn builds_url(&self, tail: &[&str]) -> anyhow::Result<Url> {
        let mut url = self.cfg.endpoint.clone();
        url.path_segments_mut()
            .map_err(|_| anyhow::anyhow!("endpoint {} cannot carry a path", self.cfg.endpoint))?
            .pop_if_empty()
            .extend([
                "subscriptions",
                self.cfg.subscription.as_str(),
                "resourceGroups",
                self.cfg.resource_group.as_str(),
                "providers",
                "Microsoft.ContainerRegistry",
                "registries",
                self.cfg.registry.as_str(),
                "builds",
            ])
            .extend(tail);
        url.query_pairs_mut()
            .append_pair("api-version", &self.cfg.api_version);
        Ok(url)
    }

    fn list_url(&self, cursor: Option<&str>) -> anyhow::Result<Url> {
        match cursor {
            None => self.builds_url(&[]),
            // A next link without a skip token is followed verbatim.
            Some(link) if link.starts_with("https://") || link.starts_with("http://") => {
                Url::parse(link).with_context(|| format!("invalid next link {link:?}"))
            }
            Some(token) => {
                let mut url = self.builds_url(&[])?;
                url.query_pairs_mut().append_pair(SKIP_TOKEN, token);
                Ok(url)
            }
        }
    }

    fn authorize(&self, req: RequestBuilder) -> RequestBuilder {
        match &self.cfg.token {
            Some(token) => req.bearer_auth(token),
            None => req,
        }
    }
}

/// Cursor for the page after the one that returned `next_link`.
fn continuation(next_link: &str) -> Option<String> {
    if next_link.is_empty() {
        return None;
    }
    let skip_token = Url::parse(next_link).ok().and_then(|url| {
        url.query_pairs()
            .find(|(key, _)| key == SKIP_TOKEN)
            .map(|(_, value)| value.into_owned())
    });
    Some(skip_token.unwrap_or_else(|| next_link.to_string()))
}

#[async_trait]
impl RecordSource for HttpBuildSource {
    type Record = Build;

    async fn list_records(&self, cursor: Option<&str>) -> anyhow::Result<Page<Build>> {
        let url = self.list_url(cursor)?;
        debug!(url = %url, "listing builds");

        let list: BuildList = self
            .authorize(self.client.get(url))
            .send()
            .await
            .context("list builds")?
            .error_for_status()
            .context("list builds")?
            .json()
            .await
            .context("decode build list")?;

        let next = list.next_link.as_deref().and_then(continuation);
        Ok(Page::new(list.value, next))
    }

    async fn resolve_link(&self, record_id: &str) -> anyhow::Result<String> {
        let url = self.builds_url(&[record_id, "getLogLink"])?;
        debug!(build_id = record_id, "requesting log link");

        let link: LogLink = self
            .authorize(self.client.post(url))
            .send()
            .await
            .with_context(|| format!("get log link for {record_id}"))?
            .error_for_status()
            .with_context(|| format!("get log link for {record_id}"))?
            .json()
            .await
            .context("decode log link")?;

        link.log_link
            .filter(|l| !l.is_empty())
            .with_context(|| format!("build {record_id} has no log link"))
    }
}
