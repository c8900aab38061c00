use crate::error::SyncError;
use crate::sync::config::CatalogConfig;
use crate::sync::context::RequestContext;
use crate::sync::model::Platform;
use crate::sync::util::truncate_with_ellipsis;
use anyhow::{Context, Result};
use reqwest::blocking::Client;
use reqwest::{StatusCode, Url};
use serde::Deserialize;
use std::time::Duration;
use tracing::{error, info};

const MAX_LOGGED_BODY_CHARS: usize = 512;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteProfile {
    pub user_id: String,
}

/// Source of a user's identity and archive list.
pub trait RemoteCatalog {
    fn fetch_profile(
        &self,
        ctx: &RequestContext,
        username: &str,
        platform: Platform,
    ) -> std::result::Result<RemoteProfile, SyncError>;

    fn fetch_archives(
        &self,
        ctx: &RequestContext,
        username: &str,
    ) -> std::result::Result<Vec<String>, SyncError>;
}

#[derive(Debug, Deserialize)]
struct ProfileBody {
    #[serde(rename = "@id")]
    id: String,
}

#[derive(Debug, Deserialize)]
struct ArchivesBody {
    #[serde(default)]
    archives: Vec<String>,
}

pub struct ChessDotComCatalog {
    base_url: Url,
    client: Client,
}

impl ChessDotComCatalog {
    pub fn new(cfg: &CatalogConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(cfg.request_timeout_secs))
            .build()?;
        let base_url = Url::parse(cfg.base_url.trim())
            .with_context(|| format!("invalid catalog base url `{}`", cfg.base_url))?;
        Ok(Self { base_url, client })
    }

    /// `base_url` with `segments` appended, each percent-encoded as one
    /// path segment.
    fn endpoint(&self, segments: &[&str]) -> std::result::Result<Url, SyncError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|()| {
                SyncError::UpstreamUnavailable(format!(
                    "catalog base url {} cannot carry a path",
                    self.base_url
                ))
            })?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    fn get(&self, url: &Url) -> std::result::Result<(StatusCode, String), SyncError> {
        let response = self
            .client
            .get(url.clone())
            .send()
            .map_err(|err| SyncError::UpstreamUnavailable(format!("request to {url} failed: {err}")))?;
        let status = response.status();
        let body = response.text().map_err(|err| {
            SyncError::UpstreamUnavailable(format!("failed to read response from {url}: {err}"))
        })?;
        Ok((status, body))
    }
}

impl RemoteCatalog for ChessDotComCatalog {
    fn fetch_profile(
        &self,
        ctx: &RequestContext,
        username: &str,
        platform: Platform,
    ) -> std::result::Result<RemoteProfile, SyncError> {
        let _span = ctx.span().enter();
        let url = self.endpoint(&["pub", "player", username])?;
        info!(%url, "requesting remote catalog for profile");

        let (status, body) = self.get(&url)?;
        if status == StatusCode::NOT_FOUND {
            error!(%url, body = %truncate_with_ellipsis(&body, MAX_LOGGED_BODY_CHARS), "profile not found");
            return Err(SyncError::ProfileNotFound {
                username: username.to_string(),
                platform: platform.to_string(),
            });
        }
        if !status.is_success() {
            error!(
                %url,
                status = status.as_u16(),
                body = %truncate_with_ellipsis(&body, MAX_LOGGED_BODY_CHARS),
                "unexpected status from remote catalog"
            );
            return Err(SyncError::UpstreamUnavailable(format!(
                "profile lookup returned {status}"
            )));
        }

        let parsed: ProfileBody = serde_json::from_str(&body).map_err(|err| {
            error!(%url, error = %err, "profile response is not valid json");
            SyncError::UpstreamUnavailable(format!("malformed profile response: {err}"))
        })?;
        info!("profile found");
        Ok(RemoteProfile { user_id: parsed.id })
    }

    fn fetch_archives(
        &self,
        ctx: &RequestContext,
        username: &str,
    ) -> std::result::Result<Vec<String>, SyncError> {
        let _span = ctx.span().enter();
        let url = self.endpoint(&["pub", "player", username, "games", "archives"])?;
        info!(%url, "requesting remote catalog for archives");

        let (status, body) = self.get(&url)?;
        if !status.is_success() {
            error!(
                %url,
                status = status.as_u16(),
                body = %truncate_with_ellipsis(&body, MAX_LOGGED_BODY_CHARS),
                "unexpected status from remote catalog"
            );
            return Err(SyncError::UpstreamUnavailable(format!(
                "archive list returned {status}"
            )));
        }

        let parsed: ArchivesBody = serde_json::from_str(&body).map_err(|err| {
            error!(%url, error = %err, "archive list response is not valid json");
            SyncError::UpstreamUnavailable(format!("malformed archive list response: {err}"))
        })?;
        info!(remote_archives = parsed.archives.len(), "archives found in remote catalog");
        Ok(parsed.archives)
    }
}
