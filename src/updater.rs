//! Release check against the GitHub releases API
//!
//! Only informational: `vpnctl info` reports whether a newer release exists.
//! The last seen version is cached in the state store so `info` still has
//! something to show when offline.

use crate::state::{StateError, StateStore};
use serde::Deserialize;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Error, Debug)]
pub enum UpdateError {
    #[error("HTTP error: {0}")]
    HttpError(#[from] reqwest::Error),
    #[error("Release API returned {status}: {body}")]
    ApiError { status: u16, body: String },
    #[error("State error: {0}")]
    StateError(#[from] StateError),
}

const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

/// One entry of `GET /repos/{owner}/{repo}/releases`
#[derive(Debug, Clone, Deserialize)]
pub struct GitHubRelease {
    pub tag_name: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub body: Option<String>,
    pub html_url: String,
    #[serde(default)]
    pub prerelease: bool,
    #[serde(default)]
    pub draft: bool,
}

/// Releases are listed newest first; drafts are never offered
pub fn pick_latest(releases: Vec<GitHubRelease>) -> Option<GitHubRelease> {
    releases.into_iter().find(|release| !release.draft)
}

fn parse_semver(version: &str) -> Option<(u32, u32, u32)> {
    let v = version.strip_prefix('v').unwrap_or(version);
    let mut parts = v.split('.');
    let major = parts.next()?.parse().ok()?;
    let minor = parts.next()?.parse().ok()?;
    // Ignore pre-release and build suffixes on the patch component
    let patch = parts
        .next()?
        .split(|c: char| !c.is_ascii_digit())
        .next()?
        .parse()
        .ok()?;
    if parts.next().is_some() {
        return None;
    }
    Some((major, minor, patch))
}

/// True when `candidate` is a strictly newer version than `current`.
/// Unparseable versions never count as newer.
pub fn is_newer(candidate: &str, current: &str) -> bool {
    match (parse_semver(candidate), parse_semver(current)) {
        (Some(a), Some(b)) => a > b,
        _ => false,
    }
}

pub async fn fetch_latest_release(url: &str) -> Result<Option<GitHubRelease>, UpdateError> {
    info!("Checking for updates at {}", url);

    let client = reqwest::Client::builder()
        .user_agent(format!("vpnctl/{}", env!("CARGO_PKG_VERSION")))
        .timeout(REQUEST_TIMEOUT)
        .build()?;

    let response = client
        .get(url)
        .header("Accept", "application/vnd.github+json")
        .send()
        .await?;

    let status = response.status();
    if status == reqwest::StatusCode::NOT_FOUND {
        debug!("No releases published");
        return Ok(None);
    }
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(UpdateError::ApiError {
            status: status.as_u16(),
            body,
        });
    }

    let releases: Vec<GitHubRelease> = response.json().await?;
    Ok(pick_latest(releases))
}

/// Fetch the latest release and cache its tag. Falls back to the cached
/// version when the API cannot be reached.
pub async fn check_latest_version(
    url: &str,
    state: &StateStore,
) -> Result<Option<String>, UpdateError> {
    match fetch_latest_release(url).await {
        Ok(Some(release)) => {
            let state = state.clone();
            let tag = release.tag_name.clone();
            let cached = tokio::task::spawn_blocking(move || state.upsert_version(&tag)).await;
            match cached {
                Ok(Err(e)) => warn!("Could not cache latest version: {}", e),
                Err(e) => warn!("Could not cache latest version: {}", e),
                Ok(Ok(())) => {}
            }
            Ok(Some(release.tag_name))
        }
        Ok(None) => Ok(None),
        Err(e) => {
            warn!("Update check failed: {}", e);
            Ok(state.get_latest_version()?)
        }
    }
}
