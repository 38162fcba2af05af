//! Remote content index lookup
//!
//! This module provides a provider-agnostic interface for asking a remote
//! index which local digests are stale, plus the Modrinth implementation.
//!
//! The Modrinth protocol is a single `POST /version_files/update` carrying
//! every digest of a resource group; the response only lists digests for
//! which the index knows a newer canonical file.

use crate::error::SyncError;
use crate::hash::HashAlgorithm;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, info};

/// User agent sent with every request
pub const USER_AGENT: &str = concat!("resources-updater/", env!("CARGO_PKG_VERSION"));

/// Default Modrinth API base
pub const MODRINTH_API_URL: &str = "https://api.modrinth.com/v2";

/// Provider-specific selectors narrowing the lookup
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LookupSelectors {
    /// Loader / platform identifiers (e.g. "fabric")
    pub loaders: Vec<String>,
    /// Optional game version constraint
    pub game_versions: Option<Vec<String>>,
}

/// The file the remote index considers canonical for a digest
#[derive(Debug, Clone, PartialEq)]
pub struct CanonicalFile {
    pub url: String,
    pub file_name: String,
    /// Size in bytes, when the index knows it
    pub size: Option<u64>,
    /// Digest of the canonical file under the lookup algorithm
    pub digest: Option<String>,
}

/// One entry of a change-set: download `source_url` as `file_name` and
/// replace `stale_path` with it
#[derive(Debug, Clone, PartialEq)]
pub struct UpdateDescriptor {
    pub source_url: String,
    pub file_name: String,
    pub expected_size: Option<u64>,
    pub stale_path: PathBuf,
}

/// Trait for remote index providers
///
/// Implement this trait to support another content index.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait RemoteIndexClient: Send + Sync {
    /// Provider name for display/logging
    fn provider_name(&self) -> &'static str;

    /// Look up every digest in one round trip.
    ///
    /// Returns the canonical file for each digest the index lists; digests it
    /// does not know are absent. A failed request fails the whole lookup.
    async fn lookup_updates(
        &self,
        digests: &[String],
        selectors: &LookupSelectors,
    ) -> Result<HashMap<String, CanonicalFile>, SyncError>;
}

/// Build the HTTP client shared by lookups and downloads.
///
/// Only connecting is bounded here; callers bound each wait on the response.
pub fn build_http_client(connect_timeout: Duration) -> Result<reqwest::Client, SyncError> {
    reqwest::Client::builder()
        .user_agent(USER_AGENT)
        .connect_timeout(connect_timeout)
        .build()
        .map_err(SyncError::HttpClient)
}

// =============================================================================
// Modrinth Implementation
// =============================================================================

#[derive(Debug, Serialize)]
struct LookupRequest<'a> {
    hashes: &'a [String],
    algorithm: HashAlgorithm,
    loaders: &'a [String],
    #[serde(skip_serializing_if = "Option::is_none")]
    game_versions: Option<&'a [String]>,
}

#[derive(Debug, Deserialize)]
struct RemoteVersion {
    #[serde(default)]
    files: Vec<RemoteFile>,
}

#[derive(Debug, Deserialize)]
struct RemoteFile {
    url: String,
    filename: String,
    #[serde(default)]
    size: Option<i64>,
    #[serde(default)]
    primary: bool,
    #[serde(default)]
    hashes: HashMap<String, String>,
}

/// Modrinth `version_files/update` client
#[derive(Clone)]
pub struct ModrinthClient {
    http: reqwest::Client,
    api_url: String,
    algorithm: HashAlgorithm,
}

impl ModrinthClient {
    pub fn new(http: reqwest::Client, api_url: impl Into<String>, algorithm: HashAlgorithm) -> Self {
        Self {
            http,
            api_url: api_url.into(),
            algorithm,
        }
    }

    fn endpoint(&self) -> String {
        format!("{}/version_files/update", self.api_url.trim_end_matches('/'))
    }
}

fn lookup_error(source: reqwest::Error) -> SyncError {
    SyncError::RemoteLookup {
        provider: "modrinth",
        source,
    }
}

#[async_trait]
impl RemoteIndexClient for ModrinthClient {
    fn provider_name(&self) -> &'static str {
        "modrinth"
    }

    async fn lookup_updates(
        &self,
        digests: &[String],
        selectors: &LookupSelectors,
    ) -> Result<HashMap<String, CanonicalFile>, SyncError> {
        if digests.is_empty() {
            return Ok(HashMap::new());
        }

        let request = LookupRequest {
            hashes: digests,
            algorithm: self.algorithm,
            loaders: &selectors.loaders,
            game_versions: selectors.game_versions.as_deref(),
        };

        debug!(
            "Looking up {} {} digests (loaders: {:?})",
            digests.len(),
            self.algorithm,
            selectors.loaders
        );

        let versions: HashMap<String, RemoteVersion> = self
            .http
            .post(self.endpoint())
            .json(&request)
            .send()
            .await
            .map_err(lookup_error)?
            .error_for_status()
            .map_err(lookup_error)?
            .json()
            .await
            .map_err(lookup_error)?;

        let canonical: HashMap<String, CanonicalFile> = versions
            .into_iter()
            .filter_map(|(digest, version)| {
                select_primary(version.files, self.algorithm).map(|file| (digest, file))
            })
            .collect();

        info!(
            "Modrinth lists {} of {} digests as updatable",
            canonical.len(),
            digests.len()
        );

        Ok(canonical)
    }
}

/// Pick the primary file of a version, falling back to the first one
fn select_primary(files: Vec<RemoteFile>, algorithm: HashAlgorithm) -> Option<CanonicalFile> {
    let index = files.iter().position(|f| f.primary).unwrap_or(0);
    let mut file = files.into_iter().nth(index)?;

    Some(CanonicalFile {
        digest: file.hashes.remove(algorithm.as_str()),
        size: file.size.and_then(|size| u64::try_from(size).ok()),
        url: file.url,
        file_name: file.filename,
    })
}
