//! Downloader / archiver - executes a change-set
//!
//! Each replacement is streamed to a temporary file next to its target. The
//! stale file is then moved into the archive directory, and only after that
//! the temporary file is renamed onto the final name. A failure at any step
//! removes the temporary file and moves on to the next item.

use crate::error::SyncError;
use crate::remote::UpdateDescriptor;
use crate::sync::SyncPhase;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::time::error::Elapsed;
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

/// Suffix appended to a target name while its download is in flight
pub const TEMP_SUFFIX: &str = ".tmp";

/// Outcome of applying one change-set
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DownloadReport {
    /// Final paths of promoted files
    pub updated: Vec<PathBuf>,
    /// Items skipped after a download or filesystem failure
    pub failed: usize,
    /// Items whose declared size differed from the index metadata
    pub size_mismatches: usize,
}

/// Streams replacements and swaps them in
#[derive(Clone)]
pub struct Downloader {
    http: reqwest::Client,
}

impl Downloader {
    pub fn new(http: reqwest::Client) -> Self {
        Self { http }
    }

    /// Apply every descriptor of a change-set, in order.
    ///
    /// Failures are per item; the remaining items still run. `read_timeout`
    /// bounds the wait for the response head and for each body chunk, not the
    /// whole transfer.
    pub async fn apply(
        &self,
        dir: &Path,
        archive_dir: &Path,
        changes: &[UpdateDescriptor],
        read_timeout: Duration,
    ) -> DownloadReport {
        let mut report = DownloadReport::default();
        if changes.is_empty() {
            return report;
        }

        let listing: Vec<String> = changes.iter().map(describe).collect();
        info!(
            "The following resources will be updated:\n{}",
            listing.join("\n")
        );

        for change in changes {
            match self.replace(dir, archive_dir, change, read_timeout).await {
                Ok((path, size_mismatch)) => {
                    if size_mismatch {
                        report.size_mismatches += 1;
                    }
                    info!("Updated {:?}", path);
                    report.updated.push(path);
                }
                Err(e) => {
                    error!("Skipping update of {:?}: {}", change.stale_path, e);
                    report.failed += 1;
                }
            }
        }

        report
    }

    async fn replace(
        &self,
        dir: &Path,
        archive_dir: &Path,
        change: &UpdateDescriptor,
        read_timeout: Duration,
    ) -> Result<(PathBuf, bool), SyncError> {
        let target = dir.join(&change.file_name);
        let temp = temp_path(&target);

        let result = match self.fetch(change, &temp, read_timeout).await {
            Ok(size_mismatch) => archive_then_promote(&temp, &target, &change.stale_path, archive_dir)
                .await
                .map(|()| (target, size_mismatch)),
            Err(e) => Err(e),
        };

        if result.is_err() {
            remove_temp(&temp).await;
        }
        result
    }

    /// Stream `source_url` into `temp`, returning whether the size disagreed
    async fn fetch(
        &self,
        change: &UpdateDescriptor,
        temp: &Path,
        read_timeout: Duration,
    ) -> Result<bool, SyncError> {
        let download_error = |source| SyncError::DownloadFailure {
            url: change.source_url.clone(),
            source,
        };
        let stalled = |_: Elapsed| SyncError::Timeout {
            target: change.source_url.clone(),
            after: read_timeout,
        };

        let mut response = timeout(read_timeout, self.http.get(&change.source_url).send())
            .await
            .map_err(stalled)?
            .map_err(download_error)?
            .error_for_status()
            .map_err(download_error)?;

        let size_mismatch = check_size(change, response.content_length());

        let mut file = tokio::fs::File::create(temp)
            .await
            .map_err(|e| SyncError::io(temp, e))?;

        while let Some(chunk) = timeout(read_timeout, response.chunk())
            .await
            .map_err(stalled)?
            .map_err(download_error)?
        {
            file.write_all(&chunk)
                .await
                .map_err(|e| SyncError::io(temp, e))?;
        }
        file.flush().await.map_err(|e| SyncError::io(temp, e))?;

        debug!("Downloaded {} to {:?}", change.source_url, temp);
        Ok(size_mismatch)
    }
}

fn describe(change: &UpdateDescriptor) -> String {
    let stale = change
        .stale_path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    match change.expected_size {
        Some(size) => format!("{} -> {} ({} KB)", stale, change.file_name, size >> 10),
        None => format!("{} -> {} (unknown size)", stale, change.file_name),
    }
}

/// Warn once when the declared length disagrees with the index metadata.
/// The index size is advisory; the download proceeds either way.
fn check_size(change: &UpdateDescriptor, declared: Option<u64>) -> bool {
    match (change.expected_size, declared) {
        (Some(expected), Some(declared)) if expected != declared => {
            warn!(
                "The downloaded file {} in size of {} cannot match the size from its meta info: {} bytes, which download url is {}",
                change.file_name, declared, expected, change.source_url
            );
            true
        }
        (Some(expected), None) => {
            debug!(
                "No content-length for {}, expected {} bytes",
                change.source_url, expected
            );
            false
        }
        _ => false,
    }
}

fn temp_path(target: &Path) -> PathBuf {
    let mut name = target
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(TEMP_SUFFIX);
    target.with_file_name(name)
}

async fn archive_then_promote(
    temp: &Path,
    target: &Path,
    stale: &Path,
    archive_dir: &Path,
) -> Result<(), SyncError> {
    tokio::fs::create_dir_all(archive_dir)
        .await
        .map_err(|e| SyncError::io(archive_dir, e))?;

    if let Some(name) = stale.file_name() {
        let archived = archive_dir.join(name);
        debug!("[{}] {:?} -> {:?}", SyncPhase::Archiving, stale, archived);
        if archived != stale {
            match tokio::fs::rename(stale, &archived).await {
                Ok(()) => debug!("Archived {:?} to {:?}", stale, archived),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                    warn!("Stale file {:?} disappeared before archiving", stale);
                }
                Err(e) => return Err(SyncError::io(stale, e)),
            }
        }
    }

    tokio::fs::rename(temp, target)
        .await
        .map_err(|e| SyncError::io(target, e))
}

async fn remove_temp(temp: &Path) {
    match tokio::fs::remove_file(temp).await {
        Ok(()) => debug!("Removed partial download {:?}", temp),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!("Failed to remove partial download {:?}: {}", temp, e),
    }
}
