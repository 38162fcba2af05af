//! Sync Engine - synchronizes one resource group
//!
//! A group runs to completion through
//! `Scanning -> Hashing -> Querying -> Diffing -> Downloading -> Archiving -> Done`
//! without persisting intermediate state. Scanning with no candidates or a
//! lookup with no stale digests ends the run early as a no-op.

use crate::config::{Config, ResourceGroup};
use crate::download::{DownloadReport, Downloader};
use crate::error::SyncError;
use crate::filter::FileFilter;
use crate::hash::{self, HashAlgorithm};
use crate::paths;
use crate::remote::{CanonicalFile, LookupSelectors, RemoteIndexClient, UpdateDescriptor};
use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Run-wide settings shared by every handler
#[derive(Debug, Clone)]
pub struct SyncContext {
    /// Root every resource directory must live under
    pub working_root: PathBuf,
    /// Longest wait for a lookup response or for the next download chunk
    pub timeout: Duration,
    /// Compute change-sets without downloading
    pub dry_run: bool,
}

impl SyncContext {
    pub fn from_config(config: &Config, dry_run: bool) -> Self {
        Self {
            working_root: config.working_root(),
            timeout: config.timeout_duration(),
            dry_run,
        }
    }
}

/// Phases of a group run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncPhase {
    Scanning,
    Hashing,
    Querying,
    Diffing,
    Downloading,
    Archiving,
    Done,
}

impl fmt::Display for SyncPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SyncPhase::Scanning => "scanning",
            SyncPhase::Hashing => "hashing",
            SyncPhase::Querying => "querying",
            SyncPhase::Diffing => "diffing",
            SyncPhase::Downloading => "downloading",
            SyncPhase::Archiving => "archiving",
            SyncPhase::Done => "done",
        };
        f.write_str(name)
    }
}

/// Change-set computed for one group
#[derive(Debug, Clone, PartialEq)]
pub struct SyncPlan {
    pub directory: PathBuf,
    pub archive_dir: PathBuf,
    pub candidates: usize,
    pub changes: Vec<UpdateDescriptor>,
}

/// How a group run ended
#[derive(Debug, Clone, PartialEq)]
pub enum GroupOutcome {
    /// Nothing to update
    UpToDate,
    /// Dry run: the change-set that would have been applied
    Planned(Vec<UpdateDescriptor>),
    /// Change-set applied (possibly partially)
    Updated(DownloadReport),
    /// The group was aborted
    Failed(String),
}

/// Result of a group run
#[derive(Debug, Clone, PartialEq)]
pub struct GroupReport {
    pub directory: String,
    pub outcome: GroupOutcome,
}

/// Orchestrates filter, hasher, remote index and downloader for one handler
pub struct SyncEngine<'a> {
    identifier: &'a str,
    context: &'a SyncContext,
    client: &'a dyn RemoteIndexClient,
    downloader: &'a Downloader,
    algorithm: HashAlgorithm,
}

impl<'a> SyncEngine<'a> {
    pub fn new(
        identifier: &'a str,
        context: &'a SyncContext,
        client: &'a dyn RemoteIndexClient,
        downloader: &'a Downloader,
        algorithm: HashAlgorithm,
    ) -> Self {
        Self {
            identifier,
            context,
            client,
            downloader,
            algorithm,
        }
    }

    /// Synchronize one group; failures end up in the report, never in the caller
    pub async fn run(&self, group: &ResourceGroup, selectors: &LookupSelectors) -> GroupReport {
        let outcome = match self.plan(group, selectors).await {
            Err(e) if e.is_scope_error() => {
                error!("{}", e);
                GroupOutcome::Failed(e.to_string())
            }
            Err(e) => {
                error!(
                    "Something went wrong when handling {} for {}: {}",
                    self.identifier, group.directory, e
                );
                GroupOutcome::Failed(e.to_string())
            }
            Ok(plan) if plan.changes.is_empty() => {
                info!("Resources in {:?} are up to date", plan.directory);
                GroupOutcome::UpToDate
            }
            Ok(plan) if self.context.dry_run => {
                info!(
                    "Dry run: {} resources in {:?} would be updated",
                    plan.changes.len(),
                    plan.directory
                );
                GroupOutcome::Planned(plan.changes)
            }
            Ok(plan) => {
                self.enter(SyncPhase::Downloading, &group.directory);
                let report = self
                    .downloader
                    .apply(
                        &plan.directory,
                        &plan.archive_dir,
                        &plan.changes,
                        self.context.timeout,
                    )
                    .await;
                info!(
                    "Updating resources in {:?} from {} is completed: {} updated, {} failed",
                    plan.directory,
                    self.client.provider_name(),
                    report.updated.len(),
                    report.failed
                );
                GroupOutcome::Updated(report)
            }
        };

        self.enter(SyncPhase::Done, &group.directory);
        GroupReport {
            directory: group.directory.clone(),
            outcome,
        }
    }

    /// Compute the change-set of a group without touching any file
    pub async fn plan(
        &self,
        group: &ResourceGroup,
        selectors: &LookupSelectors,
    ) -> Result<SyncPlan, SyncError> {
        self.enter(SyncPhase::Scanning, &group.directory);
        let root = &self.context.working_root;
        let directory = paths::resolve(root, Path::new(&group.directory))?;
        let archive_dir = paths::contain(root, Path::new(group.archive_dir.as_deref().unwrap_or("")))?;

        let filter = FileFilter::new(&group.filter_rule())?;
        let candidates: Vec<PathBuf> = filter.candidates(&directory)?.collect();

        let mut plan = SyncPlan {
            directory,
            archive_dir,
            candidates: candidates.len(),
            changes: Vec::new(),
        };

        if candidates.is_empty() {
            info!("No candidate resources in {:?}", plan.directory);
            return Ok(plan);
        }

        self.enter(SyncPhase::Hashing, &group.directory);
        let local = hash_candidates(&plan.directory, candidates, self.algorithm).await?;

        self.enter(SyncPhase::Querying, &group.directory);
        let digests: Vec<String> = local.keys().cloned().collect();
        let remote = tokio::time::timeout(
            self.context.timeout,
            self.client.lookup_updates(&digests, selectors),
        )
        .await
        .map_err(|_| SyncError::Timeout {
            target: self.client.provider_name().to_string(),
            after: self.context.timeout,
        })??;
        if remote.is_empty() {
            return Ok(plan);
        }

        self.enter(SyncPhase::Diffing, &group.directory);
        plan.changes = diff(&local, remote);
        Ok(plan)
    }

    fn enter(&self, phase: SyncPhase, directory: &str) {
        debug!("[{}] {}: {}", self.identifier, directory, phase);
    }
}

/// Digest every candidate on the blocking pool, grouping identical files
async fn hash_candidates(
    directory: &Path,
    candidates: Vec<PathBuf>,
    algorithm: HashAlgorithm,
) -> Result<HashMap<String, Vec<PathBuf>>, SyncError> {
    tokio::task::spawn_blocking(move || {
        let mut local: HashMap<String, Vec<PathBuf>> = HashMap::new();
        for path in candidates {
            match hash::digest_file(&path, algorithm) {
                Ok(digest) => local.entry(digest).or_default().push(path),
                Err(e) => warn!("Skipping unreadable resource: {}", e),
            }
        }
        local
    })
    .await
    .map_err(|e| SyncError::io(directory, std::io::Error::new(std::io::ErrorKind::Other, e)))
}

/// Turn lookup results into a change-set.
///
/// A canonical file whose digest equals the local one is already in place.
/// Remote names that are not a single plain file name are refused.
pub fn diff(
    local: &HashMap<String, Vec<PathBuf>>,
    remote: HashMap<String, CanonicalFile>,
) -> Vec<UpdateDescriptor> {
    let mut changes = Vec::new();

    for (digest, canonical) in remote {
        let Some(stale_paths) = local.get(&digest) else {
            debug!("Ignoring unrequested digest {}", digest);
            continue;
        };

        let unchanged = canonical
            .digest
            .as_deref()
            .is_some_and(|remote_digest| remote_digest.eq_ignore_ascii_case(&digest));
        if unchanged {
            debug!("{} is already the canonical file", canonical.file_name);
            continue;
        }

        if !is_plain_file_name(&canonical.file_name) {
            warn!(
                "Refusing remote file name {:?} from {}",
                canonical.file_name, canonical.url
            );
            continue;
        }

        for stale_path in stale_paths {
            changes.push(UpdateDescriptor {
                source_url: canonical.url.clone(),
                file_name: canonical.file_name.clone(),
                expected_size: canonical.size,
                stale_path: stale_path.clone(),
            });
        }
    }

    changes.sort_by(|a, b| a.stale_path.cmp(&b.stale_path));
    changes
}

fn is_plain_file_name(name: &str) -> bool {
    !name.is_empty() && name != "." && name != ".." && !name.contains(['/', '\\', '\0'])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::{build_http_client, MockRemoteIndexClient};
    use assert_matches::assert_matches;
    use tempfile::TempDir;

    struct Fixture {
        _temp_dir: TempDir,
        context: SyncContext,
        downloader: Downloader,
    }

    impl Fixture {
        fn new() -> Self {
            let temp_dir = TempDir::new().expect("Failed to create temp dir");
            let root = temp_dir.path().join("server");
            std::fs::create_dir_all(root.join("mods")).unwrap();
            let root = root.canonicalize().unwrap();
            Self {
                _temp_dir: temp_dir,
                context: SyncContext {
                    working_root: root,
                    timeout: Duration::from_secs(5),
                    dry_run: false,
                },
                downloader: Downloader::new(build_http_client(Duration::from_secs(5)).unwrap()),
            }
        }

        fn mods(&self) -> PathBuf {
            self.context.working_root.join("mods")
        }

        fn engine<'a>(&'a self, client: &'a MockRemoteIndexClient) -> SyncEngine<'a> {
            SyncEngine::new("modrinth", &self.context, client, &self.downloader, HashAlgorithm::Sha1)
        }
    }

    fn mock_client() -> MockRemoteIndexClient {
        let mut client = MockRemoteIndexClient::new();
        client.expect_provider_name().return_const("mock");
        client
    }

    fn selectors() -> LookupSelectors {
        LookupSelectors {
            loaders: vec!["fabric".to_string()],
            game_versions: None,
        }
    }

    fn canonical(url: &str, name: &str, size: Option<u64>, digest: &str) -> CanonicalFile {
        CanonicalFile {
            url: url.to_string(),
            file_name: name.to_string(),
            size,
            digest: Some(digest.to_string()),
        }
    }

    fn lookup_failure() -> SyncError {
        let source = reqwest::Client::new()
            .get("not a url")
            .build()
            .expect_err("invalid url must fail");
        SyncError::RemoteLookup {
            provider: "mock",
            source,
        }
    }

    #[tokio::test]
    async fn test_plan_stale_file() {
        let fixture = Fixture::new();
        let old = fixture.mods().join("old.jar");
        std::fs::write(&old, b"old mod").unwrap();
        let local_digest = hash::digest_file(&old, HashAlgorithm::Sha1).unwrap();

        let mut client = mock_client();
        let expected_digest = local_digest.clone();
        client
            .expect_lookup_updates()
            .withf(move |digests, selectors| {
                digests.len() == 1
                    && digests[0] == expected_digest
                    && selectors.loaders == ["fabric"]
            })
            .times(1)
            .returning(move |digests, _| {
                Ok(HashMap::from([(
                    digests[0].clone(),
                    canonical("http://x/new.jar", "new.jar", Some(2048), "bbb"),
                )]))
            });

        let plan = fixture
            .engine(&client)
            .plan(&ResourceGroup::new("mods"), &selectors())
            .await
            .unwrap();

        assert_eq!(plan.candidates, 1);
        assert_eq!(plan.archive_dir, fixture.context.working_root);
        assert_eq!(
            plan.changes,
            vec![UpdateDescriptor {
                source_url: "http://x/new.jar".to_string(),
                file_name: "new.jar".to_string(),
                expected_size: Some(2048),
                stale_path: old,
            }]
        );
    }

    #[tokio::test]
    async fn test_matching_digest_is_never_planned() {
        let fixture = Fixture::new();
        std::fs::write(fixture.mods().join("current.jar"), b"current mod").unwrap();

        let mut client = mock_client();
        client.expect_lookup_updates().times(1).returning(|digests, _| {
            Ok(HashMap::from([(
                digests[0].clone(),
                canonical("http://x/current.jar", "current.jar", None, &digests[0].to_uppercase()),
            )]))
        });

        let report = fixture
            .engine(&client)
            .run(&ResourceGroup::new("mods"), &selectors())
            .await;

        assert_eq!(report.outcome, GroupOutcome::UpToDate);
    }

    #[tokio::test]
    async fn test_no_candidates_skips_lookup() {
        let fixture = Fixture::new();
        std::fs::write(fixture.mods().join("notes.txt"), b"not a mod").unwrap();

        let mut client = mock_client();
        client.expect_lookup_updates().times(0);

        let plan = fixture
            .engine(&client)
            .plan(&ResourceGroup::new("mods"), &selectors())
            .await
            .unwrap();

        assert_eq!(plan.candidates, 0);
        assert!(plan.changes.is_empty());
    }

    #[tokio::test]
    async fn test_insecure_directory_fails_before_lookup() {
        let fixture = Fixture::new();
        let mut client = mock_client();
        client.expect_lookup_updates().times(0);

        let engine = fixture.engine(&client);
        let result = engine
            .plan(&ResourceGroup::new("../outside"), &selectors())
            .await;
        assert_matches!(result, Err(SyncError::InsecurePath { .. }));

        let report = engine.run(&ResourceGroup::new("plugins"), &selectors()).await;
        assert_matches!(report.outcome, GroupOutcome::Failed(_));
    }

    #[tokio::test]
    async fn test_insecure_archive_dir_is_rejected() {
        let fixture = Fixture::new();
        let mut client = mock_client();
        client.expect_lookup_updates().times(0);

        let mut group = ResourceGroup::new("mods");
        group.archive_dir = Some("../archive".to_string());

        let result = fixture.engine(&client).plan(&group, &selectors()).await;
        assert_matches!(result, Err(SyncError::InsecurePath { .. }));
    }

    #[tokio::test]
    async fn test_lookup_failure_is_contained() {
        let fixture = Fixture::new();
        let old = fixture.mods().join("old.jar");
        std::fs::write(&old, b"old mod").unwrap();

        let mut client = mock_client();
        client
            .expect_lookup_updates()
            .times(1)
            .returning(|_, _| Err(lookup_failure()));

        let report = fixture
            .engine(&client)
            .run(&ResourceGroup::new("mods"), &selectors())
            .await;

        assert_matches!(report.outcome, GroupOutcome::Failed(message) if message.contains("mock"));
        assert!(old.exists());
    }

    #[tokio::test]
    async fn test_dry_run_plans_without_downloading() {
        let mut fixture = Fixture::new();
        fixture.context.dry_run = true;
        let old = fixture.mods().join("old.jar");
        std::fs::write(&old, b"old mod").unwrap();

        let mut client = mock_client();
        client.expect_lookup_updates().returning(|digests, _| {
            Ok(HashMap::from([(
                digests[0].clone(),
                canonical("http://127.0.0.1:9/new.jar", "new.jar", Some(1), "bbb"),
            )]))
        });

        let report = fixture
            .engine(&client)
            .run(&ResourceGroup::new("mods"), &selectors())
            .await;

        assert_matches!(report.outcome, GroupOutcome::Planned(changes) if changes.len() == 1);
        assert!(old.exists());
        assert!(!fixture.mods().join("new.jar").exists());
    }

    #[test]
    fn test_diff_emits_one_entry_per_identical_file() {
        let local = HashMap::from([(
            "aaa".to_string(),
            vec![PathBuf::from("/srv/mods/b.jar"), PathBuf::from("/srv/mods/a.jar")],
        )]);
        let remote = HashMap::from([(
            "aaa".to_string(),
            canonical("http://x/new.jar", "new.jar", Some(10), "bbb"),
        )]);

        let changes = diff(&local, remote);
        let stale: Vec<_> = changes.iter().map(|c| c.stale_path.clone()).collect();
        assert_eq!(
            stale,
            vec![PathBuf::from("/srv/mods/a.jar"), PathBuf::from("/srv/mods/b.jar")]
        );
    }

    #[test]
    fn test_diff_refuses_unsafe_names_and_unknown_digests() {
        let local = HashMap::from([
            ("aaa".to_string(), vec![PathBuf::from("/srv/mods/a.jar")]),
            ("ccc".to_string(), vec![PathBuf::from("/srv/mods/c.jar")]),
        ]);
        let remote = HashMap::from([
            ("aaa".to_string(), canonical("http://x/evil", "../../evil.jar", None, "bbb")),
            ("zzz".to_string(), canonical("http://x/z.jar", "z.jar", None, "yyy")),
            ("ccc".to_string(), canonical("http://x/c2.jar", "c2.jar", None, "ddd")),
        ]);

        let changes = diff(&local, remote);
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].file_name, "c2.jar");
    }

    #[test]
    fn test_diff_without_remote_digest_is_stale() {
        let local = HashMap::from([("aaa".to_string(), vec![PathBuf::from("/srv/mods/a.jar")])]);
        let mut file = canonical("http://x/a2.jar", "a2.jar", None, "");
        file.digest = None;

        let changes = diff(&local, HashMap::from([("aaa".to_string(), file)]));
        assert_eq!(changes.len(), 1);
    }

    #[test]
    fn test_plain_file_names() {
        assert!(is_plain_file_name("new.jar"));
        assert!(!is_plain_file_name(""));
        assert!(!is_plain_file_name(".."));
        assert!(!is_plain_file_name("mods/new.jar"));
        assert!(!is_plain_file_name("..\\new.jar"));
    }
}
