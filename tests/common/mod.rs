//! Common test utilities and helpers for resources-updater tests
#![allow(dead_code)]

use resources_updater::config::{ModrinthConfig, ResourceGroup};
use resources_updater::hash::{digest_reader, HashAlgorithm};
use resources_updater::remote::build_http_client;
use resources_updater::{ModrinthHandler, SyncContext};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tempfile::TempDir;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Temporary working root with helpers for resource files
pub struct TestEnvironment {
    pub temp_dir: TempDir,
    pub root: PathBuf,
}

impl TestEnvironment {
    pub fn new() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let root = temp_dir.path().join("server");
        std::fs::create_dir_all(&root).expect("Failed to create working root");
        let root = root.canonicalize().expect("Failed to canonicalize root");
        Self { temp_dir, root }
    }

    pub fn write(&self, relative: &str, content: &[u8]) -> PathBuf {
        let path = self.root.join(relative);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).expect("Failed to create parent dir");
        }
        std::fs::write(&path, content).expect("Failed to write test file");
        path
    }

    pub fn read(&self, relative: &str) -> Vec<u8> {
        std::fs::read(self.root.join(relative)).expect("Failed to read test file")
    }

    pub fn exists(&self, relative: &str) -> bool {
        self.root.join(relative).exists()
    }

    pub fn context(&self) -> SyncContext {
        SyncContext {
            working_root: self.root.clone(),
            timeout: Duration::from_secs(5),
            dry_run: false,
        }
    }

    /// Every file below the root with its content, keyed by relative path
    pub fn snapshot(&self) -> BTreeMap<PathBuf, Vec<u8>> {
        let mut files = BTreeMap::new();
        collect_files(&self.root, &self.root, &mut files);
        files
    }
}

fn collect_files(root: &Path, dir: &Path, files: &mut BTreeMap<PathBuf, Vec<u8>>) {
    for entry in std::fs::read_dir(dir).expect("Failed to read dir") {
        let path = entry.expect("Failed to read entry").path();
        if path.is_dir() {
            collect_files(root, &path, files);
        } else {
            let relative = path.strip_prefix(root).unwrap().to_path_buf();
            files.insert(relative, std::fs::read(&path).unwrap());
        }
    }
}

pub fn sha1(content: &[u8]) -> String {
    digest_reader(content, HashAlgorithm::Sha1).expect("Failed to hash")
}

/// A Modrinth handler pointed at the mock server
pub fn modrinth_handler(server: &MockServer, groups: Vec<ResourceGroup>) -> ModrinthHandler {
    let config = ModrinthConfig {
        api_url: server.uri(),
        resources: groups,
        ..Default::default()
    };
    ModrinthHandler::new(config, build_http_client(Duration::from_secs(5)).unwrap())
}

/// Lookup response entry for one canonical file
pub fn version_entry(server: &MockServer, file_name: &str, content: &[u8]) -> Value {
    json!({
        "files": [{
            "url": format!("{}/cdn/{}", server.uri(), file_name),
            "filename": file_name,
            "size": content.len(),
            "primary": true,
            "hashes": {"sha1": sha1(content), "sha512": "unused"}
        }]
    })
}

/// Serve a canonical file under `/cdn/<file_name>`
pub async fn serve_file(server: &MockServer, file_name: &str, content: &[u8]) {
    Mock::given(method("GET"))
        .and(path(format!("/cdn/{}", file_name)))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(content.to_vec()))
        .mount(server)
        .await;
}

/// Answer every lookup with `body`
pub async fn serve_lookup(server: &MockServer, body: Value) {
    Mock::given(method("POST"))
        .and(path("/version_files/update"))
        .respond_with(ResponseTemplate::new(200).set_body_json(body))
        .mount(server)
        .await;
}
