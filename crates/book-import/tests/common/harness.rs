//! Test harness for isolated import runs.
//!
//! Each `TestHarness` owns a temp directory holding the object store root,
//! an in-memory database and an `ImportJobManager` wired to both.

#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tempfile::TempDir;

use book_import::{
    load_config_from_str, BookContent, Database, FsObjectStore, ImportConfig, ImportJob,
    ImportJobManager, ImportRequest, ImportType,
};

pub const PUBLIC_BASE_URL: &str = "https://cdn.test/assets";

pub struct TestHarness {
    pub temp_dir: TempDir,
    pub config: ImportConfig,
    pub db: Database,
    pub manager: ImportJobManager,
}

impl TestHarness {
    pub fn new() -> Self {
        Self::with_config(|_| {})
    }

    /// Builds a harness after letting `adjust` tweak the default config.
    pub fn with_config(adjust: impl FnOnce(&mut ImportConfig)) -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let root = temp_dir.path().join("assets");

        let json = serde_json::json!({
            "version": "1.0",
            "max_concurrent_jobs": 2,
            "infra_retry_attempts": 2,
            "object_store": {
                "root": root.to_string_lossy(),
                "public_base_url": PUBLIC_BASE_URL,
            },
            "assets": { "backoff_base_ms": 1, "upload_timeout_secs": 5 },
            "google_docs": { "max_attempts": 2, "retry_backoff_ms": 1 }
        });
        let mut config = load_config_from_str(&json.to_string()).expect("valid test config");
        adjust(&mut config);

        let db = Database::open_in_memory().expect("Failed to create test database");
        let store = Arc::new(FsObjectStore::new(
            &config.object_store.root,
            config.object_store.public_base_url.clone(),
        ));
        let manager = ImportJobManager::new(&config, db.clone(), store).expect("manager");

        Self {
            temp_dir,
            config,
            db,
            manager,
        }
    }

    pub fn store_root(&self) -> PathBuf {
        PathBuf::from(&self.config.object_store.root)
    }

    /// Submits `request` and waits for the job to reach a terminal state.
    pub async fn run(&self, request: ImportRequest) -> ImportJob {
        let job_id = self.manager.submit(request).await.expect("submit");
        let job = self
            .manager
            .wait_for(&job_id, Duration::from_millis(10), Duration::from_secs(10))
            .await
            .expect("job exists");
        assert!(job.is_terminal(), "job {} did not finish: {:?}", job_id, job);
        job
    }

    pub async fn import_epub(&self, bytes: Vec<u8>) -> ImportJob {
        self.run(ImportRequest::file(
            "author-1",
            ImportType::Epub,
            "manuscript.epub",
            bytes,
        ))
        .await
    }

    pub async fn import_docx(&self, bytes: Vec<u8>) -> ImportJob {
        self.run(ImportRequest::file(
            "author-1",
            ImportType::Word,
            "manuscript.docx",
            bytes,
        ))
        .await
    }

    pub fn content_of(&self, job: &ImportJob) -> BookContent {
        let book_id = job.result_book_id.as_deref().expect("completed job has a book");
        self.manager
            .books()
            .find_content(book_id)
            .expect("read content")
            .expect("content stored")
    }

    /// Every object written to the store, as paths relative to its root.
    pub fn stored_objects(&self) -> Vec<String> {
        let root = self.store_root();
        let mut found = Vec::new();
        collect_files(&root, &root, &mut found);
        found.sort();
        found
    }
}

fn collect_files(root: &Path, dir: &Path, found: &mut Vec<String>) {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return;
    };
    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_dir() {
            collect_files(root, &path, found);
        } else if let Ok(rel) = path.strip_prefix(root) {
            found.push(rel.to_string_lossy().replace('\\', "/"));
        }
    }
}
