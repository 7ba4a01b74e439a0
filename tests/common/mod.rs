#![allow(dead_code)]

use std::{
    collections::{HashMap, HashSet},
    sync::{
        Arc, Mutex,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use bytes::Bytes;
use forge_pages::{
    application::{
        provider::{AccountKind, Branch, ContentProvider, FileStream, ProviderError},
        service::{PagesOptions, PagesService},
    },
    cache::{AliasRegistry, CacheConfig},
};
use futures::StreamExt;

pub const BASE_DOMAIN: &str = "pages.example.org";
pub const BRANCH: &str = "gh-pages";

#[derive(Default)]
struct Repository {
    branches: Vec<Branch>,
    topics: Vec<String>,
    branch_failure: Option<u16>,
}

#[derive(Default)]
struct State {
    accounts: HashMap<String, (AccountKind, Vec<String>)>,
    repositories: HashMap<(String, String), Repository>,
    files: HashMap<(String, String, String, String), Bytes>,
    delay: Option<Duration>,
    undeclared_length: bool,
    failing_paths: HashSet<String>,
}

/// In-memory hosting API that counts every upstream call.
#[derive(Default)]
pub struct FakeProvider {
    state: Mutex<State>,
    branch_calls: AtomicUsize,
    topic_calls: AtomicUsize,
    repository_calls: AtomicUsize,
    file_calls: Mutex<HashMap<String, usize>>,
}

impl FakeProvider {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn add_account(&self, owner: &str, kind: AccountKind, repos: &[&str]) {
        self.state.lock().expect("state").accounts.insert(
            owner.to_string(),
            (kind, repos.iter().map(|repo| repo.to_string()).collect()),
        );
    }

    /// Point `branch` at `commit` and store `files` at that commit.
    pub fn publish(&self, owner: &str, repo: &str, commit: &str, files: &[(&str, &[u8])]) {
        let mut state = self.state.lock().expect("state");
        let repository = state
            .repositories
            .entry((owner.to_string(), repo.to_string()))
            .or_default();
        repository.branches = vec![Branch {
            name: BRANCH.to_string(),
            commit_id: commit.to_string(),
            commit_date: None,
        }];
        for (path, body) in files {
            state.files.insert(
                (
                    owner.to_string(),
                    repo.to_string(),
                    commit.to_string(),
                    path.to_string(),
                ),
                Bytes::copy_from_slice(body),
            );
        }
    }

    pub fn set_topics(&self, owner: &str, repo: &str, topics: &[&str]) {
        let mut state = self.state.lock().expect("state");
        let repository = state
            .repositories
            .entry((owner.to_string(), repo.to_string()))
            .or_default();
        repository.topics = topics.iter().map(|topic| topic.to_string()).collect();
    }

    pub fn fail_branches(&self, owner: &str, repo: &str, status: u16) {
        let mut state = self.state.lock().expect("state");
        state
            .repositories
            .entry((owner.to_string(), repo.to_string()))
            .or_default()
            .branch_failure = Some(status);
    }

    pub fn fail_path(&self, path: &str) {
        self.state
            .lock()
            .expect("state")
            .failing_paths
            .insert(path.to_string());
    }

    pub fn set_delay(&self, delay: Duration) {
        self.state.lock().expect("state").delay = Some(delay);
    }

    /// Serve bodies in small chunks without a declared length.
    pub fn set_undeclared_length(&self, undeclared: bool) {
        self.state.lock().expect("state").undeclared_length = undeclared;
    }

    pub fn branch_calls(&self) -> usize {
        self.branch_calls.load(Ordering::SeqCst)
    }

    pub fn topic_calls(&self) -> usize {
        self.topic_calls.load(Ordering::SeqCst)
    }

    pub fn repository_calls(&self) -> usize {
        self.repository_calls.load(Ordering::SeqCst)
    }

    pub fn file_calls(&self, path: &str) -> usize {
        self.file_calls
            .lock()
            .expect("calls")
            .get(path)
            .copied()
            .unwrap_or_default()
    }

    async fn pause(&self) {
        let delay = self.state.lock().expect("state").delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
    }
}

#[async_trait]
impl ContentProvider for FakeProvider {
    async fn list_branches(&self, owner: &str, repo: &str) -> Result<Vec<Branch>, ProviderError> {
        self.branch_calls.fetch_add(1, Ordering::SeqCst);
        self.pause().await;
        let state = self.state.lock().expect("state");
        let repository = state
            .repositories
            .get(&(owner.to_string(), repo.to_string()))
            .ok_or(ProviderError::NotFound)?;
        match repository.branch_failure {
            Some(404) => Err(ProviderError::NotFound),
            Some(status) => Err(ProviderError::UnexpectedStatus {
                endpoint: format!("/api/v1/repos/{owner}/{repo}/branches"),
                status,
            }),
            None => Ok(repository.branches.clone()),
        }
    }

    async fn list_topics(&self, owner: &str, repo: &str) -> Result<Vec<String>, ProviderError> {
        self.topic_calls.fetch_add(1, Ordering::SeqCst);
        let state = self.state.lock().expect("state");
        Ok(state
            .repositories
            .get(&(owner.to_string(), repo.to_string()))
            .map(|repository| repository.topics.clone())
            .unwrap_or_default())
    }

    async fn list_repositories(
        &self,
        owner: &str,
        kind: AccountKind,
    ) -> Result<Vec<String>, ProviderError> {
        self.repository_calls.fetch_add(1, Ordering::SeqCst);
        self.pause().await;
        let state = self.state.lock().expect("state");
        match state.accounts.get(owner) {
            Some((account_kind, repos)) if *account_kind == kind => Ok(repos.clone()),
            _ => Err(ProviderError::NotFound),
        }
    }

    async fn open_file(
        &self,
        owner: &str,
        repo: &str,
        reference: &str,
        path: &str,
    ) -> Result<FileStream, ProviderError> {
        *self
            .file_calls
            .lock()
            .expect("calls")
            .entry(path.to_string())
            .or_default() += 1;

        let state = self.state.lock().expect("state");
        if state.failing_paths.contains(path) {
            return Err(ProviderError::UnexpectedStatus {
                endpoint: path.to_string(),
                status: 502,
            });
        }
        let body = state
            .files
            .get(&(
                owner.to_string(),
                repo.to_string(),
                reference.to_string(),
                path.to_string(),
            ))
            .cloned()
            .ok_or(ProviderError::NotFound)?;

        if state.undeclared_length {
            let chunks: Vec<Result<Bytes, ProviderError>> = body
                .chunks(4)
                .map(|chunk| Ok(Bytes::copy_from_slice(chunk)))
                .collect();
            return Ok(FileStream {
                content_length: None,
                content_type: None,
                body: futures::stream::iter(chunks).boxed(),
            });
        }
        Ok(FileStream::from_bytes(body, None))
    }
}

pub fn options() -> PagesOptions {
    PagesOptions {
        cache: CacheConfig {
            max_file_size: 64,
            ..CacheConfig::default()
        },
        ..PagesOptions::new(BASE_DOMAIN)
    }
}

pub fn service(provider: Arc<FakeProvider>, options: PagesOptions) -> PagesService {
    PagesService::new(options, provider, Arc::new(AliasRegistry::in_memory()))
}

/// `alice` owns her default site plus `docs`.
pub fn sample_provider() -> Arc<FakeProvider> {
    let provider = FakeProvider::new();
    provider.add_account(
        "alice",
        AccountKind::User,
        &["alice.pages.example.org", "docs"],
    );
    provider.publish(
        "alice",
        "alice.pages.example.org",
        "c1",
        &[
            ("/index.html", b"<h1>alice</h1>"),
            ("/style.css", b"body{}"),
        ],
    );
    provider.publish(
        "alice",
        "docs",
        "d1",
        &[("/index.html", b"<h1>docs</h1>"), ("/app.js", b"run()")],
    );
    provider
}
