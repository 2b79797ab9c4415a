//! In-memory [`RepoStore`] with the same conflict rules as the hosted one.
//!
//! Version tokens are content hashes, so writing identical content twice
//! yields the same file token but a new commit. Every call is recorded in an
//! operation log that tests use to check ordering.

use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::Mutex;
use sha2::{Digest, Sha256};

use super::{CreateOutcome, PagesOutcome, PutReceipt, RemoteFile, RepoStore};
use crate::error::{ForgeError, Result};

/// A recorded store call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreOp {
    Create {
        repo: String,
    },
    Get {
        repo: String,
        path: String,
    },
    Put {
        repo: String,
        path: String,
        version_token: Option<String>,
        message: String,
    },
    EnablePages {
        repo: String,
    },
    PagesUrl {
        repo: String,
    },
}

#[derive(Debug, Default)]
struct Repo {
    files: HashMap<String, RemoteFile>,
    pages_enabled: bool,
    head: Option<String>,
}

#[derive(Default)]
struct Inner {
    repos: HashMap<String, Repo>,
    ops: Vec<StoreOp>,
    failing_paths: Vec<String>,
}

pub struct MemoryRepoStore {
    owner: String,
    inner: Mutex<Inner>,
}

impl MemoryRepoStore {
    pub fn new(owner: &str) -> Self {
        Self {
            owner: owner.to_string(),
            inner: Mutex::new(Inner::default()),
        }
    }

    /// Make every write to `path` fail with a publish error.
    pub fn fail_writes_to(&self, path: &str) {
        self.inner.lock().failing_paths.push(path.to_string());
    }

    /// All calls so far, in order.
    pub fn ops(&self) -> Vec<StoreOp> {
        self.inner.lock().ops.clone()
    }

    /// Latest commit of a repository.
    pub fn head(&self, repo: &str) -> Option<String> {
        self.inner.lock().repos.get(repo).and_then(|r| r.head.clone())
    }

    pub fn file(&self, repo: &str, path: &str) -> Option<RemoteFile> {
        self.inner
            .lock()
            .repos
            .get(repo)
            .and_then(|r| r.files.get(path).cloned())
    }

    fn pages_address(&self, repo: &str) -> String {
        format!("https://{}.github.io/{repo}/", self.owner.to_lowercase())
    }
}

fn short_hash(parts: &[&[u8]]) -> String {
    let mut hasher = Sha256::new();
    for part in parts {
        hasher.update(part);
    }
    hex::encode(hasher.finalize())[..40].to_string()
}

fn content_token(content: &str) -> String {
    let header = format!("blob {}\0", content.len());
    short_hash(&[header.as_bytes(), content.as_bytes()])
}

#[async_trait]
impl RepoStore for MemoryRepoStore {
    async fn create_repository(&self, name: &str) -> Result<CreateOutcome> {
        let mut inner = self.inner.lock();
        inner.ops.push(StoreOp::Create {
            repo: name.to_string(),
        });
        if inner.repos.contains_key(name) {
            return Ok(CreateOutcome::AlreadyExists);
        }
        inner.repos.insert(name.to_string(), Repo::default());
        Ok(CreateOutcome::Created {
            url: self.repository_url(name),
        })
    }

    async fn get_file(&self, repo: &str, path: &str) -> Result<Option<RemoteFile>> {
        let mut inner = self.inner.lock();
        inner.ops.push(StoreOp::Get {
            repo: repo.to_string(),
            path: path.to_string(),
        });
        Ok(inner
            .repos
            .get(repo)
            .and_then(|r| r.files.get(path).cloned()))
    }

    async fn put_file(
        &self,
        repo: &str,
        path: &str,
        content: &str,
        version_token: Option<&str>,
        message: &str,
    ) -> Result<PutReceipt> {
        let mut inner = self.inner.lock();
        inner.ops.push(StoreOp::Put {
            repo: repo.to_string(),
            path: path.to_string(),
            version_token: version_token.map(str::to_string),
            message: message.to_string(),
        });
        if inner.failing_paths.iter().any(|p| p == path) {
            return Err(ForgeError::Publish(format!("write to {path} rejected")));
        }

        let conflict = |detail: &str| ForgeError::Conflict {
            repo: repo.to_string(),
            path: path.to_string(),
            detail: detail.to_string(),
        };
        let state = inner
            .repos
            .get_mut(repo)
            .ok_or_else(|| ForgeError::Publish(format!("repository {repo} does not exist")))?;

        match (state.files.get(path), version_token) {
            (Some(_), None) => return Err(conflict("file exists and no version token was given")),
            (Some(existing), Some(token)) if existing.version_token != token => {
                return Err(conflict("version token does not match"));
            }
            (None, Some(_)) => return Err(conflict("version token given for a missing file")),
            _ => {}
        }

        let token = content_token(content);
        let parent = state.head.clone().unwrap_or_default();
        let commit_sha = short_hash(&[
            parent.as_bytes(),
            path.as_bytes(),
            token.as_bytes(),
            message.as_bytes(),
        ]);
        state.files.insert(
            path.to_string(),
            RemoteFile {
                content: content.to_string(),
                version_token: token.clone(),
            },
        );
        state.head = Some(commit_sha.clone());

        Ok(PutReceipt {
            version_token: token,
            commit_sha,
        })
    }

    async fn enable_pages(&self, repo: &str) -> Result<PagesOutcome> {
        let mut inner = self.inner.lock();
        inner.ops.push(StoreOp::EnablePages {
            repo: repo.to_string(),
        });
        let state = inner
            .repos
            .get_mut(repo)
            .ok_or_else(|| ForgeError::Publish(format!("repository {repo} does not exist")))?;
        if state.pages_enabled {
            return Ok(PagesOutcome::AlreadyEnabled);
        }
        state.pages_enabled = true;
        Ok(PagesOutcome::Enabled {
            url: self.pages_address(repo),
        })
    }

    async fn pages_url(&self, repo: &str) -> Result<Option<String>> {
        let mut inner = self.inner.lock();
        inner.ops.push(StoreOp::PagesUrl {
            repo: repo.to_string(),
        });
        let enabled = inner.repos.get(repo).is_some_and(|r| r.pages_enabled);
        Ok(enabled.then(|| self.pages_address(repo)))
    }

    fn repository_url(&self, repo: &str) -> String {
        format!("https://github.com/{}/{repo}", self.owner)
    }
}
