//! Repository publication: create the repository, read and write files under
//! optimistic concurrency, and turn on static hosting.
//!
//! [`RepoStore`] is the raw remote store. It reports the idempotent cases as
//! outcomes rather than errors; [`RepositoryPublisher`] folds those into
//! success and adds the batch semantics the pipeline relies on.

pub mod github;
pub mod memory;

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::{ForgeError, Result};

pub use github::GitHubStore;
pub use memory::MemoryRepoStore;

/// Result of a create-repository call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CreateOutcome {
    Created { url: String },
    AlreadyExists,
}

/// Result of an enable-hosting call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PagesOutcome {
    Enabled { url: String },
    AlreadyEnabled,
}

/// A file as read from the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteFile {
    pub content: String,
    pub version_token: String,
}

/// What a successful write reports back.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PutReceipt {
    /// Token to present on the next update of the same file.
    pub version_token: String,
    /// Commit the write produced.
    pub commit_sha: String,
}

/// One file in a publish batch. `version_token` is `None` for first creation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileWrite {
    pub path: String,
    pub content: String,
    pub version_token: Option<String>,
}

impl FileWrite {
    pub fn create(path: &str, content: String) -> Self {
        Self {
            path: path.to_string(),
            content,
            version_token: None,
        }
    }

    pub fn update(path: &str, content: String, version_token: String) -> Self {
        Self {
            path: path.to_string(),
            content,
            version_token: Some(version_token),
        }
    }
}

/// The remote file store behind the publisher.
///
/// `put_file` must refuse to overwrite an existing file when no token is
/// given, and must refuse a stale token, with [`ForgeError::Conflict`].
#[async_trait]
pub trait RepoStore: Send + Sync {
    async fn create_repository(&self, name: &str) -> Result<CreateOutcome>;

    /// `Ok(None)` when the file does not exist.
    async fn get_file(&self, repo: &str, path: &str) -> Result<Option<RemoteFile>>;

    async fn put_file(
        &self,
        repo: &str,
        path: &str,
        content: &str,
        version_token: Option<&str>,
        message: &str,
    ) -> Result<PutReceipt>;

    async fn enable_pages(&self, repo: &str) -> Result<PagesOutcome>;

    /// `Ok(None)` when hosting is not enabled.
    async fn pages_url(&self, repo: &str) -> Result<Option<String>>;

    /// Public URL of a repository, whether or not it exists yet.
    fn repository_url(&self, repo: &str) -> String;
}

/// Publication operations used by the pipeline.
#[derive(Clone)]
pub struct RepositoryPublisher {
    store: Arc<dyn RepoStore>,
}

impl RepositoryPublisher {
    pub fn new(store: Arc<dyn RepoStore>) -> Self {
        Self { store }
    }

    /// Create a public repository, treating "already exists" as success.
    /// Returns the repository URL either way.
    pub async fn ensure_repository(&self, name: &str) -> Result<String> {
        match self.store.create_repository(name).await? {
            CreateOutcome::Created { url } => {
                tracing::info!(repo = %name, %url, "Repository created");
                Ok(url)
            }
            CreateOutcome::AlreadyExists => {
                let url = self.store.repository_url(name);
                tracing::warn!(repo = %name, %url, "Repository already exists, proceeding");
                Ok(url)
            }
        }
    }

    pub fn repository_url(&self, name: &str) -> String {
        self.store.repository_url(name)
    }

    /// Read a file and its version token; missing files are [`ForgeError::NotFound`].
    pub async fn fetch_file(&self, repo: &str, path: &str) -> Result<RemoteFile> {
        let file = self
            .store
            .get_file(repo, path)
            .await?
            .ok_or_else(|| ForgeError::NotFound {
                repo: repo.to_string(),
                path: path.to_string(),
            })?;
        tracing::info!(%repo, %path, token = %file.version_token, "Fetched file");
        Ok(file)
    }

    /// Create (no token) or update (with token) a single file.
    pub async fn put_file(
        &self,
        repo: &str,
        path: &str,
        content: &str,
        version_token: Option<&str>,
        message: &str,
    ) -> Result<PutReceipt> {
        self.store
            .put_file(repo, path, content, version_token, message)
            .await
    }

    /// Write files one at a time in the given order. The first failure aborts
    /// the batch; files already written stay committed. Returns the receipt
    /// of the last write.
    pub async fn publish_batch(
        &self,
        repo: &str,
        files: &[FileWrite],
        message: &str,
    ) -> Result<PutReceipt> {
        tracing::info!(%repo, count = files.len(), "Publishing files");
        let mut last = None;
        for (i, file) in files.iter().enumerate() {
            let receipt = self
                .put_file(
                    repo,
                    &file.path,
                    &file.content,
                    file.version_token.as_deref(),
                    message,
                )
                .await
                .inspect_err(|e| {
                    tracing::error!(
                        %repo,
                        path = %file.path,
                        committed = i,
                        error = %e,
                        "Batch aborted"
                    );
                })?;
            tracing::info!(%repo, path = %file.path, commit = %receipt.commit_sha, "Pushed file");
            last = Some(receipt);
        }
        last.ok_or_else(|| ForgeError::Publish(format!("nothing to publish to {repo}")))
    }

    /// Turn on static hosting, treating "already enabled" as success.
    pub async fn enable_hosting(&self, repo: &str) -> Result<String> {
        match self.store.enable_pages(repo).await? {
            PagesOutcome::Enabled { url } => {
                tracing::info!(%repo, %url, "Hosting enabled");
                Ok(url)
            }
            PagesOutcome::AlreadyEnabled => {
                let url = self.store.pages_url(repo).await?.ok_or_else(|| {
                    ForgeError::Publish(format!(
                        "hosting reported as enabled for {repo} but no URL is available"
                    ))
                })?;
                tracing::info!(%repo, %url, "Hosting was already enabled");
                Ok(url)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn publisher() -> (RepositoryPublisher, Arc<MemoryRepoStore>) {
        let store = Arc::new(MemoryRepoStore::new("octocat"));
        (RepositoryPublisher::new(store.clone()), store)
    }

    #[tokio::test]
    async fn test_ensure_repository_is_idempotent() {
        let (p, _) = publisher();
        let first = p.ensure_repository("demo-1").await.unwrap();
        let second = p.ensure_repository("demo-1").await.unwrap();
        assert_eq!(first, second);
        assert_eq!(first, "https://github.com/octocat/demo-1");
    }

    #[tokio::test]
    async fn test_enable_hosting_is_idempotent() {
        let (p, _) = publisher();
        p.ensure_repository("demo-1").await.unwrap();
        let first = p.enable_hosting("demo-1").await.unwrap();
        let second = p.enable_hosting("demo-1").await.unwrap();
        assert_eq!(first, second);
        assert_eq!(first, "https://octocat.github.io/demo-1/");
    }

    #[tokio::test]
    async fn test_fetch_missing_is_not_found() {
        let (p, _) = publisher();
        p.ensure_repository("demo-1").await.unwrap();
        assert!(matches!(
            p.fetch_file("demo-1", "index.html").await,
            Err(ForgeError::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_update_requires_current_token() {
        let (p, _) = publisher();
        p.ensure_repository("r").await.unwrap();
        let v1 = p.put_file("r", "a.txt", "one", None, "m").await.unwrap();

        // Blind overwrite of an existing file.
        assert!(matches!(
            p.put_file("r", "a.txt", "two", None, "m").await,
            Err(ForgeError::Conflict { .. })
        ));

        let v2 = p
            .put_file("r", "a.txt", "two", Some(&v1.version_token), "m")
            .await
            .unwrap();
        assert_ne!(v1.version_token, v2.version_token);

        // Stale token.
        assert!(matches!(
            p.put_file("r", "a.txt", "three", Some(&v1.version_token), "m").await,
            Err(ForgeError::Conflict { .. })
        ));
        assert_eq!(p.fetch_file("r", "a.txt").await.unwrap().content, "two");
    }

    #[tokio::test]
    async fn test_batch_returns_last_receipt_and_aborts_on_failure() {
        let (p, store) = publisher();
        p.ensure_repository("r").await.unwrap();
        let receipt = p
            .publish_batch(
                "r",
                &[
                    FileWrite::create("index.html", "<p>1</p>".into()),
                    FileWrite::create("README.md", "# r".into()),
                ],
                "init",
            )
            .await
            .unwrap();
        assert_eq!(store.head("r").unwrap(), receipt.commit_sha);
        assert_eq!(
            p.fetch_file("r", "README.md").await.unwrap().version_token,
            receipt.version_token
        );

        // Second file conflicts (exists, no token); first one stays written.
        let err = p
            .publish_batch(
                "r",
                &[
                    FileWrite::create("LICENSE", "MIT".into()),
                    FileWrite::create("README.md", "# clobber".into()),
                    FileWrite::create("never.txt", "x".into()),
                ],
                "again",
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ForgeError::Conflict { .. }));
        assert_eq!(p.fetch_file("r", "LICENSE").await.unwrap().content, "MIT");
        assert_eq!(p.fetch_file("r", "README.md").await.unwrap().content, "# r");
        assert!(p.fetch_file("r", "never.txt").await.is_err());
    }

    #[tokio::test]
    async fn test_empty_batch_is_publish_error() {
        let (p, _) = publisher();
        p.ensure_repository("r").await.unwrap();
        assert!(matches!(
            p.publish_batch("r", &[], "m").await,
            Err(ForgeError::Publish(_))
        ));
    }
}
