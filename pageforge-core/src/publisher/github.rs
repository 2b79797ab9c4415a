//! GitHub REST v3 store: repositories, the contents API and Pages.

use async_trait::async_trait;
use base64::Engine;
use reqwest::StatusCode;
use serde::Deserialize;

use super::{CreateOutcome, PagesOutcome, PutReceipt, RemoteFile, RepoStore};
use crate::error::{ForgeError, Result};

/// Connection settings for [`GitHubStore`].
#[derive(Debug, Clone)]
pub struct GitHubSettings {
    pub token: String,
    /// Account that owns the generated repositories.
    pub username: String,
    pub api_base: String,
    /// Branch Pages serves from.
    pub pages_branch: String,
    pub committer_name: String,
    pub committer_email: String,
}

impl GitHubSettings {
    pub fn new(token: String, username: String) -> Self {
        Self {
            token,
            username,
            api_base: "https://api.github.com".to_string(),
            pages_branch: "main".to_string(),
            committer_name: "LLM Code Bot".to_string(),
            committer_email: "bot@example.com".to_string(),
        }
    }
}

pub struct GitHubStore {
    settings: GitHubSettings,
    http: reqwest::Client,
}

#[derive(Debug, Deserialize)]
struct RepoResponse {
    html_url: String,
}

#[derive(Debug, Deserialize)]
struct ContentResponse {
    content: String,
    sha: String,
}

#[derive(Debug, Deserialize)]
struct PutResponse {
    content: ShaOnly,
    commit: ShaOnly,
}

#[derive(Debug, Deserialize)]
struct ShaOnly {
    sha: String,
}

#[derive(Debug, Deserialize)]
struct PagesResponse {
    html_url: String,
}

impl GitHubStore {
    pub fn new(settings: GitHubSettings) -> Self {
        Self {
            settings,
            http: reqwest::Client::new(),
        }
    }

    fn api(&self, path: &str) -> String {
        format!("{}{path}", self.settings.api_base.trim_end_matches('/'))
    }

    fn contents_url(&self, repo: &str, path: &str) -> String {
        self.api(&format!(
            "/repos/{}/{repo}/contents/{path}",
            self.settings.username
        ))
    }

    fn pages_endpoint(&self, repo: &str) -> String {
        self.api(&format!("/repos/{}/{repo}/pages", self.settings.username))
    }

    fn request(&self, method: reqwest::Method, url: &str) -> reqwest::RequestBuilder {
        self.http
            .request(method, url)
            .header("Authorization", format!("token {}", self.settings.token))
            .header("Accept", "application/vnd.github.v3+json")
            .header("User-Agent", "pageforge")
    }
}

fn transport(action: &str, e: reqwest::Error) -> ForgeError {
    ForgeError::Publish(format!("{action}: {e}"))
}

fn decode_err(action: &str, e: impl std::fmt::Display) -> ForgeError {
    ForgeError::Publish(format!("{action}: unexpected response: {e}"))
}

#[async_trait]
impl RepoStore for GitHubStore {
    async fn create_repository(&self, name: &str) -> Result<CreateOutcome> {
        let resp = self
            .request(reqwest::Method::POST, &self.api("/user/repos"))
            .json(&serde_json::json!({
                "name": name,
                "private": false,
                "description": format!("AI-generated app for task: {name}"),
            }))
            .send()
            .await
            .map_err(|e| transport("GitHub repo creation", e))?;

        match resp.status() {
            StatusCode::CREATED => {
                let repo: RepoResponse = resp
                    .json()
                    .await
                    .map_err(|e| decode_err("GitHub repo creation", e))?;
                Ok(CreateOutcome::Created { url: repo.html_url })
            }
            StatusCode::UNPROCESSABLE_ENTITY => Ok(CreateOutcome::AlreadyExists),
            status => {
                let body = resp.text().await.unwrap_or_default();
                Err(ForgeError::Publish(format!(
                    "GitHub repo creation failed ({status}): {body}"
                )))
            }
        }
    }

    async fn get_file(&self, repo: &str, path: &str) -> Result<Option<RemoteFile>> {
        let resp = self
            .request(reqwest::Method::GET, &self.contents_url(repo, path))
            .send()
            .await
            .map_err(|e| transport("GitHub file fetch", e))?;

        match resp.status() {
            StatusCode::OK => {
                let data: ContentResponse = resp
                    .json()
                    .await
                    .map_err(|e| decode_err("GitHub file fetch", e))?;
                // The API wraps base64 at 60 columns.
                let cleaned: String = data.content.split_whitespace().collect();
                let bytes = base64::engine::general_purpose::STANDARD
                    .decode(cleaned)
                    .map_err(|e| decode_err("GitHub file fetch", e))?;
                let content =
                    String::from_utf8(bytes).map_err(|e| decode_err("GitHub file fetch", e))?;
                Ok(Some(RemoteFile {
                    content,
                    version_token: data.sha,
                }))
            }
            StatusCode::NOT_FOUND => Ok(None),
            status => {
                let body = resp.text().await.unwrap_or_default();
                Err(ForgeError::Publish(format!(
                    "Failed to fetch {path} ({status}): {body}"
                )))
            }
        }
    }

    async fn put_file(
        &self,
        repo: &str,
        path: &str,
        content: &str,
        version_token: Option<&str>,
        message: &str,
    ) -> Result<PutReceipt> {
        let mut payload = serde_json::json!({
            "message": message,
            "content": base64::engine::general_purpose::STANDARD.encode(content.as_bytes()),
            "committer": {
                "name": &self.settings.committer_name,
                "email": &self.settings.committer_email,
            },
        });
        if let Some(token) = version_token {
            payload["sha"] = serde_json::Value::String(token.to_string());
        }

        let resp = self
            .request(reqwest::Method::PUT, &self.contents_url(repo, path))
            .json(&payload)
            .send()
            .await
            .map_err(|e| transport("GitHub push", e))?;

        let status = resp.status();
        if status == StatusCode::OK || status == StatusCode::CREATED {
            let data: PutResponse = resp
                .json()
                .await
                .map_err(|e| decode_err("GitHub push", e))?;
            return Ok(PutReceipt {
                version_token: data.content.sha,
                commit_sha: data.commit.sha,
            });
        }

        let body = resp.text().await.unwrap_or_default();
        // 409 is a stale sha; 422 "sha wasn't supplied" is a blind overwrite.
        let is_conflict = status == StatusCode::CONFLICT
            || (status == StatusCode::UNPROCESSABLE_ENTITY && body.contains("sha"));
        if is_conflict {
            return Err(ForgeError::Conflict {
                repo: repo.to_string(),
                path: path.to_string(),
                detail: body,
            });
        }
        Err(ForgeError::Publish(format!(
            "GitHub push failed for {path} ({status}): {body}"
        )))
    }

    async fn enable_pages(&self, repo: &str) -> Result<PagesOutcome> {
        let resp = self
            .request(reqwest::Method::POST, &self.pages_endpoint(repo))
            .json(&serde_json::json!({
                "source": { "branch": &self.settings.pages_branch, "path": "/" }
            }))
            .send()
            .await
            .map_err(|e| transport("GitHub Pages enabling", e))?;

        match resp.status() {
            StatusCode::CREATED => {
                let pages: PagesResponse = resp
                    .json()
                    .await
                    .map_err(|e| decode_err("GitHub Pages enabling", e))?;
                Ok(PagesOutcome::Enabled {
                    url: pages.html_url,
                })
            }
            StatusCode::CONFLICT => Ok(PagesOutcome::AlreadyEnabled),
            status => {
                let body = resp.text().await.unwrap_or_default();
                Err(ForgeError::Publish(format!(
                    "GitHub Pages enabling failed ({status}): {body}"
                )))
            }
        }
    }

    async fn pages_url(&self, repo: &str) -> Result<Option<String>> {
        let resp = self
            .request(reqwest::Method::GET, &self.pages_endpoint(repo))
            .send()
            .await
            .map_err(|e| transport("GitHub Pages lookup", e))?;

        match resp.status() {
            StatusCode::OK => {
                let pages: PagesResponse = resp
                    .json()
                    .await
                    .map_err(|e| decode_err("GitHub Pages lookup", e))?;
                Ok(Some(pages.html_url))
            }
            StatusCode::NOT_FOUND => Ok(None),
            status => {
                let body = resp.text().await.unwrap_or_default();
                Err(ForgeError::Publish(format!(
                    "GitHub Pages lookup failed ({status}): {body}"
                )))
            }
        }
    }

    fn repository_url(&self, repo: &str) -> String {
        format!("https://github.com/{}/{repo}", self.settings.username)
    }
}
