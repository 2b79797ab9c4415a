//! The build/revise pipeline.
//!
//! One run is a strictly linear sequence: decode attachments, generate,
//! publish, enable hosting, wait for the site to propagate, notify. Nothing
//! here retries; a failing step ends the run and nothing is rolled back, so
//! a failure after publication leaves the repository updated and the
//! evaluator uninformed.
//!
//! Runs for the same repository name are serialised behind a per-name lock.
//! A delivery that repeats `(task, round, nonce)` while the first is still
//! running is rejected instead of queued.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use chrono::Datelike;
use parking_lot::Mutex;

use crate::attachments::decode_attachments;
use crate::error::ForgeError;
use crate::generator::{ContentGenerator, mit_license};
use crate::notify::{NotificationDispatcher, NotificationPayload, Sleeper};
use crate::publisher::{FileWrite, RepositoryPublisher};
use crate::task::{Round, Task};

pub const INDEX_PATH: &str = "index.html";
pub const README_PATH: &str = "README.md";
pub const LICENSE_PATH: &str = "LICENSE";

const BUILD_COMMIT_MESSAGE: &str = "feat: Initial commit";
const REVISE_COMMIT_MESSAGE: &str = "feat: Apply revisions for round 2";

/// Pipeline states, in the order a build run reaches them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Received,
    AttachmentsDecoded,
    ContentGenerated,
    /// On revise, reached by fetching the existing files, before generation.
    RepositoryEnsured,
    FilesPublished,
    HostingEnabled,
    AwaitingPropagation,
    Notified,
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Stage::Received => write!(f, "received"),
            Stage::AttachmentsDecoded => write!(f, "attachments-decoded"),
            Stage::ContentGenerated => write!(f, "content-generated"),
            Stage::RepositoryEnsured => write!(f, "repository-ensured"),
            Stage::FilesPublished => write!(f, "files-published"),
            Stage::HostingEnabled => write!(f, "hosting-enabled"),
            Stage::AwaitingPropagation => write!(f, "awaiting-propagation"),
            Stage::Notified => write!(f, "notified"),
        }
    }
}

/// A run that ended in the failed state. `stage` is the last state reached.
#[derive(Debug, thiserror::Error)]
#[error("{error} (last completed stage: {stage})")]
pub struct TaskFailure {
    pub stage: Stage,
    #[source]
    pub error: ForgeError,
}

/// A run that reached [`Stage::Notified`].
#[derive(Debug, Clone)]
pub struct Completion {
    pub payload: NotificationPayload,
    pub trail: Vec<Stage>,
}

#[derive(Debug, Clone)]
pub struct OrchestratorSettings {
    /// Wait between enabling hosting and notifying.
    pub propagation_delay: Duration,
    /// Copyright holder named in the generated LICENSE.
    pub license_holder: String,
}

pub struct TaskOrchestrator {
    generator: ContentGenerator,
    publisher: RepositoryPublisher,
    notifier: NotificationDispatcher,
    sleeper: Arc<dyn Sleeper>,
    settings: OrchestratorSettings,
    repo_locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
    in_flight: Arc<Mutex<HashSet<(String, Round, String)>>>,
}

/// Removes the dedup key when the run ends, however it ends.
struct InFlight {
    key: (String, Round, String),
    set: Arc<Mutex<HashSet<(String, Round, String)>>>,
}

impl Drop for InFlight {
    fn drop(&mut self) {
        self.set.lock().remove(&self.key);
    }
}

/// Stage bookkeeping for one run.
struct Progress<'a> {
    task: &'a Task,
    trail: Vec<Stage>,
}

impl<'a> Progress<'a> {
    fn start(task: &'a Task) -> Self {
        let mut p = Self {
            task,
            trail: Vec::new(),
        };
        p.advance(Stage::Received);
        p
    }

    fn advance(&mut self, stage: Stage) {
        tracing::info!(task = %self.task.id, round = %self.task.round, %stage, "Stage reached");
        self.trail.push(stage);
    }

    fn current(&self) -> Stage {
        self.trail.last().copied().unwrap_or(Stage::Received)
    }

    fn fail(&self, error: ForgeError) -> TaskFailure {
        let stage = self.current();
        tracing::error!(
            task = %self.task.id,
            round = %self.task.round,
            %stage,
            error = %error,
            "Task failed"
        );
        TaskFailure { stage, error }
    }
}

impl TaskOrchestrator {
    pub fn new(
        generator: ContentGenerator,
        publisher: RepositoryPublisher,
        notifier: NotificationDispatcher,
        sleeper: Arc<dyn Sleeper>,
        settings: OrchestratorSettings,
    ) -> Self {
        Self {
            generator,
            publisher,
            notifier,
            sleeper,
            settings,
            repo_locks: Mutex::new(HashMap::new()),
            in_flight: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    /// Run one task to completion or failure.
    pub async fn run(&self, task: &Task) -> Result<Completion, TaskFailure> {
        let _in_flight = self.claim(task).map_err(|error| TaskFailure {
            stage: Stage::Received,
            error,
        })?;

        let lock = self
            .repo_locks
            .lock()
            .entry(task.id.clone())
            .or_default()
            .clone();
        let guard = lock.clone().lock_owned().await;

        tracing::info!(task = %task.id, round = %task.round, nonce = %task.nonce, "Starting task");
        let result = match task.round {
            Round::Build => self.build(task).await,
            Round::Revise => self.revise(task).await,
        };

        drop(guard);
        self.release_lock(&task.id, lock);

        if let Ok(done) = &result {
            tracing::info!(
                task = %task.id,
                round = %task.round,
                commit = %done.payload.commit_sha,
                "Task completed"
            );
        }
        result
    }

    fn claim(&self, task: &Task) -> Result<InFlight, ForgeError> {
        let key = task.dedup_key();
        if !self.in_flight.lock().insert(key.clone()) {
            tracing::warn!(
                task = %task.id,
                round = %task.round,
                nonce = %task.nonce,
                "Duplicate delivery rejected"
            );
            return Err(ForgeError::Duplicate {
                task: key.0,
                round: key.1.number(),
                nonce: key.2,
            });
        }
        Ok(InFlight {
            key,
            set: self.in_flight.clone(),
        })
    }

    /// Forget the lock for `name` once nobody else holds or waits on it.
    fn release_lock(&self, name: &str, lock: Arc<tokio::sync::Mutex<()>>) {
        let mut locks = self.repo_locks.lock();
        // One reference in the map, one here.
        if Arc::strong_count(&lock) == 2 {
            locks.remove(name);
        }
    }

    async fn build(&self, task: &Task) -> Result<Completion, TaskFailure> {
        let mut p = Progress::start(task);

        let attachments_text = decode_attachments(&task.attachments);
        p.advance(Stage::AttachmentsDecoded);

        let markup = self
            .generator
            .generate_markup(&task.brief, &task.checks, &attachments_text)
            .await
            .map_err(|e| p.fail(e))?;
        let docs = self
            .generator
            .generate_docs(&task.brief)
            .await
            .map_err(|e| p.fail(e))?;
        let license = mit_license(&self.settings.license_holder, chrono::Utc::now().year());
        p.advance(Stage::ContentGenerated);

        let repo_url = self
            .publisher
            .ensure_repository(&task.id)
            .await
            .map_err(|e| p.fail(e))?;
        p.advance(Stage::RepositoryEnsured);

        let files = [
            FileWrite::create(INDEX_PATH, markup),
            FileWrite::create(README_PATH, docs),
            FileWrite::create(LICENSE_PATH, license),
        ];
        let receipt = self
            .publisher
            .publish_batch(&task.id, &files, BUILD_COMMIT_MESSAGE)
            .await
            .map_err(|e| p.fail(e))?;
        p.advance(Stage::FilesPublished);

        self.host_and_notify(task, repo_url, receipt.commit_sha, p)
            .await
    }

    async fn revise(&self, task: &Task) -> Result<Completion, TaskFailure> {
        let mut p = Progress::start(task);

        let attachments_text = decode_attachments(&task.attachments);
        p.advance(Stage::AttachmentsDecoded);

        let original_markup = self
            .publisher
            .fetch_file(&task.id, INDEX_PATH)
            .await
            .map_err(|e| p.fail(e))?;
        let original_docs = self
            .publisher
            .fetch_file(&task.id, README_PATH)
            .await
            .map_err(|e| p.fail(e))?;
        p.advance(Stage::RepositoryEnsured);

        let markup = self
            .generator
            .revise_markup(
                &task.brief,
                &task.checks,
                &attachments_text,
                &original_markup.content,
            )
            .await
            .map_err(|e| p.fail(e))?;
        let docs = self
            .generator
            .revise_docs(&task.brief, &original_docs.content)
            .await
            .map_err(|e| p.fail(e))?;
        p.advance(Stage::ContentGenerated);

        let files = [
            FileWrite::update(INDEX_PATH, markup, original_markup.version_token),
            FileWrite::update(README_PATH, docs, original_docs.version_token),
        ];
        let receipt = self
            .publisher
            .publish_batch(&task.id, &files, REVISE_COMMIT_MESSAGE)
            .await
            .map_err(|e| p.fail(e))?;
        p.advance(Stage::FilesPublished);

        let repo_url = self.publisher.repository_url(&task.id);
        self.host_and_notify(task, repo_url, receipt.commit_sha, p)
            .await
    }

    async fn host_and_notify(
        &self,
        task: &Task,
        repo_url: String,
        commit_sha: String,
        mut p: Progress<'_>,
    ) -> Result<Completion, TaskFailure> {
        let pages_url = self
            .publisher
            .enable_hosting(&task.id)
            .await
            .map_err(|e| p.fail(e))?;
        p.advance(Stage::HostingEnabled);

        p.advance(Stage::AwaitingPropagation);
        tracing::info!(
            task = %task.id,
            delay = ?self.settings.propagation_delay,
            "Waiting for hosting to propagate"
        );
        self.sleeper.sleep(self.settings.propagation_delay).await;

        let payload = NotificationPayload {
            email: task.email.clone(),
            task: task.id.clone(),
            round: task.round,
            nonce: task.nonce.clone(),
            repo_url,
            commit_sha,
            pages_url,
        };
        self.notifier
            .notify(&task.evaluation_url, &payload)
            .await
            .map_err(|e| p.fail(e))?;
        p.advance(Stage::Notified);

        Ok(Completion {
            payload,
            trail: p.trail,
        })
    }
}
