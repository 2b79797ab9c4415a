//! Startup configuration, read once from flags and the environment.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Result, bail};
use clap::{Parser, ValueEnum};

use pageforge_core::generator::ContentGenerator;
use pageforge_core::llm::{AnthropicBackend, GeminiBackend, ScriptedBackend, TextBackend};
use pageforge_core::notify::{NotificationDispatcher, RetryPolicy, TokioSleeper};
use pageforge_core::orchestrator::{OrchestratorSettings, TaskOrchestrator};
use pageforge_core::publisher::github::GitHubSettings;
use pageforge_core::publisher::{GitHubStore, MemoryRepoStore, RepoStore, RepositoryPublisher};

/// Canned reply used by `--dry-run`: a README that also carries a page.
const DRY_RUN_REPLY: &str = "# pageforge dry run\n\nGenerated without a model.\n\n\
```html\n<!DOCTYPE html>\n<html><head><title>pageforge</title></head>\
<body><h1>pageforge dry run</h1></body></html>\n```\n";

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LlmProvider {
    Gemini,
    Anthropic,
}

#[derive(Debug, Clone, Parser)]
#[command(
    name = "pageforge-server",
    about = "Webhook that builds and publishes LLM-generated web apps"
)]
pub struct ServerConfig {
    /// Address the webhook listens on
    #[arg(long, env = "PAGEFORGE_LISTEN", default_value = "0.0.0.0:5001")]
    pub listen_addr: String,

    /// Shared secret every request must carry
    #[arg(long, env = "MY_APP_SECRET", hide_env_values = true)]
    pub app_secret: String,

    /// Which text-generation API to call
    #[arg(long, env = "PAGEFORGE_LLM_PROVIDER", value_enum, default_value_t = LlmProvider::Gemini)]
    pub llm_provider: LlmProvider,

    #[arg(long, env = "GEMINI_API_KEY", hide_env_values = true)]
    pub gemini_api_key: Option<String>,

    #[arg(long, env = "ANTHROPIC_API_KEY", hide_env_values = true)]
    pub anthropic_api_key: Option<String>,

    /// Model name (provider default if unset)
    #[arg(long, env = "PAGEFORGE_MODEL")]
    pub model: Option<String>,

    #[arg(long, env = "GITHUB_TOKEN", hide_env_values = true)]
    pub github_token: Option<String>,

    /// Account that owns generated repositories; also the LICENSE holder
    #[arg(long, env = "GITHUB_USERNAME")]
    pub github_username: String,

    #[arg(long, env = "GITHUB_API_URL", default_value = "https://api.github.com")]
    pub github_api_url: String,

    /// Branch GitHub Pages serves from
    #[arg(long, default_value = "main")]
    pub pages_branch: String,

    /// Seconds to wait for Pages to deploy before notifying
    #[arg(long, env = "PAGEFORGE_PROPAGATION_SECS", default_value_t = 60)]
    pub propagation_secs: u64,

    /// Per-attempt timeout for the evaluator callback
    #[arg(long, default_value_t = 15)]
    pub notify_timeout_secs: u64,

    /// Publish to an in-memory store with a canned model reply
    #[arg(long)]
    pub dry_run: bool,
}

impl ServerConfig {
    /// Fail early on secrets the chosen mode cannot run without.
    pub fn validate(&self) -> Result<()> {
        if self.app_secret.trim().is_empty() {
            bail!("MY_APP_SECRET must not be empty");
        }
        if self.dry_run {
            return Ok(());
        }
        if self.github_token.as_deref().is_none_or(str::is_empty) {
            bail!("Missing required environment variable 'GITHUB_TOKEN'");
        }
        let (name, key) = match self.llm_provider {
            LlmProvider::Gemini => ("GEMINI_API_KEY", &self.gemini_api_key),
            LlmProvider::Anthropic => ("ANTHROPIC_API_KEY", &self.anthropic_api_key),
        };
        if key.as_deref().is_none_or(str::is_empty) {
            bail!("Missing required environment variable '{name}'");
        }
        Ok(())
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            attempt_timeout: Duration::from_secs(self.notify_timeout_secs),
            ..Default::default()
        }
    }

    fn backend(&self) -> Arc<dyn TextBackend> {
        if self.dry_run {
            return Arc::new(ScriptedBackend::default().with_fallback(DRY_RUN_REPLY));
        }
        let key = |k: &Option<String>| k.clone().unwrap_or_default();
        match self.llm_provider {
            LlmProvider::Gemini => {
                let mut b = GeminiBackend::new(key(&self.gemini_api_key));
                if let Some(model) = &self.model {
                    b = b.with_model(model);
                }
                Arc::new(b)
            }
            LlmProvider::Anthropic => {
                let mut b = AnthropicBackend::new(key(&self.anthropic_api_key));
                if let Some(model) = &self.model {
                    b = b.with_model(model);
                }
                Arc::new(b)
            }
        }
    }

    fn store(&self) -> Arc<dyn RepoStore> {
        if self.dry_run {
            return Arc::new(MemoryRepoStore::new(&self.github_username));
        }
        let mut settings = GitHubSettings::new(
            self.github_token.clone().unwrap_or_default(),
            self.github_username.clone(),
        );
        settings.api_base = self.github_api_url.clone();
        settings.pages_branch = self.pages_branch.clone();
        Arc::new(GitHubStore::new(settings))
    }

    /// Wire the pipeline from this configuration.
    pub fn orchestrator(&self) -> Result<TaskOrchestrator> {
        self.validate()?;
        let sleeper = Arc::new(TokioSleeper);
        Ok(TaskOrchestrator::new(
            ContentGenerator::new(self.backend()),
            RepositoryPublisher::new(self.store()),
            NotificationDispatcher::new(self.retry_policy(), sleeper.clone()),
            sleeper,
            OrchestratorSettings {
                propagation_delay: Duration::from_secs(self.propagation_secs),
                license_holder: self.github_username.clone(),
            },
        ))
    }
}
