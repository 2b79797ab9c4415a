//! pageforge-core: the build/revise pipeline behind the pageforge webhook.
//!
//! A task brief goes in; a generated single-page app comes out, published to
//! a hosted repository with static hosting enabled, and the evaluator that
//! asked for it is told where to find it.
//!
//! - Attachments: inline data-URI files rendered as prompt context
//! - Generator: markup and README generation/revision over an LLM backend
//! - Publisher: repository, file and hosting operations over a remote store
//! - Notify: completion report with bounded retry
//! - Orchestrator: the pipeline that ties them together

pub mod attachments;
pub mod error;
pub mod generator;
pub mod llm;
pub mod notify;
pub mod orchestrator;
pub mod publisher;
pub mod task;

pub use error::{ForgeError, Result};
