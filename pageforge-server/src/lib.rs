//! pageforge-server: the webhook in front of the pageforge pipeline.

pub mod config;
pub mod web;
