//! Inbound task description and its validated form.

use serde::{Deserialize, Serialize};

use crate::error::{ForgeError, Result};

/// Which pass over the repository a task asks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Round {
    /// Generate from scratch.
    Build,
    /// Regenerate from the published content plus a new brief.
    Revise,
}

impl Round {
    pub fn number(self) -> u8 {
        match self {
            Round::Build => 1,
            Round::Revise => 2,
        }
    }

    pub fn from_number(n: u8) -> Option<Self> {
        match n {
            1 => Some(Round::Build),
            2 => Some(Round::Revise),
            _ => None,
        }
    }
}

impl Serialize for Round {
    fn serialize<S: serde::Serializer>(&self, s: S) -> std::result::Result<S::Ok, S::Error> {
        s.serialize_u8(self.number())
    }
}

impl std::fmt::Display for Round {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.number())
    }
}

/// An inline attachment: `url` is `data:<media-type>;base64,<payload>`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attachment {
    pub name: String,
    pub url: String,
}

/// The inbound JSON body, as posted by the evaluator.
///
/// Deliberately loose: presence and shape are checked by [`TaskRequest::into_task`]
/// so that a missing field becomes a validation error with a useful message
/// instead of a generic parse failure.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TaskRequest {
    #[serde(default)]
    pub secret: Option<String>,
    #[serde(default)]
    pub task: Option<String>,
    #[serde(default)]
    pub brief: Option<String>,
    #[serde(default = "default_round")]
    pub round: u8,
    #[serde(default)]
    pub checks: Vec<String>,
    #[serde(default)]
    pub attachments: Vec<Attachment>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub nonce: Option<String>,
    #[serde(default)]
    pub evaluation_url: Option<String>,
}

fn default_round() -> u8 {
    1
}

/// A validated task, immutable for the duration of one run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Task {
    /// Also the repository name.
    pub id: String,
    pub brief: String,
    pub round: Round,
    pub checks: Vec<String>,
    pub attachments: Vec<Attachment>,
    pub email: String,
    pub nonce: String,
    pub evaluation_url: String,
}

impl Task {
    /// Key for the in-flight duplicate guard.
    pub fn dedup_key(&self) -> (String, Round, String) {
        (self.id.clone(), self.round, self.nonce.clone())
    }
}

impl TaskRequest {
    /// Validate the request and produce a [`Task`]. The secret is not checked
    /// here; that belongs to the front door.
    pub fn into_task(self) -> Result<Task> {
        let id = required("task", self.task)?;
        validate_repo_name(&id)?;
        let brief = required("brief", self.brief)?;
        let email = required("email", self.email)?;
        let nonce = required("nonce", self.nonce)?;
        let evaluation_url = required("evaluation_url", self.evaluation_url)?;
        validate_callback_url(&evaluation_url)?;
        let round = Round::from_number(self.round).ok_or_else(|| {
            ForgeError::Validation(format!("round must be 1 or 2, got {}", self.round))
        })?;

        Ok(Task {
            id,
            brief,
            round,
            checks: self.checks,
            attachments: self.attachments,
            email,
            nonce,
            evaluation_url,
        })
    }
}

fn required(field: &str, value: Option<String>) -> Result<String> {
    match value {
        Some(v) if !v.trim().is_empty() => Ok(v),
        _ => Err(ForgeError::Validation(format!("missing required field '{field}'"))),
    }
}

fn validate_repo_name(name: &str) -> Result<()> {
    let valid_chars = name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.');
    if !valid_chars || name.len() > 100 || name == "." || name == ".." {
        return Err(ForgeError::Validation(format!(
            "'{name}' is not a valid repository name"
        )));
    }
    Ok(())
}

fn validate_callback_url(raw: &str) -> Result<()> {
    let parsed = url::Url::parse(raw)
        .map_err(|e| ForgeError::Validation(format!("evaluation_url '{raw}': {e}")))?;
    match parsed.scheme() {
        "http" | "https" => Ok(()),
        other => Err(ForgeError::Validation(format!(
            "evaluation_url must be http(s), got '{other}'"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(json: serde_json::Value) -> TaskRequest {
        serde_json::from_value(json).unwrap()
    }

    fn demo_json() -> serde_json::Value {
        serde_json::json!({
            "secret": "s3cret",
            "task": "demo-1",
            "brief": "a todo app",
            "round": 1,
            "checks": ["has a delete button"],
            "email": "a@b.com",
            "nonce": "n1",
            "evaluation_url": "https://eval.test/cb"
        })
    }

    #[test]
    fn test_valid_build_request() {
        let task = request(demo_json()).into_task().unwrap();
        assert_eq!(task.id, "demo-1");
        assert_eq!(task.round, Round::Build);
        assert_eq!(task.checks, vec!["has a delete button".to_string()]);
        assert!(task.attachments.is_empty());
    }

    #[test]
    fn test_optional_fields_default() {
        let mut json = demo_json();
        let obj = json.as_object_mut().unwrap();
        obj.remove("round");
        obj.remove("checks");
        let task = request(json).into_task().unwrap();
        assert_eq!(task.round, Round::Build);
        assert!(task.checks.is_empty());
    }

    #[test]
    fn test_missing_field_is_validation_error() {
        let mut json = demo_json();
        json.as_object_mut().unwrap().remove("nonce");
        let err = request(json).into_task().unwrap_err();
        match err {
            ForgeError::Validation(msg) => assert!(msg.contains("nonce")),
            other => panic!("Expected Validation, got {other:?}"),
        }
    }

    #[test]
    fn test_rejects_bad_round_and_names() {
        let mut json = demo_json();
        json["round"] = serde_json::json!(3);
        assert!(matches!(
            request(json).into_task(),
            Err(ForgeError::Validation(_))
        ));

        let mut json = demo_json();
        json["task"] = serde_json::json!("../etc");
        assert!(matches!(
            request(json).into_task(),
            Err(ForgeError::Validation(_))
        ));

        let mut json = demo_json();
        json["evaluation_url"] = serde_json::json!("ftp://eval.test/cb");
        assert!(matches!(
            request(json).into_task(),
            Err(ForgeError::Validation(_))
        ));
    }

    #[test]
    fn test_round_serializes_as_number() {
        assert_eq!(serde_json::to_value(Round::Revise).unwrap(), serde_json::json!(2));
    }
}
