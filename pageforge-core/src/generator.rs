//! Markup and README generation over a [`TextBackend`].

use std::sync::{Arc, LazyLock};

use regex::Regex;

use crate::error::{ForgeError, Result};
use crate::llm::TextBackend;

const DEVELOPER_SYSTEM: &str = "You are an expert web developer. You build single-page \
web applications as one self-contained index.html file with all HTML, CSS and JavaScript \
inline. CDN links for external libraries such as Bootstrap or jQuery are fine. Do not add \
explanatory comments.";

const WRITER_SYSTEM: &str = "You are a technical writer who produces clear, professional \
README.md files for small web applications.";

/// Greedy on purpose: the block runs to the last closing fence in the reply.
static HTML_BLOCK: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)```html(.*)```").unwrap_or_else(|e| panic!("invalid fence pattern: {e}"))
});

/// Produces the published documents for a task.
#[derive(Clone)]
pub struct ContentGenerator {
    backend: Arc<dyn TextBackend>,
}

impl ContentGenerator {
    pub fn new(backend: Arc<dyn TextBackend>) -> Self {
        Self { backend }
    }

    /// Generate `index.html` from scratch.
    pub async fn generate_markup(
        &self,
        brief: &str,
        checks: &[String],
        attachments_text: &str,
    ) -> Result<String> {
        let mut prompt = String::from(
            "Your task is to build a single-page web application based on the following brief.\n\
             You must generate a single index.html file that includes all necessary HTML, CSS, \
             and JavaScript.\n\n",
        );
        prompt.push_str(&format!("BRIEF: \"{brief}\"\n"));
        push_checks(&mut prompt, checks);
        push_attachments(&mut prompt, attachments_text);
        prompt.push_str(
            "\nRespond ONLY with the complete HTML code inside a single ```html markdown code block.",
        );

        tracing::info!(checks = checks.len(), "Generating initial markup");
        let response = self.call(DEVELOPER_SYSTEM, &prompt).await?;
        Ok(extract_markup(&response))
    }

    /// Rework existing `index.html` to satisfy a new brief.
    pub async fn revise_markup(
        &self,
        brief: &str,
        checks: &[String],
        attachments_text: &str,
        original_markup: &str,
    ) -> Result<String> {
        let mut prompt = String::from(
            "Your task is to revise an existing index.html file based on a new brief. Edit the \
             existing code rather than starting over, keeping working features intact.\n\n",
        );
        prompt.push_str(&format!("NEW BRIEF: \"{brief}\"\n"));
        push_checks(&mut prompt, checks);
        push_attachments(&mut prompt, attachments_text);
        prompt.push_str(&format!(
            "\nORIGINAL `index.html` CODE:\n```html\n{original_markup}\n```\n\n\
             Respond ONLY with the complete and updated HTML code inside a single ```html \
             markdown code block.",
        ));

        tracing::info!(checks = checks.len(), "Revising markup");
        let response = self.call(DEVELOPER_SYSTEM, &prompt).await?;
        Ok(extract_markup(&response))
    }

    /// Write `README.md` for a freshly built app. The whole reply is the document.
    pub async fn generate_docs(&self, brief: &str) -> Result<String> {
        let prompt = format!(
            "Based on the following application brief, write a professional README.md file.\n\
             Include these sections: {DOC_SECTIONS}.\n\n\
             BRIEF: \"{brief}\"\n\n\
             Respond ONLY with the complete markdown content for the README.md file."
        );
        tracing::info!("Generating README");
        self.call(WRITER_SYSTEM, &prompt).await
    }

    /// Update an existing `README.md` to describe a revision.
    pub async fn revise_docs(&self, brief: &str, original_docs: &str) -> Result<String> {
        let prompt = format!(
            "Update an existing README.md file based on a new brief describing changes to the \
             application. Ensure the summary, usage and code explanation sections reflect the \
             new functionality. Keep the other sections intact unless they need changing. The \
             result must still contain these sections: {DOC_SECTIONS}.\n\n\
             NEW BRIEF FOR CHANGES: \"{brief}\"\n\n\
             ORIGINAL README.md CONTENT:\n{original_docs}\n\n\
             Respond ONLY with the complete and updated markdown content for the README.md file."
        );
        tracing::info!("Revising README");
        self.call(WRITER_SYSTEM, &prompt).await
    }

    async fn call(&self, system: &str, prompt: &str) -> Result<String> {
        let text = self.backend.complete(system, prompt).await?;
        if text.trim().is_empty() {
            return Err(ForgeError::Backend("backend returned an empty response".into()));
        }
        Ok(text)
    }
}

const DOC_SECTIONS: &str = "a title, Summary, Setup (explain it is a static site), Usage (how \
to view it), Code Explanation (how the parts of the app work together), and License (MIT)";

fn push_checks(prompt: &mut String, checks: &[String]) {
    if checks.is_empty() {
        return;
    }
    prompt.push_str("\nThe finished page must satisfy every one of these checks:\n");
    for (i, check) in checks.iter().enumerate() {
        prompt.push_str(&format!("{}. {check}\n", i + 1));
    }
}

fn push_attachments(prompt: &mut String, attachments_text: &str) {
    if attachments_text.is_empty() {
        return;
    }
    prompt.push_str("\nATTACHMENTS (use this data in the app where relevant):\n");
    prompt.push_str(attachments_text);
    prompt.push('\n');
}

/// Pull the fenced html block out of a reply, or fall back to the raw reply.
pub fn extract_markup(response: &str) -> String {
    match HTML_BLOCK
        .captures(response)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().trim())
    {
        Some(block) if !block.is_empty() => block.to_string(),
        _ => {
            tracing::warn!("No ```html block in model response, using raw response");
            response.to_string()
        }
    }
}

/// Static MIT license text.
pub fn mit_license(holder: &str, year: i32) -> String {
    format!(
        "MIT License

Copyright (c) {year} {holder}

Permission is hereby granted, free of charge, to any person obtaining a copy of this software and associated documentation files (the \"Software\"), to deal in the Software without restriction, including without limitation the rights to use, copy, modify, merge, publish, distribute, sublicense, and/or sell copies of the Software, and to permit persons to whom the Software is furnished to do so, subject to the following conditions:

The above copyright notice and this permission notice shall be included in all copies or substantial portions of the Software.

THE SOFTWARE IS PROVIDED \"AS IS\", WITHOUT WARRANTY OF ANY KIND, EXPRESS OR IMPLIED, INCLUDING BUT NOT LIMITED TO THE WARRANTIES OF MERCHANTABILITY, FITNESS FOR A PARTICULAR PURPOSE AND NONINFRINGEMENT. IN NO EVENT SHALL THE AUTHORS OR COPYRIGHT HOLDERS BE LIABLE FOR ANY CLAIM, DAMAGES OR OTHER LIABILITY, WHETHER IN AN ACTION OF CONTRACT, TORT OR OTHERWISE, ARISING FROM, OUT OF OR IN CONNECTION WITH THE SOFTWARE OR THE USE OR OTHER DEALINGS IN THE SOFTWARE.
"
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::ScriptedBackend;

    fn generator(responses: &[&str]) -> (ContentGenerator, Arc<ScriptedBackend>) {
        let backend = Arc::new(ScriptedBackend::new(responses.iter().copied()));
        (ContentGenerator::new(backend.clone()), backend)
    }

    #[test]
    fn test_extracts_fenced_block() {
        let reply = "Here you go:\n```html\n<!DOCTYPE html><p>hi</p>\n```\nEnjoy.";
        assert_eq!(extract_markup(reply), "<!DOCTYPE html><p>hi</p>");
    }

    #[test]
    fn test_falls_back_to_raw_text() {
        let reply = "<html><body>no fences</body></html>";
        assert_eq!(extract_markup(reply), reply);
        assert_eq!(extract_markup("```html\n   \n```"), "```html\n   \n```");
    }

    #[tokio::test]
    async fn test_generate_markup_prompt_carries_checks_and_attachments() {
        let (g, backend) = generator(&["```html\n<div>app</div>\n```"]);
        let checks = vec!["has a delete button".to_string(), "title is Todo".to_string()];
        let markup = g
            .generate_markup(
                "a todo app",
                &checks,
                "--- BEGIN ATTACHMENT: a ---\nx\n--- END ATTACHMENT: a ---",
            )
            .await
            .unwrap();
        assert_eq!(markup, "<div>app</div>");

        let (_, prompt) = &backend.prompts()[0];
        assert!(prompt.contains("BRIEF: \"a todo app\""));
        assert!(prompt.contains("1. has a delete button\n2. title is Todo"));
        assert!(prompt.contains("BEGIN ATTACHMENT: a"));
    }

    #[tokio::test]
    async fn test_generate_markup_without_fence_is_not_an_error() {
        let (g, _) = generator(&["<p>raw</p>"]);
        assert_eq!(g.generate_markup("b", &[], "").await.unwrap(), "<p>raw</p>");
    }

    #[tokio::test]
    async fn test_revise_markup_includes_original() {
        let (g, backend) = generator(&["```html\n<p>v2</p>\n```"]);
        let out = g
            .revise_markup("add a counter", &[], "", "<p>v1</p>")
            .await
            .unwrap();
        assert_eq!(out, "<p>v2</p>");
        let (_, prompt) = &backend.prompts()[0];
        assert!(prompt.contains("NEW BRIEF: \"add a counter\""));
        assert!(prompt.contains("```html\n<p>v1</p>\n```"));
        assert!(!prompt.contains("ATTACHMENTS"));
    }

    #[tokio::test]
    async fn test_docs_are_returned_verbatim() {
        let readme = "# Todo\n\n```html\n<p>example</p>\n```\n";
        let (g, backend) = generator(&[readme, "# Todo v2"]);
        assert_eq!(g.generate_docs("a todo app").await.unwrap(), readme);
        assert_eq!(g.revise_docs("counter", readme).await.unwrap(), "# Todo v2");
        assert!(backend.prompts()[0].1.contains("Code Explanation"));
        assert!(backend.prompts()[1].1.contains(readme));
    }

    #[tokio::test]
    async fn test_empty_response_is_backend_error() {
        let (g, _) = generator(&["   \n"]);
        assert!(matches!(
            g.generate_docs("x").await,
            Err(ForgeError::Backend(_))
        ));
    }

    #[test]
    fn test_license_names_holder_and_year() {
        let text = mit_license("octocat", 2026);
        assert!(text.starts_with("MIT License\n\nCopyright (c) 2026 octocat\n"));
        assert!(text.contains("WITHOUT WARRANTY OF ANY KIND"));
    }
}
