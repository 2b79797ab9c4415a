//! Inline attachment decoding for generation prompts.
//!
//! Each attachment arrives as a `data:<media-type>;base64,<payload>` URI.
//! Decoded text is wrapped in named start/end markers so the model can tell
//! files apart. A bad attachment never sinks the batch: it is replaced by a
//! marker saying it could not be decoded.

use base64::Engine;

use crate::task::Attachment;

/// Render all attachments as labelled text blocks separated by blank lines.
/// No attachments yields an empty string.
pub fn decode_attachments(attachments: &[Attachment]) -> String {
    attachments
        .iter()
        .map(|a| match decode_data_uri(&a.url) {
            Ok(text) => format!(
                "--- BEGIN ATTACHMENT: {name} ---\n{text}\n--- END ATTACHMENT: {name} ---",
                name = a.name
            ),
            Err(reason) => {
                tracing::warn!(attachment = %a.name, %reason, "Attachment could not be decoded");
                format!(
                    "--- ATTACHMENT: {} (could not be decoded: {reason}) ---",
                    a.name
                )
            }
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// Decode a base64 data URI into text.
fn decode_data_uri(uri: &str) -> Result<String, String> {
    let rest = uri
        .strip_prefix("data:")
        .ok_or_else(|| "not a data: URI".to_string())?;
    let (meta, payload) = rest
        .split_once(',')
        .ok_or_else(|| "missing ',' separator".to_string())?;
    let media_type = meta
        .strip_suffix(";base64")
        .ok_or_else(|| "only base64 data URIs are supported".to_string())?;

    // Parameters such as `;charset=utf-8` may sit between type and `;base64`.
    let essence = media_type.split(';').next().unwrap_or("").trim();
    if !essence.is_empty() && !is_textual(essence) {
        return Err(format!("non-text media type {essence}"));
    }

    let cleaned: String = payload.chars().filter(|c| !c.is_whitespace()).collect();
    let bytes = base64::engine::general_purpose::STANDARD
        .decode(cleaned.as_bytes())
        .map_err(|e| format!("invalid base64: {e}"))?;
    String::from_utf8(bytes).map_err(|_| "payload is not UTF-8 text".to_string())
}

fn is_textual(media_type: &str) -> bool {
    let media_type = media_type.to_ascii_lowercase();
    if media_type.starts_with("text/") {
        return true;
    }
    let Some(subtype) = media_type.strip_prefix("application/") else {
        return false;
    };
    matches!(
        subtype,
        "json" | "xml" | "javascript" | "ecmascript" | "x-javascript" | "csv" | "x-yaml"
            | "yaml" | "toml" | "x-sh" | "sql" | "graphql"
    ) || subtype.ends_with("+json")
        || subtype.ends_with("+xml")
}
