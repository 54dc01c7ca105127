//! Derived identity fields.
//!
//! Pure functions only: everything here is computed from local data so the
//! same source tree always yields the same slugs and identities.

use serde_json::Value as JsonValue;

use crate::error::{Error, Result};
use crate::models::DocType;

/// File names with a dedicated document type, lower-cased.
const DOC_TYPES: [(&str, DocType); 4] = [
    ("current-context.md", DocType::CurrentContext),
    ("master-plan.md", DocType::MasterPlan),
    ("tasks.md", DocType::Tasks),
    ("readme.md", DocType::Readme),
];

/// Classify a document by its file name.
///
/// Case-insensitive exact match; anything else is [`DocType::Other`].
/// `"my-tasks.md"` is `Other`, not `Tasks`.
pub fn derive_doc_type(file_name: &str) -> DocType {
    let lower = file_name.to_lowercase();
    DOC_TYPES
        .iter()
        .find(|(name, _)| *name == lower)
        .map(|(_, doc_type)| *doc_type)
        .unwrap_or(DocType::Other)
}

/// Build a document slug: `{project_code}/{base}`.
///
/// `base` is the file name without its last extension, lower-cased, with
/// spaces replaced by hyphens. Files that differ only by extension
/// (`notes.md`, `notes.txt`) share a slug and therefore a remote record.
pub fn build_slug(project_code: &str, file_name: &str) -> String {
    let base = strip_last_extension(file_name)
        .to_lowercase()
        .replace(' ', "-");
    format!("{}/{}", project_code, base)
}

fn strip_last_extension(file_name: &str) -> &str {
    match file_name.rfind('.') {
        Some(pos) if pos + 1 < file_name.len() => &file_name[..pos],
        _ => file_name,
    }
}

/// External identity of a stakeholder payload.
///
/// Prefers a non-empty `id` (string or number). Falls back to the
/// `nombre_corto` short name, lower-cased, whitespace runs collapsed to a
/// single hyphen.
pub fn derive_stakeholder_identity(payload: &JsonValue) -> Result<String> {
    let explicit = match payload.get("id") {
        Some(JsonValue::String(s)) => Some(s.trim().to_string()),
        Some(JsonValue::Number(n)) => Some(n.to_string()),
        _ => None,
    };
    if let Some(id) = explicit.filter(|s| !s.is_empty()) {
        return Ok(id);
    }

    let short_name = payload
        .get("nombre_corto")
        .and_then(JsonValue::as_str)
        .map(|s| {
            s.split_whitespace()
                .collect::<Vec<_>>()
                .join("-")
                .to_lowercase()
        })
        .unwrap_or_default();
    if !short_name.is_empty() {
        return Ok(short_name);
    }

    Err(Error::IdentityDerivation(
        "payload has neither a non-empty `id` nor `nombre_corto`".to_string(),
    ))
}

/// Human-readable project name from its directory code.
///
/// `"proj-a"` becomes `"Proj A"`.
pub fn project_display_name(code: &str) -> String {
    code.split('-')
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect::<String>(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}
