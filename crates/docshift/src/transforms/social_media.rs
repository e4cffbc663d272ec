//! 📱 Social media: a hand-typed array of `{platform, url}` becomes a keyed object.
//!
//! `[{platform: "Instagram", url: "..."}]` → `{instagram: "..."}`. Platform names
//! are matched by substring, case-insensitively, because nobody typed them the
//! same way twice.

use serde::Deserialize;
use serde_json::{Map, Value};

use super::{RuleContext, RuleError, RuleOutcome, TransformRule};
use crate::document::Document;
use crate::edits::{FieldEdit, json_kind};

fn default_field() -> String {
    "socialMedia".to_string()
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ConvertSocialMedia {
    #[serde(default = "default_field")]
    pub field: String,
}

impl Default for ConvertSocialMedia {
    fn default() -> Self {
        Self { field: default_field() }
    }
}

/// 🏷️ Which key a free-text platform name lands under.
pub fn platform_key(platform: &str) -> &'static str {
    let platform = platform.to_lowercase();
    if platform.contains("instagram") {
        "instagram"
    } else if platform.contains("vimeo") {
        "vimeo"
    } else if platform.contains("facebook") {
        "facebook"
    } else if platform.contains("twitter") || platform.contains("x.com") {
        "twitter"
    } else {
        "other"
    }
}

/// 🔁 Convert the legacy array. Entries without a url or without a platform are
/// skipped; when two entries land on the same key, the later one wins.
pub fn convert(entries: &[Value]) -> Map<String, Value> {
    let mut converted = Map::new();
    for entry in entries {
        let Some(url) = entry.get("url").and_then(Value::as_str).filter(|u| !u.is_empty()) else {
            continue;
        };
        // -- a blank platform is not "other", it is nothing we can file anywhere
        let Some(platform) = entry.get("platform").and_then(Value::as_str).filter(|p| !p.trim().is_empty()) else {
            continue;
        };
        converted.insert(platform_key(platform).to_string(), Value::String(url.to_string()));
    }
    converted
}

impl TransformRule for ConvertSocialMedia {
    fn name(&self) -> &'static str {
        "convert_social_media"
    }

    fn apply(&self, doc: &Document, _ctx: &RuleContext<'_>) -> Result<RuleOutcome, RuleError> {
        match doc.get_present(&self.field) {
            // -- ✅ already the new shape, or nothing at all
            None | Some(Value::Object(_)) => Ok(RuleOutcome::NoOp),
            Some(Value::Array(entries)) => Ok(RuleOutcome::Edits(vec![FieldEdit::set(
                self.field.as_str(),
                Value::Object(convert(entries)),
            )])),
            Some(other) => Err(RuleError::UnexpectedShape {
                field: self.field.clone(),
                expected: "array or object",
                found: json_kind(other),
            }),
        }
    }
}
