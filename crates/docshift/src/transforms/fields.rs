//! 🧱 Field-level rules: rename, derive, default, flag, unset.
//!
//! The bread and butter of every schema change. Each rule here looks at a
//! handful of fields and emits `setIfMissing`/`unset` edits, never `set` over an
//! existing value, which is what makes a second run find nothing to do.

use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

use super::{RuleContext, RuleError, RuleOutcome, TransformRule, edits_or_noop};
use crate::document::Document;
use crate::edits::{FieldEdit, FieldPath};

fn present<'a>(doc: &'a Document, path: &str) -> Option<&'a Value> {
    FieldPath::new(path).lookup(&doc.fields).filter(|v| !v.is_null())
}

/// 🏷️ Move a field's value to a new name.
///
/// `setIfMissing(to, value)` then `unset(from)`. If `to` already holds something
/// it wins, and the old field is still removed.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RenameField {
    pub from: String,
    pub to: String,
}

impl TransformRule for RenameField {
    fn name(&self) -> &'static str {
        "rename_field"
    }

    fn apply(&self, doc: &Document, _ctx: &RuleContext<'_>) -> Result<RuleOutcome, RuleError> {
        // -- 🕳️ an explicit null under the old name still gets cleaned up
        let Some(value) = FieldPath::new(self.from.as_str()).lookup(&doc.fields) else {
            return Ok(RuleOutcome::NoOp);
        };
        let mut edits = Vec::with_capacity(2);
        if !value.is_null() {
            edits.push(FieldEdit::set_if_missing(self.to.as_str(), value.clone()));
        }
        edits.push(FieldEdit::unset(self.from.as_str()));
        Ok(RuleOutcome::Edits(edits))
    }
}

/// 📅 Pull a four-digit year out of a date string (`"2019-05-01"` → `2019`).
///
/// Only strings are read. A source of any other shape is left alone, and a
/// string that does not start with a year fails the document.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct DeriveYear {
    pub from: String,
    pub to: String,
}

impl TransformRule for DeriveYear {
    fn name(&self) -> &'static str {
        "derive_year"
    }

    fn apply(&self, doc: &Document, _ctx: &RuleContext<'_>) -> Result<RuleOutcome, RuleError> {
        if present(doc, &self.to).is_some() {
            return Ok(RuleOutcome::NoOp);
        }
        let date = match present(doc, &self.from) {
            None => return Ok(RuleOutcome::NoOp),
            Some(Value::String(s)) if s.is_empty() => return Ok(RuleOutcome::NoOp),
            Some(Value::String(s)) => s,
            Some(other) => {
                // -- 🤷 not a date string, so there is no date to read; the rest of the document still migrates
                debug!("🤷 {}: '{}' is {:?}, not a date string, skipping", doc.id, self.from, other);
                return Ok(RuleOutcome::NoOp);
            }
        };
        let year: i64 = date
            .get(..4)
            .filter(|prefix| prefix.bytes().all(|b| b.is_ascii_digit()))
            .and_then(|prefix| prefix.parse().ok())
            .ok_or_else(|| RuleError::InvalidValue {
                field: self.from.clone(),
                reason: format!("'{}' does not start with a four-digit year", date),
            })?;
        Ok(RuleOutcome::Edits(vec![FieldEdit::set_if_missing(self.to.as_str(), Value::from(year))]))
    }
}

/// 🧺 Backfill a constant when a field is missing or null.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SetDefault {
    pub path: String,
    pub value: Value,
}

impl TransformRule for SetDefault {
    fn name(&self) -> &'static str {
        "set_default"
    }

    fn apply(&self, doc: &Document, _ctx: &RuleContext<'_>) -> Result<RuleOutcome, RuleError> {
        if present(doc, &self.path).is_some() {
            return Ok(RuleOutcome::NoOp);
        }
        Ok(RuleOutcome::Edits(vec![FieldEdit::set_if_missing(self.path.as_str(), self.value.clone())]))
    }
}

/// 🚩 Derive a boolean from another field's value.
///
/// `to = (source == equals)`, flipped when `negate` is set. A missing source
/// compares as not-equal, so `status` absent + `negate` gives `true`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct FlagFromField {
    pub source: String,
    pub equals: Value,
    pub to: String,
    #[serde(default)]
    pub negate: bool,
}

impl TransformRule for FlagFromField {
    fn name(&self) -> &'static str {
        "flag_from_field"
    }

    fn apply(&self, doc: &Document, _ctx: &RuleContext<'_>) -> Result<RuleOutcome, RuleError> {
        if present(doc, &self.to).is_some() {
            return Ok(RuleOutcome::NoOp);
        }
        let matched = present(doc, &self.source) == Some(&self.equals);
        Ok(RuleOutcome::Edits(vec![FieldEdit::set_if_missing(self.to.as_str(), Value::Bool(matched != self.negate))]))
    }
}

/// 🪪 Flag documents whose canonical id is on a list.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct FlagById {
    pub to: String,
    pub ids: Vec<String>,
}

impl TransformRule for FlagById {
    fn name(&self) -> &'static str {
        "flag_by_id"
    }

    fn apply(&self, doc: &Document, _ctx: &RuleContext<'_>) -> Result<RuleOutcome, RuleError> {
        if present(doc, &self.to).is_some() {
            return Ok(RuleOutcome::NoOp);
        }
        let listed = self.ids.iter().any(|id| crate::document::canonical_id(id) == doc.id.canonical());
        Ok(RuleOutcome::Edits(vec![FieldEdit::set_if_missing(self.to.as_str(), Value::Bool(listed))]))
    }
}

/// 🗑️ Remove legacy fields. Only fields that are actually there produce an edit.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct UnsetFields {
    pub paths: Vec<String>,
}

impl TransformRule for UnsetFields {
    fn name(&self) -> &'static str {
        "unset_fields"
    }

    fn apply(&self, doc: &Document, _ctx: &RuleContext<'_>) -> Result<RuleOutcome, RuleError> {
        let edits = self
            .paths
            .iter()
            .filter(|path| FieldPath::new(path.as_str()).lookup(&doc.fields).is_some())
            .map(|path| FieldEdit::unset(path.as_str()))
            .collect();
        Ok(edits_or_noop(edits))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::edits::apply_edits;
    use crate::reference_map::ReferenceMap;
    use serde_json::json;

    fn run(rule: &dyn TransformRule, doc: &Document) -> Result<RuleOutcome, RuleError> {
        let map = ReferenceMap::default();
        rule.apply(doc, &RuleContext::new(&map))
    }

    /// 🔁 apply the outcome's edits and run the rule again on the result
    fn second_pass(rule: &dyn TransformRule, doc: &Document) -> anyhow::Result<RuleOutcome> {
        let mut doc = doc.clone();
        if let RuleOutcome::Edits(edits) = run(rule, &doc)? {
            apply_edits(&mut doc.fields, &edits)?;
        }
        Ok(run(rule, &doc)?)
    }

    #[test]
    fn the_one_where_main_image_becomes_cover_image_exactly_once() -> anyhow::Result<()> {
        let rule = RenameField { from: "mainImage".into(), to: "coverImage".into() };
        let doc = Document::new("p1", "project").with_field("mainImage", json!({"asset": "a"}));
        assert_eq!(
            run(&rule, &doc)?,
            RuleOutcome::Edits(vec![
                FieldEdit::set_if_missing("coverImage", json!({"asset": "a"})),
                FieldEdit::unset("mainImage"),
            ])
        );
        assert_eq!(second_pass(&rule, &doc)?, RuleOutcome::NoOp);
        Ok(())
    }

    #[test]
    fn the_one_where_the_rename_target_already_had_a_tenant() -> anyhow::Result<()> {
        let rule = RenameField { from: "mainImage".into(), to: "coverImage".into() };
        let mut doc = Document::new("p1", "project")
            .with_field("mainImage", json!("old"))
            .with_field("coverImage", json!("newer"));
        if let RuleOutcome::Edits(edits) = run(&rule, &doc)? {
            apply_edits(&mut doc.fields, &edits)?;
        }
        assert_eq!(doc.get("coverImage"), Some(&json!("newer")), "existing value survives");
        assert!(doc.get("mainImage").is_none());
        Ok(())
    }

    #[test]
    fn the_one_where_a_year_is_pulled_out_of_a_date() -> anyhow::Result<()> {
        let rule = DeriveYear { from: "startDate".into(), to: "startYear".into() };
        let doc = Document::new("p1", "project").with_field("startDate", json!("2019-05-01"));
        assert_eq!(run(&rule, &doc)?, RuleOutcome::Edits(vec![FieldEdit::set_if_missing("startYear", json!(2019))]));
        assert_eq!(second_pass(&rule, &doc)?, RuleOutcome::NoOp);

        let empty = Document::new("p2", "project").with_field("startDate", json!(""));
        assert_eq!(run(&rule, &empty)?, RuleOutcome::NoOp);
        Ok(())
    }

    #[test]
    fn the_one_where_a_date_that_is_not_a_date_fails_the_document() {
        let rule = DeriveYear { from: "startDate".into(), to: "startYear".into() };
        let words = Document::new("p1", "project").with_field("startDate", json!("sometime in spring"));
        assert!(matches!(run(&rule, &words), Err(RuleError::InvalidValue { .. })));
    }

    #[test]
    fn the_one_where_a_numeric_start_date_does_not_block_the_rename() -> anyhow::Result<()> {
        use crate::transforms::{Composite, MigrationRule};

        let derive = DeriveYear { from: "startDate".into(), to: "startYear".into() };
        let doc = Document::new("p1", "project")
            .with_field("startDate", json!(2019))
            .with_field("mainImage", json!("img-1"));
        assert_eq!(run(&derive, &doc)?, RuleOutcome::NoOp);

        let both = Composite {
            rules: vec![
                MigrationRule::DeriveYear(derive),
                MigrationRule::RenameField(RenameField { from: "mainImage".into(), to: "coverImage".into() }),
            ],
        };
        assert_eq!(
            run(&both, &doc)?,
            RuleOutcome::Edits(vec![
                FieldEdit::set_if_missing("coverImage", json!("img-1")),
                FieldEdit::unset("mainImage"),
            ])
        );
        Ok(())
    }

    #[test]
    fn the_one_where_completed_means_not_ongoing() -> anyhow::Result<()> {
        let rule = FlagFromField {
            source: "status".into(),
            equals: json!("completed"),
            to: "isOngoing".into(),
            negate: true,
        };
        let done = Document::new("p1", "project").with_field("status", json!("completed"));
        let going = Document::new("p2", "project").with_field("status", json!("in-progress"));
        let silent = Document::new("p3", "project");
        assert_eq!(run(&rule, &done)?, RuleOutcome::Edits(vec![FieldEdit::set_if_missing("isOngoing", json!(false))]));
        assert_eq!(run(&rule, &going)?, RuleOutcome::Edits(vec![FieldEdit::set_if_missing("isOngoing", json!(true))]));
        assert_eq!(run(&rule, &silent)?, RuleOutcome::Edits(vec![FieldEdit::set_if_missing("isOngoing", json!(true))]));
        Ok(())
    }

    #[test]
    fn the_one_where_the_core_roster_gets_its_badge() -> anyhow::Result<()> {
        let rule = FlagById { to: "isCoreArtist".into(), ids: vec!["core-1".into()] };
        let draft = Document::new("drafts.core-1", "artist");
        assert_eq!(run(&rule, &draft)?, RuleOutcome::Edits(vec![FieldEdit::set_if_missing("isCoreArtist", json!(true))]));
        let guest = Document::new("guest", "artist").with_field("isCoreArtist", json!(false));
        assert_eq!(run(&rule, &guest)?, RuleOutcome::NoOp);
        Ok(())
    }

    #[test]
    fn the_one_where_only_present_fields_get_unset() -> anyhow::Result<()> {
        let rule = UnsetFields { paths: vec!["videos".into(), "documents".into(), "categories".into()] };
        let doc = Document::new("p1", "project").with_field("videos", json!([])).with_field("categories", Value::Null);
        assert_eq!(
            run(&rule, &doc)?,
            RuleOutcome::Edits(vec![FieldEdit::unset("videos"), FieldEdit::unset("categories")])
        );
        assert_eq!(second_pass(&rule, &doc)?, RuleOutcome::NoOp);
        Ok(())
    }

    #[test]
    fn the_one_where_defaults_only_fill_holes() -> anyhow::Result<()> {
        let rule = SetDefault { path: "isActive".into(), value: json!(true) };
        assert_eq!(
            run(&rule, &Document::new("a", "artist"))?,
            RuleOutcome::Edits(vec![FieldEdit::set_if_missing("isActive", json!(true))])
        );
        assert_eq!(run(&rule, &Document::new("b", "artist").with_field("isActive", json!(false)))?, RuleOutcome::NoOp);
        Ok(())
    }
}
