//! 🧩 Composite: several rules, one transaction.
//!
//! Every sub-rule sees the ORIGINAL document, not its neighbour's output. Edits
//! are concatenated in rule order, then merged per path:
//!
//! ```text
//!   later Set / Unset      supersedes every earlier edit on that path (logged)
//!   later SetIfMissing     appended; it only fills a hole the earlier edits left
//! ```
//!
//! So a rename into `coverImage` followed by a `coverImage` default still moves
//! the old value, and the default lands only when there was nothing to move.
//! A single replacement may stand alone, but mixing it with edits (or with
//! another replacement) is a rule error.

use serde::Deserialize;
use tracing::warn;

use super::{MigrationRule, RuleContext, RuleError, RuleOutcome, TransformRule, edits_or_noop};
use crate::document::Document;
use crate::edits::FieldEdit;

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Composite {
    pub rules: Vec<MigrationRule>,
}

/// ✂️ Merge edits in rule order. Only an unconditional edit (`Set`/`Unset`) may
/// knock out earlier edits on its path; every drop is warned about by name.
pub(crate) fn merge_edits(doc: &Document, edits: Vec<FieldEdit>) -> Vec<FieldEdit> {
    let mut merged: Vec<FieldEdit> = Vec::with_capacity(edits.len());
    for edit in edits {
        if !matches!(edit, FieldEdit::SetIfMissing { .. }) {
            merged.retain(|earlier| {
                if earlier.path() != edit.path() {
                    return true;
                }
                if *earlier == edit {
                    // -- same edit twice, nothing is lost
                    return false;
                }
                // -- 📢 precedence is deterministic, but never silent
                warn!("⚠️ {}: {:?} is superseded by a later {:?} on the same path", doc.id, earlier, edit);
                false
            });
        }
        merged.push(edit);
    }
    merged
}

impl TransformRule for Composite {
    fn name(&self) -> &'static str {
        "composite"
    }

    fn apply(&self, doc: &Document, ctx: &RuleContext<'_>) -> Result<RuleOutcome, RuleError> {
        combine(&self.rules, doc, ctx)
    }
}

/// 🧩 Run `rules` against the same document and merge what they want.
pub(crate) fn combine(rules: &[MigrationRule], doc: &Document, ctx: &RuleContext<'_>) -> Result<RuleOutcome, RuleError> {
    let mut edits = Vec::new();
    let mut replacement = None;
    let mut contributors: Vec<&'static str> = Vec::new();

    for rule in rules {
        match rule.apply(doc, ctx)? {
            RuleOutcome::NoOp => {}
            RuleOutcome::Edits(more) if more.is_empty() => {}
            RuleOutcome::Edits(more) => {
                contributors.push(rule.name());
                edits.extend(more);
            }
            RuleOutcome::Replace(next) => {
                if replacement.is_some() {
                    return Err(RuleError::ConflictingOutcomes {
                        detail: format!("'{}' is the second rule to replace {}", rule.name(), doc.id),
                    });
                }
                contributors.push(rule.name());
                replacement = Some(next);
            }
        }
    }

    match replacement {
        Some(_) if !edits.is_empty() => Err(RuleError::ConflictingOutcomes {
            detail: format!("{} would be both edited and replaced by {:?}", doc.id, contributors),
        }),
        Some(replacement) => Ok(RuleOutcome::Replace(replacement)),
        None => Ok(edits_or_noop(merge_edits(doc, edits))),
    }
}
