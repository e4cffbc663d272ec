//! 🔗 Reference rules: point old references at new ids, and repair arrays that
//! were written as patch operations instead of references.

use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

use super::{RuleContext, RuleError, RuleOutcome, TransformRule, edits_or_noop};
use crate::document::Document;
use crate::edits::FieldEdit;
use crate::shapes::{has_patch_operations, repair_members};

/// 🔄 Rewrite `_ref` targets in the named fields through the run's reference map.
///
/// Array length, order and `_key`s are preserved. Targets with no mapping are
/// left alone and handed to the integrity policy.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RewriteReferences {
    pub fields: Vec<String>,
}

impl TransformRule for RewriteReferences {
    fn name(&self) -> &'static str {
        "rewrite_references"
    }

    fn apply(&self, doc: &Document, ctx: &RuleContext<'_>) -> Result<RuleOutcome, RuleError> {
        let mut edits = Vec::new();
        for field in &self.fields {
            let Some(value) = doc.get_present(field) else {
                continue;
            };
            let result = ctx.reference_map.rewrite(value);
            ctx.check_unmapped(doc, field, &result.unmapped)?;
            if result.rewritten > 0 {
                debug!("🔄 {} '{}': {} reference(s) rewritten", doc.id, field, result.rewritten);
                edits.push(FieldEdit::set(field.as_str(), result.value));
            }
        }
        Ok(edits_or_noop(edits))
    }
}

/// 🩹 Turn patch-operation-shaped members back into references.
///
/// Only arrays that actually contain a broken member are rewritten; every
/// listed field is checked, not just the first one that needs it.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RepairReferences {
    pub fields: Vec<String>,
}

impl TransformRule for RepairReferences {
    fn name(&self) -> &'static str {
        "repair_references"
    }

    fn apply(&self, doc: &Document, _ctx: &RuleContext<'_>) -> Result<RuleOutcome, RuleError> {
        let mut edits = Vec::new();
        for field in &self.fields {
            // -- 🤷 not an array: not the broken shape, nothing to repair
            let Some(Value::Array(members)) = doc.get(field) else {
                continue;
            };
            if has_patch_operations(members) {
                let repaired = repair_members(members);
                debug!("🩹 {} '{}': {} member(s) → {}", doc.id, field, members.len(), repaired.len());
                edits.push(FieldEdit::set(field.as_str(), Value::Array(repaired)));
            }
        }
        Ok(edits_or_noop(edits))
    }
}
