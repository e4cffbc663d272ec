//! ♻️ Reclassify: a document changes type, which means it changes documents.
//!
//! 🎬 *[the studio won't let you edit `_type`. so `person/abc` doesn't become an
//! artist. `person/abc` is deleted, and `artist/abc` is born with the same
//! fields, in the same transaction, so nobody ever sees the gap.]*
//!
//! The new identity depends on [`IdentityPolicy`]:
//!
//! | policy  | new canonical id                                        |
//! |---------|---------------------------------------------------------|
//! | `reuse` | same as the old one                                     |
//! | `remap` | looked up in the reference map; missing entry = error   |
//! | `mint`  | UUID v5 of the old canonical id (same input, same id)   |
//!
//! A draft source produces BOTH variants: the draft is written over, the
//! published twin only if nothing is there yet. A published source produces
//! just the published variant.

use serde::Deserialize;
use uuid::Uuid;

use super::composite::combine;
use super::{MigrationRule, Replacement, RuleContext, RuleError, RuleOutcome, TransformRule, WriteMode};
use crate::document::{Document, DocumentId, SYSTEM_FIELDS};
use crate::edits::apply_edits;

/// 🪪 Where a reclassified document's new id comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IdentityPolicy {
    #[default]
    Reuse,
    Remap,
    Mint,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Reclassify {
    pub to_type: String,
    #[serde(default)]
    pub identity: IdentityPolicy,
    /// 🧱 field rules evaluated against the source and applied to the new document
    #[serde(default)]
    pub rules: Vec<MigrationRule>,
}

impl Reclassify {
    pub fn to(to_type: impl Into<String>) -> Self {
        Self { to_type: to_type.into(), identity: IdentityPolicy::default(), rules: Vec::new() }
    }

    pub fn with_identity(mut self, identity: IdentityPolicy) -> Self {
        self.identity = identity;
        self
    }

    pub fn with_rules(mut self, rules: Vec<MigrationRule>) -> Self {
        self.rules = rules;
        self
    }

    fn new_canonical_id(&self, doc: &Document, ctx: &RuleContext<'_>) -> Result<String, RuleError> {
        let old = doc.id.canonical();
        match self.identity {
            IdentityPolicy::Reuse => Ok(old.to_string()),
            IdentityPolicy::Remap => ctx
                .reference_map
                .lookup(old)
                .map(str::to_string)
                .ok_or_else(|| RuleError::MissingIdentity { id: old.to_string() }),
            IdentityPolicy::Mint => Ok(Uuid::new_v5(&Uuid::NAMESPACE_OID, old.as_bytes()).to_string()),
        }
    }
}

impl TransformRule for Reclassify {
    fn name(&self) -> &'static str {
        "reclassify"
    }

    fn apply(&self, doc: &Document, ctx: &RuleContext<'_>) -> Result<RuleOutcome, RuleError> {
        if doc.doc_type == self.to_type {
            return Ok(RuleOutcome::NoOp);
        }

        let mut fields = doc.fields.clone();
        for system in SYSTEM_FIELDS {
            fields.remove(*system);
        }
        match combine(&self.rules, doc, ctx)? {
            RuleOutcome::NoOp => {}
            RuleOutcome::Edits(edits) => {
                apply_edits(&mut fields, &edits).map_err(|e| RuleError::InvalidValue {
                    field: "reclassify.rules".to_string(),
                    reason: format!("{:#}", e),
                })?;
            }
            RuleOutcome::Replace(_) => {
                return Err(RuleError::ConflictingOutcomes {
                    detail: format!("a rule nested inside reclassify tried to replace {}", doc.id),
                });
            }
        }

        let published = Document {
            id: DocumentId::new(self.new_canonical_id(doc, ctx)?),
            doc_type: self.to_type.clone(),
            revision: None,
            fields,
        };
        let documents = if doc.is_draft() {
            let draft = Document { id: published.id.draft(), ..published.clone() };
            vec![(published, WriteMode::CreateIfNotExists), (draft, WriteMode::CreateOrReplace)]
        } else {
            vec![(published, WriteMode::CreateOrReplace)]
        };
        Ok(RuleOutcome::Replace(Replacement { delete: Some(doc.id.clone()), documents }))
    }
}
