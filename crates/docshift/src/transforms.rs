//! 🔄 Transforms: the rules that decide what happens to each document 🎭
//!
//! 🎬 COLD OPEN: INT. CONTENT STUDIO, MIGRATION NIGHT
//!
//! The schema changed. `person` is now `artist`. `mainImage` is now
//! `coverImage`. Dates became years. And somewhere in the dataset a project's
//! `creators` array is full of patch operations that were supposed to be
//! references. "It's just a few documents," they said.
//!
//! This module is the rulebook. Every rule is a pure function of one document
//! plus a read-only [`RuleContext`]. No network. No store. No clock. Rules say
//! what SHOULD happen; the runner decides whether and how it gets committed.
//!
//! ## Architecture 📐
//!
//! ```text
//!   Document ──▶ MigrationRule::apply(doc, ctx) ──▶ RuleOutcome
//!                      │                                ├─ NoOp
//!                      │  (enum dispatch, config-built) ├─ Edits(Vec<FieldEdit>)
//!                      ▼                                └─ Replace(Replacement)
//!               composite / rename / derive_year / rewrite_references / reclassify ...
//! ```
//!
//! ## Knowledge Graph 🧠
//! - Pattern: trait → concrete rule structs → `MigrationRule` enum dispatcher,
//!   deserialized straight out of config by its `kind` tag
//! - Outcomes become a [`Transaction`] via [`RuleOutcome::into_transaction`]
//! - Rules never edit `_type`; type changes are `Replace` outcomes
//! - Rules emit nothing when there is nothing to change, so reruns are no-ops
//!
//! 🦆

use std::collections::HashSet;

use serde::Deserialize;
use thiserror::Error;
use tracing::warn;

use crate::document::{Document, DocumentId};
use crate::edits::{FieldEdit, Mutation, Transaction};
use crate::reference_map::ReferenceMap;

pub mod composite;
pub mod fields;
pub mod reclassify;
pub mod references;
pub mod social_media;

pub use composite::Composite;
pub use fields::{DeriveYear, FlagById, FlagFromField, RenameField, SetDefault, UnsetFields};
pub use reclassify::{IdentityPolicy, Reclassify};
pub use references::{RepairReferences, RewriteReferences};
pub use social_media::ConvertSocialMedia;

// ============================================================
//  ╔══════════════════════════════════════════════╗
//  ║  📄 Document ──▶ rule ──▶ RuleOutcome       ║
//  ╚══════════════════════════════════════════════╝
// ============================================================

/// 📜 A transform rule.
///
/// # Contract
/// - Pure: same document + same context ⇒ same outcome
/// - No I/O; everything a rule may consult is in the context
/// - Returns `Ok(RuleOutcome::NoOp)` when nothing needs to change
/// - Returns `Err(RuleError)` when the document has a shape the rule can't handle;
///   the runner records that as a per-document failure and moves on
pub trait TransformRule: std::fmt::Debug + Send + Sync {
    /// 🏷️ Short stable name for logs and reports.
    fn name(&self) -> &'static str;

    fn apply(&self, doc: &Document, ctx: &RuleContext<'_>) -> Result<RuleOutcome, RuleError>;
}

/// 🎯 What a rule wants done to one document.
#[derive(Debug, Clone, PartialEq)]
pub enum RuleOutcome {
    /// 😴 nothing to do
    NoOp,
    /// ✏️ field edits on the document itself, in order
    Edits(Vec<FieldEdit>),
    /// ♻️ identity change: retire the old document, write new ones
    Replace(Replacement),
}

/// ✍️ How a replacement document gets written.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteMode {
    CreateOrReplace,
    /// 🛑 don't clobber: used for the published twin of a draft, which may already
    /// have been migrated from its own published source
    CreateIfNotExists,
}

/// ♻️ A whole-document replacement: optional delete of the source, then writes.
#[derive(Debug, Clone, PartialEq)]
pub struct Replacement {
    pub delete: Option<DocumentId>,
    pub documents: Vec<(Document, WriteMode)>,
}

impl RuleOutcome {
    pub fn is_noop(&self) -> bool {
        match self {
            RuleOutcome::NoOp => true,
            RuleOutcome::Edits(edits) => edits.is_empty(),
            RuleOutcome::Replace(replacement) => {
                replacement.delete.is_none() && replacement.documents.is_empty()
            }
        }
    }

    /// 📦 Turn the outcome into the transaction the store will commit. `None` for no-ops.
    ///
    /// Ordering inside a replacement: delete first, then writes, so reusing the
    /// same id for a new type works inside one atomic unit.
    pub fn into_transaction(self, doc: &Document) -> Option<Transaction> {
        if self.is_noop() {
            return None;
        }
        let mutations = match self {
            RuleOutcome::NoOp => return None,
            RuleOutcome::Edits(edits) => vec![Mutation::Patch { id: doc.id.clone(), if_revision: doc.revision.clone(), edits }],
            RuleOutcome::Replace(replacement) => {
                let mut mutations = Vec::with_capacity(replacement.documents.len() + 1);
                if let Some(id) = replacement.delete {
                    mutations.push(Mutation::Delete { id });
                }
                for (document, mode) in replacement.documents {
                    mutations.push(match mode {
                        WriteMode::CreateOrReplace => Mutation::CreateOrReplace(document),
                        WriteMode::CreateIfNotExists => Mutation::CreateIfNotExists(document),
                    });
                }
                mutations
            }
        };
        Some(Transaction::new(doc.id.clone(), mutations))
    }
}

// ============================================================
// 🧭 Context
// ============================================================

/// 🚦 What to do with a reference whose target is neither in the map nor in the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntegrityPolicy {
    /// 🙈 don't even look (no id snapshot is taken)
    Ignore,
    /// ⚠️ leave the reference unchanged and log a warning
    #[default]
    Warn,
    /// 💀 fail the document
    Fail,
}

/// 🧭 Read-only context every rule may consult.
#[derive(Debug, Clone, Copy)]
pub struct RuleContext<'a> {
    pub reference_map: &'a ReferenceMap,
    /// 🪪 canonical ids that exist in the store, snapshotted at run start.
    /// `None` when integrity checking is off.
    pub known_ids: Option<&'a HashSet<String>>,
    pub integrity: IntegrityPolicy,
}

impl<'a> RuleContext<'a> {
    pub fn new(reference_map: &'a ReferenceMap) -> Self {
        Self { reference_map, known_ids: None, integrity: IntegrityPolicy::Ignore }
    }

    pub fn with_integrity(mut self, known_ids: &'a HashSet<String>, integrity: IntegrityPolicy) -> Self {
        self.known_ids = Some(known_ids);
        self.integrity = integrity;
        self
    }

    /// 🔍 Apply the integrity policy to targets a rewrite left alone.
    ///
    /// Targets that exist in the store are fine. Anything else is dangling: logged
    /// under `Warn`, fatal for this document under `Fail`.
    pub fn check_unmapped(&self, doc: &Document, field: &str, unmapped: &[String]) -> Result<(), RuleError> {
        let Some(known) = self.known_ids else {
            return Ok(());
        };
        let dangling: Vec<String> = unmapped
            .iter()
            .filter(|target| !known.contains(crate::document::canonical_id(target)))
            .cloned()
            .collect();
        if dangling.is_empty() {
            return Ok(());
        }
        match self.integrity {
            IntegrityPolicy::Ignore => Ok(()),
            IntegrityPolicy::Warn => {
                warn!(
                    "⚠️ {} '{}' points at {:?}, which is in neither the reference map nor the store. Leaving it be.",
                    doc.id, field, dangling
                );
                Ok(())
            }
            IntegrityPolicy::Fail => Err(RuleError::DanglingReferences { field: field.to_string(), targets: dangling }),
        }
    }
}

// ============================================================
// 💀 Errors
// ============================================================

/// 💀 Why a rule could not produce an outcome for a document.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum RuleError {
    #[error("field '{field}' has an unexpected shape: expected {expected}, found {found}")]
    UnexpectedShape { field: String, expected: &'static str, found: &'static str },

    #[error("field '{field}' holds an unusable value: {reason}")]
    InvalidValue { field: String, reason: String },

    #[error("field '{field}' references targets that exist nowhere: {targets:?}")]
    DanglingReferences { field: String, targets: Vec<String> },

    #[error("no new identity for '{id}' in the reference map")]
    MissingIdentity { id: String },

    #[error("sub-rules produced outcomes that can't be combined: {detail}")]
    ConflictingOutcomes { detail: String },

    #[error("rule is misconfigured: {0}")]
    Misconfigured(String),
}

impl RuleError {
    /// ✅ integrity violations get their own bucket in the report
    pub fn is_integrity_violation(&self) -> bool {
        matches!(self, RuleError::DanglingReferences { .. } | RuleError::MissingIdentity { .. })
    }
}

// ============================================================
// 🎭 The dispatcher
// ============================================================

/// 🎭 Every rule docshift knows, as one config-constructible enum.
///
/// ```toml
/// [migration.rule]
/// kind = "composite"
///
/// [[migration.rule.rules]]
/// kind = "rename_field"
/// from = "mainImage"
/// to = "coverImage"
/// ```
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MigrationRule {
    Composite(Composite),
    RenameField(RenameField),
    DeriveYear(DeriveYear),
    SetDefault(SetDefault),
    FlagFromField(FlagFromField),
    FlagById(FlagById),
    UnsetFields(UnsetFields),
    RewriteReferences(RewriteReferences),
    RepairReferences(RepairReferences),
    ConvertSocialMedia(ConvertSocialMedia),
    Reclassify(Reclassify),
}

impl MigrationRule {
    fn inner(&self) -> &dyn TransformRule {
        match self {
            MigrationRule::Composite(rule) => rule,
            MigrationRule::RenameField(rule) => rule,
            MigrationRule::DeriveYear(rule) => rule,
            MigrationRule::SetDefault(rule) => rule,
            MigrationRule::FlagFromField(rule) => rule,
            MigrationRule::FlagById(rule) => rule,
            MigrationRule::UnsetFields(rule) => rule,
            MigrationRule::RewriteReferences(rule) => rule,
            MigrationRule::RepairReferences(rule) => rule,
            MigrationRule::ConvertSocialMedia(rule) => rule,
            MigrationRule::Reclassify(rule) => rule,
        }
    }

    /// 🔍 Catch config mistakes before the first document is touched.
    pub fn validate(&self) -> Result<(), RuleError> {
        let name = self.name();
        match self {
            MigrationRule::Composite(rule) => rule.rules.iter().try_for_each(MigrationRule::validate),
            MigrationRule::RenameField(rule) => {
                not_blank(name, "from", &rule.from)?;
                not_blank(name, "to", &rule.to)?;
                if rule.from == rule.to {
                    return Err(RuleError::Misconfigured(format!("rename_field from == to ('{}')", rule.from)));
                }
                Ok(())
            }
            MigrationRule::DeriveYear(rule) => {
                not_blank(name, "from", &rule.from)?;
                not_blank(name, "to", &rule.to)
            }
            MigrationRule::SetDefault(rule) => not_blank(name, "path", &rule.path),
            MigrationRule::FlagFromField(rule) => {
                not_blank(name, "source", &rule.source)?;
                not_blank(name, "to", &rule.to)
            }
            MigrationRule::FlagById(rule) => not_blank(name, "to", &rule.to),
            MigrationRule::UnsetFields(rule) => rule.paths.iter().try_for_each(|p| not_blank(name, "paths", p)),
            MigrationRule::RewriteReferences(rule) => {
                rule.fields.iter().try_for_each(|f| not_blank(name, "fields", f))
            }
            MigrationRule::RepairReferences(rule) => {
                rule.fields.iter().try_for_each(|f| not_blank(name, "fields", f))
            }
            MigrationRule::ConvertSocialMedia(rule) => not_blank(name, "field", &rule.field),
            MigrationRule::Reclassify(rule) => {
                not_blank(name, "to_type", &rule.to_type)?;
                rule.rules.iter().try_for_each(MigrationRule::validate)
            }
        }
    }
}

fn not_blank(rule: &str, what: &str, value: &str) -> Result<(), RuleError> {
    if value.trim().is_empty() {
        return Err(RuleError::Misconfigured(format!("{} '{}' is blank", rule, what)));
    }
    Ok(())
}

impl TransformRule for MigrationRule {
    fn name(&self) -> &'static str {
        self.inner().name()
    }

    fn apply(&self, doc: &Document, ctx: &RuleContext<'_>) -> Result<RuleOutcome, RuleError> {
        self.inner().apply(doc, ctx)
    }
}

/// 🧰 Shared helper: collect edits from a list of optional edits into an outcome.
pub(crate) fn edits_or_noop(edits: Vec<FieldEdit>) -> RuleOutcome {
    if edits.is_empty() { RuleOutcome::NoOp } else { RuleOutcome::Edits(edits) }
}
