//! 📦 Documents: the building blocks of docshift.
//!
//! 🎬 COLD OPEN: INT. CONTENT STORE, 3:47 AM
//!
//! A `person` document sits in the dataset. It has a first name, a last name,
//! a social media array that someone typed by hand in 2019, and no idea that in
//! about four seconds it is going to stop being a person and start being an
//! artist. It does not consent. It was not consulted. It has a draft twin.
//!
//! This module defines the humble structs that every other module pushes around:
//! a [`Document`] (identity + type tag + field bag) and a [`DocumentId`] that
//! knows about the `drafts.` prefix convention so nobody else has to.
//!
//! 🦆

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// 📝 The prefix the content store uses to mark a draft revision of a document.
pub const DRAFT_PREFIX: &str = "drafts.";

/// 🗑️ System bookkeeping fields that never survive a reclassification.
/// The store re-stamps them on create. Copying them over is how you get 409s.
pub(crate) const SYSTEM_FIELDS: &[&str] = &["_rev", "_createdAt", "_updatedAt"];

/// 🪪 A document identifier, draft-aware.
///
/// `drafts.abc` and `abc` are the same logical document in two revisions.
/// [`DocumentId::canonical`] strips the prefix; [`DocumentId::draft`] adds it back.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DocumentId(String);

impl DocumentId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// ✅ true when this id points at the draft revision.
    pub fn is_draft(&self) -> bool {
        self.0.starts_with(DRAFT_PREFIX)
    }

    /// 🎯 The id without the draft prefix. Reference maps key on this.
    pub fn canonical(&self) -> &str {
        canonical_id(&self.0)
    }

    /// 📰 The published variant. Already published? Then it's just a clone with extra steps.
    pub fn published(&self) -> DocumentId {
        DocumentId(self.canonical().to_string())
    }

    /// 📝 The draft variant of the same logical document.
    pub fn draft(&self) -> DocumentId {
        DocumentId(format!("{}{}", DRAFT_PREFIX, self.canonical()))
    }
}

impl fmt::Display for DocumentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for DocumentId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for DocumentId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// 🔪 Strip the draft prefix off any raw id string. Total: ids without the prefix pass through.
pub fn canonical_id(raw: &str) -> &str {
    raw.strip_prefix(DRAFT_PREFIX).unwrap_or(raw)
}

/// 🎯 A single document, as the content store sees it.
///
/// `_id`, `_type` and `_rev` are lifted into struct fields. Everything else,
/// including `_createdAt`/`_updatedAt` and any `_key`-bearing arrays, lives in
/// `fields`, untouched, in whatever shape history left it in.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    #[serde(rename = "_id")]
    pub id: DocumentId,
    #[serde(rename = "_type")]
    pub doc_type: String,
    #[serde(rename = "_rev", default, skip_serializing_if = "Option::is_none")]
    pub revision: Option<String>,
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl Document {
    /// 🏗️ A fresh document with no fields. Born empty, like every good intention.
    pub fn new(id: impl Into<DocumentId>, doc_type: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            doc_type: doc_type.into(),
            revision: None,
            fields: Map::new(),
        }
    }

    /// 🧱 Builder-ish helper, mostly for tests and fixtures.
    pub fn with_field(mut self, name: impl Into<String>, value: Value) -> Self {
        self.fields.insert(name.into(), value);
        self
    }

    pub fn is_draft(&self) -> bool {
        self.id.is_draft()
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.fields.get(name)
    }

    /// 🔢 Same as [`Document::get`] but treats JSON `null` as missing, which is how
    /// `setIfMissing` thinks about the world.
    pub fn get_present(&self, name: &str) -> Option<&Value> {
        self.fields.get(name).filter(|v| !v.is_null())
    }

    /// 📦 The document as a single JSON object (`_id`/`_type` included).
    pub fn to_value(&self) -> serde_json::Result<Value> {
        serde_json::to_value(self)
    }
}

/// 🔗 Build a well-formed reference value. `_key` only when given: single
/// reference fields don't carry one, array members do.
pub fn reference_value(target: &str, key: Option<&str>) -> Value {
    let mut reference = Map::new();
    reference.insert("_type".to_string(), Value::String("reference".to_string()));
    reference.insert("_ref".to_string(), Value::String(target.to_string()));
    if let Some(key) = key {
        reference.insert("_key".to_string(), Value::String(key.to_string()));
    }
    Value::Object(reference)
}
