//! ✏️ Field edits, mutations and transactions.
//!
//! 🎬 *[a rule has spoken. it wants `coverImage` set, `mainImage` gone, and a
//! year pulled out of a date string. the store only speaks in transactions.]*
//!
//! Three layers, smallest first:
//!
//! ```text
//!   FieldEdit      set | setIfMissing | unset      addressed by a dotted FieldPath
//!   Mutation       Patch(edits) | Create | CreateOrReplace | CreateIfNotExists | Delete
//!   Transaction    ordered mutations for ONE source document, atomic or nothing
//! ```
//!
//! Type changes never travel as a `FieldEdit` on `_type`. They are a
//! `Delete` + `CreateOrReplace` pair, because the store treats `_type` as carved
//! in stone once a document exists. 🪨
//!
//! The apply functions here are the reference semantics. The in-memory and file
//! stores use them directly; the HTTP store ships the same mutations over the wire
//! and lets the server apply them.

use std::collections::HashMap;
use std::fmt;

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::document::{Document, DocumentId};

/// 🧭 A dotted path into a document's fields, e.g. `socialMedia.instagram`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FieldPath(String);

impl FieldPath {
    pub fn new(path: impl Into<String>) -> Self {
        Self(path.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn segments(&self) -> impl Iterator<Item = &str> {
        self.0.split('.')
    }

    /// 🔎 Read the value at this path, if every hop is an object and the leaf exists.
    pub fn lookup<'a>(&self, fields: &'a Map<String, Value>) -> Option<&'a Value> {
        let mut segments = self.segments();
        let first = segments.next()?;
        let mut current = fields.get(first)?;
        for segment in segments {
            current = current.as_object()?.get(segment)?;
        }
        Some(current)
    }
}

impl fmt::Display for FieldPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for FieldPath {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// ✏️ One field-level edit.
///
/// - `Set`: overwrite, no questions asked
/// - `SetIfMissing`: only write when the field is absent or `null`
/// - `Unset`: remove the field (absent already? fine, nothing happens)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "camelCase")]
pub enum FieldEdit {
    Set { path: FieldPath, value: Value },
    SetIfMissing { path: FieldPath, value: Value },
    Unset { path: FieldPath },
}

impl FieldEdit {
    pub fn set(path: impl Into<String>, value: Value) -> Self {
        FieldEdit::Set { path: FieldPath::new(path), value }
    }

    pub fn set_if_missing(path: impl Into<String>, value: Value) -> Self {
        FieldEdit::SetIfMissing { path: FieldPath::new(path), value }
    }

    pub fn unset(path: impl Into<String>) -> Self {
        FieldEdit::Unset { path: FieldPath::new(path) }
    }

    pub fn path(&self) -> &FieldPath {
        match self {
            FieldEdit::Set { path, .. } | FieldEdit::SetIfMissing { path, .. } | FieldEdit::Unset { path } => path,
        }
    }

    /// 🔧 Apply this edit in place. Returns whether anything actually changed.
    ///
    /// 💀 Errors when an intermediate hop exists but isn't an object. We won't
    /// bulldoze a string to make room for a nested field.
    pub fn apply(&self, fields: &mut Map<String, Value>) -> Result<bool> {
        match self {
            FieldEdit::Set { path, value } => {
                let (parent, leaf) = parent_of(fields, path, true)?
                    .context("💀 set could not find a parent object, which should be impossible when creating")?;
                let changed = parent.get(leaf) != Some(value);
                parent.insert(leaf.to_string(), value.clone());
                Ok(changed)
            }
            FieldEdit::SetIfMissing { path, value } => {
                // -- 🔎 present and non-null? hands off.
                if path.lookup(fields).is_some_and(|v| !v.is_null()) {
                    return Ok(false);
                }
                FieldEdit::Set { path: path.clone(), value: value.clone() }.apply(fields)
            }
            FieldEdit::Unset { path } => match parent_of(fields, path, false)? {
                Some((parent, leaf)) => Ok(parent.remove(leaf).is_some()),
                None => Ok(false),
            },
        }
    }
}

/// 🧗 Walk to the parent object of the leaf segment. With `create`, missing hops become
/// empty objects; without it, a missing hop means "nothing to do here" (`None`).
fn parent_of<'a, 'p>(
    fields: &'a mut Map<String, Value>,
    path: &'p FieldPath,
    create: bool,
) -> Result<Option<(&'a mut Map<String, Value>, &'p str)>> {
    let segments: Vec<&str> = path.segments().collect();
    // -- 🍃 the last segment is the field itself, everything before it is a hop to walk
    let Some((leaf, hops)) = segments.split_last() else {
        bail!("💀 empty field path. A path to nowhere leads nowhere.");
    };
    if leaf.is_empty() {
        bail!("💀 field path '{}' ends in an empty segment", path);
    }

    let mut current = fields;
    for hop in hops {
        let needs_object = match current.get(*hop) {
            // -- 🧹 missing or null hop: ours to fill, but only when creating
            None | Some(Value::Null) => {
                if !create {
                    return Ok(None);
                }
                true
            }
            Some(Value::Object(_)) => false,
            Some(other) => bail!(
                "💀 field path '{}' runs through '{}', which is a {} and not an object. \
                 We refuse to flatten it to make room.",
                path,
                hop,
                json_kind(other)
            ),
        };
        if needs_object {
            current.insert(hop.to_string(), Value::Object(Map::new()));
        }
        // -- 🔁 re-borrow after the insert; the match above only peeked
        current = match current.get_mut(*hop) {
            Some(Value::Object(inner)) => inner,
            _ => bail!("💀 hop '{}' of '{}' stopped being an object mid-walk", hop, path),
        };
    }
    Ok(Some((current, *leaf)))
}

pub(crate) fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// 🔧 Apply a list of edits in order. Returns whether any of them changed something.
pub fn apply_edits(fields: &mut Map<String, Value>, edits: &[FieldEdit]) -> Result<bool> {
    let mut changed = false;
    for edit in edits {
        changed |= edit
            .apply(fields)
            .with_context(|| format!("💀 edit on '{}' refused to apply", edit.path()))?;
    }
    Ok(changed)
}

/// 🧾 One store-level mutation.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum Mutation {
    /// ✏️ Field edits on an existing document, applied in order. With
    /// `if_revision`, the whole transaction is rejected unless the document is
    /// still at that `_rev`.
    Patch {
        id: DocumentId,
        #[serde(skip_serializing_if = "Option::is_none")]
        if_revision: Option<String>,
        edits: Vec<FieldEdit>,
    },
    /// 🆕 Create; fails if the id is taken.
    Create(Document),
    /// ♻️ Create, or replace wholesale if the id is taken.
    CreateOrReplace(Document),
    /// 🛑 Create only when the id is free; otherwise leave the existing document alone.
    CreateIfNotExists(Document),
    /// 🗑️ Delete; deleting something already gone is not an error.
    Delete { id: DocumentId },
}

impl Mutation {
    /// 🪪 The id this mutation touches.
    pub fn target(&self) -> &DocumentId {
        match self {
            Mutation::Patch { id, .. } | Mutation::Delete { id } => id,
            Mutation::Create(doc) | Mutation::CreateOrReplace(doc) | Mutation::CreateIfNotExists(doc) => &doc.id,
        }
    }

    /// 🗒️ One line for humans: the verb, the id, and for patches every edited path.
    pub fn describe(&self) -> String {
        match self {
            Mutation::Patch { id, edits, .. } => {
                let paths: Vec<String> = edits
                    .iter()
                    .map(|edit| match edit {
                        FieldEdit::Set { path, .. } => format!("set {}", path),
                        FieldEdit::SetIfMissing { path, .. } => format!("setIfMissing {}", path),
                        FieldEdit::Unset { path } => format!("unset {}", path),
                    })
                    .collect();
                format!("patch {}: {}", id, paths.join(", "))
            }
            Mutation::Create(doc) => format!("create {} ({})", doc.id, doc.doc_type),
            Mutation::CreateOrReplace(doc) => format!("createOrReplace {} ({})", doc.id, doc.doc_type),
            Mutation::CreateIfNotExists(doc) => format!("createIfNotExists {} ({})", doc.id, doc.doc_type),
            Mutation::Delete { id } => format!("delete {}", id),
        }
    }
}

/// 📦 All mutations produced for one source document. Commits atomically or not at all.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Transaction {
    /// 🎯 The candidate document this transaction was computed from.
    pub document_id: DocumentId,
    pub mutations: Vec<Mutation>,
}

impl Transaction {
    pub fn new(document_id: DocumentId, mutations: Vec<Mutation>) -> Self {
        Self { document_id, mutations }
    }

    pub fn is_empty(&self) -> bool {
        self.mutations.is_empty()
    }

    /// 🔄 Apply to a keyed collection, all-or-nothing.
    ///
    /// Revision preconditions are checked against the state BEFORE the
    /// transaction, then everything is applied to a staged copy that is only
    /// swapped in when every mutation landed. Every document the transaction
    /// writes comes out with the same fresh `_rev`.
    pub fn apply_to(&self, docs: &mut HashMap<DocumentId, Document>) -> Result<()> {
        for mutation in &self.mutations {
            if let Mutation::Patch { id, if_revision: Some(expected), .. } = mutation {
                let current = docs.get(id).and_then(|doc| doc.revision.as_deref());
                if current != Some(expected.as_str()) {
                    // -- 🕰️ someone got there between our fetch and our commit
                    bail!(
                        "💀 stale revision for '{}': the rule saw '{}', the store has '{}'",
                        id,
                        expected,
                        current.unwrap_or("nothing")
                    );
                }
            }
        }

        let revision = Uuid::new_v4().simple().to_string();
        let mut staged = docs.clone();
        for mutation in &self.mutations {
            if apply_mutation(&mut staged, mutation)? {
                if let Some(doc) = staged.get_mut(mutation.target()) {
                    doc.revision = Some(revision.clone());
                }
            }
        }
        *docs = staged;
        Ok(())
    }
}

/// Returns whether the target document was written.
fn apply_mutation(docs: &mut HashMap<DocumentId, Document>, mutation: &Mutation) -> Result<bool> {
    match mutation {
        Mutation::Patch { id, edits, .. } => {
            let doc = docs
                .get_mut(id)
                .with_context(|| format!("💀 patch target '{}' does not exist. Can't edit a ghost.", id))?;
            apply_edits(&mut doc.fields, edits)
                .with_context(|| format!("💀 patch on '{}' failed", id))?;
            Ok(true)
        }
        Mutation::Create(doc) => {
            if docs.contains_key(&doc.id) {
                bail!("💀 create of '{}' collided with an existing document", doc.id);
            }
            docs.insert(doc.id.clone(), doc.clone());
            Ok(true)
        }
        Mutation::CreateOrReplace(doc) => {
            docs.insert(doc.id.clone(), doc.clone());
            Ok(true)
        }
        Mutation::CreateIfNotExists(doc) => {
            // -- 🛑 occupied means hands off, and the occupant keeps its _rev too
            if docs.contains_key(&doc.id) {
                return Ok(false);
            }
            docs.insert(doc.id.clone(), doc.clone());
            Ok(true)
        }
        Mutation::Delete { id } => {
            docs.remove(id);
            Ok(false)
        }
    }
}
