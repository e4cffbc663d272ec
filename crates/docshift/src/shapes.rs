//! 🧬 Shape recognition for reference-array members.
//!
//! 🎬 *[a previous migration went sideways. instead of writing references into
//! `creators`, it wrote the patch operations themselves. the studio rendered a
//! list of `{op, path}` objects as "Untitled". nobody noticed for a week.]*
//!
//! Every rule that touches a reference array asks the same question first:
//! "what IS this element?" The answer lives here, once, as a discriminated match
//! over structural predicates. No `_type` sniffing: corrupted elements don't have
//! a trustworthy `_type` (that's what makes them corrupted).
//!
//! ```text
//!   {_type:"reference", _ref:"id", _key:"k"}        → Reference
//!   {op:{value:"id"}, path:"...", _key:"k"}          → PatchOperation (payload Some)
//!   {op:{}, path:"...", _key:"k"}                    → PatchOperation (payload None)
//!   anything else                                    → Unrecognized
//! ```

use serde_json::Value;

use crate::document::reference_value;

/// 🧬 What a single array member turned out to be.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemberShape<'a> {
    /// ✅ A well-formed reference.
    Reference { target: &'a str, key: Option<&'a str> },
    /// 🩹 The corrupted leftover of a patch operation. `payload` is `op.value` when it
    /// is a non-empty string.
    PatchOperation { payload: Option<&'a str>, key: Option<&'a str> },
    /// 🤷 Inline objects, strings, numbers. Not ours to judge.
    Unrecognized,
}

/// 🔬 Classify one array member.
///
/// Patch-operation shape wins over reference shape: an element carrying both an
/// `op`+`path` pair and a `_ref` was still written by the broken migration.
pub fn recognize(member: &Value) -> MemberShape<'_> {
    let Some(object) = member.as_object() else {
        return MemberShape::Unrecognized;
    };
    let key = object.get("_key").and_then(Value::as_str);

    let op = object.get("op").filter(|v| is_truthy(v));
    let path = object.get("path").filter(|v| is_truthy(v));
    if let (Some(op), Some(_)) = (op, path) {
        let payload = op.get("value").and_then(Value::as_str).filter(|s| !s.is_empty());
        return MemberShape::PatchOperation { payload, key };
    }

    match object.get("_ref").and_then(Value::as_str) {
        Some(target) => MemberShape::Reference { target, key },
        None => MemberShape::Unrecognized,
    }
}

/// 🚨 Does this array contain at least one patch-operation-shaped member?
pub fn has_patch_operations(members: &[Value]) -> bool {
    members.iter().any(|m| matches!(recognize(m), MemberShape::PatchOperation { .. }))
}

/// 🩹 Rebuild an array where patch-operation members become references.
///
/// - patch operation with payload → `{_type:"reference", _ref: payload, _key}`
/// - patch operation without payload → dropped (nothing to recover)
/// - everything else → passes through untouched
pub fn repair_members(members: &[Value]) -> Vec<Value> {
    members
        .iter()
        .filter_map(|member| match recognize(member) {
            MemberShape::PatchOperation { payload: Some(target), key } => Some(reference_value(target, key)),
            MemberShape::PatchOperation { payload: None, .. } => None,
            MemberShape::Reference { .. } | MemberShape::Unrecognized => Some(member.clone()),
        })
        .collect()
}

// -- 🧪 truthiness the way the broken writer understood it: null/false/""/0 are "not there"
fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::String(s) => !s.is_empty(),
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::Array(_) | Value::Object(_) => true,
    }
}
