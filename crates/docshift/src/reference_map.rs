//! 🗺️ Reference Map: old id in, new id out, nothing else.
//!
//! 🎬 *[three people became three artists. then three artists became three
//! people again. each time, every project that pointed at them needed new
//! directions. somebody hard-coded the directions into the script. twice.
//! with different ids.]*
//!
//! This module is where those directions live now: loaded once from config
//! (inline entries and/or a TOML/JSON file), frozen for the whole run, and
//! handed to rules by shared reference. No rule owns a table. No table changes
//! mid-run. 🧊
//!
//! ## Rules of the road 🚦
//! - Keys and values are canonical ids (the `drafts.` prefix is stripped on load
//!   and before every lookup).
//! - No key, no rewrite. A miss is not an error.
//! - Rewriting an array never changes its length, order, or `_key`s.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use serde::Deserialize;
use serde_json::Value;
use tracing::info;

use crate::document::{DRAFT_PREFIX, canonical_id};

/// 🔧 Where the map comes from. Both sources may be set; inline entries win on conflicts.
#[derive(Debug, Deserialize, Clone, Default)]
pub struct ReferenceMapConfig {
    /// 📄 TOML (`old = "new"`) or JSON (`{"old": "new"}`) file, picked by extension.
    #[serde(default)]
    pub file: Option<PathBuf>,
    #[serde(default)]
    pub entries: BTreeMap<String, String>,
}

/// 🗺️ Immutable old-id → new-id lookup.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReferenceMap {
    entries: HashMap<String, String>,
}

/// 📊 What happened to one array (or single reference) during a rewrite.
#[derive(Debug, Clone, PartialEq)]
pub struct Rewritten {
    pub value: Value,
    /// 🔄 how many references got a new target
    pub rewritten: usize,
    /// 🤷 targets of references that were left alone because the map had no entry
    pub unmapped: Vec<String>,
}

impl ReferenceMap {
    /// 🏗️ Build from pairs, canonicalising both sides.
    pub fn from_entries<I, K, V>(entries: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let entries = entries
            .into_iter()
            .map(|(old, new)| {
                (canonical_id(old.as_ref()).to_string(), canonical_id(new.as_ref()).to_string())
            })
            .collect();
        Self { entries }
    }

    /// 🚀 Build from config: file first, then inline entries layered over it.
    pub fn from_config(config: &ReferenceMapConfig) -> Result<Self> {
        let mut pairs: Vec<(String, String)> = Vec::new();
        if let Some(file) = &config.file {
            pairs.extend(load_pairs(file)?);
        }
        pairs.extend(config.entries.iter().map(|(k, v)| (k.clone(), v.clone())));
        let map = Self::from_entries(pairs);
        info!("🗺️ reference map ready with {} entries", map.len());
        Ok(map)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// 🔎 New id for an old one, draft prefix ignored. `None` means "leave it be".
    pub fn lookup(&self, id: &str) -> Option<&str> {
        self.entries.get(canonical_id(id)).map(String::as_str)
    }

    /// 🔁 Rewrite a single `_ref`, keeping a draft prefix if the original had one.
    fn rewrite_target(&self, target: &str) -> Option<String> {
        let mapped = self.lookup(target)?;
        if target.starts_with(DRAFT_PREFIX) {
            Some(format!("{}{}", DRAFT_PREFIX, mapped))
        } else {
            Some(mapped.to_string())
        }
    }

    /// 🔄 Rewrite a field value that holds references.
    ///
    /// - array → each member with a `_ref` is rewritten in place; others pass through
    /// - object with `_ref` → rewritten as a single reference
    /// - anything else → untouched, reported as zero rewrites
    pub fn rewrite(&self, value: &Value) -> Rewritten {
        let mut rewritten = 0;
        let mut unmapped = Vec::new();
        let value = match value {
            Value::Array(members) => Value::Array(
                members
                    .iter()
                    .map(|member| self.rewrite_member(member, &mut rewritten, &mut unmapped))
                    .collect(),
            ),
            other => self.rewrite_member(other, &mut rewritten, &mut unmapped),
        };
        Rewritten { value, rewritten, unmapped }
    }

    fn rewrite_member(&self, member: &Value, rewritten: &mut usize, unmapped: &mut Vec<String>) -> Value {
        let Some(target) = member.get("_ref").and_then(Value::as_str) else {
            return member.clone();
        };
        match self.rewrite_target(target) {
            Some(new_target) if new_target != target => {
                let mut updated = member.clone();
                if let Some(object) = updated.as_object_mut() {
                    // -- 🎯 only _ref moves. _key, _type, _weak and friends stay exactly where they were.
                    object.insert("_ref".to_string(), Value::String(new_target));
                }
                *rewritten += 1;
                updated
            }
            Some(_) => member.clone(),
            None => {
                unmapped.push(target.to_string());
                member.clone()
            }
        }
    }
}

fn load_pairs(path: &Path) -> Result<Vec<(String, String)>> {
    let raw = std::fs::read_to_string(path).with_context(|| {
        format!(
            "💀 The reference map at '{}' could not be read. The directions to everyone's new \
             home are in there. Without them, nobody moves.",
            path.display()
        )
    })?;
    let extension = path.extension().and_then(|e| e.to_str()).unwrap_or_default();
    let table: BTreeMap<String, String> = match extension {
        "toml" => toml::from_str(&raw)
            .with_context(|| format!("💀 '{}' is not a flat TOML table of old = \"new\"", path.display()))?,
        "json" => serde_json::from_str(&raw)
            .with_context(|| format!("💀 '{}' is not a flat JSON object of \"old\": \"new\"", path.display()))?,
        other => bail!(
            "💀 reference map '{}' has extension '{}'. We speak .toml and .json. That's it. That's the list.",
            path.display(),
            other
        ),
    };
    Ok(table.into_iter().collect())
}
