//! 🔎 Filter predicates: which documents does a migration even look at?
//!
//! The original hand-written scripts passed query-language strings around like
//! `defined(creators) && count(creators[]) > 0`. Here that lives as a small
//! serde enum, so it can come straight out of TOML, be evaluated locally by the
//! in-memory and file stores, and be rendered back to a query expression by the
//! HTTP store. Same predicate, two executors, zero string concatenation in the
//! rule code. 🦆
//!
//! ```toml
//! [migration.filter]
//! all = [{ defined = "creators" }, { non_empty = "creators" }]
//! ```

use std::borrow::Cow;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::document::{Document, canonical_id};
use crate::edits::FieldPath;

/// 🔎 A predicate over a document. `All([])` matches everything and is the default.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Filter {
    /// ✅ every inner filter must match (empty = match all)
    All(Vec<Filter>),
    /// 🎲 at least one inner filter must match (empty = match none)
    Any(Vec<Filter>),
    Not(Box<Filter>),
    /// 📍 the field exists and is not null
    Defined(FieldPath),
    /// 📚 the field is an array with at least one element
    NonEmpty(FieldPath),
    Equals { path: FieldPath, value: Value },
    /// 🪪 canonical id is in the list (drafts match their published id)
    IdIn(Vec<String>),
}

impl Default for Filter {
    fn default() -> Self {
        Filter::All(Vec::new())
    }
}

impl Filter {
    /// 🎯 Local evaluation, used by the stores that keep documents in memory.
    pub fn matches(&self, doc: &Document) -> bool {
        match self {
            Filter::All(inner) => inner.iter().all(|f| f.matches(doc)),
            Filter::Any(inner) => inner.iter().any(|f| f.matches(doc)),
            Filter::Not(inner) => !inner.matches(doc),
            Filter::Defined(path) => lookup(doc, path).is_some_and(|v| !v.is_null()),
            Filter::NonEmpty(path) => lookup(doc, path)
                .is_some_and(|v| v.as_array().is_some_and(|a| !a.is_empty())),
            Filter::Equals { path, value } => lookup(doc, path).is_some_and(|v| *v == *value),
            Filter::IdIn(ids) => ids.iter().any(|id| canonical_id(id) == doc.id.canonical()),
        }
    }

    /// 📜 Render as a query-language expression. `$`-parameters are never used for
    /// values here; literals are JSON-encoded, which the query language accepts.
    pub fn to_query_expression(&self) -> String {
        match self {
            Filter::All(inner) if inner.is_empty() => "true".to_string(),
            Filter::Any(inner) if inner.is_empty() => "false".to_string(),
            Filter::All(inner) => join(inner, " && "),
            Filter::Any(inner) => join(inner, " || "),
            Filter::Not(inner) => format!("!({})", inner.to_query_expression()),
            Filter::Defined(path) => format!("defined({})", path),
            Filter::NonEmpty(path) => format!("count({}[]) > 0", path),
            Filter::Equals { path, value } => format!("{} == {}", path, value),
            Filter::IdIn(ids) => {
                // -- 🪪 drafts too: match both the published id and its drafts.* twin
                let mut all_ids: Vec<Value> = Vec::with_capacity(ids.len() * 2);
                for id in ids {
                    let canonical = canonical_id(id);
                    all_ids.push(Value::String(canonical.to_string()));
                    all_ids.push(Value::String(format!("{}{}", crate::document::DRAFT_PREFIX, canonical)));
                }
                format!("_id in {}", Value::Array(all_ids))
            }
        }
    }
}

fn join(inner: &[Filter], separator: &str) -> String {
    let parts: Vec<String> = inner.iter().map(|f| format!("({})", f.to_query_expression())).collect();
    parts.join(separator)
}

fn lookup<'a>(doc: &'a Document, path: &FieldPath) -> Option<Cow<'a, Value>> {
    // -- 🪪 the lifted system fields stay queryable, because filters on _type happen
    match path.as_str() {
        "_id" => Some(Cow::Owned(Value::String(doc.id.to_string()))),
        "_type" => Some(Cow::Owned(Value::String(doc.doc_type.clone()))),
        _ => path.lookup(&doc.fields).map(Cow::Borrowed),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn project() -> Document {
        Document::new("drafts.p1", "project")
            .with_field("creators", json!([{"_ref": "a"}]))
            .with_field("collaborators", json!([]))
            .with_field("status", json!("completed"))
            .with_field("mainImage", Value::Null)
    }

    #[test]
    fn the_one_where_the_default_filter_lets_everyone_in() {
        assert!(Filter::default().matches(&project()));
        assert_eq!(Filter::default().to_query_expression(), "true");
    }

    #[test]
    fn the_one_where_defined_and_non_empty_mean_different_things() {
        let doc = project();
        assert!(Filter::Defined("collaborators".into()).matches(&doc));
        assert!(!Filter::NonEmpty("collaborators".into()).matches(&doc));
        assert!(Filter::NonEmpty("creators".into()).matches(&doc));
        assert!(!Filter::Defined("mainImage".into()).matches(&doc), "null is not defined");
    }

    #[test]
    fn the_one_where_combinators_combine() {
        let doc = project();
        let filter = Filter::All(vec![
            Filter::Defined("creators".into()),
            Filter::Not(Box::new(Filter::Equals { path: "status".into(), value: json!("ongoing") })),
            Filter::IdIn(vec!["p1".to_string()]),
        ]);
        assert!(filter.matches(&doc), "draft id matches its canonical id in the list");
        assert!(Filter::Equals { path: "_type".into(), value: json!("project") }.matches(&doc));
        assert!(!Filter::Any(vec![]).matches(&doc));
    }

    #[test]
    fn the_one_where_filters_render_as_query_expressions() {
        let filter = Filter::All(vec![Filter::Defined("creators".into()), Filter::NonEmpty("creators".into())]);
        assert_eq!(filter.to_query_expression(), "(defined(creators)) && (count(creators[]) > 0)");

        let ids = Filter::IdIn(vec!["drafts.x".to_string()]);
        assert_eq!(ids.to_query_expression(), r#"_id in ["x","drafts.x"]"#);

        let eq = Filter::Equals { path: "status".into(), value: json!("completed") };
        assert_eq!(eq.to_query_expression(), r#"status == "completed""#);
    }

    #[test]
    fn the_one_where_toml_speaks_filter() -> anyhow::Result<()> {
        #[derive(Deserialize)]
        struct Wrapper {
            filter: Filter,
        }
        let parsed: Wrapper = toml::from_str(
            r#"
            [filter]
            all = [{ defined = "creators" }, { non_empty = "creators" }]
            "#,
        )?;
        assert_eq!(
            parsed.filter,
            Filter::All(vec![Filter::Defined("creators".into()), Filter::NonEmpty("creators".into())])
        );
        Ok(())
    }
}
