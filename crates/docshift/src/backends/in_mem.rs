//! # Previously, on docshift...
//!
//! 🎬 The dataset was enormous, remote, rate-limited, and full of other people's
//! content. Nobody wanted to test a migration against it. So someone built a
//! store that lives entirely in RAM, gone the moment you blink.
//!
//! That someone was this module.
//!
//! [`InMemoryStore`] keeps documents in a `HashMap` behind an
//! `Arc<tokio::sync::Mutex<...>>`, so a test can hand a clone to the runner and
//! keep another clone to inspect what landed. Transactions apply to a staged
//! copy and only swap in when every mutation succeeded.
//!
//! ⚠️ This is NOT for production. This is for tests, dry rehearsals, and demos.
//!
//! 🦆

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use anyhow::{Result, bail};
use async_trait::async_trait;
use serde::Deserialize;
use tokio::sync::Mutex;
use tracing::{debug, trace};

use crate::backends::{DocumentStore, select};
use crate::document::{Document, DocumentId};
use crate::edits::Transaction;
use crate::filter::Filter;

/// 🔧 Seed documents for the in-memory store, usually written inline in a test config.
#[derive(Debug, Deserialize, Clone, Default)]
pub struct InMemoryStoreConfig {
    #[serde(default)]
    pub documents: Vec<Document>,
}

#[derive(Debug, Default)]
struct InMemoryState {
    documents: HashMap<DocumentId, Document>,
    /// 🚫 transactions for these source ids are refused, to rehearse store rejections
    rejections: HashSet<DocumentId>,
    commits: usize,
}

/// 🧠 A store made of heap memory and good intentions.
#[derive(Debug, Clone, Default)]
pub struct InMemoryStore {
    state: Arc<Mutex<InMemoryState>>,
}

impl InMemoryStore {
    pub fn new(documents: impl IntoIterator<Item = Document>) -> Self {
        let documents = documents.into_iter().map(|doc| (doc.id.clone(), doc)).collect();
        Self { state: Arc::new(Mutex::new(InMemoryState { documents, ..Default::default() })) }
    }

    pub fn from_config(config: &InMemoryStoreConfig) -> Self {
        Self::new(config.documents.iter().cloned())
    }

    /// 🚫 Make every commit for `id` fail, the way a stale revision or a permission
    /// denial would.
    pub async fn reject_commits_for(&self, id: impl Into<DocumentId>) {
        self.state.lock().await.rejections.insert(id.into());
    }

    pub async fn get(&self, id: &str) -> Option<Document> {
        self.state.lock().await.documents.get(&DocumentId::new(id)).cloned()
    }

    pub async fn len(&self) -> usize {
        self.state.lock().await.documents.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// 📊 How many transactions actually landed. Dry runs and no-ops leave this alone.
    pub async fn commit_count(&self) -> usize {
        self.state.lock().await.commits
    }

    /// 📸 Everything, ordered by id.
    pub async fn snapshot(&self) -> Vec<Document> {
        let state = self.state.lock().await;
        select(state.documents.values(), &[], &Filter::default())
    }
}

#[async_trait]
impl DocumentStore for InMemoryStore {
    async fn query(&mut self, types: &[String], filter: &Filter) -> Result<Vec<Document>> {
        let state = self.state.lock().await;
        let selected = select(state.documents.values(), types, filter);
        debug!("🧠 in-memory query for {:?} matched {} of {} documents", types, selected.len(), state.documents.len());
        Ok(selected)
    }

    async fn commit(&mut self, transaction: &Transaction) -> Result<()> {
        let mut state = self.state.lock().await;
        if state.rejections.contains(&transaction.document_id) {
            bail!("💀 the store refused the transaction for '{}' (rejection rehearsal)", transaction.document_id);
        }
        transaction.apply_to(&mut state.documents)?;
        state.commits += 1;
        trace!("✅ committed {} mutation(s) for {}", transaction.mutations.len(), transaction.document_id);
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::edits::{FieldEdit, Mutation};
    use serde_json::json;

    fn seeded() -> InMemoryStore {
        InMemoryStore::new([
            Document::new("p1", "project").with_field("creators", json!([{"_ref": "a"}])),
            Document::new("p2", "project"),
            Document::new("a", "person"),
        ])
    }

    #[tokio::test]
    async fn the_one_where_queries_filter_by_type_and_predicate() -> Result<()> {
        let mut store = seeded();
        let projects = store.query(&["project".to_string()], &Filter::default()).await?;
        assert_eq!(projects.len(), 2);
        let with_creators = store.query(&["project".to_string()], &Filter::NonEmpty("creators".into())).await?;
        assert_eq!(with_creators.len(), 1);
        assert_eq!(store.query(&[], &Filter::default()).await?.len(), 3, "no types means every type");
        Ok(())
    }

    #[tokio::test]
    async fn the_one_where_a_clone_sees_what_the_runner_wrote() -> Result<()> {
        let observer = seeded();
        let mut writer = observer.clone();
        writer
            .commit(&Transaction::new(
                "p2".into(),
                vec![Mutation::Patch { id: "p2".into(), if_revision: None, edits: vec![FieldEdit::set("isOngoing", json!(true))] }],
            ))
            .await?;
        assert_eq!(observer.get("p2").await.and_then(|d| d.get("isOngoing").cloned()), Some(json!(true)));
        assert_eq!(observer.commit_count().await, 1);
        Ok(())
    }

    #[tokio::test]
    async fn the_one_where_a_rejected_commit_changes_nothing() -> Result<()> {
        let mut store = seeded();
        store.reject_commits_for("p1").await;
        let before = store.snapshot().await;
        let outcome = store.delete(&DocumentId::new("p1")).await;
        assert!(outcome.is_err());
        assert_eq!(store.snapshot().await, before);
        assert_eq!(store.commit_count().await, 0);
        Ok(())
    }

    #[tokio::test]
    async fn the_one_where_create_refuses_to_overwrite() -> Result<()> {
        let mut store = seeded();
        assert!(store.create(Document::new("a", "artist")).await.is_err());
        store.create(Document::new("b", "artist")).await?;
        assert_eq!(store.len().await, 4);
        Ok(())
    }

    #[tokio::test]
    async fn the_one_where_two_writers_race_and_the_slow_one_loses() -> Result<()> {
        let mut p2 = Document::new("p2", "project");
        p2.revision = Some("r1".into());
        let mut store = InMemoryStore::new([p2]);
        let seen = store.get("p2").await.and_then(|d| d.revision);

        let patch = |value: bool| {
            Transaction::new(
                "p2".into(),
                vec![Mutation::Patch {
                    id: "p2".into(),
                    if_revision: seen.clone(),
                    edits: vec![FieldEdit::set("isOngoing", json!(value))],
                }],
            )
        };
        store.commit(&patch(true)).await?;
        let bumped = store.get("p2").await.and_then(|d| d.revision);
        assert!(bumped.is_some());
        assert_ne!(bumped, seen, "every commit leaves a new _rev behind");

        // -- the second writer read the same revision as the first, and is now behind
        let outcome = store.commit(&patch(false)).await;
        assert!(outcome.is_err_and(|err| format!("{:#}", err).contains("stale revision")));
        assert_eq!(store.get("p2").await.and_then(|d| d.get("isOngoing").cloned()), Some(json!(true)));
        assert_eq!(store.commit_count().await, 1);
        Ok(())
    }
}
