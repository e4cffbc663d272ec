//! 🔌 Backends: where the documents actually live.
//!
//! 🎭 This module is the casting agency. Need documents from the hosted content
//! store? From an NDJSON export on disk? From a HashMap that dies with the
//! process? We've got a store for that. Three, in fact. The runner doesn't care
//! which one shows up, as long as it can answer a query and take a transaction.
//!
//! ## Knowledge Graph 🧠
//! - `DocumentStore`: async trait, the whole store contract (query, commit, close)
//! - `StoreBackend`: enum dispatcher over concrete stores, built from `StoreConfig`
//! - `create`/`delete` are single-mutation transactions, not separate code paths
//! - Every commit is atomic per transaction. All three stores honour that, each in
//!   its own way (staged copy, staged copy, server-side transaction).
//!
//! 🦆 The duck stays. The duck always stays.

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Deserialize;

use crate::document::{Document, DocumentId};
use crate::edits::{Mutation, Transaction};
use crate::filter::Filter;

pub mod file;
pub mod http;
pub mod in_mem;

pub use file::{FileStore, FileStoreConfig};
pub use http::{HttpStore, HttpStoreConfig};
pub use in_mem::{InMemoryStore, InMemoryStoreConfig};

/// 🗄️ A document store the runner can read from and write to.
///
/// # Contract
/// - `query` is a snapshot read. An empty `types` slice means every type.
/// - `commit` applies the whole transaction or none of it. A rejection is an `Err`
///   carrying the cause; the store is unchanged afterwards.
/// - `close` flushes anything buffered. MUST be called. Skipping it is a bug.
#[async_trait]
pub trait DocumentStore: std::fmt::Debug + Send {
    async fn query(&mut self, types: &[String], filter: &Filter) -> Result<Vec<Document>>;

    async fn commit(&mut self, transaction: &Transaction) -> Result<()>;

    async fn close(&mut self) -> Result<()>;

    /// 🆕 Create one document. Fails if the id is taken.
    async fn create(&mut self, document: Document) -> Result<()> {
        let transaction = Transaction::new(document.id.clone(), vec![Mutation::Create(document)]);
        self.commit(&transaction).await
    }

    /// 🗑️ Delete one document. Already gone counts as done.
    async fn delete(&mut self, id: &DocumentId) -> Result<()> {
        let transaction = Transaction::new(id.clone(), vec![Mutation::Delete { id: id.clone() }]);
        self.commit(&transaction).await
    }
}

/// 🔧 Which store to talk to. Externally tagged in TOML:
///
/// ```toml
/// [store.http]
/// project_id = "abc123"
/// dataset = "production"
/// ```
#[derive(Debug, Deserialize, Clone)]
#[serde(rename_all = "snake_case")]
pub enum StoreConfig {
    #[serde(alias = "in_mem", alias = "memory")]
    InMemory(InMemoryStoreConfig),
    File(FileStoreConfig),
    Http(HttpStoreConfig),
}

/// 🎭 The many faces of a store. Dispatches to the concrete backend so the runner
/// stays blissfully ignorant of where data actually lives.
#[derive(Debug)]
pub enum StoreBackend {
    InMemory(InMemoryStore),
    File(FileStore),
    Http(HttpStore),
}

impl StoreBackend {
    /// 🚀 Open whatever the config points at.
    pub async fn from_config(config: &StoreConfig) -> Result<Self> {
        Ok(match config {
            StoreConfig::InMemory(cfg) => StoreBackend::InMemory(InMemoryStore::from_config(cfg)),
            StoreConfig::File(cfg) => StoreBackend::File(
                FileStore::open(cfg.clone())
                    .await
                    .context("💀 The file store would not open. The dump is the whole dataset; without it there is nothing to migrate.")?,
            ),
            StoreConfig::Http(cfg) => StoreBackend::Http(
                HttpStore::new(cfg.clone()).context("💀 The HTTP store could not be set up. Check the project id, dataset, and token.")?,
            ),
        })
    }
}

#[async_trait]
impl DocumentStore for StoreBackend {
    async fn query(&mut self, types: &[String], filter: &Filter) -> Result<Vec<Document>> {
        match self {
            StoreBackend::InMemory(store) => store.query(types, filter).await,
            StoreBackend::File(store) => store.query(types, filter).await,
            StoreBackend::Http(store) => store.query(types, filter).await,
        }
    }

    async fn commit(&mut self, transaction: &Transaction) -> Result<()> {
        match self {
            StoreBackend::InMemory(store) => store.commit(transaction).await,
            StoreBackend::File(store) => store.commit(transaction).await,
            StoreBackend::Http(store) => store.commit(transaction).await,
        }
    }

    async fn close(&mut self) -> Result<()> {
        match self {
            StoreBackend::InMemory(store) => store.close().await,
            StoreBackend::File(store) => store.close().await,
            StoreBackend::Http(store) => store.close().await,
        }
    }
}

/// 🎯 Local query semantics shared by the stores that hold documents in memory:
/// type match (empty = all), then filter, ordered by id for stable runs.
pub(crate) fn select<'a>(
    documents: impl Iterator<Item = &'a Document>,
    types: &[String],
    filter: &Filter,
) -> Vec<Document> {
    let mut selected: Vec<Document> = documents
        .filter(|doc| types.is_empty() || types.iter().any(|t| *t == doc.doc_type))
        .filter(|doc| filter.matches(doc))
        .cloned()
        .collect();
    selected.sort_by(|a, b| a.id.cmp(&b.id));
    selected
}
