//! 📡 The hosted content store, over HTTP.
//!
//! Two endpoints, that's the whole relationship:
//!
//! ```text
//!   GET  {base}/v{api}/data/query/{dataset}?query=<GROQ>&$types=<json>   → {"result": [...]}
//!   POST {base}/v{api}/data/mutate/{dataset}   {"mutations": [...]}       → one transaction
//! ```
//!
//! A [`Transaction`] becomes exactly one mutate request, and the server applies
//! it all-or-nothing. Field edits are sent one patch per edit so the server sees
//! them in the order the rule emitted them. A patch that carries the revision
//! the rule saw goes out with `ifRevisionID`, so a document edited since the
//! fetch comes back as a rejection instead of being overwritten.
//!
//! 🔄 No retries here. Timeouts and non-2xx responses surface as errors; the
//! runner decides what a failure means.

use std::time::Duration;

use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Map, Value, json};
use tracing::{debug, trace};

use crate::backends::DocumentStore;
use crate::document::Document;
use crate::edits::{FieldEdit, Mutation, Transaction};
use crate::filter::Filter;

fn default_api_version() -> String {
    "2023-05-03".to_string()
}

fn default_connect_timeout_secs() -> u64 {
    10
}

fn default_request_timeout_secs() -> u64 {
    30
}

#[derive(Debug, Deserialize, Clone)]
pub struct HttpStoreConfig {
    /// 🪪 Project id; the API host is derived from it unless `base_url` is set.
    #[serde(default)]
    pub project_id: Option<String>,
    /// 📡 Explicit API root, e.g. for a proxy or a test server.
    #[serde(default)]
    pub base_url: Option<String>,
    pub dataset: String,
    /// 🔒 Bearer token with write access. Reads on a public dataset work without it.
    #[serde(default)]
    pub token: Option<String>,
    #[serde(default = "default_api_version")]
    pub api_version: String,
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

#[derive(Debug)]
pub struct HttpStore {
    client: reqwest::Client,
    config: HttpStoreConfig,
    base_url: String,
}

#[derive(Debug, Deserialize)]
struct QueryResponse {
    result: Vec<Document>,
}

impl HttpStore {
    pub fn new(config: HttpStoreConfig) -> Result<Self> {
        let base_url = match (&config.base_url, &config.project_id) {
            (Some(url), _) => url.trim_end_matches('/').to_string(),
            (None, Some(project)) => format!("https://{}.api.sanity.io", project),
            (None, None) => bail!("💀 the HTTP store needs either 'base_url' or 'project_id'. We can't phone a store with no number."),
        };
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .context("💀 The HTTP client refused to be born. Probably TLS. It's usually TLS.")?;
        Ok(Self { client, config, base_url })
    }

    fn endpoint(&self, action: &str) -> String {
        format!("{}/v{}/data/{}/{}", self.base_url, self.config.api_version, action, self.config.dataset)
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.config.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }
}

/// 📜 `*[_type in $types && (<filter>)]`, minus whichever half is trivially true.
pub(crate) fn groq_for(types: &[String], filter: &Filter) -> String {
    let filter_expression = filter.to_query_expression();
    match (types.is_empty(), filter_expression.as_str()) {
        (true, "true") => "*".to_string(),
        (true, _) => format!("*[{}]", filter_expression),
        (false, "true") => "*[_type in $types]".to_string(),
        (false, _) => format!("*[_type in $types && ({})]", filter_expression),
    }
}

fn single_field(key: &str, value: &Value) -> Value {
    let mut map = Map::new();
    map.insert(key.to_string(), value.clone());
    Value::Object(map)
}

/// 🧾 Translate our mutations into the store's mutation JSON.
pub(crate) fn wire_mutations(transaction: &Transaction) -> Result<Vec<Value>> {
    let mut wire = Vec::with_capacity(transaction.mutations.len());
    for mutation in &transaction.mutations {
        match mutation {
            Mutation::Patch { id, if_revision, edits } => {
                for (index, edit) in edits.iter().enumerate() {
                    let mut patch = match edit {
                        FieldEdit::Set { path, value } => json!({"id": id, "set": single_field(path.as_str(), value)}),
                        FieldEdit::SetIfMissing { path, value } => {
                            json!({"id": id, "setIfMissing": single_field(path.as_str(), value)})
                        }
                        FieldEdit::Unset { path } => json!({"id": id, "unset": [path]}),
                    };
                    // -- 🕰️ the guard rides on the first patch only: the transaction is atomic,
                    // so one check at the door covers every edit behind it
                    if let (0, Some(revision)) = (index, if_revision) {
                        patch["ifRevisionID"] = json!(revision);
                    }
                    wire.push(json!({ "patch": patch }));
                }
            }
            Mutation::Create(doc) => wire.push(single_field("create", &doc.to_value()?)),
            Mutation::CreateOrReplace(doc) => wire.push(single_field("createOrReplace", &doc.to_value()?)),
            Mutation::CreateIfNotExists(doc) => wire.push(single_field("createIfNotExists", &doc.to_value()?)),
            Mutation::Delete { id } => wire.push(json!({ "delete": { "id": id } })),
        }
    }
    Ok(wire)
}

#[async_trait]
impl DocumentStore for HttpStore {
    async fn query(&mut self, types: &[String], filter: &Filter) -> Result<Vec<Document>> {
        let groq = groq_for(types, filter);
        let mut params = vec![("query".to_string(), groq.clone())];
        if !types.is_empty() {
            params.push(("$types".to_string(), serde_json::to_string(types)?));
        }
        debug!("📡 query: {}", groq);
        let response = self
            .authorize(self.client.get(self.endpoint("query")).query(&params))
            .send()
            .await
            .context("💀 The query never reached the store. Check connectivity, the project id, and your horoscope.")?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            bail!("💀 the store answered the query with {}: {}", status, body);
        }
        let parsed: QueryResponse = response
            .json()
            .await
            .context("💀 the store answered, but not with a list of documents")?;
        Ok(parsed.result)
    }

    async fn commit(&mut self, transaction: &Transaction) -> Result<()> {
        if transaction.is_empty() {
            return Ok(());
        }
        let mutations = wire_mutations(transaction)?;
        let body = json!({ "mutations": mutations });
        let response = self
            .authorize(
                self.client
                    .post(self.endpoint("mutate"))
                    .query(&[("returnIds", "false"), ("visibility", "sync")])
                    .json(&body),
            )
            .send()
            .await
            .with_context(|| format!("💀 the transaction for '{}' never made it to the store", transaction.document_id))?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            bail!("💀 the store rejected the transaction for '{}' with {}: {}", transaction.document_id, status, body);
        }
        trace!("✅ {} landed", transaction.document_id);
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        // -- 🗑️ nothing buffered; the connection pool drops with the client
        Ok(())
    }
}
