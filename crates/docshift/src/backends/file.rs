//! 📂 Previously, on "Things That Could Go Wrong With A File"...
//!
//! Someone exported the whole dataset to NDJSON "just in case". Then someone
//! else wanted to rehearse the migration against it before touching production.
//! This store is that rehearsal stage: the dump is read once into memory, every
//! transaction commits atomically against the in-memory copy, and the whole dump
//! is written back on `close()`, but only if something actually changed.
//!
//! 🗜️ `.gz` at the end of the path? Then it's gzip in, gzip out.
//!
//! 🚰 file → (gunzip) → split on '\n' → Document per line → HashMap → ... → NDJSON → (gzip) → temp file → rename
//! 💀 Disk full on write-back → your problem now, but the original dump is untouched
//! 🦆

use std::collections::HashMap;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use async_trait::async_trait;
use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use serde::Deserialize;
use tracing::{debug, info};

use crate::backends::{DocumentStore, select};
use crate::document::{Document, DocumentId};
use crate::edits::Transaction;
use crate::filter::Filter;

// -- 📂 config lives next to the store that uses it
#[derive(Debug, Deserialize, Clone)]
pub struct FileStoreConfig {
    /// 📄 NDJSON dump, one document per line. `.gz` means gzip.
    #[serde(alias = "file_name")]
    pub path: PathBuf,
    /// ✍️ Where to write the result. Defaults to overwriting `path`.
    #[serde(default)]
    pub output: Option<PathBuf>,
}

/// 📂 An NDJSON dump pretending to be a document store.
#[derive(Debug)]
pub struct FileStore {
    config: FileStoreConfig,
    documents: HashMap<DocumentId, Document>,
    dirty: bool,
}

fn is_gzip(path: &Path) -> bool {
    path.extension().is_some_and(|ext| ext == "gz")
}

/// 🔪 Split raw NDJSON bytes into documents. Blank lines are skipped; a bad line is
/// an error naming its line number, because "somewhere in 80MB" is not a location.
pub(crate) fn parse_ndjson(bytes: &[u8]) -> Result<Vec<Document>> {
    let mut documents = Vec::new();
    let mut start = 0usize;
    let mut line_number = 0usize;
    let ends = memchr::memchr_iter(b'\n', bytes).chain(std::iter::once(bytes.len()));
    for end in ends {
        line_number += 1;
        let line = &bytes[start..end];
        start = end + 1;
        if line.iter().all(u8::is_ascii_whitespace) {
            continue;
        }
        let document: Document = serde_json::from_slice(line)
            .with_context(|| format!("💀 line {} of the dump is not a document", line_number))?;
        documents.push(document);
    }
    Ok(documents)
}

/// ✍️ Render documents as NDJSON, ordered by id so diffs between dumps stay readable.
pub(crate) fn render_ndjson<'a>(documents: impl Iterator<Item = &'a Document>) -> Result<Vec<u8>> {
    let mut ordered: Vec<&Document> = documents.collect();
    ordered.sort_by(|a, b| a.id.cmp(&b.id));
    let mut out = Vec::new();
    for document in ordered {
        serde_json::to_writer(&mut out, document)
            .with_context(|| format!("💀 document '{}' refused to serialize", document.id))?;
        out.push(b'\n');
    }
    Ok(out)
}

/// 🗜️ Read a whole file, gunzipping when the extension says so.
pub(crate) async fn read_maybe_gzip(path: &Path) -> Result<Vec<u8>> {
    let raw = tokio::fs::read(path).await.with_context(|| {
        format!(
            "💀 The door to '{}' would not budge. We knocked. We checked if it existed (it might not). \
             We checked permissions (they might be wrong). The door remained closed.",
            path.display()
        )
    })?;
    if !is_gzip(path) {
        return Ok(raw);
    }
    let mut decoded = Vec::with_capacity(raw.len() * 4);
    GzDecoder::new(raw.as_slice())
        .read_to_end(&mut decoded)
        .with_context(|| format!("💀 '{}' ends in .gz but is not gzip", path.display()))?;
    Ok(decoded)
}

/// 💾 Write bytes to `path` via a sibling temp file + rename, gzipping for `.gz`.
pub(crate) async fn write_maybe_gzip(path: &Path, bytes: Vec<u8>) -> Result<()> {
    let payload = if is_gzip(path) {
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(&bytes)?;
        encoder.finish().context("💀 gzip gave up halfway through")?
    } else {
        bytes
    };
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent)
            .await
            .with_context(|| format!("💀 could not create '{}'", parent.display()))?;
    }
    let mut staging = path.as_os_str().to_owned();
    staging.push(".partial");
    let staging = PathBuf::from(staging);
    tokio::fs::write(&staging, payload)
        .await
        .with_context(|| format!("💀 could not write '{}'. Disk full? Read-only? Cursed?", staging.display()))?;
    tokio::fs::rename(&staging, path)
        .await
        .with_context(|| format!("💀 could not move '{}' into place", path.display()))?;
    Ok(())
}

impl FileStore {
    /// 🚀 Load the dump into memory.
    pub async fn open(config: FileStoreConfig) -> Result<Self> {
        let bytes = read_maybe_gzip(&config.path).await?;
        let loaded = parse_ndjson(&bytes)
            .with_context(|| format!("💀 '{}' is not a clean NDJSON dump", config.path.display()))?;
        let documents: HashMap<DocumentId, Document> = loaded.into_iter().map(|doc| (doc.id.clone(), doc)).collect();
        info!("📂 loaded {} documents from '{}'", documents.len(), config.path.display());
        Ok(Self { config, documents, dirty: false })
    }

    fn output_path(&self) -> &Path {
        self.config.output.as_deref().unwrap_or(&self.config.path)
    }
}

#[async_trait]
impl DocumentStore for FileStore {
    async fn query(&mut self, types: &[String], filter: &Filter) -> Result<Vec<Document>> {
        Ok(select(self.documents.values(), types, filter))
    }

    async fn commit(&mut self, transaction: &Transaction) -> Result<()> {
        transaction.apply_to(&mut self.documents)?;
        self.dirty = true;
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        if !self.dirty {
            debug!("📂 nothing changed, leaving '{}' alone", self.config.path.display());
            return Ok(());
        }
        let bytes = render_ndjson(self.documents.values())?;
        let output = self.output_path().to_path_buf();
        write_maybe_gzip(&output, bytes).await?;
        info!("💾 wrote {} documents to '{}'", self.documents.len(), output.display());
        self.dirty = false;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::edits::{FieldEdit, Mutation};
    use serde_json::json;

    const DUMP: &str = concat!(
        r#"{"_id":"p1","_type":"project","mainImage":{"asset":"i1"}}"#,
        "\n\n",
        r#"{"_id":"drafts.a1","_type":"person","firstName":"Markus"}"#,
        "\n"
    );

    #[test]
    fn the_one_where_a_bad_line_is_named_and_shamed() {
        let err = parse_ndjson(b"{\"_id\":\"a\",\"_type\":\"t\"}\nnot json\n").unwrap_err();
        assert!(format!("{:#}", err).contains("line 2"));
    }

    #[test]
    fn the_one_where_the_last_line_needs_no_newline() -> Result<()> {
        let docs = parse_ndjson(b"{\"_id\":\"a\",\"_type\":\"t\"}\n{\"_id\":\"b\",\"_type\":\"t\"}")?;
        assert_eq!(docs.len(), 2);
        Ok(())
    }

    #[tokio::test]
    async fn the_one_where_changes_survive_a_close_and_reopen() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("dump.ndjson");
        tokio::fs::write(&path, DUMP).await?;

        let mut store = FileStore::open(FileStoreConfig { path: path.clone(), output: None }).await?;
        assert_eq!(store.query(&["person".to_string()], &Filter::default()).await?.len(), 1);
        store
            .commit(&Transaction::new(
                "p1".into(),
                vec![Mutation::Patch { id: "p1".into(), if_revision: None, edits: vec![FieldEdit::set("startYear", json!(2019))] }],
            ))
            .await?;
        store.close().await?;

        let mut reopened = FileStore::open(FileStoreConfig { path, output: None }).await?;
        let projects = reopened.query(&["project".to_string()], &Filter::default()).await?;
        assert_eq!(projects[0].get("startYear"), Some(&json!(2019)));
        Ok(())
    }

    #[tokio::test]
    async fn the_one_where_gzip_goes_in_and_gzip_comes_out() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let input = dir.path().join("dump.ndjson.gz");
        let output = dir.path().join("out").join("migrated.ndjson.gz");
        write_maybe_gzip(&input, DUMP.as_bytes().to_vec()).await?;

        let mut store = FileStore::open(FileStoreConfig { path: input, output: Some(output.clone()) }).await?;
        store.delete(&DocumentId::new("drafts.a1")).await?;
        store.close().await?;

        let written = parse_ndjson(&read_maybe_gzip(&output).await?)?;
        assert_eq!(written.len(), 1);
        assert_eq!(written[0].id.as_str(), "p1");
        Ok(())
    }

    #[tokio::test]
    async fn the_one_where_an_untouched_dump_is_never_rewritten() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("dump.ndjson");
        let output = dir.path().join("never.ndjson");
        tokio::fs::write(&path, DUMP).await?;
        let mut store = FileStore::open(FileStoreConfig { path, output: Some(output.clone()) }).await?;
        store.close().await?;
        assert!(!output.exists());
        Ok(())
    }
}
