//! 💾 Backups: dump everything before touching anything.
//!
//! 🎬 *[someone ran the person→artist migration against production. it worked.
//! then someone asked "what did Markus's bio say before?" and the room got quiet.]*
//!
//! Caller-side convenience, not part of the runner's contract. One directory per
//! snapshot:
//!
//! ```text
//!   <backup_dir>/<timestamp>/
//!     ├─ <type>.json          one pretty JSON array per document type
//!     ├─ all-documents.json   everything, one array
//!     └─ backup-report.json   manifest: timestamp, totals, per-type counts (largest first)
//! ```
//!
//! With gzip on, every file gets a `.gz` suffix and is compressed.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::info;

use crate::backends::DocumentStore;
use crate::backends::file::write_maybe_gzip;
use crate::document::Document;
use crate::filter::Filter;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TypeCount {
    #[serde(rename = "type")]
    pub doc_type: String,
    pub count: usize,
}

/// 🧾 What a snapshot contains.
#[derive(Debug, Clone, Serialize)]
pub struct BackupManifest {
    pub timestamp: DateTime<Utc>,
    pub total_documents: usize,
    pub documents_by_type: Vec<TypeCount>,
    pub backup_path: PathBuf,
}

/// 🧹 Type names become file names; anything that isn't a safe filename char becomes `_`.
fn file_stem(doc_type: &str) -> String {
    doc_type
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.' { c } else { '_' })
        .collect()
}

fn file_name(stem: &str, gzip: bool) -> String {
    if gzip { format!("{}.json.gz", stem) } else { format!("{}.json", stem) }
}

async fn write_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<()> {
    let bytes = serde_json::to_vec_pretty(value).context("💀 backup payload refused to serialize")?;
    write_maybe_gzip(path, bytes).await
}

/// 📊 Per-type counts, largest first, ties by name so the manifest is stable.
pub(crate) fn count_by_type(documents: &[Document]) -> Vec<TypeCount> {
    let mut counts: BTreeMap<&str, usize> = BTreeMap::new();
    for doc in documents {
        *counts.entry(doc.doc_type.as_str()).or_default() += 1;
    }
    let mut by_type: Vec<TypeCount> = counts
        .into_iter()
        .map(|(doc_type, count)| TypeCount { doc_type: doc_type.to_string(), count })
        .collect();
    by_type.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.doc_type.cmp(&b.doc_type)));
    by_type
}

/// 💾 Snapshot every document in the store into a fresh timestamped directory.
pub async fn snapshot<S: DocumentStore + ?Sized>(store: &mut S, backup_dir: &Path, gzip: bool) -> Result<BackupManifest> {
    let timestamp = Utc::now();
    let backup_path = backup_dir.join(timestamp.format("%Y-%m-%dT%H-%M-%S%.3fZ").to_string());
    tokio::fs::create_dir_all(&backup_path)
        .await
        .with_context(|| format!("💀 could not create backup directory '{}'", backup_path.display()))?;

    let documents = store
        .query(&[], &Filter::default())
        .await
        .context("💀 could not read the store for a backup. Not migrating without one.")?;

    let mut grouped: BTreeMap<&str, Vec<&Document>> = BTreeMap::new();
    for doc in &documents {
        grouped.entry(doc.doc_type.as_str()).or_default().push(doc);
    }
    for (doc_type, docs) in &grouped {
        write_json(&backup_path.join(file_name(&file_stem(doc_type), gzip)), docs).await?;
    }
    write_json(&backup_path.join(file_name("all-documents", gzip)), &documents).await?;

    let manifest = BackupManifest {
        timestamp,
        total_documents: documents.len(),
        documents_by_type: count_by_type(&documents),
        backup_path: backup_path.clone(),
    };
    write_json(&backup_path.join(file_name("backup-report", gzip)), &manifest).await?;
    info!("💾 backed up {} documents to '{}'", manifest.total_documents, backup_path.display());
    Ok(manifest)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::InMemoryStore;
    use crate::backends::file::read_maybe_gzip;
    use serde_json::json;

    fn store() -> InMemoryStore {
        InMemoryStore::new([
            Document::new("p1", "project"),
            Document::new("p2", "project"),
            Document::new("a1", "person").with_field("bio", json!("before")),
            Document::new("s1", "sanity.imageAsset"),
        ])
    }

    #[test]
    fn the_one_where_the_biggest_type_goes_first() {
        let counts = count_by_type(&[
            Document::new("a", "person"),
            Document::new("b", "project"),
            Document::new("c", "project"),
            Document::new("d", "artist"),
        ]);
        let names: Vec<&str> = counts.iter().map(|c| c.doc_type.as_str()).collect();
        assert_eq!(names, vec!["project", "artist", "person"]);
    }

    #[tokio::test]
    async fn the_one_where_everything_gets_a_copy() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let mut store = store();
        let manifest = snapshot(&mut store, dir.path(), false).await?;

        assert_eq!(manifest.total_documents, 4);
        assert_eq!(manifest.documents_by_type[0], TypeCount { doc_type: "project".into(), count: 2 });
        let people: serde_json::Value =
            serde_json::from_slice(&tokio::fs::read(manifest.backup_path.join("person.json")).await?)?;
        assert_eq!(people[0]["bio"], "before");
        assert!(manifest.backup_path.join("sanity.imageAsset.json").exists());
        assert!(manifest.backup_path.join("all-documents.json").exists());

        let report: serde_json::Value =
            serde_json::from_slice(&tokio::fs::read(manifest.backup_path.join("backup-report.json")).await?)?;
        assert_eq!(report["total_documents"], 4);
        assert_eq!(report["documents_by_type"][0]["type"], "project");
        Ok(())
    }

    #[tokio::test]
    async fn the_one_where_backups_can_be_squeezed() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let manifest = snapshot(&mut store(), dir.path(), true).await?;
        let all = read_maybe_gzip(&manifest.backup_path.join("all-documents.json.gz")).await?;
        let parsed: Vec<Document> = serde_json::from_slice(&all)?;
        assert_eq!(parsed.len(), 4);
        Ok(())
    }
}
