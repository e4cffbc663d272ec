//! 🧾 Run reports: what happened, to whom, and why.
//!
//! The report is emitted at the end of every run that got past setup, whether
//! every document went through or half of them exploded. It counts, it keeps
//! the failure causes with their document ids, and in a dry run it keeps the
//! transactions that WOULD have been committed.
//!
//! ```text
//!   attempted = succeeded + failed
//!   succeeded = committed + unchanged      (planned instead of committed on a dry run)
//! ```

use std::path::Path;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use comfy_table::{Cell, ContentArrangement, Table, presets::UTF8_FULL};
use serde::Serialize;

use crate::document::DocumentId;
use crate::edits::{Mutation, Transaction};
use crate::progress::format_number;
use crate::transforms::RuleError;

/// 🚦 What happened to one document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentStatus {
    Committed,
    /// 📝 dry run: a transaction was computed but not sent
    Planned,
    /// 😴 the rule had nothing to do
    Unchanged,
    Failed,
}

/// 🗂️ Failure buckets, so "the rule choked" and "the store said no" read differently.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    Rule,
    Integrity,
    Transaction,
}

impl From<&RuleError> for FailureKind {
    fn from(error: &RuleError) -> Self {
        if error.is_integrity_violation() { FailureKind::Integrity } else { FailureKind::Rule }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DocumentFailure {
    pub document_id: DocumentId,
    pub kind: FailureKind,
    pub cause: String,
}

/// 🏁 How the run ended, once it got past setup. A setup failure (aborted run) is
/// an `Err` from the runner and never produces a report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunOutcome {
    Clean,
    PartialFailure,
    Cancelled,
}

impl RunOutcome {
    /// 🚪 Process exit status: 0 clean, 2 partial failure, 130 cancelled.
    /// An aborted run exits 1 from the CLI's error path.
    pub fn exit_code(self) -> i32 {
        match self {
            RunOutcome::Clean => 0,
            RunOutcome::PartialFailure => 2,
            RunOutcome::Cancelled => 130,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub migration: String,
    pub rule: String,
    pub dry_run: bool,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    /// 📸 documents in the fetch snapshot
    pub candidates: usize,
    pub attempted: usize,
    pub succeeded: usize,
    pub committed: usize,
    pub unchanged: usize,
    pub failed: usize,
    pub cancelled: bool,
    pub failures: Vec<DocumentFailure>,
    /// 📝 dry run only
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub planned: Vec<Transaction>,
}

impl RunReport {
    pub fn new(migration: impl Into<String>, rule: impl Into<String>, dry_run: bool) -> Self {
        Self {
            migration: migration.into(),
            rule: rule.into(),
            dry_run,
            started_at: Utc::now(),
            finished_at: None,
            candidates: 0,
            attempted: 0,
            succeeded: 0,
            committed: 0,
            unchanged: 0,
            failed: 0,
            cancelled: false,
            failures: Vec::new(),
            planned: Vec::new(),
        }
    }

    pub(crate) fn record_committed(&mut self) {
        self.attempted += 1;
        self.succeeded += 1;
        self.committed += 1;
    }

    pub(crate) fn record_planned(&mut self, transaction: Transaction) {
        self.attempted += 1;
        self.succeeded += 1;
        self.planned.push(transaction);
    }

    pub(crate) fn record_unchanged(&mut self) {
        self.attempted += 1;
        self.succeeded += 1;
        self.unchanged += 1;
    }

    pub(crate) fn record_failure(&mut self, document_id: DocumentId, kind: FailureKind, cause: String) {
        self.attempted += 1;
        self.failed += 1;
        self.failures.push(DocumentFailure { document_id, kind, cause });
    }

    pub(crate) fn finish(&mut self, cancelled: bool) {
        self.cancelled = cancelled;
        self.finished_at = Some(Utc::now());
    }

    pub fn outcome(&self) -> RunOutcome {
        if self.cancelled {
            RunOutcome::Cancelled
        } else if self.failed > 0 {
            RunOutcome::PartialFailure
        } else {
            RunOutcome::Clean
        }
    }

    /// 🍽️ End-of-run summary, plus one row per failure.
    pub fn to_table(&self) -> Table {
        let mut table = Table::new();
        table.load_preset(UTF8_FULL);
        table.set_content_arrangement(ContentArrangement::Dynamic);
        table.set_header(vec![Cell::new(format!("migration: {}", self.migration)), Cell::new(self.rule.clone())]);

        let succeeded_label = if self.dry_run { "planned" } else { "committed" };
        let succeeded_count = if self.dry_run { self.planned.len() } else { self.committed };
        let rows: [(&str, usize); 5] = [
            ("candidates", self.candidates),
            ("attempted", self.attempted),
            (succeeded_label, succeeded_count),
            ("unchanged", self.unchanged),
            ("failed", self.failed),
        ];
        for (label, count) in rows {
            table.add_row(vec![Cell::new(label), Cell::new(format_number(count as u64))]);
        }
        table.add_row(vec![Cell::new("outcome"), Cell::new(format!("{:?}", self.outcome()))]);
        for failure in &self.failures {
            table.add_row(vec![
                Cell::new(format!("💀 {} ({:?})", failure.document_id, failure.kind)),
                Cell::new(&failure.cause),
            ]);
        }
        table
    }

    /// 📝 Dry run only: one row per planned transaction, one line per mutation.
    /// `None` when nothing was planned.
    pub fn planned_table(&self) -> Option<Table> {
        if self.planned.is_empty() {
            return None;
        }
        let mut table = Table::new();
        table.load_preset(UTF8_FULL);
        table.set_content_arrangement(ContentArrangement::Dynamic);
        table.set_header(vec![Cell::new("document"), Cell::new("would commit")]);
        for transaction in &self.planned {
            let lines: Vec<String> = transaction.mutations.iter().map(Mutation::describe).collect();
            table.add_row(vec![Cell::new(&transaction.document_id), Cell::new(lines.join("\n"))]);
        }
        Some(table)
    }

    /// 💾 Write the report as pretty JSON.
    pub async fn write_json(&self, path: &Path) -> Result<()> {
        let bytes = serde_json::to_vec_pretty(self).context("💀 the run report refused to serialize")?;
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(path, bytes)
            .await
            .with_context(|| format!("💀 could not write the run report to '{}'", path.display()))
    }
}
