//! 🏃 The migration runner.
//!
//! 🎬 COLD OPEN: INT. SERVER ROOM, 2:14 AM
//!
//! Four hundred projects. One of them has `startDate: 2019` (a number, because
//! of course it does). The old script hit it, threw, and stopped. The other
//! three hundred and ninety-nine stayed un-migrated until someone noticed on
//! Monday. This runner does not stop. It writes down what went wrong, and moves
//! on to the next document.
//!
//! ## The loop 🔄
//!
//! ```text
//!   Idle ─▶ Fetching ─▶ Processing(0) ─▶ Committing(0) ─▶ Processing(1) ─▶ ... ─▶ Done
//!              │
//!              └─ store unreachable / query rejected ─▶ Aborted (Err, no report)
//! ```
//!
//! - Candidates are fetched ONCE. Documents created mid-run are not visited.
//! - One document at a time. One transaction per document. All or nothing.
//! - Rule failures and commit failures become report entries, not errors.
//! - Cancellation is checked between documents, never mid-commit.
//! - A rule outcome that would change nothing is never sent to the store,
//!   which is what keeps a second run at zero commits.

use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::{Context, Result, bail};
use serde::Deserialize;
use tracing::{debug, error, info, warn};

use crate::backends::DocumentStore;
use crate::document::Document;
use crate::edits::apply_edits;
use crate::filter::Filter;
use crate::progress::MigrationProgress;
use crate::reference_map::{ReferenceMap, ReferenceMapConfig};
use crate::report::{DocumentStatus, FailureKind, RunReport};
use crate::transforms::{IntegrityPolicy, MigrationRule, RuleContext, RuleError, RuleOutcome, TransformRule};

fn default_migration_name() -> String {
    "migration".to_string()
}

/// 🔧 One migration: what to select, what to do to it, and how careful to be.
#[derive(Debug, Deserialize, Clone)]
pub struct MigrationConfig {
    #[serde(default = "default_migration_name")]
    pub name: String,
    #[serde(alias = "types")]
    pub document_types: Vec<String>,
    #[serde(default)]
    pub filter: Filter,
    #[serde(default)]
    pub dry_run: bool,
    pub rule: MigrationRule,
    #[serde(default)]
    pub reference_map: ReferenceMapConfig,
    #[serde(default)]
    pub integrity: IntegrityPolicy,
}

/// 🛑 Shared stop switch, flipped by whoever wants the run to end early (ctrl-c, a test).
#[derive(Debug, Clone, Default)]
pub struct CancellationFlag(Arc<AtomicBool>);

impl CancellationFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// 🚦 Where the runner is right now.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunPhase {
    Idle,
    Fetching,
    Processing(usize),
    Committing(usize),
    Done,
    Aborted,
}

/// 🔍 Does any rule in this tree read references through the map?
fn rewrites_references(rule: &MigrationRule) -> bool {
    match rule {
        MigrationRule::RewriteReferences(_) => true,
        MigrationRule::Composite(composite) => composite.rules.iter().any(rewrites_references),
        MigrationRule::Reclassify(reclassify) => reclassify.rules.iter().any(rewrites_references),
        _ => false,
    }
}

#[derive(Debug)]
pub struct MigrationRunner<S: DocumentStore> {
    store: S,
    config: MigrationConfig,
    reference_map: ReferenceMap,
    cancellation: CancellationFlag,
    show_progress: bool,
    phase: RunPhase,
}

impl<S: DocumentStore> MigrationRunner<S> {
    pub fn new(store: S, config: MigrationConfig, reference_map: ReferenceMap) -> Self {
        Self {
            store,
            config,
            reference_map,
            cancellation: CancellationFlag::new(),
            show_progress: false,
            phase: RunPhase::Idle,
        }
    }

    /// 🚀 Build a runner, loading the reference map the config points at.
    pub fn from_config(store: S, config: MigrationConfig) -> Result<Self> {
        let reference_map = ReferenceMap::from_config(&config.reference_map)
            .with_context(|| format!("💀 migration '{}' could not load its reference map", config.name))?;
        Ok(Self::new(store, config, reference_map))
    }

    pub fn with_cancellation(mut self, cancellation: CancellationFlag) -> Self {
        self.cancellation = cancellation;
        self
    }

    pub fn with_progress(mut self, show_progress: bool) -> Self {
        self.show_progress = show_progress;
        self
    }

    pub fn phase(&self) -> RunPhase {
        self.phase
    }

    /// 🔓 Hand the store back, e.g. to inspect it after a run.
    pub fn into_store(self) -> S {
        self.store
    }

    fn enter(&mut self, phase: RunPhase) {
        debug!("🚦 {:?} → {:?}", self.phase, phase);
        self.phase = phase;
    }

    /// 🏃 Run the migration once.
    ///
    /// `Err` means aborted: bad rule config, or the store could not be read before
    /// any document was touched. Everything after that ends in a report.
    pub async fn run(&mut self) -> Result<RunReport> {
        match self.run_inner().await {
            Ok(report) => Ok(report),
            Err(err) => {
                self.enter(RunPhase::Aborted);
                error!("💀 migration '{}' aborted: {:#}", self.config.name, err);
                Err(err)
            }
        }
    }

    async fn run_inner(&mut self) -> Result<RunReport> {
        if self.config.document_types.is_empty() {
            bail!("💀 migration '{}' has no document_types. Migrating 'everything' is not a plan.", self.config.name);
        }
        self.config
            .rule
            .validate()
            .with_context(|| format!("💀 migration '{}' has a broken rule", self.config.name))?;

        self.enter(RunPhase::Fetching);
        let candidates = self
            .store
            .query(&self.config.document_types, &self.config.filter)
            .await
            .context("💀 could not fetch candidates. Nothing was touched.")?;
        let known_ids = self.snapshot_known_ids().await?;
        info!(
            "🏃 migration '{}' ({}): {} candidate(s) of {:?}{}",
            self.config.name,
            self.config.rule.name(),
            candidates.len(),
            self.config.document_types,
            if self.config.dry_run { ", dry run" } else { "" }
        );

        let mut report = RunReport::new(self.config.name.clone(), self.config.rule.name(), self.config.dry_run);
        report.candidates = candidates.len();
        let mut progress = MigrationProgress::new(self.config.name.clone(), candidates.len() as u64, self.show_progress);

        let mut cancelled = false;
        for (index, doc) in candidates.iter().enumerate() {
            if self.cancellation.is_cancelled() {
                warn!("🛑 cancelled after {} of {} documents", index, candidates.len());
                cancelled = true;
                break;
            }
            self.enter(RunPhase::Processing(index));
            let status = self.process(index, doc, known_ids.as_ref(), &mut report).await;
            progress.record(status);
        }
        progress.finish();

        self.enter(RunPhase::Done);
        self.store.close().await.context("💀 the store failed to close cleanly")?;
        report.finish(cancelled);
        info!(
            "🏁 migration '{}': {} attempted, {} succeeded, {} failed",
            self.config.name, report.attempted, report.succeeded, report.failed
        );
        Ok(report)
    }

    async fn snapshot_known_ids(&mut self) -> Result<Option<HashSet<String>>> {
        if self.config.integrity == IntegrityPolicy::Ignore || !rewrites_references(&self.config.rule) {
            return Ok(None);
        }
        let everything = self
            .store
            .query(&[], &Filter::default())
            .await
            .context("💀 could not snapshot existing ids for the integrity check")?;
        Ok(Some(everything.iter().map(|doc| doc.id.canonical().to_string()).collect()))
    }

    async fn process(
        &mut self,
        index: usize,
        doc: &Document,
        known_ids: Option<&HashSet<String>>,
        report: &mut RunReport,
    ) -> DocumentStatus {
        let mut ctx = RuleContext::new(&self.reference_map);
        if let Some(known) = known_ids {
            ctx = ctx.with_integrity(known, self.config.integrity);
        }

        let outcome = match self.config.rule.apply(doc, &ctx).and_then(|outcome| drop_noop_edits(doc, outcome)) {
            Ok(outcome) => outcome,
            Err(err) => {
                warn!("⚠️ {} skipped: {}", doc.id, err);
                report.record_failure(doc.id.clone(), FailureKind::from(&err), err.to_string());
                return DocumentStatus::Failed;
            }
        };
        let Some(transaction) = outcome.into_transaction(doc) else {
            report.record_unchanged();
            return DocumentStatus::Unchanged;
        };

        if self.config.dry_run {
            debug!("📝 {} would get {} mutation(s)", doc.id, transaction.mutations.len());
            report.record_planned(transaction);
            return DocumentStatus::Planned;
        }

        self.enter(RunPhase::Committing(index));
        match self.store.commit(&transaction).await {
            Ok(()) => {
                debug!("✅ {} committed", doc.id);
                report.record_committed();
                DocumentStatus::Committed
            }
            Err(err) => {
                warn!("⚠️ {} not committed: {:#}", doc.id, err);
                report.record_failure(doc.id.clone(), FailureKind::Transaction, format!("{:#}", err));
                DocumentStatus::Failed
            }
        }
    }
}

/// 🧪 Dry-apply edits to a copy. If nothing would change, the outcome is a no-op.
/// Edits that can't apply at all (a path through a string) are a rule failure here
/// rather than a store rejection later.
fn drop_noop_edits(doc: &Document, outcome: RuleOutcome) -> Result<RuleOutcome, RuleError> {
    let RuleOutcome::Edits(edits) = outcome else {
        return Ok(outcome);
    };
    // -- 🪞 dry-apply on a scratch copy; an edit list that changes nothing is a NoOp,
    // -- so a second run over already-migrated documents commits zero transactions
    let mut scratch = doc.fields.clone();
    match apply_edits(&mut scratch, &edits) {
        Ok(true) => Ok(RuleOutcome::Edits(edits)),
        Ok(false) => Ok(RuleOutcome::NoOp),
        Err(err) => Err(RuleError::InvalidValue { field: "edits".to_string(), reason: format!("{:#}", err) }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::InMemoryStore;
    use crate::document::DocumentId;
    use crate::edits::{FieldEdit, Mutation, Transaction};
    use crate::report::RunOutcome;
    use crate::transforms::{Composite, DeriveYear, Reclassify, RenameField, RewriteReferences};
    use async_trait::async_trait;
    use serde_json::json;

    fn legacy_projects() -> MigrationConfig {
        MigrationConfig {
            name: "legacy-projects".into(),
            document_types: vec!["project".into()],
            filter: Filter::default(),
            dry_run: false,
            rule: MigrationRule::Composite(Composite {
                rules: vec![
                    MigrationRule::DeriveYear(DeriveYear { from: "startDate".into(), to: "startYear".into() }),
                    MigrationRule::RenameField(RenameField { from: "mainImage".into(), to: "coverImage".into() }),
                ],
            }),
            reference_map: ReferenceMapConfig::default(),
            integrity: IntegrityPolicy::Warn,
        }
    }

    fn projects() -> InMemoryStore {
        InMemoryStore::new([
            Document::new("p1", "project").with_field("startDate", json!("2019-01-01")),
            Document::new("p2", "project").with_field("mainImage", json!("img-2")),
            Document::new("p3", "project").with_field("startDate", json!("sometime in 2021")),
            Document::new("p4", "project").with_field("startDate", json!("2024-09-30")),
            Document::new("a1", "person"),
        ])
    }

    #[tokio::test]
    async fn the_one_where_one_bad_document_does_not_sink_the_rest() -> Result<()> {
        let store = projects();
        let mut runner = MigrationRunner::new(store.clone(), legacy_projects(), ReferenceMap::default());
        let report = runner.run().await?;

        assert_eq!(report.candidates, 4);
        assert_eq!(report.attempted, 4);
        assert_eq!(report.succeeded, 3);
        assert_eq!(report.failed, 1);
        assert_eq!(report.failures[0].document_id, DocumentId::new("p3"));
        assert_eq!(report.failures[0].kind, FailureKind::Rule);
        assert_eq!(report.outcome(), RunOutcome::PartialFailure);
        assert_eq!(runner.phase(), RunPhase::Done);

        assert_eq!(store.get("p1").await.and_then(|d| d.get("startYear").cloned()), Some(json!(2019)));
        assert_eq!(store.get("p2").await.and_then(|d| d.get("coverImage").cloned()), Some(json!("img-2")));
        assert_eq!(store.get("p4").await.and_then(|d| d.get("startYear").cloned()), Some(json!(2024)));
        assert!(store.get("p3").await.is_some_and(|d| d.get("startYear").is_none()));
        Ok(())
    }

    #[tokio::test]
    async fn the_one_where_the_second_run_has_nothing_to_say() -> Result<()> {
        let store = InMemoryStore::new([
            Document::new("p1", "project").with_field("startDate", json!("2019-01-01")),
            Document::new("p2", "project").with_field("mainImage", json!("img-2")).with_field("coverImage", json!("kept")),
        ]);
        MigrationRunner::new(store.clone(), legacy_projects(), ReferenceMap::default()).run().await?;
        let after_first = store.snapshot().await;
        let commits_after_first = store.commit_count().await;

        let second = MigrationRunner::new(store.clone(), legacy_projects(), ReferenceMap::default()).run().await?;
        assert_eq!(second.committed, 0);
        assert_eq!(second.unchanged, 2);
        assert_eq!(store.snapshot().await, after_first);
        assert_eq!(store.commit_count().await, commits_after_first);
        assert_eq!(store.get("p2").await.and_then(|d| d.get("coverImage").cloned()), Some(json!("kept")));
        Ok(())
    }

    #[tokio::test]
    async fn the_one_where_dry_run_only_dreams() -> Result<()> {
        let store = projects();
        let before = store.snapshot().await;
        let mut config = legacy_projects();
        config.dry_run = true;
        let report = MigrationRunner::new(store.clone(), config, ReferenceMap::default()).run().await?;

        assert_eq!(report.planned.len(), 3);
        assert_eq!(report.committed, 0);
        assert_eq!(store.commit_count().await, 0);
        assert_eq!(store.snapshot().await, before);
        Ok(())
    }

    #[tokio::test]
    async fn the_one_where_the_store_says_no_and_the_run_goes_on() -> Result<()> {
        let store = projects();
        store.reject_commits_for("p1").await;
        let report = MigrationRunner::new(store.clone(), legacy_projects(), ReferenceMap::default()).run().await?;
        let kinds: Vec<FailureKind> = report.failures.iter().map(|f| f.kind).collect();
        assert_eq!(kinds, vec![FailureKind::Transaction, FailureKind::Rule]);
        assert_eq!(report.committed, 2);
        Ok(())
    }

    #[derive(Debug)]
    struct UnreachableStore;

    #[async_trait]
    impl DocumentStore for UnreachableStore {
        async fn query(&mut self, _types: &[String], _filter: &Filter) -> Result<Vec<Document>> {
            bail!("connection refused")
        }

        async fn commit(&mut self, _transaction: &Transaction) -> Result<()> {
            bail!("connection refused")
        }

        async fn close(&mut self) -> Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn the_one_where_an_unreachable_store_aborts_before_anything_happens() {
        let mut runner = MigrationRunner::new(UnreachableStore, legacy_projects(), ReferenceMap::default());
        let err = runner.run().await.unwrap_err();
        assert!(format!("{:#}", err).contains("connection refused"));
        assert_eq!(runner.phase(), RunPhase::Aborted);
    }

    #[tokio::test]
    async fn the_one_where_cancel_stops_at_the_document_boundary() -> Result<()> {
        let store = projects();
        let flag = CancellationFlag::new();
        flag.cancel();
        let report = MigrationRunner::new(store.clone(), legacy_projects(), ReferenceMap::default())
            .with_cancellation(flag)
            .run()
            .await?;
        assert_eq!(report.attempted, 0);
        assert_eq!(report.outcome(), RunOutcome::Cancelled);
        assert_eq!(store.commit_count().await, 0);
        Ok(())
    }

    /// ✍️ An editor who always saves a new creator a moment before our commit lands.
    #[derive(Debug)]
    struct EditorInTheLoop {
        inner: InMemoryStore,
    }

    #[async_trait]
    impl DocumentStore for EditorInTheLoop {
        async fn query(&mut self, types: &[String], filter: &Filter) -> Result<Vec<Document>> {
            self.inner.query(types, filter).await
        }

        async fn commit(&mut self, transaction: &Transaction) -> Result<()> {
            let id = transaction.document_id.clone();
            let editor_save = Transaction::new(
                id.clone(),
                vec![Mutation::Patch {
                    id,
                    if_revision: None,
                    edits: vec![FieldEdit::set(
                        "creators",
                        json!([
                            {"_type": "reference", "_ref": "old", "_key": "k1"},
                            {"_type": "reference", "_ref": "added-by-editor", "_key": "k2"}
                        ]),
                    )],
                }],
            );
            self.inner.commit(&editor_save).await?;
            self.inner.commit(transaction).await
        }

        async fn close(&mut self) -> Result<()> {
            self.inner.close().await
        }
    }

    #[tokio::test]
    async fn the_one_where_an_editor_sneaks_in_between_fetch_and_commit() -> Result<()> {
        let mut p1 = Document::new("p1", "project")
            .with_field("creators", json!([{"_type": "reference", "_ref": "old", "_key": "k1"}]));
        p1.revision = Some("r1".into());
        let store = InMemoryStore::new([p1]);

        let config = MigrationConfig {
            name: "rewrite-creators".into(),
            rule: MigrationRule::RewriteReferences(RewriteReferences { fields: vec!["creators".into()] }),
            integrity: IntegrityPolicy::Ignore,
            ..legacy_projects()
        };
        let map = ReferenceMap::from_entries([("old", "new")]);
        let report = MigrationRunner::new(EditorInTheLoop { inner: store.clone() }, config, map).run().await?;

        assert_eq!(report.failed, 1);
        assert_eq!(report.failures[0].kind, FailureKind::Transaction);
        assert!(report.failures[0].cause.contains("stale revision"));
        let creators = store.get("p1").await.and_then(|d| d.get("creators").cloned());
        assert_eq!(creators.as_ref().and_then(|c| c.as_array()).map(Vec::len), Some(2), "the editor's creator is still there");
        Ok(())
    }

    /// 🛑 Pulls the plug the moment the first commit lands.
    #[derive(Debug)]
    struct CancelsAfterFirstCommit {
        inner: InMemoryStore,
        flag: CancellationFlag,
    }

    #[async_trait]
    impl DocumentStore for CancelsAfterFirstCommit {
        async fn query(&mut self, types: &[String], filter: &Filter) -> Result<Vec<Document>> {
            self.inner.query(types, filter).await
        }

        async fn commit(&mut self, transaction: &Transaction) -> Result<()> {
            self.inner.commit(transaction).await?;
            self.flag.cancel();
            Ok(())
        }

        async fn close(&mut self) -> Result<()> {
            self.inner.close().await
        }
    }

    #[tokio::test]
    async fn the_one_where_cancel_mid_run_leaves_the_rest_untouched() -> Result<()> {
        let store = projects();
        let flag = CancellationFlag::new();
        let meddler = CancelsAfterFirstCommit { inner: store.clone(), flag: flag.clone() };
        let report = MigrationRunner::new(meddler, legacy_projects(), ReferenceMap::default())
            .with_cancellation(flag)
            .run()
            .await?;

        assert_eq!(report.outcome(), RunOutcome::Cancelled);
        assert_eq!(report.attempted, 1);
        assert_eq!(report.committed, 1);
        assert_eq!(store.commit_count().await, 1);
        assert_eq!(store.get("p1").await.and_then(|d| d.get("startYear").cloned()), Some(json!(2019)));
        // -- p2 was next in line and never got visited
        assert!(store.get("p2").await.is_some_and(|d| d.get("coverImage").is_none()));
        Ok(())
    }

    #[tokio::test]
    async fn the_one_where_people_become_artists_and_projects_follow() -> Result<()> {
        let store = InMemoryStore::new([
            Document::new("e1", "person").with_field("name", json!("Émilie")),
            Document::new("drafts.e1", "person").with_field("name", json!("Émilie (draft)")),
            Document::new("drafts.m2", "person").with_field("name", json!("Markus")),
            Document::new("p1", "project").with_field(
                "creators",
                json!([{"_type": "reference", "_ref": "e1", "_key": "k1"}, {"_type": "reference", "_ref": "x9", "_key": "k2"}]),
            ),
        ]);

        let reclassify = MigrationConfig {
            name: "person-to-artist".into(),
            document_types: vec!["person".into()],
            rule: MigrationRule::Reclassify(Reclassify::to("artist")),
            ..legacy_projects()
        };
        let report = MigrationRunner::new(store.clone(), reclassify, ReferenceMap::default()).run().await?;
        assert_eq!(report.committed, 3);

        let e1 = store.get("e1").await.expect("published artist exists");
        assert_eq!(e1.doc_type, "artist");
        assert_eq!(e1.get("name"), Some(&json!("Émilie")), "published content wins over the draft's");
        let m2 = store.get("m2").await.expect("a draft-only person gets a published twin");
        let m2_draft = store.get("drafts.m2").await.expect("and keeps its draft");
        assert_eq!(m2.fields, m2_draft.fields);
        assert_eq!(m2_draft.doc_type, "artist");

        let rewrite = MigrationConfig {
            name: "point-projects-at-artists".into(),
            document_types: vec!["project".into()],
            rule: MigrationRule::RewriteReferences(RewriteReferences { fields: vec!["creators".into()] }),
            integrity: IntegrityPolicy::Fail,
            ..legacy_projects()
        };
        let map = ReferenceMap::from_entries([("e1", "artist-e1")]);
        let report = MigrationRunner::new(store.clone(), rewrite, map).run().await?;
        assert_eq!(report.failed, 1, "x9 exists nowhere, and the policy is strict");
        assert_eq!(report.failures[0].kind, FailureKind::Integrity);
        Ok(())
    }

    #[tokio::test]
    async fn the_one_where_no_types_means_no_run() {
        let mut config = legacy_projects();
        config.document_types.clear();
        assert!(MigrationRunner::new(projects(), config, ReferenceMap::default()).run().await.is_err());
    }
}
