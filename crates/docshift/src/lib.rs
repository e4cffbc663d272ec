//! 🚚 docshift: migrate documents in a hosted content store, and keep every
//! reference pointing somewhere real while you do it.
//!
//! 🎬 *[a content model, years old. "person" documents that are really artists.
//! project credits pointing at both. a rename nobody wants to do by hand.]*
//!
//! ```text
//!   StoreConfig ──▶ StoreBackend ─┐
//!                                  ├──▶ MigrationRunner ──▶ RunReport
//!   MigrationConfig ──▶ rule tree ─┘        │
//!                                           └── per document: rule → Transaction → commit
//! ```
//!
//! One document, one transaction, all-or-nothing. A failed document is recorded
//! and the run moves on. 🦆

pub mod app_config;
pub mod backends;
pub mod backup;
pub mod document;
pub mod edits;
pub mod filter;
pub(crate) mod progress;
pub mod reference_map;
pub mod report;
pub mod runner;
pub mod shapes;
pub mod transforms;

use anyhow::{Context, Result};
use tracing::info;

use crate::app_config::AppConfig;
use crate::backends::StoreBackend;
use crate::report::RunReport;
use crate::runner::{CancellationFlag, MigrationRunner};

pub use crate::runner::RunPhase;

/// 🚀 Open the store, optionally back it up, run the migration, write the report.
///
/// An `Err` means the run aborted before or around processing: the store could
/// not be opened, the backup failed, the rule or reference map was unusable, or
/// the fetch failed. Per-document failures are NOT errors; they live in the report.
pub async fn run(config: AppConfig, cancellation: CancellationFlag) -> Result<RunReport> {
    let AppConfig { store, migration, runtime } = config;

    let mut store = StoreBackend::from_config(&store)
        .await
        .context("💀 Could not open the document store")?;

    if let Some(backup_dir) = &runtime.backup_dir {
        if migration.dry_run {
            info!("📝 dry run, skipping the backup. Nothing is about to change.");
        } else {
            backup::snapshot(&mut store, backup_dir, runtime.backup_gzip)
                .await
                .context("💀 The pre-migration backup failed, so the migration did not start")?;
        }
    }

    let mut runner = MigrationRunner::from_config(store, migration)?
        .with_cancellation(cancellation)
        .with_progress(runtime.progress);
    let report = runner.run().await?;

    if let Some(report_path) = &runtime.report_path {
        report.write_json(report_path).await?;
        info!("🧾 run report written to '{}'", report_path.display());
    }
    Ok(report)
}
