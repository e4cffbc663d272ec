//! 📊 progress.rs: "Are we there yet?" Every migration, every time, forever.
//!
//! 🚀 A document-count progress bar for the runner, with a comfy-table message
//! underneath showing what happened so far: how many committed, how many were
//! already fine, how many blew up, how fast, and how long until we're done.
//!
//! ⚠️ Watching this progress bar will not make it go faster. Science says no.
//!
//! 🦆 The duck has nothing to do with this module. It's just vibing.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use comfy_table::{Cell, CellAlignment, ContentArrangement, Table, presets::NOTHING};
use indicatif::{ProgressBar, ProgressStyle};

use crate::report::DocumentStatus;

/// 🔢 "1000000" → "1,000,000". You're welcome, eyes.
pub(crate) fn format_number(n: u64) -> String {
    let s = n.to_string();
    let mut result = String::with_capacity(s.len() + s.len() / 3);
    for (i, c) in s.chars().enumerate() {
        if i > 0 && (s.len() - i) % 3 == 0 {
            result.push(',');
        }
        result.push(c);
    }
    result
}

/// ⏱️ MM:SS, or HH:MM:SS for the long hauls.
pub(crate) fn format_duration(duration: Duration) -> String {
    let total_secs = duration.as_secs();
    let hours = total_secs / 3600;
    let minutes = (total_secs % 3600) / 60;
    let seconds = total_secs % 60;
    if hours > 0 {
        format!("{:02}:{:02}:{:02}", hours, minutes, seconds)
    } else {
        format!("{:02}:{:02}", minutes, seconds)
    }
}

/// 📊 Tracks per-document outcomes against the candidate count.
///
/// Uses a sliding 5-second window for the docs/s rate so one slow commit doesn't
/// make the whole run look doomed.
pub(crate) struct MigrationProgress {
    /// 🏷️ migration name, shown above the bar
    name: String,
    total: u64,
    done: u64,
    committed: u64,
    unchanged: u64,
    failed: u64,
    progress_bar: ProgressBar,
    rate_samples: VecDeque<(Instant, u64)>,
    start_time: Instant,
}

impl std::fmt::Debug for MigrationProgress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // -- 🎭 ProgressBar is a diva and doesn't derive Debug
        f.debug_struct("MigrationProgress")
            .field("name", &self.name)
            .field("total", &self.total)
            .field("done", &self.done)
            .finish()
    }
}

impl MigrationProgress {
    /// 🚀 `visible = false` gives a hidden bar: same bookkeeping, no terminal output.
    pub(crate) fn new(name: impl Into<String>, total: u64, visible: bool) -> Self {
        let progress_bar = if visible { ProgressBar::new(total) } else { ProgressBar::hidden() };
        let style = ProgressStyle::default_bar()
            .template("{msg}\n| [{bar:40.cyan/blue}] {pos}/{len}")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("=>-");
        progress_bar.set_style(style);
        progress_bar.set_length(total);

        let start_time = Instant::now();
        let mut rate_samples = VecDeque::new();
        rate_samples.push_back((start_time, 0u64));

        Self {
            name: name.into(),
            total,
            done: 0,
            committed: 0,
            unchanged: 0,
            failed: 0,
            progress_bar,
            rate_samples,
            start_time,
        }
    }

    /// 🔄 One more document is behind us.
    pub(crate) fn record(&mut self, status: DocumentStatus) {
        self.done += 1;
        match status {
            // -- 📝 a planned transaction shows up as committed, the bar is the same either way
            DocumentStatus::Committed | DocumentStatus::Planned => self.committed += 1,
            DocumentStatus::Unchanged => self.unchanged += 1,
            DocumentStatus::Failed => self.failed += 1,
        }
        let rate = self.docs_per_sec();
        self.render(rate);
        self.progress_bar.set_position(self.done);
    }

    pub(crate) fn finish(&self) {
        self.progress_bar.finish();
    }

    fn docs_per_sec(&mut self) -> f64 {
        let now = Instant::now();
        let window = Duration::from_secs(5);
        // -- 🪟 age out samples older than the window before adding this one
        while let Some(&(timestamp, _)) = self.rate_samples.front() {
            if now.duration_since(timestamp) > window {
                self.rate_samples.pop_front();
            } else {
                break;
            }
        }
        self.rate_samples.push_back((now, self.done));
        match self.rate_samples.front() {
            Some(&(oldest_time, oldest_done)) => {
                let elapsed = now.duration_since(oldest_time).as_secs_f64();
                if elapsed > 0.0 { self.done.saturating_sub(oldest_done) as f64 / elapsed } else { 0.0 }
            }
            None => 0.0,
        }
    }

    /// 🎨 Layout:
    /// ```text
    /// migration: <name>
    ///   <docs/s>          <done / total>
    ///   <committed>       <unchanged>
    ///   <failed>          <elapsed / remaining>
    /// ```
    fn render(&self, docs_per_sec: f64) {
        let elapsed = self.start_time.elapsed();
        // -- ⏳ no estimate until at least one document is done
        let remaining = if self.done > 0 && self.total > self.done {
            let per_doc = elapsed.as_secs_f64() / self.done as f64;
            format_duration(Duration::from_secs_f64(per_doc * (self.total - self.done) as f64))
        } else {
            "--:--".to_string()
        };

        let mut table = Table::new();
        table.load_preset(NOTHING);
        table.set_content_arrangement(ContentArrangement::Dynamic);
        let right = |text: String| Cell::new(text).set_alignment(CellAlignment::Right);
        table.add_row(vec![
            right(format!("{} Docs/s", format_number(docs_per_sec as u64))),
            right(format!("{} / {} Docs", format_number(self.done), format_number(self.total))),
        ]);
        table.add_row(vec![
            right(format!("{} committed", format_number(self.committed))),
            right(format!("{} unchanged", format_number(self.unchanged))),
        ]);
        table.add_row(vec![
            right(format!("{} failed", format_number(self.failed))),
            right(format!("{} elapsed, {} remaining", format_duration(elapsed), remaining)),
        ]);
        self.progress_bar.set_message(format!("migration: {}\n{}", self.name, table));
    }
}
