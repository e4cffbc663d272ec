//! 🚀 docshift-cli: the front door, the bouncer, the maitre d' of docshift.
//!
//! 🎬 *[narrator voice]* "It all started with a simple main() function..."
//! 📦 Thin wrapper: parse args, set up logging, load config, let the library
//! do the heavy lifting, then turn the report into an exit code. Like a manager. 🦆
//!
//! Exit codes: 0 clean, 2 some documents failed, 130 cancelled, 1 aborted.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use docshift::runner::CancellationFlag;
use tracing::{error, warn};
use tracing_subscriber::EnvFilter;

/// 🚚 Migrate documents in a content store without leaving dangling references behind.
#[derive(Debug, Parser)]
#[command(name = "docshift", version, about)]
struct Args {
    /// Migration config (TOML). Missing file means env vars (DOCSHIFT_*) only.
    #[arg(default_value = "docshift.toml")]
    config: PathBuf,

    /// Compute every transaction, commit none of them.
    #[arg(long)]
    dry_run: bool,

    /// Write the JSON run report here (overrides `runtime.report_path`).
    #[arg(long)]
    report: Option<PathBuf>,

    /// Snapshot the store into this directory before migrating.
    #[arg(long)]
    backup_dir: Option<PathBuf>,

    /// No progress bar. For CI logs and other places that hate carriage returns.
    #[arg(long)]
    no_progress: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    // 📡 tracing: because println! debugging is a lifestyle choice we're trying
    // to move past, like flip phones and cargo shorts
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    // 🔒 check the file exists before we get too emotionally attached
    let config_file = args.config.as_path();
    let config_file_which_is_validated_to_exist = match config_file.try_exists().context(format!(
        "💀 Couldn't check whether the configuration file exists. If it's a relative path, \
         try an absolute one, to be absolutely certain. Was checking here: '{}'",
        config_file.display()
    ))? {
        true => Some(config_file),
        false => {
            warn!("⚠️ no config file at '{}', going with DOCSHIFT_* env vars only", config_file.display());
            None
        }
    };

    let mut app_config = docshift::app_config::load_config(config_file_which_is_validated_to_exist)
        .context("💀 In docshift-cli, main, we couldn't load the config. Take a look at the file, make sure you didn't forget something obvious")?;

    // -- flags beat the file
    if args.dry_run {
        app_config.migration.dry_run = true;
    }
    if args.report.is_some() {
        app_config.runtime.report_path = args.report;
    }
    if args.backup_dir.is_some() {
        app_config.runtime.backup_dir = args.backup_dir;
    }
    if args.no_progress {
        app_config.runtime.progress = false;
    }

    // 🛑 Ctrl-C finishes the current document, then stops. No half-written transactions.
    let cancellation = CancellationFlag::new();
    let on_interrupt = cancellation.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("🛑 interrupt received, stopping after the current document");
            on_interrupt.cancel();
        }
    });

    match docshift::run(app_config, cancellation).await {
        Ok(report) => {
            // -- 📝 a dry run with no report file would otherwise show only counts
            if let Some(planned) = report.planned_table() {
                println!("{}", planned);
            }
            println!("{}", report.to_table());
            std::process::exit(report.outcome().exit_code());
        }
        Err(err) => {
            error!("💀 error: {}", err);
            // -- 🧅 peel the onion of sadness, one layer at a time
            let mut the_vibes_are_giving_connection_issues = false;
            for cause in err.chain().skip(1) {
                error!("⚠️  cause: {}", cause);
                let cause_str = cause.to_string();
                if cause_str.contains("error sending request")
                    || cause_str.contains("onnection refused")
                    || cause_str.contains("tcp connect error")
                    || cause_str.contains("dns error")
                {
                    the_vibes_are_giving_connection_issues = true;
                }
            }
            if the_vibes_are_giving_connection_issues {
                error!(
                    "🔧 hint: looks like the content store isn't reachable. Double-check the project id, \
                     the base_url if you set one, and that your network can see the API. ☕"
                );
            }
            std::process::exit(1);
        }
    }
}
