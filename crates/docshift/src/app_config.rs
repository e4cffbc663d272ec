//! 🔧 App Configuration: TOML in, structs out, env vars on top of the pile.
//!
//! 📡 "Config not found: We looked everywhere. Under the couch. Behind the fridge.
//! In the junk drawer. Nothing." -- every developer at 3am 🦆
//!
//! Three sections, one file:
//!
//! ```toml
//! [store.http]              # or [store.in_memory] / [store.file]
//! project_id = "abc123"
//! dataset = "production"
//!
//! [migration]
//! name = "people-to-artists"
//! document_types = ["person"]
//!
//! [migration.rule]
//! kind = "reclassify"
//! to_type = "artist"
//!
//! [runtime]
//! progress = true
//! report_path = "reports/people-to-artists.json"
//! ```
//!
//! Env vars use the `DOCSHIFT_` prefix and `__` for nesting, so
//! `DOCSHIFT_STORE__HTTP__TOKEN` fills in `store.http.token` without the
//! token ever touching the file.

use std::path::{Path, PathBuf};

use anyhow::Context;
use figment::{
    Figment,
    providers::{Env, Format, Toml},
};
use serde::Deserialize;
use tracing::info;

use crate::backends::StoreConfig;
use crate::runner::MigrationConfig;

fn default_progress() -> bool {
    true
}

/// ⚙️ Knobs for the process around the run, not the run itself.
#[derive(Debug, Deserialize, Clone)]
pub struct RuntimeConfig {
    /// 📊 draw the progress bar on stderr
    #[serde(default = "default_progress")]
    pub progress: bool,
    /// 🧾 where to write the JSON run report, if anywhere
    #[serde(default)]
    pub report_path: Option<PathBuf>,
    /// 💾 snapshot the whole store here before migrating
    #[serde(default)]
    pub backup_dir: Option<PathBuf>,
    #[serde(default)]
    pub backup_gzip: bool,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self { progress: default_progress(), report_path: None, backup_dir: None, backup_gzip: false }
    }
}

/// 📦 Everything one invocation needs: where the documents live, what to do to
/// them, and how loud to be about it.
#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    pub store: StoreConfig,
    pub migration: MigrationConfig,
    #[serde(default)]
    pub runtime: RuntimeConfig,
}

fn figment_for(config_file_name: Option<&Path>) -> Figment {
    let figment = Figment::new().merge(Env::prefixed("DOCSHIFT_").split("__"));
    // -- TOML wins on conflicts; env only fills what the file leaves out
    match config_file_name {
        Some(file_name) => figment.merge(Toml::file(file_name)),
        None => figment,
    }
}

/// 🚀 Load the config from `DOCSHIFT_*` env vars, plus a TOML file when one is given.
///
///   - `None`: env vars only. No file, no assumptions.
///   - `Some`: env vars + TOML, merged. TOML wins on conflicts.
///
/// 💀 Errors name the file, so "which config?" is never the question at 3am.
pub fn load_config(config_file_name: Option<&Path>) -> anyhow::Result<AppConfig> {
    info!("🔧 Loading configuration: {:#?}", config_file_name.unwrap_or(Path::new("")));

    let context_msg = match config_file_name {
        Some(path) => format!(
            "💀 Failed to parse configuration from file '{}' and environment variables (DOCSHIFT_*). \
             The file exists in our hearts, but apparently not in a shape serde recognizes.",
            path.display()
        ),
        None => "💀 Failed to parse configuration from environment variables (DOCSHIFT_*). \
                 No file was provided, so this one's all on the environment."
            .to_string(),
    };

    let config: AppConfig = figment_for(config_file_name).extract().context(context_msg)?;
    config.migration.rule.validate().context("💀 The migration rule is configured, but not sensibly")?;
    Ok(config)
}
