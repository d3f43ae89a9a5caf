use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::jobs::schedule::Trigger;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub version: String,
    /// SQLite file for run history and library settings.
    #[serde(default)]
    pub database_path: Option<String>,
    /// Directory holding one `<user_id>.json` ranked candidate export per user.
    pub candidates_directory: String,
    pub output: OutputConfig,
    #[serde(default)]
    pub schedules: Vec<ScheduleEntry>,
    #[serde(default = "default_history_retention_days")]
    pub history_retention_days: u32,
}

fn default_history_retention_days() -> u32 {
    30
}

impl Config {
    pub fn database_path(&self) -> Option<PathBuf> {
        match self.database_path {
            Some(ref path) => Some(expand_home(path)),
            None => crate::db::default_database_path(),
        }
    }

    pub fn candidates_directory(&self) -> PathBuf {
        expand_home(&self.candidates_directory)
    }
}

/// How recommendations are materialized on disk.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum OutputMode {
    /// Pointer file, sidecar and artwork side by side in the user folder.
    #[default]
    Flat,
    /// One folder per item holding a symlink (or pointer fallback) and artwork.
    #[serde(alias = "folder+link")]
    FolderLink,
}

impl OutputMode {
    pub fn as_str(self) -> &'static str {
        match self {
            OutputMode::Flat => "flat",
            OutputMode::FolderLink => "folder_link",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "flat" => Some(OutputMode::Flat),
            "folder_link" | "folder+link" => Some(OutputMode::FolderLink),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct OutputConfig {
    #[serde(default)]
    pub mode: OutputMode,
    /// Root this process writes to.
    pub root_write_path: String,
    /// The same root as the media server sees it.
    pub root_server_visible_path: String,
    /// Single path segment between the root and the user folders.
    #[serde(default = "default_namespace")]
    pub namespace: String,
    #[serde(default = "default_true")]
    pub download_images: bool,
}

fn default_namespace() -> String {
    "recommendations".to_string()
}

fn default_true() -> bool {
    true
}

impl OutputConfig {
    /// `<root_write_path>/<namespace>`.
    pub fn write_root(&self) -> PathBuf {
        expand_home(&self.root_write_path).join(&self.namespace)
    }

    /// `<root_server_visible_path>/<namespace>`.
    pub fn server_root(&self) -> PathBuf {
        PathBuf::from(&self.root_server_visible_path).join(&self.namespace)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ScheduleEntry {
    pub job: String,
    pub trigger: Trigger,
}

/// Expands a leading `~/` to the home directory.
pub fn expand_home(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    PathBuf::from(path)
}
