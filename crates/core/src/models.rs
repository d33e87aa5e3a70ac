//! Listing and copy types, plus the SharePoint REST payloads they come from

use crate::error::Error;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use std::path::PathBuf;

/// A file (or folder) found on the site.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RemoteFileEntry {
    /// Path including the site path, e.g. `/sites/Team/Shared Documents/a.pdf`
    pub server_relative_path: String,
    pub name: String,
    /// Path below the listed folder, e.g. `sub/b.pdf`
    pub relative_path: String,
    pub size: u64,
    pub last_modified: Option<DateTime<Utc>>,
    pub is_folder: bool,
    /// Folder depth below the listed folder; 0 for direct children
    pub depth: usize,
}

/// How far `list_files` descends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ListOptions {
    pub recursive: bool,
    /// Deepest folder level to enter; `None` means unlimited
    pub max_depth: Option<usize>,
}

impl Default for ListOptions {
    fn default() -> Self {
        Self {
            recursive: true,
            max_depth: None,
        }
    }
}

impl ListOptions {
    /// Direct children only.
    pub fn shallow() -> Self {
        Self {
            recursive: false,
            max_depth: None,
        }
    }

    pub fn with_max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = Some(max_depth);
        self
    }

    /// Whether subfolders found at `depth` should be entered.
    pub(crate) fn descends_from(&self, depth: usize) -> bool {
        self.recursive && self.max_depth.map_or(true, |max| depth < max)
    }
}

/// Files to copy and where they go.
#[derive(Debug, Clone)]
pub struct CopySpec {
    pub entries: Vec<RemoteFileEntry>,
    pub destination_root: PathBuf,
    /// Put every file directly under `destination_root`
    pub flatten: bool,
}

impl CopySpec {
    pub fn new(entries: Vec<RemoteFileEntry>, destination_root: impl Into<PathBuf>) -> Self {
        Self {
            entries,
            destination_root: destination_root.into(),
            flatten: false,
        }
    }

    pub fn flatten(mut self, flatten: bool) -> Self {
        self.flatten = flatten;
        self
    }
}

/// Outcome of one copy batch.
#[derive(Debug, Default)]
pub struct CopyReport {
    pub succeeded: Vec<CopiedFile>,
    pub failed: Vec<CopyFailure>,
    pub skipped: Vec<SkippedFile>,
}

impl CopyReport {
    pub fn succeeded_count(&self) -> usize {
        self.succeeded.len()
    }

    pub fn failed_count(&self) -> usize {
        self.failed.len()
    }

    pub fn skipped_count(&self) -> usize {
        self.skipped.len()
    }

    /// Bytes written across all successful downloads.
    pub fn total_bytes(&self) -> u64 {
        self.succeeded.iter().map(|f| f.bytes).sum()
    }

    pub fn is_success(&self) -> bool {
        self.failed.is_empty()
    }
}

#[derive(Debug, Clone)]
pub struct CopiedFile {
    pub entry: RemoteFileEntry,
    pub destination: PathBuf,
    pub bytes: u64,
}

#[derive(Debug)]
pub struct CopyFailure {
    pub entry: RemoteFileEntry,
    /// `None` when no destination could be computed
    pub destination: Option<PathBuf>,
    pub error: Error,
}

#[derive(Debug, Clone)]
pub struct SkippedFile {
    pub entry: RemoteFileEntry,
    pub reason: SkipReason,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    /// Folders are traversed, not copied
    Folder,
    /// An earlier entry already maps to this destination
    DuplicateDestination(PathBuf),
    /// The batch was cancelled before this file was scheduled
    Cancelled,
}

impl std::fmt::Display for SkipReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SkipReason::Folder => write!(f, "folder"),
            SkipReason::DuplicateDestination(path) => {
                write!(f, "duplicate destination {}", path.display())
            }
            SkipReason::Cancelled => write!(f, "cancelled"),
        }
    }
}

// === SharePoint REST payloads (odata=verbose) ===

/// `{"d": {...}}`
#[derive(Debug, Deserialize)]
pub(crate) struct Verbose<T> {
    pub d: T,
}

/// Collection page with an optional continuation link.
#[derive(Debug, Deserialize)]
pub(crate) struct Page<T> {
    #[serde(default = "Vec::new")]
    pub results: Vec<T>,
    #[serde(rename = "__next", default)]
    pub next: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub(crate) struct SpFile {
    pub name: String,
    pub server_relative_url: String,
    #[serde(default, deserialize_with = "lenient_u64")]
    pub length: u64,
    #[serde(default)]
    pub time_last_modified: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub(crate) struct SpFolder {
    pub name: String,
    pub server_relative_url: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub(crate) struct SpFolderInfo {
    #[serde(default = "default_exists")]
    pub exists: bool,
}

fn default_exists() -> bool {
    true
}

/// Edm.Int64 values are serialized as strings in verbose mode.
fn lenient_u64<'de, D>(deserializer: D) -> std::result::Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum NumberOrString {
        Number(u64),
        String(String),
    }

    match NumberOrString::deserialize(deserializer)? {
        NumberOrString::Number(n) => Ok(n),
        NumberOrString::String(s) => s.trim().parse().map_err(serde::de::Error::custom),
    }
}
