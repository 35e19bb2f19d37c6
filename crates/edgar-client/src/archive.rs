//! `index.json` directory listings of the EDGAR archive tree.

use serde::Deserialize;

/// Directory listing returned by `index.json` under `/Archives`.
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Eq)]
pub struct ArchiveIndex {
    directory: Directory,
}

#[derive(Clone, Debug, Default, Deserialize, PartialEq, Eq)]
struct Directory {
    #[serde(default)]
    item: Vec<ArchiveItem>,
    #[serde(default)]
    name: String,
    #[serde(rename = "parent-dir", default)]
    parent_dir: String,
}

/// One entry of an archive directory listing.
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Eq)]
pub struct ArchiveItem {
    /// Last modified timestamp, as formatted by the SEC listing.
    #[serde(rename = "last-modified", default)]
    pub last_modified: String,
    /// File or directory name.
    pub name: String,
    /// `"dir"` or `"file"`.
    #[serde(rename = "type")]
    pub kind: String,
    /// Relative URL path.
    #[serde(default)]
    pub href: String,
    /// Human-readable size, empty for directories.
    #[serde(default)]
    pub size: String,
}

impl ArchiveIndex {
    /// The items of this directory.
    #[must_use]
    pub fn items(&self) -> &[ArchiveItem] {
        &self.directory.item
    }

    /// The directory name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.directory.name
    }

    /// The parent directory path.
    #[must_use]
    pub fn parent(&self) -> &str {
        &self.directory.parent_dir
    }
}
