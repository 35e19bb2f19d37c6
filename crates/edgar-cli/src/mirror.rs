//! Archive mirror: recursively downloads files from the EDGAR archive
//! tree into local storage.

use std::collections::HashSet;
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

use edgar_client::{ArchiveItem, Client};
use edgar_core::{EdgarError, Result};
use futures::future::BoxFuture;
use futures::FutureExt;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::info;

/// Where downloaded files end up.
pub trait Storage: Send + Sync {
    /// Saves `body` as `fname` below `path`, creating directories as
    /// needed.
    fn save(&self, path: &str, fname: &str, body: &[u8]) -> Result<()>;
}

/// Recursive downloader over the `/Archives` directory listings.
///
/// Top-level items download in parallel (bounded by the procs limit);
/// subdirectories are walked sequentially inside their task. Listings the
/// SEC refuses with HTTP 403 are skipped.
pub struct Mirror {
    client: Arc<Client>,
    storage: Arc<dyn Storage>,
    need_files: HashSet<String>,
    procs: usize,
}

impl Mirror {
    pub fn new(client: Arc<Client>, storage: Arc<dyn Storage>) -> Self {
        Self {
            client,
            storage,
            need_files: HashSet::new(),
            procs: 1,
        }
    }

    /// Restricts downloads to files with these names.
    #[must_use]
    pub fn with_need_files(mut self, files: Vec<String>) -> Self {
        self.need_files = files.into_iter().collect();
        self
    }

    /// Number of parallel downloads.
    #[must_use]
    pub fn with_procs_limit(mut self, procs: usize) -> Self {
        self.procs = procs.max(1);
        self
    }

    /// Mirrors `/Archives/{path}` recursively.
    pub async fn download(self: &Arc<Self>, path: &str) -> Result<()> {
        let Some(index) = self.read_index(path).await? else {
            return Ok(());
        };
        info!(path, items = index.items().len(), "got index");

        let semaphore = Arc::new(Semaphore::new(self.procs));
        let mut set: JoinSet<Result<()>> = JoinSet::new();
        let mut first_err: Option<EdgarError> = None;

        for item in index.items().iter().cloned() {
            if first_err.is_some() {
                break;
            }
            let Ok(permit) = Arc::clone(&semaphore).acquire_owned().await else {
                break;
            };
            let mirror = Arc::clone(self);
            let parent = path.to_string();
            set.spawn(async move {
                let _permit = permit;
                mirror.handle_item(&parent, item).await
            });
        }

        while let Some(joined) = set.join_next().await {
            let result = joined
                .unwrap_or_else(|e| Err(EdgarError::Other(format!("download task: {e}"))));
            if let Err(err) = result {
                if first_err.is_none() {
                    first_err = Some(err);
                    set.abort_all();
                }
            }
        }

        match first_err {
            Some(err) => Err(EdgarError::Other(format!("download of {path}: {err}"))),
            None => Ok(()),
        }
    }

    async fn handle_item(&self, parent: &str, item: ArchiveItem) -> Result<()> {
        let full_path = join_path(parent, &item.name);
        match item.kind.as_str() {
            "dir" => self.process_dir(full_path).await,
            "file" if self.need_file(&item.name) => {
                self.download_file(parent, &item.name, &full_path).await
            }
            _ => Ok(()),
        }
    }

    /// Walks a subdirectory sequentially. Boxed for recursion through
    /// [`Mirror::handle_item`].
    fn process_dir(&self, path: String) -> BoxFuture<'_, Result<()>> {
        async move {
            let Some(index) = self.read_index(&path).await? else {
                return Ok(());
            };
            info!(path, items = index.items().len(), "got index");
            for item in index.items().iter().cloned() {
                self.handle_item(&path, item).await?;
            }
            Ok(())
        }
        .boxed()
    }

    async fn read_index(&self, path: &str) -> Result<Option<edgar_client::ArchiveIndex>> {
        info!(path, "go into");
        match self.client.index_archive(path).await {
            Ok(index) => Ok(Some(index)),
            Err(err) if err.is_status(403) => {
                info!(path, cause = %err, "skip");
                Ok(None)
            }
            Err(err) => Err(EdgarError::Other(format!("index of {path:?}: {err}"))),
        }
    }

    fn need_file(&self, fname: &str) -> bool {
        self.need_files.is_empty() || self.need_files.contains(fname)
    }

    async fn download_file(&self, parent: &str, fname: &str, full_path: &str) -> Result<()> {
        let body = self
            .client
            .archive_file(full_path)
            .await
            .map_err(|e| EdgarError::Other(format!("download error: {e}")))?;
        info!(path = full_path, "download");
        self.storage.save(parent, fname, &body)
    }
}

fn join_path(parent: &str, name: &str) -> String {
    format!("{}/{}", parent.trim_end_matches('/'), name)
}

/// Filesystem storage below a data directory.
pub struct DownloadDir {
    datadir: PathBuf,
}

impl DownloadDir {
    pub fn new(datadir: PathBuf) -> Self {
        Self { datadir }
    }
}

impl Storage for DownloadDir {
    fn save(&self, path: &str, fname: &str, body: &[u8]) -> Result<()> {
        let meta = fs::metadata(&self.datadir)
            .map_err(|e| EdgarError::Other(format!("stat {:?}: {e}", self.datadir)))?;
        if !meta.is_dir() {
            return Err(EdgarError::Other(format!(
                "{:?} not a directory",
                self.datadir
            )));
        }

        let dir = self.datadir.join(path);
        fs::create_dir_all(&dir)
            .map_err(|e| EdgarError::Other(format!("mkdir {dir:?}: {e}")))?;

        let file = dir.join(fname);
        fs::write(&file, body)
            .map_err(|e| EdgarError::Other(format!("failed write into {file:?}: {e}")))
    }
}
