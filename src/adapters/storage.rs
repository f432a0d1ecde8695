use crate::core::{BlobStore, Page, PageSink};
use crate::utils::error::{EtlError, Result};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// 以本機目錄模擬 data lake：`{root}/{container}/{name}`
#[derive(Debug, Clone)]
pub struct LocalBlobStore {
    root: PathBuf,
}

impl LocalBlobStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn container_path(&self, container: &str) -> PathBuf {
        container
            .split('/')
            .filter(|segment| !segment.is_empty())
            .fold(self.root.clone(), |path, segment| path.join(segment))
    }
}

impl PageSink for LocalBlobStore {
    async fn write_page(&self, page: &Page) -> Result<()> {
        let dir = self.container_path(&page.destination_path);
        tokio::fs::create_dir_all(&dir).await?;
        // fs::write 會截斷既有檔案，同名頁面直接覆蓋
        tokio::fs::write(dir.join(&page.file_name), &page.body).await?;
        Ok(())
    }
}

impl BlobStore for LocalBlobStore {
    async fn read_blob(&self, container: &str, name: &str) -> Result<Vec<u8>> {
        let path = self.container_path(container).join(name);
        tokio::fs::read(&path).await.map_err(|e| EtlError::StorageError {
            message: format!("Failed to read {}: {}", path.display(), e),
        })
    }

    async fn count_blobs(&self, container: &str, prefix: &str) -> Result<usize> {
        let dir = self.container_path(container);
        let mut entries = match tokio::fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(e.into()),
        };

        let mut count = 0;
        while let Some(entry) = entries.next_entry().await? {
            if entry.file_name().to_string_lossy().starts_with(prefix) {
                count += 1;
            }
        }
        Ok(count)
    }
}

/// In-process blob store, used by tests and dry runs.
#[derive(Debug, Default)]
pub struct MemoryBlobStore {
    blobs: Mutex<BTreeMap<String, BTreeMap<String, Page>>>,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a raw blob, e.g. a configuration table.
    pub fn put(&self, container: &str, name: &str, body: impl Into<Vec<u8>>) {
        let page = Page {
            content_type: "application/octet-stream".to_string(),
            destination_path: container.to_string(),
            file_name: name.to_string(),
            body: body.into(),
        };
        self.insert(page);
    }

    fn insert(&self, page: Page) {
        let mut blobs = self.blobs.lock().unwrap_or_else(|e| e.into_inner());
        blobs
            .entry(page.destination_path.clone())
            .or_default()
            .insert(page.file_name.clone(), page);
    }

    pub fn page(&self, container: &str, name: &str) -> Option<Page> {
        let blobs = self.blobs.lock().unwrap_or_else(|e| e.into_inner());
        blobs.get(container).and_then(|c| c.get(name)).cloned()
    }

    pub fn body(&self, container: &str, name: &str) -> Option<Vec<u8>> {
        self.page(container, name).map(|p| p.body)
    }

    /// Sorted blob names in `container`.
    pub fn file_names(&self, container: &str) -> Vec<String> {
        let blobs = self.blobs.lock().unwrap_or_else(|e| e.into_inner());
        blobs
            .get(container)
            .map(|c| c.keys().cloned().collect())
            .unwrap_or_default()
    }

    pub fn is_empty(&self) -> bool {
        let blobs = self.blobs.lock().unwrap_or_else(|e| e.into_inner());
        blobs.values().all(|c| c.is_empty())
    }
}

impl PageSink for MemoryBlobStore {
    async fn write_page(&self, page: &Page) -> Result<()> {
        self.insert(page.clone());
        Ok(())
    }
}

impl BlobStore for MemoryBlobStore {
    async fn read_blob(&self, container: &str, name: &str) -> Result<Vec<u8>> {
        self.body(container, name)
            .ok_or_else(|| EtlError::StorageError {
                message: format!("Blob not found: {}/{}", container, name),
            })
    }

    async fn count_blobs(&self, container: &str, prefix: &str) -> Result<usize> {
        Ok(self
            .file_names(container)
            .iter()
            .filter(|name| name.starts_with(prefix))
            .count())
    }
}
