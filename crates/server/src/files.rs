//! Per-account blob store rooted at `<data_dir>/files/<account-id>/`.

use std::path::{Component, Path, PathBuf};

use common::protocol::FileInfo;

const DEFAULT_FILE_MODE: u32 = 0o644;

#[derive(Debug, thiserror::Error)]
pub enum FileStoreError {
    #[error("bad path: {0}")]
    BadPath(String),
    #[error("not found")]
    NotFound,
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub enum FileEntry {
    File(Vec<u8>),
    Dir(Vec<FileInfo>),
}

#[derive(Clone, Debug)]
pub struct FileStore {
    root: PathBuf,
}

impl FileStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Map a request path into the account's directory, refusing anything
    /// that could step outside of it.
    fn resolve(&self, charm_id: &str, path: &str) -> Result<PathBuf, FileStoreError> {
        if charm_id.is_empty() || charm_id.contains(&['/', '\\', '.'][..]) {
            return Err(FileStoreError::BadPath(charm_id.to_string()));
        }

        let mut resolved = self.root.join(charm_id);
        for component in Path::new(path.trim_start_matches('/')).components() {
            match component {
                Component::Normal(part) => resolved.push(part),
                Component::CurDir => {}
                Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                    return Err(FileStoreError::BadPath(path.to_string()))
                }
            }
        }
        Ok(resolved)
    }

    pub async fn get(&self, charm_id: &str, path: &str) -> Result<FileEntry, FileStoreError> {
        let target = self.resolve(charm_id, path)?;
        let metadata = match tokio::fs::metadata(&target).await {
            Ok(m) => m,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(FileStoreError::NotFound)
            }
            Err(e) => return Err(e.into()),
        };

        if !metadata.is_dir() {
            return Ok(FileEntry::File(tokio::fs::read(&target).await?));
        }

        let mut entries = Vec::new();
        let mut dir = tokio::fs::read_dir(&target).await?;
        while let Some(entry) = dir.next_entry().await? {
            let meta = entry.metadata().await?;
            entries.push(file_info(entry.file_name().to_string_lossy().into_owned(), &meta));
        }
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(FileEntry::Dir(entries))
    }

    /// Write a file, creating parent directories as needed.
    pub async fn put(
        &self,
        charm_id: &str,
        path: &str,
        data: &[u8],
        mode: Option<u32>,
    ) -> Result<(), FileStoreError> {
        let target = self.resolve(charm_id, path)?;
        if target == self.root.join(charm_id) {
            return Err(FileStoreError::BadPath(path.to_string()));
        }
        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&target, data).await?;
        set_mode(&target, mode.unwrap_or(DEFAULT_FILE_MODE)).await?;
        Ok(())
    }

    /// Remove a file, or a directory with everything under it.
    pub async fn delete(&self, charm_id: &str, path: &str) -> Result<(), FileStoreError> {
        let target = self.resolve(charm_id, path)?;
        let metadata = match tokio::fs::metadata(&target).await {
            Ok(m) => m,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(FileStoreError::NotFound)
            }
            Err(e) => return Err(e.into()),
        };
        if metadata.is_dir() {
            tokio::fs::remove_dir_all(&target).await?;
        } else {
            tokio::fs::remove_file(&target).await?;
        }
        Ok(())
    }
}

fn file_info(name: String, meta: &std::fs::Metadata) -> FileInfo {
    let modified = meta
        .modified()
        .ok()
        .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
        .map(|d| d.as_secs() as i64)
        .unwrap_or_default();
    FileInfo {
        name,
        is_dir: meta.is_dir(),
        size: meta.len(),
        mode: file_mode(meta),
        modified,
    }
}

#[cfg(unix)]
fn file_mode(meta: &std::fs::Metadata) -> u32 {
    use std::os::unix::fs::PermissionsExt;
    meta.permissions().mode() & 0o777
}

#[cfg(not(unix))]
fn file_mode(_meta: &std::fs::Metadata) -> u32 {
    DEFAULT_FILE_MODE
}

#[cfg(unix)]
async fn set_mode(path: &Path, mode: u32) -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    tokio::fs::set_permissions(path, std::fs::Permissions::from_mode(mode & 0o777)).await
}

#[cfg(not(unix))]
async fn set_mode(_path: &Path, _mode: u32) -> std::io::Result<()> {
    Ok(())
}
