use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Durable key-value blob store for learned-object representations,
/// keyed by object name.
pub trait ModelStore: Send + Sync {
    fn put(&self, name: &str, blob: &[u8]) -> anyhow::Result<()>;
    fn get(&self, name: &str) -> anyhow::Result<Option<Vec<u8>>>;
    /// Returns false when no blob existed for the name.
    fn delete(&self, name: &str) -> anyhow::Result<bool>;
    fn list(&self) -> anyhow::Result<Vec<String>>;
}

const BLOB_SUFFIX: &str = ".model.json";

/// One `<name>.model.json` blob per learned object under a model
/// directory. Writes go to a sibling temp file first and are renamed
/// into place, so a concurrent reader never observes a partial blob.
pub struct DirStore {
    dir: PathBuf,
}

impl DirStore {
    pub fn new(dir: impl Into<PathBuf>) -> anyhow::Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn blob_path(&self, name: &str) -> PathBuf {
        self.dir.join(format!("{name}{BLOB_SUFFIX}"))
    }
}

impl ModelStore for DirStore {
    fn put(&self, name: &str, blob: &[u8]) -> anyhow::Result<()> {
        let path = self.blob_path(name);
        let tmp = self.dir.join(format!("{name}{BLOB_SUFFIX}.tmp"));
        fs::write(&tmp, blob)?;
        fs::rename(&tmp, &path)?;
        debug!(name, path = %path.display(), "stored learned object blob");
        Ok(())
    }

    fn get(&self, name: &str) -> anyhow::Result<Option<Vec<u8>>> {
        match fs::read(self.blob_path(name)) {
            Ok(blob) => Ok(Some(blob)),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    fn delete(&self, name: &str) -> anyhow::Result<bool> {
        match fs::remove_file(self.blob_path(name)) {
            Ok(()) => Ok(true),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(err) => Err(err.into()),
        }
    }

    fn list(&self) -> anyhow::Result<Vec<String>> {
        let mut names = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let entry = entry?;
            let file_name = entry.file_name();
            let Some(file_name) = file_name.to_str() else {
                continue;
            };
            if let Some(name) = file_name.strip_suffix(BLOB_SUFFIX) {
                names.push(name.to_string());
            }
        }
        Ok(names)
    }
}
