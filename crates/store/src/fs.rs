//! Filesystem-backed store: one file per name in a directory

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::{expand_path, Result, Store, StoreError};

#[derive(Debug, Clone)]
pub struct FsStore {
    root: PathBuf,
}

impl FsStore {
    /// Open a store rooted at `root`, creating the directory if needed
    pub fn open(root: impl AsRef<Path>) -> Result<Self> {
        let root = expand_path(root.as_ref());
        std::fs::create_dir_all(&root).map_err(|source| StoreError::Io {
            name: root.display().to_string(),
            source,
        })?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Full path of `name` inside the store
    pub fn path(&self, name: &str) -> PathBuf {
        self.root.join(name)
    }

    fn io_error(name: &str, source: std::io::Error) -> StoreError {
        StoreError::Io {
            name: name.to_string(),
            source,
        }
    }
}

impl Store for FsStore {
    fn read(&self, name: &str) -> Result<Option<Vec<u8>>> {
        match std::fs::read(self.path(name)) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(Self::io_error(name, e)),
        }
    }

    /// Writes go through a temporary file and a rename. Files are
    /// owner-only on unix.
    fn write(&self, name: &str, data: &[u8]) -> Result<()> {
        let path = self.path(name);
        let tmp = self.path(&format!(".{}.tmp", name));
        std::fs::write(&tmp, data).map_err(|e| Self::io_error(name, e))?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&tmp, std::fs::Permissions::from_mode(0o600))
                .map_err(|e| Self::io_error(name, e))?;
        }
        std::fs::rename(&tmp, &path).map_err(|e| Self::io_error(name, e))?;
        debug!("Wrote {:?}", path);
        Ok(())
    }

    fn remove(&self, name: &str) -> Result<()> {
        match std::fs::remove_file(self.path(name)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(Self::io_error(name, e)),
        }
    }
}
