use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use rocket::{http::Status, tokio::fs};

use crate::error::{Error, Result};
use crate::model::api::sync::VoterKey;

/// Directory of voter public keys, one file per voter named after them.
#[derive(Debug, Clone)]
pub struct KeyStore {
    dir: PathBuf,
}

impl KeyStore {
    /// Open the store at `dir`, creating the directory if necessary.
    pub async fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir).await?;
        Ok(Self { dir })
    }

    /// Location of the store.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Remove every key.
    pub async fn reset(&self) -> Result<()> {
        match fs::remove_dir_all(&self.dir).await {
            Err(e) if e.kind() != ErrorKind::NotFound => return Err(e.into()),
            _ => {}
        }
        fs::create_dir_all(&self.dir).await?;
        Ok(())
    }

    /// Write or overwrite the key for `name`.
    pub async fn write(&self, name: &str, key: &[u8]) -> Result<()> {
        let path = self.path(name)?;
        write_private(&path, key).await
    }

    /// Read the key for `name`, if there is one.
    pub async fn read(&self, name: &str) -> Result<Option<Vec<u8>>> {
        let path = self.path(name)?;
        match fs::read(path).await {
            Ok(key) => Ok(Some(key)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Delete the key for `name`. Deleting a missing key is not an error.
    pub async fn remove(&self, name: &str) -> Result<()> {
        let path = self.path(name)?;
        match fs::remove_file(path).await {
            Err(e) if e.kind() != ErrorKind::NotFound => Err(e.into()),
            _ => Ok(()),
        }
    }

    /// Every key in the store, sorted by voter name.
    pub async fn dump(&self) -> Result<Vec<VoterKey>> {
        let mut keys = Vec::new();
        let mut entries = fs::read_dir(&self.dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            if !entry.file_type().await?.is_file() {
                continue;
            }
            let Ok(name) = entry.file_name().into_string() else {
                warn!("Skipping key file with non UTF-8 name {:?}", entry.file_name());
                continue;
            };
            match fs::read(entry.path()).await {
                Ok(key) => keys.push(VoterKey { name, key }),
                // Raced with an unregistration.
                Err(e) if e.kind() == ErrorKind::NotFound => continue,
                Err(e) => return Err(e.into()),
            }
        }
        keys.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(keys)
    }

    /// Check that `name` can be used as a key file name without escaping the store.
    pub fn check_name(name: &str) -> Result<()> {
        let valid = !name.is_empty()
            && name != "."
            && name != ".."
            && !name.contains(['/', '\\', '\0']);
        if valid {
            Ok(())
        } else {
            Err(Error::Status(
                Status::BadRequest,
                format!("Illegal voter name for a key file: {name:?}"),
            ))
        }
    }

    fn path(&self, name: &str) -> Result<PathBuf> {
        Self::check_name(name)?;
        Ok(self.dir.join(name))
    }
}

/// Write a file readable only by its owner.
pub(crate) async fn write_private(path: &Path, contents: &[u8]) -> Result<()> {
    fs::write(path, contents).await?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(path, std::fs::Permissions::from_mode(0o600)).await?;
    }
    Ok(())
}
