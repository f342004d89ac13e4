//! Persistent endpoint identity
//!
//! The identity file holds exactly [`ZID_SIZE`] raw bytes. A missing file is
//! created with a fresh random identifier.

use ring::rand::{SecureRandom, SystemRandom};
use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;
use zgate_protocol::{Zid, ZID_SIZE};

/// Identity file errors
#[derive(Error, Debug)]
pub enum IdentityError {
    #[error("Cannot access identity file {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error(
        "Identity file {} is corrupt: expected {} bytes, found {len}",
        .path.display(),
        ZID_SIZE
    )]
    Corrupt { path: PathBuf, len: usize },

    #[error("No entropy available for a new identifier")]
    Random,
}

/// Opened identity file
#[derive(Debug, Clone)]
pub struct ZidFile {
    path: PathBuf,
    zid: Zid,
}

impl ZidFile {
    /// Open the identity file at `path`, creating it if it does not exist
    pub fn open(path: impl AsRef<Path>) -> Result<Self, IdentityError> {
        let path = path.as_ref().to_path_buf();

        match fs::read(&path) {
            Ok(data) => {
                let zid = Zid::try_from(data.as_slice()).map_err(|_| IdentityError::Corrupt {
                    path: path.clone(),
                    len: data.len(),
                })?;
                tracing::debug!("Loaded identity from {}", path.display());
                Ok(ZidFile { path, zid })
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Self::create(path),
            Err(source) => Err(IdentityError::Io { path, source }),
        }
    }

    fn create(path: PathBuf) -> Result<Self, IdentityError> {
        let mut zid = [0u8; ZID_SIZE];
        SystemRandom::new()
            .fill(&mut zid)
            .map_err(|_| IdentityError::Random)?;

        let io_err = |source| IdentityError::Io {
            path: path.clone(),
            source,
        };

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(io_err)?;
        }
        let mut file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .map_err(io_err)?;
        file.write_all(&zid).map_err(io_err)?;
        file.sync_all().map_err(io_err)?;

        tracing::info!("Created new identity file {}", path.display());
        Ok(ZidFile { path, zid })
    }

    /// The stored identifier
    pub fn zid(&self) -> Zid {
        self.zid
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}
