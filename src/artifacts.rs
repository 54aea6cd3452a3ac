//! Durable per-environment artifacts: the generated routing file and the
//! generated private key.
//!
//! Each write lands in a uniquely named temporary file inside the
//! environment directory and is renamed over the target, so readers never
//! observe a half-written file.

use std::io::Write as _;

use camino::{Utf8Path, Utf8PathBuf};
use cap_std::fs::{OpenOptions, OpenOptionsExt as _};
use cap_std::{ambient_authority, fs_utf8::Dir};
use thiserror::Error;
use uuid::Uuid;

use crate::environment::{GENERATED_KEY_FILE, GENERATED_ROUTING_FILE};

const ROUTING_MODE: u32 = 0o644;
const KEY_MODE: u32 = 0o600;

/// Errors raised while persisting artifacts.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum ArtifactError {
    /// Raised when the environment directory cannot be opened.
    #[error("failed to open {path}: {message}")]
    Open {
        /// Directory that could not be opened.
        path: Utf8PathBuf,
        /// Operating system error string.
        message: String,
    },
    /// Raised when writing or renaming a file fails.
    #[error("failed to write {path}: {message}")]
    Write {
        /// Target file.
        path: Utf8PathBuf,
        /// Operating system error string.
        message: String,
    },
}

/// Writes artifacts into a single environment directory.
#[derive(Debug)]
pub struct ArtifactStore {
    root: Utf8PathBuf,
    dir: Dir,
}

impl ArtifactStore {
    /// Opens the environment directory at `root`.
    ///
    /// # Errors
    ///
    /// Returns [`ArtifactError::Open`] when the directory cannot be opened.
    pub fn open(root: &Utf8Path) -> Result<Self, ArtifactError> {
        let dir =
            Dir::open_ambient_dir(root, ambient_authority()).map_err(|err| ArtifactError::Open {
                path: root.to_path_buf(),
                message: err.to_string(),
            })?;
        Ok(Self {
            root: root.to_path_buf(),
            dir,
        })
    }

    /// Directory artifacts are written into.
    #[must_use]
    pub fn root(&self) -> &Utf8Path {
        &self.root
    }

    /// Replaces the generated routing file and returns its path.
    ///
    /// # Errors
    ///
    /// Returns [`ArtifactError::Write`] when the file cannot be written.
    pub fn write_routing(&self, document: &str) -> Result<Utf8PathBuf, ArtifactError> {
        self.replace(GENERATED_ROUTING_FILE, document.as_bytes(), ROUTING_MODE)
    }

    /// Replaces the generated private key, readable by the owner only, and
    /// returns its path. A trailing newline is added when missing because
    /// OpenSSH rejects keys without one.
    ///
    /// # Errors
    ///
    /// Returns [`ArtifactError::Write`] when the file cannot be written.
    pub fn write_key(&self, key: &str) -> Result<Utf8PathBuf, ArtifactError> {
        let mut material = key.to_owned();
        if !material.ends_with('\n') {
            material.push('\n');
        }
        self.replace(GENERATED_KEY_FILE, material.as_bytes(), KEY_MODE)
    }

    fn replace(&self, name: &str, contents: &[u8], mode: u32) -> Result<Utf8PathBuf, ArtifactError> {
        let target = self.root.join(name);
        let write_error = |err: std::io::Error| ArtifactError::Write {
            path: target.clone(),
            message: err.to_string(),
        };
        let temp_name = format!(".{name}.{}.tmp", Uuid::new_v4().simple());

        let mut options = OpenOptions::new();
        options.write(true).create_new(true).mode(mode);
        let written = self
            .dir
            .open_with(&temp_name, &options)
            .and_then(|mut file| {
                file.write_all(contents)?;
                file.sync_all()
            })
            .and_then(|()| self.dir.rename(&temp_name, &self.dir, name));

        if let Err(err) = written {
            if let Err(cleanup) = self.dir.remove_file(&temp_name) {
                tracing::debug!(file = %temp_name, error = %cleanup, "temporary file not removed");
            }
            return Err(write_error(err));
        }
        tracing::debug!(path = %target, "artifact written");
        Ok(target)
    }
}

#[cfg(test)]
mod tests {
    use std::os::unix::fs::PermissionsExt as _;

    use super::*;
    use tempfile::TempDir;

    fn store() -> (TempDir, ArtifactStore) {
        let tmp = TempDir::new().expect("tempdir");
        let root = Utf8PathBuf::from_path_buf(tmp.path().to_path_buf()).expect("utf8 path");
        let artifacts = ArtifactStore::open(&root).expect("open store");
        (tmp, artifacts)
    }

    #[test]
    fn routing_file_is_replaced_in_place() {
        let (_tmp, artifacts) = store();
        let path = artifacts.write_routing("Host *\n  User a\n").expect("first write");
        artifacts.write_routing("Host *\n  User b\n").expect("second write");

        let contents = std::fs::read_to_string(&path).expect("read routing");
        assert_eq!(contents, "Host *\n  User b\n");
        assert_eq!(path, artifacts.root().join(GENERATED_ROUTING_FILE));
    }

    #[test]
    fn key_is_owner_only_and_newline_terminated() {
        let (_tmp, artifacts) = store();
        let path = artifacts.write_key("-----BEGIN KEY-----").expect("write key");

        let metadata = std::fs::metadata(&path).expect("metadata");
        assert_eq!(metadata.permissions().mode() & 0o777, 0o600);
        let contents = std::fs::read_to_string(&path).expect("read key");
        assert_eq!(contents, "-----BEGIN KEY-----\n");
    }

    #[test]
    fn no_temporary_files_remain() {
        let (tmp, artifacts) = store();
        artifacts.write_routing("Host *\n").expect("write");
        artifacts.write_key("KEY\n").expect("write key");

        let mut names: Vec<String> = std::fs::read_dir(tmp.path())
            .expect("read dir")
            .map(|entry| entry.expect("entry").file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        assert_eq!(names, vec![GENERATED_ROUTING_FILE, GENERATED_KEY_FILE]);
    }

    #[test]
    fn open_reports_missing_directory() {
        let err = ArtifactStore::open(Utf8Path::new("/nonexistent/stacksmith/artifacts"))
            .expect_err("missing dir");
        assert!(matches!(err, ArtifactError::Open { .. }));
    }
}
