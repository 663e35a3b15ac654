// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Credential store management.
//!
//! Village keeps two pieces of per-user state on disk inside of its home
//! directory, i.e., `$HOME/.village`:
//!
//! - `tokens.json` holds the OAuth token set obtained through login.
//! - `workspaces.json` holds the user's default workspace selection.
//!
//! Both files are plain pretty-printed JSON. There is no locking. The CLI only
//! ever runs one command per process, so the last writer simply wins.

use crate::{auth::TokenSet, workspace::WorkspaceSelection};

use serde::{de::DeserializeOwned, Serialize};
use std::{
    fs::{read_to_string, remove_file, write},
    io::ErrorKind,
    path::{Path, PathBuf},
};
use tracing::{debug, instrument};

/// Local credential store.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CredentialStore {
    tokens_path: PathBuf,
    workspaces_path: PathBuf,
}

impl CredentialStore {
    /// Open credential store rooted at target directory.
    ///
    /// Does not touch the file system. Directories are created lazily on the
    /// first write.
    pub fn open(home: impl AsRef<Path>) -> Self {
        Self {
            tokens_path: home.as_ref().join("tokens.json"),
            workspaces_path: home.as_ref().join("workspaces.json"),
        }
    }

    pub fn tokens_path(&self) -> &Path {
        &self.tokens_path
    }

    pub fn workspaces_path(&self) -> &Path {
        &self.workspaces_path
    }

    /// Load stored token set, if any.
    pub fn tokens(&self) -> Option<TokenSet> {
        read_json(&self.tokens_path)
    }

    /// Check if a usable token set is stored.
    ///
    /// An empty or corrupt token file does not count.
    pub fn is_logged_in(&self) -> bool {
        self.tokens().is_some()
    }

    /// Persist token set.
    ///
    /// # Errors
    ///
    /// - Return [`StoreError`] if the token file cannot be written.
    pub fn save_tokens(&self, tokens: &TokenSet) -> Result<()> {
        write_json(&self.tokens_path, tokens)
    }

    /// Load stored workspace selection, if any.
    pub fn workspace_selection(&self) -> Option<WorkspaceSelection> {
        read_json(&self.workspaces_path)
    }

    /// Persist workspace selection.
    ///
    /// # Errors
    ///
    /// - Return [`StoreError`] if the workspace file cannot be written.
    pub fn save_workspace_selection(&self, selection: &WorkspaceSelection) -> Result<()> {
        write_json(&self.workspaces_path, selection)
    }

    /// Remove token and workspace files.
    ///
    /// Files that do not exist are skipped.
    ///
    /// # Errors
    ///
    /// - Return [`StoreError::Remove`] if an existing file cannot be removed.
    #[instrument(skip(self), level = "debug")]
    pub fn clear(&self) -> Result<()> {
        for path in [&self.tokens_path, &self.workspaces_path] {
            match remove_file(path) {
                Ok(()) => debug!("removed {:?}", path.display()),
                Err(err) if err.kind() == ErrorKind::NotFound => {
                    debug!("nothing to remove at {:?}", path.display())
                }
                Err(err) => {
                    return Err(StoreError::Remove {
                        source: err,
                        path: path.clone(),
                    })
                }
            }
        }

        Ok(())
    }
}

/// Read JSON file into target type.
///
/// Any I/O or parsing failure yields [`None`]. The failure itself is only
/// visible through debug logging.
pub fn read_json<T>(path: impl AsRef<Path>) -> Option<T>
where
    T: DeserializeOwned,
{
    let path = path.as_ref();
    let data = match read_to_string(path) {
        Ok(data) => data,
        Err(err) => {
            debug!("cannot read {:?}: {err}", path.display());
            return None;
        }
    };

    match serde_json::from_str(&data) {
        Ok(value) => Some(value),
        Err(err) => {
            debug!("cannot parse {:?}: {err}", path.display());
            None
        }
    }
}

/// Write value as pretty-printed JSON.
///
/// All missing ancestor directories are created first. Existing directories
/// are left alone.
///
/// # Errors
///
/// - Return [`StoreError::CreateDir`] if parent directories cannot be made.
/// - Return [`StoreError::Serialize`] if value cannot be serialized.
/// - Return [`StoreError::Write`] if file cannot be written.
pub fn write_json<T>(path: impl AsRef<Path>, value: &T) -> Result<()>
where
    T: Serialize + ?Sized,
{
    let path = path.as_ref();
    if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
        mkdirp::mkdirp(parent).map_err(|err| StoreError::CreateDir {
            source: err,
            path: parent.to_path_buf(),
        })?;
    }

    let contents = serde_json::to_string_pretty(value)?;
    write(path, contents).map_err(|err| StoreError::Write {
        source: err,
        path: path.to_path_buf(),
    })?;
    debug!("wrote {:?}", path.display());

    Ok(())
}

/// Credential store error types.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Parent directories of a state file cannot be created.
    #[error("failed to create directory {:?}", path.display())]
    CreateDir {
        #[source]
        source: std::io::Error,
        path: PathBuf,
    },

    /// State file cannot be written to.
    #[error("failed to write {:?}", path.display())]
    Write {
        #[source]
        source: std::io::Error,
        path: PathBuf,
    },

    /// State file cannot be removed.
    #[error("failed to remove {:?}", path.display())]
    Remove {
        #[source]
        source: std::io::Error,
        path: PathBuf,
    },

    /// Value cannot be serialized into JSON.
    #[error(transparent)]
    Serialize(#[from] serde_json::Error),
}

/// Friendly result alias :3
pub type Result<T, E = StoreError> = std::result::Result<T, E>;
