// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Path resolution utilities.
//!
//! Determine where Village keeps its per-user state, and where a project's
//! files live relative to the directory the user invoked us from.

use std::path::{Component, Path, PathBuf};

/// Name of the project definition file.
pub const CONFIG_FILE: &str = "village.yaml";

/// Name of the project ignore file.
pub const IGNORE_FILE: &str = ".villageignore";

/// Determine absolute path to user's home directory.
///
/// Does not check if the path returned actually exists.
///
/// # Errors
///
/// - Return [`NoWayHome`] if home directory path cannot be determined.
pub fn home_dir() -> Result<PathBuf> {
    dirs::home_dir().ok_or(NoWayHome)
}

/// Determine absolute path to Village's state directory.
///
/// Uses `$VILLAGE_HOME` when set and non-empty, otherwise `$HOME/.village`.
/// Token and workspace files are kept here. Does not check if the path
/// returned actually exists.
///
/// # Errors
///
/// - Return [`NoWayHome`] if home directory path cannot be determined.
pub fn village_home_dir() -> Result<PathBuf> {
    match std::env::var_os("VILLAGE_HOME") {
        Some(path) if !path.is_empty() => Ok(PathBuf::from(path)),
        _ => home_dir().map(|home| home.join(".village")),
    }
}

/// Express `target` relative to `base`.
///
/// Both paths are expected to be absolute. Falls back to `target` itself when
/// the two paths share no common prefix, e.g., different drive letters.
pub fn relative_to(base: impl AsRef<Path>, target: impl AsRef<Path>) -> PathBuf {
    let base = base.as_ref().components().collect::<Vec<_>>();
    let target_path = target.as_ref();
    let target = target_path.components().collect::<Vec<_>>();

    let common = base
        .iter()
        .zip(target.iter())
        .take_while(|(lhs, rhs)| lhs == rhs)
        .count();

    if common == 0 {
        return target_path.to_path_buf();
    }

    let mut relative = PathBuf::new();
    for component in &base[common..] {
        if matches!(component, Component::Normal(_)) {
            relative.push("..");
        }
    }
    for component in &target[common..] {
        relative.push(component.as_os_str());
    }

    relative
}

/// No way to determine user's home directory.
///
/// # See Also
///
/// - [`dirs::home_dir`](https://docs.rs/dirs/latest/dirs/fn.home_dir.html)
#[derive(Clone, Debug, thiserror::Error)]
#[error("cannot determine absolute path to user's home directory")]
pub struct NoWayHome;

/// Friendly result alias :3
pub type Result<T, E = NoWayHome> = std::result::Result<T, E>;
