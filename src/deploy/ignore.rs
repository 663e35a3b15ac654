// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Ignore rule handling.
//!
//! Decide which files of a project end up in its deployment archive.
//!
//! # Ignore Rules
//!
//! A fixed set of __default ignore rules__ always applies. It keeps version
//! control metadata, editor folders, dependency and build directories, and OS
//! clutter out of the archive. Projects can add their own rules through a
//! `.villageignore` file at their top-level. Each non-empty line is one rule
//! written in gitignore syntax, e.g., `*.log` or `data/`.
//!
//! # Negation
//!
//! A rule starting with `!` __force-includes__ whatever it matches. Unlike
//! gitignore, rule order does not matter. A path is kept when no exclude rule
//! matches it, _or_ when any negated rule matches it:
//!
//! ```text
//! keep = !exclude(path) || negated(path)
//! ```
//!
//! Thus `dist` together with `!dist/keep.txt` ships `dist/keep.txt` and
//! nothing else from `dist`.

use crate::path::IGNORE_FILE;

use ignore::gitignore::{Gitignore, GitignoreBuilder};
use std::{fs::read_to_string, path::Path};
use tracing::{debug, instrument};

/// Rules that always apply.
pub const DEFAULT_IGNORE: &[&str] = &[
    ".git",
    ".gitmodules",
    ".vscode",
    ".next",
    ".npm",
    ".venv",
    ".yarn",
    "__pycache__",
    "bin",
    "dist",
    "node_modules",
    "yarn-error.log",
    ".DS_Store",
];

/// Ignore rule listing split by polarity.
///
/// # Invariant
///
/// - Default rules come first, in their fixed order.
/// - Empty lines never make it in.
/// - Negated rules are stored without their leading `!`.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct IgnoreRuleSet {
    exclude: Vec<String>,
    negated: Vec<String>,
}

impl IgnoreRuleSet {
    /// Construct rule set from default rules plus extra rules.
    pub fn new(rules: impl IntoIterator<Item = impl Into<String>>) -> Self {
        let mut set = Self::default();
        let defaults = DEFAULT_IGNORE.iter().map(|rule| rule.to_string());
        for rule in defaults.chain(rules.into_iter().map(Into::into)) {
            let rule = rule.trim_end_matches('\r');
            if rule.is_empty() {
                continue;
            }

            match rule.strip_prefix('!') {
                Some(negated) => set.negated.push(negated.to_string()),
                None => set.exclude.push(rule.to_string()),
            }
        }

        set
    }

    /// Load default rules plus rules of `.villageignore` in target directory.
    ///
    /// A missing or unreadable ignore file only leaves the defaults.
    #[instrument(skip(base_dir), level = "debug")]
    pub fn load(base_dir: impl AsRef<Path>) -> Self {
        let ignore_path = base_dir.as_ref().join(IGNORE_FILE);
        match read_to_string(&ignore_path) {
            Ok(content) => Self::new(content.split('\n')),
            Err(err) => {
                debug!("no {IGNORE_FILE} at {:?}: {err}", ignore_path.display());
                Self::new(Vec::<String>::new())
            }
        }
    }

    pub fn exclude(&self) -> &[String] {
        &self.exclude
    }

    pub fn negated(&self) -> &[String] {
        &self.negated
    }
}

/// Path predicate built from an [`IgnoreRuleSet`].
#[derive(Clone, Debug)]
pub struct IgnoreMatcher {
    exclude: Gitignore,
    negated: Gitignore,
}

impl IgnoreMatcher {
    /// Build matcher for project at target directory.
    ///
    /// # Errors
    ///
    /// - Return [`IgnoreError::Pattern`] if a rule is not a valid glob.
    pub fn new(base_dir: impl AsRef<Path>) -> Result<Self> {
        let rules = IgnoreRuleSet::load(base_dir.as_ref());
        Self::from_rules(base_dir, &rules)
    }

    /// Build matcher from an existing rule set.
    ///
    /// # Errors
    ///
    /// - Return [`IgnoreError::Pattern`] if a rule is not a valid glob.
    pub fn from_rules(base_dir: impl AsRef<Path>, rules: &IgnoreRuleSet) -> Result<Self> {
        Ok(Self {
            exclude: compile(base_dir.as_ref(), rules.exclude())?,
            negated: compile(base_dir.as_ref(), rules.negated())?,
        })
    }

    /// Decide if path relative to the project root goes into the archive.
    ///
    /// A rule matches a path if it matches the path itself or any of its
    /// parent directories.
    pub fn keeps(&self, path: impl AsRef<Path>, is_dir: bool) -> bool {
        let path = path.as_ref();
        let excluded = self
            .exclude
            .matched_path_or_any_parents(path, is_dir)
            .is_ignore();
        let forced = self
            .negated
            .matched_path_or_any_parents(path, is_dir)
            .is_ignore();

        !excluded || forced
    }

    /// Check if any negated rule exists.
    ///
    /// Excluded directories can only be skipped wholesale if nothing below
    /// them could be force-included.
    pub fn has_negations(&self) -> bool {
        self.negated.num_ignores() > 0
    }
}

fn compile(base_dir: &Path, rules: &[String]) -> Result<Gitignore> {
    let mut builder = GitignoreBuilder::new(base_dir);
    for rule in rules {
        builder
            .add_line(None, rule)
            .map_err(|err| IgnoreError::Pattern {
                source: err,
                rule: rule.clone(),
            })?;
    }

    builder.build().map_err(|err| IgnoreError::Pattern {
        source: err,
        rule: rules.join(", "),
    })
}

/// Ignore rule error types.
#[derive(Debug, thiserror::Error)]
pub enum IgnoreError {
    /// Rule cannot be compiled into a glob.
    #[error("invalid ignore rule {rule:?}")]
    Pattern {
        #[source]
        source: ignore::Error,
        rule: String,
    },
}

/// Friendly result alias :3
pub type Result<T, E = IgnoreError> = std::result::Result<T, E>;
