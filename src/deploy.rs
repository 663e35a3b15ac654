// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Script deployment logic.
//!
//! Deploying a script means packaging the project it lives in, and handing
//! that package over to the platform as a new build. A __project__ is any
//! directory holding a `village.yaml`. Village searches for it upward from
//! the directory it was invoked in, so deployment works from anywhere inside
//! of a project.
//!
//! # Packaging
//!
//! The whole project directory goes into a gzip compressed tarball, minus
//! whatever the project's [ignore rules](crate::deploy::ignore) exclude. The
//! tarball lives in a uniquely named temporary file that is removed once the
//! deployment is over, no matter how it ended.
//!
//! # Upload
//!
//! The tarball is streamed to the platform's build endpoint as the `context`
//! part of a multipart form, alongside the `script_id` from `village.yaml`.
//! There are no retries.

pub mod ignore;

use crate::{
    api::{ApiError, Build, VillageClient},
    auth::{oauth::AuthorizationServer, AuthError, TokenManager},
    config::{ConfigError, DeploymentConfig},
    deploy::ignore::{IgnoreError, IgnoreMatcher},
    path::{relative_to, CONFIG_FILE},
    report::warn_unauthenticated,
};

use ::ignore::WalkBuilder;
use flate2::{write::GzEncoder, Compression};
use std::{
    fs::{read_to_string, write},
    path::{Path, PathBuf},
};
use tempfile::NamedTempFile;
use tracing::{debug, error, info, instrument, warn};

/// Project rooted at the directory holding its `village.yaml`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Project {
    root: PathBuf,
    config_path: PathBuf,
    config: DeploymentConfig,
}

impl Project {
    /// Find path to `village.yaml` by walking upward from target directory.
    ///
    /// # Errors
    ///
    /// - Return [`DeployError::NoConfig`] if no directory between `cwd` and
    ///   the file system root holds a `village.yaml`.
    pub fn locate(cwd: impl AsRef<Path>) -> Result<PathBuf> {
        cwd.as_ref()
            .ancestors()
            .map(|dir| dir.join(CONFIG_FILE))
            .find(|candidate| candidate.is_file())
            .ok_or_else(|| DeployError::NoConfig(cwd.as_ref().to_path_buf()))
    }

    /// Find and load project enclosing target directory.
    ///
    /// # Errors
    ///
    /// - Return [`DeployError::NoConfig`] if there is no enclosing project.
    /// - Return [`DeployError::ReadConfig`] if `village.yaml` is unreadable.
    /// - Return [`DeployError::Config`] if `village.yaml` is malformed.
    #[instrument(skip(cwd), level = "debug")]
    pub fn discover(cwd: impl AsRef<Path>) -> Result<Self> {
        let config_path = Self::locate(cwd)?;
        let root = config_path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_default();
        let data = read_to_string(&config_path).map_err(|source| DeployError::ReadConfig {
            source,
            path: config_path.clone(),
        })?;
        let config = data.parse()?;
        debug!("found project at {:?}", root.display());

        Ok(Self {
            root,
            config_path,
            config,
        })
    }

    /// Write new project definition into target directory.
    ///
    /// An existing `village.yaml` is overwritten.
    ///
    /// # Errors
    ///
    /// - Return [`DeployError::WriteConfig`] if `village.yaml` cannot be
    ///   written.
    #[instrument(skip(dir, config), level = "debug")]
    pub fn initialize(dir: impl AsRef<Path>, config: DeploymentConfig) -> Result<Self> {
        let root = dir.as_ref().to_path_buf();
        let config_path = root.join(CONFIG_FILE);
        let data = config.to_yaml()?;
        write(&config_path, data).map_err(|source| DeployError::WriteConfig {
            source,
            path: config_path.clone(),
        })?;

        info!("Created script {} ({})", config.name, config.id);
        info!("Run \"village deploy\" to deploy your script to Village.");

        Ok(Self {
            root,
            config_path,
            config,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn config_path(&self) -> &Path {
        &self.config_path
    }

    pub fn config(&self) -> &DeploymentConfig {
        &self.config
    }

    /// Package project into a tarball inside of target directory.
    ///
    /// Excluded directories are skipped wholesale, unless negated ignore
    /// rules exist. In that case everything is visited, because a negated
    /// rule can resurrect files below an excluded directory.
    ///
    /// # Errors
    ///
    /// - Return [`DeployError::Ignore`] if ignore rules do not compile.
    /// - Return [`DeployError::Walk`] if the project cannot be traversed.
    /// - Return [`DeployError::Archive`] if the tarball cannot be written.
    #[instrument(skip(self, dir), level = "debug")]
    pub fn package_in(&self, dir: impl AsRef<Path>) -> Result<Archive> {
        let matcher = IgnoreMatcher::new(&self.root)?;
        let file = tempfile::Builder::new()
            .prefix("village-")
            .suffix(".tar.gz")
            .tempfile_in(dir.as_ref())
            .map_err(|source| DeployError::Archive {
                source,
                path: dir.as_ref().to_path_buf(),
            })?;
        let archive_err = |source| DeployError::Archive {
            source,
            path: file.path().to_path_buf(),
        };

        let mut tarball = tar::Builder::new(GzEncoder::new(file.as_file(), Compression::default()));
        tarball.follow_symlinks(false);

        let prune = !matcher.has_negations();
        let pruner = matcher.clone();
        let root = self.root.clone();
        let walker = WalkBuilder::new(&self.root)
            .standard_filters(false)
            .follow_links(false)
            .filter_entry(move |entry| {
                let is_dir = entry.file_type().is_some_and(|kind| kind.is_dir());
                if !prune || !is_dir || entry.depth() == 0 {
                    return true;
                }

                entry
                    .path()
                    .strip_prefix(&root)
                    .map(|relative| pruner.keeps(relative, true))
                    .unwrap_or(true)
            })
            .build();

        let mut entries = 0;
        for entry in walker {
            let entry = entry?;
            if entry.depth() == 0 || entry.path() == file.path() {
                continue;
            }

            let Ok(relative) = entry.path().strip_prefix(&self.root) else {
                continue;
            };
            let is_dir = entry.file_type().is_some_and(|kind| kind.is_dir());
            if !matcher.keeps(relative, is_dir) {
                debug!("ignore {:?}", relative.display());
                continue;
            }

            if is_dir {
                tarball.append_dir(relative, entry.path())
            } else {
                tarball.append_path_with_name(entry.path(), relative)
            }
            .map_err(archive_err)?;
            entries += 1;
        }

        tarball
            .into_inner()
            .and_then(|encoder| encoder.finish())
            .map_err(archive_err)?;
        debug!("packaged {entries} entries into {:?}", file.path().display());

        Ok(Archive { file })
    }
}

/// Packaged project.
///
/// Backed by a temporary file that is deleted when the archive is dropped.
#[derive(Debug)]
pub struct Archive {
    file: NamedTempFile,
}

impl Archive {
    pub fn path(&self) -> &Path {
        self.file.path()
    }

    /// Delete archive right away, reporting failure to do so.
    pub fn close(self) -> std::io::Result<()> {
        self.file.close()
    }
}

/// Deploy projects to the platform.
#[derive(Debug, Clone)]
pub struct Deployer {
    api_base_url: String,
    temp_dir: PathBuf,
}

impl Deployer {
    /// Construct new deployer against platform API at target URL.
    pub fn new(api_base_url: impl Into<String>) -> Self {
        Self {
            api_base_url: api_base_url.into(),
            temp_dir: std::env::temp_dir(),
        }
    }

    /// Keep temporary archives in target directory.
    pub fn with_temp_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.temp_dir = dir.into();
        self
    }

    /// Deploy project enclosing target directory as a new build.
    ///
    /// Order matters here. The project is located and packaged before any
    /// token is loaded, so a missing `village.yaml` never touches the
    /// network.
    ///
    /// # Errors
    ///
    /// - Return [`DeployError::NoConfig`] if there is no enclosing project.
    /// - Return [`DeployError::Auth`] if the user is not logged in.
    /// - Return [`DeployError::Api`] if the platform rejects the build.
    #[instrument(skip(self, cwd, tokens), level = "debug")]
    pub async fn deploy<S>(&self, cwd: impl AsRef<Path>, tokens: &TokenManager<S>) -> Result<Build>
    where
        S: AuthorizationServer,
    {
        let cwd = cwd.as_ref();
        let project = match Project::discover(cwd) {
            Ok(project) => project,
            Err(err @ DeployError::NoConfig(_)) => {
                error!("No {CONFIG_FILE} file found. Run \"village init\" to create one");
                return Err(err);
            }
            Err(err) => return Err(err),
        };

        let archive = project.package_in(&self.temp_dir)?;
        let tokens = tokens.valid_tokens().await?;
        let client = VillageClient::new(self.api_base_url.as_str(), tokens.access_token);

        let script_id = project.config().id.as_str();
        let build = match client.build_script(script_id, archive.path()).await {
            Ok(build) => build,
            Err(err) => {
                report_failure(&project, cwd, &err);
                return Err(err.into());
            }
        };

        info!("Script deployed successfully");
        info!("{}", archive.path().display());
        if let Err(err) = archive.close() {
            warn!("cannot remove temporary archive: {err}");
        }

        Ok(build)
    }
}

fn report_failure(project: &Project, cwd: &Path, err: &ApiError) {
    let script_id = project.config().id.as_str();
    warn_unauthenticated(err);

    if err.is_not_found() {
        let config_path = relative_to(cwd, project.config_path());
        error!("Script with id '{script_id}' does not exist!");
        error!(
            "Create it by running 'village init --from {}' first!",
            config_path.display()
        );
    } else if err.is_forbidden() {
        error!("You do not have permission to deploy script with id '{script_id}'");
    } else {
        debug!("{err:?}");
    }
}

/// Deployment error types.
#[derive(Debug, thiserror::Error)]
pub enum DeployError {
    /// No `village.yaml` between starting directory and file system root.
    #[error("no {CONFIG_FILE} found from {:?} upward", .0.display())]
    NoConfig(PathBuf),

    /// `village.yaml` exists, but cannot be read.
    #[error("failed to read {:?}", path.display())]
    ReadConfig {
        #[source]
        source: std::io::Error,
        path: PathBuf,
    },

    /// `village.yaml` cannot be written.
    #[error("failed to write {:?}", path.display())]
    WriteConfig {
        #[source]
        source: std::io::Error,
        path: PathBuf,
    },

    /// `village.yaml` is malformed.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Ignore rules do not compile.
    #[error(transparent)]
    Ignore(#[from] IgnoreError),

    /// Project directory cannot be traversed.
    #[error(transparent)]
    Walk(#[from] ::ignore::Error),

    /// Tarball cannot be written.
    #[error("failed to write archive {:?}", path.display())]
    Archive {
        #[source]
        source: std::io::Error,
        path: PathBuf,
    },

    /// No usable access token.
    #[error(transparent)]
    Auth(#[from] AuthError),

    /// Platform refused the build, or could not be reached.
    #[error(transparent)]
    Api(#[from] ApiError),
}

/// Friendly result alias :3
pub type Result<T, E = DeployError> = std::result::Result<T, E>;
