// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Village platform API client.
//!
//! Thin typed layer over the REST API. Each [`VillageClient`] carries its own
//! bearer token, so there is no process-wide client configuration to mutate.
//! All endpoints speak JSON except for build uploads, which are sent as
//! `multipart/form-data`.

pub mod model;

pub use model::*;

use reqwest::{
    multipart::{Form, Part},
    Body, Client, RequestBuilder, StatusCode,
};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::path::{Path, PathBuf};
use tracing::{debug, instrument};

/// File name of the uploaded build context.
pub const CONTEXT_FILE_NAME: &str = "context.tar.gz";

/// Authenticated platform API client.
#[derive(Debug, Clone)]
pub struct VillageClient {
    http: Client,
    base_url: String,
    token: String,
}

impl VillageClient {
    /// Construct new client for API at `base_url` acting with `token`.
    pub fn new(base_url: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            http: Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token: token.into(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    async fn send<T>(&self, request: RequestBuilder) -> Result<T>
    where
        T: DeserializeOwned,
    {
        let response = request.bearer_auth(&self.token).send().await?;
        let status = response.status();
        let body = response.text().await?;
        debug!("api responded with {status}");

        if !status.is_success() {
            return Err(ApiError::Status { status, body });
        }

        serde_json::from_str(&body).map_err(|source| ApiError::Decode { source, body })
    }

    /// Fetch platform user of the token holder.
    pub async fn current_user(&self) -> Result<UserWithWorkspaces> {
        self.send(self.http.get(self.url("/user/get"))).await
    }

    /// Create platform user for the token holder.
    pub async fn create_user(&self) -> Result<UserWithWorkspaces> {
        self.send(self.http.post(self.url("/user/create"))).await
    }

    /// List workspaces the user is a member of.
    pub async fn workspaces(&self) -> Result<Vec<Workspace>> {
        self.send(self.http.get(self.url("/workspace/list"))).await
    }

    /// Make workspace the user's default on the platform.
    pub async fn set_default_workspace(&self, workspace_id: &str) -> Result<bool> {
        let request = self
            .http
            .post(self.url("/workspace/set_default"))
            .query(&[("workspace_id", workspace_id)]);
        self.send(request).await
    }

    /// Register new script.
    pub async fn create_script(&self, input: &CreateScriptInput) -> Result<Script> {
        self.send(self.http.post(self.url("/script/create")).json(input))
            .await
    }

    /// Fetch script with its builds.
    pub async fn script(&self, script_id: &str) -> Result<ScriptWithMeta> {
        let request = self
            .http
            .get(self.url("/script/get"))
            .query(&[("script_id", script_id)]);
        self.send(request).await
    }

    /// List scripts of a workspace.
    pub async fn scripts(&self, workspace_id: &str) -> Result<Vec<Script>> {
        let request = self
            .http
            .get(self.url("/script/list"))
            .query(&[("workspace_id", workspace_id)]);
        self.send(request).await
    }

    pub async fn builds(&self, script_id: &str) -> Result<Vec<Build>> {
        let request = self
            .http
            .get(self.url("/script/builds"))
            .query(&[("script_id", script_id)]);
        self.send(request).await
    }

    pub async fn runs(&self, script_id: &str) -> Result<Vec<Run>> {
        let request = self
            .http
            .get(self.url("/script/runs"))
            .query(&[("script_id", script_id)]);
        self.send(request).await
    }

    pub async fn schedules(&self, script_id: &str) -> Result<Vec<Schedule>> {
        let request = self
            .http
            .get(self.url("/script/schedules"))
            .query(&[("script_id", script_id)]);
        self.send(request).await
    }

    /// Delete script, returning what was deleted.
    pub async fn delete_script(&self, script_id: &str) -> Result<Script> {
        let request = self
            .http
            .delete(self.url("/script/delete"))
            .query(&[("script_id", script_id)]);
        self.send(request).await
    }

    /// Run newest build of a script.
    pub async fn run_script(&self, input: &RunScriptInput) -> Result<Run> {
        self.send(self.http.post(self.url("/script/run")).json(input))
            .await
    }

    /// Upload build context archive for a script.
    ///
    /// The archive is streamed from disk rather than loaded into memory.
    ///
    /// # Errors
    ///
    /// - Return [`ApiError::Archive`] if the archive cannot be opened.
    /// - Return [`ApiError::Status`] if the platform rejects the build.
    #[instrument(skip(self, archive), level = "debug")]
    pub async fn build_script(&self, script_id: &str, archive: impl AsRef<Path>) -> Result<Build> {
        let archive = archive.as_ref();
        let archive_err = |source| ApiError::Archive {
            source,
            path: archive.to_path_buf(),
        };

        let file = tokio::fs::File::open(archive).await.map_err(archive_err)?;
        let length = file.metadata().await.map_err(archive_err)?.len();
        let context = Part::stream_with_length(Body::from(file), length)
            .file_name(CONTEXT_FILE_NAME)
            .mime_str("application/gzip")?;
        let form = Form::new()
            .text("script_id", script_id.to_string())
            .part("context", context);

        self.send(self.http.post(self.url("/script/build")).multipart(form))
            .await
    }
}

/// Platform API error types.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// Request never got a response.
    #[error(transparent)]
    Transport(#[from] reqwest::Error),

    /// Platform answered with a non-success status.
    #[error("platform responded with {status}: {body}")]
    Status { status: StatusCode, body: String },

    /// Success response that does not look like what we asked for.
    #[error("failed to decode platform response: {body}")]
    Decode {
        #[source]
        source: serde_json::Error,
        body: String,
    },

    /// Build context archive cannot be read.
    #[error("failed to read build archive {:?}", path.display())]
    Archive {
        #[source]
        source: std::io::Error,
        path: PathBuf,
    },
}

impl ApiError {
    /// Status code of the response, if there was one.
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            Self::Status { status, .. } => Some(*status),
            _ => None,
        }
    }

    pub fn is_unauthorized(&self) -> bool {
        self.status() == Some(StatusCode::UNAUTHORIZED)
    }

    pub fn is_forbidden(&self) -> bool {
        self.status() == Some(StatusCode::FORBIDDEN)
    }

    pub fn is_not_found(&self) -> bool {
        self.status() == Some(StatusCode::NOT_FOUND)
    }

    pub fn is_bad_request(&self) -> bool {
        self.status() == Some(StatusCode::BAD_REQUEST)
    }

    /// Human readable reason the platform gave, i.e., the `detail` field of
    /// its error body.
    pub fn detail(&self) -> Option<String> {
        let Self::Status { body, .. } = self else {
            return None;
        };

        match serde_json::from_str::<Value>(body).ok()?.get("detail")? {
            Value::String(detail) => Some(detail.clone()),
            other => Some(other.to_string()),
        }
    }
}

/// Friendly result alias :3
pub type Result<T, E = ApiError> = std::result::Result<T, E>;
