// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Workspace selection.
//!
//! Scripts belong to workspaces, and most commands need to know which one the
//! user works in. Village remembers a __default workspace__ locally, next to
//! the user's tokens. It is picked automatically right after login, and can
//! be changed later through the `workspace` command.

use crate::{
    api::{ApiError, VillageClient, Workspace},
    store::{CredentialStore, StoreError},
};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, instrument};

/// Locally persisted workspace choice.
#[derive(Debug, PartialEq, Eq, Clone, Deserialize, Serialize)]
pub struct WorkspaceSelection {
    #[serde(rename = "defaultWorkspace")]
    pub default_workspace: WorkspaceRef,
}

impl WorkspaceSelection {
    pub fn new(workspace: Workspace) -> Self {
        Self {
            default_workspace: WorkspaceRef::Workspace(workspace),
        }
    }
}

/// Either a full workspace, or just its identifier.
///
/// Older selection files only carry the identifier. Village always writes the
/// full workspace.
#[derive(Debug, PartialEq, Eq, Clone, Deserialize, Serialize)]
#[serde(untagged)]
pub enum WorkspaceRef {
    Workspace(Workspace),
    Id(String),
}

impl WorkspaceRef {
    pub fn id(&self) -> &str {
        match self {
            Self::Workspace(workspace) => workspace.id.as_str(),
            Self::Id(id) => id.as_str(),
        }
    }
}

/// Identifier of the locally stored default workspace, if any.
pub fn default_workspace_id(store: &CredentialStore) -> Option<String> {
    store
        .workspace_selection()
        .map(|selection| selection.default_workspace.id().to_string())
}

/// Make sure a platform user exists for a freshly logged in identity, and
/// remember a default workspace for them.
///
/// The platform's own default workspace is preferred. Otherwise the first
/// workspace the user is a member of is taken. Profiles without a subject
/// claim are skipped.
///
/// # Errors
///
/// - Return [`WorkspaceError::Api`] if the platform cannot be reached.
/// - Return [`WorkspaceError::Store`] if the selection cannot be persisted.
#[instrument(skip(client, store, profile), level = "debug")]
pub async fn bootstrap_user(
    client: &VillageClient,
    store: &CredentialStore,
    profile: &Value,
) -> Result<Option<Workspace>> {
    if profile.get("sub").and_then(Value::as_str).is_none() {
        debug!("profile has no subject, skip user bootstrap");
        return Ok(None);
    }

    let user = match client.current_user().await {
        Ok(user) => user,
        Err(err) if err.is_not_found() => {
            debug!("no platform user yet, creating one");
            client.create_user().await?
        }
        Err(err) => return Err(err.into()),
    };

    let workspace = match user.default_workspace {
        Some(workspace) => Some(workspace),
        None => client.workspaces().await?.into_iter().next(),
    };

    match &workspace {
        Some(workspace) => {
            store.save_workspace_selection(&WorkspaceSelection::new(workspace.clone()))?;
            debug!("default workspace is {}", workspace.id);
        }
        None => debug!("user {} has no workspaces", user.id),
    }

    Ok(workspace)
}

/// Make workspace the default, both on the platform and locally.
///
/// # Errors
///
/// - Return [`WorkspaceError::Api`] if the platform refuses.
/// - Return [`WorkspaceError::Store`] if the selection cannot be persisted.
#[instrument(skip(client, store, workspace), level = "debug")]
pub async fn set_default(
    client: &VillageClient,
    store: &CredentialStore,
    workspace: &Workspace,
) -> Result<()> {
    if client.set_default_workspace(&workspace.id).await? {
        info!("Default workspace updated");
    }

    store.save_workspace_selection(&WorkspaceSelection::new(workspace.clone()))?;

    Ok(())
}

/// Workspace selection error types.
#[derive(Debug, thiserror::Error)]
pub enum WorkspaceError {
    #[error(transparent)]
    Api(#[from] ApiError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Friendly result alias :3
pub type Result<T, E = WorkspaceError> = std::result::Result<T, E>;
