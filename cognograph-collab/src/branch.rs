//! Branch and merge coordination.
//!
//! Creating a branch needs `write` on the source. Merging needs `write` on
//! the target only: the target is what changes. The server performs the
//! document-level merge; locally this module gates permissions and keeps the
//! token bookkeeping straight.

use log::info;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use thiserror::Error;

use cognograph_core::collab::{CodecError, SharedWorkspace};

use crate::auth::{parse_body, path_segment, AuthClient, AuthError, AuthRequest, Method};
use crate::session::{Permission, SessionToken};

/// Failure of [`BranchCoordinator::merge_local`].
#[derive(Debug, Error)]
pub enum LocalMergeError {
    #[error(transparent)]
    Auth(#[from] AuthError),
    #[error(transparent)]
    Codec(#[from] CodecError),
}

/// A branch created by this client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Branch {
    pub source_workspace_id: String,
    pub branch_workspace_id: String,
    pub name: String,
    pub token: SessionToken,
}

/// A branch as listed by the server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BranchInfo {
    pub workspace_id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub created_at: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergeOutcome {
    pub target_workspace_id: String,
    pub source_workspace_id: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreatedBranch {
    branch_workspace_id: String,
    token: String,
    permissions: Permission,
    expires_at: u64,
}

#[derive(Deserialize)]
struct BranchList {
    branches: Vec<BranchInfo>,
}

#[derive(Debug, Clone)]
pub struct BranchCoordinator {
    auth: Arc<AuthClient>,
}

impl BranchCoordinator {
    pub fn new(auth: Arc<AuthClient>) -> Self {
        Self { auth }
    }

    /// Fork `source_workspace_id` on the server.
    ///
    /// The new token is stored under the branch id; the source token is left
    /// untouched.
    pub async fn create_branch(
        &self,
        source_workspace_id: &str,
        name: &str,
    ) -> Result<Branch, AuthError> {
        let path = format!("/api/workspaces/{}/branches", path_segment(source_workspace_id));
        let request = AuthRequest::new(Method::Post, path).json(json!({ "name": name }));
        let body = self
            .auth
            .send_authorized(source_workspace_id, Permission::Write, request)
            .await?;
        let created: CreatedBranch = parse_body(body)?;

        if created.branch_workspace_id.is_empty()
            || created.branch_workspace_id == source_workspace_id
        {
            return Err(AuthError::Protocol(format!(
                "server returned branch id `{}` for source `{source_workspace_id}`",
                created.branch_workspace_id
            )));
        }

        let token = SessionToken::new(
            created.branch_workspace_id.as_str(),
            created.token,
            created.permissions,
            created.expires_at,
        );
        self.auth.store().store(&token)?;
        info!(
            "created branch {} of workspace {source_workspace_id}",
            created.branch_workspace_id
        );

        Ok(Branch {
            source_workspace_id: source_workspace_id.to_string(),
            branch_workspace_id: created.branch_workspace_id,
            name: name.to_string(),
            token,
        })
    }

    /// Branches forked from `workspace_id`. Needs `read`.
    pub async fn list_branches(&self, workspace_id: &str) -> Result<Vec<BranchInfo>, AuthError> {
        let path = format!("/api/workspaces/{}/branches", path_segment(workspace_id));
        let body = self
            .auth
            .send_authorized(workspace_id, Permission::Read, AuthRequest::new(Method::Get, path))
            .await?;
        let list: BranchList = parse_body(body)?;
        Ok(list.branches)
    }

    /// Merge `source_workspace_id` into `target_workspace_id`.
    ///
    /// Gated on `write` for the target and sent with the target's token. No
    /// token for the source is needed.
    pub async fn merge_branch(
        &self,
        target_workspace_id: &str,
        source_workspace_id: &str,
    ) -> Result<MergeOutcome, AuthError> {
        let path = format!("/api/workspaces/{}/merge", path_segment(target_workspace_id));
        let request = AuthRequest::new(Method::Post, path)
            .json(json!({ "sourceWorkspaceId": source_workspace_id }));
        self.auth
            .send_authorized(target_workspace_id, Permission::Write, request)
            .await?;
        info!("merged workspace {source_workspace_id} into {target_workspace_id}");
        Ok(MergeOutcome {
            target_workspace_id: target_workspace_id.to_string(),
            source_workspace_id: source_workspace_id.to_string(),
        })
    }

    /// Local copy of a document for a new branch.
    pub fn fork_local(&self, source: &SharedWorkspace) -> Result<SharedWorkspace, CodecError> {
        source.fork()
    }

    /// Pull a branch document into the target workspace's document.
    ///
    /// Gated like [`merge_branch`](Self::merge_branch): the stored token for
    /// `target_workspace_id` must grant `write`, checked locally. Conflicts
    /// resolve by the CRDT's per-field rules.
    pub fn merge_local(
        &self,
        target_workspace_id: &str,
        target: &mut SharedWorkspace,
        branch: &SharedWorkspace,
    ) -> Result<(), LocalMergeError> {
        self.auth
            .authorize_locally(target_workspace_id, Permission::Write)?;
        target.merge_from(branch)?;
        info!("merged local branch document into {target_workspace_id}");
        Ok(())
    }
}
