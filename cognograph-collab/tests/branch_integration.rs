//! Branch creation and merge gating.

use cognograph_collab::{
    AuthClient, AuthError, AuthErrorCode, BranchCoordinator, ClientConfig, LocalMergeError,
    Method, Permission, ScriptedTransport, SessionToken, TokenStore,
};
use cognograph_core::collab::{SharedWorkspace, WorkspaceEdit};
use cognograph_core::{NodeRecord, Point, WorkspaceSnapshot};
use serde_json::json;
use std::sync::Arc;

fn setup(transport: ScriptedTransport) -> (BranchCoordinator, Arc<AuthClient>, Arc<ScriptedTransport>) {
    let transport = Arc::new(transport);
    let store = Arc::new(TokenStore::in_memory());
    let client = Arc::new(AuthClient::new(
        ClientConfig::for_testing(),
        store,
        transport.clone(),
    ));
    (BranchCoordinator::new(client.clone()), client, transport)
}

fn grant(client: &AuthClient, workspace: &str, bearer: &str, permissions: Permission) {
    client
        .store()
        .store(&SessionToken::new(workspace, bearer, permissions, u64::MAX))
        .unwrap();
}

#[tokio::test]
async fn test_create_branch_stores_token_under_branch_id() {
    let transport = ScriptedTransport::new();
    transport.respond(
        Method::Post,
        "/api/workspaces/main/branches",
        201,
        json!({"branchWorkspaceId": "main-b1", "token": "branch-token", "permissions": "admin", "expiresAt": 77}),
    );
    let (coordinator, client, transport) = setup(transport);
    grant(&client, "main", "main-token", Permission::Write);

    let branch = coordinator.create_branch("main", "experiment").await.unwrap();
    assert_eq!(branch.branch_workspace_id, "main-b1");
    assert_eq!(branch.source_workspace_id, "main");

    assert_eq!(client.store().get("main").unwrap().token, "main-token");
    assert_eq!(client.store().get("main-b1").unwrap().token, "branch-token");

    let sent = &transport.requests()[0];
    assert_eq!(sent.bearer.as_deref(), Some("main-token"));
    assert_eq!(sent.body, Some(json!({"name": "experiment"})));
}

#[tokio::test]
async fn test_create_branch_needs_write_on_source() {
    let (coordinator, client, transport) = setup(ScriptedTransport::new());
    grant(&client, "main", "reader", Permission::Read);

    let err = coordinator.create_branch("main", "nope").await.unwrap_err();
    assert_eq!(
        err,
        AuthError::Forbidden {
            workspace_id: "main".into(),
            required: Permission::Write,
        }
    );
    assert!(transport.requests().is_empty());
}

#[tokio::test]
async fn test_branch_id_equal_to_source_is_rejected() {
    let transport = ScriptedTransport::new();
    transport.respond(
        Method::Post,
        "/api/workspaces/main/branches",
        201,
        json!({"branchWorkspaceId": "main", "token": "clobber", "permissions": "read", "expiresAt": 1}),
    );
    let (coordinator, client, _) = setup(transport);
    grant(&client, "main", "main-token", Permission::Admin);

    let err = coordinator.create_branch("main", "bad").await.unwrap_err();
    assert_eq!(err.code(), AuthErrorCode::Protocol);
    let kept = client.store().get("main").unwrap();
    assert_eq!(kept.token, "main-token");
    assert_eq!(kept.permissions, Permission::Admin);
}

#[tokio::test]
async fn test_merge_refused_with_read_on_target() {
    let (coordinator, client, transport) = setup(ScriptedTransport::new());
    grant(&client, "source", "src", Permission::Write);
    grant(&client, "target", "tgt", Permission::Read);

    let err = coordinator.merge_branch("target", "source").await.unwrap_err();
    assert_eq!(
        err,
        AuthError::Forbidden {
            workspace_id: "target".into(),
            required: Permission::Write,
        }
    );
    assert!(transport.requests().is_empty());
    assert!(client.store().get("target").is_some());
}

#[tokio::test]
async fn test_merge_allowed_with_write_on_target_only() {
    let transport = ScriptedTransport::new();
    transport.respond(Method::Post, "/api/workspaces/target/merge", 200, json!({"merged": true}));
    let (coordinator, client, transport) = setup(transport);
    grant(&client, "source", "src", Permission::Read);
    grant(&client, "target", "tgt", Permission::Write);

    let outcome = coordinator.merge_branch("target", "source").await.unwrap();
    assert_eq!(outcome.target_workspace_id, "target");
    assert_eq!(outcome.source_workspace_id, "source");

    let sent = &transport.requests()[0];
    assert_eq!(sent.bearer.as_deref(), Some("tgt"));
    assert_eq!(sent.body, Some(json!({"sourceWorkspaceId": "source"})));
}

#[tokio::test]
async fn test_merge_without_source_token() {
    let transport = ScriptedTransport::new();
    transport.respond(Method::Post, "/api/workspaces/target/merge", 204, serde_json::Value::Null);
    let (coordinator, client, _) = setup(transport);
    grant(&client, "target", "tgt", Permission::Admin);

    coordinator.merge_branch("target", "elsewhere").await.unwrap();
}

#[tokio::test]
async fn test_list_branches() {
    let transport = ScriptedTransport::new();
    transport.respond(
        Method::Get,
        "/api/workspaces/main/branches",
        200,
        json!({"branches": [{"workspaceId": "b1", "name": "first", "createdAt": 10}]}),
    );
    let (coordinator, client, _) = setup(transport);
    grant(&client, "main", "reader", Permission::Read);

    let branches = coordinator.list_branches("main").await.unwrap();
    assert_eq!(branches.len(), 1);
    assert_eq!(branches[0].workspace_id, "b1");
    assert_eq!(branches[0].created_at, Some(10));
}

fn titled(title: &str) -> SharedWorkspace {
    let mut snapshot = WorkspaceSnapshot::new("Main");
    snapshot
        .nodes
        .push(NodeRecord::with_id("n1", "note", Point::new(0.0, 0.0)).field("title", title));
    let mut shared = SharedWorkspace::new();
    shared.populate(&snapshot);
    shared
}

fn retitle(shared: &mut SharedWorkspace, title: &str) {
    shared
        .apply(&[WorkspaceEdit::SetNodeField {
            id: "n1".into(),
            key: "title".into(),
            value: title.into(),
        }])
        .unwrap();
}

#[test]
fn test_local_fork_and_merge() {
    let (coordinator, client, _) = setup(ScriptedTransport::new());
    grant(&client, "main", "main-token", Permission::Write);

    let mut main = titled("A");
    let mut branch = coordinator.fork_local(&main).unwrap();
    retitle(&mut branch, "Edited on branch");
    assert_eq!(main.snapshot_strict().unwrap().nodes[0].title(), Some("A"));

    coordinator.merge_local("main", &mut main, &branch).unwrap();
    assert_eq!(
        main.snapshot_strict().unwrap().nodes[0].title(),
        Some("Edited on branch")
    );
}

#[test]
fn test_local_merge_needs_write_on_target() {
    let (coordinator, client, transport) = setup(ScriptedTransport::new());
    grant(&client, "main", "reader", Permission::Read);

    let mut main = titled("A");
    let mut branch = coordinator.fork_local(&main).unwrap();
    retitle(&mut branch, "Edited on branch");

    let err = coordinator.merge_local("main", &mut main, &branch).unwrap_err();
    assert!(matches!(
        err,
        LocalMergeError::Auth(AuthError::Forbidden {
            required: Permission::Write,
            ..
        })
    ));
    assert!(matches!(
        coordinator.merge_local("unknown", &mut main, &branch),
        Err(LocalMergeError::Auth(AuthError::NoToken { .. }))
    ));
    assert_eq!(main.snapshot_strict().unwrap().nodes[0].title(), Some("A"));
    assert!(transport.requests().is_empty());
}
