//! Authorization client for the workspace access-control server.
//!
//! Each call resolves to ok, `TokenExpired` (401), `Forbidden` (403) or a
//! network error. A 401 discards the stored token before the error is
//! returned, so a dead token is never retried. A 403 leaves it in place.
//! Retries are the caller's business.
//!
//! Tokens are refreshed proactively, `refresh_margin_ms` before expiry, and at
//! most one refresh per workspace is in flight: concurrent callers await the
//! same future.

pub mod error;
pub mod transport;

use futures_util::future::{BoxFuture, FutureExt, Shared};
use log::{debug, info, warn};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

pub use error::{AuthError, AuthErrorCode, TransportError};
pub use transport::{
    AuthRequest, AuthResponse, AuthTransport, HttpTransport, Method, ScriptedTransport,
};

use crate::config::ClientConfig;
use crate::invite::InviteLink;
use crate::session::{now_millis, Permission, SessionToken};
use crate::token_store::{Generation, TokenStore};

type RefreshResult = Result<(SessionToken, Generation), AuthError>;
type RefreshFlight = Shared<BoxFuture<'static, RefreshResult>>;
type InFlight = Arc<Mutex<HashMap<String, (u64, RefreshFlight)>>>;

/// Result of `GET /api/auth/validate`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Validation {
    pub valid: bool,
    #[serde(default)]
    pub permissions: Option<Permission>,
    #[serde(default)]
    pub expires_at: Option<u64>,
}

/// A newly issued invite token.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InviteToken {
    pub token_id: String,
    pub token: String,
    pub permissions: Permission,
    #[serde(default)]
    pub expires_at: Option<u64>,
}

impl fmt::Debug for InviteToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InviteToken")
            .field("token_id", &self.token_id)
            .field("permissions", &self.permissions)
            .field("expires_at", &self.expires_at)
            .finish_non_exhaustive()
    }
}

/// A token issued for a workspace, as listed by the server. Carries no secret.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenInfo {
    pub id: String,
    pub permissions: Permission,
    #[serde(default)]
    pub expires_at: Option<u64>,
    #[serde(default)]
    pub created_at: Option<u64>,
    #[serde(default)]
    pub revoked: bool,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct IssuedToken {
    token: String,
    permissions: Permission,
    expires_at: u64,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreatedWorkspace {
    workspace_id: String,
    #[serde(flatten)]
    issued: IssuedToken,
}

#[derive(Deserialize)]
struct TokenList {
    tokens: Vec<TokenInfo>,
}

/// Percent-encodes an id for use as a path segment.
pub(crate) fn path_segment(id: &str) -> String {
    url::form_urlencoded::byte_serialize(id.as_bytes()).collect()
}

pub(crate) fn parse_body<T: DeserializeOwned>(body: Value) -> Result<T, AuthError> {
    serde_json::from_value(body).map_err(|e| AuthError::Protocol(e.to_string()))
}

fn error_message(body: &Value) -> String {
    ["error", "message"]
        .iter()
        .find_map(|key| body.get(key).and_then(Value::as_str))
        .map(str::to_owned)
        .unwrap_or_else(|| match body {
            Value::String(s) => s.clone(),
            Value::Null => String::new(),
            other => other.to_string(),
        })
}

/// Maps a response to its body or a typed error.
///
/// On 401 the token read at `generation` is removed, unless it was replaced
/// in the meantime.
fn interpret(
    store: &TokenStore,
    workspace_id: &str,
    required: Permission,
    generation: Generation,
    response: AuthResponse,
) -> Result<Value, AuthError> {
    if response.status == 401 {
        match store.remove_if_generation(workspace_id, generation) {
            Ok(true) => warn!("server rejected token for workspace {workspace_id}; discarded"),
            Ok(false) => {}
            Err(e) => warn!("failed to discard token for workspace {workspace_id}: {e}"),
        }
    }
    check_status(workspace_id, required, response)
}

/// Status mapping without touching the store.
fn check_status(
    workspace_id: &str,
    required: Permission,
    response: AuthResponse,
) -> Result<Value, AuthError> {
    match response.status {
        200..=299 => Ok(response.body),
        401 => Err(AuthError::TokenExpired {
            workspace_id: workspace_id.to_string(),
        }),
        403 => Err(AuthError::Forbidden {
            workspace_id: workspace_id.to_string(),
            required,
        }),
        404 => Err(AuthError::NotFound(error_message(&response.body))),
        status => Err(AuthError::Server {
            status,
            message: error_message(&response.body),
        }),
    }
}

async fn run_refresh(
    transport: Arc<dyn AuthTransport>,
    store: Arc<TokenStore>,
    workspace_id: String,
) -> RefreshResult {
    let (current, generation) = store.get_with_generation(&workspace_id);
    let current = current.ok_or_else(|| AuthError::NoToken {
        workspace_id: workspace_id.clone(),
    })?;

    debug!("refreshing token for workspace {workspace_id}");
    let request = AuthRequest::new(Method::Post, "/api/auth/refresh").bearer(current.token);
    let response = transport.send(request).await?;
    let body = interpret(&store, &workspace_id, Permission::Read, generation, response)?;
    let issued: IssuedToken = parse_body(body)?;

    let fresh = SessionToken::new(
        workspace_id.as_str(),
        issued.token,
        issued.permissions,
        issued.expires_at,
    );
    if let Some(generation) = store.store_if_generation(&fresh, generation)? {
        info!("refreshed token for workspace {workspace_id}");
        return Ok((fresh, generation));
    }

    // Removed or replaced while the request was out; the store wins.
    warn!("token for workspace {workspace_id} changed during refresh; result discarded");
    match store.get_with_generation(&workspace_id) {
        (Some(token), generation) => Ok((token, generation)),
        (None, _) => Err(AuthError::NoToken { workspace_id }),
    }
}

/// Client for the access-control server, backed by a shared [`TokenStore`].
pub struct AuthClient {
    config: ClientConfig,
    store: Arc<TokenStore>,
    transport: Arc<dyn AuthTransport>,
    in_flight: InFlight,
    next_flight: AtomicU64,
}

impl fmt::Debug for AuthClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthClient")
            .field("server_url", &self.config.server_url)
            .field("store", &self.store)
            .finish_non_exhaustive()
    }
}

impl AuthClient {
    pub fn new(
        config: ClientConfig,
        store: Arc<TokenStore>,
        transport: Arc<dyn AuthTransport>,
    ) -> Self {
        Self {
            config,
            store,
            transport,
            in_flight: Arc::new(Mutex::new(HashMap::new())),
            next_flight: AtomicU64::new(0),
        }
    }

    /// A client talking HTTP to `config.server_url`.
    pub fn with_http(config: ClientConfig, store: Arc<TokenStore>) -> Self {
        let transport = Arc::new(HttpTransport::new(config.server_url.as_str()));
        Self::new(config, store, transport)
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<TokenStore> {
        &self.store
    }

    /// `GET /health`; unauthenticated.
    pub async fn health(&self) -> Result<bool, AuthError> {
        let response = self
            .transport
            .send(AuthRequest::new(Method::Get, "/health"))
            .await?;
        Ok((200..300).contains(&response.status))
    }

    /// Create a workspace on the server and store the returned admin token.
    pub async fn create_workspace(&self, name: &str) -> Result<SessionToken, AuthError> {
        let request = AuthRequest::new(Method::Post, "/api/workspaces").json(json!({ "name": name }));
        let response = self.transport.send(request).await?;
        let body = match response.status {
            200..=299 => response.body,
            404 => return Err(AuthError::NotFound(error_message(&response.body))),
            status => {
                return Err(AuthError::Server {
                    status,
                    message: error_message(&response.body),
                })
            }
        };
        let created: CreatedWorkspace = parse_body(body)?;
        if created.workspace_id.is_empty() {
            return Err(AuthError::Protocol("empty workspace id".into()));
        }
        let token = SessionToken::new(
            created.workspace_id,
            created.issued.token,
            created.issued.permissions,
            created.issued.expires_at,
        );
        self.store.store(&token)?;
        info!("created workspace {}", token.workspace_id);
        Ok(token)
    }

    /// Validate the bearer from an invite and store it if the server accepts it.
    ///
    /// The bearer is checked before it touches the store, so a rejected invite
    /// leaves any token already held for the workspace in place. The invite
    /// carries no permission of its own; the server's answer supplies it.
    pub async fn join(&self, invite: &InviteLink) -> Result<Validation, AuthError> {
        let workspace_id = invite.workspace_id.as_str();
        let request =
            AuthRequest::new(Method::Get, "/api/auth/validate").bearer(invite.token.as_str());
        let response = self.transport.send(request).await?;
        let body = check_status(workspace_id, Permission::Read, response)?;
        let validation: Validation = parse_body(body)?;
        if !validation.valid {
            warn!("invite for workspace {workspace_id} is no longer valid");
            return Err(AuthError::TokenExpired {
                workspace_id: workspace_id.to_string(),
            });
        }

        let token = SessionToken::new(
            workspace_id,
            invite.token.as_str(),
            validation.permissions.unwrap_or(Permission::Read),
            validation.expires_at.unwrap_or(u64::MAX),
        );
        self.store.store(&token)?;
        info!("joined workspace {workspace_id} with {}", token.permissions);
        Ok(validation)
    }

    /// Ask the server whether the stored token is still good.
    ///
    /// A valid answer updates the stored permission and expiry; an invalid one
    /// discards the token.
    pub async fn validate(&self, workspace_id: &str) -> Result<Validation, AuthError> {
        let (token, generation) = self.current(workspace_id)?;
        let request = AuthRequest::new(Method::Get, "/api/auth/validate").bearer(token.token.as_str());
        let response = self.transport.send(request).await?;
        let body = interpret(&self.store, workspace_id, Permission::Read, generation, response)?;
        let validation: Validation = parse_body(body)?;

        if !validation.valid {
            self.store.remove_if_generation(workspace_id, generation)?;
            warn!("token for workspace {workspace_id} is no longer valid; discarded");
            return Ok(validation);
        }
        if let (Some(permissions), Some(expires_at)) = (validation.permissions, validation.expires_at) {
            if permissions != token.permissions || expires_at != token.expires_at {
                let updated = SessionToken {
                    permissions,
                    expires_at,
                    ..token
                };
                self.store.store_if_generation(&updated, generation)?;
            }
        }
        Ok(validation)
    }

    /// Exchange the stored token for a new one. Single-flight per workspace.
    pub async fn refresh(&self, workspace_id: &str) -> Result<SessionToken, AuthError> {
        self.refresh_flight(workspace_id)
            .await
            .map(|(token, _)| token)
    }

    fn refresh_flight(&self, workspace_id: &str) -> RefreshFlight {
        let mut in_flight = self.in_flight.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some((_, flight)) = in_flight.get(workspace_id) {
            debug!("joining in-flight refresh for workspace {workspace_id}");
            return flight.clone();
        }

        let id = self.next_flight.fetch_add(1, Ordering::Relaxed);
        let transport = Arc::clone(&self.transport);
        let store = Arc::clone(&self.store);
        let registry = Arc::clone(&self.in_flight);
        let key = workspace_id.to_string();
        let flight = async move {
            let result = run_refresh(transport, store, key.clone()).await;
            let mut in_flight = registry.lock().unwrap_or_else(PoisonError::into_inner);
            if in_flight.get(&key).is_some_and(|(current, _)| *current == id) {
                in_flight.remove(&key);
            }
            result
        }
        .boxed()
        .shared();

        in_flight.insert(workspace_id.to_string(), (id, flight.clone()));
        flight
    }

    /// The stored token, refreshed first if it is within the refresh margin.
    pub async fn ensure_fresh(&self, workspace_id: &str) -> Result<SessionToken, AuthError> {
        self.fresh(workspace_id).await.map(|(token, _)| token)
    }

    /// The token to send right now. An in-flight refresh is always awaited so
    /// no request goes out with the bearer it is replacing.
    async fn fresh(&self, workspace_id: &str) -> RefreshResult {
        if let Some(flight) = self.joinable_flight(workspace_id) {
            debug!("waiting for in-flight refresh for workspace {workspace_id}");
            return flight.await;
        }
        let (token, generation) = self.current(workspace_id)?;
        if token.needs_refresh(now_millis(), self.config.refresh_margin_ms) {
            return self.refresh_flight(workspace_id).await;
        }
        Ok((token, generation))
    }

    fn joinable_flight(&self, workspace_id: &str) -> Option<RefreshFlight> {
        let in_flight = self.in_flight.lock().unwrap_or_else(PoisonError::into_inner);
        in_flight.get(workspace_id).map(|(_, flight)| flight.clone())
    }

    /// The stored token if it grants `required`, checked without any network
    /// traffic.
    pub fn authorize_locally(
        &self,
        workspace_id: &str,
        required: Permission,
    ) -> Result<SessionToken, AuthError> {
        let (token, _) = self.current(workspace_id)?;
        if !token.permissions.allows(required) {
            return Err(AuthError::Forbidden {
                workspace_id: workspace_id.to_string(),
                required,
            });
        }
        Ok(token)
    }

    fn current(&self, workspace_id: &str) -> Result<(SessionToken, Generation), AuthError> {
        match self.store.get_with_generation(workspace_id) {
            (Some(token), generation) => Ok((token, generation)),
            (None, _) => Err(AuthError::NoToken {
                workspace_id: workspace_id.to_string(),
            }),
        }
    }

    /// Send `request` with the workspace's token after checking locally that
    /// it grants `required`. The check runs before any network traffic.
    pub(crate) async fn send_authorized(
        &self,
        workspace_id: &str,
        required: Permission,
        request: AuthRequest,
    ) -> Result<Value, AuthError> {
        let (token, generation) = self.fresh(workspace_id).await?;
        if !token.permissions.allows(required) {
            debug!(
                "{} {} refused locally: {} held, {required} required",
                request.method, request.path, token.permissions
            );
            return Err(AuthError::Forbidden {
                workspace_id: workspace_id.to_string(),
                required,
            });
        }
        debug!("{} {}", request.method, request.path);
        let response = self.transport.send(request.bearer(token.token)).await?;
        interpret(&self.store, workspace_id, required, generation, response)
    }

    /// Issue an invite token. Needs `admin` on the workspace.
    pub async fn create_invite(
        &self,
        workspace_id: &str,
        permissions: Permission,
        expires_at: Option<u64>,
    ) -> Result<InviteToken, AuthError> {
        let mut body = json!({ "permissions": permissions });
        if let Some(expires_at) = expires_at {
            body["expiresAt"] = json!(expires_at);
        }
        let path = format!("/api/workspaces/{}/tokens", path_segment(workspace_id));
        let request = AuthRequest::new(Method::Post, path).json(body);
        let body = self
            .send_authorized(workspace_id, Permission::Admin, request)
            .await?;
        let invite: InviteToken = parse_body(body)?;
        info!(
            "issued {} invite {} for workspace {workspace_id}",
            invite.permissions, invite.token_id
        );
        Ok(invite)
    }

    /// Tokens issued for the workspace. Needs `admin`.
    pub async fn list_tokens(&self, workspace_id: &str) -> Result<Vec<TokenInfo>, AuthError> {
        let path = format!("/api/workspaces/{}/tokens", path_segment(workspace_id));
        let body = self
            .send_authorized(workspace_id, Permission::Admin, AuthRequest::new(Method::Get, path))
            .await?;
        let list: TokenList = parse_body(body)?;
        Ok(list.tokens)
    }

    /// Revoke one issued token. Needs `admin` on the workspace it belongs to.
    pub async fn revoke(&self, token_id: &str, workspace_id: &str) -> Result<(), AuthError> {
        let path = format!("/api/tokens/{}", path_segment(token_id));
        self.send_authorized(workspace_id, Permission::Admin, AuthRequest::new(Method::Delete, path))
            .await?;
        info!("revoked token {token_id} of workspace {workspace_id}");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_message_extraction() {
        assert_eq!(error_message(&json!({"error": "nope"})), "nope");
        assert_eq!(error_message(&json!({"message": "bad"})), "bad");
        assert_eq!(error_message(&Value::String("plain".into())), "plain");
        assert_eq!(error_message(&Value::Null), "");
    }

    #[test]
    fn test_path_segment_escapes() {
        assert_eq!(path_segment("ws-1"), "ws-1");
        assert_eq!(path_segment("a/b"), "a%2Fb");
    }

    #[test]
    fn test_interpret_statuses() {
        let store = TokenStore::in_memory();
        let token = SessionToken::new("w", "t", Permission::Write, u64::MAX);
        let generation = store.store(&token).unwrap();

        let forbidden = interpret(&store, "w", Permission::Admin, generation, AuthResponse::new(403, Value::Null));
        assert_eq!(forbidden.unwrap_err().code(), AuthErrorCode::Forbidden);
        assert!(store.get("w").is_some());

        let server = interpret(&store, "w", Permission::Read, generation, AuthResponse::new(500, json!({"error": "boom"})));
        assert_eq!(
            server.unwrap_err(),
            AuthError::Server {
                status: 500,
                message: "boom".into()
            }
        );

        let expired = interpret(&store, "w", Permission::Read, generation, AuthResponse::new(401, Value::Null));
        assert_eq!(expired.unwrap_err().code(), AuthErrorCode::TokenExpired);
        assert!(store.get("w").is_none());
    }

    #[test]
    fn test_created_workspace_shape() {
        let created: CreatedWorkspace = parse_body(json!({
            "workspaceId": "w1",
            "token": "t",
            "permissions": "admin",
            "expiresAt": 5
        }))
        .unwrap();
        assert_eq!(created.workspace_id, "w1");
        assert_eq!(created.issued.permissions, Permission::Admin);
    }
}
