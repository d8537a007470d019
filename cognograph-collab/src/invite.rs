//! Invite deep-link parsing.
//!
//! Accepted forms:
//! ```text
//! cognograph://join/{workspaceId}?token={token}[&server={restUrl}]
//! cognograph:join/{workspaceId}?token={token}
//! ```
//! Input comes from the OS and is untrusted; every failure is a typed
//! [`InviteParseError`]. The `server` parameter is ignored unless
//! [`LinkConfig::allow_server_override`] is set.

use std::fmt;
use percent_encoding::percent_decode_str;
use thiserror::Error;
use url::Url;

use crate::config::LinkConfig;

const JOIN_SEGMENT: &str = "join";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InviteParseError {
    #[error("malformed link: {0}")]
    Malformed(String),
    #[error("expected a `{expected}:` link, got `{found}:`")]
    WrongScheme { expected: String, found: String },
    #[error("not a join link")]
    NotAJoinLink,
    #[error("link has no workspace id")]
    MissingWorkspaceId,
    #[error("link has no token")]
    MissingToken,
    #[error("invalid server url: {0}")]
    InvalidServerUrl(String),
}

/// A parsed invite.
#[derive(Clone, PartialEq, Eq)]
pub struct InviteLink {
    pub workspace_id: String,
    pub token: String,
    /// Realtime sync endpoint
    pub transport_url: String,
    /// REST base URL of the access-control server
    pub server_url: String,
}

impl fmt::Debug for InviteLink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InviteLink")
            .field("workspace_id", &self.workspace_id)
            .field("token", &"<redacted>")
            .field("transport_url", &self.transport_url)
            .field("server_url", &self.server_url)
            .finish()
    }
}

/// Parse `uri` against `config`. Never panics.
pub fn parse_invite_link(uri: &str, config: &LinkConfig) -> Result<InviteLink, InviteParseError> {
    let uri = uri.trim();

    // `Url` lowercases the scheme; the comparison is on the raw text.
    let raw_scheme = uri
        .split_once(':')
        .map(|(scheme, _)| scheme)
        .ok_or_else(|| InviteParseError::Malformed("no scheme".to_string()))?;
    if raw_scheme != config.scheme {
        return Err(InviteParseError::WrongScheme {
            expected: config.scheme.clone(),
            found: raw_scheme.to_string(),
        });
    }

    let url = Url::parse(uri).map_err(|e| InviteParseError::Malformed(e.to_string()))?;

    // `scheme://join/id` puts `join` in the host slot; `scheme:join/id` has no host.
    let mut segments: Vec<&str> = Vec::new();
    if let Some(host) = url.host_str().filter(|h| !h.is_empty()) {
        segments.push(host);
    }
    segments.extend(url.path().split('/').filter(|s| !s.is_empty()));

    match segments.as_slice() {
        [] => return Err(InviteParseError::NotAJoinLink),
        [first, ..] if *first != JOIN_SEGMENT => return Err(InviteParseError::NotAJoinLink),
        [_] => return Err(InviteParseError::MissingWorkspaceId),
        [_, _] => {}
        [_, _, ..] => return Err(InviteParseError::NotAJoinLink),
    }
    let workspace_id = percent_decode_str(segments[1])
        .decode_utf8()
        .map_err(|e| InviteParseError::Malformed(format!("workspace id: {e}")))?
        .into_owned();
    if workspace_id.is_empty() {
        return Err(InviteParseError::MissingWorkspaceId);
    }

    let mut token = None;
    let mut server = None;
    for (key, value) in url.query_pairs() {
        match key.as_ref() {
            "token" => token = Some(value.into_owned()),
            "server" => server = Some(value.into_owned()),
            _ => {}
        }
    }
    let token = token
        .filter(|t| !t.is_empty())
        .ok_or(InviteParseError::MissingToken)?;

    let server_url = match server {
        Some(server) if config.allow_server_override => server,
        _ => config.server_url.clone(),
    };
    let transport_url = derive_transport_url(&server_url)?;

    Ok(InviteLink {
        workspace_id,
        token,
        transport_url,
        server_url,
    })
}

/// The realtime endpoint for a REST base URL: `http(s)` becomes `ws(s)` and
/// the port drops by one.
pub fn derive_transport_url(rest_url: &str) -> Result<String, InviteParseError> {
    let mut url = Url::parse(rest_url)
        .map_err(|e| InviteParseError::InvalidServerUrl(format!("{rest_url}: {e}")))?;
    let scheme = match url.scheme() {
        "http" => "ws",
        "https" => "wss",
        other => {
            return Err(InviteParseError::InvalidServerUrl(format!(
                "unsupported scheme `{other}`"
            )))
        }
    };
    let port = url
        .port_or_known_default()
        .and_then(|port| port.checked_sub(1))
        .filter(|port| *port > 0)
        .ok_or_else(|| InviteParseError::InvalidServerUrl(format!("{rest_url}: no usable port")))?;

    url.set_scheme(scheme)
        .map_err(|_| InviteParseError::InvalidServerUrl(format!("{rest_url}: cannot switch to {scheme}")))?;
    url.set_port(Some(port))
        .map_err(|_| InviteParseError::InvalidServerUrl(format!("{rest_url}: cannot set port")))?;
    Ok(url.to_string())
}
