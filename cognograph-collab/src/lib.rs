//! # cognograph-collab — sessions and authorization for shared workspaces
//!
//! ## Architecture
//!
//! ```text
//! cognograph://join/{id}?token=..
//!        │
//!        ▼
//! ┌──────────────┐   store    ┌──────────────┐
//! │ invite       │ ─────────► │ TokenStore   │ ◄──── encrypted records
//! │ (parser)     │            │ (one / ws)   │
//! └──────────────┘            └──────┬───────┘
//!                                    │ bearer
//!                                    ▼
//! ┌──────────────────┐  uses  ┌──────────────┐   HTTP   ┌──────────────┐
//! │ BranchCoordinator│ ─────► │ AuthClient   │ ───────► │ access-ctrl  │
//! └──────────────────┘        └──────────────┘          │ server       │
//!                                                       └──────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`session`] — `Permission` and `SessionToken`
//! - [`token_store`] — encrypted, fail-closed token storage
//! - [`auth`] — authorization client with single-flight refresh
//! - [`branch`] — branch creation and permission-gated merge
//! - [`invite`] — deep-link parsing and transport URL derivation
//! - [`config`] — client configuration

pub mod auth;
pub mod branch;
pub mod config;
pub mod invite;
pub mod session;
pub mod token_store;

// Re-exports for convenience
pub use auth::{
    AuthClient, AuthError, AuthErrorCode, AuthRequest, AuthResponse, AuthTransport,
    HttpTransport, InviteToken, Method, ScriptedTransport, TokenInfo, TransportError, Validation,
};
pub use branch::{Branch, BranchCoordinator, BranchInfo, LocalMergeError, MergeOutcome};
pub use config::{ClientConfig, LinkConfig};
pub use invite::{derive_transport_url, parse_invite_link, InviteLink, InviteParseError};
pub use session::{now_millis, Permission, SessionToken};
pub use token_store::{
    FileVault, Generation, KeySource, KeyringKeySource, MemoryVault, StaticKeySource, TokenStore,
    TokenStoreError, TokenVault,
};
