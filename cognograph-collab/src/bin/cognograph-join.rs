//! Handles a `cognograph://join/..` deep link end to end: parse, store the
//! token, validate it against the server, report the result.

use log::{error, info};
use std::process::ExitCode;
use std::sync::Arc;

use cognograph_collab::{parse_invite_link, AuthClient, AuthErrorCode, ClientConfig, TokenStore};

#[tokio::main]
async fn main() -> ExitCode {
    env_logger::init();

    let Some(link) = std::env::args().nth(1) else {
        eprintln!("usage: cognograph-join <deep-link>");
        return ExitCode::from(2);
    };

    let config = ClientConfig::from_env();
    let invite = match parse_invite_link(&link, &config.link_config()) {
        Ok(invite) => invite,
        Err(e) => {
            eprintln!("invalid invite link: {e}");
            return ExitCode::from(2);
        }
    };
    info!("joining workspace {}", invite.workspace_id);

    let store = match TokenStore::open(&config) {
        Ok(store) => Arc::new(store),
        Err(e) => {
            error!("failed to open token store: {e}");
            return ExitCode::FAILURE;
        }
    };
    let client = AuthClient::with_http(
        ClientConfig {
            server_url: invite.server_url.clone(),
            ..config
        },
        store,
    );

    match client.join(&invite).await {
        Ok(validation) => {
            let permission = validation
                .permissions
                .map_or("unknown", |p| p.as_str());
            println!("workspace:  {}", invite.workspace_id);
            println!("permission: {permission}");
            println!("transport:  {}", invite.transport_url);
            ExitCode::SUCCESS
        }
        Err(e) => {
            match e.code() {
                AuthErrorCode::TokenExpired => eprintln!("invite is no longer valid; ask for a new one"),
                AuthErrorCode::NetworkUnreachable => {
                    eprintln!("cannot reach {}: {e}", invite.server_url)
                }
                _ => eprintln!("join failed: {e}"),
            }
            ExitCode::FAILURE
        }
    }
}
