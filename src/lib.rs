//! # chat-relay
//!
//! Single-process WebSocket relay for application chat events.
//!
//! ## Features
//!
//! - `GET /ws?token=...`: WebSocket upgrade authenticated by a signed, expiring token
//! - `POST /publish`: secret-protected endpoint the application calls to push a JSON
//!   event to the open connections of specific users
//! - Hand-rolled HTTP framing and WebSocket handshake, no web framework
//! - One task owns all connection state; delivery is best-effort
//!
//! ## Example
//!
//! ```ignore
//! use chat_relay::config::RelaySettings;
//! use tokio::net::TcpListener;
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() -> anyhow::Result<()> {
//!     let settings = RelaySettings::for_secrets("app-secret", "bridge-secret")?;
//!     let listener = TcpListener::bind("127.0.0.1:8081").await?;
//!     println!("token for user 7: {}", settings.codec.issue(7, 3600));
//!     chat_relay::server::serve(listener, settings, async {
//!         let _ = tokio::signal::ctrl_c().await;
//!     })
//!     .await?;
//!     Ok(())
//! }
//! ```

pub mod bridge;
pub mod config;
pub mod error;
pub mod events;
pub mod handler;
pub mod http;
pub mod registry;
pub mod server;
pub mod socket;
pub mod token;
pub mod transport;
pub mod types;

pub use bridge::Publication;
pub use config::{RelayConfig, RelaySettings};
pub use error::{Error, Result};
pub use events::LoopEvent;
pub use handler::Action;
pub use http::{ParsedRequest, Response};
pub use registry::{ConnState, Connection, Registry};
pub use token::TokenCodec;
pub use transport::{TcpTransport, Transport};
pub use types::{ConnectionId, UserId};

use tokio::net::TcpListener;

/// Bind the configured address and serve until Ctrl-C.
///
/// Bind failure is the only fatal error; per-connection failures are contained.
pub async fn run(config: &RelayConfig) -> Result<()> {
    let settings = config.resolve()?;
    let addr = config.addr();
    let listener = TcpListener::bind(&addr).await?;
    tracing::info!(
        pending_timeout = ?settings.pending_timeout,
        max_request_bytes = settings.max_request_bytes,
        "chat relay listening on {addr}"
    );
    server::serve(listener, settings, async {
        let _ = tokio::signal::ctrl_c().await;
    })
    .await
}
