//! gmacs plugin SDK
//!
//! This crate provides the SDK for building gmacs plugins as separate
//! processes. Plugins talk to the editor over newline-delimited JSON-RPC 2.0
//! on their stdin/stdout, after a one-line handshake.
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use gmacs_plugin_sdk::prelude::*;
//!
//! struct Hello;
//!
//! #[async_trait]
//! impl Plugin for Hello {
//!     fn name(&self) -> &str { "hello" }
//!     fn version(&self) -> &str { env!("CARGO_PKG_VERSION") }
//!
//!     async fn initialize(&self, _ctx: InitContext, host: HostClient) -> Result<()> {
//!         host.set_status("hello loaded").await
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     gmacs_plugin_sdk::serve_plugin(Hello).await
//! }
//! ```
//!
//! # Roles
//!
//! - **CommandPlugin**: runs the commands the plugin registers
//! - **MajorModePlugin**: follows activation and file events for its mode
//! - **MinorModePlugin**: enabled per buffer, sees edits and cursor moves

pub mod error;
pub mod handshake;
pub mod host;
pub mod prelude;
pub mod protocol;
pub mod rpc;
pub mod server;
pub mod traits;
pub mod types;

use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite, BufReader};
use tracing::info;

// Re-exports
pub use error::{PluginError, Result};
pub use handshake::{HandshakeConfig, HandshakeFailure};
pub use host::{BufferHandle, HostClient, WindowHandle};
pub use rpc::DEFAULT_CALL_TIMEOUT;
pub use traits::{CommandPlugin, MajorModePlugin, MinorModePlugin, Plugin};
pub use types::*;

/// Serve `plugin` on stdin/stdout until the host closes the connection.
///
/// Refuses to run unless the host's magic cookie is in the environment, so
/// running a plugin binary by hand prints an error instead of protocol bytes.
pub async fn serve_plugin<P: Plugin>(plugin: P) -> Result<()> {
    let handshake = HandshakeConfig::default();
    handshake::check_environment(&handshake)?;
    serve_connection(plugin, tokio::io::stdin(), tokio::io::stdout(), &handshake).await
}

/// Announce on `writer`, then serve `plugin` until the channel closes
pub async fn serve_connection<P, R, W>(
    plugin: P,
    reader: R,
    mut writer: W,
    handshake: &HandshakeConfig,
) -> Result<()>
where
    P: Plugin,
    R: AsyncRead + Send + Unpin + 'static,
    W: AsyncWrite + Send + Unpin + 'static,
{
    handshake::announce(&mut writer, handshake).await?;

    let label = plugin.name().to_string();
    let (peer, driver) = rpc::RpcPeer::new(
        label.clone(),
        Box::new(BufReader::new(reader)),
        Box::new(writer),
        DEFAULT_CALL_TIMEOUT,
    );
    let dispatcher = server::PluginDispatcher::new(Arc::new(plugin), HostClient::new(peer.clone()));
    driver.start(Arc::new(dispatcher));

    info!(plugin = %label, "serving");
    peer.closed().await;
    info!(plugin = %label, "host closed the connection");
    Ok(())
}
