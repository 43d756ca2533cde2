//! Transports that open a channel to a plugin
//!
//! [`ProcessTransport`] spawns the plugin binary and talks over its
//! stdin/stdout. Other transports (in-process pipes, sockets) implement the
//! same trait and go through the same handshake.

use async_trait::async_trait;
use gmacs_plugin_sdk::HandshakeConfig;
use gmacs_plugin_sdk::handshake::PROTOCOL_VERSION_ENV;
use gmacs_plugin_sdk::rpc::{BoxedReader, BoxedWriter};
use std::path::Path;
use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};
use tracing::debug;

use crate::error::{HostError, Result};

/// An open, not yet handshaken, channel to a plugin
pub struct PluginChannel {
    /// Plugin's output; the hello line comes first
    pub reader: BoxedReader,
    /// Plugin's input
    pub writer: BoxedWriter,
    /// Child process, when the plugin runs as one
    pub process: Option<Child>,
}

/// Opens channels to plugins
#[async_trait]
pub trait Transport: Send + Sync {
    async fn open(
        &self,
        plugin: &str,
        binary: &Path,
        handshake: &HandshakeConfig,
    ) -> Result<PluginChannel>;
}

/// Runs each plugin as a child process over stdio
#[derive(Debug, Default, Clone)]
pub struct ProcessTransport;

#[async_trait]
impl Transport for ProcessTransport {
    async fn open(
        &self,
        plugin: &str,
        binary: &Path,
        handshake: &HandshakeConfig,
    ) -> Result<PluginChannel> {
        debug!(plugin, "Spawning {:?}", binary);

        let mut child = Command::new(binary)
            .env(&handshake.magic_cookie_key, &handshake.magic_cookie_value)
            .env(PROTOCOL_VERSION_ENV, handshake.protocol_version.to_string())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| HostError::Spawn(format!("{plugin}: {:?}: {e}", binary)))?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| HostError::Spawn(format!("{plugin}: stdout not captured")))?;
        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| HostError::Spawn(format!("{plugin}: stdin not captured")))?;

        if let Some(stderr) = child.stderr.take() {
            let plugin = plugin.to_string();
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    debug!(plugin = %plugin, "{}", line);
                }
            });
        }

        Ok(PluginChannel {
            reader: Box::new(BufReader::new(stdout)),
            writer: Box::new(stdin),
            process: Some(child),
        })
    }
}
