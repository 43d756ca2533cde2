//! Connection handshake
//!
//! The host launches a plugin with the magic cookie and protocol version in
//! its environment. The plugin answers with a single hello line before any
//! JSON-RPC traffic; the host trusts the channel only if the cookie and
//! version in that line match its own.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};

/// Current protocol version
pub const PROTOCOL_VERSION: u32 = 1;
/// Environment variable carrying the magic cookie
pub const MAGIC_COOKIE_KEY: &str = "GMACS_PLUGIN";
/// Magic cookie value shared by host and plugins
pub const MAGIC_COOKIE_VALUE: &str = "gmacs-plugin-magic-cookie";
/// Environment variable carrying the host's protocol version
pub const PROTOCOL_VERSION_ENV: &str = "GMACS_PLUGIN_PROTOCOL_VERSION";

/// Handshake parameters known to both host and plugin binaries
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HandshakeConfig {
    pub protocol_version: u32,
    pub magic_cookie_key: String,
    pub magic_cookie_value: String,
}

impl Default for HandshakeConfig {
    fn default() -> Self {
        Self {
            protocol_version: PROTOCOL_VERSION,
            magic_cookie_key: MAGIC_COOKIE_KEY.to_string(),
            magic_cookie_value: MAGIC_COOKIE_VALUE.to_string(),
        }
    }
}

/// First line a plugin writes on its channel
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Hello {
    pub magic_cookie_key: String,
    pub magic_cookie_value: String,
    pub protocol_version: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pid: Option<u32>,
}

/// Reasons a handshake can fail
#[derive(Debug, Error)]
pub enum HandshakeFailure {
    #[error("magic cookie mismatch (not a gmacs plugin?)")]
    MagicMismatch,

    #[error("protocol version mismatch: host speaks {expected}, plugin speaks {actual}")]
    VersionMismatch { expected: u32, actual: u32 },

    #[error("plugin exited before completing the handshake")]
    ProcessExited,

    #[error("no handshake within {0:?}")]
    Timeout(Duration),

    #[error("malformed handshake line: {0}")]
    Malformed(String),

    #[error("this binary is a gmacs plugin and must be launched by the host")]
    NotLaunchedByHost,

    #[error("IO error during handshake: {0}")]
    Io(#[from] std::io::Error),
}

/// Plugin side: verify the host launched us with the right cookie and version
pub fn check_environment(config: &HandshakeConfig) -> Result<(), HandshakeFailure> {
    let cookie = std::env::var(&config.magic_cookie_key).ok();
    if cookie.as_deref() != Some(config.magic_cookie_value.as_str()) {
        return Err(HandshakeFailure::NotLaunchedByHost);
    }

    if let Ok(version) = std::env::var(PROTOCOL_VERSION_ENV) {
        let actual = version
            .trim()
            .parse::<u32>()
            .map_err(|_| HandshakeFailure::Malformed(format!("protocol version {version:?}")))?;
        if actual != config.protocol_version {
            return Err(HandshakeFailure::VersionMismatch {
                expected: actual,
                actual: config.protocol_version,
            });
        }
    }
    Ok(())
}

/// Plugin side: write the hello line
pub async fn announce<W>(writer: &mut W, config: &HandshakeConfig) -> Result<(), HandshakeFailure>
where
    W: AsyncWrite + Unpin,
{
    let hello = Hello {
        magic_cookie_key: config.magic_cookie_key.clone(),
        magic_cookie_value: config.magic_cookie_value.clone(),
        protocol_version: config.protocol_version,
        pid: Some(std::process::id()),
    };
    let mut line = serde_json::to_vec(&hello)
        .map_err(|e| HandshakeFailure::Malformed(e.to_string()))?;
    line.push(b'\n');
    writer.write_all(&line).await?;
    writer.flush().await?;
    Ok(())
}

/// Host side: read and validate the hello line within `timeout`
pub async fn accept<R>(
    reader: &mut R,
    config: &HandshakeConfig,
    timeout: Duration,
) -> Result<Hello, HandshakeFailure>
where
    R: AsyncBufRead + Unpin,
{
    let mut line = String::new();
    let read = tokio::time::timeout(timeout, reader.read_line(&mut line))
        .await
        .map_err(|_| HandshakeFailure::Timeout(timeout))??;
    if read == 0 {
        return Err(HandshakeFailure::ProcessExited);
    }

    let hello: Hello = serde_json::from_str(line.trim())
        .map_err(|e| HandshakeFailure::Malformed(format!("{e}: {:?}", line.trim())))?;

    if hello.magic_cookie_key != config.magic_cookie_key
        || hello.magic_cookie_value != config.magic_cookie_value
    {
        return Err(HandshakeFailure::MagicMismatch);
    }
    if hello.protocol_version != config.protocol_version {
        return Err(HandshakeFailure::VersionMismatch {
            expected: config.protocol_version,
            actual: hello.protocol_version,
        });
    }
    Ok(hello)
}
