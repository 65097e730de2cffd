//! Error types for the SSH agent.

use std::io;

/// Failure to load the private key or to produce a signature with it.
#[derive(Debug, thiserror::Error)]
pub enum KeyError {
    #[error("unusable private key: {0}")]
    BadKey(String),

    #[error("wrong passphrase for private key")]
    BadPassphrase,

    #[error("signing failed: {0}")]
    Sign(String),
}

/// Failure to start serving: directory, socket or worker thread.
#[derive(Debug, thiserror::Error)]
pub enum ListenError {
    #[error("agent is already listening on {0}")]
    AlreadyListening(String),

    #[error("create socket directory: {0}")]
    CreateDir(#[source] io::Error),

    #[error("bind agent socket: {0}")]
    Bind(#[source] io::Error),

    #[error("spawn agent worker thread: {0}")]
    Worker(#[source] io::Error),
}

/// Why reading a frame off the wire stopped.
///
/// Every variant ends the session; none of them is fatal to the agent.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("connection closed by peer")]
    ConnectionClosed,

    #[error("connection closed mid-frame")]
    Truncated,

    #[error("frame of {len} bytes exceeds limit of {max}")]
    FrameTooLarge { len: u32, max: u32 },

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// A message body that does not parse.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    #[error("unexpected end of message payload")]
    UnexpectedEnd,

    #[error("negative mpint where a positive integer was expected")]
    NegativeMpint,
}

/// `accept()` could not run a session at all.
#[derive(Debug, thiserror::Error)]
pub enum AcceptError {
    #[error("agent is not listening")]
    NotListening,

    #[error("agent was closed")]
    Closed,

    #[error("accept failed: {0}")]
    Io(#[from] io::Error),
}

/// Failure to read or parse an [`AgentConfig`](crate::AgentConfig).
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("read config {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: io::Error,
    },

    #[error("parse config: {0}")]
    Parse(#[from] toml::de::Error),
}
