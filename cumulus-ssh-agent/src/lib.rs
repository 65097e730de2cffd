//! Single-key SSH agent for cumulus.
//!
//! Serves one private key over a UNIX domain socket using the OpenSSH agent
//! protocol, so that child processes (ansible, ssh, scp) launched by the
//! orchestration service can authenticate to cluster hosts without the key
//! ever touching their environment.
//!
//! # Architecture
//!
//! ```text
//! KeyStore (one key, read-only) ◄──── &KeyStore ──── Session (one client)
//!     ▲                                                  ▲
//!     │ load(path, passphrase)                           │ accept()
//! Agent ── listen() ──► <tmp>/cumulus-agent-XXXX/agent.sock (dir 0700)
//!     ▲
//!     │ Arc<Agent>, worker thread
//! AgentHost ── SSH_AUTH_SOCK ──► child process
//! ```
//!
//! Frames are read and written by [`codec`]; [`proto`] turns them into typed
//! requests and responses.
//!
//! # Supported requests
//!
//! Only identity listing (`SSH_AGENTC_REQUEST_IDENTITIES`) and signing
//! (`SSH_AGENTC_SIGN_REQUEST`).  Everything else, including key management
//! and locking, is answered with `SSH_AGENT_FAILURE`.

pub mod agent;
pub mod codec;
pub mod config;
pub mod error;
pub mod host;
pub mod keystore;
pub mod pem;
pub mod proto;
pub mod session;

pub use agent::Agent;
pub use config::{AgentConfig, SignaturePolicy};
pub use error::{AcceptError, ConfigError, DecodeError, FrameError, KeyError, ListenError};
pub use host::{AgentHost, SSH_AUTH_SOCK};
pub use keystore::KeyStore;
pub use session::{Session, SessionEnd};
