use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::codec::DEFAULT_MAX_FRAME_LEN;
use crate::error::ConfigError;

/// Agent settings.  Every field has a default, so an empty TOML table is a
/// valid configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Parent of the private socket directory (default: the system temp dir).
    #[serde(default)]
    pub runtime_dir: Option<PathBuf>,

    /// Name prefix of the private directory, so operators can spot strays.
    #[serde(default = "default_dir_prefix")]
    pub dir_prefix: String,

    #[serde(default = "default_socket_name")]
    pub socket_name: String,

    /// Largest payload accepted from a client.  Bigger frames end the session.
    #[serde(default = "default_max_frame_len")]
    pub max_frame_len: u32,

    /// Per-read timeout on client sockets.  Unset means block forever.
    #[serde(default)]
    pub read_timeout_secs: Option<u64>,

    /// Comment sent alongside the key in identity answers.
    #[serde(default)]
    pub comment: String,

    #[serde(default)]
    pub signature_policy: SignaturePolicy,
}

/// How RSA sign requests pick a hash.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SignaturePolicy {
    /// Ignore request flags and always sign with `ssh-rsa` (SHA-1).
    #[default]
    Legacy,
    /// Follow `SSH_AGENT_RSA_SHA2_256` / `SSH_AGENT_RSA_SHA2_512` flags.
    HonorFlags,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            runtime_dir: None,
            dir_prefix: default_dir_prefix(),
            socket_name: default_socket_name(),
            max_frame_len: default_max_frame_len(),
            read_timeout_secs: None,
            comment: String::new(),
            signature_policy: SignaturePolicy::default(),
        }
    }
}

impl AgentConfig {
    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(s)?)
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml_str(&text)
    }

    pub fn read_timeout(&self) -> Option<Duration> {
        self.read_timeout_secs
            .filter(|&secs| secs > 0)
            .map(Duration::from_secs)
    }
}

fn default_dir_prefix() -> String {
    "cumulus-agent-".to_string()
}

fn default_socket_name() -> String {
    "agent.sock".to_string()
}

fn default_max_frame_len() -> u32 {
    DEFAULT_MAX_FRAME_LEN
}
