//! Running an [`Agent`] in the background for child processes.
//!
//! [`AgentHost`] is what an embedding process uses: it starts listening,
//! serves clients one after another on a dedicated worker thread, and hands
//! the socket to children through `SSH_AUTH_SOCK`.
//!
//! ```text
//! caller ── AgentHost::start ──► Agent::listen ──► socket path
//!   │                               │
//!   │ apply_to(Command)      worker thread: loop { Agent::accept }
//!   │  SSH_AUTH_SOCK=<path>         │
//!   └── shutdown / drop ──► Agent::close ──► worker joins
//! ```

use std::io;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::Arc;
use std::thread::JoinHandle;

use tracing::{debug, warn};

use crate::agent::Agent;
use crate::error::{AcceptError, ListenError};

/// Environment variable SSH clients read the agent socket from.
pub const SSH_AUTH_SOCK: &str = "SSH_AUTH_SOCK";

/// A listening agent plus the worker thread serving it.
#[derive(Debug)]
pub struct AgentHost {
    agent: Arc<Agent>,
    socket_path: PathBuf,
    worker: Option<JoinHandle<()>>,
}

impl AgentHost {
    /// Listen and start serving on a worker thread.
    pub fn start(agent: Agent) -> Result<Self, ListenError> {
        let agent = Arc::new(agent);
        let socket_path = agent.listen()?;

        let worker_agent = Arc::clone(&agent);
        let worker = std::thread::Builder::new()
            .name("ssh-agent".to_string())
            .spawn(move || serve(&worker_agent))
            .map_err(|e| {
                agent.close();
                ListenError::Worker(e)
            })?;

        Ok(Self {
            agent,
            socket_path,
            worker: Some(worker),
        })
    }

    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    pub fn agent(&self) -> &Agent {
        &self.agent
    }

    /// Point `cmd` at this agent.
    pub fn apply_to<'c>(&self, cmd: &'c mut Command) -> &'c mut Command {
        cmd.env(SSH_AUTH_SOCK, &self.socket_path)
    }

    /// Close the agent and wait for the worker to finish.
    pub fn shutdown(mut self) {
        self.stop();
    }

    fn stop(&mut self) {
        self.agent.close();
        if let Some(worker) = self.worker.take()
            && worker.join().is_err()
        {
            warn!("SSH agent worker panicked");
        }
    }
}

impl Drop for AgentHost {
    fn drop(&mut self) {
        self.stop();
    }
}

fn serve(agent: &Agent) {
    loop {
        match agent.accept() {
            Ok(end) => debug!(?end, "agent host: session finished"),
            Err(AcceptError::Closed | AcceptError::NotListening) => break,
            Err(AcceptError::Io(e)) if is_transient(&e) => {
                debug!("agent host: transient accept error: {e}");
            }
            Err(AcceptError::Io(e)) => {
                warn!("agent host: accept failed, stopping: {e}");
                break;
            }
        }
    }
}

fn is_transient(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::Interrupted | io::ErrorKind::ConnectionAborted | io::ErrorKind::WouldBlock
    )
}
