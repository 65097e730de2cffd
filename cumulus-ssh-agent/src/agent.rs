//! The agent: private socket directory, listener and serial accept loop.

use std::io;
use std::net::Shutdown;
use std::os::unix::fs::PermissionsExt as _;
use std::os::unix::net::{UnixListener, UnixStream};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use socket2::{Domain, SockAddr, SockRef, Socket, Type};
use tempfile::TempDir;
use tracing::{debug, info, warn};

use crate::config::AgentConfig;
use crate::error::{AcceptError, KeyError, ListenError};
use crate::keystore::KeyStore;
use crate::session::{Session, SessionEnd};

/// Pending connections queued by the kernel while a session runs.
const LISTEN_BACKLOG: i32 = 1;

/// Single-key SSH agent.
///
/// All methods take `&self`, so an agent can be shared across threads:
/// one thread blocks in [`accept`](Self::accept) while another calls
/// [`close`](Self::close).  At most one session runs at a time.
pub struct Agent {
    store: KeyStore,
    config: AgentConfig,
    state: Mutex<State>,
    /// Held for the whole of `accept()`, so concurrent callers queue up
    /// instead of running parallel sessions.
    serving: Mutex<()>,
}

#[derive(Default)]
struct State {
    listening: Option<Listening>,
    /// Clone of the active session's socket, used by `close()` to cut it.
    active: Option<UnixStream>,
    /// Set by `close()`, cleared by the next `listen()`.
    closed: bool,
}

struct Listening {
    listener: UnixListener,
    dir: TempDir,
    socket_path: PathBuf,
    closing: Arc<AtomicBool>,
}

impl std::fmt::Debug for Agent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Agent")
            .field("store", &self.store)
            .field("socket_path", &self.socket_path())
            .finish_non_exhaustive()
    }
}

impl Agent {
    /// Load the key with default settings.  No socket is created yet.
    pub fn new(key_path: impl AsRef<Path>, passphrase: &[u8]) -> Result<Self, KeyError> {
        Self::with_config(key_path, passphrase, AgentConfig::default())
    }

    pub fn with_config(
        key_path: impl AsRef<Path>,
        passphrase: &[u8],
        config: AgentConfig,
    ) -> Result<Self, KeyError> {
        let store = KeyStore::load(key_path, passphrase)?;
        Ok(Self::from_store(store, config))
    }

    /// Build an agent around an already-loaded key.
    pub fn from_store(store: KeyStore, config: AgentConfig) -> Self {
        Self {
            store: store.with_policy(config.signature_policy),
            config,
            state: Mutex::new(State::default()),
            serving: Mutex::new(()),
        }
    }

    pub fn store(&self) -> &KeyStore {
        &self.store
    }

    pub fn config(&self) -> &AgentConfig {
        &self.config
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Create the private `0700` directory, bind the socket inside it and
    /// return the socket's absolute path (the value for `SSH_AUTH_SOCK`).
    /// The socket listens with a backlog of one.
    ///
    /// On failure nothing is left on disk.
    pub fn listen(&self) -> Result<PathBuf, ListenError> {
        let mut state = self.state();
        if let Some(l) = &state.listening {
            return Err(ListenError::AlreadyListening(
                l.socket_path.display().to_string(),
            ));
        }

        let parent = match &self.config.runtime_dir {
            Some(dir) => dir.clone(),
            None => std::env::temp_dir(),
        };
        let dir = tempfile::Builder::new()
            .prefix(&self.config.dir_prefix)
            .tempdir_in(&parent)
            .map_err(ListenError::CreateDir)?;
        // The socket is only as private as this directory.
        std::fs::set_permissions(dir.path(), std::fs::Permissions::from_mode(0o700))
            .map_err(ListenError::CreateDir)?;

        let socket_path = std::path::absolute(dir.path().join(&self.config.socket_name))
            .map_err(ListenError::CreateDir)?;
        let listener = bind_listener(&socket_path).map_err(ListenError::Bind)?;

        info!(
            socket = %socket_path.display(),
            fingerprint = %self.store.fingerprint_sha256(),
            "SSH agent listening"
        );

        state.closed = false;
        state.listening = Some(Listening {
            listener,
            dir,
            socket_path: socket_path.clone(),
            closing: Arc::new(AtomicBool::new(false)),
        });
        Ok(socket_path)
    }

    /// Socket path while listening.
    pub fn socket_path(&self) -> Option<PathBuf> {
        self.state().listening.as_ref().map(|l| l.socket_path.clone())
    }

    /// Wait for one client and serve it until it disconnects.
    ///
    /// Session-level failures are reported through [`SessionEnd`]; the agent
    /// stays ready for the next call.  Returns [`AcceptError::Closed`] once
    /// [`close`](Self::close) has run.
    pub fn accept(&self) -> Result<SessionEnd, AcceptError> {
        let _serving = self.serving.lock().unwrap_or_else(PoisonError::into_inner);

        let (listener, closing) = {
            let state = self.state();
            let l = match &state.listening {
                Some(l) => l,
                None if state.closed => return Err(AcceptError::Closed),
                None => return Err(AcceptError::NotListening),
            };
            (l.listener.try_clone()?, Arc::clone(&l.closing))
        };

        let accepted = listener.accept();
        if closing.load(Ordering::SeqCst) {
            return Err(AcceptError::Closed);
        }
        let (stream, _) = accepted?;
        drop(listener);

        {
            let mut state = self.state();
            if closing.load(Ordering::SeqCst) {
                return Err(AcceptError::Closed);
            }
            state.active = Some(stream.try_clone()?);
        }

        debug!("agent client connected");
        let end = Session::new(stream, &self.store, &self.config).run();
        self.state().active = None;
        debug!(?end, "agent session ended");

        if closing.load(Ordering::SeqCst) {
            return Err(AcceptError::Closed);
        }
        Ok(end)
    }

    /// Stop listening, end any active session and delete the socket
    /// directory.  Safe to call more than once and from any thread.
    pub fn close(&self) {
        let (listening, active) = {
            let mut state = self.state();
            let listening = state.listening.take();
            if let Some(l) = &listening {
                l.closing.store(true, Ordering::SeqCst);
                state.closed = true;
            }
            (listening, state.active.take())
        };

        if let Some(stream) = active {
            let _ = stream.shutdown(Shutdown::Both);
        }

        let Some(Listening { listener, dir, socket_path, .. }) = listening else {
            return;
        };

        // A thread blocked in accept() holds a clone of this socket; shutting
        // it down wakes that thread to see the closing flag.
        if let Err(e) = SockRef::from(&listener).shutdown(Shutdown::Both) {
            debug!("listener shutdown failed, dialling instead: {e}");
            if let Err(e) = UnixStream::connect(&socket_path) {
                warn!(
                    socket = %socket_path.display(),
                    "could not wake a blocked accept: {e}"
                );
            }
        }
        drop(listener);

        let dir_path = dir.path().to_path_buf();
        if let Err(e) = dir.close() {
            warn!(dir = %dir_path.display(), "failed to remove agent socket directory: {e}");
        }
        info!(socket = %socket_path.display(), "SSH agent closed");
    }
}

fn bind_listener(path: &Path) -> io::Result<UnixListener> {
    let socket = Socket::new(Domain::UNIX, Type::STREAM, None)?;
    socket.bind(&SockAddr::unix(path)?)?;
    socket.listen(LISTEN_BACKLOG)?;
    Ok(UnixListener::from(std::os::fd::OwnedFd::from(socket)))
}

impl Drop for Agent {
    fn drop(&mut self) {
        self.close();
    }
}
