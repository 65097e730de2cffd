//! One client connection and its request/response loop.

use std::io::{self, BufReader};
use std::os::unix::net::UnixStream;

use tracing::{debug, warn};

use crate::codec::{self, Frame};
use crate::config::AgentConfig;
use crate::error::FrameError;
use crate::keystore::KeyStore;
use crate::proto::{Identity, Request, Response, SignRequest};

/// How a session ended.  None of these make the agent unusable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEnd {
    /// Client closed the connection between frames.
    ClientClosed,
    /// EOF arrived inside a frame.
    Truncated,
    /// Client announced a frame above the configured limit.
    FrameTooLarge { len: u32 },
    /// Read or write failed (includes read timeouts and agent shutdown).
    Io(io::ErrorKind),
}

impl From<FrameError> for SessionEnd {
    fn from(err: FrameError) -> Self {
        match err {
            FrameError::ConnectionClosed => Self::ClientClosed,
            FrameError::Truncated => Self::Truncated,
            FrameError::FrameTooLarge { len, .. } => Self::FrameTooLarge { len },
            FrameError::Io(e) => Self::Io(e.kind()),
        }
    }
}

/// A single accepted connection serving requests against a borrowed key.
pub struct Session<'a> {
    stream: UnixStream,
    store: &'a KeyStore,
    comment: &'a str,
    max_frame_len: u32,
}

impl<'a> Session<'a> {
    pub fn new(stream: UnixStream, store: &'a KeyStore, config: &'a AgentConfig) -> Self {
        if let Err(e) = stream.set_read_timeout(config.read_timeout()) {
            warn!("failed to set agent read timeout: {e}");
        }
        Self {
            stream,
            store,
            comment: &config.comment,
            max_frame_len: config.max_frame_len,
        }
    }

    /// Serve requests in order until the client goes away or I/O fails.
    /// The socket is closed when this returns.
    pub fn run(self) -> SessionEnd {
        let mut reader = BufReader::new(&self.stream);
        loop {
            let frame = match codec::read_message(&mut reader, self.max_frame_len) {
                Ok(frame) => frame,
                Err(e) => {
                    let end = SessionEnd::from(e);
                    match end {
                        SessionEnd::ClientClosed => debug!("agent client disconnected"),
                        other => warn!(end = ?other, "agent session terminated"),
                    }
                    return end;
                }
            };

            let response = self.dispatch(&frame);
            if let Err(e) = codec::write_frame(&mut &self.stream, &response.encode()) {
                warn!("agent session write failed: {e}");
                return SessionEnd::Io(e.kind());
            }
        }
    }

    fn dispatch(&self, frame: &Frame) -> Response {
        match Request::decode(frame) {
            Ok(Request::RequestIdentities) => {
                debug!(fingerprint = %self.store.fingerprint_sha256(), "request_identities");
                Response::Identities(vec![Identity {
                    key_blob: self.store.public_blob().to_vec(),
                    comment: self.comment.to_string(),
                }])
            }
            Ok(Request::SignRequest(request)) => self.sign(&request),
            Ok(Request::Empty) => {
                debug!("empty agent frame");
                Response::Failure
            }
            Ok(Request::Unknown(msg_type)) => {
                debug!(msg_type, "unsupported agent request");
                Response::Failure
            }
            Err(e) => {
                debug!(msg_type = ?frame.msg_type(), "malformed agent request: {e}");
                Response::Failure
            }
        }
    }

    fn sign(&self, request: &SignRequest<'_>) -> Response {
        if request.key_blob != self.store.public_fingerprint() {
            debug!(
                requested_len = request.key_blob.len(),
                "sign request for a key this agent does not hold"
            );
            return Response::Failure;
        }

        debug!(
            fingerprint = %self.store.fingerprint_sha256(),
            data_len = request.data.len(),
            flags = request.flags,
            "sign"
        );

        match self.store.sign(request.data, request.flags) {
            Ok(signature) => Response::SignResponse(signature),
            Err(e) => {
                warn!(fingerprint = %self.store.fingerprint_sha256(), "{e}");
                Response::Failure
            }
        }
    }
}
