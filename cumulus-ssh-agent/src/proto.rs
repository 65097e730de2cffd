//! Typed agent requests and responses.
//!
//! Only the message types a single-key agent needs are modelled.  Anything
//! else a client sends decodes to [`Request::Unknown`] and is answered with
//! `SSH_AGENT_FAILURE`.

use crate::codec::{Frame, MessageWriter};
use crate::error::DecodeError;

pub const SSH_AGENT_FAILURE: u8 = 5;
pub const SSH_AGENTC_REQUEST_IDENTITIES: u8 = 11;
pub const SSH_AGENT_IDENTITIES_ANSWER: u8 = 12;
pub const SSH_AGENTC_SIGN_REQUEST: u8 = 13;
pub const SSH_AGENT_SIGN_RESPONSE: u8 = 14;

/// Sign-request flag asking for an `rsa-sha2-256` signature.
pub const SSH_AGENT_RSA_SHA2_256: u32 = 0x02;
/// Sign-request flag asking for an `rsa-sha2-512` signature.
pub const SSH_AGENT_RSA_SHA2_512: u32 = 0x04;

/// A client request, borrowing from the frame it was decoded from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request<'a> {
    RequestIdentities,
    SignRequest(SignRequest<'a>),
    /// Zero-length frame; carries no type byte.
    Empty,
    Unknown(u8),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignRequest<'a> {
    pub key_blob: &'a [u8],
    pub data: &'a [u8],
    pub flags: u32,
}

impl<'a> Request<'a> {
    /// Decode a request frame.  A known type with a short body is a
    /// [`DecodeError`]; the session answers it with a failure and carries on.
    pub fn decode(frame: &'a Frame) -> Result<Self, DecodeError> {
        let Some(msg_type) = frame.msg_type() else {
            return Ok(Self::Empty);
        };
        let mut body = frame.body();
        match msg_type {
            SSH_AGENTC_REQUEST_IDENTITIES => Ok(Self::RequestIdentities),
            SSH_AGENTC_SIGN_REQUEST => {
                let key_blob = body.read_string()?;
                let data = body.read_string()?;
                let flags = body.read_u32()?;
                Ok(Self::SignRequest(SignRequest { key_blob, data, flags }))
            }
            other => Ok(Self::Unknown(other)),
        }
    }

    /// Framed bytes for this request, as a client would send them.
    pub fn encode(&self) -> Vec<u8> {
        match self {
            Self::RequestIdentities => {
                MessageWriter::message(SSH_AGENTC_REQUEST_IDENTITIES).finish()
            }
            Self::SignRequest(req) => {
                let mut msg = MessageWriter::message(SSH_AGENTC_SIGN_REQUEST);
                msg.put_string(req.key_blob)
                    .put_string(req.data)
                    .put_u32(req.flags);
                msg.finish()
            }
            Self::Empty => 0u32.to_be_bytes().to_vec(),
            Self::Unknown(msg_type) => MessageWriter::message(*msg_type).finish(),
        }
    }
}

/// One advertised key: its wire blob and a free-form comment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub key_blob: Vec<u8>,
    pub comment: String,
}

/// An agent reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
    Identities(Vec<Identity>),
    /// SSH signature blob (`string(algorithm) ‖ string(signature)`).
    SignResponse(Vec<u8>),
    Failure,
}

impl Response {
    /// Framed bytes ready for the socket.
    pub fn encode(&self) -> Vec<u8> {
        match self {
            Self::Identities(identities) => {
                let mut msg = MessageWriter::message(SSH_AGENT_IDENTITIES_ANSWER);
                msg.put_u32(u32::try_from(identities.len()).unwrap_or(u32::MAX));
                for identity in identities {
                    msg.put_string(&identity.key_blob)
                        .put_string(identity.comment.as_bytes());
                }
                msg.finish()
            }
            Self::SignResponse(signature) => {
                let mut msg = MessageWriter::message(SSH_AGENT_SIGN_RESPONSE);
                msg.put_string(signature);
                msg.finish()
            }
            Self::Failure => MessageWriter::message(SSH_AGENT_FAILURE).finish(),
        }
    }

    /// Client-side decoding of a reply frame.  Types other than the three
    /// replies this agent sends are reported as a failure.
    pub fn decode(frame: &Frame) -> Result<Self, DecodeError> {
        let mut body = frame.body();
        match frame.msg_type() {
            Some(SSH_AGENT_IDENTITIES_ANSWER) => {
                let count = body.read_u32()?;
                let mut identities = Vec::new();
                for _ in 0..count {
                    let key_blob = body.read_string()?.to_vec();
                    let comment = String::from_utf8_lossy(body.read_string()?).into_owned();
                    identities.push(Identity { key_blob, comment });
                }
                Ok(Self::Identities(identities))
            }
            Some(SSH_AGENT_SIGN_RESPONSE) => Ok(Self::SignResponse(body.read_string()?.to_vec())),
            _ => Ok(Self::Failure),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{DEFAULT_MAX_FRAME_LEN, read_message};

    fn frame(bytes: &[u8]) -> Frame {
        read_message(&mut &bytes[..], DEFAULT_MAX_FRAME_LEN).unwrap()
    }

    #[test]
    fn request_identities_is_single_byte() {
        assert_eq!(Request::RequestIdentities.encode(), [0, 0, 0, 1, 11]);
        let f = frame(&[0, 0, 0, 1, 11]);
        assert_eq!(Request::decode(&f).unwrap(), Request::RequestIdentities);
    }

    #[test]
    fn sign_request_fields_decode() {
        let bytes = Request::SignRequest(SignRequest {
            key_blob: b"blob",
            data: b"sign me up!",
            flags: SSH_AGENT_RSA_SHA2_256,
        })
        .encode();
        let f = frame(&bytes);
        let Request::SignRequest(req) = Request::decode(&f).unwrap() else {
            panic!("expected sign request");
        };
        assert_eq!(req.key_blob, b"blob");
        assert_eq!(req.data, b"sign me up!");
        assert_eq!(req.flags, SSH_AGENT_RSA_SHA2_256);
    }

    #[test]
    fn short_sign_request_is_decode_error() {
        // type 13 followed by a string header promising 16 bytes that never come
        let f = frame(&[0, 0, 0, 5, 13, 0, 0, 0, 16]);
        assert_eq!(Request::decode(&f), Err(DecodeError::UnexpectedEnd));
    }

    #[test]
    fn unknown_and_empty_requests() {
        assert_eq!(Request::decode(&frame(&[0, 0, 0, 1, 17])).unwrap(), Request::Unknown(17));
        assert_eq!(Request::decode(&frame(&[0, 0, 0, 0])).unwrap(), Request::Empty);
    }

    #[test]
    fn failure_is_single_byte() {
        assert_eq!(Response::Failure.encode(), [0, 0, 0, 1, SSH_AGENT_FAILURE]);
    }

    #[test]
    fn identities_answer_layout() {
        let bytes = Response::Identities(vec![Identity {
            key_blob: vec![1, 2, 3],
            comment: String::new(),
        }])
        .encode();
        assert_eq!(
            bytes,
            [0, 0, 0, 16, 12, 0, 0, 0, 1, 0, 0, 0, 3, 1, 2, 3, 0, 0, 0, 0]
        );
        let decoded = Response::decode(&frame(&bytes)).unwrap();
        let Response::Identities(ids) = decoded else {
            panic!("expected identities");
        };
        assert_eq!(ids.len(), 1);
        assert_eq!(ids[0].key_blob, [1, 2, 3]);
    }
}
