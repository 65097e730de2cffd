//! Shared fixtures for the agent integration tests.

#![allow(dead_code)]

use std::io::Write as _;
use std::os::unix::net::UnixStream;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use cumulus_ssh_agent::codec::{self, Frame};
use cumulus_ssh_agent::proto::{Request, Response, SignRequest};
use rand::rngs::OsRng;
use rsa::RsaPrivateKey;
use rsa::pkcs8::{EncodePrivateKey, LineEnding};

pub const PASSPHRASE: &[u8] = b"open up please!";

/// 2048-bit RSA key shared by every test in the binary.
pub fn rsa_key() -> &'static RsaPrivateKey {
    static KEY: OnceLock<RsaPrivateKey> = OnceLock::new();
    KEY.get_or_init(|| RsaPrivateKey::new(&mut OsRng, 2048).unwrap())
}

/// A second, unrelated key for wrong-key requests.
pub fn other_rsa_key() -> &'static RsaPrivateKey {
    static KEY: OnceLock<RsaPrivateKey> = OnceLock::new();
    KEY.get_or_init(|| RsaPrivateKey::new(&mut OsRng, 1024).unwrap())
}

/// [`rsa_key`] as encrypted PKCS#8 PEM.  Encrypting runs scrypt, so it
/// happens once per test binary.
pub fn encrypted_pem() -> &'static str {
    static PEM: OnceLock<String> = OnceLock::new();
    PEM.get_or_init(|| {
        rsa_key()
            .to_pkcs8_encrypted_pem(&mut OsRng, PASSPHRASE, LineEnding::LF)
            .unwrap()
            .to_string()
    })
}

/// Write [`encrypted_pem`] under `dir`.
pub fn write_encrypted_key(dir: &Path) -> PathBuf {
    let path = dir.join("id_rsa");
    std::fs::write(&path, encrypted_pem()).unwrap();
    path
}

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("debug")
        .with_test_writer()
        .try_init();
}

/// Blocking agent client over a raw socket.
pub struct Client {
    stream: UnixStream,
}

impl Client {
    pub fn connect(path: &Path) -> Self {
        Self {
            stream: UnixStream::connect(path).unwrap(),
        }
    }

    pub fn from_stream(stream: UnixStream) -> Self {
        Self { stream }
    }

    pub fn send_raw(&mut self, bytes: &[u8]) {
        self.stream.write_all(bytes).unwrap();
    }

    pub fn recv(&mut self) -> Frame {
        codec::read_message(&mut self.stream, u32::MAX).unwrap()
    }

    pub fn request(&mut self, request: &Request<'_>) -> Frame {
        self.send_raw(&request.encode());
        self.recv()
    }

    /// Blob of the single identity the agent advertises.
    pub fn identity_blob(&mut self) -> Vec<u8> {
        let frame = self.request(&Request::RequestIdentities);
        match Response::decode(&frame).unwrap() {
            Response::Identities(mut ids) => {
                assert_eq!(ids.len(), 1);
                ids.remove(0).key_blob
            }
            other => panic!("expected identities, got {other:?}"),
        }
    }

    pub fn sign(&mut self, key_blob: &[u8], data: &[u8], flags: u32) -> Response {
        let frame = self.request(&Request::SignRequest(SignRequest {
            key_blob,
            data,
            flags,
        }));
        Response::decode(&frame).unwrap()
    }

    pub fn into_stream(self) -> UnixStream {
        self.stream
    }
}
