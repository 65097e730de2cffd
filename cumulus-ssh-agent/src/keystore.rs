//! The agent's single key.
//!
//! A [`KeyStore`] is loaded once from a PEM file and never changes
//! afterwards, so sessions read it through a plain shared reference.  It
//! exposes only what the protocol needs: the public key blob that identifies
//! the key on the wire, and a signing primitive that returns a finished SSH
//! signature blob.  Callers never see algorithm details.
//!
//! Supported keys are RSA (PKCS#1, PKCS#8 or OpenSSH container) and Ed25519
//! (OpenSSH container).  Private material is zeroized on drop by the
//! underlying `rsa` / `ssh-key` types.

use std::path::Path;

use rsa::pkcs1::DecodeRsaPrivateKey;
use rsa::pkcs8::DecodePrivateKey;
use rsa::{Pkcs1v15Sign, RsaPrivateKey};
use sha1::Sha1;
use sha2::{Digest, Sha256, Sha512};
use signature::Signer as _;
use ssh_encoding::Encode as _;
use ssh_key::private::{Ed25519Keypair, KeypairData};
use ssh_key::public::{KeyData, RsaPublicKey as SshRsaPublicKey};
use ssh_key::{Algorithm, HashAlg, PrivateKey, PublicKey, Signature};
use tracing::debug;
use zeroize::Zeroizing;

use crate::codec::MessageWriter;
use crate::config::SignaturePolicy;
use crate::error::KeyError;
use crate::pem::{self, PemKind};
use crate::proto::{SSH_AGENT_RSA_SHA2_256, SSH_AGENT_RSA_SHA2_512};

const SSH_RSA: &str = "ssh-rsa";
const SSH_ED25519: &str = "ssh-ed25519";

enum SigningKey {
    Rsa(RsaPrivateKey),
    Ed25519(Ed25519Keypair),
}

/// One private key plus its public half and cached wire blob.
pub struct KeyStore {
    key: SigningKey,
    public: PublicKey,
    public_blob: Vec<u8>,
    policy: SignaturePolicy,
}

impl std::fmt::Debug for KeyStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyStore")
            .field("algorithm", &self.algorithm())
            .field("fingerprint", &self.fingerprint_sha256())
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}

impl KeyStore {
    /// Load and, if needed, decrypt the key at `path`.
    ///
    /// `passphrase` is ignored for unencrypted keys.  Unreadable or
    /// unparseable files are [`KeyError::BadKey`]; a failed decryption is
    /// [`KeyError::BadPassphrase`].
    pub fn load(path: impl AsRef<Path>, passphrase: &[u8]) -> Result<Self, KeyError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map(Zeroizing::new)
            .map_err(|e| KeyError::BadKey(format!("read {}: {e}", path.display())))?;
        let store = Self::from_pem(&text, passphrase)?;
        debug!(
            path = %path.display(),
            algorithm = store.algorithm(),
            fingerprint = %store.fingerprint_sha256(),
            "keystore: loaded key"
        );
        Ok(store)
    }

    /// Parse a key from PEM text.
    pub fn from_pem(text: &str, passphrase: &[u8]) -> Result<Self, KeyError> {
        let block = pem::find_block(text)
            .ok_or_else(|| KeyError::BadKey("no private key PEM block found".to_string()))?;

        let key = match block.kind {
            PemKind::OpenSsh => decode_openssh(block.text, passphrase)?,
            PemKind::Pkcs1 => SigningKey::Rsa(decode_pkcs1(block.text, passphrase)?),
            PemKind::Pkcs8 => SigningKey::Rsa(
                RsaPrivateKey::from_pkcs8_pem(block.text)
                    .map_err(|e| KeyError::BadKey(format!("PKCS#8: {e}")))?,
            ),
            PemKind::EncryptedPkcs8 => SigningKey::Rsa(
                RsaPrivateKey::from_pkcs8_encrypted_pem(block.text, passphrase)
                    .map_err(|_| KeyError::BadPassphrase)?,
            ),
        };
        Self::from_key(key)
    }

    /// Wrap an already-decoded RSA key.
    pub fn from_rsa(key: RsaPrivateKey) -> Result<Self, KeyError> {
        Self::from_key(SigningKey::Rsa(key))
    }

    fn from_key(key: SigningKey) -> Result<Self, KeyError> {
        let key_data = match &key {
            SigningKey::Rsa(rsa) => KeyData::Rsa(
                SshRsaPublicKey::try_from(rsa.to_public_key())
                    .map_err(|e| KeyError::BadKey(format!("RSA public key: {e}")))?,
            ),
            SigningKey::Ed25519(kp) => KeyData::Ed25519(kp.public),
        };
        let public = PublicKey::from(key_data);
        let public_blob = public
            .to_bytes()
            .map_err(|e| KeyError::BadKey(format!("encode public key: {e}")))?;
        Ok(Self {
            key,
            public,
            public_blob,
            policy: SignaturePolicy::default(),
        })
    }

    pub fn with_policy(mut self, policy: SignaturePolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn policy(&self) -> SignaturePolicy {
        self.policy
    }

    pub fn public_key(&self) -> &PublicKey {
        &self.public
    }

    /// SSH wire serialization of the public key.
    pub fn public_blob(&self) -> &[u8] {
        &self.public_blob
    }

    /// Bytes sign requests are compared against.  Same as [`public_blob`](Self::public_blob).
    pub fn public_fingerprint(&self) -> &[u8] {
        &self.public_blob
    }

    /// Native algorithm name of the loaded key.
    pub fn algorithm(&self) -> &'static str {
        match self.key {
            SigningKey::Rsa(_) => SSH_RSA,
            SigningKey::Ed25519(_) => SSH_ED25519,
        }
    }

    /// OpenSSH-style `SHA256:…` fingerprint, for logs.
    pub fn fingerprint_sha256(&self) -> String {
        self.public.fingerprint(HashAlg::Sha256).to_string()
    }

    /// Sign `data` and return an SSH signature blob
    /// (`string(algorithm) ‖ string(signature)`).
    ///
    /// RSA keys sign with `ssh-rsa` unless the policy honours request flags
    /// and `flags` asks for a SHA-2 variant.  Flags never affect Ed25519.
    pub fn sign(&self, data: &[u8], flags: u32) -> Result<Vec<u8>, KeyError> {
        let signature = match &self.key {
            SigningKey::Rsa(rsa) => {
                let Some(hash) = self.rsa_hash(flags) else {
                    return ssh_rsa_signature(rsa, data);
                };
                let raw = match hash {
                    HashAlg::Sha512 => {
                        rsa.sign(Pkcs1v15Sign::new::<Sha512>(), &Sha512::digest(data))
                    }
                    _ => rsa.sign(Pkcs1v15Sign::new::<Sha256>(), &Sha256::digest(data)),
                }
                .map_err(|e| KeyError::Sign(e.to_string()))?;
                Signature::new(Algorithm::Rsa { hash: Some(hash) }, raw)
                    .map_err(|e| KeyError::Sign(e.to_string()))?
            }
            SigningKey::Ed25519(kp) => kp
                .try_sign(data)
                .map_err(|e| KeyError::Sign(e.to_string()))?,
        };
        let mut encoded = Vec::new();
        signature
            .encode(&mut encoded)
            .map_err(|e| KeyError::Sign(e.to_string()))?;
        Ok(encoded)
    }

    /// SHA-2 hash requested by `flags`, or `None` for plain `ssh-rsa`.
    fn rsa_hash(&self, flags: u32) -> Option<HashAlg> {
        match self.policy {
            SignaturePolicy::Legacy => None,
            SignaturePolicy::HonorFlags if flags & SSH_AGENT_RSA_SHA2_512 != 0 => {
                Some(HashAlg::Sha512)
            }
            SignaturePolicy::HonorFlags if flags & SSH_AGENT_RSA_SHA2_256 != 0 => {
                Some(HashAlg::Sha256)
            }
            SignaturePolicy::HonorFlags => None,
        }
    }
}

/// PKCS#1 v1.5 over SHA-1.  `ssh_key::Signature` only models the SHA-2 RSA
/// algorithms, so this blob is written field by field.
fn ssh_rsa_signature(rsa: &RsaPrivateKey, data: &[u8]) -> Result<Vec<u8>, KeyError> {
    let raw = rsa
        .sign(Pkcs1v15Sign::new::<Sha1>(), &Sha1::digest(data))
        .map_err(|e| KeyError::Sign(e.to_string()))?;
    let mut blob = MessageWriter::new();
    blob.put_string(SSH_RSA.as_bytes()).put_string(&raw);
    Ok(blob.finish())
}

fn decode_pkcs1(block: &str, passphrase: &[u8]) -> Result<RsaPrivateKey, KeyError> {
    let legacy = pem::parse_legacy(block)?;
    match &legacy.encryption {
        None => RsaPrivateKey::from_pkcs1_der(&legacy.body)
            .map_err(|e| KeyError::BadKey(format!("PKCS#1: {e}"))),
        Some((cipher, iv)) => {
            let der = pem::decrypt_legacy(*cipher, iv, &legacy.body, passphrase)?;
            RsaPrivateKey::from_pkcs1_der(&der).map_err(|_| KeyError::BadPassphrase)
        }
    }
}

fn decode_openssh(block: &str, passphrase: &[u8]) -> Result<SigningKey, KeyError> {
    let mut key = PrivateKey::from_openssh(block)
        .map_err(|e| KeyError::BadKey(format!("OpenSSH key: {e}")))?;
    if key.is_encrypted() {
        key = key.decrypt(passphrase).map_err(|_| KeyError::BadPassphrase)?;
    }

    match key.key_data() {
        KeypairData::Rsa(kp) => rsa::RsaPrivateKey::try_from(kp)
            .map(SigningKey::Rsa)
            .map_err(|e| KeyError::BadKey(format!("OpenSSH RSA key: {e}"))),
        KeypairData::Ed25519(kp) => Ok(SigningKey::Ed25519(kp.clone())),
        _ => Err(KeyError::BadKey(format!(
            "unsupported key algorithm {}",
            key.algorithm()
        ))),
    }
}
