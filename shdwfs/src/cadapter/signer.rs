//! Request signing used by the multipart endpoints.

use std::path::Path;

use ring::signature::{Ed25519KeyPair, KeyPair};

use crate::error::StoreError;

pub trait RequestSigner: Send + Sync + 'static {
    /// Public identity sent as the `signer` field.
    fn signer(&self) -> String;

    fn sign(&self, message: &str) -> Result<String, StoreError>;
}

/// Message the remote expects to be signed before a multipart session opens.
pub fn multipart_init_message(bucket: &str, file_name: &str, size: u64) -> String {
    format!(
        "Shadow Drive Signed Message:\nInitialize multipart upload\nBucket: {bucket}\nFilename: {file_name}\nFile size: {size}"
    )
}

/// Ed25519 signer backed by a 64-byte keypair (seed followed by public key).
pub struct KeypairSigner {
    keypair: Ed25519KeyPair,
    identity: String,
}

impl KeypairSigner {
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, StoreError> {
        if bytes.len() != 64 {
            return Err(StoreError::Signing(format!(
                "keypair must be 64 bytes, got {}",
                bytes.len()
            )));
        }
        let (seed, public) = bytes.split_at(32);
        let keypair = Ed25519KeyPair::from_seed_and_public_key(seed, public)
            .map_err(|e| StoreError::Signing(format!("rejected keypair: {e}")))?;
        let identity = bs58::encode(keypair.public_key().as_ref()).into_string();
        Ok(Self { keypair, identity })
    }

    /// Load a keypair stored as a JSON array of bytes.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|e| {
            StoreError::Signing(format!("cannot read keypair {}: {e}", path.display()))
        })?;
        let bytes: Vec<u8> = serde_json::from_str(&raw).map_err(|e| {
            StoreError::Signing(format!("malformed keypair {}: {e}", path.display()))
        })?;
        Self::from_bytes(&bytes)
    }
}

impl RequestSigner for KeypairSigner {
    fn signer(&self) -> String {
        self.identity.clone()
    }

    fn sign(&self, message: &str) -> Result<String, StoreError> {
        let sig = self.keypair.sign(message.as_bytes());
        Ok(bs58::encode(sig.as_ref()).into_string())
    }
}

/// Deterministic signer for tests and offline runs.
#[derive(Debug, Clone)]
pub struct StaticSigner {
    identity: String,
}

impl StaticSigner {
    pub fn new(identity: impl Into<String>) -> Self {
        Self {
            identity: identity.into(),
        }
    }
}

impl RequestSigner for StaticSigner {
    fn signer(&self) -> String {
        self.identity.clone()
    }

    fn sign(&self, message: &str) -> Result<String, StoreError> {
        Ok(format!("signed:{}:{}", self.identity, message.len()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ring::rand::SystemRandom;
    use ring::signature::{ED25519, UnparsedPublicKey};
    use std::io::Write;

    fn keypair_bytes() -> Vec<u8> {
        let rng = SystemRandom::new();
        let seed: [u8; 32] = ring::rand::generate(&rng).unwrap().expose();
        let kp = Ed25519KeyPair::from_seed_unchecked(&seed).unwrap();
        let mut bytes = seed.to_vec();
        bytes.extend_from_slice(kp.public_key().as_ref());
        bytes
    }

    #[test]
    fn init_message_layout() {
        let msg = multipart_init_message("bkt", "big.bin", 42);
        assert_eq!(
            msg,
            "Shadow Drive Signed Message:\nInitialize multipart upload\nBucket: bkt\nFilename: big.bin\nFile size: 42"
        );
    }

    #[test]
    fn keypair_file_signs_verifiable_messages() {
        let bytes = keypair_bytes();
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "{}", serde_json::to_string(&bytes).unwrap()).unwrap();

        let signer = KeypairSigner::from_file(file.path()).unwrap();
        let public = bs58::decode(signer.signer()).into_vec().unwrap();
        assert_eq!(public, bytes[32..]);

        let sig = bs58::decode(signer.sign("hello").unwrap()).into_vec().unwrap();
        UnparsedPublicKey::new(&ED25519, &public)
            .verify(b"hello", &sig)
            .expect("signature verifies");
    }

    #[test]
    fn short_keypair_is_rejected() {
        assert!(matches!(
            KeypairSigner::from_bytes(&[0u8; 12]),
            Err(StoreError::Signing(_))
        ));
    }
}
