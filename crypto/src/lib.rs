//! Credo Cryptography
//!
//! Identity keys, detached message signatures, and the canonical
//! message-string codec used by the basenode gossip protocol.

use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use rand::rngs::OsRng;
use sha2::{Digest, Sha256};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CryptoError {
    #[error("Invalid signature")]
    InvalidSignature,

    #[error("Invalid public key")]
    InvalidPublicKey,

    #[error("Invalid private key")]
    InvalidPrivateKey,
}

/// Key pair for signing basenode messages
#[derive(Clone)]
pub struct KeyPair {
    signing_key: SigningKey,
    verifying_key: VerifyingKey,
}

impl KeyPair {
    /// Generate new random keypair
    pub fn generate() -> Self {
        let signing_key = SigningKey::generate(&mut OsRng);
        let verifying_key = signing_key.verifying_key();

        Self {
            signing_key,
            verifying_key,
        }
    }

    /// Get public key as hex string
    pub fn public_key_hex(&self) -> String {
        hex::encode(self.verifying_key.as_bytes())
    }

    /// Get private key as hex string
    pub fn private_key_hex(&self) -> String {
        hex::encode(self.signing_key.to_bytes())
    }

    /// Create keypair from private key hex
    pub fn from_private_key_hex(hex_str: &str) -> Result<Self, CryptoError> {
        let bytes = hex::decode(hex_str).map_err(|_| CryptoError::InvalidPrivateKey)?;

        let key_bytes: [u8; 32] = bytes
            .try_into()
            .map_err(|_| CryptoError::InvalidPrivateKey)?;

        let signing_key = SigningKey::from_bytes(&key_bytes);
        let verifying_key = signing_key.verifying_key();

        Ok(Self {
            signing_key,
            verifying_key,
        })
    }

    /// Sign raw bytes
    pub fn sign(&self, message: &[u8]) -> Vec<u8> {
        self.signing_key.sign(message).to_bytes().to_vec()
    }

    /// Verify a signature made by the holder of `public_key_hex`
    pub fn verify(
        public_key_hex: &str,
        message: &[u8],
        signature_bytes: &[u8],
    ) -> Result<(), CryptoError> {
        let pub_key_bytes = hex::decode(public_key_hex).map_err(|_| CryptoError::InvalidPublicKey)?;

        let pub_key_array: [u8; 32] = pub_key_bytes
            .try_into()
            .map_err(|_| CryptoError::InvalidPublicKey)?;

        let verifying_key =
            VerifyingKey::from_bytes(&pub_key_array).map_err(|_| CryptoError::InvalidPublicKey)?;

        let sig_array: [u8; 64] = signature_bytes
            .try_into()
            .map_err(|_| CryptoError::InvalidSignature)?;

        let signature = Signature::from_bytes(&sig_array);

        verifying_key
            .verify(message, &signature)
            .map_err(|_| CryptoError::InvalidSignature)
    }
}

/// Sign a canonical message string.
///
/// Message strings are byte-exact concatenations of the attested fields
/// in a fixed, caller-chosen order. Signer and verifier must build the
/// identical string or verification fails.
pub fn sign_message(keypair: &KeyPair, message: &str) -> Vec<u8> {
    keypair.sign(message.as_bytes())
}

/// Verify a canonical message string. Malformed key material or
/// signature bytes verify as false; this never panics.
pub fn verify_message(public_key_hex: &str, message: &str, signature: &[u8]) -> bool {
    KeyPair::verify(public_key_hex, message.as_bytes(), signature).is_ok()
}

/// Whether a string is a well-formed public key encoding
pub fn is_wellformed_pubkey(public_key_hex: &str) -> bool {
    match hex::decode(public_key_hex) {
        Ok(bytes) if bytes.len() == 32 => {
            let arr: [u8; 32] = bytes.try_into().unwrap();
            VerifyingKey::from_bytes(&arr).is_ok()
        }
        _ => false,
    }
}

/// Hash data with SHA256
pub fn hash_sha256(data: &[u8]) -> Vec<u8> {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hasher.finalize().to_vec()
}

/// Hash data and return as hex string
pub fn hash_sha256_hex(data: &[u8]) -> String {
    hex::encode(hash_sha256(data))
}

/// Generate address from public key
pub fn public_key_to_address(public_key_hex: &str) -> String {
    format!("CRD1{}", &public_key_hex[..40])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keypair_generation() {
        let keypair = KeyPair::generate();
        assert_eq!(keypair.public_key_hex().len(), 64);
        assert_eq!(keypair.private_key_hex().len(), 64);
    }

    #[test]
    fn test_keypair_round_trip() {
        let keypair = KeyPair::generate();
        let restored = KeyPair::from_private_key_hex(&keypair.private_key_hex()).unwrap();
        assert_eq!(keypair.public_key_hex(), restored.public_key_hex());
    }

    #[test]
    fn test_sign_and_verify() {
        let keypair = KeyPair::generate();
        let message = b"announce";
        let sig = keypair.sign(message);
        assert!(KeyPair::verify(&keypair.public_key_hex(), message, &sig).is_ok());
    }

    #[test]
    fn test_verify_rejects_wrong_key() {
        let keypair = KeyPair::generate();
        let other = KeyPair::generate();
        let sig = keypair.sign(b"announce");
        assert!(KeyPair::verify(&other.public_key_hex(), b"announce", &sig).is_err());
    }

    #[test]
    fn test_message_codec_field_order_matters() {
        let keypair = KeyPair::generate();
        let sig = sign_message(&keypair, "1.2.3.4:934017000000");
        assert!(verify_message(
            &keypair.public_key_hex(),
            "1.2.3.4:934017000000",
            &sig
        ));
        // same fields, different concatenation order
        assert!(!verify_message(
            &keypair.public_key_hex(),
            "170000001.2.3.4:9340",
            &sig
        ));
    }

    #[test]
    fn test_verify_malformed_key_is_false_not_panic() {
        assert!(!verify_message("zz-not-hex", "msg", &[0u8; 64]));
        assert!(!verify_message("abcd", "msg", &[0u8; 64]));
        assert!(!is_wellformed_pubkey("abcd"));
    }

    #[test]
    fn test_address_generation() {
        let keypair = KeyPair::generate();
        let addr = public_key_to_address(&keypair.public_key_hex());
        assert!(addr.starts_with("CRD1"));
        assert_eq!(addr.len(), 44);
    }
}
