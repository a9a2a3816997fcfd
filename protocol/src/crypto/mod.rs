//! Cryptographic primitives for the backup protocol
//!
//! - [`symmetric`]: AES-256-CBC with a fixed all-zero IV and PKCS7 padding,
//!   used for file content.
//! - [`asymmetric`]: RSA with OAEP(SHA-256), used to deliver the AES
//!   session key from the server.
//!
//! The zero IV is a wire-compatibility requirement of the server. Identical
//! plaintexts under the same key produce identical ciphertexts.

pub mod asymmetric;
pub mod symmetric;

pub use asymmetric::PrivateKey;
pub use symmetric::AesKey;

use thiserror::Error;

/// Crypto errors
#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("Invalid key length (expected {expected}, got {got})")]
    InvalidKeyLength { expected: usize, got: usize },

    #[error("Invalid ciphertext length (expected {expected}, got {got})")]
    InvalidCiphertextLength { expected: usize, got: usize },

    #[error("Ciphertext length {0} is not a multiple of the block size")]
    UnalignedCiphertext(usize),

    #[error("Invalid PKCS7 padding")]
    Padding,

    #[error("Malformed key: {0}")]
    KeyFormat(String),

    #[error("Decryption failed (ciphertext does not match the private key)")]
    Decrypt,

    #[error("Recovered session key has {got} bytes, expected {expected}")]
    UnexpectedKeyLength { expected: usize, got: usize },

    #[error("Encryption failed: {0}")]
    Encryption(String),

    #[error("Key generation failed: {0}")]
    KeyGeneration(String),
}
