//! RSA key handling and OAEP(SHA-256) delivery of the AES session key

use super::symmetric::AesKey;
use super::CryptoError;
use crate::constants::{AES_KEY_SIZE, ENCRYPTED_AES_KEY_SIZE};
use rsa::pkcs1::DecodeRsaPrivateKey;
use rsa::pkcs8::{DecodePrivateKey, DecodePublicKey, EncodePrivateKey, EncodePublicKey};
use rsa::traits::PublicKeyParts;
use rsa::{Oaep, RsaPrivateKey, RsaPublicKey};
use sha2::Sha256;
use std::fmt;
use zeroize::Zeroizing;

fn oaep() -> Oaep {
    Oaep::new::<Sha256>()
}

/// Client RSA private key. Never leaves the client; only its public half is sent.
#[derive(Clone)]
pub struct PrivateKey {
    inner: RsaPrivateKey,
}

impl PrivateKey {
    /// Parse a DER private key, PKCS#8 first, then PKCS#1
    pub fn from_der(der: &[u8]) -> Result<Self, CryptoError> {
        let inner = match RsaPrivateKey::from_pkcs8_der(der) {
            Ok(key) => key,
            Err(pkcs8_err) => RsaPrivateKey::from_pkcs1_der(der).map_err(|pkcs1_err| {
                CryptoError::KeyFormat(format!(
                    "not a PKCS#8 ({}) or PKCS#1 ({}) RSA private key",
                    pkcs8_err, pkcs1_err
                ))
            })?,
        };
        Ok(Self { inner })
    }

    /// Generate a new key with a modulus of `bits` bits
    pub fn generate(bits: usize) -> Result<Self, CryptoError> {
        let inner = RsaPrivateKey::new(&mut rand::thread_rng(), bits)
            .map_err(|e| CryptoError::KeyGeneration(e.to_string()))?;
        Ok(Self { inner })
    }

    /// PKCS#8 DER encoding of the private key
    pub fn to_der(&self) -> Result<Zeroizing<Vec<u8>>, CryptoError> {
        let document = self
            .inner
            .to_pkcs8_der()
            .map_err(|e| CryptoError::KeyFormat(e.to_string()))?;
        Ok(Zeroizing::new(document.as_bytes().to_vec()))
    }

    /// X.509 SubjectPublicKeyInfo DER encoding of the public key
    pub fn public_key_der(&self) -> Result<Vec<u8>, CryptoError> {
        let document = self
            .inner
            .to_public_key()
            .to_public_key_der()
            .map_err(|e| CryptoError::KeyFormat(e.to_string()))?;
        Ok(document.as_bytes().to_vec())
    }

    /// Modulus size in bytes, which is also the size of every ciphertext
    pub fn modulus_size(&self) -> usize {
        self.inner.size()
    }

    /// Recover the AES session key from the server's 144-byte ciphertext
    ///
    /// # Returns
    /// * `Ok(AesKey)` - The 32-byte session key
    /// * `Err(CryptoError::InvalidCiphertextLength)` - Input is not 144 bytes
    /// * `Err(CryptoError::Decrypt)` - Not a valid OAEP ciphertext under this key
    /// * `Err(CryptoError::UnexpectedKeyLength)` - Decrypted to something other than 32 bytes
    pub fn decrypt_session_key(&self, ciphertext: &[u8]) -> Result<AesKey, CryptoError> {
        if ciphertext.len() != ENCRYPTED_AES_KEY_SIZE {
            return Err(CryptoError::InvalidCiphertextLength {
                expected: ENCRYPTED_AES_KEY_SIZE,
                got: ciphertext.len(),
            });
        }

        let plaintext = Zeroizing::new(
            self.inner
                .decrypt(oaep(), ciphertext)
                .map_err(|_| CryptoError::Decrypt)?,
        );

        if plaintext.len() != AES_KEY_SIZE {
            return Err(CryptoError::UnexpectedKeyLength {
                expected: AES_KEY_SIZE,
                got: plaintext.len(),
            });
        }

        AesKey::from_slice(&plaintext)
    }
}

impl fmt::Debug for PrivateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PrivateKey({} bits)", self.inner.size() * 8)
    }
}

/// OAEP-encrypt `plaintext` for the holder of the DER public key
pub fn encrypt_for(public_key_der: &[u8], plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
    let public_key = RsaPublicKey::from_public_key_der(public_key_der)
        .map_err(|e| CryptoError::KeyFormat(e.to_string()))?;
    public_key
        .encrypt(&mut rand::thread_rng(), oaep(), plaintext)
        .map_err(|e| CryptoError::Encryption(e.to_string()))
}

/// Server side of the key exchange: wrap `key` for the client's public key
pub fn encrypt_session_key(public_key_der: &[u8], key: &AesKey) -> Result<Vec<u8>, CryptoError> {
    encrypt_for(public_key_der, key.as_bytes())
}
