//! Key material owned by one session

use protocol::crypto::{AesKey, PrivateKey};
use zeroize::Zeroize;

/// RSA private key plus the AES session key once the exchange completes.
///
/// The AES key can be installed once and is zeroed by [`SessionKeys::wipe`]
/// or on drop.
#[derive(Debug)]
pub struct SessionKeys {
    private_key: PrivateKey,
    aes_key: Option<AesKey>,
}

impl SessionKeys {
    pub fn new(private_key: PrivateKey) -> Self {
        Self {
            private_key,
            aes_key: None,
        }
    }

    pub fn private_key(&self) -> &PrivateKey {
        &self.private_key
    }

    pub fn aes_key(&self) -> Option<&AesKey> {
        self.aes_key.as_ref()
    }

    /// Install the session key. Returns the key back if one is already set.
    pub fn install(&mut self, key: AesKey) -> Result<(), AesKey> {
        if self.aes_key.is_some() {
            return Err(key);
        }
        self.aes_key = Some(key);
        Ok(())
    }

    pub fn wipe(&mut self) {
        if let Some(mut key) = self.aes_key.take() {
            key.zeroize();
        }
    }
}
