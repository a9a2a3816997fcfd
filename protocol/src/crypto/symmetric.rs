//! AES-256-CBC with zero IV and PKCS7 padding

use super::CryptoError;
use crate::constants::{AES_BLOCK_SIZE, AES_KEY_SIZE};
use aes::Aes256;
use cbc::cipher::{
    block_padding::{NoPadding, Pkcs7},
    BlockDecryptMut, BlockEncryptMut, KeyIvInit,
};
use std::fmt;
use zeroize::{Zeroize, ZeroizeOnDrop};

type Aes256CbcEnc = cbc::Encryptor<Aes256>;
type Aes256CbcDec = cbc::Decryptor<Aes256>;

/// Fixed initialization vector required by the server
pub const IV: [u8; AES_BLOCK_SIZE] = [0u8; AES_BLOCK_SIZE];

/// 32-byte AES session key, zeroed on drop
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct AesKey([u8; AES_KEY_SIZE]);

impl AesKey {
    pub fn new(bytes: [u8; AES_KEY_SIZE]) -> Self {
        Self(bytes)
    }

    pub fn from_slice(bytes: &[u8]) -> Result<Self, CryptoError> {
        let array: [u8; AES_KEY_SIZE] = bytes.try_into().map_err(|_| CryptoError::InvalidKeyLength {
            expected: AES_KEY_SIZE,
            got: bytes.len(),
        })?;
        Ok(Self(array))
    }

    /// Generate a new random key
    pub fn generate() -> Self {
        use rand::Rng;
        let mut bytes = [0u8; AES_KEY_SIZE];
        rand::thread_rng().fill(&mut bytes);
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; AES_KEY_SIZE] {
        &self.0
    }
}

impl fmt::Debug for AesKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("AesKey(..)")
    }
}

/// Ciphertext length for a plaintext of `plain_len` bytes. Always adds 1..=16 bytes.
pub fn encrypted_len(plain_len: usize) -> usize {
    (plain_len / AES_BLOCK_SIZE + 1) * AES_BLOCK_SIZE
}

/// Encrypt `plaintext` under `key`.
///
/// # Returns
/// * `Ok(Vec<u8>)` - Ciphertext, a multiple of 16 bytes. A plaintext that is
///   already block aligned gains a full padding block.
/// * `Err(CryptoError)` - Cipher could not be initialised
pub fn encrypt(plaintext: &[u8], key: &AesKey) -> Result<Vec<u8>, CryptoError> {
    let cipher = Aes256CbcEnc::new_from_slices(key.as_bytes(), &IV).map_err(|_| {
        CryptoError::InvalidKeyLength {
            expected: AES_KEY_SIZE,
            got: key.as_bytes().len(),
        }
    })?;
    Ok(cipher.encrypt_padded_vec_mut::<Pkcs7>(plaintext))
}

/// Decrypt `ciphertext` under `key` and strip its PKCS7 padding.
///
/// # Returns
/// * `Ok(Vec<u8>)` - Plaintext
/// * `Err(CryptoError::UnalignedCiphertext)` - Length is not a multiple of 16
/// * `Err(CryptoError::Padding)` - Pad length out of range or pad bytes disagree
pub fn decrypt(ciphertext: &[u8], key: &AesKey) -> Result<Vec<u8>, CryptoError> {
    if ciphertext.len() % AES_BLOCK_SIZE != 0 {
        return Err(CryptoError::UnalignedCiphertext(ciphertext.len()));
    }

    let cipher = Aes256CbcDec::new_from_slices(key.as_bytes(), &IV).map_err(|_| {
        CryptoError::InvalidKeyLength {
            expected: AES_KEY_SIZE,
            got: key.as_bytes().len(),
        }
    })?;
    let padded = cipher
        .decrypt_padded_vec_mut::<NoPadding>(ciphertext)
        .map_err(|_| CryptoError::UnalignedCiphertext(ciphertext.len()))?;

    strip_pkcs7(padded)
}

fn strip_pkcs7(mut buf: Vec<u8>) -> Result<Vec<u8>, CryptoError> {
    let pad = match buf.last() {
        Some(&last) => last as usize,
        None => return Err(CryptoError::Padding),
    };
    if pad == 0 || pad > AES_BLOCK_SIZE || pad > buf.len() {
        buf.zeroize();
        return Err(CryptoError::Padding);
    }

    let data_len = buf.len() - pad;
    if buf[data_len..].iter().any(|&b| b as usize != pad) {
        buf.zeroize();
        return Err(CryptoError::Padding);
    }

    buf.truncate(data_len);
    Ok(buf)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::collection::vec;
    use proptest::prelude::*;

    fn test_key() -> AesKey {
        let mut bytes = [0u8; 32];
        for (i, b) in bytes.iter_mut().enumerate() {
            *b = i as u8;
        }
        AesKey::new(bytes)
    }

    fn from_hex(s: &str) -> Vec<u8> {
        hex::decode(s).unwrap()
    }

    // Vectors produced with `openssl enc -aes-256-cbc -K 0001..1f -iv 00..00`

    #[test]
    fn test_known_answer_short_plaintext() {
        let ciphertext = encrypt(b"hello world", &test_key()).unwrap();
        assert_eq!(ciphertext, from_hex("af79df073287ee3f511d2556d54dce39"));
    }

    #[test]
    fn test_known_answer_block_aligned_plaintext() {
        let ciphertext = encrypt(b"0123456789abcdef", &test_key()).unwrap();
        assert_eq!(
            ciphertext,
            from_hex("d8c95758e3353e530fa52bd10e73b9864f6ba30222074c4d477c3f294f12a82f")
        );
        assert_eq!(decrypt(&ciphertext, &test_key()).unwrap(), b"0123456789abcdef");
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(64))]

        #[test]
        fn test_encrypt_decrypt_round_trip(
            key in any::<[u8; 32]>(),
            plaintext in vec(any::<u8>(), 1..10_000),
        ) {
            let key = AesKey::new(key);
            let ciphertext = encrypt(&plaintext, &key).unwrap();
            prop_assert_eq!(ciphertext.len(), encrypted_len(plaintext.len()));
            prop_assert_eq!(decrypt(&ciphertext, &key).unwrap(), plaintext);
        }

        #[test]
        fn test_encrypted_len_rounds_up_past_full_blocks(len in 0usize..1_000_000) {
            let expected = 16 * (len + 1).div_ceil(16);
            prop_assert_eq!(encrypted_len(len), expected);
            prop_assert!((1..=16).contains(&(expected - len)));
        }
    }

    #[test]
    fn test_encrypted_len() {
        assert_eq!(encrypted_len(0), 16);
        assert_eq!(encrypted_len(15), 16);
        assert_eq!(encrypted_len(16), 32);
        assert_eq!(encrypted_len(17), 32);
    }

    #[test]
    fn test_decrypt_wrong_key_fails_or_differs() {
        let plaintext = b"Important backup content";
        let ciphertext = encrypt(plaintext, &test_key()).unwrap();
        match decrypt(&ciphertext, &AesKey::generate()) {
            Ok(decrypted) => assert_ne!(decrypted, plaintext),
            Err(e) => assert!(matches!(e, CryptoError::Padding)),
        }
    }

    #[test]
    fn test_decrypt_tampered_padding_fails() {
        let key = test_key();
        let mut ciphertext = encrypt(b"0123456789abcdef", &key).unwrap();
        // The last block is pure padding; flipping its previous block's last
        // byte corrupts the pad length byte.
        ciphertext[15] ^= 0x01;
        assert!(matches!(decrypt(&ciphertext, &key), Err(CryptoError::Padding)));
    }

    #[test]
    fn test_decrypt_unaligned_fails() {
        assert!(matches!(
            decrypt(&[0u8; 17], &test_key()),
            Err(CryptoError::UnalignedCiphertext(17))
        ));
    }

    #[test]
    fn test_decrypt_empty_fails() {
        assert!(matches!(decrypt(&[], &test_key()), Err(CryptoError::Padding)));
    }

    #[test]
    fn test_strip_pkcs7() {
        let mut block = vec![b'a'; 12];
        block.extend_from_slice(&[4, 4, 4, 4]);
        assert_eq!(strip_pkcs7(block).unwrap(), vec![b'a'; 12]);

        let mut mixed = vec![b'a'; 12];
        mixed.extend_from_slice(&[4, 3, 4, 4]);
        assert!(strip_pkcs7(mixed).is_err());

        let mut zero = vec![b'a'; 15];
        zero.push(0);
        assert!(strip_pkcs7(zero).is_err());

        let mut too_big = vec![b'a'; 15];
        too_big.push(17);
        assert!(strip_pkcs7(too_big).is_err());
    }

    #[test]
    fn test_key_from_slice() {
        assert!(AesKey::from_slice(&[0u8; 32]).is_ok());
        assert!(matches!(
            AesKey::from_slice(&[0u8; 16]),
            Err(CryptoError::InvalidKeyLength { expected: 32, got: 16 })
        ));
        assert_eq!(format!("{:?}", test_key()), "AesKey(..)");
    }
}
