//! Protocol constants, request/response codes and fixed field sizes

use std::fmt;
use std::str::FromStr;

/// Client version byte sent in every request header
pub const CLIENT_VERSION: u8 = 3;

/// Client identifier size (16 bytes)
pub const CLIENT_ID_SIZE: usize = 16;

/// Padded string field size used for usernames and filenames
pub const NAME_FIELD_SIZE: usize = 255;

/// Longest filename accepted for upload
pub const MAX_FILENAME_LEN: usize = 200;

/// Longest username accepted for registration
pub const MAX_USERNAME_LEN: usize = 100;

/// AES-256 key size
pub const AES_KEY_SIZE: usize = 32;

/// AES block size
pub const AES_BLOCK_SIZE: usize = 16;

/// Size of the RSA-encrypted AES key delivered by the server
pub const ENCRYPTED_AES_KEY_SIZE: usize = 144;

/// RSA modulus size in bits that yields [`ENCRYPTED_AES_KEY_SIZE`] ciphertexts
pub const RSA_KEY_BITS: usize = ENCRYPTED_AES_KEY_SIZE * 8;

/// Largest response payload the client will read (64 KB)
pub const MAX_RESPONSE_PAYLOAD: u32 = 64 * 1024;

/// Response codes sent by the server
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum ResponseCode {
    /// Registration accepted, payload may carry the assigned client ID
    RegisterSuccess = 1600,

    /// Registration refused
    RegisterFail = 1601,

    /// Public key received, payload is the encrypted AES key
    PublicKeyAck = 1602,

    /// File received, payload carries the server-side CRC
    FileCrc = 1603,

    /// Confirmation acknowledged
    FileReceived = 1604,

    /// Server-side failure
    GenericServerError = 1605,
}

impl ResponseCode {
    pub fn from_u16(value: u16) -> Option<Self> {
        match value {
            1600 => Some(Self::RegisterSuccess),
            1601 => Some(Self::RegisterFail),
            1602 => Some(Self::PublicKeyAck),
            1603 => Some(Self::FileCrc),
            1604 => Some(Self::FileReceived),
            1605 => Some(Self::GenericServerError),
            _ => None,
        }
    }

    pub fn to_u16(self) -> u16 {
        self as u16
    }
}

/// Request code assignments.
///
/// The request codes past SEND_PUBLIC_KEY moved between server
/// revisions, so they are looked up through a table rather than fixed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequestCodes {
    pub register: u16,
    pub send_public_key: u16,
    pub send_file: u16,
    pub crc_ok: u16,
    /// Sent on a mismatch that will be retried. Revisions without it send `crc_fail`.
    pub crc_retry: Option<u16>,
    pub crc_fail: u16,
}

/// Server wire revision, selecting a [`RequestCodes`] table
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WireRevision {
    /// SEND_FILE=1027, CRC_OK=1028, CRC_FAIL=1029
    #[default]
    Shared,

    /// SEND_FILE=1028, CRC_OK=1029, CRC_RETRY=1030, CRC_FAIL=1031
    Extended,
}

impl WireRevision {
    pub fn request_codes(self) -> RequestCodes {
        match self {
            Self::Shared => RequestCodes {
                register: 1025,
                send_public_key: 1026,
                send_file: 1027,
                crc_ok: 1028,
                crc_retry: None,
                crc_fail: 1029,
            },
            Self::Extended => RequestCodes {
                register: 1025,
                send_public_key: 1026,
                send_file: 1028,
                crc_ok: 1029,
                crc_retry: Some(1030),
                crc_fail: 1031,
            },
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Shared => "shared",
            Self::Extended => "extended",
        }
    }
}

impl fmt::Display for WireRevision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for WireRevision {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "shared" => Ok(Self::Shared),
            "extended" => Ok(Self::Extended),
            other => Err(format!(
                "unknown wire revision '{}', expected 'shared' or 'extended'",
                other
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_response_code_round_trip() {
        for code in 1600..=1605 {
            let parsed = ResponseCode::from_u16(code).unwrap();
            assert_eq!(parsed.to_u16(), code);
        }
        assert_eq!(ResponseCode::from_u16(9999), None);
        assert_eq!(ResponseCode::from_u16(1606), None);
    }

    #[test]
    fn test_shared_table() {
        let codes = WireRevision::Shared.request_codes();
        assert_eq!(codes.register, 1025);
        assert_eq!(codes.send_public_key, 1026);
        assert_eq!(codes.send_file, 1027);
        assert_eq!(codes.crc_ok, 1028);
        assert_eq!(codes.crc_retry, None);
        assert_eq!(codes.crc_fail, 1029);
    }

    #[test]
    fn test_extended_table() {
        let codes = WireRevision::Extended.request_codes();
        assert_eq!(codes.send_file, 1028);
        assert_eq!(codes.crc_retry, Some(1030));
        assert_eq!(codes.crc_fail, 1031);
    }

    #[test]
    fn test_parse_wire_revision() {
        assert_eq!("shared".parse::<WireRevision>().unwrap(), WireRevision::Shared);
        assert_eq!(" Extended ".parse::<WireRevision>().unwrap(), WireRevision::Extended);
        assert!("v2".parse::<WireRevision>().is_err());
    }

    #[test]
    fn test_rsa_modulus_matches_ciphertext_size() {
        assert_eq!(RSA_KEY_BITS, 1152);
    }
}
