//! Wire structures: request/response headers, padded string fields and payloads
//!
//! Every multi-byte integer on the wire is little-endian.

use crate::constants::{CLIENT_ID_SIZE, NAME_FIELD_SIZE};
use crate::error::PacketError;
use std::fmt;

/// 16-byte client identifier assigned by the server
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct ClientId([u8; CLIENT_ID_SIZE]);

impl ClientId {
    pub const fn new(bytes: [u8; CLIENT_ID_SIZE]) -> Self {
        Self(bytes)
    }

    /// Locally generated placeholder used until the server assigns an ID
    pub fn random() -> Self {
        use rand::Rng;
        let mut bytes = [0u8; CLIENT_ID_SIZE];
        rand::thread_rng().fill(&mut bytes);
        Self(bytes)
    }

    pub fn from_slice(bytes: &[u8]) -> Result<Self, PacketError> {
        let array: [u8; CLIENT_ID_SIZE] = bytes
            .get(..CLIENT_ID_SIZE)
            .and_then(|b| b.try_into().ok())
            .ok_or(PacketError::TooShort {
                expected: CLIENT_ID_SIZE,
                actual: bytes.len(),
            })?;
        Ok(Self(array))
    }

    pub fn as_bytes(&self) -> &[u8; CLIENT_ID_SIZE] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ClientId({})", self.to_hex())
    }
}

/// Request header (23 bytes)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequestHeader {
    /// Client ID (16 bytes)
    pub client_id: ClientId,
    /// Client version (1 byte)
    pub version: u8,
    /// Request code (2 bytes)
    pub code: u16,
    /// Payload size (4 bytes)
    pub payload_size: u32,
}

impl RequestHeader {
    pub const SIZE: usize = 23;

    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut bytes = [0u8; Self::SIZE];
        bytes[0..16].copy_from_slice(self.client_id.as_bytes());
        bytes[16] = self.version;
        bytes[17..19].copy_from_slice(&self.code.to_le_bytes());
        bytes[19..23].copy_from_slice(&self.payload_size.to_le_bytes());
        bytes
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, PacketError> {
        if bytes.len() < Self::SIZE {
            return Err(PacketError::TooShort {
                expected: Self::SIZE,
                actual: bytes.len(),
            });
        }

        let client_id = ClientId::from_slice(&bytes[0..16])?;
        let version = bytes[16];
        let code = u16::from_le_bytes([bytes[17], bytes[18]]);
        let payload_size = u32::from_le_bytes([bytes[19], bytes[20], bytes[21], bytes[22]]);

        Ok(Self {
            client_id,
            version,
            code,
            payload_size,
        })
    }
}

/// Response header (7 bytes)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResponseHeader {
    /// Server version (1 byte)
    pub version: u8,
    /// Response code (2 bytes)
    pub code: u16,
    /// Payload size (4 bytes)
    pub payload_size: u32,
}

impl ResponseHeader {
    pub const SIZE: usize = 7;

    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut bytes = [0u8; Self::SIZE];
        bytes[0] = self.version;
        bytes[1..3].copy_from_slice(&self.code.to_le_bytes());
        bytes[3..7].copy_from_slice(&self.payload_size.to_le_bytes());
        bytes
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, PacketError> {
        if bytes.len() < Self::SIZE {
            return Err(PacketError::TooShort {
                expected: Self::SIZE,
                actual: bytes.len(),
            });
        }

        Ok(Self {
            version: bytes[0],
            code: u16::from_le_bytes([bytes[1], bytes[2]]),
            payload_size: u32::from_le_bytes([bytes[3], bytes[4], bytes[5], bytes[6]]),
        })
    }
}

/// A complete request: header followed by payload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    pub header: RequestHeader,
    pub payload: Vec<u8>,
}

impl Request {
    pub fn new(client_id: ClientId, version: u8, code: u16, payload: Vec<u8>) -> Result<Self, PacketError> {
        let payload_size =
            u32::try_from(payload.len()).map_err(|_| PacketError::PayloadTooLarge(payload.len()))?;
        Ok(Self {
            header: RequestHeader {
                client_id,
                version,
                code,
                payload_size,
            },
            payload,
        })
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(RequestHeader::SIZE + self.payload.len());
        bytes.extend_from_slice(&self.header.to_bytes());
        bytes.extend_from_slice(&self.payload);
        bytes
    }
}

/// Encode `s` left-justified into a zero-filled field of `field_size` bytes.
///
/// At least one trailing zero byte is always kept, so `s` must be shorter
/// than the field.
pub fn encode_padded_string(s: &str, field_size: usize) -> Result<Vec<u8>, PacketError> {
    encode_padded_bytes(s.as_bytes(), field_size)
}

pub fn encode_padded_bytes(bytes: &[u8], field_size: usize) -> Result<Vec<u8>, PacketError> {
    if bytes.len() >= field_size {
        return Err(PacketError::FieldTooLong {
            len: bytes.len(),
            field_size,
        });
    }
    let mut field = vec![0u8; field_size];
    field[..bytes.len()].copy_from_slice(bytes);
    Ok(field)
}

/// Content of a padded field up to the first zero byte, or the whole field if it has none
pub fn decode_padded_bytes(field: &[u8]) -> &[u8] {
    let end = field.iter().position(|&b| b == 0).unwrap_or(field.len());
    &field[..end]
}

pub fn decode_padded_string(field: &[u8]) -> Result<String, PacketError> {
    std::str::from_utf8(decode_padded_bytes(field))
        .map(str::to_owned)
        .map_err(|_| PacketError::InvalidUtf8)
}

fn read_u32(bytes: &[u8], offset: usize) -> u32 {
    u32::from_le_bytes([bytes[offset], bytes[offset + 1], bytes[offset + 2], bytes[offset + 3]])
}

/// REGISTER payload: username field
#[derive(Debug, Clone)]
pub struct RegisterPayload {
    pub username: String,
}

impl RegisterPayload {
    pub fn to_bytes(&self) -> Result<Vec<u8>, PacketError> {
        encode_padded_string(&self.username, NAME_FIELD_SIZE)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, PacketError> {
        if bytes.len() != NAME_FIELD_SIZE {
            return Err(PacketError::UnexpectedSize {
                expected: NAME_FIELD_SIZE,
                actual: bytes.len(),
            });
        }
        Ok(Self {
            username: decode_padded_string(bytes)?,
        })
    }
}

/// SEND_PUBLIC_KEY payload: username field followed by the DER public key
#[derive(Debug, Clone)]
pub struct PublicKeyPayload {
    pub username: String,
    pub public_key: Vec<u8>,
}

impl PublicKeyPayload {
    pub fn to_bytes(&self) -> Result<Vec<u8>, PacketError> {
        let mut bytes = encode_padded_string(&self.username, NAME_FIELD_SIZE)?;
        bytes.extend_from_slice(&self.public_key);
        Ok(bytes)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, PacketError> {
        if bytes.len() <= NAME_FIELD_SIZE {
            return Err(PacketError::TooShort {
                expected: NAME_FIELD_SIZE + 1,
                actual: bytes.len(),
            });
        }
        Ok(Self {
            username: decode_padded_string(&bytes[..NAME_FIELD_SIZE])?,
            public_key: bytes[NAME_FIELD_SIZE..].to_vec(),
        })
    }
}

/// SEND_FILE payload, one packet of a possibly multi-packet upload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilePacket {
    /// Total ciphertext size across all packets (4 bytes)
    pub encrypted_size: u32,
    /// Plaintext file size (4 bytes)
    pub original_size: u32,
    /// 1-based packet index (2 bytes)
    pub packet_number: u16,
    /// Packet count (2 bytes)
    pub total_packets: u16,
    /// Filename field (255 bytes)
    pub filename: String,
    /// Ciphertext chunk
    pub content: Vec<u8>,
}

impl FilePacket {
    /// Fixed part of the payload preceding the ciphertext
    pub const PREFIX_SIZE: usize = 4 + 4 + 2 + 2 + NAME_FIELD_SIZE;

    pub fn to_bytes(&self) -> Result<Vec<u8>, PacketError> {
        let mut bytes = Vec::with_capacity(Self::PREFIX_SIZE + self.content.len());
        bytes.extend_from_slice(&self.encrypted_size.to_le_bytes());
        bytes.extend_from_slice(&self.original_size.to_le_bytes());
        bytes.extend_from_slice(&self.packet_number.to_le_bytes());
        bytes.extend_from_slice(&self.total_packets.to_le_bytes());
        bytes.extend_from_slice(&encode_padded_string(&self.filename, NAME_FIELD_SIZE)?);
        bytes.extend_from_slice(&self.content);
        Ok(bytes)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, PacketError> {
        if bytes.len() < Self::PREFIX_SIZE {
            return Err(PacketError::TooShort {
                expected: Self::PREFIX_SIZE,
                actual: bytes.len(),
            });
        }
        Ok(Self {
            encrypted_size: read_u32(bytes, 0),
            original_size: read_u32(bytes, 4),
            packet_number: u16::from_le_bytes([bytes[8], bytes[9]]),
            total_packets: u16::from_le_bytes([bytes[10], bytes[11]]),
            filename: decode_padded_string(&bytes[12..12 + NAME_FIELD_SIZE])?,
            content: bytes[Self::PREFIX_SIZE..].to_vec(),
        })
    }
}

/// CRC_OK / CRC_RETRY / CRC_FAIL payload: filename field
#[derive(Debug, Clone)]
pub struct CrcPayload {
    pub filename: String,
}

impl CrcPayload {
    pub fn to_bytes(&self) -> Result<Vec<u8>, PacketError> {
        encode_padded_string(&self.filename, NAME_FIELD_SIZE)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, PacketError> {
        if bytes.len() != NAME_FIELD_SIZE {
            return Err(PacketError::UnexpectedSize {
                expected: NAME_FIELD_SIZE,
                actual: bytes.len(),
            });
        }
        Ok(Self {
            filename: decode_padded_string(bytes)?,
        })
    }
}

/// FILE_CRC payload.
///
/// Servers send either the bare CRC or the long form
/// `client_id(16) + content_size(4) + filename(255) + crc(4)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileCrcPayload {
    pub client_id: Option<ClientId>,
    pub content_size: Option<u32>,
    pub filename: Option<String>,
    pub crc: u32,
}

impl FileCrcPayload {
    pub const SHORT_SIZE: usize = 4;
    pub const LONG_SIZE: usize = CLIENT_ID_SIZE + 4 + NAME_FIELD_SIZE + 4;

    pub fn short(crc: u32) -> Self {
        Self {
            client_id: None,
            content_size: None,
            filename: None,
            crc,
        }
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, PacketError> {
        match (&self.client_id, self.content_size, &self.filename) {
            (Some(client_id), Some(content_size), Some(filename)) => {
                let mut bytes = Vec::with_capacity(Self::LONG_SIZE);
                bytes.extend_from_slice(client_id.as_bytes());
                bytes.extend_from_slice(&content_size.to_le_bytes());
                bytes.extend_from_slice(&encode_padded_string(filename, NAME_FIELD_SIZE)?);
                bytes.extend_from_slice(&self.crc.to_le_bytes());
                Ok(bytes)
            }
            _ => Ok(self.crc.to_le_bytes().to_vec()),
        }
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, PacketError> {
        match bytes.len() {
            Self::SHORT_SIZE => Ok(Self::short(read_u32(bytes, 0))),
            Self::LONG_SIZE => {
                let name_start = CLIENT_ID_SIZE + 4;
                let crc_start = name_start + NAME_FIELD_SIZE;
                Ok(Self {
                    client_id: Some(ClientId::from_slice(&bytes[..CLIENT_ID_SIZE])?),
                    content_size: Some(read_u32(bytes, CLIENT_ID_SIZE)),
                    filename: Some(decode_padded_string(&bytes[name_start..crc_start])?),
                    crc: read_u32(bytes, crc_start),
                })
            }
            actual => Err(PacketError::UnexpectedSize {
                expected: Self::LONG_SIZE,
                actual,
            }),
        }
    }
}
