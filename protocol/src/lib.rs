//! Cryptback Protocol Library
//!
//! Wire format and cryptography shared by the backup client and any
//! compatible server: fixed-layout headers, padded string fields, the
//! `cksum` checksum, AES-256-CBC file encryption and RSA-OAEP key delivery.

pub mod constants;
pub mod crc;
pub mod crypto;
pub mod error;
pub mod packets;

pub use constants::*;
pub use crypto::CryptoError;
pub use error::PacketError;
pub use packets::{ClientId, Request, RequestHeader, ResponseHeader};
