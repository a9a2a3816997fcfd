//! POSIX `cksum` compatible CRC-32
//!
//! Polynomial 0x04C11DB7, MSB-first, zero initial value. After the data the
//! total byte length is folded in (least significant byte first, only as
//! many bytes as needed) and the result is complemented.

const POLYNOMIAL: u32 = 0x04C1_1DB7;

const TABLE: [u32; 256] = build_table();

const fn build_table() -> [u32; 256] {
    let mut table = [0u32; 256];
    let mut i = 0;
    while i < 256 {
        let mut crc = (i as u32) << 24;
        let mut bit = 0;
        while bit < 8 {
            crc = if crc & 0x8000_0000 != 0 {
                (crc << 1) ^ POLYNOMIAL
            } else {
                crc << 1
            };
            bit += 1;
        }
        table[i] = crc;
        i += 1;
    }
    table
}

#[inline]
fn step(crc: u32, byte: u8) -> u32 {
    (crc << 8) ^ TABLE[((crc >> 24) as u8 ^ byte) as usize]
}

/// Streaming checksum. Chunking does not affect the result, byte order does.
#[derive(Debug, Clone, Default)]
pub struct Crc32 {
    crc: u32,
    total_length: u64,
}

impl Crc32 {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update(&mut self, bytes: &[u8]) {
        self.crc = bytes.iter().fold(self.crc, |crc, &b| step(crc, b));
        self.total_length += bytes.len() as u64;
    }

    /// Checksum of everything fed so far. Does not consume the state.
    pub fn finalize(&self) -> u32 {
        let mut crc = self.crc;
        let mut length = self.total_length;
        while length != 0 {
            crc = step(crc, length as u8);
            length >>= 8;
        }
        !crc
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }

    pub fn total_length(&self) -> u64 {
        self.total_length
    }
}

/// One-shot checksum of `bytes`
pub fn checksum(bytes: &[u8]) -> u32 {
    let mut crc = Crc32::new();
    crc.update(bytes);
    crc.finalize()
}
