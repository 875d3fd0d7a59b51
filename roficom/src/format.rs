//! Blob wire format
//!
//! ```text
//! +--------+---------------------+---------+
//! | header | payload (0..=32767) | CRC-32  |
//! | 2 B    | `length` bytes      | 4 B     |
//! +--------+---------------------+---------+
//! ```
//!
//! The header holds the payload length in bits 0..=14 and the MORE flag in bit 15. MORE is
//! set on every blob of a packet except the last one. The CRC covers the header and the
//! payload. Multi-byte fields use the native byte order of the connector MCU and are copied
//! byte-wise, so no field needs to be aligned.

/// CRC-32/MPEG-2, the default configuration of the STM32 hardware CRC unit
static CRC: crc::Crc<u32> = crc::Crc::<u32>::new(&crc::CRC_32_MPEG_2);

pub const HEADER_LENGTH: usize = 2;
pub const CRC_LENGTH: usize = 4;
/// Bytes a blob adds on top of its payload
pub const OVERHEAD: usize = HEADER_LENGTH + CRC_LENGTH;
pub const MAX_PAYLOAD_LENGTH: usize = BlobHeader::LENGTH_MASK as usize;
/// Length of the optional content type prefix at the start of a packet stream
pub const CONTENT_TYPE_LENGTH: usize = 2;

pub struct BlobCrc(crc::Digest<'static, u32>);

impl Default for BlobCrc {
    fn default() -> Self {
        Self(CRC.digest())
    }
}

impl BlobCrc {
    pub fn add_bytes(&mut self, bytes: &[u8]) {
        self.0.update(bytes);
    }

    pub fn get(self) -> u32 {
        self.0.finalize()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct BlobHeader(u16);

impl BlobHeader {
    const MORE: u16 = 1 << 15;
    const LENGTH_MASK: u16 = !Self::MORE;

    pub fn new(length: usize, more: bool) -> Self {
        assert!(length <= MAX_PAYLOAD_LENGTH, "blob payload too long");
        let mut raw = length as u16;
        if more {
            raw |= Self::MORE;
        }
        Self(raw)
    }

    pub fn length(&self) -> usize {
        usize::from(self.0 & Self::LENGTH_MASK)
    }

    pub fn more(&self) -> bool {
        self.0 & Self::MORE != 0
    }

    pub fn from_bytes(bytes: [u8; HEADER_LENGTH]) -> Self {
        Self(u16::from_ne_bytes(bytes))
    }

    pub fn to_bytes(self) -> [u8; HEADER_LENGTH] {
        self.0.to_ne_bytes()
    }

    /// Total blob length including header and CRC
    pub fn blob_length(&self) -> usize {
        OVERHEAD + self.length()
    }
}

/// Writes the CRC after the header and payload already placed in `blob`.
///
/// Returns the total blob length.
pub fn seal_blob(blob: &mut [u8], header: BlobHeader) -> usize {
    let covered = HEADER_LENGTH + header.length();
    let mut crc = BlobCrc::default();
    crc.add_bytes(&blob[..covered]);
    write_u32(blob, covered, crc.get());
    covered + CRC_LENGTH
}

/// Checks the CRC of a complete blob
pub fn verify_blob(blob: &[u8], header: BlobHeader) -> bool {
    let covered = HEADER_LENGTH + header.length();
    let mut crc = BlobCrc::default();
    crc.add_bytes(&blob[..covered]);
    crc.get() == read_u32(blob, covered)
}

pub fn read_u16(bytes: &[u8], offset: usize) -> u16 {
    u16::from_ne_bytes([bytes[offset], bytes[offset + 1]])
}

pub fn write_u16(bytes: &mut [u8], offset: usize, value: u16) {
    bytes[offset..offset + 2].copy_from_slice(&value.to_ne_bytes());
}

pub fn read_i16(bytes: &[u8], offset: usize) -> i16 {
    i16::from_ne_bytes([bytes[offset], bytes[offset + 1]])
}

pub fn write_i16(bytes: &mut [u8], offset: usize, value: i16) {
    bytes[offset..offset + 2].copy_from_slice(&value.to_ne_bytes());
}

pub fn read_u32(bytes: &[u8], offset: usize) -> u32 {
    u32::from_ne_bytes([
        bytes[offset],
        bytes[offset + 1],
        bytes[offset + 2],
        bytes[offset + 3],
    ])
}

pub fn write_u32(bytes: &mut [u8], offset: usize, value: u32) {
    bytes[offset..offset + 4].copy_from_slice(&value.to_ne_bytes());
}
