//! On-disk journal layout: file header and entry frames.
//!
//! The journal is a file header followed by frames, each frame an entry
//! header plus a bincode-encoded command payload, padded to 8-byte alignment.
//! Headers carry a CRC32C over their own bytes; payloads carry a truncated
//! BLAKE3 hash recorded in the header. The exact byte layout is private to
//! this store implementation — only the sequencing contract is load-bearing.

/// Frame header size, 8-byte aligned.
pub const FRAME_HEADER_SIZE: usize = 48;

/// Maximum payload size per frame: 64 MB.
pub const MAX_PAYLOAD_SIZE: u32 = 64 * 1024 * 1024;

/// Journal file header size.
pub const FILE_HEADER_SIZE: usize = 32;

/// Journal file magic bytes: "BJRN".
pub const JOURNAL_MAGIC: [u8; 4] = [0x42, 0x4A, 0x52, 0x4E];

/// Current journal format version.
pub const JOURNAL_VERSION: u32 = 1;

/// The per-entry frame header.
///
/// # Layout
///
/// ```text
/// Offset  Size  Field
/// ------  ----  -----
/// 0       4     header_checksum (CRC32C of bytes [4..48])
/// 4       4     payload_size
/// 8       8     seq
/// 16      8     stamp_ns
/// 24      16    payload_hash (truncated BLAKE3)
/// 40      2     flags
/// 42      2     schema_version
/// 44      4     reserved
/// ```
#[derive(Clone, Copy, Debug)]
pub struct FrameHeader {
    /// CRC32C of bytes [4..48].
    pub header_checksum: u32,
    /// Size of the payload in bytes.
    pub payload_size: u32,
    /// Monotonic journal sequence number (0, 1, 2, ...).
    pub seq: u64,
    /// Admission timestamp, nanoseconds since Unix epoch.
    pub stamp_ns: u64,
    /// Truncated BLAKE3 hash of the payload.
    pub payload_hash: [u8; 16],
    /// Entry type bitmask (reserved, currently zero).
    pub flags: u16,
    /// Payload schema version.
    pub schema_version: u16,
    /// Reserved for future use.
    pub reserved: u32,
}

impl FrameHeader {
    /// Create a header for the given payload. Computes both hashes.
    pub fn new(seq: u64, stamp_ns: u64, payload: &[u8]) -> Self {
        let mut header = FrameHeader {
            header_checksum: 0,
            payload_size: payload.len() as u32,
            seq,
            stamp_ns,
            payload_hash: compute_payload_hash(payload),
            flags: 0,
            schema_version: 1,
            reserved: 0,
        };
        header.header_checksum = header.compute_checksum();
        header
    }

    /// Compute CRC32C of header bytes [4..48].
    pub fn compute_checksum(&self) -> u32 {
        let bytes = self.to_bytes();
        crc32c::crc32c(&bytes[4..])
    }

    /// Verify the header checksum.
    pub fn verify_checksum(&self) -> bool {
        self.header_checksum == self.compute_checksum()
    }

    /// Serialize the header, little-endian fields at fixed offsets.
    pub fn to_bytes(&self) -> [u8; FRAME_HEADER_SIZE] {
        let mut bytes = [0u8; FRAME_HEADER_SIZE];
        bytes[0..4].copy_from_slice(&self.header_checksum.to_le_bytes());
        bytes[4..8].copy_from_slice(&self.payload_size.to_le_bytes());
        bytes[8..16].copy_from_slice(&self.seq.to_le_bytes());
        bytes[16..24].copy_from_slice(&self.stamp_ns.to_le_bytes());
        bytes[24..40].copy_from_slice(&self.payload_hash);
        bytes[40..42].copy_from_slice(&self.flags.to_le_bytes());
        bytes[42..44].copy_from_slice(&self.schema_version.to_le_bytes());
        bytes[44..48].copy_from_slice(&self.reserved.to_le_bytes());
        bytes
    }

    /// Deserialize a header from raw bytes.
    pub fn from_bytes(bytes: &[u8; FRAME_HEADER_SIZE]) -> Self {
        let mut payload_hash = [0u8; 16];
        payload_hash.copy_from_slice(&bytes[24..40]);

        FrameHeader {
            header_checksum: u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]),
            payload_size: u32::from_le_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]),
            seq: u64::from_le_bytes([
                bytes[8], bytes[9], bytes[10], bytes[11], bytes[12], bytes[13], bytes[14],
                bytes[15],
            ]),
            stamp_ns: u64::from_le_bytes([
                bytes[16], bytes[17], bytes[18], bytes[19], bytes[20], bytes[21], bytes[22],
                bytes[23],
            ]),
            payload_hash,
            flags: u16::from_le_bytes([bytes[40], bytes[41]]),
            schema_version: u16::from_le_bytes([bytes[42], bytes[43]]),
            reserved: u32::from_le_bytes([bytes[44], bytes[45], bytes[46], bytes[47]]),
        }
    }

    /// Check whether the header region is all zeros (end-of-log marker).
    pub fn is_zero(bytes: &[u8; FRAME_HEADER_SIZE]) -> bool {
        bytes.iter().all(|&b| b == 0)
    }
}

/// The journal file header, written at offset 0.
///
/// ```text
/// Offset  Size  Field
/// ------  ----  -----
/// 0       4     magic ("BJRN")
/// 4       4     version
/// 8       4     checksum (CRC32C of bytes [0..8] + [12..32])
/// 12      20    reserved (zeros)
/// ```
#[derive(Clone, Copy, Debug)]
pub struct FileHeader {
    pub magic: [u8; 4],
    pub version: u32,
    pub checksum: u32,
}

impl FileHeader {
    pub fn new() -> Self {
        let mut header = FileHeader {
            magic: JOURNAL_MAGIC,
            version: JOURNAL_VERSION,
            checksum: 0,
        };
        header.checksum = header.compute_checksum();
        header
    }

    pub fn compute_checksum(&self) -> u32 {
        let bytes = self.to_bytes();
        let acc = crc32c::crc32c(&bytes[0..8]);
        crc32c::crc32c_append(acc, &bytes[12..32])
    }

    pub fn is_valid(&self) -> bool {
        self.magic == JOURNAL_MAGIC
            && self.version == JOURNAL_VERSION
            && self.checksum == self.compute_checksum()
    }

    pub fn to_bytes(&self) -> [u8; FILE_HEADER_SIZE] {
        let mut bytes = [0u8; FILE_HEADER_SIZE];
        bytes[0..4].copy_from_slice(&self.magic);
        bytes[4..8].copy_from_slice(&self.version.to_le_bytes());
        bytes[8..12].copy_from_slice(&self.checksum.to_le_bytes());
        bytes
    }

    pub fn from_bytes(bytes: &[u8; FILE_HEADER_SIZE]) -> Self {
        let mut magic = [0u8; 4];
        magic.copy_from_slice(&bytes[0..4]);
        FileHeader {
            magic,
            version: u32::from_le_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]),
            checksum: u32::from_le_bytes([bytes[8], bytes[9], bytes[10], bytes[11]]),
        }
    }
}

impl Default for FileHeader {
    fn default() -> Self {
        Self::new()
    }
}

/// Compute the truncated BLAKE3 hash of a payload (first 16 bytes).
pub fn compute_payload_hash(payload: &[u8]) -> [u8; 16] {
    let hash = blake3::hash(payload);
    let mut truncated = [0u8; 16];
    truncated.copy_from_slice(&hash.as_bytes()[..16]);
    truncated
}

/// Padding needed to align the next frame to an 8-byte boundary.
pub fn calculate_padding(payload_size: u32) -> usize {
    (8 - (payload_size as usize % 8)) % 8
}

/// Total frame size: header + payload + padding.
pub fn frame_size(payload_size: u32) -> usize {
    FRAME_HEADER_SIZE + payload_size as usize + calculate_padding(payload_size)
}
