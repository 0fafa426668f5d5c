use scroll::Pread;

/// Signature for physical metadata as specified by ECMA-335, II.24.2.1.
pub const METADATA_SIGNATURE: u32 = 0x424A_5342;

/// First part of the metadata root, everything before the version
/// string.
#[derive(Clone, Copy, Debug, Pread)]
pub struct Header {
    /// The metadata signature, always [`METADATA_SIGNATURE`].
    pub signature: u32,
    /// Major version, ignored on read.
    pub major_version: u16,
    /// Minor version, ignored on read.
    pub minor_version: u16,
    /// Reserved, always 0.
    pub reserved: u32,
    /// Number of bytes allocated to hold the version string, rounded up
    /// to a multiple of 4 and including the null terminator.
    pub version_length: u32,
}

/// Byte size of [`Header`].
pub const HEADER_SIZE: usize = 16;

/// Second part of the metadata root, everything after the version
/// string.
#[derive(Clone, Copy, Debug, Pread)]
pub struct HeaderPart2 {
    /// Reserved, always 0.
    pub flags: u16,
    /// Number of streams.
    pub streams: u16,
}

/// Byte size of [`HeaderPart2`].
pub const HEADER_PART2_SIZE: usize = 4;

/// A stream header as specified in ECMA-335, II.24.2.2. The stream name
/// follows with variable length.
#[derive(Clone, Copy, Debug, Pread)]
pub struct StreamHeader {
    /// Offset of the stream from the start of the metadata root.
    pub offset: u32,
    /// Size of the stream in bytes, a multiple of 4.
    pub size: u32,
}

/// Byte size of [`StreamHeader`] without the name.
pub const STREAM_HEADER_SIZE: usize = 8;

/// Header of the `#~` table stream, ECMA-335 II.24.2.6.
#[derive(Clone, Copy, Debug, Pread)]
pub struct TableStreamHeader {
    /// Reserved, always 0.
    pub reserved: u32,
    /// Major version of the table schema.
    pub major_version: u8,
    /// Minor version of the table schema.
    pub minor_version: u8,
    /// Bit vector of heap index sizes (0x1 strings, 0x2 GUIDs, 0x4 blobs).
    pub heap_sizes: u8,
    /// Reserved, always 1.
    pub reserved2: u8,
    /// Bit vector of present tables.
    pub valid_tables: u64,
    /// Bit vector of sorted tables.
    pub sorted_tables: u64,
}

/// Byte size of [`TableStreamHeader`].
pub const TABLE_STREAM_HEADER_SIZE: usize = 24;
