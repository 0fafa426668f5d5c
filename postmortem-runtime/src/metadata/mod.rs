//! Parsing of ECMA-335 compressed metadata images.

mod attributes;
mod blob;
mod raw;
mod tables;

use std::fmt;

use scroll::Pread;
use thiserror::Error;

use postmortem_report::AssemblyAttribute;

use blob::{BlobStream, GuidStream, StringStream};
use tables::{MetadataStream, TableType};

/// The kind of a [`MetadataError`].
#[derive(Debug, Clone, Copy, Error)]
#[non_exhaustive]
pub enum MetadataErrorKind {
    /// The metadata root header is malformed.
    #[error("invalid header")]
    InvalidHeader,
    /// The signature is not `BSJB`.
    #[error("invalid signature")]
    InvalidSignature,
    /// A length field points outside the buffer.
    #[error("invalid length")]
    InvalidLength,
    /// The version string is not valid UTF-8.
    #[error("invalid version string")]
    InvalidVersionString,
    /// A stream header is malformed.
    #[error("invalid stream header")]
    InvalidStreamHeader,
    /// A stream name is malformed.
    #[error("invalid stream name")]
    InvalidStreamName,
    /// The image contains a stream with an unknown name.
    #[error("unknown stream")]
    UnknownStream,
    /// A string heap offset is out of bounds.
    #[error("invalid string offset")]
    InvalidStringOffset,
    /// String data is not valid UTF-8.
    #[error("invalid string data")]
    InvalidStringData,
    /// A blob heap offset is out of bounds.
    #[error("invalid blob offset")]
    InvalidBlobOffset,
    /// A blob's length exceeds the heap.
    #[error("invalid blob data")]
    InvalidBlobData,
    /// A compressed number is malformed.
    #[error("invalid compressed number")]
    InvalidCompressedNumber,
    /// The table stream is shorter than its row counts require.
    #[error("insufficient table data")]
    InsufficientTableData,
    /// A row index is out of bounds for its table.
    #[error("row index out of bounds")]
    RowIndexOutOfBounds,
    /// A column index is out of bounds for its table.
    #[error("column index out of bounds")]
    ColIndexOutOfBounds,
    /// A custom attribute blob is malformed.
    #[error("invalid custom attribute blob")]
    InvalidAttributeBlob,
    /// The image has no `#~` stream.
    #[error("image does not contain a #~ stream")]
    NoTableStream,
    /// The image has no `#Strings` stream.
    #[error("image does not contain a #Strings stream")]
    NoStringsStream,
    /// The image has no `#Blob` stream.
    #[error("image does not contain a #Blob stream")]
    NoBlobStream,
}

/// An error encountered while parsing a metadata image.
#[derive(Debug, Error)]
#[error("{kind}")]
pub struct MetadataError {
    pub(crate) kind: MetadataErrorKind,
    #[source]
    pub(crate) source: Option<Box<dyn std::error::Error + Send + Sync + 'static>>,
}

impl MetadataError {
    /// Creates a new metadata error from a known kind of error as well
    /// as an arbitrary error payload.
    pub(crate) fn new<E>(kind: MetadataErrorKind, source: E) -> Self
    where
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        let source = Some(source.into());
        Self { kind, source }
    }

    /// Returns the corresponding [`MetadataErrorKind`] for this error.
    pub fn kind(&self) -> MetadataErrorKind {
        self.kind
    }
}

impl From<MetadataErrorKind> for MetadataError {
    fn from(kind: MetadataErrorKind) -> Self {
        Self { kind, source: None }
    }
}

/// A parsed ECMA-335 metadata image.
#[derive(Clone)]
pub struct MetadataImage<'data> {
    version: &'data str,
    table_stream: Option<MetadataStream<'data>>,
    string_stream: Option<StringStream<'data>>,
    blob_stream: Option<BlobStream<'data>>,
    guid_stream: Option<GuidStream<'data>>,
}

impl fmt::Debug for MetadataImage<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MetadataImage")
            .field("version", &self.version)
            .field("has_table_stream", &self.table_stream.is_some())
            .field("has_string_stream", &self.string_stream.is_some())
            .field("has_blob_stream", &self.blob_stream.is_some())
            .field("has_guid_stream", &self.guid_stream.is_some())
            .finish()
    }
}

impl<'data> MetadataImage<'data> {
    /// Parses the provided buffer into a metadata image.
    pub fn parse(buf: &'data [u8]) -> Result<Self, MetadataError> {
        let header: raw::Header = buf
            .pread_with(0, scroll::LE)
            .map_err(|e: scroll::Error| MetadataError::new(MetadataErrorKind::InvalidHeader, e))?;

        if header.signature != raw::METADATA_SIGNATURE {
            return Err(MetadataErrorKind::InvalidSignature.into());
        }

        let version_length = header.version_length as usize;
        let version_buf = buf
            .get(raw::HEADER_SIZE..raw::HEADER_SIZE + version_length)
            .ok_or(MetadataErrorKind::InvalidLength)?;
        let version_buf = version_buf
            .split(|c| *c == 0)
            .next()
            .ok_or(MetadataErrorKind::InvalidVersionString)?;
        let version = std::str::from_utf8(version_buf)
            .map_err(|e| MetadataError::new(MetadataErrorKind::InvalidVersionString, e))?;

        let mut offset = raw::HEADER_SIZE + version_length;
        let header2: raw::HeaderPart2 = buf
            .pread_with(offset, scroll::LE)
            .map_err(|e: scroll::Error| MetadataError::new(MetadataErrorKind::InvalidHeader, e))?;
        offset += raw::HEADER_PART2_SIZE;

        let mut result = MetadataImage {
            version,
            table_stream: None,
            string_stream: None,
            blob_stream: None,
            guid_stream: None,
        };

        for _ in 0..header2.streams {
            let stream_header: raw::StreamHeader =
                buf.pread_with(offset, scroll::LE).map_err(|e: scroll::Error| {
                    MetadataError::new(MetadataErrorKind::InvalidStreamHeader, e)
                })?;
            offset += raw::STREAM_HEADER_SIZE;

            let name_buf = buf
                .get(offset..)
                .ok_or(MetadataErrorKind::InvalidStreamName)?;
            let name_buf = name_buf.get(..32.min(name_buf.len())).unwrap_or(name_buf);
            let name_bytes = name_buf
                .split(|c| *c == 0)
                .next()
                .ok_or(MetadataErrorKind::InvalidStreamName)?;
            let name = std::str::from_utf8(name_bytes)
                .map_err(|e| MetadataError::new(MetadataErrorKind::InvalidStreamName, e))?;

            // the name is null-terminated and padded to 4 bytes
            let mut name_len = name.len() + 1;
            name_len = match name_len % 4 {
                0 => name_len,
                r => name_len + (4 - r),
            };
            offset += name_len;

            let start = stream_header.offset as usize;
            let size = stream_header.size as usize;
            let stream_buf = buf
                .get(start..start + size)
                .ok_or(MetadataErrorKind::InvalidLength)?;

            match name {
                "#~" => result.table_stream = Some(MetadataStream::parse(stream_buf)?),
                "#Strings" => result.string_stream = Some(StringStream::new(stream_buf)),
                "#US" => {}
                "#Blob" => result.blob_stream = Some(BlobStream::new(stream_buf)),
                "#GUID" => result.guid_stream = Some(GuidStream::new(stream_buf)),
                _ => return Err(MetadataErrorKind::UnknownStream.into()),
            }
        }

        Ok(result)
    }

    /// The runtime version string from the metadata root, e.g.
    /// `v4.0.30319`.
    pub fn version(&self) -> &'data str {
        self.version
    }

    fn tables(&self) -> Result<&MetadataStream<'data>, MetadataError> {
        self.table_stream
            .as_ref()
            .ok_or_else(|| MetadataErrorKind::NoTableStream.into())
    }

    fn get_string(&self, offset: u32) -> Result<&'data str, MetadataError> {
        self.string_stream
            .as_ref()
            .ok_or(MetadataErrorKind::NoStringsStream)?
            .get_string(offset)
    }

    fn get_blob(&self, offset: u32) -> Result<&'data [u8], MetadataError> {
        self.blob_stream
            .as_ref()
            .ok_or(MetadataErrorKind::NoBlobStream)?
            .get_blob(offset)
    }

    /// The module version id (MVID) from the Module table.
    pub fn module_mvid(&self) -> Option<uuid::Uuid> {
        let tables = self.tables().ok()?;
        let index = tables.get_cell_u32(TableType::Module, 1, 3).ok()?;
        self.guid_stream.as_ref()?.get_guid(index)
    }

    /// The assembly version as `major.minor.build.revision`, when the
    /// image has an Assembly table.
    pub fn assembly_version(&self) -> Option<String> {
        let tables = self.tables().ok()?;
        let row = tables[TableType::Assembly].row_bytes(1)?;
        // the version occupies eight bytes after the hash algorithm id,
        // as four little-endian u16 fields
        let mut parts = [0u16; 4];
        for (i, part) in parts.iter_mut().enumerate() {
            let bytes = row.get(4 + i * 2..6 + i * 2)?;
            *part = u16::from_le_bytes(bytes.try_into().ok()?);
        }
        Some(format!(
            "{}.{}.{}.{}",
            parts[0], parts[1], parts[2], parts[3]
        ))
    }

    /// The simple assembly name from the Assembly table.
    pub fn assembly_name(&self) -> Option<&'data str> {
        let tables = self.tables().ok()?;
        let offset = tables.get_cell_u32(TableType::Assembly, 1, 5).ok()?;
        self.get_string(offset).ok()
    }

    /// Decodes all assembly-level custom attributes.
    ///
    /// Attributes whose blobs cannot be decoded are reported with the
    /// `<binary>` placeholder value rather than dropped.
    pub fn assembly_attributes(&self) -> Vec<AssemblyAttribute> {
        attributes::decode_assembly_attributes(self)
    }
}
