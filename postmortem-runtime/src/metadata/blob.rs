//! The `#Blob` heap and the ECMA-335 compressed number encodings.

use super::{MetadataError, MetadataErrorKind};

/// A stream representing the "blob heap".
///
/// Each blob starts with its compressed length followed by that many
/// bytes of data. See ECMA-335 II.24.2.4.
#[derive(Clone, Copy, Debug)]
pub struct BlobStream<'data> {
    buf: &'data [u8],
}

impl<'data> BlobStream<'data> {
    pub fn new(buf: &'data [u8]) -> Self {
        BlobStream { buf }
    }

    /// Reads the blob starting at the given heap offset.
    pub fn get_blob(&self, offset: u32) -> Result<&'data [u8], MetadataError> {
        let tail = self
            .buf
            .get(offset as usize..)
            .ok_or(MetadataErrorKind::InvalidBlobOffset)?;
        let (len, rest) = decode_unsigned(tail)?;
        rest.get(..len as usize)
            .ok_or_else(|| MetadataErrorKind::InvalidBlobData.into())
    }
}

/// Decodes a compressed unsigned number at the start of a byte slice,
/// returning the number and the remaining bytes.
///
/// The number of leading one bits in the first byte tags the width:
/// `0xxxxxxx` is a one-byte value, `10xxxxxx` the high bits of a
/// two-byte value, `110xxxxx` of a four-byte value. The payload is
/// big-endian. See ECMA-335 II.23.2.
pub fn decode_unsigned(data: &[u8]) -> Result<(u32, &[u8]), MetadataError> {
    let first = *data
        .first()
        .ok_or(MetadataErrorKind::InvalidCompressedNumber)?;

    let (width, tag): (usize, u8) = match first.leading_ones() {
        0 => (1, 0x00),
        1 => (2, 0x80),
        2 => (4, 0xC0),
        _ => return Err(MetadataErrorKind::InvalidCompressedNumber.into()),
    };

    let payload = data
        .get(..width)
        .ok_or(MetadataErrorKind::InvalidCompressedNumber)?;
    let mut value = (first ^ tag) as u32;
    for byte in &payload[1..] {
        value = (value << 8) | *byte as u32;
    }
    Ok((value, &data[width..]))
}

/// Encodes a compressed unsigned number, the inverse of
/// [`decode_unsigned`].
///
/// Returns `None` for values above `0x1FFF_FFFF`, which the encoding
/// cannot represent.
pub fn encode_unsigned(value: u32, out: &mut Vec<u8>) -> Option<()> {
    if value <= 0x7F {
        out.push(value as u8);
    } else if value <= 0x3FFF {
        out.extend_from_slice(&(value as u16 | 0x8000).to_be_bytes());
    } else if value <= 0x1FFF_FFFF {
        out.extend_from_slice(&(value | 0xC000_0000).to_be_bytes());
    } else {
        return None;
    }
    Some(())
}

/// Decodes a length-prefixed UTF-8 string ("SerString") from a custom
/// attribute blob.
///
/// A single `0xFF` byte denotes a null string, decoded as `None`.
pub fn decode_ser_string(data: &[u8]) -> Result<(Option<&str>, &[u8]), MetadataError> {
    match data.first() {
        Some(0xFF) => return Ok((None, &data[1..])),
        Some(_) => {}
        None => return Err(MetadataErrorKind::InvalidCompressedNumber.into()),
    }

    let (len, rest) = decode_unsigned(data)?;
    let bytes = rest
        .get(..len as usize)
        .ok_or(MetadataErrorKind::InvalidStringData)?;
    let text = std::str::from_utf8(bytes)
        .map_err(|e| MetadataError::new(MetadataErrorKind::InvalidStringData, e))?;
    Ok((Some(text), &rest[len as usize..]))
}

/// Encodes a SerString, the inverse of [`decode_ser_string`].
pub fn encode_ser_string(value: Option<&str>, out: &mut Vec<u8>) -> Option<()> {
    match value {
        None => {
            out.push(0xFF);
            Some(())
        }
        Some(text) => {
            encode_unsigned(text.len() as u32, out)?;
            out.extend_from_slice(text.as_bytes());
            Some(())
        }
    }
}

/// A stream representing the "string heap", which contains
/// null-terminated UTF-8 string data. See ECMA-335 II.24.2.3.
#[derive(Clone, Copy, Debug)]
pub struct StringStream<'data> {
    buf: &'data [u8],
}

impl<'data> StringStream<'data> {
    pub fn new(buf: &'data [u8]) -> Self {
        StringStream { buf }
    }

    /// Reads the string starting at the given heap offset.
    pub fn get_string(&self, offset: u32) -> Result<&'data str, MetadataError> {
        let tail = self
            .buf
            .get(offset as usize..)
            .ok_or(MetadataErrorKind::InvalidStringOffset)?;
        let bytes = tail.split(|c| *c == 0).next().unwrap_or(tail);
        std::str::from_utf8(bytes)
            .map_err(|e| MetadataError::new(MetadataErrorKind::InvalidStringData, e))
    }
}

/// A stream representing the "GUID heap". Indices are 1-based.
#[derive(Clone, Copy, Debug)]
pub struct GuidStream<'data> {
    buf: &'data [u8],
}

impl<'data> GuidStream<'data> {
    pub fn new(buf: &'data [u8]) -> Self {
        GuidStream { buf }
    }

    /// Reads the GUID with the given 1-based index.
    pub fn get_guid(&self, idx: u32) -> Option<uuid::Uuid> {
        let start = idx.checked_sub(1)? as usize * 16;
        let bytes: uuid::Bytes = self.buf.get(start..start + 16)?.try_into().ok()?;
        Some(uuid::Uuid::from_bytes_le(bytes))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_unsigned() {
        // one value per width tier plus the string-heap offsets the
        // attribute decoder actually produces
        let cases = [
            (&[0x00][..], 0x00),
            (&[0x2A], 0x2A),
            (&[0x81, 0x23], 0x0123),
            (&[0x95, 0xB1], 0x15B1),
            (&[0xC0, 0x12, 0x34, 0x56], 0x0012_3456),
            (&[0xC1, 0x00, 0x00, 0x00], 0x0100_0000),
        ];

        for (bytes, expected) in cases.iter() {
            let (value, rest) = decode_unsigned(bytes).unwrap();
            assert_eq!(value, *expected);
            assert!(rest.is_empty());
        }
    }

    #[test]
    fn test_decode_unsigned_rejects_bad_input() {
        // 111xxxxx is not a valid width tag
        assert!(decode_unsigned(&[0xE0]).is_err());
        assert!(decode_unsigned(&[]).is_err());
        // tag promises four bytes, only two present
        assert!(decode_unsigned(&[0xC1, 0x00]).is_err());
    }

    #[test]
    fn test_encode_decode_roundtrip() {
        for value in [0u32, 1, 0x7F, 0x80, 0x3FFF, 0x4000, 0x1FFF_FFFF] {
            let mut out = Vec::new();
            encode_unsigned(value, &mut out).unwrap();
            let (decoded, rest) = decode_unsigned(&out).unwrap();
            assert_eq!(decoded, value);
            assert!(rest.is_empty());
        }
        assert!(encode_unsigned(0x2000_0000, &mut Vec::new()).is_none());
    }

    #[test]
    fn test_ser_string_roundtrip() {
        let cases: &[Option<&str>] = &[
            Some(""),
            Some("hello"),
            Some("héllo wörld"),
            Some(&"x".repeat(65535)),
            None,
        ];

        for case in cases {
            let mut out = Vec::new();
            encode_ser_string(*case, &mut out).unwrap();
            let (decoded, rest) = decode_ser_string(&out).unwrap();
            assert_eq!(decoded, *case);
            assert!(rest.is_empty());
        }
    }

    #[test]
    fn test_blob_stream() {
        // blob heap: [empty blob] [3-byte blob]
        let heap = [0x00, 0x03, 0xAA, 0xBB, 0xCC];
        let stream = BlobStream::new(&heap);

        assert_eq!(stream.get_blob(0).unwrap(), &[] as &[u8]);
        assert_eq!(stream.get_blob(1).unwrap(), &[0xAA, 0xBB, 0xCC]);
        assert!(stream.get_blob(99).is_err());
    }

    #[test]
    fn test_string_stream() {
        let heap = b"\0first\0second\0";
        let stream = StringStream::new(heap);

        assert_eq!(stream.get_string(0).unwrap(), "");
        assert_eq!(stream.get_string(1).unwrap(), "first");
        assert_eq!(stream.get_string(7).unwrap(), "second");
    }
}
