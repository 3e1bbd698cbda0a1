//! Offset-based encoding primitives.
//!
//! Every field on the wire is little-endian and packed. Fixed-size scalars are
//! copied as raw bytes; strings carry a `u16` length prefix. Reads are bounds
//! checked and fail with [`WireError::TruncatedFrame`] instead of running past
//! the buffer, since lengths come straight from the peer.

use crate::WireError;
use bytes::{BufMut, BytesMut};

/// A value with a fixed wire representation
pub trait WireFormat: Sized {
    /// Append the encoded value to `buf`
    fn encode(&self, buf: &mut BytesMut) -> Result<(), WireError>;

    /// Decode a value at the reader's current offset
    fn decode(reader: &mut Reader<'_>) -> Result<Self, WireError>;
}

/// Write `value` at `offset`, replacing anything already stored past it.
///
/// Returns the offset just after the encoded value.
pub fn serialize<T: WireFormat>(
    value: &T,
    buf: &mut BytesMut,
    offset: usize,
) -> Result<usize, WireError> {
    if offset <= buf.len() {
        buf.truncate(offset);
    } else {
        buf.resize(offset, 0);
    }
    value.encode(buf)?;
    Ok(buf.len())
}

/// Read a value starting at `offset`.
///
/// Returns the value and the offset just after it.
pub fn deserialize<T: WireFormat>(buf: &[u8], offset: usize) -> Result<(T, usize), WireError> {
    let mut reader = Reader::at(buf, offset)?;
    let value = T::decode(&mut reader)?;
    Ok((value, reader.offset()))
}

/// Bounds-checked cursor over a received buffer
#[derive(Debug, Clone)]
pub struct Reader<'a> {
    buf: &'a [u8],
    offset: usize,
}

impl<'a> Reader<'a> {
    /// Start reading at the beginning of `buf`
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, offset: 0 }
    }

    /// Start reading at `offset`
    pub fn at(buf: &'a [u8], offset: usize) -> Result<Self, WireError> {
        if offset > buf.len() {
            return Err(WireError::TruncatedFrame {
                offset,
                needed: 0,
                available: 0,
            });
        }
        Ok(Self { buf, offset })
    }

    /// Current read position
    pub fn offset(&self) -> usize {
        self.offset
    }

    /// Bytes left to read
    pub fn remaining(&self) -> usize {
        self.buf.len() - self.offset
    }

    /// Whether everything has been consumed
    pub fn is_empty(&self) -> bool {
        self.remaining() == 0
    }

    /// Take the next `n` raw bytes
    pub fn take(&mut self, n: usize) -> Result<&'a [u8], WireError> {
        if self.remaining() < n {
            return Err(WireError::TruncatedFrame {
                offset: self.offset,
                needed: n,
                available: self.remaining(),
            });
        }
        let slice = &self.buf[self.offset..self.offset + n];
        self.offset += n;
        Ok(slice)
    }

    /// Take everything that is left
    pub fn rest(&mut self) -> &'a [u8] {
        let slice = &self.buf[self.offset..];
        self.offset = self.buf.len();
        slice
    }

    /// Read a `u8`
    pub fn u8(&mut self) -> Result<u8, WireError> {
        Ok(self.take(1)?[0])
    }

    /// Read a little-endian `u16`
    pub fn u16(&mut self) -> Result<u16, WireError> {
        let b = self.take(2)?;
        Ok(u16::from_le_bytes([b[0], b[1]]))
    }

    /// Read a little-endian `i16`
    pub fn i16(&mut self) -> Result<i16, WireError> {
        let b = self.take(2)?;
        Ok(i16::from_le_bytes([b[0], b[1]]))
    }

    /// Read a little-endian `u32`
    pub fn u32(&mut self) -> Result<u32, WireError> {
        let b = self.take(4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    /// Read a one-byte boolean; any non-zero value is `true`
    pub fn bool(&mut self) -> Result<bool, WireError> {
        Ok(self.u8()? != 0)
    }

    /// Read a `u16` length-prefixed UTF-8 string
    pub fn string(&mut self) -> Result<String, WireError> {
        let len = self.u16()? as usize;
        let start = self.offset;
        let bytes = self.take(len)?;
        String::from_utf8(bytes.to_vec())
            .map_err(|_| WireError::malformed(format!("invalid utf-8 in string at offset {start}")))
    }

    /// Fail unless the whole buffer was consumed
    pub fn finish(&self) -> Result<(), WireError> {
        if self.is_empty() {
            Ok(())
        } else {
            Err(WireError::malformed(format!(
                "{} trailing bytes after payload",
                self.remaining()
            )))
        }
    }
}

/// Append a `u16` length-prefixed string
pub fn put_string(buf: &mut BytesMut, value: &str) -> Result<(), WireError> {
    let len = u16::try_from(value.len()).map_err(|_| WireError::Size(value.len()))?;
    buf.put_u16_le(len);
    buf.put_slice(value.as_bytes());
    Ok(())
}

macro_rules! scalar_wire_format {
    ($ty:ty, $put:ident, $get:ident) => {
        impl WireFormat for $ty {
            fn encode(&self, buf: &mut BytesMut) -> Result<(), WireError> {
                buf.$put(*self);
                Ok(())
            }

            fn decode(reader: &mut Reader<'_>) -> Result<Self, WireError> {
                reader.$get()
            }
        }
    };
}

scalar_wire_format!(u8, put_u8, u8);
scalar_wire_format!(u16, put_u16_le, u16);
scalar_wire_format!(i16, put_i16_le, i16);
scalar_wire_format!(u32, put_u32_le, u32);

impl WireFormat for bool {
    fn encode(&self, buf: &mut BytesMut) -> Result<(), WireError> {
        buf.put_u8(u8::from(*self));
        Ok(())
    }

    fn decode(reader: &mut Reader<'_>) -> Result<Self, WireError> {
        reader.bool()
    }
}

impl WireFormat for String {
    fn encode(&self, buf: &mut BytesMut) -> Result<(), WireError> {
        put_string(buf, self)
    }

    fn decode(reader: &mut Reader<'_>) -> Result<Self, WireError> {
        reader.string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scalars_are_little_endian() {
        let mut buf = BytesMut::new();
        let offset = serialize(&0x1234u16, &mut buf, 0).unwrap();
        let offset = serialize(&0xA1B2C3D4u32, &mut buf, offset).unwrap();
        assert_eq!(offset, 6);
        assert_eq!(&buf[..], &[0x34, 0x12, 0xD4, 0xC3, 0xB2, 0xA1]);

        let (a, offset) = deserialize::<u16>(&buf, 0).unwrap();
        let (b, offset) = deserialize::<u32>(&buf, offset).unwrap();
        assert_eq!((a, b, offset), (0x1234, 0xA1B2C3D4, 6));
    }

    #[test]
    fn test_serialize_at_offset_overwrites_tail() {
        let mut buf = BytesMut::from(&[9u8, 9, 9, 9][..]);
        let end = serialize(&7u8, &mut buf, 1).unwrap();
        assert_eq!(end, 2);
        assert_eq!(&buf[..], &[9, 7]);

        let end = serialize(&1u8, &mut buf, 4).unwrap();
        assert_eq!(end, 5);
        assert_eq!(&buf[..], &[9, 7, 0, 0, 1]);
    }

    #[test]
    fn test_string_roundtrip() {
        let mut buf = BytesMut::new();
        let end = serialize(&"héllo".to_string(), &mut buf, 0).unwrap();
        assert_eq!(end, 2 + "héllo".len());
        let (s, _) = deserialize::<String>(&buf, 0).unwrap();
        assert_eq!(s, "héllo");
    }

    #[test]
    fn test_truncated_string_is_rejected() {
        // Declares 10 bytes, carries 3
        let buf = [10u8, 0, b'a', b'b', b'c'];
        let err = deserialize::<String>(&buf, 0).unwrap_err();
        assert_eq!(
            err,
            WireError::TruncatedFrame {
                offset: 2,
                needed: 10,
                available: 3
            }
        );
    }

    #[test]
    fn test_read_past_end() {
        let mut reader = Reader::new(&[1, 2, 3]);
        assert!(reader.u16().is_ok());
        assert!(matches!(
            reader.u32(),
            Err(WireError::TruncatedFrame { needed: 4, available: 1, .. })
        ));
        assert!(Reader::at(&[1], 2).is_err());
    }

    #[test]
    fn test_finish_reports_trailing_bytes() {
        let mut reader = Reader::new(&[1, 2]);
        reader.u8().unwrap();
        assert!(matches!(reader.finish(), Err(WireError::MalformedFrame(_))));
        reader.u8().unwrap();
        assert!(reader.finish().is_ok());
    }

    #[test]
    fn test_oversized_string_rejected() {
        let long = "x".repeat(u16::MAX as usize + 1);
        let mut buf = BytesMut::new();
        assert_eq!(put_string(&mut buf, &long), Err(WireError::Size(long.len())));
    }
}
