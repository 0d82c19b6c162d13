use crate::Error;

use bytes::{BufMut, BytesMut};

/// Big-endian cursor over a borrowed byte slice.
///
/// Every read is bounds-checked; a short read is a fatal decoding error
/// rather than a partial result, because an AMF packet that ends in the
/// middle of a value cannot be resynchronised.
pub struct Reader<'a> {
    bytes: &'a [u8],
    offset: usize,
}

impl<'a> Reader<'a> {
    pub fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, offset: 0 }
    }

    /// Number of bytes not yet consumed.
    #[inline]
    pub fn remaining(&self) -> usize {
        self.bytes.len() - self.offset
    }

    #[inline]
    pub fn read_u8(&mut self) -> Result<u8, Error> {
        let byte = *self.bytes.get(self.offset).ok_or(Error::OutOfBounds)?;
        self.offset += 1;
        Ok(byte)
    }

    #[inline]
    pub fn read_u16(&mut self) -> Result<u16, Error> {
        Ok(u16::from_be_bytes(self.read_exact(2)?.try_into()?))
    }

    #[inline]
    pub fn read_i16(&mut self) -> Result<i16, Error> {
        Ok(i16::from_be_bytes(self.read_exact(2)?.try_into()?))
    }

    #[inline]
    pub fn read_u32(&mut self) -> Result<u32, Error> {
        Ok(u32::from_be_bytes(self.read_exact(4)?.try_into()?))
    }

    #[inline]
    pub fn read_i32(&mut self) -> Result<i32, Error> {
        Ok(i32::from_be_bytes(self.read_exact(4)?.try_into()?))
    }

    #[inline]
    pub fn read_f64(&mut self) -> Result<f64, Error> {
        Ok(f64::from_be_bytes(self.read_exact(8)?.try_into()?))
    }

    /// Borrow the next `size` bytes without copying.
    pub fn read_exact(&mut self, size: usize) -> Result<&'a [u8], Error> {
        if self.remaining() < size {
            return Err(Error::OutOfBounds);
        }

        let range = &self.bytes[self.offset..self.offset + size];
        self.offset += size;
        Ok(range)
    }

    /// UTF-8 string with a u16 byte-length prefix.
    ///
    /// # Test
    ///
    /// ```
    /// use amf_gateway_codec::stream::Reader;
    ///
    /// let buffer = [0x00u8, 0x05, 0x70, 0x61, 0x6e, 0x64, 0x61];
    ///
    /// let mut reader = Reader::new(&buffer);
    /// assert_eq!(reader.read_utf().unwrap(), "panda");
    /// assert_eq!(reader.remaining(), 0);
    /// ```
    pub fn read_utf(&mut self) -> Result<&'a str, Error> {
        let size = self.read_u16()? as usize;
        Ok(std::str::from_utf8(self.read_exact(size)?)?)
    }

    /// UTF-8 string with a u32 byte-length prefix.
    pub fn read_long_utf(&mut self) -> Result<&'a str, Error> {
        let size = self.read_u32()? as usize;
        Ok(std::str::from_utf8(self.read_exact(size)?)?)
    }
}

/// Big-endian writer over a caller-owned `BytesMut`.
pub struct Writer<'a> {
    bytes: &'a mut BytesMut,
}

impl<'a> Writer<'a> {
    pub fn new(bytes: &'a mut BytesMut) -> Self {
        Self { bytes }
    }

    #[inline]
    pub fn put_u8(&mut self, value: u8) {
        self.bytes.put_u8(value);
    }

    #[inline]
    pub fn put_u16(&mut self, value: u16) {
        self.bytes.put_u16(value);
    }

    #[inline]
    pub fn put_i16(&mut self, value: i16) {
        self.bytes.put_i16(value);
    }

    #[inline]
    pub fn put_u32(&mut self, value: u32) {
        self.bytes.put_u32(value);
    }

    #[inline]
    pub fn put_i32(&mut self, value: i32) {
        self.bytes.put_i32(value);
    }

    #[inline]
    pub fn put_f64(&mut self, value: f64) {
        self.bytes.put_f64(value);
    }

    #[inline]
    pub fn put_slice(&mut self, value: &[u8]) {
        self.bytes.put(value);
    }

    /// UTF-8 string with a u16 byte-length prefix.
    ///
    /// Strings longer than 65535 bytes do not fit the prefix; AMF0 promotes
    /// those to the LongString marker, everything else treats them as an
    /// encoding error.
    pub fn put_utf(&mut self, value: &str) -> Result<(), Error> {
        if value.len() > u16::MAX as usize {
            return Err(Error::StringTooLong(value.len()));
        }

        self.bytes.put_u16(value.len() as u16);
        self.bytes.put(value.as_bytes());
        Ok(())
    }

    /// UTF-8 string with a u32 byte-length prefix.
    pub fn put_long_utf(&mut self, value: &str) {
        self.bytes.put_u32(value.len() as u32);
        self.bytes.put(value.as_bytes());
    }
}
