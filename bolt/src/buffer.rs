use crate::errors::{BoltResult, ProtocolError};
use byteorder::{BigEndian, ByteOrder};

/// Growable byte buffer with a write cursor (`extent`) and a read cursor
/// (`cursor`), `cursor <= extent <= capacity`. All multi-byte primitives
/// are big-endian, matching the wire.
#[derive(Debug)]
pub struct Buffer {
    data: Vec<u8>,
    extent: usize,
    cursor: usize,
}

impl Buffer {
    #[inline]
    pub fn new(capacity: usize) -> Buffer {
        Buffer { data: vec![0; capacity], extent: 0, cursor: 0 }
    }

    /// Writable space remaining before the buffer has to grow.
    #[inline]
    pub fn loadable(&self) -> usize {
        self.data.len() - self.extent
    }

    /// Readable bytes between the cursors.
    #[inline]
    pub fn unloadable(&self) -> usize {
        self.extent - self.cursor
    }

    /// Move `[cursor..extent)` to the front once the consumed prefix
    /// outweighs the remaining data. Never grows capacity.
    pub fn compact(&mut self) {
        if self.cursor > 0 {
            let available = self.extent - self.cursor;
            if available < self.cursor {
                self.data.copy_within(self.cursor..self.extent, 0);
                self.cursor = 0;
                self.extent = available;
            }
        }
    }

    /// Reserve `size` bytes and return the reserved span, growing
    /// capacity when needed.
    pub fn load_pointer(&mut self, size: usize) -> &mut [u8] {
        if size > self.loadable() {
            let new_len = self.extent + size;
            self.data.resize(new_len, 0);
        }
        let extent = self.extent;
        self.extent += size;
        &mut self.data[extent..extent + size]
    }

    #[inline]
    pub fn load(&mut self, data: &[u8]) {
        self.load_pointer(data.len()).copy_from_slice(data);
    }

    #[inline]
    pub fn load_u8(&mut self, x: u8) {
        self.load_pointer(1)[0] = x;
    }

    #[inline]
    pub fn load_i8(&mut self, x: i8) {
        self.load_pointer(1)[0] = x as u8;
    }

    #[inline]
    pub fn load_u16(&mut self, x: u16) {
        BigEndian::write_u16(self.load_pointer(2), x);
    }

    #[inline]
    pub fn load_i16(&mut self, x: i16) {
        BigEndian::write_i16(self.load_pointer(2), x);
    }

    #[inline]
    pub fn load_i32(&mut self, x: i32) {
        BigEndian::write_i32(self.load_pointer(4), x);
    }

    #[inline]
    pub fn load_i64(&mut self, x: i64) {
        BigEndian::write_i64(self.load_pointer(8), x);
    }

    #[inline]
    pub fn load_f64(&mut self, x: f64) {
        BigEndian::write_f64(self.load_pointer(8), x);
    }

    /// Read `size` bytes, or `None` on underflow.
    pub fn unload_pointer(&mut self, size: usize) -> Option<&[u8]> {
        if size > self.unloadable() {
            return None;
        }
        let cursor = self.cursor;
        self.cursor += size;
        Some(&self.data[cursor..cursor + size])
    }

    #[inline]
    pub fn unload_u8(&mut self) -> BoltResult<u8> {
        let span = self.unload_pointer(1).ok_or(ProtocolError::Underflow)?;
        Ok(span[0])
    }

    #[inline]
    pub fn unload_i8(&mut self) -> BoltResult<i8> {
        Ok(self.unload_u8()? as i8)
    }

    #[inline]
    pub fn unload_u16(&mut self) -> BoltResult<u16> {
        let span = self.unload_pointer(2).ok_or(ProtocolError::Underflow)?;
        Ok(BigEndian::read_u16(span))
    }

    #[inline]
    pub fn unload_i16(&mut self) -> BoltResult<i16> {
        let span = self.unload_pointer(2).ok_or(ProtocolError::Underflow)?;
        Ok(BigEndian::read_i16(span))
    }

    #[inline]
    pub fn unload_i32(&mut self) -> BoltResult<i32> {
        let span = self.unload_pointer(4).ok_or(ProtocolError::Underflow)?;
        Ok(BigEndian::read_i32(span))
    }

    #[inline]
    pub fn unload_i64(&mut self) -> BoltResult<i64> {
        let span = self.unload_pointer(8).ok_or(ProtocolError::Underflow)?;
        Ok(BigEndian::read_i64(span))
    }

    #[inline]
    pub fn unload_f64(&mut self) -> BoltResult<f64> {
        let span = self.unload_pointer(8).ok_or(ProtocolError::Underflow)?;
        Ok(BigEndian::read_f64(span))
    }

    /// Restore the cursors to a previously captured state. Used to roll
    /// back a partially loaded message.
    #[inline]
    pub(crate) fn truncate_to(&mut self, cursor: usize, extent: usize) {
        self.cursor = cursor;
        self.extent = extent;
    }

    #[inline]
    pub(crate) fn cursors(&self) -> (usize, usize) {
        (self.cursor, self.extent)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::BoltError;

    #[test]
    fn test_load_unload_roundtrip() {
        let mut buffer = Buffer::new(16);
        buffer.load_u8(0xAB);
        buffer.load_u16(0xC0DE);
        buffer.load_i32(-1234567);
        buffer.load_i64(i64::min_value());
        buffer.load_f64(6.283185307179586);

        assert_eq!(buffer.unloadable(), 1 + 2 + 4 + 8 + 8);
        assert_eq!(buffer.unload_u8().unwrap(), 0xAB);
        assert_eq!(buffer.unload_u16().unwrap(), 0xC0DE);
        assert_eq!(buffer.unload_i32().unwrap(), -1234567);
        assert_eq!(buffer.unload_i64().unwrap(), i64::min_value());
        assert_eq!(buffer.unload_f64().unwrap(), 6.283185307179586);
        assert_eq!(buffer.unloadable(), 0);
    }

    #[test]
    fn test_big_endian_layout() {
        let mut buffer = Buffer::new(8);
        buffer.load_u16(0x0102);
        buffer.load_i32(0x03040506);
        assert_eq!(buffer.unload_pointer(6).unwrap(), &[0x01, 0x02, 0x03, 0x04, 0x05, 0x06]);
    }

    #[test]
    fn test_underflow() {
        let mut buffer = Buffer::new(4);
        buffer.load_u8(1);
        assert!(buffer.unload_pointer(2).is_none());
        assert_eq!(buffer.unload_u8().unwrap(), 1);
        assert_eq!(buffer.unload_u16().unwrap_err(), BoltError::Protocol(ProtocolError::Underflow));
    }

    #[test]
    fn test_grows_on_demand() {
        let mut buffer = Buffer::new(2);
        buffer.load(&[1, 2, 3, 4, 5]);
        assert_eq!(buffer.unloadable(), 5);
        assert_eq!(buffer.unload_pointer(5).unwrap(), &[1, 2, 3, 4, 5]);
    }

    #[test]
    fn test_compact() {
        let mut buffer = Buffer::new(8);
        buffer.load(&[1, 2, 3, 4, 5, 6]);
        buffer.unload_pointer(4).unwrap();

        // Two remaining bytes behind a four byte prefix: compaction moves
        // them to the front.
        buffer.compact();
        assert_eq!(buffer.cursors(), (0, 2));
        assert_eq!(buffer.unload_pointer(2).unwrap(), &[5, 6]);
    }

    #[test]
    fn test_compact_keeps_large_remainder() {
        let mut buffer = Buffer::new(8);
        buffer.load(&[1, 2, 3, 4, 5, 6]);
        buffer.unload_pointer(2).unwrap();

        // Remaining data outweighs the prefix; nothing moves.
        buffer.compact();
        assert_eq!(buffer.cursors(), (2, 6));
        assert_eq!(buffer.unload_pointer(4).unwrap(), &[3, 4, 5, 6]);
    }

    #[test]
    fn test_rollback() {
        let mut buffer = Buffer::new(8);
        buffer.load_u8(1);
        let (cursor, extent) = buffer.cursors();
        buffer.load(&[2, 3, 4]);
        buffer.truncate_to(cursor, extent);
        assert_eq!(buffer.unloadable(), 1);
    }
}
