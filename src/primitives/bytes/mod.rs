#![forbid(unsafe_code)]
//! Little-endian scalar codecs and the slice cursor used when parsing
//! engine buffers.

pub mod le {
    //! Fixed-width little-endian wire scalars.

    /// Appends a u16 in wire order.
    pub fn put_u16(dst: &mut Vec<u8>, v: u16) {
        dst.extend_from_slice(&v.to_le_bytes());
    }

    /// Appends a u32 in wire order.
    pub fn put_u32(dst: &mut Vec<u8>, v: u32) {
        dst.extend_from_slice(&v.to_le_bytes());
    }

    /// Appends a u64 in wire order.
    pub fn put_u64(dst: &mut Vec<u8>, v: u64) {
        dst.extend_from_slice(&v.to_le_bytes());
    }

    /// Appends an i64 in wire order.
    pub fn put_i64(dst: &mut Vec<u8>, v: i64) {
        dst.extend_from_slice(&v.to_le_bytes());
    }

    /// Appends an f64 in wire order.
    pub fn put_f64(dst: &mut Vec<u8>, v: f64) {
        dst.extend_from_slice(&v.to_le_bytes());
    }

    /// Reads a u16 from the start of `src`. Caller guarantees length.
    pub fn get_u16(src: &[u8]) -> u16 {
        let mut arr = [0u8; 2];
        arr.copy_from_slice(&src[..2]);
        u16::from_le_bytes(arr)
    }

    /// Reads a u32 from the start of `src`. Caller guarantees length.
    pub fn get_u32(src: &[u8]) -> u32 {
        let mut arr = [0u8; 4];
        arr.copy_from_slice(&src[..4]);
        u32::from_le_bytes(arr)
    }

    /// Reads a u64 from the start of `src`. Caller guarantees length.
    pub fn get_u64(src: &[u8]) -> u64 {
        let mut arr = [0u8; 8];
        arr.copy_from_slice(&src[..8]);
        u64::from_le_bytes(arr)
    }

    /// Reads an i64 from the start of `src`. Caller guarantees length.
    pub fn get_i64(src: &[u8]) -> i64 {
        let mut arr = [0u8; 8];
        arr.copy_from_slice(&src[..8]);
        i64::from_le_bytes(arr)
    }

    /// Reads an f64 from the start of `src`. Caller guarantees length.
    pub fn get_f64(src: &[u8]) -> f64 {
        let mut arr = [0u8; 8];
        arr.copy_from_slice(&src[..8]);
        f64::from_le_bytes(arr)
    }
}

pub mod buf {
    //! A slice-backed cursor with checked reads; engine buffers are
    //! untrusted input, so every read can fail with `Corruption`.

    use crate::error::{Result, UmbraError};

    /// Cursor over an immutable byte slice.
    #[derive(Debug)]
    pub struct Cursor<'a> {
        data: &'a [u8],
        off: usize,
    }

    impl<'a> Cursor<'a> {
        /// Creates a cursor at offset zero.
        pub fn new(data: &'a [u8]) -> Self {
            Self { data, off: 0 }
        }

        /// Takes `n` bytes, advancing the offset.
        pub fn take(&mut self, n: usize) -> Result<&'a [u8]> {
            let end = self
                .off
                .checked_add(n)
                .ok_or(UmbraError::Corruption("cursor offset overflow"))?;
            if end > self.data.len() {
                return Err(UmbraError::Corruption("unexpected end of buffer"));
            }
            let slice = &self.data[self.off..end];
            self.off = end;
            Ok(slice)
        }

        /// Reads one byte.
        pub fn u8(&mut self) -> Result<u8> {
            Ok(self.take(1)?[0])
        }

        /// Reads a little-endian u16.
        pub fn u16(&mut self) -> Result<u16> {
            Ok(super::le::get_u16(self.take(2)?))
        }

        /// Reads a little-endian u32.
        pub fn u32(&mut self) -> Result<u32> {
            Ok(super::le::get_u32(self.take(4)?))
        }

        /// Reads a little-endian u64.
        pub fn u64(&mut self) -> Result<u64> {
            Ok(super::le::get_u64(self.take(8)?))
        }

        /// Reads a little-endian i64.
        pub fn i64(&mut self) -> Result<i64> {
            Ok(super::le::get_i64(self.take(8)?))
        }

        /// Reads a little-endian f64.
        pub fn f64(&mut self) -> Result<f64> {
            Ok(super::le::get_f64(self.take(8)?))
        }

        /// Bytes left to read.
        pub fn remaining(&self) -> usize {
            self.data.len().saturating_sub(self.off)
        }

        /// Current offset from the start of the slice.
        pub fn position(&self) -> usize {
            self.off
        }

        /// Fails unless the cursor consumed the whole slice.
        pub fn ensure_consumed(&self) -> Result<()> {
            if self.off != self.data.len() {
                return Err(UmbraError::Corruption("unexpected trailing bytes"));
            }
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{buf::Cursor, le};
    use crate::error::UmbraError;

    #[test]
    fn scalar_roundtrip() {
        let mut buf = Vec::new();
        le::put_u16(&mut buf, 0xBEEF);
        le::put_u32(&mut buf, 0xDEAD_BEEF);
        le::put_u64(&mut buf, u64::MAX - 1);
        le::put_i64(&mut buf, i64::MIN);
        le::put_f64(&mut buf, -0.5);

        let mut cur = Cursor::new(&buf);
        assert_eq!(cur.u16().unwrap(), 0xBEEF);
        assert_eq!(cur.u32().unwrap(), 0xDEAD_BEEF);
        assert_eq!(cur.u64().unwrap(), u64::MAX - 1);
        assert_eq!(cur.i64().unwrap(), i64::MIN);
        assert_eq!(cur.f64().unwrap(), -0.5);
        cur.ensure_consumed().unwrap();
    }

    #[test]
    fn cursor_rejects_overread() {
        let mut cur = Cursor::new(&[1, 2, 3]);
        assert!(cur.take(2).is_ok());
        let err = cur.take(2).unwrap_err();
        assert!(matches!(err, UmbraError::Corruption(_)));
    }

    #[test]
    fn cursor_rejects_trailing_bytes() {
        let mut cur = Cursor::new(&[1, 2, 3]);
        cur.take(1).unwrap();
        assert!(matches!(
            cur.ensure_consumed(),
            Err(UmbraError::Corruption(_))
        ));
    }
}
