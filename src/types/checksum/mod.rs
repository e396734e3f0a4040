#![forbid(unsafe_code)]
//! CRC32 checksums for separate-property payloads.

/// Incremental checksum over byte slices.
pub trait Checksum {
    /// Clears accumulated state.
    fn reset(&mut self);
    /// Feeds bytes into the checksum.
    fn update(&mut self, bytes: &[u8]);
    /// Returns the current digest without consuming the hasher.
    fn finalize(&self) -> u32;
}

/// crc32fast-backed implementation.
pub struct Crc32Fast {
    inner: crc32fast::Hasher,
}

impl Default for Crc32Fast {
    fn default() -> Self {
        Self {
            inner: crc32fast::Hasher::new(),
        }
    }
}

impl Checksum for Crc32Fast {
    fn reset(&mut self) {
        self.inner.reset();
    }

    fn update(&mut self, bytes: &[u8]) {
        self.inner.update(bytes);
    }

    fn finalize(&self) -> u32 {
        self.inner.clone().finalize()
    }
}

/// CRC32 over a separate-property payload, salted with the property's wire
/// identity so a payload cannot verify against the wrong slot.
pub fn payload_crc32(type_tag: u8, prop: u8, payload: &[u8]) -> u32 {
    let mut hasher = crc32fast::Hasher::new();
    hasher.update(&[type_tag, prop]);
    hasher.update(payload);
    hasher.finalize()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn checksum_trait_roundtrip() {
        let mut c = Crc32Fast::default();
        c.update(b"hello");
        let first = c.finalize();
        c.update(b" world");
        let second = c.finalize();
        assert_ne!(first, second);
        c.reset();
        c.update(b"hello world");
        assert_eq!(c.finalize(), second);
    }

    #[test]
    fn payload_crc32_changes_with_identity() {
        let payload = vec![0u8; 16];
        let crc_a = payload_crc32(13, 2, &payload);
        assert_eq!(crc_a, payload_crc32(13, 2, &payload));

        let mut different = payload.clone();
        different[0] = 1;
        assert_ne!(crc_a, payload_crc32(13, 2, &different));
        assert_ne!(crc_a, payload_crc32(14, 2, &payload));
        assert_ne!(crc_a, payload_crc32(13, 3, &payload));
    }
}
