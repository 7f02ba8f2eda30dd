//! Byte-level encoding for outbound state packets
//!
//! Integers use LEB128 varuints so small ids and tick numbers cost one
//! byte. An entity reference on the wire is `varuint(id + 1)` followed by
//! `varuint(hash)`; the +1 keeps slot 0 distinguishable from terminators.

/// Leading byte identifying a state update packet
pub const UPDATE_MESSAGE: u8 = 0x00;

/// Append-only packet builder over a reusable byte buffer
#[derive(Debug, Default)]
pub struct Writer {
    buf: Vec<u8>,
}

impl Writer {
    pub fn new() -> Self {
        Self { buf: Vec::new() }
    }

    #[inline]
    pub fn u8(&mut self, value: u8) -> &mut Self {
        self.buf.push(value);
        self
    }

    /// LEB128 unsigned varint: 7 payload bits per byte, low bits first,
    /// high bit set on every byte but the last
    pub fn vu(&mut self, mut value: u64) -> &mut Self {
        loop {
            let byte = (value & 0x7f) as u8;
            value >>= 7;
            if value == 0 {
                self.buf.push(byte);
                return self;
            }
            self.buf.push(byte | 0x80);
        }
    }

    /// Wire entity reference: `vu(id + 1)`, `vu(hash)`
    pub fn entid(&mut self, id: u16, hash: u32) -> &mut Self {
        self.vu(u64::from(id) + 1);
        self.vu(u64::from(hash))
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.buf
    }

    pub fn finish(self) -> Vec<u8> {
        self.buf
    }
}

/// Decoding counterpart, used by tests and tooling to walk packets
#[derive(Debug)]
pub struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    pub fn u8(&mut self) -> Option<u8> {
        let byte = *self.buf.get(self.pos)?;
        self.pos += 1;
        Some(byte)
    }

    /// Returns None on truncation or a varint running past 64 bits
    pub fn vu(&mut self) -> Option<u64> {
        let mut value: u64 = 0;
        let mut shift = 0u32;
        loop {
            let byte = self.u8()?;
            if shift >= 64 {
                return None;
            }
            value |= u64::from(byte & 0x7f) << shift;
            if byte & 0x80 == 0 {
                return Some(value);
            }
            shift += 7;
        }
    }

    /// Decodes a wire entity reference back to `(id, hash)`
    pub fn entid(&mut self) -> Option<(u16, u32)> {
        let raw = self.vu()?;
        let id = u16::try_from(raw.checked_sub(1)?).ok()?;
        let hash = u32::try_from(self.vu()?).ok()?;
        Some((id, hash))
    }

    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }
}
