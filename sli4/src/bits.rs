//! Packed bit-range codec.
//!
//! Every SLI-4 layout (EQE, CQE, WQE, SGE, doorbell words) is a sequence of
//! little-endian 32-bit words with fields packed LSB-first inside each word.
//! Layouts are described as tables of [`BitRange`] constants and read or
//! written through [`Dwords`], so no layout depends on host bitfield order.

/// A field occupying `width` bits of word `word`, starting at bit `shift`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BitRange {
    pub word: usize,
    pub shift: u32,
    pub width: u32,
}

impl BitRange {
    pub const fn new(word: usize, shift: u32, width: u32) -> Self {
        assert!(width > 0 && shift + width <= 32);
        Self { word, shift, width }
    }

    /// A single-bit flag.
    pub const fn bit(word: usize, shift: u32) -> Self {
        Self::new(word, shift, 1)
    }

    /// Unshifted mask for the field width.
    #[inline]
    pub const fn mask(&self) -> u32 {
        if self.width == 32 {
            u32::MAX
        } else {
            (1u32 << self.width) - 1
        }
    }

    #[inline]
    pub fn extract(&self, word: u32) -> u32 {
        (word >> self.shift) & self.mask()
    }

    /// Replace the field inside `word`; `value` is truncated to the field width.
    #[inline]
    pub fn insert(&self, word: u32, value: u32) -> u32 {
        let mask = self.mask() << self.shift;
        (word & !mask) | ((value << self.shift) & mask)
    }
}

/// Fixed-size array of host-order words with little-endian serialization.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct Dwords<const N: usize>([u32; N]);

impl<const N: usize> Default for Dwords<N> {
    fn default() -> Self {
        Self([0; N])
    }
}

/// Debug-prints a word as zero-padded hex.
struct HexWord(u32);

impl std::fmt::Debug for HexWord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:#010x}", self.0)
    }
}

impl<const N: usize> std::fmt::Debug for Dwords<N> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list()
            .entries(self.0.iter().map(|&w| HexWord(w)))
            .finish()
    }
}

impl<const N: usize> Dwords<N> {
    /// Size of the layout in bytes.
    pub const BYTES: usize = N * 4;

    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_words(words: [u32; N]) -> Self {
        Self(words)
    }

    /// Decode from little-endian bytes. Missing trailing bytes read as zero.
    pub fn from_le_bytes(bytes: &[u8]) -> Self {
        let mut words = [0u32; N];
        for (w, chunk) in words.iter_mut().zip(bytes.chunks(4)) {
            let mut raw = [0u8; 4];
            raw[..chunk.len()].copy_from_slice(chunk);
            *w = u32::from_le_bytes(raw);
        }
        Self(words)
    }

    /// Encode into `out` as little-endian bytes; writes `min(out.len(), N * 4)` bytes.
    pub fn write_le_bytes(&self, out: &mut [u8]) {
        for (w, chunk) in self.0.iter().zip(out.chunks_mut(4)) {
            let raw = w.to_le_bytes();
            chunk.copy_from_slice(&raw[..chunk.len()]);
        }
    }

    pub fn to_le_vec(&self) -> Vec<u8> {
        let mut out = vec![0u8; Self::BYTES];
        self.write_le_bytes(&mut out);
        out
    }

    #[inline]
    pub fn words(&self) -> &[u32; N] {
        &self.0
    }

    #[inline]
    pub fn word(&self, idx: usize) -> u32 {
        self.0[idx]
    }

    #[inline]
    pub fn set_word(&mut self, idx: usize, value: u32) {
        self.0[idx] = value;
    }

    #[inline]
    pub fn get(&self, field: BitRange) -> u32 {
        field.extract(self.0[field.word])
    }

    #[inline]
    pub fn set(&mut self, field: BitRange, value: u32) {
        let w = &mut self.0[field.word];
        *w = field.insert(*w, value);
    }

    #[inline]
    pub fn flag(&self, field: BitRange) -> bool {
        self.get(field) != 0
    }

    #[inline]
    pub fn set_flag(&mut self, field: BitRange, on: bool) {
        self.set(field, on as u32);
    }

    /// Copy `bytes` into the layout starting at word `start_word`.
    pub fn put_bytes(&mut self, start_word: usize, bytes: &[u8]) {
        for (i, chunk) in bytes.chunks(4).enumerate() {
            let mut raw = [0u8; 4];
            raw[..chunk.len()].copy_from_slice(chunk);
            self.0[start_word + i] = u32::from_le_bytes(raw);
        }
    }

    pub fn clear(&mut self) {
        self.0 = [0; N];
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_extract() {
        let f = BitRange::new(0, 16, 8);
        let w = f.insert(0xffff_ffff, 0x5a);
        assert_eq!(w, 0xff5a_ffff);
        assert_eq!(f.extract(w), 0x5a);
    }

    #[test]
    fn test_insert_truncates_to_width() {
        let f = BitRange::new(0, 4, 3);
        assert_eq!(f.insert(0, 0xff), 0x70);
    }

    #[test]
    fn test_full_word_field() {
        let f = BitRange::new(1, 0, 32);
        let mut d = Dwords::<2>::new();
        d.set(f, 0xdead_beef);
        assert_eq!(d.get(f), 0xdead_beef);
        assert_eq!(d.word(0), 0);
    }

    #[test]
    fn test_golden_le_bytes() {
        // request_tag = 0x1234 at word 1 bits 0..16, flag at word 0 bit 31.
        let mut d = Dwords::<2>::new();
        d.set(BitRange::new(1, 0, 16), 0x1234);
        d.set_flag(BitRange::bit(0, 31), true);
        assert_eq!(d.to_le_vec(), vec![0x00, 0x00, 0x00, 0x80, 0x34, 0x12, 0x00, 0x00]);

        let back = Dwords::<2>::from_le_bytes(&[0x00, 0x00, 0x00, 0x80, 0x34, 0x12, 0x00, 0x00]);
        assert_eq!(back, d);
    }

    #[test]
    fn test_short_input_zero_fills() {
        let d = Dwords::<2>::from_le_bytes(&[0x01, 0x02, 0x03]);
        assert_eq!(d.word(0), 0x0003_0201);
        assert_eq!(d.word(1), 0);
    }

    #[test]
    fn test_put_bytes_partial_word() {
        let mut d = Dwords::<4>::new();
        d.put_bytes(1, &[1, 2, 3, 4, 5]);
        assert_eq!(d.word(1), 0x0403_0201);
        assert_eq!(d.word(2), 0x0000_0005);
    }

    #[test]
    fn test_debug_prints_hex_words() {
        let mut d = Dwords::<2>::new();
        d.set(BitRange::new(0, 0, 32), 0xab);
        assert_eq!(format!("{d:?}"), "[0x000000ab, 0x00000000]");
    }
}
