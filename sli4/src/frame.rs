//! Fibre Channel frame header.
//!
//! On the wire the 24-byte header is six big-endian words. The adapter's
//! SEND_FRAME WQE wants the same six words as host integers stored
//! little-endian, so both encodings go through [`FcFrameHeader::words`].

use crate::bits::{BitRange, Dwords};

pub const FC_HEADER_LEN: usize = 24;

mod hdr {
    use crate::bits::BitRange;

    pub const D_ID: BitRange = BitRange::new(0, 0, 24);
    pub const R_CTL: BitRange = BitRange::new(0, 24, 8);
    pub const S_ID: BitRange = BitRange::new(1, 0, 24);
    pub const CS_CTL: BitRange = BitRange::new(1, 24, 8);
    pub const F_CTL: BitRange = BitRange::new(2, 0, 24);
    pub const TYPE: BitRange = BitRange::new(2, 24, 8);
    pub const SEQ_CNT: BitRange = BitRange::new(3, 0, 16);
    pub const DF_CTL: BitRange = BitRange::new(3, 16, 8);
    pub const SEQ_ID: BitRange = BitRange::new(3, 24, 8);
    pub const RX_ID: BitRange = BitRange::new(4, 0, 16);
    pub const OX_ID: BitRange = BitRange::new(4, 16, 16);
    pub const PARAMETER: BitRange = BitRange::new(5, 0, 32);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FcFrameHeader {
    pub r_ctl: u8,
    pub d_id: u32,
    pub cs_ctl: u8,
    pub s_id: u32,
    pub fc_type: u8,
    pub f_ctl: u32,
    pub seq_id: u8,
    pub df_ctl: u8,
    pub seq_cnt: u16,
    pub ox_id: u16,
    pub rx_id: u16,
    pub parameter: u32,
}

impl FcFrameHeader {
    fn field_table() -> [(BitRange, fn(&Self) -> u32); 12] {
        [
            (hdr::D_ID, |h| h.d_id),
            (hdr::R_CTL, |h| h.r_ctl as u32),
            (hdr::S_ID, |h| h.s_id),
            (hdr::CS_CTL, |h| h.cs_ctl as u32),
            (hdr::F_CTL, |h| h.f_ctl),
            (hdr::TYPE, |h| h.fc_type as u32),
            (hdr::SEQ_CNT, |h| h.seq_cnt as u32),
            (hdr::DF_CTL, |h| h.df_ctl as u32),
            (hdr::SEQ_ID, |h| h.seq_id as u32),
            (hdr::RX_ID, |h| h.rx_id as u32),
            (hdr::OX_ID, |h| h.ox_id as u32),
            (hdr::PARAMETER, |h| h.parameter),
        ]
    }

    /// The six header words as host integers.
    pub fn words(&self) -> [u32; 6] {
        let mut d = Dwords::<6>::new();
        for (range, get) in Self::field_table() {
            d.set(range, get(self));
        }
        *d.words()
    }

    pub fn from_words(words: [u32; 6]) -> Self {
        let d = Dwords::from_words(words);
        Self {
            r_ctl: d.get(hdr::R_CTL) as u8,
            d_id: d.get(hdr::D_ID),
            cs_ctl: d.get(hdr::CS_CTL) as u8,
            s_id: d.get(hdr::S_ID),
            fc_type: d.get(hdr::TYPE) as u8,
            f_ctl: d.get(hdr::F_CTL),
            seq_id: d.get(hdr::SEQ_ID) as u8,
            df_ctl: d.get(hdr::DF_CTL) as u8,
            seq_cnt: d.get(hdr::SEQ_CNT) as u16,
            ox_id: d.get(hdr::OX_ID) as u16,
            rx_id: d.get(hdr::RX_ID) as u16,
            parameter: d.get(hdr::PARAMETER),
        }
    }

    /// Parse a header as received from the wire.
    pub fn from_be_bytes(bytes: &[u8]) -> Self {
        let mut words = [0u32; 6];
        for (w, chunk) in words.iter_mut().zip(bytes.chunks_exact(4)) {
            *w = u32::from_be_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
        }
        Self::from_words(words)
    }

    pub fn to_be_bytes(&self) -> [u8; FC_HEADER_LEN] {
        let mut out = [0u8; FC_HEADER_LEN];
        for (chunk, w) in out.chunks_exact_mut(4).zip(self.words()) {
            chunk.copy_from_slice(&w.to_be_bytes());
        }
        out
    }

    /// Header words stored little-endian, the layout SEND_FRAME expects.
    pub fn write_le_words(&self, out: &mut [u8; FC_HEADER_LEN]) {
        for (chunk, w) in out.chunks_exact_mut(4).zip(self.words()) {
            chunk.copy_from_slice(&w.to_le_bytes());
        }
    }

    pub fn from_le_words(bytes: &[u8]) -> Self {
        Self::from_words(*Dwords::<6>::from_le_bytes(bytes).words())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> FcFrameHeader {
        FcFrameHeader {
            r_ctl: 0x06,
            d_id: 0x0a0b0c,
            cs_ctl: 0,
            s_id: 0x010203,
            fc_type: 0x28,
            f_ctl: 0x29_0000,
            seq_id: 0x11,
            df_ctl: 0,
            seq_cnt: 0x0002,
            ox_id: 0xbeef,
            rx_id: 0xffff,
            parameter: 0,
        }
    }

    #[test]
    fn test_wire_bytes_golden() {
        let bytes = sample().to_be_bytes();
        assert_eq!(
            bytes,
            [
                0x06, 0x0a, 0x0b, 0x0c, 0x00, 0x01, 0x02, 0x03, 0x28, 0x29, 0x00, 0x00, 0x11,
                0x00, 0x00, 0x02, 0xbe, 0xef, 0xff, 0xff, 0x00, 0x00, 0x00, 0x00
            ]
        );
        assert_eq!(FcFrameHeader::from_be_bytes(&bytes), sample());
    }

    #[test]
    fn test_le_words_layout() {
        let mut out = [0u8; FC_HEADER_LEN];
        sample().write_le_words(&mut out);
        // word 0 = r_ctl << 24 | d_id, stored little-endian
        assert_eq!(&out[..4], &[0x0c, 0x0b, 0x0a, 0x06]);
        assert_eq!(FcFrameHeader::from_le_words(&out), sample());
    }
}
