//! A parser for the "frontline" capture format in which CSR debug firmware
//! delivers sniffed baseband packets to the host.
//!
//! Capture-enabled firmware streams baseband fragments to the host inside
//! ordinary HCI ACL frames. Each fragment starts with a small fixed header
//! (two known length variants, one per chip generation) carrying the piconet
//! clock, the baseband packet type and member address, and the payload
//! header's LLID and length. The firmware frequently appends several
//! fragments back to back in a single ACL frame; [`parse_fragment`] returns
//! the unconsumed tail so callers can walk the whole buffer.
//!
//! ## Example
//!
//! ```rust
//! // A minimal BC2 fragment with an empty payload.
//! let mut frame = vec![0_u8; frontline::HLEN_BC2 as usize];
//! frame[0] = frontline::HLEN_BC2;
//!
//! let mut rest: &[u8] = &frame;
//! while !rest.is_empty() {
//!     let (fragment, tail) = frontline::parse_fragment(rest)?;
//!     println!("type={} len={}", fragment.header.packet_type(), fragment.payload.len());
//!     rest = tail;
//! }
//! # Ok::<(), frontline::Error>(())
//! ```

use nom_derive::{Nom, Parse};
use thiserror::Error;

pub mod hcidump;
pub mod lmp;

/// Header length emitted by BC2-generation firmware.
pub const HLEN_BC2: u8 = 14;
/// Header length emitted by BC4-generation firmware (one extra reserved byte).
pub const HLEN_BC4: u8 = 15;

/// The piconet clock occupies the low 27 bits of the clock word.
pub const FP_CLOCK_MASK: u32 = 0x07FF_FFFF;
/// Set in the clock word when the fragment was sent by the slave.
pub const FP_SLAVE_MASK: u32 = 0x0800_0000;
/// The status nibble sits above the clock and slave bits.
pub const FP_STATUS_SHIFT: u32 = 28;

/// Baseband packet type position within `hdr0`.
pub const FP_TYPE_SHIFT: u8 = 3;
pub const FP_TYPE_MASK: u8 = 0x0F;
/// Active member address occupies the low bits of `hdr0`.
pub const FP_ADDR_MASK: u8 = 0x07;

/// LLID occupies the low two bits of the length word.
pub const FP_LEN_LLID_SHIFT: u16 = 0;
pub const FP_LEN_LLID_MASK: u16 = 0x3;
/// Payload length starts above the LLID and flow bits.
pub const FP_LEN_SHIFT: u16 = 3;

/// LLID value marking an LMP payload; lower values are L2CAP start/continue.
pub const LLID_LMP: u8 = 3;
/// Baseband packet type code for DV packets.
pub const TYPE_DV: u8 = 8;

/// The fixed header prefixed to every captured baseband fragment.
///
/// This is the BC2 layout; BC4 firmware appends one reserved byte, which
/// [`parse_fragment`] skips. All multi-byte fields are little-endian.
#[derive(Nom, Debug, Clone, Copy, PartialEq, Eq)]
#[nom(LittleEndian)]
pub struct FragmentHeader {
    /// Total header length in bytes; must be [`HLEN_BC2`] or [`HLEN_BC4`].
    pub hlen: u8,
    /// Raw clock word: 27-bit piconet clock, slave bit, status nibble.
    pub clock: u32,
    /// Baseband packet header byte: type and member address.
    pub hdr0: u8,
    /// Payload header word: LLID, flow bit, payload length.
    pub len: u16,
    /// Firmware timer at capture time.
    pub timer: u32,
    /// RF channel the fragment was received on.
    pub chan: u8,
    /// Firmware sequence number.
    pub seq: u8,
}

impl FragmentHeader {
    /// Baseband packet type (DM1, DH1, DV, ...).
    pub fn packet_type(&self) -> u8 {
        (self.hdr0 >> FP_TYPE_SHIFT) & FP_TYPE_MASK
    }

    /// Active member address of the sender.
    pub fn addr(&self) -> u8 {
        self.hdr0 & FP_ADDR_MASK
    }

    /// Declared payload length in bytes.
    pub fn payload_len(&self) -> usize {
        (self.len >> FP_LEN_SHIFT) as usize
    }

    /// Logical link id of the payload.
    pub fn llid(&self) -> u8 {
        ((self.len >> FP_LEN_LLID_SHIFT) & FP_LEN_LLID_MASK) as u8
    }

    /// 27-bit piconet clock.
    pub fn clock(&self) -> u32 {
        self.clock & FP_CLOCK_MASK
    }

    /// Firmware status nibble.
    pub fn status(&self) -> u8 {
        (self.clock >> FP_STATUS_SHIFT) as u8
    }

    /// True when the master sent this fragment.
    pub fn is_master(&self) -> bool {
        self.clock & FP_SLAVE_MASK == 0
    }
}

/// One decoded baseband fragment: its header and a borrowed payload slice.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Fragment<'a> {
    pub header: FragmentHeader,
    pub payload: &'a [u8],
}

/// Error type for frontline and hcidump parsing.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum Error {
    /// The stream declared a header length this parser does not know.
    /// Continuing would misalign every following fragment, so callers must
    /// treat this as fatal.
    #[error("unsupported frontline header length {0}")]
    UnsupportedHeaderLength(u8),

    /// The input ended before the declared header or payload did.
    #[error("truncated input: need {needed} bytes, have {have}")]
    Truncated { needed: usize, have: usize },
}

/// Parses one fragment from the front of `input`.
///
/// Returns the fragment and the unconsumed tail. Firmware appends fragments
/// back to back, so a non-empty tail is simply the next fragment.
pub fn parse_fragment(input: &[u8]) -> Result<(Fragment<'_>, &[u8]), Error> {
    let hlen = *input.first().ok_or(Error::Truncated { needed: 1, have: 0 })?;
    if hlen != HLEN_BC2 && hlen != HLEN_BC4 {
        return Err(Error::UnsupportedHeaderLength(hlen));
    }
    let hlen = hlen as usize;
    if input.len() < hlen {
        return Err(Error::Truncated {
            needed: hlen,
            have: input.len(),
        });
    }
    // The derived parser consumes the BC2 layout; the BC4 variant's extra
    // reserved byte is covered by slicing at `hlen` below.
    let (_, header) = FragmentHeader::parse(input).map_err(|_| Error::Truncated {
        needed: hlen,
        have: input.len(),
    })?;

    let plen = header.payload_len();
    let rest = &input[hlen..];
    if rest.len() < plen {
        return Err(Error::Truncated {
            needed: plen,
            have: rest.len(),
        });
    }
    Ok((
        Fragment {
            header,
            payload: &rest[..plen],
        },
        &rest[plen..],
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Builds a fragment with the given header length, type, LLID and payload.
    fn build_fragment(hlen: u8, ty: u8, llid: u8, clock: u32, payload: &[u8]) -> Vec<u8> {
        let mut buf = vec![0_u8; hlen as usize];
        buf[0] = hlen;
        buf[1..5].copy_from_slice(&clock.to_le_bytes());
        buf[5] = (ty << FP_TYPE_SHIFT) | 0x01; // addr 1
        let len = ((payload.len() as u16) << FP_LEN_SHIFT) | u16::from(llid);
        buf[6..8].copy_from_slice(&len.to_le_bytes());
        buf[12] = 39; // channel
        buf.extend_from_slice(payload);
        buf
    }

    #[test]
    fn parses_bc4_fragment() {
        let buf = build_fragment(HLEN_BC4, 4, 2, 0x0123_4567, &[0xDE, 0xAD, 0xBE, 0xEF]);
        let (frag, rest) = parse_fragment(&buf).unwrap();
        assert_eq!(frag.header.hlen, HLEN_BC4);
        assert_eq!(frag.header.packet_type(), 4);
        assert_eq!(frag.header.addr(), 1);
        assert_eq!(frag.header.llid(), 2);
        assert_eq!(frag.header.payload_len(), 4);
        assert_eq!(frag.header.clock(), 0x0123_4567);
        assert_eq!(frag.payload, &[0xDE, 0xAD, 0xBE, 0xEF]);
        assert!(rest.is_empty());
    }

    #[test]
    fn parses_bc2_fragment() {
        let buf = build_fragment(HLEN_BC2, 3, LLID_LMP, 0, &[0x11]);
        let (frag, rest) = parse_fragment(&buf).unwrap();
        assert_eq!(frag.header.hlen, HLEN_BC2);
        assert_eq!(frag.header.llid(), LLID_LMP);
        assert_eq!(frag.payload, &[0x11]);
        assert!(rest.is_empty());
    }

    #[test]
    fn role_comes_from_slave_bit() {
        let master = build_fragment(HLEN_BC4, 0, 0, 0x100, &[]);
        let (frag, _) = parse_fragment(&master).unwrap();
        assert!(frag.header.is_master());

        let slave = build_fragment(HLEN_BC4, 0, 0, 0x100 | FP_SLAVE_MASK, &[]);
        let (frag, _) = parse_fragment(&slave).unwrap();
        assert!(!frag.header.is_master());
        // The slave bit is not part of the clock value.
        assert_eq!(frag.header.clock(), 0x100);
    }

    #[test]
    fn status_nibble_is_extracted() {
        let buf = build_fragment(HLEN_BC4, 0, 0, 0xA000_0042, &[]);
        let (frag, _) = parse_fragment(&buf).unwrap();
        assert_eq!(frag.header.status(), 0xA);
        assert_eq!(frag.header.clock(), 0x42);
    }

    #[test]
    fn appended_fragments_decompose_exactly() {
        // Two concatenated fragments; the sum of header and payload lengths
        // must account for every input byte across the walk.
        let mut buf = build_fragment(HLEN_BC4, 0, 2, 7, &[1, 2, 3, 4]);
        buf.extend_from_slice(&build_fragment(HLEN_BC4, 0, 2, 8, &[]));
        let total = buf.len();

        let mut rest: &[u8] = &buf;
        let mut consumed = 0;
        let mut frames = 0;
        while !rest.is_empty() {
            let (frag, tail) = parse_fragment(rest).unwrap();
            consumed += frag.header.hlen as usize + frag.payload.len();
            frames += 1;
            rest = tail;
        }
        assert_eq!(frames, 2);
        assert_eq!(consumed, total);
    }

    #[test]
    fn unknown_header_length_is_rejected() {
        let mut buf = build_fragment(HLEN_BC4, 0, 0, 0, &[]);
        buf[0] = 16;
        assert_eq!(parse_fragment(&buf), Err(Error::UnsupportedHeaderLength(16)));
    }

    #[test]
    fn truncated_payload_is_rejected() {
        let mut buf = build_fragment(HLEN_BC4, 0, 0, 0, &[1, 2, 3, 4]);
        buf.truncate(buf.len() - 2);
        assert_eq!(
            parse_fragment(&buf),
            Err(Error::Truncated { needed: 4, have: 2 })
        );
    }

    #[test]
    fn truncated_header_is_rejected() {
        let buf = [HLEN_BC2, 0, 0];
        assert_eq!(
            parse_fragment(&buf),
            Err(Error::Truncated { needed: 14, have: 3 })
        );
    }
}
