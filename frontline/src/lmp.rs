//! Link Manager Protocol packet splitting.
//!
//! An LMP PDU starts with one byte holding the transaction id in the low bit
//! and the opcode in the remaining seven. Opcodes 124 through 127 are escape
//! opcodes and carry the real operation in a second byte.

use num_derive::FromPrimitive;

use crate::Error;

/// Transaction id bit within the first PDU byte.
pub const LMP_TID_MASK: u8 = 0x01;
/// The opcode occupies the bits above the transaction id.
pub const LMP_OP1_SHIFT: u8 = 1;

/// Escape opcode range; these consume a second opcode byte.
pub const LMP_ESCAPE_MIN: u8 = 124;
pub const LMP_ESCAPE_MAX: u8 = 127;

/// The LMP opcodes involved in legacy-pairing authentication.
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromPrimitive)]
pub enum AuthOpcode {
    InRand = 8,
    CombKey = 9,
    AuRand = 11,
    Sres = 12,
}

/// A split LMP PDU. `body` borrows the bytes after the opcode byte(s).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LmpPacket<'a> {
    pub tid: u8,
    pub op1: u8,
    pub op2: Option<u8>,
    pub body: &'a [u8],
}

impl<'a> LmpPacket<'a> {
    /// Splits `buf` into transaction id, opcode(s) and body.
    pub fn parse(buf: &'a [u8]) -> Result<Self, Error> {
        let (&first, rest) = buf
            .split_first()
            .ok_or(Error::Truncated { needed: 1, have: 0 })?;
        let tid = first & LMP_TID_MASK;
        let op1 = first >> LMP_OP1_SHIFT;

        if (LMP_ESCAPE_MIN..=LMP_ESCAPE_MAX).contains(&op1) {
            let (&op2, body) = rest
                .split_first()
                .ok_or(Error::Truncated { needed: 2, have: 1 })?;
            Ok(LmpPacket {
                tid,
                op1,
                op2: Some(op2),
                body,
            })
        } else {
            Ok(LmpPacket {
                tid,
                op1,
                op2: None,
                body: rest,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use num_traits::FromPrimitive;

    #[test]
    fn splits_plain_opcode() {
        // LMP_in_rand (8) with tid 1.
        let buf = [8 << LMP_OP1_SHIFT | 1, 0xAA, 0xBB];
        let pkt = LmpPacket::parse(&buf).unwrap();
        assert_eq!(pkt.tid, 1);
        assert_eq!(pkt.op1, 8);
        assert_eq!(pkt.op2, None);
        assert_eq!(pkt.body, &[0xAA, 0xBB]);
    }

    #[test]
    fn escape_opcode_consumes_second_byte() {
        let buf = [0xF8, 0x03, 0xAA, 0xBB];
        let pkt = LmpPacket::parse(&buf).unwrap();
        assert_eq!(pkt.tid, 0);
        assert_eq!(pkt.op1, 124);
        assert_eq!(pkt.op2, Some(3));
        assert_eq!(pkt.body, &[0xAA, 0xBB]);
    }

    #[test]
    fn escape_opcode_without_second_byte_is_truncated() {
        let buf = [0xF8];
        assert_eq!(
            LmpPacket::parse(&buf),
            Err(Error::Truncated { needed: 2, have: 1 })
        );
    }

    #[test]
    fn empty_pdu_is_truncated() {
        assert_eq!(
            LmpPacket::parse(&[]),
            Err(Error::Truncated { needed: 1, have: 0 })
        );
    }

    #[test]
    fn auth_opcodes_map_from_wire_values() {
        assert_eq!(AuthOpcode::from_u8(8), Some(AuthOpcode::InRand));
        assert_eq!(AuthOpcode::from_u8(9), Some(AuthOpcode::CombKey));
        assert_eq!(AuthOpcode::from_u8(11), Some(AuthOpcode::AuRand));
        assert_eq!(AuthOpcode::from_u8(12), Some(AuthOpcode::Sres));
        assert_eq!(AuthOpcode::from_u8(10), None);
    }
}
