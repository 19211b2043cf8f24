//! The hcidump on-disk capture format.
//!
//! Standard trace tools consume a flat sequence of records, each one a
//! 12-byte little-endian header followed by an HCI packet-type byte and the
//! packet itself. Captured L2CAP is written as ACL data; captured LMP has no
//! standard HCI encapsulation, so it is wrapped in the CSR-proprietary
//! vendor event layout that trace viewers already know how to display.

use std::io::{self, Write};

use nom_derive::{Nom, Parse};

use crate::Error;

pub const HCI_COMMAND_PKT: u8 = 0x01;
pub const HCI_ACLDATA_PKT: u8 = 0x02;
pub const HCI_SCODATA_PKT: u8 = 0x03;
pub const HCI_EVENT_PKT: u8 = 0x04;

/// HCI vendor-specific event code.
pub const EVT_VENDOR: u8 = 0xFF;

pub const DUMP_HDR_SIZE: usize = 12;
pub const ACL_HDR_SIZE: usize = 4;
pub const EVT_HDR_SIZE: usize = 2;

/// Total body length of the synthetic CSR LMP event.
pub const CSR_LMP_LEN: usize = 20;
/// Largest LMP payload the CSR event layout can carry.
pub const CSR_LMP_MAX_BODY: usize = 17;
/// CSR channel id marking an LMP packet.
pub const CSR_LMP_CHANNEL: u8 = 20;
/// Direction byte values for the CSR LMP event.
pub const CSR_DIR_MASTER: u8 = 0x10;
pub const CSR_DIR_SLAVE: u8 = 0x0F;

/// Packs a connection handle and packet-boundary flags into the on-wire ACL
/// handle field: handle in the low 12 bits, flags in the top 4.
pub fn acl_handle_pack(handle: u16, flags: u16) -> u16 {
    (handle & 0x0FFF) | (flags << 12)
}

/// Connection handle part of a packed ACL handle field.
pub fn acl_handle(packed: u16) -> u16 {
    packed & 0x0FFF
}

/// Flags part of a packed ACL handle field.
pub fn acl_flags(packed: u16) -> u16 {
    packed >> 12
}

/// The fixed header starting every dump record.
#[derive(Nom, Debug, Clone, Copy, PartialEq, Eq)]
#[nom(LittleEndian)]
pub struct DumpHeader {
    /// Length of the record body (packet-type byte included).
    pub len: u16,
    /// Nonzero for controller-to-host traffic.
    pub incoming: u8,
    pub pad: u8,
    pub ts_sec: u32,
    pub ts_usec: u32,
}

impl DumpHeader {
    fn incoming(len: u16) -> Self {
        DumpHeader {
            len,
            incoming: 1,
            pad: 0,
            ts_sec: 0,
            ts_usec: 0,
        }
    }

    fn to_bytes(self) -> [u8; DUMP_HDR_SIZE] {
        let mut buf = [0_u8; DUMP_HDR_SIZE];
        buf[0..2].copy_from_slice(&self.len.to_le_bytes());
        buf[2] = self.incoming;
        buf[3] = self.pad;
        buf[4..8].copy_from_slice(&self.ts_sec.to_le_bytes());
        buf[8..12].copy_from_slice(&self.ts_usec.to_le_bytes());
        buf
    }
}

/// HCI ACL data sub-header.
#[derive(Nom, Debug, Clone, Copy, PartialEq, Eq)]
#[nom(LittleEndian)]
pub struct AclHeader {
    pub handle: u16,
    pub dlen: u16,
}

/// HCI event sub-header.
#[derive(Nom, Debug, Clone, Copy, PartialEq, Eq)]
#[nom(LittleEndian)]
pub struct EventHeader {
    pub evt: u8,
    pub plen: u8,
}

/// One record read back from a dump: header, packet-type byte, and the
/// packet bytes (sub-header included).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DumpRecord<'a> {
    pub header: DumpHeader,
    pub packet_type: u8,
    pub packet: &'a [u8],
}

/// Parses one record from the front of `input`, returning the unconsumed
/// tail.
pub fn parse_record(input: &[u8]) -> Result<(DumpRecord<'_>, &[u8]), Error> {
    let (rest, header) = DumpHeader::parse(input).map_err(|_| Error::Truncated {
        needed: DUMP_HDR_SIZE,
        have: input.len(),
    })?;
    let body_len = header.len as usize;
    if rest.len() < body_len || body_len == 0 {
        return Err(Error::Truncated {
            needed: body_len.max(1),
            have: rest.len(),
        });
    }
    Ok((
        DumpRecord {
            header,
            packet_type: rest[0],
            packet: &rest[1..body_len],
        },
        &rest[body_len..],
    ))
}

/// Writes hcidump records to an underlying sink.
///
/// Each record is emitted as header, packet-type byte, sub-header, body, in
/// that order with nothing interleaved. Short writes surface as errors from
/// the sink.
pub struct DumpWriter<W: Write> {
    inner: W,
}

impl<W: Write> DumpWriter<W> {
    pub fn new(inner: W) -> Self {
        DumpWriter { inner }
    }

    /// Writes a captured L2CAP payload as an incoming ACL data record. The
    /// LLID travels in the packet-boundary flags of the ACL handle field.
    pub fn write_acl(&mut self, llid: u8, payload: &[u8]) -> io::Result<()> {
        let total = 1 + ACL_HDR_SIZE + payload.len();
        self.inner
            .write_all(&DumpHeader::incoming(total as u16).to_bytes())?;
        self.inner.write_all(&[HCI_ACLDATA_PKT])?;
        self.inner
            .write_all(&acl_handle_pack(0, u16::from(llid)).to_le_bytes())?;
        self.inner
            .write_all(&(payload.len() as u16).to_le_bytes())?;
        self.inner.write_all(payload)?;
        Ok(())
    }

    /// Writes a captured LMP PDU as the synthetic CSR vendor event.
    ///
    /// `lmp` is the raw PDU starting at the opcode byte; the 20-byte event
    /// body zero-pads it to [`CSR_LMP_MAX_BODY`] bytes. Longer PDUs do not
    /// fit the CSR layout and are rejected.
    pub fn write_csr_lmp_event(&mut self, master: bool, lmp: &[u8]) -> io::Result<()> {
        if lmp.len() > CSR_LMP_MAX_BODY {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("LMP payload of {} bytes exceeds CSR event capacity", lmp.len()),
            ));
        }
        let total = 1 + EVT_HDR_SIZE + CSR_LMP_LEN;

        let mut body = [0_u8; CSR_LMP_LEN];
        body[0] = CSR_LMP_CHANNEL;
        body[1] = if master { CSR_DIR_MASTER } else { CSR_DIR_SLAVE };
        body[2..2 + lmp.len()].copy_from_slice(lmp);
        // body[19] stays zero: connection handle.

        self.inner
            .write_all(&DumpHeader::incoming(total as u16).to_bytes())?;
        self.inner.write_all(&[HCI_EVENT_PKT])?;
        self.inner.write_all(&[EVT_VENDOR, CSR_LMP_LEN as u8])?;
        self.inner.write_all(&body)?;
        Ok(())
    }

    pub fn into_inner(self) -> W {
        self.inner
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn handle_pack_keeps_llid_in_flags() {
        for llid in 0..4_u16 {
            let packed = acl_handle_pack(0, llid);
            assert_eq!(packed & 0x0FFF, 0);
            assert_eq!(packed >> 12, llid & 0xF);
            assert_eq!(acl_handle(packed), 0);
            assert_eq!(acl_flags(packed), llid);
        }
    }

    #[test]
    fn acl_record_layout_is_exact() {
        let mut writer = DumpWriter::new(Vec::new());
        writer.write_acl(2, &[0xCA, 0xFE]).unwrap();
        let bytes = writer.into_inner();

        let mut expected = vec![
            7, 0, // len = 1 + 4 + 2
            1, 0, // incoming, pad
            0, 0, 0, 0, // ts_sec
            0, 0, 0, 0, // ts_usec
            HCI_ACLDATA_PKT,
            0x00, 0x20, // handle: llid 2 in the top nibble
            2, 0, // dlen
        ];
        expected.extend_from_slice(&[0xCA, 0xFE]);
        assert_eq!(bytes, expected);
    }

    #[test]
    fn csr_lmp_record_layout_is_exact() {
        let lmp: Vec<u8> = (1..=17).collect();
        let mut writer = DumpWriter::new(Vec::new());
        writer.write_csr_lmp_event(true, &lmp).unwrap();
        let bytes = writer.into_inner();

        let mut expected = vec![
            23, 0, // len = 1 + 2 + 20
            1, 0, // incoming, pad
            0, 0, 0, 0, // ts_sec
            0, 0, 0, 0, // ts_usec
            HCI_EVENT_PKT,
            EVT_VENDOR,
            20, // event plen
            CSR_LMP_CHANNEL,
            CSR_DIR_MASTER,
        ];
        expected.extend((1..=17_u8).collect::<Vec<u8>>());
        expected.push(0); // connection handle
        assert_eq!(bytes, expected);
    }

    #[test]
    fn short_lmp_body_is_zero_padded() {
        let mut writer = DumpWriter::new(Vec::new());
        writer.write_csr_lmp_event(false, &[0xAB]).unwrap();
        let bytes = writer.into_inner();

        let (record, rest) = parse_record(&bytes).unwrap();
        assert!(rest.is_empty());
        assert_eq!(record.packet_type, HCI_EVENT_PKT);
        // event header + channel + direction + padded body + handle
        assert_eq!(record.packet[0], EVT_VENDOR);
        assert_eq!(record.packet[1], CSR_LMP_LEN as u8);
        assert_eq!(record.packet[2], CSR_LMP_CHANNEL);
        assert_eq!(record.packet[3], CSR_DIR_SLAVE);
        assert_eq!(record.packet[4], 0xAB);
        assert!(record.packet[5..].iter().all(|&b| b == 0));
    }

    #[test]
    fn oversized_lmp_body_is_rejected() {
        let mut writer = DumpWriter::new(Vec::new());
        let err = writer.write_csr_lmp_event(true, &[0; 18]).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidInput);
        assert!(writer.into_inner().is_empty());
    }

    #[test]
    fn acl_records_round_trip() {
        let payload = [0x08, 0x00, 0x01, 0x00, 0x02, 0xC0, 0xDE];
        let mut writer = DumpWriter::new(Vec::new());
        writer.write_acl(1, &payload).unwrap();
        writer.write_acl(2, &[0x99]).unwrap();
        let bytes = writer.into_inner();

        let (first, rest) = parse_record(&bytes).unwrap();
        assert_eq!(first.packet_type, HCI_ACLDATA_PKT);
        assert_eq!(first.header.incoming, 1);
        let (acl_rest, acl) = AclHeader::parse(first.packet).unwrap();
        assert_eq!(acl_flags(acl.handle), 1);
        assert_eq!(acl.dlen as usize, payload.len());
        assert_eq!(acl_rest, &payload);

        let (second, rest) = parse_record(rest).unwrap();
        assert!(rest.is_empty());
        let (acl_rest, acl) = AclHeader::parse(second.packet).unwrap();
        assert_eq!(acl_flags(acl.handle), 2);
        assert_eq!(acl_rest, &[0x99]);
    }
}
