//! Per-session capture state and the exported sniffer commands.
//!
//! A [`SniffSession`] owns everything one capture needs: the HCI socket,
//! the reusable receive buffer, the dump sink, the ignore filters, the
//! fields decoded from the fragment currently in flight, and the pairing
//! observer. Every exported command resolves the device name and opens a
//! fresh socket on entry; [`SniffSession::sniff`] then blocks in the receive
//! loop until an error tears the session down.

use std::io::Write;
use std::mem;

use log::{info, warn};

use frontline::hcidump::{DumpWriter, HCI_ACLDATA_PKT};
use frontline::lmp::LmpPacket;
use frontline::{parse_fragment, FragmentHeader, LLID_LMP, TYPE_DV};

use crate::error::SniffError;
use crate::hci::{HciSocket, VENDOR_TIMEOUT};
use crate::pairing::PairingObserver;
use crate::vendor::{DebugCommand, DebugPacket, TIMER_REPLY_OFFSET};

/// Capacity of the baseband-type ignore list.
pub const MAX_TYPES: usize = 8;

/// Size of the reusable receive buffer.
const RECV_BUF_LEN: usize = 2048;
/// Size of the vendor reply buffer.
const REPLY_LEN: usize = 254;

/// HCI ACL data sub-header length on the receive path.
const ACL_HDR_LEN: usize = 4;

/// A small fixed-capacity set of baseband type codes to drop.
#[derive(Debug, Default)]
pub struct IgnoreList {
    slots: [Option<u8>; MAX_TYPES],
}

impl IgnoreList {
    /// Adds a type code; returns false when the list is full.
    pub fn push(&mut self, ptype: u8) -> bool {
        if self.contains(ptype) {
            return true;
        }
        for slot in self.slots.iter_mut() {
            if slot.is_none() {
                *slot = Some(ptype);
                return true;
            }
        }
        false
    }

    pub fn contains(&self, ptype: u8) -> bool {
        self.slots.iter().any(|slot| *slot == Some(ptype))
    }
}

/// State for one capture session against one HCI device.
pub struct SniffSession {
    device: String,
    sock: Option<HciSocket>,
    dump: Option<DumpWriter<Box<dyn Write>>>,
    ignore: IgnoreList,
    ignore_zero: bool,
    pairing: PairingObserver,
    buf: Vec<u8>,
    // Fields of the fragment currently being decoded.
    llid: u8,
    ptype: u8,
    master: bool,
}

impl SniffSession {
    pub fn new(device: &str) -> Self {
        SniffSession {
            device: device.to_owned(),
            sock: None,
            dump: None,
            ignore: IgnoreList::default(),
            ignore_zero: false,
            pairing: PairingObserver::default(),
            buf: vec![0; RECV_BUF_LEN],
            llid: 0,
            ptype: 0,
            master: false,
        }
    }

    /// Persists captured traffic to `sink` in hcidump format.
    pub fn dump_to(&mut self, sink: impl Write + 'static) {
        self.dump = Some(DumpWriter::new(Box::new(sink)));
    }

    /// Drops fragments of the given baseband type; returns false when the
    /// ignore list is full.
    pub fn ignore_type(&mut self, ptype: u8) -> bool {
        self.ignore.push(ptype)
    }

    /// Drops fragments with an empty payload.
    pub fn set_ignore_zero(&mut self, on: bool) {
        self.ignore_zero = on;
    }

    /// Starts collecting pairing material for a `btpincrack` work unit.
    pub fn arm_pairing(&mut self) {
        self.pairing.arm();
    }

    /// Reads the firmware clock.
    pub fn get_timer(&mut self) -> Result<u32, SniffError> {
        self.connect()?;
        let packet = DebugPacket::new(DebugCommand::Timer);
        let mut reply = [0_u8; REPLY_LEN];
        let n = self
            .sock()
            .send_vendor(&packet.encode(), &mut reply, VENDOR_TIMEOUT)?;
        if n < TIMER_REPLY_OFFSET + 4 {
            return Err(SniffError::MalformedFrame(format!(
                "timer reply of {n} bytes"
            )));
        }
        Ok(u32::from_le_bytes([reply[2], reply[3], reply[4], reply[5]]))
    }

    /// Enables or disables the firmware-side packet filter.
    pub fn set_filter(&mut self, enable: bool) -> Result<(), SniffError> {
        self.connect()?;
        info!("filter packets: {}", u8::from(enable));
        let packet = DebugPacket::with_payload(DebugCommand::Filter, &[u8::from(enable)])?;
        self.command_no_reply(&packet)
    }

    /// Points the firmware at a piconet and starts capturing. Addresses are
    /// placed in the payload exactly as supplied.
    pub fn sniff_start(&mut self, master: &[u8; 6], slave: &[u8; 6]) -> Result<(), SniffError> {
        self.connect()?;
        self.command_no_reply(&DebugPacket::start(master, slave))
    }

    /// Stops a running capture.
    pub fn sniff_stop(&mut self) -> Result<(), SniffError> {
        self.connect()?;
        self.command_no_reply(&DebugPacket::new(DebugCommand::Stop))
    }

    /// Receives and decodes captured frames until the transport fails or a
    /// framing anomaly makes the stream unusable.
    pub fn sniff(&mut self) -> Result<(), SniffError> {
        self.connect()?;
        self.sock().install_capture_filter()?;
        loop {
            let mut buf = mem::take(&mut self.buf);
            let read = self.sock().read_packet(&mut buf);
            let result = match read {
                Ok(n) => self.process(&buf[..n]),
                Err(e) => Err(e),
            };
            self.buf = buf;
            result?;
        }
    }

    fn connect(&mut self) -> Result<(), SniffError> {
        self.sock = Some(HciSocket::open(&self.device)?);
        Ok(())
    }

    fn sock(&self) -> &HciSocket {
        self.sock.as_ref().expect("session is connected")
    }

    /// Commands whose reply carries nothing still wait for the vendor event.
    fn command_no_reply(&mut self, packet: &DebugPacket) -> Result<(), SniffError> {
        let mut reply = [0_u8; REPLY_LEN];
        self.sock()
            .send_vendor(&packet.encode(), &mut reply, VENDOR_TIMEOUT)?;
        Ok(())
    }

    /// Handles one HCI frame off the socket. Captured traffic arrives as
    /// ACL data; anything else is noted and dropped.
    fn process(&mut self, frame: &[u8]) -> Result<(), SniffError> {
        match frame.first() {
            Some(&HCI_ACLDATA_PKT) => {}
            Some(&other) => {
                warn!("Unknown type: {other}");
                return Ok(());
            }
            None => return Ok(()),
        }
        if frame.len() < 1 + ACL_HDR_LEN {
            return Err(SniffError::MalformedFrame(format!(
                "ACL frame of {} bytes",
                frame.len()
            )));
        }
        let dlen = usize::from(u16::from_le_bytes([frame[3], frame[4]]));
        let payload = &frame[1 + ACL_HDR_LEN..];
        if dlen != payload.len() {
            return Err(SniffError::MalformedFrame(format!(
                "ACL length {} does not match frame ({} bytes left)",
                dlen,
                payload.len()
            )));
        }
        self.process_frontline(payload)
    }

    /// Walks the frontline fragments packed into one ACL payload.
    ///
    /// A fragment matched by the ignore-list or the zero-length filter drops
    /// the appended fragments behind it as well.
    fn process_frontline(&mut self, buf: &[u8]) -> Result<(), SniffError> {
        let mut rest = buf;
        while !rest.is_empty() {
            let (fragment, tail) = parse_fragment(rest)?;
            let header = fragment.header;
            let ptype = header.packet_type();
            if self.ignore.contains(ptype) {
                return Ok(());
            }
            if self.ignore_zero && fragment.payload.is_empty() {
                return Ok(());
            }

            self.llid = header.llid();
            self.master = header.is_master();
            self.ptype = ptype;
            self.report_fragment(&header);

            if fragment.payload.is_empty() {
                println!();
            } else {
                print!(" ");
                self.process_payload(fragment.payload)?;
            }
            rest = tail;
        }
        Ok(())
    }

    fn report_fragment(&self, header: &FragmentHeader) {
        print!(
            "HL 0x{:02X} Ch {:02} {} Clk 0x{:07X} Status 0x{:1X} Hdr0 0x{:02X} [type: {} addr: {}] LLID {} Len {}",
            header.hlen,
            header.chan,
            if self.master { 'M' } else { 'S' },
            header.clock(),
            header.status(),
            header.hdr0,
            self.ptype,
            header.addr(),
            self.llid,
            header.payload_len(),
        );
    }

    fn process_payload(&mut self, payload: &[u8]) -> Result<(), SniffError> {
        if self.ptype == TYPE_DV {
            self.process_dv(payload);
            return Ok(());
        }
        if self.llid == LLID_LMP {
            self.process_lmp(payload)
        } else {
            self.process_l2cap(payload)
        }
    }

    fn process_dv(&mut self, payload: &[u8]) {
        println!("DV: {}", hexdump(payload));
    }

    fn process_lmp(&mut self, payload: &[u8]) -> Result<(), SniffError> {
        // The dump carries the raw PDU, opcode bytes included.
        if let Some(dump) = self.dump.as_mut() {
            dump.write_csr_lmp_event(self.master, payload)
                .map_err(SniffError::DumpIo)?;
        }

        let pdu = LmpPacket::parse(payload)?;
        match pdu.op2 {
            Some(op2) => print!("LMP Tid {} Op1 {} Op2 {}: ", pdu.tid, pdu.op1, op2),
            None => print!("LMP Tid {} Op1 {}: ", pdu.tid, pdu.op1),
        }
        println!("{}", hexdump(pdu.body));

        if let Some(line) = self.pairing.observe(pdu.op1, self.master, pdu.body) {
            println!("{line}");
        }
        Ok(())
    }

    fn process_l2cap(&mut self, payload: &[u8]) -> Result<(), SniffError> {
        println!("L2CAP: {}", hexdump(payload));
        if let Some(dump) = self.dump.as_mut() {
            dump.write_acl(self.llid, payload)
                .map_err(SniffError::DumpIo)?;
        }
        Ok(())
    }
}

fn hexdump(buf: &[u8]) -> String {
    buf.iter()
        .map(|b| format!("{b:02X}"))
        .collect::<Vec<_>>()
        .join(" ")
}
