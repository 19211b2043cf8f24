//! Raw HCI socket transport.
//!
//! Talks to the kernel's Bluetooth HCI layer directly over an
//! `AF_BLUETOOTH`/`SOCK_RAW` socket: device-name resolution through the
//! HCIGETDEVLIST/HCIGETDEVINFO ioctls, receive filtering through
//! `SOL_HCI`/`HCI_FILTER`, and a synchronous vendor-command request on top
//! of blocking reads. Binding structs mirror the kernel's `hci.h` layouts.

use std::io;
use std::mem;
use std::os::unix::io::RawFd;
use std::time::{Duration, Instant};

use frontline::hcidump::{EVT_VENDOR, HCI_COMMAND_PKT, HCI_EVENT_PKT};

use crate::error::SniffError;

const BTPROTO_HCI: i32 = 1;
const HCI_CHANNEL_RAW: u16 = 0;
const SOL_HCI: i32 = 0;
const HCI_FILTER: i32 = 2;
const HCI_MAX_DEV: usize = 16;

// _IOR('H', 210, int) / _IOR('H', 211, int)
const HCIGETDEVLIST: libc::c_ulong = 0x8004_48D2;
const HCIGETDEVINFO: libc::c_ulong = 0x8004_48D3;

const EVT_CMD_COMPLETE: u8 = 0x0E;
const EVT_CMD_STATUS: u8 = 0x0F;

/// Opcode group carrying vendor-specific commands.
pub const OGF_VENDOR: u16 = 0x3F;

// The kernel filter matches packet types against 32 bits and events against
// 64; higher codes wrap (the vendor event 0xFF lands on bit 63).
const HCI_FLT_TYPE_BITS: u8 = 31;
const HCI_FLT_EVENT_BITS: u8 = 63;

/// Firmware answers debug commands well within this; beyond it the command
/// is considered lost.
pub const VENDOR_TIMEOUT: Duration = Duration::from_millis(2000);

/// Packs opcode group and command fields into an HCI command opcode.
pub const fn cmd_opcode_pack(ogf: u16, ocf: u16) -> u16 {
    (ogf << 10) | ocf
}

// The #[repr(C)] structs below mirror kernel layouts; several fields exist
// only so the ioctl copies line up.

#[repr(C)]
#[allow(dead_code)]
struct SockaddrHci {
    hci_family: libc::sa_family_t,
    hci_dev: u16,
    hci_channel: u16,
}

#[repr(C)]
#[derive(Clone, Copy, Default)]
#[allow(dead_code)]
struct HciFilter {
    type_mask: u32,
    event_mask: [u32; 2],
    opcode: u16,
}

impl HciFilter {
    fn set_ptype(&mut self, ptype: u8) {
        self.type_mask |= 1 << (ptype & HCI_FLT_TYPE_BITS);
    }

    fn set_event(&mut self, event: u8) {
        let bit = event & HCI_FLT_EVENT_BITS;
        self.event_mask[usize::from(bit >> 5)] |= 1 << (bit & 31);
    }

    fn all_ptypes(&mut self) {
        self.type_mask = !0;
    }

    fn all_events(&mut self) {
        self.event_mask = [!0; 2];
    }
}

#[repr(C)]
#[derive(Clone, Copy, Default)]
#[allow(dead_code)]
struct HciDevReq {
    dev_id: u16,
    dev_opt: u32,
}

#[repr(C)]
struct HciDevListReq {
    dev_num: u16,
    dev_req: [HciDevReq; HCI_MAX_DEV],
}

#[repr(C)]
#[derive(Default)]
#[allow(dead_code)]
struct HciDevStats {
    err_rx: u32,
    err_tx: u32,
    cmd_tx: u32,
    evt_rx: u32,
    acl_tx: u32,
    acl_rx: u32,
    sco_rx: u32,
    byte_rx: u32,
    byte_tx: u32,
}

#[repr(C)]
#[derive(Default)]
#[allow(dead_code)]
struct HciDevInfo {
    dev_id: u16,
    name: [u8; 8],
    bdaddr: [u8; 6],
    flags: u32,
    dev_type: u8,
    features: [u8; 8],
    pkt_type: u32,
    link_policy: u32,
    link_mode: u32,
    acl_mtu: u16,
    acl_pkts: u16,
    sco_mtu: u16,
    sco_pkts: u16,
    stat: HciDevStats,
}

/// An open raw HCI socket bound to one controller.
pub struct HciSocket {
    fd: RawFd,
}

impl HciSocket {
    /// Resolves a device name like `"hci0"` to its numeric id.
    pub fn devid(name: &str) -> Result<u16, SniffError> {
        let sock = Self::raw_socket()?;
        let mut list = HciDevListReq {
            dev_num: HCI_MAX_DEV as u16,
            dev_req: Default::default(),
        };
        let rc = unsafe { libc::ioctl(sock.fd, HCIGETDEVLIST, &mut list as *mut _ as *mut libc::c_void) };
        if rc < 0 {
            return Err(io::Error::last_os_error().into());
        }
        for req in &list.dev_req[..usize::from(list.dev_num).min(HCI_MAX_DEV)] {
            let mut info = HciDevInfo {
                dev_id: req.dev_id,
                ..Default::default()
            };
            let rc = unsafe {
                libc::ioctl(sock.fd, HCIGETDEVINFO, &mut info as *mut _ as *mut libc::c_void)
            };
            if rc < 0 {
                continue;
            }
            let end = info.name.iter().position(|&b| b == 0).unwrap_or(info.name.len());
            if &info.name[..end] == name.as_bytes() {
                return Ok(req.dev_id);
            }
        }
        Err(SniffError::DeviceNotFound(name.to_owned()))
    }

    /// Opens a raw socket bound to the named controller.
    pub fn open(name: &str) -> Result<Self, SniffError> {
        let dev_id = Self::devid(name)?;
        let sock = Self::raw_socket()?;
        let addr = SockaddrHci {
            hci_family: libc::AF_BLUETOOTH as libc::sa_family_t,
            hci_dev: dev_id,
            hci_channel: HCI_CHANNEL_RAW,
        };
        let rc = unsafe {
            libc::bind(
                sock.fd,
                &addr as *const _ as *const libc::sockaddr,
                mem::size_of::<SockaddrHci>() as libc::socklen_t,
            )
        };
        if rc < 0 {
            return Err(io::Error::last_os_error().into());
        }
        Ok(sock)
    }

    fn raw_socket() -> Result<Self, SniffError> {
        let fd = unsafe {
            libc::socket(
                libc::AF_BLUETOOTH,
                libc::SOCK_RAW | libc::SOCK_CLOEXEC,
                BTPROTO_HCI,
            )
        };
        if fd < 0 {
            return Err(io::Error::last_os_error().into());
        }
        Ok(HciSocket { fd })
    }

    /// Opens the receive path wide: all packet types, all events.
    pub fn install_capture_filter(&self) -> Result<(), SniffError> {
        let mut flt = HciFilter::default();
        flt.all_ptypes();
        flt.all_events();
        self.set_filter(&flt)
    }

    fn set_filter(&self, flt: &HciFilter) -> Result<(), SniffError> {
        let rc = unsafe {
            libc::setsockopt(
                self.fd,
                SOL_HCI,
                HCI_FILTER,
                flt as *const _ as *const libc::c_void,
                mem::size_of::<HciFilter>() as libc::socklen_t,
            )
        };
        if rc < 0 {
            return Err(io::Error::last_os_error().into());
        }
        Ok(())
    }

    /// Issues a synchronous vendor command (OGF 0x3F, OCF 0) and copies the
    /// vendor-event reply into `reply`, returning the number of bytes.
    ///
    /// A command-status event reporting failure aborts the wait; expiry of
    /// `timeout` without a reply fails with [`SniffError::Timeout`].
    pub fn send_vendor(
        &self,
        cparam: &[u8],
        reply: &mut [u8],
        timeout: Duration,
    ) -> Result<usize, SniffError> {
        let opcode = cmd_opcode_pack(OGF_VENDOR, 0x0000);

        let mut flt = HciFilter::default();
        flt.set_ptype(HCI_EVENT_PKT);
        flt.set_event(EVT_CMD_STATUS);
        flt.set_event(EVT_CMD_COMPLETE);
        flt.set_event(EVT_VENDOR);
        flt.opcode = opcode;
        self.set_filter(&flt)?;

        let mut pkt = Vec::with_capacity(4 + cparam.len());
        pkt.push(HCI_COMMAND_PKT);
        pkt.extend_from_slice(&opcode.to_le_bytes());
        pkt.push(cparam.len() as u8);
        pkt.extend_from_slice(cparam);
        self.write_all(&pkt)?;

        let deadline = Instant::now() + timeout;
        let mut buf = [0_u8; 260];
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(SniffError::Timeout);
            }
            let mut pfd = libc::pollfd {
                fd: self.fd,
                events: libc::POLLIN,
                revents: 0,
            };
            let rc = unsafe { libc::poll(&mut pfd, 1, remaining.as_millis() as i32) };
            if rc < 0 {
                let e = io::Error::last_os_error();
                if e.kind() == io::ErrorKind::Interrupted {
                    continue;
                }
                return Err(e.into());
            }
            if rc == 0 {
                return Err(SniffError::Timeout);
            }

            let n = self.read(&mut buf)?;
            if n < 3 || buf[0] != HCI_EVENT_PKT {
                continue;
            }
            let evt = buf[1];
            let plen = usize::from(buf[2]);
            let params = &buf[3..n.min(3 + plen)];
            match evt {
                EVT_CMD_STATUS => {
                    // status, num_hci_command_packets, opcode
                    if params.len() >= 4
                        && u16::from_le_bytes([params[2], params[3]]) == opcode
                        && params[0] != 0
                    {
                        return Err(SniffError::Io(io::Error::new(
                            io::ErrorKind::Other,
                            format!("vendor command failed with status 0x{:02X}", params[0]),
                        )));
                    }
                }
                EVT_VENDOR => {
                    let copied = params.len().min(reply.len());
                    reply[..copied].copy_from_slice(&params[..copied]);
                    return Ok(copied);
                }
                _ => {}
            }
        }
    }

    /// Blocking read of one HCI frame.
    pub fn read_packet(&self, buf: &mut [u8]) -> Result<usize, SniffError> {
        self.read(buf)
    }

    fn read(&self, buf: &mut [u8]) -> Result<usize, SniffError> {
        loop {
            let n = unsafe { libc::read(self.fd, buf.as_mut_ptr() as *mut libc::c_void, buf.len()) };
            if n < 0 {
                let e = io::Error::last_os_error();
                if e.kind() == io::ErrorKind::Interrupted {
                    continue;
                }
                return Err(e.into());
            }
            return Ok(n as usize);
        }
    }

    fn write_all(&self, buf: &[u8]) -> Result<(), SniffError> {
        loop {
            let n = unsafe { libc::write(self.fd, buf.as_ptr() as *const libc::c_void, buf.len()) };
            if n < 0 {
                let e = io::Error::last_os_error();
                if e.kind() == io::ErrorKind::Interrupted {
                    continue;
                }
                return Err(e.into());
            }
            if n as usize != buf.len() {
                return Err(SniffError::Io(io::Error::new(
                    io::ErrorKind::WriteZero,
                    "short write on HCI socket",
                )));
            }
            return Ok(());
        }
    }
}

impl Drop for HciSocket {
    fn drop(&mut self) {
        unsafe {
            libc::close(self.fd);
        }
    }
}
