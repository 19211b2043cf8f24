use std::io;

use thiserror::Error;

/// Failure kinds surfaced by the sniffer engine.
///
/// Address and pair-spec parse failures belong to the caller; transport and
/// dump I/O failures, and framing anomalies that would misalign the capture
/// stream, terminate the session.
#[derive(Error, Debug)]
pub enum SniffError {
    #[error("no such HCI device: {0}")]
    DeviceNotFound(String),

    #[error("HCI I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("timed out waiting for the vendor reply")]
    Timeout,

    #[error("cannot parse bluetooth address {0:?}")]
    BadAddress(String),

    #[error("address pair must be <master>@<slave>")]
    BadPairSpec,

    #[error("payload of {0} bytes does not fit a debug packet")]
    EncodeOverflow(usize),

    #[error("malformed HCI frame: {0}")]
    MalformedFrame(String),

    #[error("dump write failed: {0}")]
    DumpIo(#[source] io::Error),

    #[error(transparent)]
    Frame(#[from] frontline::Error),
}
