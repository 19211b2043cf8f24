#![deny(unused_must_use)]

//! Command-line front-end for the piconet sniffer.
//!
//! Each flag maps onto one session command; flags can be combined, so
//! `--start ... --sniff` arms the firmware and immediately drops into the
//! receive loop. Capture output goes to stdout; set `RUST_LOG` for
//! diagnostics.

use std::fs::File;
use std::path::PathBuf;

use anyhow::{bail, Context};
use clap::Parser;
use log::{debug, warn};

mod error;
mod hci;
mod pairing;
mod session;
mod vendor;

use session::SniffSession;
use vendor::parse_pair;

/// Drives CSR debug firmware to capture and decode the baseband traffic of
/// a Bluetooth piconet.
#[derive(Debug, Parser)]
#[command(author, version, about)]
pub struct SniffArgs {
    /// HCI device to drive.
    #[arg(short, long, default_value = "hci0")]
    pub device: String,

    /// Read the firmware clock and exit.
    #[arg(short, long)]
    pub timer: bool,

    /// Program the firmware packet filter; nonzero enables it.
    #[arg(short, long, value_name = "0|1")]
    pub filter: Option<u8>,

    /// Stop a running capture.
    #[arg(short = 'e', long)]
    pub stop: bool,

    /// Start capturing the piconet with the given addresses.
    #[arg(short, long, value_name = "MASTER@SLAVE")]
    pub start: Option<String>,

    /// Receive and decode captured frames until interrupted.
    #[arg(short = 'n', long)]
    pub sniff: bool,

    /// Write captured traffic to an hcidump file.
    #[arg(short = 'w', long, value_name = "FILE")]
    pub dump: Option<PathBuf>,

    /// Collect pairing material and print btpincrack work units.
    #[arg(short, long)]
    pub pin: bool,

    /// Drop fragments of this baseband type; may be repeated.
    #[arg(short = 'g', long = "ignore-type", value_name = "TYPE")]
    pub ignore_type: Vec<u8>,

    /// Drop fragments with an empty payload.
    #[arg(short = 'z', long)]
    pub ignore_zero: bool,
}

fn main() -> anyhow::Result<()> {
    env_logger::init();
    let args = SniffArgs::parse();
    debug!("Running with args: {args:#?}");

    let mut session = SniffSession::new(&args.device);
    for &ptype in &args.ignore_type {
        if !session.ignore_type(ptype) {
            warn!("ignore list is full, not ignoring type {ptype}");
        }
    }
    if args.ignore_zero {
        session.set_ignore_zero(true);
    }
    if args.pin {
        session.arm_pairing();
    }
    if let Some(path) = &args.dump {
        let file = File::create(path)
            .with_context(|| format!("cannot create dump file {}", path.display()))?;
        session.dump_to(file);
    }

    let mut acted = false;
    if args.timer {
        let clock = session.get_timer()?;
        println!("Timer: 0x{clock:08X}");
        acted = true;
    }
    if let Some(value) = args.filter {
        session.set_filter(value != 0)?;
        acted = true;
    }
    if args.stop {
        session.sniff_stop()?;
        acted = true;
    }
    if let Some(spec) = &args.start {
        let (mut master, mut slave) = parse_pair(spec)?;
        // The firmware wants the address bytes low-order first.
        master.reverse();
        slave.reverse();
        session.sniff_start(&master, &slave)?;
        acted = true;
    }
    if args.sniff {
        session.sniff()?;
        acted = true;
    }
    if !acted {
        bail!("nothing to do; pass --timer, --filter, --stop, --start or --sniff");
    }
    Ok(())
}
