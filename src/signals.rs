// Copyright 2026 Cornell University
// released under MIT License

//! # Bus signals
//! The wires shared between the harness and the design under test: one clock,
//! an active-low reset and two handshake channels (a `write` bus and a `read` bus).

use std::fmt;

/// Identifies one of the two handshake channels exposed by the DUT
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Bus {
    Write,
    Read,
}

impl Bus {
    pub const ALL: [Bus; 2] = [Bus::Write, Bus::Read];

    /// Prefix used for the bus ports in Verilog designs (e.g. `write_en`)
    pub fn prefix(&self) -> &'static str {
        match self {
            Bus::Write => "write",
            Bus::Read => "read",
        }
    }

    pub(crate) fn index(&self) -> usize {
        match self {
            Bus::Write => 0,
            Bus::Read => 1,
        }
    }
}

impl fmt::Display for Bus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.prefix())
    }
}

/// Live values of a single ready/enable handshake channel.
/// `ready` is driven by the DUT, everything else by whichever driver
/// currently owns the bus.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HandshakeChannel {
    pub ready: bool,
    pub enable: bool,
    pub data: u64,
    pub address: u64,
}

impl HandshakeChannel {
    /// The 2-bit handshake code `enable << 1 | ready` sampled by the monitor
    pub fn code(&self) -> u8 {
        ((self.enable as u8) << 1) | (self.ready as u8)
    }
}

/// Every signal the harness can observe or drive
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Signals {
    pub clk: bool,
    /// Active-low reset (`RST_N`)
    pub rst_n: bool,
    channels: [HandshakeChannel; 2],
}

impl Default for Signals {
    fn default() -> Self {
        Self {
            clk: false,
            rst_n: true,
            channels: [HandshakeChannel::default(); 2],
        }
    }
}

impl Signals {
    pub fn channel(&self, bus: Bus) -> &HandshakeChannel {
        &self.channels[bus.index()]
    }

    pub fn channel_mut(&mut self, bus: Bus) -> &mut HandshakeChannel {
        &mut self.channels[bus.index()]
    }

    /// `true` while the reset line is asserted
    pub fn in_reset(&self) -> bool {
        !self.rst_n
    }

    /// Snapshot of the `ready` level of both buses, indexed like `Bus::ALL`
    pub(crate) fn ready_levels(&self) -> [bool; 2] {
        [self.channels[0].ready, self.channels[1].ready]
    }
}
