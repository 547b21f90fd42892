// Copyright 2026 Cornell University
// released under MIT License

//! # Design under test
//! The harness only ever sees the DUT through the [`Dut`] trait: a source of
//! `ready`/`data` values and a sink for everything the drivers put on the buses.

use log::debug;

use crate::errors::HarnessResult;
use crate::sequence::AddressMap;
use crate::signals::{Bus, Signals};

pub trait Dut {
    /// Recomputes the DUT-driven signals (`ready` on both buses, `data` on the
    /// read bus) from the current inputs and internal state
    fn settle(&mut self, signals: &mut Signals) -> HarnessResult<()>;

    /// Commits sequential state on a rising clock edge. `signals` holds the
    /// values that were driven right before the edge.
    fn rising_edge(&mut self, signals: &Signals) -> HarnessResult<()>;
}

/// Cycle-level model of the address-mapped OR device the default scenario
/// targets. Used when no Verilog design is supplied.
///
/// - `ready` is a register cleared in reset and set on the first edge after it
/// - inputs A and B and output Y are one-entry registers
/// - Y takes `A | B` once both inputs are full and Y is free (or being read)
/// - a read handshake at the Y data address consumes Y
#[derive(Debug, Clone, Default)]
pub struct OrDeviceModel {
    map: AddressMap,
    ready: bool,
    a: Option<u64>,
    b: Option<u64>,
    y: Option<u64>,
}

impl OrDeviceModel {
    pub fn new(map: AddressMap) -> Self {
        Self {
            map,
            ..Default::default()
        }
    }

    fn read_data(&self, address: u64) -> u64 {
        let map = &self.map;
        if address == map.a_status {
            self.a.is_none() as u64
        } else if address == map.b_status {
            self.b.is_none() as u64
        } else if address == map.y_status {
            self.y.is_some() as u64
        } else if address == map.y_data {
            self.y.unwrap_or(0)
        } else if address == map.a_data {
            self.a.unwrap_or(0)
        } else if address == map.b_data {
            self.b.unwrap_or(0)
        } else {
            0
        }
    }
}

impl Dut for OrDeviceModel {
    fn settle(&mut self, signals: &mut Signals) -> HarnessResult<()> {
        signals.channel_mut(Bus::Write).ready = self.ready;
        let data = self.read_data(signals.channel(Bus::Read).address);
        let read = signals.channel_mut(Bus::Read);
        read.ready = self.ready;
        read.data = data;
        Ok(())
    }

    fn rising_edge(&mut self, signals: &Signals) -> HarnessResult<()> {
        if signals.in_reset() {
            *self = Self::new(self.map);
            return Ok(());
        }
        let write = *signals.channel(Bus::Write);
        let read = *signals.channel(Bus::Read);
        let (mut a, mut b, mut y) = (self.a, self.b, self.y);

        if self.ready && read.enable && read.address == self.map.y_data && y.is_some() {
            debug!("OR model: Y consumed");
            y = None;
        }
        if let (Some(a_val), Some(b_val), None) = (self.a, self.b, y) {
            y = Some(a_val | b_val);
            a = None;
            b = None;
        }
        if self.ready && write.enable {
            if write.address == self.map.a_data && self.a.is_none() {
                a = Some(write.data);
            } else if write.address == self.map.b_data && self.b.is_none() {
                b = Some(write.data);
            } else {
                debug!(
                    "OR model: dropped write of {} to address {}",
                    write.data, write.address
                );
            }
        }

        self.a = a;
        self.b = b;
        self.y = y;
        self.ready = true;
        Ok(())
    }
}
