// Copyright 2026 Cornell University
// released under MIT License

//! # Bus drivers
//! A driver owns one handshake channel and performs exactly one transaction
//! per `send`. The returned operation walks through the handshake:
//! wait for `ready`, drive, sample at the settle point, commit on the rising
//! edge, then release the bus in the next time step.

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use log::{debug, info};

use crate::errors::HarnessResult;
use crate::scheduler::{Operation, Progress, SimContext, Trigger};
use crate::signals::Bus;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Write,
    Read,
}

/// A single handshake, only ever logged
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transaction {
    pub direction: Direction,
    pub bus: Bus,
    pub address: u64,
    /// `None` for a read that has not sampled yet
    pub value: Option<u64>,
}

impl fmt::Display for Transaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let dir = match self.direction {
            Direction::Write => "write",
            Direction::Read => "read",
        };
        match self.value {
            Some(value) => write!(f, "{dir} {value} @ {} on {}", self.address, self.bus),
            None => write!(f, "{dir} ? @ {} on {}", self.address, self.bus),
        }
    }
}

/// Consumer of values sampled by a verifying read
pub trait ResultSink {
    fn accept(&mut self, value: u64) -> HarnessResult<()>;
}

/// Shared handle through which a `ReadDriver` reaches its sink
pub type SinkHandle = Rc<RefCell<dyn ResultSink>>;

/// Discards every value
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl ResultSink for NullSink {
    fn accept(&mut self, value: u64) -> HarnessResult<()> {
        debug!("discarding result {value}");
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Start,
    Drive,
    Sample,
    Commit,
    Release,
}

/// A handshake in progress, finishing with the data word it transferred.
/// Writes drive `data` together with `enable`; reads sample it at the settle
/// point and, when verifying, forward it to their sink.
pub struct Handshake {
    txn: Transaction,
    sink: Option<SinkHandle>,
    phase: Phase,
}

impl Handshake {
    fn new(txn: Transaction, sink: Option<SinkHandle>) -> Self {
        Self {
            txn,
            sink,
            phase: Phase::Start,
        }
    }

    fn sample(&mut self, cx: &SimContext<'_>) -> HarnessResult<()> {
        let value = cx.channel(self.txn.bus).data;
        self.txn.value = Some(value);
        match &self.sink {
            Some(sink) => sink.borrow_mut().accept(value),
            None => Ok(()),
        }
    }
}

impl Operation for Handshake {
    type Output = u64;

    fn resume(&mut self, cx: &mut SimContext<'_>) -> HarnessResult<Progress<u64>> {
        let bus = self.txn.bus;
        loop {
            match self.phase {
                Phase::Start => {
                    self.phase = Phase::Drive;
                    if !cx.channel(bus).ready {
                        debug!("t={}: {} waits for ready", cx.now(), self.txn);
                        return Ok(Progress::Wait(Trigger::ReadyRise(bus)));
                    }
                }
                Phase::Drive => {
                    cx.set_enable(bus, true)?;
                    cx.set_address(bus, self.txn.address)?;
                    if let (Direction::Write, Some(value)) = (self.txn.direction, self.txn.value) {
                        cx.set_data(bus, value)?;
                    }
                    self.phase = Phase::Sample;
                    return Ok(Progress::Wait(Trigger::ReadOnly));
                }
                Phase::Sample => {
                    if self.txn.direction == Direction::Read {
                        self.sample(cx)?;
                    }
                    self.phase = Phase::Commit;
                    return Ok(Progress::Wait(Trigger::RisingEdge));
                }
                Phase::Commit => {
                    info!("t={}: {}", cx.now(), self.txn);
                    cx.set_enable(bus, false)?;
                    self.phase = Phase::Release;
                    return Ok(Progress::Wait(Trigger::NextTimeStep));
                }
                Phase::Release => return Ok(Progress::Done(self.txn.value.unwrap_or_default())),
            }
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct WriteDriver {
    bus: Bus,
}

impl WriteDriver {
    pub fn new(bus: Bus) -> Self {
        Self { bus }
    }

    pub fn send(&self, value: u64, address: u64) -> Handshake {
        let txn = Transaction {
            direction: Direction::Write,
            bus: self.bus,
            address,
            value: Some(value),
        };
        Handshake::new(txn, None)
    }
}

#[derive(Clone)]
pub struct ReadDriver {
    bus: Bus,
    sink: SinkHandle,
}

impl ReadDriver {
    pub fn new(bus: Bus, sink: SinkHandle) -> Self {
        Self { bus, sink }
    }

    /// With `verify` the sampled value is forwarded to the sink
    pub fn send(&self, address: u64, verify: bool) -> Handshake {
        let txn = Transaction {
            direction: Direction::Read,
            bus: self.bus,
            address,
            value: None,
        };
        Handshake::new(txn, verify.then(|| self.sink.clone()))
    }
}
