// Copyright 2026 Cornell University
// released under MIT License

//! # Passive bus monitor
//! Samples `enable`/`ready` of one bus once per clock cycle, after the
//! falling edge once signals have settled, and classifies the handshake
//! code into a protocol state.

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use clap::ValueEnum;
use log::{debug, warn};

use crate::errors::{HarnessError, HarnessResult};
use crate::scheduler::{Operation, Process, Progress, SimContext, Trigger};
use crate::signals::Bus;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ProtocolState {
    /// `enable=0, ready=0`
    Idle,
    /// `enable=0, ready=1`
    Rdy,
    /// `enable=1, ready=1`
    Txn,
}

impl ProtocolState {
    pub const ALL: [ProtocolState; 3] = [ProtocolState::Idle, ProtocolState::Rdy, ProtocolState::Txn];

    /// Maps a handshake code `enable << 1 | ready` to its state.
    /// Code 2 (`enable` without `ready`) has no state.
    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(ProtocolState::Idle),
            1 => Some(ProtocolState::Rdy),
            3 => Some(ProtocolState::Txn),
            _ => None,
        }
    }
}

impl fmt::Display for ProtocolState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ProtocolState::Idle => "IDLE",
            ProtocolState::Rdy => "RDY",
            ProtocolState::Txn => "TXN",
        };
        write!(f, "{name}")
    }
}

/// Two consecutive protocol states of one bus
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StateSample {
    pub bus: Bus,
    pub time: u64,
    pub previous: ProtocolState,
    pub current: ProtocolState,
}

/// What the monitor does when it samples `enable=1, ready=0`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum UnmappedCodePolicy {
    /// Abort the run with a protocol violation
    #[default]
    Reject,
    /// Treat the sample as `TXN` and log a warning
    FoldIntoTxn,
}

/// Receives every sample a monitor takes
pub trait SampleObserver {
    fn observe(&mut self, sample: &StateSample);
}

pub type ObserverHandle = Rc<RefCell<dyn SampleObserver>>;

impl SampleObserver for Vec<StateSample> {
    fn observe(&mut self, sample: &StateSample) {
        self.push(*sample);
    }
}

pub struct BusMonitor {
    bus: Bus,
    policy: UnmappedCodePolicy,
    previous: ProtocolState,
    observers: Vec<ObserverHandle>,
    phase: MonitorPhase,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MonitorPhase {
    Start,
    /// resumed by a falling edge
    Edge,
    /// resumed at the settle point after the edge
    Settled,
}

impl BusMonitor {
    pub fn new(bus: Bus, policy: UnmappedCodePolicy) -> Self {
        Self {
            bus,
            policy,
            previous: ProtocolState::Idle,
            observers: vec![],
            phase: MonitorPhase::Start,
        }
    }

    pub fn with_observer(mut self, observer: ObserverHandle) -> Self {
        self.observers.push(observer);
        self
    }

    fn classify(&self, code: u8, time: u64) -> HarnessResult<ProtocolState> {
        match (ProtocolState::from_code(code), self.policy) {
            (Some(state), _) => Ok(state),
            (None, UnmappedCodePolicy::Reject) => Err(HarnessError::ProtocolViolation {
                bus: self.bus,
                time,
                code,
            }),
            (None, UnmappedCodePolicy::FoldIntoTxn) => {
                warn!(
                    "t={}: {} bus shows handshake code {}, counted as {}",
                    time,
                    self.bus,
                    code,
                    ProtocolState::Txn
                );
                Ok(ProtocolState::Txn)
            }
        }
    }

    fn sample(&mut self, cx: &SimContext<'_>) -> HarnessResult<()> {
        let code = cx.channel(self.bus).code();
        let current = self.classify(code, cx.now())?;
        let sample = StateSample {
            bus: self.bus,
            time: cx.now(),
            previous: self.previous,
            current,
        };
        debug!(
            "t={}: {} bus {} -> {}",
            sample.time, self.bus, sample.previous, sample.current
        );
        for observer in &self.observers {
            observer.borrow_mut().observe(&sample);
        }
        self.previous = current;
        Ok(())
    }
}

impl Operation for BusMonitor {
    type Output = ();

    fn resume(&mut self, cx: &mut SimContext<'_>) -> HarnessResult<Progress<()>> {
        match self.phase {
            MonitorPhase::Start => {
                self.phase = MonitorPhase::Edge;
                Ok(Progress::Wait(Trigger::FallingEdge))
            }
            MonitorPhase::Edge => {
                self.phase = MonitorPhase::Settled;
                Ok(Progress::Wait(Trigger::ReadOnly))
            }
            MonitorPhase::Settled => {
                self.sample(cx)?;
                self.phase = MonitorPhase::Edge;
                Ok(Progress::Wait(Trigger::FallingEdge))
            }
        }
    }
}

impl Process for BusMonitor {
    fn name(&self) -> String {
        format!("monitor-{}", self.bus)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::WriteDriver;
    use crate::dut::testing::EchoDut;
    use crate::scheduler::testing::RunAll;
    use crate::scheduler::{ClockConfig, Scheduler};
    use ProtocolState::*;

    /// Drives `enable` without ever looking at `ready`
    struct ForceEnable {
        started: bool,
    }

    impl Operation for ForceEnable {
        type Output = ();

        fn resume(&mut self, cx: &mut SimContext<'_>) -> HarnessResult<Progress<()>> {
            if self.started {
                return Ok(Progress::Done(()));
            }
            self.started = true;
            cx.set_enable(Bus::Write, true)?;
            Ok(Progress::Wait(Trigger::Timer(30)))
        }
    }

    impl Process for ForceEnable {
        fn name(&self) -> String {
            "force-enable".to_string()
        }
    }

    fn monitored(
        dut: EchoDut,
        policy: UnmappedCodePolicy,
        main: Box<dyn Process>,
    ) -> (HarnessResult<()>, Vec<StateSample>) {
        let samples = Rc::new(RefCell::new(Vec::<StateSample>::new()));
        let mut sched = Scheduler::new(Box::new(dut), ClockConfig::default());
        sched.spawn_daemon(Box::new(
            BusMonitor::new(Bus::Write, policy).with_observer(samples.clone()),
        ));
        sched.spawn(main);
        let res = sched.run().map(|_| ());
        let samples = samples.borrow().clone();
        (res, samples)
    }

    #[test]
    fn codes_map_to_states() {
        assert_eq!(ProtocolState::from_code(0), Some(Idle));
        assert_eq!(ProtocolState::from_code(1), Some(Rdy));
        assert_eq!(ProtocolState::from_code(2), None);
        assert_eq!(ProtocolState::from_code(3), Some(Txn));
        assert_eq!(Txn.to_string(), "TXN");
    }

    #[test]
    fn samples_a_write_handshake() {
        let dut = EchoDut::new().ready_after(2);
        let (run, _) = RunAll::new(vec![
            Box::new(WriteDriver::new(Bus::Write).send(1, 4)) as Box<dyn Operation<Output = u64>>
        ]);
        let (res, samples) = monitored(dut, UnmappedCodePolicy::Reject, Box::new(run));
        res.unwrap();

        let seen: Vec<_> = samples
            .iter()
            .map(|s| (s.time, s.previous, s.current))
            .collect();
        assert_eq!(seen, vec![(10, Idle, Idle), (20, Idle, Txn), (30, Txn, Rdy)]);
        // each current state becomes the next previous state
        for pair in samples.windows(2) {
            assert_eq!(pair[0].current, pair[1].previous);
        }
    }

    #[test]
    fn enable_without_ready_is_a_violation() {
        let dut = EchoDut::new().ready_after(u64::MAX);
        let (res, samples) = monitored(
            dut,
            UnmappedCodePolicy::Reject,
            Box::new(ForceEnable { started: false }),
        );
        assert_eq!(
            res,
            Err(HarnessError::ProtocolViolation {
                bus: Bus::Write,
                time: 10,
                code: 2
            })
        );
        assert!(samples.is_empty());
    }

    #[test]
    fn unmapped_code_can_be_folded_into_txn() {
        let dut = EchoDut::new().ready_after(u64::MAX);
        let (res, samples) = monitored(
            dut,
            UnmappedCodePolicy::FoldIntoTxn,
            Box::new(ForceEnable { started: false }),
        );
        res.unwrap();
        assert_eq!(samples.len(), 3);
        assert_eq!(samples[0].previous, Idle);
        assert!(samples.iter().all(|s| s.current == Txn));
    }
}
