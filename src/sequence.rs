// Copyright 2026 Cornell University
// released under MIT License

//! # Test sequences
//! A `Stimulus` is the ordered list of bus operations a scenario performs.
//! The `Sequencer` resets the DUT and then executes the operations strictly
//! one after the other.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::Rc;

use log::{debug, info, warn};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::coverage::CoverageModel;
use crate::diagnostic::SourceLoc;
use crate::driver::{Handshake, ReadDriver, WriteDriver};
use crate::errors::HarnessResult;
use crate::poller::{PollOp, StatusPoller};
use crate::scheduler::{Operation, Process, Progress, SimContext, Trigger};
use crate::scoreboard::Scoreboard;

/// Register addresses of the OR device
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AddressMap {
    /// reads 1 while input A can be written
    pub a_status: u64,
    /// reads 1 while input B can be written
    pub b_status: u64,
    /// reads 1 once an output is available
    pub y_status: u64,
    pub y_data: u64,
    pub a_data: u64,
    pub b_data: u64,
}

impl Default for AddressMap {
    fn default() -> Self {
        Self {
            a_status: 0,
            b_status: 1,
            y_status: 2,
            y_data: 3,
            a_data: 4,
            b_data: 5,
        }
    }
}

/// One step of a test sequence
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BusOp {
    /// Wait until the status register at `address` reads 1
    Poll { address: u64 },
    Write { value: u64, address: u64 },
    /// With `verify` the value is handed to the result sink
    Read { address: u64, verify: bool },
    /// Wait for the given number of nanoseconds
    Delay(u64),
    /// Append a golden value to the scoreboard
    Expect(u64),
    /// Sample the logical input pair for coverage
    CoverInputs { a: u64, b: u64 },
}

impl fmt::Display for BusOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BusOp::Poll { address } => write!(f, "poll({address})"),
            BusOp::Write { value, address } => write!(f, "write({value}, {address})"),
            BusOp::Read {
                address,
                verify: false,
            } => write!(f, "read({address})"),
            BusOp::Read {
                address,
                verify: true,
            } => write!(f, "check({address})"),
            BusOp::Delay(ns) => write!(f, "delay({ns})"),
            BusOp::Expect(value) => write!(f, "expect({value})"),
            BusOp::CoverInputs { a, b } => write!(f, "cover({a}, {b})"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Step {
    pub op: BusOp,
    /// where the operation was written down, if it came from a file
    pub loc: Option<SourceLoc>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Stimulus {
    steps: Vec<Step>,
}

impl Stimulus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, op: BusOp) {
        self.steps.push(Step { op, loc: None });
    }

    pub fn push_at(&mut self, op: BusOp, loc: SourceLoc) {
        self.steps.push(Step { op, loc: Some(loc) });
    }

    pub fn steps(&self) -> &[Step] {
        &self.steps
    }

    pub fn ops(&self) -> impl Iterator<Item = BusOp> + '_ {
        self.steps.iter().map(|s| s.op)
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Writes each `(a[i], b[i])` pair into the OR device and reads back the
    /// output with verification. Iterations are separated by `gap` ns.
    /// Extra elements of the longer slice are ignored.
    pub fn logic_pairs(a: &[u64], b: &[u64], map: &AddressMap, gap: u64) -> Self {
        let mut stimulus = Self::new();
        for (&a, &b) in a.iter().zip(b) {
            stimulus.push(BusOp::Poll {
                address: map.a_status,
            });
            stimulus.push(BusOp::Write {
                value: a,
                address: map.a_data,
            });
            stimulus.push(BusOp::Poll {
                address: map.b_status,
            });
            stimulus.push(BusOp::Write {
                value: b,
                address: map.b_data,
            });
            stimulus.push(BusOp::CoverInputs { a, b });
            stimulus.push(BusOp::Poll {
                address: map.y_status,
            });
            stimulus.push(BusOp::Read {
                address: map.y_data,
                verify: true,
            });
            stimulus.push(BusOp::Delay(gap));
        }
        stimulus
    }
}

/// `count` random bit pairs, reproducible through `seed`
pub fn random_pairs(count: usize, seed: u64) -> (Vec<u64>, Vec<u64>) {
    let mut rng = StdRng::seed_from_u64(seed);
    (0..count)
        .map(|_| (rng.gen_range(0..=1u64), rng.gen_range(0..=1u64)))
        .unzip()
}

/// Pulses the active-low reset: release, assert after 1ns, hold through the
/// first rising edge and `cycles` more after it, release and wait one more
/// edge. The first edge only completes the partial period the reset was
/// asserted in, so the reset always spans at least one full clock period.
#[derive(Debug)]
pub struct ResetOp {
    cycles: u32,
    held: u32,
    phase: ResetPhase,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ResetPhase {
    Start,
    Assert,
    Hold,
    Released,
}

impl ResetOp {
    pub fn new(cycles: u32) -> Self {
        Self {
            cycles: cycles.max(1),
            held: 0,
            phase: ResetPhase::Start,
        }
    }
}

impl Operation for ResetOp {
    type Output = ();

    fn resume(&mut self, cx: &mut SimContext<'_>) -> HarnessResult<Progress<()>> {
        match self.phase {
            ResetPhase::Start => {
                cx.set_reset(false)?;
                self.phase = ResetPhase::Assert;
                Ok(Progress::Wait(Trigger::Timer(1)))
            }
            ResetPhase::Assert => {
                info!("t={}: asserting reset", cx.now());
                cx.set_reset(true)?;
                self.phase = ResetPhase::Hold;
                Ok(Progress::Wait(Trigger::Timer(1)))
            }
            ResetPhase::Hold if self.held <= self.cycles => {
                self.held += 1;
                Ok(Progress::Wait(Trigger::RisingEdge))
            }
            ResetPhase::Hold => {
                info!("t={}: releasing reset", cx.now());
                cx.set_reset(false)?;
                self.phase = ResetPhase::Released;
                Ok(Progress::Wait(Trigger::RisingEdge))
            }
            ResetPhase::Released => Ok(Progress::Done(())),
        }
    }
}

#[derive(Debug)]
pub struct DelayOp {
    ns: u64,
    started: bool,
}

impl DelayOp {
    pub fn new(ns: u64) -> Self {
        Self { ns, started: false }
    }
}

impl Operation for DelayOp {
    type Output = ();

    fn resume(&mut self, _cx: &mut SimContext<'_>) -> HarnessResult<Progress<()>> {
        if self.started {
            Ok(Progress::Done(()))
        } else {
            self.started = true;
            Ok(Progress::Wait(Trigger::Timer(self.ns)))
        }
    }
}

enum Running {
    Reset(ResetOp),
    Poll(PollOp),
    Transfer(Handshake),
    Delay(DelayOp),
}

/// Resumes `op` and returns the trigger it waits for, `None` once it is done
fn pending<O: Operation>(op: &mut O, cx: &mut SimContext<'_>) -> HarnessResult<Option<Trigger>> {
    match op.resume(cx)? {
        Progress::Wait(trigger) => Ok(Some(trigger)),
        Progress::Done(_) => Ok(None),
    }
}

/// Index of the step currently executing, shared with whoever set up the run.
/// `None` until the first step starts.
pub type ProgressHandle = Rc<Cell<Option<usize>>>;

/// Foreground process executing a `Stimulus`
pub struct Sequencer {
    stimulus: Stimulus,
    writer: WriteDriver,
    reader: ReadDriver,
    poller: StatusPoller,
    coverage: Rc<RefCell<CoverageModel>>,
    scoreboard: Option<Rc<RefCell<Scoreboard>>>,
    running: Option<Running>,
    next: usize,
    progress: ProgressHandle,
}

impl Sequencer {
    pub fn new(
        stimulus: Stimulus,
        writer: WriteDriver,
        reader: ReadDriver,
        poller: StatusPoller,
        coverage: Rc<RefCell<CoverageModel>>,
    ) -> Self {
        Self {
            stimulus,
            writer,
            reader,
            poller,
            coverage,
            scoreboard: None,
            running: None,
            next: 0,
            progress: ProgressHandle::default(),
        }
    }

    /// Pulses reset for `cycles` rising edges before the first step
    pub fn with_reset(mut self, cycles: u32) -> Self {
        self.running = Some(Running::Reset(ResetOp::new(cycles)));
        self
    }

    /// Scoreboard that receives the values of `expect` steps
    pub fn with_scoreboard(mut self, scoreboard: Rc<RefCell<Scoreboard>>) -> Self {
        self.scoreboard = Some(scoreboard);
        self
    }

    pub fn progress(&self) -> ProgressHandle {
        self.progress.clone()
    }

    /// Starts the next step; steps that take no time are executed right away
    fn start_next(&mut self, cx: &SimContext<'_>) -> Option<Running> {
        while let Some(step) = self.stimulus.steps().get(self.next) {
            let op = step.op;
            self.progress.set(Some(self.next));
            debug!("t={}: step #{} {}", cx.now(), self.next, op);
            self.next += 1;
            let running = match op {
                BusOp::Poll { address } => Running::Poll(self.poller.wait_for_status(address)),
                BusOp::Write { value, address } => {
                    Running::Transfer(self.writer.send(value, address))
                }
                BusOp::Read { address, verify } => {
                    Running::Transfer(self.reader.send(address, verify))
                }
                BusOp::Delay(ns) => Running::Delay(DelayOp::new(ns)),
                BusOp::Expect(value) => {
                    match &self.scoreboard {
                        Some(scoreboard) => scoreboard.borrow_mut().push_expected(value),
                        None => warn!("no scoreboard attached, ignoring `{}`", op),
                    }
                    continue;
                }
                BusOp::CoverInputs { a, b } => {
                    self.coverage.borrow_mut().sample_inputs(a, b);
                    continue;
                }
            };
            return Some(running);
        }
        None
    }
}

impl Operation for Sequencer {
    type Output = ();

    fn resume(&mut self, cx: &mut SimContext<'_>) -> HarnessResult<Progress<()>> {
        loop {
            if self.running.is_none() {
                self.running = self.start_next(cx);
            }
            let Some(running) = &mut self.running else {
                info!("t={}: all {} steps done", cx.now(), self.stimulus.len());
                return Ok(Progress::Done(()));
            };
            let waiting = match running {
                Running::Reset(op) => pending(op, cx)?,
                Running::Poll(op) => pending(op, cx)?,
                Running::Transfer(op) => pending(op, cx)?,
                Running::Delay(op) => pending(op, cx)?,
            };
            match waiting {
                Some(trigger) => return Ok(Progress::Wait(trigger)),
                None => self.running = None,
            }
        }
    }
}

impl Process for Sequencer {
    fn name(&self) -> String {
        "sequencer".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::NullSink;
    use crate::dut::testing::{EchoDut, STATUS_ADDRESS};
    use crate::dut::OrDeviceModel;
    use crate::errors::HarnessError;
    use crate::poller::PollPolicy;
    use crate::scheduler::{ClockConfig, Scheduler};
    use crate::signals::Bus;

    fn sequencer(stimulus: Stimulus) -> Sequencer {
        let reader = ReadDriver::new(Bus::Read, Rc::new(RefCell::new(NullSink)));
        Sequencer::new(
            stimulus,
            WriteDriver::new(Bus::Write),
            reader.clone(),
            StatusPoller::new(reader, PollPolicy::default()),
            Rc::default(),
        )
    }

    #[test]
    fn logic_pairs_follow_the_register_protocol() {
        let map = AddressMap::default();
        let stimulus = Stimulus::logic_pairs(&[1], &[0], &map, 2);
        let ops: Vec<String> = stimulus.ops().map(|op| op.to_string()).collect();
        assert_eq!(
            ops,
            [
                "poll(0)",
                "write(1, 4)",
                "poll(1)",
                "write(0, 5)",
                "cover(1, 0)",
                "poll(2)",
                "check(3)",
                "delay(2)"
            ]
        );
        let four = Stimulus::logic_pairs(&[0, 0, 1, 1], &[0, 1, 0, 1], &map, 2);
        assert_eq!(four.len(), 32);
    }

    #[test]
    fn random_pairs_are_reproducible_bits() {
        let (a, b) = random_pairs(16, 7);
        assert_eq!((a.len(), b.len()), (16, 16));
        assert!(a.iter().chain(&b).all(|v| *v <= 1));
        assert_eq!(random_pairs(16, 7), (a, b));
    }

    #[test]
    fn reset_releases_the_device() {
        let mut sched = Scheduler::new(
            Box::new(OrDeviceModel::new(AddressMap::default())),
            ClockConfig::default(),
        );
        sched.spawn(Box::new(sequencer(Stimulus::new()).with_reset(2)));
        let summary = sched.run().unwrap();
        // asserted at 1ns, held over the edges at 5, 15 and 25, released at 25
        assert_eq!(summary.end_time, 35);
        assert!(!sched.signals().in_reset());
        assert!(sched.signals().channel(Bus::Write).ready);
        assert!(sched.signals().channel(Bus::Read).ready);
    }

    /// Records every change of the reset line as seen at the settle point
    struct ResetLog {
        sampling: bool,
        log: Rc<RefCell<Vec<(u64, bool)>>>,
    }

    impl Operation for ResetLog {
        type Output = ();

        fn resume(&mut self, cx: &mut SimContext<'_>) -> HarnessResult<Progress<()>> {
            if !self.sampling {
                self.sampling = true;
                return Ok(Progress::Wait(Trigger::ReadOnly));
            }
            let in_reset = cx.signals().in_reset();
            let mut log = self.log.borrow_mut();
            if log.last().map(|(_, r)| *r) != Some(in_reset) {
                log.push((cx.now(), in_reset));
            }
            self.sampling = false;
            Ok(Progress::Wait(Trigger::NextTimeStep))
        }
    }

    impl Process for ResetLog {
        fn name(&self) -> String {
            "reset-log".to_string()
        }
    }

    #[test]
    fn single_reset_cycle_spans_a_full_period() {
        let log = Rc::new(RefCell::new(vec![]));
        let mut sched = Scheduler::new(
            Box::new(OrDeviceModel::new(AddressMap::default())),
            ClockConfig::default(),
        );
        sched.spawn_daemon(Box::new(ResetLog {
            sampling: false,
            log: log.clone(),
        }));
        sched.spawn(Box::new(sequencer(Stimulus::new()).with_reset(1)));
        let summary = sched.run().unwrap();

        assert_eq!(*log.borrow(), vec![(0, false), (1, true), (15, false)]);
        assert_eq!(summary.end_time, 25);
        assert!(sched.signals().channel(Bus::Write).ready);
    }

    #[test]
    fn expect_steps_feed_the_scoreboard() {
        let mut stimulus = Stimulus::new();
        stimulus.push(BusOp::Expect(3));
        stimulus.push(BusOp::Expect(4));
        stimulus.push(BusOp::CoverInputs { a: 0, b: 1 });
        let scoreboard = Rc::new(RefCell::new(Scoreboard::default()));
        let seq = sequencer(stimulus).with_scoreboard(scoreboard.clone());
        let coverage = seq.coverage.clone();
        let mut sched = Scheduler::new(Box::new(EchoDut::new()), ClockConfig::default());
        sched.spawn(Box::new(seq));
        let summary = sched.run().unwrap();
        assert_eq!(summary.end_time, 0);
        assert_eq!(scoreboard.borrow().remaining(), 2);
        assert_eq!(coverage.borrow().inputs().hits(0, 1), 1);
    }

    #[test]
    fn progress_points_at_the_failing_step() {
        let mut stimulus = Stimulus::new();
        stimulus.push(BusOp::Write {
            value: 1,
            address: 4,
        });
        stimulus.push(BusOp::Poll {
            address: STATUS_ADDRESS,
        });
        stimulus.push(BusOp::Delay(5));
        let seq = sequencer(stimulus);
        let progress = seq.progress();
        let dut = EchoDut::new().status_after(None);
        let mut sched = Scheduler::new(Box::new(dut), ClockConfig::default());
        sched.spawn(Box::new(seq));
        assert!(matches!(
            sched.run(),
            Err(HarnessError::StatusTimeout { address: 7, .. })
        ));
        assert_eq!(progress.get(), Some(1));
    }
}
