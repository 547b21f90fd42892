// Copyright 2026 Cornell University
// released under MIT License

//! # Discrete-event scheduler
//! Processes are explicit state machines that run until they hit a
//! [`Trigger`], at which point the scheduler parks them until the trigger
//! fires. A single thread interleaves all processes on one simulated timeline.
//!
//! Every time point is processed in the same order:
//! 1. the clock edge (if any) is applied; on a rising edge the DUT commits its
//!    sequential state using the inputs driven before the edge
//! 2. edge waiters, expired timers and next-time-step waiters are woken
//! 3. active region: ready processes run and may drive signals, the DUT settles,
//!    processes waiting for a `ready` rise are woken, repeat until quiet
//! 4. read-only region: processes waiting for settled signals are resumed; they
//!    may sample but not drive

use std::cmp::Reverse;
use std::collections::{BinaryHeap, VecDeque};

use log::{debug, error, info};

use crate::dut::Dut;
use crate::errors::{HarnessError, HarnessResult};
use crate::signals::{Bus, HandshakeChannel, Signals};

/// Upper bound on settle iterations within a single time point
const MAX_DELTAS: u32 = 1_000;

/// Something a suspended process waits for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    /// The next rising edge of the clock
    RisingEdge,
    /// The next falling edge of the clock
    FallingEdge,
    /// The next 0 -> 1 transition of `ready` on the given bus
    ReadyRise(Bus),
    /// The settle point of the current time step
    ReadOnly,
    /// The first region of the next time point with any activity
    NextTimeStep,
    /// A fixed delay in nanoseconds (a zero delay behaves like a 1ns delay)
    Timer(u64),
}

/// Result of resuming an operation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Progress<T> {
    Wait(Trigger),
    Done(T),
}

/// Scheduling region a process is resumed in
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Region {
    Active,
    ReadOnly,
}

/// A resumable piece of work. `resume` is called once to start the operation
/// and once more every time the trigger it last returned has fired.
pub trait Operation {
    type Output;

    fn resume(&mut self, cx: &mut SimContext<'_>) -> HarnessResult<Progress<Self::Output>>;
}

/// A top-level operation owned by the scheduler
pub trait Process: Operation<Output = ()> {
    fn name(&self) -> String;
}

/// The view of the simulation a process gets while it is running
pub struct SimContext<'s> {
    signals: &'s mut Signals,
    now: u64,
    region: Region,
    process: &'s str,
}

impl<'s> SimContext<'s> {
    pub fn new(signals: &'s mut Signals, now: u64, region: Region, process: &'s str) -> Self {
        Self {
            signals,
            now,
            region,
            process,
        }
    }

    /// Current simulation time in nanoseconds
    pub fn now(&self) -> u64 {
        self.now
    }

    pub fn region(&self) -> Region {
        self.region
    }

    pub fn signals(&self) -> &Signals {
        self.signals
    }

    pub fn channel(&self, bus: Bus) -> &HandshakeChannel {
        self.signals.channel(bus)
    }

    fn writable(&self, signal: &'static str) -> HarnessResult<()> {
        match self.region {
            Region::Active => Ok(()),
            Region::ReadOnly => Err(HarnessError::ReadOnlyWrite {
                process: self.process.to_string(),
                signal,
                time: self.now,
            }),
        }
    }

    pub fn set_enable(&mut self, bus: Bus, enable: bool) -> HarnessResult<()> {
        self.writable("enable")?;
        self.signals.channel_mut(bus).enable = enable;
        Ok(())
    }

    pub fn set_data(&mut self, bus: Bus, data: u64) -> HarnessResult<()> {
        self.writable("data")?;
        self.signals.channel_mut(bus).data = data;
        Ok(())
    }

    pub fn set_address(&mut self, bus: Bus, address: u64) -> HarnessResult<()> {
        self.writable("address")?;
        self.signals.channel_mut(bus).address = address;
        Ok(())
    }

    /// Drives the active-low reset line
    pub fn set_reset(&mut self, asserted: bool) -> HarnessResult<()> {
        self.writable("rst_n")?;
        self.signals.rst_n = !asserted;
        Ok(())
    }
}

/// Clock generation and run budget
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClockConfig {
    /// Clock period in nanoseconds, an even number of at least 2
    pub period: u64,
    /// Number of rising edges after which the run is aborted
    pub max_cycles: u64,
}

impl Default for ClockConfig {
    fn default() -> Self {
        Self {
            period: 10,
            max_cycles: 100_000,
        }
    }
}

impl ClockConfig {
    /// Smallest accepted clock period in nanoseconds
    pub const MIN_PERIOD: u64 = 2;

    fn half_period(&self) -> u64 {
        (self.period / 2).max(Self::MIN_PERIOD / 2)
    }
}

/// Statistics of a completed run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunSummary {
    /// Simulation time at which the last foreground process finished
    pub end_time: u64,
    /// Number of rising clock edges
    pub cycles: u64,
}

struct Thread {
    name: String,
    process: Box<dyn Process>,
    /// daemon threads do not keep the simulation alive
    daemon: bool,
}

pub struct Scheduler<'d> {
    dut: Box<dyn Dut + 'd>,
    signals: Signals,
    clock: ClockConfig,
    now: u64,
    cycles: u64,
    started: bool,
    /// Indexed by thread id, `None` once a thread has finished
    threads: Vec<Option<Thread>>,
    /// Number of unfinished non-daemon threads
    foreground: usize,
    /// The ready queue of the current region
    ready: VecDeque<usize>,
    rising: Vec<usize>,
    falling: Vec<usize>,
    ready_rise: [Vec<usize>; 2],
    read_only: Vec<usize>,
    next_step: Vec<usize>,
    /// (wake time, insertion order, thread id)
    timers: BinaryHeap<Reverse<(u64, u64, usize)>>,
    timer_seq: u64,
}

impl<'d> Scheduler<'d> {
    pub fn new(dut: Box<dyn Dut + 'd>, clock: ClockConfig) -> Self {
        Self {
            dut,
            signals: Signals::default(),
            clock,
            now: 0,
            cycles: 0,
            started: false,
            threads: vec![],
            foreground: 0,
            ready: VecDeque::new(),
            rising: vec![],
            falling: vec![],
            ready_rise: [vec![], vec![]],
            read_only: vec![],
            next_step: vec![],
            timers: BinaryHeap::new(),
            timer_seq: 0,
        }
    }

    /// Adds a process that the run waits for
    pub fn spawn(&mut self, process: Box<dyn Process>) -> usize {
        self.add_thread(process, false)
    }

    /// Adds a process that runs alongside the foreground processes but is
    /// dropped once they are all done
    pub fn spawn_daemon(&mut self, process: Box<dyn Process>) -> usize {
        self.add_thread(process, true)
    }

    fn add_thread(&mut self, process: Box<dyn Process>, daemon: bool) -> usize {
        let id = self.threads.len();
        let name = process.name();
        info!("Spawning thread {} `{}` (daemon={})", id, name, daemon);
        self.threads.push(Some(Thread {
            name,
            process,
            daemon,
        }));
        if !daemon {
            self.foreground += 1;
        }
        self.ready.push_back(id);
        id
    }

    pub fn now(&self) -> u64 {
        self.now
    }

    pub fn signals(&self) -> &Signals {
        &self.signals
    }

    /// Runs until every foreground process has finished.
    /// The first error raised by any process aborts the run.
    pub fn run(&mut self) -> HarnessResult<RunSummary> {
        if !self.started {
            self.dut.settle(&mut self.signals)?;
            self.started = true;
        }
        info!(
            "==== Starting run at t={}ns with {} foreground thread(s) ====",
            self.now, self.foreground
        );
        while self.foreground > 0 {
            self.run_time_step()?;
            if self.foreground == 0 {
                break;
            }
            self.advance_time()?;
        }
        info!(
            "No more foreground threads. Run complete at t={}ns after {} cycles.",
            self.now, self.cycles
        );
        Ok(RunSummary {
            end_time: self.now,
            cycles: self.cycles,
        })
    }

    fn run_time_step(&mut self) -> HarnessResult<()> {
        let mut deltas = 0;
        loop {
            while let Some(id) = self.ready.pop_front() {
                self.resume(id, Region::Active)?;
            }
            self.settle()?;
            if self.ready.is_empty() {
                break;
            }
            deltas += 1;
            if deltas >= MAX_DELTAS {
                return Err(HarnessError::DeltaLimit {
                    time: self.now,
                    deltas,
                });
            }
        }

        for id in std::mem::take(&mut self.read_only) {
            self.resume(id, Region::ReadOnly)?;
        }
        Ok(())
    }

    /// Lets the DUT settle and wakes processes whose `ready` went high
    fn settle(&mut self) -> HarnessResult<()> {
        let before = self.signals.ready_levels();
        self.dut.settle(&mut self.signals)?;
        let after = self.signals.ready_levels();
        for bus in Bus::ALL {
            let idx = bus.index();
            if !before[idx] && after[idx] && !self.ready_rise[idx].is_empty() {
                debug!("t={}: {} ready rose, waking {:?}", self.now, bus, self.ready_rise[idx]);
                self.ready.extend(std::mem::take(&mut self.ready_rise[idx]));
            }
        }
        Ok(())
    }

    fn advance_time(&mut self) -> HarnessResult<()> {
        let half = self.clock.half_period();
        let next_edge = (self.now / half + 1) * half;
        let next = match self.timers.peek() {
            Some(Reverse((at, _, _))) => (*at).min(next_edge),
            None => next_edge,
        };
        self.now = next;

        if next == next_edge {
            self.clock_edge()?;
        }
        while let Some(Reverse((at, _, id))) = self.timers.peek().copied() {
            if at > self.now {
                break;
            }
            self.timers.pop();
            self.ready.push_back(id);
        }
        self.ready.extend(std::mem::take(&mut self.next_step));
        Ok(())
    }

    fn clock_edge(&mut self) -> HarnessResult<()> {
        let rising = !self.signals.clk;
        self.signals.clk = rising;
        if rising {
            self.cycles += 1;
            if self.cycles > self.clock.max_cycles {
                return Err(HarnessError::MaxCyclesReached(self.clock.max_cycles));
            }
            self.dut.rising_edge(&self.signals)?;
            self.ready.extend(std::mem::take(&mut self.rising));
        } else {
            self.ready.extend(std::mem::take(&mut self.falling));
        }
        self.settle()
    }

    fn resume(&mut self, id: usize, region: Region) -> HarnessResult<()> {
        let Some(thread) = self.threads[id].as_mut() else {
            return Ok(());
        };
        let mut cx = SimContext::new(&mut self.signals, self.now, region, &thread.name);
        match thread.process.resume(&mut cx) {
            Ok(Progress::Wait(trigger)) => self.park(id, trigger, region),
            Ok(Progress::Done(())) => {
                self.finish(id);
                Ok(())
            }
            Err(e) => {
                error!("t={}: thread `{}` failed: {}", self.now, thread.name, e);
                Err(e)
            }
        }
    }

    fn park(&mut self, id: usize, trigger: Trigger, region: Region) -> HarnessResult<()> {
        match trigger {
            Trigger::RisingEdge => self.rising.push(id),
            Trigger::FallingEdge => self.falling.push(id),
            Trigger::ReadyRise(bus) => self.ready_rise[bus.index()].push(id),
            Trigger::ReadOnly => {
                if region == Region::ReadOnly {
                    let process = self.threads[id]
                        .as_ref()
                        .map(|t| t.name.clone())
                        .unwrap_or_default();
                    return Err(HarnessError::ReadOnlyReentry {
                        process,
                        time: self.now,
                    });
                }
                self.read_only.push(id)
            }
            Trigger::NextTimeStep => self.next_step.push(id),
            Trigger::Timer(delay) => {
                let at = self.now + delay.max(1);
                self.timers.push(Reverse((at, self.timer_seq, id)));
                self.timer_seq += 1;
            }
        }
        Ok(())
    }

    fn finish(&mut self, id: usize) {
        if let Some(thread) = self.threads[id].take() {
            info!("t={}: thread `{}` finished", self.now, thread.name);
            if !thread.daemon {
                self.foreground -= 1;
            }
        }
    }
}


#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::rc::Rc;

    use super::*;
    use crate::dut::testing::EchoDut;

    type Log = Rc<RefCell<Vec<(u64, Region)>>>;

    /// Waits for each trigger in turn, logging when it was resumed
    struct Script {
        triggers: Vec<Trigger>,
        idx: usize,
        log: Log,
    }

    impl Script {
        fn new(triggers: Vec<Trigger>) -> (Self, Log) {
            let log = Log::default();
            let script = Self {
                triggers,
                idx: 0,
                log: log.clone(),
            };
            (script, log)
        }
    }

    impl Operation for Script {
        type Output = ();

        fn resume(&mut self, cx: &mut SimContext<'_>) -> HarnessResult<Progress<()>> {
            if self.idx > 0 {
                self.log.borrow_mut().push((cx.now(), cx.region()));
            }
            self.idx += 1;
            match self.triggers.get(self.idx - 1) {
                Some(trigger) => Ok(Progress::Wait(*trigger)),
                None => Ok(Progress::Done(())),
            }
        }
    }

    impl Process for Script {
        fn name(&self) -> String {
            "script".to_string()
        }
    }

    /// Drives `enable` on the write bus in whatever region it is resumed in
    struct Driver {
        first: Trigger,
        started: bool,
    }

    impl Operation for Driver {
        type Output = ();

        fn resume(&mut self, cx: &mut SimContext<'_>) -> HarnessResult<Progress<()>> {
            if !self.started {
                self.started = true;
                return Ok(Progress::Wait(self.first));
            }
            cx.set_enable(Bus::Write, true)?;
            Ok(Progress::Done(()))
        }
    }

    impl Process for Driver {
        fn name(&self) -> String {
            "driver".to_string()
        }
    }

    fn times(log: &Log) -> Vec<u64> {
        log.borrow().iter().map(|(t, _)| *t).collect()
    }

    #[test]
    fn clock_edges_follow_the_period() {
        let mut sched = Scheduler::new(Box::new(EchoDut::new()), ClockConfig::default());
        let (rising, rising_log) = Script::new(vec![Trigger::RisingEdge; 3]);
        let (falling, falling_log) = Script::new(vec![Trigger::FallingEdge; 2]);
        sched.spawn(Box::new(rising));
        sched.spawn(Box::new(falling));
        let summary = sched.run().unwrap();
        assert_eq!(times(&rising_log), vec![5, 15, 25]);
        assert_eq!(times(&falling_log), vec![10, 20]);
        assert_eq!(summary.cycles, 3);
        assert_eq!(summary.end_time, 25);
    }

    #[test]
    fn timers_and_time_steps() {
        let mut sched = Scheduler::new(Box::new(EchoDut::new()), ClockConfig::default());
        let (script, log) = Script::new(vec![
            Trigger::Timer(3),
            Trigger::NextTimeStep,
            Trigger::Timer(0),
            Trigger::ReadOnly,
        ]);
        sched.spawn(Box::new(script));
        sched.run().unwrap();
        assert_eq!(
            *log.borrow(),
            vec![
                (3, Region::Active),
                (5, Region::Active),
                (6, Region::Active),
                (6, Region::ReadOnly)
            ]
        );
    }

    #[test]
    fn ready_rise_wakes_waiters() {
        let dut = EchoDut::new().ready_after(3);
        let mut sched = Scheduler::new(Box::new(dut), ClockConfig::default());
        let (script, log) = Script::new(vec![Trigger::ReadyRise(Bus::Read)]);
        sched.spawn(Box::new(script));
        sched.run().unwrap();
        assert_eq!(*log.borrow(), vec![(25, Region::Active)]);
        assert!(sched.signals().channel(Bus::Read).ready);
    }

    #[test]
    fn writes_are_rejected_while_sampling() {
        let mut sched = Scheduler::new(Box::new(EchoDut::new()), ClockConfig::default());
        sched.spawn(Box::new(Driver {
            first: Trigger::ReadOnly,
            started: false,
        }));
        let err = sched.run().unwrap_err();
        assert_eq!(
            err,
            HarnessError::ReadOnlyWrite {
                process: "driver".to_string(),
                signal: "enable",
                time: 0
            }
        );
    }

    #[test]
    fn writes_are_accepted_in_the_active_region() {
        let mut sched = Scheduler::new(Box::new(EchoDut::new()), ClockConfig::default());
        sched.spawn(Box::new(Driver {
            first: Trigger::RisingEdge,
            started: false,
        }));
        sched.run().unwrap();
        assert!(sched.signals().channel(Bus::Write).enable);
    }

    #[test]
    fn read_only_cannot_be_reentered() {
        let mut sched = Scheduler::new(Box::new(EchoDut::new()), ClockConfig::default());
        let (script, _) = Script::new(vec![Trigger::ReadOnly, Trigger::ReadOnly]);
        sched.spawn(Box::new(script));
        assert!(matches!(
            sched.run(),
            Err(HarnessError::ReadOnlyReentry { time: 0, .. })
        ));
    }

    #[test]
    fn cycle_budget_is_enforced() {
        // ready never rises, so the waiter would hang forever
        let dut = EchoDut::new().ready_after(u64::MAX);
        let clock = ClockConfig {
            period: 10,
            max_cycles: 20,
        };
        let mut sched = Scheduler::new(Box::new(dut), clock);
        let (script, _) = Script::new(vec![Trigger::ReadyRise(Bus::Write)]);
        sched.spawn(Box::new(script));
        assert_eq!(sched.run(), Err(HarnessError::MaxCyclesReached(20)));
    }

    #[test]
    fn daemons_do_not_keep_the_run_alive() {
        let mut sched = Scheduler::new(Box::new(EchoDut::new()), ClockConfig::default());
        let (daemon, daemon_log) = Script::new(vec![Trigger::FallingEdge; 100]);
        let (main, _) = Script::new(vec![Trigger::RisingEdge; 2]);
        sched.spawn_daemon(Box::new(daemon));
        sched.spawn(Box::new(main));
        let summary = sched.run().unwrap();
        assert_eq!(summary.end_time, 15);
        assert_eq!(times(&daemon_log), vec![10]);
    }
}
