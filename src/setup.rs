// Copyright 2026 Cornell University
// released under MIT License

use std::cell::RefCell;
use std::rc::Rc;

use clap::ValueEnum;
use log::{error, info, warn};

use crate::coverage::{CoverageModel, CoverageRecorder, CoverageReport};
use crate::diagnostic::{DiagnosticHandler, Level};
use crate::driver::{NullSink, ReadDriver, SinkHandle, WriteDriver};
use crate::dut::Dut;
use crate::errors::{DiagnosticEmitter, HarnessResult};
use crate::monitor::{BusMonitor, UnmappedCodePolicy};
use crate::poller::{PollPolicy, StatusPoller};
use crate::scheduler::{ClockConfig, RunSummary, Scheduler};
use crate::scoreboard::Scoreboard;
use crate::sequence::{AddressMap, Sequencer, Stimulus};
use crate::signals::Bus;

/// Where verifying reads send their values
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum SinkKind {
    /// Compare against the expected outputs
    #[default]
    Scoreboard,
    /// Only record the outputs in the coverage model
    CoverageRecorder,
    /// Discard the outputs
    Null,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HarnessConfig {
    pub clock: ClockConfig,
    /// Full clock periods the reset is held for, 0 skips the reset sequence
    pub reset_cycles: u32,
    pub poll: PollPolicy,
    /// Delay between two iterations of a generated sequence in ns
    pub gap: u64,
    pub unmapped: UnmappedCodePolicy,
    pub sink: SinkKind,
    pub map: AddressMap,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            clock: ClockConfig::default(),
            reset_cycles: 2,
            poll: PollPolicy::default(),
            gap: 2,
            unmapped: UnmappedCodePolicy::default(),
            sink: SinkKind::default(),
            map: AddressMap::default(),
        }
    }
}

/// Outcome of one scenario
#[derive(Debug)]
pub struct ScenarioReport {
    pub outcome: HarnessResult<RunSummary>,
    /// Index of the stimulus step that was executing when the run failed
    pub failed_step: Option<usize>,
    /// Outputs that matched an expectation
    pub matched: usize,
    /// Expectations never checked
    pub unchecked: usize,
    pub coverage: CoverageReport,
}

impl ScenarioReport {
    pub fn passed(&self) -> bool {
        self.outcome.is_ok()
    }

    /// Reports the failure (pointing at the failing step if it came from a
    /// file) and any expectations that were never checked
    pub fn emit(&self, handler: &mut DiagnosticHandler, stimulus: &Stimulus) {
        if let Err(err) = &self.outcome {
            let loc = self
                .failed_step
                .and_then(|idx| stimulus.steps().get(idx))
                .and_then(|step| step.loc);
            DiagnosticEmitter::emit_harness_error(handler, err, loc);
        }
        if self.unchecked > 0 {
            let msg = format!("{} expectation(s) left unchecked", self.unchecked);
            handler.emit_general_message(&msg, Level::Warning);
        }
    }
}

/// Wires drivers, monitors, scoreboard and coverage around a DUT
pub struct Testbench {
    config: HarnessConfig,
    scoreboard: Rc<RefCell<Scoreboard>>,
    coverage: Rc<RefCell<CoverageModel>>,
}

impl Testbench {
    pub fn new(config: HarnessConfig, expected: impl IntoIterator<Item = u64>) -> Self {
        Self {
            config,
            scoreboard: Rc::new(RefCell::new(Scoreboard::new(expected))),
            coverage: Rc::new(RefCell::new(CoverageModel::new())),
        }
    }

    pub fn coverage(&self) -> Rc<RefCell<CoverageModel>> {
        self.coverage.clone()
    }

    fn sink(&self) -> SinkHandle {
        match self.config.sink {
            SinkKind::Scoreboard => self.scoreboard.clone(),
            SinkKind::CoverageRecorder => {
                Rc::new(RefCell::new(CoverageRecorder::new(self.coverage.clone())))
            }
            SinkKind::Null => Rc::new(RefCell::new(NullSink)),
        }
    }

    /// Resets `dut`, executes `stimulus` and monitors both buses until the
    /// last step is done or the first failure
    pub fn run(&mut self, dut: Box<dyn Dut + '_>, stimulus: &Stimulus) -> ScenarioReport {
        let mut scheduler = Scheduler::new(dut, self.config.clock);
        for bus in Bus::ALL {
            let monitor =
                BusMonitor::new(bus, self.config.unmapped).with_observer(self.coverage.clone());
            scheduler.spawn_daemon(Box::new(monitor));
        }

        let reader = ReadDriver::new(Bus::Read, self.sink());
        let poller = StatusPoller::new(reader.clone(), self.config.poll);
        let mut sequencer = Sequencer::new(
            stimulus.clone(),
            WriteDriver::new(Bus::Write),
            reader,
            poller,
            self.coverage.clone(),
        )
        .with_scoreboard(self.scoreboard.clone());
        if self.config.reset_cycles > 0 {
            sequencer = sequencer.with_reset(self.config.reset_cycles);
        }
        let progress = sequencer.progress();
        scheduler.spawn(Box::new(sequencer));

        let outcome = scheduler.run();
        let failed_step = match &outcome {
            Ok(summary) => {
                info!(
                    "Scenario passed at t={}ns after {} cycles",
                    summary.end_time, summary.cycles
                );
                None
            }
            Err(e) => {
                error!(
                    "Scenario failed at t={}ns ({}): {}",
                    scheduler.now(),
                    e.kind(),
                    e
                );
                progress.get()
            }
        };

        let scoreboard = self.scoreboard.borrow();
        if outcome.is_ok() && !scoreboard.is_drained() {
            warn!(
                "{} expectation(s) were never checked",
                scoreboard.remaining()
            );
        }
        ScenarioReport {
            outcome,
            failed_step,
            matched: scoreboard.matched(),
            unchecked: scoreboard.remaining(),
            coverage: self.coverage.borrow().report(),
        }
    }
}

#[cfg(test)]
mod tests {
    use strip_ansi_escapes::strip_str;

    use super::*;
    use crate::dut::OrDeviceModel;
    use crate::errors::HarnessError;
    use crate::sequence::random_pairs;
    use crate::sim::{Design, PatronusDut, PortNames};
    use crate::stimulus_parser::parse_stimulus;
    use crate::yosys::require_yosys;

    const A: [u64; 4] = [0, 0, 1, 1];
    const B: [u64; 4] = [0, 1, 0, 1];

    fn run_or_device(config: HarnessConfig, expected: &[u64]) -> ScenarioReport {
        let stimulus = Stimulus::logic_pairs(&A, &B, &config.map, config.gap);
        let dut = OrDeviceModel::new(config.map);
        Testbench::new(config, expected.iter().copied()).run(Box::new(dut), &stimulus)
    }

    #[test]
    fn or_device_produces_the_expected_outputs() {
        let report = run_or_device(HarnessConfig::default(), &[0, 1, 1, 1]);
        assert!(report.passed(), "{:?}", report.outcome);
        assert_eq!(report.matched, 4);
        assert_eq!(report.unchecked, 0);

        let inputs = report.coverage.group("inputs").unwrap();
        assert_eq!(inputs.coverage, 100.0);
        assert!(inputs.bins.iter().all(|b| b.hits == 1));
        // both buses went through idle, ready and transfer cycles
        for name in ["write_states", "read_states"] {
            let group = report.coverage.group(name).unwrap();
            let hits = |bin: &str| group.bins.iter().find(|b| b.bin == bin).unwrap().hits;
            assert!(hits("(IDLE, IDLE)") > 0, "{name}");
            assert!(hits("(RDY, TXN)") > 0, "{name}");
            assert!(hits("(TXN, RDY)") > 0, "{name}");
        }
    }

    #[test]
    fn wrong_expectation_fails_at_the_first_mismatch() {
        let report = run_or_device(HarnessConfig::default(), &[0, 0, 1, 1]);
        assert_eq!(
            report.outcome,
            Err(HarnessError::ScoreboardMismatch {
                index: 1,
                expected: 0,
                actual: 1
            })
        );
        assert_eq!(report.matched, 1);
        // the `check` of the second iteration
        assert_eq!(report.failed_step, Some(14));
    }

    #[test]
    fn missing_expectations_fail() {
        let report = run_or_device(HarnessConfig::default(), &[0, 1]);
        assert_eq!(
            report.outcome,
            Err(HarnessError::EmptyExpectationQueue {
                actual: 1,
                checked: 2
            })
        );
    }

    #[test]
    fn leftover_expectations_are_reported() {
        let report = run_or_device(HarnessConfig::default(), &[0, 1, 1, 1, 0]);
        assert!(report.passed());
        assert_eq!(report.unchecked, 1);

        let mut handler = DiagnosticHandler::default();
        report.emit(&mut handler, &Stimulus::new());
        insta::assert_snapshot!(strip_str(handler.error_string()), @"Warning: 1 expectation(s) left unchecked");
    }

    #[test]
    fn coverage_recorder_sink_skips_checking() {
        let config = HarnessConfig {
            sink: SinkKind::CoverageRecorder,
            ..Default::default()
        };
        let report = run_or_device(config, &[]);
        assert!(report.passed());
        assert_eq!(report.matched, 0);
        let outputs = report.coverage.group("outputs").unwrap();
        assert_eq!(outputs.bins_hit, 2);
    }

    #[test]
    fn null_sink_discards_outputs() {
        let config = HarnessConfig {
            sink: SinkKind::Null,
            ..Default::default()
        };
        let report = run_or_device(config, &[7]);
        assert!(report.passed());
        assert_eq!((report.matched, report.unchecked), (0, 1));
        assert_eq!(report.coverage.group("outputs").unwrap().bins_hit, 0);
    }

    #[test]
    fn random_pairs_against_the_or_device() {
        let (a, b) = random_pairs(12, 42);
        let expected: Vec<u64> = a.iter().zip(&b).map(|(a, b)| a | b).collect();
        let config = HarnessConfig::default();
        let stimulus = Stimulus::logic_pairs(&a, &b, &config.map, config.gap);
        let mut tb = Testbench::new(config, expected);
        let report = tb.run(Box::new(OrDeviceModel::default()), &stimulus);
        assert!(report.passed(), "{:?}", report.outcome);
        assert_eq!(report.matched, 12);
    }

    #[test]
    fn failures_point_at_the_stimulus_file() {
        let mut handler = DiagnosticHandler::default();
        let src = "expect(1);\npoll(0); write(0, 4);\npoll(1); write(0, 5);\npoll(2);\ncheck(3);\n";
        let stimulus = parse_stimulus("wrong.tx", src, &mut handler).unwrap();
        let config = HarnessConfig::default();
        let mut tb = Testbench::new(config, Vec::<u64>::new());
        let report = tb.run(Box::new(OrDeviceModel::default()), &stimulus);
        assert_eq!(report.failed_step, Some(6));

        report.emit(&mut handler, &stimulus);
        let content = strip_str(handler.error_string());
        assert!(content.contains("scoreboard mismatch at output #0: expected 1, got 0"));
        assert!(content.contains("wrong.tx:5:1"));
        assert!(content.contains("expected 1, got 0"));
    }

    #[test]
    fn status_timeout_names_the_address() {
        let config = HarnessConfig {
            poll: PollPolicy {
                max_attempts: 5,
                retry_delay: 1,
            },
            ..Default::default()
        };
        // nothing is written, so Y never becomes valid
        let mut stimulus = Stimulus::new();
        stimulus.push(crate::sequence::BusOp::Poll { address: 2 });
        let mut tb = Testbench::new(config, Vec::<u64>::new());
        let report = tb.run(Box::new(OrDeviceModel::default()), &stimulus);
        assert_eq!(
            report.outcome,
            Err(HarnessError::StatusTimeout {
                address: 2,
                attempts: 5
            })
        );
        assert_eq!(report.failed_step, Some(0));
    }

    #[test]
    fn verilog_or_device() {
        if require_yosys().is_err() {
            return;
        }
        let design =
            Design::from_verilog(std::path::Path::new("tests/designs/or_dut.v"), Some("or_dut"))
                .unwrap();
        let dut = PatronusDut::new(&design, &PortNames::default()).unwrap();
        let config = HarnessConfig::default();
        let stimulus = Stimulus::logic_pairs(&A, &B, &config.map, config.gap);
        let mut tb = Testbench::new(config, [0, 1, 1, 1]);
        let report = tb.run(Box::new(dut), &stimulus);
        assert!(report.passed(), "{:?}", report.outcome);
        assert_eq!(report.matched, 4);
    }
}
