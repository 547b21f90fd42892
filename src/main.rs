// Copyright 2026 Cornell University
// released under MIT License

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{ColorChoice, Parser};
use clap_verbosity_flag::{Verbosity, WarnLevel};
use log::{error, info};

use handshake_bench::diagnostic::{DiagnosticHandler, Level};
use handshake_bench::dut::{Dut, OrDeviceModel};
use handshake_bench::monitor::UnmappedCodePolicy;
use handshake_bench::poller::PollPolicy;
use handshake_bench::scheduler::ClockConfig;
use handshake_bench::sequence::{random_pairs, Stimulus};
use handshake_bench::setup::{HarnessConfig, SinkKind, Testbench};
use handshake_bench::sim::{Design, DesignError, PatronusDut, PortNames};
use handshake_bench::stimulus_parser::parse_stimulus_file;

/// Drives the ready/enable buses of a DUT, checks its outputs and reports coverage
#[derive(Parser, Debug)]
#[command(version, about, long_about = None, disable_version_flag = true)]
struct Cli {
    /// Path to a Verilog file, the built-in OR device model is used if omitted
    #[arg(long, value_name = "VERILOG_FILE")]
    verilog: Option<PathBuf>,

    /// Name of the top-level module (if one exists)
    #[arg(short, long, value_name = "MODULE_NAME")]
    module: Option<String>,

    /// Stimulus file, takes precedence over the generated input pairs
    #[arg(short, long, value_name = "STIMULUS_FILE")]
    stimulus: Option<PathBuf>,

    /// Values written to A, one per iteration
    #[arg(short, value_delimiter = ',', default_values_t = [0, 0, 1, 1])]
    a: Vec<u64>,

    /// Values written to B, one per iteration
    #[arg(short, value_delimiter = ',', default_values_t = [0, 1, 0, 1])]
    b: Vec<u64>,

    /// Expected outputs, defaults to `a | b` for generated pairs
    #[arg(long, value_delimiter = ',')]
    expected: Option<Vec<u64>>,

    /// Generate this many random input pairs instead of `-a`/`-b`
    #[arg(long, value_name = "COUNT")]
    random: Option<usize>,

    /// Seed for `--random`
    #[arg(long, default_value_t = 0)]
    seed: u64,

    /// Directory the coverage report is exported to as `coverage.json`
    #[arg(long, env = "HANDSHAKE_COVERAGE_DIR", value_name = "DIR")]
    coverage_dir: Option<PathBuf>,

    /// Clock period in nanoseconds, an even number of at least 2
    #[arg(long, default_value_t = 10, value_parser = clock_period)]
    clock_period: u64,

    /// Read attempts before a status poll times out
    #[arg(long, default_value_t = 50)]
    max_attempts: u32,

    /// Rising edges after which the run is aborted
    #[arg(long, default_value_t = 100_000)]
    max_cycles: u64,

    /// Full clock periods reset is held for, 0 skips the reset sequence
    #[arg(long, default_value_t = 2)]
    reset_cycles: u32,

    /// What to do when `enable` is sampled high while `ready` is low
    #[arg(long, value_enum, default_value_t = UnmappedCodePolicy::Reject)]
    unmapped: UnmappedCodePolicy,

    /// Where verified reads are sent
    #[arg(long, value_enum, default_value_t = SinkKind::Scoreboard)]
    sink: SinkKind,

    /// Whether diagnostics are colored
    #[arg(long, value_enum, default_value_t = ColorChoice::Auto)]
    color: ColorChoice,

    /// Users can specify `-v` or `--verbose` to toggle logging
    #[command(flatten)]
    verbosity: Verbosity<WarnLevel>,
}

impl Cli {
    fn config(&self) -> HarnessConfig {
        HarnessConfig {
            clock: ClockConfig {
                period: self.clock_period,
                max_cycles: self.max_cycles,
            },
            reset_cycles: self.reset_cycles,
            poll: PollPolicy {
                max_attempts: self.max_attempts,
                ..Default::default()
            },
            unmapped: self.unmapped,
            sink: self.sink,
            ..Default::default()
        }
    }

    /// Stimulus and expected outputs of the scenario
    fn scenario(
        &self,
        config: &HarnessConfig,
        handler: &mut DiagnosticHandler,
    ) -> Option<(Stimulus, Vec<u64>)> {
        if let Some(path) = &self.stimulus {
            return match parse_stimulus_file(path, handler) {
                Ok(stimulus) => Some((stimulus, self.expected.clone().unwrap_or_default())),
                Err(e) => {
                    error!("{}: {}", path.display(), e);
                    None
                }
            };
        }

        let (a, b) = match self.random {
            Some(count) => random_pairs(count, self.seed),
            None => (self.a.clone(), self.b.clone()),
        };
        if a.len() != b.len() {
            let msg = format!(
                "got {} values for A but {} values for B",
                a.len(),
                b.len()
            );
            handler.emit_general_message(&msg, Level::Error);
            return None;
        }
        let expected = match &self.expected {
            Some(expected) => expected.clone(),
            None => a.iter().zip(&b).map(|(a, b)| a | b).collect(),
        };
        let stimulus = Stimulus::logic_pairs(&a, &b, &config.map, config.gap);
        Some((stimulus, expected))
    }

    /// Loads the Verilog design, `Ok(None)` selects the OR device model
    fn design(&self) -> Result<Option<Design>, DesignError> {
        let Some(verilog) = &self.verilog else {
            return Ok(None);
        };
        let design = Design::from_verilog(verilog, self.module.as_deref())?;
        info!("Loaded design `{}` from {}", design.name(), verilog.display());
        Ok(Some(design))
    }
}

/// Both edges of the clock fall on whole nanoseconds
fn clock_period(s: &str) -> Result<u64, String> {
    let period: u64 = s.parse().map_err(|e| format!("{e}"))?;
    if period < ClockConfig::MIN_PERIOD {
        return Err(format!(
            "clock period must be at least {}ns",
            ClockConfig::MIN_PERIOD
        ));
    }
    if period % 2 != 0 {
        return Err("clock period must be an even number of nanoseconds".to_string());
    }
    Ok(period)
}

fn dut<'d>(
    design: Option<&'d Design>,
    config: &HarnessConfig,
) -> Result<Box<dyn Dut + 'd>, DesignError> {
    match design {
        Some(design) => Ok(Box::new(PatronusDut::new(design, &PortNames::default())?)),
        None => {
            info!("No Verilog file given, using the OR device model");
            Ok(Box::new(OrDeviceModel::new(config.map)))
        }
    }
}

/// Example (runs the OR device against a stimulus file with all logs enabled):
/// `cargo run -- --verilog tests/designs/or_dut.v -m or_dut -s tests/stimulus/or_gate.tx -vvv`
fn main() -> ExitCode {
    let cli = Cli::parse();

    // For concision, we disable timestamps in the log
    env_logger::Builder::new()
        .format_timestamp(None)
        .filter_level(cli.verbosity.log_level_filter())
        .init();

    let handler = &mut DiagnosticHandler::new(cli.color);
    let config = cli.config();

    let Some((stimulus, expected)) = cli.scenario(&config, handler) else {
        return ExitCode::FAILURE;
    };
    let design = match cli.design() {
        Ok(design) => design,
        Err(e) => {
            handler.emit_general_message(&e.to_string(), Level::Error);
            return ExitCode::FAILURE;
        }
    };
    let dut = match dut(design.as_ref(), &config) {
        Ok(dut) => dut,
        Err(e) => {
            handler.emit_general_message(&e.to_string(), Level::Error);
            return ExitCode::FAILURE;
        }
    };

    let mut testbench = Testbench::new(config, expected);
    let report = testbench.run(dut, &stimulus);
    report.emit(handler, &stimulus);

    print!("{}", report.coverage.render());
    if let Some(dir) = &cli.coverage_dir {
        if let Err(e) = testbench.coverage().borrow().export(dir) {
            handler.emit_general_message(&format!("failed to export coverage: {e}"), Level::Error);
            return ExitCode::FAILURE;
        }
    }

    if report.passed() {
        println!("PASS: {} output(s) matched", report.matched);
        ExitCode::SUCCESS
    } else {
        match &report.outcome {
            Err(e) => println!("FAIL: {}", e.kind()),
            Ok(_) => println!("FAIL"),
        }
        ExitCode::FAILURE
    }
}
