// Copyright 2026 Cornell University
// released under MIT License

pub mod coverage;
pub mod diagnostic;
pub mod driver;
pub mod dut;
pub mod errors;
pub mod monitor;
pub mod poller;
pub mod scheduler;
pub mod scoreboard;
pub mod sequence;
pub mod setup;
pub mod signals;
pub mod sim;
pub mod stimulus_parser;
mod yosys;

pub use yosys::{require_yosys, YosysError};
