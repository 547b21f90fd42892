// Copyright 2026 Cornell University
// released under MIT License

use std::fmt;

use crate::diagnostic::{DiagnosticHandler, Level, SourceLoc};
use crate::signals::Bus;
use thiserror::Error;

/// Everything that can abort a running scenario.
/// None of these are retried: the first one raised ends the run.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HarnessError {
    /// The monitor saw `enable=1, ready=0`, which has no protocol state
    #[error(
        "protocol violation on the {bus} bus at t={time}ns: handshake code {code} (enable=1, ready=0) is not a protocol state"
    )]
    ProtocolViolation { bus: Bus, time: u64, code: u8 },

    /// The status poller gave up
    #[error("timed out after {attempts} attempts waiting for status=1 at address {address}")]
    StatusTimeout { address: u64, attempts: u32 },

    /// An observed output disagrees with the head of the expectation queue
    #[error("scoreboard mismatch at output #{index}: expected {expected}, got {actual}")]
    ScoreboardMismatch {
        index: usize,
        expected: u64,
        actual: u64,
    },

    /// An output was checked after all expectations were consumed
    #[error("scoreboard received output {actual} but the expectation queue is empty ({checked} outputs already matched)")]
    EmptyExpectationQueue { actual: u64, checked: usize },

    /// A process tried to drive a signal while signals are being sampled
    #[error("`{process}` attempted to drive `{signal}` during the read-only phase at t={time}ns")]
    ReadOnlyWrite {
        process: String,
        signal: &'static str,
        time: u64,
    },

    /// A process resumed in the read-only phase asked to wait for it again
    #[error("`{process}` waited for the read-only phase from inside it at t={time}ns")]
    ReadOnlyReentry { process: String, time: u64 },

    /// The clock ran for more rising edges than the configured budget
    #[error("reached the maximum number of clock cycles: {0}")]
    MaxCyclesReached(u64),

    /// Signals kept waking processes without settling
    #[error("signals did not settle after {deltas} delta cycles at t={time}ns")]
    DeltaLimit { time: u64, deltas: u32 },

    /// Failure reported by the simulator backing the DUT
    #[error("simulator error: {0}")]
    Simulator(String),
}

pub type HarnessResult<T> = Result<T, HarnessError>;

/// Coarse classification of a `HarnessError`, used when reporting
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    ProtocolViolation,
    Timeout,
    Scoreboard,
    Harness,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FailureKind::ProtocolViolation => "protocol violation",
            FailureKind::Timeout => "timeout",
            FailureKind::Scoreboard => "scoreboard",
            FailureKind::Harness => "harness",
        };
        f.write_str(name)
    }
}

impl HarnessError {
    pub fn kind(&self) -> FailureKind {
        match self {
            HarnessError::ProtocolViolation { .. } => FailureKind::ProtocolViolation,
            HarnessError::StatusTimeout { .. } => FailureKind::Timeout,
            HarnessError::ScoreboardMismatch { .. }
            | HarnessError::EmptyExpectationQueue { .. } => FailureKind::Scoreboard,
            HarnessError::ReadOnlyWrite { .. }
            | HarnessError::ReadOnlyReentry { .. }
            | HarnessError::MaxCyclesReached(_)
            | HarnessError::DeltaLimit { .. }
            | HarnessError::Simulator(_) => FailureKind::Harness,
        }
    }
}

pub struct DiagnosticEmitter;

impl DiagnosticEmitter {
    /// Reports a scenario failure. When the failing operation came from a
    /// stimulus file, the diagnostic points at it.
    pub fn emit_harness_error(
        handler: &mut DiagnosticHandler,
        error: &HarnessError,
        loc: Option<SourceLoc>,
    ) {
        let label = match error {
            HarnessError::ScoreboardMismatch {
                expected, actual, ..
            } => format!("expected {expected}, got {actual}"),
            HarnessError::EmptyExpectationQueue { actual, .. } => {
                format!("no expectation left for output {actual}")
            }
            HarnessError::StatusTimeout { address, .. } => {
                format!("status register {address} never reported 1")
            }
            _ => error.to_string(),
        };
        match loc {
            Some(loc) => handler.emit_diagnostic_span(&error.to_string(), &label, loc, Level::Error),
            None => handler.emit_general_message(&error.to_string(), Level::Error),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_messages_name_the_failing_check() {
        let timeout = HarnessError::StatusTimeout {
            address: 2,
            attempts: 50,
        };
        assert_eq!(
            timeout.to_string(),
            "timed out after 50 attempts waiting for status=1 at address 2"
        );
        assert_eq!(timeout.kind(), FailureKind::Timeout);

        let mismatch = HarnessError::ScoreboardMismatch {
            index: 1,
            expected: 0,
            actual: 1,
        };
        assert_eq!(
            mismatch.to_string(),
            "scoreboard mismatch at output #1: expected 0, got 1"
        );
        assert_eq!(mismatch.kind(), FailureKind::Scoreboard);

        let violation = HarnessError::ProtocolViolation {
            bus: Bus::Read,
            time: 30,
            code: 2,
        };
        assert!(violation.to_string().starts_with("protocol violation on the read bus at t=30ns"));
    }

    #[test]
    fn failure_kinds_group_errors() {
        let deltas = HarnessError::DeltaLimit {
            time: 5,
            deltas: 1000,
        };
        assert_eq!(deltas.kind(), FailureKind::Harness);
        let violation = HarnessError::ProtocolViolation {
            bus: Bus::Write,
            time: 10,
            code: 2,
        };
        assert_eq!(violation.kind().to_string(), "protocol violation");
        let empty = HarnessError::EmptyExpectationQueue {
            actual: 1,
            checked: 4,
        };
        assert_eq!(empty.kind().to_string(), "scoreboard");
    }
}
