// Copyright 2026 Cornell University
// released under MIT License

use std::collections::VecDeque;

use log::{debug, info};

use crate::driver::ResultSink;
use crate::errors::{HarnessError, HarnessResult};

/// In-order comparison of observed outputs against golden values
#[derive(Debug, Clone, Default)]
pub struct Scoreboard {
    expected: VecDeque<u64>,
    matched: usize,
}

impl Scoreboard {
    pub fn new(expected: impl IntoIterator<Item = u64>) -> Self {
        Self {
            expected: expected.into_iter().collect(),
            matched: 0,
        }
    }

    pub fn push_expected(&mut self, value: u64) {
        self.expected.push_back(value);
    }

    /// Compares `actual` with the oldest outstanding expectation and consumes it
    pub fn check(&mut self, actual: u64) -> HarnessResult<()> {
        let Some(expected) = self.expected.pop_front() else {
            return Err(HarnessError::EmptyExpectationQueue {
                actual,
                checked: self.matched,
            });
        };
        if expected != actual {
            return Err(HarnessError::ScoreboardMismatch {
                index: self.matched,
                expected,
                actual,
            });
        }
        debug!("output #{} matched: {}", self.matched, actual);
        self.matched += 1;
        Ok(())
    }

    /// Number of outputs that matched so far
    pub fn matched(&self) -> usize {
        self.matched
    }

    /// Expectations that have not been checked yet
    pub fn remaining(&self) -> usize {
        self.expected.len()
    }

    pub fn is_drained(&self) -> bool {
        self.expected.is_empty()
    }
}

impl ResultSink for Scoreboard {
    fn accept(&mut self, value: u64) -> HarnessResult<()> {
        self.check(value)?;
        info!("scoreboard: output {} OK ({} remaining)", value, self.remaining());
        Ok(())
    }
}
