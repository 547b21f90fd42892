// Copyright 2026 Cornell University
// released under MIT License

use log::{debug, info};

use crate::driver::{Handshake, ReadDriver};
use crate::errors::{HarnessError, HarnessResult};
use crate::scheduler::{Operation, Progress, SimContext, Trigger};

/// Bounds on how long a status register is polled
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollPolicy {
    /// Maximum number of status reads before giving up
    pub max_attempts: u32,
    /// Delay between two reads in nanoseconds
    pub retry_delay: u64,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 50,
            retry_delay: 1,
        }
    }
}

/// Repeatedly reads a status address until it reports `1`
#[derive(Clone)]
pub struct StatusPoller {
    reader: ReadDriver,
    policy: PollPolicy,
}

impl StatusPoller {
    pub fn new(reader: ReadDriver, policy: PollPolicy) -> Self {
        Self { reader, policy }
    }

    /// Finishes with the number of reads it took, or fails with a
    /// `StatusTimeout` naming `address` once `max_attempts` reads came back
    /// with anything other than 1
    pub fn wait_for_status(&self, address: u64) -> PollOp {
        PollOp {
            reader: self.reader.clone(),
            policy: self.policy,
            address,
            attempts: 0,
            read: None,
        }
    }
}

pub struct PollOp {
    reader: ReadDriver,
    policy: PollPolicy,
    address: u64,
    attempts: u32,
    /// the status read in flight
    read: Option<Handshake>,
}

impl Operation for PollOp {
    type Output = u32;

    fn resume(&mut self, cx: &mut SimContext<'_>) -> HarnessResult<Progress<u32>> {
        let Some(read) = &mut self.read else {
            self.attempts += 1;
            self.read = Some(self.reader.send(self.address, false));
            return self.resume(cx);
        };
        let status = match read.resume(cx)? {
            Progress::Wait(trigger) => return Ok(Progress::Wait(trigger)),
            Progress::Done(status) => status,
        };
        self.read = None;

        if status == 1 {
            info!(
                "t={}: status {} ready after {} read(s)",
                cx.now(),
                self.address,
                self.attempts
            );
            return Ok(Progress::Done(self.attempts));
        }
        if self.attempts >= self.policy.max_attempts {
            return Err(HarnessError::StatusTimeout {
                address: self.address,
                attempts: self.attempts,
            });
        }
        debug!(
            "t={}: status {} reads {}, retrying",
            cx.now(),
            self.address,
            status
        );
        Ok(Progress::Wait(Trigger::Timer(self.policy.retry_delay)))
    }
}
