//! Blocking retry and poll loops for use inside an action's work.
//!
//! Both loops run on the calling worker thread and sleep through [Cancellation::sleep], so an
//! operator interrupt ends the wait at the next attempt boundary rather than after the full
//! budget has been spent. Neither loop ever interrupts an attempt that is already underway.

use crate::core::cluster::Cancellation;
use std::time::{Duration, Instant};
use thiserror::Error;

/// The run was cancelled before the next attempt could start.
#[derive(Clone, Copy, Debug, Error, PartialEq, Eq)]
#[error("cancelled")]
pub struct Cancelled;

/// A [Poll] exhausted its attempt or time budget without observing its condition.
#[derive(Clone, Copy, Debug, Error, PartialEq, Eq)]
#[error("timed out after {attempts} attempt(s) in {elapsed:?}")]
pub struct PollTimeout {
    pub attempts: u32,
    pub elapsed: Duration,
}

/// Runs a fallible operation up to `attempts` times with a fixed sleep between attempts.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Retry {
    pub attempts: u32,
    pub backoff: Duration,
}

impl Retry {
    /// Calls `attempt` with the 1-based attempt number until it succeeds or the budget runs out.
    ///
    /// Returns the last error once every attempt has failed. A [Cancelled] error from `attempt`
    /// ends the loop immediately, as does cancellation of the run between attempts.
    pub fn run<T>(
        &self,
        cancellation: &Cancellation,
        mut attempt: impl FnMut(u32) -> anyhow::Result<T>,
    ) -> anyhow::Result<T> {
        let attempts = self.attempts.max(1);

        let mut n = 1;

        loop {
            if cancellation.is_cancelled() {
                return Err(Cancelled.into());
            }

            match attempt(n) {
                Ok(value) => return Ok(value),
                Err(err) if err.is::<Cancelled>() => return Err(err),
                Err(err) if n >= attempts => {
                    return Err(err.context(format!("failed after {n} attempt(s)")));
                }
                Err(err) => {
                    tracing::debug!("attempt {n} of {attempts} failed: {err:#}");
                    cancellation.sleep(self.backoff)?;
                    n += 1;
                }
            }
        }
    }
}

/// Evaluates a condition on a fixed period until it holds.
///
/// The condition is evaluated once immediately and then once per `period`. The poll gives up
/// with [PollTimeout] as soon as either `attempts` evaluations have come back false or waiting
/// another `period` would take the total past `timeout`, whichever happens first.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Poll {
    pub attempts: u32,
    pub period: Duration,
    pub timeout: Duration,
}

impl Poll {
    /// Waits for `condition` to return `Ok(true)`. An error from `condition` ends the wait.
    pub fn wait_for(
        &self,
        cancellation: &Cancellation,
        condition: impl FnMut() -> anyhow::Result<bool>,
    ) -> anyhow::Result<()> {
        self.poll(cancellation, condition)
    }

    /// Like [Self::wait_for], but an error from `condition` counts as "not yet".
    ///
    /// Useful while a transport is still coming up and any attempt to use it may fail.
    pub fn wait_for_lenient(
        &self,
        cancellation: &Cancellation,
        mut condition: impl FnMut() -> anyhow::Result<bool>,
    ) -> anyhow::Result<()> {
        self.poll(cancellation, || match condition() {
            Ok(held) => Ok(held),
            Err(err) => {
                tracing::debug!("condition not yet available: {err:#}");
                Ok(false)
            }
        })
    }

    fn poll(
        &self,
        cancellation: &Cancellation,
        mut condition: impl FnMut() -> anyhow::Result<bool>,
    ) -> anyhow::Result<()> {
        let start = Instant::now();
        let mut attempts = 0;

        loop {
            if cancellation.is_cancelled() {
                return Err(Cancelled.into());
            }

            attempts += 1;
            if condition()? {
                return Ok(());
            }

            let elapsed = start.elapsed();
            if attempts >= self.attempts || elapsed + self.period > self.timeout {
                return Err(PollTimeout { attempts, elapsed }.into());
            }

            cancellation.sleep(self.period)?;
        }
    }
}
