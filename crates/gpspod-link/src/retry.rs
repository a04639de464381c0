use std::time::Duration;

use tracing::warn;

/// Bounded retry with a fixed delay between attempts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Failures tolerated; the next one is fatal.
    pub max_failures: u32,
    /// Pause after a failed attempt, and between consecutive block requests.
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_failures: 10,
            delay: Duration::from_millis(10),
        }
    }
}

/// Outcome classification of one failed attempt.
#[derive(Debug)]
pub enum Attempt<E> {
    /// Worth another try; counted against the budget.
    Retry(E),
    /// Give up now.
    Fatal(E),
}

#[derive(Debug, PartialEq, Eq)]
pub enum RetryError<E> {
    /// The budget ran out; `last` is the failure that exceeded it.
    Exhausted { failures: u32, last: E },
    Fatal(E),
}

/// A failure budget that can be shared across many operations.
#[derive(Debug, Clone)]
pub struct RetryBudget {
    policy: RetryPolicy,
    failures: u32,
}

impl RetryBudget {
    pub fn new(policy: RetryPolicy) -> Self {
        Self {
            policy,
            failures: 0,
        }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Failures recorded so far.
    pub fn failures(&self) -> u32 {
        self.failures
    }

    pub fn remaining(&self) -> u32 {
        self.policy.max_failures.saturating_sub(self.failures)
    }

    /// Run `op` until it succeeds, fails fatally, or the budget is exceeded.
    pub fn run<T, E>(
        &mut self,
        mut op: impl FnMut() -> Result<T, Attempt<E>>,
    ) -> Result<T, RetryError<E>>
    where
        E: std::fmt::Display,
    {
        loop {
            match op() {
                Ok(value) => return Ok(value),
                Err(Attempt::Fatal(err)) => return Err(RetryError::Fatal(err)),
                Err(Attempt::Retry(err)) => {
                    self.failures += 1;
                    if self.failures > self.policy.max_failures {
                        return Err(RetryError::Exhausted {
                            failures: self.failures,
                            last: err,
                        });
                    }
                    warn!(
                        failures = self.failures,
                        max = self.policy.max_failures,
                        %err,
                        "retrying"
                    );
                    if !self.policy.delay.is_zero() {
                        std::thread::sleep(self.policy.delay);
                    }
                }
            }
        }
    }
}

/// Run `op` with a fresh budget from `policy`.
pub fn retry<T, E: std::fmt::Display>(
    policy: &RetryPolicy,
    op: impl FnMut() -> Result<T, Attempt<E>>,
) -> Result<T, RetryError<E>> {
    RetryBudget::new(policy.clone()).run(op)
}
