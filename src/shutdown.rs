//! Ordered, deadline-bounded teardown of the telemetry pipeline.

use std::sync::mpsc::{self, RecvTimeoutError};
use std::thread;
use std::time::{Duration, Instant};

use crate::error::{BoxError, ShutdownError, StepError, StepFailure};

/// Minimum wait granted to a step that starts after the deadline has passed.
const OVERRUN_GRACE: Duration = Duration::from_millis(100);

type Teardown = Box<dyn FnOnce() -> Result<(), BoxError> + Send + 'static>;

/// Teardown callables in registration order.
///
/// Consumed by [`ShutdownRegistry::shutdown`], which runs them last-in first-out.
#[derive(Default)]
pub struct ShutdownRegistry {
    steps: Vec<(&'static str, Teardown)>,
}

impl std::fmt::Debug for ShutdownRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShutdownRegistry")
            .field("steps", &self.steps())
            .finish()
    }
}

impl ShutdownRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a named teardown step.
    pub fn register<F, E>(&mut self, step: &'static str, teardown: F)
    where
        F: FnOnce() -> Result<(), E> + Send + 'static,
        E: Into<BoxError>,
    {
        self.steps
            .push((step, Box::new(move || teardown().map_err(Into::into))));
    }

    /// Step names in registration order.
    pub fn steps(&self) -> Vec<&'static str> {
        self.steps.iter().map(|(name, _)| *name).collect()
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Run every step in reverse order, giving the whole run `timeout`.
    ///
    /// # Errors
    ///
    /// Returns every step failure, including steps that missed the deadline.
    pub fn shutdown(self, timeout: Duration) -> Result<(), ShutdownError> {
        self.shutdown_until(Instant::now() + timeout)
    }

    /// Run every step in reverse order until `deadline`.
    ///
    /// A failing step never prevents later ones from running. A step still
    /// running at the deadline is reported as [`StepError::DeadlineExceeded`]
    /// and left to finish on its own thread. Steps after it still run one at a
    /// time in reverse order; each waits until the deadline or for a short
    /// grace period, whichever is longer, so an overrun does not turn into
    /// concurrent teardown of the remaining providers.
    ///
    /// # Errors
    ///
    /// Returns every step failure, in the order the steps ran.
    pub fn shutdown_until(self, deadline: Instant) -> Result<(), ShutdownError> {
        let failures: Vec<StepFailure> = self
            .steps
            .into_iter()
            .rev()
            .filter_map(|(step, teardown)| {
                let cause = run_step(step, teardown, deadline).err()?;
                tracing::warn!(step, error = %cause, "telemetry teardown step failed");
                Some(StepFailure { step, cause })
            })
            .collect();

        if failures.is_empty() {
            Ok(())
        } else {
            Err(ShutdownError { failures })
        }
    }
}

fn run_step(step: &'static str, teardown: Teardown, deadline: Instant) -> Result<(), StepError> {
    let (tx, rx) = mpsc::sync_channel(1);

    thread::Builder::new()
        .name(format!("otel-shutdown-{step}"))
        .spawn(move || {
            // The receiver is gone if the deadline already passed.
            let _ = tx.send(teardown());
        })
        .map_err(|e| StepError::Failed(e.into()))?;

    let wait = deadline
        .saturating_duration_since(Instant::now())
        .max(OVERRUN_GRACE);
    match rx.recv_timeout(wait) {
        Ok(result) => result.map_err(StepError::Failed),
        Err(RecvTimeoutError::Timeout) => Err(StepError::DeadlineExceeded),
        Err(RecvTimeoutError::Disconnected) => Err(StepError::Panicked),
    }
}
