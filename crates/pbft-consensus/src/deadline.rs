//! Resettable one-shot timer for `select!` loops.

use std::future::pending;
use std::pin::Pin;
use std::time::Duration;
use tokio::time::{sleep, Instant, Sleep};

/// A cancellable deadline.
///
/// Arming an armed deadline moves it; disarming cancels any pending fire.
/// [`Deadline::fired`] never completes while disarmed.
#[derive(Debug)]
pub struct Deadline {
    sleep: Pin<Box<Sleep>>,
    armed: bool,
}

impl Deadline {
    /// Creates a disarmed deadline.
    pub fn new() -> Self {
        Self {
            sleep: Box::pin(sleep(Duration::ZERO)),
            armed: false,
        }
    }

    /// Fires `after` from now, replacing any pending fire.
    pub fn arm(&mut self, after: Duration) {
        self.sleep.as_mut().reset(Instant::now() + after);
        self.armed = true;
    }

    /// Cancels the pending fire.
    pub fn disarm(&mut self) {
        self.armed = false;
    }

    /// Returns true if a fire is pending.
    pub fn is_armed(&self) -> bool {
        self.armed
    }

    /// Completes when the deadline passes, then disarms it.
    ///
    /// Cancel safe.
    pub async fn fired(&mut self) {
        if !self.armed {
            pending::<()>().await;
        }
        self.sleep.as_mut().await;
        self.armed = false;
    }
}

impl Default for Deadline {
    fn default() -> Self {
        Self::new()
    }
}
