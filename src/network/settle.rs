//! Waiting for newly created interfaces
//!
//! After the switch creates a bridge or port, the kernel needs a moment
//! before the interface is visible. Rather than sleeping for a fixed time,
//! check with exponential backoff and stop as soon as the link shows up.
//! Each wait takes the caller's own cancel flag, so aborting one operation
//! leaves every other one alone.

use crate::error::{Error, Result};
use crate::manifest::SettleConfig;
use crate::network::kernel::KernelInterface;
use chrono_machines::{BackoffStrategy, ExponentialBackoff};
use rand::rng;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};
use tracing::debug;

/// Bounded, cancellable poll for interface visibility
#[derive(Debug, Clone)]
pub struct Settle {
    config: SettleConfig,
}

impl Settle {
    pub fn new(config: SettleConfig) -> Self {
        Self { config }
    }

    fn backoff(&self) -> ExponentialBackoff {
        ExponentialBackoff::new()
            .base_delay_ms(self.config.base_delay_ms)
            .max_delay_ms(self.config.max_delay_ms)
            .multiplier(self.config.multiplier)
            .max_attempts(self.config.max_attempts)
            .jitter_factor(self.config.jitter_factor)
    }

    /// Block until `name` is visible to the kernel
    ///
    /// `cancel` is checked before every check.
    pub fn wait_for_link(
        &self,
        kernel: &dyn KernelInterface,
        name: &str,
        cancel: &AtomicBool,
    ) -> Result<()> {
        let backoff = self.backoff();
        let timeout = Duration::from_millis(self.config.timeout_ms);
        let started = Instant::now();
        let mut rng = rng();
        let mut attempt: u8 = 0;

        loop {
            if cancel.load(Ordering::SeqCst) {
                return Err(Error::Cancelled(name.to_string()));
            }

            attempt = attempt.saturating_add(1);
            if kernel.link_exists(name)? {
                debug!(interface = name, attempt, "interface is visible");
                return Ok(());
            }

            let elapsed = started.elapsed();
            let remaining = timeout.saturating_sub(elapsed);
            let delay = backoff
                .delay(attempt, &mut rng)
                .map(Duration::from_millis)
                .filter(|_| !remaining.is_zero());

            match delay {
                Some(delay) => {
                    debug!(
                        interface = name,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        "interface not visible yet"
                    );
                    thread::sleep(delay.min(remaining));
                }
                None => {
                    return Err(Error::SettleTimeout {
                        interface: name.to_string(),
                        waited_ms: elapsed.as_millis() as u64,
                    });
                }
            }
        }
    }
}
