//! Upload relay health tracking.
//!
//! The relay is an optimization: it saves direct node round-trips in
//! exchange for a tip. When it faults, writes go straight to publishers until
//! the relay succeeds again or is reset explicitly.

use std::sync::atomic::{AtomicBool, Ordering};

use tracing::{info, warn};

use crate::config::RelayConfig;

#[derive(Debug)]
pub struct RelayManager {
    config: Option<RelayConfig>,
    degraded: AtomicBool,
}

impl RelayManager {
    pub fn new(config: Option<RelayConfig>) -> Self {
        Self {
            config,
            degraded: AtomicBool::new(false),
        }
    }

    pub fn is_configured(&self) -> bool {
        self.config.is_some()
    }

    pub fn is_degraded(&self) -> bool {
        self.degraded.load(Ordering::Relaxed)
    }

    /// True when a relay is configured and has not recently faulted.
    pub fn should_use_relay(&self) -> bool {
        self.is_configured() && !self.is_degraded()
    }

    /// The relay to write through right now, if any.
    pub fn active_relay(&self) -> Option<&RelayConfig> {
        self.config.as_ref().filter(|_| !self.is_degraded())
    }

    pub fn report_fault(&self) {
        if !self.degraded.swap(true, Ordering::Relaxed) {
            warn!("upload relay marked degraded, falling back to direct writes");
        }
    }

    pub fn report_success(&self) {
        self.clear("relay write succeeded");
    }

    pub fn reset(&self) {
        self.clear("relay reset");
    }

    fn clear(&self, reason: &str) {
        if self.degraded.swap(false, Ordering::Relaxed) {
            info!(reason, "upload relay healthy again");
        }
    }
}
