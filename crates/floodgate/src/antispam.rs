use crate::directory::ConnectionDirectory;
use crate::error::SpamError;
use crate::metrics::counters;
use crate::registry::Registry;
use floodgate_proto::{encode, MessageType};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Runtime on/off switch for captcha enforcement.
#[derive(Debug, Clone, Default)]
pub struct ChallengeSwitch(Arc<AtomicBool>);

impl ChallengeSwitch {
    /// Creates a switch in the given state.
    #[must_use]
    pub fn new(enabled: bool) -> Self {
        Self(Arc::new(AtomicBool::new(enabled)))
    }

    /// Returns `true` if captchas are enforced.
    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }

    /// Turns enforcement on or off.
    pub fn set(&self, enabled: bool) {
        self.0.store(enabled, Ordering::Relaxed);
    }
}

/// Delivery tally of one captcha fan-out.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FanOut {
    /// Connections that accepted the frame.
    pub delivered: usize,
    /// Connections whose send failed.
    pub failed: usize,
}

/// Result of charging an action.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// Enforcement is off; nothing was recorded.
    Disabled,
    /// Recorded; the source is still within its credit.
    Clear,
    /// Recorded; the source is now limited and its connections were asked
    /// to solve a captcha.
    Challenged(FanOut),
}

/// Per-source flood policy: accounting through a [`Registry`] and captcha
/// delivery through a [`ConnectionDirectory`].
pub struct AntiSpam {
    registry: Arc<Registry>,
    switch: ChallengeSwitch,
    directory: Arc<dyn ConnectionDirectory>,
}

impl AntiSpam {
    /// Creates the facade over an existing registry and directory.
    pub fn new(
        registry: Arc<Registry>,
        switch: ChallengeSwitch,
        directory: Arc<dyn ConnectionDirectory>,
    ) -> Self {
        Self {
            registry,
            switch,
            directory,
        }
    }

    /// Returns `true` if `ip` may post without solving a captcha.
    pub fn can_post(&self, ip: &str) -> bool {
        if !self.switch.is_enabled() {
            return true;
        }
        self.registry.get_or_create(ip).may_act_now()
    }

    /// Charges `cost` to `ip`.
    ///
    /// When the charge leaves the source limited, a captcha frame is pushed
    /// to every live connection of `ip`. Delivery failures are logged and
    /// counted but do not fail the call.
    ///
    /// # Errors
    ///
    /// Returns [`SpamError::SpamDetected`] if `ip` is flooding. No captcha
    /// is sent in that case; the caller should reject the action.
    pub fn increment_score(&self, ip: &str, cost: Duration) -> Result<Verdict, SpamError> {
        if !self.switch.is_enabled() {
            return Ok(Verdict::Disabled);
        }

        let throttle = self.registry.get_or_create(ip);
        let limited = match throttle.record_action(cost) {
            Ok(limited) => limited,
            Err(e) => {
                counters::spam_detected_total();
                warn!(ip = %ip, "spam detected");
                return Err(e);
            }
        };

        if !limited {
            return Ok(Verdict::Clear);
        }
        Ok(Verdict::Challenged(self.send_captcha(ip)))
    }

    /// Restores full credit to `ip`, e.g. after it solved a captcha.
    pub fn reset_score(&self, ip: &str) {
        if !self.switch.is_enabled() {
            return;
        }
        self.registry.get_or_create(ip).reset();
    }

    /// The enforcement switch.
    #[must_use]
    pub fn switch(&self) -> &ChallengeSwitch {
        &self.switch
    }

    /// The underlying registry.
    #[must_use]
    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    /// Forgets every tracked source. Only for resetting between tests.
    #[cfg(any(test, feature = "test-util"))]
    pub fn clear_all(&self) {
        self.registry.clear_all();
    }

    fn send_captcha(&self, ip: &str) -> FanOut {
        let mut tally = FanOut::default();

        let frame = match encode(MessageType::Captcha, &0u8) {
            Ok(frame) => frame,
            Err(e) => {
                warn!(ip = %ip, error = %e, "failed to encode captcha frame");
                counters::notifications_failed_total("encode");
                return tally;
            }
        };

        for client in self.directory.lookup(ip) {
            match client.send(&frame) {
                Ok(()) => tally.delivered += 1,
                Err(e) => {
                    debug!(ip = %ip, error = %e, "captcha not delivered");
                    counters::notifications_failed_total(e.reason());
                    tally.failed += 1;
                }
            }
        }

        counters::challenges_sent_total(tally.delivered);
        tally
    }
}

impl std::fmt::Debug for AntiSpam {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AntiSpam")
            .field("registry", &self.registry)
            .field("switch", &self.switch)
            .finish_non_exhaustive()
    }
}
