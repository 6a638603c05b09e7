use crate::error::SpamError;
use parking_lot::RwLock;
use std::time::{Duration, Instant};

/// Most posting credit an idle source can bank.
pub const CREDIT_CAP: Duration = Duration::from_secs(60);
/// Lead over real time past which a source is treated as automated.
pub const ABUSE_LEAD: Duration = Duration::from_secs(10 * 60);

/// The earliest schedule a source may hold at `now`.
fn credit_floor(now: Instant) -> Instant {
    now.checked_sub(CREDIT_CAP).unwrap_or(now)
}

/// Virtual-schedule throttle for a single source.
///
/// The schedule is the instant up to which the source still owes processing
/// time. Every action pushes it forward by its cost and idle time lets real
/// time catch up with it, so the throttle drains without a refill tick. A
/// source whose schedule lies in the future is limited; one whose schedule
/// leads real time by more than [`ABUSE_LEAD`] is flooding.
#[derive(Debug)]
pub struct Throttle {
    schedule: RwLock<Instant>,
}

impl Throttle {
    /// Creates a throttle holding one full [`CREDIT_CAP`] of credit.
    #[must_use]
    pub fn new() -> Self {
        Self::new_at(Instant::now())
    }

    /// Creates a throttle as if first seen at `now`.
    #[must_use]
    pub fn new_at(now: Instant) -> Self {
        Self {
            schedule: RwLock::new(credit_floor(now)),
        }
    }

    /// Returns `true` if the source owes no time and may act now.
    #[must_use]
    pub fn may_act_now(&self) -> bool {
        self.may_act_at(Instant::now())
    }

    /// Returns `true` if the schedule lies strictly before `now`.
    #[must_use]
    pub fn may_act_at(&self, now: Instant) -> bool {
        *self.schedule.read() < now
    }

    /// Charges `cost` to the source.
    ///
    /// Returns `Ok(true)` if the source is now limited and should be
    /// challenged.
    ///
    /// # Errors
    ///
    /// Returns [`SpamError::SpamDetected`] once the schedule leads real time
    /// by more than [`ABUSE_LEAD`]. The charge is kept.
    pub fn record_action(&self, cost: Duration) -> Result<bool, SpamError> {
        self.record_action_at(cost, Instant::now())
    }

    /// Charges `cost` to the source as of `now`.
    ///
    /// # Errors
    ///
    /// See [`Throttle::record_action`].
    pub fn record_action_at(&self, cost: Duration, now: Instant) -> Result<bool, SpamError> {
        let mut schedule = self.schedule.write();

        if now.saturating_duration_since(*schedule) > CREDIT_CAP {
            *schedule = credit_floor(now);
        }
        *schedule = schedule
            .checked_add(cost)
            .ok_or(SpamError::SpamDetected)?;

        if schedule.saturating_duration_since(now) > ABUSE_LEAD {
            return Err(SpamError::SpamDetected);
        }
        Ok(*schedule > now)
    }

    /// Restores full credit, e.g. after a solved captcha.
    pub fn reset(&self) {
        self.reset_at(Instant::now());
    }

    /// Restores full credit as of `now`.
    pub fn reset_at(&self, now: Instant) {
        *self.schedule.write() = credit_floor(now);
    }

    /// Returns `true` if the schedule has trailed `now` by more than `idle`.
    ///
    /// Blocks while an accounting call holds the schedule.
    #[must_use]
    pub fn is_idle_at(&self, now: Instant, idle: Duration) -> bool {
        now.saturating_duration_since(*self.schedule.read()) > idle
    }
}

impl Default for Throttle {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TWENTY_SECS: Duration = Duration::from_secs(20);

    fn schedule_of(throttle: &Throttle) -> Instant {
        *throttle.schedule.read()
    }

    #[test]
    fn fresh_throttle_may_act() {
        let t0 = Instant::now();
        let throttle = Throttle::new_at(t0);
        assert!(throttle.may_act_at(t0));
        assert!(Throttle::new().may_act_now());
    }

    #[test]
    fn fresh_throttle_holds_one_minute_of_credit() {
        let t0 = Instant::now();
        let throttle = Throttle::new_at(t0);
        assert_eq!(t0.duration_since(schedule_of(&throttle)), CREDIT_CAP);
    }

    #[test]
    fn cheap_action_is_not_limited() {
        let t0 = Instant::now();
        let throttle = Throttle::new_at(t0);
        assert_eq!(throttle.record_action_at(Duration::from_secs(10), t0), Ok(false));
        assert!(throttle.may_act_at(t0));
    }

    #[test]
    fn burst_becomes_limited_once_schedule_passes_now() {
        let t0 = Instant::now();
        let throttle = Throttle::new_at(t0);

        let results: Vec<_> = (0..5)
            .map(|_| throttle.record_action_at(TWENTY_SECS, t0))
            .collect();

        assert_eq!(
            results,
            vec![Ok(false), Ok(false), Ok(false), Ok(true), Ok(true)]
        );
        assert!(!throttle.may_act_at(t0));
    }

    #[test]
    fn spam_detected_only_past_ten_minutes_ahead() {
        let t0 = Instant::now();
        let throttle = Throttle::new_at(t0);

        // 33 * 20s - 60s puts the schedule exactly ten minutes ahead
        for _ in 0..33 {
            assert!(throttle.record_action_at(TWENTY_SECS, t0).is_ok());
        }
        assert_eq!(schedule_of(&throttle).duration_since(t0), ABUSE_LEAD);

        assert_eq!(
            throttle.record_action_at(TWENTY_SECS, t0),
            Err(SpamError::SpamDetected)
        );
    }

    #[test]
    fn fortieth_rapid_action_is_spam() {
        let t0 = Instant::now();
        let throttle = Throttle::new_at(t0);

        let mut last = Ok(false);
        for _ in 0..40 {
            last = throttle.record_action_at(TWENTY_SECS, t0);
        }
        assert_eq!(last, Err(SpamError::SpamDetected));
    }

    #[test]
    fn spam_keeps_the_schedule_advanced() {
        let t0 = Instant::now();
        let throttle = Throttle::new_at(t0);
        let big = Duration::from_secs(12 * 60);

        assert_eq!(throttle.record_action_at(big, t0), Err(SpamError::SpamDetected));
        let after_first = schedule_of(&throttle);
        assert_eq!(after_first.duration_since(t0), big - CREDIT_CAP);

        // Repeat offenses compound
        assert_eq!(
            throttle.record_action_at(Duration::from_secs(1), t0),
            Err(SpamError::SpamDetected)
        );
        assert!(schedule_of(&throttle) > after_first);
        assert!(!throttle.may_act_at(t0));
    }

    #[test]
    fn idle_gap_over_one_minute_behaves_like_fresh() {
        let t0 = Instant::now();
        let throttle = Throttle::new_at(t0);
        for _ in 0..5 {
            let _ = throttle.record_action_at(TWENTY_SECS, t0);
        }

        let t1 = t0 + Duration::from_secs(10 * 60);
        let fresh = Throttle::new_at(t1);
        assert_eq!(
            throttle.record_action_at(TWENTY_SECS, t1),
            fresh.record_action_at(TWENTY_SECS, t1)
        );
        assert_eq!(schedule_of(&throttle), schedule_of(&fresh));
    }

    #[test]
    fn recent_history_within_a_minute_still_counts() {
        let t0 = Instant::now();
        let throttle = Throttle::new_at(t0);
        for _ in 0..5 {
            let _ = throttle.record_action_at(TWENTY_SECS, t0);
        }
        // Schedule sits at t0 + 40s; ten seconds later it is still owed
        let t1 = t0 + Duration::from_secs(50);
        assert_eq!(throttle.record_action_at(TWENTY_SECS, t1), Ok(true));
    }

    #[test]
    fn idle_relief_clears_a_flooding_source() {
        let t0 = Instant::now();
        let throttle = Throttle::new_at(t0);
        let _ = throttle.record_action_at(Duration::from_secs(11 * 60), t0);

        // Schedule sits at t0 + 10min; wait it out plus the credit cap
        let t1 = t0 + Duration::from_secs(10 * 60) + CREDIT_CAP + Duration::from_secs(1);
        assert_eq!(throttle.record_action_at(TWENTY_SECS, t1), Ok(false));
    }

    #[test]
    fn reset_restores_posting() {
        let t0 = Instant::now();
        let throttle = Throttle::new_at(t0);
        let _ = throttle.record_action_at(Duration::from_secs(11 * 60), t0);
        assert!(!throttle.may_act_at(t0));

        throttle.reset_at(t0);
        assert!(throttle.may_act_at(t0));
        assert_eq!(throttle.record_action_at(TWENTY_SECS, t0), Ok(false));
    }

    #[test]
    fn reset_uses_the_wall_clock() {
        let throttle = Throttle::new();
        let _ = throttle.record_action(Duration::from_secs(5 * 60));
        assert!(!throttle.may_act_now());

        throttle.reset();
        assert!(throttle.may_act_now());
    }

    #[test]
    fn idleness_is_measured_from_the_schedule() {
        let t0 = Instant::now();
        let throttle = Throttle::new_at(t0);
        let fifteen = Duration::from_secs(15 * 60);

        // Created with a minute of credit, so fourteen minutes later it is idle
        assert!(!throttle.is_idle_at(t0 + Duration::from_secs(13 * 60), fifteen));
        assert!(throttle.is_idle_at(t0 + Duration::from_secs(14 * 60 + 1), fifteen));

        // A schedule in the future is never idle
        let _ = throttle.record_action_at(Duration::from_secs(5 * 60), t0);
        assert!(!throttle.is_idle_at(t0, Duration::ZERO));
    }
}
