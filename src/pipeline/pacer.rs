//! Producer pacing against a fixed schedule.
//!
//! Slot `n` is due at `t0 + n / rate`. Deadlines are always computed from
//! the start instant rather than from the previous slot, so lateness on one
//! slot never accumulates into drift on the following ones.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::{Duration, Instant};

/// What to do with a slot whose deadline has already passed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeadlinePolicy {
    /// Run the late slot immediately (effective rate stretches).
    #[default]
    Elastic,

    /// Skip every late slot; its sequence id is consumed and counted as a
    /// deadline drop.
    Skip,
}

impl fmt::Display for DeadlinePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeadlinePolicy::Elastic => f.write_str("elastic"),
            DeadlinePolicy::Skip => f.write_str("skip"),
        }
    }
}

impl FromStr for DeadlinePolicy {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "elastic" => Ok(DeadlinePolicy::Elastic),
            "skip" | "strict" => Ok(DeadlinePolicy::Skip),
            other => anyhow::bail!("Unknown deadline policy '{}' (expected elastic or skip)", other),
        }
    }
}

/// The pacer's answer to "what runs after slot n?".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlotPlan {
    /// Slot to run next.
    pub slot: u64,

    /// Slots passed over because their deadline had expired.
    pub skipped: u64,

    /// Instant to sleep until before running `slot`, if it is in the future.
    pub wait_until: Option<Instant>,
}

/// Computes per-slot deadlines from a target rate.
#[derive(Debug, Clone)]
pub struct Pacer {
    start: Instant,
    rate: f64,
    policy: DeadlinePolicy,
}

impl Pacer {
    /// Create a pacer. A `rate` of zero disables pacing.
    pub fn new(rate: f64, policy: DeadlinePolicy, start: Instant) -> Result<Self> {
        if !rate.is_finite() || rate < 0.0 {
            anyhow::bail!("Target rate must be a finite value >= 0, got {}", rate);
        }
        Ok(Self {
            start,
            rate,
            policy,
        })
    }

    /// A pacer that never waits.
    pub fn unlimited(start: Instant) -> Self {
        Self {
            start,
            rate: 0.0,
            policy: DeadlinePolicy::Elastic,
        }
    }

    pub fn is_unlimited(&self) -> bool {
        self.rate == 0.0
    }

    /// Target slots per second; zero when unlimited.
    pub fn rate(&self) -> f64 {
        self.rate
    }

    pub fn start(&self) -> Instant {
        self.start
    }

    pub fn policy(&self) -> DeadlinePolicy {
        self.policy
    }

    /// Time between consecutive slots, `None` when unlimited.
    pub fn period(&self) -> Option<Duration> {
        (!self.is_unlimited()).then(|| self.offset(1))
    }

    /// Deadline of slot `n` (0-indexed), `None` when unlimited.
    pub fn next_deadline(&self, n: u64) -> Option<Instant> {
        if self.is_unlimited() {
            return None;
        }
        Some(self.start + self.offset(n))
    }

    /// Offset of slot `n` from the start, rounded to the nanosecond.
    fn offset(&self, n: u64) -> Duration {
        Duration::from_nanos((n as f64 * 1e9 / self.rate).round() as u64)
    }

    /// Plan the slot following `completed`, as seen at `now`.
    pub fn plan_after(&self, completed: u64, now: Instant) -> SlotPlan {
        let candidate = completed + 1;

        let deadline = match self.next_deadline(candidate) {
            Some(deadline) => deadline,
            None => {
                return SlotPlan {
                    slot: candidate,
                    skipped: 0,
                    wait_until: None,
                }
            }
        };

        if now < deadline {
            return SlotPlan {
                slot: candidate,
                skipped: 0,
                wait_until: Some(deadline),
            };
        }

        match self.policy {
            DeadlinePolicy::Elastic => SlotPlan {
                slot: candidate,
                skipped: 0,
                wait_until: None,
            },
            DeadlinePolicy::Skip => {
                let slot = self.first_future_slot(candidate, now);
                SlotPlan {
                    slot,
                    skipped: slot - candidate,
                    wait_until: self.next_deadline(slot),
                }
            }
        }
    }

    /// Smallest slot whose deadline is at or after `when`, `None` when
    /// unlimited. Slots below it are all due strictly before `when`.
    pub fn first_slot_due_from(&self, when: Instant) -> Option<u64> {
        if self.is_unlimited() {
            return None;
        }
        let elapsed = when.saturating_duration_since(self.start).as_secs_f64();
        let mut slot = (elapsed * self.rate).ceil() as u64;

        // Float rounding may land one slot early or late.
        while slot > 0 && self.next_deadline(slot - 1).is_some_and(|d| d >= when) {
            slot -= 1;
        }
        while self.next_deadline(slot).is_some_and(|d| d < when) {
            slot += 1;
        }
        Some(slot)
    }

    /// Smallest slot `>= from` whose deadline is still ahead of `now`.
    fn first_future_slot(&self, from: u64, now: Instant) -> u64 {
        let elapsed = now.saturating_duration_since(self.start).as_secs_f64();
        let mut slot = ((elapsed * self.rate).floor() as u64).max(from);

        // Float rounding may land one slot early or late.
        while slot > from && self.next_deadline(slot - 1).map_or(false, |d| d > now) {
            slot -= 1;
        }
        while self.next_deadline(slot).map_or(false, |d| d <= now) {
            slot += 1;
        }
        slot
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MS: Duration = Duration::from_millis(1);

    #[test]
    fn test_negative_or_nan_rate_rejected() {
        let t0 = Instant::now();
        assert!(Pacer::new(-1.0, DeadlinePolicy::Elastic, t0).is_err());
        assert!(Pacer::new(f64::NAN, DeadlinePolicy::Elastic, t0).is_err());
        assert!(Pacer::new(f64::INFINITY, DeadlinePolicy::Elastic, t0).is_err());
    }

    #[test]
    fn test_next_deadline_from_start() {
        let t0 = Instant::now();
        let pacer = Pacer::new(10.0, DeadlinePolicy::Elastic, t0).unwrap();

        assert_eq!(pacer.next_deadline(0), Some(t0));
        assert_eq!(pacer.next_deadline(1), Some(t0 + 100 * MS));
        assert_eq!(pacer.next_deadline(25), Some(t0 + 2500 * MS));
        assert_eq!(pacer.period(), Some(100 * MS));
    }

    #[test]
    fn test_unlimited_never_waits() {
        let t0 = Instant::now();
        let pacer = Pacer::new(0.0, DeadlinePolicy::Skip, t0).unwrap();
        assert!(pacer.is_unlimited());
        assert_eq!(pacer.next_deadline(5), None);
        assert_eq!(pacer.period(), None);

        let plan = pacer.plan_after(41, t0 + 10 * MS);
        assert_eq!(plan, SlotPlan { slot: 42, skipped: 0, wait_until: None });

        let plan = Pacer::unlimited(t0).plan_after(0, t0);
        assert_eq!(plan.wait_until, None);
    }

    #[test]
    fn test_on_schedule_waits_for_next_deadline() {
        let t0 = Instant::now();
        let pacer = Pacer::new(50.0, DeadlinePolicy::Skip, t0).unwrap();

        let plan = pacer.plan_after(3, t0 + 65 * MS);
        assert_eq!(plan.slot, 4);
        assert_eq!(plan.skipped, 0);
        assert_eq!(plan.wait_until, Some(t0 + 80 * MS));
    }

    #[test]
    fn test_elastic_runs_late_slot_immediately() {
        let t0 = Instant::now();
        let pacer = Pacer::new(100.0, DeadlinePolicy::Elastic, t0).unwrap();

        // Slot 1 was due at 10ms, slot 5 at 50ms.
        let plan = pacer.plan_after(0, t0 + 55 * MS);
        assert_eq!(plan, SlotPlan { slot: 1, skipped: 0, wait_until: None });
    }

    #[test]
    fn test_skip_jumps_to_first_future_slot() {
        let t0 = Instant::now();
        let pacer = Pacer::new(100.0, DeadlinePolicy::Skip, t0).unwrap();

        // Slots 1..=5 are overdue at 55ms; slot 6 is due at 60ms.
        let plan = pacer.plan_after(0, t0 + 55 * MS);
        assert_eq!(plan.slot, 6);
        assert_eq!(plan.skipped, 5);
        assert_eq!(plan.wait_until, Some(t0 + 60 * MS));
    }

    #[test]
    fn test_skip_on_exact_deadline() {
        let t0 = Instant::now();
        let pacer = Pacer::new(10.0, DeadlinePolicy::Skip, t0).unwrap();

        // Exactly at slot 2's deadline: slot 2 counts as missed.
        let plan = pacer.plan_after(1, t0 + 200 * MS);
        assert_eq!(plan.slot, 3);
        assert_eq!(plan.skipped, 1);
        assert_eq!(plan.wait_until, Some(t0 + 300 * MS));
    }

    #[test]
    fn test_deadlines_do_not_drift() {
        let t0 = Instant::now();
        let pacer = Pacer::new(30.0, DeadlinePolicy::Elastic, t0).unwrap();

        let expected = t0 + Duration::from_secs(100);
        let actual = pacer.next_deadline(3000).unwrap();
        let diff = if actual > expected { actual - expected } else { expected - actual };
        assert!(diff < MS);
    }

    #[test]
    fn test_first_slot_due_from() {
        let t0 = Instant::now();
        let pacer = Pacer::new(10.0, DeadlinePolicy::Skip, t0).unwrap();

        assert_eq!(pacer.first_slot_due_from(t0), Some(0));
        assert_eq!(pacer.first_slot_due_from(t0 + 250 * MS), Some(3));
        // A slot due exactly at `when` is not before it.
        assert_eq!(pacer.first_slot_due_from(t0 + 300 * MS), Some(3));
        assert_eq!(pacer.first_slot_due_from(t0 + 300 * MS + Duration::from_nanos(1)), Some(4));
        assert_eq!(Pacer::unlimited(t0).first_slot_due_from(t0 + 300 * MS), None);
    }

    #[test]
    fn test_first_slot_due_from_at_high_rate() {
        let t0 = Instant::now();
        let pacer = Pacer::new(1e9, DeadlinePolicy::Skip, t0).unwrap();

        // One slot per nanosecond: 500ms holds exactly 5e8 slots.
        assert_eq!(pacer.first_slot_due_from(t0 + 500 * MS), Some(500_000_000));
    }

    #[test]
    fn test_policy_parse() {
        assert_eq!("skip".parse::<DeadlinePolicy>().unwrap(), DeadlinePolicy::Skip);
        assert_eq!("strict".parse::<DeadlinePolicy>().unwrap(), DeadlinePolicy::Skip);
        assert_eq!("Elastic".parse::<DeadlinePolicy>().unwrap(), DeadlinePolicy::Elastic);
        assert!("whenever".parse::<DeadlinePolicy>().is_err());
    }
}
