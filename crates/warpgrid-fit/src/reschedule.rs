//! Reschedule timing for failed allocations.
//!
//! A failed allocation is replaced after a delay that grows with each
//! reschedule according to its policy's delay function, capped at
//! `max_delay`. An allocation that ran longer than the cap before failing
//! starts over from the base delay instead of inheriting a previous
//! failure storm's backoff.
//!
//! # Delay sequences (delay 5s, max 90s)
//!
//! | Function      | Sequence                               |
//! |---------------|----------------------------------------|
//! | `constant`    | 5, 5, 5, ...                           |
//! | `exponential` | 5, 10, 20, 40, 80, 90, 90, ...         |
//! | `fibonacci`   | 5, 5, 10, 15, 25, 40, 65, 90, 90, ...  |

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use crate::types::*;

/// Events retained by an unlimited policy when carrying history forward.
pub const MAX_PAST_RESCHEDULE_EVENTS: usize = 5;

/// How the delay grows between reschedules.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DelayFunction {
    #[default]
    Constant,
    Exponential,
    Fibonacci,
}

/// Task group policy for replacing failed allocations.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReschedulePolicy {
    /// Reschedules allowed within `interval`.
    pub attempts: u32,
    #[serde(with = "duration_str")]
    pub interval: Duration,
    /// Base delay.
    #[serde(with = "duration_str")]
    pub delay: Duration,
    pub delay_function: DelayFunction,
    /// Ceiling for growing delays. Zero means no ceiling.
    #[serde(with = "duration_str")]
    pub max_delay: Duration,
    pub unlimited: bool,
}

/// One past reschedule of an allocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RescheduleEvent {
    pub reschedule_time: SystemTime,
    pub prev_alloc_id: String,
    pub prev_node_id: String,
    #[serde(with = "duration_str")]
    pub delay: Duration,
}

/// Reschedule history of an allocation, oldest first.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RescheduleTracker {
    pub events: Vec<RescheduleEvent>,
}

impl ReschedulePolicy {
    pub fn enabled(&self) -> bool {
        self.attempts > 0 || self.unlimited
    }

    /// Delay before the next reschedule given past `events`.
    ///
    /// `reference` is when the allocation last failed; it decides whether
    /// a capped delay resets.
    pub fn next_delay(&self, events: &[RescheduleEvent], reference: SystemTime) -> Duration {
        let Some(last) = events.last() else {
            return self.delay;
        };

        let mut delay = match self.delay_function {
            DelayFunction::Constant => return self.delay,
            DelayFunction::Exponential => last.delay.saturating_mul(2),
            DelayFunction::Fibonacci => match events {
                [.., prev, last] if prev.delay == self.max_delay && last.delay == self.delay => {
                    // A reset happened; start a new series.
                    last.delay
                }
                [.., prev, last] => prev.delay.saturating_add(last.delay),
                _ => self.delay,
            },
        };

        if !self.max_delay.is_zero() && delay >= self.max_delay {
            delay = self.max_delay;
            let ran_for = reference
                .duration_since(last.reschedule_time)
                .unwrap_or_default();
            if ran_for > self.max_delay {
                delay = self.delay;
            }
        }
        delay
    }

    /// Reschedules within `interval` before `reference`. Events stamped
    /// after `reference` also count.
    fn attempted_within_interval(&self, events: &[RescheduleEvent], reference: SystemTime) -> u32 {
        let count = events
            .iter()
            .filter(|e| age_within(e, reference, |age| age < self.interval))
            .count();
        u32::try_from(count).unwrap_or(u32::MAX)
    }

    /// When the next reschedule may happen and whether it is allowed.
    ///
    /// A disabled policy yields `(UNIX_EPOCH, false)`.
    pub fn next_reschedule_time(
        &self,
        events: &[RescheduleEvent],
        reference: SystemTime,
    ) -> (SystemTime, bool) {
        if !self.enabled() {
            return (UNIX_EPOCH, false);
        }

        let delay = self.next_delay(events, reference);
        let at = reference + delay;
        if self.unlimited {
            return (at, true);
        }

        if events.is_empty() {
            return (at, true);
        }
        let attempted = self.attempted_within_interval(events, reference);
        (at, attempted < self.attempts && delay < self.interval)
    }
}

impl RescheduleTracker {
    /// History for the replacement of `prev`, rescheduled at `now`.
    ///
    /// Attempt-limited policies keep the events inside the interval
    /// window; unlimited ones keep only the most recent few. A new event
    /// recording `prev` and its delay is appended.
    pub fn carry_over(prev: &Allocation, now: SystemTime) -> Self {
        let policy = prev.reschedule_policy.clone().unwrap_or_default();
        let past = prev.reschedule_events();

        let mut events: Vec<RescheduleEvent> = if policy.unlimited {
            let start = past.len().saturating_sub(MAX_PAST_RESCHEDULE_EVENTS);
            past[start..].to_vec()
        } else {
            past.iter()
                .filter(|e| {
                    !policy.interval.is_zero()
                        && age_within(e, now, |age| age <= policy.interval)
                })
                .cloned()
                .collect()
        };

        events.push(RescheduleEvent {
            reschedule_time: now,
            prev_alloc_id: prev.id.clone(),
            prev_node_id: prev.node_id.clone(),
            delay: prev.next_delay(now),
        });
        Self { events }
    }
}

/// Apply `within` to the age of `event` at `reference`. An event stamped
/// after `reference` is always within.
fn age_within(
    event: &RescheduleEvent,
    reference: SystemTime,
    within: impl Fn(Duration) -> bool,
) -> bool {
    reference
        .duration_since(event.reschedule_time)
        .map_or(true, within)
}

impl Allocation {
    fn reschedule_events(&self) -> &[RescheduleEvent] {
        self.reschedule_tracker
            .as_ref()
            .map(|t| t.events.as_slice())
            .unwrap_or_default()
    }

    /// Latest task finish time, falling back to the modify time.
    pub fn last_event_time(&self) -> Option<SystemTime> {
        self.task_states
            .values()
            .filter_map(|s| s.finished_at)
            .max()
            .or(self.modify_time)
    }

    /// Last event time, or `now` when the allocation has none.
    fn reference_time(&self, now: SystemTime) -> SystemTime {
        self.last_event_time().unwrap_or(now)
    }

    /// Delay before this allocation's replacement. Zero without a policy.
    pub fn next_delay(&self, now: SystemTime) -> Duration {
        let Some(policy) = &self.reschedule_policy else {
            return Duration::ZERO;
        };
        policy.next_delay(self.reschedule_events(), self.reference_time(now))
    }

    /// When this allocation may be replaced and whether it is eligible.
    ///
    /// The delay counts from the allocation's last event time, or from
    /// `now` if it has none.
    pub fn next_reschedule_time(&self, now: SystemTime) -> (SystemTime, bool) {
        let Some(policy) = &self.reschedule_policy else {
            return (UNIX_EPOCH, false);
        };
        policy.next_reschedule_time(self.reschedule_events(), self.reference_time(now))
    }

    /// Whether a failure at `fail_time` should trigger a replacement.
    pub fn should_reschedule(&self, fail_time: SystemTime) -> bool {
        if matches!(
            self.desired_status,
            DesiredStatus::Stop | DesiredStatus::Evict
        ) {
            return false;
        }
        self.client_status == ClientStatus::Failed && self.reschedule_eligible(fail_time)
    }

    fn reschedule_eligible(&self, fail_time: SystemTime) -> bool {
        let Some(policy) = &self.reschedule_policy else {
            return false;
        };
        if !policy.enabled() {
            return false;
        }
        if policy.unlimited {
            return true;
        }
        policy.attempted_within_interval(self.reschedule_events(), fail_time) < policy.attempts
    }
}

/// Serde for durations written as `"500ms"`, `"5s"`, `"2m"` or `"1h"`.
/// A bare number is seconds.
pub mod duration_str {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer, de};

    pub fn serialize<S: Serializer>(d: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&format(*d))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let s = String::deserialize(deserializer)?;
        parse(&s).ok_or_else(|| de::Error::custom(format!("invalid duration {s:?}")))
    }

    /// Render with the largest unit that represents `d` exactly.
    pub fn format(d: Duration) -> String {
        let ms = d.as_millis();
        if ms % 3_600_000 == 0 && ms > 0 {
            format!("{}h", ms / 3_600_000)
        } else if ms % 60_000 == 0 && ms > 0 {
            format!("{}m", ms / 60_000)
        } else if ms % 1000 == 0 {
            format!("{}s", ms / 1000)
        } else {
            format!("{ms}ms")
        }
    }

    pub fn parse(s: &str) -> Option<Duration> {
        let s = s.trim();
        if let Some(ms) = s.strip_suffix("ms") {
            ms.parse::<u64>().ok().map(Duration::from_millis)
        } else if let Some(secs) = s.strip_suffix('s') {
            secs.parse::<u64>().ok().map(Duration::from_secs)
        } else if let Some(mins) = s.strip_suffix('m') {
            mins.parse::<u64>().ok().map(|m| Duration::from_secs(m * 60))
        } else if let Some(hours) = s.strip_suffix('h') {
            hours.parse::<u64>().ok().map(|h| Duration::from_secs(h * 3600))
        } else {
            s.parse::<u64>().ok().map(Duration::from_secs)
        }
    }
}
