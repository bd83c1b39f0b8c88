//! Schedule algebra.
//!
//! Pure functions from a [`Schedule`] and the current instant to the next
//! fire time. `None` means "never fires again".

use crate::scheduler::types::Schedule;
use chrono::{DateTime, Duration, Utc};
use chrono_tz::Tz;
use croner::Cron;
use rand::Rng;

/// Compute the next run instant for `schedule`.
///
/// - `Once`: the execute time if strictly in the future.
/// - `Interval`: `base + interval` where base is the last run, the start
///   time, or `now`; a candidate that is not in the future collapses to
///   `now + interval` (missed intervals are never fired in a burst).
/// - `Cron`: next occurrence strictly after `now` in `tz`; `None` if the
///   expression does not parse.
/// - `Exponential`: `now` plus an exponentially distributed delay.
#[must_use]
pub fn compute_next_run_at(
    schedule: &Schedule,
    now: DateTime<Utc>,
    last_run_at: Option<DateTime<Utc>>,
    tz: Tz,
) -> Option<DateTime<Utc>> {
    match schedule {
        Schedule::Once { execute_at } => (*execute_at > now).then_some(*execute_at),
        Schedule::Interval {
            interval_ms,
            start_at,
        } => {
            let interval = positive_millis(*interval_ms)?;
            let base = last_run_at.or(*start_at).unwrap_or(now);
            let candidate = base.checked_add_signed(interval)?;
            if candidate > now {
                Some(candidate)
            } else {
                now.checked_add_signed(interval)
            }
        }
        Schedule::Cron { expression } => next_cron_occurrence(expression, now, tz),
        Schedule::Exponential { mean_interval_ms } => {
            if *mean_interval_ms == 0 {
                return None;
            }
            let delay = sample_exponential(&mut rand::thread_rng(), *mean_interval_ms as f64);
            now.checked_add_signed(Duration::milliseconds((delay.round() as i64).max(1)))
        }
    }
}

/// Whether the schedule can fire more than once.
#[must_use]
pub fn is_repeating_schedule(schedule: &Schedule) -> bool {
    !matches!(schedule, Schedule::Once { .. })
}

/// Draw a delay (in the unit of `mean`) from an exponential distribution.
///
/// `u` is drawn from `(0, 1)` so `ln(u)` is always finite.
pub fn sample_exponential<R: Rng + ?Sized>(rng: &mut R, mean: f64) -> f64 {
    let u: f64 = rng.gen_range(f64::MIN_POSITIVE..1.0);
    -u.ln() * mean
}

/// True when `at` is not strictly after `now`.
#[must_use]
pub fn is_past_time(at: DateTime<Utc>, now: DateTime<Utc>) -> bool {
    at <= now
}

/// Parse a cron expression, returning a readable error.
pub fn parse_cron(expression: &str) -> Result<Cron, String> {
    Cron::new(expression)
        .with_seconds_optional()
        .parse()
        .map_err(|e| format!("invalid cron expression '{expression}': {e}"))
}

fn next_cron_occurrence(expression: &str, now: DateTime<Utc>, tz: Tz) -> Option<DateTime<Utc>> {
    let cron = parse_cron(expression).ok()?;
    let local = now.with_timezone(&tz);
    cron.find_next_occurrence(&local, false)
        .ok()
        .map(|next| next.with_timezone(&Utc))
}

fn positive_millis(ms: u64) -> Option<Duration> {
    if ms == 0 {
        return None;
    }
    i64::try_from(ms).ok().map(Duration::milliseconds)
}
