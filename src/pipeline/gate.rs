//! Decides whether a project's backup is due on this invocation.
//!
//! All comparisons happen on UTC timestamps in the application layer; the run
//! log only supplies the stored value. Parse problems fail open: running a
//! backup too often is preferred over silently never running it.

use chrono::NaiveDateTime;

use crate::config::Frequency;
use crate::runlog::LastSuccess;

/// Returns whether `project` should run now.
///
/// `last_success` is the most recently inserted SUCCESS row (insertion order,
/// not timestamp order).
pub fn should_run(
    project: &str,
    frequency: &Frequency,
    now: NaiveDateTime,
    last_success: &LastSuccess,
) -> bool {
    match frequency {
        Frequency::Always => {
            log::debug!(target: "gate", "{project}: frequency -1, always runs");
            true
        }

        Frequency::Once => match last_success {
            LastSuccess::None => {
                log::debug!(target: "gate", "{project}: run-once project has no success yet");
                true
            }
            _ => {
                log::debug!(target: "gate", "{project}: run-once project already succeeded, skipping");
                false
            }
        },

        Frequency::Invalid(raw) => {
            log::warn!(target: "gate", "{project}: frequency {raw} is not an integer, running anyway (fail open)");
            true
        }

        Frequency::Every(minutes) => match last_success {
            LastSuccess::None => {
                log::debug!(target: "gate", "{project}: no prior successful backup, first run");
                true
            }
            LastSuccess::Unparseable => {
                log::warn!(target: "gate", "{project}: stored last-success timestamp is unparseable, running anyway (fail open)");
                true
            }
            LastSuccess::At(last) => {
                let elapsed_seconds = (now - *last).num_seconds();
                if elapsed_seconds < 0 {
                    // Stored timestamp is in the future, e.g. after host
                    // clock drift. Clamp to zero and treat like a first run
                    // instead of skipping until the clock catches up.
                    log::warn!(target: "gate", "{project}: last success {last} is after now {now}, running anyway");
                    return true;
                }

                let elapsed_minutes = elapsed_seconds / 60;
                if elapsed_minutes >= *minutes {
                    log::debug!(target: "gate", "{project}: {elapsed_minutes} of {minutes} minutes elapsed, due");
                    true
                } else {
                    log::debug!(target: "gate", "{project}: only {elapsed_minutes} of {minutes} minutes elapsed, skipping");
                    false
                }
            }
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, NaiveDate};

    fn base() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 5, 1)
            .unwrap()
            .and_hms_opt(12, 0, 0)
            .unwrap()
    }

    #[test]
    fn always_runs_regardless_of_history() {
        let now = base();
        for last in [
            LastSuccess::None,
            LastSuccess::At(now),
            LastSuccess::Unparseable,
        ] {
            assert!(should_run("p", &Frequency::Always, now, &last));
        }
    }

    #[test]
    fn once_runs_only_until_first_success() {
        let now = base();
        assert!(should_run("p", &Frequency::Once, now, &LastSuccess::None));
        assert!(!should_run(
            "p",
            &Frequency::Once,
            now,
            &LastSuccess::At(now - Duration::days(400))
        ));
        assert!(!should_run(
            "p",
            &Frequency::Once,
            now,
            &LastSuccess::Unparseable
        ));
    }

    #[test]
    fn interval_boundary_is_inclusive() {
        let last = base();
        let frequency = Frequency::Every(60);

        let just_before = last + Duration::minutes(59);
        assert!(!should_run("p", &frequency, just_before, &LastSuccess::At(last)));

        let on_boundary = last + Duration::minutes(60);
        assert!(should_run("p", &frequency, on_boundary, &LastSuccess::At(last)));
    }

    #[test]
    fn elapsed_minutes_are_floored() {
        let last = base();
        // 59 minutes and 59 seconds is still 59 whole minutes.
        let now = last + Duration::minutes(59) + Duration::seconds(59);
        assert!(!should_run(
            "p",
            &Frequency::Every(60),
            now,
            &LastSuccess::At(last)
        ));
    }

    #[test]
    fn interval_first_run() {
        assert!(should_run(
            "p",
            &Frequency::Every(60),
            base(),
            &LastSuccess::None
        ));
    }

    #[test]
    fn future_timestamp_never_skips_forever() {
        let now = base();
        let future = now + Duration::hours(3);
        assert!(should_run(
            "p",
            &Frequency::Every(60),
            now,
            &LastSuccess::At(future)
        ));
    }

    #[test]
    fn unparseable_timestamp_fails_open() {
        assert!(should_run(
            "p",
            &Frequency::Every(60),
            base(),
            &LastSuccess::Unparseable
        ));
    }

    #[test]
    fn invalid_frequency_fails_open() {
        assert!(should_run(
            "p",
            &Frequency::Invalid("\"hourly\"".to_string()),
            base(),
            &LastSuccess::None
        ));
    }
}
