//! Next-occurrence computation for weekly recurrence rules.
//!
//! One policy for both initial attach and re-arm after a send: for each
//! target weekday, take that weekday's slot within the coming week; if the
//! slot is not strictly in the future (today's slot already passed, or we
//! are re-arming at the exact fire minute), it moves one week out. The
//! result is the minimum across all target weekdays, so it is the soonest
//! qualifying slot, always strictly after `now`, always exactly on a rule
//! weekday at the rule's hour:minute:00.

use chrono::{Datelike, Duration, NaiveDateTime, NaiveTime};

use funnelcast_core::types::RecurrenceRule;

/// Compute the next qualifying local timestamp strictly after `now`.
/// Returns `None` for a rule that cannot produce one (empty or out-of-range
/// weekday set, impossible time); callers log and leave the broadcast
/// unscheduled rather than guessing.
pub fn next_occurrence(rule: &RecurrenceRule, now: NaiveDateTime) -> Option<NaiveDateTime> {
    if rule.weekdays.is_empty() || rule.weekdays.iter().any(|d| *d > 6) {
        return None;
    }
    let target_time = NaiveTime::from_hms_opt(rule.hour as u32, rule.minute as u32, 0)?;

    let mut candidates = Vec::with_capacity(rule.weekdays.len());
    for &target_day in &rule.weekdays {
        for offset in 0..=6i64 {
            let date = now.date() + Duration::days(offset);
            if date.weekday().num_days_from_monday() as u8 == target_day {
                let mut candidate = date.and_time(target_time);
                if candidate <= now {
                    candidate += Duration::days(7);
                }
                candidates.push(candidate);
                break;
            }
        }
    }

    candidates.into_iter().min()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveDate, Timelike, Weekday};

    // 2026-08-03 is a Monday.
    fn dt(day: u32, h: u32, m: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2026, 8, day)
            .unwrap()
            .and_hms_opt(h, m, 0)
            .unwrap()
    }

    fn rule(days: &str, time: &str) -> RecurrenceRule {
        RecurrenceRule::parse(days, time).unwrap()
    }

    #[test]
    fn test_soonest_slot_same_week() {
        // Tue+Thu 09:00 from Monday 10:00 → Tuesday 09:00 of the same week
        let next = next_occurrence(&rule("1,3", "09:00"), dt(3, 10, 0)).unwrap();
        assert_eq!(next, dt(4, 9, 0));
        assert_eq!(next.weekday(), Weekday::Tue);
    }

    #[test]
    fn test_same_day_time_passed_pushes_a_week() {
        // Tuesday 09:30, rule Tue 09:00 → following Tuesday, never today
        let next = next_occurrence(&rule("1", "09:00"), dt(4, 9, 30)).unwrap();
        assert_eq!(next, dt(11, 9, 0));
    }

    #[test]
    fn test_same_day_passed_falls_through_to_other_weekday() {
        // Tue+Thu 09:00 from Tuesday 09:30: the Tuesday slot moves a week
        // out, so Thursday of this week wins the minimum
        let next = next_occurrence(&rule("1,3", "09:00"), dt(4, 9, 30)).unwrap();
        assert_eq!(next, dt(6, 9, 0));
    }

    #[test]
    fn test_exact_fire_minute_is_not_future() {
        // Re-arming at Tuesday 09:00 sharp lands one week out
        let next = next_occurrence(&rule("1", "09:00"), dt(4, 9, 0)).unwrap();
        assert_eq!(next, dt(11, 9, 0));
    }

    #[test]
    fn test_same_day_later_minute_still_counts() {
        // Tuesday 09:10 with rule 09:30 stays today: the slot is still ahead
        // even though the hour already matches
        let next = next_occurrence(&rule("1", "09:30"), dt(4, 9, 10)).unwrap();
        assert_eq!(next, dt(4, 9, 30));
    }

    #[test]
    fn test_malformed_rule_yields_none() {
        let empty = RecurrenceRule {
            weekdays: vec![],
            hour: 9,
            minute: 0,
        };
        assert!(next_occurrence(&empty, dt(3, 10, 0)).is_none());

        let out_of_range = RecurrenceRule {
            weekdays: vec![9],
            hour: 9,
            minute: 0,
        };
        assert!(next_occurrence(&out_of_range, dt(3, 10, 0)).is_none());
    }

    #[test]
    fn test_result_is_always_strictly_future_and_on_rule() {
        // Sweep weekday sets x times x "now" instants across two weeks
        let rules = [
            rule("0", "00:00"),
            rule("6", "23:59"),
            rule("1,3", "09:00"),
            rule("0,1,2,3,4,5,6", "12:30"),
            rule("2,5", "18:45"),
        ];
        for r in &rules {
            for day in 1..=14 {
                for hour in [0, 9, 12, 18, 23] {
                    for minute in [0, 29, 59] {
                        let now = dt(day, hour, minute);
                        let next = next_occurrence(r, now).unwrap();
                        assert!(next > now, "rule {r:?} at {now}: got {next}");
                        assert!(
                            r.weekdays
                                .contains(&(next.weekday().num_days_from_monday() as u8)),
                            "rule {r:?} at {now}: weekday mismatch {next}"
                        );
                        assert_eq!(next.hour(), r.hour as u32);
                        assert_eq!(next.minute(), r.minute as u32);
                        assert_eq!(next.second(), 0);
                        // Soonest slot: never more than a week and a day away
                        assert!(next - now <= Duration::days(8));
                    }
                }
            }
        }
    }
}
