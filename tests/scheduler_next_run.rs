// tests/scheduler_next_run.rs
use channel_digest::scheduler::{next_run_after, DailySchedule, ScheduleZone};
use chrono::{FixedOffset, NaiveTime, TimeZone, Utc};

fn at(h: u32, m: u32) -> NaiveTime {
    NaiveTime::from_hms_opt(h, m, 0).unwrap()
}

#[test]
fn later_today_in_utc() {
    let now = Utc.with_ymd_and_hms(2025, 3, 10, 8, 30, 0).unwrap();
    let next = next_run_after(now, at(20, 0), ScheduleZone::Utc);
    assert_eq!(next, Utc.with_ymd_and_hms(2025, 3, 10, 20, 0, 0).unwrap());
}

#[test]
fn already_passed_rolls_to_tomorrow() {
    let now = Utc.with_ymd_and_hms(2025, 3, 10, 21, 0, 0).unwrap();
    let next = next_run_after(now, at(20, 0), ScheduleZone::Utc);
    assert_eq!(next, Utc.with_ymd_and_hms(2025, 3, 11, 20, 0, 0).unwrap());
}

#[test]
fn exactly_at_the_time_waits_a_full_day() {
    let now = Utc.with_ymd_and_hms(2025, 3, 10, 20, 0, 0).unwrap();
    let next = next_run_after(now, at(20, 0), ScheduleZone::Utc);
    assert_eq!(next, Utc.with_ymd_and_hms(2025, 3, 11, 20, 0, 0).unwrap());
}

#[test]
fn month_and_year_boundaries() {
    let now = Utc.with_ymd_and_hms(2025, 12, 31, 23, 59, 0).unwrap();
    let next = next_run_after(now, at(0, 5), ScheduleZone::Utc);
    assert_eq!(next, Utc.with_ymd_and_hms(2026, 1, 1, 0, 5, 0).unwrap());
}

#[test]
fn positive_offset_crosses_midnight_utc() {
    // 20:00 at +08:00 is 12:00 UTC.
    let zone = ScheduleZone::Fixed(FixedOffset::east_opt(8 * 3600).unwrap());
    let morning = Utc.with_ymd_and_hms(2025, 3, 10, 9, 0, 0).unwrap();
    assert_eq!(
        next_run_after(morning, at(20, 0), zone),
        Utc.with_ymd_and_hms(2025, 3, 10, 12, 0, 0).unwrap()
    );

    // 17:00 UTC is already 01:00 on the 11th in +08:00.
    let evening = Utc.with_ymd_and_hms(2025, 3, 10, 17, 0, 0).unwrap();
    assert_eq!(
        next_run_after(evening, at(20, 0), zone),
        Utc.with_ymd_and_hms(2025, 3, 11, 12, 0, 0).unwrap()
    );
}

#[test]
fn negative_half_hour_offset() {
    let schedule = DailySchedule::parse("20:00", "-05:30").unwrap();
    let now = Utc.with_ymd_and_hms(2025, 3, 10, 23, 0, 0).unwrap();
    // 20:00 at -05:30 is 01:30 UTC the next day.
    assert_eq!(
        schedule.next_after(now),
        Utc.with_ymd_and_hms(2025, 3, 11, 1, 30, 0).unwrap()
    );
}

#[test]
fn schedule_rejects_bad_input() {
    assert!(DailySchedule::parse("25:00", "UTC").is_err());
    assert!(DailySchedule::parse("20:00", "America/Nowhere").is_err());
    assert!(DailySchedule::parse("20:00", "+1é1").is_err());
    assert_eq!(DailySchedule::parse(" 07:15 ", "utc").unwrap().time, at(7, 15));
}

#[test]
fn named_zone_follows_daylight_saving() {
    let schedule = DailySchedule::parse("20:00", "America/New_York").unwrap();
    // EST (-05:00) the day before the change.
    let saturday = Utc.with_ymd_and_hms(2025, 3, 8, 12, 0, 0).unwrap();
    assert_eq!(
        schedule.next_after(saturday),
        Utc.with_ymd_and_hms(2025, 3, 9, 1, 0, 0).unwrap()
    );
    // EDT (-04:00) from 9 March.
    let sunday = Utc.with_ymd_and_hms(2025, 3, 9, 12, 0, 0).unwrap();
    assert_eq!(
        schedule.next_after(sunday),
        Utc.with_ymd_and_hms(2025, 3, 10, 0, 0, 0).unwrap()
    );
}

#[test]
fn named_zone_skips_missing_wall_clock_time() {
    // 02:30 does not exist in New York on 9 March 2025.
    let zone: ScheduleZone = "America/New_York".parse().unwrap();
    let now = Utc.with_ymd_and_hms(2025, 3, 9, 5, 0, 0).unwrap();
    assert_eq!(
        next_run_after(now, at(2, 30), zone),
        Utc.with_ymd_and_hms(2025, 3, 10, 6, 30, 0).unwrap()
    );
}
