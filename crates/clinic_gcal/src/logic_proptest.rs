#[cfg(test)]
mod tests {
    use crate::logic::{overlaps, BusinessHours, SlotGenerator};
    use chrono::{DateTime, Duration, NaiveDate, TimeZone, Timelike, Utc};
    use chrono_tz::Tz;
    use clinic_common::services::BusyInterval;
    use proptest::prelude::*;

    const ZONES: [Tz; 3] = [
        Tz::America__Mexico_City,
        Tz::America__Cancun,
        Tz::America__Tijuana,
    ];

    fn day_start(date: NaiveDate, tz: Tz) -> DateTime<Utc> {
        tz.from_local_datetime(&date.and_hms_opt(0, 0, 0).unwrap())
            .earliest()
            .unwrap()
            .with_timezone(&Utc)
    }

    // Busy intervals as (start minute of day, length in minutes)
    fn busy_strategy() -> impl Strategy<Value = Vec<(i64, i64)>> {
        prop::collection::vec((0..24 * 60i64, 5..180i64), 0..8)
    }

    proptest! {
        #[test]
        fn test_slots_respect_hours_busy_and_order(
            day_offset in 0..365i64,
            zone_idx in 0..3usize,
            open_hour in 6..12u32,
            close_hour in 13..23u32,
            step in prop::sample::select(vec![10u32, 15, 20, 30, 60]),
            duration_minutes in 5..240i64,
            raw_busy in busy_strategy(),
            now_offset_minutes in -600..2000i64,
        ) {
            let tz = ZONES[zone_idx];
            let date = NaiveDate::from_ymd_opt(2030, 1, 1).unwrap() + Duration::days(day_offset);
            let hours = BusinessHours::new(open_hour, close_hour, step, &[0, 1, 2, 3, 4, 5, 6]).unwrap();
            let generator = SlotGenerator::new(hours);

            let midnight = day_start(date, tz);
            let busy: Vec<BusyInterval> = raw_busy
                .iter()
                .map(|(start, len)| BusyInterval {
                    start: midnight + Duration::minutes(*start),
                    end: midnight + Duration::minutes(start + len),
                })
                .collect();
            let now = midnight + Duration::minutes(now_offset_minutes);
            let duration = Duration::minutes(duration_minutes);

            let slots: Vec<_> = generator.generate(date, tz, duration, &busy, now).collect();

            let mut previous: Option<DateTime<Utc>> = None;
            for slot in &slots {
                let start = slot.start.with_timezone(&Utc);
                let end = slot.end.with_timezone(&Utc);

                prop_assert_eq!(end - start, duration);
                prop_assert!(start > now);
                prop_assert_eq!(slot.start.date_naive(), date);
                prop_assert!(slot.start.hour() >= open_hour);
                prop_assert!(slot.end.date_naive() == date);
                prop_assert!(
                    slot.end.hour() < close_hour
                        || (slot.end.hour() == close_hour && slot.end.minute() == 0)
                );
                for b in &busy {
                    prop_assert!(!overlaps(start, end, b.start, b.end));
                }
                if let Some(prev) = previous {
                    prop_assert!(start > prev);
                }
                previous = Some(start);
            }
        }

        #[test]
        fn test_closed_days_never_have_slots(
            day_offset in 0..365i64,
            duration_minutes in 5..240i64,
        ) {
            let date = NaiveDate::from_ymd_opt(2030, 1, 1).unwrap() + Duration::days(day_offset);
            // Monday..Saturday
            let hours = BusinessHours::new(10, 20, 30, &[0, 1, 2, 3, 4, 5]).unwrap();
            let is_workday = hours.is_workday(date);
            let iter = SlotGenerator::new(hours).generate(
                date,
                Tz::America__Mexico_City,
                Duration::minutes(duration_minutes),
                &[],
                Utc.with_ymd_and_hms(2029, 1, 1, 0, 0, 0).unwrap(),
            );
            prop_assert_eq!(iter.is_closed(), !is_workday);
            if !is_workday {
                prop_assert_eq!(iter.count(), 0);
            }
        }
    }
}
