// --- File: crates/clinic_gcal/src/logic.rs ---
//! Time-interval rules shared by slot generation and booking validation.
//!
//! All instants are stored in UTC; the branch timezone is only used to place
//! business hours on the calendar and to render local times.

use chrono::{DateTime, Datelike, Duration, NaiveDate, NaiveTime, TimeZone, Utc, Weekday};
use chrono_tz::Tz;
use clinic_common::services::BusyInterval;
use clinic_common::RejectionReason;
use clinic_config::ScheduleConfig;

use crate::error::SchedulingError;

/// Longest appointment a client may ask for.
pub const MAX_DURATION_MINUTES: i64 = 240;

/// Half-open interval overlap: `[start1, end1)` and `[start2, end2)` share an instant.
pub fn overlaps(
    start1: DateTime<Utc>,
    end1: DateTime<Utc>,
    start2: DateTime<Utc>,
    end2: DateTime<Utc>,
) -> bool {
    start1 < end2 && end1 > start2
}

/// An appointment window `[start, end)` with the zone it is displayed and validated in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeWindow {
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    timezone: Tz,
}

impl TimeWindow {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>, timezone: Tz) -> Result<Self, SchedulingError> {
        if end <= start {
            return Err(SchedulingError::rejected(
                RejectionReason::InvalidWindow,
                format!("end ({}) must be after start ({})", end, start),
            ));
        }
        Ok(Self {
            start,
            end,
            timezone,
        })
    }

    pub fn start(&self) -> DateTime<Utc> {
        self.start
    }

    pub fn end(&self) -> DateTime<Utc> {
        self.end
    }

    pub fn timezone(&self) -> Tz {
        self.timezone
    }

    pub fn duration(&self) -> Duration {
        self.end - self.start
    }

    pub fn local_start(&self) -> DateTime<Tz> {
        self.start.with_timezone(&self.timezone)
    }

    pub fn local_end(&self) -> DateTime<Tz> {
        self.end.with_timezone(&self.timezone)
    }

    pub fn crosses_midnight(&self) -> bool {
        self.local_start().date_naive() != self.local_end().date_naive()
    }

    pub fn overlaps(&self, busy: &BusyInterval) -> bool {
        overlaps(self.start, self.end, busy.start, busy.end)
    }
}

/// Maps a local wall-clock time to UTC. Ambiguous times take the earlier instant.
pub fn localize(timezone: Tz, date: NaiveDate, time: NaiveTime) -> Option<DateTime<Utc>> {
    timezone
        .from_local_datetime(&date.and_time(time))
        .earliest()
        .map(|dt| dt.with_timezone(&Utc))
}

/// Local midnight to the next local midnight.
pub fn local_day_bounds(date: NaiveDate, timezone: Tz) -> Option<(DateTime<Utc>, DateTime<Utc>)> {
    let midnight = NaiveTime::from_hms_opt(0, 0, 0)?;
    let start = localize(timezone, date, midnight)?;
    let end = localize(timezone, date.succ_opt()?, midnight)?;
    Some((start, end))
}

fn weekday_from_index(index: u8) -> Option<Weekday> {
    match index {
        0 => Some(Weekday::Mon),
        1 => Some(Weekday::Tue),
        2 => Some(Weekday::Wed),
        3 => Some(Weekday::Thu),
        4 => Some(Weekday::Fri),
        5 => Some(Weekday::Sat),
        6 => Some(Weekday::Sun),
        _ => None,
    }
}

/// Checks `duration_minutes` is in `(0, 240]`.
pub fn validate_duration(duration_minutes: i64) -> Result<Duration, SchedulingError> {
    if duration_minutes <= 0 || duration_minutes > MAX_DURATION_MINUTES {
        return Err(SchedulingError::InvalidInput(format!(
            "duration_minutes must be between 1 and {}, got {}",
            MAX_DURATION_MINUTES, duration_minutes
        )));
    }
    Ok(Duration::minutes(duration_minutes))
}

/// Opening hours, slot grid and workdays, identical for every branch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BusinessHours {
    open: NaiveTime,
    close: NaiveTime,
    step: Duration,
    workdays: Vec<Weekday>,
}

impl BusinessHours {
    pub fn new(
        open_hour: u32,
        close_hour: u32,
        step_minutes: u32,
        workdays: &[u8],
    ) -> Result<Self, SchedulingError> {
        if close_hour > 23 || open_hour >= close_hour {
            return Err(SchedulingError::InvalidInput(format!(
                "open hour {} must be before close hour {} (0-23)",
                open_hour, close_hour
            )));
        }
        if step_minutes == 0 {
            return Err(SchedulingError::InvalidInput(
                "step_minutes must be positive".to_string(),
            ));
        }
        let workdays = workdays
            .iter()
            .map(|d| {
                weekday_from_index(*d)
                    .ok_or_else(|| SchedulingError::InvalidInput(format!("invalid workday {}", d)))
            })
            .collect::<Result<Vec<_>, _>>()?;
        let open = NaiveTime::from_hms_opt(open_hour, 0, 0)
            .ok_or_else(|| SchedulingError::InvalidInput(format!("invalid open hour {}", open_hour)))?;
        let close = NaiveTime::from_hms_opt(close_hour, 0, 0).ok_or_else(|| {
            SchedulingError::InvalidInput(format!("invalid close hour {}", close_hour))
        })?;
        Ok(Self {
            open,
            close,
            step: Duration::minutes(i64::from(step_minutes)),
            workdays,
        })
    }

    pub fn from_config(config: &ScheduleConfig) -> Result<Self, SchedulingError> {
        Self::new(
            config.open_hour,
            config.close_hour,
            config.step_minutes,
            &config.workdays,
        )
    }

    pub fn step(&self) -> Duration {
        self.step
    }

    pub fn is_workday(&self, date: NaiveDate) -> bool {
        self.workdays.contains(&date.weekday())
    }

    /// Opening and closing instants of `date` in `timezone`.
    pub fn open_close(&self, date: NaiveDate, timezone: Tz) -> Option<(DateTime<Utc>, DateTime<Utc>)> {
        Some((
            localize(timezone, date, self.open)?,
            localize(timezone, date, self.close)?,
        ))
    }

    /// Applies the booking rules to a requested window.
    ///
    /// Checks run in a fixed order so the reported reason is deterministic:
    /// invalid window, crosses midnight, closed day, outside hours, starts in the past.
    pub fn validate_window(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        timezone: Tz,
        now: DateTime<Utc>,
    ) -> Result<TimeWindow, SchedulingError> {
        let window = TimeWindow::new(start, end, timezone)?;
        let local_start = window.local_start();
        let local_end = window.local_end();

        if window.crosses_midnight() {
            return Err(SchedulingError::rejected(
                RejectionReason::CrossesMidnight,
                format!(
                    "appointment from {} to {} crosses midnight",
                    local_start.format("%Y-%m-%d %H:%M"),
                    local_end.format("%Y-%m-%d %H:%M")
                ),
            ));
        }
        if !self.is_workday(local_start.date_naive()) {
            return Err(SchedulingError::rejected(
                RejectionReason::ClosedDay,
                format!(
                    "the clinic is closed on {} ({})",
                    local_start.date_naive(),
                    local_start.weekday()
                ),
            ));
        }
        if local_start.time() < self.open || local_end.time() > self.close {
            return Err(SchedulingError::rejected(
                RejectionReason::OutsideBusinessHours,
                format!(
                    "{} - {} is outside business hours {} - {}",
                    local_start.format("%H:%M"),
                    local_end.format("%H:%M"),
                    self.open.format("%H:%M"),
                    self.close.format("%H:%M")
                ),
            ));
        }
        if start <= now {
            return Err(SchedulingError::rejected(
                RejectionReason::StartsInPast,
                format!("appointment start {} is not in the future", local_start.to_rfc3339()),
            ));
        }
        Ok(window)
    }
}

/// Sorts busy intervals and merges overlapping or touching ones. Empty intervals are dropped.
pub fn merge_busy_periods(busy: &[BusyInterval]) -> Vec<BusyInterval> {
    let mut sorted: Vec<BusyInterval> = busy.iter().copied().filter(|b| b.start < b.end).collect();
    sorted.sort_by_key(|b| b.start);

    let mut merged: Vec<BusyInterval> = Vec::with_capacity(sorted.len());
    for interval in sorted {
        match merged.last_mut() {
            Some(last) if interval.start <= last.end => last.end = last.end.max(interval.end),
            _ => merged.push(interval),
        }
    }
    merged
}

/// A bookable candidate in the branch's local time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Slot {
    pub start: DateTime<Tz>,
    pub end: DateTime<Tz>,
    /// `HH:MM - HH:MM`
    pub label: String,
}

impl Slot {
    fn new(start: DateTime<Utc>, end: DateTime<Utc>, timezone: Tz) -> Self {
        let start = start.with_timezone(&timezone);
        let end = end.with_timezone(&timezone);
        let label = format!("{} - {}", start.format("%H:%M"), end.format("%H:%M"));
        Self { start, end, label }
    }
}

/// Lazily yields the free slots of one day in chronological order.
#[derive(Debug, Clone)]
pub struct SlotIter {
    current: DateTime<Utc>,
    day_end: DateTime<Utc>,
    duration: Duration,
    step: Duration,
    now: DateTime<Utc>,
    busy: Vec<BusyInterval>,
    busy_idx: usize,
    timezone: Tz,
    closed: bool,
    exhausted: bool,
}

impl SlotIter {
    fn finished(timezone: Tz, closed: bool) -> Self {
        let epoch = DateTime::<Utc>::MIN_UTC;
        Self {
            current: epoch,
            day_end: epoch,
            duration: Duration::zero(),
            step: Duration::zero(),
            now: epoch,
            busy: Vec::new(),
            busy_idx: 0,
            timezone,
            closed,
            exhausted: true,
        }
    }

    /// True when the date is not a workday.
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    pub fn timezone(&self) -> Tz {
        self.timezone
    }
}

impl Iterator for SlotIter {
    type Item = Slot;

    fn next(&mut self) -> Option<Slot> {
        while !self.exhausted {
            let start = self.current;
            let end = start + self.duration;
            if end > self.day_end {
                // every later step overruns too
                self.exhausted = true;
                break;
            }
            self.current = start + self.step;

            if start <= self.now {
                continue;
            }

            // busy is merged and sorted; skip intervals that ended before this slot
            while self
                .busy
                .get(self.busy_idx)
                .is_some_and(|b| b.end <= start)
            {
                self.busy_idx += 1;
            }
            if let Some(busy) = self.busy.get(self.busy_idx) {
                if overlaps(start, end, busy.start, busy.end) {
                    continue;
                }
            }

            return Some(Slot::new(start, end, self.timezone));
        }
        None
    }
}

#[derive(Debug, Clone)]
pub struct SlotGenerator {
    hours: BusinessHours,
}

impl SlotGenerator {
    pub fn new(hours: BusinessHours) -> Self {
        Self { hours }
    }

    pub fn hours(&self) -> &BusinessHours {
        &self.hours
    }

    /// Slots of `duration` on `date`, stepping from opening time.
    ///
    /// A slot is offered when it ends by closing time, starts after `now`
    /// and does not overlap any of `busy`.
    pub fn generate(
        &self,
        date: NaiveDate,
        timezone: Tz,
        duration: Duration,
        busy: &[BusyInterval],
        now: DateTime<Utc>,
    ) -> SlotIter {
        if !self.hours.is_workday(date) {
            return SlotIter::finished(timezone, true);
        }
        let Some((day_start, day_end)) = self.hours.open_close(date, timezone) else {
            return SlotIter::finished(timezone, false);
        };
        if duration <= Duration::zero() {
            return SlotIter::finished(timezone, false);
        }

        SlotIter {
            current: day_start,
            day_end,
            duration,
            step: self.hours.step,
            now,
            busy: merge_busy_periods(busy),
            busy_idx: 0,
            timezone,
            closed: false,
            exhausted: false,
        }
    }
}
