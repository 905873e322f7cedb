use anyhow::{anyhow, Result};
use chrono::{DateTime, Datelike, Duration, LocalResult, NaiveDate, TimeZone, Utc};
use chrono_tz::Tz;
use std::fmt;

pub const DEFAULT_TIMEZONE: Tz = chrono_tz::UTC;

/// Wall-clock time of day, validated once at the configuration boundary so
/// nothing downstream ever re-parses "HH:MM" strings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeOfDay {
    pub hour: u32,
    pub minute: u32,
}

impl TimeOfDay {
    pub fn new(hour: u32, minute: u32) -> Result<Self> {
        if hour > 23 || minute > 59 {
            return Err(anyhow!("time of day {:02}:{:02} out of range", hour, minute));
        }
        Ok(Self { hour, minute })
    }

    pub fn parse(raw: &str) -> Result<Self> {
        let trimmed = raw.trim();
        let (hour_part, minute_part) = trimmed
            .split_once(':')
            .ok_or_else(|| anyhow!("time of day must be HH:MM (value: {})", raw))?;
        let hour = hour_part
            .parse::<u32>()
            .map_err(|_| anyhow!("invalid hour in time of day (value: {})", raw))?;
        let minute = minute_part
            .parse::<u32>()
            .map_err(|_| anyhow!("invalid minute in time of day (value: {})", raw))?;
        Self::new(hour, minute)
    }

    pub fn minutes_from_midnight(&self) -> u32 {
        self.hour * 60 + self.minute
    }
}

impl fmt::Display for TimeOfDay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02}:{:02}", self.hour, self.minute)
    }
}

pub fn parse_timezone(raw: &str) -> Result<Tz> {
    raw.trim()
        .parse::<Tz>()
        .map_err(|_| anyhow!("unknown time zone identifier {}", raw))
}

/// Platform time zone from the raw setting value, falling back to UTC when
/// unset or unparseable. Validation proper happens at configuration-write
/// time; this is the runtime safety net.
pub fn resolve_timezone(raw: Option<&str>) -> Tz {
    match raw {
        None => DEFAULT_TIMEZONE,
        Some(value) => match parse_timezone(value) {
            Ok(tz) => tz,
            Err(_) => {
                log::warn!(
                    "Unrecognized platform time zone {}; falling back to UTC",
                    value
                );
                DEFAULT_TIMEZONE
            }
        },
    }
}

/// Resolves a local date + time of day to an absolute instant, tolerating DST
/// transitions: ambiguous local times take the earlier mapping, skipped local
/// times slide forward one hour.
fn local_instant(date: NaiveDate, at: TimeOfDay, tz: Tz) -> Option<DateTime<Utc>> {
    let resolved = tz.with_ymd_and_hms(date.year(), date.month(), date.day(), at.hour, at.minute, 0);
    match resolved {
        LocalResult::Single(t) => Some(t.with_timezone(&Utc)),
        LocalResult::Ambiguous(a, b) => Some(a.min(b).with_timezone(&Utc)),
        LocalResult::None => tz
            .with_ymd_and_hms(
                date.year(),
                date.month(),
                date.day(),
                (at.hour + 1).min(23),
                at.minute,
                0,
            )
            .earliest()
            .map(|t| t.with_timezone(&Utc)),
    }
}

/// Next absolute instant at which a robot configured for `at` (in `tz`) should
/// fire, strictly after `now`. Conversion happens here, at schedule time, so
/// daylight-saving shifts are absorbed on every re-arm.
pub fn next_run_instant(now: DateTime<Utc>, at: TimeOfDay, tz: Tz) -> DateTime<Utc> {
    let today = now.with_timezone(&tz).date_naive();
    for offset in 0..3 {
        let date = today + Duration::days(offset);
        if let Some(candidate) = local_instant(date, at, tz) {
            if candidate > now {
                return candidate;
            }
        }
    }
    // Unreachable for any real zone; three consecutive days cannot all skip
    // the same wall-clock time.
    now + Duration::days(1)
}

/// Bounds of the historical trade window: the configured HH:MM interval on the
/// local day before `now`. A window whose end does not lie after its start is
/// treated as crossing midnight.
pub fn trade_window_bounds(
    now: DateTime<Utc>,
    start: TimeOfDay,
    end: TimeOfDay,
    tz: Tz,
) -> Result<(DateTime<Utc>, DateTime<Utc>)> {
    let prior_day = now.with_timezone(&tz).date_naive() - Duration::days(1);
    let window_start = local_instant(prior_day, start, tz)
        .ok_or_else(|| anyhow!("trade window start unresolvable on {}", prior_day))?;
    let mut window_end = local_instant(prior_day, end, tz)
        .ok_or_else(|| anyhow!("trade window end unresolvable on {}", prior_day))?;
    if window_end <= window_start {
        window_end = window_end + Duration::days(1);
    }
    Ok((window_start, window_end))
}
