//! Schedule string parsing and validation.
//!
//! Everything here is pure: callers pass `now` explicitly where the result
//! depends on the current instant.

use chrono::{
    DateTime, Local, NaiveDate, NaiveDateTime, SecondsFormat, SubsecRound, TimeZone, Utc,
};
use cron::Schedule;
use regex::Regex;
use std::str::FromStr;
use std::sync::LazyLock;
use std::time::Duration;

use super::error::{CronError, Result};
use super::types::{ScheduleKind, Trigger};

const CRON_FIELDS: usize = 6;
const CRON_EXAMPLE: &str = "0 */5 * * * *";

static INTERVAL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(\d+)([smhd])$").expect("interval regex"));
static RELATIVE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\+(\d+)([smhd])$").expect("relative regex"));

fn unit_ms(unit: &str) -> Option<u64> {
    match unit {
        "s" => Some(1_000),
        "m" => Some(60_000),
        "h" => Some(3_600_000),
        "d" => Some(86_400_000),
        _ => None,
    }
}

fn captured_ms(re: &Regex, input: &str) -> Option<u64> {
    let caps = re.captures(input)?;
    let value: u64 = caps[1].parse().ok()?;
    value.checked_mul(unit_ms(&caps[2])?)
}

/// Check a 6-field (seconds first) cron expression.
pub fn validate_cron(expr: &str) -> Result<()> {
    let fields = expr.split_whitespace().count();
    if fields != CRON_FIELDS {
        return Err(CronError::Validation(format!(
            "cron expression must have exactly {CRON_FIELDS} fields \
             (second minute hour day-of-month month day-of-week), got {fields}; \
             example: \"{CRON_EXAMPLE}\" runs every 5 minutes"
        )));
    }
    Schedule::from_str(expr)
        .map(|_| ())
        .map_err(|e| CronError::Validation(format!("invalid cron expression \"{expr}\": {e}")))
}

/// `5m` -> 300000. Returns `None` for anything but `<int><s|m|h|d>`.
pub fn parse_interval(input: &str) -> Option<u64> {
    captured_ms(&INTERVAL_RE, input)
}

/// `+10m` -> now + 10 minutes.
pub fn parse_relative_time(input: &str) -> Option<DateTime<Utc>> {
    relative_from(input, Utc::now())
}

fn relative_from(input: &str, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
    let ms = captured_ms(&RELATIVE_RE, input)?;
    let delta = chrono::Duration::milliseconds(i64::try_from(ms).ok()?);
    now.checked_add_signed(delta)
}

/// Parse an absolute calendar instant. Strings without an offset are read as
/// local time.
pub fn parse_timestamp(input: &str) -> Result<DateTime<Utc>> {
    let input = input.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(input) {
        return Ok(dt.with_timezone(&Utc));
    }
    if let Ok(dt) = DateTime::parse_from_rfc2822(input) {
        return Ok(dt.with_timezone(&Utc));
    }

    const NAIVE_FORMATS: [&str; 4] = [
        "%Y-%m-%dT%H:%M:%S%.f",
        "%Y-%m-%d %H:%M:%S%.f",
        "%Y-%m-%dT%H:%M",
        "%Y-%m-%d %H:%M",
    ];
    let naive = NAIVE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(input, fmt).ok())
        .or_else(|| {
            NaiveDate::parse_from_str(input, "%Y-%m-%d")
                .ok()
                .and_then(|d| d.and_hms_opt(0, 0, 0))
        });

    naive
        .and_then(|n| Local.from_local_datetime(&n).earliest())
        .map(|dt| dt.with_timezone(&Utc))
        .ok_or_else(|| CronError::Validation(format!("invalid timestamp \"{input}\"")))
}

pub fn format_timestamp(at: &DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Shortest `<int><unit>` spelling of a period.
pub fn format_interval(period: Duration) -> String {
    let ms = period.as_millis();
    for (unit, size) in [("d", 86_400_000u128), ("h", 3_600_000), ("m", 60_000), ("s", 1_000)] {
        if ms >= size && ms % size == 0 {
            return format!("{}{unit}", ms / size);
        }
    }
    format!("{}s", ms.div_ceil(1_000))
}

/// Guess the schedule kind when the caller gives no type hint.
pub fn infer_kind(input: &str) -> ScheduleKind {
    let input = input.trim();
    if input.starts_with('+') {
        ScheduleKind::Once
    } else if INTERVAL_RE.is_match(input) {
        ScheduleKind::Interval
    } else if matches!(input.split_whitespace().count(), 5 | CRON_FIELDS) {
        ScheduleKind::Cron
    } else {
        ScheduleKind::Once
    }
}

/// Validate a user-facing schedule string and turn it into a [`Trigger`].
///
/// A `Once` schedule at or before `now` is rejected.
pub fn resolve(input: &str, kind: Option<ScheduleKind>, now: DateTime<Utc>) -> Result<Trigger> {
    let input = input.trim();
    if input.is_empty() {
        return Err(CronError::Validation("schedule must not be empty".to_string()));
    }

    match kind.unwrap_or_else(|| infer_kind(input)) {
        ScheduleKind::Cron => {
            validate_cron(input)?;
            let normalized = input.split_whitespace().collect::<Vec<_>>().join(" ");
            Ok(Trigger::Cron(normalized))
        }
        ScheduleKind::Interval => {
            let ms = parse_interval(input).ok_or_else(|| {
                CronError::Validation(format!(
                    "invalid interval \"{input}\"; expected <number><s|m|h|d>, e.g. 5m or 30s"
                ))
            })?;
            if ms == 0 {
                return Err(CronError::Validation(
                    "interval must be greater than zero".to_string(),
                ));
            }
            Ok(Trigger::Interval(Duration::from_millis(ms)))
        }
        ScheduleKind::Once => {
            let at = if input.starts_with('+') {
                relative_from(input, now).ok_or_else(|| {
                    CronError::Validation(format!(
                        "invalid relative time \"{input}\"; expected +<number><s|m|h|d>, e.g. +10m"
                    ))
                })?
            } else {
                parse_timestamp(input)?
            };
            let at = at.trunc_subsecs(3);
            if at <= now {
                return Err(CronError::Validation(format!(
                    "scheduled time {} is in the past (now: {})",
                    format_timestamp(&at),
                    format_timestamp(&now)
                )));
            }
            Ok(Trigger::Once(at))
        }
    }
}

/// First fire of a cron expression strictly after `after`. `None` when the
/// expression does not parse or never fires again.
pub fn next_cron_fire(expr: &str, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
    Schedule::from_str(expr).ok()?.after(&after).next()
}

/// Persisted `scheduleSpec` string for a trigger.
pub fn spec_string(trigger: &Trigger) -> String {
    match trigger {
        Trigger::Cron(expr) => expr.clone(),
        Trigger::Interval(period) => format_interval(*period),
        Trigger::Once(at) => format_timestamp(at),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn six_field_cron_is_valid() {
        for expr in ["0 */5 * * * *", "0 * * * * *", "30 0 9 * * Mon-Fri", "0 30 4 1 * *"] {
            assert!(validate_cron(expr).is_ok(), "{expr} should be valid");
        }
    }

    #[test]
    fn wrong_field_count_names_the_count() {
        let err = validate_cron("*/5 * * * *").unwrap_err().to_string();
        assert!(err.contains("got 5"), "{err}");
        assert!(err.contains("exactly 6"), "{err}");
        assert!(err.contains(CRON_EXAMPLE), "{err}");

        let err = validate_cron("0 0 0 1 1 * 2030").unwrap_err().to_string();
        assert!(err.contains("got 7"), "{err}");
    }

    #[test]
    fn bad_cron_syntax_is_reported() {
        let err = validate_cron("x y z w v u").unwrap_err();
        assert!(matches!(err, CronError::Validation(_)));
    }

    #[test]
    fn intervals() {
        assert_eq!(parse_interval("5m"), Some(300_000));
        assert_eq!(parse_interval("1h"), Some(3_600_000));
        assert_eq!(parse_interval("30s"), Some(30_000));
        assert_eq!(parse_interval("2d"), Some(172_800_000));
        assert_eq!(parse_interval("bogus"), None);
        assert_eq!(parse_interval("5"), None);
        assert_eq!(parse_interval("5m "), None);
        assert_eq!(parse_interval("+5m"), None);
        assert_eq!(parse_interval("99999999999999999999d"), None);
    }

    #[test]
    fn relative_time_window() {
        let before = Utc::now();
        let at = parse_relative_time("+10s").expect("relative time");
        let after = Utc::now();
        assert!(at >= before + chrono::Duration::milliseconds(9_999));
        assert!(at <= after + chrono::Duration::milliseconds(10_001));

        assert!(parse_relative_time("10s").is_none());
        assert!(parse_relative_time("+10x").is_none());
    }

    #[test]
    fn absolute_timestamps() {
        let at = parse_timestamp("2026-02-13T15:00:00Z").unwrap();
        assert_eq!(format_timestamp(&at), "2026-02-13T15:00:00.000Z");

        let at = parse_timestamp("2026-02-13T16:00:00+01:00").unwrap();
        assert_eq!(format_timestamp(&at), "2026-02-13T15:00:00.000Z");

        assert!(parse_timestamp("2026-02-13 15:00").is_ok());
        assert!(parse_timestamp("2026-02-13").is_ok());

        let err = parse_timestamp("next tuesday").unwrap_err().to_string();
        assert!(err.contains("next tuesday"), "{err}");
    }

    #[test]
    fn kind_inference() {
        assert_eq!(infer_kind("+10m"), ScheduleKind::Once);
        assert_eq!(infer_kind("5m"), ScheduleKind::Interval);
        assert_eq!(infer_kind("0 */5 * * * *"), ScheduleKind::Cron);
        assert_eq!(infer_kind("*/5 * * * *"), ScheduleKind::Cron);
        assert_eq!(infer_kind("2026-02-13T15:00:00Z"), ScheduleKind::Once);
    }

    #[test]
    fn resolve_once_rejects_past_and_includes_now() {
        let now = Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap();
        let err = resolve("2026-02-13T15:00:00Z", Some(ScheduleKind::Once), now)
            .unwrap_err()
            .to_string();
        assert!(err.contains("in the past"), "{err}");
        assert!(err.contains("2026-03-01T12:00:00.000Z"), "{err}");

        let err = resolve("2026-03-01T12:00:00Z", Some(ScheduleKind::Once), now).unwrap_err();
        assert!(matches!(err, CronError::Validation(_)));
    }

    #[test]
    fn resolve_normalizes() {
        let now = Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap();

        let t = resolve("  0  */5 * * * * ", None, now).unwrap();
        assert_eq!(t, Trigger::Cron("0 */5 * * * *".to_string()));

        let t = resolve("90s", None, now).unwrap();
        assert_eq!(t, Trigger::Interval(Duration::from_secs(90)));
        assert_eq!(spec_string(&t), "90s");

        let t = resolve("+10m", None, now).unwrap();
        assert_eq!(spec_string(&t), "2026-03-01T12:10:00.000Z");

        assert!(resolve("0s", Some(ScheduleKind::Interval), now).is_err());
        assert!(resolve("5m", Some(ScheduleKind::Cron), now).is_err());
        assert!(resolve("", None, now).is_err());
    }

    #[test]
    fn next_cron_fire_is_strictly_after() {
        let after = Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap();
        let next = next_cron_fire("0 * * * * *", after).unwrap();
        assert_eq!(next, Utc.with_ymd_and_hms(2026, 3, 1, 12, 1, 0).unwrap());
        assert!(next_cron_fire("x y z w v u", after).is_none());
    }

    #[test]
    fn interval_formatting() {
        assert_eq!(format_interval(Duration::from_millis(300_000)), "5m");
        assert_eq!(format_interval(Duration::from_millis(3_600_000)), "1h");
        assert_eq!(format_interval(Duration::from_millis(172_800_000)), "2d");
        assert_eq!(format_interval(Duration::from_millis(1_500)), "2s");
    }
}
