//! Application clock with a fixed local offset.
//!
//! All stored timestamps are absolute UTC; only presentation uses the
//! configured offset (+03:00 by default). Naive inputs are treated as UTC.

use chrono::{DateTime, Datelike, FixedOffset, NaiveDateTime, Offset, Utc};

/// Presentation styles for local timestamps.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeStyle {
    /// `%Y-%m-%d في %H:%M:%S`
    Full,
    /// `%Y-%m-%d`
    Date,
    /// `%H:%M:%S`
    Time,
    /// `%Y-%m-%d في %H:%M`
    Short,
}

/// Placeholder shown when no timestamp is available.
const UNSET: &str = "غير محدد";

/// Application clock bound to a fixed UTC offset.
#[derive(Debug, Clone, Copy)]
pub struct Clock {
    offset: FixedOffset,
}

impl Default for Clock {
    fn default() -> Self {
        Self::new(3)
    }
}

impl Clock {
    /// Create a clock with the given offset from UTC in hours.
    ///
    /// Out-of-range offsets fall back to UTC.
    #[must_use]
    pub fn new(offset_hours: i32) -> Self {
        let offset = FixedOffset::east_opt(offset_hours * 3600).unwrap_or_else(|| Utc.fix());
        Self { offset }
    }

    /// Current absolute instant.
    #[must_use]
    pub fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }

    /// Current instant in the local offset.
    #[must_use]
    pub fn now_local(&self) -> DateTime<FixedOffset> {
        self.to_local(self.now())
    }

    /// Convert an absolute instant to the local offset.
    #[must_use]
    pub fn to_local(&self, t: DateTime<Utc>) -> DateTime<FixedOffset> {
        t.with_timezone(&self.offset)
    }

    /// Interpret a naive timestamp as UTC.
    #[must_use]
    pub fn from_naive_utc(&self, t: NaiveDateTime) -> DateTime<Utc> {
        DateTime::from_naive_utc_and_offset(t, Utc)
    }

    /// Format an optional instant in the local offset.
    ///
    /// `None` renders as the Arabic "unset" placeholder.
    #[must_use]
    pub fn format(&self, t: Option<DateTime<Utc>>, style: TimeStyle) -> String {
        let Some(t) = t else {
            return UNSET.to_string();
        };
        let local = self.to_local(t);
        let pattern = match style {
            TimeStyle::Full => "%Y-%m-%d في %H:%M:%S",
            TimeStyle::Date => "%Y-%m-%d",
            TimeStyle::Time => "%H:%M:%S",
            TimeStyle::Short => "%Y-%m-%d في %H:%M",
        };
        local.format(pattern).to_string()
    }

    /// Human-readable Arabic distance between `t` and `reference`.
    ///
    /// Granularity is seconds, minutes, hours or days; future instants use
    /// the "بعد" form, past instants "منذ".
    #[must_use]
    pub fn relative(&self, t: Option<DateTime<Utc>>, reference: Option<DateTime<Utc>>) -> String {
        let Some(t) = t else {
            return UNSET.to_string();
        };
        let reference = reference.unwrap_or_else(|| self.now());
        let diff = (reference - t).num_seconds();

        if diff < 0 {
            let diff = diff.unsigned_abs();
            if diff < 60 {
                "بعد ثوانٍ قليلة".to_string()
            } else if diff < 3600 {
                format!("بعد {} دقيقة", diff / 60)
            } else if diff < 86_400 {
                format!("بعد {} ساعة", diff / 3600)
            } else {
                format!("بعد {} يوم", diff / 86_400)
            }
        } else {
            let diff = diff.unsigned_abs();
            if diff < 60 {
                "منذ ثوانٍ قليلة".to_string()
            } else if diff < 3600 {
                format!("منذ {} دقيقة", diff / 60)
            } else if diff < 86_400 {
                format!("منذ {} ساعة", diff / 3600)
            } else {
                format!("منذ {} يوم", diff / 86_400)
            }
        }
    }

    /// Whether two instants fall on the same local calendar day.
    #[must_use]
    pub fn is_same_local_day(&self, a: DateTime<Utc>, b: DateTime<Utc>) -> bool {
        let a = self.to_local(a);
        let b = self.to_local(b);
        a.year() == b.year() && a.month() == b.month() && a.day() == b.day()
    }

    /// Local-time component for request numbers (`%Y%m%d%H%M%S`).
    #[must_use]
    pub fn timestamp_for_request_number(&self) -> String {
        self.now_local().format("%Y%m%d%H%M%S").to_string()
    }

    /// Local-time component for stored filenames, microsecond precision.
    #[must_use]
    pub fn timestamp_for_filename(&self) -> String {
        let local = self.now_local();
        format!(
            "{}_{:06}",
            local.format("%Y%m%d_%H%M%S"),
            local.timestamp_subsec_micros()
        )
    }

    /// Local-time component for stored filenames, second precision.
    #[must_use]
    pub fn short_timestamp_for_filename(&self) -> String {
        self.now_local().format("%Y%m%d_%H%M%S").to_string()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn clock() -> Clock {
        Clock::new(3)
    }

    fn utc(y: i32, mo: u32, d: u32, h: u32, mi: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, mo, d, h, mi, s).unwrap()
    }

    #[test]
    fn test_to_local_applies_plus_three() {
        let t = utc(2025, 6, 14, 21, 30, 0);
        let local = clock().to_local(t);
        assert_eq!(local.format("%Y-%m-%d %H:%M").to_string(), "2025-06-15 00:30");
    }

    #[test]
    fn test_format_styles() {
        let c = clock();
        let t = Some(utc(2025, 6, 14, 0, 45, 24));
        assert_eq!(c.format(t, TimeStyle::Full), "2025-06-14 في 03:45:24");
        assert_eq!(c.format(t, TimeStyle::Date), "2025-06-14");
        assert_eq!(c.format(t, TimeStyle::Time), "03:45:24");
        assert_eq!(c.format(t, TimeStyle::Short), "2025-06-14 في 03:45");
    }

    #[test]
    fn test_format_none_is_unset_placeholder() {
        assert_eq!(clock().format(None, TimeStyle::Full), "غير محدد");
        assert_eq!(clock().relative(None, None), "غير محدد");
    }

    #[test]
    fn test_relative_past() {
        let c = clock();
        let reference = utc(2025, 6, 14, 12, 0, 0);
        assert_eq!(
            c.relative(Some(utc(2025, 6, 14, 11, 59, 30)), Some(reference)),
            "منذ ثوانٍ قليلة"
        );
        assert_eq!(
            c.relative(Some(utc(2025, 6, 14, 11, 15, 0)), Some(reference)),
            "منذ 45 دقيقة"
        );
        assert_eq!(
            c.relative(Some(utc(2025, 6, 14, 7, 0, 0)), Some(reference)),
            "منذ 5 ساعة"
        );
        assert_eq!(
            c.relative(Some(utc(2025, 6, 10, 12, 0, 0)), Some(reference)),
            "منذ 4 يوم"
        );
    }

    #[test]
    fn test_relative_future() {
        let c = clock();
        let reference = utc(2025, 6, 14, 12, 0, 0);
        assert_eq!(
            c.relative(Some(utc(2025, 6, 14, 12, 0, 30)), Some(reference)),
            "بعد ثوانٍ قليلة"
        );
        assert_eq!(
            c.relative(Some(utc(2025, 6, 14, 14, 0, 0)), Some(reference)),
            "بعد 2 ساعة"
        );
    }

    #[test]
    fn test_same_local_day_crosses_utc_midnight() {
        let c = clock();
        // 22:30 UTC is 01:30 next day locally.
        let late = utc(2025, 6, 14, 22, 30, 0);
        let next_morning = utc(2025, 6, 15, 4, 0, 0);
        assert!(c.is_same_local_day(late, next_morning));
        assert!(!c.is_same_local_day(utc(2025, 6, 14, 12, 0, 0), late));
    }

    #[test]
    fn test_filename_timestamp_shape() {
        let ts = clock().timestamp_for_filename();
        // yyyymmdd_HHMMSS_micros
        let parts: Vec<&str> = ts.split('_').collect();
        assert_eq!(parts.len(), 3);
        assert_eq!(parts[0].len(), 8);
        assert_eq!(parts[1].len(), 6);
        assert_eq!(parts[2].len(), 6);
    }
}
