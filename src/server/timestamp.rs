//! Log timestamp formatting (zero heap allocation).
//!
//! HTTP dates go through `httpdate`; these are the two log formats:
//! ISO 8601 for diagnostics and the Common Log Format stamp.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

const MONTH_ABBR: [&[u8; 3]; 12] = [
    b"Jan", b"Feb", b"Mar", b"Apr", b"May", b"Jun", b"Jul", b"Aug", b"Sep", b"Oct", b"Nov",
    b"Dec",
];

/// Broken-down UTC time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Civil {
    year: u16,
    month: u8,
    day: u8,
    hours: u8,
    minutes: u8,
    seconds: u8,
}

impl Civil {
    fn from_secs(secs: u64) -> Self {
        let day_secs = secs % 86400;
        let hours = (day_secs / 3600) as u8;
        let minutes = ((day_secs % 3600) / 60) as u8;
        let seconds = (day_secs % 60) as u8;

        let mut year = 1970u16;
        let mut remaining = (secs / 86400) as i64;
        loop {
            let year_days = if is_leap_year(year) { 366 } else { 365 };
            if remaining < year_days {
                break;
            }
            remaining -= year_days;
            year += 1;
        }

        let month_days: [u8; 12] = if is_leap_year(year) {
            [31, 29, 31, 30, 31, 30, 31, 31, 30, 31, 30, 31]
        } else {
            [31, 28, 31, 30, 31, 30, 31, 31, 30, 31, 30, 31]
        };

        let mut month = 1u8;
        for &days_in_month in &month_days {
            if remaining < days_in_month as i64 {
                break;
            }
            remaining -= days_in_month as i64;
            month += 1;
        }

        Self {
            year,
            month,
            day: (remaining + 1) as u8,
            hours,
            minutes,
            seconds,
        }
    }
}

fn since_epoch(time: SystemTime) -> Duration {
    time.duration_since(UNIX_EPOCH).unwrap_or_default()
}

/// ISO 8601 timestamp buffer - exactly 24 bytes: "2024-01-15T10:30:00.123Z"
#[derive(Clone, Copy)]
pub struct Iso8601Timestamp {
    buf: [u8; 24],
}

impl Iso8601Timestamp {
    /// Create a new timestamp for the current time.
    #[inline]
    pub fn now() -> Self {
        Self::from_duration(since_epoch(SystemTime::now()))
    }

    /// Create from a Duration since UNIX_EPOCH.
    pub fn from_duration(duration: Duration) -> Self {
        let t = Civil::from_secs(duration.as_secs());

        let mut buf = [0u8; 24];
        write_u16_padded(&mut buf[0..4], t.year);
        buf[4] = b'-';
        write_u8_padded(&mut buf[5..7], t.month);
        buf[7] = b'-';
        write_u8_padded(&mut buf[8..10], t.day);
        buf[10] = b'T';
        write_u8_padded(&mut buf[11..13], t.hours);
        buf[13] = b':';
        write_u8_padded(&mut buf[14..16], t.minutes);
        buf[16] = b':';
        write_u8_padded(&mut buf[17..19], t.seconds);
        buf[19] = b'.';
        write_u16_padded_3(&mut buf[20..23], duration.subsec_millis() as u16);
        buf[23] = b'Z';

        Self { buf }
    }

    #[inline]
    pub fn as_str(&self) -> &str {
        // Only ASCII digits and punctuation are ever written
        std::str::from_utf8(&self.buf).unwrap_or_default()
    }
}

impl std::fmt::Display for Iso8601Timestamp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Common Log Format timestamp - 26 bytes: "10/Oct/2000:13:55:36 +0000"
#[derive(Clone, Copy)]
pub struct ClfTimestamp {
    buf: [u8; 26],
}

impl ClfTimestamp {
    pub fn new(time: SystemTime) -> Self {
        let t = Civil::from_secs(since_epoch(time).as_secs());

        let mut buf = [0u8; 26];
        write_u8_padded(&mut buf[0..2], t.day);
        buf[2] = b'/';
        buf[3..6].copy_from_slice(MONTH_ABBR[(t.month - 1) as usize]);
        buf[6] = b'/';
        write_u16_padded(&mut buf[7..11], t.year);
        buf[11] = b':';
        write_u8_padded(&mut buf[12..14], t.hours);
        buf[14] = b':';
        write_u8_padded(&mut buf[15..17], t.minutes);
        buf[17] = b':';
        write_u8_padded(&mut buf[18..20], t.seconds);
        buf[20..26].copy_from_slice(b" +0000");

        Self { buf }
    }

    #[inline]
    pub fn as_str(&self) -> &str {
        std::str::from_utf8(&self.buf).unwrap_or_default()
    }
}

impl std::fmt::Display for ClfTimestamp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[inline]
const fn is_leap_year(year: u16) -> bool {
    year % 4 == 0 && (year % 100 != 0 || year % 400 == 0)
}

/// Write a 4-digit year to buffer (0000-9999).
#[inline]
fn write_u16_padded(buf: &mut [u8], val: u16) {
    buf[0] = b'0' + ((val / 1000) % 10) as u8;
    buf[1] = b'0' + ((val / 100) % 10) as u8;
    buf[2] = b'0' + ((val / 10) % 10) as u8;
    buf[3] = b'0' + (val % 10) as u8;
}

/// Write a 2-digit value to buffer (00-99).
#[inline]
fn write_u8_padded(buf: &mut [u8], val: u8) {
    buf[0] = b'0' + (val / 10);
    buf[1] = b'0' + (val % 10);
}

/// Write a 3-digit milliseconds value to buffer (000-999).
#[inline]
fn write_u16_padded_3(buf: &mut [u8], val: u16) {
    buf[0] = b'0' + ((val / 100) % 10) as u8;
    buf[1] = b'0' + ((val / 10) % 10) as u8;
    buf[2] = b'0' + (val % 10) as u8;
}
