//! exFAT directory entry timestamps
//!
//! A timestamp is a 32-bit DOS-style value:
//! - bits 0-4: seconds / 2
//! - bits 5-10: minutes
//! - bits 11-15: hours
//! - bits 16-20: day
//! - bits 21-24: month
//! - bits 25-31: years since 1980
//!
//! plus an optional 10 ms increment (0-199) and a UTC offset byte whose high
//! bit marks it valid and whose low seven bits are a signed count of 15-minute
//! intervals.

use chrono::{DateTime, Duration, FixedOffset, NaiveDate, NaiveDateTime};

/// Raw timestamp fields from a primary directory record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ExFatTimestamp {
    pub raw: u32,
    pub increment_10ms: u8,
    pub utc_offset: u8,
}

impl ExFatTimestamp {
    pub fn new(raw: u32, increment_10ms: u8, utc_offset: u8) -> Self {
        Self {
            raw,
            increment_10ms,
            utc_offset,
        }
    }

    /// Local wall-clock time, or `None` if the fields are out of range
    pub fn to_naive(&self) -> Option<NaiveDateTime> {
        let year = ((self.raw >> 25) & 0x7F) as i32 + 1980;
        let month = (self.raw >> 21) & 0x0F;
        let day = (self.raw >> 16) & 0x1F;
        let hour = (self.raw >> 11) & 0x1F;
        let minute = (self.raw >> 5) & 0x3F;
        let second = (self.raw & 0x1F) * 2;

        let base = NaiveDate::from_ymd_opt(year, month, day)?.and_hms_opt(hour, minute, second)?;

        if self.increment_10ms > 199 {
            return Some(base);
        }
        Some(base + Duration::milliseconds(i64::from(self.increment_10ms) * 10))
    }

    /// Offset from UTC in minutes, when the record marks it valid
    pub fn utc_offset_minutes(&self) -> Option<i32> {
        if self.utc_offset & 0x80 == 0 {
            return None;
        }
        // Sign-extend the 7-bit value
        let quarters = ((self.utc_offset << 1) as i8 >> 1) as i32;
        Some(quarters * 15)
    }

    /// Timestamp with its zone; UTC is assumed when no offset is recorded
    pub fn to_datetime(&self) -> Option<DateTime<FixedOffset>> {
        let naive = self.to_naive()?;
        let offset = FixedOffset::east_opt(self.utc_offset_minutes().unwrap_or(0) * 60)?;
        naive.and_local_timezone(offset).single()
    }
}
