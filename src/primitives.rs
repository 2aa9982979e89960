//! Little-endian binary I/O, CRC-32, and MS-DOS date/time conversion.
//!
//! These helpers are the leaf layer shared by the structure codec, the
//! reader engine, and the writer engine. None of them know anything about
//! ZIP record layout; they only know how to move bytes and compute a
//! checksum.

use std::io::{self, Read, Write};

use crate::error::{Result, SZipError};

/// Read an exact number of bytes, failing with `FormatError` on a short read.
pub fn read_exact_bytes<R: Read + ?Sized>(reader: &mut R, len: usize) -> Result<Vec<u8>> {
    let mut buf = vec![0u8; len];
    reader.read_exact(&mut buf).map_err(|e| {
        if e.kind() == io::ErrorKind::UnexpectedEof {
            SZipError::FormatError(format!(
                "unexpected end of archive: wanted {} bytes",
                len
            ))
        } else {
            SZipError::Io(e)
        }
    })?;
    Ok(buf)
}

/// Read a little-endian u16.
pub fn read_u16<R: Read + ?Sized>(reader: &mut R) -> Result<u16> {
    let mut buf = [0u8; 2];
    reader.read_exact(&mut buf).map_err(eof_to_format)?;
    Ok(u16::from_le_bytes(buf))
}

/// Read a little-endian u32.
pub fn read_u32<R: Read + ?Sized>(reader: &mut R) -> Result<u32> {
    let mut buf = [0u8; 4];
    reader.read_exact(&mut buf).map_err(eof_to_format)?;
    Ok(u32::from_le_bytes(buf))
}

/// Read a little-endian u64.
pub fn read_u64<R: Read + ?Sized>(reader: &mut R) -> Result<u64> {
    let mut buf = [0u8; 8];
    reader.read_exact(&mut buf).map_err(eof_to_format)?;
    Ok(u64::from_le_bytes(buf))
}

fn eof_to_format(e: io::Error) -> SZipError {
    if e.kind() == io::ErrorKind::UnexpectedEof {
        SZipError::FormatError("unexpected end of archive".to_string())
    } else {
        SZipError::Io(e)
    }
}

/// Write a little-endian u16, reporting short writes as `FormatError`.
pub fn write_u16<W: Write + ?Sized>(writer: &mut W, value: u16) -> Result<()> {
    write_all_checked(writer, &value.to_le_bytes())
}

/// Write a little-endian u32.
pub fn write_u32<W: Write + ?Sized>(writer: &mut W, value: u32) -> Result<()> {
    write_all_checked(writer, &value.to_le_bytes())
}

/// Write a little-endian u64.
pub fn write_u64<W: Write + ?Sized>(writer: &mut W, value: u64) -> Result<()> {
    write_all_checked(writer, &value.to_le_bytes())
}

/// Write a byte slice verbatim.
pub fn write_bytes<W: Write + ?Sized>(writer: &mut W, data: &[u8]) -> Result<()> {
    write_all_checked(writer, data)
}

fn write_all_checked<W: Write + ?Sized>(writer: &mut W, data: &[u8]) -> Result<()> {
    writer.write_all(data).map_err(SZipError::Io)
}

/// CRC-32 of a byte slice, using the standard PKZIP (CRC-32/ISO-HDLC)
/// polynomial via `crc32fast`.
pub fn crc32(data: &[u8]) -> u32 {
    crc32fast::hash(data)
}

/// An incremental CRC-32 accumulator, for computing a checksum while data
/// streams through (e.g. while it is read from a file on the writer side).
#[derive(Default)]
pub struct Crc32Accumulator(crc32fast::Hasher);

impl Crc32Accumulator {
    /// Create a fresh accumulator.
    pub fn new() -> Self {
        Self(crc32fast::Hasher::new())
    }

    /// Fold in more bytes.
    pub fn update(&mut self, data: &[u8]) {
        self.0.update(data);
    }

    /// Finish and return the accumulated CRC-32.
    pub fn finalize(self) -> u32 {
        self.0.finalize()
    }
}

/// A decoded MS-DOS packed date/time, anchored at 1980-01-01 00:00:00 and
/// good through 2107 (the limit of the 7-bit year field).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DosDateTime {
    pub year: u16,
    pub month: u8,
    pub day: u8,
    pub hour: u8,
    pub minute: u8,
    pub second: u8,
}

impl DosDateTime {
    /// The fallback timestamp used when a packed date/time fails to decode
    /// into a valid calendar date: midnight on 1980-01-01.
    pub const EPOCH: DosDateTime = DosDateTime {
        year: 1980,
        month: 1,
        day: 1,
        hour: 0,
        minute: 0,
        second: 0,
    };

    /// Decode a packed DOS date/time pair. Invalid packed values (day 0,
    /// month 13, a 31st of February, ...) decode to [`DosDateTime::EPOCH`]
    /// rather than failing, since real-world writers emit them.
    pub fn from_dos(dos_date: u16, dos_time: u16) -> DosDateTime {
        let day = (dos_date & 0x1F) as u8;
        let month = ((dos_date >> 5) & 0x0F) as u8;
        let year = 1980u16 + ((dos_date >> 9) & 0x7F);

        let second = ((dos_time & 0x1F) as u8) * 2;
        let minute = ((dos_time >> 5) & 0x3F) as u8;
        let hour = ((dos_time >> 11) & 0x1F) as u8;

        let candidate = DosDateTime {
            year,
            month,
            day,
            hour,
            minute,
            second,
        };

        if candidate.is_valid() {
            candidate
        } else {
            log::warn!(
                "invalid packed DOS date/time (date=0x{:04x}, time=0x{:04x}), falling back to 1980-01-01",
                dos_date, dos_time
            );
            DosDateTime::EPOCH
        }
    }

    fn is_valid(&self) -> bool {
        if self.month == 0 || self.month > 12 {
            return false;
        }
        if self.day == 0 || self.day > days_in_month(self.year, self.month) {
            return false;
        }
        self.hour < 24 && self.minute < 60 && self.second < 60
    }

    /// Encode into a packed (dos_date, dos_time) pair. The year is clamped
    /// to [1980, 2107]; an out-of-range month/day/hour/minute/second is a
    /// `FormatError` rather than a silent wraparound.
    pub fn to_dos(&self) -> Result<(u16, u16)> {
        if self.month == 0 || self.month > 12 {
            return Err(SZipError::FormatError(format!(
                "invalid month for DOS timestamp: {}",
                self.month
            )));
        }
        if self.day == 0 || self.day > 31 {
            return Err(SZipError::FormatError(format!(
                "invalid day for DOS timestamp: {}",
                self.day
            )));
        }
        if self.hour > 23 {
            return Err(SZipError::FormatError(format!(
                "invalid hour for DOS timestamp: {}",
                self.hour
            )));
        }
        if self.minute > 59 {
            return Err(SZipError::FormatError(format!(
                "invalid minute for DOS timestamp: {}",
                self.minute
            )));
        }
        if self.second > 59 {
            return Err(SZipError::FormatError(format!(
                "invalid second for DOS timestamp: {}",
                self.second
            )));
        }

        let clamped_year = self.year.clamp(1980, 2107) - 1980;

        let dos_date = (self.day as u16) | ((self.month as u16) << 5) | (clamped_year << 9);
        let dos_time =
            ((self.second / 2) as u16) | ((self.minute as u16) << 5) | ((self.hour as u16) << 11);

        Ok((dos_date, dos_time))
    }

    /// The current wall-clock time, truncated to 2-second DOS resolution.
    /// Implemented with a small civil-from-days calculation over
    /// `SystemTime` rather than pulling in a calendar crate purely for this.
    pub fn now() -> DosDateTime {
        let secs_since_epoch = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);
        DosDateTime::from_unix_timestamp(secs_since_epoch)
    }

    /// Convert seconds since the Unix epoch (1970-01-01 UTC) to calendar
    /// fields, using Howard Hinnant's `civil_from_days` algorithm.
    fn from_unix_timestamp(secs: u64) -> DosDateTime {
        let days = (secs / 86_400) as i64;
        let time_of_day = (secs % 86_400) as u32;

        let (year, month, day) = civil_from_days(days);

        DosDateTime {
            year: year.clamp(1980, 2107) as u16,
            month,
            day,
            hour: (time_of_day / 3600) as u8,
            minute: ((time_of_day / 60) % 60) as u8,
            second: (time_of_day % 60) as u8,
        }
    }
}

fn is_leap_year(year: u16) -> bool {
    (year % 4 == 0 && year % 100 != 0) || year % 400 == 0
}

fn days_in_month(year: u16, month: u8) -> u8 {
    match month {
        1 | 3 | 5 | 7 | 8 | 10 | 12 => 31,
        4 | 6 | 9 | 11 => 30,
        2 => {
            if is_leap_year(year) {
                29
            } else {
                28
            }
        }
        _ => 0,
    }
}

/// Days-since-epoch to (year, month, day), per Howard Hinnant's
/// `civil_from_days`: <https://howardhinnant.github.io/date_algorithms.html>
fn civil_from_days(z: i64) -> (i64, u8, u8) {
    let z = z + 719_468;
    let era = if z >= 0 { z } else { z - 146_096 } / 146_097;
    let doe = (z - era * 146_097) as u64;
    let yoe = (doe - doe / 1460 + doe / 36524 - doe / 146_096) / 365;
    let y = yoe as i64 + era * 400;
    let doy = doe - (365 * yoe + yoe / 4 - yoe / 100);
    let mp = (5 * doy + 2) / 153;
    let d = (doy - (153 * mp + 2) / 5 + 1) as u8;
    let m = if mp < 10 { mp + 3 } else { mp - 9 } as u8;
    let y = if m <= 2 { y + 1 } else { y };
    (y, m, d)
}
