//! TZfile decoding. A version 1 section is always decoded first; when the version byte
//! announces a version 2 file, the second section (64-bit transition times, its own
//! repeated header) is decoded and supersedes the first for every query.

use byteorder::{ByteOrder, BE};
#[cfg(feature = "json")]
use serde::Serialize;

use crate::{decode, TzError};

// TZif magic four bytes
const MAGIC: u32 = 0x545A6966;
// Header length, including the reserved block
const HEADER_LEN: usize = 0x2C;

/// Format generation of the section a [`Zoneinfo`] was decoded from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "json", derive(Serialize))]
pub enum TzifVersion {
    V1,
    V2,
}

/// The six counts of a TZfile header, as named in `tzfile(5)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "json", derive(Serialize))]
pub struct Header {
    pub tzh_ttisgmtcnt: usize,
    pub tzh_ttisstdcnt: usize,
    pub tzh_leapcnt: usize,
    pub tzh_timecnt: usize,
    pub tzh_typecnt: usize,
    pub tzh_charcnt: usize,
}

/// One entry of the rule table: UTC offset, daylight saving flag, and the abbreviation
/// resolved from the blob at parse time.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "json", derive(Serialize))]
pub struct Ttinfo {
    pub tt_utoff: i32,
    pub tt_isdst: bool,
    pub abbreviation: String,
}

/// A historical leap-second insertion: the instant it occurred and the cumulative
/// number of leap seconds in effect after it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "json", derive(Serialize))]
pub struct LeapSecond {
    pub at: i64,
    pub cumulative: i32,
}

/// A decoded TZfile. Immutable once parsed; a buffer either yields a whole record or an
/// error, never a partially-valid one.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "json", derive(Serialize))]
pub struct Zoneinfo {
    /// Section generation the record comes from (v2 supersedes the embedded v1 data)
    pub version: TzifVersion,
    /// The six header counts
    pub header: Header,
    /// Transition times, seconds since epoch, ascending
    pub transition_times: Vec<i64>,
    /// Per-transition indices into `types`
    pub transition_types: Vec<u8>,
    /// The rule table
    pub types: Vec<Ttinfo>,
    /// Raw abbreviation blob (NUL-separated)
    pub abbreviations: Vec<u8>,
    /// Leap-second descriptors
    pub leap_seconds: Vec<LeapSecond>,
    /// Standard/wall indicators for POSIX-style rule conversion
    pub ttisstd: Vec<bool>,
    /// UT/local indicators for POSIX-style rule conversion
    pub ttisgmt: Vec<bool>,
}

impl Zoneinfo {
    /// Decodes a TZfile buffer.
    ///
    /// Version 2 files embed a complete v1-compatible section first; it is decoded for
    /// its length, then discarded in favor of the 64-bit section that follows. The
    /// trailing newline-delimited TZ string of v2 files is ignored.
    pub fn parse(buffer: &[u8]) -> Result<Zoneinfo, TzError> {
        let (header, version) = parse_header(buffer, 0)?;
        let (v1, v1_end) = parse_body(buffer, &header, TzifVersion::V1)?;
        match version {
            TzifVersion::V1 => Ok(v1),
            TzifVersion::V2 => {
                let (header, _) = parse_header(buffer, v1_end)?;
                let (v2, _) = parse_body(buffer, &header, TzifVersion::V2)?;
                Ok(v2)
            }
        }
    }
}

/// Section header and layout information: counts plus the offset where the body starts.
struct SectionHeader {
    start: usize,
    counts: Header,
}

fn parse_header(buffer: &[u8], start: usize) -> Result<(SectionHeader, TzifVersion), TzError> {
    let end = start.checked_add(HEADER_LEN).ok_or(TzError::Truncated)?;
    if end > buffer.len() {
        return Err(TzError::Truncated);
    }
    let magic = BE::read_u32(&buffer[start..start + 4]);
    if magic != MAGIC {
        return Err(TzError::InvalidMagic);
    }
    let version = match buffer[start + 4] {
        0 => TzifVersion::V1,
        b'2' => TzifVersion::V2,
        _ => return Err(TzError::UnsupportedFormat),
    };
    let counts = Header {
        tzh_ttisgmtcnt: read_count(buffer, start + 0x14)?,
        tzh_ttisstdcnt: read_count(buffer, start + 0x18)?,
        tzh_leapcnt: read_count(buffer, start + 0x1C)?,
        tzh_timecnt: read_count(buffer, start + 0x20)?,
        tzh_typecnt: read_count(buffer, start + 0x24)?,
        tzh_charcnt: read_count(buffer, start + 0x28)?,
    };
    Ok((SectionHeader { start: end, counts }, version))
}

// A negative count can never match a real buffer; report it as a truncation.
fn read_count(buffer: &[u8], offset: usize) -> Result<usize, TzError> {
    let count = decode::read_i32(buffer, offset)?;
    if count < 0 {
        return Err(TzError::Truncated);
    }
    Ok(count as usize)
}

fn parse_body(
    buffer: &[u8],
    header: &SectionHeader,
    version: TzifVersion,
) -> Result<(Zoneinfo, usize), TzError> {
    let counts = header.counts;
    let time_size = match version {
        TzifVersion::V1 => 4,
        TzifVersion::V2 => 8,
    };
    let leap_size = time_size + 4;

    // Section layout, in order: transition times, type indices, rule records,
    // abbreviation blob, leap descriptors, ttisstd flags, ttisgmt flags.
    let times_start = header.start;
    let indices_start = section_end(times_start, counts.tzh_timecnt, time_size)?;
    let types_start = section_end(indices_start, counts.tzh_timecnt, 1)?;
    let chars_start = section_end(types_start, counts.tzh_typecnt, 6)?;
    let leaps_start = section_end(chars_start, counts.tzh_charcnt, 1)?;
    let ttisstd_start = section_end(leaps_start, counts.tzh_leapcnt, leap_size)?;
    let ttisgmt_start = section_end(ttisstd_start, counts.tzh_ttisstdcnt, 1)?;
    let body_end = section_end(ttisgmt_start, counts.tzh_ttisgmtcnt, 1)?;
    if body_end > buffer.len() {
        return Err(TzError::Truncated);
    }

    let transition_times = match version {
        TzifVersion::V1 => buffer[times_start..indices_start]
            .chunks_exact(4)
            .map(|t| i64::from(BE::read_i32(t)))
            .collect(),
        TzifVersion::V2 => buffer[times_start..indices_start]
            .chunks_exact(8)
            .map(BE::read_i64)
            .collect(),
    };

    let transition_types = buffer[indices_start..types_start].to_vec();
    for &index in &transition_types {
        if usize::from(index) >= counts.tzh_typecnt {
            return Err(TzError::InvalidTypeIndex);
        }
    }

    let abbreviations = &buffer[chars_start..leaps_start];
    let types: Vec<Ttinfo> = buffer[types_start..chars_start]
        .chunks_exact(6)
        .map(|tti| Ttinfo {
            tt_utoff: BE::read_i32(&tti[0..4]),
            tt_isdst: tti[4] != 0,
            abbreviation: decode::read_stringz(abbreviations, usize::from(tti[5])),
        })
        .collect();

    let leap_seconds = buffer[leaps_start..ttisstd_start]
        .chunks_exact(leap_size)
        .map(|leap| LeapSecond {
            at: match version {
                TzifVersion::V1 => i64::from(BE::read_i32(&leap[0..4])),
                TzifVersion::V2 => BE::read_i64(&leap[0..8]),
            },
            cumulative: BE::read_i32(&leap[time_size..leap_size]),
        })
        .collect();

    let ttisstd = buffer[ttisstd_start..ttisgmt_start]
        .iter()
        .map(|&b| b != 0)
        .collect();
    let ttisgmt = buffer[ttisgmt_start..body_end]
        .iter()
        .map(|&b| b != 0)
        .collect();

    Ok((
        Zoneinfo {
            version,
            header: counts,
            transition_times,
            transition_types,
            types,
            abbreviations: abbreviations.to_vec(),
            leap_seconds,
            ttisstd,
            ttisgmt,
        },
        body_end,
    ))
}

fn section_end(start: usize, count: usize, item_size: usize) -> Result<usize, TzError> {
    count
        .checked_mul(item_size)
        .and_then(|len| start.checked_add(len))
        .ok_or(TzError::Truncated)
}
