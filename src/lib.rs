//! This library decodes the binary timezone information files (TZif versions 1 and 2)
//! provided by IANA, answers "which UTC offset rule is in effect at instant T, and when
//! does it next change" queries, and caches decoded zones across the system zoneinfo
//! database as described in the man page (<http://man7.org/linux/man-pages/man5/tzfile.5.html>).
//!
//! Decoding a single file returns a [`Zoneinfo`] struct holding the TZfile fields:
//!
//! ```text
//! use tzcache::Zoneinfo;
//! let buf = std::fs::read("/usr/share/zoneinfo/America/Phoenix")?;
//! println!("{:?}", Zoneinfo::parse(&buf)?);
//! ```
//!
//! ```text
//! Zoneinfo { version: V2, transition_times: [-2717643600, -1633273200, ...],
//! transition_types: [2, 1, 2, 1, ...], types: [Ttinfo { tt_utoff: -26898, tt_isdst: false,
//! abbreviation: "LMT" }, ...], ... }
//! ```
//!
//! Point-in-time queries accept an epoch-millisecond number, a `chrono` datetime or an
//! RFC 3339 string, and resolve to the offset rule in effect:
//!
//! ```text
//! let tz = Zoneinfo::parse(&buf)?;
//! let t = tz.find_transition("1982-04-25T06:59:59Z", false).unwrap();
//! println!("{} {}s dst:{}", t.abbreviation, t.utc_offset, t.is_dst);
//! let next = tz.next_transition(&t);
//! ```
//!
//! Repeated decodes are amortized by [`ZoneCache`], which resolves logical zone names
//! against a zoneinfo root, memoizes failures, and can eagerly precache the whole tree
//! into a frozen case-insensitive snapshot:
//!
//! ```text
//! use tzcache::ZoneCache;
//! let cache = ZoneCache::system()?;
//! let sofia = cache.get("Europe/Sofia")?;
//! cache.precache(None);
//! assert!(cache.get_precached("europe/sofia").is_some());
//! ```
//!
//! Blocking and async (`tokio`) variants of the cache entry points are provided. With the
//! **json** feature, lookup results implement `Serialize` and expose a `to_json` method.

pub mod decode;
mod cache;
mod lookup;
mod parse;


pub use cache::{system_zoneinfo_root, ZoneCache};
pub use lookup::{rightmost_at_or_before, IntoInstant, Transition};
pub use parse::{Header, LeapSecond, Ttinfo, TzifVersion, Zoneinfo};

use std::{error, fmt};

#[derive(Debug, PartialEq, Eq, Clone)]
pub enum TzError {
    // Invalid file format
    InvalidMagic,
    // Version byte is neither NUL (v1) nor '2'
    UnsupportedFormat,
    // Declared counts exceed (or cannot fit) the buffer
    Truncated,
    // A transition refers to a rule outside the rule table
    InvalidTypeIndex,
    // No zone with the requested name
    ZoneNotFound,
    // No system zoneinfo directory found
    RootNotFound,
    // Filesystem error, by kind
    Io(std::io::ErrorKind),
}

impl fmt::Display for TzError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("TZfile error : ")?;
        match self {
            TzError::InvalidMagic => f.write_str("Invalid TZfile"),
            TzError::UnsupportedFormat => f.write_str("Only V1 and V2 formats are supported"),
            TzError::Truncated => f.write_str("Buffer too short for the declared counts"),
            TzError::InvalidTypeIndex => f.write_str("Transition type out of range"),
            TzError::ZoneNotFound => f.write_str("Zone not found"),
            TzError::RootNotFound => f.write_str("No zoneinfo directory found"),
            TzError::Io(kind) => write!(f, "I/O error ({:?})", kind),
        }
    }
}

impl From<std::io::Error> for TzError {
    fn from(e: std::io::Error) -> TzError {
        TzError::Io(e.kind())
    }
}

impl From<TzError> for std::io::Error {
    fn from(e: TzError) -> std::io::Error {
        std::io::Error::new(std::io::ErrorKind::Other, e)
    }
}

impl error::Error for TzError {}
